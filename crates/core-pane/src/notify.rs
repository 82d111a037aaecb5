//! The notification graph: many-to-many pub/sub edges between panes.
//!
//! An edge is (source, watcher, name); the source keeps the notifiee list
//! (who watches me), the watcher keeps back references for cleanup. Both
//! ends jointly own an edge: closing either breaks it.
//!
//! Delivery protocol: edges are tagged `noted = 0` before the walk, set to
//! 2 while the watcher's handler runs, and settle at 1 afterwards. The
//! walk always rescans from the newest edge, so notifiees are reached in
//! reverse insertion order and a handler that mutates the list restarts
//! the iteration without ever delivering twice. Observing an edge at 2 on
//! entry means the same notification name re-entered its own dispatch;
//! that fails with a dedicated error before any handler runs.

use core_proto::{CallError, PaneId, keys};
use tracing::{debug, trace};

use crate::call::CallInfo;
use crate::editor::Editor;
use crate::pane::NotifyEdge;

impl Editor {
    /// Make `watcher` observe notifications named `name` from `source`.
    /// Idempotent: a second registration of the same edge is a no-op.
    pub fn add_notify(&mut self, watcher: PaneId, source: PaneId, name: &str) -> bool {
        if self.pane(watcher).is_none() || self.pane(source).is_none() {
            return false;
        }
        let exists = self
            .pane(source)
            .is_some_and(|s| s.notifiees.iter().any(|e| e.watcher == watcher && e.name == name));
        if exists {
            return true;
        }
        if let Some(s) = self.pane_slot_mut(source) {
            s.notifiees.push(NotifyEdge {
                watcher,
                name: name.to_owned(),
                noted: 0,
            });
        }
        if let Some(w) = self.pane_slot_mut(watcher) {
            w.notifiers.push((source, name.to_owned()));
        }
        trace!(target: "pane.notify", watcher = %watcher, source = %source, name, "add_notify");
        true
    }

    /// Unlink every edge where `watcher` observes someone, optionally
    /// restricted to one notification name. Both ends are cleaned.
    pub fn drop_notifiers(&mut self, watcher: PaneId, name: Option<&str>) {
        let Some(w) = self.pane_slot_mut(watcher) else {
            return;
        };
        let (dropped, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut w.notifiers)
            .into_iter()
            .partition(|(_, n)| name.is_none_or(|want| n.as_str() == want));
        w.notifiers = kept;
        for (source, n) in dropped {
            if let Some(s) = self.pane_slot_mut(source) {
                s.notifiees
                    .retain(|e| !(e.watcher == watcher && e.name == n));
            }
        }
    }

    /// Deliver the notification `name` from `source` to its watchers.
    /// `ci` carries the arguments; its key and focus are overwritten.
    /// Returns how many watchers returned success.
    pub fn notify(&mut self, source: PaneId, name: &str, ci: &mut CallInfo) -> Result<i32, CallError> {
        // Re-entry of the same name inside its own dispatch is refused
        // before any handler runs.
        let reentered = self
            .pane(source)
            .is_some_and(|s| s.notifiees.iter().any(|e| e.name == name && e.noted == 2));
        if reentered {
            debug!(target: "pane.notify", source = %source, name, "recursive notification refused");
            return Err(CallError::NotifyLoop(name.to_owned()));
        }
        if let Some(s) = self.pane_slot_mut(source) {
            for e in s.notifiees.iter_mut().filter(|e| e.name == name) {
                e.noted = 0;
            }
        }
        let mut handled = 0;
        loop {
            // Newest pending edge; rescanning after every delivery makes
            // list mutation restart-safe.
            let Some(watcher) = self.pane(source).and_then(|s| {
                s.notifiees
                    .iter()
                    .rev()
                    .find(|e| e.name == name && e.noted == 0)
                    .map(|e| e.watcher)
            }) else {
                break;
            };
            if let Some(s) = self.pane_slot_mut(source)
                && let Some(e) = s
                    .notifiees
                    .iter_mut()
                    .rev()
                    .find(|e| e.name == name && e.noted == 0)
            {
                e.noted = 2;
            }
            ci.key = name.to_owned();
            ci.hash = None;
            ci.home = None;
            ci.focus = Some(source);
            trace!(target: "pane.notify", source = %source, watcher = %watcher, name, "notify_deliver");
            match self.call_pane(watcher, ci) {
                Ok(r) if r.is_handled() => handled += 1,
                Ok(_) => {}
                Err(err) => {
                    debug!(target: "pane.notify", watcher = %watcher, name, %err, "notifiee failed");
                }
            }
            // Settle the edge if it survived the handler.
            if let Some(s) = self.pane_slot_mut(source)
                && let Some(e) = s
                    .notifiees
                    .iter_mut()
                    .find(|e| e.watcher == watcher && e.name == name && e.noted == 2)
            {
                e.noted = 1;
            }
        }
        Ok(handled)
    }

    /// Drain the notifiee list unconditionally, delivering `Notify:Close`
    /// to each watcher before breaking the edge. Run while the pane is
    /// closing.
    pub(crate) fn notify_close(&mut self, p: PaneId) {
        loop {
            let Some(edge) = self.pane_slot_mut(p).and_then(|s| s.notifiees.pop()) else {
                break;
            };
            if let Some(w) = self.pane_slot_mut(edge.watcher) {
                w.notifiers
                    .retain(|(src, n)| !(*src == p && *n == edge.name));
            }
            let mut ci = CallInfo::new(keys::NOTIFY_CLOSE).with_focus(p);
            ci.str1 = Some(edge.name.clone());
            let _ = self.call_pane(edge.watcher, &mut ci);
        }
    }

    /// Count of watchers for `name` on `source` (diagnostics and tests).
    pub fn notifiee_count(&self, source: PaneId, name: &str) -> usize {
        self.pane(source)
            .map(|s| s.notifiees.iter().filter(|e| e.name == name).count())
            .unwrap_or(0)
    }
}
