//! Command dispatch: the universal invocation contract.
//!
//! `handle()` is the single entry point for every inter-pane call. With a
//! home pane set it invokes that pane's handler directly; otherwise it
//! walks parentward from the focus pane, skipping handlers that are not
//! close-safe on CLOSED panes, until one returns anything other than
//! `Fallthrough`. Errors never continue routing.
//!
//! Every invocation pushes a backtrace frame and bumps the depth counter;
//! at the fixed limit the call fails, the backtrace is logged, and a
//! diagnosis message is queued for the root's broadcast channel. The
//! times-up deadline is consulted on entry and short-circuits further
//! handlers.

use core_proto::{CallError, CallResult, CmdRet, MAX_DEPTH, TraceFrame, hash_key, keys};
use tracing::{trace, warn};

use crate::call::CallInfo;
use crate::comm::CommandHandle;
use crate::editor::Editor;

/// Frames kept for diagnosis; deeper frames are dropped, not the call.
const BACKTRACE_KEEP: usize = 48;

impl Editor {
    /// Route a call. See the module docs for the contract.
    pub fn handle(&mut self, ci: &mut CallInfo) -> CallResult {
        if self.times_up() {
            return Err(CallError::TimesUp);
        }
        if self.depth >= MAX_DEPTH {
            self.record_depth_overflow(ci);
            return Err(CallError::TooDeep);
        }
        self.depth += 1;
        let traced = self.backtrace.len() < BACKTRACE_KEEP;
        if traced {
            self.backtrace.push(TraceFrame {
                key: ci.key.clone(),
                home: ci.home,
                focus: ci.focus,
            });
        }
        if ci.hash.is_none() {
            ci.hash = Some(hash_key(&ci.key));
        }
        trace!(target: "dispatch", key = %ci.key, home = ?ci.home, focus = ?ci.focus, depth = self.depth, "call");
        let result = match ci.home {
            Some(home) => self.call_pane(home, ci),
            None => self.route_from_focus(ci),
        };
        if traced {
            self.backtrace.pop();
        }
        self.depth -= 1;
        result
    }

    /// Build-and-route convenience for callers without extra arguments.
    pub fn call(&mut self, key: &str, focus: core_proto::PaneId) -> CallResult {
        let mut ci = CallInfo::new(key).with_focus(focus);
        self.handle(&mut ci)
    }

    /// Invoke one pane's handler (if it has one and is allowed to run).
    pub(crate) fn call_pane(&mut self, home: core_proto::PaneId, ci: &mut CallInfo) -> CallResult {
        let Some(pane) = self.pane(home) else {
            return Ok(CmdRet::Fallthrough);
        };
        let closed = pane.closed();
        let Some(handler) = pane.handler.clone() else {
            return Ok(CmdRet::Fallthrough);
        };
        if closed && !handler.close_safe() {
            return Ok(CmdRet::Fallthrough);
        }
        ci.home = Some(home);
        self.invoke(handler, ci)
    }

    /// Invoke a specific command with the record; `comm` is rewritten to
    /// the command being run.
    pub fn invoke(&mut self, cmd: CommandHandle, ci: &mut CallInfo) -> CallResult {
        ci.comm = Some(cmd.clone());
        (cmd.func())(self, ci)
    }

    fn route_from_focus(&mut self, ci: &mut CallInfo) -> CallResult {
        let mut cur = ci.require_focus()?;
        loop {
            let r = self.call_pane(cur, ci)?;
            if r.is_handled() {
                return Ok(r);
            }
            let Some(pane) = self.pane(cur) else {
                return Ok(CmdRet::Fallthrough);
            };
            if pane.parent == cur {
                return Ok(CmdRet::Fallthrough);
            }
            cur = pane.parent;
        }
    }

    /// Enumerate the global registry's bindings under `prefix` in key
    /// order, invoking each until one claims the call. Drives
    /// prefix-addressed protocols.
    pub fn handle_prefix(&mut self, prefix: &str, ci: &mut CallInfo) -> CallResult {
        let bound: Vec<(String, CommandHandle)> = self
            .commands
            .iter_prefix(prefix)
            .map(|(k, c)| (k.to_owned(), c.clone()))
            .collect();
        for (key, cmd) in bound {
            ci.key = key;
            ci.hash = None;
            let r = self.invoke(cmd, ci)?;
            if r.is_handled() {
                return Ok(r);
            }
        }
        Ok(CmdRet::Fallthrough)
    }

    /// The last recorded dispatch backtrace (depth overflow diagnosis).
    pub fn backtrace(&self) -> &[TraceFrame] {
        &self.backtrace
    }

    fn record_depth_overflow(&mut self, ci: &CallInfo) {
        let trace_text = self
            .backtrace
            .iter()
            .rev()
            .take(12)
            .map(|f| f.to_string())
            .collect::<Vec<_>>()
            .join(" <- ");
        warn!(
            target: "dispatch",
            key = %ci.key,
            depth = self.depth,
            backtrace = %trace_text,
            "dispatch depth limit exceeded"
        );
        self.pending_diagnosis.get_or_insert_with(|| {
            format!("dispatch depth limit exceeded at {:?}", ci.key)
        });
    }

    /// Queue a message onto the root's broadcast channel; delivered from
    /// the next refresh pass.
    pub(crate) fn broadcast_pending(&mut self) {
        let Some(msg) = self.pending_diagnosis.take() else {
            return;
        };
        let root = self.root();
        let mut ci = CallInfo::new(keys::MESSAGE_BROADCAST).with_str(msg);
        if let Err(err) = self.notify(root, keys::MESSAGE_BROADCAST, &mut ci) {
            warn!(target: "dispatch", %err, "broadcast failed");
        }
    }
}
