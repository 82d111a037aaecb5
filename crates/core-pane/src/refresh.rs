//! The damage/refresh scheduler: a multi-phase tree walk that resolves
//! size, view, content, cursor and postorder damage to a stable display.
//!
//! One pass runs the four phases in order; the pass repeats (up to five
//! iterations) while handlers keep re-damaging the tree, then a
//! rate-limited livelock warning fires. Child iteration in every phase
//! uses the NOT_HANDLED stamp with restart-on-mutation, so handlers that
//! close or reparent children mid-walk are safe.
//!
//! Absolute-z invariant maintained by the resize phase: the lowest-z
//! layer of children sits at parent.abs_z + 1, and each higher layer
//! starts past the previous layer's subtree maximum. This defines the
//! total drawing order `masked()` queries.

use core_proto::{CmdRet, PaneId, keys};
use tracing::trace;

use crate::call::CallInfo;
use crate::damage::Damage;
use crate::editor::Editor;

/// A refresh pass gives up after this many full iterations.
const MAX_PASSES: u32 = 5;

impl Editor {
    /// Run refresh passes until the tree is stable (or the iteration
    /// limit trips), then drain the delayed-free queue.
    pub fn refresh(&mut self) {
        self.broadcast_pending();
        let root = self.root();
        let mut converged = false;
        for pass in 0..MAX_PASSES {
            if !self.pane(root).is_some_and(|p| p.damage.needs_refresh()) {
                converged = true;
                break;
            }
            trace!(target: "refresh", pass, "refresh_pass");
            self.phase_size(root, true);
            self.phase_view(root);
            self.phase_content(root);
            self.phase_postorder(root);
        }
        if !converged && self.pane(root).is_some_and(|p| p.damage.needs_refresh()) {
            self.warn_livelock();
            self.broadcast_pending();
        }
        self.quiesce();
    }

    /// Stamp children NOT_HANDLED, then repeatedly take any stamped child
    /// and hand it to `f`. Handlers may mutate the child list freely; the
    /// scan restarts from the live list every iteration.
    fn for_each_child(&mut self, p: PaneId, mut f: impl FnMut(&mut Self, PaneId)) {
        let children: Vec<PaneId> = self
            .pane(p)
            .map(|pa| pa.children.clone())
            .unwrap_or_default();
        for c in children {
            if let Some(cp) = self.pane_slot_mut(c) {
                cp.damage |= Damage::NOT_HANDLED;
            }
        }
        loop {
            let next = self.pane(p).and_then(|pa| {
                pa.children
                    .iter()
                    .copied()
                    .find(|c| {
                        self.pane(*c)
                            .is_some_and(|cp| cp.damage.contains(Damage::NOT_HANDLED))
                    })
            });
            let Some(c) = next else {
                break;
            };
            if let Some(cp) = self.pane_slot_mut(c) {
                cp.damage.remove(Damage::NOT_HANDLED);
            }
            f(self, c);
        }
    }

    // ---------------------------------------------------------------------
    // Phase 1: resize (pre-order)
    // ---------------------------------------------------------------------

    /// `allow_refit` is cleared below a pane whose `Refresh:size` handler
    /// claimed the propagation (non-zero return): that handler laid its
    /// children out itself, so the default fit-to-parent must not stomp
    /// its geometry.
    pub(crate) fn phase_size(&mut self, p: PaneId, allow_refit: bool) {
        let Some(pane) = self.pane(p) else {
            return;
        };
        let damage = pane.damage;
        if damage.contains(Damage::SIZE) {
            let parent = pane.parent;
            let z = pane.z;
            if allow_refit && z == 0 && parent != p {
                let (pw, ph) = self
                    .pane(parent)
                    .map(|pp| (pp.w, pp.h))
                    .unwrap_or((0, 0));
                if let Some(pm) = self.pane_slot_mut(p)
                    && (pm.w, pm.h) != (pw, ph)
                {
                    pm.x = 0;
                    pm.y = 0;
                    pm.w = pw;
                    pm.h = ph;
                }
            }
            if let Some(pm) = self.pane_slot_mut(p) {
                pm.damage.remove(Damage::SIZE | Damage::SIZE_CHILD);
            }
            // Resized means redrawn; ancestors pick up CHILD so the
            // content phase finds its way down.
            self.mark_damaged(p, Damage::CONTENT | Damage::CHILD);
            let mut ci = CallInfo::new(keys::REFRESH_SIZE).with_home(p).with_focus(p);
            let handled = matches!(self.handle(&mut ci), Ok(CmdRet::Num(_)));
            self.compute_abs_z(p);
            self.for_each_child(p, |ed, c| {
                if !handled
                    && let Some(cp) = ed.pane_slot_mut(c)
                    && cp.z >= 0
                {
                    cp.damage |= Damage::SIZE;
                }
                ed.phase_size(c, !handled);
            });
        } else if damage.contains(Damage::SIZE_CHILD) {
            if let Some(pm) = self.pane_slot_mut(p) {
                pm.damage.remove(Damage::SIZE_CHILD);
            }
            self.compute_abs_z(p);
            self.for_each_child(p, |ed, c| {
                let child_damage = ed.pane(c).map(|cp| cp.damage).unwrap_or_default();
                if child_damage.intersects(Damage::SIZE | Damage::SIZE_CHILD) {
                    ed.phase_size(c, true);
                }
            });
        }
    }

    /// Absolute depth for `p`'s children: ascending z layers, each layer
    /// starting past the previous layer's subtree maximum.
    pub(crate) fn compute_abs_z(&mut self, p: PaneId) {
        let base = self.pane(p).map(|pa| pa.abs_z).unwrap_or(0);
        let mut kids: Vec<(i32, PaneId)> = self
            .pane(p)
            .map(|pa| {
                pa.children
                    .iter()
                    .filter_map(|c| self.pane(*c).map(|cp| (cp.z, *c)))
                    .collect()
            })
            .unwrap_or_default();
        kids.sort_by_key(|(z, _)| *z);
        let mut hi = base;
        let mut i = 0;
        while i < kids.len() {
            let layer_z = kids[i].0;
            if layer_z < 0 {
                // Light-weight panes sit at their parent's depth.
                while i < kids.len() && kids[i].0 == layer_z {
                    let c = kids[i].1;
                    if let Some(cp) = self.pane_slot_mut(c) {
                        cp.abs_z = base;
                        cp.abs_z_hi = base;
                    }
                    i += 1;
                }
                continue;
            }
            let layer_abs = hi + 1;
            let mut layer_hi = layer_abs;
            while i < kids.len() && kids[i].0 == layer_z {
                let c = kids[i].1;
                if let Some(cp) = self.pane_slot_mut(c) {
                    cp.abs_z = layer_abs;
                }
                self.compute_abs_z(c);
                let sub_hi = self.pane(c).map(|cp| cp.abs_z_hi).unwrap_or(layer_abs);
                layer_hi = layer_hi.max(sub_hi);
                i += 1;
            }
            hi = layer_hi;
        }
        if let Some(pa) = self.pane_slot_mut(p) {
            pa.abs_z_hi = hi;
        }
    }

    // ---------------------------------------------------------------------
    // Phase 2: view (pre-order)
    // ---------------------------------------------------------------------

    pub(crate) fn phase_view(&mut self, p: PaneId) {
        let Some(pane) = self.pane(p) else {
            return;
        };
        let damage = pane.damage;
        if damage.contains(Damage::VIEW) {
            if let Some(pm) = self.pane_slot_mut(p) {
                pm.damage.remove(Damage::VIEW);
            }
            let mut ci = CallInfo::new(keys::REFRESH_VIEW).with_home(p).with_focus(p);
            let _ = self.handle(&mut ci);
        }
        if damage.contains(Damage::VIEW_CHILD) {
            if let Some(pm) = self.pane_slot_mut(p) {
                pm.damage.remove(Damage::VIEW_CHILD);
            }
            self.for_each_child(p, |ed, c| {
                let d = ed.pane(c).map(|cp| cp.damage).unwrap_or_default();
                if d.intersects(Damage::VIEW | Damage::VIEW_CHILD) {
                    ed.phase_view(c);
                }
            });
        }
    }

    // ---------------------------------------------------------------------
    // Phase 3: content (pre-order); CONTENT implies CURSOR
    // ---------------------------------------------------------------------

    pub(crate) fn phase_content(&mut self, p: PaneId) {
        let Some(pane) = self.pane(p) else {
            return;
        };
        let damage = pane.damage;
        if damage.intersects(Damage::NEED_CALL) {
            if let Some(pm) = self.pane_slot_mut(p) {
                pm.damage.remove(Damage::NEED_CALL);
            }
            let mut ci = CallInfo::new(keys::REFRESH).with_home(p).with_focus(p);
            if damage.contains(Damage::CONTENT) {
                ci.num = Some(1);
            }
            let _ = self.handle(&mut ci);
        }
        if damage.contains(Damage::CHILD) {
            if let Some(pm) = self.pane_slot_mut(p) {
                pm.damage.remove(Damage::CHILD);
            }
            self.for_each_child(p, |ed, c| {
                let d = ed.pane(c).map(|cp| cp.damage).unwrap_or_default();
                if d.intersects(Damage::NEED_CALL | Damage::CHILD) {
                    ed.phase_content(c);
                }
            });
        }
    }

    // ---------------------------------------------------------------------
    // Phase 4: postorder
    // ---------------------------------------------------------------------

    pub(crate) fn phase_postorder(&mut self, p: PaneId) {
        let Some(pane) = self.pane(p) else {
            return;
        };
        let damage = pane.damage;
        if damage.contains(Damage::POSTORDER_CHILD) {
            if let Some(pm) = self.pane_slot_mut(p) {
                pm.damage.remove(Damage::POSTORDER_CHILD);
            }
            self.for_each_child(p, |ed, c| {
                let d = ed.pane(c).map(|cp| cp.damage).unwrap_or_default();
                if d.intersects(Damage::POSTORDER | Damage::POSTORDER_CHILD) {
                    ed.phase_postorder(c);
                }
            });
        }
        if self
            .pane(p)
            .is_some_and(|pa| pa.damage.contains(Damage::POSTORDER))
        {
            if let Some(pm) = self.pane_slot_mut(p) {
                pm.damage.remove(Damage::POSTORDER);
            }
            let mut ci = CallInfo::new(keys::REFRESH_POSTORDER).with_home(p).with_focus(p);
            let _ = self.handle(&mut ci);
        }
    }
}
