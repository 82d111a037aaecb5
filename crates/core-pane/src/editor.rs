//! The editor root: pane arena, registration, and tree surgery.
//!
//! Panes live in a generational slot arena; every cross reference (parent,
//! focus, notification edge, mark owner) is a [`PaneId`] resolved against
//! it, so stale ids go quiet instead of aliasing a recycled slot. The
//! owning relation is strictly tree shaped: panes own their children, and
//! closing a pane closes the whole subtree.
//!
//! Invariants:
//! * Following parent links from any live pane reaches the root; the
//!   root's parent is itself.
//! * `focus` is nil or one of the pane's z≥0 children.
//! * A CLOSED pane stays resolvable (its parent link intact) until the
//!   delayed-free queue drains at the next quiescent point, so descendants
//!   still inside their own Close handlers can escalate calls.

use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Instant;

use core_attrs::AttrStore;
use core_keymap::Keymap;
use core_proto::{CallError, CallResult, CmdRet, PaneId, TraceFrame, keys};
use smallvec::SmallVec;
use tracing::{debug, trace, warn};

use crate::call::CallInfo;
use crate::comm::CommandHandle;
use crate::damage::Damage;
use crate::pane::Pane;

pub struct Editor {
    pub(crate) panes: Vec<Option<Pane>>,
    pub(crate) generations: Vec<u32>,
    pub(crate) free_list: Vec<usize>,
    root: PaneId,
    /// Global command registry: names and name ranges to commands.
    pub(crate) commands: Keymap<CommandHandle>,
    /// Fallback dispatcher installed via `global-set-keymap`.
    pub(crate) global_fallback: Option<CommandHandle>,
    pub(crate) depth: u32,
    pub(crate) backtrace: SmallVec<[TraceFrame; 16]>,
    pub(crate) deadline: Option<Instant>,
    pub(crate) pending_free: Vec<PaneId>,
    pub(crate) pending_diagnosis: Option<String>,
    pub(crate) last_livelock_warn: Option<Instant>,
}

impl std::fmt::Debug for Editor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let alive = self.panes.iter().filter(|p| p.is_some()).count();
        f.debug_struct("Editor")
            .field("panes_alive", &alive)
            .field("root", &self.root)
            .field("depth", &self.depth)
            .field("pending_free", &self.pending_free.len())
            .finish_non_exhaustive()
    }
}

impl Default for Editor {
    fn default() -> Self {
        Self::new()
    }
}

impl Editor {
    pub fn new() -> Self {
        let mut ed = Self {
            panes: Vec::new(),
            generations: Vec::new(),
            free_list: Vec::new(),
            root: PaneId::new(0, 0),
            commands: Keymap::new(),
            global_fallback: None,
            depth: 0,
            backtrace: SmallVec::new(),
            deadline: None,
            pending_free: Vec::new(),
            pending_diagnosis: None,
            last_livelock_warn: None,
        };
        let root_handler = CommandHandle::new_close_safe("editor:global", Self::root_dispatch);
        let root = ed.alloc(PaneId::new(0, 0), 0, Some(root_handler), None);
        debug_assert_eq!(root, ed.root);
        // Self-loop parent on the root.
        if let Some(p) = ed.pane_slot_mut(root) {
            p.parent = root;
        }
        ed
    }

    /// The root pane's handler: the global registry plus the bootstrap
    /// registration keys.
    fn root_dispatch(ed: &mut Editor, ci: &mut CallInfo) -> CallResult {
        match ci.key.as_str() {
            keys::GLOBAL_SET_COMMAND => {
                let name = ci.require_str()?.to_owned();
                let cmd = ci.comm2.clone().ok_or(CallError::NoArg("comm2"))?;
                // str2 names an inclusive range end for prefix protocols.
                match ci.str2.clone() {
                    Some(high) => ed.register_command_range(&name, &high, cmd),
                    None => ed.register_command(&name, cmd),
                }
                Ok(CmdRet::ok())
            }
            keys::GLOBAL_SET_KEYMAP => {
                ed.global_fallback = Some(ci.comm2.clone().ok_or(CallError::NoArg("comm2"))?);
                Ok(CmdRet::ok())
            }
            _ => {
                let hash = ci.hash.unwrap_or_else(|| core_proto::hash_key(&ci.key));
                if let Some(cmd) = ed.commands.lookup_hashed(&ci.key, hash) {
                    return ed.invoke(cmd, ci);
                }
                match ed.global_fallback.clone() {
                    Some(fallback) => ed.invoke(fallback, ci),
                    None => Ok(CmdRet::Fallthrough),
                }
            }
        }
    }

    // ---------------------------------------------------------------------
    // Arena plumbing
    // ---------------------------------------------------------------------

    fn alloc(
        &mut self,
        parent: PaneId,
        z: i32,
        handler: Option<CommandHandle>,
        data: Option<Rc<dyn Any>>,
    ) -> PaneId {
        match self.free_list.pop() {
            Some(idx) => {
                let generation = self.generations[idx];
                let id = PaneId::new(idx as u32, generation);
                self.panes[idx] = Some(Pane::new(generation, parent, z, handler, data));
                id
            }
            None => {
                let idx = self.panes.len();
                self.generations.push(0);
                let id = PaneId::new(idx as u32, 0);
                self.panes.push(Some(Pane::new(0, parent, z, handler, data)));
                id
            }
        }
    }

    pub fn root(&self) -> PaneId {
        self.root
    }

    pub fn pane(&self, id: PaneId) -> Option<&Pane> {
        self.panes
            .get(id.idx())?
            .as_ref()
            .filter(|p| p.generation == id.generation())
    }

    pub(crate) fn pane_slot_mut(&mut self, id: PaneId) -> Option<&mut Pane> {
        self.panes
            .get_mut(id.idx())?
            .as_mut()
            .filter(|p| p.generation == id.generation())
    }

    pub fn attrs_mut(&mut self, id: PaneId) -> Option<&mut AttrStore> {
        self.pane_slot_mut(id).map(|p| &mut p.attrs)
    }

    pub fn set_cursor(&mut self, id: PaneId, cursor: Option<(i32, i32)>) {
        if let Some(p) = self.pane_slot_mut(id) {
            p.cursor = cursor;
            self.mark_damaged(id, Damage::CURSOR);
        }
    }

    /// Cursor placement from inside a refresh hook: no damage, so the
    /// pass converges.
    pub fn place_cursor(&mut self, id: PaneId, cursor: Option<(i32, i32)>) {
        if let Some(p) = self.pane_slot_mut(id) {
            p.cursor = cursor;
        }
    }

    /// Typed access to a pane's opaque data block.
    pub fn data<T: 'static>(&self, id: PaneId) -> Option<Rc<RefCell<T>>> {
        let rc = self.pane(id)?.data.clone()?;
        rc.downcast::<RefCell<T>>().ok()
    }

    // ---------------------------------------------------------------------
    // Global command registry
    // ---------------------------------------------------------------------

    pub fn register_command(&mut self, name: &str, cmd: CommandHandle) {
        trace!(target: "dispatch", name, "global_set_command");
        self.commands.add(name, cmd);
    }

    /// Register `cmd` for every key in the inclusive name range
    /// [`low`, `high`] (prefix protocols such as `doc:*`).
    pub fn register_command_range(&mut self, low: &str, high: &str, cmd: CommandHandle) {
        trace!(target: "dispatch", low, high, "global_set_command_range");
        self.commands.add_range(low, high, cmd);
    }

    // ---------------------------------------------------------------------
    // Pane lifecycle
    // ---------------------------------------------------------------------

    /// Create a pane under `parent`. The parent learns of it through a
    /// `ChildRegistered` call and may veto by closing the child, in which
    /// case registration fails.
    pub fn register(
        &mut self,
        parent: PaneId,
        z: i32,
        handler: Option<CommandHandle>,
        data: Option<Rc<dyn Any>>,
    ) -> Result<PaneId, CallError> {
        let (pw, ph) = {
            let par = self.pane(parent).ok_or(CallError::Invalid("parent"))?;
            if par.closed() {
                return Err(CallError::Invalid("parent is closed"));
            }
            (par.w, par.h)
        };
        let id = self.alloc(parent, z, handler, data);
        if let Some(p) = self.pane_slot_mut(id) {
            p.w = pw;
            p.h = ph;
        }
        if let Some(par) = self.pane_slot_mut(parent) {
            par.children.push(id);
            if par.focus.is_none() && z >= 0 {
                par.focus = Some(id);
            }
        }
        self.mark_damaged(id, Damage::SIZE | Damage::CONTENT);
        trace!(target: "pane.tree", pane = %id, parent = %parent, z, "pane_register");
        let mut ci = CallInfo::new(keys::CHILD_REGISTERED)
            .with_home(parent)
            .with_focus(id);
        let _ = self.handle(&mut ci);
        if self.pane(id).is_none_or(|p| p.closed()) {
            debug!(target: "pane.tree", pane = %id, "registration vetoed");
            return Err(CallError::Fail("child registration vetoed"));
        }
        Ok(id)
    }

    /// Create a detached pane (its own parent), used as a reparent target.
    pub fn register_detached(
        &mut self,
        z: i32,
        handler: Option<CommandHandle>,
        data: Option<Rc<dyn Any>>,
    ) -> PaneId {
        let id = self.alloc(PaneId::new(0, 0), z, handler, data);
        if let Some(p) = self.pane_slot_mut(id) {
            p.parent = id;
        }
        id
    }

    /// Move `p` under `newparent`, which must be attached outside `p`'s
    /// own subtree, or detached. A detached target is spliced into `p`'s
    /// old place first (and the old parent hears `ChildReplaced`); the
    /// new parent hears `ChildMoved` either way.
    pub fn reparent(&mut self, p: PaneId, newparent: PaneId) -> Result<(), CallError> {
        if p == self.root || p == newparent {
            return Err(CallError::Invalid("cannot reparent the root or into itself"));
        }
        let old = self.pane(p).ok_or(CallError::Invalid("pane"))?.parent;
        if old == newparent {
            return Ok(());
        }
        let np = self.pane(newparent).ok_or(CallError::Invalid("newparent"))?;
        let np_parent = np.parent;
        let detached = np_parent == newparent && newparent != self.root;
        // Cycle guard: the target must not live below p.
        let mut cur = newparent;
        loop {
            let Some(pane) = self.pane(cur) else {
                return Err(CallError::Invalid("newparent"));
            };
            if cur == p {
                return Err(CallError::Invalid("newparent is inside p's subtree"));
            }
            if pane.parent == cur {
                break;
            }
            cur = pane.parent;
        }

        let mut replaced = false;
        if detached {
            // Splice the detached pane into p's slot, inheriting place,
            // geometry and stacking.
            let (px, py, pw, ph, pz) = {
                let pane = self.pane(p).ok_or(CallError::Invalid("pane"))?;
                (pane.x, pane.y, pane.w, pane.h, pane.z)
            };
            let idx = self
                .pane(old)
                .and_then(|o| o.children.iter().position(|c| *c == p))
                .ok_or(CallError::Invalid("pane not under its parent"))?;
            if let Some(np) = self.pane_slot_mut(newparent) {
                np.parent = old;
                np.x = px;
                np.y = py;
                np.w = pw;
                np.h = ph;
                np.z = pz;
            }
            if let Some(o) = self.pane_slot_mut(old) {
                o.children[idx] = newparent;
                if o.focus == Some(p) {
                    o.focus = Some(newparent);
                }
            }
            replaced = true;
        } else if let Some(o) = self.pane_slot_mut(old) {
            o.children.retain(|c| *c != p);
            if o.focus == Some(p) {
                o.focus = None;
            }
        }
        let z = self.pane(p).map(|pa| pa.z).unwrap_or(0);
        if let Some(pa) = self.pane_slot_mut(p) {
            pa.parent = newparent;
        }
        if let Some(np) = self.pane_slot_mut(newparent) {
            np.children.push(p);
            if np.focus.is_none() && z >= 0 {
                np.focus = Some(p);
            }
        }
        // Repair the old parent's focus when the child took it along.
        if !replaced && self.pane(old).is_some_and(|o| o.focus.is_none()) {
            let next = self.pane(old).and_then(|o| {
                o.children
                    .iter()
                    .rev()
                    .copied()
                    .find(|c| self.pane(*c).is_some_and(|pa| pa.z >= 0 && !pa.closed()))
            });
            if let Some(o) = self.pane_slot_mut(old) {
                o.focus = next;
            }
        }
        self.mark_damaged(p, Damage::SIZE);
        trace!(target: "pane.tree", pane = %p, newparent = %newparent, replaced, "pane_reparent");
        let mut moved = CallInfo::new(keys::CHILD_MOVED)
            .with_home(newparent)
            .with_focus(p);
        let _ = self.handle(&mut moved);
        if replaced {
            let mut rep = CallInfo::new(keys::CHILD_REPLACED)
                .with_home(old)
                .with_focus(newparent);
            let _ = self.handle(&mut rep);
        }
        Ok(())
    }

    /// Reorder `p` among its siblings: directly after `sibling`, or to the
    /// head of the child list when `sibling` is nil.
    pub fn move_after(&mut self, p: PaneId, sibling: Option<PaneId>) -> Result<(), CallError> {
        let parent = self.pane(p).ok_or(CallError::Invalid("pane"))?.parent;
        if parent == p {
            return Err(CallError::Invalid("pane is detached"));
        }
        if let Some(s) = sibling
            && self.pane(s).map(|sp| sp.parent) != Some(parent)
        {
            return Err(CallError::Invalid("sibling has a different parent"));
        }
        let par = self.pane_slot_mut(parent).ok_or(CallError::Invalid("parent"))?;
        par.children.retain(|c| *c != p);
        let at = match sibling {
            None => 0,
            Some(s) => {
                par.children
                    .iter()
                    .position(|c| *c == s)
                    .ok_or(CallError::Invalid("sibling not under parent"))?
                    + 1
            }
        };
        par.children.insert(at, p);
        self.mark_damaged(parent, Damage::CONTENT);
        Ok(())
    }

    /// Splice `p`'s children into `into`, swap handler and data, then close
    /// the husk. Downstream observers of `into` never notice.
    pub fn subsume(&mut self, p: PaneId, into: PaneId) -> Result<(), CallError> {
        if p == into {
            return Err(CallError::Invalid("cannot subsume into itself"));
        }
        self.pane(into).ok_or(CallError::Invalid("into"))?;
        let (children, p_focus) = {
            let pane = self.pane_slot_mut(p).ok_or(CallError::Invalid("pane"))?;
            (std::mem::take(&mut pane.children), pane.focus.take())
        };
        for c in &children {
            if let Some(cp) = self.pane_slot_mut(*c) {
                cp.parent = into;
            }
        }
        {
            let into_pane = self.pane_slot_mut(into).ok_or(CallError::Invalid("into"))?;
            into_pane.children.extend(children);
            if into_pane.focus.is_none() {
                into_pane.focus = p_focus;
            }
        }
        // Swap the behavioural identity.
        let (ph, pd) = {
            let pane = self.pane_slot_mut(p).ok_or(CallError::Invalid("pane"))?;
            (pane.handler.take(), pane.data.take())
        };
        let (ih, idata) = {
            let into_pane = self.pane_slot_mut(into).ok_or(CallError::Invalid("into"))?;
            let ih = std::mem::replace(&mut into_pane.handler, ph);
            let idata = std::mem::replace(&mut into_pane.data, pd);
            (ih, idata)
        };
        if let Some(pane) = self.pane_slot_mut(p) {
            pane.handler = ih;
            pane.data = idata;
        }
        trace!(target: "pane.tree", pane = %p, into = %into, "pane_subsume");
        self.mark_damaged(into, Damage::CONTENT);
        self.close(p);
        Ok(())
    }

    /// Change geometry. Negative position arguments keep the current
    /// value; width and height clamp to at least 1. Any change damages
    /// SIZE (and CONTENT when the pane moved) and fires `Notify:resize`.
    pub fn resize(&mut self, p: PaneId, x: i32, y: i32, w: i32, h: i32) -> bool {
        let Some(pane) = self.pane(p) else {
            return false;
        };
        let (ox, oy, ow, oh) = (pane.x, pane.y, pane.w, pane.h);
        let nx = if x < 0 { ox } else { x };
        let ny = if y < 0 { oy } else { y };
        let nw = if w < 0 { ow } else { w.max(1) };
        let nh = if h < 0 { oh } else { h.max(1) };
        if (nx, ny, nw, nh) == (ox, oy, ow, oh) {
            return false;
        }
        let moved = (nx, ny) != (ox, oy);
        if let Some(pane) = self.pane_slot_mut(p) {
            pane.x = nx;
            pane.y = ny;
            pane.w = nw;
            pane.h = nh;
        }
        trace!(target: "pane.tree", pane = %p, x = nx, y = ny, w = nw, h = nh, "pane_resize");
        let mut flags = Damage::SIZE;
        if moved {
            flags |= Damage::CONTENT;
        }
        self.mark_damaged(p, flags);
        let mut ci = CallInfo::new(keys::NOTIFY_RESIZE);
        if let Err(err) = self.notify(p, keys::NOTIFY_RESIZE, &mut ci) {
            debug!(target: "pane.notify", pane = %p, %err, "resize notification failed");
        }
        true
    }

    /// OR damage flags into a pane and propagate the reduced set upward.
    /// Propagation stops where the parent already carries the bits;
    /// light-weight panes (z < 0) never propagate; a growing overlay
    /// (z > 0) damages the parent's content.
    pub fn mark_damaged(&mut self, p: PaneId, flags: Damage) {
        let Some(pane) = self.pane_slot_mut(p) else {
            return;
        };
        pane.damage |= flags;
        let mut cur = p;
        let mut cur_flags = flags;
        loop {
            let Some(pane) = self.pane(cur) else {
                return;
            };
            if pane.z < 0 {
                return;
            }
            let parent = pane.parent;
            if parent == cur {
                return;
            }
            let mut up = cur_flags.propagated();
            if pane.z > 0 && cur_flags.intersects(Damage::SIZE) {
                up |= Damage::CONTENT;
            }
            if up.is_empty() {
                return;
            }
            let Some(par) = self.pane_slot_mut(parent) else {
                return;
            };
            if par.damage.contains(up) {
                return;
            }
            par.damage |= up;
            cur = parent;
            cur_flags = up;
        }
    }

    /// Close a pane: CLOSED flag, `ChildClosed` to the parent, detach,
    /// recursive close of the subtree, focus repair, `Notify:Close` to
    /// watchers, the pane's own `Close` handler, then the delayed-free
    /// queue. The parent link stays valid until the free actually runs.
    pub fn close(&mut self, p: PaneId) {
        let Some(pane) = self.pane(p) else {
            return;
        };
        if pane.closed() {
            return;
        }
        let parent = pane.parent;
        let was_focus = parent != p && self.pane(parent).is_some_and(|par| par.focus == Some(p));
        // The previously-focused leaf hears pane:defocus while it is still
        // alive.
        if was_focus {
            let old_leaf = self.focus_leaf(p);
            let mut ci = CallInfo::new(keys::PANE_DEFOCUS).with_home(old_leaf).with_focus(p);
            let _ = self.handle(&mut ci);
            // The defocus handler may have closed p itself.
            if self.pane(p).is_none_or(|pa| pa.closed()) {
                return;
            }
        }
        if let Some(pane) = self.pane_slot_mut(p) {
            pane.damage |= Damage::CLOSED;
        }
        trace!(target: "pane.tree", pane = %p, "pane_close");
        if parent != p {
            let mut ci = CallInfo::new(keys::CHILD_CLOSED).with_home(parent).with_focus(p);
            let _ = self.handle(&mut ci);
            if let Some(par) = self.pane_slot_mut(parent) {
                par.children.retain(|c| *c != p);
                if par.focus == Some(p) {
                    par.focus = None;
                }
            }
            self.mark_damaged(parent, Damage::CONTENT);
        }
        // Children may vanish or move while their Close handlers run, so
        // restart the scan on every iteration.
        loop {
            let next = self
                .pane(p)
                .and_then(|pa| pa.children.iter().copied().find(|c| {
                    self.pane(*c).is_some_and(|cp| !cp.closed())
                }));
            match next {
                Some(c) => self.close(c),
                None => break,
            }
        }
        if was_focus {
            let next = self.pane(parent).and_then(|par| {
                par.children
                    .iter()
                    .rev()
                    .copied()
                    .find(|c| self.pane(*c).is_some_and(|cp| cp.z >= 0 && !cp.closed()))
            });
            if let Some(par) = self.pane_slot_mut(parent) {
                par.focus = next;
            }
            if let Some(nf) = next {
                let leaf = self.focus_leaf(nf);
                let mut ci = CallInfo::new(keys::PANE_REFOCUS).with_home(leaf).with_focus(leaf);
                let _ = self.handle(&mut ci);
            }
        }
        self.drop_notifiers(p, None);
        self.notify_close(p);
        let mut ci = CallInfo::new(keys::CLOSE).with_home(p).with_focus(p);
        let _ = self.handle(&mut ci);
        if let Some(pane) = self.pane_slot_mut(p) {
            pane.damage |= Damage::DEAD;
        }
        self.pending_free.push(p);
    }

    /// Drain the delayed-free queue. Runs only at a dispatch quiescent
    /// point; in-flight handlers keep their panes resolvable.
    pub fn quiesce(&mut self) {
        if self.depth > 0 {
            return;
        }
        while let Some(p) = self.pending_free.pop() {
            let mut ci = CallInfo::new(keys::FREE).with_home(p).with_focus(p);
            let _ = self.handle(&mut ci);
            let idx = p.idx();
            if self
                .panes
                .get(idx)
                .and_then(|s| s.as_ref())
                .is_some_and(|pa| pa.generation == p.generation())
            {
                self.panes[idx] = None;
                self.generations[idx] += 1;
                self.free_list.push(idx);
                trace!(target: "pane.tree", pane = %p, "pane_free");
            }
        }
        self.backtrace.clear();
    }

    // ---------------------------------------------------------------------
    // Focus
    // ---------------------------------------------------------------------

    /// The leaf reached by following focus links from `p`.
    pub fn focus_leaf(&self, p: PaneId) -> PaneId {
        let mut cur = p;
        while let Some(f) = self.pane(cur).and_then(|pa| pa.focus) {
            if self.pane(f).is_none() {
                break;
            }
            cur = f;
        }
        cur
    }

    /// Promote `p` as the focus at every level up to the root. The old
    /// leaf hears `pane:defocus`, the new one `pane:refocus`; focusing the
    /// already-focused pane is a no-op.
    pub fn set_focus(&mut self, p: PaneId) {
        let old_leaf = self.focus_leaf(self.root);
        let mut cur = p;
        loop {
            let Some(pane) = self.pane(cur) else {
                return;
            };
            if pane.z < 0 {
                break;
            }
            let parent = pane.parent;
            if parent == cur {
                break;
            }
            if let Some(par) = self.pane_slot_mut(parent) {
                par.focus = Some(cur);
            }
            cur = parent;
        }
        let new_leaf = self.focus_leaf(self.root);
        if old_leaf == new_leaf {
            return;
        }
        trace!(target: "pane.tree", from = %old_leaf, to = %new_leaf, "focus_change");
        let mut de = CallInfo::new(keys::PANE_DEFOCUS).with_home(old_leaf).with_focus(new_leaf);
        let _ = self.handle(&mut de);
        let mut re = CallInfo::new(keys::PANE_REFOCUS).with_home(new_leaf).with_focus(new_leaf);
        let _ = self.handle(&mut re);
        self.mark_damaged(new_leaf, Damage::CURSOR);
    }

    // ---------------------------------------------------------------------
    // Masking, attributes, scale, clone
    // ---------------------------------------------------------------------

    /// Absolute (root-relative) origin of a pane.
    fn abs_origin(&self, p: PaneId) -> (i32, i32) {
        let (mut ax, mut ay) = (0, 0);
        let mut cur = p;
        loop {
            let Some(pane) = self.pane(cur) else {
                break;
            };
            ax += pane.x;
            ay += pane.y;
            if pane.parent == cur {
                break;
            }
            cur = pane.parent;
        }
        (ax, ay)
    }

    /// Whether a higher-z pane occludes the rectangle at (`x`, `y`) in
    /// `p`'s coordinates. `w`/`h` in the result are reduced to the largest
    /// unoccluded prefix.
    pub fn masked(&self, p: PaneId, x: i32, y: i32, z: i32, w: i32, h: i32) -> MaskCheck {
        let (px, py) = self.abs_origin(p);
        let (rx, ry) = (px + x, py + y);
        let mut check = MaskCheck {
            masked: false,
            w: w.max(0),
            h: h.max(0),
        };
        self.mask_walk(self.root, 0, 0, p, z, rx, ry, &mut check);
        check
    }

    #[allow(clippy::too_many_arguments)]
    fn mask_walk(
        &self,
        node: PaneId,
        ox: i32,
        oy: i32,
        skip: PaneId,
        z: i32,
        rx: i32,
        ry: i32,
        check: &mut MaskCheck,
    ) {
        let Some(pane) = self.pane(node) else {
            return;
        };
        // Light-weight panes are invisible to masking.
        if pane.z < 0 {
            return;
        }
        let (ax, ay) = (ox + pane.x, oy + pane.y);
        if node != skip && pane.abs_z > z {
            let overlap_y = ry < ay + pane.h && ry + check.h.max(1) > ay;
            if overlap_y && rx < ax + pane.w && rx + check.w.max(1) > ax {
                if ax <= rx {
                    check.masked = true;
                    check.w = 0;
                    check.h = 0;
                    return;
                }
                // Occluder starts inside the span: clip to the prefix.
                check.w = check.w.min(ax - rx);
            }
        }
        for c in &pane.children {
            self.mask_walk(*c, ax, ay, skip, z, rx, ry, check);
            if check.masked {
                return;
            }
        }
    }

    /// Attribute search along the pane chain: the pane's own store, its
    /// handler's `get-attr` hook, then the parent.
    pub fn attr(&mut self, p: PaneId, key: &str) -> Option<String> {
        let mut cur = p;
        loop {
            let pane = self.pane(cur)?;
            if let Some(v) = pane.attrs.get(key) {
                return Some(v.to_owned());
            }
            let parent = pane.parent;
            if pane.handler.is_some() {
                let captured: Rc<RefCell<Option<String>>> = Rc::new(RefCell::new(None));
                let slot = Rc::clone(&captured);
                let cb = CommandHandle::new("attr:callback", move |_, ci| {
                    *slot.borrow_mut() = ci.str1.clone();
                    Ok(CmdRet::ok())
                });
                let mut ci = CallInfo::new(keys::GET_ATTR)
                    .with_home(cur)
                    .with_focus(p)
                    .with_str(key)
                    .with_comm2(cb);
                let _ = self.handle(&mut ci);
                if let Some(v) = captured.borrow_mut().take() {
                    return Some(v);
                }
            }
            if parent == cur {
                return None;
            }
            cur = parent;
        }
    }

    /// Rendering scale in thousandths per axis, from the base glyph size
    /// attribute (`scale:M`, "WxH" pixels per cell) combined with the user
    /// `scale` attribute: absolute thousandths, a "WxH" character grid to
    /// fit, or per-axis "x:W,y:H".
    pub fn scale(&mut self, p: PaneId) -> Scale {
        const UNIT: i32 = 1000;
        let Some(base) = self.attr(p, "scale:M").and_then(|v| parse_pair(&v, 'x')) else {
            return Scale { x: UNIT, y: UNIT };
        };
        let (bw, bh) = base;
        let (pw, ph) = self.pane(p).map(|pa| (pa.w, pa.h)).unwrap_or((0, 0));
        let Some(user) = self.attr(p, "scale") else {
            return Scale { x: UNIT, y: UNIT };
        };
        if let Ok(abs) = user.trim().parse::<i32>() {
            return Scale {
                x: abs.max(1),
                y: abs.max(1),
            };
        }
        if let Some((gx, gy)) = parse_axis_pair(&user) {
            // Per-axis character grid.
            return Scale {
                x: grid_scale(pw, gx, bw),
                y: grid_scale(ph, gy, bh),
            };
        }
        if let Some((gw, gh)) = parse_pair(&user, 'x') {
            // Uniform: the grid must fit in both directions.
            let s = grid_scale(pw, gw, bw).min(grid_scale(ph, gh, bh));
            return Scale { x: s, y: s };
        }
        Scale { x: UNIT, y: UNIT }
    }

    /// Ask each child of `from` to duplicate itself under `to` by
    /// delivering `Clone` calls; handlers recurse through this same helper
    /// for their own children. Returns how many children accepted.
    pub fn clone_children(&mut self, from: PaneId, to: PaneId) -> i32 {
        let children: Vec<PaneId> = self
            .pane(from)
            .map(|p| p.children.clone())
            .unwrap_or_default();
        let mut cloned = 0;
        for c in children {
            if self.pane(c).and_then(|p| p.handler.clone()).is_none() {
                continue;
            }
            let mut ci = CallInfo::new(keys::CLONE).with_home(c).with_focus(to);
            if matches!(self.handle(&mut ci), Ok(r) if r.is_handled()) {
                cloned += 1;
            }
        }
        cloned
    }

    // ---------------------------------------------------------------------
    // Times-up
    // ---------------------------------------------------------------------

    /// Install (or clear) the per-call time budget consulted at dispatch
    /// entry.
    pub fn set_deadline(&mut self, deadline: Option<Instant>) {
        self.deadline = deadline;
    }

    pub(crate) fn times_up(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    pub(crate) fn warn_livelock(&mut self) {
        let now = Instant::now();
        let due = self
            .last_livelock_warn
            .is_none_or(|t| now.duration_since(t).as_secs() >= 1);
        if due {
            self.last_livelock_warn = Some(now);
            warn!(target: "refresh", "refresh did not converge after five passes");
            self.pending_diagnosis
                .get_or_insert_with(|| "refresh did not converge after five passes".to_owned());
        }
    }
}

/// Result of a masking query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaskCheck {
    pub masked: bool,
    pub w: i32,
    pub h: i32,
}

/// Per-axis rendering scale in thousandths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scale {
    pub x: i32,
    pub y: i32,
}

fn parse_pair(s: &str, sep: char) -> Option<(i32, i32)> {
    let (a, b) = s.trim().split_once(sep)?;
    Some((a.trim().parse().ok()?, b.trim().parse().ok()?))
}

/// "x:W,y:H" per-axis grid form.
fn parse_axis_pair(s: &str) -> Option<(i32, i32)> {
    let (xs, ys) = s.trim().split_once(',')?;
    let x = xs.trim().strip_prefix("x:")?.trim().parse().ok()?;
    let y = ys.trim().strip_prefix("y:")?.trim().parse().ok()?;
    Some((x, y))
}

fn grid_scale(pane_px: i32, cells: i32, cell_px: i32) -> i32 {
    if cells <= 0 || cell_px <= 0 {
        return 1000;
    }
    ((pane_px * 1000) / (cells * cell_px)).max(1)
}
