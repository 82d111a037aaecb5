//! The pane node.
//!
//! A pane's geometry is relative to its parent; z orders siblings (z < 0
//! marks a light-weight pane ignored by damage propagation and masking)
//! and `abs_z` is the derived absolute depth the refresh pass maintains.
//! The handler and data are optional: container panes often carry neither.

use std::any::Any;
use std::rc::Rc;

use core_attrs::AttrStore;
use core_proto::PaneId;

use crate::comm::CommandHandle;
use crate::damage::Damage;

#[derive(Debug)]
pub(crate) struct NotifyEdge {
    pub(crate) watcher: PaneId,
    pub(crate) name: String,
    /// Delivery stamp: 0 pending, 2 in flight, 1 done.
    pub(crate) noted: u8,
}

pub struct Pane {
    pub(crate) generation: u32,
    /// Self-loop at the root (and on detached panes).
    pub(crate) parent: PaneId,
    pub(crate) children: Vec<PaneId>,
    pub(crate) focus: Option<PaneId>,
    pub(crate) x: i32,
    pub(crate) y: i32,
    pub(crate) w: i32,
    pub(crate) h: i32,
    pub(crate) z: i32,
    pub(crate) abs_z: i32,
    /// Highest abs_z inside this pane's subtree, maintained by the resize
    /// phase; drives the drawing order and masking.
    pub(crate) abs_z_hi: i32,
    pub(crate) cursor: Option<(i32, i32)>,
    pub(crate) damage: Damage,
    pub(crate) attrs: AttrStore,
    pub(crate) handler: Option<CommandHandle>,
    pub(crate) data: Option<Rc<dyn Any>>,
    /// Who watches me, in insertion order.
    pub(crate) notifiees: Vec<NotifyEdge>,
    /// Whom I watch: (source, name) back references for cleanup.
    pub(crate) notifiers: Vec<(PaneId, String)>,
}

impl std::fmt::Debug for Pane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pane")
            .field("parent", &self.parent)
            .field("children", &self.children)
            .field("geom", &(self.x, self.y, self.w, self.h))
            .field("z", &self.z)
            .field("abs_z", &self.abs_z)
            .field("damage", &self.damage)
            .field("handler", &self.handler.as_ref().map(|h| h.name().to_owned()))
            .finish_non_exhaustive()
    }
}

impl Pane {
    pub(crate) fn new(
        generation: u32,
        parent: PaneId,
        z: i32,
        handler: Option<CommandHandle>,
        data: Option<Rc<dyn Any>>,
    ) -> Self {
        Self {
            generation,
            parent,
            children: Vec::new(),
            focus: None,
            x: 0,
            y: 0,
            w: 0,
            h: 0,
            z,
            abs_z: 0,
            abs_z_hi: 0,
            cursor: None,
            damage: Damage::empty(),
            attrs: AttrStore::new(),
            handler,
            data,
            notifiees: Vec::new(),
            notifiers: Vec::new(),
        }
    }

    pub fn parent(&self) -> PaneId {
        self.parent
    }

    pub fn children(&self) -> &[PaneId] {
        &self.children
    }

    pub fn focus(&self) -> Option<PaneId> {
        self.focus
    }

    pub fn geometry(&self) -> (i32, i32, i32, i32) {
        (self.x, self.y, self.w, self.h)
    }

    pub fn z(&self) -> i32 {
        self.z
    }

    pub fn abs_z(&self) -> i32 {
        self.abs_z
    }

    pub fn cursor(&self) -> Option<(i32, i32)> {
        self.cursor
    }

    pub fn damage(&self) -> Damage {
        self.damage
    }

    pub fn closed(&self) -> bool {
        self.damage.contains(Damage::CLOSED)
    }

    pub fn attrs(&self) -> &AttrStore {
        &self.attrs
    }

    pub fn attrs_mut(&mut self) -> &mut AttrStore {
        &mut self.attrs
    }

    pub fn handler(&self) -> Option<&CommandHandle> {
        self.handler.as_ref()
    }

    pub fn set_cursor(&mut self, cursor: Option<(i32, i32)>) {
        self.cursor = cursor;
    }
}
