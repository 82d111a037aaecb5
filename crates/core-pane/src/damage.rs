//! Damage flags and the upward propagation policy.
//!
//! Each flag is resolved by exactly one refresh phase, and clearing a flag
//! happens only inside that phase. Propagation carries a reduced set to the
//! parent (a damaged child never forces the parent's own work, only a walk
//! into its children) and stops as soon as the parent already carries the
//! reduced bits. Light-weight panes (z < 0) never propagate.

use bitflags::bitflags;

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct Damage: u16 {
        /// Geometry changed; resolved by the resize phase.
        const SIZE            = 1 << 0;
        /// Some descendant has SIZE.
        const SIZE_CHILD      = 1 << 1;
        /// The view onto the content changed; resolved by the view phase.
        const VIEW            = 1 << 2;
        /// Some descendant has VIEW.
        const VIEW_CHILD      = 1 << 3;
        /// Content must be redrawn; resolved by the content phase.
        const CONTENT         = 1 << 4;
        /// Cursor must be replaced; implied by CONTENT.
        const CURSOR          = 1 << 5;
        /// Some descendant needs a content-phase call.
        const CHILD           = 1 << 6;
        /// Wants a postorder-phase call.
        const POSTORDER       = 1 << 7;
        /// Some descendant has POSTORDER.
        const POSTORDER_CHILD = 1 << 8;
        /// The pane is closed; only close-safe commands may run on it.
        const CLOSED          = 1 << 9;
        /// The pane is on the delayed-free queue.
        const DEAD            = 1 << 10;
        /// Iteration stamp for restart-safe child walks.
        const NOT_HANDLED     = 1 << 11;

        /// Any flag that earns a content-phase `Refresh` call.
        const NEED_CALL = Self::CONTENT.bits() | Self::CURSOR.bits();
    }
}

impl Damage {
    /// The reduced set a parent inherits when a child carries `self`.
    pub fn propagated(self) -> Damage {
        let mut up = Damage::empty();
        if self.intersects(Damage::SIZE | Damage::SIZE_CHILD) {
            up |= Damage::SIZE_CHILD;
        }
        if self.intersects(Damage::VIEW | Damage::VIEW_CHILD) {
            up |= Damage::VIEW_CHILD;
        }
        if self.intersects(Damage::NEED_CALL | Damage::CHILD) {
            up |= Damage::CHILD;
        }
        if self.intersects(Damage::POSTORDER | Damage::POSTORDER_CHILD) {
            up |= Damage::POSTORDER_CHILD;
        }
        up
    }

    /// Anything a refresh pass still has to resolve.
    pub fn needs_refresh(self) -> bool {
        self.intersects(
            Damage::SIZE
                | Damage::SIZE_CHILD
                | Damage::VIEW
                | Damage::VIEW_CHILD
                | Damage::NEED_CALL
                | Damage::CHILD
                | Damage::POSTORDER
                | Damage::POSTORDER_CHILD,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn propagation_reduces() {
        assert_eq!(Damage::SIZE.propagated(), Damage::SIZE_CHILD);
        assert_eq!(Damage::VIEW.propagated(), Damage::VIEW_CHILD);
        assert_eq!(Damage::CONTENT.propagated(), Damage::CHILD);
        assert_eq!(Damage::CURSOR.propagated(), Damage::CHILD);
        assert_eq!(Damage::POSTORDER.propagated(), Damage::POSTORDER_CHILD);
        assert_eq!(
            (Damage::SIZE | Damage::POSTORDER).propagated(),
            Damage::SIZE_CHILD | Damage::POSTORDER_CHILD
        );
    }

    #[test]
    fn child_flags_propagate_as_themselves() {
        assert_eq!(Damage::SIZE_CHILD.propagated(), Damage::SIZE_CHILD);
        assert_eq!(Damage::CHILD.propagated(), Damage::CHILD);
    }

    #[test]
    fn closed_and_dead_do_not_propagate() {
        assert_eq!((Damage::CLOSED | Damage::DEAD).propagated(), Damage::empty());
        assert!(!Damage::CLOSED.needs_refresh());
    }
}
