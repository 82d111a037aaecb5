//! The document interface the kernel consumes.
//!
//! Documents are collaborators: the kernel never touches their storage, it
//! only requires the operations below so that panes can hold marks, step
//! them through content, and stay consistent across replacements. The
//! `doc:*` call keys of the wire protocol map onto these methods.

use core_proto::{MarkId, PaneId};

use crate::{DocRef, MarkError, MarkSet};

/// Document-wide reference points for `doc:set-ref`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefPoint {
    Start,
    End,
}

/// Contract a text (or list, or directory) document presents to the
/// kernel.
pub trait Document {
    /// The document's mark set. All mark ordering queries go through it.
    fn marks(&self) -> &MarkSet;

    fn marks_mut(&mut self) -> &mut MarkSet;

    /// Allocate a mark at a document reference. Ungrouped when `view` is
    /// `None`; a vmark otherwise.
    fn alloc_mark(
        &mut self,
        at: DocRef,
        view: Option<usize>,
        owner: Option<PaneId>,
    ) -> Result<MarkId, MarkError>;

    /// Release a mark back to the document.
    fn free_mark(&mut self, id: MarkId) -> Result<(), MarkError>;

    /// Step a mark one character forward or backward. Returns the
    /// character stepped over, or `None` at the document edge. When
    /// `do_move` is false the mark stays put (peek).
    fn step(&mut self, id: MarkId, forward: bool, do_move: bool)
    -> Result<Option<char>, MarkError>;

    /// Move a mark to a document-wide reference point.
    fn set_ref(&mut self, id: MarkId, point: RefPoint) -> Result<(), MarkError>;

    /// Register a view owned by `pane`; the index namespaces its vmarks.
    fn add_view(&mut self, pane: PaneId) -> usize;

    /// Drop a view and every vmark grouped under it.
    fn remove_view(&mut self, view: usize) -> Result<(), MarkError>;

    /// Replace the content between two anchor marks with `text`,
    /// running the mark-update protocol (`MarkSet::update_replace`) so
    /// that marks outside the edit keep their semantic position and marks
    /// inside collapse to the edit point.
    fn replace(&mut self, start: MarkId, end: MarkId, text: &str) -> Result<(), MarkError>;

    /// Attribute of the content at a mark's position.
    fn attr_at(&self, id: MarkId, key: &str) -> Option<String>;

    /// Set an attribute on the content at a mark's position.
    fn set_attr_at(&mut self, id: MarkId, key: &str, value: &str) -> Result<(), MarkError>;
}
