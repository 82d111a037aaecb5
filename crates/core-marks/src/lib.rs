//! core-marks: totally-ordered, update-stable positions inside a document.
//!
//! A document owns one `MarkSet`. Marks live in a generational slot arena
//! and in a single all-marks list ordered by position; per-view lists group
//! the vmarks a pane owns. Sequence numbers give marks of one document a
//! total order that survives every edit.
//!
//! Invariants (must hold after every public call):
//! * `order` is sorted by strictly increasing sequence number, and that
//!   order is the position order of the document's marks.
//! * Sequence numbers are unique within the set; when no integer fits
//!   between two neighbours the whole set is renumbered with a fresh
//!   stride, which never reorders anything.
//! * A view mark appears in exactly one view list, and that list is a
//!   subsequence of `order`.
//! * `update_replace` rewrites document references in place and never
//!   relinks, so the relative order of surviving marks is untouched.
//!
//! The comparison contract: two marks order first by document reference
//! (only the document can compare references, so ordered insertion takes a
//! comparator) and by sequence number where references are equal.

use core_attrs::AttrStore;
use core_proto::{MarkId, PaneId};
use std::cmp::Ordering;
use thiserror::Error;
use tracing::{debug, trace};

mod doc;

pub use doc::{Document, RefPoint};

/// Position handle a document hands out: an opaque chunk value plus an
/// integer offset into it. The kernel never interprets either field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DocRef {
    pub chunk: u64,
    pub offset: u32,
}

impl DocRef {
    pub const fn new(chunk: u64, offset: u32) -> Self {
        Self { chunk, offset }
    }
}

/// How one mark's reference fared across an edit, as reported by the
/// document to `update_replace`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relocation {
    /// The reference is still valid; the walk stops here.
    Keep,
    /// The chunk was split or shifted; the mark follows to the new
    /// reference and the walk continues.
    MoveTo(DocRef),
    /// The chunk no longer exists; the mark collapses to the edit anchor.
    Destroyed,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MarkError {
    #[error("stale or foreign mark id {0}")]
    StaleMark(MarkId),
    #[error("unknown view index {0}")]
    UnknownView(usize),
    #[error("marks are not ordered start before end")]
    BadRange,
}

const SEQ_STRIDE: u64 = 1 << 20;

#[derive(Debug)]
struct MarkSlot {
    generation: u32,
    doc_ref: DocRef,
    seq: u64,
    view: Option<usize>,
    owner: Option<PaneId>,
    /// Validity/refcount word: the creator holds one reference, views may
    /// hold more. The slot is reclaimed when it reaches zero.
    refs: u32,
    attrs: AttrStore,
}

#[derive(Debug)]
struct ViewSlot {
    owner: PaneId,
    marks: Vec<MarkId>,
}

impl ViewSlot {
    fn new(owner: PaneId) -> Self {
        Self {
            owner,
            marks: Vec::new(),
        }
    }
}

/// All marks of one document.
#[derive(Debug, Default)]
pub struct MarkSet {
    slots: Vec<Option<MarkSlot>>,
    generations: Vec<u32>,
    free_list: Vec<usize>,
    /// All-marks list, ascending position (ascending seq).
    order: Vec<MarkId>,
    views: Vec<Option<ViewSlot>>,
    renumber_count: u64,
}

impl MarkSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Times the sequence space had to be renumbered en masse.
    pub fn renumber_count(&self) -> u64 {
        self.renumber_count
    }

    fn slot(&self, id: MarkId) -> Option<&MarkSlot> {
        self.slots
            .get(id.idx())?
            .as_ref()
            .filter(|s| s.generation == id.generation())
    }

    fn slot_mut(&mut self, id: MarkId) -> Option<&mut MarkSlot> {
        self.slots
            .get_mut(id.idx())?
            .as_mut()
            .filter(|s| s.generation == id.generation())
    }

    /// Index of `id` in the all-marks list.
    fn pos_of(&self, id: MarkId) -> Option<usize> {
        let seq = self.slot(id)?.seq;
        self.order
            .binary_search_by_key(&seq, |m| self.slot(*m).map(|s| s.seq).unwrap_or(u64::MAX))
            .ok()
    }

    pub fn contains(&self, id: MarkId) -> bool {
        self.slot(id).is_some()
    }

    pub fn doc_ref(&self, id: MarkId) -> Result<DocRef, MarkError> {
        self.slot(id)
            .map(|s| s.doc_ref)
            .ok_or(MarkError::StaleMark(id))
    }

    pub fn view_of(&self, id: MarkId) -> Option<usize> {
        self.slot(id).and_then(|s| s.view)
    }

    pub fn owner_of(&self, id: MarkId) -> Option<PaneId> {
        self.slot(id).and_then(|s| s.owner)
    }

    /// Total order among marks of this set: position order, ties broken by
    /// sequence number (which is the position order).
    pub fn cmp(&self, a: MarkId, b: MarkId) -> Result<Ordering, MarkError> {
        let sa = self.slot(a).ok_or(MarkError::StaleMark(a))?.seq;
        let sb = self.slot(b).ok_or(MarkError::StaleMark(b))?.seq;
        Ok(sa.cmp(&sb))
    }

    /// True when both marks sit at the same document reference.
    pub fn same_ref(&self, a: MarkId, b: MarkId) -> Result<bool, MarkError> {
        Ok(self.doc_ref(a)? == self.doc_ref(b)?)
    }

    pub fn attrs(&self, id: MarkId) -> Option<&AttrStore> {
        self.slot(id).map(|s| &s.attrs)
    }

    pub fn attrs_mut(&mut self, id: MarkId) -> Option<&mut AttrStore> {
        self.slot_mut(id).map(|s| &mut s.attrs)
    }

    // ---------------------------------------------------------------------
    // Sequence numbering
    // ---------------------------------------------------------------------

    fn seq_at(&self, pos: usize) -> u64 {
        self.slot(self.order[pos]).map(|s| s.seq).unwrap_or(0)
    }

    /// Renumber the whole set with a fresh stride. Order is untouched.
    fn renumber(&mut self) {
        self.renumber_count += 1;
        debug!(target: "marks", marks = self.order.len(), "seq_renumber");
        for (i, id) in self.order.clone().into_iter().enumerate() {
            if let Some(s) = self.slot_mut(id) {
                s.seq = (i as u64 + 1) * SEQ_STRIDE;
            }
        }
    }

    /// Sequence number for a mark about to be inserted at `pos`,
    /// renumbering first when the local gap is exhausted.
    fn seq_for_insert(&mut self, pos: usize) -> u64 {
        let (lo, hi) = self.gap_bounds(pos);
        if hi - lo >= 2 {
            return lo + (hi - lo) / 2;
        }
        self.renumber();
        let (lo, hi) = self.gap_bounds(pos);
        debug_assert!(hi - lo >= 2, "renumbering must open a gap");
        lo + (hi - lo) / 2
    }

    fn gap_bounds(&self, pos: usize) -> (u64, u64) {
        let lo = if pos == 0 { 0 } else { self.seq_at(pos - 1) };
        let hi = if pos < self.order.len() {
            self.seq_at(pos)
        } else {
            lo + 2 * SEQ_STRIDE
        };
        (lo, hi)
    }

    // ---------------------------------------------------------------------
    // Creation, duplication, movement
    // ---------------------------------------------------------------------

    fn alloc_slot(&mut self, slot: MarkSlot) -> MarkId {
        match self.free_list.pop() {
            Some(idx) => {
                let generation = self.generations[idx];
                let id = MarkId::new(idx as u32, generation);
                self.slots[idx] = Some(MarkSlot { generation, ..slot });
                id
            }
            None => {
                let idx = self.slots.len();
                self.generations.push(0);
                let id = MarkId::new(idx as u32, 0);
                self.slots.push(Some(MarkSlot {
                    generation: 0,
                    ..slot
                }));
                id
            }
        }
    }

    fn link_view(&mut self, id: MarkId) -> Result<(), MarkError> {
        let Some(view) = self.slot(id).and_then(|s| s.view) else {
            return Ok(());
        };
        let pos = self.pos_of(id).ok_or(MarkError::StaleMark(id))?;
        // Insert keeping the view list a subsequence of `order`.
        let at = {
            let vs = self
                .views
                .get(view)
                .and_then(|v| v.as_ref())
                .ok_or(MarkError::UnknownView(view))?;
            vs.marks
                .partition_point(|m| self.pos_of(*m).unwrap_or(usize::MAX) < pos)
        };
        let vs = self.views[view]
            .as_mut()
            .ok_or(MarkError::UnknownView(view))?;
        vs.marks.insert(at, id);
        Ok(())
    }

    fn unlink_view(&mut self, id: MarkId) {
        if let Some(view) = self.slot(id).and_then(|s| s.view)
            && let Some(Some(vs)) = self.views.get_mut(view)
        {
            vs.marks.retain(|m| *m != id);
        }
    }

    /// Create a mark at `doc_ref`, placed by `cmp_ref` (the document's
    /// reference comparator). Among marks at an equal reference the new
    /// mark lands after the existing ones.
    pub fn create_sorted(
        &mut self,
        doc_ref: DocRef,
        view: Option<usize>,
        owner: Option<PaneId>,
        mut cmp_ref: impl FnMut(&DocRef, &DocRef) -> Ordering,
    ) -> Result<MarkId, MarkError> {
        if let Some(v) = view
            && self.views.get(v).and_then(|s| s.as_ref()).is_none()
        {
            return Err(MarkError::UnknownView(v));
        }
        let pos = self.order.partition_point(|m| {
            self.slot(*m)
                .map(|s| cmp_ref(&s.doc_ref, &doc_ref) != Ordering::Greater)
                .unwrap_or(false)
        });
        let seq = self.seq_for_insert(pos);
        let id = self.alloc_slot(MarkSlot {
            generation: 0,
            doc_ref,
            seq,
            view,
            owner,
            refs: 1,
            attrs: AttrStore::new(),
        });
        self.order.insert(pos, id);
        self.link_view(id)?;
        trace!(target: "marks", mark = %id, pos, "mark_create");
        Ok(id)
    }

    /// Create a new mark at the same reference as `at`, immediately before
    /// or after it.
    pub fn duplicate(
        &mut self,
        at: MarkId,
        after: bool,
        view: Option<usize>,
        owner: Option<PaneId>,
    ) -> Result<MarkId, MarkError> {
        if let Some(v) = view
            && self.views.get(v).and_then(|s| s.as_ref()).is_none()
        {
            return Err(MarkError::UnknownView(v));
        }
        let doc_ref = self.doc_ref(at)?;
        let base = self.pos_of(at).ok_or(MarkError::StaleMark(at))?;
        let pos = if after { base + 1 } else { base };
        let seq = self.seq_for_insert(pos);
        let id = self.alloc_slot(MarkSlot {
            generation: 0,
            doc_ref,
            seq,
            view,
            owner,
            refs: 1,
            attrs: AttrStore::new(),
        });
        self.order.insert(pos, id);
        self.link_view(id)?;
        trace!(target: "marks", mark = %id, from = %at, after, "mark_duplicate");
        Ok(id)
    }

    /// Move `mark` to the same reference as `target`, relinking it
    /// immediately after `target` in the all-marks list.
    pub fn move_to(&mut self, mark: MarkId, target: MarkId) -> Result<(), MarkError> {
        if mark == target {
            return Ok(());
        }
        let doc_ref = self.doc_ref(target)?;
        let from = self.pos_of(mark).ok_or(MarkError::StaleMark(mark))?;
        self.order.remove(from);
        let base = self.pos_of(target).ok_or(MarkError::StaleMark(target))?;
        let pos = base + 1;
        let seq = self.seq_for_insert(pos);
        let slot = self.slot_mut(mark).ok_or(MarkError::StaleMark(mark))?;
        slot.doc_ref = doc_ref;
        slot.seq = seq;
        self.order.insert(pos, mark);
        self.unlink_view(mark);
        self.link_view(mark)?;
        trace!(target: "marks", mark = %mark, target = %target, "mark_move_to");
        Ok(())
    }

    /// Re-reference `mark` to `doc_ref` and relink it to the matching
    /// position (used by `doc:set-ref`).
    pub fn set_ref_sorted(
        &mut self,
        mark: MarkId,
        doc_ref: DocRef,
        mut cmp_ref: impl FnMut(&DocRef, &DocRef) -> Ordering,
    ) -> Result<(), MarkError> {
        let from = self.pos_of(mark).ok_or(MarkError::StaleMark(mark))?;
        self.order.remove(from);
        let pos = self.order.partition_point(|m| {
            self.slot(*m)
                .map(|s| cmp_ref(&s.doc_ref, &doc_ref) != Ordering::Greater)
                .unwrap_or(false)
        });
        let seq = self.seq_for_insert(pos);
        let slot = self.slot_mut(mark).ok_or(MarkError::StaleMark(mark))?;
        slot.doc_ref = doc_ref;
        slot.seq = seq;
        self.order.insert(pos, mark);
        self.unlink_view(mark);
        self.link_view(mark)?;
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Reference counting and freeing
    // ---------------------------------------------------------------------

    pub fn retain(&mut self, id: MarkId) -> Result<(), MarkError> {
        let slot = self.slot_mut(id).ok_or(MarkError::StaleMark(id))?;
        slot.refs += 1;
        Ok(())
    }

    /// Drop one reference; unlink and reclaim the slot when it was the
    /// last. Reports whether the mark is gone.
    pub fn release(&mut self, id: MarkId) -> Result<bool, MarkError> {
        let slot = self.slot_mut(id).ok_or(MarkError::StaleMark(id))?;
        slot.refs -= 1;
        if slot.refs > 0 {
            return Ok(false);
        }
        self.unlink_view(id);
        if let Some(pos) = self.pos_of(id) {
            self.order.remove(pos);
        }
        let idx = id.idx();
        self.slots[idx] = None;
        self.generations[idx] += 1;
        self.free_list.push(idx);
        trace!(target: "marks", mark = %id, "mark_free");
        Ok(true)
    }

    /// Free unconditionally (drains remaining references).
    pub fn free(&mut self, id: MarkId) -> Result<(), MarkError> {
        if let Some(slot) = self.slot_mut(id) {
            slot.refs = 1;
        }
        self.release(id).map(|_| ())
    }

    /// Free every mark owned by `pane` (run when the pane closes).
    pub fn free_owned(&mut self, pane: PaneId) {
        let owned: Vec<MarkId> = self
            .order
            .iter()
            .copied()
            .filter(|m| self.slot(*m).and_then(|s| s.owner) == Some(pane))
            .collect();
        for id in owned {
            let _ = self.free(id);
        }
    }

    // ---------------------------------------------------------------------
    // Views
    // ---------------------------------------------------------------------

    /// Register a view owned by `pane`; returns its index.
    pub fn add_view(&mut self, owner: PaneId) -> usize {
        if let Some(idx) = self.views.iter().position(|v| v.is_none()) {
            self.views[idx] = Some(ViewSlot::new(owner));
            idx
        } else {
            self.views.push(Some(ViewSlot::new(owner)));
            self.views.len() - 1
        }
    }

    /// Remove a view, freeing every mark grouped under it.
    pub fn remove_view(&mut self, view: usize) -> Result<(), MarkError> {
        let vs = self
            .views
            .get_mut(view)
            .and_then(|v| v.take())
            .ok_or(MarkError::UnknownView(view))?;
        for id in vs.marks {
            // Already unlinked from the view; free directly.
            if self.contains(id)
                && let Some(pos) = self.pos_of(id)
            {
                self.order.remove(pos);
                let idx = id.idx();
                self.slots[idx] = None;
                self.generations[idx] += 1;
                self.free_list.push(idx);
            }
        }
        Ok(())
    }

    pub fn view_owner(&self, view: usize) -> Option<PaneId> {
        self.views.get(view)?.as_ref().map(|v| v.owner)
    }

    pub fn vmark_first(&self, view: usize) -> Option<MarkId> {
        self.views.get(view)?.as_ref()?.marks.first().copied()
    }

    pub fn vmark_last(&self, view: usize) -> Option<MarkId> {
        self.views.get(view)?.as_ref()?.marks.last().copied()
    }

    /// Next mark of `view` after `id` in position order.
    pub fn vmark_next(&self, view: usize, id: MarkId) -> Option<MarkId> {
        let vs = self.views.get(view)?.as_ref()?;
        let i = vs.marks.iter().position(|m| *m == id)?;
        vs.marks.get(i + 1).copied()
    }

    pub fn vmark_prev(&self, view: usize, id: MarkId) -> Option<MarkId> {
        let vs = self.views.get(view)?.as_ref()?;
        let i = vs.marks.iter().position(|m| *m == id)?;
        i.checked_sub(1).and_then(|p| vs.marks.get(p)).copied()
    }

    // ---------------------------------------------------------------------
    // All-marks list traversal
    // ---------------------------------------------------------------------

    pub fn first(&self) -> Option<MarkId> {
        self.order.first().copied()
    }

    pub fn last(&self) -> Option<MarkId> {
        self.order.last().copied()
    }

    pub fn next(&self, id: MarkId) -> Option<MarkId> {
        let pos = self.pos_of(id)?;
        self.order.get(pos + 1).copied()
    }

    pub fn prev(&self, id: MarkId) -> Option<MarkId> {
        let pos = self.pos_of(id)?;
        pos.checked_sub(1).and_then(|p| self.order.get(p)).copied()
    }

    /// Marks in position order (testing and consistency checks).
    pub fn iter(&self) -> impl Iterator<Item = MarkId> + '_ {
        self.order.iter().copied()
    }

    // ---------------------------------------------------------------------
    // Clip and the replacement update protocol
    // ---------------------------------------------------------------------

    /// Move every mark of `view` strictly inside (`s`, `e`) to `s`,
    /// keeping their relative order.
    pub fn clip(&mut self, s: MarkId, e: MarkId, view: usize) -> Result<(), MarkError> {
        let sp = self.pos_of(s).ok_or(MarkError::StaleMark(s))?;
        let ep = self.pos_of(e).ok_or(MarkError::StaleMark(e))?;
        if sp > ep {
            return Err(MarkError::BadRange);
        }
        let inside: Vec<MarkId> = self.order[sp + 1..ep]
            .iter()
            .copied()
            .filter(|m| self.slot(*m).and_then(|sl| sl.view) == Some(view))
            .collect();
        let s_ref = self.doc_ref(s)?;
        for (i, id) in inside.into_iter().enumerate() {
            let from = self.pos_of(id).ok_or(MarkError::StaleMark(id))?;
            self.order.remove(from);
            let base = self.pos_of(s).ok_or(MarkError::StaleMark(s))?;
            let pos = base + 1 + i;
            let seq = self.seq_for_insert(pos);
            let slot = self.slot_mut(id).ok_or(MarkError::StaleMark(id))?;
            slot.doc_ref = s_ref;
            slot.seq = seq;
            self.order.insert(pos, id);
        }
        Ok(())
    }

    /// Apply the mark-update protocol around a replacement between the
    /// anchor marks `a` (start) and `b` (end).
    ///
    /// The document reports each reference's fate through `map`. Marks
    /// walking backward from `b` collapse onto `a`'s reference when their
    /// chunk was destroyed; marks walking forward from `b` collapse onto
    /// `b`'s reference when destroyed, follow `MoveTo` redirects (split or
    /// shifted chunks), and the walk stops at the first `Keep`. References
    /// are rewritten in place, so the surviving order is exactly the prior
    /// order.
    pub fn update_replace(
        &mut self,
        a: MarkId,
        b: MarkId,
        mut map: impl FnMut(&DocRef) -> Relocation,
    ) -> Result<(), MarkError> {
        let ap = self.pos_of(a).ok_or(MarkError::StaleMark(a))?;
        let bp = self.pos_of(b).ok_or(MarkError::StaleMark(b))?;
        if ap > bp {
            return Err(MarkError::BadRange);
        }
        let a_ref = self.doc_ref(a)?;
        let b_ref = self.doc_ref(b)?;

        // Backward walk: marks before the end anchor that lost their chunk
        // collapse onto the start anchor.
        let mut i = bp;
        while i > 0 {
            i -= 1;
            let id = self.order[i];
            if id == a {
                continue;
            }
            let r = self.slot(id).map(|s| s.doc_ref).unwrap_or(a_ref);
            match map(&r) {
                Relocation::Destroyed => {
                    if let Some(slot) = self.slot_mut(id) {
                        slot.doc_ref = a_ref;
                    }
                }
                Relocation::MoveTo(nr) => {
                    if let Some(slot) = self.slot_mut(id) {
                        slot.doc_ref = nr;
                    }
                }
                Relocation::Keep => break,
            }
        }

        // Forward walk: marks after the end anchor follow their chunks.
        let mut i = bp + 1;
        while i < self.order.len() {
            let id = self.order[i];
            let r = self.slot(id).map(|s| s.doc_ref).unwrap_or(b_ref);
            match map(&r) {
                Relocation::Destroyed => {
                    if let Some(slot) = self.slot_mut(id) {
                        slot.doc_ref = b_ref;
                    }
                }
                Relocation::MoveTo(nr) => {
                    if let Some(slot) = self.slot_mut(id) {
                        slot.doc_ref = nr;
                    }
                }
                Relocation::Keep => break,
            }
            i += 1;
        }
        Ok(())
    }

    /// Debug check: the all-marks list really is sorted by seq and every
    /// view list is a subsequence of it.
    pub fn check_consistent(&self) -> bool {
        let sorted = self
            .order
            .windows(2)
            .all(|w| match (self.slot(w[0]), self.slot(w[1])) {
                (Some(x), Some(y)) => x.seq < y.seq,
                _ => false,
            });
        let views_ok = self.views.iter().flatten().all(|vs| {
            vs.marks
                .windows(2)
                .all(|w| match (self.pos_of(w[0]), self.pos_of(w[1])) {
                    (Some(x), Some(y)) => x < y,
                    _ => false,
                })
        });
        sorted && views_ok
    }
}

#[cfg(test)]
mod tests;
