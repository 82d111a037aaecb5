use std::cmp::Ordering;

use core_proto::PaneId;
use pretty_assertions::assert_eq;
use proptest::prelude::*;

use super::*;

fn off(o: u32) -> DocRef {
    DocRef::new(0, o)
}

fn by_offset(a: &DocRef, b: &DocRef) -> Ordering {
    a.offset.cmp(&b.offset)
}

fn pane(n: u32) -> PaneId {
    PaneId::new(n, 0)
}

fn create(set: &mut MarkSet, o: u32) -> MarkId {
    set.create_sorted(off(o), None, None, by_offset).unwrap()
}

#[test]
fn creation_orders_by_reference() {
    let mut set = MarkSet::new();
    let b = create(&mut set, 5);
    let a = create(&mut set, 0);
    let c = create(&mut set, 11);
    assert_eq!(set.iter().collect::<Vec<_>>(), vec![a, b, c]);
    assert_eq!(set.cmp(a, b).unwrap(), Ordering::Less);
    assert_eq!(set.cmp(c, b).unwrap(), Ordering::Greater);
    assert!(set.check_consistent());
}

#[test]
fn equal_reference_lands_after_existing() {
    let mut set = MarkSet::new();
    let first = create(&mut set, 7);
    let second = create(&mut set, 7);
    assert_eq!(set.cmp(first, second).unwrap(), Ordering::Less);
    assert!(set.same_ref(first, second).unwrap());
}

#[test]
fn duplicate_is_adjacent() {
    let mut set = MarkSet::new();
    let a = create(&mut set, 3);
    let _z = create(&mut set, 9);
    let after = set.duplicate(a, true, None, None).unwrap();
    let before = set.duplicate(a, false, None, None).unwrap();
    assert_eq!(set.next(a), Some(after));
    assert_eq!(set.prev(a), Some(before));
    assert!(set.same_ref(a, after).unwrap());
    assert!(set.same_ref(a, before).unwrap());
}

#[test]
fn repeated_duplication_forces_renumber_and_keeps_order() {
    let mut set = MarkSet::new();
    let a = create(&mut set, 0);
    let z = create(&mut set, 100);
    let mut chain = vec![a];
    for _ in 0..64 {
        let d = set.duplicate(*chain.last().unwrap(), true, None, None).unwrap();
        chain.push(d);
    }
    assert!(set.renumber_count() >= 1, "gap between two marks must run out");
    assert!(set.check_consistent());
    for pair in chain.windows(2) {
        assert_eq!(set.cmp(pair[0], pair[1]).unwrap(), Ordering::Less);
    }
    assert_eq!(set.cmp(*chain.last().unwrap(), z).unwrap(), Ordering::Less);
}

#[test]
fn move_to_relinks_after_target() {
    let mut set = MarkSet::new();
    let a = create(&mut set, 0);
    let b = create(&mut set, 5);
    let c = create(&mut set, 11);
    set.move_to(a, c).unwrap();
    assert_eq!(set.iter().collect::<Vec<_>>(), vec![b, c, a]);
    assert!(set.same_ref(a, c).unwrap());
    assert!(set.check_consistent());
}

#[test]
fn release_with_extra_reference_defers_free() {
    let mut set = MarkSet::new();
    let a = create(&mut set, 4);
    set.retain(a).unwrap();
    assert!(!set.release(a).unwrap());
    assert!(set.contains(a));
    assert!(set.release(a).unwrap());
    assert!(!set.contains(a));
    assert_eq!(set.cmp(a, a), Err(MarkError::StaleMark(a)));
}

#[test]
fn stale_id_does_not_resolve_to_recycled_slot() {
    let mut set = MarkSet::new();
    let a = create(&mut set, 4);
    set.free(a).unwrap();
    let b = create(&mut set, 6);
    assert_eq!(a.idx(), b.idx(), "slot should be recycled");
    assert!(!set.contains(a));
    assert!(set.contains(b));
}

#[test]
fn view_marks_form_ordered_subsequence() {
    let mut set = MarkSet::new();
    let view = set.add_view(pane(1));
    let v1 = set
        .create_sorted(off(10), Some(view), Some(pane(1)), by_offset)
        .unwrap();
    let _plain = create(&mut set, 12);
    let v2 = set
        .create_sorted(off(20), Some(view), Some(pane(1)), by_offset)
        .unwrap();
    let v0 = set
        .create_sorted(off(2), Some(view), Some(pane(1)), by_offset)
        .unwrap();
    assert_eq!(set.vmark_first(view), Some(v0));
    assert_eq!(set.vmark_last(view), Some(v2));
    assert_eq!(set.vmark_next(view, v0), Some(v1));
    assert_eq!(set.vmark_prev(view, v2), Some(v1));
    assert!(set.check_consistent());
}

#[test]
fn remove_view_frees_its_marks() {
    let mut set = MarkSet::new();
    let view = set.add_view(pane(1));
    let v = set
        .create_sorted(off(5), Some(view), Some(pane(1)), by_offset)
        .unwrap();
    let plain = create(&mut set, 6);
    set.remove_view(view).unwrap();
    assert!(!set.contains(v));
    assert!(set.contains(plain));
    assert_eq!(set.len(), 1);
}

#[test]
fn free_owned_drops_only_that_panes_marks() {
    let mut set = MarkSet::new();
    let view = set.add_view(pane(1));
    let mine = set
        .create_sorted(off(1), Some(view), Some(pane(1)), by_offset)
        .unwrap();
    let theirs = set
        .create_sorted(off(2), None, Some(pane(2)), by_offset)
        .unwrap();
    set.free_owned(pane(1));
    assert!(!set.contains(mine));
    assert!(set.contains(theirs));
}

#[test]
fn clip_collapses_view_marks_to_start() {
    let mut set = MarkSet::new();
    let view = set.add_view(pane(1));
    let s = create(&mut set, 10);
    let inner1 = set
        .create_sorted(off(12), Some(view), Some(pane(1)), by_offset)
        .unwrap();
    let other = create(&mut set, 14);
    let inner2 = set
        .create_sorted(off(16), Some(view), Some(pane(1)), by_offset)
        .unwrap();
    let e = create(&mut set, 20);
    set.clip(s, e, view).unwrap();
    assert_eq!(set.doc_ref(inner1).unwrap(), off(10));
    assert_eq!(set.doc_ref(inner2).unwrap(), off(10));
    // Relative order survives: s, inner1, inner2 then the untouched mark.
    assert_eq!(set.cmp(s, inner1).unwrap(), Ordering::Less);
    assert_eq!(set.cmp(inner1, inner2).unwrap(), Ordering::Less);
    assert_eq!(set.cmp(inner2, other).unwrap(), Ordering::Less);
    // The ungrouped mark inside the span is untouched.
    assert_eq!(set.doc_ref(other).unwrap(), off(14));
    assert!(set.check_consistent());
}

// Mark ordering across an insertion: "HELLO WORLD" with marks at offsets
// 0, 5 and 11; inserting four characters at offset 5 leaves the mark at
// the insertion point in place and shifts the following mark.
#[test]
fn ordering_preserved_across_insert() {
    let mut set = MarkSet::new();
    let a = create(&mut set, 0);
    let b = create(&mut set, 5);
    let c = create(&mut set, 11);
    // The document's anchors around the insertion point.
    let s = create(&mut set, 5);
    let e = set.duplicate(s, true, None, None).unwrap();

    let delta = 4u32;
    set.update_replace(s, e, |r| {
        if r.offset > 5 {
            Relocation::MoveTo(DocRef::new(r.chunk, r.offset + delta))
        } else {
            Relocation::Keep
        }
    })
    .unwrap();

    assert_eq!(set.doc_ref(a).unwrap(), off(0));
    assert_eq!(set.doc_ref(b).unwrap(), off(5));
    assert_eq!(set.doc_ref(c).unwrap(), off(15));
    assert_eq!(set.cmp(a, b).unwrap(), Ordering::Less);
    assert_eq!(set.cmp(b, c).unwrap(), Ordering::Less);
    assert!(set.check_consistent());
}

#[test]
fn deletion_collapses_inner_marks_to_anchors() {
    let mut set = MarkSet::new();
    let m0 = create(&mut set, 0);
    let s = create(&mut set, 3);
    let m4 = create(&mut set, 4);
    let m6 = create(&mut set, 6);
    let e = create(&mut set, 7);
    let m9 = create(&mut set, 9);

    // Delete [3, 7): inner chunk destroyed, tail shifts back by 4.
    set.update_replace(s, e, |r| {
        if (3..7).contains(&r.offset) {
            Relocation::Destroyed
        } else if r.offset >= 7 {
            Relocation::MoveTo(DocRef::new(r.chunk, r.offset - 4))
        } else {
            Relocation::Keep
        }
    })
    .unwrap();

    assert_eq!(set.doc_ref(m0).unwrap(), off(0));
    assert_eq!(set.doc_ref(m4).unwrap(), off(3), "collapsed to start anchor");
    assert_eq!(set.doc_ref(m6).unwrap(), off(3));
    assert_eq!(set.doc_ref(m9).unwrap(), off(5));
    assert_eq!(set.cmp(m4, m6).unwrap(), Ordering::Less, "order survives collapse");
    assert!(set.check_consistent());
}

proptest! {
    // Order preservation across arbitrary edit sequences: offsets along
    // the all-marks list stay monotone after every replacement.
    #[test]
    fn order_stable_under_random_edits(
        offsets in proptest::collection::vec(0u32..100, 2..12),
        edits in proptest::collection::vec((0u32..100, 0u32..20, 0u32..20), 1..8),
    ) {
        let mut set = MarkSet::new();
        for o in &offsets {
            create(&mut set, *o);
        }
        for (at, del, ins) in edits {
            let doc_len = 200u32;
            let start = at.min(doc_len);
            let end = (at + del).min(doc_len);
            let s = set.create_sorted(off(start), None, None, by_offset).unwrap();
            let e = set.create_sorted(off(end), None, None, by_offset).unwrap();
            let delta = ins as i64 - (end - start) as i64;
            set.update_replace(s, e, |r| {
                if r.offset > start && r.offset < end {
                    Relocation::Destroyed
                } else if r.offset >= end && (r.offset > start || delta > 0) {
                    if r.offset == end && delta < 0 {
                        Relocation::MoveTo(DocRef::new(r.chunk, start + ins))
                    } else if r.offset >= end {
                        Relocation::MoveTo(DocRef::new(
                            r.chunk,
                            (r.offset as i64 + delta).max(0) as u32,
                        ))
                    } else {
                        Relocation::Keep
                    }
                } else {
                    Relocation::Keep
                }
            }).unwrap();
            set.free(s).unwrap();
            set.free(e).unwrap();

            prop_assert!(set.check_consistent());
            let refs: Vec<u32> = set.iter().map(|m| set.doc_ref(m).unwrap().offset).collect();
            for w in refs.windows(2) {
                prop_assert!(w[0] <= w[1], "offsets must stay monotone: {refs:?}");
            }
        }
    }
}
