//! Demo document collaborator: an in-memory text buffer behind the
//! kernel's document contract.
//!
//! Storage is one chunk (chunk id 0) with byte offsets as references, so
//! the replace protocol reduces to offset arithmetic: marks at or before
//! the edit start keep their offset, marks inside the replaced span
//! collapse to its start, marks after it shift by the length delta. The
//! pane handler exposes the `doc:*` call surface over it.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::rc::Rc;

use core_marks::{DocRef, Document, MarkError, MarkSet, RefPoint, Relocation};
use core_pane::{CallInfo, CommandHandle, Editor, pane_data};
use core_proto::{CallError, CmdRet, MarkId, PaneId, keys};
use tracing::trace;

pub struct LineDoc {
    text: String,
    marks: MarkSet,
}

fn by_offset(a: &DocRef, b: &DocRef) -> Ordering {
    a.offset.cmp(&b.offset)
}

impl LineDoc {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            marks: MarkSet::new(),
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn offset_of(&self, id: MarkId) -> Result<usize, MarkError> {
        Ok(self.marks.doc_ref(id)?.offset as usize)
    }

    fn at(offset: usize) -> DocRef {
        DocRef::new(0, offset as u32)
    }

    /// Splice `text` over the byte span [`from`, `to`), updating every
    /// mark through the kernel protocol.
    pub fn splice(&mut self, from: usize, to: usize, text: &str) -> Result<(), MarkError> {
        let from = from.min(self.text.len());
        let to = to.clamp(from, self.text.len());
        let start = self.marks.create_sorted(Self::at(from), None, None, by_offset)?;
        let end = self.marks.create_sorted(Self::at(to), None, None, by_offset)?;
        self.text.replace_range(from..to, text);
        let delta = text.len() as i64 - (to - from) as i64;
        let (from32, to32) = (from as u32, to as u32);
        self.marks.update_replace(start, end, |r| {
            if r.offset > from32 && r.offset < to32 {
                Relocation::Destroyed
            } else if r.offset > from32 && r.offset >= to32 {
                // Marks at the edit start stay put; everything past the
                // replaced span shifts by the length delta.
                let shifted = (r.offset as i64 + delta).max(from32 as i64) as u32;
                Relocation::MoveTo(DocRef::new(r.chunk, shifted))
            } else {
                Relocation::Keep
            }
        })?;
        self.marks.free(start)?;
        self.marks.free(end)?;
        trace!(target: "doc", from, to, inserted = text.len(), "doc_splice");
        Ok(())
    }
}

impl Document for LineDoc {
    fn marks(&self) -> &MarkSet {
        &self.marks
    }

    fn marks_mut(&mut self) -> &mut MarkSet {
        &mut self.marks
    }

    fn alloc_mark(
        &mut self,
        at: DocRef,
        view: Option<usize>,
        owner: Option<PaneId>,
    ) -> Result<MarkId, MarkError> {
        let clamped = DocRef::new(0, at.offset.min(self.text.len() as u32));
        self.marks.create_sorted(clamped, view, owner, by_offset)
    }

    fn free_mark(&mut self, id: MarkId) -> Result<(), MarkError> {
        self.marks.free(id)
    }

    fn step(
        &mut self,
        id: MarkId,
        forward: bool,
        do_move: bool,
    ) -> Result<Option<char>, MarkError> {
        let off = self.marks.doc_ref(id)?.offset as usize;
        let (ch, new_off) = if forward {
            match self.text[off..].chars().next() {
                Some(c) => (Some(c), off + c.len_utf8()),
                None => (None, off),
            }
        } else {
            match self.text[..off].chars().next_back() {
                Some(c) => (Some(c), off - c.len_utf8()),
                None => (None, off),
            }
        };
        if do_move && ch.is_some() {
            self.marks
                .set_ref_sorted(id, Self::at(new_off), by_offset)?;
        }
        Ok(ch)
    }

    fn set_ref(&mut self, id: MarkId, point: RefPoint) -> Result<(), MarkError> {
        let off = match point {
            RefPoint::Start => 0,
            RefPoint::End => self.text.len(),
        };
        self.marks.set_ref_sorted(id, Self::at(off), by_offset)
    }

    fn add_view(&mut self, pane: PaneId) -> usize {
        self.marks.add_view(pane)
    }

    fn remove_view(&mut self, view: usize) -> Result<(), MarkError> {
        self.marks.remove_view(view)
    }

    fn replace(&mut self, start: MarkId, end: MarkId, text: &str) -> Result<(), MarkError> {
        let from = self.marks.doc_ref(start)?.offset as usize;
        let to = self.marks.doc_ref(end)?.offset as usize;
        if to < from {
            return Err(MarkError::BadRange);
        }
        self.splice(from, to, text)
    }

    fn attr_at(&self, id: MarkId, key: &str) -> Option<String> {
        self.marks.attrs(id)?.get(key).map(str::to_owned)
    }

    fn set_attr_at(&mut self, id: MarkId, key: &str, value: &str) -> Result<(), MarkError> {
        self.marks
            .attrs_mut(id)
            .ok_or(MarkError::StaleMark(id))?
            .set(key, value);
        Ok(())
    }
}

/// Install a document pane serving the `doc:*` call surface.
///
/// Calls understood (home-addressed):
/// * `doc:replace`  - mark, mark2 (optional, defaults to mark), str1
/// * `doc:step`     - mark, num (non-zero = forward), num2 (non-zero = move)
/// * `doc:set-ref`  - mark, str1 ("start" | "end")
/// * `doc:alloc-mark` - num (offset); replies through comm2 with num
/// * `doc:content`  - replies through comm2 with str1
pub fn register_doc_pane(ed: &mut Editor, parent: PaneId, doc: LineDoc) -> anyhow::Result<PaneId> {
    let handler = CommandHandle::new("doc:line-doc", doc_dispatch);
    let id = ed
        .register(parent, -1, Some(handler), Some(pane_data(doc)))
        .map_err(|e| anyhow::anyhow!("document pane registration failed: {e}"))?;
    Ok(id)
}

fn doc_dispatch(ed: &mut Editor, ci: &mut CallInfo) -> core_proto::CallResult {
    let home = ci.require_home()?;
    let Some(doc) = ed.data::<LineDoc>(home) else {
        return Err(CallError::Invalid("not a document pane"));
    };
    match ci.key.as_str() {
        "doc:replace" => {
            let start = ci.require_mark()?;
            let end = ci.mark2.unwrap_or(start);
            let text = ci.require_str()?.to_owned();
            doc.borrow_mut()
                .replace(start, end, &text)
                .map_err(|_| CallError::Fail("replace failed"))?;
            Ok(CmdRet::ok())
        }
        keys::DOC_STEP => {
            let mark = ci.require_mark()?;
            let forward = ci.num.unwrap_or(1) != 0;
            let do_move = ci.num2.unwrap_or(0) != 0;
            let stepped = doc
                .borrow_mut()
                .step(mark, forward, do_move)
                .map_err(|_| CallError::Invalid("mark"))?;
            match stepped {
                Some(c) => Ok(CmdRet::Num(c as i32)),
                None => Ok(CmdRet::False),
            }
        }
        keys::DOC_SET_REF => {
            let mark = ci.require_mark()?;
            let point = match ci.require_str()? {
                "start" => RefPoint::Start,
                "end" => RefPoint::End,
                _ => return Err(CallError::Invalid("str")),
            };
            doc.borrow_mut()
                .set_ref(mark, point)
                .map_err(|_| CallError::Invalid("mark"))?;
            Ok(CmdRet::ok())
        }
        "doc:alloc-mark" => {
            let offset = ci.num.unwrap_or(0).max(0) as u32;
            let owner = ci.focus;
            let mark = doc
                .borrow_mut()
                .alloc_mark(DocRef::new(0, offset), None, owner)
                .map_err(|_| CallError::Fail("mark allocation failed"))?;
            if let Some(cb) = ci.comm2.clone() {
                let mut reply = CallInfo::new("callback").with_mark(mark);
                ed.invoke(cb, &mut reply)?;
            }
            Ok(CmdRet::ok())
        }
        "doc:content" => {
            let text = doc.borrow().text().to_owned();
            let cb = ci.comm2.clone().ok_or(CallError::NoArg("comm2"))?;
            let mut reply = CallInfo::new("callback").with_str(text);
            ed.invoke(cb, &mut reply)?;
            Ok(CmdRet::ok())
        }
        _ => Ok(CmdRet::Fallthrough),
    }
}

/// Reply-capture helper for `comm2` protocols.
pub fn capture_reply() -> (CommandHandle, Rc<RefCell<CallInfo>>) {
    let slot: Rc<RefCell<CallInfo>> = Rc::new(RefCell::new(CallInfo::new("reply")));
    let sink = Rc::clone(&slot);
    let cb = CommandHandle::new("reply:capture", move |_, ci| {
        *sink.borrow_mut() = ci.clone();
        Ok(CmdRet::ok())
    });
    (cb, slot)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn splice_updates_marks_per_protocol() {
        let mut doc = LineDoc::new("HELLO WORLD");
        let a = doc.alloc_mark(DocRef::new(0, 0), None, None).unwrap();
        let b = doc.alloc_mark(DocRef::new(0, 5), None, None).unwrap();
        let c = doc.alloc_mark(DocRef::new(0, 11), None, None).unwrap();
        doc.splice(5, 5, " NEW").unwrap();
        assert_eq!(doc.text(), "HELLO NEW WORLD");
        assert_eq!(doc.offset_of(a).unwrap(), 0);
        assert_eq!(doc.offset_of(b).unwrap(), 5);
        assert_eq!(doc.offset_of(c).unwrap(), 15);
    }

    #[test]
    fn deletion_collapses_interior_marks() {
        let mut doc = LineDoc::new("abcdefgh");
        let inner = doc.alloc_mark(DocRef::new(0, 4), None, None).unwrap();
        let tail = doc.alloc_mark(DocRef::new(0, 7), None, None).unwrap();
        doc.splice(2, 6, "").unwrap();
        assert_eq!(doc.text(), "abgh");
        assert_eq!(doc.offset_of(inner).unwrap(), 2);
        assert_eq!(doc.offset_of(tail).unwrap(), 3);
    }

    #[test]
    fn step_walks_characters() {
        let mut doc = LineDoc::new("hi");
        let m = doc.alloc_mark(DocRef::new(0, 0), None, None).unwrap();
        assert_eq!(doc.step(m, true, true).unwrap(), Some('h'));
        assert_eq!(doc.step(m, true, true).unwrap(), Some('i'));
        assert_eq!(doc.step(m, true, true).unwrap(), None);
        assert_eq!(doc.step(m, false, false).unwrap(), Some('i'));
        assert_eq!(doc.offset_of(m).unwrap(), 2);
    }
}
