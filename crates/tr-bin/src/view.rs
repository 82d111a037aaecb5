//! The input/view pane: a keymap-backed editing surface over one document
//! and one display.
//!
//! Printable keys are bound as a range to self-insert; Enter, Backspace
//! and C-q have exact bindings carved out of or next to it. The pane's
//! refresh hook redraws the whole document into the display grid and
//! places the cursor at the point mark.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use core_keymap::Keymap;
use core_marks::Document;
use core_pane::{CallInfo, CommandHandle, Damage, Editor, pane_data};
use core_proto::{CallError, CmdRet, MarkId, PaneId, keys};
use tracing::{info, warn};

use crate::doc::{LineDoc, capture_reply};

pub struct ViewState {
    pub doc: PaneId,
    pub display: PaneId,
    pub point: MarkId,
}

fn view_state(ed: &Editor, ci: &CallInfo) -> Result<(PaneId, PaneId, PaneId, MarkId), CallError> {
    let home = ci.require_home()?;
    let vs = ed
        .data::<ViewState>(home)
        .ok_or(CallError::Invalid("not a view pane"))?;
    let v = vs.borrow();
    Ok((home, v.doc, v.display, v.point))
}

fn insert_at_point(ed: &mut Editor, ci: &CallInfo, text: &str) -> core_proto::CallResult {
    let (home, doc, _, point) = view_state(ed, ci)?;
    let mut call = CallInfo::new("doc:replace")
        .with_home(doc)
        .with_mark(point)
        .with_str(text);
    ed.handle(&mut call)?;
    // The point keeps its place at the edit start; walk it over the
    // inserted text so typing advances.
    for _ in 0..text.chars().count() {
        let mut step = CallInfo::new(keys::DOC_STEP)
            .with_home(doc)
            .with_mark(point)
            .with_num(1)
            .with_num2(1);
        ed.handle(&mut step)?;
    }
    ed.mark_damaged(home, Damage::CONTENT);
    Ok(CmdRet::ok())
}

fn self_insert(ed: &mut Editor, ci: &mut CallInfo) -> core_proto::CallResult {
    let ch = ci
        .key
        .strip_prefix("Chr-")
        .ok_or(CallError::Invalid("key"))?
        .to_owned();
    insert_at_point(ed, ci, &ch)
}

fn insert_newline(ed: &mut Editor, ci: &mut CallInfo) -> core_proto::CallResult {
    insert_at_point(ed, ci, "\n")
}

fn delete_back(ed: &mut Editor, ci: &mut CallInfo) -> core_proto::CallResult {
    let (home, doc, _, point) = view_state(ed, ci)?;
    let Some(d) = ed.data::<LineDoc>(doc) else {
        return Err(CallError::Invalid("doc"));
    };
    let deleted = {
        let mut d = d.borrow_mut();
        let off = d.offset_of(point).map_err(|_| CallError::Invalid("mark"))?;
        match d.text()[..off].chars().next_back() {
            Some(c) => {
                let start = off - c.len_utf8();
                d.splice(start, off, "")
                    .map_err(|_| CallError::Fail("delete failed"))?;
                true
            }
            None => false,
        }
    };
    if !deleted {
        return Ok(CmdRet::False);
    }
    ed.mark_damaged(home, Damage::CONTENT);
    Ok(CmdRet::ok())
}

fn render(ed: &mut Editor, ci: &CallInfo) -> core_proto::CallResult {
    let (home, doc, display, point) = view_state(ed, ci)?;
    let (cb, reply) = capture_reply();
    let mut content = CallInfo::new("doc:content").with_home(doc).with_comm2(cb);
    ed.handle(&mut content)?;
    let text = reply.borrow().str1.clone().unwrap_or_default();

    let mut clear = CallInfo::new(keys::PANE_CLEAR).with_home(display);
    ed.handle(&mut clear)?;
    let rows = ed
        .pane(display)
        .map(|p| p.geometry().3.max(1) as usize)
        .unwrap_or(1);
    for (y, line) in text.lines().take(rows).enumerate() {
        let mut draw = CallInfo::new(keys::DRAW_TEXT)
            .with_home(display)
            .with_str(line)
            .with_xy(0, y as i32);
        ed.handle(&mut draw)?;
    }

    let off = ed
        .data::<LineDoc>(doc)
        .and_then(|d| d.borrow().offset_of(point).ok())
        .unwrap_or(0);
    let before = &text[..off.min(text.len())];
    let row = before.matches('\n').count() as i32;
    let col = before
        .rsplit_once('\n')
        .map(|(_, tail)| tail)
        .unwrap_or(before)
        .chars()
        .count() as i32;
    ed.place_cursor(home, Some((col, row)));
    Ok(CmdRet::ok())
}

/// Build the view pane under `parent`, editing `doc` and drawing into
/// `display`. `quit` is raised by the C-q binding; the runtime loop polls
/// it after every event.
pub fn register_view_pane(
    ed: &mut Editor,
    parent: PaneId,
    doc: PaneId,
    display: PaneId,
    quit: Rc<Cell<bool>>,
) -> anyhow::Result<PaneId> {
    let mut map: Keymap<CommandHandle> = Keymap::new();
    map.add_range(
        "Chr- ",
        "Chr-~",
        CommandHandle::new("view:self-insert", self_insert),
    );
    map.add("Enter", CommandHandle::new("view:newline", insert_newline));
    map.add("Backspace", CommandHandle::new("view:delete-back", delete_back));
    let quit_flag = Rc::clone(&quit);
    map.add(
        "C-Chr-q",
        CommandHandle::new("view:quit", move |_, _| {
            info!(target: "runtime", "quit requested");
            quit_flag.set(true);
            Ok(CmdRet::ok())
        }),
    );

    let map = RefCell::new(map);
    let handler = CommandHandle::new("view:input", move |ed, ci| match ci.key.as_str() {
        keys::REFRESH | keys::REFRESH_VIEW => render(ed, ci),
        keys::MESSAGE_BROADCAST => {
            warn!(target: "runtime", message = ci.str1.as_deref().unwrap_or(""), "editor warning");
            Ok(CmdRet::ok())
        }
        _ => {
            let hash = ci.hash.unwrap_or_else(|| core_proto::hash_key(&ci.key));
            match map.borrow_mut().lookup_hashed(&ci.key, hash) {
                Some(cmd) => ed.invoke(cmd, ci),
                None => Ok(CmdRet::Fallthrough),
            }
        }
    });

    // The point mark tracks the end of the seeded content.
    let point = {
        let d = ed
            .data::<LineDoc>(doc)
            .ok_or_else(|| anyhow::anyhow!("doc pane has no document"))?;
        let mut d = d.borrow_mut();
        let end = d.len();
        d.alloc_mark(core_marks::DocRef::new(0, end as u32), None, None)
            .map_err(|e| anyhow::anyhow!("point mark allocation failed: {e}"))?
    };
    let state = ViewState {
        doc,
        display,
        point,
    };
    let id = ed
        .register(parent, 0, Some(handler), Some(pane_data(state)))
        .map_err(|e| anyhow::anyhow!("view pane registration failed: {e}"))?;
    // Editor-wide warnings surface through this pane's log.
    ed.add_notify(id, ed.root(), keys::MESSAGE_BROADCAST);
    ed.set_focus(id);
    Ok(id)
}
