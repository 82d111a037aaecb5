//! End-to-end kernel scenarios over the public API: keymap-backed
//! handlers, tree surgery under dispatch, and refresh convergence.

use std::cell::RefCell;
use std::rc::Rc;

use core_keymap::Keymap;
use core_pane::{CallInfo, CommandHandle, Damage, Editor};
use core_proto::{CmdRet, keys};
use pretty_assertions::assert_eq;

fn recording(tag: &'static str, log: &Rc<RefCell<Vec<String>>>) -> CommandHandle {
    let log = Rc::clone(log);
    CommandHandle::new(tag, move |_, ci| {
        log.borrow_mut().push(format!("{tag}:{}", ci.key));
        Ok(CmdRet::ok())
    })
}

#[test]
fn keymap_backed_pane_binds_ranges_with_override() {
    let mut ed = Editor::new();
    let root = ed.root();
    ed.resize(root, 0, 0, 80, 24);

    let log = Rc::new(RefCell::new(Vec::new()));
    let mut map: Keymap<CommandHandle> = Keymap::new();
    map.add_range("Chr- ", "Chr-~", recording("insert", &log));
    map.add("Chr-A", recording("upcase", &log));
    let mode = CommandHandle::new_lookup("mode:test", map);
    let pane = ed.register(root, 0, Some(mode), None).unwrap();

    assert_eq!(ed.call("Chr- ", pane), Ok(CmdRet::ok()));
    assert_eq!(ed.call("Chr-A", pane), Ok(CmdRet::ok()));
    assert_eq!(ed.call("Chr-B", pane), Ok(CmdRet::ok()));
    assert_eq!(ed.call("Chr-~", pane), Ok(CmdRet::ok()));
    // Past the range end nothing binds, and the root claims nothing.
    assert_eq!(ed.call("Chr-\u{7f}", pane), Ok(CmdRet::Fallthrough));
    assert_eq!(
        log.borrow().as_slice(),
        [
            "insert:Chr- ",
            "upcase:Chr-A",
            "insert:Chr-B",
            "insert:Chr-~"
        ]
    );
}

#[test]
fn chained_keymap_serves_fallback_bindings() {
    let mut ed = Editor::new();
    let root = ed.root();
    let log = Rc::new(RefCell::new(Vec::new()));

    let mut base: Keymap<CommandHandle> = Keymap::new();
    base.add("Chr-q", recording("base-quit", &log));
    base.add("Enter", recording("base-enter", &log));
    let mut mode: Keymap<CommandHandle> = Keymap::new();
    mode.add("Chr-q", recording("mode-quit", &log));
    mode.set_chain(base);

    let pane = ed
        .register(root, 0, Some(CommandHandle::new_lookup("mode:chained", mode)), None)
        .unwrap();
    ed.call("Chr-q", pane).unwrap();
    ed.call("Enter", pane).unwrap();
    assert_eq!(log.borrow().as_slice(), ["mode-quit:Chr-q", "base-enter:Enter"]);
}

#[test]
fn prefix_command_rewrites_the_next_key() {
    let mut ed = Editor::new();
    let root = ed.root();
    let log = Rc::new(RefCell::new(Vec::new()));

    let mut map: Keymap<CommandHandle> = Keymap::new();
    map.add("emacs:Chr-x", recording("ctl-x", &log));
    let pane = ed
        .register(root, 0, Some(CommandHandle::new_lookup("mode:emacs", map)), None)
        .unwrap();

    let prefix = CommandHandle::new_prefix("mode:prefix", "emacs:");
    ed.register_command("Chr-x", prefix);
    // The raw key routes to the registry, gains the mode prefix, and
    // lands back on the pane's binding.
    assert_eq!(ed.call("Chr-x", pane), Ok(CmdRet::ok()));
    assert_eq!(log.borrow().as_slice(), ["ctl-x:emacs:Chr-x"]);
}

#[test]
fn close_under_dispatch_keeps_tree_resolvable() {
    let mut ed = Editor::new();
    let root = ed.root();
    let closing = CommandHandle::new("self-closer", |ed, ci| {
        if ci.key == "Keystroke" {
            let me = ci.require_home()?;
            ed.close(me);
            // Still resolvable after close: the parent link survives
            // until the quiescent point.
            assert!(ed.pane(me).is_some());
            assert_eq!(ed.pane(me).map(|p| p.parent()), Some(ed.root()));
            return Ok(CmdRet::ok());
        }
        Ok(CmdRet::Fallthrough)
    });
    let pane = ed.register(root, 0, Some(closing), None).unwrap();
    assert_eq!(ed.call("Keystroke", pane), Ok(CmdRet::ok()));
    // The delayed free runs at refresh quiescence.
    ed.refresh();
    assert!(ed.pane(pane).is_none());
}

#[test]
fn refresh_converges_after_tree_surgery() {
    let mut ed = Editor::new();
    let root = ed.root();
    ed.resize(root, 0, 0, 120, 40);
    let a = ed.register(root, 0, None, None).unwrap();
    let b = ed.register(root, 0, None, None).unwrap();
    let a1 = ed.register(a, 0, None, None).unwrap();
    let _a2 = ed.register(a, 1, None, None).unwrap();
    ed.refresh();

    ed.reparent(a1, b).unwrap();
    ed.resize(b, 10, 10, 50, 20);
    ed.close(a);
    ed.refresh();

    let live: Vec<_> = [root, b, a1]
        .into_iter()
        .filter(|p| ed.pane(*p).is_some())
        .collect();
    assert_eq!(live.len(), 3);
    for p in live {
        assert_eq!(
            ed.pane(p).unwrap().damage() & !Damage::CLOSED,
            Damage::empty()
        );
    }
    // a and its subtree are gone for good.
    assert!(ed.pane(a).is_none());
}

#[test]
fn notify_resize_reaches_watchers() {
    let mut ed = Editor::new();
    let root = ed.root();
    let log = Rc::new(RefCell::new(Vec::new()));
    let observed = ed.register(root, 0, None, None).unwrap();
    let watcher = ed
        .register(root, 0, Some(recording("watch", &log)), None)
        .unwrap();
    ed.add_notify(watcher, observed, keys::NOTIFY_RESIZE);
    ed.resize(observed, -1, -1, 33, 7);
    assert_eq!(log.borrow().as_slice(), ["watch:Notify:resize"]);
}

#[test]
fn callback_returns_typed_data_through_comm2() {
    let mut ed = Editor::new();
    let root = ed.root();
    let answer = CommandHandle::new("answer", |ed, ci| {
        let cb = ci.comm2.clone().expect("callback supplied");
        let mut reply = CallInfo::new("reply").with_str("forty-two").with_num(42);
        ed.invoke(cb, &mut reply)
    });
    let pane = ed.register(root, 0, Some(answer), None).unwrap();

    let got: Rc<RefCell<Option<(String, i32)>>> = Rc::new(RefCell::new(None));
    let sink = Rc::clone(&got);
    let cb = CommandHandle::new("collect", move |_, ci| {
        *sink.borrow_mut() = Some((
            ci.str1.clone().unwrap_or_default(),
            ci.num.unwrap_or_default(),
        ));
        Ok(CmdRet::ok())
    });
    let mut ci = CallInfo::new("query").with_home(pane).with_comm2(cb);
    ed.handle(&mut ci).unwrap();
    assert_eq!(got.borrow().clone(), Some(("forty-two".to_owned(), 42)));
}
