//! Command values: the atom of dispatch.
//!
//! A command is a named callable with a `close-safe` flag fixed at
//! construction; sharing is by `Rc`, so the reference count of the original
//! design is the handle count. Prefix commands and keymap-lookup commands
//! are built from the same type via constructors.

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use core_keymap::Keymap;
use core_proto::{CallResult, CmdRet};

use crate::call::CallInfo;
use crate::editor::Editor;

/// Handler signature. Handlers receive the whole editor (the kernel is
/// single-threaded) and the call record; only `comm`/`home` of the record
/// may be rewritten during routing.
pub type HandlerFn = dyn Fn(&mut Editor, &mut CallInfo) -> CallResult;

pub struct Command {
    name: String,
    close_safe: bool,
    func: Box<HandlerFn>,
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("name", &self.name)
            .field("close_safe", &self.close_safe)
            .finish_non_exhaustive()
    }
}

/// Shared handle to a command.
#[derive(Clone, Debug)]
pub struct CommandHandle(Rc<Command>);

impl CommandHandle {
    pub fn new(
        name: impl Into<String>,
        func: impl Fn(&mut Editor, &mut CallInfo) -> CallResult + 'static,
    ) -> Self {
        Self(Rc::new(Command {
            name: name.into(),
            close_safe: false,
            func: Box::new(func),
        }))
    }

    /// A command allowed to run on a pane after it is CLOSED but before it
    /// is freed (the `Close` handler itself, and similar cleanup).
    pub fn new_close_safe(
        name: impl Into<String>,
        func: impl Fn(&mut Editor, &mut CallInfo) -> CallResult + 'static,
    ) -> Self {
        Self(Rc::new(Command {
            name: name.into(),
            close_safe: true,
            func: Box::new(func),
        }))
    }

    /// A prefix command: pushes a mode string in front of the next call's
    /// key and re-dispatches from the original focus.
    pub fn new_prefix(name: impl Into<String>, mode: impl Into<String>) -> Self {
        let mode = mode.into();
        let name = name.into();
        Self::new(name, move |ed, ci| {
            let mut inner = CallInfo::new(format!("{}{}", mode, ci.key));
            inner.focus = ci.focus;
            inner.num = ci.num;
            inner.mark = ci.mark;
            ed.handle(&mut inner)
        })
    }

    /// A lookup command: holds a keymap and forwards each call to the
    /// command bound to its key, falling through when unbound.
    pub fn new_lookup(name: impl Into<String>, map: Keymap<CommandHandle>) -> Self {
        let map = RefCell::new(map);
        Self::new(name.into(), move |ed, ci| {
            let hash = ci.hash.unwrap_or_else(|| core_proto::hash_key(&ci.key));
            let bound = map.borrow_mut().lookup_hashed(&ci.key, hash);
            match bound {
                Some(cmd) => ed.invoke(cmd, ci),
                None => Ok(CmdRet::Fallthrough),
            }
        })
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn close_safe(&self) -> bool {
        self.0.close_safe
    }

    pub fn func(&self) -> &HandlerFn {
        &*self.0.func
    }

    /// Number of live handles (the original refcount).
    pub fn handle_count(&self) -> usize {
        Rc::strong_count(&self.0)
    }

    /// Identity comparison: same underlying command object.
    pub fn same(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

/// Wrap a typed value as pane data. Handlers get it back with
/// [`Editor::data`].
pub fn pane_data<T: 'static>(value: T) -> Rc<dyn Any> {
    Rc::new(RefCell::new(value))
}
