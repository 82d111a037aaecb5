//! The call-info record: exactly one shape for every inter-pane call.
//!
//! Built on the stack with the `with_*` helpers and passed by mutable
//! reference. Handlers treat every field as read-only except `comm` (the
//! dispatcher rewrites it to the handler being invoked) and `home` (the
//! dispatcher rewrites it while walking the focus chain).

use core_proto::{KeyHash, MarkId, PaneId};

use crate::comm::CommandHandle;

#[derive(Debug, Clone, Default)]
pub struct CallInfo {
    /// The key naming the operation ("Keystroke", "doc:step", ...).
    pub key: String,
    /// Where the handler runs. Set by the dispatcher during routing.
    pub home: Option<PaneId>,
    /// The semantic target of the call.
    pub focus: Option<PaneId>,
    pub num: Option<i32>,
    pub num2: Option<i32>,
    pub mark: Option<MarkId>,
    pub mark2: Option<MarkId>,
    pub str1: Option<String>,
    pub str2: Option<String>,
    pub x: Option<i32>,
    pub y: Option<i32>,
    /// The handler currently being invoked (its name and flags).
    pub comm: Option<CommandHandle>,
    /// Optional callback the handler may invoke to return typed data.
    pub comm2: Option<CommandHandle>,
    /// Precomputed key hash, so routing probes every keymap on the path
    /// without rehashing.
    pub hash: Option<KeyHash>,
}

impl CallInfo {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ..Self::default()
        }
    }

    pub fn with_focus(mut self, focus: PaneId) -> Self {
        self.focus = Some(focus);
        self
    }

    pub fn with_home(mut self, home: PaneId) -> Self {
        self.home = Some(home);
        self
    }

    pub fn with_num(mut self, num: i32) -> Self {
        self.num = Some(num);
        self
    }

    pub fn with_num2(mut self, num2: i32) -> Self {
        self.num2 = Some(num2);
        self
    }

    pub fn with_mark(mut self, mark: MarkId) -> Self {
        self.mark = Some(mark);
        self
    }

    pub fn with_mark2(mut self, mark2: MarkId) -> Self {
        self.mark2 = Some(mark2);
        self
    }

    pub fn with_str(mut self, s: impl Into<String>) -> Self {
        self.str1 = Some(s.into());
        self
    }

    pub fn with_str2(mut self, s: impl Into<String>) -> Self {
        self.str2 = Some(s.into());
        self
    }

    pub fn with_xy(mut self, x: i32, y: i32) -> Self {
        self.x = Some(x);
        self.y = Some(y);
        self
    }

    pub fn with_comm2(mut self, comm2: CommandHandle) -> Self {
        self.comm2 = Some(comm2);
        self
    }

    // Typed extraction helpers; missing fields become `Enoarg` at the use
    // site via `ok_or`.

    pub fn require_focus(&self) -> Result<PaneId, core_proto::CallError> {
        self.focus.ok_or(core_proto::CallError::NoArg("focus"))
    }

    pub fn require_home(&self) -> Result<PaneId, core_proto::CallError> {
        self.home.ok_or(core_proto::CallError::NoArg("home"))
    }

    pub fn require_mark(&self) -> Result<MarkId, core_proto::CallError> {
        self.mark.ok_or(core_proto::CallError::NoArg("mark"))
    }

    pub fn require_str(&self) -> Result<&str, core_proto::CallError> {
        self.str1
            .as_deref()
            .ok_or(core_proto::CallError::NoArg("str"))
    }
}
