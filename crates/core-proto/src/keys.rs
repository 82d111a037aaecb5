//! Well-known call keys the kernel produces or consumes.
//!
//! Collaborators are free to define further keys; these are the ones the
//! kernel itself routes, fires, or interprets.

/// Delivered to a parent when a child is created; the handler may veto the
/// registration by closing the child.
pub const CHILD_REGISTERED: &str = "ChildRegistered";
/// Delivered to a parent when a child begins closing.
pub const CHILD_CLOSED: &str = "ChildClosed";
/// Delivered to a parent when a child was reparented under it.
pub const CHILD_MOVED: &str = "ChildMoved";
/// Delivered when a reparent replaced an attached pane in the same call.
pub const CHILD_REPLACED: &str = "ChildReplaced";

/// Delivered to a pane (and each descendant) during destruction.
pub const CLOSE: &str = "Close";
/// Delivered when the delayed-free queue finally drops a pane.
pub const FREE: &str = "Free";
/// Requested when a view tree is being duplicated.
pub const CLONE: &str = "Clone";

/// Content-phase refresh hook.
pub const REFRESH: &str = "Refresh";
/// Resize-phase refresh hook; non-zero return means "children only".
pub const REFRESH_SIZE: &str = "Refresh:size";
/// View-phase refresh hook.
pub const REFRESH_VIEW: &str = "Refresh:view";
/// Postorder-phase refresh hook.
pub const REFRESH_POSTORDER: &str = "Refresh:postorder";

pub const PANE_REFOCUS: &str = "pane:refocus";
pub const PANE_DEFOCUS: &str = "pane:defocus";

/// Prefix of every notification dispatch key.
pub const NOTIFY_PREFIX: &str = "Notify:";
pub const NOTIFY_RESIZE: &str = "Notify:resize";
pub const NOTIFY_CLOSE: &str = "Notify:Close";

/// Attribute fallback hook consulted between a pane's own store and its
/// parent chain.
pub const GET_ATTR: &str = "get-attr";

pub const KEYSTROKE: &str = "Keystroke";
pub const MOUSE_EVENT: &str = "Mouse-event";
pub const PASTE: &str = "Paste";
pub const MESSAGE: &str = "Message";
pub const MESSAGE_MODAL: &str = "Message:modal";

/// Prefix for editor-wide notifications emitted from the root.
pub const EDITOR_NOTIFY_PREFIX: &str = "editor:notify:";
/// Broadcast channel the kernel uses for its own warnings (refresh
/// livelock, recursion limit).
pub const MESSAGE_BROADCAST: &str = "editor:notify:Message:broadcast";

/// Bootstrap registration of a named command on the root dispatcher.
pub const GLOBAL_SET_COMMAND: &str = "global-set-command";
/// Bootstrap registration of a whole keymap on the root dispatcher.
pub const GLOBAL_SET_KEYMAP: &str = "global-set-keymap";

/// Prefix of calls addressed to a document collaborator.
pub const DOC_PREFIX: &str = "doc:";
pub const DOC_STEP: &str = "doc:step";
pub const DOC_SET_REF: &str = "doc:set-ref";

pub const DRAW_TEXT: &str = "Draw:text";
pub const PANE_CLEAR: &str = "pane-clear";
pub const TEXT_SIZE: &str = "text-size";
