//! core-pane: the Trellis kernel.
//!
//! Everything visible or logical in the editor is a pane: a node in a tree
//! with geometry, damage flags, an attribute store, a handler command and
//! opaque data. Panes communicate exclusively through the uniform call
//! record of [`CallInfo`]; the [`Editor`] owns the tree, routes calls,
//! carries the notification graph, and schedules the damage/refresh passes.
//!
//! Module map:
//! * `comm`     - command values (named, shared, close-safe)
//! * `call`     - the one call record every inter-pane call uses
//! * `damage`   - damage bitmask and propagation policy
//! * `pane`     - the pane node itself
//! * `editor`   - the arena, registration and tree surgery
//! * `dispatch` - `handle()` routing, depth guard, backtrace, times-up
//! * `notify`   - many-to-many notification edges with re-entrancy rules
//! * `refresh`  - the multi-phase refresh scheduler
//!
//! Scheduling is single-threaded cooperative: handlers run to completion,
//! one external event produces at most one refresh pass, and closed panes
//! are reclaimed only at the quiescent point between events.

mod call;
mod comm;
mod damage;
mod dispatch;
mod editor;
mod notify;
mod pane;
mod refresh;

pub use call::CallInfo;
pub use comm::{Command, CommandHandle, pane_data};
pub use damage::Damage;
pub use editor::{Editor, MaskCheck, Scale};
pub use pane::Pane;
