//! core-proto: shared vocabulary for the Trellis kernel.
//!
//! Everything two kernel crates need to agree on without depending on each
//! other lives here: generational identifiers for panes and marks, the
//! handler return contract, the closed error taxonomy, the well-known call
//! key strings, the two-part key hash used by keymap bloom filters, and the
//! dispatch backtrace frame.
//!
//! Invariants:
//! * `PaneId`/`MarkId` are only minted by the arena that owns the slot; a
//!   stale id (generation mismatch) must resolve to "gone", never to a
//!   recycled occupant.
//! * `CmdRet::Fallthrough` is the one return that continues routing. No
//!   error does.
//! * Key hashing is process-stable (fixed seeds) so hashes precomputed at
//!   dispatch entry stay valid against any map's bloom filter.

use std::fmt;

use thiserror::Error;

pub mod keys;

// -------------------------------------------------------------------------------------------------
// Generational identifiers
// -------------------------------------------------------------------------------------------------

/// Identifier for a pane slot (generational).
///
/// Panes reference each other (parent, focus, notification edges, mark
/// owners) by id rather than by pointer; the owning arena resolves ids and
/// rejects stale generations.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct PaneId(u32, u32);

impl PaneId {
    /// Mint an id. Only the pane arena should call this.
    pub const fn new(idx: u32, generation: u32) -> Self {
        Self(idx, generation)
    }

    pub const fn idx(self) -> usize {
        self.0 as usize
    }

    pub const fn generation(self) -> u32 {
        self.1
    }
}

impl fmt::Display for PaneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{}.{}", self.0, self.1)
    }
}

/// Identifier for a mark slot within one document (generational).
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct MarkId(u32, u32);

impl MarkId {
    /// Mint an id. Only the mark arena should call this.
    pub const fn new(idx: u32, generation: u32) -> Self {
        Self(idx, generation)
    }

    pub const fn idx(self) -> usize {
        self.0 as usize
    }

    pub const fn generation(self) -> u32 {
        self.1
    }
}

impl fmt::Display for MarkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "m{}.{}", self.0, self.1)
    }
}

// -------------------------------------------------------------------------------------------------
// Handler return contract
// -------------------------------------------------------------------------------------------------

/// Successful outcomes of a handler invocation.
///
/// The dispatcher only ever branches on `Fallthrough`; everything else is
/// surfaced to the caller unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmdRet {
    /// "Not my call": the handler does not claim this key and routing
    /// should try the next candidate. Distinct from every other outcome.
    Fallthrough,
    /// The call completed and the answer is "no" (the classic 0 return).
    False,
    /// Success; the value is operation-defined and strictly positive.
    Num(i32),
}

impl CmdRet {
    /// Conventional plain success.
    pub const fn ok() -> Self {
        Self::Num(1)
    }

    /// True for every outcome except `Fallthrough`.
    pub fn is_handled(self) -> bool {
        !matches!(self, Self::Fallthrough)
    }

    /// Wire-protocol integer for this outcome. `Fallthrough` has no
    /// integer form and maps to the reserved sentinel.
    pub fn code(self) -> i32 {
        match self {
            Self::Fallthrough => EFALLTHROUGH,
            Self::False => EFALSE,
            Self::Num(n) => n.max(1),
        }
    }
}

/// Every inter-pane call resolves to this.
pub type CallResult = Result<CmdRet, CallError>;

// -------------------------------------------------------------------------------------------------
// Error taxonomy
// -------------------------------------------------------------------------------------------------

/// Closed set of kernel call failures.
///
/// Handlers surface these to their immediate caller; the dispatcher never
/// retries on any of them. `code()` gives the classic negative integer for
/// collaborators that speak the numeric protocol.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CallError {
    /// A required call field was absent.
    #[error("missing call argument: {0}")]
    NoArg(&'static str),
    /// Fields were present but inconsistent (wrong document, bad range).
    #[error("invalid call argument: {0}")]
    Invalid(&'static str),
    /// The operation ran but could not complete.
    #[error("operation failed: {0}")]
    Fail(&'static str),
    /// Failure reported by the host system.
    #[error("system error: {0}")]
    Sys(String),
    /// The dispatch recursion limit was reached; the backtrace was logged.
    #[error("dispatch depth limit ({MAX_DEPTH}) exceeded")]
    TooDeep,
    /// The per-call time budget expired before this handler ran.
    #[error("call time budget exhausted")]
    TimesUp,
    /// A notification re-entered itself while still being delivered.
    #[error("recursive notification of {0:?}")]
    NotifyLoop(String),
}

pub const EFALSE: i32 = 0;
pub const ENOARG: i32 = -1;
pub const EINVAL: i32 = -2;
pub const EFAIL: i32 = -3;
pub const ESYS: i32 = -4;
/// Reserved sentinel for "unhandled"; never confused with an error code.
pub const EFALLTHROUGH: i32 = -5;
/// Lower bound of the code space; nothing at or below this is ever valid.
pub const EUNUSED: i32 = -6;

impl CallError {
    pub fn code(&self) -> i32 {
        match self {
            Self::NoArg(_) => ENOARG,
            Self::Invalid(_) => EINVAL,
            Self::Fail(_) | Self::TooDeep | Self::TimesUp | Self::NotifyLoop(_) => EFAIL,
            Self::Sys(_) => ESYS,
        }
    }
}

// -------------------------------------------------------------------------------------------------
// Dispatch depth and backtrace
// -------------------------------------------------------------------------------------------------

/// Fixed dispatch recursion limit. Reaching it fails the call and logs the
/// backtrace; it never aborts the process.
pub const MAX_DEPTH: u32 = 100;

/// One frame of the dispatch backtrace kept by the editor root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceFrame {
    pub key: String,
    pub home: Option<PaneId>,
    pub focus: Option<PaneId>,
}

impl fmt::Display for TraceFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.home, self.focus) {
            (Some(h), Some(fo)) => write!(f, "{:?} home={} focus={}", self.key, h, fo),
            (Some(h), None) => write!(f, "{:?} home={}", self.key, h),
            (None, Some(fo)) => write!(f, "{:?} focus={}", self.key, fo),
            (None, None) => write!(f, "{:?}", self.key),
        }
    }
}

// -------------------------------------------------------------------------------------------------
// Key hashing
// -------------------------------------------------------------------------------------------------

/// Two-part hash of a call key: the whole key and its prefix up to (and
/// including) the first `-` or `:`. The prefix hash lets range-registered
/// maps (`doc:`, `event:`) reject non-matching keys without a search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyHash {
    pub prefix: u64,
    pub full: u64,
}

// Fixed seeds: hashes must stay comparable across maps and across calls
// within one process run.
const HASH_SEEDS: (u64, u64, u64, u64) = (
    0x9e37_79b9_7f4a_7c15,
    0xd1b5_4a32_d192_ed03,
    0x8ebc_6af0_9c88_c6e3,
    0x589f_cbe6_94f1_54ab,
);

fn stable_hash(bytes: &[u8]) -> u64 {
    use std::hash::{BuildHasher, Hasher};
    let state = ahash::RandomState::with_seeds(HASH_SEEDS.0, HASH_SEEDS.1, HASH_SEEDS.2, HASH_SEEDS.3);
    let mut h = state.build_hasher();
    h.write(bytes);
    h.finish()
}

/// Split point for the prefix hash: one past the first `-` or `:`, or the
/// whole key when neither occurs.
pub fn key_prefix_len(key: &str) -> usize {
    key.bytes()
        .position(|b| b == b'-' || b == b':')
        .map(|p| p + 1)
        .unwrap_or(key.len())
}

pub fn hash_key(key: &str) -> KeyHash {
    let split = key_prefix_len(key);
    KeyHash {
        prefix: stable_hash(&key.as_bytes()[..split]),
        full: stable_hash(key.as_bytes()),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn pane_id_round_trip() {
        let id = PaneId::new(7, 3);
        assert_eq!(id.idx(), 7);
        assert_eq!(id.generation(), 3);
        assert_eq!(format!("{id}"), "p7.3");
    }

    #[test]
    fn cmd_ret_codes() {
        assert_eq!(CmdRet::False.code(), EFALSE);
        assert_eq!(CmdRet::ok().code(), 1);
        assert_eq!(CmdRet::Fallthrough.code(), EFALLTHROUGH);
        assert!(!CmdRet::Fallthrough.is_handled());
        assert!(CmdRet::False.is_handled());
    }

    #[test]
    fn error_codes_stay_in_closed_set() {
        let all = [
            CallError::NoArg("mark"),
            CallError::Invalid("mark2"),
            CallError::Fail("nope"),
            CallError::Sys("io".into()),
            CallError::TooDeep,
            CallError::TimesUp,
            CallError::NotifyLoop("Notify:resize".into()),
        ];
        for e in &all {
            assert!(e.code() < EFALSE);
            assert!(e.code() > EUNUSED);
            assert_ne!(e.code(), EFALLTHROUGH);
        }
    }

    #[test]
    fn prefix_split_at_dash_or_colon() {
        assert_eq!(key_prefix_len("doc:step"), 4);
        assert_eq!(key_prefix_len("Chr-A"), 4);
        assert_eq!(key_prefix_len("Refresh"), 7);
        // First separator wins, whichever kind it is.
        assert_eq!(key_prefix_len("pane:de-focus"), 5);
    }

    #[test]
    fn hashes_are_stable_and_prefix_shared() {
        let a = hash_key("doc:step");
        let b = hash_key("doc:set-ref");
        let c = hash_key("doc:step");
        assert_eq!(a, c);
        assert_eq!(a.prefix, b.prefix);
        assert_ne!(a.full, b.full);
    }
}
