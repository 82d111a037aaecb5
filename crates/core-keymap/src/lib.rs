//! core-keymap: the ordered key-to-command mapping engine.
//!
//! A keymap is an ordered sequence of (key, command) entries plus an
//! optional chained fallback map. Keys are arbitrary byte strings compared
//! lexicographically. An entry is either an exact binding or a range-start
//! marker; the original implementation packed that distinction into the low
//! bit of a pointer, here it is an explicit tag per entry.
//!
//! A range is registered as a tagged range-start entry at its low key and a
//! plain exact entry at its inclusive high key bound to the same command.
//! The range covers every key from the start marker up to (but not
//! including) the next entry that is not a range start with the same
//! command.
//!
//! Invariants:
//! * `entries` is sorted by (key, kind) with `Exact` ordered before
//!   `RangeStart` at equal keys, so an override at K shadows the range
//!   continuation marker at K.
//! * Inserting K strictly inside a range leaves a range-start at K behind
//!   the new exact entry, so keys after K still reach the range command.
//! * The bloom filter is advisory only; it is rebuilt lazily when the
//!   modification flag is set and may never produce a false negative.
//!
//! Resolution depends only on the entry list; logging is TRACE-level for
//! traversal steps, matching the rest of the kernel.

use core_proto::{KeyHash, hash_key, key_prefix_len};
use tracing::trace;

mod bloom;

use bloom::Bloom;

/// Tag distinguishing the two entry forms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EntryKind {
    /// Binds exactly its key.
    Exact,
    /// Opens a range; covers its own key and those after it until the
    /// range terminator.
    RangeStart,
}

#[derive(Debug, Clone)]
struct Entry<C> {
    key: String,
    cmd: C,
    kind: EntryKind,
}

/// Ordered key-to-command map with range entries and a chained fallback.
#[derive(Debug, Clone)]
pub struct Keymap<C> {
    entries: Vec<Entry<C>>,
    chain: Option<Box<Keymap<C>>>,
    bloom: Bloom,
    /// Set on every mutation; the bloom filter is rebuilt on the next probe.
    stale: bool,
}

impl<C: Clone> Default for Keymap<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clone> Keymap<C> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            chain: None,
            bloom: Bloom::new(),
            stale: false,
        }
    }

    /// Number of entries in this map (markers included), chain excluded.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Install (or replace) the fallback map consulted when this map has
    /// no binding.
    pub fn set_chain(&mut self, fallback: Keymap<C>) {
        self.chain = Some(Box::new(fallback));
    }

    pub fn chain(&self) -> Option<&Keymap<C>> {
        self.chain.as_deref()
    }

    /// Position of the first entry ≥ (key, kind).
    fn position(&self, key: &str, kind: EntryKind) -> usize {
        self.entries
            .partition_point(|e| (e.key.as_str(), e.kind) < (key, kind))
    }

    /// Bind `key` exactly to `cmd`, replacing any previous exact binding.
    ///
    /// When `key` falls strictly inside an existing range, a range-start
    /// entry for the range's command is left immediately after the new
    /// exact entry so later keys keep resolving to the range.
    pub fn add(&mut self, key: &str, cmd: C) {
        self.stale = true;
        let idx = self.position(key, EntryKind::Exact);
        if let Some(e) = self.entries.get_mut(idx)
            && e.key == key
            && e.kind == EntryKind::Exact
        {
            e.cmd = cmd;
            return;
        }
        // A continuation marker is needed when the covering entry is a
        // range start at a key strictly below ours. A range start (or any
        // marker) at exactly `key` already keeps the range alive.
        let continuation = match self.entries.get(idx) {
            Some(e) if e.key == key => None,
            _ => match idx.checked_sub(1).map(|i| &self.entries[i]) {
                Some(prev) if prev.kind == EntryKind::RangeStart => Some(prev.cmd.clone()),
                _ => None,
            },
        };
        trace!(target: "keymap", key, split_range = continuation.is_some(), "keymap_add");
        self.entries.insert(
            idx,
            Entry {
                key: key.to_owned(),
                cmd,
                kind: EntryKind::Exact,
            },
        );
        if let Some(range_cmd) = continuation {
            self.entries.insert(
                idx + 1,
                Entry {
                    key: key.to_owned(),
                    cmd: range_cmd,
                    kind: EntryKind::RangeStart,
                },
            );
        }
    }

    /// Bind the inclusive key range [`low`, `high`] to `cmd`.
    ///
    /// Exact bindings already inside the range keep winning on their own
    /// keys; a continuation marker is placed after each so the gaps between
    /// them resolve to the range.
    pub fn add_range(&mut self, low: &str, high: &str, cmd: C) {
        debug_assert!(low <= high, "range low must not exceed high");
        self.stale = true;
        // After any exact entry at the same key, keeping (key, kind) order.
        let start = self.position(low, EntryKind::RangeStart);
        self.entries.insert(
            start,
            Entry {
                key: low.to_owned(),
                cmd: cmd.clone(),
                kind: EntryKind::RangeStart,
            },
        );
        let mut end = self.position(high, EntryKind::Exact);
        self.entries.insert(
            end,
            Entry {
                key: high.to_owned(),
                cmd: cmd.clone(),
                kind: EntryKind::Exact,
            },
        );
        // Re-arm the range behind pre-existing exact overrides inside it.
        let mut i = start + 1;
        while i < end {
            let needs_marker = self.entries[i].kind == EntryKind::Exact
                && self
                    .entries
                    .get(i + 1)
                    .is_none_or(|n| n.kind != EntryKind::RangeStart || n.key != self.entries[i].key);
            if needs_marker {
                let key = self.entries[i].key.clone();
                self.entries.insert(
                    i + 1,
                    Entry {
                        key,
                        cmd: cmd.clone(),
                        kind: EntryKind::RangeStart,
                    },
                );
                i += 1;
                end += 1;
            }
            i += 1;
        }
        trace!(target: "keymap", low, high, "keymap_add_range");
    }

    /// Remove the exact binding at `key`, if any. Range markers at the same
    /// key survive, so a key previously carved out of a range falls back to
    /// the range command.
    pub fn remove(&mut self, key: &str) -> bool {
        let idx = self.position(key, EntryKind::Exact);
        let hit = self
            .entries
            .get(idx)
            .is_some_and(|e| e.key == key && e.kind == EntryKind::Exact);
        if hit {
            // A continuation marker at the same key is left in place; it
            // now binds the key back to the range command (and may also be
            // a genuine range start of its own).
            self.entries.remove(idx);
            self.stale = true;
        }
        hit
    }

    fn rebuild_bloom(&mut self) {
        self.bloom.clear();
        for e in &self.entries {
            let h = hash_key(&e.key);
            self.bloom.insert(h.full);
            self.bloom.insert(h.prefix);
        }
        self.stale = false;
        trace!(target: "keymap", entries = self.entries.len(), "bloom_rebuild");
    }

    /// Fast negative probe: false means `key` is certainly unbound in this
    /// map (the chain is not consulted).
    fn may_contain(&mut self, hash: KeyHash) -> bool {
        if self.stale {
            self.rebuild_bloom();
        }
        self.bloom.may_contain(hash.full) || self.bloom.may_contain(hash.prefix)
    }

    /// Resolve `key` in this map only (no bloom probe, no chain).
    fn lookup_local(&self, key: &str) -> Option<&C> {
        let idx = self.position(key, EntryKind::Exact);
        if let Some(e) = self.entries.get(idx)
            && e.key == key
        {
            // Either an exact hit or a range start opening at exactly this
            // key; both bind it.
            return Some(&e.cmd);
        }
        match idx.checked_sub(1).map(|i| &self.entries[i]) {
            Some(prev) if prev.kind == EntryKind::RangeStart => Some(&prev.cmd),
            _ => None,
        }
    }

    /// Resolve `key`, probing the bloom filter first and falling back to
    /// the chained map when this one cannot match.
    pub fn lookup(&mut self, key: &str) -> Option<C> {
        self.lookup_hashed(key, hash_key(key))
    }

    /// `lookup` with a caller-precomputed hash (dispatch computes it once
    /// per call and reuses it across every map on the routing path).
    pub fn lookup_hashed(&mut self, key: &str, hash: KeyHash) -> Option<C> {
        if self.may_contain(hash)
            && let Some(cmd) = self.lookup_local(key)
        {
            trace!(target: "keymap", key, "keymap_hit");
            return Some(cmd.clone());
        }
        match self.chain.as_deref_mut() {
            Some(chained) => chained.lookup_hashed(key, hash),
            None => None,
        }
    }

    /// Enumerate bound keys starting with `prefix`, in key order, this map
    /// first and then the chain. Range markers are skipped when an exact
    /// entry at the same key precedes them.
    pub fn iter_prefix<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = (&'a str, &'a C)> {
        let start = self.entries.partition_point(|e| e.key.as_str() < prefix);
        let local = self.entries[start..]
            .iter()
            .take_while(move |e| e.key.starts_with(prefix))
            .enumerate()
            .filter(move |(i, e)| {
                *i == 0
                    || e.kind == EntryKind::Exact
                    || self.entries[start + i - 1].key != e.key
            })
            .map(|(_, e)| (e.key.as_str(), &e.cmd));
        let chained: Box<dyn Iterator<Item = (&'a str, &'a C)>> = match self.chain.as_deref() {
            Some(c) => Box::new(c.iter_prefix(prefix)),
            None => Box::new(std::iter::empty()),
        };
        local.chain(chained)
    }

    /// True when the map (or its chain) could bind some key sharing
    /// `key`'s prefix. Used to skip whole panes during prefix dispatch.
    pub fn may_contain_prefix(&mut self, key: &str) -> bool {
        let split = key_prefix_len(key);
        let h = hash_key(&key[..split]);
        if self.stale {
            self.rebuild_bloom();
        }
        if self.bloom.may_contain(h.prefix) {
            return true;
        }
        self.chain
            .as_deref_mut()
            .is_some_and(|c| c.may_contain_prefix(key))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn lookup<'a>(m: &'a mut Keymap<&'static str>, key: &str) -> Option<&'static str> {
        m.lookup(key)
    }

    #[test]
    fn exact_binding_round_trip() {
        let mut m = Keymap::new();
        m.add("Enter", "newline");
        m.add("Backspace", "delete-back");
        assert_eq!(lookup(&mut m, "Enter"), Some("newline"));
        assert_eq!(lookup(&mut m, "Tab"), None);
    }

    #[test]
    fn range_with_override() {
        // Scenario: printable range bound to self-insert, one key carved
        // out, boundaries inclusive-low / inclusive-high.
        let mut m = Keymap::new();
        m.add_range("Chr- ", "Chr-~", "self-insert");
        m.add("Chr-A", "upcase");
        assert_eq!(lookup(&mut m, "Chr- "), Some("self-insert"));
        assert_eq!(lookup(&mut m, "Chr-A"), Some("upcase"));
        assert_eq!(lookup(&mut m, "Chr-B"), Some("self-insert"));
        assert_eq!(lookup(&mut m, "Chr-~"), Some("self-insert"));
        assert_eq!(lookup(&mut m, "Chr-\x7f"), None);
    }

    #[test]
    fn override_removal_restores_range() {
        let mut m = Keymap::new();
        m.add_range("Chr-a", "Chr-z", "self-insert");
        m.add("Chr-q", "quit");
        assert_eq!(lookup(&mut m, "Chr-q"), Some("quit"));
        assert!(m.remove("Chr-q"));
        assert_eq!(lookup(&mut m, "Chr-q"), Some("self-insert"));
        assert_eq!(lookup(&mut m, "Chr-r"), Some("self-insert"));
    }

    #[test]
    fn below_range_start_is_unbound() {
        let mut m = Keymap::new();
        m.add_range("Chr-a", "Chr-z", "self-insert");
        assert_eq!(lookup(&mut m, "Chr-A"), None);
        assert_eq!(lookup(&mut m, "Chr-`"), None);
    }

    #[test]
    fn chain_consulted_after_primary() {
        let mut fallback = Keymap::new();
        fallback.add("Chr-x", "fallback-x");
        fallback.add("Chr-y", "fallback-y");
        let mut m = Keymap::new();
        m.add("Chr-x", "primary-x");
        m.set_chain(fallback);
        assert_eq!(lookup(&mut m, "Chr-x"), Some("primary-x"));
        assert_eq!(lookup(&mut m, "Chr-y"), Some("fallback-y"));
        assert_eq!(lookup(&mut m, "Chr-z"), None);
    }

    #[test]
    fn range_over_existing_binding_rearms_after_it() {
        let mut m = Keymap::new();
        m.add("Chr-m", "mark");
        m.add_range("Chr-a", "Chr-z", "self-insert");
        assert_eq!(lookup(&mut m, "Chr-m"), Some("mark"));
        assert_eq!(lookup(&mut m, "Chr-n"), Some("self-insert"));
        assert_eq!(lookup(&mut m, "Chr-l"), Some("self-insert"));
    }

    #[test]
    fn prefix_enumeration_in_key_order() {
        let mut m = Keymap::new();
        m.add("doc:step", "step");
        m.add("doc:set-ref", "set-ref");
        m.add("pane-clear", "clear");
        let got: Vec<_> = m.iter_prefix("doc:").map(|(k, _)| k).collect();
        assert_eq!(got, vec!["doc:set-ref", "doc:step"]);
    }

    #[test]
    fn prefix_enumeration_crosses_chain() {
        let mut fallback = Keymap::new();
        fallback.add("Notify:resize", "resize-watcher");
        let mut m = Keymap::new();
        m.add("Notify:Close", "close-watcher");
        m.set_chain(fallback);
        let got: Vec<_> = m.iter_prefix("Notify:").map(|(_, c)| *c).collect();
        assert_eq!(got, vec!["close-watcher", "resize-watcher"]);
    }

    #[test]
    fn prefix_probe_matches_ranges() {
        let mut m = Keymap::new();
        m.add_range("Chr- ", "Chr-~", "self-insert");
        assert!(m.may_contain_prefix("Chr-Q"));
        assert!(!m.may_contain_prefix("Mouse-press"));
    }

    #[test]
    fn replacing_exact_binding_keeps_single_entry() {
        let mut m = Keymap::new();
        m.add("Enter", "open-line");
        m.add("Enter", "newline");
        assert_eq!(m.len(), 1);
        assert_eq!(lookup(&mut m, "Enter"), Some("newline"));
    }
}
