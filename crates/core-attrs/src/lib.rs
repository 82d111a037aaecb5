//! core-attrs: ordered key/value string store attached to panes and marks.
//!
//! Invariants:
//! * Entries are kept sorted by key; iteration order is therefore
//!   deterministic and prefix scans are contiguous.
//! * Setting an empty value removes the entry, so a store never carries
//!   tombstones.

/// Ordered string attribute store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttrStore {
    entries: Vec<(String, String)>,
}

impl AttrStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `key` to `value`, replacing any existing entry.
    pub fn set(&mut self, key: &str, value: &str) {
        if value.is_empty() {
            self.remove(key);
            return;
        }
        match self.entries.binary_search_by(|(k, _)| k.as_str().cmp(key)) {
            Ok(i) => self.entries[i].1 = value.to_owned(),
            Err(i) => self.entries.insert(i, (key.to_owned(), value.to_owned())),
        }
    }

    /// Set or clear depending on whether a value is supplied.
    pub fn set_opt(&mut self, key: &str, value: Option<&str>) {
        match value {
            Some(v) => self.set(key, v),
            None => {
                self.remove(key);
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .binary_search_by(|(k, _)| k.as_str().cmp(key))
            .ok()
            .map(|i| self.entries[i].1.as_str())
    }

    /// Remove `key` if present; reports whether anything was removed.
    pub fn remove(&mut self, key: &str) -> bool {
        match self.entries.binary_search_by(|(k, _)| k.as_str().cmp(key)) {
            Ok(i) => {
                self.entries.remove(i);
                true
            }
            Err(_) => false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// All entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Entries whose key starts with `prefix`, in key order.
    pub fn iter_prefix<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = (&'a str, &'a str)> {
        let start = self
            .entries
            .partition_point(|(k, _)| k.as_str() < prefix);
        self.entries[start..]
            .iter()
            .take_while(move |(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn set_get_replace() {
        let mut a = AttrStore::new();
        a.set("doc-name", "scratch");
        a.set("render-wrap", "yes");
        assert_eq!(a.get("doc-name"), Some("scratch"));
        a.set("doc-name", "main.rs");
        assert_eq!(a.get("doc-name"), Some("main.rs"));
        assert_eq!(a.len(), 2);
    }

    #[test]
    fn empty_value_removes() {
        let mut a = AttrStore::new();
        a.set("scale", "1000");
        a.set("scale", "");
        assert_eq!(a.get("scale"), None);
        assert!(a.is_empty());
    }

    #[test]
    fn iteration_is_key_ordered() {
        let mut a = AttrStore::new();
        a.set("z", "3");
        a.set("a", "1");
        a.set("m", "2");
        let keys: Vec<_> = a.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["a", "m", "z"]);
    }

    #[test]
    fn prefix_scan_is_contiguous() {
        let mut a = AttrStore::new();
        a.set("view:count", "4");
        a.set("view:name", "left");
        a.set("doc:name", "x");
        a.set("viewport", "80x24");
        let got: Vec<_> = a.iter_prefix("view:").map(|(k, _)| k).collect();
        assert_eq!(got, vec!["view:count", "view:name"]);
    }

    #[test]
    fn set_opt_none_clears() {
        let mut a = AttrStore::new();
        a.set("cursor", "block");
        a.set_opt("cursor", None);
        assert!(!a.remove("cursor"));
    }
}
