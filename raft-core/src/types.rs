//! Core data types: log entries, the replicated log, and peer addressing.

use serde::{Deserialize, Serialize};

/// Opaque identifier for a cluster member. Addresses are compared by value;
/// the crate never interprets them beyond equality.
pub type PeerAddr = String;

/// A single command in the replicated log. Immutable once placed at an index;
/// a follower only ever replaces one via truncate-then-append conflict resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub term: u64,
    pub command: Vec<u8>,
}

impl Entry {
    pub fn new(term: u64, command: Vec<u8>) -> Self {
        Self { term, command }
    }
}

/// An ordered, 1-indexed sequence of [`Entry`] values. Index 0 is the sentinel
/// "empty" position and never holds a real entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Log {
    entries: Vec<Entry>,
}

impl Log {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// Highest populated index, or 0 if the log is empty.
    pub fn last_index(&self) -> u64 {
        self.entries.len() as u64
    }

    /// Term of the entry at `last_index()`, or 0 if the log is empty.
    pub fn last_term(&self) -> u64 {
        self.term_at(self.last_index())
    }

    /// Entry at a 1-based index, or `None` for index 0 or out-of-range.
    pub fn get(&self, index: u64) -> Option<&Entry> {
        if index == 0 {
            return None;
        }
        self.entries.get((index - 1) as usize)
    }

    /// Term at a 1-based index; 0 for the sentinel index 0 and for
    /// out-of-range indices (callers treat that as "no matching entry").
    pub fn term_at(&self, index: u64) -> u64 {
        if index == 0 {
            return 0;
        }
        self.get(index).map(|e| e.term).unwrap_or(0)
    }

    /// Whether an entry physically exists at `index`.
    pub fn contains(&self, index: u64) -> bool {
        index > 0 && index <= self.last_index()
    }

    /// Append one entry (leader path: new client command).
    pub fn append(&mut self, entry: Entry) -> u64 {
        self.entries.push(entry);
        self.last_index()
    }

    /// Append a batch of entries in order (follower path: AppendEntries).
    pub fn append_all(&mut self, entries: impl IntoIterator<Item = Entry>) {
        self.entries.extend(entries);
    }

    /// Drop every entry past `len` (1-based length to retain). `len == 0`
    /// empties the log.
    pub fn truncate_to_len(&mut self, len: u64) {
        self.entries.truncate(len as usize);
    }

    /// Entries from `index` (1-based, inclusive) through the end. `index == 0`
    /// is treated as `1` (the whole log), matching the AppendEntries
    /// construction rule in the replication driver.
    pub fn entries_from(&self, index: u64) -> Vec<Entry> {
        let start = if index == 0 { 0 } else { (index - 1) as usize };
        self.entries.get(start..).map(|s| s.to_vec()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u64, &Entry)> {
        self.entries.iter().enumerate().map(|(i, e)| (i as u64 + 1, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_log_has_zero_last_index_and_term() {
        let log = Log::new();
        assert_eq!(log.last_index(), 0);
        assert_eq!(log.last_term(), 0);
        assert_eq!(log.term_at(0), 0);
    }

    #[test]
    fn append_and_get_round_trip() {
        let mut log = Log::new();
        log.append(Entry::new(1, b"a".to_vec()));
        log.append(Entry::new(1, b"b".to_vec()));
        log.append(Entry::new(2, b"c".to_vec()));

        assert_eq!(log.last_index(), 3);
        assert_eq!(log.last_term(), 2);
        assert_eq!(log.get(1).unwrap().command, b"a");
        assert_eq!(log.get(3).unwrap().term, 2);
        assert!(log.get(4).is_none());
    }

    #[test]
    fn truncate_to_len_drops_suffix() {
        let mut log = Log::new();
        log.append(Entry::new(1, b"a".to_vec()));
        log.append(Entry::new(1, b"b".to_vec()));
        log.append(Entry::new(2, b"c".to_vec()));

        log.truncate_to_len(1);
        assert_eq!(log.last_index(), 1);
        assert_eq!(log.get(1).unwrap().command, b"a");
    }

    #[test]
    fn entries_from_matches_appendentries_construction_rule() {
        let mut log = Log::new();
        for i in 1..=5u64 {
            log.append(Entry::new(1, vec![i as u8]));
        }

        // ni > 1: entries from index ni onward, inclusive.
        let from_3 = log.entries_from(3);
        assert_eq!(from_3.len(), 3);
        assert_eq!(from_3[0].command, vec![3]);

        // ni <= 1: the full log.
        assert_eq!(log.entries_from(1).len(), 5);
        assert_eq!(log.entries_from(0).len(), 5);
    }
}
