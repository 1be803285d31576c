//! Durable persistence for the state a node must not forget across a crash:
//! `currentTerm`, `votedFor`, and the log itself (§4.5). Snapshotting and
//! compaction are out of scope — the WAL is replayed from the beginning on
//! every recovery.

use crate::error::StorageError;
use crate::types::{Entry, Log, PeerAddr};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// One line of the write-ahead log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
enum WalRecord {
    #[serde(rename = "TERM_VOTE")]
    TermVote {
        term: u64,
        voted_for: Option<PeerAddr>,
    },

    #[serde(rename = "APPEND")]
    Append { index: u64, entry: Entry },

    #[serde(rename = "TRUNCATE")]
    Truncate { from_index: u64 },
}

/// Whatever a [`Storage`] implementation recovers at startup.
#[derive(Debug, Default)]
pub struct RecoveredState {
    pub current_term: u64,
    pub voted_for: Option<PeerAddr>,
    pub log: Log,
}

/// Durable collaborator for persistent node state. Every write here must
/// complete before the corresponding reply or broadcast goes out on the wire
/// (§4.5) — a node that acknowledges a vote or an AppendEntries before the
/// fact is durable can violate the safety guarantees the rest of the
/// protocol assumes.
pub trait Storage {
    fn save_term_and_vote(
        &mut self,
        term: u64,
        voted_for: Option<PeerAddr>,
    ) -> Result<(), StorageError>;

    fn append_entry(&mut self, index: u64, entry: &Entry) -> Result<(), StorageError>;

    fn truncate(&mut self, from_index: u64) -> Result<(), StorageError>;

    fn load(&self) -> Result<RecoveredState, StorageError>;
}

/// File-backed WAL storage. One line of JSON per record, replayed in order
/// on recovery.
pub struct FileStorage {
    dir: PathBuf,
    wal: Option<BufWriter<File>>,
}

impl FileStorage {
    /// Open (creating if necessary) a WAL rooted at `dir`.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StorageError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let wal_path = dir.join("wal.log");
        let file = OpenOptions::new().create(true).append(true).open(&wal_path)?;
        debug!(path = ?wal_path, "opened WAL");

        Ok(Self {
            dir,
            wal: Some(BufWriter::new(file)),
        })
    }

    fn wal_path(&self) -> PathBuf {
        self.dir.join("wal.log")
    }

    fn write_record(&mut self, record: &WalRecord) -> Result<(), StorageError> {
        let wal = self.wal.as_mut().ok_or(StorageError::NotOpen)?;
        let line = serde_json::to_string(record)?;
        writeln!(wal, "{}", line)?;
        wal.flush()?;
        Ok(())
    }
}

impl Storage for FileStorage {
    fn save_term_and_vote(
        &mut self,
        term: u64,
        voted_for: Option<PeerAddr>,
    ) -> Result<(), StorageError> {
        self.write_record(&WalRecord::TermVote { term, voted_for })
    }

    fn append_entry(&mut self, index: u64, entry: &Entry) -> Result<(), StorageError> {
        self.write_record(&WalRecord::Append {
            index,
            entry: entry.clone(),
        })
    }

    fn truncate(&mut self, from_index: u64) -> Result<(), StorageError> {
        self.write_record(&WalRecord::Truncate { from_index })
    }

    fn load(&self) -> Result<RecoveredState, StorageError> {
        let mut state = RecoveredState::default();
        let wal_path = self.wal_path();

        if !wal_path.exists() {
            return Ok(state);
        }

        let file = File::open(&wal_path)?;
        let reader = BufReader::new(file);
        let mut count = 0;

        for (line_num, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<WalRecord>(&line) {
                Ok(WalRecord::TermVote { term, voted_for }) => {
                    state.current_term = term;
                    state.voted_for = voted_for;
                }
                Ok(WalRecord::Append { entry, .. }) => {
                    state.log.append(entry);
                }
                Ok(WalRecord::Truncate { from_index }) => {
                    state.log.truncate_to_len(from_index);
                }
                Err(e) => {
                    warn!(line = line_num + 1, error = %e, "skipping malformed WAL record");
                }
            }
            count += 1;
        }

        info!(records = count, term = state.current_term, "recovered from WAL");
        Ok(state)
    }
}

/// In-memory [`Storage`] for tests and for the in-process simulation
/// harness — no I/O, no recovery across process restarts.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    current_term: u64,
    voted_for: Option<PeerAddr>,
    log: Log,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStorage {
    fn save_term_and_vote(
        &mut self,
        term: u64,
        voted_for: Option<PeerAddr>,
    ) -> Result<(), StorageError> {
        self.current_term = term;
        self.voted_for = voted_for;
        Ok(())
    }

    fn append_entry(&mut self, _index: u64, entry: &Entry) -> Result<(), StorageError> {
        self.log.append(entry.clone());
        Ok(())
    }

    fn truncate(&mut self, from_index: u64) -> Result<(), StorageError> {
        self.log.truncate_to_len(from_index);
        Ok(())
    }

    fn load(&self) -> Result<RecoveredState, StorageError> {
        Ok(RecoveredState {
            current_term: self.current_term,
            voted_for: self.voted_for.clone(),
            log: self.log.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn memory_storage_round_trips_term_and_vote() {
        let mut storage = MemoryStorage::new();
        storage.save_term_and_vote(5, Some("node-a".to_string())).unwrap();

        let recovered = storage.load().unwrap();
        assert_eq!(recovered.current_term, 5);
        assert_eq!(recovered.voted_for, Some("node-a".to_string()));
    }

    #[test]
    fn file_storage_recovers_term_vote_and_log_after_reopen() {
        let dir = tempdir().unwrap();

        {
            let mut storage = FileStorage::open(dir.path()).unwrap();
            storage.save_term_and_vote(3, Some("node-b".to_string())).unwrap();
            storage.append_entry(1, &Entry::new(3, b"hello".to_vec())).unwrap();
            storage.append_entry(2, &Entry::new(3, b"world".to_vec())).unwrap();
        }

        {
            let storage = FileStorage::open(dir.path()).unwrap();
            let recovered = storage.load().unwrap();
            assert_eq!(recovered.current_term, 3);
            assert_eq!(recovered.voted_for, Some("node-b".to_string()));
            assert_eq!(recovered.log.last_index(), 2);
            assert_eq!(recovered.log.get(1).unwrap().command, b"hello");
        }
    }

    #[test]
    fn file_storage_replays_truncate_records() {
        let dir = tempdir().unwrap();

        {
            let mut storage = FileStorage::open(dir.path()).unwrap();
            storage.append_entry(1, &Entry::new(1, b"a".to_vec())).unwrap();
            storage.append_entry(2, &Entry::new(1, b"b".to_vec())).unwrap();
            storage.truncate(1).unwrap();
            storage.append_entry(2, &Entry::new(2, b"c".to_vec())).unwrap();
        }

        let storage = FileStorage::open(dir.path()).unwrap();
        let recovered = storage.load().unwrap();
        assert_eq!(recovered.log.last_index(), 2);
        assert_eq!(recovered.log.get(2).unwrap().command, b"c");
    }

    #[test]
    fn missing_wal_file_recovers_empty_state() {
        let dir = tempdir().unwrap();
        let storage = FileStorage::open(dir.path()).unwrap();
        let recovered = storage.load().unwrap();
        assert_eq!(recovered.current_term, 0);
        assert!(recovered.log.is_empty());
    }
}
