//! Wire messages exchanged between nodes (§6.1).

use crate::types::{Entry, PeerAddr};
use serde::{Deserialize, Serialize};

/// A message record. Every variant except `ClientCommand` carries a `term`
/// field; the common term-update precondition (§4.1) inspects it before any
/// role-specific handler runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
    #[serde(rename = "REQUEST_VOTE")]
    RequestVote {
        term: u64,
        from_addr: PeerAddr,
        last_log_index: u64,
        last_log_term: u64,
    },

    #[serde(rename = "RESPONSE_TO_VOTEREQUEST")]
    RequestVoteResponse {
        term: u64,
        from_addr: PeerAddr,
        vote_granted: bool,
    },

    #[serde(rename = "APPENDENTRIES")]
    AppendEntries {
        term: u64,
        from_addr: PeerAddr,
        prev_log_index: u64,
        prev_log_term: u64,
        entries: Vec<Entry>,
        leader_commit: u64,
    },

    #[serde(rename = "RESPONSE_TO_APPENDENTRIES")]
    AppendEntriesResponse {
        term: u64,
        addr: PeerAddr,
        success: bool,
        /// Present iff `success`; absent on rejection per §6.1.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        match_index: Option<u64>,
    },

    #[serde(rename = "CLIENT_COMMAND")]
    ClientCommand { command: Vec<u8> },
}

impl Message {
    /// The `term` field, or `None` for `ClientCommand` which carries none.
    pub fn term(&self) -> Option<u64> {
        match self {
            Message::RequestVote { term, .. } => Some(*term),
            Message::RequestVoteResponse { term, .. } => Some(*term),
            Message::AppendEntries { term, .. } => Some(*term),
            Message::AppendEntriesResponse { term, .. } => Some(*term),
            Message::ClientCommand { .. } => None,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_vote_round_trips_through_json() {
        let msg = Message::RequestVote {
            term: 4,
            from_addr: "node-a".to_string(),
            last_log_index: 7,
            last_log_term: 3,
        };

        let bytes = msg.to_bytes().unwrap();
        let parsed = Message::from_bytes(&bytes).unwrap();

        match parsed {
            Message::RequestVote { term, from_addr, .. } => {
                assert_eq!(term, 4);
                assert_eq!(from_addr, "node-a");
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn client_command_has_no_term() {
        let msg = Message::ClientCommand { command: b"x".to_vec() };
        assert_eq!(msg.term(), None);
    }

    #[test]
    fn failed_append_entries_response_omits_match_index_on_wire() {
        let msg = Message::AppendEntriesResponse {
            term: 1,
            addr: "node-b".to_string(),
            success: false,
            match_index: None,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert!(json.get("match_index").is_none() || json["match_index"].is_null());
    }
}
