//! Role state machine and message-dispatch glue (§4.1).
//!
//! `NodeState` is the single owner of all mutable consensus state. It is
//! never shared by reference across tasks — the actor in `actor.rs` holds it
//! by value and is the only thing that calls these methods, which keeps every
//! mutation serialized per §5 without a lock.

use crate::config::ClusterConfig;
use crate::election;
use crate::message::Message;
use crate::replication;
use crate::storage::{RecoveredState, Storage};
use crate::types::{Entry, Log, PeerAddr};
use std::collections::{HashMap, HashSet};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Follower,
    Candidate,
    Leader,
}

/// Role-local ephemera. Only the fields meaningful to the current role exist
/// at all, per the redesign note in §9 — no always-present-but-usually-unused
/// fields on `NodeState`.
#[derive(Debug)]
pub enum RoleState {
    Follower,
    Candidate {
        votes_received: HashSet<PeerAddr>,
    },
    Leader {
        next_index: HashMap<PeerAddr, u64>,
        match_index: HashMap<PeerAddr, u64>,
    },
}

pub struct NodeState {
    self_addr: PeerAddr,
    cluster: ClusterConfig,
    current_term: u64,
    voted_for: Option<PeerAddr>,
    log: Log,
    commit_index: u64,
    leader: Option<PeerAddr>,
    role_state: RoleState,
}

impl NodeState {
    /// A fresh node: Follower, term 0, empty log, no vote cast (§3.3).
    pub fn new(cluster: ClusterConfig) -> Self {
        let self_addr = cluster.self_addr().clone();
        Self {
            self_addr,
            cluster,
            current_term: 0,
            voted_for: None,
            log: Log::new(),
            commit_index: 0,
            leader: None,
            role_state: RoleState::Follower,
        }
    }

    /// Rebuild state from whatever a `Storage` recovered at startup.
    pub fn from_recovered(cluster: ClusterConfig, recovered: RecoveredState) -> Self {
        let self_addr = cluster.self_addr().clone();
        Self {
            self_addr,
            cluster,
            current_term: recovered.current_term,
            voted_for: recovered.voted_for,
            log: recovered.log,
            commit_index: 0,
            leader: None,
            role_state: RoleState::Follower,
        }
    }

    pub fn role(&self) -> Role {
        match &self.role_state {
            RoleState::Follower => Role::Follower,
            RoleState::Candidate { .. } => Role::Candidate,
            RoleState::Leader { .. } => Role::Leader,
        }
    }

    pub fn current_term(&self) -> u64 {
        self.current_term
    }

    pub fn voted_for(&self) -> Option<&PeerAddr> {
        self.voted_for.as_ref()
    }

    pub fn commit_index(&self) -> u64 {
        self.commit_index
    }

    pub fn leader(&self) -> Option<&PeerAddr> {
        self.leader.as_ref()
    }

    pub fn log(&self) -> &Log {
        &self.log
    }

    pub fn self_addr(&self) -> &PeerAddr {
        &self.self_addr
    }

    pub fn cluster(&self) -> &ClusterConfig {
        &self.cluster
    }

    pub(crate) fn role_state(&self) -> &RoleState {
        &self.role_state
    }

    pub(crate) fn role_state_mut(&mut self) -> &mut RoleState {
        &mut self.role_state
    }

    pub(crate) fn set_role_state(&mut self, role_state: RoleState) {
        self.role_state = role_state;
    }

    pub(crate) fn set_leader(&mut self, leader: Option<PeerAddr>) {
        self.leader = leader;
    }

    pub(crate) fn set_commit_index(&mut self, index: u64) {
        self.commit_index = index;
    }

    pub(crate) fn log_mut(&mut self) -> &mut Log {
        &mut self.log
    }

    pub(crate) fn set_voted_for(&mut self, voted_for: Option<PeerAddr>) {
        self.voted_for = voted_for;
    }

    pub(crate) fn set_current_term_inner(&mut self, term: u64) {
        self.current_term = term;
    }

    /// Common precondition applied before role-specific handling of any
    /// message carrying a `term` field (§4.1): demote to Follower and adopt
    /// the higher term. `votedFor` is cleared here ONLY because the term is
    /// actually advancing — never merely because the role changed within the
    /// same term (§9's resolved open question).
    pub(crate) fn maybe_advance_term(&mut self, msg_term: u64, storage: &mut dyn Storage) {
        if msg_term > self.current_term {
            info!(
                from_term = self.current_term,
                to_term = msg_term,
                role = ?self.role(),
                "higher term observed, demoting to Follower"
            );
            self.current_term = msg_term;
            self.voted_for = None;
            self.role_state = RoleState::Follower;
            persist_term_and_vote(self, storage);
        }
    }

    /// Step down to Follower without touching `currentTerm`/`votedFor` — the
    /// correct move when a Candidate sees an AppendEntries at an equal term
    /// (§4.1: "Candidate | AppendEntries received with term >= currentTerm |
    /// Follower").
    pub(crate) fn step_down_same_term(&mut self) {
        if !matches!(self.role_state, RoleState::Follower) {
            info!(term = self.current_term, "stepping down to Follower (same term)");
        }
        self.role_state = RoleState::Follower;
    }

    /// Dispatch an inbound message: apply the common precondition, then route
    /// by type (§4.1). Returns the reply to send back to `from`, if any.
    pub fn handle_message(
        &mut self,
        msg: Message,
        from: PeerAddr,
        storage: &mut dyn Storage,
    ) -> Option<Message> {
        if let Some(term) = msg.term() {
            self.maybe_advance_term(term, storage);
        }

        match msg {
            Message::RequestVote {
                term,
                from_addr,
                last_log_index,
                last_log_term,
            } => Some(election::handle_request_vote(
                self,
                term,
                from_addr,
                last_log_index,
                last_log_term,
                storage,
            )),

            Message::RequestVoteResponse {
                term,
                from_addr,
                vote_granted,
            } => {
                election::handle_vote_response(self, term, from_addr, vote_granted);
                None
            }

            Message::AppendEntries {
                term,
                from_addr,
                prev_log_index,
                prev_log_term,
                entries,
                leader_commit,
            } => Some(replication::handle_append_entries(
                self,
                term,
                from_addr,
                prev_log_index,
                prev_log_term,
                entries,
                leader_commit,
                storage,
            )),

            Message::AppendEntriesResponse {
                term,
                addr,
                success,
                match_index,
            } => {
                replication::handle_append_entries_response(self, term, addr, success, match_index);
                None
            }

            Message::ClientCommand { command } => {
                replication::handle_client_command(self, command, storage);
                None
            }
        }
        .map(|reply| {
            let _ = &from;
            reply
        })
    }

    /// Entry point used by a local caller (not a wire message) submitting a
    /// command directly to this node. Equivalent to receiving a
    /// `Message::ClientCommand`, minus the network round trip.
    pub fn submit_client_command(&mut self, command: Vec<u8>, storage: &mut dyn Storage) -> bool {
        replication::handle_client_command(self, command, storage)
    }

    /// Newly-committed entries since `since_index` (exclusive), 1-based.
    /// Used by the actor to feed the apply channel (§5).
    pub fn committed_since(&self, since_index: u64) -> Vec<Entry> {
        if self.commit_index <= since_index {
            return Vec::new();
        }
        self.log.entries_from(since_index + 1)
            .into_iter()
            .take((self.commit_index - since_index) as usize)
            .collect()
    }
}

/// Set `currentTerm` directly. Used only by [`crate::election::start_election`],
/// the one place a node advances its own term on its own initiative rather
/// than in response to a higher term observed on an incoming message.
pub(crate) fn set_current_term(state: &mut NodeState, term: u64) {
    state.set_current_term_inner(term);
}

pub(crate) fn persist_term_and_vote(state: &NodeState, storage: &mut dyn Storage) {
    if let Err(e) = storage.save_term_and_vote(state.current_term, state.voted_for.clone()) {
        tracing::error!(error = %e, "failed to persist term/vote; continuing from in-memory state");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    fn cluster(self_addr: &str, peers: &[&str]) -> ClusterConfig {
        let mut addrs: Vec<String> = peers.iter().map(|s| s.to_string()).collect();
        addrs.push(self_addr.to_string());
        ClusterConfig::new(self_addr, addrs)
    }

    #[test]
    fn new_node_starts_as_follower_at_term_zero() {
        let node = NodeState::new(cluster("a", &["b", "c"]));
        assert_eq!(node.role(), Role::Follower);
        assert_eq!(node.current_term(), 0);
        assert_eq!(node.voted_for(), None);
        assert_eq!(node.commit_index(), 0);
        assert!(node.log().is_empty());
    }

    #[test]
    fn higher_term_message_demotes_and_clears_vote() {
        let mut node = NodeState::new(cluster("a", &["b", "c"]));
        let mut storage = MemoryStorage::new();
        node.set_voted_for(Some("b".to_string()));

        let reply = node.handle_message(
            Message::AppendEntries {
                term: 5,
                from_addr: "b".to_string(),
                prev_log_index: 0,
                prev_log_term: 0,
                entries: vec![],
                leader_commit: 0,
            },
            "b".to_string(),
            &mut storage,
        );

        assert!(reply.is_some());
        assert_eq!(node.current_term(), 5);
        assert_eq!(node.voted_for(), None);
        assert_eq!(node.role(), Role::Follower);
    }

    #[test]
    fn same_term_does_not_clear_existing_vote() {
        let mut node = NodeState::new(cluster("a", &["b", "c"]));
        let mut storage = MemoryStorage::new();
        node.current_term = 3;
        node.set_voted_for(Some("b".to_string()));

        // A message at the same term must not trigger maybe_advance_term's
        // vote-clearing path.
        node.maybe_advance_term(3, &mut storage);
        assert_eq!(node.voted_for(), Some(&"b".to_string()));
    }

    #[test]
    fn unknown_message_type_never_reaches_dispatch() {
        // Malformed/unrecognized wire frames are rejected by Message::from_bytes
        // at the transport boundary (§4.1, §7) — there is no "unknown" variant
        // to route here by construction.
        let bytes = br#"{"type":"BOGUS","term":1}"#;
        assert!(Message::from_bytes(bytes).is_err());
    }
}
