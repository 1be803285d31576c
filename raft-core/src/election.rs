//! Leader election (§4.2): RequestVote handling and the candidate's
//! vote-counting path. Functions here operate directly on [`NodeState`] —
//! the actor in `actor.rs` is the only caller, and owns the timers that
//! decide when `start_election` runs.

use crate::message::Message;
use crate::node::{persist_term_and_vote, NodeState, RoleState};
use crate::storage::Storage;
use crate::types::PeerAddr;
use rand::Rng;
use std::collections::HashSet;
use std::time::Duration;
use tracing::info;

/// Begin a new election: increment term, vote for self, become Candidate,
/// and return the `RequestVote` to broadcast to every other cluster member.
pub fn start_election(state: &mut NodeState, storage: &mut dyn Storage) -> Message {
    let new_term = state.current_term() + 1;
    let self_addr = state.self_addr().clone();

    info!(term = new_term, "election timeout, starting election");

    let mut votes_received = HashSet::new();
    votes_received.insert(self_addr.clone());

    crate::node::set_current_term(state, new_term);
    state.set_voted_for(Some(self_addr.clone()));
    persist_term_and_vote(state, storage);

    state.set_role_state(RoleState::Candidate { votes_received });
    state.set_leader(None);

    Message::RequestVote {
        term: new_term,
        from_addr: self_addr,
        last_log_index: state.log().last_index(),
        last_log_term: state.log().last_term(),
    }
}

/// Handle an inbound `RequestVote` (§4.2, granter side). Always produces a
/// `RequestVoteResponse` reply — never silently drops the RPC.
pub fn handle_request_vote(
    state: &mut NodeState,
    term: u64,
    candidate: PeerAddr,
    last_log_index: u64,
    last_log_term: u64,
    storage: &mut dyn Storage,
) -> Message {
    let current_term = state.current_term();

    if term < current_term {
        return Message::RequestVoteResponse {
            term: current_term,
            from_addr: state.self_addr().clone(),
            vote_granted: false,
        };
    }

    // §4.2 grants a vote only when votedFor is none for the current term —
    // no exception for re-requests from the same candidate.
    let can_vote = state.voted_for().is_none();

    let our_last_term = state.log().last_term();
    let our_last_index = state.log().last_index();
    let log_is_up_to_date = last_log_term > our_last_term
        || (last_log_term == our_last_term && last_log_index >= our_last_index);

    let vote_granted = can_vote && log_is_up_to_date;

    if vote_granted {
        state.set_voted_for(Some(candidate.clone()));
        persist_term_and_vote(state, storage);
        info!(term = current_term, candidate = %candidate, "granting vote");
        // Timer reset happens in the actor, triggered by the vote_granted
        // flag on this reply — only a grant suppresses our own candidacy,
        // never a denial (§4.2 resolves the ambiguity this way: a denied
        // or stale candidate must not be able to keep suppressing
        // elections by spamming RequestVotes it can never win).
    }

    Message::RequestVoteResponse {
        term: current_term,
        from_addr: state.self_addr().clone(),
        vote_granted,
    }
}

/// Handle an inbound `RequestVoteResponse` (§4.2, candidate side). Ignored
/// outright unless we are still a Candidate in the term the vote was cast
/// for — a vote for a term or role we've already left is stale.
pub fn handle_vote_response(state: &mut NodeState, term: u64, voter: PeerAddr, vote_granted: bool) {
    if term != state.current_term() || !vote_granted {
        return;
    }

    let cluster_size = state.cluster().cluster_size();
    let majority = state.cluster().majority();

    let became_leader = match state.role_state_mut() {
        RoleState::Candidate { votes_received } => {
            votes_received.insert(voter.clone());
            info!(
                term,
                votes = votes_received.len(),
                cluster_size,
                "received vote"
            );
            votes_received.len() >= majority
        }
        _ => false,
    };

    if became_leader {
        become_leader(state);
    }
}

fn become_leader(state: &mut NodeState) {
    let term = state.current_term();
    let next_index_default = state.log().last_index() + 1;

    let mut next_index = std::collections::HashMap::new();
    let mut match_index = std::collections::HashMap::new();
    for addr in state.cluster().other_addrs() {
        next_index.insert(addr.clone(), next_index_default);
        match_index.insert(addr, 0);
    }

    info!(term, "won election, becoming Leader");

    state.set_role_state(RoleState::Leader {
        next_index,
        match_index,
    });
    let self_addr = state.self_addr().clone();
    state.set_leader(Some(self_addr));
}

/// Draw a randomized duration uniformly from `[min, max]`, inclusive. Used
/// for both the follower election timeout and the candidate's own election
/// timeout (§6.3) — reusing one helper keeps the jitter source consistent.
pub fn randomized_duration(min: Duration, max: Duration) -> Duration {
    if min >= max {
        return min;
    }
    let mut rng = rand::thread_rng();
    let ms = rng.gen_range(min.as_millis() as u64..=max.as_millis() as u64);
    Duration::from_millis(ms)
}
