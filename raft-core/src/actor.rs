//! The actor that owns [`NodeState`] for the lifetime of a running node
//! (§5). A single `tokio::task` drives a `tokio::select!` loop over the
//! follower/candidate timeout, the leader heartbeat tick, inbound transport
//! messages, and locally submitted client commands — nothing else is
//! permitted to touch `NodeState`, so every mutation is naturally
//! serialized without a lock.

use crate::election;
use crate::node::{NodeState, Role};
use crate::replication;
use crate::storage::Storage;
use crate::transport::Transport;
use crate::types::{Entry, PeerAddr};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{interval, sleep_until, Instant, Interval, MissedTickBehavior};
use tracing::debug;

/// Read-only view of a node's state, published after every state change for
/// diagnostics and for tests that need to observe convergence.
#[derive(Debug, Clone)]
pub struct NodeSnapshot {
    pub self_addr: PeerAddr,
    pub role: Role,
    pub current_term: u64,
    pub leader: Option<PeerAddr>,
    pub commit_index: u64,
    pub last_log_index: u64,
}

impl NodeSnapshot {
    fn from_state(state: &NodeState) -> Self {
        Self {
            self_addr: state.self_addr().clone(),
            role: state.role(),
            current_term: state.current_term(),
            leader: state.leader().cloned(),
            commit_index: state.commit_index(),
            last_log_index: state.log().last_index(),
        }
    }
}

enum ActorCommand {
    Submit(Vec<u8>, oneshot::Sender<bool>),
}

/// External handle to a running [`NodeActor`]. Cloneable so multiple callers
/// (an HTTP front end, a CLI prompt, test code) can submit commands and
/// observe state concurrently.
#[derive(Clone)]
pub struct ClientHandle {
    command_tx: mpsc::Sender<ActorCommand>,
    snapshot_rx: watch::Receiver<NodeSnapshot>,
}

impl ClientHandle {
    /// Submit a command for replication. Resolves to `true` if this node
    /// was the leader and accepted the command locally — `false` means the
    /// caller should retry against whoever `current_leader()` now reports.
    pub async fn submit_command(&self, command: Vec<u8>) -> bool {
        let (tx, rx) = oneshot::channel();
        if self.command_tx.send(ActorCommand::Submit(command, tx)).await.is_err() {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    pub fn current_snapshot(&self) -> NodeSnapshot {
        self.snapshot_rx.borrow().clone()
    }

    pub async fn changed(&mut self) -> Result<(), watch::error::RecvError> {
        self.snapshot_rx.changed().await
    }
}

/// Owns consensus state, storage, and a transport; drives the protocol
/// forward until dropped. Constructed via [`NodeActor::spawn`], which hands
/// back a [`ClientHandle`] and a channel of newly committed entries for the
/// caller's own apply loop.
pub struct NodeActor<T: Transport, S: Storage> {
    state: NodeState,
    storage: S,
    transport: T,
    apply_tx: mpsc::Sender<Entry>,
    command_rx: mpsc::Receiver<ActorCommand>,
    snapshot_tx: watch::Sender<NodeSnapshot>,
    last_applied: u64,
    election_deadline: Instant,
    heartbeat_ticker: Interval,
}

impl<T: Transport + Send + 'static, S: Storage + Send + 'static> NodeActor<T, S> {
    /// Build the actor and spawn its driving task. Returns a handle to
    /// submit commands/observe state, and a channel that yields entries in
    /// commit order as they become safe to apply to a state machine.
    pub fn spawn(
        state: NodeState,
        storage: S,
        transport: T,
    ) -> (ClientHandle, mpsc::Receiver<Entry>) {
        let (command_tx, command_rx) = mpsc::channel(64);
        let (apply_tx, apply_rx) = mpsc::channel(256);
        let (snapshot_tx, snapshot_rx) = watch::channel(NodeSnapshot::from_state(&state));

        let (min, max) = state.cluster().tunables().follower_timeout_range();
        let election_deadline = Instant::now() + election::randomized_duration(min, max);

        let mut heartbeat_ticker = interval(state.cluster().tunables().heartbeat_interval());
        heartbeat_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let actor = NodeActor {
            state,
            storage,
            transport,
            apply_tx,
            command_rx,
            snapshot_tx,
            last_applied: 0,
            election_deadline,
            heartbeat_ticker,
        };

        tokio::spawn(actor.run());

        (ClientHandle { command_tx, snapshot_rx }, apply_rx)
    }

    async fn run(mut self) {
        loop {
            tokio::select! {
                _ = sleep_until(self.election_deadline), if self.state.role() != Role::Leader => {
                    self.on_election_timeout().await;
                }

                _ = self.heartbeat_ticker.tick(), if self.state.role() == Role::Leader => {
                    self.send_heartbeats().await;
                }

                Some((msg, from)) = self.transport.recv() => {
                    self.on_inbound_message(msg, from).await;
                }

                Some(cmd) = self.command_rx.recv() => {
                    self.on_command(cmd).await;
                }

                else => break,
            }

            self.apply_committed().await;
            self.publish_snapshot();
        }
    }

    async fn on_election_timeout(&mut self) {
        let msg = election::start_election(&mut self.state, &mut self.storage);
        let targets = self.state.cluster().other_addrs();
        if let Err(e) = self.transport.broadcast(&msg, &targets).await {
            tracing::error!(error = %e, "failed to broadcast RequestVote");
        }
        self.reset_election_deadline();
    }

    async fn send_heartbeats(&mut self) {
        for (addr, msg) in replication::build_append_entries_for_all(&self.state) {
            if let Err(e) = self.transport.send_msg_to(&msg, &addr).await {
                debug!(%addr, error = %e, "failed to send AppendEntries");
            }
        }
    }

    async fn on_inbound_message(&mut self, msg: crate::message::Message, from: PeerAddr) {
        let grants_vote = matches!(&msg, crate::message::Message::RequestVote { .. });
        let reply = self.state.handle_message(msg, from.clone(), &mut self.storage);

        if let Some(reply) = reply {
            let vote_was_granted = grants_vote
                && matches!(&reply, crate::message::Message::RequestVoteResponse { vote_granted: true, .. });

            if let Err(e) = self.transport.send_msg_to(&reply, &from).await {
                debug!(%from, error = %e, "failed to send reply");
            }

            // Timer resets only when we actually granted a vote or accepted
            // an AppendEntries from a current leader — never merely because
            // a message arrived (§4.2's resolved ambiguity).
            let accepted_append = matches!(
                &reply,
                crate::message::Message::AppendEntriesResponse { success: true, .. }
            );
            if vote_was_granted || accepted_append {
                self.reset_election_deadline();
            }
        }
    }

    async fn on_command(&mut self, cmd: ActorCommand) {
        match cmd {
            ActorCommand::Submit(command, reply_tx) => {
                let accepted = self.state.submit_client_command(command, &mut self.storage);
                let _ = reply_tx.send(accepted);
            }
        }
    }

    async fn apply_committed(&mut self) {
        let entries = self.state.committed_since(self.last_applied);
        if entries.is_empty() {
            return;
        }
        let count = entries.len() as u64;
        for entry in entries {
            if self.apply_tx.send(entry).await.is_err() {
                return;
            }
        }
        self.last_applied += count;
    }

    /// Draw the next election-timer deadline from the range appropriate to
    /// our current role (§4.2 step 4 / §6.3): a Follower (or a Candidate that
    /// just stepped down) waits the slower follower range, but a Candidate
    /// retrying its own election uses the faster, separate candidate range.
    fn reset_election_deadline(&mut self) {
        let (min, max) = match self.state.role() {
            Role::Candidate => self.state.cluster().tunables().candidate_election_range(),
            Role::Follower | Role::Leader => self.state.cluster().tunables().follower_timeout_range(),
        };
        self.election_deadline = Instant::now() + election::randomized_duration(min, max);
    }

    fn publish_snapshot(&self) {
        let _ = self.snapshot_tx.send(NodeSnapshot::from_state(&self.state));
    }
}
