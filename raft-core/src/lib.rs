//! Leader-based replicated log consensus (Raft-style) for a statically
//! configured cluster: leader election, log replication, and majority-based
//! commit over a pluggable [`transport::Transport`]/[`storage::Storage`]
//! pair.

pub mod actor;
pub mod config;
pub mod election;
pub mod error;
pub mod message;
pub mod node;
pub mod replication;
pub mod storage;
pub mod transport;
pub mod types;

pub use actor::{ClientHandle, NodeActor, NodeSnapshot};
pub use config::{ClusterConfig, Tunables};
pub use error::{ConfigError, StorageError, TransportError};
pub use message::Message;
pub use node::{NodeState, Role};
pub use storage::{FileStorage, MemoryStorage, Storage};
pub use transport::{SimTransport, Transport, UdpTransport};
pub use types::{Entry, Log, PeerAddr};
