//! Message transport between cluster members (§4.6). [`Transport`] is a
//! plain trait with `async fn` methods — callers are generic over it
//! (`NodeActor<T: Transport, S: Storage>`), so no trait object or
//! `async_trait`-style boxing is needed to swap [`UdpTransport`] for
//! [`SimTransport`] in tests.

use crate::error::TransportError;
use crate::message::Message;
use crate::types::PeerAddr;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, warn};

const MAX_MSG_SIZE: usize = 65536;

pub trait Transport {
    fn send_msg_to(
        &self,
        msg: &Message,
        addr: &PeerAddr,
    ) -> impl std::future::Future<Output = Result<(), TransportError>> + Send;

    fn broadcast(
        &self,
        msg: &Message,
        addrs: &[PeerAddr],
    ) -> impl std::future::Future<Output = Result<(), TransportError>> + Send;

    fn recv(&mut self) -> impl std::future::Future<Output = Option<(Message, PeerAddr)>> + Send;
}

/// UDP transport. Logical [`PeerAddr`]s are resolved to [`SocketAddr`]s
/// through a static table built at construction time — cluster membership
/// is fixed for the crate's scope.
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
    peer_addrs: HashMap<PeerAddr, SocketAddr>,
    incoming_rx: mpsc::Receiver<(Message, PeerAddr)>,
}

impl UdpTransport {
    /// Bind a UDP socket on `bind_addr` and spawn the background receive
    /// loop. `peer_addrs` maps every other cluster member's logical
    /// [`PeerAddr`] to the socket address it is reachable at.
    pub async fn bind(
        bind_addr: SocketAddr,
        peer_addrs: HashMap<PeerAddr, SocketAddr>,
    ) -> Result<Self, TransportError> {
        let socket = Arc::new(UdpSocket::bind(bind_addr).await?);
        let (incoming_tx, incoming_rx) = mpsc::channel(256);

        let reverse: HashMap<SocketAddr, PeerAddr> = peer_addrs
            .iter()
            .map(|(addr, sock)| (*sock, addr.clone()))
            .collect();

        let recv_socket = socket.clone();
        tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_MSG_SIZE];
            loop {
                match recv_socket.recv_from(&mut buf).await {
                    Ok((len, src)) => match Message::from_bytes(&buf[..len]) {
                        Ok(msg) => {
                            let from = reverse.get(&src).cloned().unwrap_or_else(|| src.to_string());
                            debug!(?msg, %src, "received message");
                            if incoming_tx.send((msg, from)).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!(%src, error = %e, "failed to parse inbound message"),
                    },
                    Err(e) => warn!(error = %e, "UDP receive error"),
                }
            }
        });

        Ok(Self {
            socket,
            peer_addrs,
            incoming_rx,
        })
    }

    fn resolve(&self, addr: &PeerAddr) -> Result<SocketAddr, TransportError> {
        self.peer_addrs
            .get(addr)
            .copied()
            .ok_or_else(|| TransportError::ChannelClosed(format!("unknown peer address: {addr}")))
    }
}

impl Transport for UdpTransport {
    async fn send_msg_to(&self, msg: &Message, addr: &PeerAddr) -> Result<(), TransportError> {
        let sock_addr = self.resolve(addr)?;
        let bytes = msg.to_bytes()?;
        debug!(?msg, %sock_addr, "sending message");
        self.socket.send_to(&bytes, sock_addr).await?;
        Ok(())
    }

    async fn broadcast(&self, msg: &Message, addrs: &[PeerAddr]) -> Result<(), TransportError> {
        let bytes = msg.to_bytes()?;
        for addr in addrs {
            match self.resolve(addr) {
                Ok(sock_addr) => {
                    if let Err(e) = self.socket.send_to(&bytes, sock_addr).await {
                        warn!(%addr, error = %e, "failed to send to peer");
                    }
                }
                Err(e) => warn!(%addr, error = %e, "failed to resolve peer for broadcast"),
            }
        }
        Ok(())
    }

    async fn recv(&mut self) -> Option<(Message, PeerAddr)> {
        self.incoming_rx.recv().await
    }
}

/// In-process transport for deterministic tests (§8.4). Every node in a
/// simulated cluster shares a `HashMap<PeerAddr, mpsc::Sender<..>>` so a
/// test harness can drop, delay, or partition messages between specific
/// pairs without touching the network stack.
pub struct SimTransport {
    self_addr: PeerAddr,
    peers: HashMap<PeerAddr, mpsc::Sender<(Message, PeerAddr)>>,
    incoming_rx: mpsc::Receiver<(Message, PeerAddr)>,
}

impl SimTransport {
    /// Build one [`SimTransport`] per address in `addrs`, all wired to each
    /// other, and return them keyed by address.
    pub fn build_cluster(addrs: &[PeerAddr]) -> HashMap<PeerAddr, SimTransport> {
        let mut senders = HashMap::new();
        let mut receivers = HashMap::new();

        for addr in addrs {
            let (tx, rx) = mpsc::channel(256);
            senders.insert(addr.clone(), tx);
            receivers.insert(addr.clone(), rx);
        }

        addrs
            .iter()
            .map(|addr| {
                let transport = SimTransport {
                    self_addr: addr.clone(),
                    peers: senders.clone(),
                    incoming_rx: receivers.remove(addr).expect("receiver present for every addr"),
                };
                (addr.clone(), transport)
            })
            .collect()
    }
}

impl Transport for SimTransport {
    async fn send_msg_to(&self, msg: &Message, addr: &PeerAddr) -> Result<(), TransportError> {
        let tx = self
            .peers
            .get(addr)
            .ok_or_else(|| TransportError::ChannelClosed(format!("no route to {addr}")))?;
        tx.send((msg.clone(), self.self_addr.clone()))
            .await
            .map_err(|_| TransportError::ChannelClosed(addr.clone()))
    }

    async fn broadcast(&self, msg: &Message, addrs: &[PeerAddr]) -> Result<(), TransportError> {
        for addr in addrs {
            let _ = self.send_msg_to(msg, addr).await;
        }
        Ok(())
    }

    async fn recv(&mut self) -> Option<(Message, PeerAddr)> {
        self.incoming_rx.recv().await
    }
}
