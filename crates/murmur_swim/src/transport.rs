//! Datagram transports.
//!
//! A node talks on two channels: the swim channel carries probes and acks,
//! the gossip channel carries rumors. Delivery is best effort on both; a
//! lost datagram is not an error.

use async_trait::async_trait;
use murmur_core::Peer;
use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::{Arc, Mutex};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::trace;

/// Largest datagram a transport will receive
pub const MAX_DATAGRAM: usize = 65_507;

/// Logical channel a datagram travels on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Probe traffic: `Swim` messages
    Swim,
    /// Dissemination traffic: `Rumor` messages
    Gossip,
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Swim => write!(f, "swim"),
            Self::Gossip => write!(f, "gossip"),
        }
    }
}

/// Transport errors
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Socket could not be bound
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        /// Requested address
        addr: String,
        /// Cause
        #[source]
        source: io::Error,
    },

    /// Datagram could not be handed to the network
    #[error("Send to {peer} failed: {source}")]
    Send {
        /// Destination
        peer: Peer,
        /// Cause
        #[source]
        source: io::Error,
    },

    /// Receive failed
    #[error("Receive on {channel} failed: {source}")]
    Recv {
        /// Channel read from
        channel: Channel,
        /// Cause
        #[source]
        source: io::Error,
    },

    /// The transport was shut down
    #[error("Transport closed")]
    Closed,
}

/// Send and receive opaque datagrams keyed by `(address, port)`
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Send a datagram to a peer
    ///
    /// # Errors
    ///
    /// Returns error only when the local transport is unusable; a datagram
    /// lost in the network is not reported
    async fn send(&self, channel: Channel, to: &Peer, payload: &[u8]) -> Result<(), TransportError>;

    /// Wait for the next datagram on a channel
    ///
    /// # Errors
    ///
    /// Returns error if the channel is closed or the socket failed
    async fn recv(&self, channel: Channel) -> Result<(Vec<u8>, Peer), TransportError>;
}

/// UDP sockets for both channels
#[derive(Debug)]
pub struct UdpTransport {
    swim: UdpSocket,
    gossip: UdpSocket,
}

impl UdpTransport {
    /// Bind the swim and gossip sockets on `address`
    ///
    /// # Errors
    ///
    /// Returns error if either socket cannot be bound
    pub async fn bind(address: &str, swim_port: u16, gossip_port: u16) -> Result<Self, TransportError> {
        Ok(Self {
            swim: bind(address, swim_port).await?,
            gossip: bind(address, gossip_port).await?,
        })
    }

    /// Port actually bound for a channel
    ///
    /// # Errors
    ///
    /// Returns error if the socket has no local address
    pub fn local_port(&self, channel: Channel) -> io::Result<u16> {
        Ok(self.socket(channel).local_addr()?.port())
    }

    fn socket(&self, channel: Channel) -> &UdpSocket {
        match channel {
            Channel::Swim => &self.swim,
            Channel::Gossip => &self.gossip,
        }
    }
}

async fn bind(address: &str, port: u16) -> Result<UdpSocket, TransportError> {
    UdpSocket::bind((address, port))
        .await
        .map_err(|source| TransportError::Bind {
            addr: format!("{address}:{port}"),
            source,
        })
}

#[async_trait]
impl Transport for UdpTransport {
    async fn send(&self, channel: Channel, to: &Peer, payload: &[u8]) -> Result<(), TransportError> {
        self.socket(channel)
            .send_to(payload, (to.address.as_str(), to.port))
            .await
            .map(|_| ())
            .map_err(|source| TransportError::Send {
                peer: to.clone(),
                source,
            })
    }

    async fn recv(&self, channel: Channel) -> Result<(Vec<u8>, Peer), TransportError> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let (len, from) = self
            .socket(channel)
            .recv_from(&mut buf)
            .await
            .map_err(|source| TransportError::Recv { channel, source })?;
        buf.truncate(len);
        Ok((buf, Peer::new(from.ip().to_string(), from.port())))
    }
}

type Mailbox = mpsc::UnboundedSender<(Vec<u8>, Peer)>;

#[derive(Debug, Default)]
struct Switchboard {
    mailboxes: HashMap<Peer, Mailbox>,
    isolated: HashSet<String>,
}

/// In-process datagram network for tests
///
/// Datagrams to unbound endpoints or from and to isolated addresses are
/// dropped silently, as UDP would.
#[derive(Debug, Clone, Default)]
pub struct MemoryNetwork {
    inner: Arc<Mutex<Switchboard>>,
}

impl MemoryNetwork {
    /// Create an empty network
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach an endpoint with both channels
    #[must_use]
    pub fn bind(&self, address: &str, swim_port: u16, gossip_port: u16) -> MemoryTransport {
        let (swim_tx, swim_rx) = mpsc::unbounded_channel();
        let (gossip_tx, gossip_rx) = mpsc::unbounded_channel();
        let swim = Peer::new(address, swim_port);
        let gossip = Peer::new(address, gossip_port);
        {
            let mut board = self.lock();
            board.mailboxes.insert(swim.clone(), swim_tx);
            board.mailboxes.insert(gossip.clone(), gossip_tx);
        }
        MemoryTransport {
            network: self.clone(),
            swim,
            gossip,
            swim_rx: tokio::sync::Mutex::new(swim_rx),
            gossip_rx: tokio::sync::Mutex::new(gossip_rx),
        }
    }

    /// Drop all traffic from and to `address`
    pub fn isolate(&self, address: &str) {
        self.lock().isolated.insert(address.to_string());
    }

    /// Restore traffic from and to `address`
    pub fn heal(&self, address: &str) {
        self.lock().isolated.remove(address);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Switchboard> {
        // A poisoned switchboard is still structurally valid
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn deliver(&self, from: &Peer, to: &Peer, payload: &[u8]) {
        let board = self.lock();
        if board.isolated.contains(&from.address) || board.isolated.contains(&to.address) {
            trace!(%from, %to, "Dropping datagram for isolated endpoint");
            return;
        }
        if let Some(mailbox) = board.mailboxes.get(to) {
            // A closed mailbox is an endpoint that went away
            let _ = mailbox.send((payload.to_vec(), from.clone()));
        }
    }
}

/// One endpoint on a [`MemoryNetwork`]
#[derive(Debug)]
pub struct MemoryTransport {
    network: MemoryNetwork,
    swim: Peer,
    gossip: Peer,
    swim_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<(Vec<u8>, Peer)>>,
    gossip_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<(Vec<u8>, Peer)>>,
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&self, channel: Channel, to: &Peer, payload: &[u8]) -> Result<(), TransportError> {
        let from = match channel {
            Channel::Swim => &self.swim,
            Channel::Gossip => &self.gossip,
        };
        self.network.deliver(from, to, payload);
        Ok(())
    }

    async fn recv(&self, channel: Channel) -> Result<(Vec<u8>, Peer), TransportError> {
        let mailbox = match channel {
            Channel::Swim => &self.swim_rx,
            Channel::Gossip => &self.gossip_rx,
        };
        mailbox.lock().await.recv().await.ok_or(TransportError::Closed)
    }
}
