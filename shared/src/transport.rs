//! Datagram transport for both roles.
//!
//! The socket is read by a spawned receiver task that forwards raw datagrams
//! over an unbounded channel. The simulation drains that channel at the start
//! of every tick through [`NetworkTransport::poll_events`], so all session
//! state stays on the tick loop and connect/disconnect notifications arrive
//! as ordinary events.

use crate::config::NetConfig;
use crate::error::SimError;
use crate::peers::PeerTable;
use crate::protocol::{decode, encode, Packet, MAX_PACKET_SIZE};
use crate::types::PeerId;
use crate::PROTOCOL_VERSION;
use log::{debug, error, info, warn};
use std::io;
use std::net::{SocketAddr, UdpSocket as StdUdpSocket};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Something that happened on the transport since the last poll.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    PeerConnected(PeerId),
    PeerDisconnected(PeerId),
    Packet { from: PeerId, packet: Packet },
    /// The host refused our Hello.
    ConnectionRejected(String),
}

/// Destination of an outgoing packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    All,
    Peer(PeerId),
    AllExcept(PeerId),
}

impl Target {
    pub fn includes(self, peer: PeerId) -> bool {
        match self {
            Target::All => true,
            Target::Peer(only) => only == peer,
            Target::AllExcept(excluded) => excluded != peer,
        }
    }
}

pub trait NetworkTransport {
    /// Binds `bind` and accepts peers (host role).
    fn listen(bind: SocketAddr, config: &NetConfig) -> Result<Self, SimError>
    where
        Self: Sized;

    /// Starts a handshake with the host at `server` (client role).
    fn connect(server: SocketAddr, config: &NetConfig) -> Result<Self, SimError>
    where
        Self: Sized;

    /// Drains everything received since the last call.
    fn poll_events(&mut self) -> Vec<TransportEvent>;

    fn send(&mut self, target: Target, packet: &Packet) -> Result<(), SimError>;

    /// Says goodbye and stops receiving. Safe to call more than once.
    fn shutdown(&mut self);
}

enum Mode {
    Listening {
        peers: PeerTable,
    },
    Connected {
        server: SocketAddr,
        local: Option<PeerId>,
        last_seen: Instant,
        timeout: Duration,
        closed: bool,
    },
}

pub struct UdpTransport {
    socket: Arc<UdpSocket>,
    mode: Mode,
    inbox: mpsc::UnboundedReceiver<(Vec<u8>, SocketAddr)>,
    receiver: JoinHandle<()>,
    shut_down: bool,
}

impl UdpTransport {
    fn open(bind: SocketAddr, mode: Mode) -> Result<Self, SimError> {
        let std_socket = StdUdpSocket::bind(bind)?;
        std_socket.set_nonblocking(true)?;
        let socket = Arc::new(UdpSocket::from_std(std_socket)?);

        let (tx, inbox) = mpsc::unbounded_channel();
        let receiver = Self::spawn_receiver(Arc::clone(&socket), tx);

        Ok(Self {
            socket,
            mode,
            inbox,
            receiver,
            shut_down: false,
        })
    }

    /// Spawns task that continuously listens for incoming datagrams
    fn spawn_receiver(
        socket: Arc<UdpSocket>,
        tx: mpsc::UnboundedSender<(Vec<u8>, SocketAddr)>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut buffer = [0u8; MAX_PACKET_SIZE];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => {
                        if tx.send((buffer[..len].to_vec(), addr)).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        error!("Error receiving datagram: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, SimError> {
        Ok(self.socket.local_addr()?)
    }

    /// Peer id the host assigned to us; `PeerId::HOST` when listening.
    pub fn local_peer(&self) -> Option<PeerId> {
        match &self.mode {
            Mode::Listening { .. } => Some(PeerId::HOST),
            Mode::Connected { local, .. } => *local,
        }
    }

    pub fn peer_count(&self) -> usize {
        match &self.mode {
            Mode::Listening { peers } => peers.len(),
            Mode::Connected { local, closed, .. } => usize::from(local.is_some() && !closed),
        }
    }

    /// Re-sends the handshake; a no-op once welcomed.
    pub fn resend_hello(&self) {
        if let Mode::Connected {
            server,
            local: None,
            ..
        } = &self.mode
        {
            self.send_raw(
                &Packet::Hello {
                    protocol_version: PROTOCOL_VERSION,
                },
                *server,
            );
        }
    }

    fn send_raw(&self, packet: &Packet, addr: SocketAddr) {
        match encode(packet) {
            Ok(bytes) => self.send_bytes(&bytes, addr),
            Err(e) => error!("Failed to encode {}: {}", packet.kind(), e),
        }
    }

    fn send_bytes(&self, bytes: &[u8], addr: SocketAddr) {
        match self.socket.try_send_to(bytes, addr) {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                debug!("Send buffer full, dropped datagram to {}", addr);
            }
            Err(e) => error!("Failed to send to {}: {}", addr, e),
        }
    }

    fn handle_listening(
        &self,
        peers: &mut PeerTable,
        packet: Packet,
        addr: SocketAddr,
        events: &mut Vec<TransportEvent>,
    ) {
        let known = peers.find_peer_by_addr(addr);
        match (packet, known) {
            (Packet::Hello { protocol_version }, _) if protocol_version != PROTOCOL_VERSION => {
                warn!(
                    "Rejecting {}: protocol {} (expected {})",
                    addr, protocol_version, PROTOCOL_VERSION
                );
                self.send_raw(
                    &Packet::Rejected {
                        reason: format!("protocol version {} not supported", protocol_version),
                    },
                    addr,
                );
            }
            (Packet::Hello { .. }, Some(peer_id)) => {
                peers.touch(peer_id);
                self.send_raw(&Packet::Welcome { peer_id }, addr);
            }
            (Packet::Hello { .. }, None) => match peers.add_peer(addr) {
                Some(peer_id) => {
                    self.send_raw(&Packet::Welcome { peer_id }, addr);
                    events.push(TransportEvent::PeerConnected(peer_id));
                }
                None => {
                    warn!("Rejecting {}: session full", addr);
                    self.send_raw(
                        &Packet::Rejected {
                            reason: "Session full".to_string(),
                        },
                        addr,
                    );
                }
            },
            (Packet::Goodbye, Some(peer_id)) => {
                if peers.remove_peer(&peer_id) {
                    events.push(TransportEvent::PeerDisconnected(peer_id));
                }
            }
            (Packet::Heartbeat, Some(peer_id)) => {
                peers.touch(peer_id);
            }
            (packet, Some(peer_id)) => {
                peers.touch(peer_id);
                events.push(TransportEvent::Packet {
                    from: peer_id,
                    packet,
                });
            }
            (packet, None) => {
                warn!("Dropping {} from unknown address {}", packet.kind(), addr);
            }
        }
    }

    fn handle_connected(
        packet: Packet,
        local: &mut Option<PeerId>,
        last_seen: &mut Instant,
        closed: &mut bool,
        events: &mut Vec<TransportEvent>,
    ) {
        *last_seen = Instant::now();
        match packet {
            Packet::Welcome { peer_id } => {
                if local.is_none() {
                    info!("Welcomed by host as {}", peer_id);
                    *local = Some(peer_id);
                    events.push(TransportEvent::PeerConnected(PeerId::HOST));
                }
            }
            Packet::Rejected { reason } => {
                warn!("Host rejected connection: {}", reason);
                *closed = true;
                events.push(TransportEvent::ConnectionRejected(reason));
            }
            Packet::Goodbye => {
                if local.is_some() && !*closed {
                    *closed = true;
                    events.push(TransportEvent::PeerDisconnected(PeerId::HOST));
                }
            }
            Packet::Heartbeat => {}
            packet => {
                if local.is_some() && !*closed {
                    events.push(TransportEvent::Packet {
                        from: PeerId::HOST,
                        packet,
                    });
                }
            }
        }
    }
}

impl NetworkTransport for UdpTransport {
    fn listen(bind: SocketAddr, config: &NetConfig) -> Result<Self, SimError> {
        let transport = Self::open(
            bind,
            Mode::Listening {
                peers: PeerTable::new(config.max_remote_peers, config.peer_timeout()),
            },
        )?;
        info!("Listening on {}", transport.local_addr()?);
        Ok(transport)
    }

    fn connect(server: SocketAddr, config: &NetConfig) -> Result<Self, SimError> {
        let bind: SocketAddr = if server.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let transport = Self::open(
            bind,
            Mode::Connected {
                server,
                local: None,
                last_seen: Instant::now(),
                timeout: config.peer_timeout(),
                closed: false,
            },
        )?;
        info!("Connecting to {} from {}", server, transport.local_addr()?);
        transport.resend_hello();
        Ok(transport)
    }

    fn poll_events(&mut self) -> Vec<TransportEvent> {
        let mut events = Vec::new();
        let mut datagrams = Vec::new();
        while let Ok(datagram) = self.inbox.try_recv() {
            datagrams.push(datagram);
        }

        // Take the mode out so the handlers can borrow the socket alongside it.
        let mut mode = std::mem::replace(
            &mut self.mode,
            Mode::Listening {
                peers: PeerTable::new(0, Duration::ZERO),
            },
        );

        for (bytes, addr) in datagrams {
            let packet = match decode(&bytes) {
                Ok(packet) => packet,
                Err(e) => {
                    warn!("Failed to decode datagram from {}: {}", addr, e);
                    continue;
                }
            };

            match &mut mode {
                Mode::Listening { peers } => {
                    self.handle_listening(peers, packet, addr, &mut events)
                }
                Mode::Connected {
                    server,
                    local,
                    last_seen,
                    closed,
                    ..
                } => {
                    if addr != *server {
                        warn!("Dropping {} from unexpected address {}", packet.kind(), addr);
                        continue;
                    }
                    Self::handle_connected(packet, local, last_seen, closed, &mut events);
                }
            }
        }

        match &mut mode {
            Mode::Listening { peers } => {
                for peer_id in peers.check_timeouts() {
                    events.push(TransportEvent::PeerDisconnected(peer_id));
                }
            }
            Mode::Connected {
                local,
                last_seen,
                timeout,
                closed,
                ..
            } => {
                if local.is_some() && !*closed && last_seen.elapsed() > *timeout {
                    warn!("Host silent for {:?}, dropping connection", timeout);
                    *closed = true;
                    events.push(TransportEvent::PeerDisconnected(PeerId::HOST));
                }
            }
        }

        self.mode = mode;
        events
    }

    fn send(&mut self, target: Target, packet: &Packet) -> Result<(), SimError> {
        if self.shut_down {
            return Err(SimError::Transport("transport is shut down".to_string()));
        }
        let bytes = encode(packet)?;
        match &self.mode {
            Mode::Listening { peers } => {
                for (peer_id, addr) in peers.peer_addrs() {
                    if target.includes(peer_id) {
                        self.send_bytes(&bytes, addr);
                    }
                }
            }
            Mode::Connected { server, .. } => {
                if target.includes(PeerId::HOST) {
                    self.send_bytes(&bytes, *server);
                }
            }
        }
        Ok(())
    }

    fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        if let Err(e) = self.send(Target::All, &Packet::Goodbye) {
            warn!("Failed to say goodbye: {}", e);
        }
        self.shut_down = true;
        self.receiver.abort();
        info!("Transport shut down");
    }
}

impl Drop for UdpTransport {
    fn drop(&mut self) {
        self.receiver.abort();
    }
}
