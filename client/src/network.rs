//! Client session: handshake with the host, then a fixed-rate replica loop

use crate::game::ReplicaGame;
use log::{debug, error, info, warn};
use shared::input::{ConsoleCommand, InputManager};
use shared::view::{LoggingOverlay, LoggingViewport, ViewportSinks};
use shared::{
    NetworkTransport, PeerId, SimConfig, SimError, Target, TransportEvent, UdpTransport,
    DEFAULT_CLIENT_TARGET,
};
use std::net::{SocketAddr, ToSocketAddrs};
use tokio::sync::mpsc;
use tokio::time::{interval, sleep, Duration, Instant, MissedTickBehavior};

/// Turns the user's server entry into an address. An empty entry falls back
/// to the default target; a bare host gets `port` appended.
pub fn resolve_server_address(input: &str, port: u16) -> Result<SocketAddr, SimError> {
    let trimmed = input.trim();
    let host = if trimmed.is_empty() {
        warn!("No server address given, using {}", DEFAULT_CLIENT_TARGET);
        DEFAULT_CLIENT_TARGET
    } else {
        trimmed
    };

    if let Ok(addr) = host.parse::<SocketAddr>() {
        return Ok(addr);
    }
    (host, port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| SimError::Transport(format!("could not resolve '{}'", host)))
}

#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub server: SocketAddr,
    pub tick_rate: u32,
    pub config: SimConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Running,
    Stopped,
}

pub struct ClientSession<T: NetworkTransport> {
    transport: T,
    game: ReplicaGame,
    input: InputManager,
    tick_duration: Duration,
    heartbeat: Duration,
    since_heartbeat: Duration,
    backlog: Vec<TransportEvent>,
    state: SessionState,
}

impl ClientSession<UdpTransport> {
    /// Says hello until the host welcomes or rejects us, or the handshake
    /// times out.
    pub async fn connect(options: ClientOptions) -> Result<Self, SimError> {
        let net = &options.config.net;
        let mut transport = UdpTransport::connect(options.server, net)?;
        info!("Connecting to {}...", options.server);

        let deadline = Instant::now() + net.handshake_timeout();
        let mut last_hello = Instant::now();
        let mut backlog = Vec::new();

        loop {
            let mut welcomed = false;
            for event in transport.poll_events() {
                match event {
                    TransportEvent::PeerConnected(_) => welcomed = true,
                    TransportEvent::ConnectionRejected(reason) => {
                        transport.shutdown();
                        return Err(SimError::Transport(format!("rejected by host: {}", reason)));
                    }
                    other => backlog.push(other),
                }
            }

            if welcomed {
                let local = transport.local_peer().ok_or_else(|| {
                    SimError::Transport("welcomed without a peer id".to_string())
                })?;
                info!("Connected as {}", local);

                let sinks = ViewportSinks {
                    host: Some(Box::new(LoggingViewport::new("HostCamera"))),
                    client: Some(Box::new(LoggingViewport::new("ClientCamera"))),
                };
                let mut game = ReplicaGame::with_arena(local, &options.config, sinks);
                game.world_mut()
                    .attach_overlay(Some(Box::new(LoggingOverlay::new())));

                let mut session = Self::new(transport, game, options.tick_rate, &options.config);
                session.backlog = backlog;
                return Ok(session);
            }

            if Instant::now() >= deadline {
                transport.shutdown();
                return Err(SimError::Transport(format!(
                    "no answer from {} within {:?}",
                    options.server,
                    net.handshake_timeout()
                )));
            }
            if last_hello.elapsed() >= net.hello_resend() {
                debug!("Resending hello");
                transport.resend_hello();
                last_hello = Instant::now();
            }
            sleep(Duration::from_millis(10)).await;
        }
    }
}

impl<T: NetworkTransport> ClientSession<T> {
    pub fn new(transport: T, game: ReplicaGame, tick_rate: u32, config: &SimConfig) -> Self {
        Self {
            transport,
            game,
            input: InputManager::new(),
            tick_duration: Duration::from_nanos(1_000_000_000 / u64::from(tick_rate.max(1))),
            heartbeat: config.net.heartbeat(),
            since_heartbeat: Duration::ZERO,
            backlog: Vec::new(),
            state: SessionState::Running,
        }
    }

    pub fn game(&self) -> &ReplicaGame {
        &self.game
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn handle_command(&mut self, command: ConsoleCommand) -> SessionState {
        match command {
            ConsoleCommand::Help => info!("{}", ConsoleCommand::help()),
            ConsoleCommand::Quit => {
                info!("Quit requested");
                self.state = SessionState::Stopped;
            }
            ConsoleCommand::Spawn => warn!("Only the host can spawn agents"),
            other => {
                self.input.apply(other);
            }
        }
        self.state
    }

    /// Applies host traffic, runs one fixed tick and sends the results.
    pub fn tick(&mut self) {
        if self.state == SessionState::Stopped {
            return;
        }

        let mut events = std::mem::take(&mut self.backlog);
        events.extend(self.transport.poll_events());
        for event in events {
            match event {
                TransportEvent::Packet { from, packet } => self.game.handle_packet(from, packet),
                TransportEvent::PeerDisconnected(peer) if peer == PeerId::HOST => {
                    info!("Host left the session");
                    self.game.clear();
                    self.state = SessionState::Stopped;
                    return;
                }
                TransportEvent::PeerDisconnected(peer) => debug!("{} left", peer),
                TransportEvent::PeerConnected(_) => {}
                TransportEvent::ConnectionRejected(reason) => {
                    warn!("Host rejected us mid-session: {}", reason);
                    self.state = SessionState::Stopped;
                    return;
                }
            }
        }

        let dt = self.tick_duration.as_secs_f32();
        let packets = self.game.step(&self.input, dt);
        self.input.end_tick();
        for packet in &packets {
            if let Err(e) = self.transport.send(Target::All, packet) {
                error!("Failed to send {}: {}", packet.kind(), e);
            }
        }

        self.since_heartbeat += self.tick_duration;
        if self.since_heartbeat >= self.heartbeat {
            self.since_heartbeat = Duration::ZERO;
            if let Err(e) = self.transport.send(Target::All, &shared::Packet::Heartbeat) {
                error!("Failed to send heartbeat: {}", e);
            }
        }
    }

    pub fn shutdown(&mut self) {
        self.state = SessionState::Stopped;
        self.transport.shutdown();
    }

    pub async fn run(
        &mut self,
        mut console: mpsc::UnboundedReceiver<ConsoleCommand>,
    ) -> Result<(), SimError> {
        let mut tick_interval = interval(self.tick_duration);
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut console_open = true;

        while self.state == SessionState::Running {
            tokio::select! {
                _ = tick_interval.tick() => self.tick(),

                command = console.recv(), if console_open => match command {
                    Some(command) => {
                        self.handle_command(command);
                    }
                    None => {
                        debug!("Console closed");
                        console_open = false;
                    }
                },

                _ = tokio::signal::ctrl_c() => {
                    info!("Interrupted");
                    break;
                }
            }
        }

        self.shutdown();
        info!("Client stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::config::NetConfig;
    use shared::{EntityId, Packet};

    #[derive(Default)]
    struct ScriptedTransport {
        pending: Vec<TransportEvent>,
        sent: Vec<Packet>,
        closed: bool,
    }

    impl NetworkTransport for ScriptedTransport {
        fn listen(_bind: SocketAddr, _config: &NetConfig) -> Result<Self, SimError> {
            Ok(Self::default())
        }

        fn connect(_server: SocketAddr, _config: &NetConfig) -> Result<Self, SimError> {
            Ok(Self::default())
        }

        fn poll_events(&mut self) -> Vec<TransportEvent> {
            std::mem::take(&mut self.pending)
        }

        fn send(&mut self, _target: Target, packet: &Packet) -> Result<(), SimError> {
            self.sent.push(packet.clone());
            Ok(())
        }

        fn shutdown(&mut self) {
            self.closed = true;
        }
    }

    fn session() -> ClientSession<ScriptedTransport> {
        let config = SimConfig::default();
        let game = ReplicaGame::with_arena(PeerId(1), &config, ViewportSinks::default());
        ClientSession::new(ScriptedTransport::default(), game, 50, &config)
    }

    #[test]
    fn test_resolve_empty_uses_default() {
        let addr = resolve_server_address("  ", 7777).unwrap();
        assert_eq!(addr, "127.0.0.1:7777".parse().unwrap());
    }

    #[test]
    fn test_resolve_keeps_explicit_port() {
        assert_eq!(
            resolve_server_address("192.168.1.126", 7777).unwrap(),
            "192.168.1.126:7777".parse().unwrap()
        );
        assert_eq!(
            resolve_server_address("10.0.0.2:9000", 7777).unwrap(),
            "10.0.0.2:9000".parse().unwrap()
        );
    }

    #[test]
    fn test_host_packets_reach_game() {
        let mut session = session();
        session.transport.pending.push(TransportEvent::Packet {
            from: PeerId::HOST,
            packet: Packet::OwnershipChanged {
                entity: EntityId::CLIENT_AVATAR,
                owner: Some(PeerId(1)),
            },
        });

        session.tick();

        assert!(session
            .game()
            .world()
            .ownership()
            .is_owned_by_local_peer(EntityId::CLIENT_AVATAR));
        assert!(session
            .transport()
            .sent
            .iter()
            .any(|p| matches!(p, Packet::AvatarTransform { .. })));
    }

    #[test]
    fn test_heartbeat_every_second() {
        let mut session = session();
        for _ in 0..60 {
            session.tick();
        }
        let beats = session
            .transport()
            .sent
            .iter()
            .filter(|p| matches!(p, Packet::Heartbeat))
            .count();
        assert_eq!(beats, 1);
    }

    #[test]
    fn test_host_goodbye_stops_session() {
        let mut session = session();
        session
            .transport
            .pending
            .push(TransportEvent::PeerDisconnected(PeerId::HOST));

        session.tick();
        assert_eq!(session.state(), SessionState::Stopped);

        session.shutdown();
        assert!(session.transport().closed);
    }

    #[test]
    fn test_connect_gives_up_when_nobody_answers() {
        let server = std::net::UdpSocket::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap();
        let mut config = SimConfig::default();
        config.net.handshake_timeout_secs = 0.2;
        config.net.hello_resend_secs = 0.05;

        let result = tokio_test::block_on(ClientSession::connect(ClientOptions {
            server,
            tick_rate: 50,
            config,
        }));

        assert!(matches!(result, Err(SimError::Transport(_))));
    }
}
