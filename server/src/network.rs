//! Host session: drives the authoritative game from the transport and console

use crate::game::AuthorityGame;
use log::{debug, error, info, warn};
use shared::input::{ConsoleCommand, InputManager};
use shared::view::{LoggingOverlay, LoggingViewport, ViewportSinks};
use shared::{NetworkTransport, SimConfig, SimError, TransportEvent, UdpTransport};
use std::net::SocketAddr;
use tokio::sync::mpsc;
use tokio::time::{interval, Duration, MissedTickBehavior};

/// Everything needed to start hosting.
#[derive(Debug, Clone)]
pub struct HostOptions {
    pub bind: SocketAddr,
    pub tick_rate: u32,
    pub seed: Option<u64>,
    pub config: SimConfig,
}

/// Whether the tick loop should keep going.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Running,
    Stopped,
}

pub struct HostSession<T: NetworkTransport> {
    transport: T,
    game: AuthorityGame,
    input: InputManager,
    tick_duration: Duration,
    state: SessionState,
}

impl HostSession<UdpTransport> {
    /// Binds the socket, loads the avatars with logging viewports and spawns
    /// the initial population.
    pub fn listen(options: HostOptions) -> Result<Self, SimError> {
        options.config.validate()?;
        let transport = UdpTransport::listen(options.bind, &options.config.net)?;
        info!("Hosting on {}", transport.local_addr()?);

        let sinks = ViewportSinks {
            host: Some(Box::new(LoggingViewport::new("HostCamera"))),
            client: Some(Box::new(LoggingViewport::new("ClientCamera"))),
        };
        let mut game = AuthorityGame::with_arena(&options.config, options.seed, sinks);
        game.world_mut()
            .attach_overlay(Some(Box::new(LoggingOverlay::new())));

        Self::new(transport, game, options.tick_rate)
    }
}

impl<T: NetworkTransport> HostSession<T> {
    pub fn new(transport: T, mut game: AuthorityGame, tick_rate: u32) -> Result<Self, SimError> {
        let outcomes = game.start()?;
        info!("Initial population: {} spawn attempts", outcomes.len());
        game.world().log_ownership();

        Ok(Self {
            transport,
            game,
            input: InputManager::new(),
            tick_duration: Duration::from_nanos(1_000_000_000 / u64::from(tick_rate.max(1))),
            state: SessionState::Running,
        })
    }

    pub fn game(&self) -> &AuthorityGame {
        &self.game
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Feeds a console command to the game. Returns the resulting state.
    pub fn handle_command(&mut self, command: ConsoleCommand) -> SessionState {
        match command {
            ConsoleCommand::Spawn => self.game.request_spawn(),
            ConsoleCommand::Help => info!("{}", ConsoleCommand::help()),
            ConsoleCommand::Quit => {
                info!("Quit requested");
                self.state = SessionState::Stopped;
            }
            other => {
                self.input.apply(other);
            }
        }
        self.state
    }

    /// Processes transport events, advances one fixed tick and flushes the outbox.
    pub fn tick(&mut self) {
        if self.state == SessionState::Stopped {
            return;
        }

        for event in self.transport.poll_events() {
            match event {
                TransportEvent::PeerConnected(peer) => {
                    if let Err(e) = self.game.handle_peer_connected(peer) {
                        error!("Could not hand over the client avatar to {}: {}", peer, e);
                    }
                    self.game.world().log_ownership();
                }
                TransportEvent::PeerDisconnected(peer) => {
                    self.game.handle_peer_disconnected(peer);
                    self.game.world().log_ownership();
                }
                TransportEvent::Packet { from, packet } => self.game.handle_packet(from, packet),
                TransportEvent::ConnectionRejected(reason) => {
                    warn!("Unexpected rejection while hosting: {}", reason);
                }
            }
        }

        let report = self
            .game
            .step(&self.input, self.tick_duration.as_secs_f32());
        self.input.end_tick();
        if !report.spawns.is_empty() || !report.despawned.is_empty() {
            debug!(
                "Tick {}: {:?} spawned, {:?} despawned",
                self.game.tick(),
                report.spawns,
                report.despawned
            );
        }

        self.flush();
    }

    fn flush(&mut self) {
        for (target, packet) in self.game.drain_outbox() {
            if let Err(e) = self.transport.send(target, &packet) {
                error!("Failed to send {}: {}", packet.kind(), e);
            }
        }
    }

    /// Stops ticking, destroys the population, tells peers, then closes the
    /// transport. Safe to call more than once.
    pub fn shutdown(&mut self) {
        self.state = SessionState::Stopped;
        self.game.teardown();
        self.flush();
        self.transport.shutdown();
    }

    /// Main host loop coordinating ticks, console commands and ctrl-c.
    pub async fn run(
        &mut self,
        mut console: mpsc::UnboundedReceiver<ConsoleCommand>,
    ) -> Result<(), SimError> {
        let mut tick_interval = interval(self.tick_duration);
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut console_open = true;

        info!("Host started; type 'help' for commands");

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
        info!("Host stopped");
        Ok(())
    }
}
