//! Authoritative game state: the shared avatar world plus the agent population.

use crate::population::{AgentLifecycleManager, PopulationEvent, SpawnOutcome, TickReport};
use log::{error, info, warn};
use shared::physics::KinematicWorld;
use shared::view::ViewportSinks;
use shared::{
    AvatarTag, InputSource, Packet, PeerId, PeerWorld, PhysicsWorld, Role, SimConfig, SimError,
    Target, TransferOutcome,
};
use std::time::Duration;

pub struct AuthorityGame<P: PhysicsWorld = KinematicWorld> {
    world: PeerWorld<P>,
    population: AgentLifecycleManager,
    tick: u32,
    flag_resend: Duration,
    since_flag_resend: Duration,
    outbox: Vec<(Target, Packet)>,
    torn_down: bool,
}

impl AuthorityGame<KinematicWorld> {
    /// Host game on the default arena.
    pub fn with_arena(config: &SimConfig, seed: Option<u64>, sinks: ViewportSinks) -> Self {
        Self::new(config, seed, KinematicWorld::arena(), sinks)
    }
}

impl<P: PhysicsWorld> AuthorityGame<P> {
    pub fn new(config: &SimConfig, seed: Option<u64>, physics: P, sinks: ViewportSinks) -> Self {
        Self {
            world: PeerWorld::new(Role::Host, PeerId::HOST, config, physics, sinks),
            population: AgentLifecycleManager::new(
                config.population.clone(),
                config.wander.clone(),
                seed,
            ),
            tick: 0,
            flag_resend: config.net.flag_resend(),
            since_flag_resend: Duration::ZERO,
            outbox: Vec::new(),
            torn_down: false,
        }
    }

    pub fn world(&self) -> &PeerWorld<P> {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut PeerWorld<P> {
        &mut self.world
    }

    pub fn population(&self) -> &AgentLifecycleManager {
        &self.population
    }

    pub fn population_mut(&mut self) -> &mut AgentLifecycleManager {
        &mut self.population
    }

    pub fn tick(&self) -> u32 {
        self.tick
    }

    /// Spawns the initial population.
    pub fn start(&mut self) -> Result<Vec<SpawnOutcome>, SimError> {
        let outcomes = self.population.initialize(self.world.ownership())?;
        self.queue_population_events();
        Ok(outcomes)
    }

    pub fn request_spawn(&mut self) {
        self.population.request_spawn();
    }

    /// Hands the client avatar to a newly connected peer and sends it
    /// everything it missed.
    pub fn handle_peer_connected(&mut self, peer: PeerId) -> Result<TransferOutcome, SimError> {
        let outcome = self.world.transfer_ownership(AvatarTag::Client, peer)?;
        match outcome {
            TransferOutcome::Transferred { previous } => {
                info!(
                    "{} now drives the client avatar (previous owner: {:?})",
                    peer, previous
                );
            }
            TransferOutcome::AlreadyOwned(owner) => {
                warn!("{} joined as an observer; client avatar stays with {}", peer, owner);
            }
        }

        // Broadcast the ownership change to everyone, then catch the newcomer up.
        for packet in self.world.outbound() {
            self.outbox.push((Target::All, packet));
        }
        for packet in self.world.snapshot_packets() {
            self.outbox.push((Target::Peer(peer), packet));
        }
        for agent in self.population.agents() {
            self.outbox.push((
                Target::Peer(peer),
                Packet::AgentSpawned {
                    id: agent.id(),
                    position: agent.position(),
                    color: agent.color.latest(),
                },
            ));
        }
        Ok(outcome)
    }

    /// Leaves whatever the peer drove ownerless. Repeated calls are harmless.
    pub fn handle_peer_disconnected(&mut self, peer: PeerId) {
        let released = self.world.release_peer(peer);
        if released.is_empty() {
            info!("{} left", peer);
        } else {
            info!("{} left; {:?} now ownerless", peer, released);
        }
        for packet in self.world.outbound() {
            self.outbox.push((Target::All, packet));
        }
    }

    /// Applies a packet from a remote peer and relays accepted avatar state
    /// to the other peers.
    pub fn handle_packet(&mut self, from: PeerId, packet: Packet) {
        match &packet {
            Packet::AvatarTransform { .. } | Packet::AvatarFlag { .. } => {
                match self.world.apply_packet(from, &packet) {
                    Ok(true) => self.outbox.push((Target::AllExcept(from), packet)),
                    Ok(false) => {}
                    Err(e) => warn!("Rejected {} from {}: {}", packet.kind(), from, e),
                }
            }
            _ => warn!("Ignoring {} from {}: authority-only state", packet.kind(), from),
        }
    }

    /// One fixed tick: avatars, physics, population, then replication.
    pub fn step(&mut self, input: &dyn InputSource, dt: f32) -> TickReport {
        self.world.fixed_update(input, dt);

        let report = match self.population.tick(self.world.ownership(), dt) {
            Ok(report) => report,
            Err(e) => {
                error!("Population tick failed: {}", e);
                TickReport::default()
            }
        };

        for packet in self.world.outbound() {
            self.outbox.push((Target::All, packet));
        }
        self.since_flag_resend += Duration::from_secs_f32(dt);
        if self.since_flag_resend >= self.flag_resend {
            self.since_flag_resend = Duration::ZERO;
            for packet in self.world.resend_flags() {
                self.outbox.push((Target::All, packet));
            }
        }

        self.queue_population_events();
        self.tick = self.tick.wrapping_add(1);
        self.outbox.push((
            Target::All,
            Packet::WorldState {
                tick: self.tick,
                agents: self.population.world_state(),
            },
        ));
        report
    }

    fn queue_population_events(&mut self) {
        for event in self.population.drain_events() {
            let packet = match event {
                PopulationEvent::Spawned {
                    id,
                    position,
                    color,
                } => Packet::AgentSpawned {
                    id,
                    position,
                    color,
                },
                PopulationEvent::Despawned { id } => Packet::AgentDespawned { id },
            };
            self.outbox.push((Target::All, packet));
        }
    }

    /// Destroys every agent and queues the destructions. Idempotent.
    pub fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        self.population.teardown();
        self.queue_population_events();
    }

    pub fn drain_outbox(&mut self) -> Vec<(Target, Packet)> {
        std::mem::take(&mut self.outbox)
    }
}
