//! Replica-side game state
//!
//! The client never decides anything about agents. It mirrors the host's
//! roster from spawn/despawn notices and the per-tick `WorldState`, and it
//! drives whichever avatar the host has handed it.

use log::{debug, info, warn};
use shared::physics::KinematicWorld;
use shared::protocol::AgentState;
use shared::view::ViewportSinks;
use shared::{
    EntityId, InputSource, Packet, PeerId, PeerWorld, PhysicsWorld, Replicated, Rgb, Role,
    SimConfig, ValueUpdate, Vec3, WritePermission,
};
use std::collections::BTreeMap;
use std::time::Duration;

/// Local copy of one host agent.
#[derive(Debug)]
pub struct AgentReplica {
    id: EntityId,
    position: Vec3,
    pub color: Replicated<Rgb>,
}

impl AgentReplica {
    fn new(id: EntityId, position: Vec3) -> Self {
        let mut color = Replicated::new(id, WritePermission::Authority, Rgb::WHITE);
        color.observe(move |_, applied| {
            info!(
                "{} colour is now ({:.2}, {:.2}, {:.2})",
                id, applied.r, applied.g, applied.b
            );
        });
        Self {
            id,
            position,
            color,
        }
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }
}

pub struct ReplicaGame<P: PhysicsWorld = KinematicWorld> {
    world: PeerWorld<P>,
    agents: BTreeMap<EntityId, AgentReplica>,
    last_world_tick: Option<u32>,
    flag_resend: Duration,
    since_flag_resend: Duration,
}

impl ReplicaGame<KinematicWorld> {
    pub fn with_arena(local: PeerId, config: &SimConfig, sinks: ViewportSinks) -> Self {
        Self::new(local, config, KinematicWorld::arena(), sinks)
    }
}

impl<P: PhysicsWorld> ReplicaGame<P> {
    pub fn new(local: PeerId, config: &SimConfig, physics: P, sinks: ViewportSinks) -> Self {
        Self {
            world: PeerWorld::new(Role::Client, local, config, physics, sinks),
            agents: BTreeMap::new(),
            last_world_tick: None,
            flag_resend: config.net.flag_resend(),
            since_flag_resend: Duration::ZERO,
        }
    }

    pub fn world(&self) -> &PeerWorld<P> {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut PeerWorld<P> {
        &mut self.world
    }

    pub fn agent(&self, id: EntityId) -> Option<&AgentReplica> {
        self.agents.get(&id)
    }

    pub fn agents(&self) -> impl Iterator<Item = &AgentReplica> {
        self.agents.values()
    }

    pub fn agent_count(&self) -> usize {
        self.agents.len()
    }

    fn upsert(&mut self, id: EntityId, position: Vec3, color: ValueUpdate<Rgb>) {
        let replica = self
            .agents
            .entry(id)
            .or_insert_with(|| AgentReplica::new(id, position));
        replica.position = position;
        replica.color.apply(color);
    }

    /// Makes the local roster match the host's. Agents missing from the
    /// roster were despawned even if their notice was lost.
    fn reconcile(&mut self, roster: &[AgentState]) {
        let before = self.agents.len();
        self.agents
            .retain(|id, _| roster.iter().any(|state| state.id == *id));
        if self.agents.len() != before {
            debug!("Dropped {} agents missing from the roster", before - self.agents.len());
        }
        for state in roster {
            self.upsert(state.id, state.position, state.color);
        }
    }

    /// Applies a packet from the host. Agent state from anyone else is dropped.
    pub fn handle_packet(&mut self, from: PeerId, packet: Packet) {
        match packet {
            Packet::AgentSpawned { .. }
            | Packet::AgentDespawned { .. }
            | Packet::WorldState { .. }
                if from != PeerId::HOST =>
            {
                warn!("Ignoring {} from {}: only the host publishes agents", packet.kind(), from);
            }
            Packet::AgentSpawned {
                id,
                position,
                color,
            } => {
                info!("{} spawned at {:?}", id, position);
                self.upsert(id, position, color);
            }
            Packet::AgentDespawned { id } => {
                if self.agents.remove(&id).is_some() {
                    info!("{} despawned", id);
                }
            }
            Packet::WorldState { tick, agents } => {
                if self.last_world_tick.map_or(false, |last| tick <= last) {
                    debug!("Dropping stale world state for tick {}", tick);
                    return;
                }
                self.last_world_tick = Some(tick);
                self.reconcile(&agents);
            }
            other => match self.world.apply_packet(from, &other) {
                Ok(_) => {}
                Err(e) => warn!("Rejected {} from {}: {}", other.kind(), from, e),
            },
        }
    }

    /// Drives the locally owned avatar and returns what to send to the host.
    pub fn step(&mut self, input: &dyn InputSource, dt: f32) -> Vec<Packet> {
        self.world.fixed_update(input, dt);
        let mut packets = self.world.outbound();

        self.since_flag_resend += Duration::from_secs_f32(dt);
        if self.since_flag_resend >= self.flag_resend {
            self.since_flag_resend = Duration::ZERO;
            packets.extend(self.world.resend_flags());
        }
        packets
    }

    /// Forgets every mirrored agent; the host is gone.
    pub fn clear(&mut self) {
        self.agents.clear();
        self.last_world_tick = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use shared::input::InputManager;
    use shared::{AvatarTag, Key, NoInput};

    fn replica() -> ReplicaGame {
        ReplicaGame::with_arena(PeerId(1), &SimConfig::default(), ViewportSinks::default())
    }

    fn color(seq: u32, r: f32) -> ValueUpdate<Rgb> {
        ValueUpdate {
            seq,
            value: Rgb::new(r, 0.2, 0.2),
        }
    }

    fn state(id: u64, x: f32) -> AgentState {
        AgentState {
            id: EntityId(id),
            position: Vec3::new(x, 0.5, 0.0),
            color: color(1, 0.8),
        }
    }

    #[test]
    fn test_spawn_and_despawn() {
        let mut game = replica();
        game.handle_packet(
            PeerId::HOST,
            Packet::AgentSpawned {
                id: EntityId(16),
                position: Vec3::new(1.0, 0.5, 1.0),
                color: color(1, 0.9),
            },
        );
        let agent = game.agent(EntityId(16)).unwrap();
        assert_eq!(agent.color.read().r, 0.9);
        assert_eq!(agent.position(), Vec3::new(1.0, 0.5, 1.0));

        game.handle_packet(PeerId::HOST, Packet::AgentDespawned { id: EntityId(16) });
        game.handle_packet(PeerId::HOST, Packet::AgentDespawned { id: EntityId(16) });
        assert_eq!(game.agent_count(), 0);
    }

    #[test]
    fn test_agent_packets_only_from_host() {
        let mut game = replica();
        game.handle_packet(
            PeerId(2),
            Packet::WorldState {
                tick: 1,
                agents: vec![state(16, 0.0)],
            },
        );
        assert_eq!(game.agent_count(), 0);
    }

    #[test]
    fn test_world_state_reconciles_roster() {
        let mut game = replica();
        game.handle_packet(
            PeerId::HOST,
            Packet::WorldState {
                tick: 1,
                agents: vec![state(16, 0.0), state(17, 3.0)],
            },
        );
        assert_eq!(game.agent_count(), 2);

        // 16's despawn notice was lost; the next roster drops it anyway.
        game.handle_packet(
            PeerId::HOST,
            Packet::WorldState {
                tick: 2,
                agents: vec![state(17, 3.5), state(18, -4.0)],
            },
        );
        let ids: Vec<EntityId> = game.agents().map(|a| a.id()).collect();
        assert_eq!(ids, vec![EntityId(17), EntityId(18)]);
        assert_approx_eq!(game.agent(EntityId(17)).unwrap().position().x, 3.5, 1e-6);
    }

    #[test]
    fn test_stale_world_state_dropped() {
        let mut game = replica();
        game.handle_packet(
            PeerId::HOST,
            Packet::WorldState {
                tick: 5,
                agents: vec![state(16, 0.0)],
            },
        );
        game.handle_packet(
            PeerId::HOST,
            Packet::WorldState {
                tick: 4,
                agents: vec![],
            },
        );
        assert_eq!(game.agent_count(), 1);
    }

    #[test]
    fn test_stale_color_ignored() {
        let mut game = replica();
        game.handle_packet(
            PeerId::HOST,
            Packet::AgentSpawned {
                id: EntityId(16),
                position: Vec3::ZERO,
                color: color(2, 0.7),
            },
        );
        game.handle_packet(
            PeerId::HOST,
            Packet::AgentSpawned {
                id: EntityId(16),
                position: Vec3::ZERO,
                color: color(1, 0.1),
            },
        );
        assert_eq!(game.agent(EntityId(16)).unwrap().color.read().r, 0.7);
    }

    #[test]
    fn test_drives_client_avatar_once_owned() {
        let mut game = replica();
        let mut input = InputManager::new();
        input.tap(Key::ToggleFirstPerson);

        // Not owned yet: nothing of ours goes out.
        let before = game.step(&input, 0.02);
        assert!(before.is_empty());

        game.handle_packet(
            PeerId::HOST,
            Packet::OwnershipChanged {
                entity: EntityId::CLIENT_AVATAR,
                owner: Some(PeerId(1)),
            },
        );
        input.tap(Key::ToggleFirstPerson);
        let after = game.step(&input, 0.02);

        assert!(after.iter().any(|p| matches!(
            p,
            Packet::AvatarFlag {
                tag: AvatarTag::Client,
                ..
            }
        )));
        assert!(after.iter().any(|p| matches!(
            p,
            Packet::AvatarTransform {
                tag: AvatarTag::Client,
                ..
            }
        )));
        assert!(*game.world().avatar(AvatarTag::Client).is_first_person.read());
        assert!(game.step(&NoInput, 0.02).iter().all(|p| !matches!(
            p,
            Packet::AvatarTransform {
                tag: AvatarTag::Host,
                ..
            }
        )));
    }
}
