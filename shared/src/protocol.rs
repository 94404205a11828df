//! Wire protocol shared by host and client.
//!
//! Every datagram carries exactly one bincode-encoded [`Packet`].

use crate::error::SimError;
use crate::replicated::ValueUpdate;
use crate::types::{AvatarTag, EntityId, PeerId, Rgb};
use glam::Vec3;
use serde::{Deserialize, Serialize};

/// Largest datagram either side will try to read.
pub const MAX_PACKET_SIZE: usize = 8192;

/// Most agents a single [`Packet::WorldState`] may carry and still fit in
/// [`MAX_PACKET_SIZE`].
pub const MAX_WORLD_STATE_AGENTS: usize = 200;

/// Which replicated avatar flag an [`Packet::AvatarFlag`] carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FlagKind {
    FirstPerson,
    MessageVisible,
}

impl FlagKind {
    pub const ALL: [FlagKind; 2] = [FlagKind::FirstPerson, FlagKind::MessageVisible];
}

/// Replicated state of one live agent inside a [`Packet::WorldState`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentState {
    pub id: EntityId,
    pub position: Vec3,
    pub color: ValueUpdate<Rgb>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Packet {
    // Connection management
    Hello {
        protocol_version: u32,
    },
    Welcome {
        peer_id: PeerId,
    },
    Rejected {
        reason: String,
    },
    Goodbye,
    Heartbeat,

    // Ownership and avatars
    OwnershipChanged {
        entity: EntityId,
        owner: Option<PeerId>,
    },
    AvatarTransform {
        tag: AvatarTag,
        seq: u32,
        position: Vec3,
        velocity: Vec3,
    },
    AvatarFlag {
        tag: AvatarTag,
        flag: FlagKind,
        update: ValueUpdate<bool>,
    },

    // Agent population
    AgentSpawned {
        id: EntityId,
        position: Vec3,
        color: ValueUpdate<Rgb>,
    },
    AgentDespawned {
        id: EntityId,
    },
    WorldState {
        tick: u32,
        agents: Vec<AgentState>,
    },
}

impl Packet {
    /// Short name used in log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            Packet::Hello { .. } => "Hello",
            Packet::Welcome { .. } => "Welcome",
            Packet::Rejected { .. } => "Rejected",
            Packet::Goodbye => "Goodbye",
            Packet::Heartbeat => "Heartbeat",
            Packet::OwnershipChanged { .. } => "OwnershipChanged",
            Packet::AvatarTransform { .. } => "AvatarTransform",
            Packet::AvatarFlag { .. } => "AvatarFlag",
            Packet::AgentSpawned { .. } => "AgentSpawned",
            Packet::AgentDespawned { .. } => "AgentDespawned",
            Packet::WorldState { .. } => "WorldState",
        }
    }
}

/// Encodes one datagram. Packets the receiver could not read in full are
/// refused here rather than truncated on the wire.
pub fn encode(packet: &Packet) -> Result<Vec<u8>, SimError> {
    let bytes = bincode::serialize(packet)?;
    if bytes.len() > MAX_PACKET_SIZE {
        return Err(SimError::Oversized {
            kind: packet.kind(),
            size: bytes.len(),
            limit: MAX_PACKET_SIZE,
        });
    }
    Ok(bytes)
}

pub fn decode(bytes: &[u8]) -> Result<Packet, SimError> {
    Ok(bincode::deserialize(bytes)?)
}
