//! Identity types shared by every peer: peers, entities, avatar tags, roles and colours.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Network identity of a participating process.
///
/// The host is always peer 0; connecting peers are numbered from 1 by the
/// host's peer table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(pub u64);

impl PeerId {
    /// The authoritative host process.
    pub const HOST: PeerId = PeerId(0);

    pub fn is_host(self) -> bool {
        self == Self::HOST
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer#{}", self.0)
    }
}

/// Network-unique identifier of a shared entity (avatar or agent).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub u64);

impl EntityId {
    pub const HOST_AVATAR: EntityId = EntityId(1);
    pub const CLIENT_AVATAR: EntityId = EntityId(2);
    /// First id handed out to agents; everything below is reserved for avatars.
    pub const FIRST_AGENT: u64 = 16;
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "entity#{}", self.0)
    }
}

/// Which of the two avatars an entity is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AvatarTag {
    Host,
    Client,
}

impl AvatarTag {
    pub const ALL: [AvatarTag; 2] = [AvatarTag::Host, AvatarTag::Client];

    pub fn entity(self) -> EntityId {
        match self {
            AvatarTag::Host => EntityId::HOST_AVATAR,
            AvatarTag::Client => EntityId::CLIENT_AVATAR,
        }
    }

    pub fn from_entity(entity: EntityId) -> Option<Self> {
        Self::ALL.into_iter().find(|tag| tag.entity() == entity)
    }

    pub fn other(self) -> Self {
        match self {
            AvatarTag::Host => AvatarTag::Client,
            AvatarTag::Client => AvatarTag::Host,
        }
    }
}

impl fmt::Display for AvatarTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AvatarTag::Host => write!(f, "host avatar"),
            AvatarTag::Client => write!(f, "client avatar"),
        }
    }
}

/// Role this process plays in the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Authoritative host: owns the host avatar and the agent population.
    Host,
    /// Connecting peer: may receive ownership of the client avatar.
    Client,
}

impl Role {
    /// The avatar whose viewpoint this role renders.
    pub fn avatar(self) -> AvatarTag {
        match self {
            Role::Host => AvatarTag::Host,
            Role::Client => AvatarTag::Client,
        }
    }

    pub fn is_authority(self) -> bool {
        matches!(self, Role::Host)
    }
}

/// Linear RGB colour with components in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rgb {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl Rgb {
    pub const WHITE: Rgb = Rgb {
        r: 1.0,
        g: 1.0,
        b: 1.0,
    };

    pub fn new(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b }
    }

    /// Converts hue/saturation/value (all in `[0, 1]`) to RGB.
    pub fn from_hsv(hue: f32, saturation: f32, value: f32) -> Self {
        let h = (hue.rem_euclid(1.0)) * 6.0;
        let s = saturation.clamp(0.0, 1.0);
        let v = value.clamp(0.0, 1.0);

        let sector = h.floor();
        let f = h - sector;
        let p = v * (1.0 - s);
        let q = v * (1.0 - s * f);
        let t = v * (1.0 - s * (1.0 - f));

        let (r, g, b) = match sector as u32 {
            0 => (v, t, p),
            1 => (q, v, p),
            2 => (p, v, t),
            3 => (p, q, v),
            4 => (t, p, v),
            _ => (v, p, q),
        };
        Self { r, g, b }
    }
}

impl Default for Rgb {
    fn default() -> Self {
        Self::WHITE
    }
}
