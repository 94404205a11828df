//! # Shared Simulation Library
//!
//! Everything both peers run: identity types, single-writer replicated values
//! and the ownership table that gates them, the wire protocol, the avatar
//! controller and view binder, a small kinematic physics world and the UDP
//! transport.
//!
//! ## Authority
//! The host process is always the authority. It alone creates and destroys
//! agents and reassigns avatar ownership. Every other write is made by the
//! owner of the entity it belongs to, checked through [`OwnershipModel`].
//!
//! ## Replication
//! Writers stamp every change with a per-value sequence number and receivers
//! drop anything not newer than what they hold, so each value's history
//! arrives in order over an unordered datagram transport.

pub mod avatar;
pub mod capabilities;
pub mod config;
pub mod error;
pub mod input;
pub mod ownership;
pub mod peers;
pub mod physics;
pub mod protocol;
pub mod replicated;
pub mod transport;
pub mod types;
pub mod view;
pub mod world;

pub use avatar::{Avatar, ControlOutcome};
pub use capabilities::{Axis, ForceMode, InputSource, Key, MessageOverlay, NoInput, PhysicsWorld, ViewportSink};
pub use config::SimConfig;
pub use error::SimError;
pub use glam::{Quat, Vec2, Vec3};
pub use ownership::{OwnershipModel, TransferOutcome};
pub use protocol::{AgentState, FlagKind, Packet};
pub use replicated::{Replicated, ValueUpdate, WritePermission};
pub use transport::{NetworkTransport, Target, TransportEvent, UdpTransport};
pub use types::{AvatarTag, EntityId, PeerId, Rgb, Role};
pub use world::PeerWorld;

pub const DEFAULT_PORT: u16 = 7777;
pub const HOST_BIND_ADDRESS: &str = "0.0.0.0";
pub const DEFAULT_CLIENT_TARGET: &str = "127.0.0.1";
pub const PROTOCOL_VERSION: u32 = 1;
/// Fixed simulation rate in ticks per second.
pub const DEFAULT_TICK_RATE: u32 = 50;
