//! Error type shared by the whole workspace.

use crate::types::{EntityId, PeerId};
use thiserror::Error;

/// Failures surfaced by the simulation, replication and transport layers.
///
/// Only transport and startup failures are meant to reach the operator;
/// everything raised during a tick is logged and the action is skipped.
#[derive(Debug, Error)]
pub enum SimError {
    /// A peer tried to write state it does not own.
    #[error("{writer} may not write {entity} (owner: {owner:?})")]
    OwnershipViolation {
        entity: EntityId,
        writer: PeerId,
        owner: Option<PeerId>,
    },

    /// A collaborator required at bind time is absent (camera, physics body, overlay).
    #[error("missing dependency: {0}")]
    MissingDependency(String),

    #[error("unknown {0}")]
    UnknownEntity(EntityId),

    /// Connect/listen/handshake failure.
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("codec error: {0}")]
    Codec(#[from] bincode::Error),

    /// An encoded packet would not fit in one datagram.
    #[error("{kind} packet is {size} bytes, over the {limit} byte datagram limit")]
    Oversized {
        kind: &'static str,
        size: usize,
        limit: usize,
    },

    #[error("invalid configuration: {0}")]
    Config(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ownership_violation_message() {
        let err = SimError::OwnershipViolation {
            entity: EntityId::CLIENT_AVATAR,
            writer: PeerId(3),
            owner: Some(PeerId(1)),
        };
        let message = err.to_string();
        assert!(message.contains("peer#3"));
        assert!(message.contains("entity#2"));
    }

    #[test]
    fn test_io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::AddrInUse, "taken");
        let err: SimError = io.into();
        assert!(matches!(err, SimError::Io(_)));
    }
}
