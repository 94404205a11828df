//! Ownership model: which peer may drive each controllable entity.
//!
//! Every controller and every replicated write consults this single table
//! instead of re-deriving "is this mine" from role flags. The authority is the
//! only peer allowed to reassign owners; replicas mirror its decisions through
//! [`OwnershipModel::apply_remote`].

use crate::error::SimError;
use crate::types::{EntityId, PeerId};
use log::{info, warn};
use std::collections::HashMap;

/// Result of an authority-side ownership transfer request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    /// Ownership moved to the requested peer.
    Transferred { previous: Option<PeerId> },
    /// The entity already belongs to a remote peer; nothing changed.
    AlreadyOwned(PeerId),
}

#[derive(Debug, Clone)]
pub struct OwnershipModel {
    local: PeerId,
    authority: PeerId,
    owners: HashMap<EntityId, Option<PeerId>>,
    /// Changes not yet replicated to other peers.
    pending: Vec<(EntityId, Option<PeerId>)>,
}

impl OwnershipModel {
    /// Creates the table for a process whose own identity is `local`.
    /// The host is always the authority.
    pub fn new(local: PeerId) -> Self {
        Self {
            local,
            authority: PeerId::HOST,
            owners: HashMap::new(),
            pending: Vec::new(),
        }
    }

    pub fn local_peer(&self) -> PeerId {
        self.local
    }

    pub fn authority(&self) -> PeerId {
        self.authority
    }

    pub fn is_authority(&self) -> bool {
        self.local == self.authority
    }

    /// Declares a controllable entity and its initial owner (`None` = ownerless).
    pub fn register(&mut self, entity: EntityId, owner: Option<PeerId>) {
        self.owners.insert(entity, owner);
    }

    pub fn owner_of(&self, entity: EntityId) -> Option<PeerId> {
        self.owners.get(&entity).copied().flatten()
    }

    pub fn is_owned_by_local_peer(&self, entity: EntityId) -> bool {
        self.owner_of(entity) == Some(self.local)
    }

    /// Hands `entity` to `new_peer`. Authority only.
    ///
    /// Entities currently owned by a remote peer are left untouched, so a
    /// second connection never steals an avatar that is already driven.
    pub fn transfer_ownership(
        &mut self,
        entity: EntityId,
        new_peer: PeerId,
    ) -> Result<TransferOutcome, SimError> {
        if !self.is_authority() {
            return Err(SimError::OwnershipViolation {
                entity,
                writer: self.local,
                owner: self.owner_of(entity),
            });
        }

        let slot = self
            .owners
            .get_mut(&entity)
            .ok_or(SimError::UnknownEntity(entity))?;

        let existing = *slot;
        match existing {
            Some(current) if current != self.authority => {
                warn!(
                    "Refusing to transfer {} to {}: already owned by {}",
                    entity, new_peer, current
                );
                Ok(TransferOutcome::AlreadyOwned(current))
            }
            previous => {
                *slot = Some(new_peer);
                self.pending.push((entity, Some(new_peer)));
                info!("Transferred ownership of {} to {}", entity, new_peer);
                Ok(TransferOutcome::Transferred { previous })
            }
        }
    }

    /// Clears every entity owned by `peer` (disconnect). Returns the entities
    /// that became ownerless; calling it again for the same peer is a no-op.
    pub fn release_peer(&mut self, peer: PeerId) -> Vec<EntityId> {
        let mut released: Vec<EntityId> = self
            .owners
            .iter()
            .filter(|(_, owner)| **owner == Some(peer))
            .map(|(entity, _)| *entity)
            .collect();
        released.sort();

        for entity in &released {
            self.owners.insert(*entity, None);
            self.pending.push((*entity, None));
            info!("{} is ownerless after {} left", entity, peer);
        }
        released
    }

    /// Mirrors an ownership decision received from the authority.
    pub fn apply_remote(&mut self, entity: EntityId, owner: Option<PeerId>) {
        if self.owners.get(&entity) != Some(&owner) {
            info!("Ownership of {} is now {:?}", entity, owner);
        }
        self.owners.insert(entity, owner);
    }

    /// Current owner of every registered entity, sorted by entity id.
    pub fn snapshot(&self) -> Vec<(EntityId, Option<PeerId>)> {
        let mut entries: Vec<_> = self.owners.iter().map(|(e, o)| (*e, *o)).collect();
        entries.sort_by_key(|(entity, _)| *entity);
        entries
    }

    /// Drains the ownership changes that still have to be replicated.
    pub fn take_changes(&mut self) -> Vec<(EntityId, Option<PeerId>)> {
        std::mem::take(&mut self.pending)
    }
}
