//! Replicated values: single-writer containers that every peer can read.
//!
//! A [`Replicated`] value is bound to the entity whose ownership gates it.
//! Writes are checked against the [`OwnershipModel`] and stamped with a
//! per-value sequence number; receivers drop anything not newer than what
//! they already applied, so a value's own history is never reordered even
//! over an unordered transport.

use crate::error::SimError;
use crate::ownership::OwnershipModel;
use crate::types::EntityId;
use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

/// Who is allowed to write a replicated value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WritePermission {
    /// Only the authority (host) writes, e.g. agent colours.
    Authority,
    /// Only the current owner of the bound entity writes, e.g. avatar flags.
    Owner,
}

/// One sequenced change of a replicated value, as it travels on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValueUpdate<T> {
    pub seq: u32,
    pub value: T,
}

type Observer<T> = Box<dyn FnMut(&T, &T) + Send>;

pub struct Replicated<T> {
    entity: EntityId,
    permission: WritePermission,
    value: T,
    seq: u32,
    outbound: VecDeque<ValueUpdate<T>>,
    observers: Vec<Observer<T>>,
}

impl<T: Clone + PartialEq + fmt::Debug> Replicated<T> {
    pub fn new(entity: EntityId, permission: WritePermission, initial: T) -> Self {
        Self {
            entity,
            permission,
            value: initial,
            seq: 0,
            outbound: VecDeque::new(),
            observers: Vec::new(),
        }
    }

    /// Last value written locally or received from the writer. Never blocks.
    pub fn read(&self) -> &T {
        &self.value
    }

    /// Sequence number of the value currently held.
    pub fn seq(&self) -> u32 {
        self.seq
    }

    pub fn entity(&self) -> EntityId {
        self.entity
    }

    /// Registers a callback invoked with `(old, new)` on every change.
    pub fn observe<F>(&mut self, observer: F)
    where
        F: FnMut(&T, &T) + Send + 'static,
    {
        self.observers.push(Box::new(observer));
    }

    pub fn can_write(&self, ownership: &OwnershipModel) -> bool {
        match self.permission {
            WritePermission::Authority => ownership.is_authority(),
            WritePermission::Owner => ownership.is_owned_by_local_peer(self.entity),
        }
    }

    /// Writes a new value as the local peer.
    ///
    /// Non-writers get [`SimError::OwnershipViolation`] and the value is left
    /// untouched. Writing the value already held is accepted but is not a
    /// change: nothing is queued and no observer fires.
    pub fn write(&mut self, ownership: &OwnershipModel, value: T) -> Result<(), SimError> {
        if !self.can_write(ownership) {
            let owner = match self.permission {
                WritePermission::Authority => Some(ownership.authority()),
                WritePermission::Owner => ownership.owner_of(self.entity),
            };
            warn!(
                "Rejected write of {:?} to {} from {}",
                value,
                self.entity,
                ownership.local_peer()
            );
            return Err(SimError::OwnershipViolation {
                entity: self.entity,
                writer: ownership.local_peer(),
                owner,
            });
        }

        if value == self.value {
            return Ok(());
        }

        self.seq = self.seq.wrapping_add(1);
        self.outbound.push_back(ValueUpdate {
            seq: self.seq,
            value: value.clone(),
        });
        self.replace(value);
        Ok(())
    }

    /// Applies an update that arrived from the writer.
    ///
    /// Returns `false` for stale or duplicate sequence numbers.
    pub fn apply(&mut self, update: ValueUpdate<T>) -> bool {
        if update.seq <= self.seq {
            return false;
        }
        self.seq = update.seq;
        if update.value != self.value {
            self.replace(update.value);
        }
        true
    }

    /// Forgets the sequence history when the bound entity changes hands, so
    /// the next writer's first update (seq 1) is accepted. The value is kept.
    pub fn restart(&mut self) {
        self.seq = 0;
        self.outbound.clear();
    }

    /// Adopts the authority's copy of a value at a handover. Only a copy with
    /// no sequence history takes it; returns `true` if the value changed.
    pub fn seed(&mut self, value: T) -> bool {
        if self.seq != 0 || value == self.value {
            return false;
        }
        self.replace(value);
        true
    }

    /// Drains queued local writes in the order they were issued.
    pub fn take_outbound(&mut self) -> Vec<ValueUpdate<T>> {
        self.outbound.drain(..).collect()
    }

    /// The current value with its sequence number, for periodic re-sends.
    pub fn latest(&self) -> ValueUpdate<T> {
        ValueUpdate {
            seq: self.seq,
            value: self.value.clone(),
        }
    }

    fn replace(&mut self, value: T) {
        let old = std::mem::replace(&mut self.value, value);
        for observer in &mut self.observers {
            observer(&old, &self.value);
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Replicated<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Replicated")
            .field("entity", &self.entity)
            .field("permission", &self.permission)
            .field("value", &self.value)
            .field("seq", &self.seq)
            .field("observers", &self.observers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PeerId;
    use std::sync::{Arc, Mutex};

    fn models() -> (OwnershipModel, OwnershipModel) {
        let mut host = OwnershipModel::new(PeerId::HOST);
        host.register(EntityId::CLIENT_AVATAR, Some(PeerId(1)));
        let mut client = OwnershipModel::new(PeerId(1));
        client.register(EntityId::CLIENT_AVATAR, Some(PeerId(1)));
        (host, client)
    }

    fn recorder<T: Clone + Send + 'static>(
        value: &mut Replicated<T>,
    ) -> Arc<Mutex<Vec<(T, T)>>>
    where
        T: PartialEq + fmt::Debug,
    {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        value.observe(move |old, new| sink.lock().unwrap().push((old.clone(), new.clone())));
        seen
    }

    #[test]
    fn test_owner_write_applies_and_queues() {
        let (_, client) = models();
        let mut flag = Replicated::new(EntityId::CLIENT_AVATAR, WritePermission::Owner, false);
        let seen = recorder(&mut flag);

        flag.write(&client, true).unwrap();

        assert!(*flag.read());
        assert_eq!(flag.seq(), 1);
        assert_eq!(flag.take_outbound(), vec![ValueUpdate { seq: 1, value: true }]);
        assert_eq!(*seen.lock().unwrap(), vec![(false, true)]);
    }

    #[test]
    fn test_non_owner_write_is_rejected() {
        let (host, _) = models();
        let mut flag = Replicated::new(EntityId::CLIENT_AVATAR, WritePermission::Owner, false);
        let seen = recorder(&mut flag);

        let result = flag.write(&host, true);

        match result {
            Err(SimError::OwnershipViolation {
                entity,
                writer,
                owner,
            }) => {
                assert_eq!(entity, EntityId::CLIENT_AVATAR);
                assert_eq!(writer, PeerId::HOST);
                assert_eq!(owner, Some(PeerId(1)));
            }
            other => panic!("expected ownership violation, got {:?}", other),
        }
        assert!(!*flag.read());
        assert_eq!(flag.seq(), 0);
        assert!(flag.take_outbound().is_empty());
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_authority_permission() {
        let (host, client) = models();
        let mut color = Replicated::new(EntityId(20), WritePermission::Authority, 1u8);

        assert!(color.write(&client, 2).is_err());
        assert!(color.write(&host, 3).is_ok());
        assert_eq!(*color.read(), 3);
    }

    #[test]
    fn test_writing_same_value_is_not_a_change() {
        let (_, client) = models();
        let mut flag = Replicated::new(EntityId::CLIENT_AVATAR, WritePermission::Owner, false);
        let seen = recorder(&mut flag);

        flag.write(&client, false).unwrap();
        flag.write(&client, false).unwrap();

        assert_eq!(flag.seq(), 0);
        assert!(flag.take_outbound().is_empty());
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_apply_discards_stale_updates() {
        let mut replica = Replicated::new(EntityId::CLIENT_AVATAR, WritePermission::Owner, 0u32);
        let seen = recorder(&mut replica);

        assert!(replica.apply(ValueUpdate { seq: 2, value: 20 }));
        assert!(!replica.apply(ValueUpdate { seq: 1, value: 10 }));
        assert!(!replica.apply(ValueUpdate { seq: 2, value: 20 }));
        assert!(replica.apply(ValueUpdate { seq: 3, value: 30 }));

        assert_eq!(*replica.read(), 30);
        assert_eq!(*seen.lock().unwrap(), vec![(0, 20), (20, 30)]);
    }

    #[test]
    fn test_round_trip_fires_once_per_distinct_write() {
        let (_, client) = models();
        let mut owner = Replicated::new(EntityId::CLIENT_AVATAR, WritePermission::Owner, false);
        let mut observer = Replicated::new(EntityId::CLIENT_AVATAR, WritePermission::Owner, false);
        let seen = recorder(&mut observer);

        owner.write(&client, true).unwrap();
        owner.write(&client, true).unwrap();
        owner.write(&client, false).unwrap();

        for update in owner.take_outbound() {
            observer.apply(update);
        }

        assert_eq!(*observer.read(), *owner.read());
        assert_eq!(*seen.lock().unwrap(), vec![(false, true), (true, false)]);
    }

    #[test]
    fn test_restart_accepts_next_writer() {
        let mut replica = Replicated::new(EntityId::CLIENT_AVATAR, WritePermission::Owner, false);
        assert!(replica.apply(ValueUpdate { seq: 1, value: true }));
        assert!(replica.apply(ValueUpdate { seq: 2, value: false }));

        replica.restart();

        assert_eq!(replica.seq(), 0);
        assert!(!*replica.read());
        assert!(replica.apply(ValueUpdate { seq: 1, value: true }));
        assert!(*replica.read());
    }

    #[test]
    fn test_seed_only_without_history() {
        let (_, client) = models();
        let mut flag = Replicated::new(EntityId::CLIENT_AVATAR, WritePermission::Owner, false);
        let seen = recorder(&mut flag);

        assert!(flag.seed(true));
        assert!(!flag.seed(true));
        assert_eq!(flag.seq(), 0);
        assert!(flag.take_outbound().is_empty());

        flag.write(&client, false).unwrap();
        assert!(!flag.seed(true));
        assert!(!*flag.read());
        assert_eq!(*seen.lock().unwrap(), vec![(false, true), (true, false)]);
    }

    #[test]
    fn test_latest_reflects_current_value() {
        let (_, client) = models();
        let mut flag = Replicated::new(EntityId::CLIENT_AVATAR, WritePermission::Owner, false);
        flag.write(&client, true).unwrap();
        assert_eq!(flag.latest(), ValueUpdate { seq: 1, value: true });
    }
}
