//! Per-peer world: the two avatars, their physics bodies, ownership and view.
//!
//! `PeerWorld` is the context object both games build on. It owns the
//! [`OwnershipModel`] and hands it explicitly to every controller and
//! replicated write, and it turns local avatar state into outgoing packets and
//! incoming avatar packets back into local state.

use crate::avatar::{Avatar, ControlOutcome};
use crate::capabilities::{InputSource, MessageOverlay, PhysicsWorld};
use crate::config::SimConfig;
use crate::error::SimError;
use crate::ownership::{OwnershipModel, TransferOutcome};
use crate::protocol::{FlagKind, Packet};
use crate::replicated::ValueUpdate;
use crate::types::{AvatarTag, EntityId, PeerId, Role};
use crate::view::{ViewBinder, Viewpoint, ViewportSinks};
use glam::Vec3;
use log::{debug, info, warn};
use std::sync::{Arc, Mutex};

pub struct PeerWorld<P: PhysicsWorld> {
    role: Role,
    ownership: OwnershipModel,
    physics: P,
    avatars: [Avatar; 2],
    view: ViewBinder,
    /// Outgoing transform sequence per avatar (host, client).
    transform_seq: [u32; 2],
    /// Newest transform applied per avatar.
    applied_transform: [u32; 2],
}

fn slot(tag: AvatarTag) -> usize {
    match tag {
        AvatarTag::Host => 0,
        AvatarTag::Client => 1,
    }
}

impl<P: PhysicsWorld> PeerWorld<P> {
    /// Loads the two avatars. The host avatar always belongs to the host; the
    /// client avatar starts ownerless until the authority hands it over.
    pub fn new(
        role: Role,
        local: PeerId,
        config: &SimConfig,
        mut physics: P,
        sinks: ViewportSinks,
    ) -> Self {
        let mut ownership = OwnershipModel::new(local);
        ownership.register(EntityId::HOST_AVATAR, Some(PeerId::HOST));
        ownership.register(EntityId::CLIENT_AVATAR, None);

        let avatars = AvatarTag::ALL.map(|tag| Avatar::new(tag, config.avatar.clone()));
        for avatar in &avatars {
            physics.add_body(avatar.tag().entity(), avatar.start_position(), avatar.radius());
        }

        let view = ViewBinder::bind(role, config.view.clone(), sinks);

        let mut world = Self {
            role,
            ownership,
            physics,
            avatars,
            view,
            transform_seq: [0; 2],
            applied_transform: [0; 2],
        };
        world.refresh_simulation();
        world
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn ownership(&self) -> &OwnershipModel {
        &self.ownership
    }

    pub fn physics(&self) -> &P {
        &self.physics
    }

    pub fn physics_mut(&mut self) -> &mut P {
        &mut self.physics
    }

    pub fn avatar(&self, tag: AvatarTag) -> &Avatar {
        &self.avatars[slot(tag)]
    }

    pub fn avatar_mut(&mut self, tag: AvatarTag) -> &mut Avatar {
        &mut self.avatars[slot(tag)]
    }

    pub fn avatar_position(&self, tag: AvatarTag) -> Option<Vec3> {
        self.physics.position(tag.entity())
    }

    pub fn viewpoint(&self) -> Option<&Viewpoint> {
        self.view.viewpoint()
    }

    pub fn view(&self) -> &ViewBinder {
        &self.view
    }

    /// Shows each avatar's message through `overlay` whenever its replicated
    /// visibility flag changes, on this peer.
    pub fn attach_overlay(&mut self, overlay: Option<Box<dyn MessageOverlay + Send>>) {
        let Some(overlay) = overlay else {
            let err = SimError::MissingDependency("message overlay".to_string());
            warn!("{}; message display disabled", err);
            return;
        };

        let overlay = Arc::new(Mutex::new(overlay));
        for avatar in &mut self.avatars {
            let tag = avatar.tag();
            let overlay = Arc::clone(&overlay);
            avatar.is_message_visible.observe(move |_, visible| {
                match overlay.lock() {
                    Ok(mut overlay) => overlay.set_message_visible(tag, *visible),
                    Err(poisoned) => poisoned.into_inner().set_message_visible(tag, *visible),
                }
            });
        }
    }

    /// A body is integrated here when this peer drives it: it owns it, or it
    /// is ownerless and this peer is the authority.
    pub fn is_simulated_here(&self, tag: AvatarTag) -> bool {
        match self.ownership.owner_of(tag.entity()) {
            Some(owner) => owner == self.ownership.local_peer(),
            None => self.ownership.is_authority(),
        }
    }

    fn refresh_simulation(&mut self) {
        for tag in AvatarTag::ALL {
            let simulated = self.is_simulated_here(tag);
            self.physics.set_simulated(tag.entity(), simulated);
        }
    }

    /// Runs the avatar controllers, steps physics and repositions the view.
    ///
    /// Controller failures are logged and skipped for this tick.
    pub fn fixed_update(&mut self, input: &dyn InputSource, dt: f32) -> [ControlOutcome; 2] {
        let mut outcomes = [ControlOutcome::Skipped; 2];

        for (index, avatar) in self.avatars.iter_mut().enumerate() {
            let tag = avatar.tag();
            let viewpoint = self.view.viewpoint_for(tag);
            match avatar.fixed_update(&self.ownership, &mut self.physics, input, viewpoint, dt) {
                Ok(outcome) => outcomes[index] = outcome,
                Err(e) => warn!("Skipping {} this tick: {}", tag, e),
            }
        }

        self.refresh_simulation();
        self.physics.step(dt);
        self.update_view();
        outcomes
    }

    /// Moves the bound viewpoint from the bound avatar's position and mode.
    pub fn update_view(&mut self) -> Option<Viewpoint> {
        let tag = self.view.bound_avatar()?;
        let position = self.physics.position(tag.entity())?;
        let first_person = *self.avatar(tag).is_first_person.read();
        self.view.update(position, first_person)
    }

    /// Hands an avatar to `peer`. Authority only.
    pub fn transfer_ownership(
        &mut self,
        tag: AvatarTag,
        peer: PeerId,
    ) -> Result<TransferOutcome, SimError> {
        let outcome = self.ownership.transfer_ownership(tag.entity(), peer)?;
        if matches!(outcome, TransferOutcome::Transferred { .. }) {
            self.restart_writer(tag);
            self.refresh_simulation();
        }
        Ok(outcome)
    }

    /// Clears everything `peer` owned. Returns the avatars that became ownerless.
    pub fn release_peer(&mut self, peer: PeerId) -> Vec<AvatarTag> {
        let released: Vec<AvatarTag> = self
            .ownership
            .release_peer(peer)
            .into_iter()
            .filter_map(AvatarTag::from_entity)
            .collect();
        for tag in &released {
            self.restart_writer(*tag);
            // Drop remote momentum; the authority resumes from where it stands.
            self.physics.set_velocity(tag.entity(), Vec3::ZERO);
        }
        self.refresh_simulation();
        released
    }

    /// Forgets the sequence history of an avatar that changed hands, so the
    /// new writer's updates are accepted from their first one.
    fn restart_writer(&mut self, tag: AvatarTag) {
        self.applied_transform[slot(tag)] = 0;
        let avatar = self.avatar_mut(tag);
        for flag in FlagKind::ALL {
            avatar.flag_mut(flag).restart();
        }
    }

    /// Whether `from` may publish state for `entity` to this peer.
    ///
    /// The authority accepts only the current owner. Replicas hear from the
    /// authority alone, which relays every owner's state.
    fn accepts_from(&self, entity: EntityId, from: PeerId) -> bool {
        if self.ownership.is_authority() {
            self.ownership.owner_of(entity) == Some(from)
        } else {
            from == self.ownership.authority()
        }
    }

    fn reject(&self, entity: EntityId, from: PeerId) -> SimError {
        SimError::OwnershipViolation {
            entity,
            writer: from,
            owner: self.ownership.owner_of(entity),
        }
    }

    /// Applies an avatar-related packet. Returns `Ok(false)` for packets this
    /// world does not handle or that were stale.
    pub fn apply_packet(&mut self, from: PeerId, packet: &Packet) -> Result<bool, SimError> {
        match packet {
            Packet::OwnershipChanged { entity, owner } => {
                if self.ownership.is_authority() || from != self.ownership.authority() {
                    return Err(self.reject(*entity, from));
                }
                let before = self.ownership.owner_of(*entity);
                self.ownership.apply_remote(*entity, *owner);
                if before != *owner {
                    if let Some(tag) = AvatarTag::from_entity(*entity) {
                        self.restart_writer(tag);
                    }
                }
                self.refresh_simulation();
                Ok(true)
            }
            Packet::AvatarTransform {
                tag,
                seq,
                position,
                velocity,
            } => {
                let entity = tag.entity();
                if self.ownership.is_owned_by_local_peer(entity) {
                    // We are the writer; echoes are ignored.
                    return Ok(false);
                }
                if !self.accepts_from(entity, from) {
                    return Err(self.reject(entity, from));
                }
                let newest = &mut self.applied_transform[slot(*tag)];
                if *seq <= *newest {
                    return Ok(false);
                }
                *newest = *seq;
                self.physics.set_position(entity, *position);
                self.physics.set_velocity(entity, *velocity);
                Ok(true)
            }
            Packet::AvatarFlag { tag, flag, update } if update.seq == 0 => {
                // Unsequenced values only come from the authority's handover snapshot.
                if self.ownership.is_authority() || from != self.ownership.authority() {
                    return Err(self.reject(tag.entity(), from));
                }
                Ok(self.avatar_mut(*tag).flag_mut(*flag).seed(update.value))
            }
            Packet::AvatarFlag { tag, flag, update } => {
                let entity = tag.entity();
                if self.ownership.is_owned_by_local_peer(entity) {
                    return Ok(false);
                }
                if !self.accepts_from(entity, from) {
                    return Err(self.reject(entity, from));
                }
                let applied = self.avatar_mut(*tag).flag_mut(*flag).apply(*update);
                if applied {
                    debug!("{} {:?} is now {}", tag, flag, update.value);
                }
                Ok(applied)
            }
            _ => Ok(false),
        }
    }

    /// Drains pending ownership changes and local flag writes, and snapshots
    /// the transform of every avatar this peer drives.
    pub fn outbound(&mut self) -> Vec<Packet> {
        let mut packets: Vec<Packet> = self
            .ownership
            .take_changes()
            .into_iter()
            .map(|(entity, owner)| Packet::OwnershipChanged { entity, owner })
            .collect();

        for avatar in &mut self.avatars {
            let tag = avatar.tag();
            for flag in FlagKind::ALL {
                for update in avatar.flag_mut(flag).take_outbound() {
                    packets.push(Packet::AvatarFlag { tag, flag, update });
                }
            }
        }

        for tag in AvatarTag::ALL {
            if !self.is_simulated_here(tag) {
                continue;
            }
            let entity = tag.entity();
            if let (Some(position), Some(velocity)) =
                (self.physics.position(entity), self.physics.velocity(entity))
            {
                let seq = &mut self.transform_seq[slot(tag)];
                *seq = seq.wrapping_add(1);
                packets.push(Packet::AvatarTransform {
                    tag,
                    seq: *seq,
                    position,
                    velocity,
                });
            }
        }
        packets
    }

    /// Latest value of every flag this peer writes, so lost datagrams converge.
    pub fn resend_flags(&self) -> Vec<Packet> {
        self.avatars
            .iter()
            .filter(|avatar| self.ownership.is_owned_by_local_peer(avatar.tag().entity()))
            .flat_map(|avatar| {
                FlagKind::ALL
                    .into_iter()
                    .map(move |flag| (avatar.tag(), flag, avatar.flag(flag).latest()))
            })
            .filter(|(_, _, update)| update.seq > 0)
            .map(|(tag, flag, update)| Packet::AvatarFlag { tag, flag, update })
            .collect()
    }

    /// Everything a peer that just joined needs about the avatars: the
    /// ownership table and the current value of every flag. Flags of an
    /// avatar that just changed hands go out unsequenced and seed the new
    /// owner's copy.
    pub fn snapshot_packets(&self) -> Vec<Packet> {
        let mut packets: Vec<Packet> = self
            .ownership
            .snapshot()
            .into_iter()
            .map(|(entity, owner)| Packet::OwnershipChanged { entity, owner })
            .collect();

        for avatar in &self.avatars {
            for flag in FlagKind::ALL {
                let update: ValueUpdate<bool> = avatar.flag(flag).latest();
                packets.push(Packet::AvatarFlag {
                    tag: avatar.tag(),
                    flag,
                    update,
                });
            }
        }
        packets
    }

    /// Logs who drives what; used on connect and disconnect.
    pub fn log_ownership(&self) {
        for (entity, owner) in self.ownership.snapshot() {
            match owner {
                Some(peer) => info!("{} owned by {}", entity, peer),
                None => info!("{} is ownerless", entity),
            }
        }
    }
}
