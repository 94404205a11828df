//! Avatar controller.
//!
//! Both avatars exist on every peer for the whole session. The controller runs
//! on every peer each fixed tick, but only the peer that owns an avatar turns
//! input into forces and flag writes; everywhere else it is a no-op and the
//! avatar follows replicated state.

use crate::capabilities::{Axis, ForceMode, InputSource, Key, PhysicsWorld};
use crate::config::AvatarTuning;
use crate::error::SimError;
use crate::ownership::OwnershipModel;
use crate::protocol::FlagKind;
use crate::replicated::{Replicated, WritePermission};
use crate::types::AvatarTag;
use crate::view::Viewpoint;
use glam::Vec3;
use log::{debug, info};

/// What a fixed update did with an avatar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlOutcome {
    /// The local peer does not own the avatar.
    Skipped,
    Driven {
        grounded: bool,
        jumped: bool,
        teleported: bool,
    },
}

#[derive(Debug)]
pub struct Avatar {
    tag: AvatarTag,
    pub is_first_person: Replicated<bool>,
    pub is_message_visible: Replicated<bool>,
    tuning: AvatarTuning,
    move_speed: f32,
    drag_enabled: bool,
    grounded: bool,
}

impl Avatar {
    pub fn new(tag: AvatarTag, tuning: AvatarTuning) -> Self {
        let entity = tag.entity();
        Self {
            tag,
            is_first_person: Replicated::new(entity, WritePermission::Owner, false),
            is_message_visible: Replicated::new(entity, WritePermission::Owner, false),
            move_speed: tuning.move_speed,
            tuning,
            drag_enabled: true,
            grounded: false,
        }
    }

    pub fn tag(&self) -> AvatarTag {
        self.tag
    }

    pub fn move_speed(&self) -> f32 {
        self.move_speed
    }

    pub fn drag_enabled(&self) -> bool {
        self.drag_enabled
    }

    pub fn is_grounded(&self) -> bool {
        self.grounded
    }

    /// Where the avatar starts when the world loads.
    pub fn start_position(&self) -> Vec3 {
        match self.tag {
            AvatarTag::Host => self.tuning.host_start,
            AvatarTag::Client => self.tuning.client_start,
        }
    }

    pub fn radius(&self) -> f32 {
        self.tuning.radius
    }

    pub fn flag(&self, kind: FlagKind) -> &Replicated<bool> {
        match kind {
            FlagKind::FirstPerson => &self.is_first_person,
            FlagKind::MessageVisible => &self.is_message_visible,
        }
    }

    pub fn flag_mut(&mut self, kind: FlagKind) -> &mut Replicated<bool> {
        match kind {
            FlagKind::FirstPerson => &mut self.is_first_person,
            FlagKind::MessageVisible => &mut self.is_message_visible,
        }
    }

    /// Drives the avatar for one physics tick.
    ///
    /// `viewpoint` is the viewpoint bound to this avatar on this peer, if any;
    /// first-person steering turns it and moves along its facing axis.
    pub fn fixed_update(
        &mut self,
        ownership: &OwnershipModel,
        physics: &mut dyn PhysicsWorld,
        input: &dyn InputSource,
        viewpoint: Option<&mut Viewpoint>,
        dt: f32,
    ) -> Result<ControlOutcome, SimError> {
        let entity = self.tag.entity();
        if !ownership.is_owned_by_local_peer(entity) {
            return Ok(ControlOutcome::Skipped);
        }

        let position = physics
            .position(entity)
            .ok_or_else(|| SimError::MissingDependency(format!("physics body for {}", self.tag)))?;

        self.grounded = physics
            .raycast_down(position, self.tuning.ground_check_distance)
            .is_some();
        let drag = match (self.grounded, self.drag_enabled) {
            (true, true) => self.tuning.grounded_drag,
            (true, false) => 0.0,
            (false, _) => self.tuning.airborne_drag,
        };
        physics.set_drag(entity, drag);

        let horizontal = input.axis(Axis::Horizontal).clamp(-1.0, 1.0);
        let vertical = input.axis(Axis::Vertical).clamp(-1.0, 1.0);

        let force = match viewpoint {
            Some(viewpoint) if *self.is_first_person.read() => {
                viewpoint.rotate_yaw(horizontal * self.tuning.rotation_speed * dt);
                let forward = viewpoint.forward();
                Vec3::new(forward.x, 0.0, forward.z).normalize_or_zero() * vertical * self.move_speed
            }
            _ => Vec3::new(horizontal, 0.0, vertical).normalize_or_zero() * self.move_speed,
        };
        physics.apply_force(entity, force, ForceMode::Force);
        physics.clamp_velocity(entity, self.tuning.max_speed);

        let jumped = input.key_down(Key::Jump) && self.grounded;
        if jumped {
            physics.apply_impulse(entity, Vec3::Y * self.tuning.jump_force);
            debug!("{} jumped", self.tag);
        }

        let teleported = position.y < self.tuning.fall_threshold;
        if teleported {
            physics.set_position(entity, self.tuning.respawn_point);
            physics.set_velocity(entity, Vec3::ZERO);
            info!(
                "{} fell to y={:.1}, teleported to {:?}",
                self.tag, position.y, self.tuning.respawn_point
            );
        }

        self.is_message_visible
            .write(ownership, input.key_held(Key::ShowMessage))?;
        self.handle_triggers(ownership, input)?;

        Ok(ControlOutcome::Driven {
            grounded: self.grounded,
            jumped,
            teleported,
        })
    }

    fn handle_triggers(
        &mut self,
        ownership: &OwnershipModel,
        input: &dyn InputSource,
    ) -> Result<(), SimError> {
        if input.key_down(Key::ToggleDrag) {
            self.drag_enabled = !self.drag_enabled;
            info!("{} drag enabled: {}", self.tag, self.drag_enabled);
        }
        if input.key_down(Key::SpeedUp) {
            self.move_speed *= 2.0;
            info!("{} move speed: {}", self.tag, self.move_speed);
        }
        if input.key_down(Key::SlowDown) {
            self.move_speed /= 2.0;
            info!("{} move speed: {}", self.tag, self.move_speed);
        }
        if input.key_down(Key::ToggleFirstPerson) {
            let first_person = !*self.is_first_person.read();
            self.is_first_person.write(ownership, first_person)?;
            info!("{} first person: {}", self.tag, first_person);
        }
        Ok(())
    }
}
