//! Interfaces to the collaborators the simulation drives but does not own:
//! physics integration, raw input, viewport output and the message overlay.
//! The network transport interface lives in [`crate::transport`].

use crate::types::{AvatarTag, EntityId};
use glam::{Quat, Vec3};

/// How a force vector is applied to a body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForceMode {
    /// Continuous force, integrated over the next step.
    Force,
    /// Instantaneous change in momentum.
    Impulse,
}

/// Per-entity access to a rigid-body world.
///
/// Accessors return `None` when the body does not exist; callers treat that
/// as a missing dependency.
pub trait PhysicsWorld {
    /// Creates a sphere body for `body` at `position`.
    fn add_body(&mut self, body: EntityId, position: Vec3, radius: f32);

    /// Switches a body between integrated and externally positioned.
    /// Remote-owned avatars are positioned by replication only.
    fn set_simulated(&mut self, body: EntityId, simulated: bool);

    fn apply_force(&mut self, body: EntityId, force: Vec3, mode: ForceMode);

    fn apply_impulse(&mut self, body: EntityId, impulse: Vec3) {
        self.apply_force(body, impulse, ForceMode::Impulse);
    }

    /// Casts a ray straight down from `origin`; returns the hit distance.
    fn raycast_down(&self, origin: Vec3, max_distance: f32) -> Option<f32>;

    fn velocity(&self, body: EntityId) -> Option<Vec3>;

    fn set_velocity(&mut self, body: EntityId, velocity: Vec3);

    /// Rescales the body's velocity so its magnitude does not exceed `max_speed`.
    fn clamp_velocity(&mut self, body: EntityId, max_speed: f32) {
        if let Some(velocity) = self.velocity(body) {
            if velocity.length() > max_speed {
                self.set_velocity(body, velocity.normalize() * max_speed);
            }
        }
    }

    fn position(&self, body: EntityId) -> Option<Vec3>;

    fn set_position(&mut self, body: EntityId, position: Vec3);

    fn set_drag(&mut self, body: EntityId, drag: f32);

    /// Advances the world by `dt` seconds.
    fn step(&mut self, dt: f32);
}

/// Analog input axes in `[-1, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
    Horizontal,
    Vertical,
}

/// Discrete triggers bound by the avatar controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Key {
    Jump,
    ShowMessage,
    ToggleDrag,
    SpeedUp,
    SlowDown,
    ToggleFirstPerson,
}

impl Key {
    pub const ALL: [Key; 6] = [
        Key::Jump,
        Key::ShowMessage,
        Key::ToggleDrag,
        Key::SpeedUp,
        Key::SlowDown,
        Key::ToggleFirstPerson,
    ];
}

/// Raw input polled once per tick.
pub trait InputSource {
    fn axis(&self, axis: Axis) -> f32;
    /// True only on the tick the key went down.
    fn key_down(&self, key: Key) -> bool;
    /// True on every tick the key is held.
    fn key_held(&self, key: Key) -> bool;
}

/// Receiver of a viewpoint's transform (a camera in a rendering front end).
pub trait ViewportSink {
    fn set_position(&mut self, position: Vec3);
    fn set_rotation(&mut self, rotation: Quat);
    fn set_active(&mut self, active: bool);
}

/// Displays or hides an avatar's floating message.
pub trait MessageOverlay {
    fn set_message_visible(&mut self, avatar: AvatarTag, visible: bool);
}

/// Input source that never reports anything; used on ticks without a local player.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoInput;

impl InputSource for NoInput {
    fn axis(&self, _axis: Axis) -> f32 {
        0.0
    }

    fn key_down(&self, _key: Key) -> bool {
        false
    }

    fn key_held(&self, _key: Key) -> bool {
        false
    }
}
