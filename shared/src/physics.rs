//! Kinematic physics world: gravity, drag and static platforms for the avatar bodies.

use crate::capabilities::{ForceMode, PhysicsWorld};
use crate::types::EntityId;
use glam::Vec3;
use std::collections::HashMap;

pub const GRAVITY: f32 = 9.81;

/// Represents a static box the bodies can stand on.
#[derive(Debug, Clone, Copy)]
pub struct Platform {
    /// The positional center of the box.
    pub center: Vec3,
    pub half_extents: Vec3,
}

impl Platform {
    pub fn top(&self) -> f32 {
        self.center.y + self.half_extents.y
    }

    /// Whether a point lies over (or under) the box footprint.
    pub fn covers(&self, point: Vec3) -> bool {
        (point.x - self.center.x).abs() <= self.half_extents.x
            && (point.z - self.center.z).abs() <= self.half_extents.z
    }
}

/// Represents a dynamic sphere with unit mass.
#[derive(Debug, Clone, Copy)]
pub struct Body {
    pub position: Vec3,
    pub velocity: Vec3,
    pub radius: f32,
    pub drag: f32,
    /// Bodies driven by replication are moved by `set_position` only.
    pub simulated: bool,
    force: Vec3,
    impulse: Vec3,
}

impl Body {
    pub fn new(position: Vec3, radius: f32) -> Self {
        Self {
            position,
            velocity: Vec3::ZERO,
            radius,
            drag: 0.0,
            simulated: true,
            force: Vec3::ZERO,
            impulse: Vec3::ZERO,
        }
    }

    /// Simulates physics on the body.
    fn simulate(&mut self, dt: f32) {
        let acceleration = self.force - Vec3::Y * GRAVITY;
        self.velocity += acceleration * dt + self.impulse;
        // Linear damping, same shape as a rigid body's drag coefficient.
        self.velocity *= 1.0 / (1.0 + self.drag * dt);
        self.position += self.velocity * dt;

        self.force = Vec3::ZERO;
        self.impulse = Vec3::ZERO;
    }

    /// Rests the body on the highest platform it sank into. Returns true on contact.
    fn resolve_ground(&mut self, platforms: &[Platform], previous_bottom: f32) -> bool {
        let bottom = self.position.y - self.radius;
        let support = platforms
            .iter()
            .filter(|p| p.covers(self.position))
            .map(Platform::top)
            .filter(|top| bottom <= *top && previous_bottom >= *top - self.radius)
            .fold(None, |best: Option<f32>, top| {
                Some(best.map_or(top, |b| b.max(top)))
            });

        match support {
            Some(top) => {
                self.position.y = top + self.radius;
                if self.velocity.y < 0.0 {
                    self.velocity.y = 0.0;
                }
                true
            }
            None => false,
        }
    }
}

/// A minimal rigid-body world: unit-mass spheres over static boxes.
#[derive(Debug, Clone, Default)]
pub struct KinematicWorld {
    bodies: HashMap<EntityId, Body>,
    platforms: Vec<Platform>,
}

impl KinematicWorld {
    pub fn new() -> Self {
        Self::default()
    }

    /// The default arena: a 50x50 slab whose top surface is at y = 0.
    pub fn arena() -> Self {
        let mut world = Self::new();
        world.add_platform(Platform {
            center: Vec3::new(0.0, -0.5, 0.0),
            half_extents: Vec3::new(25.0, 0.5, 25.0),
        });
        world
    }

    pub fn add_platform(&mut self, platform: Platform) {
        self.platforms.push(platform);
    }

    pub fn body(&self, id: EntityId) -> Option<&Body> {
        self.bodies.get(&id)
    }
}

impl PhysicsWorld for KinematicWorld {
    fn add_body(&mut self, id: EntityId, position: Vec3, radius: f32) {
        self.bodies.insert(id, Body::new(position, radius));
    }

    fn set_simulated(&mut self, id: EntityId, simulated: bool) {
        if let Some(body) = self.bodies.get_mut(&id) {
            body.simulated = simulated;
            if !simulated {
                body.force = Vec3::ZERO;
                body.impulse = Vec3::ZERO;
            }
        }
    }

    fn apply_force(&mut self, body: EntityId, force: Vec3, mode: ForceMode) {
        if let Some(body) = self.bodies.get_mut(&body) {
            match mode {
                ForceMode::Force => body.force += force,
                ForceMode::Impulse => body.impulse += force,
            }
        }
    }

    fn raycast_down(&self, origin: Vec3, max_distance: f32) -> Option<f32> {
        self.platforms
            .iter()
            .filter(|p| p.covers(origin))
            .map(|p| origin.y - p.top())
            .filter(|distance| *distance >= 0.0 && *distance <= max_distance)
            .fold(None, |best: Option<f32>, d| Some(best.map_or(d, |b| b.min(d))))
    }

    fn velocity(&self, body: EntityId) -> Option<Vec3> {
        self.bodies.get(&body).map(|b| b.velocity)
    }

    fn set_velocity(&mut self, body: EntityId, velocity: Vec3) {
        if let Some(body) = self.bodies.get_mut(&body) {
            body.velocity = velocity;
        }
    }

    fn position(&self, body: EntityId) -> Option<Vec3> {
        self.bodies.get(&body).map(|b| b.position)
    }

    fn set_position(&mut self, body: EntityId, position: Vec3) {
        if let Some(body) = self.bodies.get_mut(&body) {
            body.position = position;
        }
    }

    fn set_drag(&mut self, body: EntityId, drag: f32) {
        if let Some(body) = self.bodies.get_mut(&body) {
            body.drag = drag.max(0.0);
        }
    }

    fn step(&mut self, dt: f32) {
        for body in self.bodies.values_mut().filter(|b| b.simulated) {
            let previous_bottom = body.position.y - body.radius;
            body.simulate(dt);
            body.resolve_ground(&self.platforms, previous_bottom);
        }
    }
}
