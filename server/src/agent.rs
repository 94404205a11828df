//! Autonomous agents and their wandering behaviour.
//!
//! Agents only exist as simulated entities on the authority. Their position
//! is published every tick in the world state; their colour is a replicated
//! value written once at spawn.

use rand::Rng;
use shared::config::WanderConfig;
use shared::protocol::AgentState;
use shared::{EntityId, OwnershipModel, Replicated, Rgb, SimError, Vec3, WritePermission};
use std::f32::consts::TAU;

/// Where an agent is in its wander cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WanderPhase {
    /// Heading toward the current target.
    Moving,
    /// Arrived; waiting for the retarget timer.
    Idle,
}

/// Uniform sample inside a horizontal disk around `center` (same height).
pub fn random_point_in_disk<R: Rng + ?Sized>(rng: &mut R, center: Vec3, radius: f32) -> Vec3 {
    let angle = rng.gen_range(0.0..TAU);
    // sqrt keeps the density uniform over the area instead of bunching at the centre.
    let distance = radius * rng.gen::<f32>().sqrt();
    center + Vec3::new(angle.cos() * distance, 0.0, angle.sin() * distance)
}

/// Moves `current` toward `target` by at most `max_delta`, never overshooting.
pub fn step_towards(current: Vec3, target: Vec3, max_delta: f32) -> Vec3 {
    let offset = target - current;
    let distance = offset.length();
    if distance <= max_delta || distance == 0.0 {
        target
    } else {
        current + offset / distance * max_delta
    }
}

/// Random saturated colour for a new agent.
pub fn random_color<R: Rng + ?Sized>(rng: &mut R) -> Rgb {
    Rgb::from_hsv(
        rng.gen_range(0.0..=1.0),
        rng.gen_range(0.5..=1.0),
        rng.gen_range(0.5..=1.0),
    )
}

#[derive(Debug, Clone)]
pub struct AgentBehavior {
    target: Vec3,
    timer: f32,
    config: WanderConfig,
}

impl AgentBehavior {
    /// Starts wandering from `origin` with a freshly picked target.
    pub fn new<R: Rng + ?Sized>(origin: Vec3, config: WanderConfig, rng: &mut R) -> Self {
        let mut behavior = Self {
            target: origin,
            timer: 0.0,
            config,
        };
        behavior.retarget(origin, rng);
        behavior
    }

    pub fn target(&self) -> Vec3 {
        self.target
    }

    pub fn timer(&self) -> f32 {
        self.timer
    }

    pub fn phase(&self, position: Vec3) -> WanderPhase {
        if position.distance(self.target) <= f32::EPSILON {
            WanderPhase::Idle
        } else {
            WanderPhase::Moving
        }
    }

    fn retarget<R: Rng + ?Sized>(&mut self, from: Vec3, rng: &mut R) {
        self.target = random_point_in_disk(rng, from, self.config.move_radius);
        self.timer = self.config.move_interval;
    }

    /// Advances the timer and returns the agent's next position.
    pub fn tick<R: Rng + ?Sized>(&mut self, position: Vec3, dt: f32, rng: &mut R) -> Vec3 {
        self.timer -= dt;
        if self.timer <= 0.0 {
            self.retarget(position, rng);
        }
        step_towards(position, self.target, self.config.speed * dt)
    }
}

#[derive(Debug)]
pub struct Agent {
    id: EntityId,
    position: Vec3,
    pub color: Replicated<Rgb>,
    behavior: AgentBehavior,
}

impl Agent {
    /// Creates an agent and writes its colour as the authority.
    pub fn spawn<R: Rng + ?Sized>(
        id: EntityId,
        position: Vec3,
        color: Rgb,
        ownership: &OwnershipModel,
        wander: WanderConfig,
        rng: &mut R,
    ) -> Result<Self, SimError> {
        let mut replicated = Replicated::new(id, WritePermission::Authority, Rgb::WHITE);
        replicated.write(ownership, color)?;
        Ok(Self {
            id,
            position,
            color: replicated,
            behavior: AgentBehavior::new(position, wander, rng),
        })
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub fn behavior(&self) -> &AgentBehavior {
        &self.behavior
    }

    pub fn tick<R: Rng + ?Sized>(&mut self, dt: f32, rng: &mut R) {
        self.position = self.behavior.tick(self.position, dt, rng);
    }

    pub fn state(&self) -> AgentState {
        AgentState {
            id: self.id,
            position: self.position,
            color: self.color.latest(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;
    use shared::PeerId;

    fn rng() -> SmallRng {
        SmallRng::seed_from_u64(7)
    }

    #[test]
    fn test_step_towards_never_overshoots() {
        let start = Vec3::new(0.0, 0.5, 0.0);
        let target = Vec3::new(1.0, 0.5, 0.0);

        let halfway = step_towards(start, target, 0.5);
        assert_approx_eq!(halfway.x, 0.5, 1e-6);

        let arrived = step_towards(start, target, 3.0);
        assert_eq!(arrived, target);
        assert_eq!(step_towards(target, target, 1.0), target);
    }

    #[test]
    fn test_random_point_in_disk_stays_inside() {
        let mut rng = rng();
        let center = Vec3::new(1.0, 0.5, -2.0);
        for _ in 0..1000 {
            let point = random_point_in_disk(&mut rng, center, 2.0);
            assert!(point.distance(center) <= 2.0 + 1e-5);
            assert_eq!(point.y, 0.5);
        }
    }

    #[test]
    fn test_random_color_in_range() {
        let mut rng = rng();
        for _ in 0..100 {
            let color = random_color(&mut rng);
            for channel in [color.r, color.g, color.b] {
                assert!((0.0..=1.0).contains(&channel));
            }
            // Value is at least 0.5, so the brightest channel is too.
            assert!(color.r.max(color.g).max(color.b) >= 0.5 - 1e-5);
        }
    }

    #[test]
    fn test_behavior_retargets_after_interval() {
        let mut rng = rng();
        let origin = Vec3::new(0.0, 0.5, 0.0);
        let mut behavior = AgentBehavior::new(origin, WanderConfig::default(), &mut rng);
        let first_target = behavior.target();
        assert!(first_target.distance(origin) <= 2.0 + 1e-5);
        assert_eq!(behavior.timer(), 1.0);

        let mut position = origin;
        for _ in 0..3 {
            position = behavior.tick(position, 0.25, &mut rng);
        }
        assert_eq!(behavior.target(), first_target);

        position = behavior.tick(position, 0.25, &mut rng);
        assert_ne!(behavior.target(), first_target);
        assert_eq!(behavior.timer(), 1.0);
        assert!(behavior.target().distance(position) <= 2.0 + 1e-5);
    }

    #[test]
    fn test_behavior_moves_at_constant_speed() {
        let mut rng = rng();
        let origin = Vec3::new(0.0, 0.5, 0.0);
        let mut behavior = AgentBehavior::new(origin, WanderConfig::default(), &mut rng);

        let next = behavior.tick(origin, 0.02, &mut rng);
        let travelled = next.distance(origin);
        let remaining = origin.distance(behavior.target());
        assert!(travelled <= 3.0 * 0.02 + 1e-5);
        assert_approx_eq!(travelled, remaining.min(0.06), 1e-5);
    }

    #[test]
    fn test_behavior_idles_at_target() {
        let mut rng = rng();
        let origin = Vec3::new(0.0, 0.5, 0.0);
        let mut behavior = AgentBehavior::new(origin, WanderConfig::default(), &mut rng);

        // Fewer than 1s of ticks at 3 u/s always covers a 2 u radius.
        let mut position = origin;
        for _ in 0..45 {
            position = behavior.tick(position, 0.02, &mut rng);
        }
        assert_eq!(behavior.phase(position), WanderPhase::Idle);
        assert_eq!(behavior.phase(origin + Vec3::X * 10.0), WanderPhase::Moving);
    }

    #[test]
    fn test_agent_color_is_authority_written() {
        let mut rng = rng();
        let host = OwnershipModel::new(PeerId::HOST);
        let color = Rgb::new(0.9, 0.1, 0.1);

        let agent = Agent::spawn(
            EntityId(16),
            Vec3::new(0.0, 0.5, 0.0),
            color,
            &host,
            WanderConfig::default(),
            &mut rng,
        )
        .unwrap();

        assert_eq!(*agent.color.read(), color);
        assert_eq!(agent.state().color.seq, 1);

        let replica = OwnershipModel::new(PeerId(1));
        let result = Agent::spawn(
            EntityId(17),
            Vec3::ZERO,
            color,
            &replica,
            WanderConfig::default(),
            &mut rng,
        );
        assert!(matches!(result, Err(SimError::OwnershipViolation { .. })));
    }
}
