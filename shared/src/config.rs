//! Gameplay tunables.
//!
//! Every section has defaults matching the shipped scene, so an empty (or
//! missing) TOML file yields a playable configuration. Session flags such as
//! addresses and tick rate live on the binaries' command lines instead.

use crate::error::SimError;
use crate::protocol::MAX_WORLD_STATE_AGENTS;
use glam::Vec3;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Top-level configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub avatar: AvatarTuning,
    pub population: PopulationConfig,
    pub wander: WanderConfig,
    pub view: ViewConfig,
    pub net: NetConfig,
}

impl SimConfig {
    /// Parses a TOML document; absent keys keep their defaults.
    pub fn from_toml(text: &str) -> Result<Self, SimError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects settings the session could not replicate.
    pub fn validate(&self) -> Result<(), SimError> {
        if self.population.max_population > MAX_WORLD_STATE_AGENTS {
            return Err(SimError::InvalidConfig(format!(
                "population.max_population is {}, but a world state holds at most {} agents",
                self.population.max_population, MAX_WORLD_STATE_AGENTS
            )));
        }
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, SimError> {
        let text = fs::read_to_string(path)?;
        Self::from_toml(&text)
    }
}

/// Avatar controller tunables (local to each peer, never replicated).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AvatarTuning {
    pub move_speed: f32,
    pub max_speed: f32,
    pub jump_force: f32,
    pub ground_check_distance: f32,
    /// Degrees of yaw per second at full horizontal input in first-person mode.
    pub rotation_speed: f32,
    pub grounded_drag: f32,
    pub airborne_drag: f32,
    /// Below this height the avatar is teleported back to `respawn_point`.
    pub fall_threshold: f32,
    pub respawn_point: Vec3,
    pub host_start: Vec3,
    pub client_start: Vec3,
    pub radius: f32,
}

impl Default for AvatarTuning {
    fn default() -> Self {
        Self {
            move_speed: 5.0,
            max_speed: 10.0,
            jump_force: 5.0,
            ground_check_distance: 0.6,
            rotation_speed: 90.0,
            grounded_drag: 0.5,
            airborne_drag: 0.0,
            fall_threshold: -20.0,
            respawn_point: Vec3::new(0.0, 0.5, 0.0),
            host_start: Vec3::new(-2.0, 0.5, 0.0),
            client_start: Vec3::new(2.0, 0.5, 0.0),
            radius: 0.5,
        }
    }
}

/// Agent lifecycle policy.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PopulationConfig {
    pub initial_count: usize,
    pub spawn_radius: f32,
    pub min_spawn_distance: f32,
    pub max_population: usize,
    /// Seconds of session time before random spawning starts.
    pub spawn_warmup: f32,
    /// Per-tick probability of a spawn attempt.
    pub spawn_chance: f32,
    /// Per-tick, per-agent probability of despawning.
    pub death_chance: f32,
    pub max_placement_attempts: u32,
    pub spawn_height: f32,
}

impl Default for PopulationConfig {
    fn default() -> Self {
        Self {
            initial_count: 3,
            spawn_radius: 20.0,
            min_spawn_distance: 2.0,
            max_population: 50,
            spawn_warmup: 10.0,
            spawn_chance: 0.01,
            death_chance: 0.001,
            max_placement_attempts: 50,
            spawn_height: 0.5,
        }
    }
}

/// Per-agent wandering behaviour.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WanderConfig {
    pub speed: f32,
    pub move_interval: f32,
    pub move_radius: f32,
}

impl Default for WanderConfig {
    fn default() -> Self {
        Self {
            speed: 3.0,
            move_interval: 1.0,
            move_radius: 2.0,
        }
    }
}

/// Viewpoint placement for the third-person "soft leash" and first-person modes.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ViewConfig {
    pub x_bounds: (f32, f32),
    pub z_bounds: (f32, f32),
    pub rest_position: Vec3,
    /// Where the avatar stands when the viewpoint is at rest.
    pub avatar_rest_point: Vec3,
    /// Downward tilt of the resting viewpoint, in degrees.
    pub rest_pitch: f32,
    pub first_person_height: f32,
}

impl Default for ViewConfig {
    fn default() -> Self {
        Self {
            x_bounds: (-10.0, 10.0),
            z_bounds: (-10.0, 10.0),
            rest_position: Vec3::new(0.0, 5.0, -10.0),
            avatar_rest_point: Vec3::new(0.0, 0.5, 0.0),
            rest_pitch: 45.0,
            first_person_height: 0.5,
        }
    }
}

/// Transport and session timing.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NetConfig {
    pub port: u16,
    pub host_bind: String,
    pub client_target: String,
    pub peer_timeout_secs: f32,
    pub handshake_timeout_secs: f32,
    pub hello_resend_secs: f32,
    pub heartbeat_secs: f32,
    pub flag_resend_secs: f32,
    pub max_remote_peers: usize,
}

impl NetConfig {
    pub fn peer_timeout(&self) -> Duration {
        Duration::from_secs_f32(self.peer_timeout_secs)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs_f32(self.handshake_timeout_secs)
    }

    pub fn hello_resend(&self) -> Duration {
        Duration::from_secs_f32(self.hello_resend_secs)
    }

    pub fn heartbeat(&self) -> Duration {
        Duration::from_secs_f32(self.heartbeat_secs)
    }

    pub fn flag_resend(&self) -> Duration {
        Duration::from_secs_f32(self.flag_resend_secs)
    }
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            port: crate::DEFAULT_PORT,
            host_bind: crate::HOST_BIND_ADDRESS.to_string(),
            client_target: crate::DEFAULT_CLIENT_TARGET.to_string(),
            peer_timeout_secs: 5.0,
            handshake_timeout_secs: 3.0,
            hello_resend_secs: 0.5,
            heartbeat_secs: 1.0,
            flag_resend_secs: 1.0,
            max_remote_peers: 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_scene() {
        let config = SimConfig::default();
        assert_eq!(config.population.max_population, 50);
        assert_eq!(config.population.initial_count, 3);
        assert_eq!(config.population.max_placement_attempts, 50);
        assert_eq!(config.net.port, 7777);
        assert_eq!(config.net.host_bind, "0.0.0.0");
        assert_eq!(config.view.x_bounds, (-10.0, 10.0));
        assert_eq!(config.avatar.respawn_point, Vec3::new(0.0, 0.5, 0.0));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = SimConfig::from_toml(
            r#"
            [population]
            max_population = 1
            initial_count = 3

            [avatar]
            move_speed = 8.0
            "#,
        )
        .unwrap();

        assert_eq!(config.population.max_population, 1);
        assert_eq!(config.population.initial_count, 3);
        assert_eq!(config.population.spawn_radius, 20.0);
        assert_eq!(config.avatar.move_speed, 8.0);
        assert_eq!(config.avatar.max_speed, 10.0);
        assert_eq!(config.wander.move_radius, 2.0);
    }

    #[test]
    fn test_empty_toml_is_default() {
        let config = SimConfig::from_toml("").unwrap();
        assert_eq!(config.population.spawn_chance, 0.01);
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let result = SimConfig::from_toml("[population]\nmax_population = \"many\"");
        assert!(matches!(result, Err(SimError::Config(_))));
    }

    #[test]
    fn test_population_over_datagram_budget_rejected() {
        let result = SimConfig::from_toml("[population]\nmax_population = 300");
        assert!(matches!(result, Err(SimError::InvalidConfig(_))));

        let at_limit = format!("[population]\nmax_population = {}", MAX_WORLD_STATE_AGENTS);
        assert!(SimConfig::from_toml(&at_limit).is_ok());
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let result = SimConfig::load("/definitely/not/here.toml");
        assert!(matches!(result, Err(SimError::Io(_))));
    }
}
