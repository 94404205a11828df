//! Agent lifecycle management for the authority
//!
//! The manager owns the authoritative agent population and decides, once per
//! tick, whether to spawn a new agent and which live agents die:
//! - Initial population up to `initial_count`, still capped by `max_population`
//! - One Bernoulli spawn trial per tick once the warm-up has elapsed
//! - One independent Bernoulli death trial per agent per tick
//! - Rejection-sampled placement keeping `min_spawn_distance` between agents
//!
//! Per-tick trials give exponentially distributed gaps between events. The
//! random source is seedable so runs can be replayed exactly.
//!
//! Removing an agent from the population and emitting its destruction event
//! happen in one step. Despawned ids are only handed out again after the
//! destruction events have been drained for replication.

use crate::agent::{random_color, random_point_in_disk, Agent};
use log::{debug, info, warn};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use shared::config::{PopulationConfig, WanderConfig};
use shared::protocol::AgentState;
use shared::{EntityId, OwnershipModel, Rgb, SimError, ValueUpdate, Vec3};
use std::collections::{BTreeMap, BTreeSet};

/// Result of one spawn attempt. Neither failure is an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnOutcome {
    Spawned(EntityId),
    /// The population is already at `max_population`.
    CapacityReached,
    /// No candidate satisfied the spacing rule within the retry budget.
    PlacementFailed { attempts: u32 },
}

/// Creation and destruction notices for replication.
#[derive(Debug, Clone, PartialEq)]
pub enum PopulationEvent {
    Spawned {
        id: EntityId,
        position: Vec3,
        color: ValueUpdate<Rgb>,
    },
    Despawned {
        id: EntityId,
    },
}

/// What a single [`AgentLifecycleManager::tick`] did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    pub spawns: Vec<SpawnOutcome>,
    pub despawned: Vec<EntityId>,
}

/// Hands out agent ids, preferring the lowest released one.
#[derive(Debug)]
struct IdAllocator {
    next: u64,
    free: BTreeSet<u64>,
    pending_release: Vec<EntityId>,
}

impl IdAllocator {
    fn new() -> Self {
        Self {
            next: EntityId::FIRST_AGENT,
            free: BTreeSet::new(),
            pending_release: Vec::new(),
        }
    }

    fn allocate(&mut self) -> EntityId {
        if let Some(id) = self.free.pop_first() {
            return EntityId(id);
        }
        let id = EntityId(self.next);
        self.next += 1;
        id
    }

    /// Returns an id that was never published.
    fn unallocate(&mut self, id: EntityId) {
        self.free.insert(id.0);
    }

    fn retire(&mut self, id: EntityId) {
        self.pending_release.push(id);
    }

    fn release_retired(&mut self) {
        for id in self.pending_release.drain(..) {
            self.free.insert(id.0);
        }
    }
}

pub struct AgentLifecycleManager {
    config: PopulationConfig,
    wander: WanderConfig,
    agents: BTreeMap<EntityId, Agent>,
    ids: IdAllocator,
    rng: SmallRng,
    elapsed: f32,
    manual_requests: u32,
    events: Vec<PopulationEvent>,
}

impl AgentLifecycleManager {
    /// Creates an empty population. `seed` makes every random decision replayable.
    pub fn new(config: PopulationConfig, wander: WanderConfig, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::from_entropy(),
        };
        Self {
            config,
            wander,
            agents: BTreeMap::new(),
            ids: IdAllocator::new(),
            rng,
            elapsed: 0.0,
            manual_requests: 0,
            events: Vec::new(),
        }
    }

    pub fn config(&self) -> &PopulationConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.agents.contains_key(&id)
    }

    pub fn agent(&self, id: EntityId) -> Option<&Agent> {
        self.agents.get(&id)
    }

    pub fn agents(&self) -> impl Iterator<Item = &Agent> {
        self.agents.values()
    }

    /// Session time seen by the manager, in seconds.
    pub fn elapsed(&self) -> f32 {
        self.elapsed
    }

    /// Replicated state of every live agent, ordered by id.
    pub fn world_state(&self) -> Vec<AgentState> {
        self.agents.values().map(Agent::state).collect()
    }

    /// Spawns the initial population, stopping early at capacity.
    pub fn initialize(&mut self, ownership: &OwnershipModel) -> Result<Vec<SpawnOutcome>, SimError> {
        let mut outcomes = Vec::with_capacity(self.config.initial_count);
        for _ in 0..self.config.initial_count {
            outcomes.push(self.try_spawn(ownership)?);
        }
        info!(
            "Initial population: {} agent(s) (requested {}, cap {})",
            self.agents.len(),
            self.config.initial_count,
            self.config.max_population
        );
        Ok(outcomes)
    }

    /// Queues one extra spawn attempt for the next tick, still subject to capacity.
    pub fn request_spawn(&mut self) {
        self.manual_requests += 1;
        debug!("Manual spawn requested ({} pending)", self.manual_requests);
    }

    /// One decision step: spawn branch, despawn branch, then wandering.
    pub fn tick(&mut self, ownership: &OwnershipModel, dt: f32) -> Result<TickReport, SimError> {
        self.elapsed += dt;
        let mut report = TickReport::default();

        for _ in 0..std::mem::take(&mut self.manual_requests) {
            report.spawns.push(self.try_spawn(ownership)?);
        }

        if self.elapsed >= self.config.spawn_warmup
            && self.agents.len() < self.config.max_population
            && self.rng.gen::<f32>() < self.config.spawn_chance
        {
            report.spawns.push(self.try_spawn(ownership)?);
        }

        let doomed: Vec<EntityId> = {
            let death_chance = self.config.death_chance;
            let rng = &mut self.rng;
            self.agents
                .keys()
                .copied()
                .filter(|_| rng.gen::<f32>() < death_chance)
                .collect()
        };
        for id in doomed {
            if self.despawn(id) {
                report.despawned.push(id);
            }
        }

        for agent in self.agents.values_mut() {
            agent.tick(dt, &mut self.rng);
        }

        Ok(report)
    }

    /// Attempts one spawn: capacity check, placement, creation.
    pub fn try_spawn(&mut self, ownership: &OwnershipModel) -> Result<SpawnOutcome, SimError> {
        if self.agents.len() >= self.config.max_population {
            debug!("Population at capacity ({}), spawn skipped", self.config.max_population);
            return Ok(SpawnOutcome::CapacityReached);
        }

        match self.find_spawn_point() {
            Some(position) => {
                let id = self.spawn_at(ownership, position)?;
                Ok(SpawnOutcome::Spawned(id))
            }
            None => {
                let attempts = self.config.max_placement_attempts;
                warn!("Could not place an agent after {} attempts", attempts);
                Ok(SpawnOutcome::PlacementFailed { attempts })
            }
        }
    }

    /// Rejection-samples the spawn disk for a point clear of every live agent.
    pub fn find_spawn_point(&mut self) -> Option<Vec3> {
        let center = Vec3::new(0.0, self.config.spawn_height, 0.0);
        for _ in 0..self.config.max_placement_attempts {
            let candidate = random_point_in_disk(&mut self.rng, center, self.config.spawn_radius);
            if self.is_valid_spawn_point(candidate) {
                return Some(candidate);
            }
        }
        None
    }

    /// Whether `candidate` keeps `min_spawn_distance` from every live agent.
    pub fn is_valid_spawn_point(&self, candidate: Vec3) -> bool {
        self.agents
            .values()
            .all(|agent| agent.position().distance(candidate) >= self.config.min_spawn_distance)
    }

    fn spawn_at(&mut self, ownership: &OwnershipModel, position: Vec3) -> Result<EntityId, SimError> {
        let id = self.ids.allocate();
        let color = random_color(&mut self.rng);
        let agent = match Agent::spawn(id, position, color, ownership, self.wander.clone(), &mut self.rng) {
            Ok(agent) => agent,
            Err(e) => {
                self.ids.unallocate(id);
                return Err(e);
            }
        };

        info!("Spawned agent {} at {:?}", id, position);
        self.events.push(PopulationEvent::Spawned {
            id,
            position,
            color: agent.color.latest(),
        });
        self.agents.insert(id, agent);
        Ok(id)
    }

    /// Removes an agent and emits its destruction. Unknown ids are a no-op.
    pub fn despawn(&mut self, id: EntityId) -> bool {
        match self.agents.remove(&id) {
            Some(_) => {
                self.events.push(PopulationEvent::Despawned { id });
                self.ids.retire(id);
                info!("Despawned agent {}", id);
                true
            }
            None => false,
        }
    }

    /// Destroys every live agent. Returns the ids destroyed.
    pub fn teardown(&mut self) -> Vec<EntityId> {
        self.manual_requests = 0;
        let ids: Vec<EntityId> = self.agents.keys().copied().collect();
        for id in &ids {
            self.despawn(*id);
        }
        info!("Population torn down ({} agent(s) destroyed)", ids.len());
        ids
    }

    /// Takes the pending creation/destruction events. Draining them counts as
    /// acknowledging the destructions, so their ids become reusable.
    pub fn drain_events(&mut self) -> Vec<PopulationEvent> {
        self.ids.release_retired();
        std::mem::take(&mut self.events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::PeerId;

    fn authority() -> OwnershipModel {
        OwnershipModel::new(PeerId::HOST)
    }

    fn manager(config: PopulationConfig) -> AgentLifecycleManager {
        AgentLifecycleManager::new(config, WanderConfig::default(), Some(42))
    }

    fn quiet_config() -> PopulationConfig {
        PopulationConfig {
            spawn_chance: 0.0,
            death_chance: 0.0,
            ..PopulationConfig::default()
        }
    }

    #[test]
    fn test_initial_population_capped() {
        let mut population = manager(PopulationConfig {
            max_population: 1,
            initial_count: 3,
            ..quiet_config()
        });

        let outcomes = population.initialize(&authority()).unwrap();

        assert_eq!(population.len(), 1);
        assert!(matches!(outcomes[0], SpawnOutcome::Spawned(_)));
        assert_eq!(outcomes[1], SpawnOutcome::CapacityReached);
        assert_eq!(outcomes[2], SpawnOutcome::CapacityReached);
    }

    #[test]
    fn test_spawn_spacing() {
        let mut population = manager(quiet_config());
        population
            .spawn_at(&authority(), Vec3::new(0.0, 0.5, 0.0))
            .unwrap();

        assert!(!population.is_valid_spawn_point(Vec3::new(1.0, 0.5, 0.0)));
        assert!(population.is_valid_spawn_point(Vec3::new(3.0, 0.5, 0.0)));
        assert!(population.is_valid_spawn_point(Vec3::new(2.0, 0.5, 0.0)));
    }

    #[test]
    fn test_accepted_spawns_respect_spacing() {
        let mut population = manager(PopulationConfig {
            initial_count: 40,
            ..quiet_config()
        });
        population.initialize(&authority()).unwrap();

        let positions: Vec<Vec3> = population.agents().map(|a| a.position()).collect();
        for (i, a) in positions.iter().enumerate() {
            for b in &positions[i + 1..] {
                assert!(a.distance(*b) >= 2.0);
            }
            assert!(a.distance(Vec3::new(0.0, 0.5, 0.0)) <= 20.0 + 1e-4);
        }
    }

    #[test]
    fn test_placement_failure_is_soft() {
        let mut population = manager(PopulationConfig {
            spawn_radius: 0.5,
            ..quiet_config()
        });
        let ownership = authority();

        assert!(matches!(
            population.try_spawn(&ownership).unwrap(),
            SpawnOutcome::Spawned(_)
        ));
        // A 0.5 disk can never hold two agents 2 apart.
        assert_eq!(
            population.try_spawn(&ownership).unwrap(),
            SpawnOutcome::PlacementFailed { attempts: 50 }
        );
        assert_eq!(population.len(), 1);
    }

    #[test]
    fn test_population_never_exceeds_cap() {
        let mut population = manager(PopulationConfig {
            max_population: 5,
            initial_count: 2,
            spawn_warmup: 0.0,
            spawn_chance: 1.0,
            death_chance: 0.05,
            ..PopulationConfig::default()
        });
        let ownership = authority();
        population.initialize(&ownership).unwrap();

        for _ in 0..500 {
            population.request_spawn();
            population.tick(&ownership, 0.02).unwrap();
            assert!(population.len() <= 5);
            population.drain_events();
        }
    }

    #[test]
    fn test_warmup_delays_random_spawns() {
        let mut population = manager(PopulationConfig {
            initial_count: 0,
            spawn_warmup: 1.0,
            spawn_chance: 1.0,
            death_chance: 0.0,
            ..PopulationConfig::default()
        });
        let ownership = authority();

        for _ in 0..3 {
            let report = population.tick(&ownership, 0.25).unwrap();
            assert!(report.spawns.is_empty());
        }
        let report = population.tick(&ownership, 0.25).unwrap();
        assert_eq!(report.spawns.len(), 1);
        assert_eq!(population.len(), 1);
    }

    #[test]
    fn test_manual_spawn_request() {
        let mut population = manager(quiet_config());
        let ownership = authority();

        population.request_spawn();
        let report = population.tick(&ownership, 0.02).unwrap();

        assert!(matches!(report.spawns.as_slice(), [SpawnOutcome::Spawned(_)]));
        assert_eq!(population.len(), 1);
        let report = population.tick(&ownership, 0.02).unwrap();
        assert!(report.spawns.is_empty());
    }

    #[test]
    fn test_despawn_absent_id_is_noop() {
        let mut population = manager(quiet_config());
        let ownership = authority();
        let id = match population.try_spawn(&ownership).unwrap() {
            SpawnOutcome::Spawned(id) => id,
            other => panic!("expected spawn, got {:?}", other),
        };
        population.drain_events();

        assert!(population.despawn(id));
        assert!(!population.despawn(id));
        assert!(!population.despawn(EntityId(9999)));
        assert_eq!(population.drain_events(), vec![PopulationEvent::Despawned { id }]);
    }

    #[test]
    fn test_death_removes_and_emits_together() {
        let mut population = manager(PopulationConfig {
            initial_count: 4,
            death_chance: 1.0,
            spawn_chance: 0.0,
            ..PopulationConfig::default()
        });
        let ownership = authority();
        population.initialize(&ownership).unwrap();
        population.drain_events();

        let report = population.tick(&ownership, 0.02).unwrap();

        assert_eq!(report.despawned.len(), 4);
        assert!(population.is_empty());
        let events = population.drain_events();
        assert_eq!(events.len(), 4);
        for id in report.despawned {
            assert!(events.contains(&PopulationEvent::Despawned { id }));
        }
    }

    #[test]
    fn test_ids_reused_only_after_drain() {
        let mut population = manager(quiet_config());
        let ownership = authority();
        population.request_spawn();
        population.tick(&ownership, 0.02).unwrap();
        let first = population.agents().map(|a| a.id()).next().unwrap();
        assert_eq!(first, EntityId(EntityId::FIRST_AGENT));

        population.despawn(first);
        population.request_spawn();
        population.tick(&ownership, 0.02).unwrap();
        assert!(!population.contains(first));

        population.drain_events();
        population.request_spawn();
        population.tick(&ownership, 0.02).unwrap();
        assert!(population.contains(first));
    }

    #[test]
    fn test_teardown_destroys_everything() {
        let mut population = manager(quiet_config());
        let ownership = authority();
        population.initialize(&ownership).unwrap();
        population.drain_events();
        population.request_spawn();

        let destroyed = population.teardown();

        assert_eq!(destroyed.len(), 3);
        assert!(population.is_empty());
        assert_eq!(population.drain_events().len(), 3);
        let report = population.tick(&ownership, 0.02).unwrap();
        assert!(report.spawns.is_empty());
    }

    #[test]
    fn test_spawn_events_carry_color() {
        let mut population = manager(quiet_config());
        population.initialize(&authority()).unwrap();

        let events = population.drain_events();
        assert_eq!(events.len(), 3);
        for event in events {
            match event {
                PopulationEvent::Spawned { id, color, .. } => {
                    assert_eq!(color.seq, 1);
                    assert_eq!(*population.agent(id).unwrap().color.read(), color.value);
                }
                other => panic!("unexpected event {:?}", other),
            }
        }
    }

    #[test]
    fn test_seeded_runs_are_identical() {
        let run = || {
            let mut population = manager(PopulationConfig {
                spawn_warmup: 0.0,
                spawn_chance: 0.3,
                death_chance: 0.02,
                ..PopulationConfig::default()
            });
            let ownership = authority();
            population.initialize(&ownership).unwrap();
            for _ in 0..200 {
                population.tick(&ownership, 0.02).unwrap();
            }
            population.world_state()
        };
        assert_eq!(run(), run());
    }
}
