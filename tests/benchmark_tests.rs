//! Performance benchmarks for the per-tick hot paths

use server::game::AuthorityGame;
use server::population::AgentLifecycleManager;
use shared::config::{PopulationConfig, WanderConfig};
use shared::input::InputManager;
use shared::physics::KinematicWorld;
use shared::protocol::{decode, encode};
use shared::view::ViewportSinks;
use shared::{NoInput, OwnershipModel, Packet, PeerId, PeerWorld, Role, SimConfig};
use std::time::Instant;

fn full_population() -> PopulationConfig {
    PopulationConfig {
        initial_count: 50,
        max_population: 50,
        spawn_warmup: 0.0,
        spawn_chance: 0.5,
        death_chance: 0.01,
        ..PopulationConfig::default()
    }
}

/// Benchmarks population ticks at the maximum population
#[test]
fn benchmark_population_tick() {
    let ownership = OwnershipModel::new(PeerId::HOST);
    let mut population =
        AgentLifecycleManager::new(full_population(), WanderConfig::default(), Some(1));
    population.initialize(&ownership).unwrap();

    let iterations = 10_000;
    let start = Instant::now();

    for _ in 0..iterations {
        population.tick(&ownership, 0.02).unwrap();
        population.drain_events();
    }

    let duration = start.elapsed();
    println!(
        "Population tick: {} iterations in {:?} ({:.2} μs/iter)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    assert!(population.len() <= 50);
    // Should complete in under 2 seconds
    assert!(duration.as_millis() < 2000);
}

/// Benchmarks rejection-sampled spawn placement in a crowded disk
#[test]
fn benchmark_spawn_placement() {
    let mut population =
        AgentLifecycleManager::new(full_population(), WanderConfig::default(), Some(2));
    let ownership = OwnershipModel::new(PeerId::HOST);
    population.initialize(&ownership).unwrap();

    let iterations = 10_000;
    let start = Instant::now();

    for _ in 0..iterations {
        let _ = population.find_spawn_point();
    }

    let duration = start.elapsed();
    println!(
        "Spawn placement: {} iterations in {:?} ({:.2} μs/iter)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    assert!(duration.as_millis() < 2000);
}

/// Benchmarks world state encoding and decoding at full population
#[test]
fn benchmark_world_state_codec() {
    let ownership = OwnershipModel::new(PeerId::HOST);
    let mut population =
        AgentLifecycleManager::new(full_population(), WanderConfig::default(), Some(3));
    population.initialize(&ownership).unwrap();
    let packet = Packet::WorldState {
        tick: 1,
        agents: population.world_state(),
    };

    let iterations = 10_000;
    let start = Instant::now();

    for _ in 0..iterations {
        let bytes = encode(&packet).unwrap();
        let _ = decode(&bytes).unwrap();
    }

    let duration = start.elapsed();
    println!(
        "World state codec: {} iterations in {:?} ({:.2} μs/iter)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    // A full roster must still fit one datagram
    assert!(encode(&packet).unwrap().len() <= shared::protocol::MAX_PACKET_SIZE);
    assert!(duration.as_millis() < 2000);
}

/// Benchmarks avatar control and physics for both avatars
#[test]
fn benchmark_avatar_world_tick() {
    let mut world = PeerWorld::new(
        Role::Host,
        PeerId::HOST,
        &SimConfig::default(),
        KinematicWorld::arena(),
        ViewportSinks::default(),
    );
    let mut input = InputManager::new();
    input.set_axes(1.0, 0.5);

    let iterations = 50_000;
    let start = Instant::now();

    for _ in 0..iterations {
        world.fixed_update(&input, 0.02);
        let _ = world.outbound();
    }

    let duration = start.elapsed();
    println!(
        "Avatar world tick: {} iterations in {:?} ({:.2} μs/iter)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    assert!(duration.as_millis() < 2000);
}

/// Benchmarks a complete authoritative tick with a full population
#[test]
fn benchmark_authority_step() {
    let config = SimConfig {
        population: full_population(),
        ..SimConfig::default()
    };
    let mut game = AuthorityGame::with_arena(&config, Some(4), ViewportSinks::default());
    game.start().unwrap();

    let iterations = 5_000;
    let start = Instant::now();

    for _ in 0..iterations {
        game.step(&NoInput, 0.02);
        game.drain_outbox();
    }

    let duration = start.elapsed();
    println!(
        "Authority step: {} iterations in {:?} ({:.2} μs/iter)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    assert_eq!(game.tick(), iterations);
    assert!(duration.as_millis() < 3000);
}
