//! # Host Library
//!
//! The authoritative side of the two-avatar simulation. The host process owns
//! the host avatar, hands the client avatar to the first peer that connects,
//! and runs the agent population nobody else may touch.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative Simulation
//! Every fixed tick the host drives the avatars it owns (and any ownerless
//! avatar), steps physics, then ticks the population: one spawn trial after
//! the warm-up, one death trial per agent, and a wander step for each
//! survivor.
//!
//! ### Ownership Handover
//! On connect the client avatar is transferred to the new peer and the peer
//! is sent the ownership table, the latest avatar flags and a spawn notice
//! for every live agent, so late joiners see the same world. On disconnect
//! the avatar becomes ownerless and the host simulates it again.
//!
//! ### Replication
//! Owner writes from the client are validated against the ownership table
//! and relayed to any other peers. The host publishes its own avatar state,
//! spawn and despawn notices, and a `WorldState` roster every tick.
//!
//! ## Module Organization
//!
//! - `agent`: wander behaviour and the per-agent replicated colour
//! - `population`: the agent lifecycle manager
//! - `game`: the authoritative game combining avatars and population
//! - `network`: the host session loop over the transport
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::network::HostOptions;
//! use shared::{input, SimConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let options = HostOptions {
//!         bind: "0.0.0.0:7777".parse().unwrap(),
//!         tick_rate: 50,
//!         seed: None,
//!         config: SimConfig::default(),
//!     };
//!     let started = server::start_as_host(options, input::spawn_console()).await;
//!     assert!(started);
//! }
//! ```

pub mod agent;
pub mod game;
pub mod network;
pub mod population;

use log::error;
use network::{HostOptions, HostSession};
use shared::input::ConsoleCommand;
use tokio::sync::mpsc;

/// Starts hosting and runs until quit or ctrl-c.
///
/// Returns `false` when the transport could not be started.
pub async fn start_as_host(
    options: HostOptions,
    console: mpsc::UnboundedReceiver<ConsoleCommand>,
) -> bool {
    let bind = options.bind;
    let mut session = match HostSession::listen(options) {
        Ok(session) => session,
        Err(e) => {
            error!("Failed to host on {}: {}", bind, e);
            return false;
        }
    };

    if let Err(e) = session.run(console).await {
        error!("Host loop failed: {}", e);
    }
    true
}
