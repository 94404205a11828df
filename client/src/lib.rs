//! # Client Library
//!
//! The replica side of the two-avatar simulation. A client connects to a
//! host, receives the client avatar through an ownership transfer, and from
//! then on drives that avatar locally while mirroring everything else.
//!
//! ## Architecture Overview
//!
//! ### Handshake
//! The client keeps sending `Hello` until the host answers with `Welcome`
//! (which carries the client's peer id) or `Rejected`, or until the
//! handshake timeout. Failure is reported to the caller, not retried.
//!
//! ### Owner-Driven Avatar
//! Once the host hands over the client avatar, the local controller runs it
//! at the fixed tick rate and publishes its transform and flags. The host
//! avatar is only mirrored from what the host sends.
//!
//! ### Mirrored Population
//! Agents are never simulated here. Spawn and despawn notices keep the
//! roster current, and each `WorldState` from the host reconciles it so a
//! lost notice heals within one tick.
//!
//! ## Module Organization
//!
//! - `game`: replica game state, agent mirrors and the local avatar world
//! - `network`: handshake, tick loop and heartbeats over the transport
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::network::ClientOptions;
//! use shared::{input, SimConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let options = ClientOptions {
//!         server: "127.0.0.1:7777".parse().unwrap(),
//!         tick_rate: 50,
//!         config: SimConfig::default(),
//!     };
//!     if !client::start_as_client(options, input::spawn_console()).await {
//!         eprintln!("Could not join the session");
//!     }
//! }
//! ```
//!
//! ## Design Philosophy
//!
//! ### Single Writer
//! Every replicated value has exactly one writer. The client writes only
//! what it owns and drops anything that is not newer than what it holds.
//!
//! ### Graceful Degradation
//! Missing viewports or overlays are logged and the rest keeps running.
//! When the host goes away the session ends cleanly instead of simulating
//! a world nobody owns.

pub mod game;
pub mod network;

use log::error;
use network::{ClientOptions, ClientSession};
use shared::input::ConsoleCommand;
use tokio::sync::mpsc;

/// Joins the host at `options.server` and runs until quit, ctrl-c or the
/// host leaving.
///
/// Returns `false` when the connection or handshake failed.
pub async fn start_as_client(
    options: ClientOptions,
    console: mpsc::UnboundedReceiver<ConsoleCommand>,
) -> bool {
    let server = options.server;
    let mut session = match ClientSession::connect(options).await {
        Ok(session) => session,
        Err(e) => {
            error!("Failed to join {}: {}", server, e);
            return false;
        }
    };

    if let Err(e) = session.run(console).await {
        error!("Client loop failed: {}", e);
    }
    true
}
