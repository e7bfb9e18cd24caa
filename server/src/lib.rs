//! # Superfarmer Server Library
//!
//! This library provides the authoritative server for multiplayer Superfarmer:
//! players breed animals by rolling two dice, fend off the fox and the wolf with
//! dogs, trade with the shared bank and with each other, and race to own one of
//! every farm animal.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative Rules
//! Every roll, exchange and trade is validated and applied on the server. A
//! rejected intent changes nothing and is reported only to the connection that
//! sent it.
//!
//! ### Rooms
//! Players gather in named rooms of up to four. A room starts its game once at
//! least two seated players are ready, and is deleted when the last player
//! leaves.
//!
//! ### Event Fan-Out
//! Successful intents produce events for every connection subscribed to the
//! room, carrying full room snapshots so clients never have to merge partial
//! state.
//!
//! ## Architecture Design
//!
//! ### Single-Threaded Event Loop
//! All room state is owned by the [`gateway::Gateway`] inside the main loop of
//! [`network::Server`]. Intents are applied one at a time, so two players racing
//! for the same turn are simply serialized and the loser gets an error.
//!
//! ### UDP-Based Communication
//! One bincode-encoded packet per datagram. Clients `Connect` first and keep the
//! connection alive with any packet; silence longer than the configured timeout
//! counts as a disconnect.
//!
//! ## Module Organization
//!
//! - `registry`: rooms, seats, subscribers and the lobby/active phase
//! - `game`: dice, breeding, predators, bank exchange, trades and turn order
//! - `directory`: player identities issued by `RegisterPlayer`
//! - `gateway`: maps connections to sessions and intents to events
//! - `client_manager`: live connections, addresses and timeouts
//! - `network`: UDP socket tasks and the main loop
//! - `error`: the rejection taxonomy
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::network::{Server, ServerConfig};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), server::network::BoxError> {
//!     let mut server = Server::new(ServerConfig {
//!         addr: "127.0.0.1:8080".to_string(),
//!         max_clients: 256,
//!         client_timeout: Duration::from_secs(10),
//!         seed: None,
//!     })
//!     .await?;
//!
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod client_manager;
pub mod directory;
pub mod error;
pub mod game;
pub mod gateway;
pub mod network;
pub mod registry;
pub mod utils;
