//! # Arena Room Server Library
//!
//! This library provides the authoritative server for a small cooperative
//! platformer room. Players simulate their own characters and report them;
//! the server owns every enemy and boss, runs their AI and physics, and
//! broadcasts full snapshots so every client renders the same world.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative Enemies
//! Enemies and bosses exist only in the [`game::WorldPool`]. Clients report
//! damage; the server decides health, death and respawn. Enemy ids are
//! derived from the map they were spawned from, so reloading a map never
//! duplicates them.
//!
//! ### Room Management
//! The first connection is the host. Only the host may upload maps, select
//! maps and start the game. When the host leaves, the room is disbanded:
//! everyone is told why, and the server shuts down after a short grace
//! period.
//!
//! ### Relaying
//! Player movement, character choices and player projectiles are relayed to
//! the other players with the sender's id attached.
//!
//! ## Architecture Design
//!
//! ### Task Per Connection
//! Every TCP connection gets a reader task, which decodes frames and routes
//! them, and a writer task, which drains that connection's outbound queue.
//! A slow socket only ever backs up its own queue.
//!
//! ### One Ticking Updater
//! A single scheduler task advances the simulation at a fixed rate using the
//! measured frame delta, and on its own timer broadcasts `enemies_sync` and
//! `bosses_sync` snapshots.
//!
//! ### Shared State
//! The pool, the roster and the room controller live in one
//! [`context::ServerContext`]. Each is behind its own lock and no code path
//! holds two of them at once.
//!
//! ## Module Organization
//!
//! - `physics`: vectors, rectangles, platform collision and world bounds
//! - `entity`: players, enemies, bosses and their snapshots
//! - `ai`: per-tick enemy and boss behavior with per-entity failure isolation
//! - `game`: the world pool
//! - `client_manager`: connection roster and broadcast fan-out
//! - `router`: handlers for every client message
//! - `room`: room lifecycle and the shutdown signal
//! - `scheduler`: simulation tick and snapshot broadcast
//! - `network`: accept loop, connection tasks and disconnect handling
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::network::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = Server::bind(ServerConfig::default()).await?;
//!     let shutdown = server.shutdown_handle();
//!     tokio::spawn(async move {
//!         let _ = tokio::signal::ctrl_c().await;
//!         shutdown.trigger();
//!     });
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod ai;
pub mod client_manager;
pub mod config;
pub mod context;
pub mod entity;
pub mod error;
pub mod game;
pub mod network;
pub mod physics;
pub mod room;
pub mod router;
pub mod scheduler;
pub mod utils;

pub use config::ServerConfig;
pub use error::ServerError;
pub use network::Server;
