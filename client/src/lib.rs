//! # Room Client Library
//!
//! A headless client for the arena room server. It speaks the same
//! newline-delimited JSON protocol as the game client, without any rendering,
//! which makes it useful for probing a running server and for driving
//! end-to-end tests.
//!
//! ## Module Organization
//!
//! ### Network Module (`network`)
//! [`NetworkClient`] owns the TCP connection:
//! - Connects and waits for the `player_id` greeting
//! - Typed `send_*` helpers for every message a player can send
//! - Receives decoded [`shared::Packet`]s, reassembling compressed and
//!   chunked frames transparently
//!
//! ### Game Module (`game`)
//! [`ClientState`] folds server packets into a mirror of the room: the other
//! players, the room flags, the selected map and the latest enemy and boss
//! snapshots. It never simulates enemies; those only come from the server.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::{ClientState, NetworkClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut network = NetworkClient::connect("127.0.0.1:12345").await?;
//!     let mut state = ClientState::new();
//!     network.send_character_selection("knight", "Ann").await?;
//!
//!     while let Some(packet) = network.recv().await? {
//!         state.apply(&packet);
//!     }
//!     Ok(())
//! }
//! ```

pub mod game;
pub mod network;

pub use game::{ClientState, RemotePlayer};
pub use network::{ClientError, NetworkClient};
