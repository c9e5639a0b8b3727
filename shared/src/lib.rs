//! Types and wire format shared by the arena server and its clients.

pub mod codec;
pub mod map;
pub mod protocol;

pub use codec::{decode_payload, encode_frames, encode_message, encode_packet, CodecConfig, CodecError, FrameDecoder};
pub use map::{Coord, EnemyDescriptor, MapDocument, PlatformDescriptor};
pub use protocol::*;

use rand::distributions::Alphanumeric;
use rand::Rng;

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 12345;

/// Resolution that map coordinates and relative player positions are authored against.
pub const REFERENCE_WIDTH: f32 = 1920.0;
pub const REFERENCE_HEIGHT: f32 = 1080.0;
pub const WORLD_WIDTH: f32 = REFERENCE_WIDTH;
pub const WORLD_HEIGHT: f32 = REFERENCE_HEIGHT;

/// Per-frame gravity, in pixels per frame squared at 60 frames per second.
pub const GRAVITY: f32 = 1.2;
pub const FRAME_RATE: f32 = 60.0;

/// Random lowercase alphanumeric token, used for player and chunk ids.
pub fn random_token(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(|c| (c as char).to_ascii_lowercase())
        .collect()
}

/// Number of frames in an entity's animation strip.
pub fn animation_frame_count(entity: &str, animation: &str) -> u32 {
    match (entity, animation) {
        ("slime", _) => 4,
        ("spider", _) | ("vulture", _) => 6,
        ("boss", _) => 1,
        ("player", "idle") => 4,
        ("player", _) => 6,
        _ => 1,
    }
}
