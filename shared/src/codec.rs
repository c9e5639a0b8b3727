//! Newline-delimited JSON framing with optional zlib compression and chunking.
//!
//! Outbound messages larger than the compression threshold are deflated and
//! base64 encoded inside a `compressed_data` envelope, but only when that makes
//! the frame shorter. Anything still above the maximum packet size is split into
//! `chunked_data` envelopes that the receiving [`FrameDecoder`] reassembles.

use crate::protocol::Packet;
use crate::random_token;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use log::{debug, warn};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::io::{Read, Write};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use thiserror::Error;

pub const COMPRESSED_TYPE: &str = "compressed_data";
pub const CHUNKED_TYPE: &str = "chunked_data";

/// Lines longer than this without a terminating newline are dropped.
pub const MAX_LINE_BYTES: usize = 4 * 1024 * 1024;
const MAX_CHUNKS: usize = 4096;
const CHUNK_TTL: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("malformed JSON frame: {0}")]
    Json(#[from] serde_json::Error),
    #[error("frame is not a JSON object")]
    NotAnObject,
    #[error("frame of {0} bytes exceeds the line limit")]
    FrameTooLarge(usize),
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("zlib stream error: {0}")]
    Compression(#[from] std::io::Error),
    #[error("decompressed {actual} bytes but envelope declared {expected}")]
    SizeMismatch { expected: usize, actual: usize },
    #[error("compressed envelope has no data field")]
    MissingData,
    #[error("invalid chunk envelope: {0}")]
    BadChunk(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecConfig {
    pub compression_threshold: usize,
    pub max_packet_size: usize,
    pub chunk_size: usize,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            compression_threshold: 500,
            max_packet_size: 1400,
            chunk_size: 1200,
        }
    }
}

/// Seconds since the unix epoch, as stamped on every outbound message.
pub fn unix_timestamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Stamps `timestamp` on an object message unless present and encodes it into wire frames.
pub fn encode_message(mut value: Value, config: &CodecConfig) -> Result<Vec<Vec<u8>>, CodecError> {
    match value.as_object_mut() {
        Some(object) => {
            object
                .entry("timestamp")
                .or_insert_with(|| json!(unix_timestamp()));
        }
        None => return Err(CodecError::NotAnObject),
    }
    encode_frames(&value, config)
}

pub fn encode_packet(packet: &Packet, config: &CodecConfig) -> Result<Vec<Vec<u8>>, CodecError> {
    encode_message(packet.to_value()?, config)
}

/// Encodes one message into one or more newline-terminated frames.
pub fn encode_frames(value: &Value, config: &CodecConfig) -> Result<Vec<Vec<u8>>, CodecError> {
    let plain = serde_json::to_vec(value)?;

    let payload = if plain.len() > config.compression_threshold {
        let envelope = compress_envelope(value, &plain)?;
        if envelope.len() < plain.len() {
            debug!(
                "Compressed {} message from {} to {} bytes",
                message_type(value),
                plain.len(),
                envelope.len()
            );
            envelope
        } else {
            plain
        }
    } else {
        plain
    };

    if payload.len() + 1 <= config.max_packet_size {
        return Ok(vec![terminate(payload)]);
    }

    split_into_chunks(&payload, message_type(value), config)
}

fn message_type(value: &Value) -> &str {
    value.get("type").and_then(Value::as_str).unwrap_or("unknown")
}

fn terminate(mut payload: Vec<u8>) -> Vec<u8> {
    payload.push(b'\n');
    payload
}

fn compress_envelope(value: &Value, plain: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(plain)?;
    let deflated = encoder.finish()?;

    let envelope = json!({
        "type": COMPRESSED_TYPE,
        "data_type": message_type(value),
        "compressed": true,
        "data": STANDARD.encode(deflated),
        "original_size": plain.len(),
    });
    Ok(serde_json::to_vec(&envelope)?)
}

fn split_into_chunks(payload: &[u8], data_type: &str, config: &CodecConfig) -> Result<Vec<Vec<u8>>, CodecError> {
    // chunk_size bounds the base64 text, so raw slices are three quarters of it
    let raw_len = (config.chunk_size * 3 / 4).max(1);
    let total = (payload.len() + raw_len - 1) / raw_len;
    if total > MAX_CHUNKS {
        return Err(CodecError::BadChunk(format!(
            "message would need {} chunks",
            total
        )));
    }

    let chunk_id = random_token(8);
    let mut frames = Vec::with_capacity(total);
    for (index, piece) in payload.chunks(raw_len).enumerate() {
        let envelope = json!({
            "type": CHUNKED_TYPE,
            "chunk_id": chunk_id,
            "chunk_index": index,
            "total_chunks": total,
            "data_type": data_type,
            "chunk_data": STANDARD.encode(piece),
        });
        frames.push(terminate(serde_json::to_vec(&envelope)?));
    }

    debug!(
        "Split {} message of {} bytes into {} chunks ({})",
        data_type,
        payload.len(),
        total,
        chunk_id
    );
    Ok(frames)
}

/// Parses one complete payload, unwrapping a compression envelope if present.
pub fn decode_payload(bytes: &[u8]) -> Result<Value, CodecError> {
    let value: Value = serde_json::from_slice(bytes)?;
    if !value.is_object() {
        return Err(CodecError::NotAnObject);
    }
    unwrap_compression(value)
}

fn unwrap_compression(value: Value) -> Result<Value, CodecError> {
    if value.get("compressed") != Some(&Value::Bool(true)) {
        return Ok(value);
    }

    let data = value
        .get("data")
        .and_then(Value::as_str)
        .ok_or(CodecError::MissingData)?;
    let deflated = STANDARD.decode(data)?;

    let mut inflated = Vec::new();
    ZlibDecoder::new(deflated.as_slice()).read_to_end(&mut inflated)?;

    if let Some(expected) = value.get("original_size").and_then(Value::as_u64) {
        if expected as usize != inflated.len() {
            return Err(CodecError::SizeMismatch {
                expected: expected as usize,
                actual: inflated.len(),
            });
        }
    }

    let inner: Value = serde_json::from_slice(&inflated)?;
    if !inner.is_object() {
        return Err(CodecError::NotAnObject);
    }
    Ok(inner)
}

fn is_chunk(value: &Value) -> bool {
    value.get("type").and_then(Value::as_str) == Some(CHUNKED_TYPE)
}

struct PartialMessage {
    total: usize,
    pieces: BTreeMap<usize, Vec<u8>>,
    started: Instant,
}

/// Collects `chunked_data` envelopes until every index of a `chunk_id` has arrived.
#[derive(Default)]
pub struct ChunkAssembler {
    partial: HashMap<String, PartialMessage>,
}

impl ChunkAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of chunk sets still waiting for pieces.
    pub fn pending(&self) -> usize {
        self.partial.len()
    }

    /// Accepts one envelope. Returns the reassembled payload once complete.
    pub fn accept(&mut self, envelope: &Value) -> Result<Option<Vec<u8>>, CodecError> {
        self.evict_stale();

        let chunk_id = envelope
            .get("chunk_id")
            .and_then(Value::as_str)
            .ok_or_else(|| CodecError::BadChunk("missing chunk_id".to_string()))?;
        let index = envelope
            .get("chunk_index")
            .and_then(Value::as_u64)
            .ok_or_else(|| CodecError::BadChunk("missing chunk_index".to_string()))? as usize;
        let total = envelope
            .get("total_chunks")
            .and_then(Value::as_u64)
            .ok_or_else(|| CodecError::BadChunk("missing total_chunks".to_string()))? as usize;

        if total == 0 || total > MAX_CHUNKS || index >= total {
            return Err(CodecError::BadChunk(format!(
                "chunk {} of {} is out of range",
                index, total
            )));
        }

        let data = envelope
            .get("chunk_data")
            .and_then(Value::as_str)
            .ok_or_else(|| CodecError::BadChunk("missing chunk_data".to_string()))?;
        let bytes = STANDARD.decode(data)?;

        let entry = self
            .partial
            .entry(chunk_id.to_string())
            .or_insert_with(|| PartialMessage {
                total,
                pieces: BTreeMap::new(),
                started: Instant::now(),
            });

        if entry.total != total {
            return Err(CodecError::BadChunk(format!(
                "chunk set {} changed total from {} to {}",
                chunk_id, entry.total, total
            )));
        }

        entry.pieces.insert(index, bytes);
        if entry.pieces.len() < entry.total {
            return Ok(None);
        }

        let complete = match self.partial.remove(chunk_id) {
            Some(complete) => complete,
            None => return Ok(None),
        };
        Ok(Some(complete.pieces.into_values().flatten().collect()))
    }

    fn evict_stale(&mut self) {
        let before = self.partial.len();
        self.partial
            .retain(|_, message| message.started.elapsed() < CHUNK_TTL);
        let evicted = before - self.partial.len();
        if evicted > 0 {
            warn!("Dropped {} incomplete chunk sets", evicted);
        }
    }
}

/// Incremental reader for newline-delimited frames.
///
/// Feed raw bytes with [`FrameDecoder::extend`] and iterate to pull out decoded
/// messages. Each item is either a message or the error for one bad line; an
/// error never poisons the lines after it.
#[derive(Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    discarding: bool,
    assembler: ChunkAssembler,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Bytes received but not yet terminated by a newline.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    pub fn pending_chunk_sets(&self) -> usize {
        self.assembler.pending()
    }

    fn next_line(&mut self) -> Option<Result<Vec<u8>, CodecError>> {
        loop {
            match self.buffer.iter().position(|b| *b == b'\n') {
                Some(pos) => {
                    let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
                    line.pop();
                    if self.discarding {
                        // tail of an oversized line
                        self.discarding = false;
                        continue;
                    }
                    return Some(Ok(line));
                }
                None => {
                    if self.buffer.len() > MAX_LINE_BYTES {
                        let len = self.buffer.len();
                        self.buffer.clear();
                        if !self.discarding {
                            self.discarding = true;
                            return Some(Err(CodecError::FrameTooLarge(len)));
                        }
                    }
                    return None;
                }
            }
        }
    }

    fn decode_line(&mut self, line: &[u8]) -> Result<Option<Value>, CodecError> {
        let value: Value = serde_json::from_slice(line)?;
        if !value.is_object() {
            return Err(CodecError::NotAnObject);
        }

        if is_chunk(&value) {
            return match self.assembler.accept(&value)? {
                Some(payload) => decode_payload(&payload).map(Some),
                None => Ok(None),
            };
        }

        unwrap_compression(value).map(Some)
    }
}

impl Iterator for FrameDecoder {
    type Item = Result<Value, CodecError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = match self.next_line()? {
                Ok(line) => line,
                Err(e) => return Some(Err(e)),
            };

            let trimmed = line.trim_ascii();
            if trimmed.is_empty() {
                continue;
            }

            match self.decode_line(trimmed) {
                Ok(Some(value)) => return Some(Ok(value)),
                Ok(None) => continue,
                Err(e) => return Some(Err(e)),
            }
        }
    }
}
