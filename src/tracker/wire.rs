use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::SocketAddr;

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};

use crate::torrent::ChunkSet;

/// the literal ASCII prefix that marks a datagram payload as zlib-compressed.
pub const COMPRESSED_PREFIX: &[u8] = b"COMPRESSED:";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "command")]
pub enum TrackerRequest {
    #[serde(rename = "REGISTER")]
    Register {
        peer_id: String,
        port: u16,
        timestamp: u64,
    },
    #[serde(rename = "UPDATE")]
    Update {
        peer_id: String,
        files: HashMap<String, ChunkSet>,
        timestamp: u64,
        #[serde(default)]
        port: Option<u16>,
    },
    #[serde(rename = "HEARTBEAT")]
    Heartbeat {
        peer_id: String,
        #[serde(default)]
        port: Option<u16>,
    },
    #[serde(rename = "UNREGISTER")]
    Unregister { peer_id: String },
}

impl TrackerRequest {
    pub fn peer_id(&self) -> &str {
        match self {
            TrackerRequest::Register { peer_id, .. }
            | TrackerRequest::Update { peer_id, .. }
            | TrackerRequest::Heartbeat { peer_id, .. }
            | TrackerRequest::Unregister { peer_id } => peer_id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerView {
    pub addr: SocketAddr,
    pub last_seen: u64,
    pub files: HashMap<String, ChunkSet>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum TrackerReply {
    Success {
        #[serde(default)]
        peers: HashMap<String, PeerView>,
    },
    Error {
        error_code: String,
        message: String,
    },
}

impl TrackerReply {
    pub fn error(error_code: &str, message: impl Into<String>) -> Self {
        Self::Error {
            error_code: error_code.to_string(),
            message: message.into(),
        }
    }
}

/// compresses `payload` with zlib and prepends [`COMPRESSED_PREFIX`] when it
/// exceeds `threshold` bytes; otherwise returns it unchanged. the tracker
/// reference implementation never compresses its own replies, but accepts
/// compressed requests -- see [`decode_datagram`].
pub fn encode_datagram(payload: &[u8], threshold: usize) -> anyhow::Result<Vec<u8>> {
    if payload.len() <= threshold {
        return Ok(payload.to_vec());
    }
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(payload)?;
    let compressed = encoder.finish()?;

    let mut out = Vec::with_capacity(COMPRESSED_PREFIX.len() + compressed.len());
    out.extend_from_slice(COMPRESSED_PREFIX);
    out.extend_from_slice(&compressed);
    Ok(out)
}

/// detects the [`COMPRESSED_PREFIX`] and zlib-decompresses if present;
/// returns the bytes unchanged otherwise.
pub fn decode_datagram(bytes: &[u8]) -> anyhow::Result<Vec<u8>> {
    let Some(compressed) = bytes.strip_prefix(COMPRESSED_PREFIX) else {
        return Ok(bytes.to_vec());
    };
    let mut decoder = ZlibDecoder::new(compressed);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}
