pub mod client;
pub mod frame;
pub mod server;

use serde::{Deserialize, Serialize};

use crate::content::FileMetadata;
use crate::error::WireError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "command")]
pub enum WireRequest {
    #[serde(rename = "GET_CHUNK")]
    GetChunk { file_name: String, chunk_index: u32 },
    #[serde(rename = "FILE_INFO")]
    FileInfo { file_name: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ChunkReply {
    Success { chunk_size: usize },
    Error {
        error_code: String,
        #[serde(default)]
        message: Option<String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum FileInfoReply {
    Success { metadata: FileMetadata },
    Error {
        error_code: String,
        #[serde(default)]
        message: Option<String>,
    },
}

/// renders a [`WireError`] as the `{status: "error", error_code, message}`
/// header spec.md 4.3 defines, using [`WireError::code`] for `error_code`
/// so the wire error code and the error's `Display` text can never drift
/// out of sync with each other.
pub fn error_reply(err: &WireError) -> serde_json::Value {
    serde_json::json!({
        "status": "error",
        "error_code": err.code(),
        "message": err.to_string(),
    })
}
