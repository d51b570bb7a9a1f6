use thiserror::Error;

#[derive(Debug, Error)]
pub enum ContentStoreError {
    #[error("file {0:?} is not known to this content store")]
    UnknownFile(String),

    #[error("chunk {index} of file {file:?} is not present on disk")]
    ChunkMissing { file: String, index: u32 },

    #[error("file {0:?} is empty, ignoring")]
    EmptyFile(String),

    #[error(
        "not all chunks of file {file:?} are present yet ({have}/{total})"
    )]
    Incomplete {
        file: String,
        have: usize,
        total: usize,
    },

    #[error("reconstructed file {0:?} failed its integrity check")]
    HashMismatch(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum WireError {
    #[error("frame of size {0} exceeds the maximum allowed frame size")]
    FrameTooLarge(usize),

    #[error("unknown command {0:?}")]
    UnknownCommand(String),

    #[error("chunk {index} of file {file:?} not found")]
    ChunkNotFound { file: String, index: u32 },

    #[error("file {0:?} not found")]
    FileNotFound(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl WireError {
    pub fn code(&self) -> &'static str {
        match self {
            WireError::UnknownCommand(_) => "UNKNOWN_COMMAND",
            WireError::ChunkNotFound { .. } => "CHUNK_NOT_FOUND",
            WireError::FileNotFound(_) => "FILE_NOT_FOUND",
            WireError::FrameTooLarge(_) => "FRAME_TOO_LARGE",
            WireError::Json(_) => "PROCESSING_ERROR",
            WireError::Io(_) => "IO_ERROR",
        }
    }
}
