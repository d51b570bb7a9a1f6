mod chunk_set;
mod peer_id;

pub use chunk_set::ChunkSet;
pub use peer_id::PeerId;
