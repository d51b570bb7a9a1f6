pub mod client;
pub mod known_peers;

pub use client::DirectoryClient;
pub use known_peers::{KnownPeer, KnownPeers};
