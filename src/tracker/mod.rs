pub mod server;
pub mod table;
pub mod wire;

pub use server::TrackerServer;
pub use table::TrackerState;
pub use wire::{TrackerReply, TrackerRequest};
