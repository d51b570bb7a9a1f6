use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

/// Tunables shared by the tracker and the peer, defaults taken from the
/// directory protocol / content engine / downloader specification.
#[derive(Debug, Clone)]
pub struct Config {
    pub chunk_size: usize,
    pub peer_timeout: Duration,
    pub cleanup_interval: Duration,
    pub update_interval: Duration,
    pub heartbeat_interval: Duration,
    pub response_timeout: Duration,
    pub max_retry_attempts: u32,
    pub max_concurrent_downloads: usize,
    pub chunk_downloader_threads: usize,
    pub compression_threshold: usize,
}

impl Config {
    pub const CHUNK_SIZE: usize = 1 << 20; // 1 MiB
    pub const PEER_TIMEOUT: Duration = Duration::from_secs(120);
    pub const CLEANUP_INTERVAL: Duration = Duration::from_secs(30);
    pub const UPDATE_INTERVAL: Duration = Duration::from_secs(30);
    pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);
    pub const RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);
    pub const MAX_RETRY_ATTEMPTS: u32 = 3;
    pub const MAX_CONCURRENT_DOWNLOADS: usize = 3;
    pub const CHUNK_DOWNLOADER_THREADS: usize = 5;
    pub const COMPRESSION_THRESHOLD: usize = 1024;

    pub const TRACKER_HANDLER_POOL: usize = 10;
    pub const WIRE_SERVER_POOL: usize = 20;
    pub const WIRE_SERVER_IDLE_TIMEOUT: Duration = Duration::from_secs(30);
    pub const CHUNK_FETCH_TIMEOUT: Duration = Duration::from_secs(15);
    pub const FILE_INFO_TIMEOUT: Duration = Duration::from_secs(10);
    pub const NO_PEER_RETRY_WAIT: Duration = Duration::from_secs(5);
    pub const CONNECTED_GRACE_PERIOD: Duration = Duration::from_secs(90);
    pub const SHUTDOWN_JOIN_TIMEOUT: Duration = Duration::from_secs(3);
    pub const WATCHER_DEBOUNCE: Duration = Duration::from_secs(2);
}

impl Default for Config {
    fn default() -> Self {
        Self {
            chunk_size: Self::CHUNK_SIZE,
            peer_timeout: Self::PEER_TIMEOUT,
            cleanup_interval: Self::CLEANUP_INTERVAL,
            update_interval: Self::UPDATE_INTERVAL,
            heartbeat_interval: Self::HEARTBEAT_INTERVAL,
            response_timeout: Self::RESPONSE_TIMEOUT,
            max_retry_attempts: Self::MAX_RETRY_ATTEMPTS,
            max_concurrent_downloads: Self::MAX_CONCURRENT_DOWNLOADS,
            chunk_downloader_threads: Self::CHUNK_DOWNLOADER_THREADS,
            compression_threshold: Self::COMPRESSION_THRESHOLD,
        }
    }
}

#[derive(Parser, Debug)]
#[command(author, about = "tracker: the central directory server", long_about = None)]
pub struct TrackerArgs {
    /// address to bind the UDP socket to.
    #[arg(long, default_value = "0.0.0.0:6881")]
    pub bind: SocketAddr,

    /// number of worker tasks handling incoming requests concurrently.
    #[arg(long, default_value_t = Config::TRACKER_HANDLER_POOL)]
    pub workers: usize,

    /// log records as compact single lines instead of the pretty multi-line format.
    #[arg(long)]
    pub log_compact: bool,
}

#[derive(Parser, Debug)]
#[command(author, about = "peer: shares a folder and downloads files from other peers", long_about = None)]
pub struct PeerArgs {
    /// human readable, unique identifier for this peer.
    #[arg(long)]
    pub name: String,

    /// folder whose contents are shared with the swarm.
    #[arg(long)]
    pub shared_folder: PathBuf,

    /// address of the tracker to register with.
    #[arg(long, default_value = "127.0.0.1:6881")]
    pub tracker: SocketAddr,

    /// TCP port this peer listens on for GET_CHUNK/FILE_INFO requests.
    /// a random port in [1000, 9999] is chosen when omitted, as the spec allows.
    #[arg(long)]
    pub port: Option<u16>,

    /// log records as compact single lines instead of the pretty multi-line format.
    #[arg(long)]
    pub log_compact: bool,
}

impl PeerArgs {
    pub fn resolve_port(&self) -> u16 {
        self.port
            .unwrap_or_else(|| rand::Rng::gen_range(&mut rand::thread_rng(), 1000..=9999))
    }
}
