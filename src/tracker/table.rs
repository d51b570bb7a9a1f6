use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::prelude::*;
use crate::torrent::ChunkSet;
use crate::tracker::wire::PeerView;

#[derive(Debug, Clone)]
pub struct PeerRecord {
    pub addr: SocketAddr,
    pub last_seen: Instant,
    pub files: HashMap<String, ChunkSet>,
}

impl PeerRecord {
    fn to_view(&self, now: Instant, registered_at: std::time::SystemTime) -> PeerView {
        let elapsed = now.saturating_duration_since(self.last_seen);
        let wall_last_seen = registered_at
            .checked_sub(elapsed)
            .unwrap_or(registered_at)
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        PeerView {
            addr: self.addr,
            last_seen: wall_last_seen,
            files: self.files.clone(),
        }
    }
}

/// the tracker's peer directory. a single [`Mutex`] guards the whole map;
/// every method below does its work and returns before the caller touches
/// the socket, so the lock is never held across I/O.
pub struct TrackerState {
    peers: Mutex<HashMap<String, PeerRecord>>,
    started_at: Instant,
    started_at_wall: std::time::SystemTime,
}

impl Default for TrackerState {
    fn default() -> Self {
        Self::new()
    }
}

impl TrackerState {
    pub fn new() -> Self {
        Self {
            peers: Mutex::new(HashMap::new()),
            started_at: Instant::now(),
            started_at_wall: std::time::SystemTime::now(),
        }
    }

    fn now_wall(&self, now: Instant) -> std::time::SystemTime {
        self.started_at_wall + now.saturating_duration_since(self.started_at)
    }

    /// inserts or replaces the record for `peer_id`, then returns a
    /// snapshot of every *other* known peer (invariant: a reply never
    /// contains the requester's own id).
    pub fn register(&self, peer_id: &str, addr: SocketAddr, files: HashMap<String, ChunkSet>) -> HashMap<String, PeerView> {
        let now = Instant::now();
        let mut peers = self.peers.lock().unwrap();
        peers.insert(
            peer_id.to_string(),
            PeerRecord {
                addr,
                last_seen: now,
                files,
            },
        );
        self.snapshot_excluding_locked(&peers, peer_id, now)
    }

    /// updates an existing record's file inventory and address, or inserts
    /// a new one if `peer_id` was unknown (mirrors `register`).
    pub fn update(&self, peer_id: &str, addr: SocketAddr, files: HashMap<String, ChunkSet>) -> HashMap<String, PeerView> {
        self.register(peer_id, addr, files)
    }

    /// bumps `last_seen` for a known peer without touching its file
    /// inventory. returns `None` if `peer_id` is unknown and `port` was not
    /// supplied, signalling the caller should reply with a plain ack rather
    /// than registering blind.
    pub fn heartbeat(&self, peer_id: &str, addr: SocketAddr, port: Option<u16>) -> Option<HashMap<String, PeerView>> {
        let now = Instant::now();
        let mut peers = self.peers.lock().unwrap();

        if let Some(record) = peers.get_mut(peer_id) {
            record.last_seen = now;
            record.addr = addr;
            return Some(self.snapshot_excluding_locked(&peers, peer_id, now));
        }

        let Some(port) = port else {
            return None;
        };
        let addr = SocketAddr::new(addr.ip(), port);
        peers.insert(
            peer_id.to_string(),
            PeerRecord {
                addr,
                last_seen: now,
                files: HashMap::new(),
            },
        );
        Some(self.snapshot_excluding_locked(&peers, peer_id, now))
    }

    pub fn unregister(&self, peer_id: &str) {
        self.peers.lock().unwrap().remove(peer_id);
    }

    /// removes every record whose `last_seen` is older than `timeout`,
    /// returning how many were evicted.
    pub fn reaper_sweep(&self, timeout: Duration) -> usize {
        let now = Instant::now();
        let mut peers = self.peers.lock().unwrap();
        let before = peers.len();
        peers.retain(|peer_id, record| {
            let alive = now.saturating_duration_since(record.last_seen) <= timeout;
            if !alive {
                debug!(%peer_id, "reaping timed-out peer");
            }
            alive
        });
        before - peers.len()
    }

    pub fn len(&self) -> usize {
        self.peers.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn snapshot_excluding_locked(
        &self,
        peers: &HashMap<String, PeerRecord>,
        exclude: &str,
        now: Instant,
    ) -> HashMap<String, PeerView> {
        let registered_at = self.now_wall(now);
        peers
            .iter()
            .filter(|(id, _)| id.as_str() != exclude)
            .map(|(id, record)| (id.clone(), record.to_view(now, registered_at)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{port}").parse().unwrap()
    }

    #[test]
    fn register_reply_never_contains_the_requester_itself() {
        let state = TrackerState::new();
        state.register("a", addr(6000), HashMap::new());
        let reply = state.register("b", addr(6001), HashMap::new());
        assert!(reply.contains_key("a"));
        assert!(!reply.contains_key("b"));
    }

    #[test]
    fn heartbeat_on_unknown_peer_without_port_does_not_register() {
        let state = TrackerState::new();
        assert!(state.heartbeat("ghost", addr(6000), None).is_none());
        assert_eq!(state.len(), 0);
    }

    #[test]
    fn heartbeat_on_unknown_peer_with_port_registers_it() {
        let state = TrackerState::new();
        let reply = state.heartbeat("a", addr(6000), Some(6000));
        assert!(reply.is_some());
        assert_eq!(state.len(), 1);
    }

    #[test]
    fn unregister_removes_the_record() {
        let state = TrackerState::new();
        state.register("a", addr(6000), HashMap::new());
        state.unregister("a");
        assert_eq!(state.len(), 0);
    }

    #[test]
    fn reaper_evicts_records_older_than_timeout() {
        let state = TrackerState::new();
        state.register("a", addr(6000), HashMap::new());
        std::thread::sleep(Duration::from_millis(10));
        let evicted = state.reaper_sweep(Duration::from_millis(1));
        assert_eq!(evicted, 1);
        assert_eq!(state.len(), 0);
    }

    #[test]
    fn reaper_keeps_fresh_records() {
        let state = TrackerState::new();
        state.register("a", addr(6000), HashMap::new());
        let evicted = state.reaper_sweep(Duration::from_secs(120));
        assert_eq!(evicted, 0);
        assert_eq!(state.len(), 1);
    }
}
