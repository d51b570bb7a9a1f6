use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Mutex;

use crate::torrent::ChunkSet;
use crate::tracker::wire::PeerView;

#[derive(Debug, Clone)]
pub struct KnownPeer {
    pub addr: SocketAddr,
    pub last_seen: u64,
    pub files: HashMap<String, ChunkSet>,
}

impl From<PeerView> for KnownPeer {
    fn from(view: PeerView) -> Self {
        Self {
            addr: view.addr,
            last_seen: view.last_seen,
            files: view.files,
        }
    }
}

/// the peer-side shadow of the tracker's table, rebuilt from the peer list
/// piggybacked on every REGISTER/UPDATE/HEARTBEAT reply. each reply is
/// authoritative for the instant it was produced: ids it doesn't mention
/// are gone from the swarm as far as this peer is concerned.
#[derive(Default)]
pub struct KnownPeers {
    peers: Mutex<HashMap<String, KnownPeer>>,
}

impl KnownPeers {
    pub fn new() -> Self {
        Self::default()
    }

    /// replaces every known record with the tracker's view: ids present in
    /// `reply` overwrite or insert, ids absent from it are dropped.
    pub fn reconcile(&self, reply: HashMap<String, PeerView>) {
        let mut peers = self.peers.lock().unwrap();
        *peers = reply.into_iter().map(|(id, view)| (id, KnownPeer::from(view))).collect();
    }

    pub fn len(&self) -> usize {
        self.peers.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn all(&self) -> Vec<(String, KnownPeer)> {
        self.peers
            .lock()
            .unwrap()
            .iter()
            .map(|(id, peer)| (id.clone(), peer.clone()))
            .collect()
    }

    /// every known peer id+addr advertising `chunk_index` of `file_name`.
    pub fn peers_with_chunk(&self, file_name: &str, chunk_index: u32) -> Vec<(String, SocketAddr)> {
        self.peers
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, peer)| peer.files.get(file_name).is_some_and(|chunks| chunks.contains(chunk_index)))
            .map(|(id, peer)| (id.clone(), peer.addr))
            .collect()
    }

    /// every known peer id+addr that claims to have `file_name` at all,
    /// used for FILE_INFO discovery before any chunks have been scheduled.
    pub fn peers_with_file(&self, file_name: &str) -> Vec<(String, SocketAddr)> {
        self.peers
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, peer)| peer.files.contains_key(file_name))
            .map(|(id, peer)| (id.clone(), peer.addr))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::torrent::ChunkSet;

    fn view(addr: &str, files: &[(&str, Vec<u32>)]) -> PeerView {
        PeerView {
            addr: addr.parse().unwrap(),
            last_seen: 0,
            files: files
                .iter()
                .map(|(name, chunks)| (name.to_string(), ChunkSet::from_iter(chunks.iter().copied())))
                .collect(),
        }
    }

    #[test]
    fn reconcile_inserts_new_ids() {
        let known = KnownPeers::new();
        let mut reply = HashMap::new();
        reply.insert("a".to_string(), view("127.0.0.1:6000", &[("f.bin", vec![0, 1])]));
        known.reconcile(reply);
        assert_eq!(known.len(), 1);
    }

    #[test]
    fn reconcile_drops_ids_absent_from_the_latest_reply() {
        let known = KnownPeers::new();
        let mut first = HashMap::new();
        first.insert("a".to_string(), view("127.0.0.1:6000", &[]));
        first.insert("b".to_string(), view("127.0.0.1:6001", &[]));
        known.reconcile(first);
        assert_eq!(known.len(), 2);

        let mut second = HashMap::new();
        second.insert("a".to_string(), view("127.0.0.1:6000", &[]));
        known.reconcile(second);
        assert_eq!(known.len(), 1);
        assert!(known.all().iter().any(|(id, _)| id == "a"));
    }

    #[test]
    fn peers_with_chunk_filters_by_file_and_index() {
        let known = KnownPeers::new();
        let mut reply = HashMap::new();
        reply.insert("a".to_string(), view("127.0.0.1:6000", &[("f.bin", vec![0, 1, 2])]));
        reply.insert("c".to_string(), view("127.0.0.1:6002", &[("f.bin", vec![2])]));
        known.reconcile(reply);

        let holders = known.peers_with_chunk("f.bin", 2);
        assert_eq!(holders.len(), 2);

        let holders = known.peers_with_chunk("f.bin", 1);
        assert_eq!(holders.len(), 1);
        assert_eq!(holders[0].0, "a");
    }
}
