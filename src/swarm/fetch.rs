use rand::seq::SliceRandom;

use crate::config::Config;
use crate::content::ContentStore;
use crate::directory::KnownPeers;
use crate::prelude::*;
use crate::wire::client;

/// fetches one chunk: asks the known-peers table who holds it, picks a
/// holder uniformly at random, and persists the bytes on success. retries
/// up to [`Config::MAX_RETRY_ATTEMPTS`] times, waiting
/// [`Config::NO_PEER_RETRY_WAIT`] when nobody known currently advertises
/// the chunk rather than burning an attempt on a connection we know will
/// fail.
#[instrument(level = "debug", skip(known_peers, store), fields(%file_name, chunk_index))]
pub async fn fetch_chunk(
    known_peers: &KnownPeers,
    store: &ContentStore,
    file_name: &str,
    chunk_index: u32,
) -> anyhow::Result<()> {
    let mut last_err = None;

    for attempt in 0..Config::MAX_RETRY_ATTEMPTS {
        let holders = known_peers.peers_with_chunk(file_name, chunk_index);
        let Some((peer_id, addr)) = holders.choose(&mut rand::thread_rng()) else {
            debug!(attempt, "no known holder for this chunk yet, waiting");
            tokio::time::sleep(Config::NO_PEER_RETRY_WAIT).await;
            continue;
        };

        match client::get_chunk(*addr, file_name, chunk_index).await {
            Ok(bytes) => {
                store.save_chunk(file_name, chunk_index, &bytes)?;
                return Ok(());
            }
            Err(err) => {
                warn!(attempt, %peer_id, %err, "chunk fetch failed");
                last_err = Some(err);
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("no peer ever advertised chunk {chunk_index} of {file_name:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::wire::PeerView;
    use crate::torrent::ChunkSet;
    use std::collections::HashMap;
    use std::net::SocketAddr;
    use std::sync::Arc;
    use tokio::net::TcpListener;
    use tokio::sync::Notify;

    fn advertise(known_peers: &KnownPeers, peer_id: &str, addr: SocketAddr, file_name: &str, chunk_index: u32) {
        let mut files = HashMap::new();
        files.insert(file_name.to_string(), ChunkSet::from_indices([chunk_index]));
        let mut reply = HashMap::new();
        reply.insert(peer_id.to_string(), PeerView { addr, last_seen: 0, files });
        known_peers.reconcile(reply);
    }

    /// spec.md 8 scenario 5: only one peer has the chunk, and it refuses
    /// every connection. each of the [`Config::MAX_RETRY_ATTEMPTS`] attempts
    /// should fail, the overall fetch should report an error, and no chunk
    /// bytes should ever land on disk.
    #[tokio::test]
    async fn exhausts_retries_when_the_only_holder_refuses_every_connection() {
        // bind then drop immediately: the port is free but nothing accepts on
        // it, so every connect attempt is refused right away.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dead_addr = listener.local_addr().unwrap();
        drop(listener);

        let known_peers = KnownPeers::new();
        advertise(&known_peers, "d", dead_addr, "y.bin", 0);

        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::new(dir.path(), 16, Arc::new(Notify::new())).unwrap();

        let result = fetch_chunk(&known_peers, &store, "y.bin", 0).await;
        assert!(result.is_err(), "a refusing-only holder must end in a reported failure");
        assert!(
            store.load_chunk("y.bin", 0).unwrap().is_none(),
            "a failed fetch must not leave partial chunk bytes on disk"
        );
    }

    /// when nobody known advertises the chunk yet, `fetch_chunk` waits
    /// [`Config::NO_PEER_RETRY_WAIT`] between attempts instead of burning a
    /// retry on a connection it knows will fail, and still reports failure
    /// once every attempt is exhausted.
    #[tokio::test(start_paused = true)]
    async fn waits_and_eventually_fails_when_no_peer_is_known_to_hold_the_chunk() {
        let known_peers = KnownPeers::new();
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::new(dir.path(), 16, Arc::new(Notify::new())).unwrap();

        let result = fetch_chunk(&known_peers, &store, "z.bin", 0).await;
        assert!(result.is_err());
    }
}
