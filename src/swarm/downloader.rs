use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use rand::seq::SliceRandom;
use tokio::sync::Semaphore;

use crate::config::Config;
use crate::content::ContentStore;
use crate::directory::KnownPeers;
use crate::prelude::*;
use crate::swarm::fetch::fetch_chunk;
use crate::swarm::rarity::order_by_rarity;
use crate::torrent::ChunkSet;
use crate::wire::client;

/// drives parallel, rarest-first downloads of files this peer doesn't have
/// yet. at most [`Config::MAX_CONCURRENT_DOWNLOADS`] files are downloaded
/// at once process-wide; each file's chunks are fetched
/// [`Config::CHUNK_DOWNLOADER_THREADS`] at a time.
pub struct Downloader {
    store: Arc<ContentStore>,
    known_peers: Arc<KnownPeers>,
    global_slots: Arc<Semaphore>,
    active: Mutex<HashSet<String>>,
}

impl Downloader {
    pub fn new(store: Arc<ContentStore>, known_peers: Arc<KnownPeers>) -> Arc<Self> {
        Arc::new(Self {
            store,
            known_peers,
            global_slots: Arc::new(Semaphore::new(Config::MAX_CONCURRENT_DOWNLOADS)),
            active: Mutex::new(HashSet::new()),
        })
    }

    pub fn active_downloads(&self) -> Vec<String> {
        self.active.lock().unwrap().iter().cloned().collect()
    }

    /// starts downloading `file_name` in the background unless it's already
    /// in flight. returns `true` if a new download was kicked off. progress
    /// and completion are observed through [`ContentStore::has_complete_file`].
    ///
    /// if `file_name`'s chunks are already all present locally, no new
    /// download is started, but [`ContentStore::reconstruct`] is invoked
    /// opportunistically (spec.md 4.5) -- `has_complete_file` only checks
    /// the chunk count, so this also repairs the case where the
    /// reconstructed file itself is missing despite every chunk being on
    /// disk.
    pub fn start_download(downloader: &Arc<Self>, file_name: String) -> bool {
        {
            let active = downloader.active.lock().unwrap();
            if active.contains(&file_name) {
                warn!(%file_name, "download already in progress");
                return false;
            }
        }

        if downloader.store.has_complete_file(&file_name) {
            debug!(%file_name, "already have every chunk, reconstructing opportunistically");
            if let Err(err) = downloader.store.reconstruct(&file_name) {
                debug!(%file_name, %err, "opportunistic reconstruct did not succeed");
            }
            return false;
        }

        {
            let mut active = downloader.active.lock().unwrap();
            if !active.insert(file_name.clone()) {
                debug!(%file_name, "download already in flight");
                return false;
            }
        }

        let downloader = downloader.clone();
        tokio::spawn(async move {
            let result = downloader.run_download(&file_name).await;
            downloader.active.lock().unwrap().remove(&file_name);
            match result {
                Ok(()) => info!(%file_name, "download complete"),
                Err(err) => error!(%file_name, %err, "download failed"),
            }
        });
        true
    }

    #[instrument(level = "info", skip(self), fields(%file_name))]
    async fn run_download(&self, file_name: &str) -> anyhow::Result<()> {
        let _permit = self.global_slots.acquire().await?;

        if self.store.get_file_metadata(file_name).is_none() {
            self.discover_metadata(file_name).await?;
        }

        loop {
            let total = self
                .store
                .total_chunks_count(file_name)
                .ok_or_else(|| anyhow::anyhow!("metadata for {file_name:?} vanished mid-download"))?;
            let have = self.store.available_chunks(file_name);
            let missing: Vec<u32> = (0..total).filter(|index| !have.contains(*index)).collect();
            if missing.is_empty() {
                break;
            }

            let peer_inventories: Vec<(String, ChunkSet)> = self
                .known_peers
                .all()
                .into_iter()
                .filter_map(|(id, peer)| peer.files.get(file_name).cloned().map(|chunks| (id, chunks)))
                .collect();
            let ordered = order_by_rarity(&missing, &peer_inventories);
            let batch: Vec<u32> = ordered.into_iter().take(Config::CHUNK_DOWNLOADER_THREADS).collect();

            let results = futures::future::join_all(
                batch
                    .iter()
                    .map(|&index| fetch_chunk(&self.known_peers, &self.store, file_name, index)),
            )
            .await;

            for (index, result) in batch.iter().zip(results) {
                if let Err(err) = result {
                    warn!(%file_name, chunk_index = %index, %err, "chunk still missing after this round");
                }
            }
        }

        self.store.reconstruct(file_name)?;
        Ok(())
    }

    /// asks up to 3 random known peers for `FILE_INFO`, takes the first
    /// successful reply and persists it so the chunk loop has something to
    /// work against.
    async fn discover_metadata(&self, file_name: &str) -> anyhow::Result<()> {
        let mut candidates = self.known_peers.peers_with_file(file_name);
        candidates.shuffle(&mut rand::thread_rng());
        candidates.truncate(3);

        if candidates.is_empty() {
            anyhow::bail!("no known peer advertises {file_name:?}");
        }

        for (peer_id, addr) in candidates {
            match client::file_info(addr, file_name).await {
                Ok(meta) => {
                    self.store.persist_discovered_metadata(meta);
                    return Ok(());
                }
                Err(err) => debug!(%peer_id, %err, "FILE_INFO query failed"),
            }
        }

        anyhow::bail!("no peer could provide metadata for {file_name:?}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::ContentStore;
    use crate::tracker::wire::PeerView;
    use std::collections::HashMap;
    use std::io::Write;
    use std::sync::Arc;
    use tokio::sync::Notify;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn downloads_a_multi_chunk_file_end_to_end_from_a_single_seeder() {
        let seeder_dir = tempfile::tempdir().unwrap();
        let seeder_store = Arc::new(ContentStore::new(seeder_dir.path(), 16, Arc::new(Notify::new())).unwrap());

        let file_path = seeder_dir.path().join("song.bin");
        let mut file = std::fs::File::create(&file_path).unwrap();
        file.write_all(&[7u8; 40]).unwrap(); // 3 chunks of 16/16/8 bytes
        drop(file);
        let meta = seeder_store.process_new_file(&file_path).unwrap();

        let shutdown = CancellationToken::new();
        let server = crate::wire::server::PeerWireServer::bind(0, seeder_store.clone(), shutdown.clone())
            .await
            .unwrap();
        let seeder_addr = server.local_addr();

        let leecher_dir = tempfile::tempdir().unwrap();
        let leecher_store = Arc::new(ContentStore::new(leecher_dir.path(), 16, Arc::new(Notify::new())).unwrap());

        let known_peers = Arc::new(KnownPeers::new());
        let mut files = HashMap::new();
        files.insert("song.bin".to_string(), ChunkSet::from_indices(0..meta.total_chunks));
        let mut reply = HashMap::new();
        reply.insert(
            "seeder".to_string(),
            PeerView {
                addr: seeder_addr,
                last_seen: 0,
                files,
            },
        );
        known_peers.reconcile(reply);

        let downloader = Downloader::new(leecher_store.clone(), known_peers);
        assert!(Downloader::start_download(&downloader, "song.bin".to_string()));

        for _ in 0..200 {
            if leecher_store.has_complete_file("song.bin") {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }

        assert!(leecher_store.has_complete_file("song.bin"));
        shutdown.cancel();
    }

    #[tokio::test]
    async fn two_consecutive_start_download_calls_yield_at_most_one_active_task() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ContentStore::new(dir.path(), 16, Arc::new(Notify::new())).unwrap());
        let known_peers = Arc::new(KnownPeers::new()); // nobody advertises the file; the task will just fail fast.
        let downloader = Downloader::new(store, known_peers);

        assert!(Downloader::start_download(&downloader, "ghost.bin".to_string()));
        assert!(
            !Downloader::start_download(&downloader, "ghost.bin".to_string()),
            "a second call while the first is still in flight must be a no-op"
        );
    }

    #[tokio::test]
    async fn start_download_reconstructs_opportunistically_when_the_final_file_is_missing() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ContentStore::new(dir.path(), 4, Arc::new(Notify::new())).unwrap());

        let path = dir.path().join("x.bin");
        std::fs::write(&path, vec![5u8; 12]).unwrap();
        store.process_new_file(&path).unwrap();
        // every chunk is on disk and `has_complete_file` is true, but drop the
        // reconstructed file itself to simulate it having never been written.
        std::fs::remove_file(dir.path().join("x.bin")).unwrap();
        assert!(store.has_complete_file("x.bin"));

        let known_peers = Arc::new(KnownPeers::new());
        let downloader = Downloader::new(store.clone(), known_peers);

        assert!(
            !Downloader::start_download(&downloader, "x.bin".to_string()),
            "no new download task should start for an already-complete file"
        );
        assert!(dir.path().join("x.bin").is_file(), "opportunistic reconstruct should have recreated the file");
    }
}
