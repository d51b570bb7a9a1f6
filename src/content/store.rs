use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

use crate::content::metadata::{total_chunks, FileMetadata};
use crate::content::safe_name::safe_name;
use crate::error::ContentStoreError;
use crate::prelude::*;
use crate::torrent::ChunkSet;

/// suffixes that mark a path as store-internal bookkeeping rather than
/// shareable content.
pub const EXCLUDED_SUFFIXES: &[&str] = &[".meta", ".chunk", ".part", ".tmp"];

struct ContentMaps {
    metadata: HashMap<String, FileMetadata>,
    available: HashMap<String, ChunkSet>,
}

/// owns the on-disk chunk/metadata layout and the in-memory
/// `{metadata, available_chunks}` maps behind one mutex. all disk i/o runs
/// outside the lock; the lock is only taken to inspect or mutate the maps.
pub struct ContentStore {
    root: PathBuf,
    chunk_size: usize,
    maps: Mutex<ContentMaps>,
    content_changed: Arc<Notify>,
}

impl ContentStore {
    pub fn new(root: impl Into<PathBuf>, chunk_size: usize, content_changed: Arc<Notify>) -> anyhow::Result<Self> {
        let root = root.into();
        fs::create_dir_all(root.join("chunks"))?;
        fs::create_dir_all(root.join("metadata"))?;
        let store = Self {
            root,
            chunk_size,
            maps: Mutex::new(ContentMaps {
                metadata: HashMap::new(),
                available: HashMap::new(),
            }),
            content_changed,
        };
        store.load_existing_metadata()?;
        Ok(store)
    }

    fn chunks_dir(&self) -> PathBuf {
        self.root.join("chunks")
    }

    fn metadata_dir(&self) -> PathBuf {
        self.root.join("metadata")
    }

    fn chunk_path(&self, file: &str, index: u32) -> PathBuf {
        self.chunks_dir()
            .join(format!("{}.{}.chunk", safe_name(file), index))
    }

    fn meta_path(&self, file: &str) -> PathBuf {
        self.metadata_dir().join(format!("{}.meta", safe_name(file)))
    }

    fn final_path(&self, file: &str) -> PathBuf {
        self.root.join(file)
    }

    fn part_path(&self, file: &str) -> PathBuf {
        self.root.join(format!("{}.part", safe_name(file)))
    }

    /// rehydrates in-memory maps from `.meta`/`.chunk` files left over from
    /// a previous run, so a peer that restarts with partial content resumes
    /// instead of re-downloading everything (see the "Resume" scenario).
    fn load_existing_metadata(&self) -> anyhow::Result<()> {
        let dir = self.metadata_dir();
        if !dir.is_dir() {
            return Ok(());
        }
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("meta") {
                continue;
            }
            let contents = fs::read_to_string(&path)?;
            let meta = match FileMetadata::from_meta_string(&contents) {
                Ok(meta) => meta,
                Err(err) => {
                    warn!(?path, %err, "skipping unreadable metadata file");
                    continue;
                }
            };

            let mut available = ChunkSet::new();
            for index in 0..meta.total_chunks {
                if self.chunk_path(&meta.file_name, index).is_file() {
                    available.insert(index);
                }
            }

            let mut maps = self.maps.lock().expect("content store lock poisoned");
            maps.available.insert(meta.file_name.clone(), available);
            maps.metadata.insert(meta.file_name.clone(), meta);
        }
        Ok(())
    }

    /// called on startup scan and on filesystem-creation events for files in
    /// the shared folder. ignores excluded suffixes and already-known files,
    /// splits the file into fixed-size chunks while streaming its sha-256,
    /// persists chunks + sidecar metadata, and publishes the file by
    /// inserting the full chunk set into `available`.
    pub fn process_new_file(&self, path: &Path) -> Result<FileMetadata, ContentStoreError> {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();

        if EXCLUDED_SUFFIXES.iter().any(|suf| file_name.ends_with(suf)) || file_name.starts_with('.') {
            return Err(ContentStoreError::UnknownFile(file_name));
        }

        {
            let maps = self.maps.lock().expect("content store lock poisoned");
            if maps.metadata.contains_key(&file_name) {
                return Ok(maps.metadata[&file_name].clone());
            }
        }

        let file_size = fs::metadata(path)?.len();
        if file_size == 0 {
            warn!(file = %file_name, "ignoring empty file");
            return Err(ContentStoreError::EmptyFile(file_name));
        }

        fs::create_dir_all(self.chunks_dir())?;
        let mut reader = fs::File::open(path)?;
        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; self.chunk_size];
        let mut index: u32 = 0;

        loop {
            let mut filled = 0;
            while filled < buf.len() {
                let n = reader.read(&mut buf[filled..])?;
                if n == 0 {
                    break;
                }
                filled += n;
            }
            if filled == 0 {
                break;
            }

            let chunk = &buf[..filled];
            hasher.update(chunk);
            fs::write(self.chunk_path(&file_name, index), chunk)?;
            index += 1;

            if filled < buf.len() {
                break;
            }
        }

        let file_hash = hex_digest(hasher);
        let meta = FileMetadata::new(file_name.clone(), file_size, file_hash, self.chunk_size);
        fs::write(self.meta_path(&file_name), meta.to_meta_string())?;

        let available = ChunkSet::from_indices(0..meta.total_chunks);
        {
            let mut maps = self.maps.lock().expect("content store lock poisoned");
            maps.metadata.insert(file_name.clone(), meta.clone());
            maps.available.insert(file_name, available);
        }
        self.content_changed.notify_one();

        Ok(meta)
    }

    /// registers metadata discovered from a remote peer's `FILE_INFO` reply,
    /// without requiring the file to be present on disk. downstream chunk
    /// fetches populate `available` incrementally via [`Self::save_chunk`].
    pub fn persist_discovered_metadata(&self, meta: FileMetadata) {
        let mut maps = self.maps.lock().expect("content store lock poisoned");
        maps.available.entry(meta.file_name.clone()).or_default();
        if let Err(err) = fs::write(self.meta_path(&meta.file_name), meta.to_meta_string()) {
            warn!(file = %meta.file_name, %err, "failed to persist discovered metadata");
        }
        maps.metadata.insert(meta.file_name.clone(), meta);
    }

    /// writes a chunk to disk and records its index. idempotent: overwriting
    /// an already-present chunk is permitted.
    pub fn save_chunk(&self, file: &str, index: u32, bytes: &[u8]) -> Result<(), ContentStoreError> {
        fs::create_dir_all(self.chunks_dir())?;
        fs::write(self.chunk_path(file, index), bytes)?;

        let mut maps = self.maps.lock().expect("content store lock poisoned");
        maps.available.entry(file.to_string()).or_default().insert(index);
        drop(maps);
        self.content_changed.notify_one();
        Ok(())
    }

    pub fn load_chunk(&self, file: &str, index: u32) -> Result<Option<Vec<u8>>, ContentStoreError> {
        let has_chunk = {
            let maps = self.maps.lock().expect("content store lock poisoned");
            maps.available
                .get(file)
                .map(|set| set.contains(index))
                .unwrap_or(false)
        };
        if !has_chunk {
            return Ok(None);
        }
        match fs::read(self.chunk_path(file, index)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// reconstructs the complete file from its chunks and verifies its
    /// sha-256 against the recorded `fileHash`. on success the `.part`
    /// scratch file is atomically renamed into place; on a hash mismatch it
    /// is deleted and the chunks are left on disk for a future attempt.
    pub fn reconstruct(&self, file: &str) -> Result<(), ContentStoreError> {
        let meta = {
            let maps = self.maps.lock().expect("content store lock poisoned");
            let available = maps
                .available
                .get(file)
                .ok_or_else(|| ContentStoreError::UnknownFile(file.to_string()))?;
            let meta = maps
                .metadata
                .get(file)
                .ok_or_else(|| ContentStoreError::UnknownFile(file.to_string()))?
                .clone();

            if available.len() != meta.total_chunks as usize {
                return Err(ContentStoreError::Incomplete {
                    file: file.to_string(),
                    have: available.len(),
                    total: meta.total_chunks as usize,
                });
            }
            meta
        };

        let final_path = self.final_path(file);
        if let Ok(existing) = fs::metadata(&final_path) {
            if existing.len() == meta.file_size {
                debug!(file, "reconstructed file already present with matching size");
                return Ok(());
            }
        }

        let part_path = self.part_path(file);
        let mut hasher = Sha256::new();
        {
            let mut out = fs::File::create(&part_path)?;
            for index in 0..meta.total_chunks {
                // `available` said this chunk was present, but the file on
                // disk may have been removed (or never written) out from
                // under us since that check was made under the lock.
                let bytes = fs::read(self.chunk_path(file, index)).map_err(|err| {
                    if err.kind() == std::io::ErrorKind::NotFound {
                        ContentStoreError::ChunkMissing { file: file.to_string(), index }
                    } else {
                        ContentStoreError::Io(err)
                    }
                })?;
                hasher.update(&bytes);
                out.write_all(&bytes)?;
            }
        }

        let digest = hex_digest(hasher);
        if digest != meta.file_hash {
            warn!(file, expected = %meta.file_hash, got = %digest, "reconstructed file failed hash check");
            let _ = fs::remove_file(&part_path);
            return Err(ContentStoreError::HashMismatch(file.to_string()));
        }

        fs::rename(&part_path, &final_path)?;
        info!(file, "reconstruction complete and verified");
        Ok(())
    }

    pub fn has_complete_file(&self, file: &str) -> bool {
        let maps = self.maps.lock().expect("content store lock poisoned");
        match (maps.metadata.get(file), maps.available.get(file)) {
            (Some(meta), Some(available)) => available.len() == meta.total_chunks as usize,
            _ => false,
        }
    }

    pub fn get_file_metadata(&self, file: &str) -> Option<FileMetadata> {
        let maps = self.maps.lock().expect("content store lock poisoned");
        maps.metadata.get(file).cloned()
    }

    pub fn get_available_files(&self) -> Vec<String> {
        let maps = self.maps.lock().expect("content store lock poisoned");
        maps.metadata.keys().cloned().collect()
    }

    pub fn available_chunks(&self, file: &str) -> ChunkSet {
        let maps = self.maps.lock().expect("content store lock poisoned");
        maps.available.get(file).cloned().unwrap_or_default()
    }

    pub fn total_chunks_count(&self, file: &str) -> Option<u32> {
        let maps = self.maps.lock().expect("content store lock poisoned");
        maps.metadata.get(file).map(|m| m.total_chunks)
    }

    pub fn total_storage_used(&self) -> u64 {
        let maps = self.maps.lock().expect("content store lock poisoned");
        maps.available
            .iter()
            .map(|(file, set)| {
                let chunk_len = |index: u32| -> u64 {
                    self.chunk_path(file, index)
                        .metadata()
                        .map(|m| m.len())
                        .unwrap_or(0)
                };
                set.iter().map(chunk_len).sum::<u64>()
            })
            .sum()
    }

    /// the tracker-facing view: `fileName -> chunk set` for every file this
    /// peer knows about.
    pub fn inventory_for_tracker(&self) -> HashMap<String, ChunkSet> {
        let maps = self.maps.lock().expect("content store lock poisoned");
        maps.available.clone()
    }
}

fn hex_digest(hasher: Sha256) -> String {
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

#[inline]
pub fn expected_chunk_count(file_size: u64, chunk_size: usize) -> u32 {
    total_chunks(file_size, chunk_size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn store(chunk_size: usize) -> (ContentStore, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let store = ContentStore::new(dir.path(), chunk_size, Arc::new(Notify::new())).unwrap();
        (store, dir)
    }

    #[test]
    fn process_new_file_splits_into_expected_chunk_count() {
        let (store, dir) = store(1 << 20);
        let path = dir.path().join("x.bin");
        fs::write(&path, vec![7u8; 2_621_440]).unwrap();

        let meta = store.process_new_file(&path).unwrap();
        assert_eq!(meta.total_chunks, 3);
        assert_eq!(store.available_chunks("x.bin").sorted_vec(), vec![0, 1, 2]);
        assert!(store.has_complete_file("x.bin"));
    }

    #[test]
    fn empty_files_are_rejected() {
        let (store, dir) = store(1 << 20);
        let path = dir.path().join("empty.bin");
        fs::write(&path, []).unwrap();
        assert!(matches!(
            store.process_new_file(&path),
            Err(ContentStoreError::EmptyFile(_))
        ));
    }

    #[test]
    fn reconstruct_round_trips_ingested_content() {
        let (store, dir) = store(4);
        let path = dir.path().join("hello.txt");
        fs::write(&path, b"hello world!").unwrap();
        store.process_new_file(&path).unwrap();

        store.reconstruct("hello.txt").unwrap();
        let out = fs::read(dir.path().join("hello.txt")).unwrap();
        assert_eq!(out, b"hello world!");
    }

    #[test]
    fn reconstruct_fails_before_all_chunks_present() {
        let (store, dir) = store(4);
        let path = dir.path().join("partial.bin");
        fs::write(&path, vec![1u8; 12]).unwrap();
        let meta = store.process_new_file(&path).unwrap();

        // simulate a fresh peer that only discovered metadata and one chunk.
        let dir2 = tempdir().unwrap();
        let fresh = ContentStore::new(dir2.path(), 4, Arc::new(Notify::new())).unwrap();
        fresh.persist_discovered_metadata(meta);
        fresh.save_chunk("partial.bin", 0, &[1, 1, 1, 1]).unwrap();

        assert!(matches!(
            fresh.reconstruct("partial.bin"),
            Err(ContentStoreError::Incomplete { .. })
        ));
    }

    #[test]
    fn resume_after_restart_only_needs_missing_chunks() {
        let dir = tempdir().unwrap();
        {
            let store = ContentStore::new(dir.path(), 4, Arc::new(Notify::new())).unwrap();
            let path = dir.path().join("resume.bin");
            fs::write(&path, vec![9u8; 12]).unwrap();
            store.process_new_file(&path).unwrap();
            // drop chunk 1 to emulate a prior run that only persisted chunks 0 and 2.
            fs::remove_file(store.chunk_path("resume.bin", 1)).unwrap();
        }

        let reopened = ContentStore::new(dir.path(), 4, Arc::new(Notify::new())).unwrap();
        let available = reopened.available_chunks("resume.bin");
        assert_eq!(available.sorted_vec(), vec![0, 2]);
    }
}
