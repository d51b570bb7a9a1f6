use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// everything a peer knows about one file: identity, size, content hash and
/// chunking parameters. serialized camelCase on the wire (`FILE_INFO`
/// replies) and as lowercase `key=value` lines in the `.meta` sidecar file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    pub file_name: String,
    pub file_size: u64,
    pub file_hash: String,
    pub total_chunks: u32,
    pub created_at: u64,
}

impl FileMetadata {
    pub fn new(file_name: String, file_size: u64, file_hash: String, chunk_size: usize) -> Self {
        Self {
            file_name,
            file_size,
            file_hash,
            total_chunks: total_chunks(file_size, chunk_size),
            created_at: now_millis(),
        }
    }

    /// renders the sidecar `.meta` file contents: one `key=value` line per
    /// field, lowercase keys, no quoting.
    pub fn to_meta_string(&self) -> String {
        format!(
            "filename={}\nfilesize={}\nfilehash={}\ntotalchunks={}\ncreatedat={}\n",
            self.file_name, self.file_size, self.file_hash, self.total_chunks, self.created_at
        )
    }

    pub fn from_meta_string(contents: &str) -> anyhow::Result<Self> {
        let mut fields: HashMap<&str, &str> = HashMap::new();
        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                bail!("malformed metadata line: {:?}", line);
            };
            fields.insert(key.trim(), value.trim());
        }

        let get = |key: &str| -> anyhow::Result<&str> {
            fields
                .get(key)
                .copied()
                .with_context(|| format!("metadata file missing key {:?}", key))
        };

        Ok(Self {
            file_name: get("filename")?.to_string(),
            file_size: get("filesize")?.parse().context("filesize is not a number")?,
            file_hash: get("filehash")?.to_string(),
            total_chunks: get("totalchunks")?
                .parse()
                .context("totalchunks is not a number")?,
            created_at: get("createdat")?.parse().context("createdat is not a number")?,
        })
    }
}

/// `ceil(size / chunk_size)`, with the convention that an empty file has
/// zero chunks.
pub fn total_chunks(file_size: u64, chunk_size: usize) -> u32 {
    if file_size == 0 {
        return 0;
    }
    let chunk_size = chunk_size as u64;
    (file_size.div_ceil(chunk_size)) as u32
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(2_621_440, 1 << 20, 3)] // the canonical 2.5 MiB example from the spec
    #[case(1 << 20, 1 << 20, 1)] // exact multiple of the chunk size
    #[case(0, 1 << 20, 0)] // empty file
    #[case(1, 1 << 20, 1)] // one byte still needs one chunk
    fn total_chunks_rounds_up(#[case] file_size: u64, #[case] chunk_size: usize, #[case] expected: u32) {
        assert_eq!(total_chunks(file_size, chunk_size), expected);
    }

    #[test]
    fn meta_round_trips_through_the_sidecar_format() {
        let meta = FileMetadata::new("x.bin".into(), 2_621_440, "deadbeef".into(), 1 << 20);
        let rendered = meta.to_meta_string();
        let parsed = FileMetadata::from_meta_string(&rendered).unwrap();
        assert_eq!(meta, parsed);
    }

    #[test]
    fn wire_json_uses_camel_case() {
        let meta = FileMetadata::new("x.bin".into(), 10, "abc".into(), 1 << 20);
        let json = serde_json::to_string(&meta).unwrap();
        assert!(json.contains("\"fileName\""));
        assert!(json.contains("\"totalChunks\""));
        assert!(json.contains("\"createdAt\""));
    }
}
