use std::collections::HashMap;

use crate::torrent::ChunkSet;

/// orders `missing` rarest-first: chunks held by fewer known peers sort
/// before chunks held by more, with ties broken by ascending index so the
/// result is deterministic. a pure function so the scheduling policy can be
/// tested without any networking.
pub fn order_by_rarity(missing: &[u32], peer_inventories: &[(String, ChunkSet)]) -> Vec<u32> {
    let mut holder_counts: HashMap<u32, usize> = missing.iter().map(|&index| (index, 0)).collect();
    for (_, chunks) in peer_inventories {
        for index in chunks.iter() {
            if let Some(count) = holder_counts.get_mut(&index) {
                *count += 1;
            }
        }
    }

    let mut ordered = missing.to_vec();
    ordered.sort_by_key(|index| (holder_counts[index], *index));
    ordered
}
