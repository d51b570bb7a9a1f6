use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeSet;
use std::fmt;

/// the set of chunk indices a peer is known to hold for one file.
///
/// the reference tracker serializes this as a sorted list of indices, but
/// the `find_peers_with_chunk` query in the reference treats it as a set
/// internally. the wire representation therefore must tolerate both a JSON
/// array of indices and a JSON object keyed by index (its keys are taken as
/// the set) -- see the Open Question on containment semantics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkSet(BTreeSet<u32>);

impl ChunkSet {
    pub fn new() -> Self {
        Self(BTreeSet::new())
    }

    pub fn from_indices(indices: impl IntoIterator<Item = u32>) -> Self {
        Self(indices.into_iter().collect())
    }

    pub fn insert(&mut self, index: u32) -> bool {
        self.0.insert(index)
    }

    pub fn contains(&self, index: u32) -> bool {
        self.0.contains(&index)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.0.iter().copied()
    }

    pub fn sorted_vec(&self) -> Vec<u32> {
        self.0.iter().copied().collect()
    }
}

impl FromIterator<u32> for ChunkSet {
    fn from_iter<T: IntoIterator<Item = u32>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Serialize for ChunkSet {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_seq(self.0.iter())
    }
}

impl<'de> Deserialize<'de> for ChunkSet {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(ChunkSetVisitor)
    }
}

struct ChunkSetVisitor;

impl<'de> Visitor<'de> for ChunkSetVisitor {
    type Value = ChunkSet;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a JSON array of chunk indices, or an object whose keys are chunk indices")
    }

    fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
    where
        A: de::SeqAccess<'de>,
    {
        let mut set = BTreeSet::new();
        while let Some(index) = seq.next_element::<u32>()? {
            set.insert(index);
        }
        Ok(ChunkSet(set))
    }

    fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
    where
        A: de::MapAccess<'de>,
    {
        let mut set = BTreeSet::new();
        while let Some((key, _ignored)) = map.next_entry::<String, serde::de::IgnoredAny>()? {
            let index: u32 = key.parse().map_err(|_| {
                de::Error::custom(format!("chunk set key {:?} is not a valid index", key))
            })?;
            set.insert(index);
        }
        Ok(ChunkSet(set))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_from_array() {
        let set: ChunkSet = serde_json::from_str("[0,1,2]").unwrap();
        assert_eq!(set.sorted_vec(), vec![0, 1, 2]);
    }

    #[test]
    fn deserializes_from_object_keys() {
        let set: ChunkSet = serde_json::from_str(r#"{"0":true,"2":true}"#).unwrap();
        assert_eq!(set.sorted_vec(), vec![0, 2]);
    }

    #[test]
    fn serializes_as_sorted_array() {
        let set = ChunkSet::from_indices([2, 0, 1]);
        assert_eq!(serde_json::to_string(&set).unwrap(), "[0,1,2]");
    }
}
