use rand::distributions::{Alphanumeric, DistString};
use serde::{Deserialize, Serialize};
use std::fmt;

/// opaque peer identifier. the wire protocol treats this as a plain string,
/// so no fixed-width encoding is imposed the way a bittorrent peer id is.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    pub const VENDOR_PREFIX: &'static str = "swarmhub-";
    pub const SUFFIX_LEN: usize = 12;

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// a vendor-prefixed random suffix, analogous to the bittorrent
    /// convention of a fixed client prefix followed by random bytes.
    pub fn random() -> Self {
        let mut rng = rand::thread_rng();
        let suffix = Alphanumeric.sample_string(&mut rng, Self::SUFFIX_LEN);
        Self(format!("{}{}", Self::VENDOR_PREFIX, suffix))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for PeerId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for PeerId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_ids_carry_the_vendor_prefix() {
        let id = PeerId::random();
        assert!(id.as_str().starts_with(PeerId::VENDOR_PREFIX));
    }

    #[test]
    fn random_ids_are_distinct() {
        assert_ne!(PeerId::random(), PeerId::random());
    }
}
