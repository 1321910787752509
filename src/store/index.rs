//! Short identity index
//!
//! Maps the leading segment of an identity to the full identities sharing it.
//! A short key resolves only when exactly one identity carries it.

use crate::error::CacheError;
use crate::types::{short_identity, SimId};
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Default, Clone)]
pub struct ShortIdIndex {
    entries: HashMap<String, BTreeSet<SimId>>,
}

impl ShortIdIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the index from every identity of the primary map.
    pub fn from_identities<'a, I>(identities: I) -> Self
    where
        I: IntoIterator<Item = &'a SimId>,
    {
        let mut index = Self::new();
        for identity in identities {
            index.insert(identity);
        }
        index
    }

    /// Register an identity. Returns the other identities already sharing the
    /// short key, which is empty unless this insert created a collision.
    pub fn insert(&mut self, identity: &str) -> Vec<SimId> {
        let set = self
            .entries
            .entry(short_identity(identity).to_string())
            .or_default();
        let others = set.iter().filter(|id| *id != identity).cloned().collect();
        set.insert(identity.to_string());
        others
    }

    pub fn remove(&mut self, identity: &str) {
        let short = short_identity(identity);
        if let Some(set) = self.entries.get_mut(short) {
            set.remove(identity);
            if set.is_empty() {
                self.entries.remove(short);
            }
        }
    }

    /// Resolve a short key to its identity.
    pub fn resolve(&self, short: &str) -> Result<Option<&SimId>, CacheError> {
        match self.entries.get(short) {
            None => Ok(None),
            Some(set) if set.len() == 1 => Ok(set.iter().next()),
            Some(set) => Err(CacheError::AmbiguousShortId {
                short: short.to_string(),
                candidates: set.iter().cloned().collect(),
            }),
        }
    }

    pub fn contains(&self, short: &str) -> bool {
        self.entries.contains_key(short)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: &str = "0f8e5d2a-3c4b-4a1e-9b7d-2e6f1a0c9d88";
    const B: &str = "0f8e5d2a-ffff-4a1e-9b7d-2e6f1a0c9d88";

    #[test]
    fn test_resolve_unique_short_key() {
        let mut index = ShortIdIndex::new();
        assert!(index.insert(A).is_empty());
        assert_eq!(index.resolve("0f8e5d2a").unwrap(), Some(&A.to_string()));
        assert_eq!(index.resolve("deadbeef").unwrap(), None);
    }

    #[test]
    fn test_collision_is_reported_and_ambiguous() {
        let mut index = ShortIdIndex::new();
        index.insert(A);
        let others = index.insert(B);
        assert_eq!(others, vec![A.to_string()]);
        assert!(matches!(
            index.resolve("0f8e5d2a"),
            Err(CacheError::AmbiguousShortId { .. })
        ));

        index.remove(A);
        assert_eq!(index.resolve("0f8e5d2a").unwrap(), Some(&B.to_string()));
    }

    #[test]
    fn test_reinsert_same_identity_is_not_a_collision() {
        let mut index = ShortIdIndex::new();
        index.insert(A);
        assert!(index.insert(A).is_empty());
        assert_eq!(index.len(), 1);
    }
}
