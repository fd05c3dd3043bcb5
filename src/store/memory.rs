//! In-memory side-store.

use super::{InsertResult, SideMetadata, SideStore};
use crate::address::Address;
use crate::digest::Fingerprint;
use crate::error::Result;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Side-store held in process memory. Contents are lost on drop.
#[derive(Debug, Default)]
pub struct MemoryStore {
    // Insertion sequence breaks ties between equal `created_at` values.
    rows: RwLock<HashMap<Fingerprint, (u64, SideMetadata)>>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }
}

#[async_trait]
impl SideStore for MemoryStore {
    async fn insert(&self, metadata: &SideMetadata) -> Result<InsertResult> {
        let mut rows = self.rows.write();
        if rows.contains_key(&metadata.fingerprint) {
            return Ok(InsertResult::AlreadyExists);
        }
        let seq = rows.len() as u64;
        rows.insert(metadata.fingerprint, (seq, metadata.clone()));
        Ok(InsertResult::Inserted)
    }

    async fn get(&self, fingerprint: &Fingerprint) -> Result<Option<SideMetadata>> {
        Ok(self.rows.read().get(fingerprint).map(|(_, m)| m.clone()))
    }

    async fn list_by_owner(&self, owner: &Address) -> Result<Vec<SideMetadata>> {
        let rows = self.rows.read();
        let mut matching: Vec<&(u64, SideMetadata)> =
            rows.values().filter(|(_, m)| m.owner == *owner).collect();
        matching.sort_by(|(sa, a), (sb, b)| b.created_at.cmp(&a.created_at).then(sb.cmp(sa)));
        Ok(matching.into_iter().map(|(_, m)| m.clone()).collect())
    }
}
