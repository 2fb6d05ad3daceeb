//! High-water marks of the peers seen during merge.

use crrow_core::{DbVersion, SiteId};
use crrow_store::{MetaStore, Result as StoreResult};
use std::collections::BTreeMap;

/// Highest remote db version merged per peer within the open transaction.
///
/// Marks are written to the store's peer table on commit and dropped on
/// rollback.
#[derive(Clone, Debug, Default)]
pub struct SeenPeers {
    marks: BTreeMap<SiteId, DbVersion>,
}

impl SeenPeers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, site_id: SiteId, version: DbVersion) {
        let mark = self.marks.entry(site_id).or_insert(version);
        *mark = (*mark).max(version);
    }

    pub fn get(&self, site_id: &SiteId) -> Option<DbVersion> {
        self.marks.get(site_id).copied()
    }

    pub fn len(&self) -> usize {
        self.marks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.marks.is_empty()
    }

    pub fn clear(&mut self) {
        self.marks.clear();
    }

    /// Persist every mark and forget them.
    pub fn flush<S: MetaStore + ?Sized>(&mut self, store: &mut S) -> StoreResult<usize> {
        let count = self.marks.len();
        for (site_id, version) in std::mem::take(&mut self.marks) {
            store.record_peer_version(site_id, version)?;
        }
        Ok(count)
    }
}
