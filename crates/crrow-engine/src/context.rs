//! Per-connection sync state.
//!
//! A `SyncContext` owns everything the engine caches between calls on one
//! connection: the site id, the current and next db version, the sequence
//! counter of the open transaction, table metadata and the peers seen during
//! merge. Transaction boundaries are explicit method calls; the context never
//! observes the store on its own.

use crate::error::{EngineError, Result};
use crate::metadata::MetadataCache;
use crate::peers::SeenPeers;
use crrow_core::{DbVersion, SiteId, TableInfo, MIN_DB_VERSION};
use crrow_store::{ClockStore, MetaStore, SchemaSource};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Default)]
pub struct SyncContext {
    site_id: Option<SiteId>,
    current_version: Option<DbVersion>,
    next_version: Option<DbVersion>,
    seq: i64,
    metadata: MetadataCache,
    seen_peers: SeenPeers,
}

impl SyncContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// The replica's site id, minted and persisted on first use.
    pub fn site_id<S: MetaStore + ?Sized>(&mut self, store: &mut S) -> Result<SiteId> {
        if let Some(site_id) = self.site_id {
            return Ok(site_id);
        }

        let site_id = match store.load_site_id()? {
            Some(site_id) => {
                debug!(site = %site_id, "loaded site id");
                site_id
            }
            None => {
                let site_id = SiteId::generate();
                store.save_site_id(site_id)?;
                debug!(site = %site_id, "minted site id");
                site_id
            }
        };
        self.site_id = Some(site_id);
        Ok(site_id)
    }

    /// Site id if it has already been loaded.
    pub fn cached_site_id(&self) -> Option<SiteId> {
        self.site_id
    }

    /// Last db version present in any clock table.
    pub fn current_version<S: ClockStore + ?Sized>(&mut self, store: &S) -> Result<DbVersion> {
        if let Some(version) = self.current_version {
            return Ok(version);
        }

        let mut version = MIN_DB_VERSION;
        for table in store.tracked_tables() {
            if let Some(max) = store.max_db_version(&table)? {
                version = version.max(max);
            }
        }
        debug!(version, "recomputed db version");
        self.current_version = Some(version);
        Ok(version)
    }

    /// Version stamped on every write of the open transaction.
    ///
    /// Fixed at first use and stable until the next commit or rollback.
    pub fn next_version<S: ClockStore + ?Sized>(&mut self, store: &S) -> Result<DbVersion> {
        if let Some(version) = self.next_version {
            return Ok(version);
        }
        let version = self.current_version(store)? + 1;
        self.next_version = Some(version);
        Ok(version)
    }

    pub fn next_seq(&mut self) -> i64 {
        let seq = self.seq;
        self.seq += 1;
        seq
    }

    /// Metadata of a tracked table.
    pub fn table_info<S: SchemaSource + ClockStore + ?Sized>(
        &mut self,
        store: &S,
        table: &str,
    ) -> Result<Arc<TableInfo>> {
        if !store.is_tracked(table) {
            return Err(EngineError::NotFound {
                table: table.to_string(),
            });
        }
        self.metadata.get_or_load(store, table)
    }

    /// Record that a remote write stamped `db_version` was merged.
    pub fn observe_merge(&mut self, site_id: SiteId, db_version: DbVersion, track_peer: bool) {
        if let Some(current) = self.current_version.as_mut() {
            *current = (*current).max(db_version);
        }
        if track_peer && Some(site_id) != self.site_id {
            self.seen_peers.observe(site_id, db_version);
        }
    }

    pub fn seen_peers(&self) -> &SeenPeers {
        &self.seen_peers
    }

    /// Write the seen-peer marks of the open transaction to the store.
    pub fn flush_seen_peers<S: MetaStore + ?Sized>(&mut self, store: &mut S) -> Result<()> {
        let flushed = self.seen_peers.flush(store)?;
        if flushed > 0 {
            debug!(peers = flushed, "recorded peer versions");
        }
        Ok(())
    }

    pub fn on_commit(&mut self) {
        self.reset_transaction();
    }

    pub fn on_rollback(&mut self) {
        self.reset_transaction();
        self.seen_peers.clear();
        self.metadata.clear();
    }

    fn reset_transaction(&mut self) {
        self.current_version = None;
        self.next_version = None;
        self.seq = 0;
    }
}
