//! Database statistics.
//!
//! ```rust
//! use persistdb_core::{Database, ObjectRef};
//!
//! let db = Database::open_in_memory().unwrap();
//! let obj = ObjectRef::new("Note");
//! db.save(&obj).unwrap();
//! db.get(obj.id()).unwrap();
//!
//! let stats = db.stats();
//! assert_eq!(stats.cache.hits, 1);
//! assert_eq!(stats.store.commits, 1);
//! ```

use crate::cache::CacheStats;
use persistdb_storage::StoreStatsSnapshot;

/// A point-in-time snapshot of a database's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DatabaseStats {
    /// Backing store counters: fetches, scans, index lookups, commits.
    pub store: StoreStatsSnapshot,
    /// Object cache counters.
    pub cache: CacheStats,
}

impl DatabaseStats {
    /// Store fetches by id, the reads the cache exists to avoid.
    #[must_use]
    pub fn fetches(&self) -> u64 {
        self.store.fetches
    }
}
