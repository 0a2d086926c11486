//! The document store.
//!
//! Rows live in memory in insertion order; every committed write
//! transaction is appended to the journal as one record and replayed on
//! open. A single `RwLock` guards the whole state: readers share it, and a
//! [`WriteTransaction`] holds it exclusively from begin to commit or abort,
//! which makes any check-then-write sequence inside it atomic.

use crate::backend::{JournalBackend, MEMORY_LOCATION};
use crate::error::{StorageError, StorageResult};
use crate::file::FileJournal;
use crate::index::{HashIndex, IndexDefinition, IndexScope};
use crate::journal::{encode_record, replay, JournalEntry};
use crate::memory::MemoryJournal;
use crate::predicate::{class_path, sort_cmp, Predicate};
use crate::row::Row;
use crate::stats::{StoreStats, StoreStatsSnapshot};
use parking_lot::{RwLock, RwLockWriteGuard};
use persistdb_codec::{KeyPath, Value};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;
use tracing::{debug, warn};

/// Options for opening a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreOptions {
    /// Emit every statement at debug level.
    pub debug: bool,
    /// Sync the journal after every commit.
    pub sync_on_commit: bool,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            debug: false,
            sync_on_commit: true,
        }
    }
}

impl StoreOptions {
    /// Enables or disables statement tracing.
    #[must_use]
    pub fn debug(mut self, enabled: bool) -> Self {
        self.debug = enabled;
        self
    }

    /// Enables or disables syncing after each commit.
    #[must_use]
    pub fn sync_on_commit(mut self, enabled: bool) -> Self {
        self.sync_on_commit = enabled;
        self
    }
}

/// One sort criterion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    /// Path to the sorted value.
    pub path: KeyPath,
    /// Sort largest first.
    pub descending: bool,
}

impl SortKey {
    /// Ascending order on `path`.
    #[must_use]
    pub fn ascending(path: KeyPath) -> Self {
        Self {
            path,
            descending: false,
        }
    }

    /// Descending order on `path`.
    #[must_use]
    pub fn descending(path: KeyPath) -> Self {
        Self {
            path,
            descending: true,
        }
    }
}

/// What to select: a predicate plus ordering and pagination.
#[derive(Debug, Clone)]
pub struct Selection {
    /// Rows must satisfy this.
    pub predicate: Predicate,
    /// Sort criteria in priority order. Ties keep insertion order.
    pub sort: Vec<SortKey>,
    /// Rows skipped after sorting.
    pub skip: usize,
    /// Maximum rows returned after skipping.
    pub limit: Option<usize>,
}

impl Selection {
    /// Selects every row matching `predicate`, unsorted and unpaginated.
    #[must_use]
    pub fn new(predicate: Predicate) -> Self {
        Self {
            predicate,
            sort: Vec::new(),
            skip: 0,
            limit: None,
        }
    }

    /// Appends a sort criterion.
    #[must_use]
    pub fn sort_by(mut self, key: SortKey) -> Self {
        self.sort.push(key);
        self
    }

    /// Sets the number of rows to skip.
    #[must_use]
    pub fn skip(mut self, n: usize) -> Self {
        self.skip = n;
        self
    }

    /// Sets the maximum number of rows.
    #[must_use]
    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }
}

struct StoreState {
    journal: Box<dyn JournalBackend>,
    rows: BTreeMap<u64, Row>,
    positions: HashMap<String, u64>,
    next_rowid: u64,
    indexes: BTreeMap<String, HashIndex>,
}

impl StoreState {
    fn new(journal: Box<dyn JournalBackend>) -> Self {
        Self {
            journal,
            rows: BTreeMap::new(),
            positions: HashMap::new(),
            next_rowid: 0,
            indexes: BTreeMap::new(),
        }
    }

    fn get(&self, id: &str) -> Option<&Row> {
        self.positions.get(id).and_then(|rowid| self.rows.get(rowid))
    }

    fn apply(&mut self, entry: JournalEntry) -> StorageResult<()> {
        match entry {
            JournalEntry::Put(document) => self.put(Row::from_document(document)?),
            JournalEntry::Delete(id) => self.remove(&id).map(|_| ()),
            JournalEntry::CreateIndex(def) => {
                let index = HashIndex::build(def.clone(), self.rows.values())?;
                self.indexes.insert(def.name, index);
                Ok(())
            }
        }
    }

    fn put(&mut self, row: Row) -> StorageResult<()> {
        let rowid = match self.positions.get(row.id()) {
            Some(&rowid) => {
                if let Some(old) = self.rows.get(&rowid) {
                    for index in self.indexes.values_mut() {
                        index.remove(old)?;
                    }
                }
                rowid
            }
            None => {
                let rowid = self.next_rowid;
                self.next_rowid += 1;
                self.positions.insert(row.id().to_string(), rowid);
                rowid
            }
        };
        for index in self.indexes.values_mut() {
            index.insert(&row)?;
        }
        self.rows.insert(rowid, row);
        Ok(())
    }

    fn remove(&mut self, id: &str) -> StorageResult<bool> {
        let Some(rowid) = self.positions.remove(id) else {
            return Ok(false);
        };
        if let Some(row) = self.rows.remove(&rowid) {
            for index in self.indexes.values_mut() {
                index.remove(&row)?;
            }
        }
        Ok(true)
    }

    /// Appends a record, cutting any partial write off again on failure.
    fn append(&mut self, entries: &[JournalEntry], sync: bool) -> StorageResult<()> {
        let record = encode_record(entries)?;
        let before = self.journal.size()?;
        if let Err(e) = self.journal.append(&record) {
            let _ = self.journal.truncate(before);
            return Err(e);
        }
        if sync {
            self.journal.sync()?;
        }
        Ok(())
    }

    /// Row ids an index can answer the predicate with, if any index covers it.
    fn index_candidates(&self, predicate: &Predicate) -> Option<(&str, Vec<String>)> {
        let equalities = predicate.equalities();
        if equalities.is_empty() {
            return None;
        }
        let lookup = |path: &KeyPath| {
            equalities
                .iter()
                .find(|(p, _)| *p == path)
                .map(|(_, v)| *v)
        };
        let class = lookup(&class_path()).and_then(Value::as_text);

        for index in self.indexes.values() {
            let def = index.definition();
            if def.scope == IndexScope::Class && class.is_none() {
                continue;
            }
            let Some(values) = def
                .key_paths
                .iter()
                .map(|path| lookup(path).map(Some))
                .collect::<Option<Vec<Option<&Value>>>>()
            else {
                continue;
            };
            let Ok(key) = def.equality_key(class, &values) else {
                continue;
            };
            return Some((def.name.as_str(), index.lookup(&key)));
        }
        None
    }
}

/// A journaled document store.
///
/// # Example
///
/// ```rust
/// use persistdb_codec::{KeyPath, Value};
/// use persistdb_storage::{DocumentStore, Predicate, Row, Selection};
///
/// let store = DocumentStore::in_memory();
/// let mut tx = store.begin_write();
/// tx.upsert(Row::from_document(Value::map([
///     ("id", Value::from("a1")),
///     ("$class", Value::from("A")),
///     ("foo", Value::Integer(1)),
/// ])).unwrap()).unwrap();
/// tx.commit().unwrap();
///
/// let found = store.select(&Selection::new(Predicate::eq(KeyPath::parse("foo").unwrap(), 1)));
/// assert_eq!(found.len(), 1);
/// ```
pub struct DocumentStore {
    location: String,
    options: StoreOptions,
    state: RwLock<StoreState>,
    stats: StoreStats,
}

impl DocumentStore {
    /// Opens a store at `location`.
    ///
    /// `":memory:"` selects a transient in-memory journal; anything else is
    /// a file path, created if missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the journal cannot be opened, is locked by another
    /// process, or is corrupted before its last record.
    pub fn open(location: &str, options: StoreOptions) -> StorageResult<Self> {
        let journal: Box<dyn JournalBackend> = if location == MEMORY_LOCATION {
            Box::new(MemoryJournal::new())
        } else {
            Box::new(FileJournal::open(Path::new(location))?)
        };
        Self::with_journal(location, journal, options)
    }

    /// Opens an empty in-memory store with default options.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            location: MEMORY_LOCATION.to_string(),
            options: StoreOptions::default(),
            state: RwLock::new(StoreState::new(Box::new(MemoryJournal::new()))),
            stats: StoreStats::new(),
        }
    }

    /// Opens a store over an existing journal, replaying its records.
    ///
    /// A torn trailing record is dropped with a warning and cut from the
    /// journal.
    ///
    /// # Errors
    ///
    /// Returns an error if the journal cannot be read or is corrupted.
    pub fn with_journal(
        location: impl Into<String>,
        mut journal: Box<dyn JournalBackend>,
        options: StoreOptions,
    ) -> StorageResult<Self> {
        let location = location.into();
        let bytes = journal.read_all()?;
        let replayed = replay(&bytes)?;
        if replayed.torn {
            warn!(
                "ignoring torn journal tail in {}: keeping {} of {} bytes",
                location,
                replayed.valid_len,
                bytes.len()
            );
            journal.truncate(replayed.valid_len)?;
        }

        let mut state = StoreState::new(journal);
        for record in replayed.records {
            for entry in record {
                state.apply(entry)?;
            }
        }
        debug!(
            "opened store {} with {} rows and {} indexes",
            location,
            state.rows.len(),
            state.indexes.len()
        );

        Ok(Self {
            location,
            options,
            state: RwLock::new(state),
            stats: StoreStats::new(),
        })
    }

    /// The location this store was opened at.
    #[must_use]
    pub fn location(&self) -> &str {
        &self.location
    }

    /// The options this store was opened with.
    #[must_use]
    pub fn options(&self) -> StoreOptions {
        self.options
    }

    fn statement(&self, args: fmt::Arguments<'_>) {
        if self.options.debug {
            debug!(target: "persistdb::statement", "{}", args);
        }
    }

    /// Fetches a row by id.
    pub fn fetch(&self, id: &str) -> Option<Row> {
        self.stats.record_fetch();
        self.statement(format_args!("FETCH {id}"));
        self.state.read().get(id).cloned()
    }

    /// Returns the rows matching a selection, sorted and paginated.
    pub fn select(&self, selection: &Selection) -> Vec<Row> {
        self.stats.record_query();
        self.statement(format_args!("SELECT {selection:?}"));
        let state = self.state.read();
        let mut rows: Vec<Row> = self
            .matching(&state, &selection.predicate)
            .into_iter()
            .cloned()
            .collect();

        if !selection.sort.is_empty() {
            rows.sort_by(|a, b| {
                for key in &selection.sort {
                    let ord = sort_cmp(a.document().lookup(&key.path), b.document().lookup(&key.path));
                    let ord = if key.descending { ord.reverse() } else { ord };
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                Ordering::Equal
            });
        }

        rows.into_iter()
            .skip(selection.skip)
            .take(selection.limit.unwrap_or(usize::MAX))
            .collect()
    }

    /// Counts the rows matching a predicate.
    pub fn count(&self, predicate: &Predicate) -> usize {
        self.stats.record_query();
        self.statement(format_args!("COUNT {predicate:?}"));
        let state = self.state.read();
        self.matching(&state, predicate).len()
    }

    fn matching<'s>(&self, state: &'s StoreState, predicate: &Predicate) -> Vec<&'s Row> {
        if let Some((name, ids)) = state.index_candidates(predicate) {
            self.stats.record_index_lookup();
            self.statement(format_args!("USING INDEX {name}"));
            let mut rowids: Vec<u64> = ids
                .iter()
                .filter_map(|id| state.positions.get(id).copied())
                .collect();
            rowids.sort_unstable();
            return rowids
                .iter()
                .filter_map(|rowid| state.rows.get(rowid))
                .filter(|row| predicate.matches(row.document()))
                .collect();
        }
        self.stats.record_scan();
        state
            .rows
            .values()
            .filter(|row| predicate.matches(row.document()))
            .collect()
    }

    /// Declares an index, building it over the existing rows.
    ///
    /// Returns `true` if the index was created and `false` if an identical
    /// definition already existed.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::IndexConflict`] if the name is taken by a
    /// different definition and [`StorageError::UniqueViolation`] if a
    /// unique index would cover existing duplicates.
    pub fn create_index(&self, definition: IndexDefinition) -> StorageResult<bool> {
        let mut state = self.state.write();
        if let Some(existing) = state.indexes.get(&definition.name) {
            if existing.definition() == &definition {
                return Ok(false);
            }
            return Err(StorageError::IndexConflict {
                name: definition.name,
            });
        }

        let index = HashIndex::build(definition.clone(), state.rows.values())?;
        state.append(
            &[JournalEntry::CreateIndex(definition.clone())],
            self.options.sync_on_commit,
        )?;
        self.statement(format_args!(
            "CREATE {}INDEX {} ({})",
            if definition.unique { "UNIQUE " } else { "" },
            definition.name,
            definition
                .key_paths
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        ));
        state.indexes.insert(definition.name, index);
        Ok(true)
    }

    /// Definitions of every declared index, ordered by name.
    #[must_use]
    pub fn index_definitions(&self) -> Vec<IndexDefinition> {
        self.state
            .read()
            .indexes
            .values()
            .map(|index| index.definition().clone())
            .collect()
    }

    /// Begins a write transaction, blocking while another one is open.
    pub fn begin_write(&self) -> WriteTransaction<'_> {
        let state = self.state.write();
        self.statement(format_args!("BEGIN"));
        WriteTransaction {
            store: self,
            state,
            overlay: HashMap::new(),
            entries: Vec::new(),
            finished: false,
        }
    }

    /// Number of stored rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.read().rows.len()
    }

    /// Returns true if no rows are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Syncs the journal to durable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync fails.
    pub fn sync(&self) -> StorageResult<()> {
        self.state.write().journal.sync()
    }

    /// Live operation counters.
    #[must_use]
    pub fn stats(&self) -> &StoreStats {
        &self.stats
    }

    /// A snapshot of the operation counters.
    #[must_use]
    pub fn stats_snapshot(&self) -> StoreStatsSnapshot {
        self.stats.snapshot()
    }
}

impl fmt::Debug for DocumentStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentStore")
            .field("location", &self.location)
            .field("options", &self.options)
            .field("rows", &self.len())
            .finish_non_exhaustive()
    }
}

/// An exclusive write transaction.
///
/// Holds the store's write lock until [`commit`](Self::commit) or drop.
/// Writes are buffered and become visible to other readers only on commit;
/// reads and index lookups inside the transaction see them immediately.
/// Dropping the transaction without committing discards every write.
pub struct WriteTransaction<'a> {
    store: &'a DocumentStore,
    state: RwLockWriteGuard<'a, StoreState>,
    overlay: HashMap<String, Option<Row>>,
    entries: Vec<JournalEntry>,
    finished: bool,
}

impl WriteTransaction<'_> {
    fn current(&self, id: &str) -> Option<&Row> {
        match self.overlay.get(id) {
            Some(pending) => pending.as_ref(),
            None => self.state.get(id),
        }
    }

    /// Fetches a row by id, including this transaction's pending writes.
    pub fn fetch(&self, id: &str) -> Option<Row> {
        self.store.stats.record_fetch();
        self.store.statement(format_args!("FETCH {id}"));
        self.current(id).cloned()
    }

    /// Inserts or replaces a row.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::UniqueViolation`] if another row already
    /// holds the row's key in a unique index. Nothing is buffered then.
    pub fn upsert(&mut self, row: Row) -> StorageResult<()> {
        let unique: Vec<String> = self
            .state
            .indexes
            .values()
            .filter(|index| index.definition().unique)
            .map(|index| index.definition().name.clone())
            .collect();
        for name in unique {
            if self.lookup(&name, &row)?.iter().any(|id| id != row.id()) {
                return Err(StorageError::UniqueViolation { index: name });
            }
        }

        self.store.statement(format_args!(
            "UPSERT {} {}",
            row.id(),
            row.document().to_json_string()
        ));
        self.entries.push(JournalEntry::Put(row.document().clone()));
        self.overlay.insert(row.id().to_string(), Some(row));
        Ok(())
    }

    /// Returns true if this transaction deleted the row and has not
    /// written it again since.
    #[must_use]
    pub fn is_deleted(&self, id: &str) -> bool {
        matches!(self.overlay.get(id), Some(None))
    }

    /// Deletes a row. Returns true if it existed.
    pub fn delete(&mut self, id: &str) -> bool {
        if self.current(id).is_none() {
            return false;
        }
        self.store.statement(format_args!("DELETE {id}"));
        self.entries.push(JournalEntry::Delete(id.to_string()));
        self.overlay.insert(id.to_string(), None);
        true
    }

    /// Ids of rows sharing `row`'s key in the named index.
    ///
    /// Sees this transaction's pending writes. The result may include
    /// `row`'s own id if a version of it is stored.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::UnknownIndex`] if no such index exists.
    pub fn lookup(&self, index: &str, row: &Row) -> StorageResult<Vec<String>> {
        let index = self
            .state
            .indexes
            .get(index)
            .ok_or_else(|| StorageError::UnknownIndex {
                name: index.to_string(),
            })?;
        let def = index.definition();
        let Some(key) = def.key_for(row)? else {
            return Ok(Vec::new());
        };

        let mut ids: Vec<String> = index
            .lookup(&key)
            .into_iter()
            .filter(|id| !self.overlay.contains_key(id))
            .collect();
        for (id, pending) in &self.overlay {
            if let Some(pending) = pending {
                if def.key_for(pending)?.as_ref() == Some(&key) {
                    ids.push(id.clone());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Definitions of every declared index.
    #[must_use]
    pub fn index_definitions(&self) -> Vec<IndexDefinition> {
        self.state
            .indexes
            .values()
            .map(|index| index.definition().clone())
            .collect()
    }

    /// Number of buffered writes.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.entries.len()
    }

    /// Commits the transaction: one journal record, then the writes become
    /// visible.
    ///
    /// # Errors
    ///
    /// Returns an error if the journal write fails. Nothing is applied then.
    pub fn commit(mut self) -> StorageResult<()> {
        self.finished = true;
        match self.commit_inner() {
            Ok(()) => {
                self.store.stats.record_commit();
                self.store.statement(format_args!("COMMIT"));
                Ok(())
            }
            Err(e) => {
                self.store.stats.record_abort();
                self.store.statement(format_args!("ROLLBACK"));
                Err(e)
            }
        }
    }

    fn commit_inner(&mut self) -> StorageResult<()> {
        if self.entries.is_empty() {
            return Ok(());
        }
        let entries = std::mem::take(&mut self.entries);
        self.state
            .append(&entries, self.store.options.sync_on_commit)?;
        for entry in entries {
            match &entry {
                JournalEntry::Put(_) => self.store.stats.record_upsert(),
                JournalEntry::Delete(_) => self.store.stats.record_delete(),
                JournalEntry::CreateIndex(_) => {}
            }
            self.state.apply(entry)?;
        }
        Ok(())
    }
}

impl Drop for WriteTransaction<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.store.stats.record_abort();
            self.store.statement(format_args!("ROLLBACK"));
        }
    }
}

impl fmt::Debug for WriteTransaction<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteTransaction")
            .field("pending", &self.entries.len())
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}
