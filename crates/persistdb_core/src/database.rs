//! Database context and object lifecycle.

use crate::cache::LruCache;
use crate::class::{ClassDef, ClassRegistry, Persistent};
use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::index::{IndexRegistry, IndexSpec};
use crate::object::{ObjectId, ObjectRef};
use crate::resolver::{Encoder, Loader, ObjectCache};
use crate::stats::DatabaseStats;
use chrono::{DateTime, SubsecRound, Utc};
use parking_lot::{Mutex, RwLock};
use persistdb_storage::{DocumentStore, Row, StorageError, StoreOptions, WriteTransaction};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// The persistence context.
///
/// A `Database` owns the backing store, the object cache and the class
/// declarations. Every operation goes through it; there is no ambient
/// connection.
///
/// # Example
///
/// ```rust
/// use persistdb_core::{ClassDef, Config, Database, IndexSpec, ObjectRef, Query};
///
/// let db = Database::connect(Config::new().cache_size(100)).unwrap();
/// db.register_class(ClassDef::new("User").reference("manager")).unwrap();
/// db.add_index(IndexSpec::new(["email"]).unique()).unwrap();
///
/// let boss = ObjectRef::new("User");
/// boss.set("email", "boss@example.com");
/// let user = ObjectRef::new("User");
/// user.set("email", "user@example.com").set("manager", &boss);
///
/// // Saves the manager first, then the user holding its id.
/// db.save(&user).unwrap();
/// assert_eq!(db.len(), 2);
///
/// let clash = ObjectRef::new("User");
/// clash.set("email", "boss@example.com");
/// assert!(db.save(&clash).unwrap_err().is_uniqueness());
///
/// let found = Query::new("User").equal_to("manager", &boss).first(&db).unwrap();
/// assert_eq!(found.unwrap().id(), user.id());
/// ```
pub struct Database {
    config: Config,
    store: DocumentStore,
    cache: ObjectCache,
    classes: RwLock<Arc<ClassRegistry>>,
}

impl Database {
    /// Opens the database described by `config`.
    ///
    /// Index declarations stored in the journal are restored. Classes are
    /// not stored and must be registered again.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the journal cannot be opened, is locked
    /// by another process, or is corrupted.
    pub fn connect(config: Config) -> CoreResult<Self> {
        let options = StoreOptions::default()
            .debug(config.debug)
            .sync_on_commit(config.sync_on_commit);
        let store = DocumentStore::open(&config.location, options)?;
        debug!(
            "connected to {} with {} objects, cache size {}",
            config.location,
            store.len(),
            config.cache_size
        );

        Ok(Self {
            cache: Mutex::new(LruCache::new(config.cache_size)),
            config,
            store,
            classes: RwLock::new(Arc::new(ClassRegistry::new())),
        })
    }

    /// Opens a transient in-memory database with default settings.
    ///
    /// # Errors
    ///
    /// Never fails in practice; the signature matches [`connect`](Self::connect).
    pub fn open_in_memory() -> CoreResult<Self> {
        Self::connect(Config::default())
    }

    /// The configuration this database was opened with.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Registers `T`'s class declaration.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Configuration`] for an invalid declaration or
    /// one conflicting with an earlier registration.
    pub fn register<T: Persistent>(&self) -> CoreResult<()> {
        self.register_class(T::class_def()?)
    }

    /// Registers a class declaration.
    ///
    /// # Errors
    ///
    /// See [`register`](Self::register).
    pub fn register_class(&self, def: ClassDef) -> CoreResult<()> {
        let mut classes = self.classes.write();
        let mut next = ClassRegistry::clone(&classes);
        next.register(def)?;
        *classes = Arc::new(next);
        Ok(())
    }

    /// The registered classes.
    #[must_use]
    pub fn classes(&self) -> Arc<ClassRegistry> {
        Arc::clone(&self.classes.read())
    }

    /// Declares an index and returns its name.
    ///
    /// Declaring an identical index again is a no-op. A unique index is
    /// checked against the stored objects when declared.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Configuration`] for invalid key paths or a name
    /// already used by a different index, and [`CoreError::Uniqueness`]
    /// if stored objects already violate a unique index.
    pub fn add_index(&self, spec: IndexSpec) -> CoreResult<String> {
        let descriptor = spec.to_descriptor()?;
        let name = descriptor.name.clone();
        match self.store.create_index(descriptor) {
            Ok(created) => {
                debug!("index {} {}", name, if created { "created" } else { "already exists" });
                Ok(name)
            }
            Err(StorageError::IndexConflict { name }) => Err(CoreError::configuration(format!(
                "index '{name}' already exists with a different definition"
            ))),
            Err(e) => Err(e.into()),
        }
    }

    /// The declared indexes.
    #[must_use]
    pub fn indexes(&self) -> IndexRegistry {
        IndexRegistry::from_descriptors(self.store.index_definitions())
    }

    /// Saves an object, saving first any new or changed objects it
    /// references.
    ///
    /// The whole graph is written in one atomic unit. On failure nothing is
    /// written and no timestamp changes.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Uniqueness`] if a unique index would be
    /// violated, [`CoreError::InvalidAttribute`] for an attribute that
    /// cannot be stored, or a storage error.
    pub fn save(&self, object: &ObjectRef) -> CoreResult<()> {
        self.transaction(|tx| tx.save(object))
    }

    /// Loads an object by id, or `None` if no such object is stored.
    ///
    /// Served from the cache when possible.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::MalformedDocument`] if the stored document
    /// cannot be decoded.
    pub fn get(&self, id: impl AsRef<str>) -> CoreResult<Option<ObjectRef>> {
        let classes = self.classes();
        Loader::new(&classes, &self.cache, &self.store).load(&ObjectId::from(id.as_ref()))
    }

    /// Deletes an object's row. Returns true if it was stored.
    ///
    /// Objects referencing it keep its id; loading them logs a warning and
    /// leaves the id in place.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the journal write fails.
    pub fn delete(&self, object: &ObjectRef) -> CoreResult<bool> {
        self.transaction(|tx| Ok(tx.delete(object)))
    }

    /// Runs `f` in one atomic unit of work.
    ///
    /// The unit commits if `f` returns `Ok` and aborts otherwise. It holds
    /// the store exclusively: calling other `Database` methods from inside
    /// `f` deadlocks, so use the [`Transaction`] methods instead.
    ///
    /// # Errors
    ///
    /// Returns `f`'s error, or a storage error from the commit.
    ///
    /// # Example
    ///
    /// ```rust
    /// use persistdb_core::{Database, ObjectRef};
    ///
    /// let db = Database::open_in_memory().unwrap();
    /// let (a, b) = (ObjectRef::new("A"), ObjectRef::new("B"));
    /// db.transaction(|tx| {
    ///     tx.save(&a)?;
    ///     tx.save(&b)
    /// })
    /// .unwrap();
    /// assert_eq!(db.len(), 2);
    /// ```
    pub fn transaction<F, T>(&self, f: F) -> CoreResult<T>
    where
        F: FnOnce(&mut Transaction<'_>) -> CoreResult<T>,
    {
        let mut tx = Transaction::begin(self);
        let value = f(&mut tx)?;
        tx.commit()?;
        Ok(value)
    }

    /// Number of stored objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.store.len()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Drops every cached object.
    pub fn clear_cache(&self) {
        self.cache.lock().clear();
    }

    /// Flushes the journal to disk.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the sync fails.
    pub fn sync(&self) -> CoreResult<()> {
        Ok(self.store.sync()?)
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> DatabaseStats {
        DatabaseStats {
            store: self.store.stats_snapshot(),
            cache: self.cache.lock().stats(),
        }
    }

    pub(crate) fn store(&self) -> &DocumentStore {
        &self.store
    }

    /// Builds objects from selected rows, sharing one loader so that rows
    /// referencing each other resolve to the same handles.
    pub(crate) fn materialize(&self, rows: Vec<Row>) -> CoreResult<Vec<ObjectRef>> {
        let classes = self.classes();
        let mut loader = Loader::new(&classes, &self.cache, &self.store);
        rows.into_iter().map(|row| loader.materialize(row)).collect()
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("location", &self.config.location)
            .field("objects", &self.store.len())
            .field("cached", &self.cache.lock().len())
            .finish_non_exhaustive()
    }
}

/// An atomic unit of saves and deletes.
///
/// Created by [`Database::transaction`]. Writes become visible to other
/// readers, and saved objects get their timestamps, only on commit.
pub struct Transaction<'db> {
    db: &'db Database,
    tx: WriteTransaction<'db>,
    classes: Arc<ClassRegistry>,
    indexes: IndexRegistry,
    now: DateTime<Utc>,
    /// Saved objects with the revision each one was encoded at.
    saved: Vec<(ObjectRef, u64)>,
    deleted: Vec<ObjectId>,
}

impl<'db> Transaction<'db> {
    fn begin(db: &'db Database) -> Self {
        let tx = db.store.begin_write();
        let indexes = IndexRegistry::from_descriptors(tx.index_definitions());
        Self {
            db,
            tx,
            classes: db.classes(),
            indexes,
            // Stored timestamps keep microseconds.
            now: Utc::now().trunc_subsecs(6),
            saved: Vec::new(),
            deleted: Vec::new(),
        }
    }

    /// Saves an object and the new or changed objects it references.
    ///
    /// # Errors
    ///
    /// See [`Database::save`]. Writes buffered before the error stay in the
    /// unit; return the error from the closure to abort them.
    pub fn save(&mut self, object: &ObjectRef) -> CoreResult<()> {
        let mut in_flight = HashSet::new();
        self.save_graph(object, &mut in_flight)
    }

    fn save_graph(&mut self, object: &ObjectRef, in_flight: &mut HashSet<ObjectId>) -> CoreResult<()> {
        if !in_flight.insert(object.id().clone()) {
            return Ok(());
        }

        let data = object.snapshot();
        let revision = data.revision;
        let (created_at, updated_at) = ObjectRef::save_stamps(&data, self.now);
        let encoded = Encoder::new(&self.classes).encode(object, &data, created_at, updated_at)?;
        for target in &encoded.pending {
            self.save_graph(target, in_flight)?;
        }

        let row = Row::from_document(encoded.document)?;
        self.indexes.validate(&self.tx, &row)?;
        self.tx.upsert(row)?;

        self.deleted.retain(|id| id != object.id());
        match self.saved.iter_mut().find(|(s, _)| s.ptr_eq(object)) {
            Some(entry) => entry.1 = revision,
            None => self.saved.push((object.clone(), revision)),
        }
        Ok(())
    }

    /// Deletes an object's row. Returns true if it was stored.
    pub fn delete(&mut self, object: &ObjectRef) -> bool {
        let existed = self.tx.delete(object.id().as_str());
        self.saved.retain(|(s, _)| s.id() != object.id());
        self.deleted.push(object.id().clone());
        existed
    }

    /// Loads an object as this unit sees it, including its own writes and
    /// deletes.
    ///
    /// # Errors
    ///
    /// See [`Database::get`].
    pub fn get(&self, id: impl AsRef<str>) -> CoreResult<Option<ObjectRef>> {
        Loader::new(&self.classes, &self.db.cache, &self.tx)
            .read_only_cache()
            .load(&ObjectId::from(id.as_ref()))
    }

    fn commit(self) -> CoreResult<()> {
        let Transaction {
            db,
            tx,
            now,
            saved,
            deleted,
            ..
        } = self;
        tx.commit()?;

        let mut cache = db.cache.lock();
        for (object, revision) in &saved {
            object.record_saved(now, *revision);
            cache.put(object.id().clone(), object.clone());
        }
        for id in &deleted {
            cache.remove(id);
        }
        debug!("committed {} saves and {} deletes", saved.len(), deleted.len());
        Ok(())
    }
}

impl fmt::Debug for Transaction<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("saved", &self.saved.len())
            .field("deleted", &self.deleted.len())
            .field("pending", &self.tx.pending())
            .finish_non_exhaustive()
    }
}
