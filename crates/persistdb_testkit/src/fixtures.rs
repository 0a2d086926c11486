//! Test fixtures and database helpers.
//!
//! Provides test databases, in memory or backed by a temporary journal
//! file, and a few declared classes used across the integration tests.

use persistdb_core::{Config, Database, Persistent};
use std::path::{Path, PathBuf};
use std::sync::Once;
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

/// Class with no references.
pub struct A;

impl Persistent for A {
    const CLASS: &'static str = "A";
}

/// Class storing `ref0` by id.
pub struct B;

impl Persistent for B {
    const CLASS: &'static str = "B";
    const REFERENCES: &'static [&'static str] = &["ref0"];
}

/// Class storing `ref0` and `ref1` by id.
pub struct C;

impl Persistent for C {
    const CLASS: &'static str = "C";
    const REFERENCES: &'static [&'static str] = &["ref0", "ref1"];
}

/// Class storing `a_ref` by id.
pub struct Bar;

impl Persistent for Bar {
    const CLASS: &'static str = "Bar";
    const REFERENCES: &'static [&'static str] = &["a_ref"];
}

/// Registers [`A`], [`B`], [`C`] and [`Bar`].
pub fn register_fixture_classes(db: &Database) {
    db.register::<A>().expect("register A");
    db.register::<B>().expect("register B");
    db.register::<C>().expect("register C");
    db.register::<Bar>().expect("register Bar");
}

/// Installs a tracing subscriber once per test binary.
///
/// The filter comes from `RUST_LOG` and defaults to `warn`. Statement
/// tracing of a database opened with `debug` shows at `debug`.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// A test database with automatic cleanup.
pub struct TestDatabase {
    /// The database instance.
    pub db: Database,
    config: Config,
    /// The temporary directory (kept alive to prevent cleanup).
    _temp_dir: Option<TempDir>,
}

impl TestDatabase {
    /// Creates an in-memory test database with the fixture classes.
    pub fn memory() -> Self {
        Self::memory_with(Config::new().debug(true))
    }

    /// Creates an in-memory test database from `config`.
    pub fn memory_with(config: Config) -> Self {
        init_tracing();
        let db = Database::connect(config.clone()).expect("Failed to open in-memory database");
        register_fixture_classes(&db);
        Self {
            db,
            config,
            _temp_dir: None,
        }
    }

    /// Creates a file-backed test database in a fresh temporary directory.
    pub fn file() -> Self {
        Self::file_with(Config::new().debug(true))
    }

    /// Creates a file-backed test database; `config`'s location is replaced.
    pub fn file_with(config: Config) -> Self {
        init_tracing();
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().join("test.journal");
        let config = config.location(path.to_string_lossy().into_owned());
        let db = Database::connect(config.clone()).expect("Failed to open file database");
        register_fixture_classes(&db);
        Self {
            db,
            config,
            _temp_dir: Some(temp_dir),
        }
    }

    /// Closes and reopens the database, keeping the journal.
    ///
    /// In-memory databases come back empty.
    #[must_use]
    pub fn reopen(self) -> Self {
        let Self {
            db,
            config,
            _temp_dir,
        } = self;
        drop(db);
        let db = Database::connect(config.clone()).expect("Failed to reopen database");
        register_fixture_classes(&db);
        Self {
            db,
            config,
            _temp_dir,
        }
    }

    /// The journal path if file-backed, `None` if in memory.
    pub fn path(&self) -> Option<PathBuf> {
        self._temp_dir
            .as_ref()
            .map(|_| PathBuf::from(&self.config.location))
    }
}

impl std::ops::Deref for TestDatabase {
    type Target = Database;

    fn deref(&self) -> &Self::Target {
        &self.db
    }
}

/// Runs a test with a temporary in-memory database.
///
/// # Example
///
/// ```rust
/// use persistdb_core::ObjectRef;
/// use persistdb_testkit::with_temp_db;
///
/// with_temp_db(|db| {
///     let obj = ObjectRef::new("A");
///     db.save(&obj).unwrap();
///     assert_eq!(db.len(), 1);
/// });
/// ```
pub fn with_temp_db<F, R>(f: F) -> R
where
    F: FnOnce(&Database) -> R,
{
    let test_db = TestDatabase::memory();
    f(&test_db.db)
}

/// Runs a test with a temporary file-backed database.
pub fn with_file_db<F, R>(f: F) -> R
where
    F: FnOnce(&Database, &Path) -> R,
{
    let test_db = TestDatabase::file();
    let path = test_db.path().expect("File database should have a path");
    f(&test_db.db, &path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use persistdb_core::ObjectRef;

    #[test]
    fn memory_database_starts_empty() {
        let db = TestDatabase::memory();
        assert!(db.is_empty());
        assert!(db.path().is_none());
        assert!(db.classes().is_reference("B", "ref0"));
    }

    #[test]
    fn file_database_survives_reopen() {
        let db = TestDatabase::file();
        let obj = ObjectRef::new("A");
        obj.set("foo", 1);
        db.save(&obj).unwrap();
        let path = db.path().unwrap();
        assert!(path.exists());

        let db = db.reopen();
        let loaded = db.get(obj.id()).unwrap().unwrap();
        assert_eq!(loaded.value("foo").and_then(|v| v.as_integer()), Some(1));
    }
}
