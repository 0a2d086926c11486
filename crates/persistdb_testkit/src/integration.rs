//! Cross-crate integration test helpers.
//!
//! Provides a harness that remembers what each saved object held and
//! verifies reloads against it.

use crate::fixtures::TestDatabase;
use persistdb_codec::Value;
use persistdb_core::{Attr, CoreResult, ObjectId, ObjectRef};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// Expected stored form of one attribute.
#[derive(Debug, Clone, PartialEq)]
pub enum Expected {
    /// A plain value.
    Value(Value),
    /// A reference, compared by id.
    Object(ObjectId),
}

impl From<&Attr> for Expected {
    fn from(attr: &Attr) -> Self {
        match attr {
            Attr::Value(v) => Expected::Value(v.clone()),
            Attr::Object(o) => Expected::Object(o.id().clone()),
        }
    }
}

/// A test harness for integration testing.
pub struct IntegrationHarness {
    /// The database under test.
    pub db: TestDatabase,
    expected: HashMap<ObjectId, BTreeMap<String, Expected>>,
}

impl Default for IntegrationHarness {
    fn default() -> Self {
        Self::new()
    }
}

impl IntegrationHarness {
    /// Creates a harness over an in-memory database.
    pub fn new() -> Self {
        Self::with_database(TestDatabase::memory())
    }

    /// Creates a harness over `db`.
    pub fn with_database(db: TestDatabase) -> Self {
        Self {
            db,
            expected: HashMap::new(),
        }
    }

    /// Saves an object and records its attributes.
    ///
    /// # Errors
    ///
    /// Returns the save error; nothing is recorded then.
    pub fn save(&mut self, object: &ObjectRef) -> CoreResult<()> {
        self.db.save(object)?;
        let attributes = object
            .attribute_names()
            .into_iter()
            .filter_map(|name| {
                let attr = object.get(&name)?;
                Some((name, Expected::from(&attr)))
            })
            .collect();
        self.expected.insert(object.id().clone(), attributes);
        Ok(())
    }

    /// Reloads every recorded object, bypassing the cache, and checks its
    /// attributes.
    pub fn verify_all(&self) {
        debug!("verifying {} objects", self.expected.len());
        self.db.clear_cache();
        for (id, expected) in &self.expected {
            let loaded = self
                .db
                .get(id)
                .expect("load failed")
                .unwrap_or_else(|| panic!("object {id} is missing"));
            let actual: BTreeMap<String, Expected> = loaded
                .attribute_names()
                .into_iter()
                .filter_map(|name| {
                    let attr = loaded.get(&name)?;
                    Some((name, Expected::from(&attr)))
                })
                .collect();
            assert_eq!(&actual, expected, "attributes of {id} differ after reload");
        }
    }

    /// Reopens the database, keeping the journal.
    #[must_use]
    pub fn reopen(self) -> Self {
        Self {
            db: self.db.reopen(),
            expected: self.expected,
        }
    }

    /// Number of recorded objects.
    pub fn len(&self) -> usize {
        self.expected.len()
    }

    /// Returns true if nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.expected.is_empty()
    }
}
