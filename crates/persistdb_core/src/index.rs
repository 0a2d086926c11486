//! Index declarations and uniqueness validation.

use crate::error::{CoreError, CoreResult};
use persistdb_codec::KeyPath;
use persistdb_storage::{IndexDefinition, IndexScope, Row, WriteTransaction};
use std::collections::BTreeMap;
use tracing::trace;

/// A declared index: key paths, uniqueness, scope and name.
pub type IndexDescriptor = IndexDefinition;

/// Generates the default name for an index over `key_paths`.
///
/// Paths are joined with `__`, dots and slashes become `_`, and `__idx` is
/// appended: `["a.b", "c"]` gives `a_b__c__idx`.
#[must_use]
pub fn index_name<S: AsRef<str>>(key_paths: &[S]) -> String {
    let joined = key_paths
        .iter()
        .map(AsRef::as_ref)
        .collect::<Vec<_>>()
        .join("__");
    format!("{}__idx", joined.replace(['.', '/'], "_"))
}

/// Builder for [`Database::add_index`](crate::Database::add_index).
///
/// Indexes are non-unique and class-scoped unless stated otherwise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    key_paths: Vec<String>,
    unique: bool,
    scope: IndexScope,
    name: Option<String>,
}

impl IndexSpec {
    /// An index over `key_paths`, in order.
    pub fn new<I, S>(key_paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            key_paths: key_paths.into_iter().map(Into::into).collect(),
            unique: false,
            scope: IndexScope::Class,
            name: None,
        }
    }

    /// Makes the index enforce uniqueness.
    #[must_use]
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Makes the index span every class.
    #[must_use]
    pub fn global(mut self) -> Self {
        self.scope = IndexScope::Global;
        self
    }

    /// Overrides the generated name.
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// The name the index will have.
    #[must_use]
    pub fn name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| index_name(&self.key_paths))
    }

    /// Validates the declaration and builds its descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Configuration`] for no key paths, an unparsable
    /// or repeated path, or an empty name.
    pub fn to_descriptor(&self) -> CoreResult<IndexDescriptor> {
        if self.key_paths.is_empty() {
            return Err(CoreError::configuration("an index needs at least one key path"));
        }
        let mut key_paths: Vec<KeyPath> = Vec::with_capacity(self.key_paths.len());
        for text in &self.key_paths {
            let path = KeyPath::parse(text)
                .map_err(|e| CoreError::configuration(format!("bad index key path: {e}")))?;
            if key_paths.contains(&path) {
                return Err(CoreError::configuration(format!(
                    "key path '{text}' appears twice in one index"
                )));
            }
            key_paths.push(path);
        }
        let name = self.name();
        if name.is_empty() {
            return Err(CoreError::configuration("index name is empty"));
        }
        Ok(IndexDescriptor {
            name,
            key_paths,
            unique: self.unique,
            scope: self.scope,
        })
    }
}

/// Declared indexes, by name.
#[derive(Debug, Clone, Default)]
pub struct IndexRegistry {
    descriptors: BTreeMap<String, IndexDescriptor>,
}

impl IndexRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a registry from existing definitions.
    pub fn from_descriptors(descriptors: impl IntoIterator<Item = IndexDescriptor>) -> Self {
        Self {
            descriptors: descriptors
                .into_iter()
                .map(|d| (d.name.clone(), d))
                .collect(),
        }
    }

    /// Adds or replaces a descriptor.
    pub fn insert(&mut self, descriptor: IndexDescriptor) {
        self.descriptors.insert(descriptor.name.clone(), descriptor);
    }

    /// Looks up a descriptor.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&IndexDescriptor> {
        self.descriptors.get(name)
    }

    /// Every descriptor, by name.
    pub fn iter(&self) -> impl Iterator<Item = &IndexDescriptor> {
        self.descriptors.values()
    }

    /// Number of declared indexes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    /// Returns true if nothing is declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Checks every unique index against `row` inside `tx`.
    ///
    /// Class-scoped keys begin with the class, so only rows of the same
    /// class can collide on them. The row's own stored version never
    /// counts as a conflict.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Uniqueness`] naming the first violated index.
    pub fn validate(&self, tx: &WriteTransaction<'_>, row: &Row) -> CoreResult<()> {
        for descriptor in self.descriptors.values().filter(|d| d.unique) {
            let holders = tx.lookup(&descriptor.name, row)?;
            if holders.iter().any(|id| id != row.id()) {
                trace!(
                    "{} conflicts with {:?} in index {}",
                    row.id(),
                    holders,
                    descriptor.name
                );
                return Err(CoreError::Uniqueness {
                    index: descriptor.name.clone(),
                });
            }
        }
        Ok(())
    }
}
