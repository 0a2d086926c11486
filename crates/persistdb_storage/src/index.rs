//! Hash indexes over document key paths.

use crate::error::{StorageError, StorageResult};
use crate::row::Row;
use persistdb_codec::{to_canonical_cbor, KeyPath, Value};
use std::collections::{HashMap, HashSet};

/// Breadth of an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexScope {
    /// Keys are partitioned by class; rows of different classes never collide.
    Class,
    /// Keys span every class.
    Global,
}

impl IndexScope {
    /// Stable name used in the journal.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            IndexScope::Class => "class",
            IndexScope::Global => "global",
        }
    }

    /// Parses a journal name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "class" => Some(IndexScope::Class),
            "global" => Some(IndexScope::Global),
            _ => None,
        }
    }
}

/// Definition of a secondary index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDefinition {
    /// Index name, unique within the store.
    pub name: String,
    /// Indexed key paths, in order.
    pub key_paths: Vec<KeyPath>,
    /// Whether each key may belong to at most one row.
    pub unique: bool,
    /// Whether keys are partitioned by class.
    pub scope: IndexScope,
}

impl IndexDefinition {
    /// Computes a row's key, or `None` if the row is not covered.
    ///
    /// The key is the canonical encoding of an array holding the class
    /// (for class-scoped indexes) followed by one slot per key path: `[v]`
    /// when the path holds `v`, `[]` when it is absent. A row lacking every
    /// key path is outside the index. A row holding some of them keys its
    /// missing paths as absent, and two such rows can collide.
    ///
    /// # Errors
    ///
    /// Returns an error if the key cannot be encoded.
    pub fn key_for(&self, row: &Row) -> StorageResult<Option<Vec<u8>>> {
        let values: Vec<Option<&Value>> = self
            .key_paths
            .iter()
            .map(|path| row.document().lookup(path))
            .collect();
        if values.iter().all(Option::is_none) {
            return Ok(None);
        }
        self.encode_key(Some(row.class()), &values).map(Some)
    }

    /// Computes the key an equality lookup would hit.
    ///
    /// `class` is ignored for global indexes.
    ///
    /// # Errors
    ///
    /// Returns an error if the key cannot be encoded.
    pub fn equality_key(&self, class: Option<&str>, values: &[Option<&Value>]) -> StorageResult<Vec<u8>> {
        self.encode_key(class, values)
    }

    fn encode_key(&self, class: Option<&str>, values: &[Option<&Value>]) -> StorageResult<Vec<u8>> {
        let mut parts = Vec::with_capacity(values.len() + 1);
        if self.scope == IndexScope::Class {
            parts.push(class.map_or(Value::Null, Value::from));
        }
        for value in values {
            parts.push(Value::Array(value.map(|v| vec![key_number(v)]).unwrap_or_default()));
        }
        Ok(to_canonical_cbor(&Value::Array(parts))?)
    }
}

/// Folds a whole float into the integer it equals, so `1` and `1.0` share
/// a key the way they compare equal in queries.
#[allow(clippy::cast_possible_truncation, clippy::float_cmp)]
fn key_number(value: &Value) -> Value {
    // 2^63; the i64 range is [-2^63, 2^63).
    const LIMIT: f64 = 9_223_372_036_854_775_808.0;
    match value {
        Value::Float(f) if f.fract() == 0.0 && (-LIMIT..LIMIT).contains(f) => {
            Value::Integer(*f as i64)
        }
        other => other.clone(),
    }
}

/// Hash-based index for equality lookups.
///
/// Maps an encoded key to the set of row ids holding it.
#[derive(Debug, Clone)]
pub struct HashIndex {
    definition: IndexDefinition,
    entries: HashMap<Vec<u8>, HashSet<String>>,
    count: usize,
}

impl HashIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new(definition: IndexDefinition) -> Self {
        Self {
            definition,
            entries: HashMap::new(),
            count: 0,
        }
    }

    /// Builds an index over existing rows.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::UniqueViolation`] if the index is unique and
    /// two rows share a key.
    pub fn build<'a, I>(definition: IndexDefinition, rows: I) -> StorageResult<Self>
    where
        I: IntoIterator<Item = &'a Row>,
    {
        let mut index = Self::new(definition);
        for row in rows {
            index.insert(row)?;
        }
        Ok(index)
    }

    /// The index definition.
    #[must_use]
    pub fn definition(&self) -> &IndexDefinition {
        &self.definition
    }

    /// Adds a row.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::UniqueViolation`] if the index is unique and
    /// another row already holds the key.
    pub fn insert(&mut self, row: &Row) -> StorageResult<()> {
        let Some(key) = self.definition.key_for(row)? else {
            return Ok(());
        };
        if self.definition.unique {
            if let Some(existing) = self.entries.get(&key) {
                if existing.iter().any(|id| id != row.id()) {
                    return Err(StorageError::UniqueViolation {
                        index: self.definition.name.clone(),
                    });
                }
            }
        }
        if self.entries.entry(key).or_default().insert(row.id().to_string()) {
            self.count += 1;
        }
        Ok(())
    }

    /// Removes a row. Returns true if it was present.
    ///
    /// # Errors
    ///
    /// Returns an error if the row's key cannot be encoded.
    pub fn remove(&mut self, row: &Row) -> StorageResult<bool> {
        let Some(key) = self.definition.key_for(row)? else {
            return Ok(false);
        };
        if let Some(set) = self.entries.get_mut(&key) {
            if set.remove(row.id()) {
                self.count -= 1;
                if set.is_empty() {
                    self.entries.remove(&key);
                }
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Row ids stored under `key`.
    #[must_use]
    pub fn lookup(&self, key: &[u8]) -> Vec<String> {
        self.entries
            .get(key)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of indexed rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.count
    }

    /// Returns true if no rows are indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row::{CLASS_FIELD, ID_FIELD};

    fn row(id: &str, class: &str, fields: &[(&str, Value)]) -> Row {
        let mut doc = vec![
            (ID_FIELD.to_string(), Value::from(id)),
            (CLASS_FIELD.to_string(), Value::from(class)),
        ];
        doc.extend(fields.iter().map(|(k, v)| ((*k).to_string(), v.clone())));
        Row::from_document(Value::map(doc)).unwrap()
    }

    fn definition(unique: bool, scope: IndexScope) -> IndexDefinition {
        IndexDefinition {
            name: "a__b_c__idx".into(),
            key_paths: vec![KeyPath::parse("a").unwrap(), KeyPath::parse("b.c").unwrap()],
            unique,
            scope,
        }
    }

    fn nested(a: i64, c: i64) -> Vec<(&'static str, Value)> {
        vec![
            ("a", Value::Integer(a)),
            ("b", Value::map([("c", Value::Integer(c))])),
        ]
    }

    #[test]
    fn insert_and_lookup() {
        let mut index = HashIndex::new(definition(false, IndexScope::Class));
        let r1 = row("1", "A", &nested(1, 2));
        let r2 = row("2", "A", &nested(1, 2));
        index.insert(&r1).unwrap();
        index.insert(&r2).unwrap();
        assert_eq!(index.len(), 2);

        let mut found = index.lookup(&index.definition().key_for(&r1).unwrap().unwrap());
        found.sort();
        assert_eq!(found, vec!["1".to_string(), "2".to_string()]);
    }

    #[test]
    fn unique_rejects_other_row() {
        let mut index = HashIndex::new(definition(true, IndexScope::Class));
        index.insert(&row("1", "A", &nested(1, 2))).unwrap();
        // Same row again is fine.
        index.insert(&row("1", "A", &nested(1, 2))).unwrap();
        let err = index.insert(&row("2", "A", &nested(1, 2))).unwrap_err();
        assert!(matches!(err, StorageError::UniqueViolation { index } if index == "a__b_c__idx"));
    }

    #[test]
    fn class_scope_partitions_keys() {
        let mut index = HashIndex::new(definition(true, IndexScope::Class));
        index.insert(&row("1", "A", &nested(1, 2))).unwrap();
        index.insert(&row("2", "B", &nested(1, 2))).unwrap();

        let mut global = HashIndex::new(definition(true, IndexScope::Global));
        global.insert(&row("1", "A", &nested(1, 2))).unwrap();
        assert!(global.insert(&row("2", "B", &nested(1, 2))).is_err());
    }

    #[test]
    fn rows_lacking_every_path_are_not_indexed() {
        let mut index = HashIndex::new(definition(true, IndexScope::Global));
        index.insert(&row("1", "A", &[])).unwrap();
        index.insert(&row("2", "B", &[])).unwrap();
        index.insert(&row("3", "B", &[("other", Value::Integer(1))])).unwrap();
        assert!(index.is_empty());
        assert!(!index.remove(&row("1", "A", &[])).unwrap());
    }

    #[test]
    fn partially_absent_paths_collide() {
        let mut index = HashIndex::new(definition(true, IndexScope::Class));
        index.insert(&row("1", "A", &[("a", Value::Integer(1))])).unwrap();
        assert!(index.insert(&row("2", "A", &[("a", Value::Integer(1))])).is_err());
        // Null is present, not absent.
        index
            .insert(&row("3", "A", &[("a", Value::Integer(1)), ("b", Value::Null)]))
            .unwrap();
    }

    #[test]
    fn remove_drops_entry() {
        let mut index = HashIndex::new(definition(true, IndexScope::Class));
        let r1 = row("1", "A", &nested(1, 2));
        index.insert(&r1).unwrap();
        assert!(index.remove(&r1).unwrap());
        assert!(!index.remove(&r1).unwrap());
        assert!(index.is_empty());
        index.insert(&row("2", "A", &nested(1, 2))).unwrap();
    }

    #[test]
    fn equality_key_matches_row_key() {
        let def = definition(false, IndexScope::Class);
        let r1 = row("1", "A", &nested(7, 8));
        let expected = def
            .equality_key(
                Some("A"),
                &[Some(&Value::Integer(7)), Some(&Value::Integer(8))],
            )
            .unwrap();
        assert_eq!(def.key_for(&r1).unwrap(), Some(expected));
    }

    #[test]
    fn whole_floats_share_the_integer_key() {
        let def = definition(true, IndexScope::Class);
        let int = row("1", "A", &nested(3, 0));
        let float = row(
            "2",
            "A",
            &[("a", Value::Float(3.0)), ("b", Value::map([("c", Value::Float(-0.0))]))],
        );
        assert_eq!(def.key_for(&int).unwrap(), def.key_for(&float).unwrap());

        let mut index = HashIndex::new(def);
        index.insert(&int).unwrap();
        assert!(index.insert(&float).is_err());
        index
            .insert(&row("3", "A", &[("a", Value::Float(3.5)), ("b", Value::empty_map())]))
            .unwrap();
    }

    #[test]
    fn build_over_duplicates_fails() {
        let rows = [row("1", "A", &nested(1, 2)), row("2", "A", &nested(1, 2))];
        assert!(HashIndex::build(definition(true, IndexScope::Class), rows.iter()).is_err());
        assert!(HashIndex::build(definition(false, IndexScope::Class), rows.iter()).is_ok());
    }
}
