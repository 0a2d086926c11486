//! Query engine.
//!
//! A [`Query`] collects filters on key paths, sort criteria and pagination,
//! and compiles them into a store [`Selection`]. Filters are AND-ed and
//! restricted to the query's class. An [`OrQuery`] OR-s the filter sets of
//! several queries, each keeping its own class restriction; since the
//! union is evaluated as one predicate, every object appears at most once.
//!
//! Comparisons follow SQL: a filter on a path that is absent or null is
//! unknown, so `not_equal_to` and `not_contained_in` never match objects
//! lacking the path. Use [`Query::does_not_exist`] to find those.
//!
//! # Example
//!
//! ```rust
//! use persistdb_core::{Database, ObjectRef, Query};
//!
//! let db = Database::open_in_memory().unwrap();
//! for n in 0..10 {
//!     let obj = ObjectRef::new("Item");
//!     obj.set("n", n);
//!     db.save(&obj).unwrap();
//! }
//!
//! let page = Query::new("Item")
//!     .greater_than("n", 2, false)
//!     .descending("n")
//!     .skip(1)
//!     .limit(2)
//!     .find(&db)
//!     .unwrap();
//! let ns: Vec<i64> = page.iter().filter_map(|o| o.value("n")?.as_integer()).collect();
//! assert_eq!(ns, vec![8, 7]);
//! ```

use crate::class::Persistent;
use crate::database::Database;
use crate::error::{CoreError, CoreResult};
use crate::object::{Attr, ObjectRef};
use persistdb_codec::{KeyPath, Value};
use persistdb_storage::{
    CompareOp, LikeKind, Predicate, Selection, SortKey, Transform,
};

/// Filter operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    /// Value equals the operand.
    EqualTo,
    /// Value is present and differs from the operand.
    NotEqualTo,
    /// Path is present and not null.
    Exists,
    /// Path is absent or null.
    DoesNotExist,
    /// Value is one of the operands.
    ContainedIn,
    /// Value is present and none of the operands.
    NotContainedIn,
    /// Text starts with the operand.
    StartsWith,
    /// Text contains the operand.
    Contains,
    /// Text ends with the operand.
    EndsWith,
    /// Value (or array length) is greater than the operand.
    GreaterThan,
    /// Value (or array length) is at least the operand.
    GreaterThanOrEqualTo,
    /// Value (or array length) is less than the operand.
    LessThan,
    /// Value (or array length) is at most the operand.
    LessThanOrEqualTo,
    /// Text matches a regular expression at its start.
    Matches,
    /// Value is the id of an object the sub-query finds.
    MatchesQuery,
    /// Value is present and not the id of any object the sub-query finds.
    DoesNotMatchQuery,
}

/// One condition of a query.
#[derive(Debug, Clone)]
pub struct Filter {
    /// Dot-separated path to the tested value.
    pub key_path: String,
    /// The test.
    pub operator: Operator,
    /// Operands; objects are given by id.
    pub operands: Vec<Value>,
    /// Lowercase both sides of text tests.
    pub case_insensitive: bool,
    /// Compare the array length at the path instead of its value.
    pub is_list: bool,
    /// Sub-query of `MatchesQuery` and `DoesNotMatchQuery`.
    pub subquery: Option<Box<Query>>,
}

impl Filter {
    fn new(key_path: impl Into<String>, operator: Operator, operands: Vec<Value>) -> Self {
        Self {
            key_path: key_path.into(),
            operator,
            operands,
            case_insensitive: false,
            is_list: false,
            subquery: None,
        }
    }

    fn compile(&self, db: &Database) -> CoreResult<Predicate> {
        let path = parse_path(&self.key_path)?;
        let operand = || {
            self.operands
                .first()
                .cloned()
                .ok_or_else(|| CoreError::invalid_query(format!("{:?} needs an operand", self.operator)))
        };
        let text = || -> CoreResult<String> {
            match operand()? {
                Value::Text(text) => Ok(text),
                other => Err(CoreError::invalid_query(format!(
                    "{:?} needs text, got {}",
                    self.operator,
                    other.kind_name()
                ))),
            }
        };
        let ordered = |op: CompareOp| -> CoreResult<Predicate> {
            Ok(Predicate::Compare {
                path: path.clone(),
                transform: if self.is_list {
                    Transform::ArrayLength
                } else {
                    Transform::Identity
                },
                op,
                operand: operand()?,
            })
        };
        let like = |kind: LikeKind| -> CoreResult<Predicate> {
            Ok(Predicate::Like {
                path: path.clone(),
                kind,
                pattern: text()?,
                case_insensitive: self.case_insensitive,
            })
        };

        let predicate = match self.operator {
            Operator::EqualTo => Predicate::compare(path.clone(), CompareOp::Eq, operand()?),
            Operator::NotEqualTo => Predicate::compare(path.clone(), CompareOp::Ne, operand()?),
            Operator::Exists => Predicate::negate(Predicate::IsNull { path: path.clone() }),
            Operator::DoesNotExist => Predicate::IsNull { path: path.clone() },
            Operator::ContainedIn => Predicate::In {
                path: path.clone(),
                values: self.operands.clone(),
            },
            Operator::NotContainedIn => Predicate::negate(Predicate::In {
                path: path.clone(),
                values: self.operands.clone(),
            }),
            Operator::StartsWith => like(LikeKind::Prefix)?,
            Operator::Contains => like(LikeKind::Contains)?,
            Operator::EndsWith => like(LikeKind::Suffix)?,
            Operator::GreaterThan => ordered(CompareOp::Gt)?,
            Operator::GreaterThanOrEqualTo => ordered(CompareOp::Ge)?,
            Operator::LessThan => ordered(CompareOp::Lt)?,
            Operator::LessThanOrEqualTo => ordered(CompareOp::Le)?,
            Operator::Matches => Predicate::regex(path.clone(), &text()?, self.case_insensitive)
                .map_err(|e| CoreError::invalid_query(format!("bad pattern: {e}")))?,
            Operator::MatchesQuery | Operator::DoesNotMatchQuery => {
                let subquery = self.subquery.as_deref().ok_or_else(|| {
                    CoreError::invalid_query(format!("{:?} needs a sub-query", self.operator))
                })?;
                let ids = subquery
                    .selected_ids(db)?
                    .into_iter()
                    .map(Value::Text)
                    .collect();
                let within = Predicate::In {
                    path: path.clone(),
                    values: ids,
                };
                if self.operator == Operator::MatchesQuery {
                    within
                } else {
                    Predicate::negate(within)
                }
            }
        };
        Ok(predicate)
    }
}

/// One sort criterion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortSpec {
    /// Dot-separated path to the sorted value.
    pub key_path: String,
    /// Largest first.
    pub descending: bool,
}

fn parse_path(text: &str) -> CoreResult<KeyPath> {
    KeyPath::parse(text).map_err(|e| CoreError::invalid_query(e.to_string()))
}

fn operands<I>(values: I) -> Vec<Value>
where
    I: IntoIterator,
    I::Item: Into<Attr>,
{
    values.into_iter().map(|v| v.into().to_operand()).collect()
}

/// Pagination and ordering shared by [`Query`] and [`OrQuery`].
#[derive(Debug, Clone, Default)]
struct Window {
    sort: Vec<SortSpec>,
    skip: usize,
    limit: Option<usize>,
}

impl Window {
    fn selection(&self, predicate: Predicate) -> CoreResult<Selection> {
        let mut selection = Selection::new(predicate).skip(self.skip);
        if let Some(limit) = self.limit {
            if limit == 0 {
                return Err(CoreError::invalid_query("limit must be positive"));
            }
            selection = selection.limit(limit);
        }
        for spec in &self.sort {
            let path = parse_path(&spec.key_path)?;
            selection = selection.sort_by(if spec.descending {
                SortKey::descending(path)
            } else {
                SortKey::ascending(path)
            });
        }
        Ok(selection)
    }

    fn find(&self, db: &Database, predicate: Predicate) -> CoreResult<Vec<ObjectRef>> {
        let selection = self.selection(predicate)?;
        db.materialize(db.store().select(&selection))
    }

    fn first(&self, db: &Database, predicate: Predicate) -> CoreResult<Option<ObjectRef>> {
        let selection = self.selection(predicate)?.limit(1);
        Ok(db.materialize(db.store().select(&selection))?.into_iter().next())
    }
}

/// A conjunctive query over one class (or every class).
#[derive(Debug, Clone, Default)]
pub struct Query {
    class: Option<String>,
    filters: Vec<Filter>,
    window: Window,
}

impl Query {
    /// A query over objects of `class`.
    pub fn new(class: impl Into<String>) -> Self {
        Self {
            class: Some(class.into()),
            ..Self::default()
        }
    }

    /// A query over objects of every class.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// A query over objects of `T`'s class.
    #[must_use]
    pub fn of<T: Persistent>() -> Self {
        Self::new(T::CLASS)
    }

    /// The class restriction, if any.
    #[must_use]
    pub fn class(&self) -> Option<&str> {
        self.class.as_deref()
    }

    /// The filters, in order.
    #[must_use]
    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    /// Adds a filter.
    #[must_use]
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    fn with(self, key_path: impl Into<String>, operator: Operator, operands: Vec<Value>) -> Self {
        self.filter(Filter::new(key_path, operator, operands))
    }

    fn with_flags(
        self,
        key_path: impl Into<String>,
        operator: Operator,
        operand: Value,
        case_insensitive: bool,
        is_list: bool,
    ) -> Self {
        let mut filter = Filter::new(key_path, operator, vec![operand]);
        filter.case_insensitive = case_insensitive;
        filter.is_list = is_list;
        self.filter(filter)
    }

    /// Value equals `value`. Objects compare by id.
    #[must_use]
    pub fn equal_to(self, key_path: impl Into<String>, value: impl Into<Attr>) -> Self {
        self.with(key_path, Operator::EqualTo, vec![value.into().to_operand()])
    }

    /// Value is present and differs from `value`.
    #[must_use]
    pub fn not_equal_to(self, key_path: impl Into<String>, value: impl Into<Attr>) -> Self {
        self.with(key_path, Operator::NotEqualTo, vec![value.into().to_operand()])
    }

    /// Path holds a non-null value.
    #[must_use]
    pub fn exists(self, key_path: impl Into<String>) -> Self {
        self.with(key_path, Operator::Exists, Vec::new())
    }

    /// Path is absent or null.
    #[must_use]
    pub fn does_not_exist(self, key_path: impl Into<String>) -> Self {
        self.with(key_path, Operator::DoesNotExist, Vec::new())
    }

    /// Value is one of `values`.
    #[must_use]
    pub fn contained_in<I>(self, key_path: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Attr>,
    {
        self.with(key_path, Operator::ContainedIn, operands(values))
    }

    /// Value is present and none of `values`.
    #[must_use]
    pub fn not_contained_in<I>(self, key_path: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Attr>,
    {
        self.with(key_path, Operator::NotContainedIn, operands(values))
    }

    /// Text starts with `prefix`.
    #[must_use]
    pub fn starts_with(self, key_path: impl Into<String>, prefix: &str, case_insensitive: bool) -> Self {
        self.with_flags(key_path, Operator::StartsWith, Value::from(prefix), case_insensitive, false)
    }

    /// Text contains `needle`.
    #[must_use]
    pub fn contains(self, key_path: impl Into<String>, needle: &str, case_insensitive: bool) -> Self {
        self.with_flags(key_path, Operator::Contains, Value::from(needle), case_insensitive, false)
    }

    /// Text ends with `suffix`.
    #[must_use]
    pub fn ends_with(self, key_path: impl Into<String>, suffix: &str, case_insensitive: bool) -> Self {
        self.with_flags(key_path, Operator::EndsWith, Value::from(suffix), case_insensitive, false)
    }

    /// Value is greater than `value`.
    ///
    /// With `is_list`, the length of the array at the path is compared
    /// instead, and non-arrays never match.
    #[must_use]
    pub fn greater_than(self, key_path: impl Into<String>, value: impl Into<Attr>, is_list: bool) -> Self {
        self.with_flags(key_path, Operator::GreaterThan, value.into().to_operand(), false, is_list)
    }

    /// Value is at least `value`. See [`greater_than`](Self::greater_than).
    #[must_use]
    pub fn greater_than_or_equal_to(
        self,
        key_path: impl Into<String>,
        value: impl Into<Attr>,
        is_list: bool,
    ) -> Self {
        self.with_flags(
            key_path,
            Operator::GreaterThanOrEqualTo,
            value.into().to_operand(),
            false,
            is_list,
        )
    }

    /// Value is less than `value`. See [`greater_than`](Self::greater_than).
    #[must_use]
    pub fn less_than(self, key_path: impl Into<String>, value: impl Into<Attr>, is_list: bool) -> Self {
        self.with_flags(key_path, Operator::LessThan, value.into().to_operand(), false, is_list)
    }

    /// Value is at most `value`. See [`greater_than`](Self::greater_than).
    #[must_use]
    pub fn less_than_or_equal_to(
        self,
        key_path: impl Into<String>,
        value: impl Into<Attr>,
        is_list: bool,
    ) -> Self {
        self.with_flags(
            key_path,
            Operator::LessThanOrEqualTo,
            value.into().to_operand(),
            false,
            is_list,
        )
    }

    /// Text matches `pattern` starting at its first character.
    ///
    /// The pattern is compiled when the query runs; an invalid pattern
    /// fails the query then.
    #[must_use]
    pub fn matches(self, key_path: impl Into<String>, pattern: &str, case_insensitive: bool) -> Self {
        self.with_flags(key_path, Operator::Matches, Value::from(pattern), case_insensitive, false)
    }

    /// Value is the id of an object `subquery` finds.
    #[must_use]
    pub fn matches_query(self, key_path: impl Into<String>, subquery: Query) -> Self {
        let mut filter = Filter::new(key_path, Operator::MatchesQuery, Vec::new());
        filter.subquery = Some(Box::new(subquery));
        self.filter(filter)
    }

    /// Value is present and not the id of any object `subquery` finds.
    #[must_use]
    pub fn does_not_match_query(self, key_path: impl Into<String>, subquery: Query) -> Self {
        let mut filter = Filter::new(key_path, Operator::DoesNotMatchQuery, Vec::new());
        filter.subquery = Some(Box::new(subquery));
        self.filter(filter)
    }

    /// Sorts by `key_path`, smallest first; absent and null values first.
    #[must_use]
    pub fn ascending(mut self, key_path: impl Into<String>) -> Self {
        self.window.sort.push(SortSpec {
            key_path: key_path.into(),
            descending: false,
        });
        self
    }

    /// Sorts by `key_path`, largest first; absent and null values last.
    #[must_use]
    pub fn descending(mut self, key_path: impl Into<String>) -> Self {
        self.window.sort.push(SortSpec {
            key_path: key_path.into(),
            descending: true,
        });
        self
    }

    /// Skips the first `n` results, after sorting.
    #[must_use]
    pub fn skip(mut self, n: usize) -> Self {
        self.window.skip = n;
        self
    }

    /// Returns at most `n` results, after skipping. Zero is rejected when
    /// the query runs.
    #[must_use]
    pub fn limit(mut self, n: usize) -> Self {
        self.window.limit = Some(n);
        self
    }

    /// Compiles the class restriction and filters into one predicate.
    ///
    /// Sub-queries run here.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidQuery`] for a bad key path or pattern.
    pub fn predicate(&self, db: &Database) -> CoreResult<Predicate> {
        let mut parts = Vec::with_capacity(self.filters.len() + 1);
        if let Some(class) = &self.class {
            parts.push(Predicate::class(class));
        }
        for filter in &self.filters {
            parts.push(filter.compile(db)?);
        }
        Ok(match parts.len() {
            0 => Predicate::All,
            1 => parts.remove(0),
            _ => Predicate::And(parts),
        })
    }

    fn selected_ids(&self, db: &Database) -> CoreResult<Vec<String>> {
        let selection = self.window.selection(self.predicate(db)?)?;
        Ok(db
            .store()
            .select(&selection)
            .into_iter()
            .map(|row| row.id().to_string())
            .collect())
    }

    /// Runs the query.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidQuery`] for a bad key path, pattern or
    /// limit, or an error decoding a matched document.
    pub fn find(&self, db: &Database) -> CoreResult<Vec<ObjectRef>> {
        self.window.find(db, self.predicate(db)?)
    }

    /// Runs the query for its first result.
    ///
    /// # Errors
    ///
    /// See [`find`](Self::find).
    pub fn first(&self, db: &Database) -> CoreResult<Option<ObjectRef>> {
        self.window.first(db, self.predicate(db)?)
    }

    /// Counts matching objects without loading them. Skip and limit do not
    /// apply.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidQuery`] for a bad key path or pattern.
    pub fn count(&self, db: &Database) -> CoreResult<usize> {
        Ok(db.store().count(&self.predicate(db)?))
    }
}

/// The union of several queries.
///
/// Sort, skip and limit of the sub-queries are ignored; the `OrQuery` has
/// its own. With no sub-queries nothing matches.
#[derive(Debug, Clone, Default)]
pub struct OrQuery {
    queries: Vec<Query>,
    window: Window,
}

impl OrQuery {
    /// Unites `queries`.
    pub fn new(queries: impl IntoIterator<Item = Query>) -> Self {
        Self {
            queries: queries.into_iter().collect(),
            window: Window::default(),
        }
    }

    /// Adds a sub-query.
    #[must_use]
    pub fn or(mut self, query: Query) -> Self {
        self.queries.push(query);
        self
    }

    /// Sorts by `key_path`, smallest first.
    #[must_use]
    pub fn ascending(mut self, key_path: impl Into<String>) -> Self {
        self.window.sort.push(SortSpec {
            key_path: key_path.into(),
            descending: false,
        });
        self
    }

    /// Sorts by `key_path`, largest first.
    #[must_use]
    pub fn descending(mut self, key_path: impl Into<String>) -> Self {
        self.window.sort.push(SortSpec {
            key_path: key_path.into(),
            descending: true,
        });
        self
    }

    /// Skips the first `n` results.
    #[must_use]
    pub fn skip(mut self, n: usize) -> Self {
        self.window.skip = n;
        self
    }

    /// Returns at most `n` results.
    #[must_use]
    pub fn limit(mut self, n: usize) -> Self {
        self.window.limit = Some(n);
        self
    }

    /// OR of every sub-query's predicate.
    ///
    /// # Errors
    ///
    /// See [`Query::predicate`].
    pub fn predicate(&self, db: &Database) -> CoreResult<Predicate> {
        let parts = self
            .queries
            .iter()
            .map(|q| q.predicate(db))
            .collect::<CoreResult<Vec<_>>>()?;
        Ok(Predicate::Or(parts))
    }

    /// Runs the union.
    ///
    /// # Errors
    ///
    /// See [`Query::find`].
    pub fn find(&self, db: &Database) -> CoreResult<Vec<ObjectRef>> {
        self.window.find(db, self.predicate(db)?)
    }

    /// Runs the union for its first result.
    ///
    /// # Errors
    ///
    /// See [`Query::find`].
    pub fn first(&self, db: &Database) -> CoreResult<Option<ObjectRef>> {
        self.window.first(db, self.predicate(db)?)
    }

    /// Counts objects matched by any sub-query.
    ///
    /// # Errors
    ///
    /// See [`Query::count`].
    pub fn count(&self, db: &Database) -> CoreResult<usize> {
        Ok(db.store().count(&self.predicate(db)?))
    }
}
