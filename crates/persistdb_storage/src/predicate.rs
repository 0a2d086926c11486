//! Predicates over stored documents.
//!
//! Predicates use three-valued logic in the manner of SQL. A path that is
//! absent, or that holds null, yields *unknown* for every comparison, and
//! unknown propagates through `Not`, `And` and `Or` by Kleene's rules. A row
//! is selected only when its predicate is definitely true, so
//! `not_equal_to` and `not_contained_in` never match rows missing the path.
//! [`Predicate::IsNull`] is the only test that observes absence.
//!
//! Integers and floats compare by magnitude, so `1` equals `1.0`.

use crate::row::CLASS_FIELD;
use persistdb_codec::{KeyPath, Value};
use regex::{Regex, RegexBuilder};
use std::borrow::Cow;
use std::cmp::Ordering;

/// Comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    /// Equal.
    Eq,
    /// Not equal.
    Ne,
    /// Less than.
    Lt,
    /// Less than or equal.
    Le,
    /// Greater than.
    Gt,
    /// Greater than or equal.
    Ge,
}

/// Transformation applied to the value at a path before comparing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Transform {
    /// Compare the value as stored.
    #[default]
    Identity,
    /// Lowercase text; other kinds are unknown.
    Lower,
    /// Element count of an array; other kinds are unknown.
    ArrayLength,
}

/// Which part of a text value a [`Predicate::Like`] pattern must match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LikeKind {
    /// The text starts with the pattern.
    Prefix,
    /// The text contains the pattern.
    Contains,
    /// The text ends with the pattern.
    Suffix,
}

/// A boolean condition over a document.
#[derive(Debug, Clone)]
pub enum Predicate {
    /// Matches every row.
    All,
    /// All sub-predicates hold.
    And(Vec<Predicate>),
    /// At least one sub-predicate holds.
    Or(Vec<Predicate>),
    /// The sub-predicate does not hold.
    Not(Box<Predicate>),
    /// Compares the (transformed) value at `path` with `operand`.
    ///
    /// Ordering operators only match values of the operand's kind, where
    /// integers and floats are one kind.
    Compare {
        /// Path to the compared value.
        path: KeyPath,
        /// Transformation applied first.
        transform: Transform,
        /// The comparison.
        op: CompareOp,
        /// Right-hand side.
        operand: Value,
    },
    /// The value at `path` equals one of `values`.
    In {
        /// Path to the tested value.
        path: KeyPath,
        /// Accepted values.
        values: Vec<Value>,
    },
    /// The path is absent or holds null.
    IsNull {
        /// Path to test.
        path: KeyPath,
    },
    /// Substring test on text (case sensitive unless requested).
    Like {
        /// Path to the tested text.
        path: KeyPath,
        /// Where the pattern must occur.
        kind: LikeKind,
        /// Literal text to look for.
        pattern: String,
        /// Compare lowercased text.
        case_insensitive: bool,
    },
    /// Regular expression match on text, anchored at the start.
    Regex {
        /// Path to the tested text.
        path: KeyPath,
        /// Compiled expression.
        regex: Regex,
    },
}

impl Predicate {
    /// Equality test at a path.
    pub fn eq(path: KeyPath, operand: impl Into<Value>) -> Self {
        Self::compare(path, CompareOp::Eq, operand)
    }

    /// Comparison at a path without a transform.
    pub fn compare(path: KeyPath, op: CompareOp, operand: impl Into<Value>) -> Self {
        Self::Compare {
            path,
            transform: Transform::Identity,
            op,
            operand: operand.into(),
        }
    }

    /// Restricts rows to one class.
    #[must_use]
    pub fn class(name: &str) -> Self {
        Self::eq(class_path(), name)
    }

    /// Negates a predicate.
    #[must_use]
    pub fn negate(predicate: Predicate) -> Self {
        Self::Not(Box::new(predicate))
    }

    /// Builds a regular expression predicate.
    ///
    /// Like a regex `match`, the pattern must match at the start of the
    /// text but need not consume all of it.
    ///
    /// # Errors
    ///
    /// Returns the compile error for an invalid pattern.
    pub fn regex(path: KeyPath, pattern: &str, case_insensitive: bool) -> Result<Self, regex::Error> {
        let regex = RegexBuilder::new(pattern)
            .case_insensitive(case_insensitive)
            .build()?;
        Ok(Self::Regex { path, regex })
    }

    /// Returns true if the predicate definitely holds for `document`.
    #[must_use]
    pub fn matches(&self, document: &Value) -> bool {
        self.eval(document) == Some(true)
    }

    /// Evaluates with three-valued logic; `None` means unknown.
    pub fn eval(&self, document: &Value) -> Option<bool> {
        match self {
            Predicate::All => Some(true),
            Predicate::And(parts) => {
                let mut result = Some(true);
                for part in parts {
                    match part.eval(document) {
                        Some(false) => return Some(false),
                        None => result = None,
                        Some(true) => {}
                    }
                }
                result
            }
            Predicate::Or(parts) => {
                let mut result = Some(false);
                for part in parts {
                    match part.eval(document) {
                        Some(true) => return Some(true),
                        None => result = None,
                        Some(false) => {}
                    }
                }
                result
            }
            Predicate::Not(inner) => inner.eval(document).map(|b| !b),
            Predicate::Compare {
                path,
                transform,
                op,
                operand,
            } => {
                let value = apply_transform(*transform, known(document, path)?)?;
                Some(compare(&value, *op, operand))
            }
            Predicate::In { path, values } => {
                let value = known(document, path)?;
                Some(values.iter().any(|v| values_equal(value, v)))
            }
            Predicate::IsNull { path } => Some(known(document, path).is_none()),
            Predicate::Like {
                path,
                kind,
                pattern,
                case_insensitive,
            } => {
                let Value::Text(text) = known(document, path)? else {
                    return Some(false);
                };
                let (text, pattern): (Cow<'_, str>, Cow<'_, str>) = if *case_insensitive {
                    (
                        Cow::Owned(text.to_lowercase()),
                        Cow::Owned(pattern.to_lowercase()),
                    )
                } else {
                    (Cow::Borrowed(text.as_str()), Cow::Borrowed(pattern.as_str()))
                };
                Some(match kind {
                    LikeKind::Prefix => text.starts_with(pattern.as_ref()),
                    LikeKind::Contains => text.contains(pattern.as_ref()),
                    LikeKind::Suffix => text.ends_with(pattern.as_ref()),
                })
            }
            Predicate::Regex { path, regex } => match known(document, path)? {
                Value::Text(text) => Some(regex.find(text).is_some_and(|m| m.start() == 0)),
                _ => Some(false),
            },
        }
    }

    /// Equality constraints that must all hold for the predicate to hold.
    ///
    /// Collected from a top-level comparison or from nested `And`s. Used
    /// to answer a selection through an index instead of a scan.
    pub(crate) fn equalities(&self) -> Vec<(&KeyPath, &Value)> {
        let mut found = Vec::new();
        self.collect_equalities(&mut found);
        found
    }

    fn collect_equalities<'a>(&'a self, found: &mut Vec<(&'a KeyPath, &'a Value)>) {
        match self {
            Predicate::And(parts) => {
                for part in parts {
                    part.collect_equalities(found);
                }
            }
            Predicate::Compare {
                path,
                transform: Transform::Identity,
                op: CompareOp::Eq,
                operand,
            } if !operand.is_null() && !operand.contains_nan() => found.push((path, operand)),
            _ => {}
        }
    }
}

/// Key path of the class field.
#[must_use]
pub fn class_path() -> KeyPath {
    KeyPath::key(CLASS_FIELD)
}

/// Value at `path`, treating null like absence.
fn known<'a>(document: &'a Value, path: &KeyPath) -> Option<&'a Value> {
    document.lookup(path).filter(|v| !v.is_null())
}

fn apply_transform(transform: Transform, value: &Value) -> Option<Cow<'_, Value>> {
    match transform {
        Transform::Identity => Some(Cow::Borrowed(value)),
        Transform::Lower => match value {
            Value::Text(text) => Some(Cow::Owned(Value::Text(text.to_lowercase()))),
            _ => None,
        },
        Transform::ArrayLength => match value {
            Value::Array(items) => Some(Cow::Owned(Value::Integer(
                i64::try_from(items.len()).unwrap_or(i64::MAX),
            ))),
            _ => None,
        },
    }
}

/// Equality as queries see it: numbers by magnitude, the rest by value.
fn values_equal(a: &Value, b: &Value) -> bool {
    a.numeric_cmp(b).map_or_else(|| a == b, Ordering::is_eq)
}

fn compare(value: &Value, op: CompareOp, operand: &Value) -> bool {
    match op {
        CompareOp::Eq => values_equal(value, operand),
        CompareOp::Ne => !values_equal(value, operand),
        _ if !value.same_kind(operand) => false,
        _ => {
            let ord = value
                .numeric_cmp(operand)
                .unwrap_or_else(|| value.document_cmp(operand));
            match op {
                CompareOp::Lt => ord.is_lt(),
                CompareOp::Le => ord.is_le(),
                CompareOp::Gt => ord.is_gt(),
                _ => ord.is_ge(),
            }
        }
    }
}

/// Orders two sort values: absent and null first, then by document order.
pub(crate) fn sort_cmp(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let a = a.filter(|v| !v.is_null());
    let b = b.filter(|v| !v.is_null());
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => a.document_cmp(b),
    }
}
