//! Persistent objects.
//!
//! A persistent object is an id, a class name and a bag of attributes.
//! Objects are shared through [`ObjectRef`] handles: cloning a handle
//! never copies the object, and two handles loaded for the same id within
//! one load (or served from the cache) are the same object.

mod id;

pub use id::ObjectId;

use crate::error::{CoreError, CoreResult};
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::RwLock;
use persistdb_codec::{from_value, to_value, Value};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Weak};

/// Lifecycle state of an object, derived from its timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectState {
    /// Never saved.
    Transient,
    /// Saved exactly once.
    Persisted,
    /// Saved more than once.
    Updated,
}

/// An attribute value: plain document data or another object.
#[derive(Debug, Clone)]
pub enum Attr {
    /// Plain document data.
    Value(Value),
    /// Another persistent object.
    ///
    /// Stored as its id if the owning class declares the attribute a
    /// reference, otherwise embedded as an independent copy.
    Object(ObjectRef),
}

impl Attr {
    /// The plain value, if this is one.
    #[must_use]
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Attr::Value(v) => Some(v),
            Attr::Object(_) => None,
        }
    }

    /// The object, if this is one.
    #[must_use]
    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Attr::Object(o) => Some(o),
            Attr::Value(_) => None,
        }
    }

    /// The value used when comparing this attribute in a query.
    ///
    /// Objects compare by id.
    #[must_use]
    pub fn to_operand(&self) -> Value {
        match self {
            Attr::Value(v) => v.clone(),
            Attr::Object(o) => Value::Text(o.id().to_string()),
        }
    }
}

impl PartialEq for Attr {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Attr::Value(a), Attr::Value(b)) => a == b,
            (Attr::Object(a), Attr::Object(b)) => a == b,
            _ => false,
        }
    }
}

impl From<Value> for Attr {
    fn from(v: Value) -> Self {
        Attr::Value(v)
    }
}

impl From<ObjectRef> for Attr {
    fn from(o: ObjectRef) -> Self {
        Attr::Object(o)
    }
}

impl From<&ObjectRef> for Attr {
    fn from(o: &ObjectRef) -> Self {
        Attr::Object(o.clone())
    }
}

impl From<DateTime<Utc>> for Attr {
    fn from(at: DateTime<Utc>) -> Self {
        Attr::Value(timestamp_to_value(at))
    }
}

impl<T: Into<Value>> From<Vec<T>> for Attr {
    fn from(items: Vec<T>) -> Self {
        Attr::Value(Value::from(items))
    }
}

macro_rules! attr_from_value {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Attr {
                fn from(v: $ty) -> Self {
                    Attr::Value(Value::from(v))
                }
            }
        )*
    };
}

attr_from_value!(bool, i64, i32, u32, f64, String, &str, ());

/// Renders a timestamp as fixed-width RFC 3339 UTC text.
///
/// Every timestamp has the same width, so text order is time order and
/// key-path comparisons on dates work.
#[must_use]
pub fn timestamp_to_value(at: DateTime<Utc>) -> Value {
    Value::Text(at.to_rfc3339_opts(SecondsFormat::Micros, true))
}

/// Parses a timestamp written by [`timestamp_to_value`].
#[must_use]
pub fn timestamp_from_value(value: &Value) -> Option<DateTime<Utc>> {
    let text = value.as_text()?;
    DateTime::parse_from_rfc3339(text)
        .ok()
        .map(|at| at.with_timezone(&Utc))
}

/// How an object holds one attribute.
#[derive(Debug, Clone)]
pub(crate) enum Slot {
    Held(Attr),
    /// Points back at an object that was still loading when this one was
    /// decoded. Held weakly so that a loaded cycle is freed once nothing
    /// outside it holds a handle; after that it reads as the bare id.
    Back(ObjectId, WeakObjectRef),
}

impl Slot {
    pub(crate) fn resolve(&self) -> Attr {
        match self {
            Slot::Held(attr) => attr.clone(),
            Slot::Back(id, target) => target
                .upgrade()
                .map_or_else(|| Attr::Value(Value::from(id.as_str())), Attr::Object),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct ObjectData {
    pub(crate) attributes: BTreeMap<String, Slot>,
    pub(crate) created_at: Option<DateTime<Utc>>,
    pub(crate) updated_at: Option<DateTime<Utc>>,
    pub(crate) dirty: bool,
    /// Bumped by every change, so a save can tell whether the object moved
    /// on after it was encoded.
    pub(crate) revision: u64,
}

impl ObjectData {
    fn touch(&mut self) {
        self.dirty = true;
        self.revision = self.revision.wrapping_add(1);
    }
}

struct ObjectInner {
    id: ObjectId,
    class: String,
    data: RwLock<ObjectData>,
}

/// Shared handle to a persistent object.
///
/// The id and class are fixed at creation. Attribute writes mark the object
/// dirty; a successful save marks it clean again.
///
/// Handles are reference counted. Objects that refer to each other through
/// attributes set by the application keep each other alive; cycles built by
/// a load hold their closing edge weakly and are freed normally.
///
/// # Example
///
/// ```rust
/// use persistdb_core::{ObjectRef, ObjectState};
///
/// let note = ObjectRef::new("Note");
/// note.set("title", "groceries").set("priority", 2);
///
/// assert_eq!(note.state(), ObjectState::Transient);
/// assert!(note.is_dirty());
/// assert_eq!(note.value("priority").and_then(|v| v.as_integer()), Some(2));
/// ```
#[derive(Clone)]
pub struct ObjectRef(Arc<ObjectInner>);

impl ObjectRef {
    /// Creates a new transient object of `class` with a fresh id.
    pub fn new(class: impl Into<String>) -> Self {
        Self::build(
            ObjectId::new(),
            class.into(),
            ObjectData {
                dirty: true,
                ..ObjectData::default()
            },
        )
    }

    /// Creates an empty, clean handle for an object about to be loaded.
    pub(crate) fn placeholder(id: ObjectId, class: String) -> Self {
        Self::build(id, class, ObjectData::default())
    }

    fn build(id: ObjectId, class: String, data: ObjectData) -> Self {
        Self(Arc::new(ObjectInner {
            id,
            class,
            data: RwLock::new(data),
        }))
    }

    /// The object id.
    #[must_use]
    pub fn id(&self) -> &ObjectId {
        &self.0.id
    }

    /// The class name.
    #[must_use]
    pub fn class(&self) -> &str {
        &self.0.class
    }

    /// Returns a copy of an attribute.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Attr> {
        self.0.data.read().attributes.get(name).map(Slot::resolve)
    }

    /// Returns a plain attribute value. Objects yield `None`.
    #[must_use]
    pub fn value(&self, name: &str) -> Option<Value> {
        match self.get(name)? {
            Attr::Value(v) => Some(v),
            Attr::Object(_) => None,
        }
    }

    /// Returns an object-valued attribute.
    #[must_use]
    pub fn object(&self, name: &str) -> Option<ObjectRef> {
        match self.get(name)? {
            Attr::Object(o) => Some(o),
            Attr::Value(_) => None,
        }
    }

    /// Sets an attribute and marks the object dirty.
    ///
    /// Names are checked when the object is saved.
    pub fn set(&self, name: impl Into<String>, value: impl Into<Attr>) -> &Self {
        let mut data = self.0.data.write();
        data.attributes.insert(name.into(), Slot::Held(value.into()));
        data.touch();
        self
    }

    /// Removes an attribute, marking the object dirty if it existed.
    pub fn remove(&self, name: &str) -> Option<Attr> {
        let mut data = self.0.data.write();
        let removed = data.attributes.remove(name)?;
        data.touch();
        Some(removed.resolve())
    }

    /// Returns true if the attribute is set.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.0.data.read().attributes.contains_key(name)
    }

    /// Attribute names in order.
    #[must_use]
    pub fn attribute_names(&self) -> Vec<String> {
        self.0.data.read().attributes.keys().cloned().collect()
    }

    /// Stores a serializable value as an attribute.
    ///
    /// # Errors
    ///
    /// Returns a codec error if `value` has no document form (a NaN float,
    /// or a map with non-text keys).
    pub fn set_as<T: Serialize + ?Sized>(&self, name: impl Into<String>, value: &T) -> CoreResult<()> {
        self.set(name, Attr::Value(to_value(value)?));
        Ok(())
    }

    /// Reads a plain attribute into a deserializable type.
    ///
    /// # Errors
    ///
    /// Returns an error if the attribute holds an object or does not have
    /// the shape of `T`.
    pub fn get_as<T: DeserializeOwned>(&self, name: &str) -> CoreResult<Option<T>> {
        match self.get(name) {
            None => Ok(None),
            Some(Attr::Value(v)) => Ok(Some(from_value(&v)?)),
            Some(Attr::Object(_)) => Err(CoreError::invalid_attribute(
                name,
                "holds an object, not a value",
            )),
        }
    }

    /// When the object was first saved.
    #[must_use]
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.0.data.read().created_at
    }

    /// When the object was last saved, if saved more than once.
    #[must_use]
    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.0.data.read().updated_at
    }

    /// Lifecycle state.
    #[must_use]
    pub fn state(&self) -> ObjectState {
        let data = self.0.data.read();
        match (data.created_at, data.updated_at) {
            (None, _) => ObjectState::Transient,
            (Some(_), None) => ObjectState::Persisted,
            (Some(_), Some(_)) => ObjectState::Updated,
        }
    }

    /// Returns true if the object has never been saved.
    #[must_use]
    pub fn is_new(&self) -> bool {
        self.created_at().is_none()
    }

    /// Returns true if the object changed since it was last saved or loaded.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.0.data.read().dirty
    }

    /// Clears the dirty flag.
    pub fn mark_clean(&self) {
        self.0.data.write().dirty = false;
    }

    /// Sets the dirty flag.
    pub fn mark_dirty(&self) {
        self.0.data.write().touch();
    }

    /// Returns true if both handles point at the same in-memory object.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Creates a handle that does not keep the object alive.
    #[must_use]
    pub fn downgrade(&self) -> WeakObjectRef {
        WeakObjectRef(Arc::downgrade(&self.0))
    }

    pub(crate) fn snapshot(&self) -> ObjectData {
        self.0.data.read().clone()
    }

    pub(crate) fn fill(&self, data: ObjectData) {
        *self.0.data.write() = data;
    }

    /// Timestamps the next save will store: `(created_at, updated_at)`.
    ///
    /// Never earlier than the timestamps already held, so they stay
    /// non-decreasing even if the clock steps back.
    pub(crate) fn save_stamps(
        data: &ObjectData,
        now: DateTime<Utc>,
    ) -> (DateTime<Utc>, Option<DateTime<Utc>>) {
        match data.created_at {
            None => (now, None),
            Some(created) => {
                let floor = data.updated_at.unwrap_or(created);
                (created, Some(now.max(floor)))
            }
        }
    }

    /// Applies a committed save of the state at `revision`.
    ///
    /// The object stays dirty if it was changed after that state was
    /// encoded.
    pub(crate) fn record_saved(&self, now: DateTime<Utc>, revision: u64) {
        let mut data = self.0.data.write();
        let (created, updated) = Self::save_stamps(&data, now);
        data.created_at = Some(created);
        data.updated_at = updated;
        if data.revision == revision {
            data.dirty = false;
        }
    }

    pub(crate) fn revision(&self) -> u64 {
        self.0.data.read().revision
    }
}

/// A non-owning handle to a persistent object, made by
/// [`ObjectRef::downgrade`].
#[derive(Clone)]
pub struct WeakObjectRef(Weak<ObjectInner>);

impl WeakObjectRef {
    /// Returns a handle if the object is still alive.
    #[must_use]
    pub fn upgrade(&self) -> Option<ObjectRef> {
        self.0.upgrade().map(ObjectRef)
    }
}

impl fmt::Debug for WeakObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.upgrade() {
            Some(object) => f.debug_tuple("WeakObjectRef").field(object.id()).finish(),
            None => f.write_str("WeakObjectRef(dropped)"),
        }
    }
}

impl PartialEq for ObjectRef {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for ObjectRef {}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Attribute values are left out: object graphs may be cyclic.
        f.debug_struct("ObjectRef")
            .field("id", self.id())
            .field("class", &self.class())
            .field("attributes", &self.attribute_names())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use serde::Deserialize;

    #[test]
    fn new_object_is_transient_and_dirty() {
        let obj = ObjectRef::new("A");
        assert_eq!(obj.class(), "A");
        assert_eq!(obj.state(), ObjectState::Transient);
        assert!(obj.is_new());
        assert!(obj.is_dirty());
        obj.mark_clean();
        assert!(!obj.is_dirty());
        obj.set("foo", 1);
        assert!(obj.is_dirty());
    }

    #[test]
    fn attributes_round_trip() {
        let obj = ObjectRef::new("A");
        let other = ObjectRef::new("B");
        obj.set("n", 5).set("s", "x").set("list", vec![1, 2]).set("r", &other);

        assert_eq!(obj.value("n"), Some(Value::Integer(5)));
        assert_eq!(obj.value("s"), Some(Value::from("x")));
        assert!(obj.object("r").unwrap().ptr_eq(&other));
        assert_eq!(obj.value("r"), None);
        assert_eq!(obj.attribute_names(), vec!["list", "n", "r", "s"]);

        assert!(obj.remove("n").is_some());
        assert!(!obj.contains("n"));
    }

    #[test]
    fn clones_share_state() {
        let a = ObjectRef::new("A");
        let b = a.clone();
        b.set("foo", true);
        assert_eq!(a.value("foo"), Some(Value::Bool(true)));
        assert!(a.ptr_eq(&b));
    }

    #[test]
    fn state_follows_saves() {
        let obj = ObjectRef::new("A");
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        obj.record_saved(t0, obj.revision());
        assert_eq!(obj.state(), ObjectState::Persisted);
        assert_eq!(obj.created_at(), Some(t0));
        assert_eq!(obj.updated_at(), None);
        assert!(!obj.is_dirty());

        let t1 = t0 + Duration::seconds(5);
        obj.record_saved(t1, obj.revision());
        assert_eq!(obj.state(), ObjectState::Updated);
        assert_eq!(obj.created_at(), Some(t0));
        assert_eq!(obj.updated_at(), Some(t1));

        // A clock stepping back never moves updated_at backwards.
        obj.record_saved(t0, obj.revision());
        assert_eq!(obj.updated_at(), Some(t1));
    }

    #[test]
    fn changes_after_encoding_stay_dirty() {
        let obj = ObjectRef::new("A");
        let encoded_at = obj.snapshot().revision;
        obj.set("late", true);
        obj.record_saved(Utc::now(), encoded_at);
        assert_eq!(obj.state(), ObjectState::Persisted);
        assert!(obj.is_dirty());

        let encoded_at = obj.revision();
        obj.record_saved(Utc::now(), encoded_at);
        assert!(!obj.is_dirty());
        // Removing nothing is not a change.
        assert!(obj.remove("missing").is_none());
        assert_eq!(obj.revision(), encoded_at);
    }

    #[test]
    fn back_slots_read_as_ids_once_dropped() {
        let target = ObjectRef::new("A");
        let slot = Slot::Back(target.id().clone(), target.downgrade());
        assert!(slot.resolve().as_object().unwrap().ptr_eq(&target));

        let id = target.id().to_string();
        let weak = target.downgrade();
        drop(target);
        assert!(weak.upgrade().is_none());
        assert_eq!(slot.resolve(), Attr::Value(Value::Text(id)));
    }

    #[test]
    fn timestamps_are_fixed_width_text() {
        let early = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let late = early + Duration::microseconds(1500);
        let (a, b) = (timestamp_to_value(early), timestamp_to_value(late));
        assert_eq!(a, Value::from("2024-01-01T00:00:00.000000Z"));
        assert!(a.as_text().unwrap() < b.as_text().unwrap());
        assert_eq!(timestamp_from_value(&b), Some(late));
        assert_eq!(timestamp_from_value(&Value::Integer(1)), None);
    }

    #[test]
    fn typed_access() {
        #[derive(Serialize, Deserialize, Debug, PartialEq)]
        struct Address {
            city: String,
            zip: u32,
        }

        let obj = ObjectRef::new("Person");
        let address = Address {
            city: "Moshi".into(),
            zip: 25101,
        };
        obj.set_as("address", &address).unwrap();
        assert_eq!(obj.get_as::<Address>("address").unwrap(), Some(address));
        assert_eq!(obj.get_as::<Address>("missing").unwrap(), None);

        obj.set("friend", ObjectRef::new("Person"));
        assert!(obj.get_as::<Address>("friend").is_err());
        obj.set_as("ratio", &0.5f64).unwrap();
        assert_eq!(obj.value("ratio"), Some(Value::Float(0.5)));
        assert!(obj.set_as("ratio", &f64::NAN).is_err());
    }

    #[test]
    fn equality_is_by_id() {
        let a = ObjectRef::new("A");
        let copy = ObjectRef::placeholder(a.id().clone(), "A".into());
        assert_eq!(a, copy);
        assert!(!a.ptr_eq(&copy));
        assert_ne!(a, ObjectRef::new("A"));
        assert_eq!(Attr::from(&a), Attr::Object(copy));
        assert_eq!(Attr::from(&a).to_operand(), Value::Text(a.id().to_string()));
    }
}
