//! Reference resolution between live objects and stored documents.
//!
//! On save, attributes a class declares as references are written as the
//! referenced object's id, and the referenced object is queued to be saved
//! first. Other object-valued attributes are embedded as full copies tagged
//! with their class. On load, stored ids are resolved back to objects
//! through the cache, and objects already being loaded bind to the same
//! handle so cyclic graphs terminate. Such a back edge is held weakly, so
//! a loaded cycle owns no strong loop. Objects a load creates reach the
//! cache only once the whole load has succeeded.

use crate::cache::LruCache;
use crate::class::{is_reserved_attribute, ClassRegistry};
use crate::error::{CoreError, CoreResult};
use crate::object::{
    timestamp_from_value, timestamp_to_value, Attr, ObjectData, ObjectId, ObjectRef, Slot,
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use persistdb_codec::Value;
use persistdb_storage::{
    DocumentStore, Row, WriteTransaction, CLASS_FIELD, CREATED_AT_FIELD, ID_FIELD,
    UPDATED_AT_FIELD,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{trace, warn};

/// The object cache shared by a database.
pub(crate) type ObjectCache = Mutex<LruCache<ObjectId, ObjectRef>>;

/// A stored document plus the referenced objects that must be saved first.
#[derive(Debug)]
pub(crate) struct EncodedObject {
    pub(crate) document: Value,
    pub(crate) pending: Vec<ObjectRef>,
}

/// Turns objects into documents.
pub(crate) struct Encoder<'a> {
    classes: &'a ClassRegistry,
    pending: Vec<ObjectRef>,
    embedding: Vec<ObjectId>,
}

impl<'a> Encoder<'a> {
    pub(crate) fn new(classes: &'a ClassRegistry) -> Self {
        Self {
            classes,
            pending: Vec::new(),
            embedding: Vec::new(),
        }
    }

    /// Encodes `object` as a root document stamped with the given times.
    pub(crate) fn encode(
        mut self,
        object: &ObjectRef,
        data: &ObjectData,
        created_at: DateTime<Utc>,
        updated_at: Option<DateTime<Utc>>,
    ) -> CoreResult<EncodedObject> {
        let mut document = BTreeMap::new();
        document.insert(ID_FIELD.to_string(), Value::from(object.id().as_str()));
        document.insert(CLASS_FIELD.to_string(), Value::from(object.class()));
        document.insert(CREATED_AT_FIELD.to_string(), timestamp_to_value(created_at));
        if let Some(updated_at) = updated_at {
            document.insert(UPDATED_AT_FIELD.to_string(), timestamp_to_value(updated_at));
        }

        self.embedding.push(object.id().clone());
        self.encode_attributes(object.class(), &data.attributes, &mut document)?;

        Ok(EncodedObject {
            document: Value::Map(document),
            pending: self.pending,
        })
    }

    fn encode_attributes(
        &mut self,
        class: &str,
        attributes: &BTreeMap<String, Slot>,
        out: &mut BTreeMap<String, Value>,
    ) -> CoreResult<()> {
        for (name, slot) in attributes {
            if is_reserved_attribute(name) {
                return Err(CoreError::invalid_attribute(name, "the name is reserved"));
            }
            let value = match slot.resolve() {
                Attr::Value(value) => {
                    if value.get(CLASS_FIELD).is_some() {
                        return Err(CoreError::invalid_attribute(
                            name,
                            "maps stored as attributes cannot have a '$class' key",
                        ));
                    }
                    value
                }
                Attr::Object(target) if self.classes.is_reference(class, name) => {
                    let id = Value::from(target.id().as_str());
                    if target.is_new() || target.is_dirty() {
                        self.pending.push(target);
                    }
                    id
                }
                Attr::Object(target) => self.embed(name, &target)?,
            };
            out.insert(name.clone(), value);
        }
        Ok(())
    }

    fn embed(&mut self, name: &str, target: &ObjectRef) -> CoreResult<Value> {
        if self.embedding.contains(target.id()) {
            return Err(CoreError::invalid_attribute(
                name,
                "embedded objects form a cycle; declare the attribute a reference",
            ));
        }
        self.embedding.push(target.id().clone());

        let data = target.snapshot();
        let mut map = BTreeMap::new();
        map.insert(CLASS_FIELD.to_string(), Value::from(target.class()));
        self.encode_attributes(target.class(), &data.attributes, &mut map)?;

        self.embedding.pop();
        Ok(Value::Map(map))
    }
}

/// Anything rows can be fetched from by id.
pub(crate) trait RowSource {
    fn fetch_row(&self, id: &str) -> Option<Row>;

    /// True if the source removed `id` after the cache last saw it.
    fn hides(&self, _id: &str) -> bool {
        false
    }
}

impl RowSource for DocumentStore {
    fn fetch_row(&self, id: &str) -> Option<Row> {
        self.fetch(id)
    }
}

impl RowSource for WriteTransaction<'_> {
    fn fetch_row(&self, id: &str) -> Option<Row> {
        self.fetch(id)
    }

    fn hides(&self, id: &str) -> bool {
        self.is_deleted(id)
    }
}

/// Materializes rows into objects, resolving references.
///
/// One loader serves one logical load: every object it produces is
/// remembered, so an id reached twice yields the same handle.
pub(crate) struct Loader<'a, S: RowSource + ?Sized> {
    classes: &'a ClassRegistry,
    cache: &'a ObjectCache,
    populate_cache: bool,
    source: &'a S,
    loaded: HashMap<ObjectId, ObjectRef>,
    /// Ids whose attributes are being decoded right now.
    in_flight: HashSet<ObjectId>,
    /// Objects built by the current top-level call, in completion order.
    fresh: Vec<ObjectRef>,
}

impl<'a, S: RowSource + ?Sized> Loader<'a, S> {
    pub(crate) fn new(classes: &'a ClassRegistry, cache: &'a ObjectCache, source: &'a S) -> Self {
        Self {
            classes,
            cache,
            populate_cache: true,
            source,
            loaded: HashMap::new(),
            in_flight: HashSet::new(),
            fresh: Vec::new(),
        }
    }

    /// Reads the cache but never fills it.
    ///
    /// Used inside write transactions, whose rows may never be committed.
    pub(crate) fn read_only_cache(mut self) -> Self {
        self.populate_cache = false;
        self
    }

    /// Loads an object by id: loader, then cache, then source. Ids the
    /// source has deleted are missing even if still cached.
    pub(crate) fn load(&mut self, id: &ObjectId) -> CoreResult<Option<ObjectRef>> {
        if let Some(object) = self.loaded.get(id) {
            return Ok(Some(object.clone()));
        }
        if self.source.hides(id.as_str()) {
            return Ok(None);
        }
        if let Some(object) = self.cache.lock().get(id) {
            trace!("cache hit for {}", id);
            return Ok(Some(object));
        }
        match self.source.fetch_row(id.as_str()) {
            Some(row) => self.materialize(row).map(Some),
            None => Ok(None),
        }
    }

    /// Builds an object from a row, ignoring any cached copy.
    ///
    /// The handle is registered before its attributes are decoded, so
    /// references back to it resolve to it. The objects built along the way
    /// are cached only if the outermost call succeeds; on failure they are
    /// forgotten.
    pub(crate) fn materialize(&mut self, row: Row) -> CoreResult<ObjectRef> {
        let outermost = self.in_flight.is_empty();
        let result = self.build(row);
        if outermost {
            let fresh = std::mem::take(&mut self.fresh);
            match &result {
                Ok(_) if self.populate_cache => {
                    let mut cache = self.cache.lock();
                    for object in fresh {
                        cache.put(object.id().clone(), object);
                    }
                }
                Ok(_) => {}
                Err(_) => {
                    self.in_flight.clear();
                    for object in &fresh {
                        self.loaded.remove(object.id());
                    }
                }
            }
        }
        result
    }

    fn build(&mut self, row: Row) -> CoreResult<ObjectRef> {
        let id = ObjectId::from(row.id());
        if let Some(object) = self.loaded.get(&id) {
            return Ok(object.clone());
        }
        let class = row.class().to_string();
        let object = ObjectRef::placeholder(id.clone(), class.clone());
        self.loaded.insert(id.clone(), object.clone());
        self.fresh.push(object.clone());

        self.in_flight.insert(id.clone());
        let data = self.decode_root(&id, &class, row.into_document())?;
        self.in_flight.remove(&id);
        object.fill(data);
        Ok(object)
    }

    fn decode_root(&mut self, id: &ObjectId, class: &str, document: Value) -> CoreResult<ObjectData> {
        let Value::Map(mut fields) = document else {
            return Err(CoreError::malformed_document(id.as_str(), "document is not a map"));
        };
        fields.remove(ID_FIELD);
        fields.remove(CLASS_FIELD);
        let created_at = Self::timestamp(id, &mut fields, CREATED_AT_FIELD)?;
        let updated_at = Self::timestamp(id, &mut fields, UPDATED_AT_FIELD)?;

        Ok(ObjectData {
            attributes: self.decode_attributes(class, fields)?,
            created_at,
            updated_at,
            dirty: false,
            revision: 0,
        })
    }

    fn timestamp(
        id: &ObjectId,
        fields: &mut BTreeMap<String, Value>,
        name: &str,
    ) -> CoreResult<Option<DateTime<Utc>>> {
        match fields.remove(name) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => timestamp_from_value(&value).map(Some).ok_or_else(|| {
                CoreError::malformed_document(id.as_str(), format!("'{name}' is not a timestamp"))
            }),
        }
    }

    fn decode_attributes(
        &mut self,
        class: &str,
        fields: BTreeMap<String, Value>,
    ) -> CoreResult<BTreeMap<String, Slot>> {
        let mut attributes = BTreeMap::new();
        for (name, value) in fields {
            let attr = self.decode_attribute(class, &name, value)?;
            attributes.insert(name, attr);
        }
        Ok(attributes)
    }

    fn decode_attribute(&mut self, class: &str, name: &str, value: Value) -> CoreResult<Slot> {
        if self.classes.is_reference(class, name) {
            if let Value::Text(target) = &value {
                let target_id = ObjectId::from(target.as_str());
                if self.in_flight.contains(&target_id) {
                    if let Some(object) = self.loaded.get(&target_id) {
                        return Ok(Slot::Back(target_id, object.downgrade()));
                    }
                }
                return match self.load(&target_id)? {
                    Some(object) => Ok(Slot::Held(Attr::Object(object))),
                    None => {
                        warn!(
                            "reference {}.{} points at missing object {}",
                            class, name, target_id
                        );
                        Ok(Slot::Held(Attr::Value(value)))
                    }
                };
            }
        }

        match value {
            Value::Map(mut map) => match map.remove(CLASS_FIELD) {
                Some(Value::Text(embedded_class)) => {
                    let attributes = self.decode_attributes(&embedded_class, map)?;
                    let object = ObjectRef::new(embedded_class);
                    object.fill(ObjectData {
                        attributes,
                        created_at: None,
                        updated_at: None,
                        dirty: true,
                        revision: 0,
                    });
                    Ok(Slot::Held(Attr::Object(object)))
                }
                Some(other) => {
                    map.insert(CLASS_FIELD.to_string(), other);
                    Ok(Slot::Held(Attr::Value(Value::Map(map))))
                }
                None => Ok(Slot::Held(Attr::Value(Value::Map(map)))),
            },
            other => Ok(Slot::Held(Attr::Value(other))),
        }
    }
}
