//! Class declarations.
//!
//! A class is a name plus the set of attributes whose stored form is the
//! referenced object's id. Declarations are validated when registered, so a
//! bad declaration never reaches a save.

use crate::error::{CoreError, CoreResult};
use crate::object::ObjectRef;
use persistdb_storage::{CLASS_FIELD, CREATED_AT_FIELD, ID_FIELD, UPDATED_AT_FIELD};
use std::collections::{BTreeSet, HashMap};

/// Returns true if `name` cannot be used as an attribute name.
///
/// The document root reserves `id`, the timestamps and every `$`-prefixed
/// name for bookkeeping.
#[must_use]
pub fn is_reserved_attribute(name: &str) -> bool {
    name.is_empty()
        || name.starts_with('$')
        || matches!(name, ID_FIELD | CREATED_AT_FIELD | UPDATED_AT_FIELD)
        || name == CLASS_FIELD
}

/// Declaration of a persistent class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassDef {
    /// Class name, stored in every row of the class.
    pub name: String,
    /// Attributes stored as the referenced object's id.
    pub references: BTreeSet<String>,
}

impl ClassDef {
    /// A class with no reference attributes.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            references: BTreeSet::new(),
        }
    }

    /// Declares a reference attribute.
    #[must_use]
    pub fn reference(mut self, name: impl Into<String>) -> Self {
        self.references.insert(name.into());
        self
    }

    /// Builds a class, rejecting duplicate reference names.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Configuration`] if the declaration is invalid.
    pub fn with_references<I, S>(name: impl Into<String>, references: I) -> CoreResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut def = Self::new(name);
        for reference in references {
            let reference = reference.into();
            if !def.references.insert(reference.clone()) {
                return Err(CoreError::configuration(format!(
                    "class '{}' declares reference '{}' twice",
                    def.name, reference
                )));
            }
        }
        def.validate()?;
        Ok(def)
    }

    /// Returns true if `attribute` is a declared reference.
    #[must_use]
    pub fn is_reference(&self, attribute: &str) -> bool {
        self.references.contains(attribute)
    }

    /// Checks the declaration.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Configuration`] for an empty or `$`-prefixed
    /// class name, or a reference that is reserved or contains a dot.
    pub fn validate(&self) -> CoreResult<()> {
        if self.name.is_empty() {
            return Err(CoreError::configuration("class name is empty"));
        }
        if self.name.starts_with('$') {
            return Err(CoreError::configuration(format!(
                "class name '{}' cannot start with '$'",
                self.name
            )));
        }
        for reference in &self.references {
            if reference.contains('.') {
                return Err(CoreError::configuration(format!(
                    "reference '{}' of class '{}' is a path, not an attribute",
                    reference, self.name
                )));
            }
            if is_reserved_attribute(reference) {
                return Err(CoreError::configuration(format!(
                    "reference '{}' of class '{}' is a reserved name",
                    reference, self.name
                )));
            }
        }
        Ok(())
    }
}

/// A Rust type standing for a persistent class.
///
/// # Example
///
/// ```rust
/// use persistdb_core::{Database, Persistent};
///
/// struct Bar;
///
/// impl Persistent for Bar {
///     const CLASS: &'static str = "Bar";
///     const REFERENCES: &'static [&'static str] = &["a_ref"];
/// }
///
/// let db = Database::open_in_memory().unwrap();
/// db.register::<Bar>().unwrap();
///
/// let b = Bar::create();
/// let c = Bar::create();
/// c.set("baz", "yes");
/// b.set("a_ref", &c);
/// db.save(&b).unwrap();
///
/// let loaded = db.get(b.id()).unwrap().unwrap();
/// let baz = loaded.object("a_ref").and_then(|c| c.value("baz"));
/// assert_eq!(baz.as_ref().and_then(|v| v.as_text()), Some("yes"));
/// ```
pub trait Persistent {
    /// Class name.
    const CLASS: &'static str;

    /// Attributes stored by id.
    const REFERENCES: &'static [&'static str] = &[];

    /// The class declaration.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Configuration`] if the declaration is invalid.
    fn class_def() -> CoreResult<ClassDef> {
        ClassDef::with_references(Self::CLASS, Self::REFERENCES.iter().copied())
    }

    /// Creates a new transient object of this class.
    fn create() -> ObjectRef {
        ObjectRef::new(Self::CLASS)
    }
}

/// Registered class declarations.
///
/// Classes that were never registered behave as classes with no
/// references.
#[derive(Debug, Clone, Default)]
pub struct ClassRegistry {
    classes: HashMap<String, ClassDef>,
}

impl ClassRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a class.
    ///
    /// Registering an identical declaration again is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Configuration`] if the declaration is invalid or
    /// differs from one already registered under the same name.
    pub fn register(&mut self, def: ClassDef) -> CoreResult<()> {
        def.validate()?;
        match self.classes.get(&def.name) {
            Some(existing) if *existing == def => Ok(()),
            Some(existing) => Err(CoreError::configuration(format!(
                "class '{}' is already registered with references {:?}",
                existing.name, existing.references
            ))),
            None => {
                self.classes.insert(def.name.clone(), def);
                Ok(())
            }
        }
    }

    /// Looks up a declaration.
    #[must_use]
    pub fn get(&self, class: &str) -> Option<&ClassDef> {
        self.classes.get(class)
    }

    /// Returns true if `attribute` of `class` is stored by id.
    #[must_use]
    pub fn is_reference(&self, class: &str, attribute: &str) -> bool {
        self.classes
            .get(class)
            .is_some_and(|def| def.is_reference(attribute))
    }

    /// Number of registered classes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}
