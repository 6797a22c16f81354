//! Entity types and their two-phase field declarations.
//!
//! An [`EntityType`] is built from a validated descriptor and starts with
//! every field *unbound*: handlers may be registered, but store operations
//! fail fast. Binding the type to an [`crate::context::EngineContext`]
//! delegates each field to its store-backed implementation exactly once;
//! from then on handler registration is rejected. The transition is
//! one-way and happens at most once per field.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use tether_types::{
    CollectionDescriptor, CollectionKind, ColumnDescriptor, ColumnKind, EntityDescriptor,
    ReferenceDescriptor,
};

use crate::error::EngineError;
use crate::registry::{CollectionEntryHandler, ValueUpdateHandler};

/// Lock a mutex, recovering the guard if a writer panicked mid-update.
fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// A declared scalar field, unbound until its type is bound.
pub struct ValueField {
    type_tag: String,
    column: ColumnDescriptor,
    handlers: Mutex<Vec<ValueUpdateHandler>>,
    bound: AtomicBool,
}

impl ValueField {
    fn new(type_tag: &str, column: ColumnDescriptor) -> Self {
        Self {
            type_tag: type_tag.to_owned(),
            column,
            handlers: Mutex::new(Vec::new()),
            bound: AtomicBool::new(false),
        }
    }

    /// The column this field reads and writes.
    pub const fn column(&self) -> &ColumnDescriptor {
        &self.column
    }

    /// Whether the field has been delegated to the store.
    pub fn is_bound(&self) -> bool {
        self.bound.load(Ordering::Acquire)
    }

    /// Register an update handler. Handlers fire asynchronously with the
    /// decoded (old, new) values whenever a matching change notification
    /// arrives for this column.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::AlreadyBound`] once the type is bound.
    pub fn on_update<H>(&self, handler: H) -> Result<(), EngineError>
    where
        H: Fn(crate::entity::EntityHandle, crate::registry::ValueChange) + Send + Sync + 'static,
    {
        if self.is_bound() {
            return Err(EngineError::AlreadyBound {
                type_tag: self.type_tag.clone(),
                field: self.column.name.clone(),
            });
        }
        lock_unpoisoned(&self.handlers).push(std::sync::Arc::new(handler));
        Ok(())
    }

    /// Flip to bound, handing the registered handlers to the caller.
    pub(crate) fn bind(&self) -> Result<Vec<ValueUpdateHandler>, EngineError> {
        if self.bound.swap(true, Ordering::AcqRel) {
            return Err(EngineError::AlreadyBound {
                type_tag: self.type_tag.clone(),
                field: self.column.name.clone(),
            });
        }
        Ok(std::mem::take(&mut *lock_unpoisoned(&self.handlers)))
    }

    /// Fail with [`EngineError::NotBound`] if the field is still unbound.
    pub(crate) fn ensure_bound(&self) -> Result<(), EngineError> {
        if self.is_bound() {
            Ok(())
        } else {
            Err(EngineError::NotBound {
                type_tag: self.type_tag.clone(),
                field: self.column.name.clone(),
            })
        }
    }
}

/// A declared one-to-one reference field.
pub struct ReferenceField {
    type_tag: String,
    descriptor: ReferenceDescriptor,
    bound: AtomicBool,
}

impl ReferenceField {
    fn new(type_tag: &str, descriptor: ReferenceDescriptor) -> Self {
        Self {
            type_tag: type_tag.to_owned(),
            descriptor,
            bound: AtomicBool::new(false),
        }
    }

    /// The reference declaration.
    pub const fn descriptor(&self) -> &ReferenceDescriptor {
        &self.descriptor
    }

    /// Whether the field has been delegated to the store.
    pub fn is_bound(&self) -> bool {
        self.bound.load(Ordering::Acquire)
    }

    pub(crate) fn bind(&self) -> Result<(), EngineError> {
        if self.bound.swap(true, Ordering::AcqRel) {
            return Err(EngineError::AlreadyBound {
                type_tag: self.type_tag.clone(),
                field: self.descriptor.field.clone(),
            });
        }
        Ok(())
    }

    pub(crate) fn ensure_bound(&self) -> Result<(), EngineError> {
        if self.is_bound() {
            Ok(())
        } else {
            Err(EngineError::NotBound {
                type_tag: self.type_tag.clone(),
                field: self.descriptor.field.clone(),
            })
        }
    }
}

/// A declared collection field (one-to-many or many-to-many).
pub struct CollectionField {
    type_tag: String,
    descriptor: CollectionDescriptor,
    add_handlers: Mutex<Vec<CollectionEntryHandler>>,
    remove_handlers: Mutex<Vec<CollectionEntryHandler>>,
    bound: AtomicBool,
}

impl CollectionField {
    fn new(type_tag: &str, descriptor: CollectionDescriptor) -> Self {
        Self {
            type_tag: type_tag.to_owned(),
            descriptor,
            add_handlers: Mutex::new(Vec::new()),
            remove_handlers: Mutex::new(Vec::new()),
            bound: AtomicBool::new(false),
        }
    }

    /// The collection declaration.
    pub const fn descriptor(&self) -> &CollectionDescriptor {
        &self.descriptor
    }

    /// Whether the field has been delegated to the store.
    pub fn is_bound(&self) -> bool {
        self.bound.load(Ordering::Acquire)
    }

    /// Register a handler fired after an entry is added through this
    /// collection's proxy.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::AlreadyBound`] once the type is bound.
    pub fn on_add<H>(&self, handler: H) -> Result<(), EngineError>
    where
        H: Fn(crate::entity::EntityHandle, tether_types::IdentityTuple) + Send + Sync + 'static,
    {
        self.register(&self.add_handlers, std::sync::Arc::new(handler))
    }

    /// Register a handler fired after an entry is removed through this
    /// collection's proxy.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::AlreadyBound`] once the type is bound.
    pub fn on_remove<H>(&self, handler: H) -> Result<(), EngineError>
    where
        H: Fn(crate::entity::EntityHandle, tether_types::IdentityTuple) + Send + Sync + 'static,
    {
        self.register(&self.remove_handlers, std::sync::Arc::new(handler))
    }

    fn register(
        &self,
        slot: &Mutex<Vec<CollectionEntryHandler>>,
        handler: CollectionEntryHandler,
    ) -> Result<(), EngineError> {
        if self.is_bound() {
            return Err(EngineError::AlreadyBound {
                type_tag: self.type_tag.clone(),
                field: self.descriptor.field.clone(),
            });
        }
        lock_unpoisoned(slot).push(handler);
        Ok(())
    }

    /// Handlers fired on local adds. Stable after binding.
    pub(crate) fn add_handlers(&self) -> Vec<CollectionEntryHandler> {
        lock_unpoisoned(&self.add_handlers).clone()
    }

    /// Handlers fired on local removes. Stable after binding.
    pub(crate) fn remove_handlers(&self) -> Vec<CollectionEntryHandler> {
        lock_unpoisoned(&self.remove_handlers).clone()
    }

    pub(crate) fn bind(&self) -> Result<(), EngineError> {
        if self.bound.swap(true, Ordering::AcqRel) {
            return Err(EngineError::AlreadyBound {
                type_tag: self.type_tag.clone(),
                field: self.descriptor.field.clone(),
            });
        }
        Ok(())
    }

    pub(crate) fn ensure_bound(&self) -> Result<(), EngineError> {
        if self.is_bound() {
            Ok(())
        } else {
            Err(EngineError::NotBound {
                type_tag: self.type_tag.clone(),
                field: self.descriptor.field.clone(),
            })
        }
    }
}

/// A fully declared entity type: descriptor plus field templates.
///
/// Created unbound; handler registration happens here, then the type is
/// handed to [`crate::context::EngineContext::bind`] which delegates every
/// field to the store.
pub struct EntityType {
    descriptor: std::sync::Arc<EntityDescriptor>,
    values: BTreeMap<String, std::sync::Arc<ValueField>>,
    references: BTreeMap<String, std::sync::Arc<ReferenceField>>,
    collections: BTreeMap<String, std::sync::Arc<CollectionField>>,
}

impl EntityType {
    /// Build an entity type from a descriptor, creating one unbound value
    /// field per column plus the declared reference and collection fields.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Type`] if the descriptor is structurally
    /// invalid, or if a many-to-many collection carries no join table.
    pub fn new(descriptor: EntityDescriptor) -> Result<Self, EngineError> {
        descriptor.validate()?;
        for collection in &descriptor.collections {
            if collection.kind == CollectionKind::ManyToMany && collection.join.is_none() {
                return Err(EngineError::Type(tether_types::TypeError::Descriptor(
                    format!(
                        "many-to-many collection `{}` on `{}` has no join table",
                        collection.field, descriptor.type_tag
                    ),
                )));
            }
        }

        let tag = descriptor.type_tag.clone();
        let values = descriptor
            .columns
            .iter()
            .map(|c| {
                (
                    c.name.clone(),
                    std::sync::Arc::new(ValueField::new(&tag, c.clone())),
                )
            })
            .collect();
        let references = descriptor
            .references
            .iter()
            .map(|r| {
                (
                    r.field.clone(),
                    std::sync::Arc::new(ReferenceField::new(&tag, r.clone())),
                )
            })
            .collect();
        let collections = descriptor
            .collections
            .iter()
            .map(|c| {
                (
                    c.field.clone(),
                    std::sync::Arc::new(CollectionField::new(&tag, c.clone())),
                )
            })
            .collect();

        Ok(Self {
            descriptor: std::sync::Arc::new(descriptor),
            values,
            references,
            collections,
        })
    }

    /// The validated descriptor.
    pub fn descriptor(&self) -> &std::sync::Arc<EntityDescriptor> {
        &self.descriptor
    }

    /// The type tag.
    pub fn type_tag(&self) -> &str {
        &self.descriptor.type_tag
    }

    /// Look up a value field by column name.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::UnknownField`] if no such column exists.
    pub fn value(&self, field: &str) -> Result<&std::sync::Arc<ValueField>, EngineError> {
        self.values.get(field).ok_or_else(|| EngineError::UnknownField {
            type_tag: self.descriptor.type_tag.clone(),
            field: field.to_owned(),
        })
    }

    /// Look up a reference field by name.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::UnknownField`] if no such field exists.
    pub fn reference(&self, field: &str) -> Result<&std::sync::Arc<ReferenceField>, EngineError> {
        self.references
            .get(field)
            .ok_or_else(|| EngineError::UnknownField {
                type_tag: self.descriptor.type_tag.clone(),
                field: field.to_owned(),
            })
    }

    /// Look up a collection field by name.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::UnknownField`] if no such field exists.
    pub fn collection(&self, field: &str) -> Result<&std::sync::Arc<CollectionField>, EngineError> {
        self.collections
            .get(field)
            .ok_or_else(|| EngineError::UnknownField {
                type_tag: self.descriptor.type_tag.clone(),
                field: field.to_owned(),
            })
    }

    /// All value fields, by column name.
    pub(crate) const fn values(&self) -> &BTreeMap<String, std::sync::Arc<ValueField>> {
        &self.values
    }

    /// All reference fields, by field name.
    pub(crate) const fn references(&self) -> &BTreeMap<String, std::sync::Arc<ReferenceField>> {
        &self.references
    }

    /// All collection fields, by field name.
    pub(crate) const fn collections(&self) -> &BTreeMap<String, std::sync::Arc<CollectionField>> {
        &self.collections
    }

    /// A plain column's kind, used by dispatch to tell plain from foreign.
    pub(crate) fn column_kind(&self, name: &str) -> Option<&ColumnKind> {
        self.descriptor.column(name).map(|c| &c.kind)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, clippy::unwrap_used)]

    use tether_types::{ColumnType, TableRef};

    use super::*;

    fn descriptor() -> EntityDescriptor {
        EntityDescriptor::new("user", TableRef::new("public", "users"))
            .with_column(ColumnDescriptor::new("id", ColumnType::Int).identity())
            .with_column(ColumnDescriptor::new("name", ColumnType::Text))
    }

    #[test]
    fn fields_start_unbound_and_bind_once() {
        let entity = EntityType::new(descriptor()).expect("type");
        let field = entity.value("name").expect("field");
        assert!(!field.is_bound());
        assert!(field.ensure_bound().is_err());

        field.bind().expect("first bind");
        assert!(field.is_bound());
        assert!(field.ensure_bound().is_ok());
        assert!(matches!(
            field.bind(),
            Err(EngineError::AlreadyBound { .. })
        ));
    }

    #[test]
    fn handler_registration_is_rejected_after_binding() {
        let entity = EntityType::new(descriptor()).expect("type");
        let field = entity.value("name").expect("field");

        field.on_update(|_, _| {}).expect("pre-bind registration");
        let handlers = field.bind().expect("bind");
        assert_eq!(handlers.len(), 1);

        assert!(matches!(
            field.on_update(|_, _| {}),
            Err(EngineError::AlreadyBound { .. })
        ));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let entity = EntityType::new(descriptor()).expect("type");
        assert!(matches!(
            entity.value("ghost"),
            Err(EngineError::UnknownField { .. })
        ));
        assert!(matches!(
            entity.reference("ghost"),
            Err(EngineError::UnknownField { .. })
        ));
    }

    #[test]
    fn many_to_many_without_join_is_rejected() {
        use tether_types::{CollectionDescriptor, Link};

        let users = TableRef::new("public", "users");
        let groups = TableRef::new("public", "groups");
        let desc = descriptor().with_collection(CollectionDescriptor {
            field: "groups".to_owned(),
            target: "group".to_owned(),
            kind: CollectionKind::ManyToMany,
            link: Link::new(users, groups, &[("id", "id")]),
            join: None,
        });
        assert!(EntityType::new(desc).is_err());
    }
}
