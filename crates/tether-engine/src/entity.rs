//! Live entity instances.
//!
//! One [`EntityInner`] exists per (type, identity tuple) per process; the
//! identity map holds it weakly, so it is reclaimed once no handle remains.
//! An instance carries a deletion flag (set by delete notifications or
//! [`crate::context::EngineContext::mark_deleted`]) and a per-field decoded
//! cache written by proxy `set` calls and by notification dispatch.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use tether_types::{EntityDescriptor, IdentityTuple, ScalarValue};

use crate::context::{EngineContext, EngineShared};
use crate::error::EngineError;
use crate::fields::EntityType;
use crate::proxy::{CollectionProxy, ReferenceProxy, ValueProxy};

fn read_unpoisoned<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    match lock.read() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn write_unpoisoned<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Shared state of one live instance.
pub(crate) struct EntityInner {
    entity_type: Arc<EntityType>,
    identity: RwLock<IdentityTuple>,
    deleted: AtomicBool,
    cache: RwLock<HashMap<String, ScalarValue>>,
}

impl EntityInner {
    pub(crate) fn new(entity_type: Arc<EntityType>, identity: IdentityTuple) -> Self {
        Self {
            entity_type,
            identity: RwLock::new(identity),
            deleted: AtomicBool::new(false),
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub(crate) const fn entity_type(&self) -> &Arc<EntityType> {
        &self.entity_type
    }

    pub(crate) fn identity(&self) -> IdentityTuple {
        read_unpoisoned(&self.identity).clone()
    }

    /// Re-key the instance after an id-column update.
    pub(crate) fn set_identity(&self, identity: IdentityTuple) {
        *write_unpoisoned(&self.identity) = identity;
    }

    pub(crate) fn is_deleted(&self) -> bool {
        self.deleted.load(Ordering::Acquire)
    }

    pub(crate) fn mark_deleted(&self) {
        self.deleted.store(true, Ordering::Release);
    }

    pub(crate) fn cached(&self, field: &str) -> Option<ScalarValue> {
        read_unpoisoned(&self.cache).get(field).cloned()
    }

    pub(crate) fn cache_put(&self, field: &str, value: ScalarValue) {
        write_unpoisoned(&self.cache).insert(field.to_owned(), value);
    }
}

/// A handle to one live, identity-mapped entity instance.
///
/// Cheap to clone; all clones share the same instance. Two handles for the
/// same (type, identity tuple) obtained from the same context are always
/// backed by the same instance ([`Self::same_instance`]).
#[derive(Clone)]
pub struct EntityHandle {
    inner: Arc<EntityInner>,
    shared: Arc<EngineShared>,
}

impl EntityHandle {
    pub(crate) const fn new(inner: Arc<EntityInner>, shared: Arc<EngineShared>) -> Self {
        Self { inner, shared }
    }

    pub(crate) const fn inner(&self) -> &Arc<EntityInner> {
        &self.inner
    }

    /// The owning context.
    pub fn context(&self) -> EngineContext {
        EngineContext::from_shared(Arc::clone(&self.shared))
    }

    /// The entity's type tag.
    pub fn type_tag(&self) -> &str {
        self.inner.entity_type.type_tag()
    }

    /// The entity's descriptor.
    pub fn descriptor(&self) -> &Arc<EntityDescriptor> {
        self.inner.entity_type.descriptor()
    }

    /// The current identity tuple. May change under id-column updates.
    pub fn identity(&self) -> IdentityTuple {
        self.inner.identity()
    }

    /// Whether the backing row has been deleted. Deleted instances reject
    /// every further field operation.
    pub fn is_deleted(&self) -> bool {
        self.inner.is_deleted()
    }

    /// Whether two handles are backed by the same live instance.
    pub fn same_instance(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Fail with [`EngineError::Deleted`] if the instance is deleted.
    pub(crate) fn ensure_live(&self) -> Result<(), EngineError> {
        if self.inner.is_deleted() {
            return Err(EngineError::Deleted {
                type_tag: self.type_tag().to_owned(),
                identity: self.identity(),
            });
        }
        Ok(())
    }

    /// The proxy for a scalar field.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::UnknownField`] if no such column exists.
    pub fn value(&self, field: &str) -> Result<ValueProxy, EngineError> {
        let field = Arc::clone(self.inner.entity_type.value(field)?);
        Ok(ValueProxy::new(self.clone(), field))
    }

    /// The proxy for a one-to-one reference field.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::UnknownField`] if no such field exists.
    pub fn reference(&self, field: &str) -> Result<ReferenceProxy, EngineError> {
        let field = Arc::clone(self.inner.entity_type.reference(field)?);
        Ok(ReferenceProxy::new(self.clone(), field))
    }

    /// The proxy for a collection field.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::UnknownField`] if no such field exists.
    pub fn collection(&self, field: &str) -> Result<CollectionProxy, EngineError> {
        let field = Arc::clone(self.inner.entity_type.collection(field)?);
        Ok(CollectionProxy::new(self.clone(), field))
    }
}

impl std::fmt::Debug for EntityHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityHandle")
            .field("type_tag", &self.type_tag())
            .field("identity", &self.identity())
            .field("deleted", &self.is_deleted())
            .finish()
    }
}
