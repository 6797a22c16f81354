//! The engine context: explicit wiring for one coherence domain.
//!
//! A context bundles the relational store, the identity map, the handler
//! registry, and the write task queue. Nothing here is a process-wide
//! singleton: independent contexts (each with their own store and cache)
//! coexist freely, which is how the integration tests isolate themselves.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use tether_sql::{PgStore, statement};
use tether_types::{ColumnKind, EntityDescriptor, IdentityTuple, Link, ScalarValue, TableRef};

use crate::entity::{EntityHandle, EntityInner};
use crate::error::EngineError;
use crate::fields::EntityType;
use crate::identity_map::{IdentityMap, InstanceKey};
use crate::registry::{HandlerRegistry, ValueRegistration};
use crate::tasks::TaskQueue;

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

/// State shared by every handle, proxy, and listener of one context.
pub(crate) struct EngineShared {
    pub(crate) store: PgStore,
    pub(crate) registry: HandlerRegistry,
    pub(crate) tasks: TaskQueue,
    pub(crate) types: RwLock<BTreeMap<String, Arc<EntityType>>>,
    pub(crate) identity_map: IdentityMap,
}

/// Handle to one coherence domain.
///
/// Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct EngineContext {
    shared: Arc<EngineShared>,
}

impl EngineContext {
    /// Create a context over a connected store.
    pub fn new(store: PgStore) -> Self {
        Self {
            shared: Arc::new(EngineShared {
                store,
                registry: HandlerRegistry::new(),
                tasks: TaskQueue::new(),
                types: RwLock::new(BTreeMap::new()),
                identity_map: IdentityMap::default(),
            }),
        }
    }

    pub(crate) const fn from_shared(shared: Arc<EngineShared>) -> Self {
        Self { shared }
    }

    pub(crate) fn shared(&self) -> &Arc<EngineShared> {
        &self.shared
    }

    /// The underlying relational store.
    pub fn store(&self) -> &PgStore {
        &self.shared.store
    }

    /// The context's write task queue.
    pub fn tasks(&self) -> &TaskQueue {
        &self.shared.tasks
    }

    /// Bind an entity type to the store, delegating every field.
    ///
    /// This is the one-way transition out of the unbound phase: all
    /// registered value handlers move into the dispatch registry, keyed by
    /// the column they watch, and further handler registration on the
    /// type's fields is rejected.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::DuplicateType`] if the tag is already bound,
    /// or [`EngineError::AlreadyBound`] if the type was bound elsewhere.
    pub fn bind(&self, entity_type: EntityType) -> Result<Arc<EntityType>, EngineError> {
        let tag = entity_type.type_tag().to_owned();
        if read_unpoisoned(&self.shared.types).contains_key(&tag) {
            return Err(EngineError::DuplicateType(tag));
        }

        let descriptor = Arc::clone(entity_type.descriptor());
        for (name, field) in entity_type.values() {
            let handlers = field.bind()?;
            let (table, holder_link) = match &field.column().kind {
                ColumnKind::Foreign(link) => (link.from.clone(), Some(link.clone())),
                ColumnKind::Identity | ColumnKind::Plain => (descriptor.table.clone(), None),
            };
            for handler in handlers {
                self.shared.registry.register(
                    table.clone(),
                    name,
                    ValueRegistration {
                        type_tag: tag.clone(),
                        field: name.clone(),
                        column_type: field.column().ty,
                        holder_link: holder_link.clone(),
                        handler,
                    },
                );
            }
        }
        for field in entity_type.references().values() {
            field.bind()?;
        }
        for field in entity_type.collections().values() {
            field.bind()?;
        }

        let entity_type = Arc::new(entity_type);
        write_unpoisoned(&self.shared.types).insert(tag.clone(), Arc::clone(&entity_type));
        tracing::info!(type_tag = tag.as_str(), "Bound entity type");
        Ok(entity_type)
    }

    /// Look up a bound entity type by tag.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::UnknownType`] if the tag is not bound.
    pub fn entity_type(&self, type_tag: &str) -> Result<Arc<EntityType>, EngineError> {
        read_unpoisoned(&self.shared.types)
            .get(type_tag)
            .cloned()
            .ok_or_else(|| EngineError::UnknownType(type_tag.to_owned()))
    }

    /// Snapshot of all bound types. Dispatch-oriented.
    pub(crate) fn types_snapshot(&self) -> Vec<Arc<EntityType>> {
        read_unpoisoned(&self.shared.types).values().cloned().collect()
    }

    /// Resolve the live instance for (type, identity), hydrating lazily.
    ///
    /// A live hit is returned even when marked deleted; callers check the
    /// deletion flag. On miss an existence probe runs against the store;
    /// `None` means no backing row and no live instance. Construction is
    /// double-checked behind a per-tuple guard, so concurrent callers
    /// collapse to one instance.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::UnknownType`] for unbound tags, or
    /// [`EngineError::Sql`] if the existence probe fails.
    pub async fn get_instance(
        &self,
        type_tag: &str,
        identity: &IdentityTuple,
    ) -> Result<Option<EntityHandle>, EngineError> {
        let entity_type = self.entity_type(type_tag)?;
        let key: InstanceKey = (type_tag.to_owned(), identity.clone());

        if let Some(inner) = self.shared.identity_map.lookup(&key) {
            return Ok(Some(EntityHandle::new(inner, Arc::clone(&self.shared))));
        }

        let guard = self.shared.identity_map.construction_guard(&key);
        let _held = guard.lock().await;

        // Double-check: a racing caller may have finished construction
        // while we waited on the guard.
        if let Some(inner) = self.shared.identity_map.lookup(&key) {
            self.shared.identity_map.release_guard(&key);
            return Ok(Some(EntityHandle::new(inner, Arc::clone(&self.shared))));
        }

        let filters = identity_filters(entity_type.descriptor(), identity)?;
        let probe = statement::exists_where(&entity_type.descriptor().table, &filters);
        let present = match self.shared.store.exists(&probe).await {
            Ok(present) => present,
            Err(e) => {
                self.shared.identity_map.release_guard(&key);
                return Err(e.into());
            }
        };
        if !present {
            self.shared.identity_map.release_guard(&key);
            return Ok(None);
        }

        let inner = Arc::new(EntityInner::new(entity_type, identity.clone()));
        self.shared.identity_map.insert(key.clone(), &inner);
        self.shared.identity_map.release_guard(&key);
        tracing::debug!(type_tag, identity = %identity, "Constructed entity instance");
        Ok(Some(EntityHandle::new(inner, Arc::clone(&self.shared))))
    }

    /// Re-key the identity map after an id-column update. No-op when no
    /// live instance exists under the old tuple.
    pub fn update_identity(&self, type_tag: &str, old: &IdentityTuple, new: &IdentityTuple) {
        if self.shared.identity_map.update_identity(type_tag, old, new) {
            tracing::debug!(type_tag, old = %old, new = %new, "Re-keyed entity identity");
        }
    }

    /// Mark an instance deleted; every further field operation on it fails
    /// with [`EngineError::Deleted`].
    pub fn mark_deleted(&self, handle: &EntityHandle) {
        handle.inner().mark_deleted();
    }

    /// Number of live instances in the identity map.
    pub fn live_instances(&self) -> usize {
        self.shared.identity_map.live_count()
    }

    /// Install the change trigger on one table, idempotently.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Sql`] if the DDL fails.
    pub async fn watch_table(&self, table: &TableRef) -> Result<(), EngineError> {
        self.shared.store.install_change_trigger(table).await?;
        Ok(())
    }

    /// Install change triggers for everything a bound type's fields touch:
    /// the entity's own table plus every foreign column's table.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::UnknownType`] for unbound tags, or
    /// [`EngineError::Sql`] if trigger installation fails.
    pub async fn watch(&self, type_tag: &str) -> Result<(), EngineError> {
        let entity_type = self.entity_type(type_tag)?;
        let descriptor = entity_type.descriptor();
        self.watch_table(&descriptor.table).await?;
        for column in &descriptor.columns {
            if let ColumnKind::Foreign(link) = &column.kind {
                self.watch_table(&link.from).await?;
            }
        }
        Ok(())
    }

    /// Resolve the local-column values of a link for one side's row.
    ///
    /// Fast path: when every remote column is one of the side's identity
    /// columns, the values come straight from the tuple. Otherwise a
    /// lookup SELECT fetches the remote columns from the side's row.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::MissingRow`] if the side's row does not
    /// exist, or [`EngineError::Sql`] on store failure.
    pub(crate) async fn resolve_link_values(
        &self,
        link: &Link,
        side: &EntityDescriptor,
        identity: &IdentityTuple,
    ) -> Result<Vec<(String, ScalarValue)>, EngineError> {
        if let Some(direct) = remap_through_identity(link, side, identity) {
            return Ok(direct);
        }

        let remote_columns = link.remote_columns();
        let mut types = Vec::with_capacity(remote_columns.len());
        for name in &remote_columns {
            let ty = side
                .column(name)
                .map(|c| c.ty)
                .ok_or_else(|| EngineError::Type(tether_types::TypeError::MissingColumn(name.clone())))?;
            types.push(ty);
        }

        let filters = identity_filters(side, identity)?;
        let lookup = statement::select_where(&side.table, &remote_columns, &filters);
        let rows = self.shared.store.fetch_rows(&lookup, &types).await?;
        let Some(row) = rows.into_iter().next() else {
            return Err(EngineError::MissingRow {
                type_tag: side.type_tag.clone(),
                identity: identity.clone(),
            });
        };

        Ok(link
            .pairs
            .iter()
            .zip(row)
            .map(|(pair, value)| (pair.local.clone(), value))
            .collect())
    }
}

/// Pair a descriptor's identity columns with a tuple's values.
pub(crate) fn identity_filters(
    descriptor: &EntityDescriptor,
    identity: &IdentityTuple,
) -> Result<Vec<(String, ScalarValue)>, EngineError> {
    if descriptor.identity_columns.len() != identity.len() {
        return Err(EngineError::Type(tether_types::TypeError::Descriptor(
            format!(
                "identity arity mismatch for `{}`: {} columns, {} values",
                descriptor.type_tag,
                descriptor.identity_columns.len(),
                identity.len()
            ),
        )));
    }
    Ok(descriptor
        .identity_columns
        .iter()
        .cloned()
        .zip(identity.values().iter().cloned())
        .collect())
}

/// Remap a link's local columns from a side's identity tuple, if every
/// remote column is one of the side's identity columns.
pub(crate) fn remap_through_identity(
    link: &Link,
    side: &EntityDescriptor,
    identity: &IdentityTuple,
) -> Option<Vec<(String, ScalarValue)>> {
    let mut out = Vec::with_capacity(link.pairs.len());
    for pair in &link.pairs {
        let position = side
            .identity_columns
            .iter()
            .position(|c| *c == pair.remote)?;
        let value = identity.values().get(position)?.clone();
        out.push((pair.local.clone(), value));
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]

    use tether_types::{ColumnDescriptor, ColumnType, TableRef};

    use super::*;

    fn users_descriptor() -> EntityDescriptor {
        EntityDescriptor::new("user", TableRef::new("public", "users"))
            .with_column(ColumnDescriptor::new("id", ColumnType::Int).identity())
            .with_column(ColumnDescriptor::new("name", ColumnType::Text))
    }

    #[test]
    fn identity_filters_pair_columns_with_values() {
        let filters = identity_filters(
            &users_descriptor(),
            &IdentityTuple::single(ScalarValue::Int(7)),
        )
        .expect("filters");
        assert_eq!(filters, vec![("id".to_owned(), ScalarValue::Int(7))]);
    }

    #[test]
    fn identity_filters_reject_arity_mismatch() {
        let result = identity_filters(
            &users_descriptor(),
            &IdentityTuple::new(vec![ScalarValue::Int(1), ScalarValue::Int(2)]),
        );
        assert!(result.is_err());
    }

    #[test]
    fn remap_through_identity_requires_identity_remotes() {
        let link = Link::new(
            TableRef::new("public", "friends"),
            TableRef::new("public", "users"),
            &[("user_id", "id")],
        );
        let mapped = remap_through_identity(
            &link,
            &users_descriptor(),
            &IdentityTuple::single(ScalarValue::Int(7)),
        )
        .expect("direct remap");
        assert_eq!(mapped, vec![("user_id".to_owned(), ScalarValue::Int(7))]);

        let indirect = Link::new(
            TableRef::new("public", "friends"),
            TableRef::new("public", "users"),
            &[("user_name", "name")],
        );
        assert!(
            remap_through_identity(
                &indirect,
                &users_descriptor(),
                &IdentityTuple::single(ScalarValue::Int(7)),
            )
            .is_none()
        );
    }
}
