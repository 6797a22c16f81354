//! Weak-referenced identity map: one live instance per (type, identity).
//!
//! Entries hold [`std::sync::Weak`] references, so an instance is evicted
//! by the allocator once no handle remains: reclamation-driven, not
//! size- or LRU-based. Construction is guarded per tuple: racing callers
//! serialize on a per-key async mutex and collapse to the one instance
//! that wins, never constructing twice.
//!
//! This module owns only the map mechanics; the store existence check that
//! precedes construction lives in [`crate::context::EngineContext`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use tether_types::IdentityTuple;

use crate::entity::EntityInner;

/// Map key: (type tag, identity tuple).
pub(crate) type InstanceKey = (String, IdentityTuple);

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// The process-wide instance cache for one engine context.
#[derive(Default)]
pub(crate) struct IdentityMap {
    instances: Mutex<HashMap<InstanceKey, Weak<EntityInner>>>,
    guards: Mutex<HashMap<InstanceKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl IdentityMap {
    /// The live instance under a key, if any. Deleted instances are still
    /// returned; callers check the deletion flag.
    pub(crate) fn lookup(&self, key: &InstanceKey) -> Option<Arc<EntityInner>> {
        lock_unpoisoned(&self.instances).get(key).and_then(Weak::upgrade)
    }

    /// The per-key construction mutex, created on first use.
    pub(crate) fn construction_guard(&self, key: &InstanceKey) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(
            lock_unpoisoned(&self.guards)
                .entry(key.clone())
                .or_default(),
        )
    }

    /// Drop the per-key construction mutex once construction settled.
    pub(crate) fn release_guard(&self, key: &InstanceKey) {
        lock_unpoisoned(&self.guards).remove(key);
    }

    /// Register a freshly constructed instance, pruning dead slots.
    pub(crate) fn insert(&self, key: InstanceKey, inner: &Arc<EntityInner>) {
        let mut map = lock_unpoisoned(&self.instances);
        map.retain(|_, weak| weak.strong_count() > 0);
        map.insert(key, Arc::downgrade(inner));
    }

    /// Atomically move an entry from `old` to `new` and update the
    /// instance's stored identity. No-op (returns `false`) when no live
    /// instance exists under the old key.
    pub(crate) fn update_identity(
        &self,
        type_tag: &str,
        old: &IdentityTuple,
        new: &IdentityTuple,
    ) -> bool {
        let mut map = lock_unpoisoned(&self.instances);
        let old_key = (type_tag.to_owned(), old.clone());
        let Some(weak) = map.remove(&old_key) else {
            return false;
        };
        let Some(inner) = weak.upgrade() else {
            return false;
        };
        inner.set_identity(new.clone());
        map.insert((type_tag.to_owned(), new.clone()), weak);
        true
    }

    /// Mark the instance under a key deleted, if live. Returns the
    /// instance so callers can log or notify; `None` is not an error.
    pub(crate) fn mark_deleted(&self, key: &InstanceKey) -> Option<Arc<EntityInner>> {
        let inner = self.lookup(key)?;
        inner.mark_deleted();
        Some(inner)
    }

    /// Number of live (upgradable) entries. Test-oriented.
    pub(crate) fn live_count(&self) -> usize {
        lock_unpoisoned(&self.instances)
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, clippy::unwrap_used)]

    use tether_types::{ColumnDescriptor, ColumnType, EntityDescriptor, ScalarValue, TableRef};

    use super::*;
    use crate::fields::EntityType;

    fn entity_type() -> Arc<EntityType> {
        let descriptor = EntityDescriptor::new("user", TableRef::new("public", "users"))
            .with_column(ColumnDescriptor::new("id", ColumnType::Int).identity());
        Arc::new(EntityType::new(descriptor).expect("type"))
    }

    fn key(id: i64) -> InstanceKey {
        ("user".to_owned(), IdentityTuple::single(ScalarValue::Int(id)))
    }

    fn instance(id: i64) -> Arc<EntityInner> {
        Arc::new(EntityInner::new(
            entity_type(),
            IdentityTuple::single(ScalarValue::Int(id)),
        ))
    }

    #[test]
    fn entries_are_reclaimed_once_unreferenced() {
        let map = IdentityMap::default();
        let inner = instance(1);
        map.insert(key(1), &inner);
        assert!(map.lookup(&key(1)).is_some());

        drop(inner);
        assert!(map.lookup(&key(1)).is_none());
        assert_eq!(map.live_count(), 0);
    }

    #[test]
    fn rekey_preserves_instance_identity() {
        let map = IdentityMap::default();
        let inner = instance(1);
        map.insert(key(1), &inner);

        let moved = map.update_identity(
            "user",
            &IdentityTuple::single(ScalarValue::Int(1)),
            &IdentityTuple::single(ScalarValue::Int(2)),
        );
        assert!(moved);
        assert!(map.lookup(&key(1)).is_none());

        let found = map.lookup(&key(2)).expect("moved entry");
        assert!(Arc::ptr_eq(&found, &inner));
        assert_eq!(
            inner.identity(),
            IdentityTuple::single(ScalarValue::Int(2))
        );
    }

    #[test]
    fn rekey_without_live_instance_is_a_noop() {
        let map = IdentityMap::default();
        let moved = map.update_identity(
            "user",
            &IdentityTuple::single(ScalarValue::Int(9)),
            &IdentityTuple::single(ScalarValue::Int(10)),
        );
        assert!(!moved);
    }

    #[test]
    fn mark_deleted_flags_live_instances_only() {
        let map = IdentityMap::default();
        let inner = instance(1);
        map.insert(key(1), &inner);

        assert!(map.mark_deleted(&key(1)).is_some());
        assert!(inner.is_deleted());
        // Deleted instances stay resolvable; callers check the flag.
        assert!(map.lookup(&key(1)).is_some());

        assert!(map.mark_deleted(&key(2)).is_none());
    }

    #[test]
    fn construction_guards_are_per_key() {
        let map = IdentityMap::default();
        let a = map.construction_guard(&key(1));
        let a_again = map.construction_guard(&key(1));
        let b = map.construction_guard(&key(2));
        assert!(Arc::ptr_eq(&a, &a_again));
        assert!(!Arc::ptr_eq(&a, &b));

        map.release_guard(&key(1));
        let a_new = map.construction_guard(&key(1));
        assert!(!Arc::ptr_eq(&a, &a_new));
    }
}
