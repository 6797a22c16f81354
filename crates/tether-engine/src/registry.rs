//! Registry of update handlers, keyed by the column they watch.
//!
//! Registration happens once, while an entity type is being bound; dispatch
//! reads happen on the notification listener. Keys are resolved at
//! registration time, mapping (table, column) to an explicit holder type
//! tag, so dispatch never does reflective type matching.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tether_types::{ColumnType, IdentityTuple, Link, ScalarValue, TableRef};

use crate::entity::EntityHandle;

/// Decoded before/after values delivered to an update handler.
///
/// Absent sides (insert old, delete new) arrive as [`ScalarValue::Null`].
#[derive(Debug, Clone, PartialEq)]
pub struct ValueChange {
    /// The decoded value before the mutation.
    pub old: ScalarValue,
    /// The decoded value after the mutation.
    pub new: ScalarValue,
}

/// Handler fired with the affected holder and the decoded change.
pub type ValueUpdateHandler = Arc<dyn Fn(EntityHandle, ValueChange) + Send + Sync>;

/// Handler fired with the holder and the identity of an added/removed entry.
pub type CollectionEntryHandler = Arc<dyn Fn(EntityHandle, IdentityTuple) + Send + Sync>;

/// One resolved registration: which holder type listens on a column, how
/// to decode it, and how to find the holder from an event row.
pub(crate) struct ValueRegistration {
    /// Holder entity type tag.
    pub type_tag: String,
    /// Field (column) name on the holder.
    pub field: String,
    /// Declared type used to decode event values.
    pub column_type: ColumnType,
    /// For foreign columns: the link from the event's table back to the
    /// holder's identity columns. `None` when the column sits on the
    /// holder's own row.
    pub holder_link: Option<Link>,
    /// The handler itself.
    pub handler: ValueUpdateHandler,
}

/// Concurrent map from (table, column) to registrations.
#[derive(Default)]
pub struct HandlerRegistry {
    by_column: RwLock<HashMap<(TableRef, String), Vec<Arc<ValueRegistration>>>>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a registration for (table, column).
    pub(crate) fn register(
        &self,
        table: TableRef,
        column: &str,
        registration: ValueRegistration,
    ) {
        let mut map = write_unpoisoned(&self.by_column);
        map.entry((table, column.to_owned()))
            .or_default()
            .push(Arc::new(registration));
    }

    /// All registrations watching (table, column).
    pub(crate) fn matching(&self, table: &TableRef, column: &str) -> Vec<Arc<ValueRegistration>> {
        let map = read_unpoisoned(&self.by_column);
        map.get(&(table.clone(), column.to_owned()))
            .cloned()
            .unwrap_or_default()
    }

    /// Column names on `table` that have at least one registration.
    pub(crate) fn watched_columns(&self, table: &TableRef) -> Vec<String> {
        let map = read_unpoisoned(&self.by_column);
        map.keys()
            .filter(|(t, _)| t == table)
            .map(|(_, column)| column.clone())
            .collect()
    }
}

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

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, clippy::unwrap_used)]

    use super::*;

    fn registration(tag: &str) -> ValueRegistration {
        ValueRegistration {
            type_tag: tag.to_owned(),
            field: "name".to_owned(),
            column_type: ColumnType::Text,
            holder_link: None,
            handler: Arc::new(|_, _| {}),
        }
    }

    #[test]
    fn matching_is_scoped_to_table_and_column() {
        let registry = HandlerRegistry::new();
        let users = TableRef::new("public", "users");
        let groups = TableRef::new("public", "groups");

        registry.register(users.clone(), "name", registration("user"));
        registry.register(users.clone(), "name", registration("account"));
        registry.register(groups.clone(), "name", registration("group"));

        assert_eq!(registry.matching(&users, "name").len(), 2);
        assert_eq!(registry.matching(&groups, "name").len(), 1);
        assert!(registry.matching(&users, "other").is_empty());
    }

    #[test]
    fn watched_columns_lists_only_registered_columns() {
        let registry = HandlerRegistry::new();
        let users = TableRef::new("public", "users");
        registry.register(users.clone(), "name", registration("user"));

        assert_eq!(registry.watched_columns(&users), vec!["name".to_owned()]);
        assert!(
            registry
                .watched_columns(&TableRef::new("public", "groups"))
                .is_empty()
        );
    }
}
