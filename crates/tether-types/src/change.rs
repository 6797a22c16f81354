//! Decoded change notifications from the relational store.
//!
//! Every committed insert/update/delete on a watched table produces one
//! immutable [`ChangeEvent`]. Events originate from the store's own commit
//! hook (a trigger publishing on a notification channel); this crate only
//! models them, the engine crate consumes them.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::error::TypeError;
use crate::identity::IdentityTuple;
use crate::schema::{EntityDescriptor, TableRef};

/// The mutation kind a change event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOp {
    /// A new row was inserted (`old` is empty).
    Insert,
    /// An existing row was updated (`old` and `new` both populated).
    Update,
    /// A row was deleted (`new` is empty).
    Delete,
}

impl std::fmt::Display for ChangeOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Insert => f.write_str("insert"),
            Self::Update => f.write_str("update"),
            Self::Delete => f.write_str("delete"),
        }
    }
}

/// One committed row-level mutation, decoded from the notification payload.
///
/// Column values are kept in their encoded JSON form; decoding happens at
/// dispatch time against the declared type of whichever field is listening.
/// Consumed at most once per physical commit per listener.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// When the commit hook fired.
    pub at: DateTime<Utc>,
    /// The mutated table.
    pub table: TableRef,
    /// Mutation kind.
    pub op: ChangeOp,
    /// Column name to encoded value before the mutation.
    pub old: BTreeMap<String, Json>,
    /// Column name to encoded value after the mutation.
    pub new: BTreeMap<String, Json>,
}

impl ChangeEvent {
    /// Whether `column` carries a different value after the mutation.
    ///
    /// Inserts report every present column as changed; deletes report every
    /// previously present column.
    pub fn column_changed(&self, column: &str) -> bool {
        match self.op {
            ChangeOp::Insert => self.new.contains_key(column),
            ChangeOp::Delete => self.old.contains_key(column),
            ChangeOp::Update => match (self.old.get(column), self.new.get(column)) {
                (Some(old), Some(new)) => old != new,
                (None, None) => false,
                _ => true,
            },
        }
    }

    /// Decode the identity tuple from the pre-mutation column map.
    ///
    /// Returns `None` when the event carries no old row (inserts).
    ///
    /// # Errors
    ///
    /// Returns [`TypeError`] if an identity column is missing or fails to
    /// decode under the descriptor's declared types.
    pub fn identity_before(
        &self,
        descriptor: &EntityDescriptor,
    ) -> Result<Option<IdentityTuple>, TypeError> {
        if self.old.is_empty() {
            return Ok(None);
        }
        decode_identity(descriptor, &self.old).map(Some)
    }

    /// Decode the identity tuple from the post-mutation column map.
    ///
    /// Returns `None` when the event carries no new row (deletes).
    ///
    /// # Errors
    ///
    /// Returns [`TypeError`] if an identity column is missing or fails to
    /// decode under the descriptor's declared types.
    pub fn identity_after(
        &self,
        descriptor: &EntityDescriptor,
    ) -> Result<Option<IdentityTuple>, TypeError> {
        if self.new.is_empty() {
            return Ok(None);
        }
        decode_identity(descriptor, &self.new).map(Some)
    }

    /// Whether this update moved the row to a different identity tuple.
    pub fn identity_changed(&self, descriptor: &EntityDescriptor) -> bool {
        self.op == ChangeOp::Update
            && descriptor
                .identity_columns
                .iter()
                .any(|c| self.column_changed(c))
    }
}

/// Decode an identity tuple from a column map under a descriptor.
fn decode_identity(
    descriptor: &EntityDescriptor,
    columns: &BTreeMap<String, Json>,
) -> Result<IdentityTuple, TypeError> {
    let mut values = Vec::with_capacity(descriptor.identity_columns.len());
    for name in &descriptor.identity_columns {
        let encoded = columns
            .get(name)
            .ok_or_else(|| TypeError::MissingColumn(name.clone()))?;
        let ty = descriptor
            .column(name)
            .map(|c| c.ty)
            .ok_or_else(|| TypeError::MissingColumn(name.clone()))?;
        values.push(ty.decode(name, encoded)?);
    }
    Ok(IdentityTuple::new(values))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, clippy::unwrap_used)]

    use serde_json::json;

    use super::*;
    use crate::schema::{ColumnDescriptor, TableRef};
    use crate::value::{ColumnType, ScalarValue};

    fn descriptor() -> EntityDescriptor {
        EntityDescriptor::new("user", TableRef::new("public", "users"))
            .with_column(ColumnDescriptor::new("id", ColumnType::Int).identity())
            .with_column(ColumnDescriptor::new("name", ColumnType::Text))
    }

    fn update_event(old_id: i64, new_id: i64) -> ChangeEvent {
        ChangeEvent {
            at: Utc::now(),
            table: TableRef::new("public", "users"),
            op: ChangeOp::Update,
            old: BTreeMap::from([
                ("id".to_owned(), json!(old_id)),
                ("name".to_owned(), json!("alice")),
            ]),
            new: BTreeMap::from([
                ("id".to_owned(), json!(new_id)),
                ("name".to_owned(), json!("alice")),
            ]),
        }
    }

    #[test]
    fn column_changed_compares_old_and_new() {
        let event = update_event(1, 2);
        assert!(event.column_changed("id"));
        assert!(!event.column_changed("name"));
        assert!(!event.column_changed("missing"));
    }

    #[test]
    fn identity_extraction_decodes_declared_types() {
        let event = update_event(1, 2);
        let desc = descriptor();
        let before = event.identity_before(&desc).expect("before").expect("some");
        let after = event.identity_after(&desc).expect("after").expect("some");
        assert_eq!(before, IdentityTuple::single(ScalarValue::Int(1)));
        assert_eq!(after, IdentityTuple::single(ScalarValue::Int(2)));
        assert!(event.identity_changed(&desc));
    }

    #[test]
    fn insert_has_no_prior_identity() {
        let event = ChangeEvent {
            at: Utc::now(),
            table: TableRef::new("public", "users"),
            op: ChangeOp::Insert,
            old: BTreeMap::new(),
            new: BTreeMap::from([("id".to_owned(), json!(3))]),
        };
        let desc = descriptor();
        assert!(event.identity_before(&desc).expect("before").is_none());
        assert!(event.identity_after(&desc).expect("after").is_some());
        assert!(event.column_changed("id"));
    }

    #[test]
    fn payload_roundtrips_through_serde() {
        let event = update_event(1, 2);
        let encoded = serde_json::to_string(&event).expect("encode");
        let decoded: ChangeEvent = serde_json::from_str(&encoded).expect("decode");
        assert_eq!(decoded, event);
    }
}
