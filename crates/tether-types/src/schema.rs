//! Tables, columns, links, and entity descriptors.
//!
//! These types are produced by a schema/metadata provider outside this
//! workspace and consumed read-only by the engine. A descriptor describes
//! one entity type: the table its row lives in, the ordered identity
//! columns, the plain and foreign columns, and the links realizing its
//! references and collections.

use serde::{Deserialize, Serialize};

use crate::error::TypeError;
use crate::value::ColumnType;

/// A schema-qualified table name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableRef {
    /// Schema (namespace) the table lives in.
    pub schema: String,
    /// Table name.
    pub table: String,
}

impl TableRef {
    /// Create a table reference.
    pub fn new(schema: &str, table: &str) -> Self {
        Self {
            schema: schema.to_owned(),
            table: table.to_owned(),
        }
    }

    /// The quoted, schema-qualified SQL form: `"schema"."table"`.
    pub fn qualified(&self) -> String {
        format!("\"{}\".\"{}\"", self.schema, self.table)
    }

    /// Identifier-safe name used for per-table trigger naming:
    /// `tether_notify_<schema>_<table>`.
    pub fn trigger_name(&self) -> String {
        format!("tether_notify_{}_{}", self.schema, self.table)
    }
}

impl std::fmt::Display for TableRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.schema, self.table)
    }
}

/// A fully qualified column: table plus column name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ColumnRef {
    /// The table the column belongs to.
    pub table: TableRef,
    /// Column name.
    pub column: String,
}

impl ColumnRef {
    /// Create a column reference.
    pub fn new(table: TableRef, column: &str) -> Self {
        Self {
            table,
            column: column.to_owned(),
        }
    }
}

impl std::fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.table, self.column)
    }
}

/// What happens to a referring row when the referenced row disappears.
///
/// Enforced at the store layer (FK clause or trigger); carried here so the
/// provisioning plumbing can generate the right DDL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OnDelete {
    /// Delete the referring row too.
    Cascade,
    /// Null out the referring link columns.
    SetNull,
}

/// Conflict policy for one column during orchestrated upserts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InsertStrategy {
    /// Keep the existing cell on conflict; the incoming value only lands
    /// when the row is new.
    PreferExisting,
    /// Overwrite the existing cell with the incoming value on conflict.
    OverwriteExisting,
}

/// One (local column, remote column) pair of a link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkPair {
    /// Column on the referring side.
    pub local: String,
    /// Column on the referenced side.
    pub remote: String,
}

/// A bidirectional mapping between a referring table's columns and a
/// referenced table's columns.
///
/// Used for foreign keys, one-to-many back-references, and each side of a
/// many-to-many join table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    /// The referring table (holds the local columns).
    pub from: TableRef,
    /// The referenced table (holds the remote columns).
    pub to: TableRef,
    /// Ordered column pairs; all pairs participate in every lookup.
    pub pairs: Vec<LinkPair>,
}

impl Link {
    /// Create a link from ordered `(local, remote)` column-name pairs.
    pub fn new(from: TableRef, to: TableRef, pairs: &[(&str, &str)]) -> Self {
        Self {
            from,
            to,
            pairs: pairs
                .iter()
                .map(|(local, remote)| LinkPair {
                    local: (*local).to_owned(),
                    remote: (*remote).to_owned(),
                })
                .collect(),
        }
    }

    /// The same link viewed from the referenced side.
    pub fn reversed(&self) -> Self {
        Self {
            from: self.to.clone(),
            to: self.from.clone(),
            pairs: self
                .pairs
                .iter()
                .map(|p| LinkPair {
                    local: p.remote.clone(),
                    remote: p.local.clone(),
                })
                .collect(),
        }
    }

    /// Local column names, in pair order.
    pub fn local_columns(&self) -> Vec<String> {
        self.pairs.iter().map(|p| p.local.clone()).collect()
    }

    /// Remote column names, in pair order.
    pub fn remote_columns(&self) -> Vec<String> {
        self.pairs.iter().map(|p| p.remote.clone()).collect()
    }
}

/// Where a column's cell physically lives relative to its entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnKind {
    /// Part of the entity's ordered identity tuple.
    Identity,
    /// A cell on the entity's own row.
    Plain,
    /// A cell on a row in a different table, reached through a link from
    /// the entity's identity columns.
    Foreign(Link),
}

/// Description of a single column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    /// Column name.
    pub name: String,
    /// Semantic type.
    pub ty: ColumnType,
    /// Placement relative to the owning entity.
    pub kind: ColumnKind,
    /// Whether NULL is a legal value.
    pub nullable: bool,
    /// Whether the provisioning layer should index this column.
    pub indexed: bool,
    /// Whether values must be unique across rows.
    pub unique: bool,
}

impl ColumnDescriptor {
    /// Create a non-nullable plain column.
    pub fn new(name: &str, ty: ColumnType) -> Self {
        Self {
            name: name.to_owned(),
            ty,
            kind: ColumnKind::Plain,
            nullable: false,
            indexed: false,
            unique: false,
        }
    }

    /// Mark as an identity column.
    #[must_use]
    pub fn identity(mut self) -> Self {
        self.kind = ColumnKind::Identity;
        self
    }

    /// Mark as a foreign column reached through `link`.
    #[must_use]
    pub fn foreign(mut self, link: Link) -> Self {
        self.kind = ColumnKind::Foreign(link);
        self
    }

    /// Allow NULL values.
    #[must_use]
    pub const fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Request an index.
    #[must_use]
    pub const fn indexed(mut self) -> Self {
        self.indexed = true;
        self
    }

    /// Require uniqueness.
    #[must_use]
    pub const fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

/// A declared one-to-one reference field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceDescriptor {
    /// Field name on the holder.
    pub field: String,
    /// Type tag of the referenced entity.
    pub target: String,
    /// Link from the holder's table into the referenced table.
    pub link: Link,
    /// Deletion policy for the referring row.
    pub on_delete: OnDelete,
}

/// Shape of a collection field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CollectionKind {
    /// Target rows carry a link column pointing back at the holder.
    OneToMany,
    /// Edges live in a join table carrying both sides' identity values.
    ManyToMany,
}

/// A many-to-many join table: its identity and the links to both sides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinTable {
    /// The join table itself.
    pub table: TableRef,
    /// Link from the join table to the holder's table.
    pub left: Link,
    /// Link from the join table to the target's table.
    pub right: Link,
}

impl JoinTable {
    /// Synthesize a join table between two entity tables.
    ///
    /// The table is named `<left>_<right>` in the left side's schema, and
    /// its identity columns are both sides' identity columns prefixed with
    /// their table names (`user_id`, `group_id`).
    pub fn synthesize(
        left: &EntityDescriptor,
        right: &EntityDescriptor,
    ) -> Self {
        let table = TableRef::new(
            &left.table.schema,
            &format!("{}_{}", left.table.table, right.table.table),
        );
        let left_pairs: Vec<(String, String)> = left
            .identity_columns
            .iter()
            .map(|c| (format!("{}_{}", left.table.table, c), c.clone()))
            .collect();
        let right_pairs: Vec<(String, String)> = right
            .identity_columns
            .iter()
            .map(|c| (format!("{}_{}", right.table.table, c), c.clone()))
            .collect();
        Self {
            table: table.clone(),
            left: Link {
                from: table.clone(),
                to: left.table.clone(),
                pairs: left_pairs
                    .into_iter()
                    .map(|(local, remote)| LinkPair { local, remote })
                    .collect(),
            },
            right: Link {
                from: table.clone(),
                to: right.table.clone(),
                pairs: right_pairs
                    .into_iter()
                    .map(|(local, remote)| LinkPair { local, remote })
                    .collect(),
            },
        }
    }
}

/// A declared one-to-many or many-to-many collection field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionDescriptor {
    /// Field name on the holder.
    pub field: String,
    /// Type tag of the entry entity.
    pub target: String,
    /// Collection shape.
    pub kind: CollectionKind,
    /// For one-to-many: link from the target's table back to the holder.
    /// For many-to-many: link from the holder into the join table's left
    /// side (see [`JoinTable`]).
    pub link: Link,
    /// Join table; present iff `kind` is [`CollectionKind::ManyToMany`].
    pub join: Option<JoinTable>,
}

/// Read-only metadata for one entity type.
///
/// Built by the external schema provider, validated once, then shared
/// immutably across the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityDescriptor {
    /// Stable tag identifying the entity type across the workspace.
    pub type_tag: String,
    /// Table holding the entity's row.
    pub table: TableRef,
    /// Ordered identity column names (at least one; composite allowed).
    pub identity_columns: Vec<String>,
    /// All declared columns, identity columns included.
    pub columns: Vec<ColumnDescriptor>,
    /// Declared one-to-one reference fields.
    pub references: Vec<ReferenceDescriptor>,
    /// Declared collection fields.
    pub collections: Vec<CollectionDescriptor>,
}

impl EntityDescriptor {
    /// Start a descriptor for `type_tag` stored in `table`.
    pub fn new(type_tag: &str, table: TableRef) -> Self {
        Self {
            type_tag: type_tag.to_owned(),
            table,
            identity_columns: Vec::new(),
            columns: Vec::new(),
            references: Vec::new(),
            collections: Vec::new(),
        }
    }

    /// Add a column; identity columns also extend the identity tuple,
    /// in declaration order.
    #[must_use]
    pub fn with_column(mut self, column: ColumnDescriptor) -> Self {
        if matches!(column.kind, ColumnKind::Identity) {
            self.identity_columns.push(column.name.clone());
        }
        self.columns.push(column);
        self
    }

    /// Add a reference field.
    #[must_use]
    pub fn with_reference(mut self, reference: ReferenceDescriptor) -> Self {
        self.references.push(reference);
        self
    }

    /// Add a collection field.
    #[must_use]
    pub fn with_collection(mut self, collection: CollectionDescriptor) -> Self {
        self.collections.push(collection);
        self
    }

    /// Look up a column descriptor by name.
    pub fn column(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Semantic types of the identity columns, in tuple order.
    ///
    /// # Errors
    ///
    /// Returns [`TypeError::Descriptor`] if an identity column has no
    /// descriptor.
    pub fn identity_types(&self) -> Result<Vec<ColumnType>, TypeError> {
        self.identity_columns
            .iter()
            .map(|name| {
                self.column(name).map(|c| c.ty).ok_or_else(|| {
                    TypeError::Descriptor(format!(
                        "identity column `{name}` has no descriptor on `{}`",
                        self.type_tag
                    ))
                })
            })
            .collect()
    }

    /// Validate structural invariants: at least one identity column, every
    /// identity column described, no duplicate column names.
    ///
    /// # Errors
    ///
    /// Returns [`TypeError::Descriptor`] naming the violated invariant.
    pub fn validate(&self) -> Result<(), TypeError> {
        if self.identity_columns.is_empty() {
            return Err(TypeError::Descriptor(format!(
                "entity `{}` declares no identity columns",
                self.type_tag
            )));
        }
        self.identity_types()?;
        let mut seen = std::collections::HashSet::new();
        for column in &self.columns {
            if !seen.insert(column.name.as_str()) {
                return Err(TypeError::Descriptor(format!(
                    "duplicate column `{}` on `{}`",
                    column.name, self.type_tag
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]

    use super::*;

    fn user_descriptor() -> EntityDescriptor {
        EntityDescriptor::new("user", TableRef::new("public", "users"))
            .with_column(ColumnDescriptor::new("id", ColumnType::Uuid).identity())
            .with_column(ColumnDescriptor::new("name", ColumnType::Text))
    }

    fn group_descriptor() -> EntityDescriptor {
        EntityDescriptor::new("group", TableRef::new("public", "groups"))
            .with_column(ColumnDescriptor::new("id", ColumnType::Uuid).identity())
    }

    #[test]
    fn identity_columns_follow_declaration_order() {
        let desc = EntityDescriptor::new("pair", TableRef::new("public", "pairs"))
            .with_column(ColumnDescriptor::new("left_id", ColumnType::Int).identity())
            .with_column(ColumnDescriptor::new("right_id", ColumnType::Int).identity());
        assert_eq!(desc.identity_columns, vec!["left_id", "right_id"]);
        assert_eq!(
            desc.identity_types().expect("types"),
            vec![ColumnType::Int, ColumnType::Int]
        );
    }

    #[test]
    fn validate_rejects_missing_identity() {
        let desc = EntityDescriptor::new("bare", TableRef::new("public", "bare"));
        assert!(desc.validate().is_err());
        assert!(user_descriptor().validate().is_ok());
    }

    #[test]
    fn validate_rejects_duplicate_columns() {
        let desc = user_descriptor()
            .with_column(ColumnDescriptor::new("name", ColumnType::Text));
        assert!(desc.validate().is_err());
    }

    #[test]
    fn join_table_synthesis_prefixes_identity_columns() {
        let join = JoinTable::synthesize(&user_descriptor(), &group_descriptor());
        assert_eq!(join.table, TableRef::new("public", "users_groups"));
        assert_eq!(join.left.pairs[0].local, "users_id");
        assert_eq!(join.left.pairs[0].remote, "id");
        assert_eq!(join.right.pairs[0].local, "groups_id");
    }

    #[test]
    fn link_reversal_swaps_sides() {
        let link = Link::new(
            TableRef::new("public", "friends"),
            TableRef::new("public", "users"),
            &[("user_id", "id")],
        );
        let rev = link.reversed();
        assert_eq!(rev.from, link.to);
        assert_eq!(rev.pairs[0].local, "id");
        assert_eq!(rev.pairs[0].remote, "user_id");
    }
}
