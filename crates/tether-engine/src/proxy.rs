//! Store-backed field proxies.
//!
//! A proxy is a thin, cloneable view of one field on one live instance.
//! Reads go to the store unless the instance's decoded cache already holds
//! the value; writes land in the cache first (local visibility is
//! immediate) and then hit the store. Nothing is prefetched: a collection
//! of a million entries costs nothing until iterated.
//!
//! Every operation fails fast with [`EngineError::Deleted`] on an instance
//! whose backing row is gone, and with [`EngineError::NotBound`] before the
//! owning type is bound.

use std::collections::BTreeSet;
use std::sync::Arc;

use tether_sql::{Statement, statement};
use tether_types::{
    CollectionKind, ColumnDescriptor, ColumnKind, EntityDescriptor, IdentityTuple, JoinTable,
    Link, ScalarValue,
};

use crate::context::{EngineContext, identity_filters};
use crate::entity::EntityHandle;
use crate::error::EngineError;
use crate::fields::{CollectionField, ReferenceField, ValueField};
use crate::registry::ValueChange;

// ============================================================================
// Value proxy
// ============================================================================

/// Proxy for one scalar column of one instance.
#[derive(Clone)]
pub struct ValueProxy {
    holder: EntityHandle,
    field: Arc<ValueField>,
}

impl ValueProxy {
    pub(crate) const fn new(holder: EntityHandle, field: Arc<ValueField>) -> Self {
        Self { holder, field }
    }

    /// The column this proxy reads and writes.
    pub fn column(&self) -> &ColumnDescriptor {
        self.field.column()
    }

    /// The table the cell physically lives in, and the filters locating
    /// its row. For foreign columns that is the linked table, filtered by
    /// the link's local columns.
    async fn locate(&self) -> Result<(tether_types::TableRef, Vec<(String, ScalarValue)>), EngineError> {
        let descriptor = self.holder.descriptor();
        match &self.field.column().kind {
            ColumnKind::Identity | ColumnKind::Plain => Ok((
                descriptor.table.clone(),
                identity_filters(descriptor, &self.holder.identity())?,
            )),
            ColumnKind::Foreign(link) => {
                let filters = self
                    .holder
                    .context()
                    .resolve_link_values(link, descriptor, &self.holder.identity())
                    .await?;
                Ok((link.from.clone(), filters))
            }
        }
    }

    /// Read the current value from the store, or from the instance's
    /// decoded cache when a local write or a change notification already
    /// populated it. A missing row reads as [`ScalarValue::Null`].
    ///
    /// # Errors
    ///
    /// Fails on deleted instances, unbound types, or store errors.
    pub async fn get(&self) -> Result<ScalarValue, EngineError> {
        self.holder.ensure_live()?;
        self.field.ensure_bound()?;

        let name = &self.field.column().name;
        if let Some(cached) = self.holder.inner().cached(name) {
            return Ok(cached);
        }

        let (table, filters) = self.locate().await?;
        let select = statement::select_where(&table, &[name.clone()], &filters);
        let rows = self
            .holder
            .context()
            .store()
            .fetch_rows(&select, &[self.field.column().ty])
            .await?;
        Ok(rows
            .into_iter()
            .next()
            .and_then(|row| row.into_iter().next())
            .unwrap_or(ScalarValue::Null))
    }

    /// Write a value: the instance's cache is updated first, so a `get`
    /// on any handle to this instance observes the new value immediately,
    /// then the store row is updated. Update handlers registered on this
    /// type fire asynchronously on the context's task queue.
    ///
    /// # Errors
    ///
    /// Fails on deleted instances, unbound types, or store errors. The
    /// cache keeps the new value even when the store write fails; callers
    /// that need rollback re-read through a fresh instance.
    pub async fn set(&self, value: ScalarValue) -> Result<(), EngineError> {
        self.holder.ensure_live()?;
        self.field.ensure_bound()?;

        let name = self.field.column().name.clone();
        let old = self
            .holder
            .inner()
            .cached(&name)
            .unwrap_or(ScalarValue::Null);
        self.holder.inner().cache_put(&name, value.clone());

        let (table, filters) = self.locate().await?;
        let update = statement::update_set_where(&table, &[(name.clone(), value.clone())], &filters);
        let affected = self.holder.context().store().execute(&update).await?;
        tracing::debug!(
            type_tag = self.holder.type_tag(),
            column = name.as_str(),
            affected,
            "Wrote value"
        );

        let change = ValueChange { old, new: value };
        self.fire_local(&table, &name, change);
        Ok(())
    }

    /// Fire this type's registered handlers for a local write. Remote
    /// processes learn about the write through the change listener.
    fn fire_local(&self, table: &tether_types::TableRef, column: &str, change: ValueChange) {
        let context = self.holder.context();
        for registration in context.shared().registry.matching(table, column) {
            if registration.type_tag != self.holder.type_tag() {
                continue;
            }
            let handler = Arc::clone(&registration.handler);
            let holder = self.holder.clone();
            let change = change.clone();
            context.shared().tasks.submit(async move {
                handler(holder, change);
            });
        }
    }
}

// ============================================================================
// Reference proxy
// ============================================================================

/// Proxy for one one-to-one reference field of one instance.
#[derive(Clone)]
pub struct ReferenceProxy {
    holder: EntityHandle,
    field: Arc<ReferenceField>,
}

impl ReferenceProxy {
    pub(crate) const fn new(holder: EntityHandle, field: Arc<ReferenceField>) -> Self {
        Self { holder, field }
    }

    /// Type tag of the referenced entity.
    pub fn target(&self) -> &str {
        &self.field.descriptor().target
    }

    /// Resolve the referenced instance, hydrating it lazily.
    ///
    /// `None` when any link column is NULL or the holder's row is gone.
    ///
    /// # Errors
    ///
    /// Fails on deleted instances, unbound types, or store errors.
    pub async fn get(&self) -> Result<Option<EntityHandle>, EngineError> {
        self.holder.ensure_live()?;
        self.field.ensure_bound()?;

        let context = self.holder.context();
        let descriptor = self.holder.descriptor();
        let link = &self.field.descriptor().link;
        let target_type = context.entity_type(&self.field.descriptor().target)?;

        let local_columns = link.local_columns();
        let mut types = Vec::with_capacity(local_columns.len());
        for name in &local_columns {
            let ty = descriptor.column(name).map(|c| c.ty).ok_or_else(|| {
                EngineError::Type(tether_types::TypeError::MissingColumn(name.clone()))
            })?;
            types.push(ty);
        }

        let filters = identity_filters(descriptor, &self.holder.identity())?;
        let select = statement::select_where(&descriptor.table, &local_columns, &filters);
        let rows = context.store().fetch_rows(&select, &types).await?;
        let Some(row) = rows.into_iter().next() else {
            return Ok(None);
        };
        if row.iter().any(|v| *v == ScalarValue::Null) {
            return Ok(None);
        }

        let tuple = remap_row_to_identity(link, &row, target_type.descriptor())?;
        context
            .get_instance(&self.field.descriptor().target, &tuple)
            .await
    }

    /// Point the reference at another instance by writing the link
    /// columns on the holder's row.
    ///
    /// # Errors
    ///
    /// Fails when `target` is not an instance of the declared target
    /// type, on deleted instances, unbound types, or store errors.
    pub async fn set(&self, target: &EntityHandle) -> Result<(), EngineError> {
        self.holder.ensure_live()?;
        self.field.ensure_bound()?;
        if target.type_tag() != self.field.descriptor().target {
            return Err(EngineError::Type(tether_types::TypeError::Descriptor(
                format!(
                    "reference `{}` expects `{}`, got `{}`",
                    self.field.descriptor().field,
                    self.field.descriptor().target,
                    target.type_tag()
                ),
            )));
        }

        let context = self.holder.context();
        let link = &self.field.descriptor().link;
        let assignments = context
            .resolve_link_values(link, target.descriptor(), &target.identity())
            .await?;
        let filters = identity_filters(self.holder.descriptor(), &self.holder.identity())?;
        let update = statement::update_set_where(&self.holder.descriptor().table, &assignments, &filters);
        context.store().execute(&update).await?;
        Ok(())
    }

    /// Null out the link columns.
    ///
    /// # Errors
    ///
    /// Fails on deleted instances, unbound types, or store errors.
    pub async fn clear(&self) -> Result<(), EngineError> {
        self.holder.ensure_live()?;
        self.field.ensure_bound()?;

        let link = &self.field.descriptor().link;
        let assignments: Vec<(String, ScalarValue)> = link
            .local_columns()
            .into_iter()
            .map(|c| (c, ScalarValue::Null))
            .collect();
        let filters = identity_filters(self.holder.descriptor(), &self.holder.identity())?;
        let update = statement::update_set_where(&self.holder.descriptor().table, &assignments, &filters);
        self.holder.context().store().execute(&update).await?;
        Ok(())
    }
}

/// Map a fetched row of link-local values into the referenced side's
/// identity tuple, in identity-column order.
fn remap_row_to_identity(
    link: &Link,
    row: &[ScalarValue],
    target: &EntityDescriptor,
) -> Result<IdentityTuple, EngineError> {
    let mut values = Vec::with_capacity(target.identity_columns.len());
    for column in &target.identity_columns {
        let position = link
            .pairs
            .iter()
            .position(|p| p.remote == *column)
            .ok_or_else(|| {
                EngineError::Type(tether_types::TypeError::Descriptor(format!(
                    "link into `{}` does not cover identity column `{column}`",
                    target.type_tag
                )))
            })?;
        let value = row.get(position).cloned().ok_or_else(|| {
            EngineError::Type(tether_types::TypeError::Descriptor(format!(
                "link row is missing a value for `{column}`"
            )))
        })?;
        values.push(value);
    }
    Ok(IdentityTuple::new(values))
}

// ============================================================================
// Collection proxy
// ============================================================================

/// Proxy for one collection field of one instance.
///
/// One-to-many collections are realized by link columns on the entry
/// table; many-to-many collections by rows in a join table. Membership is
/// set-like: adding an existing edge is a no-op.
#[derive(Clone)]
pub struct CollectionProxy {
    holder: EntityHandle,
    field: Arc<CollectionField>,
}

impl CollectionProxy {
    pub(crate) const fn new(holder: EntityHandle, field: Arc<CollectionField>) -> Self {
        Self { holder, field }
    }

    /// Type tag of the entry entity.
    pub fn target(&self) -> &str {
        &self.field.descriptor().target
    }

    fn context(&self) -> EngineContext {
        self.holder.context()
    }

    fn check(&self) -> Result<(), EngineError> {
        self.holder.ensure_live()?;
        self.field.ensure_bound()
    }

    fn check_entry(&self, entry: &EntityHandle) -> Result<(), EngineError> {
        if entry.type_tag() == self.field.descriptor().target {
            Ok(())
        } else {
            Err(EngineError::Type(tether_types::TypeError::Descriptor(
                format!(
                    "collection `{}` expects `{}`, got `{}`",
                    self.field.descriptor().field,
                    self.field.descriptor().target,
                    entry.type_tag()
                ),
            )))
        }
    }

    fn join(&self) -> Result<&JoinTable, EngineError> {
        self.field.descriptor().join.as_ref().ok_or_else(|| {
            EngineError::Type(tether_types::TypeError::Descriptor(format!(
                "many-to-many collection `{}` has no join table",
                self.field.descriptor().field
            )))
        })
    }

    /// Filters pinning rows to this holder: link columns on the entry
    /// table (one-to-many) or the join table's left side (many-to-many).
    async fn holder_filters(&self) -> Result<Vec<(String, ScalarValue)>, EngineError> {
        let descriptor = self.holder.descriptor();
        let identity = self.holder.identity();
        let link = match self.field.descriptor().kind {
            CollectionKind::OneToMany => &self.field.descriptor().link,
            CollectionKind::ManyToMany => &self.join()?.left,
        };
        self.context()
            .resolve_link_values(link, descriptor, &identity)
            .await
    }

    /// The table membership rows live in.
    fn membership_table(&self) -> Result<tether_types::TableRef, EngineError> {
        Ok(match self.field.descriptor().kind {
            CollectionKind::OneToMany => self.field.descriptor().link.from.clone(),
            CollectionKind::ManyToMany => self.join()?.table.clone(),
        })
    }

    /// Filters locating one entry's membership row.
    async fn entry_filters(
        &self,
        entry_identity: &IdentityTuple,
    ) -> Result<Vec<(String, ScalarValue)>, EngineError> {
        let context = self.context();
        let target_type = context.entity_type(&self.field.descriptor().target)?;
        match self.field.descriptor().kind {
            CollectionKind::OneToMany => {
                identity_filters(target_type.descriptor(), entry_identity)
            }
            CollectionKind::ManyToMany => {
                context
                    .resolve_link_values(&self.join()?.right, target_type.descriptor(), entry_identity)
                    .await
            }
        }
    }

    /// Number of entries.
    ///
    /// # Errors
    ///
    /// Fails on deleted instances, unbound types, or store errors.
    pub async fn len(&self) -> Result<u64, EngineError> {
        self.check()?;
        let filters = self.holder_filters().await?;
        let count = statement::count_where(&self.membership_table()?, &filters);
        let n = self.context().store().fetch_count(&count).await?;
        Ok(n.max(0).unsigned_abs())
    }

    /// Whether the collection has no entries.
    ///
    /// # Errors
    ///
    /// Fails on deleted instances, unbound types, or store errors.
    pub async fn is_empty(&self) -> Result<bool, EngineError> {
        self.check()?;
        let filters = self.holder_filters().await?;
        let probe = statement::exists_where(&self.membership_table()?, &filters);
        Ok(!self.context().store().exists(&probe).await?)
    }

    /// Whether `entry` is a member.
    ///
    /// # Errors
    ///
    /// Fails on deleted instances, unbound types, or store errors.
    pub async fn contains(&self, entry: &EntityHandle) -> Result<bool, EngineError> {
        self.check()?;
        self.check_entry(entry)?;
        self.contains_tuple(&entry.identity()).await
    }

    async fn contains_tuple(&self, entry_identity: &IdentityTuple) -> Result<bool, EngineError> {
        let mut filters = self.holder_filters().await?;
        filters.extend(self.entry_filters(entry_identity).await?);
        let probe = statement::exists_where(&self.membership_table()?, &filters);
        Ok(self.context().store().exists(&probe).await?)
    }

    /// Identity tuples of all current entries, in store order.
    ///
    /// This is a point-in-time snapshot; concurrent writers may change
    /// membership before the caller resolves the tuples to instances.
    ///
    /// # Errors
    ///
    /// Fails on deleted instances, unbound types, or store errors.
    pub async fn entries(&self) -> Result<Vec<IdentityTuple>, EngineError> {
        self.check()?;
        let context = self.context();
        let target_type = context.entity_type(&self.field.descriptor().target)?;
        let target = target_type.descriptor();
        let filters = self.holder_filters().await?;

        match self.field.descriptor().kind {
            CollectionKind::OneToMany => {
                let columns = target.identity_columns.clone();
                let types = target.identity_types()?;
                let select = statement::select_where(&target.table, &columns, &filters);
                let rows = context.store().fetch_rows(&select, &types).await?;
                Ok(rows.into_iter().map(IdentityTuple::new).collect())
            }
            CollectionKind::ManyToMany => {
                let right = &self.join()?.right;
                let columns = right.local_columns();
                let mut types = Vec::with_capacity(columns.len());
                for pair in &right.pairs {
                    let ty = target.column(&pair.remote).map(|c| c.ty).ok_or_else(|| {
                        EngineError::Type(tether_types::TypeError::MissingColumn(
                            pair.remote.clone(),
                        ))
                    })?;
                    types.push(ty);
                }
                let select = statement::select_where(&self.join()?.table, &columns, &filters);
                let rows = context.store().fetch_rows(&select, &types).await?;
                rows.iter()
                    .map(|row| remap_row_to_identity(right, row, target))
                    .collect()
            }
        }
    }

    /// Resolve every entry to a live instance. Entries deleted between
    /// the snapshot and resolution are skipped.
    ///
    /// # Errors
    ///
    /// Fails on deleted instances, unbound types, or store errors.
    pub async fn resolve_entries(&self) -> Result<Vec<EntityHandle>, EngineError> {
        let context = self.context();
        let target = self.field.descriptor().target.clone();
        let mut handles = Vec::new();
        for tuple in self.entries().await? {
            if let Some(handle) = context.get_instance(&target, &tuple).await? {
                handles.push(handle);
            }
        }
        Ok(handles)
    }

    /// The current membership as a set of identity tuples.
    ///
    /// Collections compare by membership resolved at call time; two
    /// proxies are "equal" exactly when their snapshots match
    /// ([`Self::same_edge`]).
    ///
    /// # Errors
    ///
    /// Fails on deleted instances, unbound types, or store errors.
    pub async fn identity_set(&self) -> Result<BTreeSet<IdentityTuple>, EngineError> {
        Ok(self.entries().await?.into_iter().collect())
    }

    /// Whether two collections currently hold the same membership.
    ///
    /// # Errors
    ///
    /// Fails on deleted instances, unbound types, or store errors.
    pub async fn same_edge(&self, other: &Self) -> Result<bool, EngineError> {
        Ok(self.identity_set().await? == other.identity_set().await?)
    }

    /// Build the statement that attaches one entry.
    async fn add_statement(&self, entry_identity: &IdentityTuple) -> Result<Statement, EngineError> {
        let holder_values = self.holder_filters().await?;
        match self.field.descriptor().kind {
            CollectionKind::OneToMany => {
                // Single-link semantics: writing the link columns detaches
                // the entry from any previous holder.
                let entry = self.entry_filters(entry_identity).await?;
                Ok(statement::update_set_where(
                    &self.membership_table()?,
                    &holder_values,
                    &entry,
                ))
            }
            CollectionKind::ManyToMany => {
                let mut columns = holder_values;
                columns.extend(self.entry_filters(entry_identity).await?);
                let conflict: Vec<String> = columns.iter().map(|(c, _)| c.clone()).collect();
                // DO NOTHING on conflict keeps membership set-like.
                Ok(statement::upsert(&self.join()?.table, &columns, &conflict, &[]))
            }
        }
    }

    /// Build the statement that detaches one entry.
    async fn remove_statement(
        &self,
        entry_identity: &IdentityTuple,
    ) -> Result<Statement, EngineError> {
        let mut filters = self.holder_filters().await?;
        let entry = self.entry_filters(entry_identity).await?;
        match self.field.descriptor().kind {
            CollectionKind::OneToMany => {
                let nulls: Vec<(String, ScalarValue)> = self
                    .field
                    .descriptor()
                    .link
                    .local_columns()
                    .into_iter()
                    .map(|c| (c, ScalarValue::Null))
                    .collect();
                filters.extend(entry);
                Ok(statement::update_set_where(
                    &self.membership_table()?,
                    &nulls,
                    &filters,
                ))
            }
            CollectionKind::ManyToMany => {
                filters.extend(entry);
                Ok(statement::delete_where(&self.join()?.table, &filters))
            }
        }
    }

    /// Attach an entry, returning whether the store changed a row.
    /// Idempotent: attaching a current many-to-many member changes nothing
    /// and returns `false`. For one-to-many collections the entry moves
    /// here from any previous holder, since the link columns admit one
    /// value.
    ///
    /// # Errors
    ///
    /// Fails on deleted instances, unbound types, wrong entry types, or
    /// store errors.
    pub async fn add(&self, entry: &EntityHandle) -> Result<bool, EngineError> {
        self.check()?;
        self.check_entry(entry)?;
        entry.ensure_live()?;

        let tuple = entry.identity();
        let attach = self.add_statement(&tuple).await?;
        let affected = self.context().store().execute(&attach).await?;
        if affected > 0 {
            self.fire_added(tuple);
        }
        Ok(affected > 0)
    }

    /// Attach several entries in one transaction.
    ///
    /// # Errors
    ///
    /// Fails on deleted instances, unbound types, wrong entry types, or
    /// store errors; on failure no entry is attached.
    pub async fn add_all(&self, entries: &[EntityHandle]) -> Result<(), EngineError> {
        self.check()?;
        let mut statements = Vec::with_capacity(entries.len());
        let mut tuples = Vec::with_capacity(entries.len());
        for entry in entries {
            self.check_entry(entry)?;
            entry.ensure_live()?;
            let tuple = entry.identity();
            statements.push(self.add_statement(&tuple).await?);
            tuples.push(tuple);
        }
        self.context().store().execute_transaction(&statements).await?;
        for tuple in tuples {
            self.fire_added(tuple);
        }
        Ok(())
    }

    /// Detach an entry. Removing a non-member is a no-op returning
    /// `false`; `true` means a membership row actually changed.
    ///
    /// # Errors
    ///
    /// Fails on deleted instances, unbound types, wrong entry types, or
    /// store errors.
    pub async fn remove(&self, entry: &EntityHandle) -> Result<bool, EngineError> {
        self.check()?;
        self.check_entry(entry)?;
        self.remove_tuple(&entry.identity()).await
    }

    pub(crate) async fn remove_tuple(&self, tuple: &IdentityTuple) -> Result<bool, EngineError> {
        let detach = self.remove_statement(tuple).await?;
        let affected = self.context().store().execute(&detach).await?;
        if affected > 0 {
            self.fire_removed(tuple.clone());
        }
        Ok(affected > 0)
    }

    /// Detach several entries in one transaction.
    ///
    /// # Errors
    ///
    /// Fails on deleted instances, unbound types, wrong entry types, or
    /// store errors; on failure no entry is detached.
    pub async fn remove_all(&self, entries: &[EntityHandle]) -> Result<(), EngineError> {
        self.check()?;
        let mut statements = Vec::with_capacity(entries.len());
        let mut tuples = Vec::with_capacity(entries.len());
        for entry in entries {
            self.check_entry(entry)?;
            let tuple = entry.identity();
            statements.push(self.remove_statement(&tuple).await?);
            tuples.push(tuple);
        }
        self.context().store().execute_transaction(&statements).await?;
        for tuple in tuples {
            self.fire_removed(tuple);
        }
        Ok(())
    }

    /// Detach every entry not in `keep`, in one transaction.
    ///
    /// # Errors
    ///
    /// Fails on deleted instances, unbound types, or store errors.
    pub async fn retain_all(&self, keep: &[IdentityTuple]) -> Result<(), EngineError> {
        self.check()?;
        let kept: BTreeSet<&IdentityTuple> = keep.iter().collect();
        let mut statements = Vec::new();
        let mut removed = Vec::new();
        for tuple in self.entries().await? {
            if !kept.contains(&tuple) {
                statements.push(self.remove_statement(&tuple).await?);
                removed.push(tuple);
            }
        }
        self.context().store().execute_transaction(&statements).await?;
        for tuple in removed {
            self.fire_removed(tuple);
        }
        Ok(())
    }

    /// Detach every entry, in one transaction.
    ///
    /// # Errors
    ///
    /// Fails on deleted instances, unbound types, or store errors.
    pub async fn clear(&self) -> Result<(), EngineError> {
        self.retain_all(&[]).await
    }

    /// Iterate the current snapshot with support for removal mid-walk.
    ///
    /// # Errors
    ///
    /// Fails on deleted instances, unbound types, or store errors.
    pub async fn cursor(&self) -> Result<CollectionCursor, EngineError> {
        Ok(CollectionCursor {
            proxy: self.clone(),
            entries: self.entries().await?,
            position: 0,
            current: None,
        })
    }

    fn fire_added(&self, tuple: IdentityTuple) {
        for handler in self.field.add_handlers() {
            let holder = self.holder.clone();
            let tuple = tuple.clone();
            self.context().shared().tasks.submit(async move {
                handler(holder, tuple);
            });
        }
    }

    fn fire_removed(&self, tuple: IdentityTuple) {
        for handler in self.field.remove_handlers() {
            let holder = self.holder.clone();
            let tuple = tuple.clone();
            self.context().shared().tasks.submit(async move {
                handler(holder, tuple);
            });
        }
    }
}

/// A walk over a collection snapshot taken at cursor creation.
///
/// Membership changes made by others after the snapshot are not observed;
/// [`Self::remove`] detaches the entry most recently yielded.
pub struct CollectionCursor {
    proxy: CollectionProxy,
    entries: Vec<IdentityTuple>,
    position: usize,
    current: Option<IdentityTuple>,
}

impl CollectionCursor {
    /// The next entry's identity tuple, or `None` at the end.
    pub fn next(&mut self) -> Option<IdentityTuple> {
        let tuple = self.entries.get(self.position).cloned()?;
        self.position = self.position.saturating_add(1);
        self.current = Some(tuple.clone());
        Some(tuple)
    }

    /// Entries remaining ahead of the cursor.
    pub fn remaining(&self) -> usize {
        self.entries.len().saturating_sub(self.position)
    }

    /// Detach the entry most recently yielded by [`Self::next`]. Returns
    /// `false` when nothing has been yielded yet, or when the entry was
    /// already detached by someone else.
    ///
    /// # Errors
    ///
    /// Fails on deleted instances, unbound types, or store errors.
    pub async fn remove(&mut self) -> Result<bool, EngineError> {
        let Some(tuple) = self.current.take() else {
            return Ok(false);
        };
        self.proxy.remove_tuple(&tuple).await
    }
}
