//! Dependency-ordered multi-table upsert.
//!
//! Callers accumulate `(column -> value)` entries for any number of tables
//! into an [`InsertContext`], then [`WritePlan::build`] turns the context
//! into one well-ordered transaction: foreign-key columns are auto-filled
//! from their local counterparts, tables are sorted so referenced rows land
//! before referring rows, cycles fail loudly before any statement is built,
//! and each table gets exactly one upsert over exactly the columns supplied
//! for it.

use std::collections::{BTreeMap, BTreeSet};

use tether_types::{ColumnRef, InsertStrategy, Link, ScalarValue, TableRef};

use crate::error::SqlError;
use crate::graph::DependencyGraph;
use crate::postgres::PgStore;
use crate::statement::{self, Statement};

/// Static table metadata the orchestrator plans against.
///
/// A thin slice of the external schema provider's output: per-table
/// identity columns (the upsert conflict target) and the foreign-key links
/// between tables.
#[derive(Debug, Default, Clone)]
pub struct TableCatalog {
    identity: BTreeMap<TableRef, Vec<String>>,
    links: Vec<Link>,
}

impl TableCatalog {
    /// Create an empty catalog.
    pub const fn new() -> Self {
        Self {
            identity: BTreeMap::new(),
            links: Vec::new(),
        }
    }

    /// Register a table and its ordered identity columns.
    #[must_use]
    pub fn with_table(mut self, table: TableRef, identity_columns: &[&str]) -> Self {
        self.identity.insert(
            table,
            identity_columns.iter().map(|c| (*c).to_owned()).collect(),
        );
        self
    }

    /// Register a foreign-key link between two tables.
    #[must_use]
    pub fn with_link(mut self, link: Link) -> Self {
        self.links.push(link);
        self
    }

    /// Identity columns for a table, if registered.
    pub fn identity_columns(&self, table: &TableRef) -> Option<&[String]> {
        self.identity.get(table).map(Vec::as_slice)
    }

    /// All registered links.
    pub fn links(&self) -> &[Link] {
        &self.links
    }
}

/// Accumulated `(column -> value)` entries for one orchestrated write.
#[derive(Debug, Default, Clone)]
pub struct InsertContext {
    entries: BTreeMap<ColumnRef, (ScalarValue, InsertStrategy)>,
}

impl InsertContext {
    /// Create an empty context.
    pub const fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Supply a value with [`InsertStrategy::OverwriteExisting`].
    pub fn put(&mut self, column: ColumnRef, value: ScalarValue) {
        self.put_with(column, value, InsertStrategy::OverwriteExisting);
    }

    /// Supply a value with an explicit conflict strategy.
    pub fn put_with(&mut self, column: ColumnRef, value: ScalarValue, strategy: InsertStrategy) {
        self.entries.insert(column, (value, strategy));
    }

    /// The value supplied for a column, if any.
    pub fn get(&self, column: &ColumnRef) -> Option<&ScalarValue> {
        self.entries.get(column).map(|(value, _)| value)
    }

    /// Whether no entries have been supplied.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The distinct tables touched by the supplied entries.
    pub fn tables(&self) -> BTreeSet<TableRef> {
        self.entries.keys().map(|c| c.table.clone()).collect()
    }

    /// Copy local foreign-key values onto their referenced columns.
    ///
    /// For every link whose local column has a supplied value and whose
    /// remote column does not, the local value is copied across with
    /// [`InsertStrategy::PreferExisting`], where the referenced row is created
    /// if missing but never clobbered. Runs to a fixpoint so chains of
    /// links resolve (auto-filled tables may themselves have links).
    fn auto_fill(&mut self, links: &[Link]) {
        loop {
            let mut added = Vec::new();
            for link in links {
                for pair in &link.pairs {
                    let local = ColumnRef::new(link.from.clone(), &pair.local);
                    let remote = ColumnRef::new(link.to.clone(), &pair.remote);
                    if let Some(value) = self.get(&local) {
                        if !value.is_null() && self.get(&remote).is_none() {
                            added.push((remote, value.clone()));
                        }
                    }
                }
            }
            if added.is_empty() {
                return;
            }
            for (column, value) in added {
                self.put_with(column, value, InsertStrategy::PreferExisting);
            }
        }
    }

    /// Entries belonging to one table, in column-name order.
    fn entries_for(&self, table: &TableRef) -> Vec<(&ColumnRef, &ScalarValue, InsertStrategy)> {
        self.entries
            .iter()
            .filter(|(column, _)| column.table == *table)
            .map(|(column, (value, strategy))| (column, value, *strategy))
            .collect()
    }
}

/// A fully planned, dependency-ordered multi-table write.
#[derive(Debug)]
pub struct WritePlan {
    order: Vec<TableRef>,
    statements: Vec<Statement>,
}

impl WritePlan {
    /// Plan a context against a catalog.
    ///
    /// Steps: auto-fill foreign keys, re-resolve target tables, build the
    /// dependency graph (an edge only exists when every linking value is
    /// present in the entry set), reject cycles, topologically order, and
    /// synthesize one upsert per table. An empty context yields an empty
    /// plan.
    ///
    /// # Errors
    ///
    /// Returns [`SqlError::DependencyCycle`] before any statement is built
    /// if the ready foreign keys form a cycle.
    /// Returns [`SqlError::UnknownTable`] if a touched table has no catalog
    /// entry, or [`SqlError::Config`] if its registered identity-column
    /// list is empty (there would be no conflict target to upsert on).
    pub fn build(mut context: InsertContext, catalog: &TableCatalog) -> Result<Self, SqlError> {
        if context.is_empty() {
            return Ok(Self {
                order: Vec::new(),
                statements: Vec::new(),
            });
        }

        context.auto_fill(catalog.links());
        let tables = context.tables();

        let mut graph = DependencyGraph::new();
        for table in &tables {
            graph.add_node(table.clone());
        }
        for link in catalog.links() {
            if !tables.contains(&link.from) || !tables.contains(&link.to) {
                continue;
            }
            let ready = link.pairs.iter().all(|pair| {
                context
                    .get(&ColumnRef::new(link.from.clone(), &pair.local))
                    .is_some()
                    && context
                        .get(&ColumnRef::new(link.to.clone(), &pair.remote))
                        .is_some()
            });
            if ready {
                graph.add_edge(link.from.clone(), link.to.clone());
            }
        }

        // Cycles surface here, before any statement exists.
        let order = graph.topological_order()?;

        let mut statements = Vec::with_capacity(order.len());
        for table in &order {
            let identity = catalog
                .identity_columns(table)
                .ok_or_else(|| SqlError::UnknownTable(table.clone()))?;
            if identity.is_empty() {
                return Err(SqlError::Config(format!(
                    "table {table} is registered with no identity columns"
                )));
            }

            let entries = context.entries_for(table);
            let columns: Vec<(String, ScalarValue)> = entries
                .iter()
                .map(|(column, value, _)| (column.column.clone(), (*value).clone()))
                .collect();
            let overwrite: Vec<String> = entries
                .iter()
                .filter(|(column, _, strategy)| {
                    *strategy == InsertStrategy::OverwriteExisting
                        && !identity.contains(&column.column)
                })
                .map(|(column, _, _)| column.column.clone())
                .collect();

            statements.push(statement::upsert(table, &columns, identity, &overwrite));
        }

        tracing::debug!(tables = order.len(), "Planned orchestrated write");
        Ok(Self { order, statements })
    }

    /// The planned table order, dependencies first.
    pub fn order(&self) -> &[TableRef] {
        &self.order
    }

    /// The planned statements, one upsert per table.
    pub fn statements(&self) -> &[Statement] {
        &self.statements
    }

    /// Whether the plan contains no statements.
    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    /// Execute the plan as one atomic transaction.
    ///
    /// # Errors
    ///
    /// Returns [`SqlError::Postgres`] if any statement fails; the whole
    /// transaction rolls back.
    pub async fn execute(&self, store: &PgStore) -> Result<(), SqlError> {
        store.execute_transaction(&self.statements).await
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]

    use super::*;

    fn users() -> TableRef {
        TableRef::new("public", "users")
    }

    fn friends() -> TableRef {
        TableRef::new("public", "friends")
    }

    fn catalog() -> TableCatalog {
        TableCatalog::new()
            .with_table(users(), &["id"])
            .with_table(friends(), &["id"])
            .with_link(Link::new(friends(), users(), &[("user_id", "id")]))
    }

    #[test]
    fn empty_context_plans_nothing() {
        let plan = WritePlan::build(InsertContext::new(), &catalog()).expect("plan");
        assert!(plan.is_empty());
        assert!(plan.order().is_empty());
    }

    #[test]
    fn auto_fill_creates_referenced_entry_and_orders_it_first() {
        let mut context = InsertContext::new();
        context.put(ColumnRef::new(friends(), "id"), ScalarValue::Int(1));
        context.put(ColumnRef::new(friends(), "user_id"), ScalarValue::Int(7));

        let plan = WritePlan::build(context, &catalog()).expect("plan");
        assert_eq!(plan.order(), &[users(), friends()]);

        // The auto-filled users upsert must prefer the existing row.
        assert!(plan.statements()[0].sql.contains("\"public\".\"users\""));
        assert!(plan.statements()[0].sql.ends_with("DO NOTHING"));
        assert_eq!(plan.statements()[0].params, vec![ScalarValue::Int(7)]);
    }

    #[test]
    fn overwrite_columns_are_reassigned_on_conflict() {
        let mut context = InsertContext::new();
        context.put(ColumnRef::new(users(), "id"), ScalarValue::Int(7));
        context.put(
            ColumnRef::new(users(), "name"),
            ScalarValue::Text("ada".to_owned()),
        );

        let plan = WritePlan::build(context, &catalog()).expect("plan");
        let sql = &plan.statements()[0].sql;
        assert!(sql.contains("DO UPDATE SET \"name\" = EXCLUDED.\"name\""));
        // Identity columns are never reassigned on conflict.
        assert!(!sql.contains("\"id\" = EXCLUDED"));
    }

    #[test]
    fn prefer_existing_entries_do_nothing_on_conflict() {
        let mut context = InsertContext::new();
        context.put_with(
            ColumnRef::new(users(), "id"),
            ScalarValue::Int(7),
            InsertStrategy::PreferExisting,
        );
        context.put_with(
            ColumnRef::new(users(), "name"),
            ScalarValue::Text("ada".to_owned()),
            InsertStrategy::PreferExisting,
        );

        let plan = WritePlan::build(context, &catalog()).expect("plan");
        assert!(plan.statements()[0].sql.ends_with("DO NOTHING"));
    }

    #[test]
    fn ready_cycle_fails_before_statements_exist() {
        let a = TableRef::new("public", "a");
        let b = TableRef::new("public", "b");
        let catalog = TableCatalog::new()
            .with_table(a.clone(), &["id"])
            .with_table(b.clone(), &["id"])
            .with_link(Link::new(a.clone(), b.clone(), &[("b_id", "id")]))
            .with_link(Link::new(b.clone(), a.clone(), &[("a_id", "id")]));

        let mut context = InsertContext::new();
        context.put(ColumnRef::new(a.clone(), "id"), ScalarValue::Int(1));
        context.put(ColumnRef::new(a, "b_id"), ScalarValue::Int(2));
        context.put(ColumnRef::new(b.clone(), "id"), ScalarValue::Int(2));
        context.put(ColumnRef::new(b, "a_id"), ScalarValue::Int(1));

        match WritePlan::build(context, &catalog) {
            Err(SqlError::DependencyCycle(cycle)) => assert!(cycle.len() >= 2),
            other => panic!("expected cycle error, got {other:?}"),
        }
    }

    #[test]
    fn unready_link_does_not_create_an_edge() {
        // friends.user_id is absent, so users/friends may order either way
        // and no auto-fill happens; both tables still get statements.
        let mut context = InsertContext::new();
        context.put(ColumnRef::new(friends(), "id"), ScalarValue::Int(1));
        context.put(ColumnRef::new(users(), "id"), ScalarValue::Int(7));

        let plan = WritePlan::build(context, &catalog()).expect("plan");
        assert_eq!(plan.statements().len(), 2);
    }

    #[test]
    fn empty_identity_registration_is_rejected() {
        let catalog = TableCatalog::new().with_table(users(), &[]);
        let mut context = InsertContext::new();
        context.put(ColumnRef::new(users(), "id"), ScalarValue::Int(1));

        match WritePlan::build(context, &catalog) {
            Err(SqlError::Config(message)) => assert!(message.contains("identity columns")),
            other => panic!("expected config error, got {other:?}"),
        }
    }

    #[test]
    fn unknown_table_is_rejected() {
        let mut context = InsertContext::new();
        context.put(
            ColumnRef::new(TableRef::new("public", "ghosts"), "id"),
            ScalarValue::Int(1),
        );
        match WritePlan::build(context, &catalog()) {
            Err(SqlError::UnknownTable(table)) => assert_eq!(table.table, "ghosts"),
            other => panic!("expected unknown table, got {other:?}"),
        }
    }
}
