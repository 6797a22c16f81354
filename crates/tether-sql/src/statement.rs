//! Parameterized statement assembly helpers.
//!
//! Every higher layer (proxies, orchestrator, trigger installation) builds
//! its SQL through these helpers so quoting, placeholder numbering, and
//! NULL handling stay in one place. A [`Statement`] pairs the SQL text with
//! its ordered parameters; NULL values are inlined as SQL `NULL` (and
//! `IS NULL` in filters) instead of bound, so the store never has to infer
//! the type of a null parameter.

use tether_types::{ScalarValue, TableRef};

/// A SQL string paired with its ordered bind parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    /// The SQL text, with `$n` placeholders.
    pub sql: String,
    /// Bind parameters, in placeholder order. Never contains
    /// [`ScalarValue::Null`].
    pub params: Vec<ScalarValue>,
}

impl Statement {
    /// Pair SQL text with its parameters.
    pub const fn new(sql: String, params: Vec<ScalarValue>) -> Self {
        Self { sql, params }
    }
}

/// Quote a SQL identifier.
fn quote(name: &str) -> String {
    format!("\"{name}\"")
}

/// Push a value as the next placeholder, or inline NULL.
fn placeholder(value: &ScalarValue, params: &mut Vec<ScalarValue>) -> String {
    if value.is_null() {
        "NULL".to_owned()
    } else {
        params.push(value.clone());
        format!("${}", params.len())
    }
}

/// Render an `AND`-joined filter clause. NULL filters become `IS NULL`.
fn filter_clause(filters: &[(String, ScalarValue)], params: &mut Vec<ScalarValue>) -> String {
    filters
        .iter()
        .map(|(column, value)| {
            if value.is_null() {
                format!("{} IS NULL", quote(column))
            } else {
                format!("{} = {}", quote(column), placeholder(value, params))
            }
        })
        .collect::<Vec<_>>()
        .join(" AND ")
}

/// `SELECT <columns> FROM <table> WHERE <filters>`.
///
/// With no filters the WHERE clause is omitted (full-table read).
pub fn select_where(
    table: &TableRef,
    columns: &[String],
    filters: &[(String, ScalarValue)],
) -> Statement {
    let mut params = Vec::new();
    let column_list = columns.iter().map(|c| quote(c)).collect::<Vec<_>>().join(", ");
    let mut sql = format!("SELECT {column_list} FROM {}", table.qualified());
    if !filters.is_empty() {
        let clause = filter_clause(filters, &mut params);
        sql.push_str(" WHERE ");
        sql.push_str(&clause);
    }
    Statement::new(sql, params)
}

/// Existence probe: `SELECT 1 FROM <table> WHERE <filters> LIMIT 1`.
pub fn exists_where(table: &TableRef, filters: &[(String, ScalarValue)]) -> Statement {
    let mut params = Vec::new();
    let clause = filter_clause(filters, &mut params);
    let sql = format!("SELECT 1 FROM {} WHERE {clause} LIMIT 1", table.qualified());
    Statement::new(sql, params)
}

/// `SELECT COUNT(*) FROM <table> WHERE <filters>`.
pub fn count_where(table: &TableRef, filters: &[(String, ScalarValue)]) -> Statement {
    let mut params = Vec::new();
    let mut sql = format!("SELECT COUNT(*) FROM {}", table.qualified());
    if !filters.is_empty() {
        let clause = filter_clause(filters, &mut params);
        sql.push_str(" WHERE ");
        sql.push_str(&clause);
    }
    Statement::new(sql, params)
}

/// `UPDATE <table> SET <assignments> WHERE <filters>`.
pub fn update_set_where(
    table: &TableRef,
    assignments: &[(String, ScalarValue)],
    filters: &[(String, ScalarValue)],
) -> Statement {
    let mut params = Vec::new();
    let set_list = assignments
        .iter()
        .map(|(column, value)| format!("{} = {}", quote(column), placeholder(value, &mut params)))
        .collect::<Vec<_>>()
        .join(", ");
    let clause = filter_clause(filters, &mut params);
    let sql = format!(
        "UPDATE {} SET {set_list} WHERE {clause}",
        table.qualified()
    );
    Statement::new(sql, params)
}

/// `DELETE FROM <table> WHERE <filters>`.
pub fn delete_where(table: &TableRef, filters: &[(String, ScalarValue)]) -> Statement {
    let mut params = Vec::new();
    let clause = filter_clause(filters, &mut params);
    let sql = format!("DELETE FROM {} WHERE {clause}", table.qualified());
    Statement::new(sql, params)
}

/// `INSERT ... ON CONFLICT (<conflict>) DO UPDATE SET ... / DO NOTHING`.
///
/// Columns named in `overwrite` are re-assigned from `EXCLUDED` on
/// conflict; all other columns keep their existing cell. With nothing to
/// overwrite the conflict action degenerates to `DO NOTHING`.
pub fn upsert(
    table: &TableRef,
    columns: &[(String, ScalarValue)],
    conflict: &[String],
    overwrite: &[String],
) -> Statement {
    let mut params = Vec::new();
    let column_list = columns
        .iter()
        .map(|(c, _)| quote(c))
        .collect::<Vec<_>>()
        .join(", ");
    let value_list = columns
        .iter()
        .map(|(_, v)| placeholder(v, &mut params))
        .collect::<Vec<_>>()
        .join(", ");
    let conflict_list = conflict.iter().map(|c| quote(c)).collect::<Vec<_>>().join(", ");

    let action = if overwrite.is_empty() {
        "DO NOTHING".to_owned()
    } else {
        let sets = overwrite
            .iter()
            .map(|c| format!("{} = EXCLUDED.{}", quote(c), quote(c)))
            .collect::<Vec<_>>()
            .join(", ");
        format!("DO UPDATE SET {sets}")
    };

    let sql = format!(
        "INSERT INTO {} ({column_list}) VALUES ({value_list}) ON CONFLICT ({conflict_list}) {action}",
        table.qualified()
    );
    Statement::new(sql, params)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, clippy::unwrap_used)]

    use super::*;

    fn users() -> TableRef {
        TableRef::new("public", "users")
    }

    #[test]
    fn select_numbers_placeholders_in_order() {
        let stmt = select_where(
            &users(),
            &["id".to_owned(), "name".to_owned()],
            &[
                ("id".to_owned(), ScalarValue::Int(7)),
                ("name".to_owned(), ScalarValue::Text("a".to_owned())),
            ],
        );
        assert_eq!(
            stmt.sql,
            "SELECT \"id\", \"name\" FROM \"public\".\"users\" WHERE \"id\" = $1 AND \"name\" = $2"
        );
        assert_eq!(stmt.params.len(), 2);
    }

    #[test]
    fn null_filters_render_is_null_without_params() {
        let stmt = delete_where(
            &users(),
            &[
                ("group_id".to_owned(), ScalarValue::Null),
                ("id".to_owned(), ScalarValue::Int(1)),
            ],
        );
        assert_eq!(
            stmt.sql,
            "DELETE FROM \"public\".\"users\" WHERE \"group_id\" IS NULL AND \"id\" = $1"
        );
        assert_eq!(stmt.params, vec![ScalarValue::Int(1)]);
    }

    #[test]
    fn update_inlines_null_assignments() {
        let stmt = update_set_where(
            &users(),
            &[("group_id".to_owned(), ScalarValue::Null)],
            &[("id".to_owned(), ScalarValue::Int(1))],
        );
        assert_eq!(
            stmt.sql,
            "UPDATE \"public\".\"users\" SET \"group_id\" = NULL WHERE \"id\" = $1"
        );
    }

    #[test]
    fn upsert_with_overwrite_assigns_from_excluded() {
        let stmt = upsert(
            &users(),
            &[
                ("id".to_owned(), ScalarValue::Int(1)),
                ("name".to_owned(), ScalarValue::Text("a".to_owned())),
            ],
            &["id".to_owned()],
            &["name".to_owned()],
        );
        assert_eq!(
            stmt.sql,
            "INSERT INTO \"public\".\"users\" (\"id\", \"name\") VALUES ($1, $2) \
             ON CONFLICT (\"id\") DO UPDATE SET \"name\" = EXCLUDED.\"name\""
        );
    }

    #[test]
    fn upsert_without_overwrite_does_nothing_on_conflict() {
        let stmt = upsert(
            &users(),
            &[("id".to_owned(), ScalarValue::Int(1))],
            &["id".to_owned()],
            &[],
        );
        assert!(stmt.sql.ends_with("ON CONFLICT (\"id\") DO NOTHING"));
    }
}
