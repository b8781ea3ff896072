//! SQL text for the JSONB document table.
//!
//! Only the table name (validated at construction) and the sort direction
//! keyword are spliced into SQL. Field paths and values are always bound.

use keel_core::{Condition, DocumentFilter, PageRequest};
use serde_json::Value;

/// A positional parameter, in `$n` order.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Bind {
    Json(Value),
    Path(Vec<String>),
    Float(f64),
    Int(i64),
}

#[derive(Debug, Default)]
pub(crate) struct Statement {
    pub(crate) sql: String,
    pub(crate) binds: Vec<Bind>,
}

impl Statement {
    fn push(&mut self, bind: Bind) -> usize {
        self.binds.push(bind);
        self.binds.len()
    }
}

/// Lowercase ASCII identifier, not starting with a digit.
pub(crate) fn is_valid_table_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_lowercase() || c == '_')
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        && name.len() <= 63
}

pub(crate) fn create_table(table: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {table} (\
         key JSONB PRIMARY KEY, \
         version BIGINT NOT NULL, \
         doc JSONB NOT NULL)"
    )
}

pub(crate) fn select_by_key(table: &str, key: Value) -> Statement {
    Statement {
        sql: format!("SELECT doc FROM {table} WHERE key = $1"),
        binds: vec![Bind::Json(key)],
    }
}

pub(crate) fn select_first(table: &str, filter: &DocumentFilter) -> Statement {
    let mut stmt = Statement::default();
    let predicate = where_clause(filter, &mut stmt);
    stmt.sql = format!("SELECT doc FROM {table} WHERE {predicate} ORDER BY key ASC LIMIT 1");
    stmt
}

pub(crate) fn count(table: &str, filter: &DocumentFilter) -> Statement {
    let mut stmt = Statement::default();
    let predicate = where_clause(filter, &mut stmt);
    stmt.sql = format!("SELECT COUNT(*) FROM {table} WHERE {predicate}");
    stmt
}

/// Panics if the page's sort key is not safelisted.
pub(crate) fn select_page(table: &str, filter: &DocumentFilter, page: &PageRequest) -> Statement {
    let column = page.sort_column().to_owned();
    let direction = page.sort_direction().as_sql();

    let mut stmt = Statement::default();
    let predicate = where_clause(filter, &mut stmt);
    let sort = stmt.push(Bind::Path(vec![column]));
    let limit = stmt.push(Bind::Int(clamp_i64(page.limit())));
    let offset = stmt.push(Bind::Int(clamp_i64(page.offset())));

    stmt.sql = format!(
        "SELECT doc FROM {table} WHERE {predicate} \
         ORDER BY doc #> ${sort} {direction}, key ASC \
         LIMIT ${limit} OFFSET ${offset}"
    );
    stmt
}

pub(crate) fn insert(table: &str, key: Value, version: i64, doc: Value) -> Statement {
    Statement {
        sql: format!("INSERT INTO {table} (key, version, doc) VALUES ($1, $2, $3)"),
        binds: vec![Bind::Json(key), Bind::Int(version), Bind::Json(doc)],
    }
}

pub(crate) fn update_versioned(
    table: &str,
    key: Value,
    expected: i64,
    next: i64,
    doc: Value,
) -> Statement {
    Statement {
        sql: format!("UPDATE {table} SET doc = $1, version = $2 WHERE key = $3 AND version = $4"),
        binds: vec![
            Bind::Json(doc),
            Bind::Int(next),
            Bind::Json(key),
            Bind::Int(expected),
        ],
    }
}

pub(crate) fn delete(table: &str, key: Value) -> Statement {
    Statement {
        sql: format!("DELETE FROM {table} WHERE key = $1"),
        binds: vec![Bind::Json(key)],
    }
}

fn where_clause(filter: &DocumentFilter, stmt: &mut Statement) -> String {
    if filter.is_empty() {
        return "TRUE".to_string();
    }

    let parts: Vec<String> = filter
        .conditions()
        .iter()
        .map(|condition| {
            let path = stmt.push(Bind::Path(vec![condition.field().to_string()]));
            match condition {
                Condition::Eq { value, .. } => {
                    let value = stmt.push(Bind::Json(value.clone()));
                    format!("doc #> ${path} = ${value}")
                }
                Condition::Gte { value, .. } => numeric(path, ">=", stmt.push(Bind::Float(*value))),
                Condition::Lte { value, .. } => numeric(path, "<=", stmt.push(Bind::Float(*value))),
            }
        })
        .collect();

    parts.join(" AND ")
}

// Non-numeric fields never match instead of failing the cast.
fn numeric(path: usize, op: &str, bound: usize) -> String {
    format!(
        "(CASE WHEN jsonb_typeof(doc #> ${path}) = 'number' \
         THEN (doc #>> ${path})::double precision {op} ${bound} ELSE FALSE END)"
    )
}

fn clamp_i64(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    const SAFELIST: &[&str] = &["name", "-name", "price", "-price"];

    #[test]
    fn table_names_are_restricted_to_plain_identifiers() {
        assert!(is_valid_table_name("items"));
        assert!(is_valid_table_name("_user_accounts2"));
        assert!(!is_valid_table_name(""));
        assert!(!is_valid_table_name("2items"));
        assert!(!is_valid_table_name("Items"));
        assert!(!is_valid_table_name("items; DROP TABLE users"));
        assert!(!is_valid_table_name(&"a".repeat(64)));
    }

    #[test]
    fn empty_filter_matches_everything() {
        let stmt = count("items", &DocumentFilter::new());
        assert_eq!(stmt.sql, "SELECT COUNT(*) FROM items WHERE TRUE");
        assert!(stmt.binds.is_empty());
    }

    #[test]
    fn filter_values_are_bound_not_spliced() {
        let filter = DocumentFilter::new().eq("name", "x' OR 1=1 --").gte("price", 2.5);
        let stmt = select_first("items", &filter);

        assert!(!stmt.sql.contains("OR 1=1"));
        assert!(stmt.sql.contains("doc #> $1 = $2"));
        assert!(stmt.sql.contains("(doc #>> $3)::double precision >= $4"));
        assert!(stmt.sql.ends_with("ORDER BY key ASC LIMIT 1"));
        assert_eq!(
            stmt.binds,
            vec![
                Bind::Path(vec!["name".to_string()]),
                Bind::Json(json!("x' OR 1=1 --")),
                Bind::Path(vec!["price".to_string()]),
                Bind::Float(2.5),
            ]
        );
    }

    #[test]
    fn page_query_orders_by_sort_field_then_key() {
        let filter = DocumentFilter::new().lte("price", 10.0);
        let page = PageRequest::new(3, 20, "-price", SAFELIST);
        let stmt = select_page("items", &filter, &page);

        assert!(stmt.sql.contains("ORDER BY doc #> $3 DESC, key ASC LIMIT $4 OFFSET $5"));
        assert_eq!(stmt.binds[2], Bind::Path(vec!["price".to_string()]));
        assert_eq!(stmt.binds[3], Bind::Int(20));
        assert_eq!(stmt.binds[4], Bind::Int(40));
    }

    #[test]
    #[should_panic(expected = "unsafe sort parameter")]
    fn page_query_rejects_unsafe_sort() {
        let page = PageRequest::new(1, 20, "version", SAFELIST);
        let _ = select_page("items", &DocumentFilter::new(), &page);
    }

    #[test]
    fn versioned_update_matches_key_and_expected_version() {
        let stmt = update_versioned("items", json!(7), 3, 4, json!({"id": 7}));
        assert_eq!(
            stmt.sql,
            "UPDATE items SET doc = $1, version = $2 WHERE key = $3 AND version = $4"
        );
        assert_eq!(stmt.binds[1], Bind::Int(4));
        assert_eq!(stmt.binds[3], Bind::Int(3));
    }
}
