//! SQL generation for association tables
//!
//! Identifiers are validated when a relation is defined and escaped again when
//! a statement is rendered. Values are never inlined; every statement uses
//! positional `$n` parameters.

use crate::error::{PivotError, PivotResult};

/// Characters allowed in SQL identifiers (alphanumeric, underscore, dollar)
const ALLOWED_IDENTIFIER_CHARS: &str =
    "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789_$";

/// PostgreSQL truncates identifiers beyond this length
const MAX_IDENTIFIER_LEN: usize = 63;

/// Escape a SQL identifier (table name, column name, etc.)
///
/// Doubles embedded quotes and wraps the result in double quotes. A dotted
/// name such as `app.post_tag` is escaped part by part.
pub fn escape_identifier(identifier: &str) -> String {
    identifier
        .split('.')
        .map(|part| format!("\"{}\"", part.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(".")
}

/// Validate that an identifier is safe for use in SQL
///
/// Table names may carry a single schema qualifier (`schema.table`).
pub fn validate_identifier(identifier: &str) -> PivotResult<()> {
    if identifier.is_empty() {
        return Err(PivotError::Configuration("Identifier cannot be empty".to_string()));
    }

    let parts: Vec<&str> = identifier.split('.').collect();
    if parts.len() > 2 {
        return Err(PivotError::Configuration(format!(
            "Identifier '{}' has too many qualifiers",
            identifier
        )));
    }

    for part in parts {
        validate_part(identifier, part)?;
    }
    Ok(())
}

fn validate_part(identifier: &str, part: &str) -> PivotResult<()> {
    let first = part.chars().next().ok_or_else(|| {
        PivotError::Configuration(format!("Identifier '{}' has an empty component", identifier))
    })?;

    if part.len() > MAX_IDENTIFIER_LEN {
        return Err(PivotError::Configuration(format!(
            "Identifier '{}' is too long (max {} characters)",
            identifier, MAX_IDENTIFIER_LEN
        )));
    }

    if let Some(c) = part.chars().find(|c| !ALLOWED_IDENTIFIER_CHARS.contains(*c)) {
        return Err(PivotError::Configuration(format!(
            "Identifier '{}' contains invalid character '{}'",
            identifier, c
        )));
    }

    if first.is_ascii_digit() {
        return Err(PivotError::Configuration(format!(
            "Identifier '{}' cannot start with a number",
            identifier
        )));
    }

    Ok(())
}

/// `$1, $2, ...` starting after `offset` already-bound parameters
fn placeholders(offset: usize, count: usize) -> String {
    (offset + 1..=offset + count)
        .map(|i| format!("${}", i))
        .collect::<Vec<_>>()
        .join(", ")
}

fn where_equals(columns: &[&str]) -> String {
    columns
        .iter()
        .enumerate()
        .map(|(i, column)| format!("{} = ${}", escape_identifier(column), i + 1))
        .collect::<Vec<_>>()
        .join(" AND ")
}

/// `SELECT cols FROM table [WHERE a = $1 AND ...]`
pub fn select_statement(table: &str, columns: &[&str], equals: &[&str]) -> String {
    let projection = columns
        .iter()
        .map(|c| escape_identifier(c))
        .collect::<Vec<_>>()
        .join(", ");

    let mut sql = format!("SELECT {} FROM {}", projection, escape_identifier(table));
    if !equals.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&where_equals(equals));
    }
    sql
}

/// `INSERT INTO table (cols) VALUES ($1, ...)`
pub fn insert_statement(table: &str, columns: &[&str]) -> String {
    let names = columns
        .iter()
        .map(|c| escape_identifier(c))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        escape_identifier(table),
        names,
        placeholders(0, columns.len())
    )
}

/// `DELETE FROM table WHERE a = $1 AND ... AND in_col IN ($k, ...)`
pub fn delete_statement(table: &str, equals: &[&str], in_column: &str, in_count: usize) -> String {
    let mut conditions = Vec::new();
    if !equals.is_empty() {
        conditions.push(where_equals(equals));
    }
    conditions.push(format!(
        "{} IN ({})",
        escape_identifier(in_column),
        placeholders(equals.len(), in_count)
    ));

    format!(
        "DELETE FROM {} WHERE {}",
        escape_identifier(table),
        conditions.join(" AND ")
    )
}
