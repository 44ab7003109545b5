//! The store as a warehouse: raw selects and chunked writes into user tables.
//!
//! Destination tables are created on first write with untyped columns, and
//! columns missing from an existing table are added.

use async_trait::async_trait;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection};
use serde_json::{Number, Value};
use sluice_core::warehouse::{check_identifier, Warehouse, WarehouseError};
use sluice_schemas::Record;
use std::collections::HashSet;
use tracing::debug;

use crate::store::SqliteStore;

#[async_trait]
impl Warehouse for SqliteStore {
    async fn select(&self, query: &str, params: &[Value]) -> Result<Vec<Record>, WarehouseError> {
        let conn = self.lock_conn(WarehouseError::LockPoisoned)?;
        let mut stmt = conn.prepare(query).map_err(WarehouseError::backend)?;
        let columns = stmt
            .column_names()
            .into_iter()
            .map(str::to_string)
            .collect::<Vec<_>>();

        let rows = stmt
            .query_map(params_from_iter(params.iter().map(to_sql)), |row| {
                let mut record = Record::new();
                for (idx, column) in columns.iter().enumerate() {
                    record.insert(column.clone(), to_json(row.get_ref(idx)?));
                }
                Ok(record)
            })
            .map_err(WarehouseError::backend)?;

        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(WarehouseError::backend)
    }

    async fn insert(&self, table: &str, rows: &[Record]) -> Result<usize, WarehouseError> {
        if rows.is_empty() {
            return Ok(0);
        }

        let mut conn = self.lock_conn(WarehouseError::LockPoisoned)?;
        let tx = conn.transaction().map_err(WarehouseError::backend)?;
        let inserted = insert_rows(&tx, table, rows)?;
        tx.commit().map_err(WarehouseError::backend)?;

        Ok(inserted)
    }

    async fn delete_where_in(
        &self,
        table: &str,
        column: &str,
        keys: &[Value],
    ) -> Result<usize, WarehouseError> {
        let conn = self.lock_conn(WarehouseError::LockPoisoned)?;
        delete_keys(&conn, table, column, keys)
    }

    async fn replace_where_in(
        &self,
        table: &str,
        column: &str,
        keys: &[Value],
        rows: &[Record],
    ) -> Result<usize, WarehouseError> {
        let mut conn = self.lock_conn(WarehouseError::LockPoisoned)?;
        let tx = conn.transaction().map_err(WarehouseError::backend)?;

        let deleted = delete_keys(&tx, table, column, keys)?;
        let inserted = insert_rows(&tx, table, rows)?;
        tx.commit().map_err(WarehouseError::backend)?;

        debug!(table, deleted, inserted, "Replaced rows");
        Ok(inserted)
    }
}

fn insert_rows(conn: &Connection, table: &str, rows: &[Record]) -> Result<usize, WarehouseError> {
    let table = check_identifier(table)?;

    let mut columns: Vec<&str> = Vec::new();
    for key in rows.iter().flat_map(|row| row.keys()) {
        if !columns.contains(&key.as_str()) {
            columns.push(check_identifier(key)?);
        }
    }
    if columns.is_empty() {
        return Ok(0);
    }

    ensure_columns(conn, table, &columns)?;

    let placeholders = (1..=columns.len())
        .map(|idx| format!("?{idx}"))
        .collect::<Vec<_>>()
        .join(", ");
    let mut stmt = conn
        .prepare(&format!(
            "INSERT INTO {table} ({}) VALUES ({placeholders})",
            columns.join(", ")
        ))
        .map_err(WarehouseError::backend)?;

    for row in rows {
        let values = columns
            .iter()
            .map(|column| row.get(*column).map(to_sql).unwrap_or(SqlValue::Null));
        stmt.execute(params_from_iter(values))
            .map_err(WarehouseError::backend)?;
    }

    Ok(rows.len())
}

fn delete_keys(
    conn: &Connection,
    table: &str,
    column: &str,
    keys: &[Value],
) -> Result<usize, WarehouseError> {
    let table = check_identifier(table)?;
    let column = check_identifier(column)?;

    if keys.is_empty() || existing_columns(conn, table)?.is_empty() {
        return Ok(0);
    }

    let placeholders = vec!["?"; keys.len()].join(", ");
    conn.execute(
        &format!("DELETE FROM {table} WHERE {column} IN ({placeholders})"),
        params_from_iter(keys.iter().map(to_sql)),
    )
    .map_err(WarehouseError::backend)
}

/// Column names of `table`, empty when the table does not exist
fn existing_columns(conn: &Connection, table: &str) -> Result<HashSet<String>, WarehouseError> {
    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info({table})"))
        .map_err(WarehouseError::backend)?;
    let columns = stmt
        .query_map([], |row| row.get::<_, String>(1))
        .map_err(WarehouseError::backend)?
        .collect::<rusqlite::Result<HashSet<_>>>()
        .map_err(WarehouseError::backend)?;
    Ok(columns)
}

fn ensure_columns(conn: &Connection, table: &str, columns: &[&str]) -> Result<(), WarehouseError> {
    let existing = existing_columns(conn, table)?;

    if existing.is_empty() {
        debug!(table, "Creating destination table");
        return conn
            .execute_batch(&format!("CREATE TABLE {table} ({})", columns.join(", ")))
            .map_err(WarehouseError::backend);
    }

    for column in columns.iter().filter(|c| !existing.contains(**c)) {
        debug!(table, column, "Adding destination column");
        conn.execute_batch(&format!("ALTER TABLE {table} ADD COLUMN {column}"))
            .map_err(WarehouseError::backend)?;
    }

    Ok(())
}

pub(crate) fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => n.as_f64().map(SqlValue::Real).unwrap_or(SqlValue::Null),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        nested => SqlValue::Text(nested.to_string()),
    }
}

fn to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
        ValueRef::Text(text) | ValueRef::Blob(text) => {
            Value::String(String::from_utf8_lossy(text).into_owned())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rows(value: Value) -> Vec<Record> {
        value
            .as_array()
            .unwrap()
            .iter()
            .map(|row| row.as_object().cloned().unwrap())
            .collect()
    }

    #[tokio::test]
    async fn insert_creates_the_table() {
        let store = SqliteStore::in_memory().unwrap();

        let inserted = store
            .insert(
                "dim_customer",
                &rows(json!([
                    { "customer_id": 1, "name": "Ada" },
                    { "customer_id": 2, "name": "Grace", "tier": "gold" }
                ])),
            )
            .await
            .unwrap();
        assert_eq!(inserted, 2);

        let selected = store
            .select(
                "SELECT customer_id, name, tier FROM dim_customer WHERE customer_id > ? ORDER BY customer_id",
                &[json!(0)],
            )
            .await
            .unwrap();
        assert_eq!(
            selected,
            rows(json!([
                { "customer_id": 1, "name": "Ada", "tier": null },
                { "customer_id": 2, "name": "Grace", "tier": "gold" }
            ]))
        );
    }

    #[tokio::test]
    async fn new_columns_are_added() {
        let store = SqliteStore::in_memory().unwrap();
        store
            .insert("events", &rows(json!([{ "id": 1 }])))
            .await
            .unwrap();
        store
            .insert("events", &rows(json!([{ "id": 2, "score": 0.5, "meta": { "a": true } }])))
            .await
            .unwrap();

        let selected = store
            .select("SELECT id, score, meta FROM events WHERE id = ?", &[json!(2)])
            .await
            .unwrap();
        assert_eq!(
            selected,
            rows(json!([{ "id": 2, "score": 0.5, "meta": "{\"a\":true}" }]))
        );
    }

    #[tokio::test]
    async fn replace_is_idempotent() {
        let store = SqliteStore::in_memory().unwrap();
        let chunk = rows(json!([
            { "customer_id": 1, "name": "Ada" },
            { "customer_id": 2, "name": "Grace" },
            { "customer_id": 3, "name": "Edsger" }
        ]));
        let keys = [json!(1), json!(2), json!(3)];

        store
            .insert("dim_customer", &rows(json!([{ "customer_id": 2, "name": "Old" }])))
            .await
            .unwrap();

        for _ in 0..2 {
            store
                .replace_where_in("dim_customer", "customer_id", &keys, &chunk)
                .await
                .unwrap();
        }

        let selected = store
            .select("SELECT customer_id, name FROM dim_customer ORDER BY customer_id", &[])
            .await
            .unwrap();
        assert_eq!(selected, chunk);
    }

    #[tokio::test]
    async fn delete_from_missing_table_is_a_noop() {
        let store = SqliteStore::in_memory().unwrap();
        assert_eq!(
            store
                .delete_where_in("missing", "id", &[json!(1)])
                .await
                .unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn identifiers_are_checked() {
        let store = SqliteStore::in_memory().unwrap();
        let result = store
            .insert("t; DROP TABLE etl_batches", &rows(json!([{ "id": 1 }])))
            .await;
        assert!(matches!(result, Err(WarehouseError::InvalidIdentifier(_))));
    }
}
