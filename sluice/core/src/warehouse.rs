//! Warehouse boundary and named connections.

use async_trait::async_trait;
use serde_json::Value;
use sluice_schemas::Record;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Name of the connection used when a descriptor does not name one
pub const DEFAULT_CONNECTION: &str = "default";

#[derive(Debug, thiserror::Error)]
pub enum WarehouseError {
    #[error("unknown connection '{0}'")]
    UnknownConnection(String),

    #[error("invalid identifier '{0}'")]
    InvalidIdentifier(String),

    #[error("unsupported operation: {0}")]
    Unsupported(String),

    #[error("warehouse backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("warehouse lock poisoned")]
    LockPoisoned,
}

impl WarehouseError {
    pub fn backend(error: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        WarehouseError::Backend(error.into())
    }
}

/// A relational store read by table sources and written by destinations
#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Run a raw SELECT with positional `?` parameters
    async fn select(&self, query: &str, params: &[Value]) -> Result<Vec<Record>, WarehouseError>;

    /// Insert rows, returning the number inserted
    async fn insert(&self, table: &str, rows: &[Record]) -> Result<usize, WarehouseError>;

    /// Delete rows whose `column` is one of `keys`, returning the number deleted
    async fn delete_where_in(
        &self,
        table: &str,
        column: &str,
        keys: &[Value],
    ) -> Result<usize, WarehouseError>;

    /// Delete the rows matching `keys`, then insert `rows`.
    ///
    /// Backends with transactions should override this so both steps commit
    /// together.
    async fn replace_where_in(
        &self,
        table: &str,
        column: &str,
        keys: &[Value],
        rows: &[Record],
    ) -> Result<usize, WarehouseError> {
        self.delete_where_in(table, column, keys).await?;
        self.insert(table, rows).await
    }
}

/// Warehouses addressable by connection name
#[derive(Clone, Default)]
pub struct Connections {
    warehouses: HashMap<String, Arc<dyn Warehouse>>,
}

impl Connections {
    /// Connections with `warehouse` registered as the default
    pub fn new(warehouse: Arc<dyn Warehouse>) -> Self {
        Self::default().with(DEFAULT_CONNECTION, warehouse)
    }

    pub fn with(mut self, name: impl Into<String>, warehouse: Arc<dyn Warehouse>) -> Self {
        self.warehouses.insert(name.into(), warehouse);
        self
    }

    /// Resolve a connection name, `None` being the default connection
    pub fn get(&self, name: Option<&str>) -> Result<Arc<dyn Warehouse>, WarehouseError> {
        let name = name.unwrap_or(DEFAULT_CONNECTION);
        self.warehouses
            .get(name)
            .cloned()
            .ok_or_else(|| WarehouseError::UnknownConnection(name.to_string()))
    }
}

impl fmt::Debug for Connections {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = self.warehouses.keys().collect::<Vec<_>>();
        names.sort();
        f.debug_struct("Connections").field("names", &names).finish()
    }
}

/// Check that `name` can be spliced into SQL as a (possibly schema qualified) identifier
pub fn check_identifier(name: &str) -> Result<&str, WarehouseError> {
    let valid = !name.is_empty()
        && name.split('.').all(|part| {
            let mut chars = part.chars();
            matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        });

    if valid {
        Ok(name)
    } else {
        Err(WarehouseError::InvalidIdentifier(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryWarehouse;
    use rstest::rstest;

    #[test]
    fn resolves_default_and_named_connections() {
        let connections = Connections::new(Arc::new(MemoryWarehouse::default()))
            .with("reporting", Arc::new(MemoryWarehouse::default()));

        assert!(connections.get(None).is_ok());
        assert!(connections.get(Some("reporting")).is_ok());
        assert!(matches!(
            connections.get(Some("legacy")),
            Err(WarehouseError::UnknownConnection(name)) if name == "legacy"
        ));
    }

    #[rstest]
    #[case("shipments", true)]
    #[case("analytics.fact_orders", true)]
    #[case("_tmp1", true)]
    #[case("1table", false)]
    #[case("orders; DROP TABLE orders", false)]
    #[case("", false)]
    #[case("a..b", false)]
    fn identifiers(#[case] name: &str, #[case] valid: bool) {
        assert_eq!(check_identifier(name).is_ok(), valid);
    }
}
