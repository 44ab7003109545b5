//! Destination configuration types.

use crate::serde_helpers::{default_batch_size, default_load_type};
use bon::Builder;
use serde::{Deserialize, Serialize};

/// Load type inserting every chunk as-is
pub const APPEND: &str = "append";
/// Load type deleting rows matching the chunk's merge keys before inserting it
pub const UPSERT: &str = "upsert";

/// A destination table validated records are loaded into.
///
/// # Examples
///
/// ```
/// use sluice_schemas::DestinationDescriptor;
///
/// let destination = DestinationDescriptor::builder()
///     .table("dim_customer".to_string())
///     .load_type("upsert".to_string())
///     .merge_key("customer_id".to_string())
///     .build();
///
/// assert_eq!(destination.batch_size, 1000);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Builder)]
#[serde(rename_all = "snake_case")]
pub struct DestinationDescriptor {
    /// Target table
    pub table: String,

    /// `append` or `upsert`, or any load type registered by the application
    #[serde(default = "default_load_type", alias = "mode")]
    #[builder(default = default_load_type())]
    pub load_type: String,

    /// Column identifying rows for `upsert`
    #[serde(default)]
    pub merge_key: Option<String>,

    /// Records written per insert
    #[serde(default = "default_batch_size")]
    #[builder(default = default_batch_size())]
    pub batch_size: usize,

    /// Named connection, the default connection when omitted
    #[serde(default)]
    pub connection: Option<String>,

    /// Add `etl_batch_id` and `validation_score` columns to every row
    #[serde(default)]
    #[builder(default)]
    pub include_metadata: bool,
}

impl DestinationDescriptor {
    /// Append destination on the default connection
    pub fn append(table: impl Into<String>) -> Self {
        Self::builder().table(table.into()).build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_type_defaults_to_append() {
        let destination: DestinationDescriptor =
            serde_json::from_str(r#"{ "table": "fact_shipments", "batch_size": 2 }"#).unwrap();

        assert_eq!(destination.load_type, APPEND);
        assert_eq!(destination.batch_size, 2);
        assert!(destination.merge_key.is_none());
        assert!(!destination.include_metadata);
    }

    #[test]
    fn mode_alias() {
        let destination: DestinationDescriptor = serde_json::from_str(
            r#"{ "table": "dim_customer", "mode": "upsert", "merge_key": "customer_id" }"#,
        )
        .unwrap();

        assert_eq!(destination.load_type, UPSERT);
        assert_eq!(destination.merge_key.as_deref(), Some("customer_id"));
    }
}
