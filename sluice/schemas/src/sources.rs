//! Source configuration types.
//!
//! A [`SourceDescriptor`] carries the type tag and the options common to every
//! source. Type specific options (API endpoint, table, fact query) stay in the
//! flattened `options` map and are decoded by the reader registered for the
//! tag, so applications can register their own source kinds without touching
//! these types.

use crate::serde_helpers::{
    default_api_key_header, default_batch_size, default_data_key, default_date_key_format,
    default_max_pages, default_page_param, default_per_page_param,
};
use bon::Builder;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use url::Url;

/// Type tag of the paginated HTTP source
pub const API: &str = "api";
/// Type tag of the relational table source
pub const DATABASE: &str = "database";
/// Type tag of the precomputed fact query source
pub const FACT_TABLE: &str = "fact_table";

/// A configured data source of a pipeline.
///
/// # Examples
///
/// ```
/// use sluice_schemas::SourceDescriptor;
///
/// let source = SourceDescriptor::builder()
///     .kind("database".to_string())
///     .incremental_field("updated_at".to_string())
///     .options(serde_json::json!({ "table": "shipments" }).as_object().unwrap().clone())
///     .build();
///
/// assert_eq!(source.batch_size, 1000);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Builder)]
#[serde(rename_all = "snake_case")]
pub struct SourceDescriptor {
    /// Source type tag, e.g. `api`, `database` or `fact_table`
    #[serde(rename = "type")]
    pub kind: String,

    /// Field compared against the watermark of the last completed batch
    #[serde(default)]
    pub incremental_field: Option<String>,

    /// Row cap for table reads, page size for API reads
    #[serde(default = "default_batch_size")]
    #[builder(default = default_batch_size())]
    pub batch_size: usize,

    /// Maximum number of pages fetched from an API source
    #[serde(default = "default_max_pages")]
    #[builder(default = default_max_pages())]
    pub max_pages: usize,

    /// Type specific options
    #[serde(flatten)]
    #[builder(default)]
    pub options: serde_json::Map<String, serde_json::Value>,
}

impl SourceDescriptor {
    /// Decode the type specific options into `T`
    pub fn options<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(serde_json::Value::Object(self.options.clone()))
    }
}

/// Options of an `api` source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Builder)]
#[serde(rename_all = "snake_case")]
pub struct ApiSource {
    /// Endpoint queried with GET
    pub url: Url,

    /// Authentication scheme, unauthenticated when omitted
    #[serde(default)]
    pub auth: Option<ApiAuth>,

    /// Static query parameters sent with every page request
    #[serde(default)]
    #[builder(default)]
    pub params: BTreeMap<String, String>,

    /// Query parameter carrying the page number
    #[serde(default = "default_page_param")]
    #[builder(default = default_page_param())]
    pub page_param: String,

    /// Query parameter carrying the page size
    #[serde(default = "default_per_page_param")]
    #[builder(default = default_per_page_param())]
    pub per_page_param: String,

    /// Key of the records array in each page
    #[serde(default = "default_data_key")]
    #[builder(default = default_data_key())]
    pub data_key: String,
}

/// Authentication schemes supported by `api` sources
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ApiAuth {
    /// `Authorization: Bearer <token>`
    Bearer { token: String },
    /// Static key sent in a header
    ApiKey {
        key: String,
        #[serde(default = "default_api_key_header")]
        header: String,
    },
    /// HTTP basic authentication
    Basic {
        username: String,
        #[serde(default)]
        password: Option<String>,
    },
}

/// Options of a `database` source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Builder)]
#[serde(rename_all = "snake_case")]
pub struct DatabaseSource {
    /// Named connection, the default connection when omitted
    #[serde(default)]
    pub connection: Option<String>,

    /// Table to read from
    pub table: String,

    /// Raw SQL condition appended to the incremental filter
    #[serde(default, rename = "where")]
    pub filter: Option<String>,
}

/// Options of a `fact_table` source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Builder)]
#[serde(rename_all = "snake_case")]
pub struct FactTableSource {
    /// Named connection, the default connection when omitted
    #[serde(default)]
    pub connection: Option<String>,

    /// Aggregate query, every `?` is bound to yesterday's date key
    pub query: String,

    /// `chrono` format of the date key
    #[serde(default = "default_date_key_format")]
    #[builder(default = default_date_key_format())]
    pub date_key_format: String,
}
