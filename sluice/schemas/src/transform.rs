//! Field mapping configuration for the default record transformer.

use bon::Builder;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Mapping of raw source records onto the canonical schema
///
/// When no mappings apply to a source, records are passed through unchanged
/// unless `passthrough` is explicitly disabled.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Builder)]
#[serde(rename_all = "snake_case")]
pub struct TransformConfig {
    /// Copy fields that are not mapped explicitly
    #[serde(default)]
    pub passthrough: Option<bool>,

    /// Mappings applied to every source
    #[serde(default)]
    #[builder(default)]
    pub fields: Vec<FieldMapping>,

    /// Mappings replacing `fields` for individual sources
    #[serde(default)]
    #[builder(default)]
    pub sources: BTreeMap<String, Vec<FieldMapping>>,
}

impl TransformConfig {
    /// Mappings in effect for `source`
    pub fn mappings_for(&self, source: &str) -> &[FieldMapping] {
        self.sources
            .get(source)
            .map(Vec::as_slice)
            .unwrap_or(self.fields.as_slice())
    }

    /// Whether unmapped fields of `source` are copied
    pub fn passthrough_for(&self, source: &str) -> bool {
        self.passthrough
            .unwrap_or_else(|| self.mappings_for(source).is_empty())
    }
}

/// Maps one raw field onto one canonical field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Builder)]
#[serde(rename_all = "snake_case")]
pub struct FieldMapping {
    /// Canonical field name
    pub target: String,

    /// Dotted path into the raw record, defaults to `target`
    #[serde(default)]
    pub source: Option<String>,

    /// Type the value is coerced to
    #[serde(default, rename = "type")]
    pub field_type: Option<FieldType>,

    /// Value used when the raw field is missing or null
    #[serde(default)]
    pub default: Option<serde_json::Value>,

    /// Fail the record when the raw field is missing and there is no default
    #[serde(default)]
    #[builder(default)]
    pub required: bool,
}

impl FieldMapping {
    pub fn source_path(&self) -> &str {
        self.source.as_deref().unwrap_or(self.target.as_str())
    }
}

/// Canonical field types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    String,
    #[serde(alias = "int")]
    Integer,
    #[serde(alias = "number", alias = "numeric")]
    Float,
    #[serde(alias = "bool")]
    Boolean,
    #[serde(alias = "datetime", alias = "date")]
    Timestamp,
    Json,
}
