//! Validation rule sets.
//!
//! A rule set maps a canonical field name to the checks applied to it:
//!
//! ```yaml
//! validations:
//!   tracking_number:
//!     - required
//!     - regex: "^TRK[0-9]{6}$"
//!   weight_kg:
//!     - type: float
//!     - min: 0
//!       severity: warning
//! ```

use crate::transform::FieldType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Checks per canonical field
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleSet {
    pub fields: BTreeMap<String, Vec<FieldRule>>,
}

impl RuleSet {
    pub fn is_empty(&self) -> bool {
        self.fields.values().all(Vec::is_empty)
    }

    /// Add a rule for `field`
    pub fn with_rule(mut self, field: impl Into<String>, rule: FieldRule) -> Self {
        self.fields.entry(field.into()).or_default().push(rule);
        self
    }
}

/// A single check together with its severity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "FieldRuleRepr")]
pub struct FieldRule {
    #[serde(flatten)]
    pub rule: Rule,
    #[serde(default)]
    pub severity: Severity,
}

impl FieldRule {
    pub fn error(rule: Rule) -> Self {
        Self {
            rule,
            severity: Severity::Error,
        }
    }

    pub fn warning(rule: Rule) -> Self {
        Self {
            rule,
            severity: Severity::Warning,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum FieldRuleRepr {
    Bare(Rule),
    Detailed {
        #[serde(flatten)]
        rule: Rule,
        #[serde(default)]
        severity: Severity,
    },
}

impl From<FieldRuleRepr> for FieldRule {
    fn from(repr: FieldRuleRepr) -> Self {
        match repr {
            FieldRuleRepr::Bare(rule) => FieldRule::error(rule),
            FieldRuleRepr::Detailed { rule, severity } => FieldRule { rule, severity },
        }
    }
}

/// Supported checks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rule {
    /// Field must be present
    Required,
    /// Field, when present, must not be null
    NotNull,
    /// Value must be of the given type
    Type(FieldType),
    /// Numeric lower bound (inclusive)
    Min(f64),
    /// Numeric upper bound (inclusive)
    Max(f64),
    /// Minimum string length in characters
    MinLength(usize),
    /// Maximum string length in characters
    MaxLength(usize),
    /// String value must match the pattern
    Regex(String),
    /// Value must equal one of the listed values
    OneOf(Vec<serde_json::Value>),
}

impl Rule {
    pub fn name(&self) -> &'static str {
        match self {
            Rule::Required => "required",
            Rule::NotNull => "not_null",
            Rule::Type(_) => "type",
            Rule::Min(_) => "min",
            Rule::Max(_) => "max",
            Rule::MinLength(_) => "min_length",
            Rule::MaxLength(_) => "max_length",
            Rule::Regex(_) => "regex",
            Rule::OneOf(_) => "one_of",
        }
    }
}

/// Whether a failed check rejects the record or only lowers its score
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    #[default]
    Error,
    Warning,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_and_detailed_rules() {
        let yaml = r#"
tracking_number:
  - required
  - regex: "^TRK[0-9]+$"
weight_kg:
  - type: float
  - min: 0
    severity: warning
"#;
        let rules: RuleSet = serde_yml::from_str(yaml).unwrap();

        assert_eq!(
            rules.fields["tracking_number"],
            vec![
                FieldRule::error(Rule::Required),
                FieldRule::error(Rule::Regex("^TRK[0-9]+$".to_string())),
            ]
        );
        assert_eq!(
            rules.fields["weight_kg"],
            vec![
                FieldRule::error(Rule::Type(FieldType::Float)),
                FieldRule::warning(Rule::Min(0.0)),
            ]
        );
    }

    #[test]
    fn empty_rule_set() {
        let rules: RuleSet = serde_json::from_str("{}").unwrap();
        assert!(rules.is_empty());
        assert!(!rules.with_rule("id", FieldRule::error(Rule::NotNull)).is_empty());
    }
}
