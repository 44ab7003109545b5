use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use sluice_schemas::{FieldType, Record, Rule, RuleSet, Severity};
use std::collections::HashMap;
use std::sync::RwLock;

use super::{RecordValidator, ValidationError, ValidationOutcome, Violation};
use crate::transform::field_mapper::parse_timestamp;

/// Default validator applying a [`RuleSet`]
///
/// A record is valid when no `error` severity check fails. The score is the
/// share of passed checks. Compiled patterns are cached across records.
#[derive(Debug, Default)]
pub struct RuleValidator {
    patterns: RwLock<HashMap<String, Regex>>,
}

#[async_trait]
impl RecordValidator for RuleValidator {
    async fn validate(
        &self,
        record: &Record,
        rules: &RuleSet,
    ) -> Result<ValidationOutcome, ValidationError> {
        let mut checks = 0usize;
        let mut errors = Vec::new();

        for (field, field_rules) in &rules.fields {
            let value = record.get(field);

            for field_rule in field_rules {
                checks += 1;
                if let Some(message) = self.check(field, value, &field_rule.rule)? {
                    errors.push(Violation {
                        field: field.clone(),
                        rule: field_rule.rule.name().to_string(),
                        message,
                        severity: field_rule.severity,
                    });
                }
            }
        }

        let valid = errors.iter().all(|v| v.severity != Severity::Error);
        let score = if checks == 0 {
            1.0
        } else {
            (checks - errors.len()) as f64 / checks as f64
        };

        Ok(ValidationOutcome {
            valid,
            score,
            errors,
        })
    }
}

impl RuleValidator {
    /// `Some(message)` when the check fails
    fn check(
        &self,
        field: &str,
        value: Option<&Value>,
        rule: &Rule,
    ) -> Result<Option<String>, ValidationError> {
        let failure = match (rule, value) {
            (Rule::Required, None | Some(Value::Null)) => Some("is required".to_string()),
            (Rule::Required, Some(Value::String(s))) if s.trim().is_empty() => {
                Some("is required".to_string())
            }
            (Rule::Required, _) => None,

            (Rule::NotNull, Some(Value::Null)) => Some("must not be null".to_string()),
            (Rule::NotNull, _) => None,

            // remaining checks only apply to present values
            (_, None | Some(Value::Null)) => None,

            (Rule::Type(expected), Some(value)) => {
                (!matches_type(value, *expected)).then(|| format!("must be of type {expected:?}"))
            }
            (Rule::Min(min), Some(value)) => match value.as_f64() {
                Some(n) if n >= *min => None,
                Some(n) => Some(format!("{n} is less than {min}")),
                None => Some("must be numeric".to_string()),
            },
            (Rule::Max(max), Some(value)) => match value.as_f64() {
                Some(n) if n <= *max => None,
                Some(n) => Some(format!("{n} is greater than {max}")),
                None => Some("must be numeric".to_string()),
            },
            (Rule::MinLength(min), Some(value)) => match length(value) {
                Some(len) if len >= *min => None,
                Some(len) => Some(format!("length {len} is shorter than {min}")),
                None => Some("has no length".to_string()),
            },
            (Rule::MaxLength(max), Some(value)) => match length(value) {
                Some(len) if len <= *max => None,
                Some(len) => Some(format!("length {len} is longer than {max}")),
                None => Some("has no length".to_string()),
            },
            (Rule::Regex(pattern), Some(value)) => {
                let text = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (!self.is_match(field, pattern, &text)?)
                    .then(|| format!("does not match '{pattern}'"))
            }
            (Rule::OneOf(allowed), Some(value)) => {
                (!allowed.contains(value)).then(|| format!("{value} is not an allowed value"))
            }
        };

        Ok(failure)
    }

    fn is_match(&self, field: &str, pattern: &str, text: &str) -> Result<bool, ValidationError> {
        if let Some(regex) = self
            .patterns
            .read()
            .map_err(|_| ValidationError::Other("pattern cache poisoned".to_string()))?
            .get(pattern)
        {
            return Ok(regex.is_match(text));
        }

        let regex = Regex::new(pattern).map_err(|error| ValidationError::InvalidRule {
            field: field.to_string(),
            rule: "regex".to_string(),
            reason: error.to_string(),
        })?;
        let matched = regex.is_match(text);

        self.patterns
            .write()
            .map_err(|_| ValidationError::Other("pattern cache poisoned".to_string()))?
            .insert(pattern.to_string(), regex);

        Ok(matched)
    }
}

fn matches_type(value: &Value, expected: FieldType) -> bool {
    match expected {
        FieldType::String => value.is_string(),
        FieldType::Integer => {
            value.is_i64() || value.is_u64() || value.as_f64().is_some_and(|f| f.fract() == 0.0)
        }
        FieldType::Float => value.is_number(),
        FieldType::Boolean => value.is_boolean(),
        FieldType::Timestamp => value.as_str().and_then(parse_timestamp).is_some(),
        FieldType::Json => value.is_object() || value.is_array(),
    }
}

fn length(value: &Value) -> Option<usize> {
    match value {
        Value::String(s) => Some(s.chars().count()),
        Value::Array(items) => Some(items.len()),
        Value::Object(map) => Some(map.len()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;
    use sluice_schemas::FieldRule;

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn no_rules_scores_one() {
        let outcome = RuleValidator::default()
            .validate(&record(json!({ "id": 1 })), &RuleSet::default())
            .await
            .unwrap();

        assert!(outcome.valid);
        assert_eq!(outcome.score, 1.0);
        assert!(outcome.errors.is_empty());
    }

    #[tokio::test]
    async fn warnings_lower_the_score_only() {
        let rules = RuleSet::default()
            .with_rule("tracking_number", FieldRule::error(Rule::Required))
            .with_rule(
                "tracking_number",
                FieldRule::error(Rule::Regex("^TRK[0-9]{3}$".to_string())),
            )
            .with_rule("weight_kg", FieldRule::warning(Rule::Max(30.0)))
            .with_rule("status", FieldRule::warning(Rule::OneOf(vec![json!("in_transit")])));

        let outcome = RuleValidator::default()
            .validate(
                &record(json!({
                    "tracking_number": "TRK123",
                    "weight_kg": 42,
                    "status": "in_transit"
                })),
                &rules,
            )
            .await
            .unwrap();

        assert!(outcome.valid);
        assert_eq!(outcome.score, 0.75);
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].rule, "max");
    }

    #[rstest]
    #[case(Rule::Required, json!({}), false)]
    #[case(Rule::Required, json!({ "f": "  " }), false)]
    #[case(Rule::NotNull, json!({}), true)]
    #[case(Rule::NotNull, json!({ "f": null }), false)]
    #[case(Rule::Type(FieldType::Integer), json!({ "f": 3.0 }), true)]
    #[case(Rule::Type(FieldType::Timestamp), json!({ "f": "2024-01-01" }), true)]
    #[case(Rule::Type(FieldType::String), json!({ "f": 3 }), false)]
    #[case(Rule::Min(1.0), json!({ "f": "abc" }), false)]
    #[case(Rule::MinLength(2), json!({ "f": "é" }), false)]
    #[case(Rule::MaxLength(2), json!({ "f": [1, 2] }), true)]
    #[case(Rule::Regex("^[0-9]+$".to_string()), json!({ "f": 123 }), true)]
    #[case(Rule::OneOf(vec![json!(1), json!(2)]), json!({ "f": 3 }), false)]
    #[case(Rule::Max(5.0), json!({}), true)]
    #[tokio::test]
    async fn single_checks(#[case] rule: Rule, #[case] value: Value, #[case] valid: bool) {
        let rules = RuleSet::default().with_rule("f", FieldRule::error(rule));
        let outcome = RuleValidator::default()
            .validate(&record(value), &rules)
            .await
            .unwrap();

        assert_eq!(outcome.valid, valid);
    }

    #[tokio::test]
    async fn invalid_pattern_is_a_validator_error() {
        let rules =
            RuleSet::default().with_rule("f", FieldRule::error(Rule::Regex("([".to_string())));

        let result = RuleValidator::default()
            .validate(&record(json!({ "f": "x" })), &rules)
            .await;

        assert!(matches!(result, Err(ValidationError::InvalidRule { .. })));
    }
}
