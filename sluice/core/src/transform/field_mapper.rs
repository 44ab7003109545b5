use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde_json::{Number, Value};
use sluice_schemas::{FieldType, PipelineConfig, Record};

use super::{RecordTransformer, TransformError};

/// Default transformer driven by the pipeline's `transform` section
#[derive(Debug, Clone, Copy, Default)]
pub struct FieldMapper;

#[async_trait]
impl RecordTransformer for FieldMapper {
    async fn transform(
        &self,
        raw: &Value,
        source: &str,
        config: &PipelineConfig,
    ) -> Result<Record, TransformError> {
        let Value::Object(raw) = raw else {
            return Err(TransformError::NotAnObject(type_name(raw)));
        };

        let transform = &config.transform;
        let mut record = if transform.passthrough_for(source) {
            raw.clone()
        } else {
            Record::new()
        };

        for mapping in transform.mappings_for(source) {
            let value = lookup(raw, mapping.source_path())
                .filter(|value| !value.is_null())
                .cloned()
                .or_else(|| mapping.default.clone());

            let Some(value) = value else {
                if mapping.required {
                    return Err(TransformError::MissingField(
                        mapping.source_path().to_string(),
                    ));
                }
                continue;
            };

            let value = match mapping.field_type {
                Some(field_type) if !value.is_null() => coerce(&mapping.target, value, field_type)?,
                _ => value,
            };

            record.insert(mapping.target.clone(), value);
        }

        Ok(record)
    }
}

/// Resolve a dotted path such as `tracking.number`
fn lookup<'a>(record: &'a Record, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let mut current = record.get(parts.next()?)?;
    for part in parts {
        current = match current {
            Value::Object(map) => map.get(part)?,
            Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

fn coerce(field: &str, value: Value, expected: FieldType) -> Result<Value, TransformError> {
    let coerced = match (&value, expected) {
        (_, FieldType::Json) => Some(value.clone()),

        (Value::String(_), FieldType::String) => Some(value.clone()),
        (Value::Number(n), FieldType::String) => Some(Value::String(n.to_string())),
        (Value::Bool(b), FieldType::String) => Some(Value::String(b.to_string())),

        (Value::Number(n), FieldType::Integer) => integer(n),
        (Value::String(s), FieldType::Integer) => s.trim().parse::<i64>().ok().map(Value::from),
        (Value::Bool(b), FieldType::Integer) => Some(Value::from(i64::from(*b))),

        (Value::Number(n), FieldType::Float) => n.as_f64().and_then(float),
        (Value::String(s), FieldType::Float) => {
            s.trim().parse::<f64>().ok().and_then(float)
        }

        (Value::Bool(_), FieldType::Boolean) => Some(value.clone()),
        (Value::Number(n), FieldType::Boolean) => match n.as_i64() {
            Some(0) => Some(Value::Bool(false)),
            Some(1) => Some(Value::Bool(true)),
            _ => None,
        },
        (Value::String(s), FieldType::Boolean) => {
            match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" | "y" => Some(Value::Bool(true)),
                "false" | "0" | "no" | "n" => Some(Value::Bool(false)),
                _ => None,
            }
        }

        (Value::String(s), FieldType::Timestamp) => parse_timestamp(s)
            .map(|ts| Value::String(ts.to_rfc3339_opts(SecondsFormat::Secs, true))),
        (Value::Number(n), FieldType::Timestamp) => n
            .as_i64()
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
            .map(|ts| Value::String(ts.to_rfc3339_opts(SecondsFormat::Secs, true))),

        _ => None,
    };

    coerced.ok_or_else(|| TransformError::Coerce {
        field: field.to_string(),
        expected,
        value: value.to_string(),
    })
}

fn integer(n: &Number) -> Option<Value> {
    if n.is_i64() || n.is_u64() {
        return Some(Value::Number(n.clone()));
    }
    n.as_f64()
        .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
        .map(|f| Value::from(f as i64))
}

fn float(f: f64) -> Option<Value> {
    Number::from_f64(f).map(Value::Number)
}

/// RFC 3339, `YYYY-MM-DD HH:MM:SS` (UTC) or a bare date
pub(crate) fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    if let Ok(ts) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Some(ts.and_utc());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|ts| ts.and_utc())
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;
    use sluice_schemas::{FieldMapping, TransformConfig};

    fn config(mappings: Vec<FieldMapping>, passthrough: Option<bool>) -> PipelineConfig {
        PipelineConfig::builder()
            .transform(
                TransformConfig::builder()
                    .fields(mappings)
                    .maybe_passthrough(passthrough)
                    .build(),
            )
            .build()
    }

    fn mapping(target: &str, source: &str, field_type: Option<FieldType>) -> FieldMapping {
        FieldMapping::builder()
            .target(target.to_string())
            .source(source.to_string())
            .maybe_field_type(field_type)
            .build()
    }

    #[tokio::test]
    async fn maps_nested_fields_with_types() {
        let config = config(
            vec![
                mapping("tracking_number", "tracking.number", Some(FieldType::String)),
                mapping("weight_kg", "package.weight", Some(FieldType::Float)),
                mapping("delivered", "status.delivered", Some(FieldType::Boolean)),
                mapping("first_scan", "scans.0.at", Some(FieldType::Timestamp)),
            ],
            None,
        );

        let raw = json!({
            "tracking": { "number": 12345 },
            "package": { "weight": "2.5" },
            "status": { "delivered": "yes" },
            "scans": [{ "at": "2024-03-01 10:00:00" }],
            "ignored": true
        });

        let record = FieldMapper.transform(&raw, "carrier", &config).await.unwrap();

        assert_eq!(
            Value::Object(record),
            json!({
                "tracking_number": "12345",
                "weight_kg": 2.5,
                "delivered": true,
                "first_scan": "2024-03-01T10:00:00Z"
            })
        );
    }

    #[tokio::test]
    async fn passthrough_keeps_unmapped_fields() {
        let config = config(vec![mapping("id", "order_id", Some(FieldType::Integer))], Some(true));

        let record = FieldMapper
            .transform(&json!({ "order_id": "42", "total": 9.5 }), "orders", &config)
            .await
            .unwrap();

        assert_eq!(record["id"], json!(42));
        assert_eq!(record["total"], json!(9.5));
    }

    #[tokio::test]
    async fn required_fields_and_defaults() {
        let mut required = mapping("tracking_number", "tracking.number", None);
        required.required = true;
        let mut defaulted = mapping("carrier", "carrier.code", None);
        defaulted.default = Some(json!("unknown"));

        let config = config(vec![defaulted, required], None);

        let error = FieldMapper
            .transform(&json!({ "tracking": {} }), "carrier", &config)
            .await
            .unwrap_err();
        assert!(matches!(error, TransformError::MissingField(path) if path == "tracking.number"));

        let record = FieldMapper
            .transform(&json!({ "tracking": { "number": "T1" } }), "carrier", &config)
            .await
            .unwrap();
        assert_eq!(record["carrier"], json!("unknown"));
    }

    #[rstest]
    #[case(json!("abc"), FieldType::Integer)]
    #[case(json!(1.5), FieldType::Integer)]
    #[case(json!("maybe"), FieldType::Boolean)]
    #[case(json!("yesterday"), FieldType::Timestamp)]
    #[case(json!({ "a": 1 }), FieldType::String)]
    fn failed_coercions(#[case] value: Value, #[case] expected: FieldType) {
        assert!(matches!(
            coerce("field", value, expected),
            Err(TransformError::Coerce { .. })
        ));
    }

    #[tokio::test]
    async fn non_object_payload() {
        let error = FieldMapper
            .transform(&json!("plain"), "carrier", &PipelineConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(error, TransformError::NotAnObject("string")));
    }
}
