//! Loading pipeline definitions from YAML, JSON or TOML with `${param}` substitution.

use std::collections::HashSet;
use std::sync::{Arc, OnceLock};
use std::{collections::HashMap, path::Path};

use miette::{Diagnostic, NamedSource, SourceOffset, SourceSpan};
use regex::Regex;
use sluice_schemas::{
    destinations::UPSERT, sources::FACT_TABLE, FactTableSource, PipelineDefinition, Rule,
};
use tracing::debug;

use crate::sources::is_valid_date_key_format;

#[derive(Debug, thiserror::Error, Diagnostic)]
pub enum TemplateError {
    #[error("Pipeline file not found: '{file_path}'")]
    #[diagnostic(
        code(sluice::template::file_not_found),
        help("Check that the file path is correct and the file exists")
    )]
    NotFound {
        #[source]
        source: std::io::Error,
        file_path: String,
    },

    #[error("Unsupported configuration format: '{0}'")]
    #[diagnostic(
        code(sluice::template::unknown_format),
        help(
            "The configuration format '{0}' is not supported in this build.\n\
             \n\
             Available formats in this build:\n\
             {}",
            Self::available_formats()
        )
    )]
    UnknownFormat(TemplateFormat),

    #[error("Missing template parameters: {0:?}")]
    #[diagnostic(
        code(sluice::template::missing_params),
        help(
            "Provide the missing parameters using the -p flag.\n\
              \n\
              Example:\n\
              sluice run -f pipeline.yaml -p param1=value1 -p param2=value2"
        )
    )]
    MissingParams(HashSet<String>),

    #[cfg(feature = "json")]
    #[error("JSON parsing error")]
    #[diagnostic(code(sluice::template::json_parse_error))]
    ParseJson {
        #[source_code]
        source_code: Arc<NamedSource<String>>,
        #[label("{}", error)]
        span: SourceSpan,
        #[source]
        error: serde_json::Error,
    },

    #[cfg(feature = "yaml")]
    #[error("YAML parsing error")]
    #[diagnostic(code(sluice::template::yaml_parse_error))]
    ParseYaml {
        #[source_code]
        source_code: Arc<NamedSource<String>>,
        #[label("{}", error)]
        span: SourceSpan,
        #[source]
        error: serde_yml::Error,
    },

    #[cfg(feature = "toml")]
    #[error(transparent)]
    #[diagnostic(code(sluice::template::toml_serialize_error))]
    ParseSerToml(#[from] toml::ser::Error),

    #[cfg(feature = "toml")]
    #[error("TOML parsing error")]
    #[diagnostic(code(sluice::template::toml_parse_error))]
    ParseDeToml {
        #[source_code]
        source_code: Arc<NamedSource<String>>,
        #[label("{}", error)]
        span: SourceSpan,
        #[source]
        error: toml::de::Error,
    },

    #[error("Invalid pipeline '{pipeline}': {reason}")]
    #[diagnostic(
        code(sluice::template::invalid_definition),
        help(
            "Upsert destinations need a merge_key and regex rules must be valid patterns:\n\
              • Pattern syntax: https://docs.rs/regex/latest/regex/#syntax"
        )
    )]
    InvalidDefinition { pipeline: String, reason: String },
}

impl TemplateError {
    fn available_formats() -> String {
        let mut formats = vec![];

        #[cfg(feature = "json")]
        formats.push("• JSON (.json)");

        #[cfg(feature = "yaml")]
        formats.push("• YAML (.yaml, .yml)");

        #[cfg(feature = "toml")]
        formats.push("• TOML (.toml)");

        if formats.is_empty() {
            "No formats are currently enabled".to_string()
        } else {
            formats.join("\n")
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TemplateFormat {
    Json,
    Toml,
    Yaml,
    Unknown(String),
}

impl std::fmt::Display for TemplateFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TemplateFormat::Json => write!(f, "json"),
            TemplateFormat::Toml => write!(f, "toml"),
            TemplateFormat::Yaml => write!(f, "yaml"),
            TemplateFormat::Unknown(format) => write!(f, "{format}"),
        }
    }
}

/// Loads a definition and substitutes `${param}` placeholders.
///
/// Every placeholder left after substitution is reported in a single
/// [`TemplateError::MissingParams`].
pub trait TemplateLoader: Sized {
    fn from_file<P: AsRef<Path>>(
        path: P,
        format: TemplateFormat,
        params: HashMap<String, String>,
    ) -> Result<Self, TemplateError>;

    fn from_str<T: AsRef<str>>(
        value: T,
        format: TemplateFormat,
        params: HashMap<String, String>,
    ) -> Result<Self, TemplateError>;

    fn substitute_params(
        raw: &str,
        params: HashMap<String, String>,
    ) -> Result<String, TemplateError> {
        static PARAM_REGEX: OnceLock<Regex> = OnceLock::new();
        let mut definition = raw.to_string();

        params.into_iter().for_each(|(name, value)| {
            let template = format!("${{{name}}}");
            definition = definition.replace(template.as_str(), value.as_str());
        });

        let missing_params = PARAM_REGEX
            .get_or_init(|| Regex::new("\\$\\{([a-zA-Z0-9_]+)\\}").expect("invalid regex"))
            .captures_iter(definition.as_str())
            .filter_map(|capture| capture.get(1))
            .map(|param| param.as_str().to_string())
            .collect::<HashSet<String>>();

        if !missing_params.is_empty() {
            return Err(TemplateError::MissingParams(missing_params));
        }

        Ok(definition)
    }
}

impl TemplateLoader for PipelineDefinition {
    fn from_file<T: AsRef<Path>>(
        path: T,
        format: TemplateFormat,
        params: HashMap<String, String>,
    ) -> Result<PipelineDefinition, TemplateError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| TemplateError::NotFound {
            source: e,
            file_path: path.display().to_string(),
        })?;
        Self::from_str(contents, format, params)
    }

    fn from_str<T: AsRef<str>>(
        value: T,
        format: TemplateFormat,
        params: HashMap<String, String>,
    ) -> Result<PipelineDefinition, TemplateError> {
        let contents = value.as_ref();

        debug!("Parsing template with format: {format:?}");

        let definition = match format {
            TemplateFormat::Toml => {
                #[cfg(feature = "toml")]
                {
                    let definition = Self::substitute_params(contents, params)?;
                    toml::from_str::<PipelineDefinition>(definition.as_str()).map_err(|error| {
                        let offset = error
                            .span()
                            .map(|span| SourceOffset::from(span.start))
                            .unwrap_or_else(|| SourceOffset::from(0));
                        TemplateError::ParseDeToml {
                            source_code: Arc::new(NamedSource::new(
                                "pipeline.toml",
                                definition.clone(),
                            )),
                            span: SourceSpan::new(offset, 1),
                            error,
                        }
                    })?
                }
                #[cfg(not(feature = "toml"))]
                {
                    return Err(TemplateError::UnknownFormat(TemplateFormat::Toml));
                }
            }
            TemplateFormat::Json => {
                #[cfg(feature = "json")]
                {
                    let definition = Self::substitute_params(contents, params)?;
                    serde_json::from_str::<PipelineDefinition>(definition.as_str()).map_err(
                        |error| {
                            let offset = SourceOffset::from_location(
                                &definition,
                                error.line(),
                                error.column(),
                            );
                            TemplateError::ParseJson {
                                source_code: Arc::new(NamedSource::new(
                                    "pipeline.json",
                                    definition.clone(),
                                )),
                                span: SourceSpan::new(offset, 1),
                                error,
                            }
                        },
                    )?
                }
                #[cfg(not(feature = "json"))]
                {
                    return Err(TemplateError::UnknownFormat(TemplateFormat::Json));
                }
            }
            TemplateFormat::Yaml => {
                #[cfg(feature = "yaml")]
                {
                    let definition = Self::substitute_params(contents, params)?;
                    serde_yml::from_str::<PipelineDefinition>(definition.as_str()).map_err(
                        |error| {
                            let offset = error
                                .location()
                                .map(|location| {
                                    SourceOffset::from_location(
                                        &definition,
                                        location.line(),
                                        location.column(),
                                    )
                                })
                                .unwrap_or_else(|| SourceOffset::from(0));
                            TemplateError::ParseYaml {
                                source_code: Arc::new(NamedSource::new(
                                    "pipeline.yaml",
                                    definition.clone(),
                                )),
                                span: SourceSpan::new(offset, 1),
                                error,
                            }
                        },
                    )?
                }
                #[cfg(not(feature = "yaml"))]
                {
                    return Err(TemplateError::UnknownFormat(TemplateFormat::Yaml));
                }
            }
            fmt @ TemplateFormat::Unknown(_) => return Err(TemplateError::UnknownFormat(fmt)),
        };

        validate_definition(&definition)?;

        Ok(definition)
    }
}

/// Reject definitions that would only fail once a batch runs
fn validate_definition(definition: &PipelineDefinition) -> Result<(), TemplateError> {
    let invalid = |reason: String| TemplateError::InvalidDefinition {
        pipeline: definition.name.clone(),
        reason,
    };

    for (name, destination) in definition.config.destinations.iter() {
        if destination.load_type == UPSERT && destination.merge_key.is_none() {
            return Err(invalid(format!(
                "destination '{name}' uses upsert but has no merge_key"
            )));
        }
    }

    for (name, source) in definition.config.sources.iter() {
        if source.kind != FACT_TABLE {
            continue;
        }
        // malformed options are reported by the reader with the serde error
        if let Ok(options) = source.options::<FactTableSource>() {
            if !is_valid_date_key_format(&options.date_key_format) {
                return Err(invalid(format!(
                    "source '{name}' has an invalid date_key_format '{}'",
                    options.date_key_format
                )));
            }
        }
    }

    for (field, rules) in &definition.config.validations.fields {
        for rule in rules {
            if let Rule::Regex(pattern) = &rule.rule {
                Regex::new(pattern).map_err(|error| {
                    invalid(format!("regex rule of field '{field}' is invalid: {error}"))
                })?;
            }
        }
    }

    Ok(())
}

pub fn format_from_path<P: AsRef<Path>>(path: P) -> TemplateFormat {
    let path = path.as_ref();
    let ext = path.extension().and_then(|s| s.to_str());

    match ext {
        Some("toml") => TemplateFormat::Toml,
        Some("json") => TemplateFormat::Json,
        Some("yml") | Some("yaml") => TemplateFormat::Yaml,
        ext => TemplateFormat::Unknown(ext.unwrap_or("unknown_ext").to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const TEMPLATE: &str = r#"
name: orders_${env}
sources:
  shop:
    type: database
    connection: ${connection}
    table: orders
table: fact_orders
"#;

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn substitutes_params() {
        let definition = PipelineDefinition::from_str(
            TEMPLATE,
            TemplateFormat::Yaml,
            params(&[("env", "prod"), ("connection", "shop_db")]),
        )
        .unwrap();

        assert_eq!(definition.name, "orders_prod");
        let shop = definition.config.sources.get("shop").unwrap();
        assert_eq!(shop.options["connection"], "shop_db");
    }

    #[test]
    fn reports_all_missing_params() {
        let result = PipelineDefinition::from_str(TEMPLATE, TemplateFormat::Yaml, HashMap::new());

        match result {
            Err(TemplateError::MissingParams(missing)) => {
                assert_eq!(
                    missing,
                    HashSet::from(["env".to_string(), "connection".to_string()])
                );
            }
            other => panic!("expected missing params, got {other:?}"),
        }
    }

    #[test]
    fn rejects_upsert_without_merge_key() {
        let json = r#"{
            "name": "customers",
            "destinations": { "dim": { "table": "dim_customer", "load_type": "upsert" } }
        }"#;

        let result = PipelineDefinition::from_str(json, TemplateFormat::Json, HashMap::new());
        assert!(matches!(result, Err(TemplateError::InvalidDefinition { .. })));
    }

    #[test]
    fn rejects_unknown_date_key_format() {
        let yaml = r#"
name: revenue
sources:
  daily:
    type: fact_table
    query: "SELECT * FROM fact_sales WHERE date_key = ?"
    date_key_format: "%Y-%Q"
table: revenue_daily
"#;

        let result = PipelineDefinition::from_str(yaml, TemplateFormat::Yaml, HashMap::new());
        match result {
            Err(TemplateError::InvalidDefinition { pipeline, reason }) => {
                assert_eq!(pipeline, "revenue");
                assert!(reason.contains("'daily'"));
                assert!(reason.contains("%Y-%Q"));
            }
            other => panic!("expected an invalid definition, got {other:?}"),
        }
    }

    #[test]
    fn parse_errors_point_into_the_source() {
        let result = PipelineDefinition::from_str(
            "name = \"broken\"\nsources = [",
            TemplateFormat::Toml,
            HashMap::new(),
        );

        match result {
            Err(TemplateError::ParseDeToml { source_code, .. }) => {
                assert!(source_code.inner().contains("broken"));
            }
            other => panic!("expected TOML error, got {other:?}"),
        }
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::Builder::new().suffix(".yml").tempfile().unwrap();
        file.write_all(TEMPLATE.as_bytes()).unwrap();

        let format = format_from_path(file.path());
        assert_eq!(format, TemplateFormat::Yaml);

        let definition = PipelineDefinition::from_file(
            file.path(),
            format,
            params(&[("env", "dev"), ("connection", "local")]),
        )
        .unwrap();
        assert_eq!(definition.name, "orders_dev");

        assert!(matches!(
            PipelineDefinition::from_file("missing.yml", TemplateFormat::Yaml, HashMap::new()),
            Err(TemplateError::NotFound { .. })
        ));
    }

    #[test]
    fn unknown_extension() {
        assert_eq!(
            format_from_path("pipeline.xml"),
            TemplateFormat::Unknown("xml".to_string())
        );
    }
}
