//! Aggregate refresh and cache invalidation after a successful load.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};

#[derive(Debug, thiserror::Error)]
pub enum AggregateError {
    #[error("failed to refresh aggregates of '{pipeline}': {reason}")]
    Refresh { pipeline: String, reason: String },

    #[error("invalid cache pattern '{0}'")]
    Pattern(String),

    #[error("aggregate backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("cache lock poisoned")]
    LockPoisoned,
}

impl AggregateError {
    pub fn backend(error: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        AggregateError::Backend(error.into())
    }
}

/// Recomputes the aggregates fed by a pipeline
#[async_trait]
pub trait AggregationRefresher: Send + Sync {
    async fn refresh(&self, pipeline: &str, batch_id: &str) -> Result<(), AggregateError>;
}

/// Drops cached entries whose key matches a glob pattern.
///
/// Patterns follow SQLite `GLOB`: `*` matches any run of characters, `?` a
/// single character and `[...]` a class with `a-z` ranges, negated by a
/// leading `^`. A `]` right after the opening bracket is literal. Matching
/// is case-sensitive. Implementations reject patterns [`glob_to_regex`]
/// rejects, so every backend invalidates the same keys.
#[async_trait]
pub trait CacheInvalidator: Send + Sync {
    /// Returns the number of invalidated entries
    async fn invalidate_pattern(&self, pattern: &str) -> Result<usize, AggregateError>;
}

/// Refresher for deployments without aggregates
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopRefresher;

#[async_trait]
impl AggregationRefresher for NoopRefresher {
    async fn refresh(&self, _pipeline: &str, _batch_id: &str) -> Result<(), AggregateError> {
        Ok(())
    }
}

/// Pipeline name to cache namespace patterns
pub type Namespaces = HashMap<String, Vec<String>>;

/// Refreshes aggregates, then invalidates the cache namespaces of a pipeline
#[derive(Clone)]
pub struct Aggregator {
    refresher: Arc<dyn AggregationRefresher>,
    cache: Arc<dyn CacheInvalidator>,
    namespaces: Namespaces,
}

impl Aggregator {
    pub fn new(
        refresher: Arc<dyn AggregationRefresher>,
        cache: Arc<dyn CacheInvalidator>,
        namespaces: Namespaces,
    ) -> Self {
        Self {
            refresher,
            cache,
            namespaces,
        }
    }

    /// Patterns invalidated for `pipeline`
    pub fn patterns(&self, pipeline: &str) -> &[String] {
        self.namespaces
            .get(pipeline)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Refresh and invalidate.
    ///
    /// Every pattern is attempted even when the refresh or an earlier
    /// pattern fails; the first error is returned. On success returns the
    /// number of patterns invalidated.
    #[instrument(skip(self), err)]
    pub async fn run(&self, pipeline: &str, batch_id: &str) -> Result<usize, AggregateError> {
        let mut first_error = None;

        if let Err(error) = self.refresher.refresh(pipeline, batch_id).await {
            warn!("Aggregate refresh failed: {error}");
            first_error.get_or_insert(error);
        }

        let patterns = self.patterns(pipeline);
        for pattern in patterns {
            match self.cache.invalidate_pattern(pattern).await {
                Ok(removed) => info!(pattern = %pattern, removed, "Invalidated cache namespace"),
                Err(error) => {
                    warn!(pattern = %pattern, "Cache invalidation failed: {error}");
                    first_error.get_or_insert(error);
                }
            }
        }

        match first_error {
            Some(error) => Err(error),
            None => Ok(patterns.len()),
        }
    }
}

/// Translate a cache glob into an anchored regular expression.
///
/// Unterminated classes and reversed ranges are rejected.
pub fn glob_to_regex(pattern: &str) -> Result<regex::Regex, AggregateError> {
    let invalid = || AggregateError::Pattern(pattern.to_string());

    let mut expression = String::with_capacity(pattern.len() + 6);
    expression.push_str("(?s)^");
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '*' => expression.push_str(".*"),
            '?' => expression.push('.'),
            '[' => {
                let negated = chars.clone().next() == Some('^');
                if negated {
                    chars.next();
                }

                let mut members = Vec::new();
                loop {
                    match chars.next() {
                        Some(']') if !members.is_empty() => break,
                        Some(c) => members.push(c),
                        None => return Err(invalid()),
                    }
                }

                expression.push('[');
                if negated {
                    expression.push('^');
                }
                let mut i = 0;
                while i < members.len() {
                    let start = members[i];
                    if members.get(i + 1) == Some(&'-') && i + 2 < members.len() {
                        let end = members[i + 2];
                        if start > end {
                            return Err(invalid());
                        }
                        expression.push_str(&format!("{}-{}", class_char(start), class_char(end)));
                        i += 3;
                    } else {
                        expression.push_str(&class_char(start));
                        i += 1;
                    }
                }
                expression.push(']');
            }
            c => expression.push_str(&regex::escape(&c.to_string())),
        }
    }
    expression.push('$');

    regex::Regex::new(&expression).map_err(|_| invalid())
}

fn class_char(c: char) -> String {
    format!("\\x{{{:x}}}", c as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryCache, RecordingRefresher};
    use tracing_test::traced_test;

    fn namespaces() -> Namespaces {
        HashMap::from([(
            "shipments_realtime".to_string(),
            vec!["dashboard:*".to_string(), "operational:*".to_string()],
        )])
    }

    fn cache() -> Arc<MemoryCache> {
        let cache = MemoryCache::default();
        for key in [
            "dashboard:kpis",
            "dashboard:map:eu",
            "operational:late",
            "finance:daily",
        ] {
            cache.put(key, serde_json::json!(1));
        }
        Arc::new(cache)
    }

    #[tokio::test]
    async fn invalidates_the_pipeline_namespaces() {
        let refresher = Arc::new(RecordingRefresher::default());
        let cache = cache();
        let aggregator = Aggregator::new(refresher.clone(), cache.clone(), namespaces());

        let patterns = aggregator.run("shipments_realtime", "b-1").await.unwrap();

        assert_eq!(patterns, 2);
        assert_eq!(refresher.calls(), vec!["shipments_realtime".to_string()]);
        assert_eq!(cache.keys(), vec!["finance:daily".to_string()]);
        assert_eq!(
            cache.invalidated(),
            vec!["dashboard:*".to_string(), "operational:*".to_string()]
        );
    }

    #[tokio::test]
    async fn unknown_pipeline_invalidates_nothing() {
        let cache = cache();
        let aggregator = Aggregator::new(Arc::new(NoopRefresher), cache.clone(), namespaces());

        assert_eq!(aggregator.run("customers", "b-1").await.unwrap(), 0);
        assert_eq!(cache.keys().len(), 4);
    }

    #[tokio::test]
    #[traced_test]
    async fn refresh_failure_still_invalidates() {
        let cache = cache();
        let aggregator = Aggregator::new(
            Arc::new(RecordingRefresher::failing()),
            cache.clone(),
            namespaces(),
        );

        let result = aggregator.run("shipments_realtime", "b-1").await;

        assert!(matches!(result, Err(AggregateError::Refresh { .. })));
        assert_eq!(cache.keys(), vec!["finance:daily".to_string()]);
        assert!(logs_contain("Aggregate refresh failed"));
    }

    #[test]
    fn globs() {
        let regex = glob_to_regex("dashboard:*").unwrap();
        assert!(regex.is_match("dashboard:kpis"));
        assert!(!regex.is_match("old:dashboard:kpis"));

        let regex = glob_to_regex("report.?").unwrap();
        assert!(regex.is_match("report.1"));
        assert!(!regex.is_match("reportx1"));
    }

    #[test]
    fn glob_classes() {
        let regex = glob_to_regex("region:[a-c]*").unwrap();
        assert!(regex.is_match("region:b:eu"));
        assert!(!regex.is_match("region:d"));
        assert!(!regex.is_match("region:B"));

        let regex = glob_to_regex("shard:[^0-9]").unwrap();
        assert!(regex.is_match("shard:x"));
        assert!(!regex.is_match("shard:7"));

        let regex = glob_to_regex("[]*?-]").unwrap();
        for key in ["]", "*", "?", "-"] {
            assert!(regex.is_match(key), "{key}");
        }
        assert!(!regex.is_match("a"));
    }

    #[test]
    fn globs_are_case_sensitive() {
        let regex = glob_to_regex("Dashboard:*").unwrap();
        assert!(!regex.is_match("dashboard:kpis"));
    }

    #[test]
    fn malformed_globs() {
        assert!(matches!(glob_to_regex("dashboard:[a-"), Err(AggregateError::Pattern(_))));
        assert!(matches!(glob_to_regex("[z-a]"), Err(AggregateError::Pattern(_))));
    }
}
