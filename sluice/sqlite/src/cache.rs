use async_trait::async_trait;
use rusqlite::params;
use serde_json::Value;
use sluice_core::aggregate::{glob_to_regex, AggregateError, CacheInvalidator};

use crate::store::SqliteStore;

impl SqliteStore {
    /// Store a cache entry
    pub fn put_cache(&self, key: &str, value: &Value) -> Result<(), AggregateError> {
        let conn = self.lock_conn(AggregateError::LockPoisoned)?;
        conn.execute(
            "INSERT INTO cache_entries (key, value, updated_at) VALUES (?1, ?2, datetime('now')) \
             ON CONFLICT (key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value.to_string()],
        )
        .map_err(AggregateError::backend)?;
        Ok(())
    }

    /// Cached keys in order
    pub fn cache_keys(&self) -> Result<Vec<String>, AggregateError> {
        let conn = self.lock_conn(AggregateError::LockPoisoned)?;
        let mut stmt = conn
            .prepare("SELECT key FROM cache_entries ORDER BY key")
            .map_err(AggregateError::backend)?;
        let keys = stmt
            .query_map([], |row| row.get(0))
            .map_err(AggregateError::backend)?
            .collect::<rusqlite::Result<Vec<String>>>()
            .map_err(AggregateError::backend)?;
        Ok(keys)
    }
}

#[async_trait]
impl CacheInvalidator for SqliteStore {
    async fn invalidate_pattern(&self, pattern: &str) -> Result<usize, AggregateError> {
        glob_to_regex(pattern)?;
        let conn = self.lock_conn(AggregateError::LockPoisoned)?;
        conn.execute("DELETE FROM cache_entries WHERE key GLOB ?1", [pattern])
            .map_err(AggregateError::backend)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn invalidates_matching_keys() {
        let store = SqliteStore::in_memory().unwrap();
        for key in ["dashboard:kpis", "dashboard:map:eu", "operational:late", "finance:daily"] {
            store.put_cache(key, &json!({ "cached": true })).unwrap();
        }

        assert_eq!(store.invalidate_pattern("dashboard:*").await.unwrap(), 2);
        assert_eq!(store.invalidate_pattern("dashboard:*").await.unwrap(), 0);
        assert_eq!(
            store.cache_keys().unwrap(),
            vec!["finance:daily".to_string(), "operational:late".to_string()]
        );
    }

    #[tokio::test]
    async fn class_patterns_match_the_memory_cache() {
        let keys = ["region:a", "region:b", "region:B", "region:7", "Region:c"];
        let store = SqliteStore::in_memory().unwrap();
        let memory = sluice_core::memory::MemoryCache::default();
        for key in keys {
            store.put_cache(key, &json!(1)).unwrap();
            memory.put(key, json!(1));
        }

        for pattern in ["region:[a-z]", "region:[^0-9]"] {
            assert_eq!(
                store.invalidate_pattern(pattern).await.unwrap(),
                memory.invalidate_pattern(pattern).await.unwrap(),
                "{pattern}"
            );
        }
        assert_eq!(
            store.cache_keys().unwrap(),
            vec!["Region:c".to_string(), "region:7".to_string()]
        );
        assert!(matches!(
            store.invalidate_pattern("region:[a-").await,
            Err(AggregateError::Pattern(_))
        ));
    }
}
