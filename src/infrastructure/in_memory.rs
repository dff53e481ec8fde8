use super::kv::{KvBackend, Table, WriteOp};
use crate::domain::ports::Cache;
use crate::error::Result;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

type Tables = HashMap<Table, BTreeMap<Vec<u8>, Vec<u8>>>;

/// A thread-safe in-memory storage engine.
///
/// Uses `Arc<RwLock<..>>` so clones share the same data. A batch is applied
/// under a single write lock, which makes it atomic to concurrent readers.
#[derive(Default, Clone)]
pub struct InMemoryBackend {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvBackend for InMemoryBackend {
    async fn get(&self, table: Table, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let tables = self.tables.read().await;
        Ok(tables.get(&table).and_then(|t| t.get(key)).cloned())
    }

    async fn scan(&self, table: Table, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let tables = self.tables.read().await;
        let Some(rows) = tables.get(&table) else {
            return Ok(Vec::new());
        };
        Ok(rows
            .range(prefix.to_vec()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }

    async fn apply(&self, batch: Vec<WriteOp>) -> Result<()> {
        let mut tables = self.tables.write().await;
        for op in batch {
            let rows = tables.entry(op.table).or_default();
            match op.value {
                Some(value) => rows.insert(op.key, value),
                None => rows.remove(&op.key),
            };
        }
        Ok(())
    }
}

/// TTL key/value cache kept in process memory.
///
/// Expired entries are dropped lazily on read.
#[derive(Default, Clone)]
pub struct InMemoryCache {
    entries: Arc<RwLock<HashMap<String, (String, Instant)>>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        let now = Instant::now();
        let entries = self.entries.read().await;
        entries.values().filter(|(_, expires)| *expires > now).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl Cache for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some((value, expires)) if *expires > Instant::now() => {
                    return Ok(Some(value.clone()));
                }
                Some(_) => {}
                None => return Ok(None),
            }
        }
        self.entries.write().await.remove(key);
        Ok(None)
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        let mut entries = self.entries.write().await;
        entries.insert(key.to_string(), (value, Instant::now() + ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<()> {
        let mut entries = self.entries.write().await;
        entries.retain(|key, _| !key.starts_with(prefix));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_backend_batch_and_scan() {
        let backend = InMemoryBackend::new();
        backend
            .apply(vec![
                WriteOp {
                    table: Table::Orders,
                    key: vec![1, 1],
                    value: Some(b"a".to_vec()),
                },
                WriteOp {
                    table: Table::Orders,
                    key: vec![1, 2],
                    value: Some(b"b".to_vec()),
                },
                WriteOp {
                    table: Table::Orders,
                    key: vec![2, 1],
                    value: Some(b"c".to_vec()),
                },
            ])
            .await
            .unwrap();

        let rows = backend.scan(Table::Orders, &[1]).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].1, b"b".to_vec());

        backend
            .apply(vec![WriteOp {
                table: Table::Orders,
                key: vec![1, 1],
                value: None,
            }])
            .await
            .unwrap();
        assert!(backend.get(Table::Orders, &[1, 1]).await.unwrap().is_none());
        assert!(backend.scan(Table::Accounts, &[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_in_memory_cache_expiry() {
        let cache = InMemoryCache::new();
        cache
            .set("order:1", "{}".into(), Duration::from_millis(20))
            .await
            .unwrap();
        assert_eq!(cache.get("order:1").await.unwrap().as_deref(), Some("{}"));

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(cache.get("order:1").await.unwrap().is_none());
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_in_memory_cache_prefix_delete() {
        let cache = InMemoryCache::new();
        let ttl = Duration::from_secs(60);
        cache.set("cylinder:1", "a".into(), ttl).await.unwrap();
        cache.set("cylinder:list:*:*", "b".into(), ttl).await.unwrap();
        cache.set("cylinder:list:2:*", "c".into(), ttl).await.unwrap();

        cache.delete_prefix("cylinder:list:").await.unwrap();
        assert_eq!(cache.len().await, 1);
        assert!(cache.get("cylinder:1").await.unwrap().is_some());

        cache.delete("cylinder:1").await.unwrap();
        assert!(cache.is_empty().await);
    }
}
