//! In-memory [`Store`] backed by a `DashMap`. Used for tests and for peers
//! run with `persistence.backend = "memory"` (spec §4.4 Non-goal: no
//! durability guarantee is implied by this backend).

use async_trait::async_trait;
use dashmap::DashMap;

use super::Store;
use crate::error::StoreError;

#[derive(Debug, Default)]
pub struct MemStore {
    entries: DashMap<String, Vec<u8>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }
}

#[async_trait]
impl Store for MemStore {
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        self.entries.insert(key.to_string(), value);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.entries.get(key).map(|v| v.clone()))
    }

    async fn scan(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StoreError> {
        let mut out: Vec<(String, Vec<u8>)> = self
            .entries
            .iter()
            .filter(|e| e.key().starts_with(prefix))
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scan_returns_matching_keys_in_order() {
        let store = MemStore::new();
        store.put("snapshot/1/000002", vec![2]).await.unwrap();
        store.put("snapshot/1/000001", vec![1]).await.unwrap();
        store.put("delta/p1/000001", vec![9]).await.unwrap();

        let got = store.scan("snapshot/1/").await.unwrap();
        assert_eq!(got, vec![("snapshot/1/000001".to_string(), vec![1]), ("snapshot/1/000002".to_string(), vec![2])]);
    }

    #[tokio::test]
    async fn get_on_missing_key_is_none() {
        let store = MemStore::new();
        assert!(store.get("nothing").await.unwrap().is_none());
    }
}
