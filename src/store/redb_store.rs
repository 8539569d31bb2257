//! Redb-backed durable [`Store`]: one table, string keys chosen so a
//! lexicographic range scan is a prefix scan (spec §4.4).

use async_trait::async_trait;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use std::sync::Arc;

use super::Store;
use crate::error::StoreError;

const ENTRIES_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("entries");

pub struct RedbStore {
    db: Arc<Database>,
}

impl RedbStore {
    pub fn open(path: &str) -> Result<Self, StoreError> {
        let db = Database::create(path).map_err(|e| StoreError::Backend(e.to_string()))?;
        // Ensure the table exists so an empty store still has a readable handle.
        let write_txn = db.begin_write().map_err(|e| StoreError::Backend(e.to_string()))?;
        {
            write_txn
                .open_table(ENTRIES_TABLE)
                .map_err(|e| StoreError::Backend(e.to_string()))?;
        }
        write_txn.commit().map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(Self { db: Arc::new(db) })
    }
}

#[async_trait]
impl Store for RedbStore {
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        let write_txn = self.db.begin_write().map_err(|e| StoreError::Backend(e.to_string()))?;
        {
            let mut table = write_txn
                .open_table(ENTRIES_TABLE)
                .map_err(|e| StoreError::Backend(e.to_string()))?;
            table
                .insert(key, value.as_slice())
                .map_err(|e| StoreError::Backend(e.to_string()))?;
        }
        write_txn.commit().map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let read_txn = self.db.begin_read().map_err(|e| StoreError::Backend(e.to_string()))?;
        let table = read_txn
            .open_table(ENTRIES_TABLE)
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(table
            .get(key)
            .map_err(|e| StoreError::Backend(e.to_string()))?
            .map(|v| v.value().to_vec()))
    }

    async fn scan(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StoreError> {
        let read_txn = self.db.begin_read().map_err(|e| StoreError::Backend(e.to_string()))?;
        let table = read_txn
            .open_table(ENTRIES_TABLE)
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        // redb has no native "starts_with" range; bound by the prefix and the
        // next string after it in lexicographic order.
        let upper = prefix_upper_bound(prefix);
        let mut out = Vec::new();
        let range = match &upper {
            Some(upper) => table.range(prefix..upper.as_str()),
            None => table.range(prefix..),
        }
        .map_err(|e| StoreError::Backend(e.to_string()))?;
        for item in range {
            let (k, v) = item.map_err(|e| StoreError::Backend(e.to_string()))?;
            out.push((k.value().to_string(), v.value().to_vec()));
        }
        Ok(out)
    }
}

/// The smallest string that is lexicographically greater than every string
/// starting with `prefix`, by incrementing the last byte. `None` if `prefix`
/// is empty (no finite upper bound needed; the open range already covers
/// everything) or all `0xff` bytes.
fn prefix_upper_bound(prefix: &str) -> Option<String> {
    if prefix.is_empty() {
        return None;
    }
    let mut bytes = prefix.as_bytes().to_vec();
    while let Some(last) = bytes.pop() {
        if last < 0xff {
            bytes.push(last + 1);
            return Some(String::from_utf8(bytes).expect("prefix remains valid utf8 after bump"));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn put_get_round_trip() {
        let dir = tempdir().unwrap();
        let store = RedbStore::open(dir.path().join("db.redb").to_str().unwrap()).unwrap();
        store.put("meta/self", vec![1, 2, 3]).await.unwrap();
        assert_eq!(store.get("meta/self").await.unwrap(), Some(vec![1, 2, 3]));
    }

    #[tokio::test]
    async fn scan_is_prefix_bounded() {
        let dir = tempdir().unwrap();
        let store = RedbStore::open(dir.path().join("db.redb").to_str().unwrap()).unwrap();
        store.put("snapshot/1/000001", vec![1]).await.unwrap();
        store.put("snapshot/1/000002", vec![2]).await.unwrap();
        store.put("snapshot/2/000001", vec![9]).await.unwrap();

        let got = store.scan("snapshot/1/").await.unwrap();
        assert_eq!(got.len(), 2);
        assert!(got.iter().all(|(k, _)| k.starts_with("snapshot/1/")));
    }

    #[test]
    fn upper_bound_increments_last_byte() {
        assert_eq!(prefix_upper_bound("ab").as_deref(), Some("ac"));
        assert_eq!(prefix_upper_bound(""), None);
    }
}
