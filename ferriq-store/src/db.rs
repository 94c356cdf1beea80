//! Thin adapter over the embedded ordered key-value store.
//!
//! Keys are opaque bytes; callers impose structure through prefixes.
//! Writes are grouped into batches applied atomically; prefix iteration
//! yields keys in lexicographic order, which the queue layer relies on
//! for serial-ordered recovery.

use std::path::Path;

use crate::{Result, StoreError};

/// One pending mutation inside a batch: a value to write, or `None` for
/// a deletion.
pub type BatchEntry = (Vec<u8>, Option<Vec<u8>>);

/// Handle to an open database.
#[derive(Debug, Clone)]
pub struct Database {
    inner: sled::Db,
}

impl Database {
    /// Open (or create) a database at `path`.
    ///
    /// `cache_bytes` bounds the store's in-memory page cache.
    ///
    /// # Errors
    /// If the database cannot be opened or recovered.
    pub fn open(path: &Path, cache_bytes: u64) -> Result<Self> {
        let inner = sled::Config::new()
            .path(path)
            .cache_capacity(cache_bytes)
            .open()?;
        Ok(Self { inner })
    }

    /// Read a single value.
    ///
    /// # Errors
    /// On an underlying store failure.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.inner.get(key)?.map(|v| v.to_vec()))
    }

    /// Write a single value.
    ///
    /// # Errors
    /// On an underlying store failure.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.inner.insert(key, value)?;
        Ok(())
    }

    /// Delete a single key. Deleting an absent key is not an error.
    ///
    /// # Errors
    /// On an underlying store failure.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        self.inner.remove(key)?;
        Ok(())
    }

    /// Apply a group of writes and deletions atomically.
    ///
    /// # Errors
    /// On an underlying store failure; no entry of the batch is applied.
    pub fn write_batch<I>(&self, entries: I) -> Result<()>
    where
        I: IntoIterator<Item = BatchEntry>,
    {
        let mut batch = sled::Batch::default();
        for (key, value) in entries {
            match value {
                Some(value) => batch.insert(key, value),
                None => batch.remove(key),
            }
        }
        self.inner.apply_batch(batch)?;
        Ok(())
    }

    /// Iterate all pairs whose key starts with `prefix`, in key order.
    pub fn scan_prefix(
        &self,
        prefix: &[u8],
    ) -> impl Iterator<Item = Result<(Vec<u8>, Vec<u8>)>> + use<> {
        self.inner.scan_prefix(prefix).map(|entry| {
            entry
                .map(|(k, v)| (k.to_vec(), v.to_vec()))
                .map_err(StoreError::from)
        })
    }

    /// Force buffered data onto disk.
    ///
    /// # Errors
    /// On an underlying store failure.
    pub fn flush(&self) -> Result<()> {
        self.inner.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_temp() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Database::open(dir.path(), 1024 * 1024).expect("open");
        (dir, db)
    }

    #[test]
    fn test_put_get_delete() {
        let (_dir, db) = open_temp();
        db.put(b"k", b"v").expect("put");
        assert_eq!(db.get(b"k").expect("get"), Some(b"v".to_vec()));
        db.delete(b"k").expect("delete");
        assert_eq!(db.get(b"k").expect("get"), None);
        // Deleting again is a no-op.
        db.delete(b"k").expect("delete absent");
    }

    #[test]
    fn test_batch_applies_writes_and_deletes() {
        let (_dir, db) = open_temp();
        db.put(b"gone", b"x").expect("put");
        db.write_batch(vec![
            (b"a".to_vec(), Some(b"1".to_vec())),
            (b"b".to_vec(), Some(b"2".to_vec())),
            (b"gone".to_vec(), None),
        ])
        .expect("batch");
        assert_eq!(db.get(b"a").expect("get"), Some(b"1".to_vec()));
        assert_eq!(db.get(b"b").expect("get"), Some(b"2".to_vec()));
        assert_eq!(db.get(b"gone").expect("get"), None);
    }

    #[test]
    fn test_scan_prefix_is_ordered() {
        let (_dir, db) = open_temp();
        // Big-endian serial suffixes must come back in numeric order.
        for serial in [3_u64, 1, 2, 10] {
            let mut key = b"q:1:m:".to_vec();
            key.extend_from_slice(&serial.to_be_bytes());
            db.put(&key, &serial.to_be_bytes()).expect("put");
        }
        db.put(b"q:2:m:x", b"other").expect("put");

        let serials: Vec<u64> = db
            .scan_prefix(b"q:1:m:")
            .map(|entry| {
                let (_, v) = entry.expect("scan");
                u64::from_be_bytes(v.try_into().expect("8 bytes"))
            })
            .collect();
        assert_eq!(serials, vec![1, 2, 3, 10]);
    }
}
