//! Write-behind cache over the embedded store.
//!
//! Mutations register in an in-memory generation (most-recent wins) and
//! are applied to the store as one batch per flush. Reads consult the
//! active generation, then the in-flight generation, then the store, so
//! the hot path never blocks on disk and readers never block the
//! flusher.
//!
//! On a failed batch the in-flight generation is retained and re-applied
//! at the start of the next flush, before the next swap; writes for a
//! key are therefore never reordered.

use std::sync::Arc;
use std::time::Duration;

use ahash::AHashMap;
use parking_lot::Mutex;
use tokio::sync::{Notify, broadcast, watch};
use tracing::{debug, error, trace};

use ferriq_common::Signal;

use crate::{Database, Result, db::BatchEntry};

/// Upper bound on deletions per batch while dropping a key prefix.
const PREFIX_DELETE_BATCH: usize = 1000;

type Generation = AHashMap<Vec<u8>, Option<Vec<u8>>>;

#[derive(Default)]
struct Generations {
    /// Mutations accepted since the last swap.
    active: Generation,
    /// Mutations currently being (or waiting to be re-) applied.
    in_flight: Generation,
}

impl Generations {
    fn pending(&self) -> usize {
        usize::from(!self.in_flight.is_empty()) + usize::from(!self.active.is_empty())
    }
}

/// The write-behind cache. One instance services every queue of a
/// database; it is the only component that must be thread-safe
/// independently of the engines, because the flusher runs concurrently
/// with engine operations on the same keys.
pub struct WriteBehind {
    db: Database,
    state: Mutex<Generations>,
    /// Serializes whole flush cycles (the flusher, shutdown, and prefix
    /// purges can race).
    flush_lock: Mutex<()>,
    /// Bumped once per durably applied generation.
    flush_epoch: watch::Sender<u64>,
    /// Prods the flusher outside its regular interval.
    force_flush: Notify,
}

impl WriteBehind {
    pub fn new(db: Database) -> Arc<Self> {
        let (flush_epoch, _) = watch::channel(0);
        Arc::new(Self {
            db,
            state: Mutex::new(Generations::default()),
            flush_lock: Mutex::new(()),
            flush_epoch,
            force_flush: Notify::new(),
        })
    }

    /// Register a pending write. Never touches disk.
    pub fn store(&self, key: Vec<u8>, value: Vec<u8>) {
        self.state.lock().active.insert(key, Some(value));
    }

    /// Register several pending writes under one lock acquisition.
    pub fn store_many<I>(&self, entries: I)
    where
        I: IntoIterator<Item = (Vec<u8>, Vec<u8>)>,
    {
        let mut state = self.state.lock();
        for (key, value) in entries {
            state.active.insert(key, Some(value));
        }
    }

    /// Register a pending deletion. Never touches disk.
    pub fn delete(&self, key: Vec<u8>) {
        self.state.lock().active.insert(key, None);
    }

    /// Read through the cache: active generation, then in-flight, then
    /// the store. A pending deletion reads as absent.
    ///
    /// # Errors
    /// On an underlying store failure.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        {
            let state = self.state.lock();
            if let Some(pending) = state.active.get(key) {
                return Ok(pending.clone());
            }
            if let Some(pending) = state.in_flight.get(key) {
                return Ok(pending.clone());
            }
        }
        self.db.get(key)
    }

    /// Iterate the store under `prefix`, in key order.
    ///
    /// This bypasses pending generations; callers use it for recovery
    /// scans, where the queue being loaded has no cached mutations.
    pub fn scan_prefix(
        &self,
        prefix: &[u8],
    ) -> impl Iterator<Item = Result<(Vec<u8>, Vec<u8>)>> + use<> {
        self.db.scan_prefix(prefix)
    }

    /// Apply one flush cycle: re-apply a leftover failed generation if
    /// any, then swap the active generation in-flight and apply it.
    ///
    /// Returns the number of entries made durable.
    ///
    /// # Errors
    /// If a batch fails; the failed generation stays in-flight for the
    /// next cycle.
    pub fn flush_once(&self) -> Result<usize> {
        let _flush_guard = self.flush_lock.lock();
        self.flush_cycle()
    }

    fn flush_cycle(&self) -> Result<usize> {
        let mut written = self.flush_generation(false)?;
        written += self.flush_generation(true)?;
        Ok(written)
    }

    fn flush_generation(&self, swap: bool) -> Result<usize> {
        let batch: Vec<BatchEntry> = {
            let mut state = self.state.lock();
            if swap {
                // Only reached once any leftover generation was applied.
                debug_assert!(state.in_flight.is_empty());
                let state = &mut *state;
                std::mem::swap(&mut state.active, &mut state.in_flight);
            }
            if state.in_flight.is_empty() {
                return Ok(0);
            }
            state
                .in_flight
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        };

        // The in-flight generation stays readable while the batch is
        // written; on failure it is retained untouched.
        let written = batch.len();
        self.db.write_batch(batch)?;

        // Clear and bump under one lock so `wait_flush` never pairs a
        // fresh epoch with a stale generation count.
        {
            let mut state = self.state.lock();
            state.in_flight.clear();
            self.flush_epoch.send_modify(|epoch| *epoch += 1);
        }
        trace!(written, "flushed write-behind generation");
        Ok(written)
    }

    /// Wait until every mutation registered before this call is durably
    /// applied. Returns immediately when nothing is pending.
    pub async fn wait_flush(&self) {
        let mut epochs = self.flush_epoch.subscribe();
        let target = {
            let state = self.state.lock();
            let pending = state.pending() as u64;
            if pending == 0 {
                return;
            }
            *epochs.borrow() + pending
        };
        self.force_flush.notify_one();
        while *epochs.borrow_and_update() < target {
            if epochs.changed().await.is_err() {
                return;
            }
        }
    }

    /// Flush, then delete every persisted key under `prefix` in bounded
    /// batches. Returns the number of keys removed.
    ///
    /// # Errors
    /// On an underlying store failure.
    pub fn delete_prefix(&self, prefix: &[u8]) -> Result<usize> {
        let _flush_guard = self.flush_lock.lock();
        self.flush_cycle()?;

        let mut total = 0;
        let mut batch: Vec<BatchEntry> = Vec::with_capacity(PREFIX_DELETE_BATCH);
        for entry in self.db.scan_prefix(prefix) {
            let (key, _) = entry?;
            batch.push((key, None));
            if batch.len() >= PREFIX_DELETE_BATCH {
                total += batch.len();
                self.db.write_batch(std::mem::take(&mut batch))?;
            }
        }
        total += batch.len();
        self.db.write_batch(batch)?;
        debug!(total, "deleted prefix rows");
        Ok(total)
    }

    /// Drain both generations and force the store onto disk. Called once
    /// at shutdown, after every engine has been closed.
    ///
    /// # Errors
    /// On an underlying store failure.
    pub fn close(&self) -> Result<()> {
        let _flush_guard = self.flush_lock.lock();
        while self.flush_cycle()? > 0 {}
        self.db.flush()?;
        Ok(())
    }

    /// Background flusher: one task per database, servicing all queues.
    /// Flushes every `interval`, or sooner when prodded by
    /// [`WriteBehind::wait_flush`]; drains on shutdown.
    pub async fn run(self: Arc<Self>, interval: Duration, mut shutdown: broadcast::Receiver<Signal>) {
        let mut tick = tokio::time::interval(interval);
        tick.tick().await;
        loop {
            tokio::select! {
                _ = tick.tick() => {}
                () = self.force_flush.notified() => {}
                _ = shutdown.recv() => {
                    if let Err(e) = self.close() {
                        error!(error = %e, "final flush failed");
                    }
                    break;
                }
            }
            if let Err(e) = self.flush_once() {
                // Entries stay in-flight; the next cycle retries them.
                error!(error = %e, "write-behind flush failed");
            }
        }
        debug!("flusher stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_cache() -> (tempfile::TempDir, Arc<WriteBehind>) {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Database::open(dir.path(), 1024 * 1024).expect("open");
        (dir, WriteBehind::new(db))
    }

    #[test]
    fn test_read_through_pending_write() {
        let (_dir, cache) = open_cache();
        cache.store(b"k".to_vec(), b"v1".to_vec());
        assert_eq!(cache.get(b"k").expect("get"), Some(b"v1".to_vec()));
        // Most-recent wins before any flush happens.
        cache.store(b"k".to_vec(), b"v2".to_vec());
        assert_eq!(cache.get(b"k").expect("get"), Some(b"v2".to_vec()));
    }

    #[test]
    fn test_pending_delete_reads_as_absent() {
        let (_dir, cache) = open_cache();
        cache.store(b"k".to_vec(), b"v".to_vec());
        cache.flush_once().expect("flush");
        cache.delete(b"k".to_vec());
        // Row still exists on disk, but the cache must report it gone.
        assert_eq!(cache.get(b"k").expect("get"), None);
        cache.flush_once().expect("flush");
        assert_eq!(cache.get(b"k").expect("get"), None);
    }

    #[test]
    fn test_flush_makes_entries_durable() {
        let dir = tempfile::tempdir().expect("tempdir");
        {
            let db = Database::open(dir.path(), 1024 * 1024).expect("open");
            let cache = WriteBehind::new(db);
            cache.store(b"a".to_vec(), b"1".to_vec());
            cache.store_many(vec![
                (b"b".to_vec(), b"2".to_vec()),
                (b"c".to_vec(), b"3".to_vec()),
            ]);
            assert_eq!(cache.flush_once().expect("flush"), 3);
            cache.close().expect("close");
        }
        let db = Database::open(dir.path(), 1024 * 1024).expect("reopen");
        assert_eq!(db.get(b"a").expect("get"), Some(b"1".to_vec()));
        assert_eq!(db.get(b"b").expect("get"), Some(b"2".to_vec()));
        assert_eq!(db.get(b"c").expect("get"), Some(b"3".to_vec()));
    }

    #[tokio::test]
    async fn test_wait_flush_observes_pending_generations() {
        let (_dir, cache) = open_cache();
        cache.store(b"k".to_vec(), b"v".to_vec());

        let (shutdown, _) = broadcast::channel(1);
        let flusher = tokio::spawn(
            Arc::clone(&cache).run(Duration::from_millis(50), shutdown.subscribe()),
        );

        cache.wait_flush().await;
        // The value must be durable in the store itself now.
        assert_eq!(cache.db.get(b"k").expect("get"), Some(b"v".to_vec()));

        // With nothing pending, wait_flush returns immediately.
        cache.wait_flush().await;

        shutdown.send(Signal::Shutdown).expect("signal");
        flusher.await.expect("join");
    }

    #[test]
    fn test_delete_prefix_removes_only_matching_rows() {
        let (_dir, cache) = open_cache();
        cache.store(b"q:1:m:a".to_vec(), b"x".to_vec());
        cache.store(b"q:1:p:a".to_vec(), b"y".to_vec());
        cache.store(b"q:2:m:a".to_vec(), b"z".to_vec());
        let removed = cache.delete_prefix(b"q:1:").expect("delete prefix");
        assert_eq!(removed, 2);
        assert_eq!(cache.get(b"q:1:m:a").expect("get"), None);
        assert_eq!(cache.get(b"q:2:m:a").expect("get"), Some(b"z".to_vec()));
    }
}
