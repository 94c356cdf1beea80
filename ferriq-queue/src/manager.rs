//! The queue manager.
//!
//! Owns the name-to-engine mapping behind a reader/writer lock,
//! allocates export ids, persists descriptors, and restores every
//! registered queue at startup. Per-queue update tasks are spawned here
//! and stop on their own once an engine is closed.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{error, info};

use ahash::AHashMap;
use ferriq_common::clock::now_ms;
use ferriq_common::ident::validate_id;
use ferriq_common::{QueueError, Result, Signal};
use ferriq_store::WriteBehind;

use crate::config::{ConfigPatch, EngineSettings, QueueConfig};
use crate::descriptor::{ServiceDescriptor, ServiceType};
use crate::engine::PQueue;
use crate::keys;
use crate::records::{decode_record, encode_record};

pub struct QueueManager {
    store: Arc<WriteBehind>,
    settings: Arc<EngineSettings>,
    shutdown: broadcast::Sender<Signal>,
    queues: RwLock<AHashMap<String, Arc<PQueue>>>,
}

impl QueueManager {
    /// Open the manager and load every registered queue from its
    /// persisted descriptor. Must run inside a tokio runtime; update
    /// tasks for loaded queues are spawned here.
    ///
    /// # Errors
    /// On storage failures while scanning descriptors. A queue that
    /// fails to load is logged and skipped, not fatal.
    pub fn open(
        store: Arc<WriteBehind>,
        settings: EngineSettings,
        shutdown: broadcast::Sender<Signal>,
    ) -> Result<Self> {
        let manager = Self {
            store,
            settings: Arc::new(settings),
            shutdown,
            queues: RwLock::new(AHashMap::new()),
        };
        manager.load_queues()?;
        Ok(manager)
    }

    fn load_queues(&self) -> Result<()> {
        let mut max_export_id = 0_u64;
        let mut loaded = 0_usize;
        let descriptors: Vec<(Vec<u8>, Vec<u8>)> = self
            .store
            .scan_prefix(keys::DESC_PREFIX)
            .collect::<ferriq_store::Result<_>>()?;

        for (key, value) in descriptors {
            let desc: ServiceDescriptor = match decode_record(&value) {
                Ok(desc) => desc,
                Err(e) => {
                    error!(error = %e, "skipping undecodable service descriptor");
                    continue;
                }
            };
            max_export_id = max_export_id.max(desc.export_id);

            if desc.to_delete {
                info!(queue = %desc.name, "purging queue marked for deletion");
                self.store.delete(key);
                self.store
                    .delete_prefix(&keys::queue_prefix(&desc.service_id))?;
                continue;
            }
            if desc.disabled {
                info!(queue = %desc.name, "skipping disabled queue");
                continue;
            }

            match PQueue::load(
                desc.clone(),
                Arc::clone(&self.settings),
                Arc::clone(&self.store),
                self.shutdown.clone(),
            ) {
                Ok(queue) => {
                    tokio::spawn(Arc::clone(&queue).run_update());
                    self.queues.write().insert(desc.name.clone(), queue);
                    loaded += 1;
                }
                Err(e) => {
                    error!(queue = %desc.name, error = %e, "queue was not loaded");
                }
            }
        }

        // The counter must never fall behind a loaded descriptor, e.g.
        // after restoring from a backup that predates the counter write.
        if self.read_export_counter()? < max_export_id {
            self.write_export_counter(max_export_id);
        }

        info!(count = loaded, "queue manager loaded");
        Ok(())
    }

    fn read_export_counter(&self) -> Result<u64> {
        let Some(raw) = self.store.get(keys::EXPORT_SEQ_KEY)? else {
            return Ok(0);
        };
        let bytes: [u8; 8] = raw
            .try_into()
            .map_err(|_| QueueError::Storage("malformed export-id counter".into()))?;
        Ok(u64::from_be_bytes(bytes))
    }

    fn write_export_counter(&self, value: u64) {
        self.store
            .store(keys::EXPORT_SEQ_KEY.to_vec(), value.to_be_bytes().to_vec());
    }

    /// Create a queue: allocate an export id, persist the descriptor
    /// and config, start the engine and its update task.
    ///
    /// # Errors
    /// [`QueueError::QueueAlreadyExists`] on a name collision,
    /// [`QueueError::InvalidRequest`] on a malformed name.
    pub fn create_queue(
        &self,
        name: &str,
        service_type: ServiceType,
        patch: ConfigPatch,
    ) -> Result<()> {
        if !validate_id(name) {
            return Err(QueueError::invalid(
                "queue name must be 1..256 characters of [A-Za-z0-9_-] and not start with '_'",
            ));
        }

        let mut queues = self.queues.write();
        if queues.contains_key(name) {
            return Err(QueueError::QueueAlreadyExists(name.to_string()));
        }

        let export_id = self.read_export_counter()? + 1;
        self.write_export_counter(export_id);

        let now = now_ms();
        let desc = ServiceDescriptor::new(export_id, service_type, name, now);
        let record = encode_record(&desc)?;
        self.store.store(keys::descriptor_key(name), record);

        let mut config = QueueConfig::new(&self.settings.tuning, now);
        patch.apply(&mut config);

        let queue = PQueue::create(
            desc,
            config,
            Arc::clone(&self.settings),
            Arc::clone(&self.store),
            self.shutdown.clone(),
        )?;
        tokio::spawn(Arc::clone(&queue).run_update());
        queues.insert(name.to_string(), queue);
        info!(queue = name, export_id, "queue created");
        Ok(())
    }

    /// Drop a queue: close its engine and purge every persisted row
    /// under its prefix.
    ///
    /// The descriptor is first re-persisted with `to_delete` set, and
    /// only removed once the purge went through; a crash in between
    /// leaves a marked descriptor that the next load finishes from.
    ///
    /// # Errors
    /// [`QueueError::QueueNotFound`], or a storage failure during the
    /// purge.
    pub fn drop_queue(&self, name: &str) -> Result<()> {
        let queue = self
            .queues
            .write()
            .remove(name)
            .ok_or_else(|| QueueError::QueueNotFound(name.to_string()))?;
        queue.close();

        let mut desc = queue.descriptor().clone();
        desc.to_delete = true;
        let record = encode_record(&desc)?;
        self.store.store(keys::descriptor_key(name), record);

        // The purge flushes pending writes first, so the marker is
        // durable before any row disappears.
        self.store
            .delete_prefix(&keys::queue_prefix(queue.service_id()))?;
        self.store.delete(keys::descriptor_key(name));
        info!(queue = name, "queue dropped");
        Ok(())
    }

    /// Close a queue and mark its descriptor disabled. Its rows stay
    /// on disk, but the queue is unreachable and is skipped on load
    /// until enabled again.
    ///
    /// # Errors
    /// [`QueueError::QueueNotFound`].
    pub fn disable_queue(&self, name: &str) -> Result<()> {
        let queue = self
            .queues
            .write()
            .remove(name)
            .ok_or_else(|| QueueError::QueueNotFound(name.to_string()))?;
        queue.close();

        let mut desc = queue.descriptor().clone();
        desc.disabled = true;
        let record = encode_record(&desc)?;
        self.store.store(keys::descriptor_key(name), record);
        info!(queue = name, "queue disabled");
        Ok(())
    }

    /// Clear a queue's disabled mark and load it back into service.
    ///
    /// # Errors
    /// [`QueueError::QueueNotFound`] for an unknown name,
    /// [`QueueError::InvalidRequest`] when the queue is not disabled.
    pub fn enable_queue(&self, name: &str) -> Result<()> {
        let mut queues = self.queues.write();
        if queues.contains_key(name) {
            return Err(QueueError::invalid(format!(
                "queue is not disabled: {name}"
            )));
        }
        let record = self
            .store
            .get(&keys::descriptor_key(name))?
            .ok_or_else(|| QueueError::QueueNotFound(name.to_string()))?;
        let mut desc: ServiceDescriptor = decode_record(&record)?;
        if !desc.disabled {
            return Err(QueueError::invalid(format!(
                "queue is not disabled: {name}"
            )));
        }
        desc.disabled = false;
        let record = encode_record(&desc)?;
        self.store.store(keys::descriptor_key(name), record);

        // Replay scans the store directly; rows written while the
        // queue was live must be durable first.
        self.store.flush_once()?;
        let queue = PQueue::load(
            desc,
            Arc::clone(&self.settings),
            Arc::clone(&self.store),
            self.shutdown.clone(),
        )?;
        tokio::spawn(Arc::clone(&queue).run_update());
        queues.insert(name.to_string(), queue);
        info!(queue = name, "queue enabled");
        Ok(())
    }

    /// Shared-lock lookup by name.
    pub fn queue(&self, name: &str) -> Option<Arc<PQueue>> {
        self.queues.read().get(name).cloned()
    }

    /// Names matching the given predicates, sorted.
    pub fn list(&self, prefix: Option<&str>, service_type: Option<ServiceType>) -> Vec<String> {
        let queues = self.queues.read();
        let mut names: Vec<String> = queues
            .iter()
            .filter(|(name, queue)| {
                prefix.is_none_or(|p| name.starts_with(p))
                    && service_type.is_none_or(|t| queue.descriptor().service_type == t)
            })
            .map(|(name, _)| name.clone())
            .collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.queues.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queues.read().is_empty()
    }

    /// Drain all engines and make every pending write durable. The
    /// manager is unusable afterwards.
    ///
    /// # Errors
    /// On a storage failure during the final flush.
    pub fn close(&self) -> Result<()> {
        let drained: Vec<Arc<PQueue>> = self.queues.write().drain().map(|(_, q)| q).collect();
        for queue in &drained {
            queue.close();
        }
        self.store.close()?;
        info!(count = drained.len(), "queue manager closed");
        Ok(())
    }
}
