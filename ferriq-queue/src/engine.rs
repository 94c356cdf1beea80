//! The per-queue engine.
//!
//! All state transitions of one queue run under its single mutex: the
//! id map, the available and tracking heaps, and the locked-message
//! counter move together, and every mutation registers its durable
//! write in the write-behind cache before the mutex is released.
//! Payload access is serialized separately so a slow payload read never
//! blocks the metadata path.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{Notify, broadcast};
use tracing::{debug, info, warn};

use ahash::AHashMap;
use ferriq_common::clock::now_ms;
use ferriq_common::ident::{make_receipt, parse_receipt};
use ferriq_common::{DictValue, MessageItem, QueueError, Response, Result, Signal};
use ferriq_store::WriteBehind;

use crate::config::{ConfigPatch, EngineSettings, QueueConfig};
use crate::descriptor::ServiceDescriptor;
use crate::heap::IndexedHeap;
use crate::keys;
use crate::message::MessageMeta;
use crate::records::{decode_record, encode_record};

/// Ids removed per mutex acquisition while clearing a queue.
const CLEAR_BATCH: usize = 100;

/// Parameters of one pop call.
#[derive(Debug, Clone, Copy)]
pub struct PopOptions {
    /// Lock duration; the queue's configured timeout when absent.
    pub lock_timeout: Option<i64>,
    /// How long to wait for messages when none are available. Zero
    /// never blocks.
    pub wait_ms: i64,
    /// Maximum number of messages to return.
    pub limit: i64,
    /// Lock the messages (true) or remove them outright (false).
    pub lock: bool,
}

struct QueueState {
    config: QueueConfig,
    /// Owner of all live metadata, keyed by serial.
    messages: AHashMap<u64, MessageMeta>,
    /// Client id to serial; a message is live iff it is present here.
    id2sn: AHashMap<String, u64>,
    /// Messages eligible for immediate pop, keyed by priority.
    avail: IndexedHeap<i64>,
    /// Every live message, keyed by its next deadline.
    tracking: IndexedHeap<i64>,
    /// Count of messages with `unlock_ts > 0`.
    locked_count: usize,
    /// Largest serial ever assigned in this queue.
    serial: u64,
}

impl QueueState {
    fn new(config: QueueConfig) -> Self {
        Self {
            config,
            messages: AHashMap::new(),
            id2sn: AHashMap::new(),
            avail: IndexedHeap::new(),
            tracking: IndexedHeap::new(),
            locked_count: 0,
            serial: 0,
        }
    }

    fn integrity_error(context: &str) -> QueueError {
        QueueError::Storage(format!("data integrity failure: {context}"))
    }
}

/// One priority queue.
pub struct PQueue {
    desc: ServiceDescriptor,
    pub(crate) settings: Arc<EngineSettings>,
    store: Arc<WriteBehind>,
    state: Mutex<QueueState>,
    /// Serializes payload-level store access.
    payload_lock: Mutex<()>,
    /// Lossy single-slot wakeup for blocking pops.
    new_msg: Notify,
    closed: AtomicBool,
    shutdown: broadcast::Sender<Signal>,
}

impl PQueue {
    /// Create a fresh queue: persist its config record and start empty.
    ///
    /// # Errors
    /// If the config record cannot be encoded.
    pub fn create(
        desc: ServiceDescriptor,
        config: QueueConfig,
        settings: Arc<EngineSettings>,
        store: Arc<WriteBehind>,
        shutdown: broadcast::Sender<Signal>,
    ) -> Result<Arc<Self>> {
        let record = encode_record(&config)?;
        store.store(keys::config_key(&desc.service_id), record);
        Self::open(desc, config, settings, store, shutdown)
    }

    /// Load a persisted queue: read its config record and replay its
    /// message rows.
    ///
    /// # Errors
    /// If the config record is missing or undecodable, or the store
    /// fails during the replay scan.
    pub fn load(
        desc: ServiceDescriptor,
        settings: Arc<EngineSettings>,
        store: Arc<WriteBehind>,
        shutdown: broadcast::Sender<Signal>,
    ) -> Result<Arc<Self>> {
        let record = store
            .get(&keys::config_key(&desc.service_id))?
            .ok_or_else(|| {
                QueueError::Storage(format!("missing config record for queue {}", desc.name))
            })?;
        let config: QueueConfig = decode_record(&record)?;
        Self::open(desc, config, settings, store, shutdown)
    }

    fn open(
        desc: ServiceDescriptor,
        config: QueueConfig,
        settings: Arc<EngineSettings>,
        store: Arc<WriteBehind>,
        shutdown: broadcast::Sender<Signal>,
    ) -> Result<Arc<Self>> {
        let mut state = QueueState::new(config);
        Self::replay(&desc, &mut state, &store)?;
        Ok(Arc::new(Self {
            desc,
            settings,
            store,
            state: Mutex::new(state),
            payload_lock: Mutex::new(()),
            new_msg: Notify::new(),
            closed: AtomicBool::new(false),
            shutdown,
        }))
    }

    /// Rebuild in-memory state from persisted metadata. Rows already
    /// expired, or whose pop budget ran out, are dropped and scheduled
    /// for deletion. The metadata prefix iterates in serial order, so
    /// arrival order within each priority is restored as-is.
    fn replay(
        desc: &ServiceDescriptor,
        state: &mut QueueState,
        store: &WriteBehind,
    ) -> Result<()> {
        let now = now_ms();
        let prefix = keys::meta_prefix(&desc.service_id);
        let mut drop_serials = Vec::new();
        let mut live: Vec<MessageMeta> = Vec::new();

        for entry in store.scan_prefix(&prefix) {
            let (key, value) = entry?;
            let Some(serial) = keys::serial_from_meta_key(&key, prefix.len()) else {
                warn!(queue = %desc.name, "skipping metadata row with malformed key");
                continue;
            };
            let mut meta: MessageMeta = match decode_record(&value) {
                Ok(meta) => meta,
                Err(e) => {
                    warn!(queue = %desc.name, serial, error = %e, "dropping undecodable metadata record");
                    drop_serials.push(serial);
                    continue;
                }
            };
            meta.serial = serial;

            let budget_spent = state.config.pop_count_limit > 0
                && meta.pop_count >= state.config.pop_count_limit;
            if meta.expire_ts <= now || budget_spent {
                drop_serials.push(serial);
            } else {
                live.push(meta);
            }
        }

        if !drop_serials.is_empty() {
            debug!(queue = %desc.name, count = drop_serials.len(), "discarding dead messages");
            for serial in drop_serials {
                store.delete(keys::meta_key(&desc.service_id, serial));
                store.delete(keys::payload_key(&desc.service_id, serial));
            }
        }

        state.serial = live.last().map_or(0, |meta| meta.serial);
        for meta in live {
            state.id2sn.insert(meta.str_id.clone(), meta.serial);
            state.tracking.push(meta.serial, meta.deadline());
            if meta.is_locked() {
                state.locked_count += 1;
            } else {
                state.avail.push(meta.serial, meta.effective_priority());
            }
            state.messages.insert(meta.serial, meta);
        }

        info!(
            queue = %desc.name,
            total = state.id2sn.len(),
            locked = state.locked_count,
            "queue loaded"
        );
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.desc.name
    }

    pub fn descriptor(&self) -> &ServiceDescriptor {
        &self.desc
    }

    pub fn service_id(&self) -> &str {
        &self.desc.service_id
    }

    /// Number of live messages, locked ones included.
    pub fn size(&self) -> usize {
        self.state.lock().id2sn.len()
    }

    /// Number of currently locked (or delay-pending) messages.
    pub fn in_flight(&self) -> usize {
        self.state.lock().locked_count
    }

    /// Snapshot of the queue's runtime config.
    pub fn config(&self) -> QueueConfig {
        self.state.lock().config.clone()
    }

    /// Mark the queue closed; its update task stops on next wake.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        debug!(queue = %self.desc.name, "queue closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Add a message.
    ///
    /// With a delivery delay the message starts in the delay-pending
    /// state and surfaces through the timeout sweep once the delay
    /// elapses; otherwise it is immediately available and one blocked
    /// pop is woken.
    ///
    /// # Errors
    /// [`QueueError::SizeExceeded`] when the queue is full,
    /// [`QueueError::AlreadyExists`] on a duplicate id.
    pub fn push(&self, id: &str, payload: &[u8], ttl: i64, delay: i64, priority: i64) -> Result<()> {
        let now = now_ms();
        {
            let mut st = self.state.lock();
            if st.config.max_size > 0
                && i64::try_from(st.id2sn.len()).unwrap_or(i64::MAX) >= st.config.max_size
            {
                return Err(QueueError::SizeExceeded);
            }
            if st.id2sn.contains_key(id) {
                return Err(QueueError::AlreadyExists);
            }

            let serial = st.serial + 1;
            let meta = MessageMeta::new(serial, id.to_string(), priority, now, ttl, delay);
            let record = encode_record(&meta)?;

            st.serial = serial;
            st.id2sn.insert(meta.str_id.clone(), serial);
            if delay == 0 {
                st.avail.push(serial, meta.effective_priority());
            } else {
                st.locked_count += 1;
            }
            st.tracking.push(serial, meta.deadline());
            st.messages.insert(serial, meta);
            st.config.last_push_ts = now;

            self.store.store_many([
                (keys::meta_key(&self.desc.service_id, serial), record),
                (
                    keys::payload_key(&self.desc.service_id, serial),
                    payload.to_vec(),
                ),
            ]);
        }
        self.new_msg.notify_one();
        Ok(())
    }

    /// Pop up to `limit` messages from the head of the available heap.
    ///
    /// When nothing is available and `wait_ms > 0`, waits for a push or
    /// a return-to-front, the wait deadline, or process shutdown; the
    /// wake signal is lossy, so an empty retry simply goes back to
    /// waiting.
    ///
    /// # Errors
    /// On a storage failure while reading payloads.
    pub async fn pop(&self, opts: PopOptions) -> Result<Vec<MessageItem>> {
        let items = self.pop_ready(&opts)?;
        if !items.is_empty() || opts.wait_ms <= 0 {
            return Ok(items);
        }

        let deadline = tokio::time::Instant::now()
            + Duration::from_millis(u64::try_from(opts.wait_ms).unwrap_or_default());
        let mut shutdown = self.shutdown.subscribe();
        loop {
            tokio::select! {
                () = self.new_msg.notified() => {
                    let items = self.pop_ready(&opts)?;
                    if !items.is_empty() {
                        return Ok(items);
                    }
                }
                () = tokio::time::sleep_until(deadline) => {
                    return self.pop_ready(&opts);
                }
                _ = shutdown.recv() => {
                    return Ok(Vec::new());
                }
            }
        }
    }

    /// One non-blocking pass over the available heap.
    fn pop_ready(&self, opts: &PopOptions) -> Result<Vec<MessageItem>> {
        let now = now_ms();
        let limit = usize::try_from(opts.limit).unwrap_or_default();
        let mut items = Vec::new();

        while items.len() < limit {
            let mut st = self.state.lock();
            st.config.last_pop_ts = now;
            let Some((priority_key, serial)) = st.avail.pop_min() else {
                break;
            };
            let Some(mut meta) = st.messages.get(&serial).cloned() else {
                return Err(QueueState::integrity_error("available entry without metadata"));
            };

            let mut receipt = None;
            if opts.lock {
                let timeout = opts.lock_timeout.unwrap_or(st.config.pop_lock_timeout);
                meta.pop_count += 1;
                meta.unlock_ts = (now + timeout).min(meta.expire_ts);
                let record = match encode_record(&meta) {
                    Ok(record) => record,
                    Err(e) => {
                        // Leave the message available rather than lose it.
                        st.avail.push(serial, priority_key);
                        return Err(e.into());
                    }
                };
                receipt = Some(make_receipt(serial, meta.pop_count));
                st.locked_count += 1;
                st.tracking.push(serial, meta.deadline());
                st.messages.insert(serial, meta.clone());
                self.store
                    .store(keys::meta_key(&self.desc.service_id, serial), record);
            } else {
                st.id2sn.remove(&meta.str_id);
                st.messages.remove(&serial);
                st.tracking.remove(serial);
            }
            drop(st);

            // Payload access happens outside the engine mutex so a slow
            // read cannot stall pushes and sweeps.
            let payload = {
                let _payload_guard = self.payload_lock.lock();
                let payload = self
                    .store
                    .get(&keys::payload_key(&self.desc.service_id, serial))?
                    .unwrap_or_default();
                if !opts.lock {
                    self.store.delete(keys::meta_key(&self.desc.service_id, serial));
                    self.store
                        .delete(keys::payload_key(&self.desc.service_id, serial));
                }
                payload
            };

            items.push(MessageItem {
                id: meta.str_id,
                payload,
                receipt,
            });
        }
        Ok(items)
    }

    /// Delete an unlocked message.
    ///
    /// # Errors
    /// [`QueueError::MessageNotFound`] for unknown ids,
    /// [`QueueError::Locked`] while the message is locked.
    pub fn delete_by_id(&self, id: &str) -> Result<()> {
        let mut st = self.state.lock();
        let serial = *st.id2sn.get(id).ok_or(QueueError::MessageNotFound)?;
        let locked = st
            .messages
            .get(&serial)
            .ok_or_else(|| QueueState::integrity_error("id mapping without metadata"))?
            .is_locked();
        if locked {
            return Err(QueueError::Locked);
        }
        self.remove_message(&mut st, serial);
        Ok(())
    }

    /// Delete a locked message (acknowledge it).
    ///
    /// # Errors
    /// [`QueueError::MessageNotFound`], or [`QueueError::NotLocked`] if
    /// the message is available.
    pub fn delete_locked_by_id(&self, id: &str) -> Result<()> {
        let mut st = self.state.lock();
        let serial = self.locked_serial(&st, id)?;
        self.remove_message(&mut st, serial);
        Ok(())
    }

    /// Return a locked message to the front of the queue.
    ///
    /// # Errors
    /// [`QueueError::MessageNotFound`], [`QueueError::NotLocked`], or
    /// [`QueueError::Gone`] when the pop budget ran out and the message
    /// was deleted instead.
    pub fn unlock_by_id(&self, id: &str) -> Result<()> {
        let requeued = {
            let mut st = self.state.lock();
            let serial = self.locked_serial(&st, id)?;
            self.return_to_front(&mut st, serial)?
        };
        if requeued {
            self.new_msg.notify_one();
            Ok(())
        } else {
            Err(QueueError::Gone)
        }
    }

    /// Move a locked message's unlock deadline.
    ///
    /// # Errors
    /// [`QueueError::MessageNotFound`] or [`QueueError::NotLocked`].
    pub fn update_lock_by_id(&self, id: &str, timeout: i64) -> Result<()> {
        let mut st = self.state.lock();
        let serial = self.locked_serial(&st, id)?;
        self.relock(&mut st, serial, timeout)
    }

    /// Delete a locked message addressed by receipt.
    ///
    /// # Errors
    /// [`QueueError::InvalidReceipt`] on a malformed token,
    /// [`QueueError::ReceiptExpired`] when the lock it names is gone.
    pub fn delete_by_receipt(&self, receipt: &str) -> Result<()> {
        let mut st = self.state.lock();
        let serial = Self::receipt_serial(&st, receipt)?;
        self.remove_message(&mut st, serial);
        Ok(())
    }

    /// Return a receipt-addressed message to the front of the queue.
    ///
    /// # Errors
    /// As [`PQueue::delete_by_receipt`]; additionally
    /// [`QueueError::Gone`] when the pop budget ran out.
    pub fn unlock_by_receipt(&self, receipt: &str) -> Result<()> {
        let requeued = {
            let mut st = self.state.lock();
            let serial = Self::receipt_serial(&st, receipt)?;
            self.return_to_front(&mut st, serial)?
        };
        if requeued {
            self.new_msg.notify_one();
            Ok(())
        } else {
            Err(QueueError::Gone)
        }
    }

    /// Move the unlock deadline of a receipt-addressed message. The
    /// receipt stays valid: only a re-pop changes the pop count.
    ///
    /// # Errors
    /// As [`PQueue::delete_by_receipt`].
    pub fn update_lock_by_receipt(&self, receipt: &str, timeout: i64) -> Result<()> {
        let mut st = self.state.lock();
        let serial = Self::receipt_serial(&st, receipt)?;
        self.relock(&mut st, serial, timeout)
    }

    /// Info dictionary for one message.
    ///
    /// # Errors
    /// [`QueueError::MessageNotFound`].
    pub fn message_info(&self, id: &str) -> Result<Response> {
        let st = self.state.lock();
        let serial = *st.id2sn.get(id).ok_or(QueueError::MessageNotFound)?;
        let meta = st
            .messages
            .get(&serial)
            .ok_or_else(|| QueueState::integrity_error("id mapping without metadata"))?;
        let mut dict = BTreeMap::new();
        dict.insert("Id".to_string(), DictValue::Str(meta.str_id.clone()));
        dict.insert("Locked".to_string(), DictValue::Bool(meta.is_locked()));
        dict.insert("UnlockTs".to_string(), DictValue::Int(meta.unlock_ts));
        dict.insert("PopCount".to_string(), DictValue::Int(meta.pop_count));
        dict.insert("Priority".to_string(), DictValue::Int(meta.priority));
        dict.insert("ExpireTs".to_string(), DictValue::Int(meta.expire_ts));
        Ok(Response::Dict(dict))
    }

    /// Status dictionary: configuration plus message counters.
    pub fn status(&self) -> Response {
        let st = self.state.lock();
        let total = i64::try_from(st.id2sn.len()).unwrap_or(i64::MAX);
        let locked = i64::try_from(st.locked_count).unwrap_or(i64::MAX);
        let mut dict = BTreeMap::new();
        dict.insert("MaxSize".to_string(), DictValue::Int(st.config.max_size));
        dict.insert("MsgTtl".to_string(), DictValue::Int(st.config.msg_ttl));
        dict.insert(
            "DeliveryDelay".to_string(),
            DictValue::Int(st.config.delivery_delay),
        );
        dict.insert(
            "PopLockTimeout".to_string(),
            DictValue::Int(st.config.pop_lock_timeout),
        );
        dict.insert(
            "PopCountLimit".to_string(),
            DictValue::Int(st.config.pop_count_limit),
        );
        dict.insert("CreateTs".to_string(), DictValue::Int(st.config.create_ts));
        dict.insert(
            "LastPushTs".to_string(),
            DictValue::Int(st.config.last_push_ts),
        );
        dict.insert(
            "LastPopTs".to_string(),
            DictValue::Int(st.config.last_pop_ts),
        );
        dict.insert("TotalMessages".to_string(), DictValue::Int(total));
        dict.insert("InFlightMessages".to_string(), DictValue::Int(locked));
        dict.insert(
            "AvailableMessages".to_string(),
            DictValue::Int(total - locked),
        );
        Response::Dict(dict)
    }

    /// Apply a config patch and persist the config record.
    ///
    /// # Errors
    /// If the updated record cannot be encoded.
    pub fn set_params(&self, patch: &ConfigPatch) -> Result<()> {
        let mut st = self.state.lock();
        patch.apply(&mut st.config);
        let record = encode_record(&st.config)?;
        self.store
            .store(keys::config_key(&self.desc.service_id), record);
        Ok(())
    }

    /// Remove every message, locked ones included. Works in bounded
    /// chunks so other operations interleave. Returns the number of
    /// messages removed.
    pub fn clear(&self) -> usize {
        let mut total = 0;
        loop {
            let mut st = self.state.lock();
            if st.id2sn.is_empty() {
                break;
            }
            let serials: Vec<u64> = st.id2sn.values().copied().take(CLEAR_BATCH).collect();
            for serial in serials {
                if self.remove_message(&mut st, serial) {
                    total += 1;
                }
            }
        }
        debug!(queue = %self.desc.name, total, "cleared queue");
        total
    }

    /// Sweep the tracking heap: expired locks return to the front (or
    /// die when their pop budget ran out) and expired messages are
    /// removed, consuming at most one batch of entries. Returns the
    /// number of entries processed.
    pub fn check_timeouts(&self, now: i64) -> i64 {
        let mut returned: i64 = 0;
        let mut expired: i64 = 0;
        {
            let tuning = &self.settings.tuning;
            let mut st = self.state.lock();
            while returned + expired < self.settings.timeout_check_batch_size {
                let Some((_, serial)) = st.tracking.peek_min() else {
                    break;
                };
                let Some(meta) = st.messages.get(&serial) else {
                    st.tracking.pop_min();
                    continue;
                };
                let (unlock_ts, expire_ts, locked) =
                    (meta.unlock_ts, meta.expire_ts, meta.is_locked());

                if locked && unlock_ts < now {
                    if returned >= tuning.unlock_batch_size {
                        break;
                    }
                    st.tracking.pop_min();
                    returned += 1;
                    // A message past its budget is deleted here; this is
                    // the only path that enforces the retry budget.
                    let _ = self.return_to_front(&mut st, serial);
                } else if expire_ts < now {
                    if expired >= tuning.expiration_batch_size {
                        break;
                    }
                    expired += 1;
                    self.remove_message(&mut st, serial);
                } else {
                    break;
                }
            }
        }

        if returned > 0 {
            self.new_msg.notify_one();
            debug!(queue = %self.desc.name, count = returned, "returned messages to the front");
        }
        if expired > 0 {
            debug!(queue = %self.desc.name, count = expired, "expired messages removed");
        }
        returned + expired
    }

    /// Periodic update loop: one task per queue. Sweeps timeouts every
    /// interval; after a full batch it naps for a millisecond instead,
    /// so a large backlog drains without starving operations.
    pub async fn run_update(self: Arc<Self>) {
        let mut shutdown = self.shutdown.subscribe();
        loop {
            if self.is_closed() {
                break;
            }
            let processed = self.check_timeouts(now_ms());
            let nap = if processed >= self.settings.timeout_check_batch_size {
                Duration::from_millis(1)
            } else {
                self.settings.update_interval
            };
            tokio::select! {
                () = tokio::time::sleep(nap) => {}
                _ = shutdown.recv() => break,
            }
        }
        debug!(queue = %self.desc.name, "update task stopped");
    }

    /// Serial of a locked message, by id.
    fn locked_serial(&self, st: &QueueState, id: &str) -> Result<u64> {
        let serial = *st.id2sn.get(id).ok_or(QueueError::MessageNotFound)?;
        let meta = st
            .messages
            .get(&serial)
            .ok_or_else(|| QueueState::integrity_error("id mapping without metadata"))?;
        if meta.is_locked() {
            Ok(serial)
        } else {
            Err(QueueError::NotLocked)
        }
    }

    /// Serial of the locked message a receipt addresses. The receipt
    /// must match both the serial and the current pop count: any re-pop
    /// invalidates all earlier receipts.
    fn receipt_serial(st: &QueueState, receipt: &str) -> Result<u64> {
        let (serial, pop_count) = parse_receipt(receipt).ok_or(QueueError::InvalidReceipt)?;
        match st.messages.get(&serial) {
            Some(meta) if meta.is_locked() && meta.pop_count == pop_count => Ok(serial),
            _ => Err(QueueError::ReceiptExpired),
        }
    }

    /// Re-arm the lock deadline of a locked message.
    fn relock(&self, st: &mut QueueState, serial: u64, timeout: i64) -> Result<()> {
        let Some(meta) = st.messages.get_mut(&serial) else {
            return Err(QueueState::integrity_error("locked entry without metadata"));
        };
        meta.unlock_ts = (now_ms() + timeout).min(meta.expire_ts);
        let record = encode_record(meta)?;
        let deadline = meta.deadline();
        st.tracking.push(serial, deadline);
        self.store
            .store(keys::meta_key(&self.desc.service_id, serial), record);
        Ok(())
    }

    /// Put a locked message back at the head of the queue, unless its
    /// pop budget ran out, in which case it is deleted. Returns whether
    /// the message was requeued.
    fn return_to_front(&self, st: &mut QueueState, serial: u64) -> Result<bool> {
        st.locked_count = st.locked_count.saturating_sub(1);
        let Some(meta) = st.messages.get_mut(&serial) else {
            return Err(QueueState::integrity_error("locked entry without metadata"));
        };

        let limit = st.config.pop_count_limit;
        if limit > 0 && meta.pop_count >= limit {
            // Retries exhausted. locked_count was already consumed.
            let meta = st.messages.remove(&serial);
            if let Some(meta) = meta {
                st.id2sn.remove(&meta.str_id);
            }
            st.tracking.remove(serial);
            st.avail.remove(serial);
            self.store.delete(keys::meta_key(&self.desc.service_id, serial));
            self.store
                .delete(keys::payload_key(&self.desc.service_id, serial));
            return Ok(false);
        }

        meta.unlock_ts = 0;
        let record = encode_record(meta)?;
        let (priority, deadline) = (meta.effective_priority(), meta.deadline());
        st.avail.push(serial, priority);
        st.tracking.push(serial, deadline);
        self.store
            .store(keys::meta_key(&self.desc.service_id, serial), record);
        Ok(true)
    }

    /// Remove a message from every index and delete its rows. Handles
    /// both locked and available messages.
    fn remove_message(&self, st: &mut QueueState, serial: u64) -> bool {
        let Some(meta) = st.messages.remove(&serial) else {
            return false;
        };
        st.id2sn.remove(&meta.str_id);
        st.tracking.remove(serial);
        if meta.is_locked() {
            st.locked_count = st.locked_count.saturating_sub(1);
        } else {
            st.avail.remove(serial);
        }
        self.store.delete(keys::meta_key(&self.desc.service_id, serial));
        self.store
            .delete(keys::payload_key(&self.desc.service_id, serial));
        true
    }
}
