//! The closed set of queue commands.
//!
//! The session layer parses wire tokens into one of these variants and
//! hands it to [`PQueue::execute`]; every variant carries its typed
//! parameters. Parameter range checks against the queue-type caps live
//! here, so the engine itself only enforces state preconditions.

use ferriq_common::ident::{random_id, validate_id};
use ferriq_common::{QueueError, Response, Result};

use crate::config::ConfigPatch;
use crate::engine::{PQueue, PopOptions};

/// Largest accepted payload, in bytes.
pub const MAX_PAYLOAD_SIZE: usize = 512 * 1024;

/// One queue operation with its typed parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Push {
        /// Client-assigned id; a random one is generated when absent.
        id: Option<String>,
        payload: Vec<u8>,
        ttl: Option<i64>,
        delay: Option<i64>,
        priority: Option<i64>,
    },
    Pop {
        limit: i64,
        wait: i64,
        lock_timeout: Option<i64>,
        lock: bool,
    },
    Delete {
        id: String,
    },
    DeleteLocked {
        id: String,
    },
    Unlock {
        id: String,
    },
    UpdateLock {
        id: String,
        timeout: i64,
    },
    DeleteByReceipt {
        receipt: String,
    },
    UnlockByReceipt {
        receipt: String,
    },
    UpdateLockByReceipt {
        receipt: String,
        timeout: i64,
    },
    MessageInfo {
        id: String,
    },
    Status,
    SetConfig(ConfigPatch),
    Clear,
}

fn check_range(name: &str, value: i64, min: i64, max: i64) -> Result<i64> {
    if (min..=max).contains(&value) {
        Ok(value)
    } else {
        Err(QueueError::invalid(format!(
            "{name} must be in range {min}..{max}"
        )))
    }
}

fn checked_id(id: String) -> Result<String> {
    if validate_id(&id) {
        Ok(id)
    } else {
        Err(QueueError::invalid(
            "message id must be 1..256 characters of [A-Za-z0-9_-] and not start with '_'",
        ))
    }
}

impl PQueue {
    /// Validate and run one command.
    ///
    /// # Errors
    /// [`QueueError::InvalidRequest`] for out-of-range parameters,
    /// otherwise whatever the underlying operation reports.
    pub async fn execute(&self, command: Command) -> Result<Response> {
        let tuning = &self.settings.tuning;
        match command {
            Command::Push {
                id,
                payload,
                ttl,
                delay,
                priority,
            } => {
                let id = id.map_or_else(|| Ok(random_id()), checked_id)?;
                if payload.len() > MAX_PAYLOAD_SIZE {
                    return Err(QueueError::invalid(format!(
                        "payload must not exceed {MAX_PAYLOAD_SIZE} bytes"
                    )));
                }
                let config = self.config();
                let ttl = check_range(
                    "message TTL",
                    ttl.unwrap_or(config.msg_ttl),
                    1,
                    i64::MAX,
                )?;
                let delay = check_range(
                    "delivery delay",
                    delay.unwrap_or(config.delivery_delay),
                    0,
                    tuning.max_delivery_timeout,
                )?;
                let priority = check_range("priority", priority.unwrap_or(0), 0, i64::MAX)?;
                self.push(&id, &payload, ttl, delay, priority)?;
                Ok(Response::Str(id))
            }

            Command::Pop {
                limit,
                wait,
                lock_timeout,
                lock,
            } => {
                let limit = check_range("POP limit", limit, 1, tuning.max_pop_batch_size)?;
                let wait = check_range("POP wait timeout", wait, 0, tuning.max_pop_wait_timeout)?;
                let lock_timeout = lock_timeout
                    .map(|t| check_range("lock timeout", t, 0, tuning.max_lock_timeout))
                    .transpose()?;
                let items = self
                    .pop(PopOptions {
                        lock_timeout,
                        wait_ms: wait,
                        limit,
                        lock,
                    })
                    .await?;
                Ok(Response::Items(items))
            }

            Command::Delete { id } => {
                self.delete_by_id(&checked_id(id)?)?;
                Ok(Response::Ok)
            }

            Command::DeleteLocked { id } => {
                self.delete_locked_by_id(&checked_id(id)?)?;
                Ok(Response::Ok)
            }

            Command::Unlock { id } => {
                self.unlock_by_id(&checked_id(id)?)?;
                Ok(Response::Ok)
            }

            Command::UpdateLock { id, timeout } => {
                let timeout = check_range("lock timeout", timeout, 0, tuning.max_lock_timeout)?;
                self.update_lock_by_id(&checked_id(id)?, timeout)?;
                Ok(Response::Ok)
            }

            Command::DeleteByReceipt { receipt } => {
                self.delete_by_receipt(&receipt)?;
                Ok(Response::Ok)
            }

            Command::UnlockByReceipt { receipt } => {
                self.unlock_by_receipt(&receipt)?;
                Ok(Response::Ok)
            }

            Command::UpdateLockByReceipt { receipt, timeout } => {
                let timeout = check_range("lock timeout", timeout, 0, tuning.max_lock_timeout)?;
                self.update_lock_by_receipt(&receipt, timeout)?;
                Ok(Response::Ok)
            }

            Command::MessageInfo { id } => self.message_info(&checked_id(id)?),

            Command::Status => Ok(self.status()),

            Command::SetConfig(patch) => {
                if patch.is_empty() {
                    return Err(QueueError::invalid(
                        "at least one configuration parameter must be provided",
                    ));
                }
                if let Some(ttl) = patch.msg_ttl {
                    check_range("message TTL", ttl, 1, i64::MAX)?;
                }
                if let Some(size) = patch.max_size {
                    check_range("max size", size, 0, i64::MAX)?;
                }
                if let Some(delay) = patch.delivery_delay {
                    check_range("delivery delay", delay, 0, tuning.max_delivery_timeout)?;
                }
                if let Some(limit) = patch.pop_count_limit {
                    check_range("pop count limit", limit, 0, i64::MAX)?;
                }
                if let Some(timeout) = patch.pop_lock_timeout {
                    check_range("lock timeout", timeout, 0, tuning.max_lock_timeout)?;
                }
                self.set_params(&patch)?;
                Ok(Response::Ok)
            }

            Command::Clear => {
                self.clear();
                Ok(Response::Ok)
            }
        }
    }
}
