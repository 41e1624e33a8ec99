//! Durable Outbound Queue: sled-backed store-and-forward buffer
//!
//! Telemetry that cannot be delivered live is persisted here and drained in
//! ascending sequence id order once the broker is reachable again.
//!
//! Layout: `messages` tree keyed by the sequence id as u64 big-endian bytes
//! (sorts in delivery order), JSON-encoded records as values; `meta` tree
//! holding the next sequence id so ids keep increasing across restarts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

/// Default maximum number of buffered messages
pub const DEFAULT_MAX_MESSAGES: usize = 1000;

const MESSAGES_TREE: &str = "messages";
const META_TREE: &str = "meta";
const NEXT_ID_KEY: &[u8] = b"next_sequence_id";

/// A pending outbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferedMessage {
    pub sequence_id: u64,
    pub enqueued_at: DateTime<Utc>,
    pub payload: Vec<u8>,
}

#[derive(Serialize, Deserialize)]
struct StoredRecord {
    enqueued_at: DateTime<Utc>,
    payload: Vec<u8>,
}

struct QueueState {
    next_id: u64,
    len: usize,
}

/// Ordered, capacity-bounded, crash-durable queue
///
/// All operations take an internal mutex so ids stay strictly increasing and
/// the in-memory length matches what is on disk.
pub struct DurableOutboundQueue {
    db: sled::Db,
    messages: sled::Tree,
    meta: sled::Tree,
    max_messages: usize,
    state: Mutex<QueueState>,
}

impl std::fmt::Debug for DurableOutboundQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DurableOutboundQueue")
            .field("max_messages", &self.max_messages)
            .finish_non_exhaustive()
    }
}

impl DurableOutboundQueue {
    /// Create or open the queue at the given directory
    pub fn open<P: AsRef<Path>>(path: P, max_messages: usize) -> Result<Self, QueueError> {
        if max_messages == 0 {
            return Err(QueueError::InvalidCapacity);
        }

        let db = sled::open(path.as_ref())?;
        let messages = db.open_tree(MESSAGES_TREE)?;
        let meta = db.open_tree(META_TREE)?;

        let stored_next = meta.get(NEXT_ID_KEY)?.and_then(|v| decode_id(&v));
        let after_last = messages
            .last()?
            .and_then(|(k, _)| decode_id(&k))
            .map_or(1, |id| id + 1);
        let next_id = stored_next.unwrap_or(1).max(after_last);
        let len = messages.len();

        let queue = Self {
            db,
            messages,
            meta,
            max_messages,
            state: Mutex::new(QueueState { next_id, len }),
        };

        // A smaller cap than last run applies immediately
        {
            let mut state = queue.lock_state();
            let evicted = queue.evict_over_capacity(&mut state)?;
            if evicted > 0 {
                queue.db.flush()?;
            }
        }

        if len > 0 {
            info!(
                path = %path.as_ref().display(),
                pending = len,
                next_id,
                "Outbound queue opened with pending messages"
            );
        } else {
            debug!(path = %path.as_ref().display(), "Outbound queue opened (empty)");
        }

        Ok(queue)
    }

    pub fn capacity(&self) -> usize {
        self.max_messages
    }

    /// Persist a payload, evicting the oldest messages beyond capacity
    pub fn enqueue(&self, payload: &[u8]) -> Result<u64, QueueError> {
        let mut state = self.lock_state();

        let sequence_id = state.next_id;
        let record = StoredRecord {
            enqueued_at: Utc::now(),
            payload: payload.to_vec(),
        };
        let bytes = serde_json::to_vec(&record)?;

        self.meta
            .insert(NEXT_ID_KEY, (sequence_id + 1).to_be_bytes().to_vec())?;
        self.messages.insert(sequence_id.to_be_bytes(), bytes)?;
        state.next_id = sequence_id + 1;
        state.len += 1;

        let evicted = self.evict_over_capacity(&mut state)?;
        self.db.flush()?;

        debug!(
            sequence_id,
            size_bytes = payload.len(),
            pending = state.len,
            evicted,
            "Message buffered"
        );
        Ok(sequence_id)
    }

    /// All pending messages, ascending sequence id
    ///
    /// Undecodable records are removed and logged.
    pub fn peek_all(&self) -> Result<Vec<BufferedMessage>, QueueError> {
        let mut state = self.lock_state();
        let mut out = Vec::with_capacity(state.len);
        let mut corrupt = Vec::new();

        for item in self.messages.iter() {
            let (key, value) = item?;
            match decode_message(&key, &value) {
                Some(message) => out.push(message),
                None => {
                    error!(sequence_id = ?decode_id(&key), "Corrupted queue record, removing");
                    corrupt.push(key);
                }
            }
        }

        if !corrupt.is_empty() {
            for key in corrupt {
                if self.messages.remove(key)?.is_some() {
                    state.len = state.len.saturating_sub(1);
                }
            }
            self.db.flush()?;
        }

        Ok(out)
    }

    /// The lowest-id pending message, if any
    pub fn peek_oldest(&self) -> Result<Option<BufferedMessage>, QueueError> {
        let mut state = self.lock_state();
        while let Some((key, value)) = self.messages.first()? {
            if let Some(message) = decode_message(&key, &value) {
                return Ok(Some(message));
            }
            error!(sequence_id = ?decode_id(&key), "Corrupted queue record, removing");
            if self.messages.remove(key)?.is_some() {
                state.len = state.len.saturating_sub(1);
            }
            self.db.flush()?;
        }
        Ok(None)
    }

    /// Delete delivered messages; unknown ids are ignored
    pub fn remove_by_ids(&self, ids: &[u64]) -> Result<usize, QueueError> {
        let mut state = self.lock_state();
        let mut removed = 0;
        for id in ids {
            if self.messages.remove(id.to_be_bytes())?.is_some() {
                removed += 1;
            }
        }
        if removed > 0 {
            state.len = state.len.saturating_sub(removed);
            self.db.flush()?;
        }
        Ok(removed)
    }

    pub fn len(&self) -> usize {
        self.lock_state().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every pending message; sequence ids keep increasing
    pub fn clear(&self) -> Result<usize, QueueError> {
        let mut state = self.lock_state();
        let dropped = state.len;
        self.messages.clear()?;
        state.len = 0;
        self.db.flush()?;
        warn!(dropped, "Outbound queue cleared");
        Ok(dropped)
    }

    fn evict_over_capacity(&self, state: &mut QueueState) -> Result<usize, QueueError> {
        let mut evicted = 0;
        while state.len > self.max_messages {
            match self.messages.pop_min()? {
                Some(_) => {
                    state.len -= 1;
                    evicted += 1;
                }
                None => {
                    state.len = 0;
                    break;
                }
            }
        }
        Ok(evicted)
    }

    fn lock_state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|poisoned| {
            warn!("Outbound queue lock poisoned, recovering");
            poisoned.into_inner()
        })
    }
}

fn decode_id(bytes: &[u8]) -> Option<u64> {
    let array: [u8; 8] = bytes.try_into().ok()?;
    Some(u64::from_be_bytes(array))
}

fn decode_message(key: &[u8], value: &[u8]) -> Option<BufferedMessage> {
    let sequence_id = decode_id(key)?;
    let record: StoredRecord = serde_json::from_slice(value).ok()?;
    Some(BufferedMessage {
        sequence_id,
        enqueued_at: record.enqueued_at,
        payload: record.payload,
    })
}

/// Queue errors
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("storage error: {0}")]
    Storage(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("queue capacity must be at least 1")]
    InvalidCapacity,
}

impl From<sled::Error> for QueueError {
    fn from(err: sled::Error) -> Self {
        QueueError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(err: serde_json::Error) -> Self {
        QueueError::Serialization(err.to_string())
    }
}
