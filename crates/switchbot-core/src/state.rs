//! Merged device state, the override layer, and change subscriptions.
//!
//! Broadcasts and connected replies both land here. The current snapshot is
//! an `Arc<Advertisement>` that is swapped, never edited, so readers holding
//! a snapshot never see a half-merged state.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;
use tracing::debug;

use switchbot_types::DeviceIdentity;

use crate::advertisement::{Advertisement, UNKNOWN_RSSI};

/// Decoded device state: field name to value.
pub type StateMap = serde_json::Map<String, Value>;

/// Callback fired after the merged state changed.
pub type StateCallback = Arc<dyn Fn() + Send + Sync>;

type CallbackList = Mutex<Vec<(u64, StateCallback)>>;

/// Merge `new` into `old`.
///
/// Nested mappings merge field by field. A null in `new` only lands when the
/// key is unknown in `old`, so nulls never erase known data.
///
/// ```
/// use serde_json::json;
/// use switchbot_core::state::merge_data;
///
/// let old = json!({"a": {"x": 1, "y": 2}});
/// let new = json!({"a": {"x": null, "z": 3}});
/// let merged = merge_data(old.as_object().unwrap(), new.as_object().unwrap());
/// assert_eq!(serde_json::Value::Object(merged), json!({"a": {"x": 1, "y": 2, "z": 3}}));
/// ```
pub fn merge_data(old: &StateMap, new: &StateMap) -> StateMap {
    let mut merged = old.clone();
    for (key, value) in new {
        match (value, old.get(key)) {
            (Value::Object(new_inner), Some(Value::Object(old_inner))) => {
                merged.insert(key.clone(), Value::Object(merge_data(old_inner, new_inner)));
            }
            (Value::Null, Some(_)) => {}
            _ => {
                merged.insert(key.clone(), value.clone());
            }
        }
    }
    merged
}

/// Handle returned by [`StateCache::subscribe`].
///
/// Dropping the handle keeps the callback registered; call
/// [`Subscription::unsubscribe`] to remove it.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    callbacks: Weak<CallbackList>,
}

impl Subscription {
    /// Remove the callback.
    pub fn unsubscribe(self) {
        if let Some(callbacks) = self.callbacks.upgrade() {
            callbacks
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .retain(|(id, _)| *id != self.id);
        }
    }
}

/// Authoritative state of one device.
pub struct StateCache {
    snapshot: RwLock<Option<Arc<Advertisement>>>,
    overrides: Mutex<Option<StateMap>>,
    last_full_update: Mutex<Option<Instant>>,
    poll_interval: Duration,
    callbacks: Arc<CallbackList>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for StateCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateCache")
            .field("snapshot", &self.snapshot())
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}

impl StateCache {
    /// Create an empty cache. `poll_interval` throttles [`poll_needed`](Self::poll_needed).
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            snapshot: RwLock::new(None),
            overrides: Mutex::new(None),
            last_full_update: Mutex::new(None),
            poll_interval,
            callbacks: Arc::new(Mutex::new(Vec::new())),
            next_id: AtomicU64::new(0),
        }
    }

    /// Current snapshot, if any broadcast or connected update arrived.
    pub fn snapshot(&self) -> Option<Arc<Advertisement>> {
        self.snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the snapshot wholesale with a fresh discovery result.
    pub fn replace_snapshot(&self, advertisement: Advertisement) {
        *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) =
            Some(Arc::new(advertisement));
    }

    /// Signal strength of the latest snapshot, or −127.
    pub fn rssi(&self) -> i16 {
        self.snapshot().map_or(UNKNOWN_RSSI, |s| s.rssi)
    }

    /// Raw snapshot data (copy).
    pub fn data(&self) -> StateMap {
        self.snapshot().map(|s| s.data.clone()).unwrap_or_default()
    }

    /// Decoded state (copy).
    pub fn parsed_data(&self) -> StateMap {
        self.snapshot()
            .map(|s| s.parsed_or_empty())
            .unwrap_or_default()
    }

    /// Read a field, consulting the override layer first.
    pub fn value(&self, key: &str) -> Option<Value> {
        if let Some(value) = self
            .overrides
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .and_then(|o| o.get(key))
        {
            debug!(key, value = %value, "using override value");
            return Some(value.clone());
        }
        self.snapshot()?.parsed()?.get(key).cloned()
    }

    /// Read a per-channel field of a multi-channel device.
    pub fn channel_value(&self, channel: u8, key: &str) -> Option<Value> {
        if let Some(value) = self
            .overrides
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .and_then(|o| o.get(key))
        {
            return Some(value.clone());
        }
        self.snapshot()?
            .parsed()?
            .get(&channel.to_string())?
            .get(key)
            .cloned()
    }

    /// Accept a broadcast.
    ///
    /// The first snapshot is stored as is. Later ones keep the merged decoded
    /// state and take the rest (rssi, identity, raw fields) from the new
    /// broadcast. Returns whether the snapshot changed; a new identity or
    /// payload counts, a new rssi alone does not.
    pub fn apply_advertisement(&self, advertisement: Advertisement) -> bool {
        let new_data = advertisement.parsed_or_empty();
        if advertisement.active {
            self.record_full_update();
        }

        let changed = {
            let mut snapshot = self.snapshot.write().unwrap_or_else(PoisonError::into_inner);
            match snapshot.as_ref() {
                None => {
                    let changed = !new_data.is_empty();
                    *snapshot = Some(Arc::new(advertisement));
                    changed
                }
                Some(current) => {
                    let old_data = current.parsed_or_empty();
                    let next = advertisement.with_parsed(merge_data(&old_data, &new_data));
                    let changed = next.changed_from(Some(current));
                    *snapshot = Some(Arc::new(next));
                    changed
                }
            }
        };

        if !new_data.is_empty() {
            *self.overrides.lock().unwrap_or_else(PoisonError::into_inner) = None;
        }
        changed
    }

    /// Merge a partial state from a connected read or push.
    ///
    /// With no snapshot yet, a placeholder for `identity` is created first.
    /// Returns whether the decoded state changed.
    pub fn update_parsed(&self, identity: &DeviceIdentity, new_data: &StateMap) -> bool {
        let mut snapshot = self.snapshot.write().unwrap_or_else(PoisonError::into_inner);
        let current = snapshot
            .get_or_insert_with(|| Arc::new(Advertisement::placeholder(identity.clone())))
            .clone();
        let old_data = current.parsed_or_empty();
        let merged = merge_data(&old_data, new_data);
        if merged == old_data {
            return false;
        }
        *snapshot = Some(Arc::new(
            Advertisement::clone(&current).with_parsed(merged),
        ));
        true
    }

    /// Reflect the immediate effect of a command until the next broadcast.
    pub fn override_state(&self, identity: &DeviceIdentity, fields: StateMap) {
        self.overrides
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_or_insert_with(StateMap::new)
            .extend(fields.clone());
        self.update_parsed(identity, &fields);
    }

    /// Current override layer (copy).
    pub fn overrides(&self) -> Option<StateMap> {
        self.overrides
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Note that a full refresh just completed.
    pub fn record_full_update(&self) {
        *self
            .last_full_update
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Instant::now());
    }

    /// Time since the last full refresh, if any happened.
    pub fn since_full_update(&self) -> Option<Duration> {
        self.last_full_update
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .map(|t| t.elapsed())
    }

    /// Whether the caller should actively poll.
    ///
    /// The age of the last full update decides once one has happened. Until
    /// then a poll within the passive interval holds off the next one.
    pub fn poll_needed(&self, since_last_poll: Option<Duration>) -> bool {
        match self.since_full_update() {
            Some(elapsed) => elapsed >= self.poll_interval,
            None => since_last_poll.is_none_or(|elapsed| elapsed >= self.poll_interval),
        }
    }

    /// Register a change callback.
    pub fn subscribe(&self, callback: StateCallback) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, callback));
        Subscription {
            id,
            callbacks: Arc::downgrade(&self.callbacks),
        }
    }

    /// Number of registered callbacks.
    pub fn subscriber_count(&self) -> usize {
        self.callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Invoke every callback. Callbacks run outside the registry lock.
    pub fn fire_callbacks(&self) {
        let callbacks: Vec<StateCallback> = self
            .callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();
        debug!(count = callbacks.len(), "fire callbacks");
        for callback in callbacks {
            callback();
        }
    }
}
