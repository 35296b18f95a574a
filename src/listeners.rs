//! Event listener registry. Listeners subscribe by event name and are called
//! on the effect thread with a JSON payload.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::debug;

use crate::error::ListenerError;

/// The only event this plugin emits.
pub const SHAKE_EVENT: &str = "shake";

pub type ListenerFn = dyn Fn(&serde_json::Value) + Send + Sync;

/// Returned by `add_listener`; pass back to `remove_listener` to unsubscribe.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ListenerHandle {
    pub id: uuid::Uuid,
    pub event: &'static str,
}

struct Entry {
    handle: ListenerHandle,
    callback: Arc<ListenerFn>,
}

#[derive(Default)]
pub struct ListenerRegistry {
    entries: RwLock<Vec<Entry>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listener<F>(&self, event: &str, callback: F) -> Result<ListenerHandle, ListenerError>
    where
        F: Fn(&serde_json::Value) + Send + Sync + 'static,
    {
        let event = known_event(event)?;
        let handle = ListenerHandle {
            id: uuid::Uuid::new_v4(),
            event,
        };
        self.entries.write().push(Entry {
            handle: handle.clone(),
            callback: Arc::new(callback),
        });
        debug!(event, id = %handle.id, "listener_added");
        Ok(handle)
    }

    /// Returns whether the handle was still registered.
    pub fn remove_listener(&self, handle: &ListenerHandle) -> bool {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|e| e.handle != *handle);
        before != entries.len()
    }

    pub fn remove_all_listeners(&self) {
        let removed = {
            let mut entries = self.entries.write();
            let n = entries.len();
            entries.clear();
            n
        };
        debug!(removed, "listeners_cleared");
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Call every listener for `event`. Returns how many were called.
    /// Callbacks run outside the lock so a listener may unsubscribe itself.
    pub fn notify(&self, event: &str, payload: &serde_json::Value) -> usize {
        let callbacks: Vec<(ListenerHandle, Arc<ListenerFn>)> = self
            .entries
            .read()
            .iter()
            .filter(|e| e.handle.event == event)
            .map(|e| (e.handle.clone(), Arc::clone(&e.callback)))
            .collect();

        let mut called = 0;
        for (handle, callback) in callbacks {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| callback(payload)));
            match result {
                Ok(()) => called += 1,
                Err(_) => tracing::error!(id = %handle.id, event, "listener panicked"),
            }
        }
        called
    }
}

fn known_event(event: &str) -> Result<&'static str, ListenerError> {
    match event {
        SHAKE_EVENT => Ok(SHAKE_EVENT),
        other => Err(ListenerError::UnknownEvent(other.to_string())),
    }
}
