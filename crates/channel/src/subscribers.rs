use std::{
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{
        Arc, Mutex, Weak,
        atomic::{AtomicU64, Ordering},
    },
};

use {nexus_protocol::ConnectionState, tracing::warn};

type Callback = Arc<dyn Fn(ConnectionState) + Send + Sync>;

#[derive(Default)]
pub(crate) struct Subscribers {
    next_id: AtomicU64,
    entries: Mutex<Vec<(u64, Callback)>>,
}

impl Subscribers {
    pub(crate) fn add(self: &Arc<Self>, callback: Callback) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, callback));
        Subscription {
            id,
            list: Arc::downgrade(self),
        }
    }

    fn remove(&self, id: u64) {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|(entry, _)| *entry != id);
    }

    /// Call every subscriber registered at the time of the call. The list is
    /// not locked while callbacks run, and a panicking callback does not stop
    /// the rest.
    pub(crate) fn notify(&self, state: ConnectionState) {
        let snapshot: Vec<Callback> = self
            .entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();

        for callback in snapshot {
            if catch_unwind(AssertUnwindSafe(|| callback(state))).is_err() {
                warn!(%state, "status subscriber panicked");
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// Handle returned by [`SessionChannel::on_status_change`].
///
/// Unsubscribing is idempotent and safe from inside the callback itself.
/// Dropping the handle keeps the subscription alive.
///
/// [`SessionChannel::on_status_change`]: crate::SessionChannel::on_status_change
pub struct Subscription {
    id: u64,
    list: Weak<Subscribers>,
}

impl Subscription {
    pub fn unsubscribe(&self) {
        if let Some(list) = self.list.upgrade() {
            list.remove(self.id);
        }
    }
}
