//! Lifecycle callback lists
//!
//! Connect, disconnect and error listeners are kept in small id-keyed lists.
//! Every invocation runs inside [`run_isolated`], so one panicking callback
//! cannot stop the others or unwind into the connection task.

use super::registry::Subscription;
use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

type Entries<T> = Mutex<Vec<(u64, Arc<T>)>>;

pub(crate) struct CallbackList<T: ?Sized> {
    entries: Arc<Entries<T>>,
    next_id: AtomicU64,
}

impl<T: ?Sized + Send + Sync + 'static> CallbackList<T> {
    pub(crate) fn new() -> Self {
        Self {
            entries: Arc::new(Mutex::new(Vec::new())),
            next_id: AtomicU64::new(0),
        }
    }

    pub(crate) fn register(&self, callback: Arc<T>) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.entries).push((id, callback));

        let entries = Arc::downgrade(&self.entries);
        Subscription::new(move || {
            if let Some(entries) = entries.upgrade() {
                lock(&entries).retain(|(entry_id, _)| *entry_id != id);
            }
        })
    }

    pub(crate) fn snapshot(&self) -> Vec<Arc<T>> {
        lock(&self.entries)
            .iter()
            .map(|(_, callback)| callback.clone())
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        lock(&self.entries).len()
    }
}

fn lock<T: ?Sized>(entries: &Entries<T>) -> MutexGuard<'_, Vec<(u64, Arc<T>)>> {
    entries.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Run user code, converting a panic into a logged warning
///
/// Returns `false` if `f` panicked.
pub(crate) fn run_isolated(kind: &'static str, f: impl FnOnce()) -> bool {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(()) => true,
        Err(payload) => {
            tracing::warn!(
                callback = kind,
                panic = %panic_message(payload.as_ref()),
                "Callback panicked"
            );
            false
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
