//! Subscription registry with drop-to-unsubscribe handles
//!
//! Every callback list in the bridge (MIDI receiver, links, control state) is a
//! [`Registry`]. Subscribing returns a [`Subscription`]; dropping it removes the
//! callback, so a consumer that goes away can never be called again.

use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

struct Inner<T: ?Sized> {
    next_id: AtomicU64,
    entries: RwLock<Vec<(u64, Arc<T>)>>,
}

/// Ordered list of subscribers of type `T` (usually a `dyn Fn(..)`)
pub struct Registry<T: ?Sized> {
    inner: Arc<Inner<T>>,
}

impl<T: ?Sized> Clone for Registry<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: ?Sized + Send + Sync + 'static> Registry<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                next_id: AtomicU64::new(1),
                entries: RwLock::new(Vec::new()),
            }),
        }
    }

    /// Register a subscriber. It stays registered until the handle is dropped.
    pub fn subscribe(&self, subscriber: Arc<T>) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.entries.write().push((id, subscriber));

        let weak: Weak<Inner<T>> = Arc::downgrade(&self.inner);
        Subscription {
            id,
            release: Some(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.entries.write().retain(|(entry_id, _)| *entry_id != id);
                }
            })),
        }
    }

    /// Current subscribers in subscription order
    ///
    /// The snapshot is taken under the lock and released before any callback
    /// runs, so callbacks may subscribe or unsubscribe freely.
    pub fn snapshot(&self) -> Vec<Arc<T>> {
        self.inner
            .entries
            .read()
            .iter()
            .map(|(_, subscriber)| Arc::clone(subscriber))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: ?Sized + Send + Sync + 'static> Default for Registry<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Owned registration handle; unregisters on drop
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    id: u64,
    release: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Unsubscribe now instead of at drop
    pub fn cancel(mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}
