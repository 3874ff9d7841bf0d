//! Change Notification Module
//!
//! Observer lists for committed key changes, and the host-side hub that
//! delivers out-of-process mutations of a durable medium to storages.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use crate::storage::MediumId;

type Callback = Arc<dyn Fn(&str) + Send + Sync>;
type Listener = Arc<dyn Fn(&ExternalChange) + Send + Sync>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// == Subscription Id ==
/// Handle returned by [`Notifier::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

// == Notifier ==
/// Subscriber list invoked with the logical key of every committed change.
#[derive(Default)]
pub struct Notifier {
    next_id: AtomicU64,
    subscribers: Mutex<Vec<(SubscriptionId, Callback)>>,
}

impl Notifier {
    /// Creates a notifier with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `callback`, returning a handle for [`Notifier::unsubscribe`].
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        lock(&self.subscribers).push((id, Arc::new(callback)));
        id
    }

    /// Removes a subscriber. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = lock(&self.subscribers);
        let before = subscribers.len();
        subscribers.retain(|(sid, _)| *sid != id);
        subscribers.len() != before
    }

    /// Publishes a change of `key` to every subscriber.
    pub fn notify(&self, key: &str) {
        // Callbacks run outside the lock so they may subscribe or unsubscribe.
        let callbacks: Vec<Callback> = lock(&self.subscribers)
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();

        for callback in callbacks {
            callback(key);
        }
    }

    /// Number of registered subscribers.
    pub fn len(&self) -> usize {
        lock(&self.subscribers).len()
    }

    /// Returns true if nobody is subscribed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("subscribers", &self.len())
            .finish()
    }
}

// == External Change ==
/// A mutation of a durable medium made by another execution context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalChange {
    /// Physical key that changed, None when the whole medium was cleared
    pub key: Option<String>,
    /// Medium the change happened in
    pub origin: MediumId,
}

impl ExternalChange {
    /// Creates an event for a single physical key.
    pub fn new(key: impl Into<String>, origin: MediumId) -> Self {
        Self {
            key: Some(key.into()),
            origin,
        }
    }
}

// == Change Hub ==
/// Host-side dispatcher of [`ExternalChange`] events.
///
/// Storages register at construction and hold a [`Registration`]; dropping
/// it deregisters the listener.
#[derive(Default)]
pub struct ChangeHub {
    next_id: AtomicU64,
    listeners: Mutex<Vec<(u64, Listener)>>,
}

impl ChangeHub {
    /// Creates a hub with no listeners.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers a listener for every dispatched event.
    pub fn listen<F>(self: &Arc<Self>, listener: F) -> Registration
    where
        F: Fn(&ExternalChange) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.listeners).push((id, Arc::new(listener)));
        Registration {
            hub: Arc::downgrade(self),
            id,
        }
    }

    /// Delivers `event` to every registered listener.
    pub fn dispatch(&self, event: &ExternalChange) {
        let listeners: Vec<Listener> = lock(&self.listeners)
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();

        for listener in listeners {
            listener(event);
        }
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        lock(&self.listeners).len()
    }

    fn remove(&self, id: u64) {
        lock(&self.listeners).retain(|(lid, _)| *lid != id);
    }
}

impl std::fmt::Debug for ChangeHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeHub")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

// == Registration ==
/// Keeps a listener registered with a [`ChangeHub`] until dropped.
#[derive(Debug)]
pub struct Registration {
    hub: Weak<ChangeHub>,
    id: u64,
}

impl Drop for Registration {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.remove(self.id);
        }
    }
}
