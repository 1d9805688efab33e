//! Reactive state store
//!
//! Holds the current `WizardState` snapshot behind an `Arc`. Updates clone
//! the snapshot, apply the change and swap in the result, so snapshots handed
//! out earlier (and history entries inside them) are never touched again.
//! Listeners run synchronously after each committed write, outside the lock.

use crate::error::{WizardError, WizardResult};
use crate::state_machine::WizardState;
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::watch;

pub type StateListener = dyn Fn(&WizardState) + Send + Sync;

// ============================================================================
// Subscriptions
// ============================================================================

/// Handle returned by `subscribe`; call [`Subscription::unsubscribe`] to detach.
#[must_use = "dropping a Subscription keeps the listener attached; call unsubscribe() to detach"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    fn new(cancel: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

struct ListenerSlots<T: ?Sized> {
    next_id: u64,
    entries: Vec<(u64, Arc<T>)>,
}

/// Ordered set of callbacks, invoked in registration order
pub(crate) struct ListenerSet<T: ?Sized> {
    slots: Arc<Mutex<ListenerSlots<T>>>,
}

impl<T: ?Sized + Send + Sync + 'static> ListenerSet<T> {
    pub fn new() -> Self {
        Self {
            slots: Arc::new(Mutex::new(ListenerSlots {
                next_id: 0,
                entries: Vec::new(),
            })),
        }
    }

    /// Attach for the lifetime of the set
    pub fn insert(&self, listener: Arc<T>) -> u64 {
        let mut slots = self.slots.lock();
        let id = slots.next_id;
        slots.next_id += 1;
        slots.entries.push((id, listener));
        id
    }

    pub fn add(&self, listener: Arc<T>) -> Subscription {
        let id = self.insert(listener);
        let weak: Weak<Mutex<ListenerSlots<T>>> = Arc::downgrade(&self.slots);
        Subscription::new(move || {
            if let Some(slots) = weak.upgrade() {
                slots.lock().entries.retain(|(entry_id, _)| *entry_id != id);
            }
        })
    }

    /// Current listeners, cloned so they can be called without the lock held
    pub fn snapshot(&self) -> Vec<Arc<T>> {
        self.slots
            .lock()
            .entries
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect()
    }

    pub fn clear(&self) {
        self.slots.lock().entries.clear();
    }

    pub fn len(&self) -> usize {
        self.slots.lock().entries.len()
    }
}

// ============================================================================
// Store
// ============================================================================

struct StoreInner {
    current: RwLock<Arc<WizardState>>,
    revision: RwLock<u64>,
    listeners: ListenerSet<StateListener>,
    watch_tx: watch::Sender<Arc<WizardState>>,
    /// Revision last sent on `watch_tx`
    published: Mutex<u64>,
    closed: AtomicBool,
}

/// Shared handle to one wizard's state
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("step", &self.inner.current.read().step)
            .field("revision", &self.revision())
            .field("listeners", &self.inner.listeners.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Store {
    pub fn new(initial: WizardState) -> Self {
        let initial = Arc::new(initial);
        let (watch_tx, _) = watch::channel(Arc::clone(&initial));
        Self {
            inner: Arc::new(StoreInner {
                current: RwLock::new(initial),
                revision: RwLock::new(0),
                listeners: ListenerSet::new(),
                watch_tx,
                published: Mutex::new(0),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Latest committed snapshot
    pub fn get_state(&self) -> Arc<WizardState> {
        Arc::clone(&self.inner.current.read())
    }

    /// Number of committed writes since creation
    pub fn revision(&self) -> u64 {
        *self.inner.revision.read()
    }

    /// Replace the snapshot wholesale
    pub fn set_state(&self, state: WizardState) -> WizardResult<Arc<WizardState>> {
        self.try_update(|current| {
            *current = state;
            Ok(())
        })
        .map(|(state, ())| state)
    }

    /// Copy-on-write update
    pub fn update<F>(&self, f: F) -> WizardResult<Arc<WizardState>>
    where
        F: FnOnce(&mut WizardState),
    {
        self.try_update(|state| {
            f(state);
            Ok(())
        })
        .map(|(state, ())| state)
    }

    /// Copy-on-write update that may refuse to commit.
    ///
    /// The closure works on a private copy; when it returns `Err` nothing is
    /// written and no listener runs. The read-modify-write happens under the
    /// write lock, so check-and-set updates are atomic.
    pub fn try_update<F, T>(&self, f: F) -> WizardResult<(Arc<WizardState>, T)>
    where
        F: FnOnce(&mut WizardState) -> WizardResult<T>,
    {
        if self.is_closed() {
            return Err(WizardError::Destroyed);
        }

        let (committed, revision, output) = {
            let mut current = self.inner.current.write();
            let mut next = WizardState::clone(&current);
            let output = f(&mut next)?;
            let next = Arc::new(next);
            *current = Arc::clone(&next);
            let mut revision = self.inner.revision.write();
            *revision += 1;
            (next, *revision, output)
        };

        self.notify(&committed, revision);
        Ok((committed, output))
    }

    /// Writers notify after releasing the state lock, so a slower writer may
    /// get here after a newer revision was published; the watch value never
    /// moves backwards.
    fn notify(&self, state: &Arc<WizardState>, revision: u64) {
        {
            let mut published = self.inner.published.lock();
            if revision > *published {
                *published = revision;
                self.inner.watch_tx.send_replace(Arc::clone(state));
            }
        }
        for listener in self.inner.listeners.snapshot() {
            listener(state);
        }
    }

    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&WizardState) + Send + Sync + 'static,
    {
        self.inner.listeners.add(Arc::new(listener))
    }

    /// Receiver that always holds the latest snapshot
    pub fn watch(&self) -> watch::Receiver<Arc<WizardState>> {
        self.inner.watch_tx.subscribe()
    }

    /// Detach all listeners and refuse further writes
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.listeners.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }
}
