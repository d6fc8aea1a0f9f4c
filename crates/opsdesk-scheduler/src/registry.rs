//! In-process timer registry: at most one live timer per definition ID.
//!
//! Each timer is a Tokio task that sleeps until its fire time and then runs
//! its callback. Registering an ID that already has a pending timer aborts
//! the old task first. A timer whose callback is already running is never
//! aborted; the registry only forgets it, and the callback can tell through
//! its [`TimerTicket`] whether it is still the current registration.

use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::clock::Clock;

/// Identifies one registration of a timer. Handed to the callback when it fires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerTicket {
    pub id: String,
    pub generation: u64,
}

/// Snapshot of a registered timer for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct TimerInfo {
    pub id: String,
    pub fire_at: DateTime<Utc>,
    /// True while the callback is executing.
    pub running: bool,
}

struct TimerSlot {
    generation: u64,
    fire_at: DateTime<Utc>,
    running: bool,
    handle: JoinHandle<()>,
}

struct Inner {
    slots: Mutex<HashMap<String, TimerSlot>>,
    next_generation: AtomicU64,
    clock: Arc<dyn Clock>,
}

/// Cheaply cloneable handle; all clones share the same timers.
#[derive(Clone)]
pub struct TimerRegistry {
    inner: Arc<Inner>,
}

impl TimerRegistry {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(Inner {
                slots: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(1),
                clock,
            }),
        }
    }

    /// Install a timer for `id` firing at `fire_at`, replacing any existing one.
    ///
    /// A `fire_at` in the past fires immediately. Must be called from within
    /// a Tokio runtime.
    pub fn register<F, Fut>(&self, id: &str, fire_at: DateTime<Utc>, callback: F) -> TimerTicket
    where
        F: FnOnce(TimerTicket) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut slots = self.lock();
        self.install(&mut slots, id, fire_at, callback)
    }

    /// Replace the timer that fired as `ticket` with a new one, but only if
    /// that registration is still current. Returns `None` when the timer was
    /// unregistered or re-registered while its callback ran.
    pub fn reschedule<F, Fut>(
        &self,
        ticket: &TimerTicket,
        fire_at: DateTime<Utc>,
        callback: F,
    ) -> Option<TimerTicket>
    where
        F: FnOnce(TimerTicket) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut slots = self.lock();
        let current = slots
            .get(&ticket.id)
            .is_some_and(|slot| slot.generation == ticket.generation);
        if !current {
            debug!(timer_id = %ticket.id, "stale timer ticket; reschedule ignored");
            return None;
        }
        Some(self.install(&mut slots, &ticket.id, fire_at, callback))
    }

    /// Cancel and remove the timer for `id`. Returns whether one existed.
    pub fn unregister(&self, id: &str) -> bool {
        let removed = self.lock().remove(id);
        match removed {
            Some(slot) => {
                if !slot.running {
                    slot.handle.abort();
                }
                debug!(timer_id = %id, "timer unregistered");
                true
            }
            None => false,
        }
    }

    /// IDs with a live timer (pending or currently running).
    pub fn registered_ids(&self) -> BTreeSet<String> {
        self.lock().keys().cloned().collect()
    }

    /// Fire time of the timer registered for `id`, if any.
    pub fn fire_at(&self, id: &str) -> Option<DateTime<Utc>> {
        self.lock().get(id).map(|slot| slot.fire_at)
    }

    pub fn snapshot(&self) -> Vec<TimerInfo> {
        let mut timers: Vec<TimerInfo> = self
            .lock()
            .iter()
            .map(|(id, slot)| TimerInfo {
                id: id.clone(),
                fire_at: slot.fire_at,
                running: slot.running,
            })
            .collect();
        timers.sort_by(|a, b| a.fire_at.cmp(&b.fire_at).then_with(|| a.id.cmp(&b.id)));
        timers
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Abort every pending timer and forget all registrations.
    pub fn clear(&self) {
        let drained: Vec<TimerSlot> = self.lock().drain().map(|(_, slot)| slot).collect();
        for slot in drained {
            if !slot.running {
                slot.handle.abort();
            }
        }
    }

    // --- private helpers ---------------------------------------------------

    fn lock(&self) -> MutexGuard<'_, HashMap<String, TimerSlot>> {
        // Slot bookkeeping stays consistent even if a holder panicked.
        self.inner.slots.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Spawn the timer task and record it. The caller holds the slot lock, so
    /// the task cannot observe the map before its own slot is inserted.
    fn install<F, Fut>(
        &self,
        slots: &mut HashMap<String, TimerSlot>,
        id: &str,
        fire_at: DateTime<Utc>,
        callback: F,
    ) -> TimerTicket
    where
        F: FnOnce(TimerTicket) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let ticket = TimerTicket {
            id: id.to_string(),
            generation,
        };

        let delay = (fire_at - self.inner.clock.now())
            .to_std()
            .unwrap_or(std::time::Duration::ZERO);
        let registry = self.clone();
        let task_ticket = ticket.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if !registry.claim(&task_ticket) {
                return;
            }
            callback(task_ticket.clone()).await;
            registry.release(&task_ticket);
        });

        if let Some(previous) = slots.insert(
            id.to_string(),
            TimerSlot {
                generation,
                fire_at,
                running: false,
                handle,
            },
        ) {
            if !previous.running {
                previous.handle.abort();
            }
        }
        debug!(timer_id = %id, %fire_at, generation, "timer registered");
        ticket
    }

    /// Mark the slot as running if `ticket` is still current.
    fn claim(&self, ticket: &TimerTicket) -> bool {
        match self.lock().get_mut(&ticket.id) {
            Some(slot) if slot.generation == ticket.generation => {
                slot.running = true;
                true
            }
            _ => false,
        }
    }

    /// Drop the slot after its callback finished without rescheduling.
    fn release(&self, ticket: &TimerTicket) {
        let mut slots = self.lock();
        if slots
            .get(&ticket.id)
            .is_some_and(|slot| slot.generation == ticket.generation)
        {
            slots.remove(&ticket.id);
        }
    }
}
