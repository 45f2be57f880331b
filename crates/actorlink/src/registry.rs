//! # Subscription Registry
//!
//! Per-handle routing of inbound events, by event name, to one of two delivery modes:
//!
//! - **Callback**: an ordered list of callbacks, all invoked in registration order for every
//!   matching event, on the task that dispatches inbound frames.
//! - **Queue**: events are appended to a FIFO owned by that name and taken out by
//!   [`Registry::receive`]. Receiving across names merges the FIFOs in arrival order.
//!
//! A name uses one mode for the lifetime of the handle. Events for names with no
//! subscription are dropped; nothing is buffered for a subscription that does not exist yet.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde_json::Value;
use tokio::sync::Notify;

use crate::error::Error;
use crate::error::Result;

/// Callback invoked with the payload of each matching event.
pub type EventCallback = dyn Fn(&Value) + Send + Sync;

/// An event taken out of a queue-mode subscription.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub name: String,
    pub payload: Value,
}

/// What happened to one inbound event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivered {
    /// Handed to this many callbacks.
    Callbacks(usize),
    /// Appended to the receive queue.
    Queued,
    /// The queue was at capacity; the event was dropped.
    Overflow,
    /// No subscription for the name; the event was dropped.
    NoSubscriber,
    /// The registry was closed; the event was dropped.
    Closed,
}

enum Delivery {
    Callbacks(Vec<Arc<EventCallback>>),
    Queue,
}

struct EventQueues {
    /// One FIFO per queue-mode name. Entries carry their arrival sequence number.
    by_name: HashMap<String, VecDeque<(u64, Event)>>,
    next_seq: u64,
    /// Set once the handle's connection is gone. Pending receivers fail with this.
    closed: Option<Error>,
}

impl EventQueues {
    fn len(&self, name: Option<&str>) -> usize {
        match name {
            Some(name) => self.by_name.get(name).map_or(0, VecDeque::len),
            None => self.by_name.values().map(VecDeque::len).sum(),
        }
    }

    /// Removes the oldest `count` events for `name` (or across all names), if that many are
    /// present.
    fn take(&mut self, name: Option<&str>, count: usize) -> Option<Vec<Event>> {
        if self.len(name) < count {
            return None;
        }

        if let Some(name) = name {
            let queue = self.by_name.get_mut(name)?;
            return Some(queue.drain(..count).map(|(_, event)| event).collect());
        }

        let mut taken = Vec::with_capacity(count);
        while taken.len() < count {
            let oldest = self
                .by_name
                .values_mut()
                .filter(|queue| !queue.is_empty())
                .min_by_key(|queue| queue.front().map(|(seq, _)| *seq))?;
            let (_, event) = oldest.pop_front()?;
            taken.push(event);
        }
        Some(taken)
    }
}

pub(crate) struct Registry {
    subscriptions: DashMap<String, Delivery>,
    queues: Mutex<EventQueues>,
    arrived: Notify,
    capacity: Option<usize>,
}

impl Registry {
    pub(crate) fn new(capacity: Option<usize>) -> Self {
        Self {
            subscriptions: DashMap::new(),
            queues: Mutex::new(EventQueues {
                by_name: HashMap::new(),
                next_seq: 0,
                closed: None,
            }),
            arrived: Notify::new(),
            capacity,
        }
    }

    fn lock_queues(&self) -> MutexGuard<'_, EventQueues> {
        self.queues.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_open(&self) -> Result<()> {
        match &self.lock_queues().closed {
            Some(reason) => Err(reason.clone()),
            None => Ok(()),
        }
    }

    /// Appends a callback for `name`.
    ///
    /// Returns `true` if this created the subscription for `name`.
    pub(crate) fn register_callback(&self, name: &str, callback: Arc<EventCallback>) -> Result<bool> {
        self.ensure_open()?;

        match self.subscriptions.entry(name.to_string()) {
            Entry::Occupied(mut entry) => match entry.get_mut() {
                Delivery::Callbacks(callbacks) => {
                    callbacks.push(callback);
                    Ok(false)
                }
                Delivery::Queue => Err(Error::SubscriptionConflict(name.to_string())),
            },
            Entry::Vacant(entry) => {
                entry.insert(Delivery::Callbacks(vec![callback]));
                Ok(true)
            }
        }
    }

    /// Activates queue delivery for `name`. Subscribing twice is a no-op.
    ///
    /// Returns `true` if this created the subscription for `name`.
    pub(crate) fn subscribe(&self, name: &str) -> Result<bool> {
        self.ensure_open()?;

        match self.subscriptions.entry(name.to_string()) {
            Entry::Occupied(entry) => match entry.get() {
                Delivery::Queue => Ok(false),
                Delivery::Callbacks(_) => Err(Error::SubscriptionConflict(name.to_string())),
            },
            Entry::Vacant(entry) => {
                self.lock_queues().by_name.entry(name.to_string()).or_default();
                entry.insert(Delivery::Queue);
                Ok(true)
            }
        }
    }

    /// Routes one inbound event.
    pub(crate) fn deliver(&self, name: &str, payload: Value) -> Delivered {
        // Clone the callback list so none of them runs under the map's shard lock.
        let callbacks = match self.subscriptions.get(name).as_deref() {
            None => return Delivered::NoSubscriber,
            Some(Delivery::Callbacks(callbacks)) => callbacks.clone(),
            Some(Delivery::Queue) => return self.enqueue(name, payload),
        };

        for callback in &callbacks {
            let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| callback(&payload)));
            if outcome.is_err() {
                tracing::warn!(event = name, "event callback panicked");
            }
        }
        Delivered::Callbacks(callbacks.len())
    }

    fn enqueue(&self, name: &str, payload: Value) -> Delivered {
        {
            let mut queues = self.lock_queues();
            if queues.closed.is_some() {
                return Delivered::Closed;
            }

            let seq = queues.next_seq;
            let queue = queues.by_name.entry(name.to_string()).or_default();
            if self.capacity.is_some_and(|cap| queue.len() >= cap) {
                tracing::warn!(event = name, capacity = ?self.capacity, "event queue full, dropping event");
                return Delivered::Overflow;
            }
            queue.push_back((
                seq,
                Event {
                    name: name.to_string(),
                    payload,
                },
            ));
            queues.next_seq += 1;
        }

        self.arrived.notify_waiters();
        Delivered::Queued
    }

    /// Waits until `count` events matching `name` (any queue-mode name if `None`) are queued,
    /// then removes and returns them in arrival order.
    pub(crate) async fn receive(&self, name: Option<&str>, count: usize) -> Result<Vec<Event>> {
        self.check_receivable(name, count)?;

        loop {
            // Register interest before inspecting the queue so an event that lands in between
            // still wakes us.
            let notified = self.arrived.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut queues = self.lock_queues();
                if let Some(events) = queues.take(name, count) {
                    return Ok(events);
                }
                if let Some(reason) = &queues.closed {
                    return Err(reason.clone());
                }
            }

            notified.await;
        }
    }

    fn check_receivable(&self, name: Option<&str>, count: usize) -> Result<()> {
        let queues = match name {
            Some(name) => {
                let queued = matches!(self.subscriptions.get(name).as_deref(), Some(Delivery::Queue));
                usize::from(queued)
            }
            None => self
                .subscriptions
                .iter()
                .filter(|entry| matches!(entry.value(), Delivery::Queue))
                .count(),
        };

        if queues == 0 {
            // A closed registry reports its close reason rather than a missing subscription.
            self.ensure_open()?;
            return Err(Error::NotSubscribed(name.unwrap_or("*").to_string()));
        }

        // Bounded queues could never hold that many events at once.
        if let Some(cap) = self.capacity {
            if count > cap.saturating_mul(queues) {
                return Err(Error::Config(format!(
                    "receive of {} events exceeds event_queue_capacity {}",
                    count, cap
                )));
            }
        }

        Ok(())
    }

    /// Number of undelivered queue-mode events matching `name`.
    pub(crate) fn queued(&self, name: Option<&str>) -> usize {
        self.lock_queues().len(name)
    }

    /// Drops the subscription for `name` and anything queued for it.
    pub(crate) fn remove(&self, name: &str) {
        self.subscriptions.remove(name);
        self.lock_queues().by_name.remove(name);
    }

    /// Stops delivery and wakes every pending receiver with `reason`.
    ///
    /// With `discard`, queued events and all subscriptions are dropped as well.
    pub(crate) fn close(&self, reason: Error, discard: bool) {
        {
            let mut queues = self.lock_queues();
            if queues.closed.is_none() {
                queues.closed = Some(reason);
            }
            if discard {
                queues.by_name.clear();
            }
        }

        if discard {
            self.subscriptions.clear();
        }
        self.arrived.notify_waiters();
    }
}
