//! Per-device request queue
//!
//! Serialises access to one device so that at most one request is outstanding
//! against it, while bounding memory use when several flow nodes share the
//! device.
//!
//! # Dispatch model
//!
//! - [`RequestQueue::add`] appends an entry. If the queue was idle the entry
//!   becomes current and its callback runs before `add` returns.
//! - The callback receives the payload and a [`Completion`] token bound to the
//!   entry. Completing the token (or calling [`RequestQueue::done`]) releases
//!   the slot after an optional delay and dispatches the next entry.
//! - A token that is dropped without being completed releases the slot
//!   immediately and logs a warning, so a forgotten completion cannot stall
//!   the queue.
//!
//! Callbacks are invoked with no lock held; they may call back into the queue.

use crate::types::NodeId;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Default number of entries a device queue holds, including the in-flight one
pub const DEFAULT_QUEUE_CAPACITY: usize = 50;

/// Delay before releasing the slot after a failed request
pub const FAILURE_RELEASE_DELAY: Duration = Duration::from_millis(50);

/// Position returned by `add` when the entry was rejected
pub const REJECTED_POSITION: i64 = -1;

/// Callback that performs a dispatched request
pub type DispatchFn<P> = Box<dyn FnOnce(P, Completion<P>) + Send + 'static>;

/// What to do when an entry arrives at a full queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[non_exhaustive]
pub enum OverflowPolicy {
    /// Drop the new entry
    #[default]
    RejectNew,
    /// Drop the oldest waiting entry to make room
    DropOldest,
}

/// Result of [`RequestQueue::add`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// The entry is in flight now
    Dispatched,
    /// The entry waits behind `position - 1` others and the in-flight one
    Queued { position: usize },
    /// The queue was full; the callback will never run
    Rejected,
}

impl AddOutcome {
    /// Integer form: 0 when dispatched, the position when queued, negative when rejected
    pub fn position(&self) -> i64 {
        match self {
            AddOutcome::Dispatched => 0,
            AddOutcome::Queued { position } => *position as i64,
            AddOutcome::Rejected => REJECTED_POSITION,
        }
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, AddOutcome::Rejected)
    }
}

/// The in-flight entry, as seen by [`RequestQueue::current_message`]
#[derive(Debug, Clone, PartialEq)]
pub struct CurrentEntry<P> {
    pub owner: NodeId,
    pub payload: P,
}

struct QueueEntry<P>
where
    P: Clone + Send + 'static,
{
    payload: P,
    owner: NodeId,
    dispatch: Option<DispatchFn<P>>,
    enqueued_at: Instant,
}

struct QueueInner<P>
where
    P: Clone + Send + 'static,
{
    entries: VecDeque<QueueEntry<P>>,
    /// Ticket of the front entry while it is in flight
    in_flight: Option<u64>,
    next_ticket: u64,
}

/// A dispatch that has to run once the lock is released
struct Ready<P>
where
    P: Clone + Send + 'static,
{
    payload: P,
    dispatch: DispatchFn<P>,
    ticket: u64,
}

/// Bounded FIFO with a single in-flight entry
pub struct RequestQueue<P>
where
    P: Clone + Send + 'static,
{
    capacity: usize,
    policy: OverflowPolicy,
    inner: Mutex<QueueInner<P>>,
}

impl<P> RequestQueue<P>
where
    P: Clone + Send + 'static,
{
    /// Create a queue; a capacity of zero is raised to one
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Arc<Self> {
        Arc::new(Self {
            capacity: capacity.max(1),
            policy,
            inner: Mutex::new(QueueInner {
                entries: VecDeque::new(),
                in_flight: None,
                next_ticket: 0,
            }),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    /// Append an entry, dispatching it at once if the queue is idle
    pub fn add<F>(self: &Arc<Self>, payload: P, owner: NodeId, callback: F) -> AddOutcome
    where
        F: FnOnce(P, Completion<P>) + Send + 'static,
    {
        let entry = QueueEntry {
            payload,
            owner,
            dispatch: Some(Box::new(callback)),
            enqueued_at: Instant::now(),
        };

        let (outcome, ready) = {
            let mut inner = self.lock();

            if inner.entries.len() >= self.capacity {
                match self.policy {
                    OverflowPolicy::RejectNew => {
                        tracing::warn!(
                            "Request from {} rejected, queue is full ({} entries)",
                            entry.owner,
                            self.capacity
                        );
                        return AddOutcome::Rejected;
                    }
                    OverflowPolicy::DropOldest => {
                        let oldest_waiting = if inner.in_flight.is_some() { 1 } else { 0 };
                        match inner.entries.remove(oldest_waiting) {
                            Some(dropped) => {
                                tracing::warn!(
                                    "Queue full, dropped request from {} queued {:?} ago",
                                    dropped.owner,
                                    dropped.enqueued_at.elapsed()
                                );
                            }
                            None => {
                                tracing::warn!(
                                    "Request from {} rejected, nothing waiting to drop",
                                    entry.owner
                                );
                                return AddOutcome::Rejected;
                            }
                        }
                    }
                }
            }

            inner.entries.push_back(entry);

            if inner.in_flight.is_none() {
                (AddOutcome::Dispatched, Self::begin_front(&mut inner))
            } else {
                let position = inner.entries.len() - 1;
                tracing::debug!("Request queued at position {}", position);
                (AddOutcome::Queued { position }, None)
            }
        };

        if let Some(ready) = ready {
            self.run(ready);
        }
        outcome
    }

    /// The in-flight entry, or `None` when idle
    pub fn current_message(&self) -> Option<CurrentEntry<P>> {
        let inner = self.lock();
        inner.in_flight?;
        inner.entries.front().map(|entry| CurrentEntry {
            owner: entry.owner.clone(),
            payload: entry.payload.clone(),
        })
    }

    /// Owner of the in-flight entry
    pub fn current_owner(&self) -> Option<NodeId> {
        let inner = self.lock();
        inner.in_flight?;
        inner.entries.front().map(|entry| entry.owner.clone())
    }

    /// Release the in-flight entry after `delay` and dispatch the next one
    ///
    /// Returns the number of entries still waiting behind the new in-flight
    /// entry. Must be called exactly once per dispatched entry; prefer
    /// [`Completion::done`], which enforces that.
    pub async fn done(self: &Arc<Self>, delay: Duration) -> usize {
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.release(None)
    }

    /// Discard every waiting entry; the in-flight one cannot be cancelled
    ///
    /// Returns the number of discarded entries.
    pub fn dump(&self) -> usize {
        let mut inner = self.lock();
        let keep = if inner.in_flight.is_some() { 1 } else { 0 };
        let dropped = inner.entries.len().saturating_sub(keep);
        inner.entries.truncate(keep);
        if dropped > 0 {
            tracing::debug!("Dumped {} queued requests", dropped);
        }
        dropped
    }

    /// Discard the waiting entries of one owner
    pub fn dump_owner(&self, owner: &NodeId) -> usize {
        let mut inner = self.lock();
        let skip = if inner.in_flight.is_some() { 1 } else { 0 };
        let before = inner.entries.len();
        let mut index = 0;
        inner.entries.retain(|entry| {
            let keep = index < skip || entry.owner != *owner;
            index += 1;
            keep
        });
        let dropped = before - inner.entries.len();
        if dropped > 0 {
            tracing::debug!("Dumped {} queued requests from {}", dropped, owner);
        }
        dropped
    }

    /// Entries held, including the in-flight one
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// Entries waiting behind the in-flight one
    pub fn waiting(&self) -> usize {
        let inner = self.lock();
        let in_flight = if inner.in_flight.is_some() { 1 } else { 0 };
        inner.entries.len().saturating_sub(in_flight)
    }

    /// Whether nothing is in flight
    pub fn is_idle(&self) -> bool {
        self.lock().in_flight.is_none()
    }

    /// Pop the current entry (if `ticket` still matches) and start the next one
    fn release(self: &Arc<Self>, ticket: Option<u64>) -> usize {
        let (waiting, ready) = {
            let mut inner = self.lock();
            match (inner.in_flight, ticket) {
                (None, _) => {
                    tracing::warn!("Queue released with nothing in flight");
                    return inner.entries.len();
                }
                (Some(current), Some(expected)) if current != expected => {
                    tracing::debug!("Ignoring completion for a request that is no longer current");
                    return inner.entries.len().saturating_sub(1);
                }
                _ => {}
            }

            inner.entries.pop_front();
            inner.in_flight = None;
            let ready = Self::begin_front(&mut inner);
            let in_flight = if inner.in_flight.is_some() { 1 } else { 0 };
            (inner.entries.len() - in_flight, ready)
        };

        if let Some(ready) = ready {
            self.run(ready);
        }
        waiting
    }

    /// Mark the front entry as in flight and take its callback
    fn begin_front(inner: &mut QueueInner<P>) -> Option<Ready<P>> {
        let ticket = inner.next_ticket;
        let entry = inner.entries.front_mut()?;
        let dispatch = entry.dispatch.take()?;
        let payload = entry.payload.clone();
        inner.next_ticket = inner.next_ticket.wrapping_add(1);
        inner.in_flight = Some(ticket);
        Some(Ready {
            payload,
            dispatch,
            ticket,
        })
    }

    fn run(self: &Arc<Self>, ready: Ready<P>) {
        let completion = Completion {
            queue: Arc::clone(self),
            ticket: ready.ticket,
            finished: false,
        };
        (ready.dispatch)(ready.payload, completion);
    }

    fn lock(&self) -> MutexGuard<'_, QueueInner<P>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<P> fmt::Debug for RequestQueue<P>
where
    P: Clone + Send + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("RequestQueue")
            .field("capacity", &self.capacity)
            .field("policy", &self.policy)
            .field("len", &inner.entries.len())
            .field("in_flight", &inner.in_flight.is_some())
            .finish()
    }
}

/// Token handed to a dispatched callback
///
/// Completing it releases the queue slot exactly once.
#[must_use = "the queue stays blocked until the completion is done or dropped"]
pub struct Completion<P>
where
    P: Clone + Send + 'static,
{
    queue: Arc<RequestQueue<P>>,
    ticket: u64,
    finished: bool,
}

impl<P> Completion<P>
where
    P: Clone + Send + 'static,
{
    /// Release the slot after `delay`; returns the number of waiting entries
    pub async fn done(self, delay: Duration) -> usize {
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.release()
    }

    /// Release the slot now, without a delay
    pub fn release(mut self) -> usize {
        self.finished = true;
        self.queue.release(Some(self.ticket))
    }

    /// Release the slot after a success
    pub async fn success(self) -> usize {
        self.done(Duration::ZERO).await
    }

    /// Release the slot after a failure, waiting [`FAILURE_RELEASE_DELAY`]
    pub async fn failure(self) -> usize {
        self.done(FAILURE_RELEASE_DELAY).await
    }
}

impl<P> Drop for Completion<P>
where
    P: Clone + Send + 'static,
{
    fn drop(&mut self) {
        if !self.finished {
            tracing::warn!("Request completion dropped without being marked done");
            self.queue.release(Some(self.ticket));
        }
    }
}

impl<P> fmt::Debug for Completion<P>
where
    P: Clone + Send + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("ticket", &self.ticket)
            .field("finished", &self.finished)
            .finish()
    }
}
