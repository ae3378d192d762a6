//! Unbounded FIFO with an asynchronous pop.
//!
//! Bridges code that pushes outbound messages whenever they are ready to a
//! transport that pulls the next message from a stream. Any number of
//! producers may push concurrently; exactly one consumer may pop. Two
//! concurrent consumers would race for the single wake-up issued per empty to
//! non-empty transition.
//!
//! Closing the queue ends its stream only after everything already queued
//! has been yielded, so a writer fed by the stream flushes before it stops.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::Stream;
use tokio::sync::Notify;

#[derive(Debug)]
struct State<T> {
    items: VecDeque<T>,
    closed: bool,
    drained: bool,
}

#[derive(Debug)]
struct Inner<T> {
    state: Mutex<State<T>>,
    ready: Notify,
    drained: Notify,
}

/// Cloneable handle to a shared async FIFO queue.
#[derive(Debug)]
pub struct AsyncNotifier<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for AsyncNotifier<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for AsyncNotifier<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> AsyncNotifier<T> {
    /// Creates an empty, open queue.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    items: VecDeque::new(),
                    closed: false,
                    drained: false,
                }),
                ready: Notify::new(),
                drained: Notify::new(),
            }),
        }
    }

    // A panicking producer cannot leave the deque half-updated.
    fn state(&self) -> MutexGuard<'_, State<T>> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends to the tail. Never blocks.
    pub fn push(&self, item: T) {
        let was_empty = {
            let mut state = self.state();
            let was_empty = state.items.is_empty();
            state.items.push_back(item);
            was_empty
        };

        // `notify_one` stores a permit when nobody is waiting yet, so a
        // consumer between its empty check and its await still wakes up.
        if was_empty {
            self.inner.ready.notify_one();
        }
    }

    /// Pops the head without waiting.
    pub fn try_pop(&self) -> Option<T> {
        self.state().items.pop_front()
    }

    /// Pops the head, waiting for a push while the queue is empty.
    ///
    /// Returns immediately without suspending when an item is available.
    /// Ignores [`AsyncNotifier::close`]; use [`AsyncNotifier::recv`] to
    /// observe the end of the queue.
    pub async fn pop(&self) -> T {
        loop {
            if let Some(item) = self.try_pop() {
                return item;
            }
            self.inner.ready.notified().await;
        }
    }

    /// Pops the head, or returns `None` once the queue is closed and empty.
    pub async fn recv(&self) -> Option<T> {
        loop {
            {
                let mut state = self.state();
                if let Some(item) = state.items.pop_front() {
                    return Some(item);
                }
                if state.closed {
                    return None;
                }
            }
            self.inner.ready.notified().await;
        }
    }

    /// Marks the end of the queue.
    ///
    /// Items already queued are still handed out; consumers see the end once
    /// they are gone. Pushes after closing are still delivered if the consumer
    /// has not observed the end yet. Idempotent.
    pub fn close(&self) {
        self.state().closed = true;
        self.inner.ready.notify_one();
    }

    /// Returns true once [`AsyncNotifier::close`] has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state().closed
    }

    /// Resolves once a stream from [`AsyncNotifier::stream`] has ended or
    /// been dropped.
    ///
    /// Never resolves if no stream was ever created.
    pub async fn drained(&self) {
        loop {
            let notified = self.inner.drained.notified();
            if self.state().drained {
                return;
            }
            notified.await;
        }
    }

    /// Number of queued items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state().items.len()
    }

    /// Returns true when nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state().items.is_empty()
    }
}

/// Flags the queue as drained when the consuming stream goes away.
struct DrainGuard<T> {
    queue: AsyncNotifier<T>,
}

impl<T> Drop for DrainGuard<T> {
    fn drop(&mut self) {
        self.queue.state().drained = true;
        self.queue.inner.drained.notify_waiters();
    }
}

impl<T: Send + 'static> AsyncNotifier<T> {
    /// Stream of popped items, in push order.
    ///
    /// The stream ends after [`AsyncNotifier::close`], once every item queued
    /// before the close has been yielded. Until then it never ends on its own.
    pub fn stream(&self) -> impl Stream<Item = T> + Send + 'static {
        let guard = DrainGuard { queue: self.clone() };
        futures::stream::unfold(guard, |guard| async move {
            let item = guard.queue.recv().await?;
            Some((item, guard))
        })
    }
}
