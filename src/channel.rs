//! Bounded single-producer single-consumer channel between pipeline stages.
//!
//! # Design
//!
//! A channel is three parts: the write end ([`Sender`]), the read end
//! ([`Receiver`]), and the shared queue both ends jointly own. Stage code
//! never touches the queue directly; it interacts with its own endpoint,
//! which is what enforces the single-producer / single-consumer discipline.
//!
//! The queue is a `Mutex`-guarded `Vec` with a fixed capacity and two sticky
//! half-close flags (`tx_dead`, `rx_dead`). Either endpoint may close (or be
//! dropped) while the other keeps operating: a producer close still lets the
//! consumer drain every queued value; a consumer close discards queued values
//! and fails the next send.
//!
//! # Key properties
//!
//! - **FIFO**: values arrive in send order, no reordering.
//! - **Batched draining**: the receiver swaps the queue's entire buffer into
//!   a private cache under one lock acquisition, then serves reads from the
//!   cache. The shared mutex is touched at most once per `capacity` reads,
//!   and the swap hands the receiver's spent allocation back to the queue.
//! - **Single-waiter wakeups**: there is at most one blocked thread per side,
//!   so every state change that can unblock the far side signals exactly one
//!   waiter (`notify_one`) on the corresponding condvar.
//!
//! # Wait strategy
//!
//! `send`/`recv` park on a condvar until a predicate over the shared state
//! holds (`len < capacity || rx_dead` for writers, `!is_empty() || tx_dead`
//! for readers). Spurious wakeups are tolerated by the predicate loop. The
//! `try_*` variants never park: they use a non-blocking lock attempt and
//! report contention as [`TrySendError::Busy`] / a transient empty read.
//!
//! Closing the far endpoint is the only cancellation mechanism: it flips a
//! flag under the mutex and wakes the waiter, which re-evaluates its
//! predicate and returns the closed result.

use std::fmt;
use std::mem;

#[cfg(not(loom))]
use std::sync::{Arc, Condvar, Mutex, MutexGuard, TryLockError};

#[cfg(loom)]
use loom::sync::{Arc, Condvar, Mutex, MutexGuard};

/// Creates a bounded SPSC channel with room for `capacity` in-flight values.
///
/// Returns the `(Sender, Receiver)` pair sharing one queue. Both handles are
/// movable but not clonable; the queue is freed when both are dropped.
///
/// # Panics
///
/// Panics if `capacity` is zero.
pub fn bounded<T>(capacity: usize) -> (Sender<T>, Receiver<T>) {
    assert!(capacity >= 1, "channel capacity must be at least 1");

    let shared = Arc::new(Queue::new(capacity));
    (
        Sender {
            shared: Arc::clone(&shared),
            did_close: false,
        },
        Receiver {
            shared,
            cache: Vec::new(),
            did_close: false,
        },
    )
}

// ============================================================================
// Errors
// ============================================================================

/// The channel is closed; the unsent value is handed back.
pub struct SendError<T>(pub T);

impl<T> SendError<T> {
    /// Returns the value that could not be sent.
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> fmt::Debug for SendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SendError(..)")
    }
}

impl<T> fmt::Display for SendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("sending on a closed channel")
    }
}

impl<T> std::error::Error for SendError<T> {}

/// Outcome of a failed [`Sender::try_send`].
pub enum TrySendError<T> {
    /// The lock was contended or the queue is full; retry later.
    Busy(T),
    /// The channel is closed; no send will ever succeed again.
    Closed(T),
}

impl<T> TrySendError<T> {
    /// Returns the value that could not be sent.
    pub fn into_inner(self) -> T {
        match self {
            Self::Busy(value) | Self::Closed(value) => value,
        }
    }

    /// Returns `true` for the terminal [`TrySendError::Closed`] case.
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed(_))
    }
}

impl<T> fmt::Debug for TrySendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Busy(_) => f.write_str("TrySendError::Busy(..)"),
            Self::Closed(_) => f.write_str("TrySendError::Closed(..)"),
        }
    }
}

impl<T> fmt::Display for TrySendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Busy(_) => f.write_str("channel busy or full"),
            Self::Closed(_) => f.write_str("sending on a closed channel"),
        }
    }
}

impl<T> std::error::Error for TrySendError<T> {}

// ============================================================================
// Shared Queue
// ============================================================================

const POISONED: &str = "channel mutex poisoned";

struct Inner<T> {
    data: Vec<T>,
    /// Producer side has closed. Sticky.
    tx_dead: bool,
    /// Consumer side has closed. Sticky.
    rx_dead: bool,
}

/// Shared queue state jointly owned by the two endpoints.
///
/// # Invariants
///
/// - `data.len() <= max_size` whenever the lock is released.
/// - `tx_dead` / `rx_dead` never clear once set.
/// - Exactly one producer and one consumer exist; the endpoint wrappers
///   serialize all access from their side.
struct Queue<T> {
    shared: Mutex<Inner<T>>,
    /// Signaled on push and on producer close; readers wait here.
    data_ready: Condvar,
    /// Signaled on drain and on consumer close; writers wait here.
    space_ready: Condvar,
    max_size: usize,
}

/// Locked view of the queue that signals one waiter on the paired condvar
/// when released, so mutation and wakeup cannot be separated.
struct QueueHandle<'a, T> {
    locked: MutexGuard<'a, Inner<T>>,
    update: &'a Condvar,
}

impl<T> std::ops::Deref for QueueHandle<'_, T> {
    type Target = Inner<T>;

    fn deref(&self) -> &Inner<T> {
        &self.locked
    }
}

impl<T> std::ops::DerefMut for QueueHandle<'_, T> {
    fn deref_mut(&mut self) -> &mut Inner<T> {
        &mut self.locked
    }
}

impl<T> Drop for QueueHandle<'_, T> {
    fn drop(&mut self) {
        self.update.notify_one();
    }
}

#[cfg(not(loom))]
enum TryLockOutcome<'a, T> {
    Ready(QueueHandle<'a, T>),
    /// Lock contended, or no room/value right now.
    Busy,
    /// The far side closed; nothing will change that.
    Closed,
}

impl<T> Queue<T> {
    fn new(max_size: usize) -> Self {
        Self {
            shared: Mutex::new(Inner {
                data: Vec::with_capacity(max_size),
                tx_dead: false,
                rx_dead: false,
            }),
            data_ready: Condvar::new(),
            space_ready: Condvar::new(),
            max_size,
        }
    }

    /// Waits until a value is available or the producer has closed.
    ///
    /// `None` means closed-and-drained: no value will ever arrive again.
    fn read_lock(&self) -> Option<QueueHandle<'_, T>> {
        let mut locked = self.shared.lock().expect(POISONED);
        if locked.rx_dead {
            // Reaching the raw queue after the read side closed is programmer
            // error; the endpoint wrapper checks `did_close` first.
            log::error!("channel: read from a queue whose consumer side is closed");
            return None;
        }

        while locked.data.is_empty() && !locked.tx_dead {
            locked = self.data_ready.wait(locked).expect(POISONED);
        }
        if locked.data.is_empty() {
            return None;
        }
        Some(QueueHandle {
            locked,
            update: &self.space_ready,
        })
    }

    /// Waits until there is room or the consumer has closed.
    ///
    /// `None` means the consumer is gone and the value cannot be delivered.
    fn write_lock(&self) -> Option<QueueHandle<'_, T>> {
        let mut locked = self.shared.lock().expect(POISONED);
        while locked.data.len() >= self.max_size && !locked.rx_dead {
            locked = self.space_ready.wait(locked).expect(POISONED);
        }
        if locked.tx_dead {
            // Programmer error, see read_lock.
            log::error!("channel: write to a queue whose producer side is closed");
            return None;
        }
        if locked.rx_dead {
            return None;
        }
        Some(QueueHandle {
            locked,
            update: &self.data_ready,
        })
    }

    #[cfg(not(loom))]
    fn try_read_lock(&self) -> TryLockOutcome<'_, T> {
        let locked = match self.shared.try_lock() {
            Ok(locked) => locked,
            Err(TryLockError::WouldBlock) => return TryLockOutcome::Busy,
            Err(TryLockError::Poisoned(_)) => panic!("{}", POISONED),
        };
        if locked.rx_dead {
            log::error!("channel: read from a queue whose consumer side is closed");
            return TryLockOutcome::Closed;
        }
        if locked.data.is_empty() {
            return if locked.tx_dead {
                TryLockOutcome::Closed
            } else {
                TryLockOutcome::Busy
            };
        }
        TryLockOutcome::Ready(QueueHandle {
            locked,
            update: &self.space_ready,
        })
    }

    #[cfg(not(loom))]
    fn try_write_lock(&self) -> TryLockOutcome<'_, T> {
        let locked = match self.shared.try_lock() {
            Ok(locked) => locked,
            Err(TryLockError::WouldBlock) => return TryLockOutcome::Busy,
            Err(TryLockError::Poisoned(_)) => panic!("{}", POISONED),
        };
        if locked.tx_dead {
            log::error!("channel: write to a queue whose producer side is closed");
            return TryLockOutcome::Closed;
        }
        if locked.rx_dead {
            return TryLockOutcome::Closed;
        }
        if locked.data.len() >= self.max_size {
            return TryLockOutcome::Busy;
        }
        TryLockOutcome::Ready(QueueHandle {
            locked,
            update: &self.data_ready,
        })
    }

    fn close_tx(&self) {
        self.shared.lock().expect(POISONED).tx_dead = true;
        self.data_ready.notify_one();
    }

    fn close_rx(&self) {
        self.shared.lock().expect(POISONED).rx_dead = true;
        self.space_ready.notify_one();
    }
}

// ============================================================================
// Sender
// ============================================================================

/// Write end of a channel. Movable, not clonable.
///
/// Dropping the sender closes the write side; values already queued remain
/// readable by the receiver.
pub struct Sender<T> {
    shared: Arc<Queue<T>>,
    did_close: bool,
}

impl<T> Sender<T> {
    /// Sends a value, blocking while the queue is full.
    ///
    /// Returns the value back once the receiver has closed; the sender
    /// self-closes in that case, so later calls fail without blocking.
    pub fn send(&mut self, value: T) -> Result<(), SendError<T>> {
        if self.did_close {
            return Err(SendError(value));
        }
        let rejected = match self.shared.write_lock() {
            Some(mut handle) => {
                handle.data.push(value);
                None
            }
            None => Some(value),
        };
        match rejected {
            None => Ok(()),
            Some(value) => {
                self.close();
                Err(SendError(value))
            }
        }
    }

    /// Non-blocking send.
    ///
    /// [`TrySendError::Busy`] covers both a contended lock and a full queue;
    /// the caller retries. [`TrySendError::Closed`] is terminal and
    /// self-closes the sender, exactly like a failed [`Sender::send`].
    #[cfg(not(loom))]
    pub fn try_send(&mut self, value: T) -> Result<(), TrySendError<T>> {
        if self.did_close {
            return Err(TrySendError::Closed(value));
        }
        let rejected = match self.shared.try_write_lock() {
            TryLockOutcome::Ready(mut handle) => {
                handle.data.push(value);
                None
            }
            TryLockOutcome::Busy => return Err(TrySendError::Busy(value)),
            TryLockOutcome::Closed => Some(value),
        };
        match rejected {
            None => Ok(()),
            Some(value) => {
                self.close();
                Err(TrySendError::Closed(value))
            }
        }
    }

    /// Closes the write side. Idempotent.
    ///
    /// Wakes a receiver blocked in [`Receiver::recv`]; it drains whatever is
    /// queued and then observes the close.
    pub fn close(&mut self) {
        if !self.did_close {
            self.shared.close_tx();
            self.did_close = true;
        }
    }

    /// Returns `true` once this side has closed, whether explicitly or by
    /// observing the receiver's close.
    pub fn is_closed(&self) -> bool {
        self.did_close
    }
}

impl<T> Drop for Sender<T> {
    fn drop(&mut self) {
        self.close();
    }
}

// ============================================================================
// Receiver
// ============================================================================

/// Read end of a channel. Movable, not clonable.
///
/// Holds a private drain cache: when the cache runs dry the receiver swaps
/// the queue's whole buffer out under one lock acquisition and serves
/// subsequent reads lock-free.
pub struct Receiver<T> {
    shared: Arc<Queue<T>>,
    /// Drained values in reverse arrival order; `pop()` yields FIFO order.
    cache: Vec<T>,
    did_close: bool,
}

impl<T> Receiver<T> {
    /// Receives the next value in FIFO order, blocking until one arrives.
    ///
    /// Returns `None` only when no further value can ever arrive: the sender
    /// closed and everything queued has been delivered. The receiver
    /// self-closes at that point, so [`Receiver::is_closed`] turns true.
    pub fn recv(&mut self) -> Option<T> {
        if self.did_close {
            return None;
        }
        if self.cache.is_empty() {
            let refilled = match self.shared.read_lock() {
                Some(mut handle) => {
                    refill_cache(&mut self.cache, &mut handle.data);
                    true
                }
                None => false,
            };
            if !refilled {
                self.close();
                return None;
            }
        }
        self.cache.pop()
    }

    /// Non-blocking receive.
    ///
    /// `None` covers both "no value right now" and "closed and drained"; the
    /// two are told apart by [`Receiver::is_closed`] turning true after a
    /// terminal empty.
    #[cfg(not(loom))]
    pub fn try_recv(&mut self) -> Option<T> {
        if self.did_close {
            return None;
        }
        if self.cache.is_empty() {
            let closed = match self.shared.try_read_lock() {
                TryLockOutcome::Ready(mut handle) => {
                    refill_cache(&mut self.cache, &mut handle.data);
                    false
                }
                TryLockOutcome::Busy => false,
                TryLockOutcome::Closed => true,
            };
            if closed {
                self.close();
                return None;
            }
        }
        self.cache.pop()
    }

    /// Closes the read side. Idempotent.
    ///
    /// Values still queued or cached are discarded; a sender blocked in
    /// [`Sender::send`] wakes and fails.
    pub fn close(&mut self) {
        if !self.did_close {
            self.cache.clear();
            self.shared.close_rx();
            self.did_close = true;
        }
    }

    /// Returns `true` once this side has closed, whether explicitly or after
    /// a terminal empty read.
    pub fn is_closed(&self) -> bool {
        self.did_close
    }
}

impl<T> Drop for Receiver<T> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Swaps the queue buffer into the (empty) cache, returning the cache's spent
/// allocation to the queue, then reverses so `pop()` walks FIFO order.
fn refill_cache<T>(cache: &mut Vec<T>, data: &mut Vec<T>) {
    debug_assert!(cache.is_empty());
    mem::swap(data, cache);
    cache.reverse();
}

// ============================================================================
// Tests
// ============================================================================


// ============================================================================
// Loom Tests
// ============================================================================

#[cfg(all(test, loom))]
mod loom_tests {
    use super::*;
    use loom::thread;

    /// Producer sends then closes; consumer must see every value, in order,
    /// then the terminal empty. Loom explores all interleavings.
    #[test]
    fn loom_graceful_close_delivers_all() {
        loom::model(|| {
            let (mut tx, mut rx) = bounded::<u32>(1);

            let producer = thread::spawn(move || {
                assert!(tx.send(1).is_ok());
                assert!(tx.send(2).is_ok());
            });

            let consumer = thread::spawn(move || {
                let mut received = Vec::new();
                while let Some(v) = rx.recv() {
                    received.push(v);
                }
                received
            });

            producer.join().unwrap();
            let received = consumer.join().unwrap();
            assert_eq!(received, vec![1, 2]);
        });
    }

    /// Consumer closes while the producer is mid-stream; the producer must
    /// observe the close in bounded time and self-close.
    #[test]
    fn loom_consumer_close_stops_producer() {
        loom::model(|| {
            let (mut tx, mut rx) = bounded::<u32>(1);

            let producer = thread::spawn(move || {
                let mut sent = 0u32;
                while tx.send(sent).is_ok() {
                    sent += 1;
                }
                assert!(tx.is_closed());
            });

            let consumer = thread::spawn(move || {
                let _ = rx.recv();
                rx.close();
            });

            producer.join().unwrap();
            consumer.join().unwrap();
        });
    }
}
