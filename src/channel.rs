//! Completion channels
//!
//! One channel per worker thread: any number of completion threads push
//! finished, heap-owned continuations; only the owning worker pops. The
//! push is a release operation and the pop an acquire operation (the
//! underlying `crossbeam` channel provides the handoff), so every write
//! performed while constructing a deep-copied continuation is visible to
//! the popping thread; no other synchronization guards a continuation's
//! fields once ownership has moved.
//!
//! Ownership transfers atomically at `push`: the pushing side hands over
//! the `Box` and must not touch the continuation again.

use crossbeam::channel::{unbounded, Receiver, Sender};

/// Sending half of a completion channel.
///
/// Cheap to clone; a clone is stored inside each in-flight continuation so
/// the completion thread knows where to deliver it.
pub struct CompletionSender<T> {
    tx: Sender<Box<T>>,
}

impl<T> Clone for CompletionSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T: Send> CompletionSender<T> {
    /// Push a completed continuation; callable from any thread.
    ///
    /// Returns `false` if the owning side has already gone away, in which
    /// case the continuation is dropped here and its resources released.
    pub fn push(&self, completed: Box<T>) -> bool {
        self.tx.send(completed).is_ok()
    }
}

impl<T> std::fmt::Debug for CompletionSender<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionSender").finish_non_exhaustive()
    }
}

/// A per-worker queue of completed continuations.
///
/// The popping methods must only be called by the owning worker thread;
/// the channel is deliberately not cloneable so a second consumer cannot
/// appear by accident.
pub struct CompletionChannel<T> {
    tx: Sender<Box<T>>,
    rx: Receiver<Box<T>>,
}

impl<T: Send> CompletionChannel<T> {
    /// Create a new, empty channel.
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self { tx, rx }
    }

    /// Create a sender that completion threads can hold.
    pub fn sender(&self) -> CompletionSender<T> {
        CompletionSender {
            tx: self.tx.clone(),
        }
    }

    /// Pop one completed continuation, if any; owning thread only.
    pub fn try_pop(&self) -> Option<Box<T>> {
        self.rx.try_recv().ok()
    }

    /// Check whether the channel is currently empty.
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Number of queued continuations.
    pub fn len(&self) -> usize {
        self.rx.len()
    }
}

impl<T: Send> Default for CompletionChannel<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for CompletionChannel<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionChannel")
            .field("len", &self.rx.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::thread;

    #[test]
    fn test_push_then_pop() {
        let channel = CompletionChannel::<u64>::new();
        assert!(channel.is_empty());

        channel.sender().push(Box::new(7));
        assert_eq!(channel.len(), 1);

        assert_eq!(channel.try_pop().as_deref(), Some(&7));
        assert!(channel.try_pop().is_none());
        assert!(channel.is_empty());
    }

    #[test]
    fn test_push_after_owner_gone() {
        let channel = CompletionChannel::<u64>::new();
        let sender = channel.sender();
        drop(channel);
        assert!(!sender.push(Box::new(1)));
    }

    #[test]
    fn test_concurrent_pushers_exactly_once_delivery() {
        const PUSHERS: u64 = 8;
        const PER_PUSHER: u64 = 1000;

        let channel = CompletionChannel::<u64>::new();

        let handles: Vec<_> = (0..PUSHERS)
            .map(|p| {
                let sender = channel.sender();
                thread::spawn(move || {
                    for i in 0..PER_PUSHER {
                        assert!(sender.push(Box::new(p * PER_PUSHER + i)));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        // Every pushed value observed by exactly one pop: no loss, no duplication.
        let mut seen = HashSet::new();
        while let Some(value) = channel.try_pop() {
            assert!(seen.insert(*value));
        }
        assert_eq!(seen.len(), (PUSHERS * PER_PUSHER) as usize);
        assert!(channel.is_empty());
    }
}
