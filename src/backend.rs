//! I/O backends
//!
//! A backend accepts a stack-resident continuation and either completes the
//! operation synchronously or takes responsibility for completing it later.
//! The submit contract is the heart of the suspension protocol:
//!
//! - `CompletedSync(status)`: the operation finished inside the call. No
//!   deep copy happened and no allocation was performed; the caller still
//!   owns the stack context, buffer and caller chain included.
//! - `Pending`: the backend deep-copied the continuation *before* submit
//!   returned and owns the heap copy. The caller's stack context is dead
//!   weight after this (its buffer has been moved out) and may be dropped
//!   freely. The copy arrives later on the continuation's completion
//!   channel, exactly once.
//!
//! A deep-copy failure inside submit is reported as
//! `CompletedSync(OutOfMemory)` with the source context left intact, so the
//! caller can release its resources normally.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread;

use crossbeam::channel::{unbounded, Sender};
use parking_lot::Mutex;

use crate::address::Address;
use crate::hash_bucket::HashBucketEntry;
use crate::io_context::{AsyncIndexIoContext, AsyncIoContext};
use crate::key_hash::KeyHash;
use crate::status::Status;

/// Outcome of submitting an operation to a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    /// The operation completed inside the submit call with this status.
    CompletedSync(Status),
    /// The operation will complete later; the backend owns a deep copy and
    /// will deliver it on the continuation's completion channel.
    Pending,
}

/// A sink for record reads and cold-index fetches.
pub trait IoBackend: Send + Sync {
    /// Submit a record read at `ctx.address` into `ctx`'s pinned buffer.
    fn submit_record_read(&self, ctx: &mut AsyncIoContext) -> Submission;

    /// Submit a cold-index fetch for `ctx.hash`.
    fn submit_index_read(&self, ctx: &mut AsyncIndexIoContext) -> Submission;
}

/// Backend that completes every operation synchronously.
///
/// Record reads succeed with a zeroed buffer; index fetches find nothing.
/// Useful as a lower bound for the completion protocol and in tests that
/// exercise the synchronous path.
#[derive(Debug, Default)]
pub struct NullBackend;

impl NullBackend {
    /// Create a null backend.
    pub fn new() -> Self {
        Self
    }
}

impl IoBackend for NullBackend {
    fn submit_record_read(&self, ctx: &mut AsyncIoContext) -> Submission {
        if let Some(record) = ctx.record_mut() {
            record.as_mut_slice().fill(0);
        }
        Submission::CompletedSync(Status::Ok)
    }

    fn submit_index_read(&self, ctx: &mut AsyncIndexIoContext) -> Submission {
        ctx.set_index_entry(HashBucketEntry::INVALID, Address::INVALID);
        Submission::CompletedSync(Status::NotFound)
    }
}

enum Request {
    Record(Box<AsyncIoContext>),
    Index(Box<AsyncIndexIoContext>),
    Shutdown,
}

struct DeferredState {
    records: Mutex<HashMap<u64, Vec<u8>>>,
    entries: Mutex<HashMap<u64, (HashBucketEntry, Address)>>,
}

impl DeferredState {
    fn serve_record(&self, mut ctx: Box<AsyncIoContext>) {
        let status = {
            let records = self.records.lock();
            match records.get(&ctx.address.control()) {
                Some(bytes) => match ctx.record_mut() {
                    Some(record) if record.len() >= bytes.len() => {
                        record.as_mut_slice()[..bytes.len()].copy_from_slice(bytes);
                        Status::Ok
                    }
                    Some(_) => Status::Corruption,
                    None => Status::IoError,
                },
                None => Status::NotFound,
            }
        };

        if tracing::enabled!(tracing::Level::TRACE) {
            tracing::trace!(
                io_id = ctx.io_id,
                address = ctx.address.control(),
                status = status.as_str(),
                "record read served"
            );
        }
        let _ = ctx.complete(status);
    }

    fn serve_index(&self, mut ctx: Box<AsyncIndexIoContext>) {
        let status = {
            let entries = self.entries.lock();
            match entries.get(&ctx.hash.control()) {
                Some(&(entry, record_address)) => {
                    ctx.set_index_entry(entry, record_address);
                    Status::Ok
                }
                None => {
                    ctx.set_index_entry(HashBucketEntry::INVALID, Address::INVALID);
                    Status::NotFound
                }
            }
        };

        if tracing::enabled!(tracing::Level::TRACE) {
            tracing::trace!(
                io_id = ctx.io_id,
                hash = ctx.hash.control(),
                status = status.as_str(),
                "index fetch served"
            );
        }
        let _ = ctx.complete(status);
    }
}

/// Backend that defers every operation to a worker thread.
///
/// Operations are served from in-memory tables populated through
/// [`insert_record`](DeferredBackend::insert_record) and
/// [`insert_entry`](DeferredBackend::insert_entry). Every submit returns
/// `Pending`, which makes this backend the reference exerciser for the
/// deep-copy and completion-channel protocol.
pub struct DeferredBackend {
    state: Arc<DeferredState>,
    tx: Sender<Request>,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
}

impl DeferredBackend {
    /// Create a deferred backend with an empty store and a running worker.
    pub fn new() -> Self {
        let state = Arc::new(DeferredState {
            records: Mutex::new(HashMap::new()),
            entries: Mutex::new(HashMap::new()),
        });

        let (tx, rx) = unbounded::<Request>();
        let worker_state = Arc::clone(&state);
        let worker = thread::spawn(move || {
            while let Ok(request) = rx.recv() {
                match request {
                    Request::Record(ctx) => worker_state.serve_record(ctx),
                    Request::Index(ctx) => worker_state.serve_index(ctx),
                    Request::Shutdown => break,
                }
            }
        });

        Self {
            state,
            tx,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Store record bytes at a logical address.
    pub fn insert_record(&self, address: Address, bytes: Vec<u8>) {
        self.state.records.lock().insert(address.control(), bytes);
    }

    /// Store a cold-index entry for a key hash.
    pub fn insert_entry(&self, hash: KeyHash, entry: HashBucketEntry, record_address: Address) {
        self.state
            .entries
            .lock()
            .insert(hash.control(), (entry, record_address));
    }
}

impl Default for DeferredBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl IoBackend for DeferredBackend {
    fn submit_record_read(&self, ctx: &mut AsyncIoContext) -> Submission {
        // Deep-copy before reporting Pending; the stack context must be
        // safe to drop the moment this returns.
        let copy = match ctx.deep_copy() {
            Ok(copy) => copy,
            Err(status) => return Submission::CompletedSync(status),
        };
        if self.tx.send(Request::Record(copy)).is_err() {
            return Submission::CompletedSync(Status::IoError);
        }
        Submission::Pending
    }

    fn submit_index_read(&self, ctx: &mut AsyncIndexIoContext) -> Submission {
        let copy = match ctx.deep_copy() {
            Ok(copy) => copy,
            Err(status) => return Submission::CompletedSync(status),
        };
        if self.tx.send(Request::Index(copy)).is_err() {
            return Submission::CompletedSync(Status::IoError);
        }
        Submission::Pending
    }
}

impl Drop for DeferredBackend {
    fn drop(&mut self) {
        let _ = self.tx.send(Request::Shutdown);
        if let Some(worker) = self.worker.lock().take() {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer_pool::PinnedBufferPool;
    use crate::channel::CompletionChannel;
    use std::time::{Duration, Instant};

    fn wait_pop<T: Send>(channel: &CompletionChannel<T>) -> Box<T> {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            if let Some(item) = channel.try_pop() {
                return item;
            }
            assert!(Instant::now() < deadline, "completion never arrived");
            thread::yield_now();
        }
    }

    #[test]
    fn test_null_backend_record_read() {
        let pool = PinnedBufferPool::new(512, 512, 1, 2);
        let channel = CompletionChannel::new();
        let mut ctx = AsyncIoContext::new(
            Address::new(0, 100),
            7,
            None,
            channel.sender(),
            pool.acquire().unwrap(),
        );

        let submission = NullBackend::new().submit_record_read(&mut ctx);
        assert_eq!(submission, Submission::CompletedSync(Status::Ok));
        // Synchronous path: the context keeps its buffer, nothing is queued.
        assert!(ctx.record().is_some());
        assert!(channel.is_empty());
    }

    #[test]
    fn test_null_backend_index_read() {
        let channel = CompletionChannel::new();
        let mut ctx = AsyncIndexIoContext::new(1, KeyHash::new(0xFEED), None, channel.sender());

        let submission = NullBackend::new().submit_index_read(&mut ctx);
        assert_eq!(submission, Submission::CompletedSync(Status::NotFound));
        assert_eq!(ctx.entry, HashBucketEntry::INVALID);
        assert_eq!(ctx.record_address, Address::INVALID);
    }

    #[test]
    fn test_deferred_backend_record_hit() {
        let backend = DeferredBackend::new();
        let address = Address::new(0, 100);
        backend.insert_record(address, vec![1, 2, 3, 4]);

        let pool = PinnedBufferPool::new(512, 512, 1, 2);
        let channel = CompletionChannel::new();
        let mut ctx = AsyncIoContext::new(address, 7, None, channel.sender(), pool.acquire().unwrap());

        assert_eq!(backend.submit_record_read(&mut ctx), Submission::Pending);
        // The deep copy took the buffer with it.
        assert!(ctx.record().is_none());
        drop(ctx);

        let done = wait_pop(&channel);
        assert_eq!(done.result, Status::Ok);
        assert_eq!(done.io_id, 7);
        assert_eq!(&done.record().unwrap().as_slice()[..4], &[1, 2, 3, 4]);
    }

    #[test]
    fn test_deferred_backend_record_miss() {
        let backend = DeferredBackend::new();
        let pool = PinnedBufferPool::new(512, 512, 1, 2);
        let channel = CompletionChannel::new();
        let mut ctx = AsyncIoContext::new(
            Address::new(2, 42),
            1,
            None,
            channel.sender(),
            pool.acquire().unwrap(),
        );

        assert_eq!(backend.submit_record_read(&mut ctx), Submission::Pending);
        let done = wait_pop(&channel);
        assert_eq!(done.result, Status::NotFound);
    }

    #[test]
    fn test_deferred_backend_index_hit() {
        let backend = DeferredBackend::new();
        let hash = KeyHash::new(0xABCD);
        let record_address = Address::new(0, 300);
        let entry = HashBucketEntry::new(record_address, hash.tag(), false);
        backend.insert_entry(hash, entry, record_address);

        let channel = CompletionChannel::new();
        let mut ctx = AsyncIndexIoContext::new(9, hash, None, channel.sender());

        assert_eq!(backend.submit_index_read(&mut ctx), Submission::Pending);
        let done = wait_pop(&channel);
        assert_eq!(done.result, Status::Ok);
        assert_eq!(done.entry, entry);
        assert_eq!(done.record_address, record_address);
    }

    #[test]
    fn test_deferred_backend_copy_failure_is_synchronous() {
        struct FailingCaller;

        impl crate::context::AsyncContext for FailingCaller {
            fn deep_copy(
                &mut self,
            ) -> Result<Box<dyn crate::context::AsyncContext>, Status> {
                Err(Status::OutOfMemory)
            }

            fn as_any(&self) -> &dyn std::any::Any {
                self
            }

            fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
                self
            }

            fn into_any(self: Box<Self>) -> Box<dyn std::any::Any> {
                self
            }
        }

        let backend = DeferredBackend::new();
        let pool = PinnedBufferPool::new(512, 512, 1, 2);
        let channel = CompletionChannel::new();
        let mut ctx = AsyncIoContext::new(
            Address::new(0, 100),
            3,
            Some(Box::new(FailingCaller)),
            channel.sender(),
            pool.acquire().unwrap(),
        );

        let submission = backend.submit_record_read(&mut ctx);
        assert_eq!(submission, Submission::CompletedSync(Status::OutOfMemory));
        // The failed copy left the stack context whole: buffer and caller intact.
        assert!(ctx.record().is_some());
        assert!(ctx.caller_context().is_some());
        assert!(channel.is_empty());
    }
}
