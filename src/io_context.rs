//! Record and index I/O continuations
//!
//! [`AsyncIoContext`] captures everything a suspended record read needs to
//! resume: the record address, the caller's continuation, the channel to
//! deliver the completion on, and the pinned buffer the backend fills.
//!
//! [`AsyncIndexIoContext`] does the same for a cold-index fetch, plus the
//! state needed for optimistic validation at resume time: the bucket slot
//! the operation observed and a snapshot of that slot's entry taken when
//! the slot was bound. If the live slot no longer matches the snapshot when
//! the fetch completes, a concurrent writer has intervened and the
//! operation reports [`Status::Aborted`] rather than acting on stale state.

use std::any::Any;
use std::ptr::NonNull;
use std::sync::atomic::Ordering;

use crate::address::Address;
use crate::buffer_pool::PinnedBuffer;
use crate::channel::CompletionSender;
use crate::context::{deep_copy_caller, AsyncContext, CallerContext};
use crate::hash_bucket::{AtomicHashBucketEntry, HashBucketEntry};
use crate::key_hash::KeyHash;
use crate::status::Status;

/// Continuation for a record read that may complete asynchronously.
pub struct AsyncIoContext {
    /// Logical address of the record being read.
    pub address: Address,
    /// Per-thread identifier correlating this I/O with its issuing operation.
    pub io_id: u64,
    /// Completion status, written by the backend before delivery.
    pub result: Status,
    caller_context: Option<CallerContext>,
    thread_io_responses: CompletionSender<AsyncIoContext>,
    record: Option<PinnedBuffer>,
}

impl AsyncIoContext {
    /// Create a stack-resident record read continuation.
    pub fn new(
        address: Address,
        io_id: u64,
        caller_context: Option<CallerContext>,
        thread_io_responses: CompletionSender<AsyncIoContext>,
        record: PinnedBuffer,
    ) -> Self {
        Self {
            address,
            io_id,
            result: Status::Pending,
            caller_context,
            thread_io_responses,
            record: Some(record),
        }
    }

    /// Produce an independent, heap-owned copy of this continuation.
    ///
    /// The caller chain is copied first; only once every fallible step has
    /// succeeded is the pinned buffer *moved* out of `self`, leaving this
    /// handle without a record. A failed copy leaves `self` fully intact.
    pub fn deep_copy(&mut self) -> Result<Box<AsyncIoContext>, Status> {
        let caller_context = deep_copy_caller(&mut self.caller_context)?;
        Ok(Box::new(AsyncIoContext {
            address: self.address,
            io_id: self.io_id,
            result: self.result,
            caller_context,
            thread_io_responses: self.thread_io_responses.clone(),
            record: self.record.take(),
        }))
    }

    /// Borrow the record buffer, if this handle still owns one.
    pub fn record(&self) -> Option<&PinnedBuffer> {
        self.record.as_ref()
    }

    /// Mutably borrow the record buffer.
    pub fn record_mut(&mut self) -> Option<&mut PinnedBuffer> {
        self.record.as_mut()
    }

    /// Take ownership of the record buffer, leaving the handle empty.
    pub fn take_record(&mut self) -> Option<PinnedBuffer> {
        self.record.take()
    }

    /// Borrow the caller continuation, if any.
    pub fn caller_context(&self) -> Option<&dyn AsyncContext> {
        self.caller_context.as_deref()
    }

    /// Take ownership of the caller continuation.
    pub fn take_caller(&mut self) -> Option<CallerContext> {
        self.caller_context.take()
    }

    /// Set the completion status and deliver this continuation to its
    /// owner's completion channel. Returns `false` if the owner is gone.
    pub fn complete(mut self: Box<Self>, result: Status) -> bool {
        self.result = result;
        let sender = self.thread_io_responses.clone();
        sender.push(self)
    }
}

impl AsyncContext for AsyncIoContext {
    fn deep_copy(&mut self) -> Result<Box<dyn AsyncContext>, Status> {
        let copy = AsyncIoContext::deep_copy(self)?;
        Ok(copy)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

impl std::fmt::Debug for AsyncIoContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncIoContext")
            .field("address", &self.address)
            .field("io_id", &self.io_id)
            .field("result", &self.result)
            .field("has_record", &self.record.is_some())
            .field("has_caller", &self.caller_context.is_some())
            .finish()
    }
}

/// Continuation for a cold-index entry fetch that may complete
/// asynchronously.
pub struct AsyncIndexIoContext {
    /// Per-thread identifier correlating this I/O with its issuing operation.
    pub io_id: u64,
    /// Hash of the key whose index entry is being fetched.
    pub hash: KeyHash,
    /// The fetched entry; [`HashBucketEntry::INVALID`] until completion.
    pub entry: HashBucketEntry,
    /// Address of the record the fetched entry points at.
    pub record_address: Address,
    /// Completion status, written by the backend before delivery.
    pub result: Status,
    caller_context: Option<CallerContext>,
    thread_io_responses: CompletionSender<AsyncIndexIoContext>,
    /// Snapshot of the bound slot, taken at bind time. Compared against the
    /// live slot at resume; only ever an input to that comparison, never
    /// written back.
    expected_entry: HashBucketEntry,
    atomic_entry: Option<NonNull<AtomicHashBucketEntry>>,
}

// Safety: the raw slot pointer is only ever dereferenced on the owning
// thread, at resume and commit time. Completion threads carry the context
// but never touch the pointer. The slot's hash table must outlive every
// in-flight index fetch that bound it; issuing code guarantees this.
unsafe impl Send for AsyncIndexIoContext {}

impl AsyncIndexIoContext {
    /// Create a stack-resident index fetch continuation.
    pub fn new(
        io_id: u64,
        hash: KeyHash,
        caller_context: Option<CallerContext>,
        thread_io_responses: CompletionSender<AsyncIndexIoContext>,
    ) -> Self {
        Self {
            io_id,
            hash,
            entry: HashBucketEntry::INVALID,
            record_address: Address::INVALID,
            result: Status::Pending,
            caller_context,
            thread_io_responses,
            expected_entry: HashBucketEntry::INVALID,
            atomic_entry: None,
        }
    }

    /// Bind the bucket slot this operation observed, snapshotting its
    /// current entry for validation at resume time.
    ///
    /// The slot must outlive this continuation.
    pub fn bind_slot(&mut self, slot: &AtomicHashBucketEntry) {
        self.expected_entry = slot.load(Ordering::Acquire);
        self.atomic_entry = Some(NonNull::from(slot));
    }

    /// The slot entry snapshotted at bind time.
    pub fn expected_entry(&self) -> HashBucketEntry {
        self.expected_entry
    }

    /// Record the outcome of the fetch: the entry found in the cold index
    /// and the record address it resolves to.
    pub fn set_index_entry(&mut self, entry: HashBucketEntry, record_address: Address) {
        self.entry = entry;
        self.record_address = record_address;
    }

    /// Produce an independent, heap-owned copy of this continuation.
    ///
    /// The slot back-reference and its snapshot are trivially copied; the
    /// slot is owned by the hash table, not by any continuation. A failed
    /// caller copy leaves `self` fully intact.
    pub fn deep_copy(&mut self) -> Result<Box<AsyncIndexIoContext>, Status> {
        let caller_context = deep_copy_caller(&mut self.caller_context)?;
        Ok(Box::new(AsyncIndexIoContext {
            io_id: self.io_id,
            hash: self.hash,
            entry: self.entry,
            record_address: self.record_address,
            result: self.result,
            caller_context,
            thread_io_responses: self.thread_io_responses.clone(),
            expected_entry: self.expected_entry,
            atomic_entry: self.atomic_entry,
        }))
    }

    /// Borrow the caller continuation, if any.
    pub fn caller_context(&self) -> Option<&dyn AsyncContext> {
        self.caller_context.as_deref()
    }

    /// Take ownership of the caller continuation.
    pub fn take_caller(&mut self) -> Option<CallerContext> {
        self.caller_context.take()
    }

    /// Set the completion status and deliver this continuation to its
    /// owner's completion channel. Returns `false` if the owner is gone.
    pub fn complete(mut self: Box<Self>, result: Status) -> bool {
        self.result = result;
        let sender = self.thread_io_responses.clone();
        sender.push(self)
    }

    /// Validate the optimistic snapshot and return the operation's final
    /// status. Owning thread only.
    ///
    /// An error from the fetch itself passes through unchanged. Otherwise,
    /// if a slot was bound and its live entry no longer matches the
    /// snapshot, a concurrent writer has intervened and the result is
    /// [`Status::Aborted`]; the operation must restart from a fresh read.
    pub fn resume(&self) -> Status {
        if self.result.is_error() {
            return self.result;
        }
        if let Some(slot) = self.atomic_entry {
            let live = unsafe { slot.as_ref() }.load(Ordering::Acquire);
            if live != self.expected_entry {
                return Status::Aborted;
            }
        }
        self.result
    }

    /// Attempt to install `desired` into the bound slot, succeeding only if
    /// the slot still holds the snapshot taken at bind time. Owning thread
    /// only.
    ///
    /// On success the snapshot is advanced to `desired` so a subsequent
    /// commit validates against the updated entry. Fails with
    /// [`Status::Aborted`] if a concurrent writer got there first.
    pub fn try_commit(&mut self, desired: HashBucketEntry) -> Result<(), Status> {
        let slot = match self.atomic_entry {
            Some(slot) => slot,
            None => return Err(Status::Aborted),
        };
        match unsafe { slot.as_ref() }.compare_exchange(
            self.expected_entry,
            desired,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {
                self.expected_entry = desired;
                Ok(())
            }
            Err(_) => Err(Status::Aborted),
        }
    }
}

impl AsyncContext for AsyncIndexIoContext {
    fn deep_copy(&mut self) -> Result<Box<dyn AsyncContext>, Status> {
        let copy = AsyncIndexIoContext::deep_copy(self)?;
        Ok(copy)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

impl std::fmt::Debug for AsyncIndexIoContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncIndexIoContext")
            .field("io_id", &self.io_id)
            .field("hash", &self.hash)
            .field("entry", &self.entry)
            .field("record_address", &self.record_address)
            .field("result", &self.result)
            .field("expected_entry", &self.expected_entry)
            .field("bound", &self.atomic_entry.is_some())
            .finish()
    }
}
