//! Per-thread execution state
//!
//! Each worker thread owns one [`ExecutionContext`]: a monotonically
//! increasing I/O id counter, one completion channel per continuation kind,
//! and a map of in-flight I/O ids. Issuing an operation either finishes it
//! inside the call (the common, allocation-free path) or leaves it pending;
//! pending completions are later drained with
//! [`complete_record_ios`](ExecutionContext::complete_record_ios) and
//! [`complete_index_ios`](ExecutionContext::complete_index_ios) on the
//! owning thread.

use std::collections::HashMap;

use crate::address::Address;
use crate::backend::{IoBackend, Submission};
use crate::buffer_pool::{PinnedBuffer, PinnedBufferPool};
use crate::channel::CompletionChannel;
use crate::context::CallerContext;
use crate::hash_bucket::{AtomicHashBucketEntry, HashBucketEntry};
use crate::io_context::{AsyncIndexIoContext, AsyncIoContext};
use crate::key_hash::KeyHash;
use crate::status::Status;

/// Outcome of issuing a record read.
#[derive(Debug)]
pub enum RecordIssue {
    /// The read finished synchronously.
    Completed(RecordIoResult),
    /// The read went pending under this I/O id; drain
    /// [`complete_record_ios`](ExecutionContext::complete_record_ios) to
    /// observe its completion.
    Pending(u64),
}

/// Outcome of issuing a cold-index fetch.
#[derive(Debug)]
pub enum IndexIssue {
    /// The fetch finished synchronously.
    Completed(IndexIoResult),
    /// The fetch went pending under this I/O id.
    Pending(u64),
}

/// A finished record read, synchronous or drained from the channel.
pub struct RecordIoResult {
    /// I/O id the read was issued under.
    pub io_id: u64,
    /// Address that was read.
    pub address: Address,
    /// Final status of the read.
    pub status: Status,
    /// The record buffer, if the read still owns one.
    pub record: Option<PinnedBuffer>,
    /// The caller continuation to resume, if one was captured.
    pub caller_context: Option<CallerContext>,
}

/// A finished cold-index fetch, synchronous or drained from the channel.
pub struct IndexIoResult {
    /// I/O id the fetch was issued under.
    pub io_id: u64,
    /// Hash the fetch was issued for.
    pub hash: KeyHash,
    /// Final status after optimistic validation; [`Status::Aborted`] means
    /// a concurrent writer intervened and the operation must restart.
    pub status: Status,
    /// The fetched entry; [`HashBucketEntry::INVALID`] unless `status` is ok.
    pub entry: HashBucketEntry,
    /// Address of the record the entry resolves to.
    pub record_address: Address,
    /// The caller continuation to resume, if one was captured.
    pub caller_context: Option<CallerContext>,
}

impl std::fmt::Debug for RecordIoResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordIoResult")
            .field("io_id", &self.io_id)
            .field("address", &self.address)
            .field("status", &self.status)
            .field("record", &self.record)
            .field("caller_context", &self.caller_context.is_some())
            .finish()
    }
}

impl std::fmt::Debug for IndexIoResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexIoResult")
            .field("io_id", &self.io_id)
            .field("hash", &self.hash)
            .field("status", &self.status)
            .field("entry", &self.entry)
            .field("record_address", &self.record_address)
            .field("caller_context", &self.caller_context.is_some())
            .finish()
    }
}

/// Per-thread issuing and completion state.
pub struct ExecutionContext {
    thread_id: usize,
    next_io_id: u64,
    io_responses: CompletionChannel<AsyncIoContext>,
    index_io_responses: CompletionChannel<AsyncIndexIoContext>,
    /// In-flight I/O ids and the key hash each belongs to.
    pub pending_ios: HashMap<u64, KeyHash>,
}

impl ExecutionContext {
    /// Create the execution state for one worker thread.
    pub fn new(thread_id: usize) -> Self {
        Self {
            thread_id,
            next_io_id: 0,
            io_responses: CompletionChannel::new(),
            index_io_responses: CompletionChannel::new(),
            pending_ios: HashMap::new(),
        }
    }

    /// Owning thread id.
    pub fn thread_id(&self) -> usize {
        self.thread_id
    }

    /// Reserve the next I/O id; unique within this thread, never reused.
    pub fn next_io_id(&mut self) -> u64 {
        let id = self.next_io_id;
        self.next_io_id += 1;
        id
    }

    /// Number of I/Os issued by this thread that have not yet been drained.
    pub fn num_pending_ios(&self) -> usize {
        self.pending_ios.len()
    }

    /// Issue a record read at `address`.
    ///
    /// Acquires a pinned buffer from `pool`, builds the continuation on the
    /// stack, and submits it. Synchronous completion hands everything back
    /// immediately with no allocation beyond the buffer itself; a pending
    /// submission records the I/O id in `pending_ios` and the completion
    /// arrives via [`complete_record_ios`](Self::complete_record_ios).
    pub fn issue_record_read(
        &mut self,
        backend: &dyn IoBackend,
        address: Address,
        hash: KeyHash,
        caller_context: Option<CallerContext>,
        pool: &PinnedBufferPool,
    ) -> Result<RecordIssue, Status> {
        let record = pool.acquire().ok_or(Status::OutOfMemory)?;
        let io_id = self.next_io_id();
        let mut ctx = AsyncIoContext::new(
            address,
            io_id,
            caller_context,
            self.io_responses.sender(),
            record,
        );

        match backend.submit_record_read(&mut ctx) {
            Submission::CompletedSync(status) => Ok(RecordIssue::Completed(RecordIoResult {
                io_id,
                address,
                status,
                record: ctx.take_record(),
                caller_context: ctx.take_caller(),
            })),
            Submission::Pending => {
                self.pending_ios.insert(io_id, hash);
                if tracing::enabled!(tracing::Level::DEBUG) {
                    tracing::debug!(
                        thread_id = self.thread_id,
                        io_id,
                        address = address.control(),
                        "record read pending"
                    );
                }
                Ok(RecordIssue::Pending(io_id))
            }
        }
    }

    /// Issue a cold-index fetch for `hash`.
    ///
    /// If `slot` is given, the continuation snapshots its current entry and
    /// validates against it when the fetch completes; a mismatch surfaces
    /// as [`Status::Aborted`]. The slot must outlive the fetch.
    pub fn issue_index_read(
        &mut self,
        backend: &dyn IoBackend,
        hash: KeyHash,
        slot: Option<&AtomicHashBucketEntry>,
        caller_context: Option<CallerContext>,
    ) -> Result<IndexIssue, Status> {
        let io_id = self.next_io_id();
        let mut ctx =
            AsyncIndexIoContext::new(io_id, hash, caller_context, self.index_io_responses.sender());
        if let Some(slot) = slot {
            ctx.bind_slot(slot);
        }

        match backend.submit_index_read(&mut ctx) {
            Submission::CompletedSync(status) => {
                ctx.result = status;
                let status = ctx.resume();
                Ok(IndexIssue::Completed(Self::finish_index(ctx, status)))
            }
            Submission::Pending => {
                self.pending_ios.insert(io_id, hash);
                if tracing::enabled!(tracing::Level::DEBUG) {
                    tracing::debug!(
                        thread_id = self.thread_id,
                        io_id,
                        hash = hash.control(),
                        "index fetch pending"
                    );
                }
                Ok(IndexIssue::Pending(io_id))
            }
        }
    }

    /// Drain every record read completion currently queued. Owning thread
    /// only.
    pub fn complete_record_ios(&mut self) -> Vec<RecordIoResult> {
        let mut out = Vec::new();
        while let Some(mut ctx) = self.io_responses.try_pop() {
            self.pending_ios.remove(&ctx.io_id);
            if ctx.result.is_error() && tracing::enabled!(tracing::Level::WARN) {
                tracing::warn!(
                    thread_id = self.thread_id,
                    io_id = ctx.io_id,
                    status = ctx.result.as_str(),
                    "record read failed"
                );
            }
            out.push(RecordIoResult {
                io_id: ctx.io_id,
                address: ctx.address,
                status: ctx.result,
                record: ctx.take_record(),
                caller_context: ctx.take_caller(),
            });
        }
        out
    }

    /// Drain every index fetch completion currently queued, running
    /// optimistic validation on each. Owning thread only.
    pub fn complete_index_ios(&mut self) -> Vec<IndexIoResult> {
        let mut out = Vec::new();
        while let Some(ctx) = self.index_io_responses.try_pop() {
            self.pending_ios.remove(&ctx.io_id);
            let status = ctx.resume();
            if status == Status::Aborted && tracing::enabled!(tracing::Level::DEBUG) {
                tracing::debug!(
                    thread_id = self.thread_id,
                    io_id = ctx.io_id,
                    "index fetch aborted by concurrent writer"
                );
            }
            out.push(Self::finish_index(*ctx, status));
        }
        out
    }

    fn finish_index(mut ctx: AsyncIndexIoContext, status: Status) -> IndexIoResult {
        let (entry, record_address) = if status.is_error() {
            (HashBucketEntry::INVALID, Address::INVALID)
        } else {
            (ctx.entry, ctx.record_address)
        };
        IndexIoResult {
            io_id: ctx.io_id,
            hash: ctx.hash,
            status,
            entry,
            record_address,
            caller_context: ctx.take_caller(),
        }
    }
}

impl Drop for ExecutionContext {
    fn drop(&mut self) {
        if !self.pending_ios.is_empty() && tracing::enabled!(tracing::Level::WARN) {
            tracing::warn!(
                thread_id = self.thread_id,
                pending = self.pending_ios.len(),
                "execution context dropped with in-flight I/Os"
            );
        }
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("thread_id", &self.thread_id)
            .field("next_io_id", &self.next_io_id)
            .field("pending_ios", &self.pending_ios.len())
            .finish()
    }
}
