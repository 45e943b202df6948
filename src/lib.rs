//! pendio - the asynchronous continuation core of a concurrent key-value engine
//!
//! A high-throughput KV engine cannot afford to block a worker thread while a
//! record (or an on-disk index entry) is fetched from storage. This crate
//! provides the machinery that makes those lookups non-blocking:
//!
//! - **Continuations** ([`io_context::AsyncIoContext`],
//!   [`io_context::AsyncIndexIoContext`]) capture exactly the state a
//!   suspended lookup needs to resume later, on another thread.
//! - **Deep copy** ([`context::AsyncContext`]) turns a stack-resident
//!   continuation into an independent heap-owned one the moment the backend
//!   reports that an I/O will not complete synchronously.
//! - **Completion channels** ([`channel::CompletionChannel`]) hand finished
//!   continuations back from completion threads to the worker that issued
//!   them, with release/acquire ordering on the transfer.
//! - **Optimistic validation**: an index continuation re-checks the live
//!   [`hash_bucket::AtomicHashBucketEntry`] against the snapshot captured at
//!   issue time before its result is committed, aborting instead of
//!   overwriting a concurrent update.
//!
//! # Quick start
//!
//! ```rust,ignore
//! use pendio::prelude::*;
//!
//! let mut exec = ExecutionContext::new(0);
//! match exec.issue_record_read(&backend, address, hash, None, &pool)? {
//!     RecordIssue::Completed(result) => { /* bytes already in result.record */ }
//!     RecordIssue::Pending(io_id) => { /* resume later via complete_record_ios() */ }
//! }
//! ```

#![warn(missing_docs)]

pub mod address;
pub mod backend;
pub mod buffer_pool;
pub mod channel;
pub mod config;
pub mod context;
pub mod execution;
pub mod hash_bucket;
pub mod io_context;
pub mod key_hash;
pub mod status;
mod utility;

// Re-exports for convenience
pub use address::{Address, AtomicAddress};
pub use hash_bucket::{AtomicHashBucketEntry, HashBucketEntry};
pub use key_hash::KeyHash;
pub use status::Status;

/// Constants used throughout the library
pub mod constants {
    /// Size of a cache line in bytes
    pub const CACHE_LINE_BYTES: usize = 64;

    /// Default sector alignment for direct-I/O buffers
    pub const DEFAULT_SECTOR_SIZE: usize = 512;

    /// Default size of a pinned record buffer
    pub const DEFAULT_BUFFER_SIZE: usize = 4096;
}

/// Prelude module for common imports
pub mod prelude {
    pub use crate::address::Address;
    pub use crate::backend::{DeferredBackend, IoBackend, NullBackend, Submission};
    pub use crate::buffer_pool::{PinnedBuffer, PinnedBufferPool};
    pub use crate::channel::{CompletionChannel, CompletionSender};
    pub use crate::context::{AsyncContext, CallerContext};
    pub use crate::execution::{
        ExecutionContext, IndexIoResult, IndexIssue, RecordIoResult, RecordIssue,
    };
    pub use crate::hash_bucket::{AtomicHashBucketEntry, HashBucketEntry};
    pub use crate::io_context::{AsyncIndexIoContext, AsyncIoContext};
    pub use crate::key_hash::KeyHash;
    pub use crate::status::Status;
}
