//! The continuation capability
//!
//! Every suspendable operation implements [`AsyncContext`]: "produce an
//! independent, heap-owned copy of myself and my caller's continuation,
//! suitable for outliving my current stack frame."
//!
//! A continuation is either *stack-resident* (valid only until its creating
//! call returns) or *heap-owned* (an independent `Box`, safe to outlive the
//! call). Every continuation that crosses a suspension boundary must be
//! heap-owned before the crossing; the deep copy happens at most once, at
//! the moment the backend reports that an operation will not complete
//! synchronously.
//!
//! The deep-copy protocol, per implementation:
//! 1. copy all trivially-copyable fields (addresses, hashes, ids, channel
//!    senders) verbatim;
//! 2. recursively deep-copy the embedded caller continuation, failing
//!    atomically if any level of the recursion fails;
//! 3. *move* (never duplicate) any exclusively-owned resource such as a
//!    pinned buffer, leaving the source handle empty; this happens only
//!    after the fallible steps have succeeded, so a failed copy leaves the
//!    source fully intact.
//!
//! On failure, partially constructed copies are torn down by ownership:
//! every level already copied is dropped, releasing its resources.

use std::any::Any;

use crate::status::Status;

/// A heap-owned caller continuation.
pub type CallerContext = Box<dyn AsyncContext>;

/// The polymorphic contract every suspendable operation implements.
pub trait AsyncContext: Send + 'static {
    /// Produce an independent, heap-owned copy of this continuation.
    ///
    /// Exactly one heap allocation per continuation in the chain; no
    /// allocation happens on the synchronous-completion path, because this
    /// is never called there. Errors with [`Status::OutOfMemory`] (or the
    /// failing level's own status) if any level of the recursive caller
    /// copy fails; in that case the source is left intact.
    fn deep_copy(&mut self) -> Result<Box<dyn AsyncContext>, Status>;

    /// Borrow this continuation as [`Any`], for downcasting at resume time.
    fn as_any(&self) -> &dyn Any;

    /// Mutably borrow this continuation as [`Any`].
    fn as_any_mut(&mut self) -> &mut dyn Any;

    /// Consume this continuation into [`Any`], for owned downcasting.
    fn into_any(self: Box<Self>) -> Box<dyn Any>;
}

/// Deep-copy an optional caller chain, leaving the source chain in place.
///
/// This is step 2 of the deep-copy protocol; concrete continuations call it
/// before moving any exclusively-owned resource so that a failure at any
/// depth leaves the source untouched.
pub fn deep_copy_caller(
    caller: &mut Option<CallerContext>,
) -> Result<Option<CallerContext>, Status> {
    match caller.as_mut() {
        Some(ctx) => Ok(Some(ctx.deep_copy()?)),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A caller continuation carrying a payload and, optionally, its own caller.
    struct ChainLink {
        payload: u64,
        caller: Option<CallerContext>,
        fail_copy: bool,
    }

    impl AsyncContext for ChainLink {
        fn deep_copy(&mut self) -> Result<Box<dyn AsyncContext>, Status> {
            if self.fail_copy {
                return Err(Status::OutOfMemory);
            }
            let caller = deep_copy_caller(&mut self.caller)?;
            Ok(Box::new(ChainLink {
                payload: self.payload,
                caller,
                fail_copy: false,
            }))
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

    fn chain(depths: &[u64]) -> Option<CallerContext> {
        let mut caller: Option<CallerContext> = None;
        for &payload in depths.iter().rev() {
            caller = Some(Box::new(ChainLink {
                payload,
                caller,
                fail_copy: false,
            }));
        }
        caller
    }

    fn payloads(mut ctx: &dyn AsyncContext) -> Vec<u64> {
        let mut out = Vec::new();
        loop {
            let link = ctx.as_any().downcast_ref::<ChainLink>().unwrap();
            out.push(link.payload);
            match link.caller.as_deref() {
                Some(next) => ctx = next,
                None => break,
            }
        }
        out
    }

    #[test]
    fn test_deep_copy_chain_depths() {
        for depth in 1..=4u64 {
            let values: Vec<u64> = (0..depth).collect();
            let mut original = chain(&values).unwrap();
            let copy = original.deep_copy().unwrap();

            // Destroying the original must leave the copy fully intact.
            drop(original);
            assert_eq!(payloads(copy.as_ref()), values);
        }
    }

    #[test]
    fn test_deep_copy_failure_propagates() {
        // Depth-3 chain whose innermost level fails to copy.
        let inner = Box::new(ChainLink {
            payload: 2,
            caller: None,
            fail_copy: true,
        });
        let mid = Box::new(ChainLink {
            payload: 1,
            caller: Some(inner),
            fail_copy: false,
        });
        let mut outer = ChainLink {
            payload: 0,
            caller: Some(mid),
            fail_copy: false,
        };

        assert_eq!(outer.deep_copy().err(), Some(Status::OutOfMemory));
        // The source chain survives the failed copy.
        assert_eq!(payloads(&outer), vec![0, 1, 2]);
    }
}
