//! Seam between the scheduling core and cipher engines.
//!
//! The pool drives engines exclusively through [`CipherEngine`] and
//! [`EngineQueue`]. Engines never see pool bookkeeping (sessions, schedulers,
//! completion handles) and the pool never sees cipher math. The crate ships
//! one implementation, [`SoftEngine`](crate::SoftEngine); hardware backends
//! implement the same pair of traits.

use crate::algo::{CipherAlg, CipherMode, Direction};
use crate::config::CtxEntry;
use crate::error::Result;
use crate::secret::SecretKey;

/// Borrowed view of one synchronous operation.
///
/// `dst` is exactly `src.len()` bytes and must be written only on success;
/// a failed execute leaves it untouched.
pub struct CipherOp<'a> {
    pub alg: CipherAlg,
    pub mode: CipherMode,
    pub direction: Direction,
    pub key: &'a [u8],
    pub iv: &'a [u8],
    pub src: &'a [u8],
    pub dst: &'a mut [u8],
}

/// Owned unit of asynchronous work.
///
/// Buffers are copied in at submission so the engine can outlive the
/// caller's borrows; the key copy zeroizes when the descriptor drops.
#[derive(Debug)]
pub struct WorkDescriptor {
    /// Pool-assigned completion tag, echoed back in [`WorkCompletion`].
    pub tag: u64,
    pub alg: CipherAlg,
    pub mode: CipherMode,
    pub direction: Direction,
    pub key: SecretKey,
    pub iv: Box<[u8]>,
    pub src: Box<[u8]>,
}

/// One finished asynchronous operation.
#[derive(Debug)]
pub struct WorkCompletion {
    /// Tag of the originating [`WorkDescriptor`].
    pub tag: u64,
    /// The output buffer, or the per-operation fault.
    pub result: Result<Box<[u8]>>,
}

/// Submission rejection that hands the descriptor back to the pool.
#[derive(Debug)]
pub enum SubmitRejected {
    /// The submission queue is at depth. Retriable after draining.
    Full(WorkDescriptor),
    /// The queue no longer accepts work.
    Closed(WorkDescriptor),
}

impl SubmitRejected {
    /// Recover the descriptor.
    pub fn into_descriptor(self) -> WorkDescriptor {
        match self {
            SubmitRejected::Full(desc) | SubmitRejected::Closed(desc) => desc,
        }
    }
}

/// A cipher engine opens one queue per configured context.
///
/// `open_queue` is called once per pool table row during activation, with
/// the row describing the mode and submission-queue depth the queue must
/// honor. An error aborts activation; queues opened earlier are dropped.
pub trait CipherEngine: Send + Sync {
    fn open_queue(&self, entry: &CtxEntry) -> Result<Box<dyn EngineQueue>>;
}

/// One execution queue bound to a context.
///
/// Queues are shared across dispatcher threads, so every method takes
/// `&self`. The completion stream returned by `poll` preserves the engine's
/// completion order, which may differ from submission order.
pub trait EngineQueue: Send + Sync {
    /// Run one operation to completion on the calling thread, writing
    /// `op.dst` on success. Synchronous queues only.
    fn execute(&self, op: CipherOp<'_>) -> Result<()>;

    /// Enqueue one descriptor without blocking. Asynchronous queues only.
    fn submit(&self, desc: WorkDescriptor) -> std::result::Result<(), SubmitRejected>;

    /// Reap up to `max` completions. Returns an empty vector when nothing
    /// has completed; an `Err` means the queue is dead and every operation
    /// still inside it is lost.
    fn poll(&self, max: usize) -> Result<Vec<WorkCompletion>>;
}
