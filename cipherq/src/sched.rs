//! Pluggable context-selection policies.
//!
//! A [`Scheduler`] maps each request to a pool table index and tells the
//! reaper which asynchronous contexts to drain. Policies see request shape
//! only, never key material or payloads. Two policies ship with the crate:
//! [`SingleCtx`] and [`RoundRobin`].

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::algo::Direction;
use crate::config::{CtxEntry, CtxMode};
use crate::error::{Error, Result};

/// The request shape a policy selects on.
#[derive(Debug, Clone, Copy)]
pub struct SchedRequest {
    /// Dispatch path the request arrived on.
    pub mode: CtxMode,
    /// Requested transform direction.
    pub direction: Direction,
    /// Source length in bytes.
    pub in_bytes: usize,
    /// Optional placement hint (e.g. a NUMA node). The shipped policies
    /// ignore it.
    pub locality: Option<usize>,
}

/// A context-selection policy.
///
/// `select_context` and `poll_targets` run on dispatcher and reaper threads
/// concurrently, so implementations keep their mutable state in atomics or
/// behind their own locks. [`bind`](Scheduler::bind) runs once, exclusively,
/// during activation.
pub trait Scheduler: Send + Sync {
    /// Policy name used in activation logs.
    fn name(&self) -> &str;

    /// Inspect the pool table before the pool goes live. Returning an error
    /// aborts activation.
    fn bind(&mut self, ctxs: &[CtxEntry]) -> Result<()>;

    /// Pool index of the context that should serve `req`.
    ///
    /// The pool re-validates the answer: an index whose mode or direction
    /// capability does not match the request fails the dispatch with
    /// [`Error::ConfigurationError`]. Return [`Error::ContextExhausted`]
    /// when no bound context is eligible.
    fn select_context(&self, req: &SchedRequest) -> Result<usize>;

    /// Pool indices the reaper should drain this round, at most `budget`.
    ///
    /// Successive calls must cycle through every asynchronous context so
    /// none starves.
    fn poll_targets(&self, budget: usize) -> Vec<usize>;
}

/// Always selects pool index 0.
///
/// The minimal policy for single-queue pools. Mode or direction mismatches
/// against entry 0 surface as `ConfigurationError` from the pool's selection
/// re-validation.
#[derive(Debug, Default)]
pub struct SingleCtx {
    poll_first: bool,
}

impl SingleCtx {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Scheduler for SingleCtx {
    fn name(&self) -> &str {
        "single"
    }

    fn bind(&mut self, ctxs: &[CtxEntry]) -> Result<()> {
        let first = ctxs
            .first()
            .ok_or_else(|| Error::ConfigurationError("context table is empty".to_string()))?;
        self.poll_first = first.mode == CtxMode::Async;
        Ok(())
    }

    fn select_context(&self, _req: &SchedRequest) -> Result<usize> {
        Ok(0)
    }

    fn poll_targets(&self, budget: usize) -> Vec<usize> {
        if self.poll_first && budget > 0 {
            vec![0]
        } else {
            Vec::new()
        }
    }
}

/// Eligible contexts for one (mode, direction) class with a rotation cursor.
#[derive(Debug, Default)]
struct Lane {
    ctxs: Vec<usize>,
    cursor: AtomicUsize,
}

#[inline]
fn lane_index(mode: CtxMode, direction: Direction) -> usize {
    let m = match mode {
        CtxMode::Sync => 0,
        CtxMode::Async => 1,
    };
    let d = match direction {
        Direction::Encrypt => 0,
        Direction::Decrypt => 1,
    };
    m * 2 + d
}

/// Rotates each (mode, direction) class over its eligible contexts.
///
/// `bind` splits the pool table into four lanes; selection is one atomic
/// fetch-add on the lane cursor, independent of pool size.
#[derive(Debug, Default)]
pub struct RoundRobin {
    lanes: [Lane; 4],
    async_ctxs: Vec<usize>,
    poll_cursor: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Scheduler for RoundRobin {
    fn name(&self) -> &str {
        "round-robin"
    }

    fn bind(&mut self, ctxs: &[CtxEntry]) -> Result<()> {
        for lane in &mut self.lanes {
            lane.ctxs.clear();
            lane.cursor.store(0, Ordering::Relaxed);
        }
        self.async_ctxs.clear();
        self.poll_cursor.store(0, Ordering::Relaxed);

        for (idx, entry) in ctxs.iter().enumerate() {
            for direction in [Direction::Encrypt, Direction::Decrypt] {
                if entry.cap.allows(direction) {
                    self.lanes[lane_index(entry.mode, direction)].ctxs.push(idx);
                }
            }
            if entry.mode == CtxMode::Async {
                self.async_ctxs.push(idx);
            }
        }
        Ok(())
    }

    fn select_context(&self, req: &SchedRequest) -> Result<usize> {
        let lane = &self.lanes[lane_index(req.mode, req.direction)];
        if lane.ctxs.is_empty() {
            return Err(Error::ContextExhausted);
        }
        let n = lane.cursor.fetch_add(1, Ordering::Relaxed);
        Ok(lane.ctxs[n % lane.ctxs.len()])
    }

    fn poll_targets(&self, budget: usize) -> Vec<usize> {
        if self.async_ctxs.is_empty() || budget == 0 {
            return Vec::new();
        }
        let take = budget.min(self.async_ctxs.len());
        let start = self.poll_cursor.fetch_add(take, Ordering::Relaxed);
        (0..take)
            .map(|i| self.async_ctxs[(start + i) % self.async_ctxs.len()])
            .collect()
    }
}
