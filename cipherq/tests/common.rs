//! Common test utilities for cipherq integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use cipherq::{
    CipherCore, CipherEngine, CtxEntry, CtxHandle, CtxMode, DirectionCap, PoolConfig, RoundRobin,
    Scheduler, SingleCtx, SoftEngine,
};

/// A live pool plus the engine handle that drives its fault knobs.
pub struct TestPool {
    pub core: CipherCore,
    pub engine: Arc<SoftEngine>,
}

impl TestPool {
    /// Activate a pool over a fresh [`SoftEngine`].
    pub fn activate(ctxs: Vec<CtxEntry>, scheduler: Box<dyn Scheduler>) -> Self {
        let engine = Arc::new(SoftEngine::new());
        let core = CipherCore::activate(
            PoolConfig::new().with_ctxs(ctxs),
            scheduler,
            Arc::clone(&engine) as Arc<dyn CipherEngine>,
        )
        .expect("pool activation");
        Self { core, engine }
    }
}

/// One synchronous context serving both directions, single-context policy.
pub fn sync_pool() -> TestPool {
    TestPool::activate(
        vec![entry(0, CtxMode::Sync, DirectionCap::Both)],
        Box::new(SingleCtx::new()),
    )
}

/// One asynchronous context serving both directions, single-context policy.
pub fn async_pool(queue_depth: usize) -> TestPool {
    TestPool::activate(
        vec![entry(0, CtxMode::Async, DirectionCap::Both).with_queue_depth(queue_depth)],
        Box::new(SingleCtx::new()),
    )
}

/// Handle 0 synchronous, handle 1 asynchronous, round-robin policy.
pub fn mixed_pool(queue_depth: usize) -> TestPool {
    TestPool::activate(
        vec![
            entry(0, CtxMode::Sync, DirectionCap::Both),
            entry(1, CtxMode::Async, DirectionCap::Both).with_queue_depth(queue_depth),
        ],
        Box::new(RoundRobin::new()),
    )
}

pub fn entry(handle: u64, mode: CtxMode, cap: DirectionCap) -> CtxEntry {
    CtxEntry::new(CtxHandle(handle), mode, cap)
}

/// Decode a hex test vector.
pub fn hx(s: &str) -> Vec<u8> {
    hex::decode(s).expect("valid hex literal")
}

/// Deterministic payload of `len` bytes derived from `seed`.
pub fn payload(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
        .collect()
}

/// Drain `ctx` until `want` completions arrived or the timeout passes.
/// Panics on timeout or a drain error; fault tests drain by hand instead.
pub fn drain_until(core: &CipherCore, ctx: CtxHandle, want: usize, timeout_ms: u64) -> usize {
    let deadline = Instant::now() + Duration::from_millis(timeout_ms);
    let mut total = 0;
    while total < want {
        total += core.drain(ctx, want - total).expect("drain");
        if total >= want {
            break;
        }
        if Instant::now() > deadline {
            panic!(
                "drained {} of {} completions within {} ms",
                total, want, timeout_ms
            );
        }
        std::hint::spin_loop();
    }
    total
}
