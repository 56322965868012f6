//! Pool activation, request dispatch, and completion draining.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use slab::Slab;
use tracing::{debug, trace};

use crate::algo::{check_geometry, check_key_len};
use crate::config::{CtxEntry, CtxHandle, CtxMode, PoolConfig};
use crate::engine::{CipherEngine, CipherOp, EngineQueue, SubmitRejected, WorkDescriptor};
use crate::error::{Error, Result, SubmitError};
use crate::request::{completion_pair, CipherRequest, CompletionHandle, CompletionTx};
use crate::sched::{SchedRequest, Scheduler};
use crate::secret::SecretKey;
use crate::session::{CipherSession, SessionSetup, SessionSlots};

/// One accepted asynchronous request, keyed by its completion tag.
struct Inflight {
    request: CipherRequest,
    tx: CompletionTx,
}

struct CtxState {
    entry: CtxEntry,
    queue: Box<dyn EngineQueue>,
    inflight: Mutex<Slab<Inflight>>,
    retired: AtomicBool,
}

/// A live context pool.
///
/// All state lives behind this handle; dropping it (or calling
/// [`deactivate`](CipherCore::deactivate)) tears the pool down. The handle
/// is `Send + Sync`: share it across threads by reference or inside an
/// [`Arc`], whichever fits the caller.
///
/// Concurrency contract: any number of threads may dispatch concurrently.
/// Completions of one asynchronous context are drained by one thread at a
/// time; concurrent [`drain`](CipherCore::drain) calls on the same context
/// are safe but serialize internally.
pub struct CipherCore {
    ctxs: Vec<CtxState>,
    scheduler: Box<dyn Scheduler>,
    sessions: Arc<SessionSlots>,
}

impl CipherCore {
    /// Bring a pool up: validate the table, bind the scheduler, and open one
    /// engine queue per context.
    ///
    /// Fails with [`Error::ConfigurationError`] on an empty table, duplicate
    /// handles, a zero session cap or queue depth, or a scheduler that
    /// rejects the table. Nothing is left behind on failure; activation can
    /// be retried with a corrected configuration.
    pub fn activate(
        config: PoolConfig,
        mut scheduler: Box<dyn Scheduler>,
        engine: Arc<dyn CipherEngine>,
    ) -> Result<CipherCore> {
        config.validate()?;
        scheduler.bind(&config.ctxs).map_err(|e| match e {
            Error::ConfigurationError(msg) => {
                Error::ConfigurationError(format!("scheduler '{}': {}", scheduler.name(), msg))
            }
            other => other,
        })?;

        let mut ctxs = Vec::with_capacity(config.ctxs.len());
        for entry in &config.ctxs {
            let queue = engine.open_queue(entry)?;
            ctxs.push(CtxState {
                entry: *entry,
                queue,
                inflight: Mutex::new(Slab::new()),
                retired: AtomicBool::new(false),
            });
        }

        debug!(
            policy = scheduler.name(),
            ctxs = ctxs.len(),
            max_sessions = config.max_sessions,
            "cipher pool activated"
        );
        Ok(CipherCore {
            ctxs,
            scheduler,
            sessions: Arc::new(SessionSlots::new(config.max_sessions)),
        })
    }

    /// Allocate a session for one algorithm/mode pair.
    ///
    /// Counts against the pool's `max_sessions`; the slot is released when
    /// the session drops. The pairing is validated here, before a key is
    /// ever supplied.
    pub fn alloc_session(&self, setup: SessionSetup) -> Result<CipherSession> {
        if !setup.mode.supports(setup.alg) {
            return Err(Error::ConfigurationError(format!(
                "{} cannot run in {} mode",
                setup.alg, setup.mode
            )));
        }
        self.sessions.charge()?;
        Ok(CipherSession::new(setup, Arc::clone(&self.sessions)))
    }

    /// Number of currently allocated sessions.
    pub fn active_sessions(&self) -> usize {
        self.sessions.active()
    }

    /// Handles of the configured contexts, in table order.
    pub fn ctx_handles(&self) -> Vec<CtxHandle> {
        self.ctxs.iter().map(|state| state.entry.handle).collect()
    }

    /// Execute one request to completion on a synchronous context.
    ///
    /// Blocks the calling thread. On success the transform of `src` is in
    /// [`CipherRequest::output`]; on failure the destination buffer is
    /// untouched. [`Error::DeviceBusy`] is retriable; a hardware fault
    /// retires the context that served the request.
    pub fn dispatch_sync(&self, session: &CipherSession, req: &mut CipherRequest) -> Result<()> {
        validate_request(session, req)?;
        let idx = self.select(CtxMode::Sync, req)?;
        let state = &self.ctxs[idx];
        if state.retired.load(Ordering::Acquire) {
            return Err(Error::DeviceBusy);
        }

        let setup = session.setup();
        let direction = req.direction();
        let src_len = req.src().len();
        let (key_override, src, dst, iv) = req.op_parts();
        let dst = &mut dst[..src_len];

        let result = match key_override {
            Some(key) => state.queue.execute(CipherOp {
                alg: setup.alg,
                mode: setup.mode,
                direction,
                key,
                iv,
                src,
                dst,
            }),
            None => session.with_key(|key| match key {
                Some(key) => state.queue.execute(CipherOp {
                    alg: setup.alg,
                    mode: setup.mode,
                    direction,
                    key,
                    iv,
                    src,
                    dst,
                }),
                None => Err(Error::InvalidArgument("session key not set".to_string())),
            }),
        };

        match result {
            Ok(()) => {
                req.mark_output(src_len);
                Ok(())
            }
            Err(e @ Error::HardwareFault(_)) => {
                self.retire(idx, "synchronous execute fault");
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Submit one request to an asynchronous context without blocking.
    ///
    /// On acceptance the request is owned by the pool until a reaper drains
    /// its completion through the returned [`CompletionHandle`]. Every
    /// rejection hands the request back inside [`SubmitError`];
    /// [`Error::QueueFull`] is retriable after draining.
    pub fn dispatch_async(
        &self,
        session: &CipherSession,
        req: CipherRequest,
    ) -> std::result::Result<CompletionHandle, SubmitError> {
        if let Err(error) = validate_request(session, &req) {
            return Err(SubmitError {
                request: req,
                error,
            });
        }
        let idx = match self.select(CtxMode::Async, &req) {
            Ok(idx) => idx,
            Err(error) => {
                return Err(SubmitError {
                    request: req,
                    error,
                })
            }
        };
        let state = &self.ctxs[idx];
        if state.retired.load(Ordering::Acquire) {
            return Err(SubmitError {
                request: req,
                error: Error::HardwareFault(format!(
                    "context {} is retired",
                    state.entry.handle
                )),
            });
        }

        let setup = session.setup();
        let key = match req.key_override() {
            Some(key) => SecretKey::copy_from(key.as_bytes()),
            None => match session.key_copy() {
                Some(key) => key,
                None => {
                    return Err(SubmitError {
                        request: req,
                        error: Error::InvalidArgument("session key not set".to_string()),
                    })
                }
            },
        };

        // Holding the inflight lock across submit keeps the tag reserved and
        // blocks a concurrent drain from observing the completion before the
        // table entry exists.
        let mut inflight = state
            .inflight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let tag = inflight.vacant_key() as u64;
        let desc = WorkDescriptor {
            tag,
            alg: setup.alg,
            mode: setup.mode,
            direction: req.direction(),
            key,
            iv: req.iv().to_vec().into_boxed_slice(),
            src: req.src().to_vec().into_boxed_slice(),
        };
        match state.queue.submit(desc) {
            Ok(()) => {
                let (tx, handle) = completion_pair();
                inflight.insert(Inflight { request: req, tx });
                Ok(handle)
            }
            Err(SubmitRejected::Full(_)) => Err(SubmitError {
                request: req,
                error: Error::QueueFull,
            }),
            Err(SubmitRejected::Closed(_)) => {
                drop(inflight);
                self.retire(idx, "submission queue closed");
                Err(SubmitError {
                    request: req,
                    error: Error::HardwareFault(format!(
                        "context {} no longer accepts work",
                        state.entry.handle
                    )),
                })
            }
        }
    }

    /// Drain up to `max` completions from one asynchronous context,
    /// delivering each to its [`CompletionHandle`]. Returns the number
    /// drained; never blocks, so callers loop.
    ///
    /// `max == 0` probes nothing and returns 0. A fatal engine failure
    /// retires the context, fails every request still in flight on it, and
    /// returns [`Error::HardwareFault`], as does draining an already retired
    /// context.
    pub fn drain(&self, ctx: CtxHandle, max: usize) -> Result<usize> {
        let idx = self
            .ctxs
            .iter()
            .position(|state| state.entry.handle == ctx)
            .ok_or_else(|| Error::InvalidArgument(format!("unknown context handle {}", ctx)))?;
        if self.ctxs[idx].entry.mode != CtxMode::Async {
            return Err(Error::InvalidArgument(format!(
                "context {} is synchronous and has no completion queue",
                ctx
            )));
        }
        self.drain_index(idx, max)
    }

    /// Drain every context the scheduler nominates, up to `max_per_ctx`
    /// completions each. Retired contexts are skipped. Returns the total
    /// drained, or the first fatal error.
    pub fn reap(&self, max_per_ctx: usize) -> Result<usize> {
        let mut total = 0;
        for idx in self.scheduler.poll_targets(self.ctxs.len()) {
            let state = self.ctxs.get(idx).ok_or_else(|| {
                Error::ConfigurationError(format!(
                    "scheduler '{}' nominated out-of-range context index {}",
                    self.scheduler.name(),
                    idx
                ))
            })?;
            if state.entry.mode != CtxMode::Async {
                return Err(Error::ConfigurationError(format!(
                    "scheduler '{}' nominated synchronous context {} for polling",
                    self.scheduler.name(),
                    state.entry.handle
                )));
            }
            if state.retired.load(Ordering::Acquire) {
                continue;
            }
            total += self.drain_index(idx, max_per_ctx)?;
        }
        Ok(total)
    }

    /// Tear the pool down. Requests still in flight fail with
    /// [`Error::HardwareFault`] through their handles. Sessions outlive the
    /// pool but can no longer dispatch.
    pub fn deactivate(self) -> Result<()> {
        let aborted = self.abort_all_inflight();
        debug!(aborted, "cipher pool deactivated");
        Ok(())
    }

    fn select(&self, mode: CtxMode, req: &CipherRequest) -> Result<usize> {
        let sched_req = SchedRequest {
            mode,
            direction: req.direction(),
            in_bytes: req.src().len(),
            locality: req.locality_hint(),
        };
        let idx = self.scheduler.select_context(&sched_req)?;
        let state = self.ctxs.get(idx).ok_or_else(|| {
            Error::ConfigurationError(format!(
                "scheduler '{}' selected out-of-range context index {}",
                self.scheduler.name(),
                idx
            ))
        })?;
        if state.entry.mode != mode {
            return Err(Error::ConfigurationError(format!(
                "scheduler '{}' selected {} context {} for a {} dispatch",
                self.scheduler.name(),
                state.entry.mode,
                state.entry.handle,
                mode
            )));
        }
        if !state.entry.cap.allows(req.direction()) {
            return Err(Error::ConfigurationError(format!(
                "context {} accepts {} only, request wants {}",
                state.entry.handle,
                state.entry.cap,
                req.direction()
            )));
        }
        Ok(idx)
    }

    fn drain_index(&self, idx: usize, max: usize) -> Result<usize> {
        let state = &self.ctxs[idx];
        if max == 0 {
            return Ok(0);
        }
        if state.retired.load(Ordering::Acquire) {
            return Err(Error::HardwareFault(format!(
                "context {} is retired",
                state.entry.handle
            )));
        }

        let mut inflight = state
            .inflight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let completions = match state.queue.poll(max) {
            Ok(completions) => completions,
            Err(e) => {
                self.retire(idx, "completion poll failed");
                let failed = inflight.len();
                for slot in inflight.drain() {
                    let _ = slot.tx.send(Err(Error::HardwareFault(format!(
                        "context {} failed: {}",
                        state.entry.handle, e
                    ))));
                }
                debug!(
                    ctx = %state.entry.handle,
                    failed,
                    "in-flight requests failed after poll error"
                );
                return Err(Error::HardwareFault(format!(
                    "context {}: {}",
                    state.entry.handle, e
                )));
            }
        };

        let mut reaped = 0;
        for completion in completions {
            let Some(slot) = inflight.try_remove(completion.tag as usize) else {
                debug!(
                    ctx = %state.entry.handle,
                    tag = completion.tag,
                    "completion with unknown tag dropped"
                );
                continue;
            };
            let Inflight { mut request, tx } = slot;
            let outcome = match completion.result {
                Ok(out) => {
                    request.write_output(&out);
                    Ok(request)
                }
                Err(e) => Err(e),
            };
            // a dropped handle discards the result; the completion still counts
            let _ = tx.send(outcome);
            reaped += 1;
        }
        if reaped > 0 {
            trace!(ctx = %state.entry.handle, reaped, "completions drained");
        }
        Ok(reaped)
    }

    fn retire(&self, idx: usize, why: &str) {
        let state = &self.ctxs[idx];
        if !state.retired.swap(true, Ordering::AcqRel) {
            debug!(ctx = %state.entry.handle, why, "context retired");
        }
    }

    fn abort_all_inflight(&self) -> usize {
        let mut total = 0;
        for state in &self.ctxs {
            let mut inflight = state
                .inflight
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            for slot in inflight.drain() {
                let _ = slot.tx.send(Err(Error::HardwareFault(
                    "pool deactivated with requests in flight".to_string(),
                )));
                total += 1;
            }
        }
        total
    }
}

impl std::fmt::Debug for CipherCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CipherCore")
            .field("ctxs", &self.ctxs.len())
            .field("policy", &self.scheduler.name())
            .field("active_sessions", &self.sessions.active())
            .finish()
    }
}

impl Drop for CipherCore {
    fn drop(&mut self) {
        // deactivate() already emptied the tables; this covers plain drops
        let _ = self.abort_all_inflight();
    }
}

/// Checks shared by both dispatch paths. Violations are returned before the
/// scheduler is consulted.
fn validate_request(session: &CipherSession, req: &CipherRequest) -> Result<()> {
    let setup = session.setup();
    match req.key_override_len() {
        Some(len) => check_key_len(setup.alg, setup.mode, len)?,
        None => {
            if !session.has_key() {
                return Err(Error::InvalidArgument("session key not set".to_string()));
            }
        }
    }
    check_geometry(setup.alg, setup.mode, req.src().len(), req.iv().len())?;
    if req.dst().len() < req.src().len() {
        return Err(Error::InvalidArgument(format!(
            "destination holds {} bytes but source is {}",
            req.dst().len(),
            req.src().len()
        )));
    }
    Ok(())
}
