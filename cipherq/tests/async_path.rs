//! Asynchronous dispatch: submit, drain, backpressure, and fault handling.

mod common;

use cipherq::{
    CipherAlg, CipherCore, CipherMode, CipherRequest, CipherSession, CompletionHandle, CtxHandle,
    CtxMode, Direction, DirectionCap, Error, RoundRobin, SessionSetup,
};
use common::{async_pool, drain_until, entry, hx, mixed_pool, payload, sync_pool, TestPool};

/// Submit with retries on backpressure, draining `ctx` in between. Returns
/// the handle plus how many completions the retry loop drained.
fn submit_with_retry(
    core: &CipherCore,
    session: &CipherSession,
    mut req: CipherRequest,
    ctx: CtxHandle,
) -> (CompletionHandle, usize) {
    let mut drained = 0;
    loop {
        match core.dispatch_async(session, req) {
            Ok(handle) => return (handle, drained),
            Err(err) => {
                assert!(
                    matches!(err.error, Error::QueueFull),
                    "unexpected rejection: {}",
                    err.error
                );
                req = err.into_request();
                drained += core.drain(ctx, 16).expect("drain between retries");
            }
        }
    }
}

// =============================================================================
// Liveness and data integrity
// =============================================================================

#[test]
fn every_submission_is_drained_and_correct() {
    const REQUESTS: usize = 100;

    let pool = mixed_pool(16);
    let session = pool
        .core
        .alloc_session(SessionSetup::new(CipherAlg::Aes, CipherMode::Ecb))
        .expect("session");
    session.set_key(&hx("2b7e151628aed2a6abf7158809cf4f3c")).expect("key");

    // the synchronous context provides the reference transforms
    let plaintexts: Vec<Vec<u8>> = (0..REQUESTS).map(|i| payload(32, i as u8)).collect();
    let mut expected = Vec::with_capacity(REQUESTS);
    for pt in &plaintexts {
        let mut req = CipherRequest::new(Direction::Encrypt, pt.clone());
        pool.core.dispatch_sync(&session, &mut req).expect("reference encrypt");
        expected.push(req.output().to_vec());
    }

    let async_ctx = CtxHandle(1);
    let mut drained = 0;
    let mut handles = Vec::with_capacity(REQUESTS);
    for pt in &plaintexts {
        let req = CipherRequest::new(Direction::Encrypt, pt.clone());
        let (handle, n) = submit_with_retry(&pool.core, &session, req, async_ctx);
        drained += n;
        handles.push(handle);
    }

    drained += drain_until(&pool.core, async_ctx, REQUESTS - drained, 10_000);
    assert_eq!(drained, REQUESTS);

    for (handle, want) in handles.into_iter().zip(&expected) {
        let done = handle.wait().expect("completion");
        assert_eq!(done.output(), &want[..]);
    }
}

// =============================================================================
// Backpressure
// =============================================================================

#[test]
fn full_queue_hands_the_request_back() {
    let pool = async_pool(1);
    let session = pool
        .core
        .alloc_session(SessionSetup::new(CipherAlg::Aes, CipherMode::Cbc))
        .expect("session");
    session.set_key(&[0x22u8; 16]).expect("key");
    let ctx = CtxHandle(0);

    // a megabyte keeps the worker busy while the small submissions pile up
    let big = CipherRequest::new(Direction::Encrypt, vec![0u8; 1 << 20]).with_iv(vec![0u8; 16]);
    let mut handles = vec![pool.core.dispatch_async(&session, big).expect("first submit")];

    let mut rejected = None;
    for i in 0..1000 {
        let req = CipherRequest::new(Direction::Encrypt, payload(16, i as u8))
            .with_iv(vec![0u8; 16]);
        match pool.core.dispatch_async(&session, req) {
            Ok(handle) => handles.push(handle),
            Err(err) => {
                assert!(matches!(err.error, Error::QueueFull), "{}", err.error);
                assert!(err.error.is_retriable());
                rejected = Some(err.into_request());
                break;
            }
        }
    }
    let retry = rejected.expect("a depth-1 queue must reject under load");
    assert_eq!(retry.src().len(), 16, "request came back intact");

    drain_until(&pool.core, ctx, handles.len(), 20_000);
    for handle in handles {
        handle.wait().expect("completion").output();
    }

    // after draining, the handed-back request goes through
    let handle = pool.core.dispatch_async(&session, retry).expect("retry accepted");
    drain_until(&pool.core, ctx, 1, 10_000);
    let done = handle.wait().expect("completion");
    assert_eq!(done.output().len(), 16);
}

// =============================================================================
// Completion handles
// =============================================================================

#[test]
fn try_wait_resolves_exactly_once_after_drain() {
    let pool = async_pool(8);
    let session = pool
        .core
        .alloc_session(SessionSetup::new(CipherAlg::Aes, CipherMode::Ecb))
        .expect("session");
    session.set_key(&hx("2b7e151628aed2a6abf7158809cf4f3c")).expect("key");

    let req = CipherRequest::new(Direction::Encrypt, hx("6bc1bee22e409f96e93d7e117393172a"));
    let mut handle = pool.core.dispatch_async(&session, req).expect("submit");

    // the engine may have finished already, but nothing resolves before a
    // drain delivers it
    assert!(handle.try_wait().is_none());

    drain_until(&pool.core, CtxHandle(0), 1, 10_000);
    let done = handle.try_wait().expect("resolved").expect("completion");
    assert_eq!(hex::encode(done.output()), "3ad77bb40d7a3660a89ecaf32466ef97");
    assert!(handle.try_wait().is_none(), "second probe must be empty");
}

#[test]
fn dropped_handle_still_counts_as_drained() {
    let pool = async_pool(8);
    let session = pool
        .core
        .alloc_session(SessionSetup::new(CipherAlg::Sm4, CipherMode::Ecb))
        .expect("session");
    session.set_key(&[0x44u8; 16]).expect("key");

    let keep = pool
        .core
        .dispatch_async(
            &session,
            CipherRequest::new(Direction::Encrypt, payload(16, 1)),
        )
        .expect("submit");
    let discard = pool
        .core
        .dispatch_async(
            &session,
            CipherRequest::new(Direction::Encrypt, payload(16, 2)),
        )
        .expect("submit");
    drop(discard);

    let drained = drain_until(&pool.core, CtxHandle(0), 2, 10_000);
    assert_eq!(drained, 2);
    keep.wait().expect("completion");
}

// =============================================================================
// Submission rejections
// =============================================================================

#[test]
fn submission_needs_an_async_context() {
    // the single-context policy points at a synchronous entry; the pool
    // catches the mode mismatch
    let pool = sync_pool();
    let session = pool
        .core
        .alloc_session(SessionSetup::new(CipherAlg::Aes, CipherMode::Ecb))
        .expect("session");
    session.set_key(&[0u8; 16]).expect("key");

    let err = pool
        .core
        .dispatch_async(
            &session,
            CipherRequest::new(Direction::Encrypt, payload(16, 3)),
        )
        .unwrap_err();
    assert!(matches!(err.error, Error::ConfigurationError(_)), "{}", err.error);
    assert_eq!(err.into_request().src().len(), 16);

    // round-robin has no async lane at all and reports exhaustion
    let pool = TestPool::activate(
        vec![entry(0, CtxMode::Sync, DirectionCap::Both)],
        Box::new(RoundRobin::new()),
    );
    let session = pool
        .core
        .alloc_session(SessionSetup::new(CipherAlg::Aes, CipherMode::Ecb))
        .expect("session");
    session.set_key(&[0u8; 16]).expect("key");
    let err = pool
        .core
        .dispatch_async(
            &session,
            CipherRequest::new(Direction::Encrypt, payload(16, 4)),
        )
        .unwrap_err();
    assert!(matches!(err.error, Error::ContextExhausted), "{}", err.error);
}

#[test]
fn invalid_submissions_never_enter_the_queue() {
    let pool = async_pool(8);
    let session = pool
        .core
        .alloc_session(SessionSetup::new(CipherAlg::Aes, CipherMode::Cbc))
        .expect("session");

    // no key installed
    let err = pool
        .core
        .dispatch_async(
            &session,
            CipherRequest::new(Direction::Encrypt, payload(16, 5)).with_iv(vec![0u8; 16]),
        )
        .unwrap_err();
    assert!(matches!(err.error, Error::InvalidArgument(_)), "{}", err.error);

    session.set_key(&[0u8; 16]).expect("key");

    // bad geometry
    let err = pool
        .core
        .dispatch_async(
            &session,
            CipherRequest::new(Direction::Encrypt, payload(20, 6)).with_iv(vec![0u8; 16]),
        )
        .unwrap_err();
    assert!(matches!(err.error, Error::InvalidArgument(_)), "{}", err.error);

    // nothing reached the context
    assert_eq!(pool.core.drain(CtxHandle(0), 16).expect("drain"), 0);
}

// =============================================================================
// Drain argument validation
// =============================================================================

#[test]
fn drain_validates_its_target() {
    let pool = mixed_pool(8);

    let err = pool.core.drain(CtxHandle(7), 4).unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)), "{err}");

    let err = pool.core.drain(CtxHandle(0), 4).unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)), "{err}");

    assert_eq!(pool.core.drain(CtxHandle(1), 0).expect("zero budget"), 0);
    assert_eq!(pool.core.drain(CtxHandle(1), 4).expect("idle drain"), 0);
}

// =============================================================================
// Injected faults
// =============================================================================

#[test]
fn per_operation_faults_fail_handles_not_the_context() {
    let pool = async_pool(8);
    let session = pool
        .core
        .alloc_session(SessionSetup::new(CipherAlg::Aes, CipherMode::Ecb))
        .expect("session");
    session.set_key(&[0x55u8; 16]).expect("key");
    let ctx = CtxHandle(0);

    pool.engine.fail_after(2);

    let mut handles = Vec::new();
    for i in 0..5 {
        let req = CipherRequest::new(Direction::Encrypt, payload(16, i as u8));
        handles.push(pool.core.dispatch_async(&session, req).expect("submit"));
    }
    drain_until(&pool.core, ctx, 5, 10_000);

    // the worker runs submissions in order: two succeed, three carry faults
    let results: Vec<bool> = handles
        .into_iter()
        .map(|h| h.wait().is_ok())
        .collect();
    assert_eq!(results, vec![true, true, false, false, false]);

    // per-operation faults do not retire the context
    pool.engine.disarm();
    let req = CipherRequest::new(Direction::Encrypt, payload(16, 9));
    let handle = pool.core.dispatch_async(&session, req).expect("submit after disarm");
    drain_until(&pool.core, ctx, 1, 10_000);
    handle.wait().expect("completion after disarm");
}

#[test]
fn fatal_engine_failure_retires_the_context() {
    let pool = async_pool(8);
    let session = pool
        .core
        .alloc_session(SessionSetup::new(CipherAlg::Aes, CipherMode::Ecb))
        .expect("session");
    session.set_key(&[0x66u8; 16]).expect("key");
    let ctx = CtxHandle(0);

    pool.engine.fail_fatal_after(0);

    let mut handles = Vec::new();
    for i in 0..3 {
        let req = CipherRequest::new(Direction::Encrypt, payload(16, i as u8));
        handles.push(pool.core.dispatch_async(&session, req).expect("submit"));
    }

    // the worker dies on its first pickup; keep draining until the pool
    // notices
    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(10);
    let fault = loop {
        match pool.core.drain(ctx, 16) {
            Ok(_) => {
                assert!(std::time::Instant::now() < deadline, "fault never surfaced");
                std::hint::spin_loop();
            }
            Err(err) => break err,
        }
    };
    assert!(matches!(fault, Error::HardwareFault(_)), "{fault}");

    // every in-flight handle fails
    for handle in handles {
        let err = handle.wait().unwrap_err();
        assert!(matches!(err, Error::HardwareFault(_)), "{err}");
    }

    // the retired context accepts nothing further
    let err = pool
        .core
        .dispatch_async(
            &session,
            CipherRequest::new(Direction::Encrypt, payload(16, 8)),
        )
        .unwrap_err();
    assert!(matches!(err.error, Error::HardwareFault(_)), "{}", err.error);

    let err = pool.core.drain(ctx, 16).unwrap_err();
    assert!(matches!(err, Error::HardwareFault(_)), "{err}");
}

// =============================================================================
// Teardown with work in flight
// =============================================================================

#[test]
fn deactivate_fails_undrained_requests() {
    let pool = async_pool(8);
    let session = pool
        .core
        .alloc_session(SessionSetup::new(CipherAlg::Aes, CipherMode::Ecb))
        .expect("session");
    session.set_key(&[0x77u8; 16]).expect("key");

    let handle = pool
        .core
        .dispatch_async(
            &session,
            CipherRequest::new(Direction::Encrypt, payload(16, 1)),
        )
        .expect("submit");

    drop(session);
    pool.core.deactivate().expect("deactivate");

    let err = handle.wait().unwrap_err();
    assert!(matches!(err, Error::HardwareFault(_)), "{err}");
}
