//! Concurrent dispatch across threads sharing one pool.

mod common;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;

use cipherq::{
    CipherAlg, CipherCore, CipherMode, CipherRequest, CipherSession, CtxMode, Direction,
    DirectionCap, Error, RoundRobin, SessionSetup,
};
use common::{entry, payload, TestPool};

/// Submit and wait, retrying on backpressure. A reaper thread must be
/// draining for the wait to resolve.
fn submit_and_wait(
    core: &CipherCore,
    session: &CipherSession,
    mut req: CipherRequest,
) -> CipherRequest {
    let handle = loop {
        match core.dispatch_async(session, req) {
            Ok(handle) => break handle,
            Err(err) => {
                assert!(
                    matches!(err.error, Error::QueueFull),
                    "unexpected rejection: {}",
                    err.error
                );
                req = err.into_request();
                thread::yield_now();
            }
        }
    };
    handle.wait().expect("completion")
}

#[test]
fn sync_dispatch_is_thread_safe() {
    const THREADS: usize = 4;
    const REQUESTS: usize = 50;

    let pool = TestPool::activate(
        vec![
            entry(0, CtxMode::Sync, DirectionCap::Both),
            entry(1, CtxMode::Sync, DirectionCap::Both),
        ],
        Box::new(RoundRobin::new()),
    );
    let core = &pool.core;
    let completed = AtomicUsize::new(0);

    thread::scope(|s| {
        for t in 0..THREADS {
            let completed = &completed;
            s.spawn(move || {
                let session = core
                    .alloc_session(SessionSetup::new(CipherAlg::Aes, CipherMode::Cbc))
                    .expect("session");
                session.set_key(&[t as u8 + 1; 16]).expect("key");

                for i in 0..REQUESTS {
                    let plain = payload(64, (t * REQUESTS + i) as u8);
                    let iv = vec![0x11u8; 16];

                    let mut req =
                        CipherRequest::new(Direction::Encrypt, plain.clone()).with_iv(iv.clone());
                    core.dispatch_sync(&session, &mut req).expect("encrypt");

                    let mut back =
                        CipherRequest::new(Direction::Decrypt, req.output().to_vec()).with_iv(iv);
                    core.dispatch_sync(&session, &mut back).expect("decrypt");
                    assert_eq!(back.output(), &plain[..]);

                    completed.fetch_add(1, Ordering::Relaxed);
                }
            });
        }
    });

    assert_eq!(completed.load(Ordering::Relaxed), THREADS * REQUESTS);
    assert_eq!(pool.core.active_sessions(), 0);
}

#[test]
fn async_storm_with_one_reaper() {
    const SUBMITTERS: usize = 4;
    const REQUESTS: usize = 32;

    let pool = TestPool::activate(
        vec![
            entry(0, CtxMode::Async, DirectionCap::Both).with_queue_depth(16),
            entry(1, CtxMode::Async, DirectionCap::Both).with_queue_depth(16),
        ],
        Box::new(RoundRobin::new()),
    );
    let core = &pool.core;
    let stop = AtomicBool::new(false);

    thread::scope(|s| {
        let reaper = s.spawn(|| {
            while !stop.load(Ordering::Acquire) {
                if core.reap(32).expect("reap") == 0 {
                    thread::yield_now();
                }
            }
        });

        let mut workers = Vec::with_capacity(SUBMITTERS);
        for t in 0..SUBMITTERS {
            workers.push(s.spawn(move || {
                let session = core
                    .alloc_session(SessionSetup::new(CipherAlg::Sm4, CipherMode::Ctr))
                    .expect("session");
                session.set_key(&[t as u8 + 1; 16]).expect("key");

                for i in 0..REQUESTS {
                    // varied lengths, the keystream modes take any
                    let plain = payload(48 + i, t as u8);
                    let iv = vec![t as u8 + 1; 16];

                    let encrypted = submit_and_wait(
                        core,
                        &session,
                        CipherRequest::new(Direction::Encrypt, plain.clone())
                            .with_iv(iv.clone()),
                    );
                    let decrypted = submit_and_wait(
                        core,
                        &session,
                        CipherRequest::new(
                            Direction::Decrypt,
                            encrypted.output().to_vec(),
                        )
                        .with_iv(iv),
                    );
                    assert_eq!(decrypted.output(), &plain[..]);
                }
            }));
        }

        for worker in workers {
            worker.join().expect("submitter");
        }
        stop.store(true, Ordering::Release);
        reaper.join().expect("reaper");
    });

    assert_eq!(pool.core.active_sessions(), 0);
    pool.core.deactivate().expect("deactivate");
}
