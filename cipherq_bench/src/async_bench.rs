//! Pipelined submit/drain: each worker keeps a window of requests in
//! flight while one reaper thread drains every context.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use cipherq::{CipherRequest, CompletionHandle, CtxMode, Error, Result, SessionSetup};
use tracing::info;

use crate::affinity;
use crate::epoch::{self, EpochClock};
use crate::CommonConfig;

pub fn run(common: &CommonConfig, inflight: usize) -> Result<()> {
    let core = crate::build_pool(common, CtxMode::Async)?;
    info!(
        ctxs = common.ctxs,
        threads = common.threads,
        inflight,
        pkt_len = common.pkt_len,
        "async benchmark starting"
    );

    let stop = AtomicBool::new(false);
    let reap_stop = AtomicBool::new(false);
    let clocks = thread::scope(|s| -> Result<Vec<EpochClock>> {
        let reaper = {
            let core = &core;
            let reap_stop = &reap_stop;
            s.spawn(move || -> Result<()> {
                affinity::pin_thread_if_configured(common.pin, common.threads);
                while !reap_stop.load(Ordering::Relaxed) {
                    if core.reap(common.queue_depth)? == 0 {
                        std::hint::spin_loop();
                    }
                }
                Ok(())
            })
        };

        let mut workers = Vec::with_capacity(common.threads);
        for t in 0..common.threads {
            let core = &core;
            let stop = &stop;
            workers.push(s.spawn(move || -> Result<EpochClock> {
                affinity::pin_thread_if_configured(common.pin, t);
                let session = core.alloc_session(SessionSetup::new(common.alg, common.mode))?;
                session.set_key(&crate::bench_key(common))?;

                let mut clock = EpochClock::new(Duration::from_millis(common.interval_ms));
                let mut pending: VecDeque<CompletionHandle> =
                    VecDeque::with_capacity(inflight);
                while !stop.load(Ordering::Relaxed) {
                    while pending.len() >= inflight {
                        if let Some(handle) = pending.pop_front() {
                            handle.wait()?;
                            clock.record(1);
                        }
                    }
                    let mut req =
                        CipherRequest::new(common.direction, vec![0xA5; common.pkt_len])
                            .with_iv(crate::bench_iv(common));
                    loop {
                        match core.dispatch_async(&session, req) {
                            Ok(handle) => {
                                pending.push_back(handle);
                                break;
                            }
                            Err(err) if matches!(err.error, Error::QueueFull) => {
                                req = err.into_request();
                                thread::yield_now();
                            }
                            Err(err) => return Err(err.error),
                        }
                    }
                }
                for handle in pending {
                    handle.wait()?;
                    clock.record(1);
                }
                clock.finish();
                Ok(clock)
            }));
        }

        thread::sleep(Duration::from_secs(common.duration_secs));
        stop.store(true, Ordering::Relaxed);

        // keep the reaper alive until every worker has drained its window
        let mut result: Result<Vec<EpochClock>> = Ok(Vec::with_capacity(workers.len()));
        for worker in workers {
            match worker.join().expect("worker thread") {
                Ok(clock) => {
                    if let Ok(clocks) = result.as_mut() {
                        clocks.push(clock);
                    }
                }
                Err(e) => {
                    if result.is_ok() {
                        result = Err(e);
                    }
                }
            }
        }
        reap_stop.store(true, Ordering::Relaxed);
        let reaped = reaper.join().expect("reaper thread");
        let clocks = result?;
        reaped?;
        Ok(clocks)
    })?;

    epoch::report("async", &clocks, common.trim, common.pkt_len);
    core.deactivate()
}
