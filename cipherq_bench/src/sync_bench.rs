//! Blocking dispatch: worker threads hammer synchronous contexts for a
//! fixed duration.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use cipherq::{CipherRequest, CtxMode, Result, SessionSetup};
use tracing::info;

use crate::affinity;
use crate::epoch::{self, EpochClock};
use crate::CommonConfig;

pub fn run(common: &CommonConfig) -> Result<()> {
    let core = crate::build_pool(common, CtxMode::Sync)?;
    info!(
        ctxs = common.ctxs,
        threads = common.threads,
        pkt_len = common.pkt_len,
        "sync benchmark starting"
    );

    let stop = AtomicBool::new(false);
    let clocks = thread::scope(|s| -> Result<Vec<EpochClock>> {
        let mut workers = Vec::with_capacity(common.threads);
        for t in 0..common.threads {
            let core = &core;
            let stop = &stop;
            workers.push(s.spawn(move || -> Result<EpochClock> {
                affinity::pin_thread_if_configured(common.pin, t);
                let session = core.alloc_session(SessionSetup::new(common.alg, common.mode))?;
                session.set_key(&crate::bench_key(common))?;

                let mut req = CipherRequest::new(common.direction, vec![0xA5; common.pkt_len])
                    .with_iv(crate::bench_iv(common));
                let mut clock = EpochClock::new(Duration::from_millis(common.interval_ms));
                while !stop.load(Ordering::Relaxed) {
                    core.dispatch_sync(&session, &mut req)?;
                    clock.record(1);
                }
                clock.finish();
                Ok(clock)
            }));
        }

        thread::sleep(Duration::from_secs(common.duration_secs));
        stop.store(true, Ordering::Relaxed);

        let mut clocks = Vec::with_capacity(workers.len());
        for worker in workers {
            clocks.push(worker.join().expect("worker thread")?);
        }
        Ok(clocks)
    })?;

    epoch::report("sync", &clocks, common.trim, common.pkt_len);
    core.deactivate()
}
