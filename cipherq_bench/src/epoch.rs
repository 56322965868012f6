use std::time::{Duration, Instant};

/// Operations completed within one interval.
pub struct Epoch {
    pub ops: u64,
    pub duration_ns: u64,
}

/// Splits a run into fixed intervals so warmup and cooldown epochs can be
/// trimmed before summarizing.
pub struct EpochClock {
    interval: Duration,
    epochs: Vec<Epoch>,
    epoch_start: Instant,
    epoch_ops: u64,
}

impl EpochClock {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            epochs: Vec::new(),
            epoch_start: Instant::now(),
            epoch_ops: 0,
        }
    }

    /// Credit completed operations, rolling the epoch over once the
    /// interval has elapsed.
    pub fn record(&mut self, delta: u64) {
        self.epoch_ops += delta;
        let elapsed = self.epoch_start.elapsed();
        if elapsed >= self.interval {
            self.epochs.push(Epoch {
                ops: self.epoch_ops,
                duration_ns: elapsed.as_nanos() as u64,
            });
            self.epoch_ops = 0;
            self.epoch_start = Instant::now();
        }
    }

    /// Finalize: record the last partial epoch.
    pub fn finish(&mut self) {
        let elapsed = self.epoch_start.elapsed();
        if self.epoch_ops > 0 {
            self.epochs.push(Epoch {
                ops: self.epoch_ops,
                duration_ns: elapsed.as_nanos() as u64,
            });
        }
    }

    /// Steady-state epochs after trimming `trim` from each end.
    pub fn steady_state(&self, trim: usize) -> &[Epoch] {
        let len = self.epochs.len();
        if len <= trim * 2 {
            return &[];
        }
        &self.epochs[trim..len - trim]
    }
}

/// Print the aggregate rate over the steady-state epochs of all workers.
/// Worker rates are summed because the workers ran concurrently.
pub fn report(label: &str, clocks: &[EpochClock], trim: usize, pkt_len: usize) {
    let mut rate = 0.0f64;
    let mut total_ops = 0u64;
    let mut epochs = 0usize;
    for clock in clocks {
        let steady = clock.steady_state(trim);
        let ops: u64 = steady.iter().map(|e| e.ops).sum();
        let nanos: u64 = steady.iter().map(|e| e.duration_ns).sum();
        if nanos > 0 {
            rate += ops as f64 * 1e9 / nanos as f64;
        }
        total_ops += ops;
        epochs += steady.len();
    }

    if epochs == 0 {
        eprintln!("{}: no steady-state epochs (run longer or trim less)", label);
        return;
    }
    println!(
        "{}: {:.0} ops/s, {:.1} MB/s ({} ops over {} steady epochs)",
        label,
        rate,
        rate * pkt_len as f64 / 1e6,
        total_ops,
        epochs
    );
}
