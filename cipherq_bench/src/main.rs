mod affinity;
mod async_bench;
mod epoch;
mod sync_bench;

use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use cipherq::{
    CipherAlg, CipherCore, CipherMode, CtxEntry, CtxHandle, CtxMode, Direction, DirectionCap,
    PoolConfig, RoundRobin, Scheduler, SingleCtx, SoftEngine,
};

#[derive(Parser, Debug)]
#[command(name = "cipherq_bench")]
#[command(about = "Cipher pool load generator")]
struct Cli {
    /// Cipher algorithm
    #[arg(long, default_value = "aes")]
    alg: AlgArg,

    /// Block mode
    #[arg(long, default_value = "cbc")]
    mode: ModeArg,

    /// Transform direction
    #[arg(long, default_value = "encrypt")]
    direction: DirArg,

    /// Key length in bytes
    #[arg(short = 'k', long, default_value = "16")]
    key_len: usize,

    /// Payload size in bytes (rounded up to the block size where required)
    #[arg(short = 's', long, default_value = "1024")]
    pkt_len: usize,

    /// Benchmark duration in seconds
    #[arg(short = 'd', long, default_value = "10")]
    duration: u64,

    /// Epoch interval in milliseconds
    #[arg(long, default_value = "1000")]
    interval_ms: u64,

    /// Number of epochs to trim from each end
    #[arg(long, default_value = "1")]
    trim: usize,

    /// Number of worker threads
    #[arg(short = 't', long, default_value = "1")]
    threads: usize,

    /// Number of contexts in the pool
    #[arg(short = 'c', long, default_value = "2")]
    ctxs: usize,

    /// Submission queue depth per asynchronous context
    #[arg(long, default_value = "64")]
    queue_depth: usize,

    /// Pin threads to cores, assigned downward from the last core
    #[arg(long)]
    pin: bool,

    #[command(subcommand)]
    path: PathCmd,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum AlgArg {
    Aes,
    Des,
    Des3,
    Sm4,
}

impl From<AlgArg> for CipherAlg {
    fn from(arg: AlgArg) -> Self {
        match arg {
            AlgArg::Aes => CipherAlg::Aes,
            AlgArg::Des => CipherAlg::Des,
            AlgArg::Des3 => CipherAlg::TripleDes,
            AlgArg::Sm4 => CipherAlg::Sm4,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum ModeArg {
    Ecb,
    Cbc,
    Ctr,
    Ofb,
    Cfb,
    Xts,
}

impl From<ModeArg> for CipherMode {
    fn from(arg: ModeArg) -> Self {
        match arg {
            ModeArg::Ecb => CipherMode::Ecb,
            ModeArg::Cbc => CipherMode::Cbc,
            ModeArg::Ctr => CipherMode::Ctr,
            ModeArg::Ofb => CipherMode::Ofb,
            ModeArg::Cfb => CipherMode::Cfb,
            ModeArg::Xts => CipherMode::Xts,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum DirArg {
    Encrypt,
    Decrypt,
}

impl From<DirArg> for Direction {
    fn from(arg: DirArg) -> Self {
        match arg {
            DirArg::Encrypt => Direction::Encrypt,
            DirArg::Decrypt => Direction::Decrypt,
        }
    }
}

#[derive(Subcommand, Debug)]
enum PathCmd {
    /// Blocking dispatch over synchronous contexts
    Sync,
    /// Pipelined submit/drain over asynchronous contexts with one reaper
    Async {
        /// In-flight requests per worker
        #[arg(short = 'i', long, default_value = "32")]
        inflight: usize,
    },
}

pub struct CommonConfig {
    pub alg: CipherAlg,
    pub mode: CipherMode,
    pub direction: Direction,
    pub key_len: usize,
    pub pkt_len: usize,
    pub duration_secs: u64,
    pub interval_ms: u64,
    pub trim: usize,
    pub threads: usize,
    pub ctxs: usize,
    pub queue_depth: usize,
    pub pin: bool,
}

/// Build the pool the run drives: `ctxs` identical contexts, round-robin
/// above one context.
pub fn build_pool(common: &CommonConfig, mode: CtxMode) -> cipherq::Result<CipherCore> {
    let mut config = PoolConfig::new();
    for i in 0..common.ctxs {
        config = config.with_ctx(
            CtxEntry::new(CtxHandle(i as u64), mode, DirectionCap::Both)
                .with_queue_depth(common.queue_depth),
        );
    }
    let scheduler: Box<dyn Scheduler> = if common.ctxs == 1 {
        Box::new(SingleCtx::new())
    } else {
        Box::new(RoundRobin::new())
    };
    CipherCore::activate(config, scheduler, Arc::new(SoftEngine::new()))
}

pub fn bench_key(common: &CommonConfig) -> Vec<u8> {
    (0..common.key_len)
        .map(|i| (i as u8).wrapping_mul(7) | 1)
        .collect()
}

pub fn bench_iv(common: &CommonConfig) -> Vec<u8> {
    vec![0x33; cipherq::iv_len_for(common.alg, common.mode)]
}

fn aligned_pkt_len(alg: CipherAlg, mode: CipherMode, requested: usize) -> usize {
    let block = alg.block_size();
    match mode {
        CipherMode::Ecb | CipherMode::Cbc => requested.max(block).div_ceil(block) * block,
        CipherMode::Xts => requested.max(16),
        _ => requested.max(1),
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let alg: CipherAlg = cli.alg.into();
    let mode: CipherMode = cli.mode.into();

    let pkt_len = aligned_pkt_len(alg, mode, cli.pkt_len);
    if pkt_len != cli.pkt_len {
        eprintln!("pkt-len adjusted to {} for {} {}", pkt_len, alg, mode);
    }

    let common = CommonConfig {
        alg,
        mode,
        direction: cli.direction.into(),
        key_len: cli.key_len,
        pkt_len,
        duration_secs: cli.duration,
        interval_ms: cli.interval_ms,
        trim: cli.trim,
        threads: cli.threads,
        ctxs: cli.ctxs,
        queue_depth: cli.queue_depth,
        pin: cli.pin,
    };

    let result = match cli.path {
        PathCmd::Sync => sync_bench::run(&common),
        PathCmd::Async { inflight } => async_bench::run(&common, inflight),
    };
    if let Err(e) = result {
        eprintln!("benchmark failed: {}", e);
        std::process::exit(1);
    }
}
