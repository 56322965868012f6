//! Software cipher engine.
//!
//! [`SoftEngine`] implements the full algorithm/mode matrix in software so
//! the pool runs anywhere, and doubles as the test double for the dispatch
//! machinery: fault injection knobs let tests drive the busy, per-operation
//! fault, and fatal queue-death paths deterministically.
//!
//! Synchronous contexts execute inline on the calling thread. Asynchronous
//! contexts run a dedicated worker thread fed by a bounded channel sized to
//! the context's queue depth; a full channel surfaces as
//! [`SubmitRejected::Full`].

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TryRecvError, TrySendError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use aes::{Aes128, Aes192, Aes256};
use cipher::block_padding::NoPadding;
use cipher::consts::U16;
use cipher::{
    AsyncStreamCipher, BlockCipher, BlockDecrypt, BlockDecryptMut, BlockEncrypt, BlockEncryptMut,
    KeyInit, KeyIvInit, StreamCipher,
};
use des::{Des, TdesEde2, TdesEde3};
use sm4::Sm4;
use xts_mode::Xts128;

use crate::algo::{CipherAlg, CipherMode, Direction};
use crate::config::{CtxEntry, CtxMode};
use crate::engine::{CipherEngine, CipherOp, EngineQueue, SubmitRejected, WorkCompletion, WorkDescriptor};
use crate::error::{Error, Result};

/// Countdowns shared by every queue of one engine. Negative means disarmed;
/// once a countdown reaches zero it stays tripped until rearmed.
#[derive(Debug)]
struct FaultPlan {
    op: AtomicI64,
    fatal: AtomicI64,
}

impl FaultPlan {
    fn new() -> Self {
        Self {
            op: AtomicI64::new(-1),
            fatal: AtomicI64::new(-1),
        }
    }

    fn arm(budget: &AtomicI64, ops: u64) {
        budget.store(i64::try_from(ops).unwrap_or(i64::MAX), Ordering::Release);
    }

    fn trip(budget: &AtomicI64) -> bool {
        let mut cur = budget.load(Ordering::Acquire);
        loop {
            if cur < 0 {
                return false;
            }
            if cur == 0 {
                return true;
            }
            match budget.compare_exchange_weak(cur, cur - 1, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => return false,
                Err(seen) => cur = seen,
            }
        }
    }

    fn trip_op(&self) -> bool {
        Self::trip(&self.op)
    }

    fn trip_fatal(&self) -> bool {
        Self::trip(&self.fatal)
    }
}

/// Pure-software [`CipherEngine`] covering the whole supported matrix.
#[derive(Debug)]
pub struct SoftEngine {
    fault: Arc<FaultPlan>,
}

impl SoftEngine {
    pub fn new() -> Self {
        Self {
            fault: Arc::new(FaultPlan::new()),
        }
    }

    /// After `ops` further operations succeed, every subsequent operation
    /// reports a fault: synchronous executes fail, asynchronous completions
    /// carry an error. Shared by all queues of this engine.
    pub fn fail_after(&self, ops: u64) {
        FaultPlan::arm(&self.fault.op, ops);
    }

    /// After `ops` further asynchronous operations succeed, the worker
    /// behind each asynchronous queue dies the next time it picks up work.
    /// Queued and later work is lost and surfaces as a poll failure.
    pub fn fail_fatal_after(&self, ops: u64) {
        FaultPlan::arm(&self.fault.fatal, ops);
    }

    /// Clear both fault countdowns.
    pub fn disarm(&self) {
        self.fault.op.store(-1, Ordering::Release);
        self.fault.fatal.store(-1, Ordering::Release);
    }
}

impl Default for SoftEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl CipherEngine for SoftEngine {
    fn open_queue(&self, entry: &CtxEntry) -> Result<Box<dyn EngineQueue>> {
        match entry.mode {
            CtxMode::Sync => Ok(Box::new(InlineQueue {
                fault: Arc::clone(&self.fault),
            })),
            CtxMode::Async => {
                let queue =
                    WorkerQueue::spawn(entry.effective_queue_depth(), Arc::clone(&self.fault))?;
                Ok(Box::new(queue))
            }
        }
    }
}

/// Synchronous queue: runs the transform on the calling thread.
struct InlineQueue {
    fault: Arc<FaultPlan>,
}

impl EngineQueue for InlineQueue {
    fn execute(&self, op: CipherOp<'_>) -> Result<()> {
        if self.fault.trip_op() {
            return Err(Error::HardwareFault("injected engine fault".to_string()));
        }
        let out = transform(op.alg, op.mode, op.direction, op.key, op.iv, op.src)?;
        op.dst[..out.len()].copy_from_slice(&out);
        Ok(())
    }

    fn submit(&self, desc: WorkDescriptor) -> std::result::Result<(), SubmitRejected> {
        Err(SubmitRejected::Closed(desc))
    }

    fn poll(&self, _max: usize) -> Result<Vec<WorkCompletion>> {
        Err(Error::InvalidArgument(
            "synchronous queue has no completion queue".to_string(),
        ))
    }
}

/// Asynchronous queue: a bounded submission channel drained by one worker
/// thread, completions buffered until polled.
struct WorkerQueue {
    jobs: Option<SyncSender<WorkDescriptor>>,
    completions: Mutex<Receiver<WorkCompletion>>,
    worker: Option<JoinHandle<()>>,
}

impl WorkerQueue {
    fn spawn(depth: usize, fault: Arc<FaultPlan>) -> Result<Self> {
        let (job_tx, job_rx) = mpsc::sync_channel::<WorkDescriptor>(depth);
        let (done_tx, done_rx) = mpsc::channel::<WorkCompletion>();
        let worker = thread::Builder::new()
            .name("cipherq-soft".to_string())
            .spawn(move || worker_loop(job_rx, done_tx, fault))
            .map_err(|e| Error::AllocationError(format!("spawn cipher worker: {}", e)))?;
        Ok(Self {
            jobs: Some(job_tx),
            completions: Mutex::new(done_rx),
            worker: Some(worker),
        })
    }
}

impl EngineQueue for WorkerQueue {
    fn execute(&self, _op: CipherOp<'_>) -> Result<()> {
        Err(Error::InvalidArgument(
            "asynchronous queue cannot execute inline".to_string(),
        ))
    }

    fn submit(&self, desc: WorkDescriptor) -> std::result::Result<(), SubmitRejected> {
        let Some(jobs) = &self.jobs else {
            return Err(SubmitRejected::Closed(desc));
        };
        match jobs.try_send(desc) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(desc)) => Err(SubmitRejected::Full(desc)),
            Err(TrySendError::Disconnected(desc)) => Err(SubmitRejected::Closed(desc)),
        }
    }

    fn poll(&self, max: usize) -> Result<Vec<WorkCompletion>> {
        let completions = self
            .completions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut out = Vec::new();
        while out.len() < max {
            match completions.try_recv() {
                Ok(completion) => out.push(completion),
                Err(TryRecvError::Empty) => break,
                // buffered completions drain first; a disconnect after that
                // means the worker died with work outstanding
                Err(TryRecvError::Disconnected) => {
                    if out.is_empty() {
                        return Err(Error::HardwareFault("cipher worker exited".to_string()));
                    }
                    break;
                }
            }
        }
        Ok(out)
    }
}

impl Drop for WorkerQueue {
    fn drop(&mut self) {
        self.jobs.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn worker_loop(
    jobs: Receiver<WorkDescriptor>,
    done: mpsc::Sender<WorkCompletion>,
    fault: Arc<FaultPlan>,
) {
    while let Ok(desc) = jobs.recv() {
        if fault.trip_fatal() {
            return;
        }
        let result = if fault.trip_op() {
            Err(Error::HardwareFault("injected operation fault".to_string()))
        } else {
            transform(
                desc.alg,
                desc.mode,
                desc.direction,
                desc.key.as_bytes(),
                &desc.iv,
                &desc.src,
            )
            .map(Vec::into_boxed_slice)
        };
        if done
            .send(WorkCompletion {
                tag: desc.tag,
                result,
            })
            .is_err()
        {
            return;
        }
    }
}

/// Dispatch one operation over the concrete cipher types. Key lengths pick
/// the flavor within an algorithm; inputs were validated by the pool, so
/// failures here map to the closest argument error.
fn transform(
    alg: CipherAlg,
    mode: CipherMode,
    direction: Direction,
    key: &[u8],
    iv: &[u8],
    src: &[u8],
) -> Result<Vec<u8>> {
    match (alg, mode) {
        (CipherAlg::Aes, CipherMode::Ecb) => match key.len() {
            16 => ecb_run::<Aes128>(alg, direction, key, src),
            24 => ecb_run::<Aes192>(alg, direction, key, src),
            32 => ecb_run::<Aes256>(alg, direction, key, src),
            got => Err(Error::InvalidKeyLength { alg, got }),
        },
        (CipherAlg::Aes, CipherMode::Cbc) => match key.len() {
            16 => cbc_run::<Aes128>(alg, direction, key, iv, src),
            24 => cbc_run::<Aes192>(alg, direction, key, iv, src),
            32 => cbc_run::<Aes256>(alg, direction, key, iv, src),
            got => Err(Error::InvalidKeyLength { alg, got }),
        },
        (CipherAlg::Aes, CipherMode::Ctr) => match key.len() {
            16 => ctr_run::<Aes128>(alg, key, iv, src),
            24 => ctr_run::<Aes192>(alg, key, iv, src),
            32 => ctr_run::<Aes256>(alg, key, iv, src),
            got => Err(Error::InvalidKeyLength { alg, got }),
        },
        (CipherAlg::Aes, CipherMode::Ofb) => match key.len() {
            16 => ofb_run::<Aes128>(alg, key, iv, src),
            24 => ofb_run::<Aes192>(alg, key, iv, src),
            32 => ofb_run::<Aes256>(alg, key, iv, src),
            got => Err(Error::InvalidKeyLength { alg, got }),
        },
        (CipherAlg::Aes, CipherMode::Cfb) => match key.len() {
            16 => cfb_run::<Aes128>(alg, direction, key, iv, src),
            24 => cfb_run::<Aes192>(alg, direction, key, iv, src),
            32 => cfb_run::<Aes256>(alg, direction, key, iv, src),
            got => Err(Error::InvalidKeyLength { alg, got }),
        },
        (CipherAlg::Aes, CipherMode::Xts) => match key.len() {
            32 => xts_run::<Aes128>(alg, direction, key, iv, src),
            64 => xts_run::<Aes256>(alg, direction, key, iv, src),
            got => Err(Error::InvalidKeyLength { alg, got }),
        },
        (CipherAlg::Des, CipherMode::Ecb) => ecb_run::<Des>(alg, direction, key, src),
        (CipherAlg::Des, CipherMode::Cbc) => cbc_run::<Des>(alg, direction, key, iv, src),
        (CipherAlg::TripleDes, CipherMode::Ecb) => match key.len() {
            16 => ecb_run::<TdesEde2>(alg, direction, key, src),
            24 => ecb_run::<TdesEde3>(alg, direction, key, src),
            got => Err(Error::InvalidKeyLength { alg, got }),
        },
        (CipherAlg::TripleDes, CipherMode::Cbc) => match key.len() {
            16 => cbc_run::<TdesEde2>(alg, direction, key, iv, src),
            24 => cbc_run::<TdesEde3>(alg, direction, key, iv, src),
            got => Err(Error::InvalidKeyLength { alg, got }),
        },
        (CipherAlg::Sm4, CipherMode::Ecb) => ecb_run::<Sm4>(alg, direction, key, src),
        (CipherAlg::Sm4, CipherMode::Cbc) => cbc_run::<Sm4>(alg, direction, key, iv, src),
        (CipherAlg::Sm4, CipherMode::Ctr) => ctr_run::<Sm4>(alg, key, iv, src),
        (CipherAlg::Sm4, CipherMode::Ofb) => ofb_run::<Sm4>(alg, key, iv, src),
        (CipherAlg::Sm4, CipherMode::Cfb) => cfb_run::<Sm4>(alg, direction, key, iv, src),
        (CipherAlg::Sm4, CipherMode::Xts) => match key.len() {
            32 => xts_run::<Sm4>(alg, direction, key, iv, src),
            got => Err(Error::InvalidKeyLength { alg, got }),
        },
        (CipherAlg::Des | CipherAlg::TripleDes, _) => Err(Error::InvalidArgument(format!(
            "{} cannot run in {} mode",
            alg, mode
        ))),
    }
}

fn bad_key(alg: CipherAlg, key: &[u8]) -> Error {
    Error::InvalidKeyLength {
        alg,
        got: key.len(),
    }
}

fn ecb_run<C>(alg: CipherAlg, direction: Direction, key: &[u8], src: &[u8]) -> Result<Vec<u8>>
where
    C: BlockCipher + BlockEncryptMut + BlockDecryptMut + KeyInit,
{
    match direction {
        Direction::Encrypt => {
            let enc = ecb::Encryptor::<C>::new_from_slice(key).map_err(|_| bad_key(alg, key))?;
            Ok(enc.encrypt_padded_vec_mut::<NoPadding>(src))
        }
        Direction::Decrypt => {
            let dec = ecb::Decryptor::<C>::new_from_slice(key).map_err(|_| bad_key(alg, key))?;
            dec.decrypt_padded_vec_mut::<NoPadding>(src)
                .map_err(|_| Error::InvalidArgument("source is not block aligned".to_string()))
        }
    }
}

fn cbc_run<C>(
    alg: CipherAlg,
    direction: Direction,
    key: &[u8],
    iv: &[u8],
    src: &[u8],
) -> Result<Vec<u8>>
where
    C: BlockCipher + BlockEncryptMut + BlockDecryptMut + KeyInit,
{
    match direction {
        Direction::Encrypt => {
            let enc =
                cbc::Encryptor::<C>::new_from_slices(key, iv).map_err(|_| bad_key(alg, key))?;
            Ok(enc.encrypt_padded_vec_mut::<NoPadding>(src))
        }
        Direction::Decrypt => {
            let dec =
                cbc::Decryptor::<C>::new_from_slices(key, iv).map_err(|_| bad_key(alg, key))?;
            dec.decrypt_padded_vec_mut::<NoPadding>(src)
                .map_err(|_| Error::InvalidArgument("source is not block aligned".to_string()))
        }
    }
}

// counter and output-feedback keystreams are direction-agnostic

fn ctr_run<C>(alg: CipherAlg, key: &[u8], iv: &[u8], src: &[u8]) -> Result<Vec<u8>>
where
    C: BlockCipher<BlockSize = U16> + BlockEncryptMut + KeyInit,
{
    let mut cipher = ctr::Ctr128BE::<C>::new_from_slices(key, iv).map_err(|_| bad_key(alg, key))?;
    let mut out = src.to_vec();
    cipher.apply_keystream(&mut out);
    Ok(out)
}

fn ofb_run<C>(alg: CipherAlg, key: &[u8], iv: &[u8], src: &[u8]) -> Result<Vec<u8>>
where
    C: BlockCipher<BlockSize = U16> + BlockEncryptMut + KeyInit,
{
    let mut cipher = ofb::Ofb::<C>::new_from_slices(key, iv).map_err(|_| bad_key(alg, key))?;
    let mut out = src.to_vec();
    cipher.apply_keystream(&mut out);
    Ok(out)
}

fn cfb_run<C>(
    alg: CipherAlg,
    direction: Direction,
    key: &[u8],
    iv: &[u8],
    src: &[u8],
) -> Result<Vec<u8>>
where
    C: BlockCipher + BlockEncryptMut + KeyInit,
{
    let mut out = src.to_vec();
    match direction {
        Direction::Encrypt => cfb_mode::Encryptor::<C>::new_from_slices(key, iv)
            .map_err(|_| bad_key(alg, key))?
            .encrypt(&mut out),
        Direction::Decrypt => cfb_mode::Decryptor::<C>::new_from_slices(key, iv)
            .map_err(|_| bad_key(alg, key))?
            .decrypt(&mut out),
    }
    Ok(out)
}

// xts keys carry the data sub-key in the low half and the tweak sub-key in
// the high half; the iv is the 16-byte tweak and the whole request is one
// data unit

fn xts_run<C>(
    alg: CipherAlg,
    direction: Direction,
    key: &[u8],
    iv: &[u8],
    src: &[u8],
) -> Result<Vec<u8>>
where
    C: BlockCipher<BlockSize = U16> + BlockEncrypt + BlockDecrypt + KeyInit,
{
    let half = key.len() / 2;
    let data_cipher = C::new_from_slice(&key[..half]).map_err(|_| bad_key(alg, key))?;
    let tweak_cipher = C::new_from_slice(&key[half..]).map_err(|_| bad_key(alg, key))?;
    let xts = Xts128::<C>::new(data_cipher, tweak_cipher);

    let mut tweak = [0u8; 16];
    tweak.copy_from_slice(iv);
    let mut out = src.to_vec();
    match direction {
        Direction::Encrypt => xts.encrypt_sector(&mut out, tweak),
        Direction::Decrypt => xts.decrypt_sector(&mut out, tweak),
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fault_budget_counts_down_and_stays_tripped() {
        let plan = FaultPlan::new();
        assert!(!plan.trip_op());
        assert!(!plan.trip_op());

        FaultPlan::arm(&plan.op, 2);
        assert!(!plan.trip_op());
        assert!(!plan.trip_op());
        assert!(plan.trip_op());
        assert!(plan.trip_op());

        plan.op.store(-1, Ordering::Release);
        assert!(!plan.trip_op());
    }

    #[test]
    fn transform_rejects_des_stream_modes() {
        let err = transform(
            CipherAlg::Des,
            CipherMode::Ctr,
            Direction::Encrypt,
            &[0u8; 8],
            &[0u8; 8],
            &[0u8; 8],
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn transform_round_trips_a_block() {
        let key = [7u8; 16];
        let iv = [3u8; 16];
        let plain = b"0123456789ABCDEF".to_vec();
        let cipher = transform(
            CipherAlg::Aes,
            CipherMode::Cbc,
            Direction::Encrypt,
            &key,
            &iv,
            &plain,
        )
        .expect("encrypt");
        assert_ne!(cipher, plain);
        let back = transform(
            CipherAlg::Aes,
            CipherMode::Cbc,
            Direction::Decrypt,
            &key,
            &iv,
            &cipher,
        )
        .expect("decrypt");
        assert_eq!(back, plain);
    }
}
