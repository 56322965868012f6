//! Cipher requests and per-request completion handles.

use std::fmt;
use std::sync::mpsc;

use crate::algo::Direction;
use crate::error::{Error, Result};
use crate::secret::SecretKey;

/// One cipher operation: direction plus owned source, destination, and IV
/// buffers.
///
/// On the synchronous path the caller keeps ownership across the call. On
/// the asynchronous path the request moves into the pool at submission and
/// comes back through its [`CompletionHandle`] once drained, so no buffer is
/// ever shared between the caller and an operation in flight.
pub struct CipherRequest {
    direction: Direction,
    src: Vec<u8>,
    dst: Vec<u8>,
    iv: Vec<u8>,
    key_override: Option<SecretKey>,
    locality_hint: Option<usize>,
    out_len: usize,
}

impl CipherRequest {
    /// Build a request. The destination buffer is sized to `src`.
    pub fn new(direction: Direction, src: Vec<u8>) -> Self {
        let dst = vec![0u8; src.len()];
        Self {
            direction,
            src,
            dst,
            iv: Vec::new(),
            key_override: None,
            locality_hint: None,
            out_len: 0,
        }
    }

    /// Set the IV consumed by this call. The pool reads it and never
    /// advances it; chained calls update it themselves.
    pub fn with_iv(mut self, iv: Vec<u8>) -> Self {
        self.iv = iv;
        self
    }

    /// Replace the destination buffer. Must be at least `src` long; checked
    /// at dispatch.
    pub fn with_dst(mut self, dst: Vec<u8>) -> Self {
        self.dst = dst;
        self.out_len = 0;
        self
    }

    /// Use `key` for this request instead of the session key. The length is
    /// validated against the session's algorithm at dispatch.
    pub fn with_key(mut self, key: &[u8]) -> Self {
        self.key_override = Some(SecretKey::copy_from(key));
        self
    }

    /// Placement hint forwarded to the scheduling policy.
    pub fn with_locality_hint(mut self, node: usize) -> Self {
        self.locality_hint = Some(node);
        self
    }

    #[inline]
    pub fn direction(&self) -> Direction {
        self.direction
    }

    #[inline]
    pub fn src(&self) -> &[u8] {
        &self.src
    }

    /// The full destination buffer, including any tail beyond the output.
    #[inline]
    pub fn dst(&self) -> &[u8] {
        &self.dst
    }

    #[inline]
    pub fn iv(&self) -> &[u8] {
        &self.iv
    }

    #[inline]
    pub fn locality_hint(&self) -> Option<usize> {
        self.locality_hint
    }

    /// The bytes produced by the last completed dispatch. Empty until then.
    #[inline]
    pub fn output(&self) -> &[u8] {
        &self.dst[..self.out_len]
    }

    /// Take the destination buffer out of the request.
    pub fn into_dst(self) -> Vec<u8> {
        self.dst
    }

    pub(crate) fn key_override(&self) -> Option<&SecretKey> {
        self.key_override.as_ref()
    }

    pub(crate) fn key_override_len(&self) -> Option<usize> {
        self.key_override.as_ref().map(SecretKey::len)
    }

    /// Split borrows for a synchronous engine call:
    /// (key override, src, dst, iv).
    pub(crate) fn op_parts(&mut self) -> (Option<&[u8]>, &[u8], &mut [u8], &[u8]) {
        (
            self.key_override.as_ref().map(|key| key.as_bytes()),
            &self.src,
            &mut self.dst,
            &self.iv,
        )
    }

    pub(crate) fn write_output(&mut self, out: &[u8]) {
        self.dst[..out.len()].copy_from_slice(out);
        self.out_len = out.len();
    }

    pub(crate) fn mark_output(&mut self, len: usize) {
        self.out_len = len;
    }
}

/// Buffer contents are deliberately omitted.
impl fmt::Debug for CipherRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CipherRequest")
            .field("direction", &self.direction)
            .field("src_len", &self.src.len())
            .field("dst_len", &self.dst.len())
            .field("iv_len", &self.iv.len())
            .field("key_override", &self.key_override.is_some())
            .finish()
    }
}

pub(crate) type CompletionTx = mpsc::SyncSender<Result<CipherRequest>>;

/// Build the channel pair behind one asynchronous submission.
pub(crate) fn completion_pair() -> (CompletionTx, CompletionHandle) {
    // capacity 1: exactly one completion is ever sent
    let (tx, rx) = mpsc::sync_channel(1);
    (tx, CompletionHandle { rx, done: false })
}

/// Waitable endpoint for one asynchronous request.
///
/// The handle resolves when a reaper drains the request's completion: to the
/// request itself (destination filled) on success, or to the dispatch error.
/// Dropping the handle abandons the result; the operation still completes
/// and is still counted by the drain that reaps it.
#[derive(Debug)]
pub struct CompletionHandle {
    rx: mpsc::Receiver<Result<CipherRequest>>,
    done: bool,
}

impl CompletionHandle {
    /// Block until the request is drained.
    pub fn wait(self) -> Result<CipherRequest> {
        match self.rx.recv() {
            Ok(result) => result,
            Err(_) => Err(Error::HardwareFault(
                "completion channel severed".to_string(),
            )),
        }
    }

    /// Non-blocking probe. `None` until the request is drained; afterwards
    /// the result exactly once, then `None` again.
    pub fn try_wait(&mut self) -> Option<Result<CipherRequest>> {
        if self.done {
            return None;
        }
        match self.rx.try_recv() {
            Ok(result) => {
                self.done = true;
                Some(result)
            }
            Err(mpsc::TryRecvError::Empty) => None,
            Err(mpsc::TryRecvError::Disconnected) => {
                self.done = true;
                Some(Err(Error::HardwareFault(
                    "completion channel severed".to_string(),
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_omits_buffer_contents() {
        let req = CipherRequest::new(Direction::Encrypt, vec![0x41; 32])
            .with_iv(vec![0x42; 16])
            .with_key(&[0x43; 16]);
        let printed = format!("{:?}", req);
        assert!(printed.contains("src_len: 32"));
        assert!(!printed.contains("65"));
        assert!(printed.contains("key_override: true"));
    }

    #[test]
    fn handle_resolves_once() {
        let (tx, mut handle) = completion_pair();
        assert!(handle.try_wait().is_none());

        let mut req = CipherRequest::new(Direction::Decrypt, vec![1, 2, 3, 4]);
        req.write_output(&[9, 9, 9, 9]);
        tx.send(Ok(req)).expect("send completion");

        let got = handle.try_wait().expect("resolved").expect("ok");
        assert_eq!(got.output(), &[9, 9, 9, 9]);
        assert!(handle.try_wait().is_none());
    }

    #[test]
    fn wait_blocks_until_sent() {
        let (tx, handle) = completion_pair();
        let waiter = std::thread::spawn(move || handle.wait());
        tx.send(Ok(CipherRequest::new(Direction::Encrypt, vec![7; 8])))
            .expect("send completion");
        let got = waiter.join().expect("join").expect("ok");
        assert_eq!(got.src(), &[7; 8]);
    }

    #[test]
    fn severed_channel_surfaces_as_fault() {
        let (tx, handle) = completion_pair();
        drop(tx);
        assert!(matches!(handle.wait(), Err(Error::HardwareFault(_))));
    }
}
