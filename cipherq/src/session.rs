//! Cipher sessions: algorithm binding and key management.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use crate::algo::{check_key_len, CipherAlg, CipherMode};
use crate::error::{Error, Result};
use crate::secret::SecretKey;

/// Immutable algorithm/mode binding requested at session allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSetup {
    pub alg: CipherAlg,
    pub mode: CipherMode,
}

impl SessionSetup {
    pub fn new(alg: CipherAlg, mode: CipherMode) -> Self {
        Self { alg, mode }
    }
}

/// Counts live sessions against the pool's `max_sessions` cap.
pub(crate) struct SessionSlots {
    active: AtomicUsize,
    limit: usize,
}

impl SessionSlots {
    pub(crate) fn new(limit: usize) -> Self {
        Self {
            active: AtomicUsize::new(0),
            limit,
        }
    }

    pub(crate) fn charge(&self) -> Result<()> {
        self.active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |active| {
                (active < self.limit).then_some(active + 1)
            })
            .map(|_| ())
            .map_err(|_| {
                Error::AllocationError(format!("session limit {} reached", self.limit))
            })
    }

    pub(crate) fn release(&self) {
        self.active.fetch_sub(1, Ordering::AcqRel);
    }

    pub(crate) fn active(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }
}

/// One cipher session: a fixed algorithm/mode pair plus a private key copy.
///
/// The session holds its own copy of the key; the caller's buffer is never
/// retained. `set_key` may be called again to rekey, and the previous copy
/// is wiped. Requests already submitted keep the key they were dispatched
/// with. Dropping the session wipes the key and releases its pool slot.
pub struct CipherSession {
    setup: SessionSetup,
    key: RwLock<Option<SecretKey>>,
    slots: Arc<SessionSlots>,
}

impl CipherSession {
    pub(crate) fn new(setup: SessionSetup, slots: Arc<SessionSlots>) -> Self {
        Self {
            setup,
            key: RwLock::new(None),
            slots,
        }
    }

    #[inline]
    pub fn setup(&self) -> SessionSetup {
        self.setup
    }

    #[inline]
    pub fn alg(&self) -> CipherAlg {
        self.setup.alg
    }

    #[inline]
    pub fn mode(&self) -> CipherMode {
        self.setup.mode
    }

    /// Install or replace the session key.
    ///
    /// The length is validated against the session's algorithm and mode
    /// before anything is copied; on rejection the previous key stays
    /// installed.
    pub fn set_key(&self, key: &[u8]) -> Result<()> {
        check_key_len(self.setup.alg, self.setup.mode, key.len())?;
        let mut slot = self.key.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        *slot = Some(SecretKey::copy_from(key));
        Ok(())
    }

    /// Whether a key is installed.
    pub fn has_key(&self) -> bool {
        self.key
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .is_some()
    }

    /// Run `f` with the installed key borrowed under the read lock.
    pub(crate) fn with_key<R>(&self, f: impl FnOnce(Option<&[u8]>) -> R) -> R {
        let guard = self.key.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(guard.as_ref().map(|key| key.as_bytes()))
    }

    /// Snapshot the installed key for an asynchronous descriptor.
    pub(crate) fn key_copy(&self) -> Option<SecretKey> {
        let guard = self.key.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.as_ref().map(|key| SecretKey::copy_from(key.as_bytes()))
    }
}

impl Drop for CipherSession {
    fn drop(&mut self) {
        self.slots.release();
    }
}

impl fmt::Debug for CipherSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CipherSession")
            .field("alg", &self.setup.alg)
            .field("mode", &self.setup.mode)
            .field("has_key", &self.has_key())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_enforce_the_limit() {
        let slots = SessionSlots::new(2);
        slots.charge().expect("first");
        slots.charge().expect("second");
        assert!(matches!(slots.charge(), Err(Error::AllocationError(_))));
        slots.release();
        slots.charge().expect("after release");
        assert_eq!(slots.active(), 2);
    }

    #[test]
    fn set_key_validates_before_replacing() {
        let slots = Arc::new(SessionSlots::new(1));
        slots.charge().expect("charge");
        let session = CipherSession::new(
            SessionSetup::new(CipherAlg::Aes, CipherMode::Cbc),
            Arc::clone(&slots),
        );
        assert!(!session.has_key());

        session.set_key(&[1u8; 16]).expect("aes-128 key");
        assert!(session.has_key());

        // rejected length leaves the previous key installed
        assert!(session.set_key(&[1u8; 15]).is_err());
        session.with_key(|key| assert_eq!(key.map(<[u8]>::len), Some(16)));

        // rekey replaces
        session.set_key(&[2u8; 32]).expect("aes-256 key");
        session.with_key(|key| assert_eq!(key.map(<[u8]>::len), Some(32)));
    }

    #[test]
    fn dropping_a_session_releases_its_slot() {
        let slots = Arc::new(SessionSlots::new(1));
        slots.charge().expect("charge");
        let session = CipherSession::new(
            SessionSetup::new(CipherAlg::Sm4, CipherMode::Ecb),
            Arc::clone(&slots),
        );
        assert_eq!(slots.active(), 1);
        drop(session);
        assert_eq!(slots.active(), 0);
    }
}
