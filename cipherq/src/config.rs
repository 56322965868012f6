//! Context pool configuration.
//!
//! A pool is described by an ordered table of [`CtxEntry`] rows. The order is
//! significant: scheduling policies address contexts by table index, and the
//! index of every row is fixed for the life of the pool.

use std::collections::HashSet;
use std::fmt;

use crate::algo::Direction;
use crate::error::{Error, Result};

/// Submission-queue depth used by asynchronous contexts that carry no
/// per-entry override.
pub const DEFAULT_QUEUE_DEPTH: usize = 64;

/// Session cap used when [`PoolConfig::max_sessions`] is left at its default.
pub const DEFAULT_MAX_SESSIONS: usize = 256;

/// Opaque identifier of one hardware execution queue.
///
/// The pool treats the value as a name: it never dereferences it, it only
/// requires uniqueness within one pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CtxHandle(pub u64);

impl CtxHandle {
    /// The raw identifier.
    #[inline]
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for CtxHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which dispatch path a context serves. Fixed at activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CtxMode {
    /// Serves blocking [`dispatch_sync`](crate::CipherCore::dispatch_sync)
    /// calls only.
    Sync,
    /// Serves [`dispatch_async`](crate::CipherCore::dispatch_async)
    /// submissions reaped through [`drain`](crate::CipherCore::drain).
    Async,
}

impl CtxMode {
    pub fn as_str(self) -> &'static str {
        match self {
            CtxMode::Sync => "sync",
            CtxMode::Async => "async",
        }
    }
}

impl fmt::Display for CtxMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operation directions a context accepts. Fixed at activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DirectionCap {
    Encrypt,
    Decrypt,
    Both,
}

impl DirectionCap {
    /// Whether a request direction falls within this capability.
    #[inline]
    pub fn allows(self, direction: Direction) -> bool {
        match self {
            DirectionCap::Both => true,
            DirectionCap::Encrypt => direction == Direction::Encrypt,
            DirectionCap::Decrypt => direction == Direction::Decrypt,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DirectionCap::Encrypt => "encrypt",
            DirectionCap::Decrypt => "decrypt",
            DirectionCap::Both => "both",
        }
    }
}

impl fmt::Display for DirectionCap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the context pool table.
#[derive(Debug, Clone, Copy)]
pub struct CtxEntry {
    /// Caller-assigned handle, unique within the pool.
    pub handle: CtxHandle,
    /// Sync or async dispatch.
    pub mode: CtxMode,
    /// Direction capability.
    pub cap: DirectionCap,
    /// Submission-queue depth override for asynchronous contexts.
    /// `None` selects [`DEFAULT_QUEUE_DEPTH`]. Synchronous contexts ignore it.
    pub queue_depth: Option<usize>,
}

impl CtxEntry {
    pub fn new(handle: CtxHandle, mode: CtxMode, cap: DirectionCap) -> Self {
        Self {
            handle,
            mode,
            cap,
            queue_depth: None,
        }
    }

    /// Override the submission-queue depth. Must be at least 1.
    pub fn with_queue_depth(mut self, depth: usize) -> Self {
        self.queue_depth = Some(depth);
        self
    }

    /// The depth an engine should size this context's submission queue to.
    #[inline]
    pub fn effective_queue_depth(&self) -> usize {
        self.queue_depth.unwrap_or(DEFAULT_QUEUE_DEPTH)
    }
}

/// Pool description consumed by [`CipherCore::activate`](crate::CipherCore::activate).
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Ordered context table. Policies address entries by index.
    pub ctxs: Vec<CtxEntry>,
    /// Cap on concurrently allocated sessions. Default: [`DEFAULT_MAX_SESSIONS`].
    pub max_sessions: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            ctxs: Vec::new(),
            max_sessions: DEFAULT_MAX_SESSIONS,
        }
    }
}

impl PoolConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one context row.
    pub fn with_ctx(mut self, entry: CtxEntry) -> Self {
        self.ctxs.push(entry);
        self
    }

    /// Replace the whole context table.
    pub fn with_ctxs(mut self, ctxs: Vec<CtxEntry>) -> Self {
        self.ctxs = ctxs;
        self
    }

    /// Set the session cap. Must be at least 1.
    pub fn with_max_sessions(mut self, max_sessions: usize) -> Self {
        self.max_sessions = max_sessions;
        self
    }

    /// Reject tables the pool cannot activate.
    pub(crate) fn validate(&self) -> Result<()> {
        if self.ctxs.is_empty() {
            return Err(Error::ConfigurationError(
                "context table is empty".to_string(),
            ));
        }
        if self.max_sessions == 0 {
            return Err(Error::ConfigurationError(
                "max_sessions must be at least 1".to_string(),
            ));
        }
        let mut seen = HashSet::with_capacity(self.ctxs.len());
        for entry in &self.ctxs {
            if !seen.insert(entry.handle) {
                return Err(Error::ConfigurationError(format!(
                    "duplicate context handle {}",
                    entry.handle
                )));
            }
            if entry.queue_depth == Some(0) {
                return Err(Error::ConfigurationError(format!(
                    "context {}: queue depth must be at least 1",
                    entry.handle
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_caps() {
        assert!(DirectionCap::Both.allows(Direction::Encrypt));
        assert!(DirectionCap::Both.allows(Direction::Decrypt));
        assert!(DirectionCap::Encrypt.allows(Direction::Encrypt));
        assert!(!DirectionCap::Encrypt.allows(Direction::Decrypt));
        assert!(DirectionCap::Decrypt.allows(Direction::Decrypt));
        assert!(!DirectionCap::Decrypt.allows(Direction::Encrypt));
    }

    #[test]
    fn validate_rejects_bad_tables() {
        assert!(PoolConfig::new().validate().is_err());

        let dup = PoolConfig::new()
            .with_ctx(CtxEntry::new(CtxHandle(3), CtxMode::Sync, DirectionCap::Both))
            .with_ctx(CtxEntry::new(CtxHandle(3), CtxMode::Async, DirectionCap::Both));
        assert!(dup.validate().is_err());

        let zero_sessions = PoolConfig::new()
            .with_ctx(CtxEntry::new(CtxHandle(0), CtxMode::Sync, DirectionCap::Both))
            .with_max_sessions(0);
        assert!(zero_sessions.validate().is_err());

        let zero_depth = PoolConfig::new().with_ctx(
            CtxEntry::new(CtxHandle(0), CtxMode::Async, DirectionCap::Both).with_queue_depth(0),
        );
        assert!(zero_depth.validate().is_err());
    }

    #[test]
    fn queue_depth_defaults() {
        let entry = CtxEntry::new(CtxHandle(1), CtxMode::Async, DirectionCap::Both);
        assert_eq!(entry.effective_queue_depth(), DEFAULT_QUEUE_DEPTH);
        assert_eq!(entry.with_queue_depth(8).effective_queue_depth(), 8);
    }
}
