//! cipherq - Cipher-offload scheduling core with pluggable context selection.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          CipherCore                              │
//! │  ┌────────────┐  ┌───────────────┐  ┌─────────────────────────┐ │
//! │  │ Scheduler  │  │ Session slots │  │ Context table           │ │
//! │  │ (policy)   │  │ (max_sessions)│  │ entry + inflight + flag │ │
//! │  └────────────┘  └───────────────┘  └─────────────────────────┘ │
//! │                                                                  │
//! │  dispatch → policy picks a table index → re-validate → engine    │
//! └─────────────────────────────────────────────────────────────────┘
//!                     │
//!           ┌─────────┼─────────┐
//!           ▼         ▼         ▼
//!     ┌───────────┐ ┌───────────┐ ┌───────────┐
//!     │EngineQueue│ │EngineQueue│ │EngineQueue│
//!     │  (sync)   │ │  (async)  │ │  (async)  │
//!     └───────────┘ └───────────┘ └───────────┘
//! ```
//!
//! - **Contexts**: fixed table of execution queues, each sync or async with
//!   a direction capability
//! - **Scheduler**: maps request shape to a table index; the pool
//!   re-validates every answer
//! - **Sessions**: algorithm/mode binding with a private, zeroized key copy
//! - **Completions**: async submissions resolve through per-request
//!   [`CompletionHandle`]s fed by [`CipherCore::drain`]
//!
//! ## Usage
//!
//! ```
//! use std::sync::Arc;
//!
//! use cipherq::{
//!     CipherAlg, CipherCore, CipherMode, CipherRequest, CtxEntry, CtxHandle, CtxMode,
//!     Direction, DirectionCap, PoolConfig, SessionSetup, SingleCtx, SoftEngine,
//! };
//!
//! # fn main() -> cipherq::Result<()> {
//! let config = PoolConfig::new()
//!     .with_ctx(CtxEntry::new(CtxHandle(0), CtxMode::Sync, DirectionCap::Both));
//! let core = CipherCore::activate(
//!     config,
//!     Box::new(SingleCtx::new()),
//!     Arc::new(SoftEngine::new()),
//! )?;
//!
//! let session = core.alloc_session(SessionSetup::new(CipherAlg::Aes, CipherMode::Cbc))?;
//! session.set_key(&[0u8; 16])?;
//!
//! let mut request = CipherRequest::new(Direction::Encrypt, b"0123456789ABCDEF".to_vec())
//!     .with_iv(vec![0u8; 16]);
//! core.dispatch_sync(&session, &mut request)?;
//! assert_eq!(request.output().len(), 16);
//!
//! drop(session);
//! core.deactivate()?;
//! # Ok(())
//! # }
//! ```

pub mod algo;
pub mod config;
pub mod core;
pub mod engine;
pub mod error;
pub mod request;
pub mod sched;
pub mod secret;
pub mod session;
pub mod soft;

pub use algo::{
    accepted_key_lens, check_geometry, check_key_len, iv_len_for, CipherAlg, CipherMode, Direction,
};
pub use config::{
    CtxEntry, CtxHandle, CtxMode, DirectionCap, PoolConfig, DEFAULT_MAX_SESSIONS,
    DEFAULT_QUEUE_DEPTH,
};
pub use core::CipherCore;
pub use engine::{
    CipherEngine, CipherOp, EngineQueue, SubmitRejected, WorkCompletion, WorkDescriptor,
};
pub use error::{Error, Result, SubmitError};
pub use request::{CipherRequest, CompletionHandle};
pub use sched::{RoundRobin, SchedRequest, Scheduler, SingleCtx};
pub use secret::SecretKey;
pub use session::{CipherSession, SessionSetup};
pub use soft::SoftEngine;
