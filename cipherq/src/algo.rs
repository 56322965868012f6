//! Algorithm, mode, and direction tags plus buffer geometry rules.

use std::fmt;

use crate::error::{Error, Result};

/// Symmetric cipher algorithms the pool can serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CipherAlg {
    Aes,
    Des,
    TripleDes,
    Sm4,
}

impl CipherAlg {
    /// Block size in bytes.
    #[inline]
    pub fn block_size(self) -> usize {
        match self {
            CipherAlg::Aes | CipherAlg::Sm4 => 16,
            CipherAlg::Des | CipherAlg::TripleDes => 8,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CipherAlg::Aes => "aes",
            CipherAlg::Des => "des",
            CipherAlg::TripleDes => "3des",
            CipherAlg::Sm4 => "sm4",
        }
    }
}

impl fmt::Display for CipherAlg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cipher modes of operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CipherMode {
    Ecb,
    Cbc,
    Ctr,
    Xts,
    Ofb,
    Cfb,
}

impl CipherMode {
    pub fn as_str(self) -> &'static str {
        match self {
            CipherMode::Ecb => "ecb",
            CipherMode::Cbc => "cbc",
            CipherMode::Ctr => "ctr",
            CipherMode::Xts => "xts",
            CipherMode::Ofb => "ofb",
            CipherMode::Cfb => "cfb",
        }
    }

    /// Whether `alg` can run in this mode. Stream and sector modes need a
    /// 128-bit block.
    pub fn supports(self, alg: CipherAlg) -> bool {
        match self {
            CipherMode::Ecb | CipherMode::Cbc => true,
            CipherMode::Ctr | CipherMode::Xts | CipherMode::Ofb | CipherMode::Cfb => {
                alg.block_size() == 16
            }
        }
    }
}

impl fmt::Display for CipherMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which transform a request asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Encrypt,
    Decrypt,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Encrypt => "encrypt",
            Direction::Decrypt => "decrypt",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Accepted key lengths for an algorithm/mode pairing. XTS keys carry two
/// half-length sub-keys, so the sector mode doubles the base lengths.
pub fn accepted_key_lens(alg: CipherAlg, mode: CipherMode) -> &'static [usize] {
    match (alg, mode) {
        (CipherAlg::Aes, CipherMode::Xts) => &[32, 64],
        (CipherAlg::Aes, _) => &[16, 24, 32],
        (CipherAlg::Des, _) => &[8],
        (CipherAlg::TripleDes, _) => &[16, 24],
        (CipherAlg::Sm4, CipherMode::Xts) => &[32],
        (CipherAlg::Sm4, _) => &[16],
    }
}

/// Validate a key length against [`accepted_key_lens`].
pub fn check_key_len(alg: CipherAlg, mode: CipherMode, len: usize) -> Result<()> {
    if accepted_key_lens(alg, mode).contains(&len) {
        Ok(())
    } else {
        Err(Error::InvalidKeyLength { alg, got: len })
    }
}

/// IV length a request must carry for this pairing. ECB takes none.
#[inline]
pub fn iv_len_for(alg: CipherAlg, mode: CipherMode) -> usize {
    match mode {
        CipherMode::Ecb => 0,
        _ => alg.block_size(),
    }
}

/// Validate request buffer geometry shared by every dispatch path.
pub fn check_geometry(
    alg: CipherAlg,
    mode: CipherMode,
    src_len: usize,
    iv_len: usize,
) -> Result<()> {
    if src_len == 0 {
        return Err(Error::InvalidArgument("source must not be empty".into()));
    }
    let want_iv = iv_len_for(alg, mode);
    if iv_len != want_iv {
        return Err(Error::InvalidArgument(format!(
            "{} expects a {}-byte iv, got {}",
            mode, want_iv, iv_len
        )));
    }
    let block = alg.block_size();
    match mode {
        CipherMode::Ecb | CipherMode::Cbc if src_len % block != 0 => {
            Err(Error::InvalidArgument(format!(
                "{} needs a multiple of {} bytes, got {}",
                mode, block, src_len
            )))
        }
        CipherMode::Xts if src_len < 16 => Err(Error::InvalidArgument(
            "xts needs at least one 16-byte block".into(),
        )),
        _ => Ok(()),
    }
}
