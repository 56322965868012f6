//! Zeroizing storage for key material.

use std::fmt;

use zeroize::Zeroizing;

/// A private copy of cipher key material.
///
/// The bytes are owned exclusively by this container and wiped when it is
/// dropped, on every path that destroys a session or an in-flight request.
/// `Debug` prints the length only.
pub struct SecretKey {
    bytes: Zeroizing<Vec<u8>>,
}

impl SecretKey {
    /// Copy `bytes` into zeroizing storage.
    pub(crate) fn copy_from(bytes: &[u8]) -> Self {
        Self {
            bytes: Zeroizing::new(bytes.to_vec()),
        }
    }

    /// Key length in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// True when the key holds no bytes.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Borrow the raw bytes. Engines read these to program a queue; the
    /// borrow must not outlive the operation.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretKey({} bytes)", self.bytes.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_never_prints_bytes() {
        let key = SecretKey::copy_from(&[0xAA; 24]);
        let printed = format!("{:?}", key);
        assert_eq!(printed, "SecretKey(24 bytes)");
        assert!(!printed.contains("170"));
        assert!(!printed.to_lowercase().contains("aa"));
    }

    #[test]
    fn copies_are_independent() {
        let mut source = vec![1u8, 2, 3, 4];
        let key = SecretKey::copy_from(&source);
        source[0] = 9;
        assert_eq!(key.as_bytes(), &[1, 2, 3, 4]);
        assert_eq!(key.len(), 4);
        assert!(!key.is_empty());
    }
}
