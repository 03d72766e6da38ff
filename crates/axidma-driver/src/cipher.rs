//! Key and IV setup for the AXIS AES128 accelerator
//!
//! The accelerator sits between MM2S and S2MM and is configured out of band.
//! The driver only sequences the two calls before a transfer; it does not
//! check what the accelerator does with them.

use crate::error::{DmaError, Result};
use std::fmt;

/// AES-128 key length in bytes
pub const KEY_LEN: usize = 16;

/// AES-128 IV length in bytes
pub const IV_LEN: usize = 16;

/// Accelerator key/IV interface
pub trait CipherEngine {
    /// Error reported by the accelerator interface
    type Error: fmt::Display;

    /// Load the 128-bit key
    ///
    /// # Errors
    ///
    /// Returns the accelerator's error if the key is not accepted.
    fn set_key(&mut self, key: &[u8; KEY_LEN]) -> std::result::Result<(), Self::Error>;

    /// Load the 128-bit initialization vector
    ///
    /// # Errors
    ///
    /// Returns the accelerator's error if the IV is not accepted.
    fn set_iv(&mut self, iv: &[u8; IV_LEN]) -> std::result::Result<(), Self::Error>;
}

/// Set key then IV; both must succeed before a transfer is meaningful
///
/// # Errors
///
/// Returns [`DmaError::CipherSetup`] naming the step that failed. The IV is
/// not written if the key fails.
pub fn configure_cipher<C: CipherEngine>(
    engine: &mut C,
    key: &[u8; KEY_LEN],
    iv: &[u8; IV_LEN],
) -> Result<()> {
    engine
        .set_key(key)
        .map_err(|e| DmaError::cipher_setup(format!("set key: {e}")))?;
    engine
        .set_iv(iv)
        .map_err(|e| DmaError::cipher_setup(format!("set IV: {e}")))?;
    tracing::debug!("AES key and IV loaded");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        calls: Vec<&'static str>,
        key: Option<[u8; KEY_LEN]>,
        reject_key: bool,
    }

    impl CipherEngine for Recorder {
        type Error = String;

        fn set_key(&mut self, key: &[u8; KEY_LEN]) -> std::result::Result<(), String> {
            self.calls.push("key");
            if self.reject_key {
                return Err("key register busy".into());
            }
            self.key = Some(*key);
            Ok(())
        }

        fn set_iv(&mut self, _iv: &[u8; IV_LEN]) -> std::result::Result<(), String> {
            self.calls.push("iv");
            Ok(())
        }
    }

    #[test]
    fn key_before_iv() {
        let mut engine = Recorder::default();
        configure_cipher(&mut engine, &[0x2B; KEY_LEN], &[0; IV_LEN]).unwrap();
        assert_eq!(engine.calls, ["key", "iv"]);
        assert_eq!(engine.key, Some([0x2B; KEY_LEN]));
    }

    #[test]
    fn key_failure_skips_iv() {
        let mut engine = Recorder {
            reject_key: true,
            ..Recorder::default()
        };
        let err = configure_cipher(&mut engine, &[0; KEY_LEN], &[0; IV_LEN]).unwrap_err();
        assert!(matches!(err, DmaError::CipherSetup { .. }));
        assert!(err.to_string().contains("key register busy"));
        assert_eq!(engine.calls, ["key"]);
    }
}
