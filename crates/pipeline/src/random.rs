//! Cryptographically strong random text for session ids, csrf secrets and salts.
//!
//! All values come straight from the operating system source. There is no
//! fallback generator: a failing source is reported to the caller.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use rand::RngCore;
use rand::rngs::OsRng;

/// Reads `len` random bytes from the OS.
pub(crate) fn bytes(len: usize) -> Result<Vec<u8>, rand::Error> {
    let mut buf = vec![0u8; len];
    OsRng.try_fill_bytes(&mut buf)?;
    Ok(buf)
}

/// `len` random bytes, standard base64 encoded.
pub(crate) fn base64_string(len: usize) -> Result<String, rand::Error> {
    bytes(len).map(|buf| STANDARD.encode(buf))
}

/// Checks that the OS source can be read at all.
pub(crate) fn probe() -> Result<(), rand::Error> {
    bytes(1).map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lengths() {
        assert_eq!(bytes(32).unwrap().len(), 32);
        // 18 bytes -> 24 base64 chars, no padding
        assert_eq!(base64_string(18).unwrap().len(), 24);
        assert_eq!(base64_string(8).unwrap().len(), 12);
    }

    #[test]
    fn values_differ() {
        assert_ne!(base64_string(32).unwrap(), base64_string(32).unwrap());
        assert!(probe().is_ok());
    }
}
