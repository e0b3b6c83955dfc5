//! Candidate key material.
//!
//! A key is 128 bits held as four 32-bit words. Keys come from external
//! sources in several textual forms, so parsing accepts a 32-digit hex string
//! or four words (hex with `0x`, unsigned decimal, or signed decimal as Java
//! tooling tends to print them).

use std::{fmt, str::FromStr};

use crate::CryptoError;

/// Size of key material in bytes.
pub const KEY_SIZE: usize = 16;

/// 128-bit candidate key, four 32-bit words.
///
/// Immutable once created. Byte encoding is the four words big-endian, which
/// is also the order used for hex display.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct KeyMaterial([u32; 4]);

impl KeyMaterial {
    /// The all-zero key.
    pub const ZERO: Self = Self([0; 4]);

    /// Key from four words.
    pub const fn from_words(words: [u32; 4]) -> Self {
        Self(words)
    }

    /// The four words.
    pub const fn words(&self) -> [u32; 4] {
        self.0
    }

    /// True for the all-zero key.
    pub fn is_zero(&self) -> bool {
        self.0 == [0; 4]
    }

    /// Big-endian byte encoding.
    pub fn to_bytes(&self) -> [u8; KEY_SIZE] {
        let mut bytes = [0u8; KEY_SIZE];
        for (chunk, word) in bytes.chunks_exact_mut(4).zip(self.0) {
            chunk.copy_from_slice(&word.to_be_bytes());
        }
        bytes
    }

    /// Decode from the big-endian byte encoding.
    ///
    /// # Errors
    ///
    /// - `InvalidKey`: if `bytes` is not exactly [`KEY_SIZE`] bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != KEY_SIZE {
            return Err(CryptoError::InvalidKey {
                reason: format!("expected {KEY_SIZE} bytes, got {}", bytes.len()),
            });
        }

        let mut words = [0u32; 4];
        for (word, chunk) in words.iter_mut().zip(bytes.chunks_exact(4)) {
            let mut be = [0u8; 4];
            be.copy_from_slice(chunk);
            *word = u32::from_be_bytes(be);
        }
        Ok(Self(words))
    }
}

impl From<[u32; 4]> for KeyMaterial {
    fn from(words: [u32; 4]) -> Self {
        Self(words)
    }
}

impl fmt::Display for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for word in self.0 {
            write!(f, "{word:08x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyMaterial({self})")
    }
}

impl FromStr for KeyMaterial {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let compact = s.strip_prefix("0x").unwrap_or(s);

        if compact.len() == 32 && compact.bytes().all(|b| b.is_ascii_hexdigit()) {
            let mut words = [0u32; 4];
            for (i, word) in words.iter_mut().enumerate() {
                *word = u32::from_str_radix(&compact[i * 8..(i + 1) * 8], 16)
                    .map_err(|e| invalid(format!("bad hex: {e}")))?;
            }
            return Ok(Self(words));
        }

        let tokens: Vec<&str> = s
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|t| !t.is_empty())
            .collect();

        let tokens: [&str; 4] = tokens.as_slice().try_into().map_err(|_| {
            invalid(format!("expected 32 hex digits or 4 words, got {} words", tokens.len()))
        })?;

        let mut words = [0u32; 4];
        for (word, token) in words.iter_mut().zip(tokens) {
            *word = parse_word(token)?;
        }
        Ok(Self(words))
    }
}

/// Parse one word: `0x`-prefixed hex, unsigned decimal, or signed decimal.
fn parse_word(token: &str) -> Result<u32, CryptoError> {
    if let Some(hex) = token.strip_prefix("0x").or_else(|| token.strip_prefix("0X")) {
        return u32::from_str_radix(hex, 16).map_err(|e| invalid(format!("bad word {token}: {e}")));
    }

    let value: i64 = token.parse().map_err(|e| invalid(format!("bad word {token}: {e}")))?;
    if value < i64::from(i32::MIN) || value > i64::from(u32::MAX) {
        return Err(invalid(format!("word {token} out of 32-bit range")));
    }

    // Two's complement truncation maps signed words onto the same bits.
    Ok(value as u32)
}

fn invalid(reason: String) -> CryptoError {
    CryptoError::InvalidKey { reason }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn parses_compact_hex() {
        let key: KeyMaterial = "0123456789abcdef00000000ffffffff".parse().unwrap();
        assert_eq!(key.words(), [0x0123_4567, 0x89AB_CDEF, 0, 0xFFFF_FFFF]);
    }

    #[test]
    fn parses_prefixed_compact_hex() {
        let key: KeyMaterial = "0x0123456789abcdef00000000ffffffff".parse().unwrap();
        assert_eq!(key.words()[0], 0x0123_4567);
    }

    #[test]
    fn parses_signed_decimal_words() {
        let key: KeyMaterial = "-1, 0, 2147483647, -2147483648".parse().unwrap();
        assert_eq!(key.words(), [0xFFFF_FFFF, 0, 0x7FFF_FFFF, 0x8000_0000]);
    }

    #[test]
    fn parses_whitespace_separated_hex_words() {
        let key: KeyMaterial = "0x1 0x2 0x3 0xdeadbeef".parse().unwrap();
        assert_eq!(key.words(), [1, 2, 3, 0xDEAD_BEEF]);
    }

    #[test]
    fn rejects_wrong_word_count() {
        let err = "1 2 3".parse::<KeyMaterial>().unwrap_err();
        assert!(matches!(err, CryptoError::InvalidKey { .. }));
    }

    #[test]
    fn rejects_out_of_range_word() {
        assert!("4294967296 0 0 0".parse::<KeyMaterial>().is_err());
        assert!("-2147483649 0 0 0".parse::<KeyMaterial>().is_err());
    }

    #[test]
    fn byte_encoding_is_big_endian_words() {
        let key = KeyMaterial::from_words([0x0102_0304, 0, 0, 0x0A0B_0C0D]);
        let bytes = key.to_bytes();
        assert_eq!(&bytes[..4], &[1, 2, 3, 4]);
        assert_eq!(&bytes[12..], &[0x0A, 0x0B, 0x0C, 0x0D]);
        assert_eq!(hex::encode(bytes), key.to_string());
    }

    #[test]
    fn from_bytes_rejects_wrong_length() {
        assert!(KeyMaterial::from_bytes(&[0u8; 15]).is_err());
    }

    #[test]
    fn zero_key() {
        assert!(KeyMaterial::ZERO.is_zero());
        assert!(!KeyMaterial::from_words([0, 0, 0, 1]).is_zero());
    }

    proptest! {
        #[test]
        fn prop_display_parses_back(words in any::<[u32; 4]>()) {
            let key = KeyMaterial::from_words(words);
            let parsed: KeyMaterial = key.to_string().parse().unwrap();
            prop_assert_eq!(parsed, key);
        }

        #[test]
        fn prop_bytes_decode_back(words in any::<[u32; 4]>()) {
            let key = KeyMaterial::from_words(words);
            prop_assert_eq!(KeyMaterial::from_bytes(&key.to_bytes()).unwrap(), key);
        }
    }
}
