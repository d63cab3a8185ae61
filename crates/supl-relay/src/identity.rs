use std::fmt;

use rand::Rng;

use crate::tbcd::{self, TbcdError};

/// Longest IMSI in digits.
pub const IMSI_MAX_DIGITS: usize = 15;

/// A subscriber identity as a decimal digit string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Imsi(String);

impl Imsi {
    /// Accepts decimal digits only.
    pub fn parse(digits: &str) -> Result<Self, TbcdError> {
        if let Some(c) = digits.chars().find(|c| !c.is_ascii_digit()) {
            return Err(TbcdError::NotADigit(c));
        }
        Ok(Self(digits.to_string()))
    }

    /// Recover an identity from its wire form. Any non-digit nibbles are kept
    /// as hex characters.
    pub fn from_tbcd(bytes: &[u8]) -> Self {
        Self(tbcd::decode(bytes))
    }

    /// A random identity that starts with `prefix` (usually MCC + MNC) and is
    /// filled with random digits up to the full IMSI length.
    pub fn fabricate(prefix: &str) -> Result<Self, TbcdError> {
        let mut digits = Self::parse(prefix)?.0;
        digits.truncate(IMSI_MAX_DIGITS);
        let mut rng = rand::thread_rng();
        // First filler digit is never zero so the result always reads as a
        // full-length number.
        if digits.len() < IMSI_MAX_DIGITS {
            digits.push(char::from(b'0' + rng.gen_range(1..=9u8)));
        }
        while digits.len() < IMSI_MAX_DIGITS {
            digits.push(char::from(b'0' + rng.gen_range(0..=9u8)));
        }
        Ok(Self(digits))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn to_tbcd(&self) -> Result<Vec<u8>, TbcdError> {
        tbcd::encode(&self.0)
    }
}

impl fmt::Display for Imsi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fabricated_keeps_prefix_and_length() {
        for _ in 0..50 {
            let imsi = Imsi::fabricate("26201").unwrap();
            assert!(imsi.as_str().starts_with("26201"));
            assert_eq!(imsi.as_str().len(), IMSI_MAX_DIGITS);
            assert!(imsi.as_str().bytes().all(|b| b.is_ascii_digit()));
            assert_ne!(imsi.as_str().as_bytes()[5], b'0');
        }
    }

    #[test]
    fn fabricated_values_differ() {
        let a = Imsi::fabricate("26201").unwrap();
        let b = Imsi::fabricate("26201").unwrap();
        let c = Imsi::fabricate("26201").unwrap();
        assert!(a != b || b != c);
    }

    #[test]
    fn bad_prefix_is_rejected() {
        assert!(Imsi::fabricate("262x1").is_err());
    }

    #[test]
    fn tbcd_round_trip() {
        let imsi = Imsi::parse("262011234567890").unwrap();
        let wire = imsi.to_tbcd().unwrap();
        assert_eq!(Imsi::from_tbcd(&wire), imsi);
    }
}
