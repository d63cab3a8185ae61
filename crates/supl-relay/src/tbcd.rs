//! Telephony BCD: two decimal digits per octet, low nibble first.
//!
//! An odd number of digits is padded with an `F` nibble, which is stripped
//! again on decode.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TbcdError {
    #[error("'{0}' is not a decimal digit")]
    NotADigit(char),
}

/// Encode a digit string.
pub fn encode(digits: &str) -> Result<Vec<u8>, TbcdError> {
    let mut nibbles = Vec::with_capacity(digits.len() + 1);
    for c in digits.chars() {
        let n = c.to_digit(10).ok_or(TbcdError::NotADigit(c))?;
        nibbles.push(n as u8);
    }
    if nibbles.len() % 2 == 1 {
        nibbles.push(0x0f);
    }
    Ok(nibbles
        .chunks(2)
        .map(|pair| (pair[1] << 4) | pair[0])
        .collect())
}

/// Decode octets back into their digit string.
///
/// Nibbles are rendered as uppercase hex so that filler values other than
/// the trailing `F` stay visible instead of being rejected.
pub fn decode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push(hex_nibble(b & 0x0f));
        out.push(hex_nibble(b >> 4));
    }
    let trimmed = out.trim_end_matches('F').len();
    out.truncate(trimmed);
    out
}

fn hex_nibble(n: u8) -> char {
    char::from_digit(u32::from(n), 16)
        .map(|c| c.to_ascii_uppercase())
        .unwrap_or('?')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn even_length_swaps_nibbles() {
        assert_eq!(encode("1234").unwrap(), vec![0x21, 0x43]);
        assert_eq!(decode(&[0x21, 0x43]), "1234");
    }

    #[test]
    fn odd_length_pads_with_f() {
        let wire = encode("262011234567890").unwrap();
        assert_eq!(wire.len(), 8);
        assert_eq!(wire[0], 0x62);
        assert_eq!(wire[7], 0xf0);
        assert_eq!(decode(&wire), "262011234567890");
    }

    #[test]
    fn decode_then_encode_is_identity() {
        for digits in ["0", "42", "310150123456789", "26201123456789"] {
            let wire = encode(digits).unwrap();
            assert_eq!(encode(&decode(&wire)).unwrap(), wire);
        }
    }

    #[test]
    fn rejects_non_digits() {
        assert_eq!(encode("12a4"), Err(TbcdError::NotADigit('a')));
    }

    #[test]
    fn empty_is_empty() {
        assert!(encode("").unwrap().is_empty());
        assert_eq!(decode(&[]), "");
    }
}
