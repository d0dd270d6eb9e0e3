//! The interoperable pixel encoding: six hex characters per pixel (two per
//! channel), uppercase, row-major, no separators.

use pixmatch_error::{PixmatchError, Result};
use pixmatch_types::Miniature;

const HEX: &[u8; 16] = b"0123456789ABCDEF";

/// Encode a miniature's pixels as a hex string.
#[must_use]
pub fn encode_pixels(miniature: &Miniature) -> String {
    let mut out = String::with_capacity(miniature.data().len() * 2);
    for &byte in miniature.data() {
        out.push(HEX[usize::from(byte >> 4)] as char);
        out.push(HEX[usize::from(byte & 0x0f)] as char);
    }
    out
}

/// Decode a hex string back into a `width` x `height` miniature.
///
/// Lowercase digits are accepted on input; anything else is a persistence
/// failure, as is a length that disagrees with the dimensions.
pub fn decode_pixels(hexdata: &str, width: u32, height: u32) -> Result<Miniature> {
    let expected = 6 * width as usize * height as usize;
    if hexdata.len() != expected {
        return Err(PixmatchError::persistence(format!(
            "hexdata is {} chars, {width}x{height} needs {expected}",
            hexdata.len()
        )));
    }

    let mut data = Vec::with_capacity(expected / 2);
    for pair in hexdata.as_bytes().chunks_exact(2) {
        let hi = nibble(pair[0])?;
        let lo = nibble(pair[1])?;
        data.push((hi << 4) | lo);
    }
    Miniature::from_raw(width, height, data)
}

fn nibble(c: u8) -> Result<u8> {
    match c {
        b'0'..=b'9' => Ok(c - b'0'),
        b'A'..=b'F' => Ok(c - b'A' + 10),
        b'a'..=b'f' => Ok(c - b'a' + 10),
        _ => Err(PixmatchError::persistence(format!(
            "invalid hex character {:?} in pixel data",
            char::from(c)
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_uppercase_row_major() {
        let mut m = Miniature::new(2, 1).expect("alloc");
        m.set_pixel(0, 0, 0x00, 0xab, 0xff);
        m.set_pixel(1, 0, 0x10, 0x20, 0x30);
        assert_eq!(encode_pixels(&m), "00ABFF102030");
    }

    #[test]
    fn decodes_either_case() {
        let upper = decode_pixels("00ABFF102030", 2, 1).expect("decode");
        let lower = decode_pixels("00abff102030", 2, 1).expect("decode");
        assert_eq!(upper, lower);
        assert_eq!(upper.pixel(0, 0), Some((0x00, 0xab, 0xff)));
        assert_eq!(upper.pixel(1, 0), Some((0x10, 0x20, 0x30)));
    }

    #[test]
    fn round_trips() {
        let mut m = Miniature::new(3, 2).expect("alloc");
        for y in 0..2 {
            for x in 0..3 {
                m.set_pixel(x, y, (y * 40 + x * 3) as u8, 7, 200);
            }
        }
        let decoded = decode_pixels(&encode_pixels(&m), 3, 2).expect("decode");
        assert_eq!(decoded, m);
    }

    #[test]
    fn rejects_wrong_length_and_bad_digits() {
        assert!(decode_pixels("00ABFF", 2, 1).is_err());
        assert!(decode_pixels("00ABFF10203G", 2, 1).is_err());
    }
}
