//! Script number codec and stack element truthiness.
//!
//! Script numbers are little-endian signed-magnitude integers: the most
//! significant bit of the final byte carries the sign and the empty element
//! is zero. Decoding is deliberately loose, accepting non-minimal encodings
//! such as `[0x01, 0x00]` or negative zero.

#[cfg(not(feature = "std"))]
use alloc::vec::Vec;

const SIGN_BIT: u8 = 0x80;

/// Decodes a script number.
///
/// No length limit is enforced here; callers bound element sizes. Only the
/// low 64 bits of the magnitude are kept, so magnitudes past `i64` range wrap
/// in two's complement.
pub fn decode_num(bytes: &[u8]) -> i64 {
    let Some((&last, _)) = bytes.split_last() else {
        return 0;
    };

    let mut magnitude: u64 = 0;
    for (i, &byte) in bytes.iter().enumerate().take(8) {
        let byte = if i == bytes.len() - 1 {
            byte & !SIGN_BIT
        } else {
            byte
        };
        magnitude |= u64::from(byte) << (8 * i);
    }

    if last & SIGN_BIT != 0 {
        (magnitude as i64).wrapping_neg()
    } else {
        magnitude as i64
    }
}

/// Encodes `value` as a minimal script number.
pub fn encode_num(value: i64) -> Vec<u8> {
    if value == 0 {
        return Vec::new();
    }

    let mut result = Vec::with_capacity(9);
    // `unsigned_abs` keeps `i64::MIN` representable.
    let mut abs_value = value.unsigned_abs();

    while abs_value > 0 {
        result.push((abs_value & 0xff) as u8);
        abs_value >>= 8;
    }

    if let Some(last) = result.last_mut() {
        if *last & SIGN_BIT != 0 {
            result.push(if value < 0 { SIGN_BIT } else { 0x00 });
        } else if value < 0 {
            *last |= SIGN_BIT;
        }
    }

    result
}

/// Interprets a stack element as a boolean.
///
/// Any non-zero byte makes the element true, except that the sign bit of the
/// final byte is ignored, so negative zero (`0x80`, `0x00 0x80`, ...) is false.
pub fn cast_to_bool(data: &[u8]) -> bool {
    for (i, &byte) in data.iter().enumerate() {
        if byte != 0 {
            if i == data.len() - 1 && byte == SIGN_BIT {
                return false;
            }
            return true;
        }
    }
    false
}
