//! Portable "phpass" hashes (`$P$` / `$H$`), the scheme WordPress shipped for
//! well over a decade. Verification only; new hashes are never produced here.

use md5::{Digest, Md5};
use subtle::ConstantTimeEq;

/// crypt(3)-style alphabet used by phpass, distinct from standard base64.
pub const ITOA64: &[u8; 64] = b"./0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// Encode `count` bytes of `input` with the phpass alphabet.
///
/// Exact port of the reference `encode64`: 3 input bytes map to 4 output
/// characters, little-endian within each group, no padding.
#[must_use]
pub fn encode64(input: &[u8], count: usize) -> String {
    let mut output = String::new();
    let mut i = 0;

    while i < count {
        let mut value = u32::from(input[i]);
        i += 1;
        output.push(ITOA64[(value & 0x3f) as usize] as char);
        if i < count {
            value |= u32::from(input[i]) << 8;
        }
        output.push(ITOA64[((value >> 6) & 0x3f) as usize] as char);
        if i >= count {
            break;
        }
        i += 1;
        if i < count {
            value |= u32::from(input[i]) << 16;
        }
        output.push(ITOA64[((value >> 12) & 0x3f) as usize] as char);
        if i >= count {
            break;
        }
        i += 1;
        output.push(ITOA64[((value >> 18) & 0x3f) as usize] as char);
    }

    output
}

/// Verify a password against a `$P$`/`$H$` portable hash.
///
/// Malformed input (wrong length, iteration count out of the 7..=30 range
/// the reference implementation accepts) verifies as `false`.
#[must_use]
pub fn check(password: &[u8], stored: &str) -> bool {
    let bytes = stored.as_bytes();
    if bytes.len() < 12 {
        return false;
    }

    let Some(count_log2) = ITOA64.iter().position(|&c| c == bytes[3]) else {
        return false;
    };
    if !(7..=30).contains(&count_log2) {
        return false;
    }
    let count = 1u32 << count_log2;
    let salt = &bytes[4..12];

    let mut hash: [u8; 16] = {
        let mut md5 = Md5::new();
        md5.update(salt);
        md5.update(password);
        md5.finalize().into()
    };
    for _ in 0..count {
        let mut md5 = Md5::new();
        md5.update(hash);
        md5.update(password);
        hash = md5.finalize().into();
    }

    let mut output = stored[..12].to_string();
    output.push_str(&encode64(&hash, 16));

    output.as_bytes().ct_eq(bytes).into()
}

#[cfg(test)]
pub(crate) fn hash_for_tests(password: &[u8], count_log2: usize, salt: &str) -> String {
    assert_eq!(salt.len(), 8);
    let count = 1u32 << count_log2;

    let mut hash: [u8; 16] = {
        let mut md5 = Md5::new();
        md5.update(salt.as_bytes());
        md5.update(password);
        md5.finalize().into()
    };
    for _ in 0..count {
        let mut md5 = Md5::new();
        md5.update(hash);
        md5.update(password);
        hash = md5.finalize().into();
    }

    format!(
        "$P${}{}{}",
        ITOA64[count_log2] as char,
        salt,
        encode64(&hash, 16)
    )
}
