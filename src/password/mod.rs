//! Password verification against every hash format WordPress has ever left
//! in `user_pass`.
//!
//! Format precedence matters and is encoded in [`HashScheme::detect`]:
//! raw MD5 (pre-2008 rows), the `$wp$` bcrypt-with-prehash scheme introduced
//! in WordPress 6.8, phpass portable hashes, and plain bcrypt/argon2 as the
//! fallback `password_verify` equivalent. A malformed hash never errors, it
//! just fails verification.

pub mod phpass;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use hmac::{Hmac, Mac};
use md5::{Digest, Md5};
use sha2::Sha384;
use subtle::ConstantTimeEq;

/// Passwords longer than this are rejected outright before any expensive
/// hashing, matching the WordPress DoS guard.
const MAX_PASSWORD_LEN: usize = 4096;

/// HMAC key for the `$wp$` pre-hash. Public by design; it only provides
/// domain separation, not secrecy.
const WP_PREHASH_KEY: &[u8] = b"wp-sha384";

/// Stored-hash format, sniffed from the hash string alone.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HashScheme {
    /// Raw MD5 hex digest, 32 chars or fewer.
    LegacyMd5,
    /// `$wp$` prefix: bcrypt over an HMAC-SHA384 pre-hash of the password.
    WpPrehashed,
    /// `$P$` / `$H$` phpass portable hash.
    Portable,
    /// Anything else: modern bcrypt or argon2 crypt string.
    Adaptive,
}

impl HashScheme {
    #[must_use]
    pub fn detect(stored: &str) -> Self {
        if stored.len() <= 32 {
            Self::LegacyMd5
        } else if stored.starts_with("$wp$") {
            Self::WpPrehashed
        } else if stored.starts_with("$P$") || stored.starts_with("$H$") {
            Self::Portable
        } else {
            Self::Adaptive
        }
    }
}

/// Verify a plaintext password against a stored hash of any supported scheme.
#[must_use]
pub fn verify(password: &str, stored: &str) -> bool {
    if stored.is_empty() {
        return false;
    }

    match HashScheme::detect(stored) {
        // Legacy MD5 rows predate any length limit and are cheap to hash, so
        // the guard below applies only to the iterated/adaptive schemes.
        HashScheme::LegacyMd5 => verify_legacy_md5(password, stored),
        _ if password.len() > MAX_PASSWORD_LEN => false,
        HashScheme::WpPrehashed => verify_wp_prehashed(password, stored),
        HashScheme::Portable => phpass::check(password.as_bytes(), stored),
        HashScheme::Adaptive => verify_adaptive(password, stored),
    }
}

fn verify_legacy_md5(password: &str, stored: &str) -> bool {
    let digest = Md5::digest(password.as_bytes());
    let computed = hex::encode(digest);
    computed.as_bytes().ct_eq(stored.as_bytes()).into()
}

/// WordPress 6.8+: `bcrypt(base64(hmac_sha384(password, "wp-sha384")))`,
/// stored as `$wp` + the bcrypt crypt string.
fn verify_wp_prehashed(password: &str, stored: &str) -> bool {
    let Ok(mut mac) = Hmac::<Sha384>::new_from_slice(WP_PREHASH_KEY) else {
        return false;
    };
    mac.update(password.as_bytes());
    let prehashed = STANDARD.encode(mac.finalize().into_bytes());

    // Strip the "$wp" marker; the remainder is a regular "$2y$..." hash.
    bcrypt::verify(prehashed, &stored[3..]).unwrap_or(false)
}

fn verify_adaptive(password: &str, stored: &str) -> bool {
    if stored.starts_with("$argon2") {
        use argon2::password_hash::PasswordHash;
        use argon2::{Argon2, PasswordVerifier};

        return PasswordHash::new(stored)
            .map(|parsed| {
                Argon2::default()
                    .verify_password(password.as_bytes(), &parsed)
                    .is_ok()
            })
            .unwrap_or(false);
    }

    bcrypt::verify(password, stored).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn md5_hex(password: &str) -> String {
        hex::encode(Md5::digest(password.as_bytes()))
    }

    fn wp_prehashed_hash(password: &str) -> String {
        let mut mac = Hmac::<Sha384>::new_from_slice(WP_PREHASH_KEY).unwrap();
        mac.update(password.as_bytes());
        let prehashed = STANDARD.encode(mac.finalize().into_bytes());
        // Low cost keeps the test fast; verification is cost-agnostic.
        let bcrypted = bcrypt::hash(prehashed, 4).unwrap();
        format!("$wp{bcrypted}")
    }

    #[test]
    fn detect_precedence() {
        assert_eq!(
            HashScheme::detect("5f4dcc3b5aa765d61d8327deb882cf99"),
            HashScheme::LegacyMd5
        );
        assert_eq!(
            HashScheme::detect("$wp$2y$10$abcdefghijklmnopqrstuvwxyz0123456789abcdefghijklmnopq"),
            HashScheme::WpPrehashed
        );
        assert_eq!(
            HashScheme::detect("$P$BhWGGmzSA2Jkfci6qRiA3VNziGcLmI0"),
            HashScheme::Portable
        );
        assert_eq!(
            HashScheme::detect("$H$9hWGGmzSA2Jkfci6qRiA3VNziGcLmI0"),
            HashScheme::Portable
        );
        assert_eq!(
            HashScheme::detect("$2y$10$abcdefghijklmnopqrstuvwxyz0123456789abcdefghijklmnopq"),
            HashScheme::Adaptive
        );
    }

    #[test]
    fn legacy_md5_round_trip() {
        let hash = md5_hex("password");
        assert!(verify("password", &hash));
        assert!(!verify("Password", &hash));
    }

    #[test]
    fn wp_prehashed_round_trip() {
        let hash = wp_prehashed_hash("s3cret pass");
        assert!(verify("s3cret pass", &hash));
        assert!(!verify("s3cret bass", &hash));
    }

    #[test]
    fn portable_round_trip() {
        let hash = phpass::hash_for_tests(b"garage minder", 8, "12345678");
        assert!(verify("garage minder", &hash));
        assert!(!verify("garage blender", &hash));
    }

    #[test]
    fn bcrypt_fallback_round_trip() {
        let hash = bcrypt::hash("modern password", 4).unwrap();
        assert!(verify("modern password", &hash));
        assert!(!verify("other password", &hash));
    }

    #[test]
    fn over_long_password_rejected() {
        let long = "x".repeat(MAX_PASSWORD_LEN + 1);
        let hash = bcrypt::hash("whatever", 4).unwrap();
        assert!(!verify(&long, &hash));
    }

    #[test]
    fn malformed_hashes_fail_closed() {
        assert!(!verify("password", ""));
        assert!(!verify("password", "$wp$not-a-bcrypt-hash-at-all-but-long-enough"));
        assert!(!verify("password", "$2y$totally-bogus-bcrypt-string-here-padpad"));
        assert!(!verify("password", "$argon2id$v=19$invalid-and-long-enough-to-dodge-md5"));
    }
}
