//! HS256 encode/decode for access tokens.
//!
//! Deliberately minimal: one algorithm, one token shape. The signature is
//! checked with a constant-time MAC verify before the payload is trusted.

use anyhow::{Context, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::Sha256;
use std::collections::BTreeMap;

type HmacSha256 = Hmac<Sha256>;

/// Discriminator carried in every access token.
pub const ACCESS_TOKEN_TYPE: &str = "access";

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AccessClaims {
    pub iss: String,
    pub sub: i64,
    pub iat: i64,
    pub exp: i64,
    #[serde(rename = "type")]
    pub token_type: String,
    /// Free-form extra claims merged into the payload (e.g. `username`).
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl AccessClaims {
    /// Convenience accessor for the `username` extra claim.
    #[must_use]
    pub fn username(&self) -> Option<&str> {
        self.extra.get("username").and_then(Value::as_str)
    }
}

/// Serialize and sign claims into `header.payload.signature`.
pub fn encode(claims: &AccessClaims, secret: &[u8]) -> Result<String> {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload =
        URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims).context("serialize token claims")?);

    let signature = URL_SAFE_NO_PAD.encode(sign(&header, &payload, secret)?);

    Ok(format!("{header}.{payload}.{signature}"))
}

/// Verify the signature and deserialize the payload.
///
/// Returns `None` for anything that is not a well-formed, correctly signed
/// token; expiry/issuer/type checks are the caller's business.
#[must_use]
pub fn decode(token: &str, secret: &[u8]) -> Option<AccessClaims> {
    let mut parts = token.split('.');
    let header = parts.next()?;
    let payload = parts.next()?;
    let signature = parts.next()?;
    if parts.next().is_some() {
        return None;
    }

    let mut mac = HmacSha256::new_from_slice(secret).ok()?;
    mac.update(header.as_bytes());
    mac.update(b".");
    mac.update(payload.as_bytes());

    let given = URL_SAFE_NO_PAD.decode(signature).ok()?;
    // verify_slice is constant-time
    mac.verify_slice(&given).ok()?;

    let payload = URL_SAFE_NO_PAD.decode(payload).ok()?;
    serde_json::from_slice(&payload).ok()
}

fn sign(header: &str, payload: &str, secret: &[u8]) -> Result<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(secret).context("initialize HMAC")?;
    mac.update(header.as_bytes());
    mac.update(b".");
    mac.update(payload.as_bytes());
    Ok(mac.finalize().into_bytes().to_vec())
}
