//! Access and refresh token lifecycle.
//!
//! Access tokens are self-contained HS256 tokens verified by signature and
//! embedded expiry alone. Refresh tokens are opaque 64-byte secrets; only
//! their SHA-256 ever reaches the database.

pub mod claims;
pub mod secret;
pub mod service;

pub use claims::AccessClaims;
pub use service::{DeviceInfo, RotatedTokens, TokenService, TokenStatus};
