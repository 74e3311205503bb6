//! Token issuance, validation, rotation and cleanup.

use anyhow::{Context, Result};
use rand::rngs::OsRng;
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use sha2::{Digest, Sha256};
use sqlx::{PgPool, Row};
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::Instrument;

use super::claims::{self, AccessClaims, ACCESS_TOKEN_TYPE};

/// Longest user-agent string persisted alongside a refresh token.
const USER_AGENT_MAX_LEN: usize = 500;

/// Revoked tokens are retained this long for audit before cleanup.
const REVOKED_RETENTION_DAYS: i32 = 7;

/// Client-reported device metadata attached to a refresh token.
#[derive(Clone, Debug, Default)]
pub struct DeviceInfo {
    pub device_id: Option<String>,
    pub device_name: Option<String>,
    pub platform: Option<String>,
}

impl DeviceInfo {
    /// Fill in each missing field from a previous session's metadata,
    /// keeping whatever the client did send.
    #[must_use]
    pub fn or_inherit(self, previous: Self) -> Self {
        Self {
            device_id: self.device_id.or(previous.device_id),
            device_name: self.device_name.or(previous.device_name),
            platform: self.platform.or(previous.platform),
        }
    }
}

/// Outcome of access-token inspection, letting callers tell an expired
/// token apart from a forged or malformed one.
#[derive(Debug)]
pub enum TokenStatus {
    Valid(AccessClaims),
    Expired,
    Invalid,
}

/// Result of a successful refresh-token rotation.
#[derive(Debug)]
pub struct RotatedTokens {
    pub user_id: i64,
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
}

/// Issues and verifies both token kinds against a shared signing secret and
/// the `api_refresh_tokens` table.
pub struct TokenService {
    pool: PgPool,
    secret: SecretString,
    issuer: String,
    access_ttl: i64,
    refresh_ttl: i64,
}

impl TokenService {
    #[must_use]
    pub fn new(
        pool: PgPool,
        secret: SecretString,
        issuer: String,
        access_ttl: i64,
        refresh_ttl: i64,
    ) -> Self {
        Self {
            pool,
            secret,
            issuer,
            access_ttl,
            refresh_ttl,
        }
    }

    /// Access-token lifetime in seconds, surfaced as `expires_in`.
    #[must_use]
    pub const fn access_ttl(&self) -> i64 {
        self.access_ttl
    }

    /// Issue a signed access token for `user_id`.
    pub fn create_access_token(
        &self,
        user_id: i64,
        extra: BTreeMap<String, Value>,
    ) -> Result<String> {
        let now = unix_now();
        let claims = AccessClaims {
            iss: self.issuer.clone(),
            sub: user_id,
            iat: now,
            exp: now + self.access_ttl,
            token_type: ACCESS_TOKEN_TYPE.to_string(),
            extra,
        };

        claims::encode(&claims, self.secret.expose_secret().as_bytes())
    }

    /// Validate an access token: signature, token type, expiry and issuer.
    ///
    /// Any failure collapses to `None`; use [`Self::inspect_access_token`]
    /// when expiry needs to be reported separately.
    #[must_use]
    pub fn validate_access_token(&self, token: &str) -> Option<AccessClaims> {
        match self.inspect_access_token(token) {
            TokenStatus::Valid(claims) => Some(claims),
            TokenStatus::Expired | TokenStatus::Invalid => None,
        }
    }

    /// Classify an access token. Signature, type and issuer problems are all
    /// `Invalid`; only a well-formed token past its `exp` is `Expired`.
    #[must_use]
    pub fn inspect_access_token(&self, token: &str) -> TokenStatus {
        let Some(claims) = claims::decode(token, self.secret.expose_secret().as_bytes()) else {
            return TokenStatus::Invalid;
        };

        if claims.token_type != ACCESS_TOKEN_TYPE {
            return TokenStatus::Invalid;
        }
        if claims.iss != self.issuer {
            return TokenStatus::Invalid;
        }
        if claims.exp < unix_now() {
            return TokenStatus::Expired;
        }

        TokenStatus::Valid(claims)
    }

    /// Mint a new opaque refresh token and persist its hash.
    ///
    /// The raw token is returned exactly once; the database only ever sees
    /// its SHA-256.
    pub async fn create_refresh_token(
        &self,
        user_id: i64,
        device: &DeviceInfo,
        ip_address: Option<&str>,
        user_agent: Option<&str>,
    ) -> Result<String> {
        let mut bytes = [0u8; 64];
        OsRng.fill_bytes(&mut bytes);
        let token = hex::encode(bytes);

        let user_agent = user_agent.map(|ua| truncate(ua, USER_AGENT_MAX_LEN));

        let query = r"
            INSERT INTO api_refresh_tokens
                (user_id, token_hash, device_id, device_name, platform,
                 ip_address, user_agent, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, NOW() + $8 * INTERVAL '1 second')
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(user_id)
            .bind(hash_token(&token))
            .bind(device.device_id.as_deref())
            .bind(device.device_name.as_deref())
            .bind(device.platform.as_deref())
            .bind(ip_address)
            .bind(user_agent.as_deref())
            .bind(self.refresh_ttl)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to insert refresh token")?;

        Ok(token)
    }

    /// Return the owning user id for a live (unexpired, unrevoked) token.
    pub async fn validate_refresh_token(&self, token: &str) -> Result<Option<i64>> {
        let query = r"
            SELECT user_id FROM api_refresh_tokens
            WHERE token_hash = $1 AND revoked = FALSE AND expires_at > NOW()
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(hash_token(token))
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to look up refresh token")?;

        Ok(row.map(|row| row.get("user_id")))
    }

    /// Revoke a single refresh token. Returns whether a row was touched.
    pub async fn revoke_refresh_token(&self, token: &str) -> Result<bool> {
        let query = r"
            UPDATE api_refresh_tokens
            SET revoked = TRUE, revoked_at = NOW()
            WHERE token_hash = $1
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(hash_token(token))
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to revoke refresh token")?;

        Ok(result.rows_affected() > 0)
    }

    /// Revoke every live token a user holds (password change, logout-all).
    pub async fn revoke_all_user_tokens(&self, user_id: i64) -> Result<u64> {
        let query = r"
            UPDATE api_refresh_tokens
            SET revoked = TRUE, revoked_at = NOW()
            WHERE user_id = $1 AND revoked = FALSE
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(user_id)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to revoke user tokens")?;

        Ok(result.rows_affected())
    }

    /// Rotate a refresh token: validate, revoke the old one, then issue a
    /// fresh access/refresh pair.
    ///
    /// The steps are sequential rather than transactional. If issuance fails
    /// after the revoke, the client re-authenticates; an old token can never
    /// remain live alongside its successor.
    pub async fn rotate_refresh_token(
        &self,
        old_token: &str,
        device: DeviceInfo,
        ip_address: Option<&str>,
        user_agent: Option<&str>,
    ) -> Result<Option<RotatedTokens>> {
        let Some(user_id) = self.validate_refresh_token(old_token).await? else {
            return Ok(None);
        };

        // Carry forward device fields the client left out, so a rotating
        // session keeps appearing as one device.
        let device = match self.inherit_device(old_token).await? {
            Some(previous) => device.or_inherit(previous),
            None => device,
        };

        self.revoke_refresh_token(old_token).await?;

        let refresh_token = self
            .create_refresh_token(user_id, &device, ip_address, user_agent)
            .await?;
        let access_token = self.create_access_token(user_id, BTreeMap::new())?;

        Ok(Some(RotatedTokens {
            user_id,
            access_token,
            refresh_token,
            expires_in: self.access_ttl,
        }))
    }

    async fn inherit_device(&self, token: &str) -> Result<Option<DeviceInfo>> {
        let query = r"
            SELECT device_id, device_name, platform
            FROM api_refresh_tokens
            WHERE token_hash = $1
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(hash_token(token))
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to load device metadata")?;

        Ok(row.map(|row| DeviceInfo {
            device_id: row.get("device_id"),
            device_name: row.get("device_name"),
            platform: row.get("platform"),
        }))
    }

    /// Drop expired tokens and revoked tokens past their retention window.
    pub async fn cleanup(&self) -> Result<u64> {
        let query = r"
            DELETE FROM api_refresh_tokens
            WHERE expires_at < NOW()
               OR (revoked = TRUE AND revoked_at < NOW() - $1 * INTERVAL '1 day')
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(REVOKED_RETENTION_DAYS)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to clean up refresh tokens")?;

        Ok(result.rows_affected())
    }

    /// Number of live refresh tokens a user currently holds.
    pub async fn count_active_sessions(&self, user_id: i64) -> Result<i64> {
        let query = r"
            SELECT COUNT(*) AS sessions FROM api_refresh_tokens
            WHERE user_id = $1 AND revoked = FALSE AND expires_at > NOW()
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(user_id)
            .fetch_one(&self.pool)
            .instrument(span)
            .await
            .context("failed to count sessions")?;

        Ok(row.get("sessions"))
    }
}

fn unix_now() -> i64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(elapsed) => i64::try_from(elapsed.as_secs()).unwrap_or(i64::MAX),
        Err(_) => 0,
    }
}

fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

fn truncate(input: &str, max: usize) -> String {
    if input.len() <= max {
        return input.to_string();
    }
    let mut end = max;
    while !input.is_char_boundary(end) {
        end -= 1;
    }
    input[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    // connect_lazy never touches the network, which lets the pure token
    // logic run without a database. It still needs a runtime to register
    // the pool, so these tests are tokio tests.
    fn service() -> TokenService {
        let pool = PgPool::connect_lazy("postgres://localhost/unused").unwrap();
        TokenService::new(
            pool,
            SecretString::from("0123456789abcdef0123456789abcdef"),
            "garageminder-api".to_string(),
            1800,
            2_592_000,
        )
    }

    #[tokio::test]
    async fn access_token_round_trip() {
        let service = service();
        let mut extra = BTreeMap::new();
        extra.insert("username".to_string(), Value::from("bob"));

        let token = service.create_access_token(7, extra).unwrap();
        let claims = service.validate_access_token(&token).unwrap();

        assert_eq!(claims.sub, 7);
        assert_eq!(claims.username(), Some("bob"));
        assert_eq!(claims.exp - claims.iat, 1800);
    }

    #[tokio::test]
    async fn inspect_classifies_expired_vs_invalid() {
        let pool = PgPool::connect_lazy("postgres://localhost/unused").unwrap();
        let expired_issuer = TokenService::new(
            pool,
            SecretString::from("0123456789abcdef0123456789abcdef"),
            "garageminder-api".to_string(),
            -10,
            2_592_000,
        );
        let service = service();

        let expired = expired_issuer.create_access_token(7, BTreeMap::new()).unwrap();
        assert!(matches!(
            service.inspect_access_token(&expired),
            TokenStatus::Expired
        ));
        assert!(matches!(
            service.inspect_access_token("garbage"),
            TokenStatus::Invalid
        ));
    }

    #[tokio::test]
    async fn expired_access_token_rejected() {
        let pool = PgPool::connect_lazy("postgres://localhost/unused").unwrap();
        let service = TokenService::new(
            pool,
            SecretString::from("0123456789abcdef0123456789abcdef"),
            "garageminder-api".to_string(),
            -10,
            2_592_000,
        );

        let token = service.create_access_token(7, BTreeMap::new()).unwrap();
        assert!(service.validate_access_token(&token).is_none());
    }

    #[tokio::test]
    async fn wrong_issuer_rejected() {
        let issuing = service();
        let token = issuing.create_access_token(7, BTreeMap::new()).unwrap();

        let pool = PgPool::connect_lazy("postgres://localhost/unused").unwrap();
        let validating = TokenService::new(
            pool,
            SecretString::from("0123456789abcdef0123456789abcdef"),
            "someone-else".to_string(),
            1800,
            2_592_000,
        );
        assert!(validating.validate_access_token(&token).is_none());
    }

    #[tokio::test]
    async fn refresh_style_token_rejected_as_access() {
        let service = service();
        let now = unix_now();
        let claims = AccessClaims {
            iss: "garageminder-api".to_string(),
            sub: 7,
            iat: now,
            exp: now + 1800,
            token_type: "refresh".to_string(),
            extra: BTreeMap::new(),
        };
        let token =
            claims::encode(&claims, b"0123456789abcdef0123456789abcdef").unwrap();

        assert!(service.validate_access_token(&token).is_none());
    }

    #[test]
    fn device_inheritance_is_per_field() {
        let previous = DeviceInfo {
            device_id: Some("dev-1".to_string()),
            device_name: Some("Bob's Pixel".to_string()),
            platform: Some("android".to_string()),
        };

        // client resends the name but nothing else
        let merged = DeviceInfo {
            device_id: None,
            device_name: Some("Renamed Pixel".to_string()),
            platform: None,
        }
        .or_inherit(previous.clone());
        assert_eq!(merged.device_id.as_deref(), Some("dev-1"));
        assert_eq!(merged.device_name.as_deref(), Some("Renamed Pixel"));
        assert_eq!(merged.platform.as_deref(), Some("android"));

        // a known device id still inherits the fields it omitted
        let merged = DeviceInfo {
            device_id: Some("dev-1".to_string()),
            device_name: None,
            platform: None,
        }
        .or_inherit(previous);
        assert_eq!(merged.device_name.as_deref(), Some("Bob's Pixel"));
        assert_eq!(merged.platform.as_deref(), Some("android"));
    }

    #[test]
    fn token_hash_is_sha256_hex() {
        let hash = hash_token("abc");
        assert_eq!(hash.len(), 64);
        assert_eq!(
            hash,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("abcdef", 4), "abcd");
        assert_eq!(truncate("abc", 10), "abc");
        // multibyte char straddling the cut point is dropped whole
        assert_eq!(truncate("aé", 2), "a");
    }
}
