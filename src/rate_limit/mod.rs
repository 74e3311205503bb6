//! Database-backed fixed-window rate limiting.
//!
//! Windows are aligned to the Unix epoch: every request in the same
//! `window_seconds` slice shares one counter row keyed by
//! `(identifier, identifier_type, endpoint, window_start)`. Counting in the
//! database keeps the limiter correct across multiple API instances.

use anyhow::{Context, Result};
use sqlx::{PgPool, Row};
use tracing::Instrument;

/// Counter rows from finished windows are pruned once they are this old.
const STALE_WINDOW_SECONDS: i64 = 3600;

/// What a rate-limit identifier represents.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IdentifierKind {
    Ip,
    User,
}

impl IdentifierKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ip => "ip",
            Self::User => "user",
        }
    }
}

/// One limit: at most `max_requests` per `window_seconds` slice.
#[derive(Clone, Copy, Debug)]
pub struct RateLimitRule {
    pub max_requests: i64,
    pub window_seconds: i64,
}

/// Endpoint that gets the tighter login window regardless of identifier kind.
pub const LOGIN_ENDPOINT: &str = "/auth/login";

/// The configured limits; the limiter picks which one a check falls under.
#[derive(Clone, Copy, Debug)]
pub struct RateLimitPolicy {
    pub ip: RateLimitRule,
    pub user: RateLimitRule,
    pub login: RateLimitRule,
}

impl RateLimitPolicy {
    /// Login attempts share the stricter window whether counted by ip or user.
    #[must_use]
    pub fn rule_for(&self, kind: IdentifierKind, endpoint: Option<&str>) -> RateLimitRule {
        if endpoint == Some(LOGIN_ENDPOINT) {
            return self.login;
        }
        match kind {
            IdentifierKind::Ip => self.ip,
            IdentifierKind::User => self.user,
        }
    }
}

/// Outcome of a rate-limit check, carrying everything the response headers
/// need.
#[derive(Clone, Copy, Debug)]
pub struct RateLimitVerdict {
    pub allowed: bool,
    pub limit: i64,
    pub remaining: i64,
    pub reset: i64,
}

impl RateLimitVerdict {
    /// Seconds until the current window rolls over.
    #[must_use]
    pub fn retry_after(&self, now: i64) -> i64 {
        (self.reset - now).max(0)
    }
}

/// Check and count one request under the rule `policy` selects for it.
///
/// Counters are keyed by the request path, so each endpoint gets its own
/// window per identifier. A row for the current window is incremented when
/// under the limit and left untouched when at it. A missing row triggers
/// pruning of stale windows before the insert; losing the insert race to a
/// concurrent request falls back to an increment of the winner's row.
pub async fn check(
    pool: &PgPool,
    policy: RateLimitPolicy,
    identifier: &str,
    kind: IdentifierKind,
    endpoint: Option<&str>,
    now: i64,
) -> Result<RateLimitVerdict> {
    let rule = policy.rule_for(kind, endpoint);
    let window_start = window_start(now, rule.window_seconds);
    let reset = window_start + rule.window_seconds;

    let existing = fetch_window(pool, identifier, kind, endpoint, window_start).await?;

    match existing {
        Some((id, count)) => {
            let verdict = evaluate(rule, count, reset);
            if verdict.allowed {
                increment_by_id(pool, id).await?;
            }
            Ok(verdict)
        }
        None => {
            prune_stale(pool, now).await?;
            let count = insert_window(pool, identifier, kind, endpoint, window_start).await?;
            Ok(evaluate(rule, count - 1, reset))
        }
    }
}

/// The allow/deny decision for one request, given how many requests the
/// window had already seen before it.
#[must_use]
pub fn evaluate(rule: RateLimitRule, prior_count: i64, reset: i64) -> RateLimitVerdict {
    let allowed = prior_count < rule.max_requests;
    RateLimitVerdict {
        allowed,
        limit: rule.max_requests,
        remaining: if allowed {
            (rule.max_requests - prior_count - 1).max(0)
        } else {
            0
        },
        reset,
    }
}

/// Epoch-aligned start of the window containing `now`.
#[must_use]
pub fn window_start(now: i64, window_seconds: i64) -> i64 {
    if window_seconds <= 0 {
        return now;
    }
    now - now.rem_euclid(window_seconds)
}

async fn fetch_window(
    pool: &PgPool,
    identifier: &str,
    kind: IdentifierKind,
    endpoint: Option<&str>,
    window_start: i64,
) -> Result<Option<(i64, i64)>> {
    // IS NOT DISTINCT FROM keeps NULL endpoints comparable
    let query = r"
        SELECT id, request_count FROM api_rate_limits
        WHERE identifier = $1
          AND identifier_type = $2
          AND endpoint IS NOT DISTINCT FROM $3
          AND window_start = $4
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(identifier)
        .bind(kind.as_str())
        .bind(endpoint)
        .bind(window_start)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to read rate-limit window")?;

    Ok(row.map(|row| (row.get("id"), row.get("request_count"))))
}

async fn increment_by_id(pool: &PgPool, id: i64) -> Result<()> {
    let query = "UPDATE api_rate_limits SET request_count = request_count + 1 WHERE id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(id)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to increment rate-limit window")?;

    Ok(())
}

async fn prune_stale(pool: &PgPool, now: i64) -> Result<()> {
    let query = "DELETE FROM api_rate_limits WHERE window_start < $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(now - STALE_WINDOW_SECONDS)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to prune stale rate-limit windows")?;

    Ok(())
}

/// Insert the first hit of a window, returning the resulting count.
///
/// Two instances can race on the first hit; the loser's unique violation is
/// resolved by incrementing the winner's row instead.
async fn insert_window(
    pool: &PgPool,
    identifier: &str,
    kind: IdentifierKind,
    endpoint: Option<&str>,
    window_start: i64,
) -> Result<i64> {
    let query = r"
        INSERT INTO api_rate_limits
            (identifier, identifier_type, endpoint, window_start, request_count)
        VALUES ($1, $2, $3, $4, 1)
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    let inserted = sqlx::query(query)
        .bind(identifier)
        .bind(kind.as_str())
        .bind(endpoint)
        .bind(window_start)
        .execute(pool)
        .instrument(span)
        .await;

    match inserted {
        Ok(_) => Ok(1),
        Err(err) if is_unique_violation(&err) => {
            let query = r"
                UPDATE api_rate_limits
                SET request_count = request_count + 1
                WHERE identifier = $1
                  AND identifier_type = $2
                  AND endpoint IS NOT DISTINCT FROM $3
                  AND window_start = $4
                RETURNING request_count
            ";
            let span = tracing::info_span!(
                "db.query",
                db.system = "postgresql",
                db.operation = "UPDATE",
                db.statement = query
            );
            let row = sqlx::query(query)
                .bind(identifier)
                .bind(kind.as_str())
                .bind(endpoint)
                .bind(window_start)
                .fetch_one(pool)
                .instrument(span)
                .await
                .context("failed to recover from rate-limit insert race")?;

            Ok(row.get("request_count"))
        }
        Err(err) => Err(err).context("failed to insert rate-limit window"),
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifier_kind_strings() {
        assert_eq!(IdentifierKind::Ip.as_str(), "ip");
        assert_eq!(IdentifierKind::User.as_str(), "user");
    }

    #[test]
    fn window_start_is_epoch_aligned() {
        assert_eq!(window_start(0, 60), 0);
        assert_eq!(window_start(59, 60), 0);
        assert_eq!(window_start(60, 60), 60);
        assert_eq!(window_start(119, 60), 60);
        assert_eq!(window_start(1_700_000_042, 300), 1_699_999_800);
    }

    #[test]
    fn requests_in_same_window_share_a_start() {
        // 1_700_000_040 is a 60s boundary; both sit inside [040, 100)
        let first = window_start(1_700_000_041, 60);
        let second = window_start(1_700_000_059, 60);
        assert_eq!(first, second);
        assert_ne!(first, window_start(1_700_000_101, 60));
    }

    #[test]
    fn window_start_degenerate_window() {
        assert_eq!(window_start(1234, 0), 1234);
    }

    #[test]
    fn counting_sequence_to_the_limit() {
        let rule = RateLimitRule {
            max_requests: 3,
            window_seconds: 60,
        };

        let mut results = Vec::new();
        for prior in 0..4 {
            let verdict = evaluate(rule, prior, 60);
            results.push((verdict.allowed, verdict.remaining));
        }
        assert_eq!(results, vec![(true, 2), (true, 1), (true, 0), (false, 0)]);
    }

    #[test]
    fn new_window_starts_counting_from_zero() {
        let rule = RateLimitRule {
            max_requests: 3,
            window_seconds: 60,
        };

        // window full at second 59, rolled over by second 61
        let denied = evaluate(rule, 3, window_start(59, 60) + 60);
        assert!(!denied.allowed);
        assert_ne!(window_start(61, 60), window_start(59, 60));
        let fresh = evaluate(rule, 0, window_start(61, 60) + 60);
        assert!(fresh.allowed);
        assert_eq!(fresh.remaining, 2);
    }

    #[test]
    fn login_rule_applies_to_both_kinds() {
        let policy = RateLimitPolicy {
            ip: RateLimitRule {
                max_requests: 200,
                window_seconds: 60,
            },
            user: RateLimitRule {
                max_requests: 100,
                window_seconds: 60,
            },
            login: RateLimitRule {
                max_requests: 10,
                window_seconds: 300,
            },
        };

        let by_ip = policy.rule_for(IdentifierKind::Ip, Some(LOGIN_ENDPOINT));
        let by_user = policy.rule_for(IdentifierKind::User, Some(LOGIN_ENDPOINT));
        assert_eq!(by_ip.max_requests, 10);
        assert_eq!(by_ip.window_seconds, 300);
        assert_eq!(by_user.max_requests, 10);

        assert_eq!(
            policy.rule_for(IdentifierKind::Ip, Some("/vehicles")).max_requests,
            200
        );
        assert_eq!(
            policy.rule_for(IdentifierKind::User, Some("/vehicles")).max_requests,
            100
        );
        assert_eq!(policy.rule_for(IdentifierKind::User, None).max_requests, 100);
    }

    #[test]
    fn retry_after_counts_down_to_reset() {
        let verdict = RateLimitVerdict {
            allowed: false,
            limit: 10,
            remaining: 0,
            reset: 1_700_000_300,
        };
        assert_eq!(verdict.retry_after(1_700_000_290), 10);
        assert_eq!(verdict.retry_after(1_700_000_300), 0);
        assert_eq!(verdict.retry_after(1_700_000_310), 0);
    }
}
