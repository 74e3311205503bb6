//! Request field validation.
//!
//! Handlers collect per-field problems into a [`Validator`] and bail with a
//! single 422 carrying every message, so a client can surface them all at
//! once instead of fixing fields one round trip at a time. The first problem
//! reported for a field wins.

use axum::http::StatusCode;
use axum::response::Response;
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;

use super::response::{error_with_details, ErrorCode};

fn valid_date(value: &str) -> bool {
    Regex::new(r"^\d{4}-(0[1-9]|1[0-2])-(0[1-9]|[12]\d|3[01])$")
        .is_ok_and(|re| re.is_match(value))
}

#[derive(Debug, Default)]
pub struct Validator {
    errors: BTreeMap<String, String>,
}

impl Validator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.errors
            .entry(field.to_string())
            .or_insert_with(|| message.into());
    }

    pub fn required(&mut self, field: &str, value: &str) {
        if value.trim().is_empty() {
            self.add(field, format!("{field} is required"));
        }
    }

    pub fn max_length(&mut self, field: &str, value: &str, max: usize) {
        if value.chars().count() > max {
            self.add(field, format!("{field} must be at most {max} characters"));
        }
    }

    pub fn non_negative(&mut self, field: &str, value: i64) {
        if value < 0 {
            self.add(field, format!("{field} must not be negative"));
        }
    }

    pub fn range(&mut self, field: &str, value: i64, min: i64, max: i64) {
        if value < min || value > max {
            self.add(field, format!("{field} must be between {min} and {max}"));
        }
    }

    /// `YYYY-MM-DD` with in-range month and day.
    pub fn date(&mut self, field: &str, value: &str) {
        if !valid_date(value) {
            self.add(field, format!("{field} must be a date in YYYY-MM-DD format"));
        }
    }

    pub fn one_of(&mut self, field: &str, value: &str, allowed: &[&str]) {
        if !allowed.contains(&value) {
            self.add(
                field,
                format!("{field} must be one of: {}", allowed.join(", ")),
            );
        }
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// 422 when anything was reported, otherwise `Ok(())`.
    pub fn finish(self) -> Result<(), Response> {
        if self.errors.is_empty() {
            return Ok(());
        }

        let details: Value = self
            .errors
            .into_iter()
            .map(|(field, message)| (field, Value::from(message)))
            .collect::<serde_json::Map<_, _>>()
            .into();

        Err(error_with_details(
            StatusCode::UNPROCESSABLE_ENTITY,
            ErrorCode::ValidationError,
            "Validation failed",
            details,
        ))
    }
}
