use crate::{config::{Limits, User}, errors::AppError};
use axum::http::HeaderMap;
use governor::{DefaultDirectRateLimiter, DefaultKeyedRateLimiter, Quota, RateLimiter};
use nonzero_ext::nonzero;
use sha2::{Digest, Sha256};
use std::num::NonZeroU32;
use std::sync::Arc;

pub fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Resolves the bearer token to the configured user it belongs to.
pub fn authenticate<'a>(headers: &HeaderMap, users: &'a [User]) -> Result<&'a User, AppError> {
    let token = extract_bearer(headers).ok_or(AppError::Unauthorized)?;
    let presented = Sha256::digest(token.as_bytes());
    users
        .iter()
        .find(|u| {
            hex::decode(&u.token_sha256)
                .map(|expected| digest_eq(&presented, &expected))
                .unwrap_or(false)
        })
        .ok_or(AppError::Unauthorized)
}

fn digest_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

pub fn content_length_ok(headers: &HeaderMap, max_kb: usize) -> Result<(), AppError> {
    if let Some(len) = headers
        .get(axum::http::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<usize>().ok())
    {
        if len > max_kb * 1024 {
            return Err(AppError::RequestTooLarge);
        }
    }
    Ok(())
}

/// Global and per-user request budgets.
#[derive(Clone)]
pub struct RateLimiters {
    global: Arc<DefaultDirectRateLimiter>,
    per_user: Arc<DefaultKeyedRateLimiter<String>>,
}

impl RateLimiters {
    pub fn new(global_rps: u32, global_burst: u32, user_rps: u32, user_burst: u32) -> Self {
        Self {
            global: Arc::new(RateLimiter::direct(quota(global_rps, global_burst))),
            per_user: Arc::new(RateLimiter::keyed(quota(user_rps, user_burst))),
        }
    }

    pub fn from_limits(limits: &Limits) -> Self {
        Self::new(
            limits.requests_per_second,
            limits.burst,
            limits.per_user_per_second,
            limits.per_user_burst,
        )
    }

    pub fn check(&self, username: &str) -> Result<(), AppError> {
        self.global.check().map_err(|_| AppError::RateLimited)?;
        self.per_user
            .check_key(&username.to_string())
            .map_err(|_| AppError::RateLimited)
    }
}

fn quota(per_second: u32, burst: u32) -> Quota {
    let rate = NonZeroU32::new(per_second).unwrap_or(nonzero!(1u32));
    let burst = NonZeroU32::new(burst).unwrap_or(rate);
    Quota::per_second(rate).allow_burst(burst)
}
