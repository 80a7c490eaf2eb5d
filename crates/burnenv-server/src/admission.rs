//! Structural and bounds checks applied to an inbound drop before it reaches
//! the store.
//!
//! The server never decodes the envelope. It reads just enough of the raw
//! fields to enforce size ceilings and lifecycle bounds, and keeps the request
//! body as the opaque blob.

use std::time::Duration;

use http::StatusCode;
use serde::Deserialize;

/// Raw fields of a create request. Everything defaults so that a missing
/// field trips its own rule rather than a generic parse error.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct DropRequest {
    pub ciphertext: String,
    pub salt: String,
    pub iv: String,
    pub expiry: i64,
    pub max_views: i64,
}

/// Lifecycle of a drop that passed admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admitted {
    pub expiry: i64,
    pub max_views: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AdmissionError {
    #[error("missing required field: ciphertext")]
    MissingCiphertext,
    #[error("missing required field: salt")]
    MissingSalt,
    #[error("missing required field: iv")]
    MissingIv,
    #[error("ciphertext exceeds maximum size (limit: {limit} bytes)")]
    CiphertextTooLarge { limit: usize },
    #[error("salt exceeds maximum length ({limit} bytes)")]
    SaltTooLong { limit: usize },
    #[error("iv exceeds maximum length ({limit} bytes)")]
    IvTooLong { limit: usize },
    #[error("expiry must be in the future")]
    ExpiryNotInFuture,
    #[error("expiry must be at least {min_secs} seconds from now")]
    TtlTooShort { min_secs: u64 },
    #[error("expiry cannot exceed {max_secs} seconds from now")]
    TtlTooLong { max_secs: u64 },
    #[error("max_views must be at least {min}")]
    TooFewViews { min: u32 },
    #[error("max_views cannot exceed {max}")]
    TooManyViews { max: u32 },
}

impl AdmissionError {
    /// Stable machine-readable code, one per rule.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingCiphertext => "missing_ciphertext",
            Self::MissingSalt => "missing_salt",
            Self::MissingIv => "missing_iv",
            Self::CiphertextTooLarge { .. } => "ciphertext_too_large",
            Self::SaltTooLong { .. } => "salt_too_long",
            Self::IvTooLong { .. } => "iv_too_long",
            Self::ExpiryNotInFuture => "expiry_not_in_future",
            Self::TtlTooShort { .. } => "ttl_too_short",
            Self::TtlTooLong { .. } => "ttl_too_long",
            Self::TooFewViews { .. } => "max_views_too_low",
            Self::TooManyViews { .. } => "max_views_too_high",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::CiphertextTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

/// Bounds a drop must satisfy. Lengths are measured on the base64 text as it
/// arrives, before any decoding.
#[derive(Debug, Clone)]
pub struct AdmissionPolicy {
    /// 2 MiB of base64, roughly 1.5 MiB decoded.
    pub max_ciphertext_len: usize,
    pub max_salt_len: usize,
    pub max_iv_len: usize,
    pub min_ttl: Duration,
    pub max_ttl: Duration,
    pub min_views: u32,
    pub max_views: u32,
}

impl Default for AdmissionPolicy {
    fn default() -> Self {
        Self {
            max_ciphertext_len: 2 * 1024 * 1024,
            max_salt_len: 64,
            max_iv_len: 64,
            min_ttl: Duration::from_secs(60),
            max_ttl: Duration::from_secs(24 * 60 * 60),
            min_views: 1,
            max_views: 100,
        }
    }
}

impl AdmissionPolicy {
    /// Check `req` against every rule, first failure wins. `now` is unix
    /// seconds. Pure: no store access, no side effects.
    pub fn check(&self, req: &DropRequest, now: i64) -> Result<Admitted, AdmissionError> {
        if req.ciphertext.is_empty() {
            return Err(AdmissionError::MissingCiphertext);
        }
        if req.salt.is_empty() {
            return Err(AdmissionError::MissingSalt);
        }
        if req.iv.is_empty() {
            return Err(AdmissionError::MissingIv);
        }

        if req.ciphertext.len() > self.max_ciphertext_len {
            return Err(AdmissionError::CiphertextTooLarge {
                limit: self.max_ciphertext_len,
            });
        }
        if req.salt.len() > self.max_salt_len {
            return Err(AdmissionError::SaltTooLong {
                limit: self.max_salt_len,
            });
        }
        if req.iv.len() > self.max_iv_len {
            return Err(AdmissionError::IvTooLong {
                limit: self.max_iv_len,
            });
        }

        if req.expiry <= now {
            return Err(AdmissionError::ExpiryNotInFuture);
        }
        let ttl = req.expiry.abs_diff(now);
        if ttl < self.min_ttl.as_secs() {
            return Err(AdmissionError::TtlTooShort {
                min_secs: self.min_ttl.as_secs(),
            });
        }
        if ttl > self.max_ttl.as_secs() {
            return Err(AdmissionError::TtlTooLong {
                max_secs: self.max_ttl.as_secs(),
            });
        }

        if req.max_views < i64::from(self.min_views) {
            return Err(AdmissionError::TooFewViews {
                min: self.min_views,
            });
        }
        if req.max_views > i64::from(self.max_views) {
            return Err(AdmissionError::TooManyViews {
                max: self.max_views,
            });
        }
        let max_views = u32::try_from(req.max_views).map_err(|_| AdmissionError::TooManyViews {
            max: self.max_views,
        })?;

        Ok(Admitted {
            expiry: req.expiry,
            max_views,
        })
    }
}
