// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Renewal-window arithmetic.

use std::time::{Duration, SystemTime};

use serde::Serialize;

/// Configured lead time before expiry during which a valid token is renewed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenewalWindow {
    Configured(Duration),
    /// Absent or negative setting. Always renews.
    Invalid,
}

impl RenewalWindow {
    /// Convert a whole-seconds setting. Negative values are invalid.
    pub fn from_secs(secs: i64) -> Self {
        match u64::try_from(secs) {
            Ok(s) => Self::Configured(Duration::from_secs(s)),
            Err(_) => Self::Invalid,
        }
    }

    pub fn from_setting(secs: Option<i64>) -> Self {
        secs.map(Self::from_secs).unwrap_or(Self::Invalid)
    }

    pub fn duration(&self) -> Option<Duration> {
        match self {
            Self::Configured(d) => Some(*d),
            Self::Invalid => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RenewalReason {
    NotExpiredNotDue,
    AlreadyExpired,
    WithinRenewalWindow,
    WindowInvalid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RenewalDecision {
    pub should_renew: bool,
    pub reason: RenewalReason,
}

impl RenewalDecision {
    fn renew(reason: RenewalReason) -> Self {
        Self { should_renew: true, reason }
    }
}

/// Decide whether a token expiring at `expires_at` must be renewed at `now`.
///
/// Order matters: an expired token renews regardless of the window, and an
/// invalid window renews rather than never renewing.
pub fn decide(now: SystemTime, expires_at: SystemTime, window: RenewalWindow) -> RenewalDecision {
    if now > expires_at {
        return RenewalDecision::renew(RenewalReason::AlreadyExpired);
    }
    let Some(window) = window.duration() else {
        return RenewalDecision::renew(RenewalReason::WindowInvalid);
    };
    // An overflowing horizon is past any representable expiry.
    let due = now.checked_add(window).map_or(true, |horizon| horizon > expires_at);
    if due {
        return RenewalDecision::renew(RenewalReason::WithinRenewalWindow);
    }
    RenewalDecision { should_renew: false, reason: RenewalReason::NotExpiredNotDue }
}

#[cfg(test)]
#[path = "renewal_tests.rs"]
mod tests;
