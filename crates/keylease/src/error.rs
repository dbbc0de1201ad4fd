// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use thiserror::Error;

/// Failures surfaced by the credential lifecycle and addressing layers.
#[derive(Debug, Error)]
pub enum CredentialError {
    /// Malformed or ambiguous resource target. Fatal, never retried.
    #[error("invalid resource address: {0}")]
    AddressFormat(String),

    /// Mutually exclusive or disallowed option combination. Raised before any
    /// network call.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The login handshake failed.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// The token exchange failed after a successful login.
    #[error("token issuance failed: {0}")]
    Issuance(String),

    /// A serialized token could not be decoded.
    #[error("malformed token: {0}")]
    MalformedToken(String),
}

impl CredentialError {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AddressFormat(_) => "ADDRESS_FORMAT",
            Self::InvalidConfiguration(_) => "INVALID_CONFIGURATION",
            Self::Authentication(_) => "AUTHENTICATION",
            Self::Issuance(_) => "ISSUANCE",
            Self::MalformedToken(_) => "MALFORMED_TOKEN",
        }
    }

    /// Whether a scheduled control loop may try again on its next tick.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Authentication(_) | Self::Issuance(_))
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
