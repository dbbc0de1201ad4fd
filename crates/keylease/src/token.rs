// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Access token model.

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::error::CredentialError;

/// Opaque secret bytes. Zeroed on drop, redacted in `Debug`.
#[derive(PartialEq, Eq)]
pub struct SecretMaterial(Zeroizing<Vec<u8>>);

impl SecretMaterial {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(Zeroizing::new(bytes.into()))
    }

    pub fn expose(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for SecretMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretMaterial({} bytes)", self.0.len())
    }
}

/// Time-bounded bearer credential issued by the remote service.
///
/// Instants are held at millisecond precision, the precision of the wire
/// format. Each issuance yields a fresh, independently owned value.
#[derive(Debug, PartialEq, Eq)]
pub struct AccessToken {
    name: String,
    secret: SecretMaterial,
    issued_at: SystemTime,
    expires_at: SystemTime,
}

impl AccessToken {
    pub fn new(
        name: impl Into<String>,
        secret: SecretMaterial,
        issued_at: SystemTime,
        expires_at: SystemTime,
    ) -> Result<Self, CredentialError> {
        let name = name.into();
        if name.is_empty() || name.len() > u16::MAX as usize {
            return Err(CredentialError::MalformedToken(format!(
                "token name must be 1..={} bytes",
                u16::MAX
            )));
        }
        let issued_at = from_epoch_ms(epoch_ms(issued_at));
        let expires_at = from_epoch_ms(epoch_ms(expires_at));
        if expires_at <= issued_at {
            return Err(CredentialError::MalformedToken(
                "token expiration must follow its issuance".into(),
            ));
        }
        Ok(Self { name, secret, issued_at, expires_at })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn secret(&self) -> &SecretMaterial {
        &self.secret
    }

    pub fn issued_at(&self) -> SystemTime {
        self.issued_at
    }

    pub fn expires_at(&self) -> SystemTime {
        self.expires_at
    }

    /// Remaining lifetime at `now`, or `None` once expired.
    pub fn expires_in(&self, now: SystemTime) -> Option<Duration> {
        self.expires_at.duration_since(now).ok().filter(|d| !d.is_zero())
    }

    /// Short SHA-256 prefix of the secret, safe to log.
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.secret.expose());
        digest.iter().take(6).map(|b| format!("{b:02x}")).collect()
    }
}

/// Milliseconds since the Unix epoch, clamped to zero for earlier instants.
pub fn epoch_ms(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

pub fn from_epoch_ms(ms: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_millis(ms)
}
