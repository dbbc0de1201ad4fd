// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Credential lifecycle: issuance and renewal on the coordinator, attachment
//! on workers.
//!
//! The manager owns one entry of a [`CredentialRecord`]. Every successful
//! issuance replaces that entry in a single `put`, superseding the previous
//! token. Old tokens are never revoked remotely; they expire on their own.
//!
//! Calls for the same key must not overlap. A single control loop (see
//! [`crate::renewer`]) is the expected caller.

use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use futures_util::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::codec;
use crate::config::LeaseSettings;
use crate::error::CredentialError;
use crate::issuance::{TokenAcquirer, TokenEndpoint};
use crate::login::{with_authenticated_context, AuthProvider, LoginCredentials};
use crate::record::CredentialRecord;
use crate::renewal::{self, RenewalDecision};
use crate::token::{epoch_ms, AccessToken};

pub const DEFAULT_CREDENTIAL_KEY: &str = "KEYLEASE_CREDENTIALS";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialState {
    Unissued,
    Issued,
    Renewing,
    Expired,
}

impl CredentialState {
    fn for_expiry(expires_at: SystemTime, now: SystemTime) -> Self {
        if now > expires_at {
            Self::Expired
        } else {
            Self::Issued
        }
    }
}

impl fmt::Display for CredentialState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unissued => f.write_str("unissued"),
            Self::Issued => f.write_str("issued"),
            Self::Renewing => f.write_str("renewing"),
            Self::Expired => f.write_str("expired"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IssueOutcome {
    /// A new token was written into the record.
    Issued { token_name: String },
    /// The record already held a decodable token.
    AlreadyIssued { token_name: String },
}

impl IssueOutcome {
    pub fn changed_record(&self) -> bool {
        matches!(self, Self::Issued { .. })
    }

    pub fn token_name(&self) -> &str {
        match self {
            Self::Issued { token_name } | Self::AlreadyIssued { token_name } => token_name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenewOutcome {
    /// Absent, sentinel, or undecodable entry.
    NothingToRenew,
    NotDue(RenewalDecision),
    Renewed { decision: RenewalDecision, token_name: String },
}

impl RenewOutcome {
    pub fn changed_record(&self) -> bool {
        matches!(self, Self::Renewed { .. })
    }
}

/// Point-in-time view of a record entry, safe to print.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CredentialStatus {
    pub key: String,
    pub state: CredentialState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Coordinator-side capability.
pub trait CredentialIssuer: Send + Sync {
    fn ensure_issued<'a>(
        &'a self,
        record: &'a mut CredentialRecord,
    ) -> BoxFuture<'a, Result<IssueOutcome, CredentialError>>;

    fn maybe_renew<'a>(
        &'a self,
        record: &'a mut CredentialRecord,
    ) -> BoxFuture<'a, Result<RenewOutcome, CredentialError>>;
}

/// Worker-side capability. Workers only ever read the record.
pub trait CredentialConsumer: Send + Sync {
    fn attach(&self, record: &CredentialRecord) -> AttachOutcome;

    /// Re-read a redistributed record, replacing any bound token. An absent
    /// or reserved entry keeps the current token; an unusable one drops it.
    fn update(&self, record: &CredentialRecord) -> AttachOutcome {
        self.attach(record)
    }

    fn detach(&self);
}

/// Submission-side step: mark the entry as reserved but not yet issued.
///
/// Returns `false`, leaving the record untouched, when the entry already
/// holds a value.
pub fn reserve(record: &mut CredentialRecord, key: &str) -> bool {
    if record.contains(key) {
        debug!(key, "credential entry already present, not reserving");
        return false;
    }
    record.put(key, codec::PLACEHOLDER);
    debug!(key, "credential entry reserved");
    true
}

/// Snapshot of `key` in `record`, derived from the record alone.
pub fn status(record: &CredentialRecord, key: &str) -> CredentialStatus {
    let now = SystemTime::now();
    let mut status = CredentialStatus {
        key: key.to_owned(),
        state: CredentialState::Unissued,
        token_name: None,
        expires_in_secs: None,
        error: None,
    };
    match codec::decode_record_value(record.get(key)) {
        Ok(Some(token)) => {
            status.state = CredentialState::for_expiry(token.expires_at(), now);
            status.expires_in_secs = token.expires_in(now).map(|d| d.as_secs());
            status.token_name = Some(token.name().to_owned());
        }
        Ok(None) => {}
        Err(e) => status.error = Some(e.to_string()),
    }
    status
}

/// Resets the tracked state if a renewal does not complete, including when
/// the renewal future is dropped by a timeout.
struct RenewingGuard<'a> {
    state: &'a Mutex<CredentialState>,
    previous_expiry: SystemTime,
    completed: bool,
}

impl<'a> RenewingGuard<'a> {
    fn enter(state: &'a Mutex<CredentialState>, previous_expiry: SystemTime) -> Self {
        *state.lock() = CredentialState::Renewing;
        Self { state, previous_expiry, completed: false }
    }

    fn complete(mut self) {
        self.completed = true;
        *self.state.lock() = CredentialState::Issued;
    }
}

impl Drop for RenewingGuard<'_> {
    fn drop(&mut self) {
        if !self.completed {
            *self.state.lock() = CredentialState::for_expiry(self.previous_expiry, SystemTime::now());
        }
    }
}

/// Coordinator-side lifecycle manager for one credential key.
pub struct CredentialLifecycleManager {
    key: String,
    credentials: LoginCredentials,
    settings: LeaseSettings,
    provider: Arc<dyn AuthProvider>,
    acquirer: TokenAcquirer,
    state: Mutex<CredentialState>,
}

impl CredentialLifecycleManager {
    /// Fails with [`CredentialError::InvalidConfiguration`] before any
    /// network call when the settings cannot support issuance.
    pub fn new(
        settings: LeaseSettings,
        provider: Arc<dyn AuthProvider>,
        endpoint: Arc<dyn TokenEndpoint>,
    ) -> Result<Self, CredentialError> {
        let credentials = settings.login_credentials()?;
        let acquirer = TokenAcquirer::new(endpoint)
            .with_prefix(settings.token_prefix.clone())
            .with_lifetime(settings.token_lifetime);
        Ok(Self {
            key: settings.credential_key.clone(),
            credentials,
            settings,
            provider,
            acquirer,
            state: Mutex::new(CredentialState::Unissued),
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn settings(&self) -> &LeaseSettings {
        &self.settings
    }

    pub fn state(&self) -> CredentialState {
        *self.state.lock()
    }

    pub fn status(&self, record: &CredentialRecord) -> CredentialStatus {
        let mut snapshot = status(record, &self.key);
        if self.state() == CredentialState::Renewing {
            snapshot.state = CredentialState::Renewing;
        }
        snapshot
    }

    /// One login, one issuance call, one logout.
    async fn acquire(&self) -> Result<AccessToken, CredentialError> {
        let acquirer = &self.acquirer;
        with_authenticated_context(Arc::clone(&self.provider), &self.credentials, |ctx| async move {
            acquirer.acquire(&ctx).await
        })
        .await
    }

    fn store(&self, record: &mut CredentialRecord, token: &AccessToken) {
        record.put(self.key.as_str(), codec::encode(token));
    }

    async fn ensure_issued_inner(
        &self,
        record: &mut CredentialRecord,
    ) -> Result<IssueOutcome, CredentialError> {
        match codec::decode_record_value(record.get(&self.key)) {
            Ok(Some(token)) => {
                *self.state.lock() = CredentialState::for_expiry(token.expires_at(), SystemTime::now());
                debug!(key = %self.key, token = %token.name(), "credential already issued");
                return Ok(IssueOutcome::AlreadyIssued { token_name: token.name().to_owned() });
            }
            Ok(None) => {
                debug!(key = %self.key, "no credential issued yet, issuing");
            }
            Err(e) => {
                warn!(key = %self.key, err = %e, "credential entry is unreadable, issuing a fresh token");
            }
        }

        let token = self.acquire().await?;
        self.store(record, &token);
        *self.state.lock() = CredentialState::Issued;
        info!(
            key = %self.key,
            token = %token.name(),
            fingerprint = %token.fingerprint(),
            expires_at_ms = epoch_ms(token.expires_at()),
            "access token issued"
        );
        Ok(IssueOutcome::Issued { token_name: token.name().to_owned() })
    }

    async fn maybe_renew_inner(
        &self,
        record: &mut CredentialRecord,
    ) -> Result<RenewOutcome, CredentialError> {
        let current = match codec::decode_record_value(record.get(&self.key)) {
            Ok(Some(token)) => token,
            Ok(None) => {
                debug!(key = %self.key, "no credential issued yet, nothing to renew");
                return Ok(RenewOutcome::NothingToRenew);
            }
            Err(e) => {
                warn!(key = %self.key, err = %e, "credential entry is unreadable, nothing to renew");
                return Ok(RenewOutcome::NothingToRenew);
            }
        };

        let decision =
            renewal::decide(SystemTime::now(), current.expires_at(), self.settings.renewal_window);
        if !decision.should_renew {
            *self.state.lock() = CredentialState::Issued;
            debug!(key = %self.key, token = %current.name(), "renewal not due");
            return Ok(RenewOutcome::NotDue(decision));
        }

        debug!(key = %self.key, token = %current.name(), reason = ?decision.reason, "renewal due");
        let guard = RenewingGuard::enter(&self.state, current.expires_at());
        let token = self.acquire().await?;
        self.store(record, &token);
        guard.complete();
        info!(
            key = %self.key,
            token = %token.name(),
            previous = %current.name(),
            fingerprint = %token.fingerprint(),
            reason = ?decision.reason,
            expires_at_ms = epoch_ms(token.expires_at()),
            "access token renewed"
        );
        Ok(RenewOutcome::Renewed { decision, token_name: token.name().to_owned() })
    }
}

impl CredentialIssuer for CredentialLifecycleManager {
    fn ensure_issued<'a>(
        &'a self,
        record: &'a mut CredentialRecord,
    ) -> BoxFuture<'a, Result<IssueOutcome, CredentialError>> {
        Box::pin(self.ensure_issued_inner(record))
    }

    fn maybe_renew<'a>(
        &'a self,
        record: &'a mut CredentialRecord,
    ) -> BoxFuture<'a, Result<RenewOutcome, CredentialError>> {
        Box::pin(self.maybe_renew_inner(record))
    }
}

// -- Worker side --------------------------------------------------------------

/// A token bound into a worker's identity context.
#[derive(Debug)]
pub struct WorkerIdentity {
    token: AccessToken,
}

impl WorkerIdentity {
    pub fn token_name(&self) -> &str {
        self.token.name()
    }

    pub fn expires_at(&self) -> SystemTime {
        self.token.expires_at()
    }

    pub fn fingerprint(&self) -> String {
        self.token.fingerprint()
    }

    /// `ApiKey <base64(secret)>` for outgoing calls.
    pub fn authorization_header(&self) -> String {
        format!("ApiKey {}", STANDARD.encode(self.token.secret().expose()))
    }
}

#[derive(Debug, Clone)]
pub enum AttachOutcome {
    Bound(Arc<WorkerIdentity>),
    /// Absent or sentinel entry.
    NoToken,
    /// Undecodable entry.
    Unusable,
}

impl AttachOutcome {
    pub fn identity(&self) -> Option<&Arc<WorkerIdentity>> {
        match self {
            Self::Bound(identity) => Some(identity),
            Self::NoToken | Self::Unusable => None,
        }
    }
}

/// Worker-side identity context.
#[derive(Debug)]
pub struct WorkerCredentials {
    key: String,
    bound: RwLock<Option<Arc<WorkerIdentity>>>,
}

impl WorkerCredentials {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into(), bound: RwLock::new(None) }
    }

    pub fn current(&self) -> Option<Arc<WorkerIdentity>> {
        self.bound.read().clone()
    }
}

impl Default for WorkerCredentials {
    fn default() -> Self {
        Self::new(DEFAULT_CREDENTIAL_KEY)
    }
}

impl CredentialConsumer for WorkerCredentials {
    fn attach(&self, record: &CredentialRecord) -> AttachOutcome {
        match codec::decode_record_value(record.get(&self.key)) {
            Ok(Some(token)) => {
                debug!(key = %self.key, token = %token.name(), "binding access token");
                let identity = Arc::new(WorkerIdentity { token });
                *self.bound.write() = Some(Arc::clone(&identity));
                AttachOutcome::Bound(identity)
            }
            Ok(None) => {
                debug!(key = %self.key, "no access token in credential record");
                AttachOutcome::NoToken
            }
            Err(e) => {
                warn!(key = %self.key, err = %e, "ignoring unusable access token");
                self.detach();
                AttachOutcome::Unusable
            }
        }
    }

    fn detach(&self) {
        if let Some(identity) = self.bound.write().take() {
            debug!(key = %self.key, token = %identity.token_name(), "access token detached");
        }
    }
}

#[cfg(test)]
#[path = "lifecycle_tests.rs"]
mod tests;
