// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test infrastructure: token builders, stub collaborators, and
//! assertion helpers.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use futures_util::future::BoxFuture;

use crate::error::CredentialError;
use crate::issuance::{IssueRequest, TokenEndpoint};
use crate::login::{AuthProvider, AuthenticatedContext, LoginCredentials};
use crate::token::{AccessToken, SecretMaterial};

/// Token named `name`, issued now and valid for `lifetime`.
pub fn sample_token(name: &str, lifetime: Duration) -> anyhow::Result<AccessToken> {
    let now = SystemTime::now();
    let secret = SecretMaterial::new(format!("secret-for-{name}"));
    Ok(AccessToken::new(name, secret, now, now + lifetime)?)
}

/// Auth provider that accepts any principal and counts logins and logouts.
#[derive(Debug, Default)]
pub struct StubAuthProvider {
    pub logins: AtomicU32,
    pub logouts: AtomicU32,
    pub fail_login: AtomicBool,
    pub fail_logout: AtomicBool,
}

impl StubAuthProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing_login() -> Arc<Self> {
        let stub = Self::default();
        stub.fail_login.store(true, Ordering::Relaxed);
        Arc::new(stub)
    }

    pub fn failing_logout() -> Arc<Self> {
        let stub = Self::default();
        stub.fail_logout.store(true, Ordering::Relaxed);
        Arc::new(stub)
    }

    pub fn login_count(&self) -> u32 {
        self.logins.load(Ordering::Relaxed)
    }

    pub fn logout_count(&self) -> u32 {
        self.logouts.load(Ordering::Relaxed)
    }
}

impl AuthProvider for StubAuthProvider {
    fn login<'a>(
        &'a self,
        credentials: &'a LoginCredentials,
    ) -> BoxFuture<'a, Result<AuthenticatedContext, CredentialError>> {
        Box::pin(async move {
            if self.fail_login.load(Ordering::Relaxed) {
                return Err(CredentialError::Authentication("stub login rejected".into()));
            }
            self.logins.fetch_add(1, Ordering::Relaxed);
            Ok(AuthenticatedContext::new(
                credentials.principal.clone(),
                SecretMaterial::new(b"stub-key".to_vec()),
            ))
        })
    }

    fn logout(&self, _context: &AuthenticatedContext) -> Result<(), CredentialError> {
        self.logouts.fetch_add(1, Ordering::Relaxed);
        if self.fail_logout.load(Ordering::Relaxed) {
            return Err(CredentialError::Authentication("stub logout failed".into()));
        }
        Ok(())
    }
}

/// Token endpoint that mints tokens locally.
#[derive(Debug)]
pub struct StubTokenEndpoint {
    pub calls: AtomicU32,
    pub lifetime: Duration,
    pub fail: AtomicBool,
    /// Never resolve, to exercise timeouts.
    pub hang: AtomicBool,
    /// Answer with a different name than requested.
    pub rename: AtomicBool,
}

impl StubTokenEndpoint {
    pub fn new(lifetime: Duration) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicU32::new(0),
            lifetime,
            fail: AtomicBool::new(false),
            hang: AtomicBool::new(false),
            rename: AtomicBool::new(false),
        })
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::Relaxed)
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::Relaxed);
    }

    pub fn set_hang(&self, hang: bool) {
        self.hang.store(hang, Ordering::Relaxed);
    }
}

impl TokenEndpoint for StubTokenEndpoint {
    fn issue<'a>(
        &'a self,
        _context: &'a AuthenticatedContext,
        request: &'a IssueRequest,
    ) -> BoxFuture<'a, anyhow::Result<AccessToken>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::Relaxed);
            if self.hang.load(Ordering::Relaxed) {
                std::future::pending::<()>().await;
            }
            if self.fail.load(Ordering::Relaxed) {
                anyhow::bail!("stub endpoint unavailable");
            }
            let name = if self.rename.load(Ordering::Relaxed) {
                format!("{}-other", request.name)
            } else {
                request.name.clone()
            };
            let lifetime = request.lifetime.unwrap_or(self.lifetime);
            sample_token(&name, lifetime)
        })
    }
}

#[macro_export]
macro_rules! assert_err_contains {
    ($expr:expr, $substr:expr) => {{
        let result = $expr;
        let err = result.expect_err(concat!("expected Err for: ", stringify!($expr)));
        let msg = err.to_string();
        assert!(msg.contains($substr), "expected error containing {:?}, got: {msg:?}", $substr);
    }};
}
