// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scoped strong-authentication sessions.
//!
//! A [`SecureLoginSession`] owns the login context for the duration of one
//! privileged action. Logout runs from `Drop`, so it happens on every exit
//! path: success, failure, and the enclosing future being dropped by a
//! timeout. Logout failures are logged and never propagated.

use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use futures_util::future::BoxFuture;
use tracing::{debug, warn};
use zeroize::Zeroizing;

use crate::error::CredentialError;
use crate::token::SecretMaterial;

/// Principal plus the location of its private key material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginCredentials {
    pub principal: String,
    pub key_path: PathBuf,
}

impl LoginCredentials {
    pub fn new(principal: impl Into<String>, key_path: impl Into<PathBuf>) -> Self {
        Self { principal: principal.into(), key_path: key_path.into() }
    }
}

/// External authentication provider.
pub trait AuthProvider: Send + Sync {
    /// Perform the handshake. Failures must be [`CredentialError::Authentication`].
    fn login<'a>(
        &'a self,
        credentials: &'a LoginCredentials,
    ) -> BoxFuture<'a, Result<AuthenticatedContext, CredentialError>>;

    /// Release login materials held by the provider for `context`.
    fn logout(&self, context: &AuthenticatedContext) -> Result<(), CredentialError>;
}

/// Handle to an authenticated identity.
///
/// Clones share state. Once the owning session logs out every clone reports
/// itself released and refuses to authorize further calls.
#[derive(Clone)]
pub struct AuthenticatedContext {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    principal: String,
    material: SecretMaterial,
    released: AtomicBool,
}

impl AuthenticatedContext {
    pub fn new(principal: impl Into<String>, material: SecretMaterial) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                principal: principal.into(),
                material,
                released: AtomicBool::new(false),
            }),
        }
    }

    pub fn principal(&self) -> &str {
        &self.inner.principal
    }

    pub fn is_released(&self) -> bool {
        self.inner.released.load(Ordering::Acquire)
    }

    pub fn ensure_active(&self) -> Result<(), CredentialError> {
        if self.is_released() {
            return Err(CredentialError::Authentication(format!(
                "login context for {} has already been released",
                self.inner.principal
            )));
        }
        Ok(())
    }

    pub fn material(&self) -> Result<&SecretMaterial, CredentialError> {
        self.ensure_active()?;
        Ok(&self.inner.material)
    }

    /// `Basic base64(principal:material)` header value.
    pub fn basic_authorization(&self) -> Result<String, CredentialError> {
        let material = self.material()?;
        let mut pair = Zeroizing::new(Vec::with_capacity(
            self.inner.principal.len() + 1 + material.len(),
        ));
        pair.extend_from_slice(self.inner.principal.as_bytes());
        pair.push(b':');
        pair.extend_from_slice(material.expose());
        Ok(format!("Basic {}", STANDARD.encode(&*pair)))
    }

    fn release(&self) {
        self.inner.released.store(true, Ordering::Release);
    }
}

impl fmt::Debug for AuthenticatedContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthenticatedContext")
            .field("principal", &self.inner.principal)
            .field("released", &self.is_released())
            .finish_non_exhaustive()
    }
}

/// A logged-in session. Dropping it logs out.
pub struct SecureLoginSession {
    provider: Arc<dyn AuthProvider>,
    context: AuthenticatedContext,
}

impl SecureLoginSession {
    pub async fn open(
        provider: Arc<dyn AuthProvider>,
        credentials: &LoginCredentials,
    ) -> Result<Self, CredentialError> {
        debug!(
            principal = %credentials.principal,
            key_path = %credentials.key_path.display(),
            "performing login"
        );
        let context = provider.login(credentials).await?;
        Ok(Self { provider, context })
    }

    /// Run `action` as the authenticated identity, then log out.
    pub async fn run<T, F, Fut>(self, action: F) -> Result<T, CredentialError>
    where
        F: FnOnce(AuthenticatedContext) -> Fut,
        Fut: Future<Output = Result<T, CredentialError>>,
    {
        let result = action(self.context.clone()).await;
        drop(self);
        result
    }
}

impl Drop for SecureLoginSession {
    fn drop(&mut self) {
        match self.provider.logout(&self.context) {
            Ok(()) => debug!(principal = %self.context.principal(), "logged out"),
            Err(e) => {
                warn!(principal = %self.context.principal(), err = %e, "could not complete logout")
            }
        }
        self.context.release();
    }
}

/// Log in, run `action` under the authenticated identity, and always log out.
pub async fn with_authenticated_context<T, F, Fut>(
    provider: Arc<dyn AuthProvider>,
    credentials: &LoginCredentials,
    action: F,
) -> Result<T, CredentialError>
where
    F: FnOnce(AuthenticatedContext) -> Fut,
    Fut: Future<Output = Result<T, CredentialError>>,
{
    SecureLoginSession::open(provider, credentials).await?.run(action).await
}

/// Authenticates by reading the principal's private key material from disk.
#[derive(Debug, Default, Clone, Copy)]
pub struct KeyFileAuthProvider;

impl KeyFileAuthProvider {
    async fn read_material(path: &Path) -> Result<SecretMaterial, CredentialError> {
        let raw = Zeroizing::new(tokio::fs::read(path).await.map_err(|e| {
            CredentialError::Authentication(format!(
                "cannot read key material {}: {e}",
                path.display()
            ))
        })?);
        let end = raw.iter().rposition(|b| !b.is_ascii_whitespace()).map_or(0, |i| i + 1);
        if end == 0 {
            return Err(CredentialError::Authentication(format!(
                "key material {} is empty",
                path.display()
            )));
        }
        Ok(SecretMaterial::new(&raw[..end]))
    }
}

impl AuthProvider for KeyFileAuthProvider {
    fn login<'a>(
        &'a self,
        credentials: &'a LoginCredentials,
    ) -> BoxFuture<'a, Result<AuthenticatedContext, CredentialError>> {
        Box::pin(async move {
            if credentials.principal.trim().is_empty() {
                return Err(CredentialError::Authentication("principal is empty".into()));
            }
            let material = Self::read_material(&credentials.key_path).await?;
            Ok(AuthenticatedContext::new(credentials.principal.clone(), material))
        })
    }

    fn logout(&self, _context: &AuthenticatedContext) -> Result<(), CredentialError> {
        // Material is zeroed when the last context handle drops.
        Ok(())
    }
}

#[cfg(test)]
#[path = "login_tests.rs"]
mod tests;
