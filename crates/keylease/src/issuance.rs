// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Token issuance: exchanges an authenticated identity for an access token.

use std::sync::{Arc, Once};
use std::time::{Duration, SystemTime};

use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::error::CredentialError;
use crate::login::AuthenticatedContext;
use crate::token::{from_epoch_ms, AccessToken, SecretMaterial};

pub const DEFAULT_TOKEN_PREFIX: &str = "keylease-token-";

/// One issuance call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueRequest {
    pub name: String,
    /// Requested lifetime. `None` leaves it to the service.
    pub lifetime: Option<Duration>,
}

/// External token-issuance endpoint.
pub trait TokenEndpoint: Send + Sync {
    fn issue<'a>(
        &'a self,
        context: &'a AuthenticatedContext,
        request: &'a IssueRequest,
    ) -> BoxFuture<'a, anyhow::Result<AccessToken>>;
}

static CRYPTO: Once = Once::new();

/// Install the rustls crypto provider (needed for reqwest even on plain HTTP).
pub fn ensure_crypto_provider() {
    CRYPTO.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

#[derive(Serialize)]
struct CreateKeyRequest<'a> {
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    expiration: Option<String>,
}

#[derive(Deserialize)]
struct CreateKeyResponse {
    id: String,
    name: String,
    api_key: String,
    /// Epoch milliseconds.
    #[serde(default)]
    expiration: Option<u64>,
}

/// Issues API keys through `POST {base}/_security/api_key`.
///
/// The secret material of the resulting token is `id:api_key`, the form the
/// service expects inside an `ApiKey` authorization header.
#[derive(Debug)]
pub struct HttpTokenEndpoint {
    base_url: String,
    client: reqwest::Client,
}

impl HttpTokenEndpoint {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        ensure_crypto_provider();
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let base_url = base_url.into().trim_end_matches('/').to_owned();
        if base_url.is_empty() {
            anyhow::bail!("token endpoint URL is empty");
        }
        Ok(Self { base_url, client })
    }

    fn url(&self) -> String {
        format!("{}/_security/api_key", self.base_url)
    }

    async fn create_key(
        &self,
        context: &AuthenticatedContext,
        request: &IssueRequest,
    ) -> anyhow::Result<AccessToken> {
        let body = CreateKeyRequest {
            name: &request.name,
            expiration: request.lifetime.map(|d| format!("{}s", d.as_secs().max(1))),
        };
        let issued_at = SystemTime::now();
        let resp = self
            .client
            .post(self.url())
            .header(reqwest::header::AUTHORIZATION, context.basic_authorization()?)
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("token endpoint returned {status}: {text}");
        }

        let key: CreateKeyResponse = resp.json().await?;
        let api_key = Zeroizing::new(key.api_key);
        let expiration = key
            .expiration
            .ok_or_else(|| anyhow::anyhow!("token endpoint response has no expiration"))?;
        let expires_at = from_epoch_ms(expiration);
        // The expiration is on the service's clock; keep issuance before it.
        let issued_at = expires_at
            .checked_sub(Duration::from_millis(1))
            .map_or(issued_at, |latest| issued_at.min(latest));
        let secret = SecretMaterial::new(format!("{}:{}", key.id, api_key.as_str()));
        let token = AccessToken::new(key.name, secret, issued_at, expires_at)?;
        Ok(token)
    }
}

impl TokenEndpoint for HttpTokenEndpoint {
    fn issue<'a>(
        &'a self,
        context: &'a AuthenticatedContext,
        request: &'a IssueRequest,
    ) -> BoxFuture<'a, anyhow::Result<AccessToken>> {
        Box::pin(self.create_key(context, request))
    }
}

/// Runs the issuance call under an authenticated identity.
#[derive(Clone)]
pub struct TokenAcquirer {
    endpoint: Arc<dyn TokenEndpoint>,
    prefix: String,
    lifetime: Option<Duration>,
}

impl TokenAcquirer {
    pub fn new(endpoint: Arc<dyn TokenEndpoint>) -> Self {
        Self { endpoint, prefix: DEFAULT_TOKEN_PREFIX.to_owned(), lifetime: None }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_lifetime(mut self, lifetime: Option<Duration>) -> Self {
        self.lifetime = lifetime;
        self
    }

    /// Fresh name for every call, so repeated issuance never collides.
    pub fn next_name(&self) -> String {
        format!("{}{}", self.prefix, Uuid::new_v4())
    }

    pub async fn acquire(&self, context: &AuthenticatedContext) -> Result<AccessToken, CredentialError> {
        context.ensure_active()?;
        let request = IssueRequest { name: self.next_name(), lifetime: self.lifetime };
        debug!(principal = %context.principal(), token = %request.name, "requesting access token");

        let token = self
            .endpoint
            .issue(context, &request)
            .await
            .map_err(|e| CredentialError::Issuance(format!("{e:#}")))?;
        if token.name() != request.name {
            return Err(CredentialError::Issuance(format!(
                "requested token {} but the endpoint issued {}",
                request.name,
                token.name()
            )));
        }
        debug!(token = %token.name(), fingerprint = %token.fingerprint(), "access token received");
        Ok(token)
    }
}

#[cfg(test)]
#[path = "issuance_tests.rs"]
mod tests;
