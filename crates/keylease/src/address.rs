// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Resource addressing: turns a user-supplied target into a normalized
//! collection address and its derived endpoints.
//!
//! The remote service is collection-only. A `collection/sub-resource` target
//! is rejected outright. When the target carries an embedded `?query`, the
//! query moves into [`AddressSettings`] and any trailing path segment before
//! it is dropped.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CredentialError;

const BULK_SUFFIX: &str = "/_bulk";
const REFRESH_SUFFIX: &str = "/_refresh";

/// How documents are written through the bulk endpoint.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteOperation {
    #[default]
    Index,
    Create,
    Update,
    Upsert,
}

impl WriteOperation {
    /// Whether this operation only ever creates new documents.
    pub fn creates_documents(&self) -> bool {
        matches!(self, Self::Index | Self::Create)
    }
}

impl fmt::Display for WriteOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Index => f.write_str("index"),
            Self::Create => f.write_str("create"),
            Self::Update => f.write_str("update"),
            Self::Upsert => f.write_str("upsert"),
        }
    }
}

impl std::str::FromStr for WriteOperation {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "index" => Ok(Self::Index),
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "upsert" => Ok(Self::Upsert),
            other => anyhow::bail!("invalid write operation: {other}"),
        }
    }
}

/// Ambient settings consulted while parsing a target.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressSettings {
    /// Query supplied separately from the target.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingest_pipeline: Option<String>,
    #[serde(default)]
    pub write_operation: WriteOperation,
}

impl AddressSettings {
    fn has_query(&self) -> bool {
        self.query.as_deref().is_some_and(|q| !q.trim().is_empty())
    }
}

/// Normalized, immutable resource address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceAddress {
    collection: String,
    has_dynamic_pattern: bool,
    bulk_endpoint: String,
    refresh_endpoint: String,
    mapping_endpoint: String,
    aliases_endpoint: String,
}

/// Result of parsing: the address, plus settings carrying any extracted query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedTarget {
    pub address: ResourceAddress,
    pub settings: AddressSettings,
}

impl ResourceAddress {
    pub fn parse(target: &str, settings: &AddressSettings) -> Result<ParsedTarget, CredentialError> {
        if target.trim().is_empty() {
            return Err(CredentialError::AddressFormat(
                "expected a collection name, received an empty target".into(),
            ));
        }

        let mut settings = settings.clone();
        let mut resource = target;

        if target.contains('?') || target.contains('&') {
            if settings.has_query() {
                return Err(CredentialError::AddressFormat(format!(
                    "cannot specify a query in the target [{target}] and through the query setting"
                )));
            }
            if let Some(q) = target.find('?') {
                let (head, query) = target.split_at(q);
                resource = match head.rfind('/') {
                    Some(slash) if slash > 0 => &head[..slash],
                    _ => head,
                };
                settings.query = Some(query.to_owned());
            }
        }

        let collection = sanitize(resource);
        if collection.is_empty() {
            return Err(CredentialError::AddressFormat(format!(
                "no collection found in target [{target}]"
            )));
        }
        if collection.contains('/') {
            return Err(CredentialError::AddressFormat(format!(
                "detected a sub-resource in target [{target}]; remove it to continue"
            )));
        }
        if collection.chars().any(char::is_whitespace) {
            return Err(CredentialError::AddressFormat(format!(
                "collection [{collection}] must not contain whitespace"
            )));
        }

        let bulk_suffix = bulk_suffix(&settings)?;
        let has_dynamic_pattern = collection.contains('{');
        let (bulk_endpoint, refresh_endpoint) = if has_dynamic_pattern {
            // Resolved per document at write time.
            (bulk_suffix, REFRESH_SUFFIX.to_owned())
        } else {
            (format!("{collection}{bulk_suffix}"), format!("{collection}{REFRESH_SUFFIX}"))
        };
        let mapping_endpoint = format!("{collection}/_mapping");
        let aliases_endpoint = format!("{collection}/_aliases");

        Ok(ParsedTarget {
            address: Self {
                collection: collection.to_owned(),
                has_dynamic_pattern,
                bulk_endpoint,
                refresh_endpoint,
                mapping_endpoint,
                aliases_endpoint,
            },
            settings,
        })
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn has_dynamic_pattern(&self) -> bool {
        self.has_dynamic_pattern
    }

    pub fn bulk_endpoint(&self) -> &str {
        &self.bulk_endpoint
    }

    pub fn refresh_endpoint(&self) -> &str {
        &self.refresh_endpoint
    }

    pub fn mapping_endpoint(&self) -> &str {
        &self.mapping_endpoint
    }

    pub fn aliases_endpoint(&self) -> &str {
        &self.aliases_endpoint
    }
}

impl fmt::Display for ResourceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.collection)
    }
}

/// `/_bulk`, with a `?pipeline=` suffix when an ingest pipeline is configured.
fn bulk_suffix(settings: &AddressSettings) -> Result<String, CredentialError> {
    let Some(pipeline) = settings.ingest_pipeline.as_deref().filter(|p| !p.trim().is_empty())
    else {
        return Ok(BULK_SUFFIX.to_owned());
    };
    if pipeline.chars().any(char::is_whitespace) {
        return Err(CredentialError::InvalidConfiguration(format!(
            "ingest pipeline name [{pipeline}] must not contain whitespace"
        )));
    }
    if !settings.write_operation.creates_documents() {
        return Err(CredentialError::InvalidConfiguration(format!(
            "cannot use an ingest pipeline with the {} write operation",
            settings.write_operation
        )));
    }
    Ok(format!("{BULK_SUFFIX}?pipeline={pipeline}"))
}

/// Trim whitespace and one leading and trailing `/`.
fn sanitize(resource: &str) -> &str {
    let res = resource.trim();
    let res = res.strip_prefix('/').unwrap_or(res);
    res.strip_suffix('/').unwrap_or(res)
}

#[cfg(test)]
#[path = "address_tests.rs"]
mod tests;
