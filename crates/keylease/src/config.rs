// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::address::{AddressSettings, WriteOperation};
use crate::error::CredentialError;
use crate::issuance::DEFAULT_TOKEN_PREFIX;
use crate::lifecycle::DEFAULT_CREDENTIAL_KEY;
use crate::login::LoginCredentials;
use crate::renewal::RenewalWindow;

/// Immutable settings for one credential key, built once and passed to the
/// lifecycle manager at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseSettings {
    pub principal: Option<String>,
    pub key_path: Option<PathBuf>,
    pub renewal_window: RenewalWindow,
    pub credential_key: String,
    pub token_prefix: String,
    /// Requested token lifetime. `None` leaves it to the service.
    pub token_lifetime: Option<Duration>,
}

impl Default for LeaseSettings {
    fn default() -> Self {
        Self {
            principal: None,
            key_path: None,
            renewal_window: RenewalWindow::Invalid,
            credential_key: DEFAULT_CREDENTIAL_KEY.to_owned(),
            token_prefix: DEFAULT_TOKEN_PREFIX.to_owned(),
            token_lifetime: None,
        }
    }
}

impl LeaseSettings {
    pub fn validate(&self) -> Result<(), CredentialError> {
        self.login_credentials().map(|_| ())
    }

    /// Principal and key path, or `InvalidConfiguration` when either is missing.
    pub fn login_credentials(&self) -> Result<LoginCredentials, CredentialError> {
        let principal = self
            .principal
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .ok_or_else(|| {
                CredentialError::InvalidConfiguration("a principal is required for issuance".into())
            })?;
        let key_path = self.key_path.as_ref().filter(|p| !p.as_os_str().is_empty()).ok_or_else(
            || CredentialError::InvalidConfiguration("a key path is required for issuance".into()),
        )?;
        if self.credential_key.trim().is_empty() {
            return Err(CredentialError::InvalidConfiguration(
                "credential key must not be empty".into(),
            ));
        }
        Ok(LoginCredentials::new(principal, key_path.clone()))
    }
}

/// Short-lived access tokens for distributed jobs.
#[derive(Debug, Parser)]
#[command(name = "keylease", version, about)]
pub struct Cli {
    /// Log format (json or text).
    #[arg(long, env = "KEYLEASE_LOG_FORMAT", default_value = "json", global = true)]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "KEYLEASE_LOG_LEVEL", default_value = "info", global = true)]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Reserve the credential entry before the job starts
    Reserve {
        #[command(flatten)]
        record: RecordArgs,
    },
    /// Issue a token if the entry does not hold one yet
    Issue {
        #[command(flatten)]
        record: RecordArgs,
        #[command(flatten)]
        lease: LeaseArgs,
    },
    /// Renew the token if it is due
    Renew {
        #[command(flatten)]
        record: RecordArgs,
        #[command(flatten)]
        lease: LeaseArgs,
    },
    /// Keep the token fresh until interrupted
    Run {
        #[command(flatten)]
        record: RecordArgs,
        #[command(flatten)]
        lease: LeaseArgs,
        #[command(flatten)]
        schedule: ScheduleArgs,
    },
    /// Decode the entry as a worker would and print the bound identity
    Attach {
        #[command(flatten)]
        record: RecordArgs,
    },
    /// Show the state of the credential entry
    Status {
        #[command(flatten)]
        record: RecordArgs,
    },
    /// Parse a resource target and print its endpoints
    Address {
        #[command(flatten)]
        address: AddressArgs,
    },
}

#[derive(Debug, Clone, Args)]
pub struct RecordArgs {
    /// Path of the credential record file.
    #[arg(long, env = "KEYLEASE_RECORD")]
    pub record: PathBuf,

    /// Key of the credential entry within the record.
    #[arg(long, env = "KEYLEASE_CREDENTIAL_KEY", default_value = DEFAULT_CREDENTIAL_KEY)]
    pub credential_key: String,
}

#[derive(Debug, Clone, Args)]
pub struct LeaseArgs {
    /// Principal to authenticate as.
    #[arg(long, env = "KEYLEASE_PRINCIPAL")]
    pub principal: Option<String>,

    /// Path of the principal's private key material.
    #[arg(long, env = "KEYLEASE_KEY_PATH")]
    pub key_path: Option<PathBuf>,

    /// Renew this many seconds before expiry. Negative or absent always renews.
    #[arg(long, env = "KEYLEASE_RENEWAL_WINDOW_SECS", allow_negative_numbers = true)]
    pub renewal_window_secs: Option<i64>,

    /// Base URL of the token-issuance service.
    #[arg(long, env = "KEYLEASE_ENDPOINT")]
    pub endpoint: Option<String>,

    /// Requested token lifetime in seconds.
    #[arg(long, env = "KEYLEASE_TOKEN_LIFETIME_SECS")]
    pub token_lifetime_secs: Option<u64>,

    /// Prefix for issued token names.
    #[arg(long, env = "KEYLEASE_TOKEN_PREFIX", default_value = DEFAULT_TOKEN_PREFIX)]
    pub token_prefix: String,

    /// HTTP timeout for the issuance call, in seconds.
    #[arg(long, env = "KEYLEASE_REQUEST_TIMEOUT_SECS", default_value = "30")]
    pub request_timeout_secs: u64,
}

impl LeaseArgs {
    pub fn to_lease_settings(&self, record: &RecordArgs) -> LeaseSettings {
        LeaseSettings {
            principal: self.principal.clone(),
            key_path: self.key_path.clone(),
            renewal_window: RenewalWindow::from_setting(self.renewal_window_secs),
            credential_key: record.credential_key.clone(),
            token_prefix: self.token_prefix.clone(),
            token_lifetime: self.token_lifetime_secs.map(Duration::from_secs),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    fn validate(&self, record: &RecordArgs) -> anyhow::Result<()> {
        self.to_lease_settings(record).validate()?;
        if self.endpoint.as_deref().map_or(true, |e| e.trim().is_empty()) {
            return Err(CredentialError::InvalidConfiguration(
                "--endpoint is required for issuance".into(),
            )
            .into());
        }
        if self.request_timeout_secs == 0 {
            anyhow::bail!("--request-timeout-secs must be positive");
        }
        if self.token_lifetime_secs == Some(0) {
            anyhow::bail!("--token-lifetime-secs must be positive");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Args)]
pub struct ScheduleArgs {
    /// Seconds between renewal checks.
    #[arg(long, env = "KEYLEASE_PERIOD_SECS", default_value = "60")]
    pub period_secs: u64,

    /// Upper bound on one renewal check, in seconds.
    #[arg(long, env = "KEYLEASE_TICK_TIMEOUT_SECS", default_value = "30")]
    pub tick_timeout_secs: u64,
}

impl ScheduleArgs {
    pub fn period(&self) -> Duration {
        Duration::from_secs(self.period_secs)
    }

    pub fn tick_timeout(&self) -> Duration {
        Duration::from_secs(self.tick_timeout_secs)
    }
}

#[derive(Debug, Clone, Args)]
pub struct AddressArgs {
    /// Resource target, e.g. `logs` or `logs?q=level:error`.
    #[arg(long, env = "KEYLEASE_TARGET")]
    pub target: String,

    /// Query supplied separately from the target.
    #[arg(long, env = "KEYLEASE_QUERY")]
    pub query: Option<String>,

    /// Ingest pipeline applied by the bulk endpoint.
    #[arg(long, env = "KEYLEASE_INGEST_PIPELINE")]
    pub ingest_pipeline: Option<String>,

    /// Write operation (index, create, update, upsert).
    #[arg(long, env = "KEYLEASE_WRITE_OPERATION", default_value = "index")]
    pub write_operation: String,
}

impl AddressArgs {
    pub fn to_address_settings(&self) -> anyhow::Result<AddressSettings> {
        let write_operation: WriteOperation = self.write_operation.parse()?;
        Ok(AddressSettings {
            query: self.query.clone(),
            ingest_pipeline: self.ingest_pipeline.clone(),
            write_operation,
        })
    }
}

impl Cli {
    /// Validate the configuration after parsing.
    pub fn validate(&self) -> anyhow::Result<()> {
        match self.log_format.as_str() {
            "json" | "text" => {}
            other => anyhow::bail!("invalid log format: {other}"),
        }
        match &self.command {
            Command::Reserve { record }
            | Command::Attach { record }
            | Command::Status { record } => validate_record(record),
            Command::Issue { record, lease } | Command::Renew { record, lease } => {
                validate_record(record)?;
                lease.validate(record)
            }
            Command::Run { record, lease, schedule } => {
                validate_record(record)?;
                lease.validate(record)?;
                if schedule.period_secs == 0 {
                    anyhow::bail!("--period-secs must be positive");
                }
                if schedule.tick_timeout_secs == 0 {
                    anyhow::bail!("--tick-timeout-secs must be positive");
                }
                Ok(())
            }
            Command::Address { address } => {
                address.to_address_settings()?;
                Ok(())
            }
        }
    }
}

fn validate_record(record: &RecordArgs) -> anyhow::Result<()> {
    if record.record.as_os_str().is_empty() {
        anyhow::bail!("--record must not be empty");
    }
    if record.credential_key.trim().is_empty() {
        anyhow::bail!("--credential-key must not be empty");
    }
    Ok(())
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
