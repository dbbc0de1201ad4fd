// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Coordinator control loop: keeps the distributed credential fresh.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::CredentialError;
use crate::lifecycle::CredentialIssuer;
use crate::record::RecordStore;

pub const DEFAULT_PERIOD: Duration = Duration::from_secs(60);
pub const DEFAULT_TICK_TIMEOUT: Duration = Duration::from_secs(30);

/// What a completed tick did to the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Unchanged,
    Published,
}

pub struct Renewer {
    issuer: Arc<dyn CredentialIssuer>,
    store: Arc<dyn RecordStore>,
    period: Duration,
    tick_timeout: Duration,
}

impl Renewer {
    pub fn new(issuer: Arc<dyn CredentialIssuer>, store: Arc<dyn RecordStore>) -> Self {
        Self { issuer, store, period: DEFAULT_PERIOD, tick_timeout: DEFAULT_TICK_TIMEOUT }
    }

    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    pub fn with_tick_timeout(mut self, tick_timeout: Duration) -> Self {
        self.tick_timeout = tick_timeout;
        self
    }

    /// Issue if needed, otherwise renew if due, then publish any change.
    ///
    /// A hung issuance counts as a failed tick. Whatever changed before the
    /// failure is still published.
    pub async fn tick(&self) -> anyhow::Result<TickOutcome> {
        let mut record = self.store.load()?;
        let before = record.clone();

        let issuer = &self.issuer;
        let work = async {
            let issued = issuer.ensure_issued(&mut record).await?;
            if !issued.changed_record() {
                issuer.maybe_renew(&mut record).await?;
            }
            Ok::<_, CredentialError>(())
        };
        let result = match tokio::time::timeout(self.tick_timeout, work).await {
            Ok(r) => r.map_err(anyhow::Error::from),
            Err(_) => Err(anyhow::anyhow!(
                "credential tick timed out after {}s",
                self.tick_timeout.as_secs_f64()
            )),
        };

        let outcome = if record != before {
            self.store.save(&record)?;
            info!("credential record published");
            TickOutcome::Published
        } else {
            TickOutcome::Unchanged
        };
        result.map(|()| outcome)
    }

    /// Tick every period until `shutdown` fires. An in-flight tick is
    /// abandoned on shutdown; its login session still logs out.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }
            tokio::select! {
                _ = shutdown.cancelled() => break,
                result = self.tick() => match result {
                    Ok(outcome) => debug!(?outcome, "credential tick complete"),
                    Err(e) => log_tick_failure(&e),
                },
            }
        }
        debug!("credential renewer stopped");
    }
}

fn log_tick_failure(e: &anyhow::Error) {
    match e.downcast_ref::<CredentialError>() {
        Some(cred) if cred.is_retryable() => {
            warn!(code = cred.as_str(), err = %cred, "credential tick failed, retrying next period")
        }
        Some(cred) => error!(code = cred.as_str(), err = %cred, "credential tick failed"),
        None => warn!(err = %format!("{e:#}"), "credential tick failed, retrying next period"),
    }
}

#[cfg(test)]
#[path = "renewer_tests.rs"]
mod tests;
