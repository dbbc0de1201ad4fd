// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use super::*;
use crate::renewal::{RenewalReason, RenewalWindow};
use crate::test_support::{sample_token, StubAuthProvider, StubTokenEndpoint};
use crate::token::SecretMaterial;

const KEY: &str = DEFAULT_CREDENTIAL_KEY;
const HOUR: Duration = Duration::from_secs(3600);

struct Harness {
    manager: CredentialLifecycleManager,
    auth: Arc<StubAuthProvider>,
    endpoint: Arc<StubTokenEndpoint>,
}

fn settings(window_secs: i64) -> LeaseSettings {
    LeaseSettings {
        principal: Some("svc-ingest".into()),
        key_path: Some("/keys/svc-ingest".into()),
        renewal_window: RenewalWindow::from_secs(window_secs),
        ..LeaseSettings::default()
    }
}

fn harness(window_secs: i64, lifetime: Duration) -> anyhow::Result<Harness> {
    let auth = StubAuthProvider::new();
    let endpoint = StubTokenEndpoint::new(lifetime);
    let manager =
        CredentialLifecycleManager::new(settings(window_secs), auth.clone(), endpoint.clone())?;
    Ok(Harness { manager, auth, endpoint })
}

fn reserved() -> CredentialRecord {
    let mut record = CredentialRecord::new();
    reserve(&mut record, KEY);
    record
}

fn holding(token: &AccessToken) -> CredentialRecord {
    let mut record = CredentialRecord::new();
    record.put(KEY, codec::encode(token));
    record
}

fn expired_token() -> anyhow::Result<AccessToken> {
    let now = SystemTime::now();
    Ok(AccessToken::new(
        "keylease-token-stale",
        SecretMaterial::new(b"stale".to_vec()),
        now - 2 * HOUR,
        now - HOUR,
    )?)
}

fn stored_name(record: &CredentialRecord) -> anyhow::Result<String> {
    let token = codec::decode_record_value(record.get(KEY))?
        .ok_or_else(|| anyhow::anyhow!("record holds no token"))?;
    Ok(token.name().to_owned())
}

// -- Construction --

#[test]
fn missing_principal_is_rejected_before_any_call() {
    let endpoint = StubTokenEndpoint::new(HOUR);
    let mut settings = settings(60);
    settings.principal = None;
    let result = CredentialLifecycleManager::new(settings, StubAuthProvider::new(), endpoint.clone());
    assert!(matches!(result, Err(CredentialError::InvalidConfiguration(_))));
    assert_eq!(endpoint.call_count(), 0);
}

#[test]
fn starts_unissued() -> anyhow::Result<()> {
    let h = harness(60, HOUR)?;
    assert_eq!(h.manager.state(), CredentialState::Unissued);
    assert_eq!(h.manager.key(), KEY);
    Ok(())
}

// -- ensure_issued --

#[tokio::test]
async fn ensure_issued_replaces_sentinel() -> anyhow::Result<()> {
    let h = harness(60, HOUR)?;
    let mut record = reserved();

    let outcome = h.manager.ensure_issued(&mut record).await?;
    assert!(outcome.changed_record());
    assert!(outcome.token_name().starts_with("keylease-token-"));
    assert_eq!(stored_name(&record)?, outcome.token_name());
    assert_eq!(h.manager.state(), CredentialState::Issued);
    assert_eq!(h.auth.login_count(), 1);
    assert_eq!(h.auth.logout_count(), 1);
    assert_eq!(h.endpoint.call_count(), 1);
    Ok(())
}

#[tokio::test]
async fn ensure_issued_is_a_noop_once_issued() -> anyhow::Result<()> {
    let h = harness(60, HOUR)?;
    let mut record = reserved();
    let first = h.manager.ensure_issued(&mut record).await?;
    let snapshot = record.clone();

    let second = h.manager.ensure_issued(&mut record).await?;
    assert_eq!(second, IssueOutcome::AlreadyIssued { token_name: first.token_name().to_owned() });
    assert_eq!(record, snapshot);
    assert_eq!(h.endpoint.call_count(), 1);
    Ok(())
}

#[tokio::test]
async fn ensure_issued_fills_absent_entry() -> anyhow::Result<()> {
    let h = harness(60, HOUR)?;
    let mut record = CredentialRecord::new();
    assert!(h.manager.ensure_issued(&mut record).await?.changed_record());
    assert!(record.contains(KEY));
    Ok(())
}

#[tokio::test]
async fn ensure_issued_replaces_unreadable_entry() -> anyhow::Result<()> {
    let h = harness(60, HOUR)?;
    let mut record = CredentialRecord::new();
    record.put(KEY, "%%% not a token %%%");
    assert!(h.manager.ensure_issued(&mut record).await?.changed_record());
    stored_name(&record)?;
    Ok(())
}

#[tokio::test]
async fn failed_issuance_leaves_record_reserved() -> anyhow::Result<()> {
    let h = harness(60, HOUR)?;
    h.endpoint.set_fail(true);
    let mut record = reserved();
    let result = h.manager.ensure_issued(&mut record).await;
    assert!(matches!(result, Err(CredentialError::Issuance(_))));
    assert_eq!(record.get(KEY), Some(codec::PLACEHOLDER));
    assert_eq!(h.manager.state(), CredentialState::Unissued);
    assert_eq!(h.auth.logout_count(), 1);
    Ok(())
}

// -- maybe_renew --

#[tokio::test]
async fn nothing_to_renew_without_a_token() -> anyhow::Result<()> {
    let h = harness(60, HOUR)?;
    let mut garbage = CredentialRecord::new();
    garbage.put(KEY, "!!");
    for mut record in [CredentialRecord::new(), reserved(), garbage] {
        let before = record.clone();
        assert_eq!(h.manager.maybe_renew(&mut record).await?, RenewOutcome::NothingToRenew);
        assert_eq!(record, before);
    }
    assert_eq!(h.auth.login_count(), 0);
    Ok(())
}

#[tokio::test]
async fn fresh_token_is_not_due() -> anyhow::Result<()> {
    let h = harness(60, HOUR)?;
    let mut record = holding(&sample_token("keylease-token-fresh", HOUR)?);
    let outcome = h.manager.maybe_renew(&mut record).await?;
    let decision = match outcome {
        RenewOutcome::NotDue(decision) => decision,
        other => anyhow::bail!("expected NotDue, got {other:?}"),
    };
    assert_eq!(decision.reason, RenewalReason::NotExpiredNotDue);
    assert_eq!(h.endpoint.call_count(), 0);
    Ok(())
}

#[tokio::test]
async fn second_renewal_in_a_row_is_not_due() -> anyhow::Result<()> {
    let h = harness(60, HOUR)?;
    let mut record = holding(&sample_token("keylease-token-old", Duration::from_secs(30))?);

    let first = h.manager.maybe_renew(&mut record).await?;
    let (decision, token_name) = match first {
        RenewOutcome::Renewed { decision, token_name } => (decision, token_name),
        other => anyhow::bail!("expected a renewal, got {other:?}"),
    };
    assert_eq!(decision.reason, RenewalReason::WithinRenewalWindow);
    assert_eq!(stored_name(&record)?, token_name);

    let second = h.manager.maybe_renew(&mut record).await?;
    let decision = match second {
        RenewOutcome::NotDue(decision) => decision,
        other => anyhow::bail!("expected NotDue, got {other:?}"),
    };
    assert_eq!(decision.reason, RenewalReason::NotExpiredNotDue);
    assert_eq!(h.endpoint.call_count(), 1);
    assert_eq!(h.manager.state(), CredentialState::Issued);
    Ok(())
}

#[tokio::test]
async fn expired_token_renews_regardless_of_window() -> anyhow::Result<()> {
    let h = harness(0, HOUR)?;
    let mut record = holding(&expired_token()?);
    let outcome = h.manager.maybe_renew(&mut record).await?;
    let decision = match outcome {
        RenewOutcome::Renewed { decision, .. } => decision,
        other => anyhow::bail!("expected a renewal, got {other:?}"),
    };
    assert_eq!(decision.reason, RenewalReason::AlreadyExpired);
    assert_ne!(stored_name(&record)?, "keylease-token-stale");
    Ok(())
}

#[tokio::test]
async fn invalid_window_always_renews() -> anyhow::Result<()> {
    let h = harness(-1, HOUR)?;
    let mut record = holding(&sample_token("keylease-token-fresh", HOUR)?);
    let outcome = h.manager.maybe_renew(&mut record).await?;
    let decision = match outcome {
        RenewOutcome::Renewed { decision, .. } => decision,
        other => anyhow::bail!("expected a renewal, got {other:?}"),
    };
    assert_eq!(decision.reason, RenewalReason::WindowInvalid);
    Ok(())
}

#[tokio::test]
async fn failed_renewal_keeps_valid_token() -> anyhow::Result<()> {
    let h = harness(60, HOUR)?;
    let mut record = holding(&sample_token("keylease-token-old", Duration::from_secs(30))?);
    let before = record.clone();
    h.endpoint.set_fail(true);

    let result = h.manager.maybe_renew(&mut record).await;
    assert!(matches!(result, Err(CredentialError::Issuance(_))));
    assert_eq!(record, before);
    assert_eq!(h.manager.state(), CredentialState::Issued);
    assert_eq!(h.auth.logout_count(), h.auth.login_count());
    Ok(())
}

#[tokio::test]
async fn failed_renewal_of_expired_token_reports_expired() -> anyhow::Result<()> {
    let h = harness(60, HOUR)?;
    let mut record = holding(&expired_token()?);
    h.endpoint.set_fail(true);
    assert!(h.manager.maybe_renew(&mut record).await.is_err());
    assert_eq!(h.manager.state(), CredentialState::Expired);
    Ok(())
}

#[tokio::test]
async fn abandoned_renewal_restores_state_and_logs_out() -> anyhow::Result<()> {
    let h = harness(60, HOUR)?;
    let mut record = holding(&sample_token("keylease-token-old", Duration::from_secs(30))?);
    let before = record.clone();
    h.endpoint.set_hang(true);

    let outcome =
        tokio::time::timeout(Duration::from_millis(20), h.manager.maybe_renew(&mut record)).await;
    assert!(outcome.is_err());
    assert_eq!(record, before);
    assert_eq!(h.manager.state(), CredentialState::Issued);
    assert_eq!(h.auth.logout_count(), 1);
    Ok(())
}

// -- Status and reservation --

#[test]
fn reserve_does_not_clobber_issued_entry() -> anyhow::Result<()> {
    let mut record = CredentialRecord::new();
    assert!(reserve(&mut record, KEY));
    assert_eq!(record.get(KEY), Some(codec::PLACEHOLDER));

    let token = sample_token("keylease-token-a", HOUR)?;
    let mut issued = holding(&token);
    assert!(!reserve(&mut issued, KEY));
    assert_eq!(stored_name(&issued)?, "keylease-token-a");
    Ok(())
}

#[test]
fn status_reflects_record() -> anyhow::Result<()> {
    let unissued = status(&reserved(), KEY);
    assert_eq!(unissued.state, CredentialState::Unissued);
    assert_eq!(unissued.token_name, None);

    let issued = status(&holding(&sample_token("keylease-token-a", HOUR)?), KEY);
    assert_eq!(issued.state, CredentialState::Issued);
    assert_eq!(issued.token_name.as_deref(), Some("keylease-token-a"));
    assert!(issued.expires_in_secs.is_some_and(|s| s > 3500));

    let expired = status(&holding(&expired_token()?), KEY);
    assert_eq!(expired.state, CredentialState::Expired);
    assert_eq!(expired.expires_in_secs, None);

    let mut garbage = CredentialRecord::new();
    garbage.put(KEY, "!!");
    let broken = status(&garbage, KEY);
    assert_eq!(broken.state, CredentialState::Unissued);
    assert!(broken.error.is_some());
    Ok(())
}

#[test]
fn status_serializes_without_secrets() -> anyhow::Result<()> {
    let token = sample_token("keylease-token-a", HOUR)?;
    let json = serde_json::to_value(status(&holding(&token), KEY))?;
    assert_eq!(json["state"], "issued");
    assert_eq!(json["token_name"], "keylease-token-a");
    assert!(!json.to_string().contains("secret-for"));
    Ok(())
}

// -- Worker side --

#[tokio::test]
async fn worker_binds_issued_token() -> anyhow::Result<()> {
    let h = harness(60, HOUR)?;
    let mut record = reserved();
    let issued = h.manager.ensure_issued(&mut record).await?;

    let worker = WorkerCredentials::default();
    let identity = worker
        .attach(&record)
        .identity()
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("expected a bound identity"))?;
    assert_eq!(identity.token_name(), issued.token_name());
    assert!(identity.authorization_header().starts_with("ApiKey "));
    assert!(worker.current().is_some());
    Ok(())
}

#[test]
fn worker_ignores_sentinel_and_garbage() {
    let worker = WorkerCredentials::new(KEY);
    assert!(matches!(worker.attach(&reserved()), AttachOutcome::NoToken));
    assert!(matches!(worker.attach(&CredentialRecord::new()), AttachOutcome::NoToken));

    let mut garbage = CredentialRecord::new();
    garbage.put(KEY, "!!");
    assert!(matches!(worker.attach(&garbage), AttachOutcome::Unusable));
    assert!(worker.current().is_none());
}

#[test]
fn worker_update_replaces_and_detach_clears() -> anyhow::Result<()> {
    let worker = WorkerCredentials::new(KEY);
    worker.attach(&holding(&sample_token("keylease-token-a", HOUR)?));
    worker.update(&holding(&sample_token("keylease-token-b", HOUR)?));
    let current = worker.current().ok_or_else(|| anyhow::anyhow!("expected a bound identity"))?;
    assert_eq!(current.token_name(), "keylease-token-b");

    worker.update(&reserved());
    assert!(worker.current().is_some());

    worker.detach();
    assert!(worker.current().is_none());
    Ok(())
}

#[test]
fn unusable_update_drops_bound_token() -> anyhow::Result<()> {
    let worker = WorkerCredentials::new(KEY);
    worker.attach(&holding(&sample_token("keylease-token-old", HOUR)?));

    let mut garbage = CredentialRecord::new();
    garbage.put(KEY, "!!!garbage");
    assert!(matches!(worker.update(&garbage), AttachOutcome::Unusable));
    assert!(worker.current().is_none());
    Ok(())
}

#[test]
fn authorization_header_encodes_secret() -> anyhow::Result<()> {
    let now = SystemTime::now();
    let token = AccessToken::new("t", SecretMaterial::new(b"id:key".to_vec()), now, now + HOUR)?;
    let worker = WorkerCredentials::new(KEY);
    let outcome = worker.attach(&holding(&token));
    let identity = outcome.identity().ok_or_else(|| anyhow::anyhow!("expected a bound identity"))?;
    assert_eq!(identity.authorization_header(), "ApiKey aWQ6a2V5");
    Ok(())
}
