// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use clap::Parser;
use serde::Serialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use keylease::address::ResourceAddress;
use keylease::config::{AddressArgs, Cli, Command, LeaseArgs, RecordArgs, ScheduleArgs};
use keylease::error::CredentialError;
use keylease::issuance::HttpTokenEndpoint;
use keylease::lifecycle::{
    self, AttachOutcome, CredentialConsumer, CredentialIssuer, CredentialLifecycleManager,
    RenewOutcome, WorkerCredentials,
};
use keylease::login::KeyFileAuthProvider;
use keylease::record::{FileRecordStore, RecordStore};
use keylease::renewer::Renewer;
use keylease::token::epoch_ms;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = cli.validate() {
        eprintln!("error: {e}");
        std::process::exit(2);
    }

    init_tracing(&cli);

    if let Err(e) = run(cli).await {
        error!("fatal: {e:#}");
        std::process::exit(exit_code(&e));
    }
}

fn init_tracing(cli: &Cli) {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    // Command output owns stdout.
    match cli.log_format.as_str() {
        "json" => {
            fmt::fmt().with_env_filter(filter).with_writer(std::io::stderr).json().init();
        }
        _ => {
            fmt::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
        }
    }
}

/// 2 for configuration and addressing errors, 1 for everything else.
fn exit_code(e: &anyhow::Error) -> i32 {
    match e.downcast_ref::<CredentialError>() {
        Some(CredentialError::AddressFormat(_) | CredentialError::InvalidConfiguration(_)) => 2,
        _ => 1,
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Reserve { record } => reserve(&record),
        Command::Issue { record, lease } => issue(&record, &lease).await,
        Command::Renew { record, lease } => renew(&record, &lease).await,
        Command::Run { record, lease, schedule } => run_renewer(&record, &lease, &schedule).await,
        Command::Attach { record } => attach(&record),
        Command::Status { record } => status(&record),
        Command::Address { address } => address_endpoints(&address),
    }
}

fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn build_manager(
    record: &RecordArgs,
    lease: &LeaseArgs,
) -> anyhow::Result<CredentialLifecycleManager> {
    let url = lease
        .endpoint
        .clone()
        .ok_or_else(|| CredentialError::InvalidConfiguration("--endpoint is required".into()))?;
    let endpoint = HttpTokenEndpoint::new(url, lease.request_timeout())?;
    let manager = CredentialLifecycleManager::new(
        lease.to_lease_settings(record),
        Arc::new(KeyFileAuthProvider),
        Arc::new(endpoint),
    )?;
    Ok(manager)
}

fn reserve(args: &RecordArgs) -> anyhow::Result<()> {
    let store = FileRecordStore::new(&args.record);
    let mut record = store.load()?;
    let reserved = lifecycle::reserve(&mut record, &args.credential_key);
    if reserved {
        store.save(&record)?;
        info!(key = %args.credential_key, record = %args.record.display(), "credential entry reserved");
    }
    print_json(&json!({ "key": args.credential_key, "reserved": reserved }))
}

async fn issue(args: &RecordArgs, lease: &LeaseArgs) -> anyhow::Result<()> {
    let manager = build_manager(args, lease)?;
    let store = FileRecordStore::new(&args.record);
    let mut record = store.load()?;
    let outcome = manager.ensure_issued(&mut record).await?;
    if outcome.changed_record() {
        store.save(&record)?;
    }
    print_json(&manager.status(&record))
}

async fn renew(args: &RecordArgs, lease: &LeaseArgs) -> anyhow::Result<()> {
    let manager = build_manager(args, lease)?;
    let store = FileRecordStore::new(&args.record);
    let mut record = store.load()?;
    let outcome = manager.maybe_renew(&mut record).await?;
    if outcome.changed_record() {
        store.save(&record)?;
    }
    let summary = match &outcome {
        RenewOutcome::NothingToRenew => json!({ "outcome": "nothing_to_renew" }),
        RenewOutcome::NotDue(decision) => json!({ "outcome": "not_due", "decision": decision }),
        RenewOutcome::Renewed { decision, token_name } => {
            json!({ "outcome": "renewed", "decision": decision, "token_name": token_name })
        }
    };
    print_json(&json!({ "renewal": summary, "status": manager.status(&record) }))
}

async fn run_renewer(
    args: &RecordArgs,
    lease: &LeaseArgs,
    schedule: &ScheduleArgs,
) -> anyhow::Result<()> {
    let manager = build_manager(args, lease)?;
    let renewer = Renewer::new(Arc::new(manager), Arc::new(FileRecordStore::new(&args.record)))
        .with_period(schedule.period())
        .with_tick_timeout(schedule.tick_timeout());

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received, stopping");
            }
            shutdown.cancel();
        });
    }

    info!(
        key = %args.credential_key,
        record = %args.record.display(),
        period_secs = schedule.period_secs,
        "credential renewer started"
    );
    renewer.run(shutdown).await;
    Ok(())
}

fn attach(args: &RecordArgs) -> anyhow::Result<()> {
    let record = FileRecordStore::new(&args.record).load()?;
    let worker = WorkerCredentials::new(args.credential_key.as_str());
    let summary = match worker.attach(&record) {
        AttachOutcome::Bound(identity) => json!({
            "bound": true,
            "token_name": identity.token_name(),
            "fingerprint": identity.fingerprint(),
            "expires_at_ms": epoch_ms(identity.expires_at()),
        }),
        AttachOutcome::NoToken => json!({ "bound": false, "reason": "no_token" }),
        AttachOutcome::Unusable => json!({ "bound": false, "reason": "unusable" }),
    };
    print_json(&summary)
}

fn status(args: &RecordArgs) -> anyhow::Result<()> {
    let record = FileRecordStore::new(&args.record).load()?;
    print_json(&lifecycle::status(&record, &args.credential_key))
}

fn address_endpoints(args: &AddressArgs) -> anyhow::Result<()> {
    let settings = args.to_address_settings()?;
    let parsed = ResourceAddress::parse(&args.target, &settings)?;
    print_json(&json!({ "address": parsed.address, "query": parsed.settings.query }))
}
