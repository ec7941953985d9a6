//! Purpose: Top-level command dispatch for `dune-sync`.
//! Exports: `dispatch_command`.
//! Role: Keep `main.rs` focused on parse/bootstrap and hand each command to the library.
//! Invariants: Every successful command emits exactly one JSON value on stdout.

use super::*;
use clap::CommandFactory;
use dune_sync::api::{GatewayClient, queries};
use dune_sync::core::cid::Cid;
use dune_sync::core::content::referrer_of;
use dune_sync::core::reconcile::resolve_content;
use dune_sync::core::store::FileStore;
use dune_sync::sync::{
    AppDataSyncConfig, DuneFetcher, SnapshotFormat, store_query_result, sync_app_data,
};

pub(super) fn dispatch_command(command: Command) -> Result<RunOutcome, Error> {
    match command {
        Command::Completion { shell } => {
            let mut cmd = Cli::command();
            clap_complete::aot::generate(shell, &mut cmd, "dune-sync", &mut io::stdout());
            Ok(RunOutcome::ok())
        }
        Command::Version => {
            emit_json(json!({
                "name": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION"),
            }));
            Ok(RunOutcome::ok())
        }
        Command::AppData(args) => {
            let config =
                AppDataSyncConfig::new(args.volume_path).with_retry(args.retry.policy()?);
            let gateway = GatewayClient::new(args.gateway, &config.retry)?;
            let fetcher = DuneFetcher::new(args.dune.client()?);
            let report = sync_app_data(&config, &fetcher, gateway)?;
            emit_json(to_json(&report)?);
            Ok(RunOutcome::ok())
        }
        Command::Query(args) => {
            let params = args
                .params
                .iter()
                .map(|raw| queries::parse_param(raw))
                .collect::<Result<Vec<_>, _>>()?;
            let query = dune_sync::api::Query::new(args.query_id, format!("query {}", args.query_id))
                .with_params(params);
            let format = if args.ndjson {
                SnapshotFormat::Ndjson
            } else {
                SnapshotFormat::Json
            };
            let client = args.dune.client()?;
            let store = FileStore::new(args.volume_path);
            let report = store_query_result(&client, &query, &store, &args.out, format)?;
            emit_json(to_json(&report)?);
            Ok(RunOutcome::ok())
        }
        Command::Cid { hash, gateway } => {
            let cid = Cid::from_hex(&hash)?;
            emit_json(json!({
                "app_hash": cid.hex(),
                "cid": cid.to_string(),
                "url": cid.url(&gateway),
            }));
            Ok(RunOutcome::ok())
        }
        Command::Content {
            hash,
            gateway,
            retry,
        } => {
            let policy = retry.policy()?;
            let client = GatewayClient::new(gateway, &policy)?;
            let cid = Cid::from_hex(&hash)?;
            let content = resolve_content(&client, &cid, &policy).ok_or_else(|| {
                Error::new(ErrorKind::NotFound)
                    .with_message(format!(
                        "no content for {cid} after {} attempts",
                        policy.max_attempts
                    ))
                    .with_hint("The gateway may not have the file yet; try again later.")
            })?;
            emit_json(json!({
                "app_hash": cid.hex(),
                "cid": cid.to_string(),
                "url": cid.url(client.gateway()),
                "referrer": referrer_of(&content).map(|address| address.to_string()),
                "content": content,
            }));
            Ok(RunOutcome::ok())
        }
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<Value, Error> {
    serde_json::to_value(value).map_err(|err| {
        Error::new(ErrorKind::Internal)
            .with_message("failed to encode command output")
            .with_source(err)
    })
}
