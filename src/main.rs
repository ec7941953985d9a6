//! Purpose: `dune-sync` CLI entry point.
//! Role: Binary crate root; parses args, initialises tracing, runs one command, exits.
//! Invariants: Command results are JSON on stdout (pretty on a TTY, compact otherwise).
//! Invariants: Logs go to stderr; errors are JSON on stderr unless stderr is a TTY.
//! Invariants: Process exit code is derived from `to_exit_code`.
#![allow(clippy::result_large_err)]
use std::io::{self, IsTerminal};
use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, error::ErrorKind as ClapErrorKind};
use clap_complete::aot::Shell;
use dune_sync::api::{AnalyticsClient, DEFAULT_BASE_URL, PollOptions};
use dune_sync::core::cid::DEFAULT_GATEWAY;
use dune_sync::core::error::{Error, ErrorKind, to_exit_code};
use dune_sync::core::retry::RetryPolicy;
use serde_json::{Map, Value, json};
use tracing_subscriber::EnvFilter;

mod command_dispatch;

#[derive(Copy, Clone, Debug)]
struct RunOutcome {
    exit_code: i32,
}

impl RunOutcome {
    fn ok() -> Self {
        Self { exit_code: 0 }
    }

    fn with_code(exit_code: i32) -> Self {
        Self { exit_code }
    }
}

fn main() {
    // A missing .env is the normal case in deployments.
    let _ = dotenv::dotenv();
    let exit_code = match run() {
        Ok(outcome) => outcome.exit_code,
        Err(err) => {
            emit_error(&err);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn run() -> Result<RunOutcome, Error> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            ClapErrorKind::DisplayHelp
            | ClapErrorKind::DisplayVersion
            | ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
                err.print().map_err(|io_err| {
                    Error::new(ErrorKind::Io)
                        .with_message("failed to write help")
                        .with_source(io_err)
                })?;
                let exit_code = if matches!(
                    err.kind(),
                    ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
                ) {
                    2
                } else {
                    0
                };
                return Ok(RunOutcome::with_code(exit_code));
            }
            _ => {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message(clap_error_summary(&err))
                    .with_hint("Try `dune-sync --help`."));
            }
        },
    };

    init_tracing(cli.log_filter.as_deref());
    command_dispatch::dispatch_command(cli.command)
        .map_err(add_io_hint)
        .map_err(add_internal_hint)
}

#[derive(Parser)]
#[command(
    name = "dune-sync",
    version,
    about = "Sync Dune query results and IPFS app data into local files",
    long_about = None,
    after_help = r#"EXAMPLES
  $ dune-sync app-data --volume-path /data
  $ dune-sync query 1610025 --param BlockFrom=12153262 --param BlockTo=12153300 --out app_hashes.json
  $ dune-sync cid 0x3d876de8fcd70969349c92d731eeb0482fe8667ceca075592b8785081d630b9a

ENVIRONMENT
  DUNE_API_KEY, DUNE_API_URL, VOLUME_PATH, IPFS_GATEWAY, LOG_FILTER (or RUST_LOG).
  A .env file in the working directory is loaded first."#,
    arg_required_else_help = true
)]
struct Cli {
    #[arg(
        long,
        env = "LOG_FILTER",
        help = "Tracing filter directives (default: RUST_LOG, then info)"
    )]
    log_filter: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    #[command(
        name = "app-data",
        about = "Resolve new app hashes since the last checkpoint and advance it"
    )]
    AppData(AppDataArgs),
    #[command(about = "Execute a saved query and store its rows as a local snapshot")]
    Query(QueryArgs),
    #[command(about = "Print the CID and gateway URL for an app hash")]
    Cid {
        #[arg(help = "32-byte app hash as hex, with or without 0x")]
        hash: String,
        #[arg(long, env = "IPFS_GATEWAY", default_value = DEFAULT_GATEWAY)]
        gateway: String,
    },
    #[command(about = "Fetch the content behind an app hash using the retry policy")]
    Content {
        #[arg(help = "32-byte app hash as hex, with or without 0x")]
        hash: String,
        #[arg(long, env = "IPFS_GATEWAY", default_value = DEFAULT_GATEWAY)]
        gateway: String,
        #[command(flatten)]
        retry: RetryArgs,
    },
    #[command(about = "Generate shell completion scripts")]
    Completion {
        #[arg(value_enum)]
        shell: Shell,
    },
    #[command(about = "Print version info as JSON")]
    Version,
}

#[derive(Args)]
struct AppDataArgs {
    #[arg(
        long,
        env = "VOLUME_PATH",
        default_value = "./data",
        help = "Persistent volume root; state lives under <volume>/app_data"
    )]
    volume_path: PathBuf,
    #[arg(long, env = "IPFS_GATEWAY", default_value = DEFAULT_GATEWAY)]
    gateway: String,
    #[command(flatten)]
    dune: DuneArgs,
    #[command(flatten)]
    retry: RetryArgs,
}

#[derive(Args)]
struct QueryArgs {
    #[arg(help = "Saved query id on the analytics service")]
    query_id: u64,
    #[arg(long = "param", value_name = "NAME=VALUE", help = "Query parameter (repeatable)")]
    params: Vec<String>,
    #[arg(long, help = "Output file name, relative to --volume-path")]
    out: String,
    #[arg(long, help = "Write one row per line instead of a JSON document")]
    ndjson: bool,
    #[arg(long, env = "VOLUME_PATH", default_value = "./data")]
    volume_path: PathBuf,
    #[command(flatten)]
    dune: DuneArgs,
}

#[derive(Args)]
struct DuneArgs {
    #[arg(long, env = "DUNE_API_KEY", hide_env_values = true)]
    api_key: String,
    #[arg(long, env = "DUNE_API_URL", default_value = DEFAULT_BASE_URL)]
    api_url: String,
    #[arg(long, default_value_t = 10, help = "Seconds between execution status polls")]
    poll_interval_secs: u64,
    #[arg(long, default_value_t = 1800, help = "Give up waiting for an execution after this")]
    max_wait_secs: u64,
}

#[derive(Args)]
struct RetryArgs {
    #[arg(long, default_value_t = 3, help = "Fetch attempts per hash per run")]
    max_retries: u32,
    #[arg(
        long,
        default_value_t = 10,
        help = "Accumulated attempts after which a hash is recorded with empty content"
    )]
    give_up_threshold: u32,
    #[arg(long, default_value_t = 0, help = "Pause between attempts on one hash")]
    retry_backoff_ms: u64,
    #[arg(long, default_value_t = 1000, help = "Timeout for a single content fetch")]
    fetch_timeout_ms: u64,
}

impl DuneArgs {
    fn client(&self) -> Result<AnalyticsClient, Error> {
        Ok(AnalyticsClient::new(self.api_key.clone())?
            .with_base_url(self.api_url.clone())?
            .with_poll_options(PollOptions {
                interval: Duration::from_secs(self.poll_interval_secs),
                max_wait: Duration::from_secs(self.max_wait_secs),
            }))
    }
}

impl RetryArgs {
    fn policy(&self) -> Result<RetryPolicy, Error> {
        let policy = RetryPolicy {
            max_attempts: self.max_retries,
            backoff: Duration::from_millis(self.retry_backoff_ms),
            give_up_threshold: self.give_up_threshold,
            timeout: Duration::from_millis(self.fetch_timeout_ms),
        };
        policy.validate()?;
        Ok(policy)
    }
}

fn init_tracing(filter: Option<&str>) {
    let env_filter = match filter {
        Some(directives) => EnvFilter::new(directives),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

fn add_io_hint(err: Error) -> Error {
    if err.hint().is_some() {
        return err;
    }
    match err.kind() {
        ErrorKind::Permission if err.path().is_some() => err.with_hint(
            "Permission denied. Check volume permissions or point --volume-path elsewhere.",
        ),
        ErrorKind::Io => err.with_hint("I/O error. Check the path, filesystem, and disk space."),
        ErrorKind::Remote => err.with_hint(
            "Remote call failed; nothing was written. Rerun once the service is reachable.",
        ),
        _ => err,
    }
}

fn add_internal_hint(err: Error) -> Error {
    if err.kind() != ErrorKind::Internal || err.hint().is_some() {
        return err;
    }
    err.with_hint(
        "Unexpected internal failure. Retry with RUST_BACKTRACE=1 and share command/context if it persists.",
    )
}

fn emit_json(value: Value) {
    let json = if io::stdout().is_terminal() {
        serde_json::to_string_pretty(&value)
    } else {
        serde_json::to_string(&value)
    }
    .unwrap_or_else(|_| "{\"error\":\"json encode failed\"}".to_string());
    println!("{json}");
}

fn emit_error(err: &Error) {
    if io::stderr().is_terminal() {
        eprintln!("{}", error_text(err));
        return;
    }

    let json = serde_json::to_string(&error_json(err)).unwrap_or_else(|_| {
        "{\"error\":{\"kind\":\"Internal\",\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{json}");
}

fn error_message(err: &Error) -> String {
    if let Some(message) = err.message() {
        return message.to_string();
    }
    match err.kind() {
        ErrorKind::Internal => "internal error".to_string(),
        ErrorKind::Usage => "usage error".to_string(),
        ErrorKind::NotFound => "not found".to_string(),
        ErrorKind::Config => "invalid configuration or state".to_string(),
        ErrorKind::Busy => "resource is busy".to_string(),
        ErrorKind::Permission => "permission denied".to_string(),
        ErrorKind::Remote => "remote service error".to_string(),
        ErrorKind::Corrupt => "corrupt data".to_string(),
        ErrorKind::Io => "i/o error".to_string(),
    }
}

fn error_causes(err: &Error) -> Vec<String> {
    let mut causes = Vec::new();
    let mut cur = std::error::Error::source(err);
    while let Some(source) = cur {
        causes.push(source.to_string());
        cur = source.source();
    }
    causes
}

fn error_json(err: &Error) -> Value {
    let mut inner = Map::new();
    inner.insert("kind".to_string(), json!(format!("{:?}", err.kind())));
    inner.insert("message".to_string(), json!(error_message(err)));
    if let Some(hint) = err.hint() {
        inner.insert("hint".to_string(), json!(hint));
    }
    if let Some(path) = err.path() {
        inner.insert("path".to_string(), json!(path.display().to_string()));
    }
    let causes = error_causes(err);
    if !causes.is_empty() {
        inner.insert("causes".to_string(), json!(causes));
    }

    let mut outer = Map::new();
    outer.insert("error".to_string(), Value::Object(inner));
    Value::Object(outer)
}

fn error_text(err: &Error) -> String {
    let mut lines = vec![format!("error: {}", error_message(err))];
    if let Some(hint) = err.hint() {
        lines.push(format!("hint: {hint}"));
    }
    if let Some(path) = err.path() {
        lines.push(format!("path: {}", path.display()));
    }
    if let Some(cause) = error_causes(err).first() {
        lines.push(format!("caused by: {cause}"));
    }
    lines.join("\n")
}

fn clap_error_summary(err: &clap::Error) -> String {
    for line in err.to_string().lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix("error:") {
            return rest.trim().to_string();
        }
        return trimmed.to_string();
    }
    "invalid arguments".to_string()
}

#[cfg(test)]
mod tests {
    use super::{Cli, clap_error_summary, error_json};
    use clap::{CommandFactory, Parser};
    use dune_sync::core::error::{Error, ErrorKind};

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn retry_flags_parse_into_policy() {
        let cli = Cli::try_parse_from([
            "dune-sync",
            "content",
            "0x00",
            "--max-retries",
            "5",
            "--give-up-threshold",
            "20",
            "--fetch-timeout-ms",
            "250",
        ])
        .expect("parse");
        let super::Command::Content { retry, .. } = cli.command else {
            panic!("expected content command");
        };
        let policy = retry.policy().expect("policy");
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.give_up_threshold, 20);
        assert_eq!(policy.timeout.as_millis(), 250);
    }

    #[test]
    fn zero_retries_is_a_usage_error() {
        let cli = Cli::try_parse_from(["dune-sync", "content", "0x00", "--max-retries", "0"])
            .expect("parse");
        let super::Command::Content { retry, .. } = cli.command else {
            panic!("expected content command");
        };
        assert_eq!(retry.policy().expect_err("zero").kind(), ErrorKind::Usage);
    }

    #[test]
    fn error_json_carries_kind_message_and_hint() {
        let err = Error::new(ErrorKind::Config)
            .with_message("bad checkpoint")
            .with_hint("remove it");
        let value = error_json(&err);
        assert_eq!(value["error"]["kind"], "Config");
        assert_eq!(value["error"]["message"], "bad checkpoint");
        assert_eq!(value["error"]["hint"], "remove it");
    }

    #[test]
    fn clap_summary_strips_prefix() {
        let err = Cli::try_parse_from(["dune-sync", "cid"]).err().expect("missing hash");
        let summary = clap_error_summary(&err);
        assert!(!summary.starts_with("error:"));
        assert!(!summary.is_empty());
    }
}
