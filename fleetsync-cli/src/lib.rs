//! Command-line interface for the fleetsync telemetry sync engine.
#![forbid(unsafe_code)]

use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use fleetsync_core::EntityId;
use fleetsync_data::http::DEFAULT_SERVER;
use fleetsync_data::{HttpFeedSource, Login};
use fleetsync_tracking::{
    DEFAULT_PACING, FeedStartMode, SyncConfig, SyncLoop, TrackingPolicy, megabytes_to_bytes,
};
use log::info;
use ortho_config::{OrthoConfig, SubcmdConfigMerge};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

mod error;

pub use error::CliError;

const ARG_DATABASE: &str = "database";
const ARG_USER: &str = "user";
const ARG_PASSWORD: &str = "password";
const ARG_OUTPUT_DIR: &str = "output-dir";
const ENV_DATABASE: &str = "FLEETSYNC_CMDS_SYNC_DATABASE";
const ENV_USER: &str = "FLEETSYNC_CMDS_SYNC_USER";
const ENV_PASSWORD: &str = "FLEETSYNC_CMDS_SYNC_PASSWORD";
const ENV_OUTPUT_DIR: &str = "FLEETSYNC_CMDS_SYNC_OUTPUT_DIR";

const DEFAULT_MAX_FILE_MEGABYTES: u64 = 1;

/// Run the fleetsync CLI with the current process arguments and environment.
///
/// # Errors
///
/// Returns a [`CliError`] when arguments are invalid, startup fails or a
/// single-iteration run fails.
pub fn run() -> Result<(), CliError> {
    let cli = Cli::try_parse().map_err(CliError::ArgumentParsing)?;
    match cli.command {
        Command::Sync(args) => run_sync(args.into_plan()?),
    }
}

fn run_sync(plan: SyncPlan) -> Result<(), CliError> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(CliError::Runtime)?
        .block_on(sync(plan))
}

async fn sync(plan: SyncPlan) -> Result<(), CliError> {
    let source = HttpFeedSource::new(&plan.server, plan.login.clone())?;
    info!("connecting to {}", source.endpoint());
    let config = plan.session_config(Utc::now());
    info!("writing output to {}", config.output_dir);

    let mut sync_loop = SyncLoop::start(&source, config).await?;
    let cancel = CancellationToken::new();
    let stop = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("stop requested; finishing the current iteration");
            stop.cancel();
        }
    });
    sync_loop.run(&cancel).await?;
    info!("stopped after {} iteration(s)", sync_loop.iterations());
    Ok(())
}

#[derive(Debug, Parser)]
#[command(
    name = "fleetsync",
    about = "Mirror fleet telemetry feeds into local delimited files",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Follow the position, status and fault feeds and write them to disk.
    Sync(SyncArgs),
}

/// CLI arguments for the `sync` subcommand.
#[derive(Debug, Clone, Parser, Deserialize, Serialize, OrthoConfig, Default)]
#[command(
    long_about = "Connect to the fleet service and keep local files up to date. \
                 Values can come from CLI flags, configuration files, or \
                 environment variables.",
    about = "Synchronise telemetry feeds into local files"
)]
#[ortho_config(prefix = "FLEETSYNC")]
struct SyncArgs {
    /// Server hosting the API.
    #[arg(long, value_name = "host")]
    #[serde(default)]
    server: Option<String>,
    /// Database (tenant) name.
    #[arg(long = ARG_DATABASE, value_name = "name")]
    #[serde(default)]
    database: Option<String>,
    /// User name.
    #[arg(long = ARG_USER, value_name = "name")]
    #[serde(default)]
    user: Option<String>,
    /// Password.
    #[arg(long = ARG_PASSWORD, value_name = "secret")]
    #[serde(default)]
    password: Option<String>,
    /// Comma-separated device ids to track; every reporting device when unset.
    #[arg(long, value_name = "ids")]
    #[serde(default)]
    devices: Option<String>,
    /// Comma-separated diagnostic ids whose status or fault data is written.
    #[arg(long, value_name = "ids")]
    #[serde(default)]
    diagnostics: Option<String>,
    /// Where the feeds start: `now`, `resume` or an RFC 3339 time.
    #[arg(long, value_name = "start")]
    #[serde(default)]
    feed_start: Option<String>,
    /// Seconds between iterations.
    #[arg(long, value_name = "seconds")]
    #[serde(default)]
    interval_secs: Option<u64>,
    /// Directory receiving the session folder and checkpoints.
    #[arg(long = ARG_OUTPUT_DIR, value_name = "path")]
    #[serde(default)]
    output_dir: Option<Utf8PathBuf>,
    /// File size, in megabytes, at which output files rotate.
    #[arg(long, value_name = "megabytes")]
    #[serde(default)]
    max_file_size_mb: Option<u64>,
    /// Run a single iteration and exit.
    #[arg(long, num_args = 0..=1, default_missing_value = "true", value_name = "bool")]
    #[serde(default)]
    once: Option<bool>,
}

impl SyncArgs {
    fn into_plan(self) -> Result<SyncPlan, CliError> {
        let merged = self.load_and_merge().map_err(CliError::Configuration)?;
        SyncPlan::try_from(merged)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct SyncPlan {
    server: String,
    login: Login,
    output_dir: Utf8PathBuf,
    tracking: TrackingPolicy,
    diagnostics: Vec<EntityId>,
    feed_start: FeedStartMode,
    pacing: Duration,
    max_file_bytes: u64,
    continuous: bool,
}

impl SyncPlan {
    /// Configuration for a session starting at `now`: output goes to a fresh
    /// `Output_{yyyyMMdd_HHmmss}` folder, checkpoints stay in the output
    /// directory itself so later sessions can resume from them.
    fn session_config(&self, now: DateTime<Utc>) -> SyncConfig {
        let mut config = SyncConfig::new(session_dir(&self.output_dir, now));
        config.checkpoint_dir = self.output_dir.clone();
        config.tracking = self.tracking.clone();
        config.diagnostics = self.diagnostics.clone();
        config.feed_start = self.feed_start;
        config.pacing = self.pacing;
        config.max_file_bytes = self.max_file_bytes;
        config.continuous = self.continuous;
        config
    }
}

impl TryFrom<SyncArgs> for SyncPlan {
    type Error = CliError;

    fn try_from(args: SyncArgs) -> Result<Self, Self::Error> {
        let database = args.database.ok_or(CliError::MissingArgument {
            field: ARG_DATABASE,
            env: ENV_DATABASE,
        })?;
        let user_name = args.user.ok_or(CliError::MissingArgument {
            field: ARG_USER,
            env: ENV_USER,
        })?;
        let password = args.password.ok_or(CliError::MissingArgument {
            field: ARG_PASSWORD,
            env: ENV_PASSWORD,
        })?;
        let output_dir = args.output_dir.ok_or(CliError::MissingArgument {
            field: ARG_OUTPUT_DIR,
            env: ENV_OUTPUT_DIR,
        })?;
        let devices = parse_ids(args.devices.as_deref());
        let tracking = if devices.is_empty() {
            TrackingPolicy::Reporting
        } else {
            TrackingPolicy::AllowList(devices.into_iter().collect())
        };
        Ok(Self {
            server: args.server.unwrap_or_else(|| DEFAULT_SERVER.to_owned()),
            login: Login {
                database,
                user_name,
                password,
            },
            output_dir,
            tracking,
            diagnostics: parse_ids(args.diagnostics.as_deref()),
            feed_start: parse_feed_start(args.feed_start.as_deref())?,
            pacing: args
                .interval_secs
                .map_or(DEFAULT_PACING, Duration::from_secs),
            max_file_bytes: megabytes_to_bytes(
                args.max_file_size_mb.unwrap_or(DEFAULT_MAX_FILE_MEGABYTES),
            ),
            continuous: !args.once.unwrap_or(false),
        })
    }
}

fn parse_ids(raw: Option<&str>) -> Vec<EntityId> {
    raw.unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(EntityId::from)
        .collect()
}

fn parse_feed_start(raw: Option<&str>) -> Result<FeedStartMode, CliError> {
    let value = raw.map(str::trim).unwrap_or_default();
    if value.is_empty() || value.eq_ignore_ascii_case("now") {
        return Ok(FeedStartMode::Now);
    }
    if value.eq_ignore_ascii_case("resume") {
        return Ok(FeedStartMode::Resume);
    }
    DateTime::parse_from_rfc3339(value)
        .map(|time| FeedStartMode::SpecificTime(time.with_timezone(&Utc)))
        .map_err(|source| CliError::InvalidFeedStart {
            value: value.to_owned(),
            source,
        })
}

fn session_dir(base: &Utf8Path, now: DateTime<Utc>) -> Utf8PathBuf {
    base.join(format!("Output_{}", now.format("%Y%m%d_%H%M%S")))
}

#[cfg(test)]
mod tests;
