//! Error types emitted by the fleetsync CLI.

use std::sync::Arc;

use fleetsync_data::http::HttpSourceError;
use fleetsync_tracking::{IterationError, StartupError};
use thiserror::Error;

/// Errors emitted by the fleetsync CLI.
#[derive(Debug, Error)]
pub enum CliError {
    /// Provided arguments failed Clap validation.
    #[error(transparent)]
    ArgumentParsing(#[from] clap::Error),
    /// Configuration layering failed (files, env, CLI).
    #[error("failed to load configuration: {0}")]
    Configuration(#[from] Arc<ortho_config::OrthoError>),
    /// A required option is missing after configuration merging.
    #[error("missing {field} (set --{field} or {env})")]
    MissingArgument {
        field: &'static str,
        env: &'static str,
    },
    /// The feed start is neither a keyword nor an RFC 3339 timestamp.
    #[error("invalid feed start {value:?} (use now, resume or an RFC 3339 time): {source}")]
    InvalidFeedStart {
        value: String,
        #[source]
        source: chrono::ParseError,
    },
    /// The async runtime could not be built.
    #[error("failed to start async runtime: {0}")]
    Runtime(#[source] std::io::Error),
    /// The upstream client could not be built.
    #[error(transparent)]
    Source(#[from] HttpSourceError),
    /// The sync loop could not start.
    #[error(transparent)]
    Startup(#[from] StartupError),
    /// A single-iteration run failed.
    #[error(transparent)]
    Sync(#[from] IterationError),
}
