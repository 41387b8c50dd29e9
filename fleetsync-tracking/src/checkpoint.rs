//! Persisted continuation tokens of the primary feeds.

use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use fleetsync_core::FeedToken;
use log::warn;
use thiserror::Error;

/// File holding the position feed token.
pub const GPS_TOKEN_FILE: &str = "GPS Token.txt";
/// File holding the status feed token.
pub const STATUS_TOKEN_FILE: &str = "StatusData Token.txt";
/// File holding the fault feed token.
pub const FAULT_TOKEN_FILE: &str = "FaultData Token.txt";

/// Errors raised while reading or writing checkpoints.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CheckpointError {
    /// A checkpoint file could not be read.
    #[error("failed to read checkpoint {path}: {source}")]
    Read {
        /// Checkpoint file.
        path: Utf8PathBuf,
        /// Underlying failure.
        #[source]
        source: io::Error,
    },
    /// A checkpoint file could not be written.
    #[error("failed to write checkpoint {path}: {source}")]
    Write {
        /// Checkpoint file.
        path: Utf8PathBuf,
        /// Underlying failure.
        #[source]
        source: io::Error,
    },
}

/// Tokens of the three primary feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FeedTokens {
    /// Position feed.
    pub gps: FeedToken,
    /// Status feed.
    pub status: FeedToken,
    /// Fault feed.
    pub fault: FeedToken,
}

/// Reads and writes one token file per primary feed in a directory.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: Utf8PathBuf,
}

impl CheckpointStore {
    /// A store keeping its files in `dir`.
    #[must_use]
    pub const fn new(dir: Utf8PathBuf) -> Self {
        Self { dir }
    }

    /// Directory holding the token files.
    #[must_use]
    pub fn dir(&self) -> &Utf8Path {
        &self.dir
    }

    /// Load every token. Missing or unparsable files count as zero.
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError::Read`] when a file exists but cannot be
    /// read.
    pub fn load(&self) -> Result<FeedTokens, CheckpointError> {
        Ok(FeedTokens {
            gps: self.load_token(GPS_TOKEN_FILE)?,
            status: self.load_token(STATUS_TOKEN_FILE)?,
            fault: self.load_token(FAULT_TOKEN_FILE)?,
        })
    }

    /// Persist every token, each through a temporary file and a rename.
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError::Write`] for the first file that cannot be
    /// written.
    pub fn save(&self, tokens: FeedTokens) -> Result<(), CheckpointError> {
        self.save_token(GPS_TOKEN_FILE, tokens.gps)?;
        self.save_token(STATUS_TOKEN_FILE, tokens.status)?;
        self.save_token(FAULT_TOKEN_FILE, tokens.fault)
    }

    fn load_token(&self, name: &str) -> Result<FeedToken, CheckpointError> {
        let path = self.dir.join(name);
        let contents = fleetsync_fs::read_optional_string(&path)
            .map_err(|source| CheckpointError::Read {
                path: path.clone(),
                source,
            })?;
        Ok(contents.map_or(FeedToken::ZERO, |text| {
            text.parse().unwrap_or_else(|err| {
                warn!("ignoring checkpoint {path}: {err}");
                FeedToken::ZERO
            })
        }))
    }

    fn save_token(&self, name: &str, token: FeedToken) -> Result<(), CheckpointError> {
        let path = self.dir.join(name);
        fleetsync_fs::write_atomically(&path, token.to_string().as_bytes())
            .map_err(|source| CheckpointError::Write { path, source })
    }
}

#[cfg(test)]
mod tests {
    #![expect(clippy::expect_used, reason = "tests fail fast on filesystem setup")]

    use super::*;
    use rstest::{fixture, rstest};
    use tempfile::TempDir;

    struct Workspace {
        _tmp: TempDir,
        store: CheckpointStore,
    }

    #[fixture]
    fn workspace() -> Workspace {
        let tmp = TempDir::new().expect("tempdir");
        let dir = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf()).expect("utf-8 tempdir");
        Workspace {
            _tmp: tmp,
            store: CheckpointStore::new(dir),
        }
    }

    #[rstest]
    fn missing_files_load_as_zero(workspace: Workspace) {
        assert_eq!(workspace.store.load().expect("load"), FeedTokens::default());
    }

    #[rstest]
    fn saved_tokens_are_decimal_text(workspace: Workspace) {
        let tokens = FeedTokens {
            gps: FeedToken::new(17),
            status: FeedToken::new(0),
            fault: FeedToken::new(9_000_000_001),
        };
        workspace.store.save(tokens).expect("save");

        let gps = fleetsync_fs::read_optional_string(&workspace.store.dir().join(GPS_TOKEN_FILE))
            .expect("read");
        assert_eq!(gps.as_deref(), Some("17"));
        assert_eq!(workspace.store.load().expect("load"), tokens);
    }

    #[rstest]
    fn unparsable_tokens_fall_back_to_zero(workspace: Workspace) {
        let path = workspace.store.dir().join(FAULT_TOKEN_FILE);
        fleetsync_fs::write_atomically(&path, b"not a number").expect("seed");
        fleetsync_fs::write_atomically(&workspace.store.dir().join(GPS_TOKEN_FILE), b" 42\n")
            .expect("seed");

        let tokens = workspace.store.load().expect("load");
        assert_eq!(tokens.fault, FeedToken::ZERO);
        assert_eq!(tokens.gps, FeedToken::new(42));
    }
}
