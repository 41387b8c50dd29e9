//! Size-bounded, append-only output files.

use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use fleetsync_core::EntityId;
use log::info;
use thiserror::Error;

use crate::format::OutputCategory;

const LINE_ENDING: &str = "\n";

/// Errors raised while writing output files.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SinkError {
    /// Reading metadata of, or appending to, an output file failed.
    #[error("output file {path}: {source}")]
    Io {
        /// File involved.
        path: Utf8PathBuf,
        /// Underlying failure.
        #[source]
        source: io::Error,
    },
}

/// Appends lines to the current file of one category for one device and
/// moves to a new file once the current one reaches its size ceiling.
///
/// File names follow
/// `{category} - DeviceID {id} FileID {yyyyMMddHHmmss}.csv`, with an `_n`
/// discriminator when that name is already taken. Every new file starts with
/// the category header.
#[derive(Debug)]
pub struct RotatingFileSink {
    dir: Utf8PathBuf,
    category: OutputCategory,
    device_id: EntityId,
    max_bytes: u64,
    current: Option<Utf8PathBuf>,
}

impl RotatingFileSink {
    /// A sink that has not opened any file yet.
    #[must_use]
    pub const fn new(
        dir: Utf8PathBuf,
        category: OutputCategory,
        device_id: EntityId,
        max_bytes: u64,
    ) -> Self {
        Self {
            dir,
            category,
            device_id,
            max_bytes,
            current: None,
        }
    }

    /// File the next write will append to, if one is open.
    #[must_use]
    pub fn current_path(&self) -> Option<&Utf8Path> {
        self.current.as_deref()
    }

    /// Category written by this sink.
    #[must_use]
    pub const fn category(&self) -> OutputCategory {
        self.category
    }

    /// Append `lines`, rotating first when needed. Returns the path written,
    /// or `None` when there was nothing to write.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError::Io`] when the file cannot be inspected or
    /// written. The current file is left unchanged so the next attempt
    /// re-evaluates rotation.
    pub fn write_lines(
        &mut self,
        lines: &[String],
        now: DateTime<Utc>,
    ) -> Result<Option<Utf8PathBuf>, SinkError> {
        if lines.is_empty() {
            return Ok(None);
        }
        let (path, fresh) = match self.reusable_path()? {
            Some(current) => (current, false),
            None => (self.next_path(now)?, true),
        };
        let mut payload = String::new();
        if fresh {
            payload.push_str(self.category.header());
            payload.push_str(LINE_ENDING);
        }
        for line in lines {
            payload.push_str(line);
            payload.push_str(LINE_ENDING);
        }
        fleetsync_fs::append_to_file(&path, payload.as_bytes()).map_err(|source| {
            SinkError::Io {
                path: path.clone(),
                source,
            }
        })?;
        if fresh {
            info!("started {} file {path}", self.category);
        }
        self.current = Some(path.clone());
        Ok(Some(path))
    }

    fn reusable_path(&self) -> Result<Option<Utf8PathBuf>, SinkError> {
        let Some(current) = self.current.as_ref() else {
            return Ok(None);
        };
        let len = fleetsync_fs::file_len(current).map_err(|source| SinkError::Io {
            path: current.clone(),
            source,
        })?;
        Ok(match len {
            Some(bytes) if bytes < self.max_bytes => Some(current.clone()),
            Some(_) | None => None,
        })
    }

    fn next_path(&self, now: DateTime<Utc>) -> Result<Utf8PathBuf, SinkError> {
        let stem = format!(
            "{} - DeviceID {} FileID {}",
            self.category.file_prefix(),
            self.device_id,
            now.format("%Y%m%d%H%M%S")
        );
        let mut candidate = self.dir.join(format!("{stem}.csv"));
        let mut discriminator = 1_u32;
        while path_exists(&candidate)? {
            candidate = self.dir.join(format!("{stem}_{discriminator}.csv"));
            discriminator = discriminator.saturating_add(1);
        }
        Ok(candidate)
    }
}

fn path_exists(path: &Utf8Path) -> Result<bool, SinkError> {
    fleetsync_fs::file_len(path)
        .map(|len| len.is_some())
        .map_err(|source| SinkError::Io {
            path: path.to_path_buf(),
            source,
        })
}
