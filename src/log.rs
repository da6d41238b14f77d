//! Wraps the raw serial capture so each part of a run can be pulled out by
//! tag later, even when the guest printed garbage or stopped halfway:
//!
//! ```text
//! <run><log>RAW SERIAL OUTPUT</log>
//! <lres>N</lres></run>
//! ```

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::debug;

use crate::error::HarnessError;
use crate::launcher::RunOutcome;
use crate::tags;

/// A run's log after wrapping. The serial capture is kept as raw bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrappedLog {
    bytes: Vec<u8>,
}

impl WrappedLog {
    /// Wrap `raw` and the launcher's termination `code`.
    pub fn wrap(raw: &[u8], code: i32) -> Self {
        let mut bytes = Vec::with_capacity(raw.len() + 48);
        bytes.extend_from_slice(b"<run><log>");
        bytes.extend_from_slice(raw);
        bytes.extend_from_slice(format!("</log>\n<lres>{code}</lres></run>\n").as_bytes());
        WrappedLog { bytes }
    }

    /// Wrap a finished run and write it over the raw capture at `path`.
    ///
    /// A run that left no log failed to start; one with an empty log failed
    /// to boot. Neither writes anything.
    pub fn from_outcome(outcome: &RunOutcome, path: &Path) -> Result<Self> {
        if !outcome.log_produced {
            return Err(HarnessError::FailedToStart(path.to_path_buf()).into());
        }
        if outcome.output.is_empty() {
            return Err(HarnessError::FailedToBoot(path.to_path_buf()).into());
        }
        let wrapped = Self::wrap(&outcome.output, outcome.code);
        fs::write(path, &wrapped.bytes)
            .with_context(|| format!("Failed to write log {}", path.display()))?;
        debug!(path = %path.display(), bytes = wrapped.bytes.len(), "wrote wrapped log");
        Ok(wrapped)
    }

    /// Load a previously written log.
    pub fn read(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(HarnessError::MissingLog(path.to_path_buf()).into());
        }
        let bytes =
            fs::read(path).with_context(|| format!("Failed to read log {}", path.display()))?;
        Ok(WrappedLog { bytes })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// The raw capture inside `<log>`.
    pub fn body(&self) -> Option<&[u8]> {
        tags::extract("log", &self.bytes)
    }

    /// The launcher result inside `<lres>`.
    pub fn launcher_result(&self) -> Option<i32> {
        std::str::from_utf8(tags::extract("lres", &self.bytes)?)
            .ok()?
            .trim()
            .parse()
            .ok()
    }
}
