//! Compare a run's program output with a reference.

use std::path::Path;

use anyhow::Result;

use crate::error::HarnessError;
use crate::log::WrappedLog;
use crate::tags;

/// Outcome of comparing `<cmd>` against a reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validation {
    Pass,
    /// Both sides with line terminators stripped, for display only.
    Fail { expected: String, actual: String },
}

impl Validation {
    pub fn passed(&self) -> bool {
        matches!(self, Validation::Pass)
    }

    /// Turn a failed comparison into an error.
    pub fn into_result(self) -> Result<(), HarnessError> {
        match self {
            Validation::Pass => Ok(()),
            Validation::Fail { expected, actual } => Err(HarnessError::Mismatch { expected, actual }),
        }
    }
}

/// Compare the `<cmd>` section of `text` byte for byte with `reference`.
pub fn compare(text: &[u8], reference: &[u8]) -> Result<Validation, HarnessError> {
    let actual = tags::require("cmd", text)?;
    if actual == reference {
        Ok(Validation::Pass)
    } else {
        Ok(Validation::Fail {
            expected: strip_line_endings(reference),
            actual: strip_line_endings(actual),
        })
    }
}

/// Load the wrapped log at `log` and compare it with `reference`.
pub fn validate(log: &Path, reference: &[u8]) -> Result<Validation> {
    let log = WrappedLog::read(log)?;
    Ok(compare(log.as_bytes(), reference)?)
}

fn strip_line_endings(s: &[u8]) -> String {
    String::from_utf8_lossy(s)
        .chars()
        .filter(|c| !matches!(c, '\r' | '\n'))
        .collect()
}
