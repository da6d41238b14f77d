//! Failure classes a run or validation can end in.

use std::path::PathBuf;

use thiserror::Error;

/// A checked failure. Every variant maps to exit status 1; clap reports
/// invocation errors itself with status 2.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("missing dependency: {what} not found at {}", .path.display())]
    MissingDependency { what: &'static str, path: PathBuf },

    #[error("emulator `{0}` not found in PATH")]
    MissingEmulator(String),

    #[error("no log found at {}", .0.display())]
    MissingLog(PathBuf),

    #[error("failed to start: emulator produced no log at {}", .0.display())]
    FailedToStart(PathBuf),

    #[error("failed to boot: log at {} is empty", .0.display())]
    FailedToBoot(PathBuf),

    #[error("failed to start/finish script: <{tag}> not found in log")]
    MissingTag { tag: &'static str },

    #[error("output mismatch: expected `{expected}`, got `{actual}`")]
    Mismatch { expected: String, actual: String },

    #[error("test failed: command result {cres}, launcher result {lres}")]
    TestFailed { cres: String, lres: i32 },

    #[error("no supported package manager found")]
    NoPackageManager,
}

impl HarnessError {
    pub fn exit_code(&self) -> i32 {
        1
    }
}
