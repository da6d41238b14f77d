//! uefi-harness - boot a UEFI program under QEMU and check what it printed
//!
//! A run resolves the emulator and firmware for an architecture, lays out a
//! FAT drive holding a UEFI shell, a startup script and the program, boots
//! it with a soft and a hard timeout, then wraps the serial log in tags so
//! the program's output and status can be extracted and compared against a
//! reference.

pub mod arch;
pub mod config;
pub mod drive;
pub mod environment;
pub mod error;
pub mod install;
pub mod launcher;
pub mod log;
pub mod run;
pub mod tags;
pub mod validate;

pub use arch::Arch;
pub use config::{HarnessConfig, Timeout};
pub use environment::Environment;
pub use error::HarnessError;
pub use launcher::{Launcher, RunOutcome, Termination};
pub use log::WrappedLog;
pub use run::{Harness, RunReport, RunRequest};
pub use tags::ExtractedFields;
pub use validate::Validation;
