//! Harness configuration.
//!
//! Every knob can be given as a flag or through its `UEFI_*` environment
//! variable. The whole set is parsed once at startup into [`HarnessConfig`]
//! and handed down by reference; nothing below `main` reads the environment.

use std::path::PathBuf;
use std::time::Duration;

use clap::builder::BoolishValueParser;
use clap::{ArgAction, Args};

/// A timeout in seconds. `0` disables the watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeout(pub Option<Duration>);

impl Timeout {
    pub fn secs(secs: u64) -> Self {
        Timeout((secs > 0).then(|| Duration::from_secs(secs)))
    }

    pub fn disabled() -> Self {
        Timeout(None)
    }
}

fn parse_timeout(s: &str) -> Result<Timeout, String> {
    let secs: f64 = s
        .trim()
        .parse()
        .map_err(|_| format!("invalid timeout `{s}`, expected seconds"))?;
    if !secs.is_finite() || secs < 0.0 {
        return Err(format!("invalid timeout `{s}`, expected seconds"));
    }
    if secs == 0.0 {
        Ok(Timeout::disabled())
    } else {
        Duration::try_from_secs_f64(secs)
            .map(|d| Timeout(Some(d)))
            .map_err(|_| format!("timeout `{s}` is out of range"))
    }
}

#[derive(Debug, Clone, Args)]
pub struct HarnessConfig {
    /// Target CPU architecture (defaults to the host).
    #[arg(long, global = true, env = "UEFI_ARCH")]
    pub arch: Option<String>,

    /// UEFI firmware architecture code, overriding the one derived from --arch.
    #[arg(long, global = true, env = "UEFI_FW_ARCH")]
    pub fw_arch: Option<String>,

    /// Emulator binary.
    #[arg(long, global = true, env = "UEFI_QEMU")]
    pub qemu: Option<String>,

    /// Machine/platform flags passed to the emulator, whitespace separated.
    #[arg(long, global = true, env = "UEFI_QEMU_FLAGS", allow_hyphen_values = true)]
    pub qemu_flags: Option<String>,

    /// File receiving the emulator's own stdout/stderr.
    #[arg(long, global = true, env = "UEFI_OUTPUT")]
    pub output: Option<PathBuf>,

    /// Unix socket for the emulator monitor.
    #[arg(long, global = true, env = "UEFI_MONITOR")]
    pub monitor: Option<PathBuf>,

    /// Seconds before the emulator is asked to quit (0 disables).
    #[arg(long, global = true, env = "UEFI_TIMEOUT", default_value = "60", value_parser = parse_timeout)]
    pub timeout: Timeout,

    /// Seconds before the emulator is killed (0 disables).
    #[arg(long, global = true, env = "UEFI_KILL_TIMEOUT", default_value = "90", value_parser = parse_timeout)]
    pub kill_timeout: Timeout,

    /// Firmware code image.
    #[arg(long, global = true, env = "UEFI_FW_CODE")]
    pub fw_code: Option<PathBuf>,

    /// Firmware variables image.
    #[arg(long, global = true, env = "UEFI_FW_VARS")]
    pub fw_vars: Option<PathBuf>,

    /// UEFI shell binary installed as the boot loader.
    #[arg(long, global = true, env = "UEFI_SHELL")]
    pub shell: Option<PathBuf>,

    /// Directory exposed to the guest as a FAT drive.
    #[arg(long, global = true, env = "UEFI_DRIVE")]
    pub drive: Option<PathBuf>,

    /// Remove a stale log before launching.
    #[arg(long, global = true, env = "UEFI_RM_LOG", default_value_t = true, action = ArgAction::Set,
          value_parser = BoolishValueParser::new())]
    pub rm_log: bool,

    /// Remove the drive directory before building it.
    #[arg(long, global = true, env = "UEFI_RM_DRIVE", default_value_t = false, action = ArgAction::Set,
          value_parser = BoolishValueParser::new())]
    pub rm_drive: bool,

    /// Startup script to use instead of the generated one.
    #[arg(long, global = true, env = "UEFI_SCRIPT")]
    pub script: Option<PathBuf>,

    /// Copy the artifact onto the drive.
    #[arg(long, global = true, env = "UEFI_COPY_ARTIFACT", default_value_t = true, action = ArgAction::Set,
          value_parser = BoolishValueParser::new())]
    pub copy_artifact: bool,

    /// Copy the shell onto the drive's boot path.
    #[arg(long, global = true, env = "UEFI_COPY_SHELL", default_value_t = true, action = ArgAction::Set,
          value_parser = BoolishValueParser::new())]
    pub copy_shell: bool,

    /// Work directory holding the drive, the vars copy and the log.
    #[arg(long, global = true, env = "UEFI_WORKDIR", default_value = "target/uefi-harness")]
    pub workdir: PathBuf,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            arch: None,
            fw_arch: None,
            qemu: None,
            qemu_flags: None,
            output: None,
            monitor: None,
            timeout: Timeout::secs(60),
            kill_timeout: Timeout::secs(90),
            fw_code: None,
            fw_vars: None,
            shell: None,
            drive: None,
            rm_log: true,
            rm_drive: false,
            script: None,
            copy_artifact: true,
            copy_shell: true,
            workdir: PathBuf::from("target/uefi-harness"),
        }
    }
}
