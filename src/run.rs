//! One boot-and-capture cycle: check dependencies, build the drive, launch
//! the emulator, wrap its log and pull the fields back out.

use std::fmt;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::arch::Arch;
use crate::config::HarnessConfig;
use crate::drive::{DriveBuilder, DriveOptions};
use crate::environment::Environment;
use crate::error::HarnessError;
use crate::launcher::{Launcher, LogStamp, RunOutcome};
use crate::log::WrappedLog;
use crate::tags::ExtractedFields;

/// What to run. Everything else comes from [`HarnessConfig`].
#[derive(Debug, Clone)]
pub struct RunRequest {
    /// Artifact path, or a base name completed to `<name>-<fw>.efi`.
    pub artifact: String,
    /// Appended to the emulator command line as is.
    pub extra_args: Vec<String>,
}

/// A completed run.
#[derive(Debug)]
pub struct RunReport {
    pub log_path: PathBuf,
    pub outcome: RunOutcome,
    pub log: WrappedLog,
    pub fields: ExtractedFields,
}

impl RunReport {
    /// The program reported success and the emulator shut down cleanly.
    pub fn passed(&self) -> bool {
        self.outcome.code == 0 && parse_status(&self.fields.command_result) == Some(0)
    }

    pub fn check(&self) -> Result<(), HarnessError> {
        if self.passed() {
            Ok(())
        } else {
            Err(HarnessError::TestFailed {
                cres: self.fields.command_result.clone(),
                lres: self.outcome.code,
            })
        }
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fields = &self.fields;
        writeln!(f, "firmware:        {}", fields.firmware_version)?;
        writeln!(f, "firmware build:  {}", fields.firmware_build)?;
        writeln!(f, "shell:           {}", fields.shell_version)?;
        writeln!(f, "command result:  {}", fields.command_result)?;
        writeln!(f, "launcher result: {}", self.outcome.code)?;
        writeln!(f, "duration:        {}", format_duration(self.outcome.duration))?;
        writeln!(f, "log:             {}", self.log_path.display())?;
        writeln!(f, "==== command output ====")?;
        write!(f, "{}", fields.command_output)?;
        if !fields.command_output.ends_with('\n') {
            writeln!(f)?;
        }
        write!(f, "========================")
    }
}

/// `%lasterror%` expands to hex (`0x0`); accept decimal as well.
fn parse_status(s: &str) -> Option<u64> {
    let s = s.trim();
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => s.parse().ok(),
    }
}

/// Whether `a` and `b` name the same existing file.
fn same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

fn format_duration(duration: Duration) -> String {
    if duration.as_secs() >= 1 {
        format!("{:.2}s", duration.as_secs_f64())
    } else {
        format!("{}ms", duration.as_millis())
    }
}

/// Resolved paths and tools for runs on one architecture.
pub struct Harness<'a> {
    config: &'a HarnessConfig,
    env: Environment,
}

impl<'a> Harness<'a> {
    pub fn new(config: &'a HarnessConfig) -> Self {
        let arch = Arch::resolve(config.arch.as_deref()).with_firmware(config.fw_arch.as_deref());
        Self::with_environment(config, Environment::resolve(arch, config))
    }

    pub fn with_environment(config: &'a HarnessConfig, env: Environment) -> Self {
        Harness { config, env }
    }

    pub fn environment(&self) -> &Environment {
        &self.env
    }

    pub fn drive_path(&self) -> PathBuf {
        self.config.drive.clone().unwrap_or_else(|| {
            self.config
                .workdir
                .join(format!("drive-{}", self.env.arch.firmware))
        })
    }

    pub fn log_path(&self) -> PathBuf {
        self.config
            .workdir
            .join(format!("run-{}.log", self.env.arch.firmware))
    }

    fn vars_path(&self) -> PathBuf {
        self.config
            .workdir
            .join(format!("vars-{}.fd", self.env.arch.firmware))
    }

    pub fn run(&self, request: &RunRequest) -> Result<RunReport> {
        let config = self.config;
        let artifact = self.env.resolve_artifact(&request.artifact);
        self.env.check(&artifact, config)?;

        fs::create_dir_all(&config.workdir)
            .with_context(|| format!("Failed to create {}", config.workdir.display()))?;

        let drive = DriveBuilder::new(
            self.drive_path(),
            &artifact,
            &self.env.shell,
            self.env.boot_path(),
            DriveOptions {
                remove_existing: config.rm_drive,
                copy_artifact: config.copy_artifact,
                copy_shell: config.copy_shell,
                script: config.script.clone(),
            },
        )
        .build()?;

        // The emulator writes to the vars image, so never hand it the original.
        let vars = self.vars_path();
        if same_file(&self.env.fw_vars, &vars) {
            debug!(path = %vars.display(), "vars image already in the work directory");
        } else {
            fs::copy(&self.env.fw_vars, &vars).with_context(|| {
                format!("Failed to copy {} to {}", self.env.fw_vars.display(), vars.display())
            })?;
        }

        let log_path = self.log_path();
        if config.rm_log && log_path.exists() {
            fs::remove_file(&log_path)
                .with_context(|| format!("Failed to remove {}", log_path.display()))?;
        }
        let stale = LogStamp::of(&log_path);

        let mut command = self.command(&drive.root, &vars, &log_path, &request.extra_args)?;
        info!(command = ?command, "launching emulator");
        let launcher = Launcher::new(config.timeout.0, config.kill_timeout.0);
        let (termination, duration) = match launcher.launch(&mut command) {
            Ok(done) => done,
            Err(err) => {
                warn!("{err:#}");
                return Err(HarnessError::FailedToStart(log_path).into());
            }
        };

        let outcome = RunOutcome::capture(&log_path, stale, termination.code(), duration)?;
        let log = WrappedLog::from_outcome(&outcome, &log_path)?;
        let fields = ExtractedFields::extract(log.as_bytes())?;

        Ok(RunReport {
            log_path,
            outcome,
            log,
            fields,
        })
    }

    fn command(&self, drive: &Path, vars: &Path, log: &Path, extra: &[String]) -> Result<Command> {
        let mut cmd = Command::new(&self.env.qemu);
        cmd.args(&self.env.platform_flags);
        cmd.args([
            "-drive".to_string(),
            format!("if=pflash,format=raw,readonly=on,file={}", self.env.fw_code.display()),
            "-drive".to_string(),
            format!("if=pflash,format=raw,file={}", vars.display()),
            "-drive".to_string(),
            format!("format=raw,file=fat:rw:{}", drive.display()),
            "-display".to_string(),
            "none".to_string(),
            "-serial".to_string(),
            format!("file:{}", log.display()),
            "-net".to_string(),
            "none".to_string(),
        ]);
        if let Some(monitor) = &self.config.monitor {
            cmd.arg("-monitor")
                .arg(format!("unix:{},server,nowait", monitor.display()));
        }
        cmd.args(extra);

        cmd.stdin(Stdio::null());
        match &self.config.output {
            Some(path) => {
                let out = File::create(path)
                    .with_context(|| format!("Failed to create {}", path.display()))?;
                let err = out.try_clone().context("Failed to duplicate output handle")?;
                cmd.stdout(out).stderr(err);
            }
            None => {
                cmd.stdout(Stdio::null()).stderr(Stdio::null());
            }
        }
        Ok(cmd)
    }
}
