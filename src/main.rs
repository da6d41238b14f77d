use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use uefi_harness::arch::Arch;
use uefi_harness::install;
use uefi_harness::validate::{self, Validation};
use uefi_harness::{Harness, HarnessConfig, HarnessError, RunRequest};

/// Boot a UEFI program under QEMU and check what it printed.
///
/// Options may be given before or after the subcommand.
#[derive(Parser)]
#[command(name = "uefi-harness", version)]
struct Cli {
    #[command(flatten)]
    config: HarnessConfig,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Print the UEFI firmware architecture code.
    Arch,
    /// Install the emulator, firmware and UEFI shell.
    Install {
        /// Only print the install command.
        #[arg(long)]
        dry_run: bool,
    },
    /// Boot an artifact and report its output.
    Run {
        /// Artifact path, or a base name completed to `<name>-<fw>.efi`.
        artifact: String,
        /// Extra emulator arguments.
        #[arg(last = true)]
        qemu_args: Vec<String>,
    },
    /// Compare a previous run's output with a reference read from stdin.
    Validate {
        /// Wrapped log of the run (defaults to the run log in the work directory).
        log: Option<PathBuf>,
        /// Read the reference from this file instead of stdin.
        #[arg(long)]
        reference: Option<PathBuf>,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    match dispatch(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            let code = err
                .downcast_ref::<HarnessError>()
                .map(HarnessError::exit_code)
                .unwrap_or(1);
            ExitCode::from(code as u8)
        }
    }
}

fn dispatch(cli: Cli) -> Result<()> {
    let config = cli.config;
    match cli.cmd {
        Cmd::Arch => {
            let arch = Arch::resolve(config.arch.as_deref()).with_firmware(config.fw_arch.as_deref());
            println!("{}", arch.firmware);
            Ok(())
        }
        Cmd::Install { dry_run } => {
            let arch = Arch::resolve(config.arch.as_deref()).with_firmware(config.fw_arch.as_deref());
            install::install(arch.family(), dry_run)
        }
        Cmd::Run {
            artifact,
            qemu_args,
        } => {
            let harness = Harness::new(&config);
            let report = harness.run(&RunRequest {
                artifact,
                extra_args: qemu_args,
            })?;
            println!("{report}");
            report.check()?;
            Ok(())
        }
        Cmd::Validate { log, reference } => {
            let log = log.unwrap_or_else(|| Harness::new(&config).log_path());
            let reference = match reference {
                Some(path) => fs::read(&path)
                    .with_context(|| format!("Failed to read reference {}", path.display()))?,
                None => {
                    let mut buf = Vec::new();
                    io::stdin()
                        .read_to_end(&mut buf)
                        .context("Failed to read reference from stdin")?;
                    buf
                }
            };
            let validation = validate::validate(&log, &reference)?;
            match &validation {
                Validation::Pass => println!("PASS"),
                Validation::Fail { expected, actual } => {
                    println!("FAIL");
                    println!("  expected: {expected}");
                    println!("  actual:   {actual}");
                }
            }
            validation.into_result()?;
            Ok(())
        }
    }
}
