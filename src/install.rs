//! Dependency provisioning: find the host package manager and install the
//! emulator, firmware and UEFI shell packages for an architecture.

use std::process::Command;

use anyhow::{bail, Context, Result};
use tracing::info;

use crate::arch::Family;
use crate::error::HarnessError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageManager {
    Apt,
    Dnf,
    Pacman,
    Zypper,
    Brew,
}

const PROBE_ORDER: &[PackageManager] = &[
    PackageManager::Apt,
    PackageManager::Dnf,
    PackageManager::Pacman,
    PackageManager::Zypper,
    PackageManager::Brew,
];

impl PackageManager {
    /// First package manager found in `PATH`.
    pub fn detect() -> Option<Self> {
        PROBE_ORDER
            .iter()
            .copied()
            .find(|pm| which::which(pm.binary()).is_ok())
    }

    pub fn binary(&self) -> &'static str {
        match self {
            PackageManager::Apt => "apt-get",
            PackageManager::Dnf => "dnf",
            PackageManager::Pacman => "pacman",
            PackageManager::Zypper => "zypper",
            PackageManager::Brew => "brew",
        }
    }

    /// Packages providing the emulator, firmware and shell for `family`.
    pub fn packages(&self, family: Family) -> &'static [&'static str] {
        use Family::*;
        match (self, family) {
            (PackageManager::Apt, X64) => &["qemu-system-x86", "ovmf", "efi-shell-x64"],
            (PackageManager::Apt, Ia32) => &["qemu-system-x86", "ovmf-ia32", "efi-shell-ia32"],
            (PackageManager::Apt, Aa64) => &["qemu-system-arm", "qemu-efi-aarch64", "efi-shell-aa64"],
            (PackageManager::Apt, Arm) => &["qemu-system-arm", "qemu-efi-arm", "efi-shell-arm"],
            (PackageManager::Apt, Other) => &["qemu-system-misc"],
            (PackageManager::Dnf, X64 | Ia32) => &["qemu-system-x86", "edk2-ovmf"],
            (PackageManager::Dnf, Aa64) => &["qemu-system-aarch64", "edk2-aarch64"],
            (PackageManager::Dnf, Arm) => &["qemu-system-arm", "edk2-arm"],
            (PackageManager::Dnf, Other) => &["qemu"],
            (PackageManager::Pacman, X64 | Ia32) => &["qemu-system-x86", "edk2-ovmf", "edk2-shell"],
            (PackageManager::Pacman, Aa64) => &["qemu-system-aarch64", "edk2-aarch64", "edk2-shell"],
            (PackageManager::Pacman, Arm) => &["qemu-system-arm", "edk2-arm", "edk2-shell"],
            (PackageManager::Pacman, Other) => &["qemu-full"],
            (PackageManager::Zypper, X64 | Ia32) => &["qemu-x86", "qemu-ovmf-x86_64"],
            (PackageManager::Zypper, Aa64 | Arm) => &["qemu-arm", "qemu-uefi-aarch64"],
            (PackageManager::Zypper, Other) => &["qemu"],
            (PackageManager::Brew, _) => &["qemu"],
        }
    }

    /// The install invocation, without any privilege escalation.
    pub fn install_args(&self, packages: &[&str]) -> Vec<String> {
        let base: &[&str] = match self {
            PackageManager::Apt => &["apt-get", "install", "-y"],
            PackageManager::Dnf => &["dnf", "install", "-y"],
            PackageManager::Pacman => &["pacman", "-S", "--needed", "--noconfirm"],
            PackageManager::Zypper => &["zypper", "--non-interactive", "install"],
            PackageManager::Brew => &["brew", "install"],
        };
        base.iter().chain(packages).map(|s| s.to_string()).collect()
    }

    fn needs_root(&self) -> bool {
        !matches!(self, PackageManager::Brew)
    }
}

#[cfg(unix)]
fn is_root() -> bool {
    // SAFETY: geteuid has no preconditions.
    unsafe { libc::geteuid() == 0 }
}

#[cfg(not(unix))]
fn is_root() -> bool {
    true
}

/// Install the packages for `family`. With `dry_run` the command is only
/// printed.
pub fn install(family: Family, dry_run: bool) -> Result<()> {
    let pm = PackageManager::detect().ok_or(HarnessError::NoPackageManager)?;
    let mut args = pm.install_args(pm.packages(family));
    if pm.needs_root() && !is_root() && which::which("sudo").is_ok() {
        args.insert(0, "sudo".to_string());
    }
    println!("{}", args.join(" "));
    if dry_run {
        return Ok(());
    }

    info!(package_manager = pm.binary(), "installing dependencies");
    let status = Command::new(&args[0])
        .args(&args[1..])
        .status()
        .with_context(|| format!("Failed to run {}", args[0]))?;
    if !status.success() {
        bail!("{} exited with {}", pm.binary(), status);
    }
    Ok(())
}
