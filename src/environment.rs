//! Emulator, firmware and shell lookup for an architecture, plus the
//! pre-run dependency check.

use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::debug;

use crate::arch::{Arch, Family};
use crate::config::HarnessConfig;
use crate::error::HarnessError;

/// Where distributions install the x86 OVMF images.
pub const OVMF_DIR: &str = "/usr/share/OVMF";
/// Where distributions install the ARM AAVMF images.
pub const AAVMF_DIR: &str = "/usr/share/AAVMF";

/// OVMF file name suffixes for x64, in probe order. Packaging differs
/// between distributions (Debian ships `_4M.fd`, older releases `.fd`,
/// Arch `.4m.fd`).
const X64_FIRMWARE_SUFFIXES: &[&str] = &["_4M.fd", ".fd", ".4m.fd"];

/// Everything needed to launch the emulator for one architecture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Environment {
    pub arch: Arch,
    pub qemu: String,
    pub platform_flags: Vec<String>,
    pub fw_code: PathBuf,
    pub fw_vars: PathBuf,
    pub shell: PathBuf,
}

impl Environment {
    /// Compute defaults for `arch`, then apply the overrides from `config`.
    pub fn resolve(arch: Arch, config: &HarnessConfig) -> Self {
        Self::resolve_in(arch, config, Path::new(OVMF_DIR), Path::new(AAVMF_DIR))
    }

    /// Like [`Environment::resolve`] with explicit firmware directories.
    pub fn resolve_in(arch: Arch, config: &HarnessConfig, ovmf: &Path, aavmf: &Path) -> Self {
        let (default_code, default_vars) = default_firmware(&arch, ovmf, aavmf);
        let fw = &arch.firmware;

        let qemu = config
            .qemu
            .clone()
            .unwrap_or_else(|| format!("qemu-system-{}", arch.emulator));
        let platform_flags = match &config.qemu_flags {
            Some(flags) => flags.split_whitespace().map(String::from).collect(),
            None => default_platform_flags(arch.family()),
        };
        let shell = config
            .shell
            .clone()
            .unwrap_or_else(|| PathBuf::from(format!("/usr/share/efi-shell-{fw}/shell{fw}.efi")));

        let env = Environment {
            qemu,
            platform_flags,
            fw_code: config.fw_code.clone().unwrap_or(default_code),
            fw_vars: config.fw_vars.clone().unwrap_or(default_vars),
            shell,
            arch,
        };
        debug!(?env, "resolved environment");
        env
    }

    /// Path of the boot loader inside the drive, e.g. `EFI/BOOT/BOOTX64.EFI`.
    pub fn boot_path(&self) -> PathBuf {
        boot_path(&self.arch.firmware)
    }

    /// Resolve an artifact name: the name itself when it exists, otherwise
    /// `<name>-<fw>.efi`.
    pub fn resolve_artifact(&self, name: &str) -> PathBuf {
        let verbatim = PathBuf::from(name);
        if verbatim.is_file() {
            return verbatim;
        }
        PathBuf::from(format!("{name}-{}.efi", self.arch.firmware))
    }

    /// Verify every file and tool the run needs exists, in a fixed order,
    /// before anything on disk is touched.
    pub fn check(&self, artifact: &Path, config: &HarnessConfig) -> Result<()> {
        if which::which(&self.qemu).is_err() {
            return Err(HarnessError::MissingEmulator(self.qemu.clone()).into());
        }
        require("firmware code", &self.fw_code)?;
        require("firmware vars", &self.fw_vars)?;
        if config.copy_shell {
            require("UEFI shell", &self.shell)?;
        }
        if config.copy_artifact {
            require("artifact", artifact)?;
        }
        if let Some(script) = &config.script {
            require("startup script", script)?;
        }
        Ok(())
    }
}

fn require(what: &'static str, path: &Path) -> Result<()> {
    if path.is_file() {
        Ok(())
    } else {
        Err(HarnessError::MissingDependency {
            what,
            path: path.to_path_buf(),
        }
        .into())
    }
}

pub fn boot_path(fw: &str) -> PathBuf {
    PathBuf::from("EFI")
        .join("BOOT")
        .join(format!("BOOT{}.EFI", fw.to_uppercase()))
}

fn default_platform_flags(family: Family) -> Vec<String> {
    let flags: &[&str] = match family {
        Family::X64 | Family::Other => &[],
        Family::Ia32 => &["-M", "q35"],
        Family::Arm => &["-M", "virt"],
        Family::Aa64 => &["-M", "virt", "-cpu", "cortex-a72"],
    };
    flags.iter().map(|s| s.to_string()).collect()
}

fn default_firmware(arch: &Arch, ovmf: &Path, aavmf: &Path) -> (PathBuf, PathBuf) {
    match arch.family() {
        Family::X64 => {
            let pick = X64_FIRMWARE_SUFFIXES
                .iter()
                .find(|suffix| ovmf.join(format!("OVMF_CODE{suffix}")).is_file())
                .unwrap_or(&X64_FIRMWARE_SUFFIXES[0]);
            (
                ovmf.join(format!("OVMF_CODE{pick}")),
                ovmf.join(format!("OVMF_VARS{pick}")),
            )
        }
        Family::Ia32 => (
            ovmf.join("OVMF32_CODE_4M.secboot.fd"),
            ovmf.join("OVMF32_VARS_4M.fd"),
        ),
        Family::Aa64 => (aavmf.join("AAVMF_CODE.fd"), aavmf.join("AAVMF_VARS.fd")),
        Family::Arm => (aavmf.join("AAVMF32_CODE.fd"), aavmf.join("AAVMF32_VARS.fd")),
        Family::Other => {
            let dir = PathBuf::from("/usr/share/edk2").join(&arch.firmware);
            (dir.join("CODE.fd"), dir.join("VARS.fd"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn resolve(arch: &str, config: &HarnessConfig, ovmf: &Path) -> Environment {
        Environment::resolve_in(Arch::resolve(Some(arch)), config, ovmf, Path::new("/nonexistent"))
    }

    #[test]
    fn test_platform_flags_per_family() {
        let config = HarnessConfig::default();
        let dir = Path::new("/nonexistent");
        assert!(resolve("x86_64", &config, dir).platform_flags.is_empty());
        assert_eq!(resolve("i686", &config, dir).platform_flags, ["-M", "q35"]);
        assert_eq!(resolve("arm", &config, dir).platform_flags, ["-M", "virt"]);
        assert_eq!(
            resolve("aarch64", &config, dir).platform_flags,
            ["-M", "virt", "-cpu", "cortex-a72"]
        );
    }

    #[test]
    fn test_emulator_and_shell_names() {
        let env = resolve("aarch64", &HarnessConfig::default(), Path::new("/nonexistent"));
        assert_eq!(env.qemu, "qemu-system-aarch64");
        assert_eq!(env.shell, PathBuf::from("/usr/share/efi-shell-aa64/shellaa64.efi"));
        assert_eq!(env.boot_path(), PathBuf::from("EFI/BOOT/BOOTAA64.EFI"));
    }

    #[test]
    fn test_x64_probes_first_existing_suffix() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("OVMF_CODE.fd"), b"code").unwrap();
        fs::write(dir.path().join("OVMF_CODE.4m.fd"), b"code").unwrap();

        let env = resolve("x86_64", &HarnessConfig::default(), dir.path());
        assert_eq!(env.fw_code, dir.path().join("OVMF_CODE.fd"));
        assert_eq!(env.fw_vars, dir.path().join("OVMF_VARS.fd"));
    }

    #[test]
    fn test_x64_falls_back_to_first_candidate() {
        let dir = tempfile::tempdir().unwrap();
        let env = resolve("x86_64", &HarnessConfig::default(), dir.path());
        assert_eq!(env.fw_code, dir.path().join("OVMF_CODE_4M.fd"));
    }

    #[test]
    fn test_overrides_win() {
        let config = HarnessConfig {
            qemu: Some("my-qemu".into()),
            qemu_flags: Some("-M  pc -cpu max".into()),
            fw_code: Some("/fw/code.fd".into()),
            fw_vars: Some("/fw/vars.fd".into()),
            shell: Some("/fw/shell.efi".into()),
            ..HarnessConfig::default()
        };
        let env = resolve("aarch64", &config, Path::new("/nonexistent"));
        assert_eq!(env.qemu, "my-qemu");
        assert_eq!(env.platform_flags, ["-M", "pc", "-cpu", "max"]);
        assert_eq!(env.fw_code, PathBuf::from("/fw/code.fd"));
        assert_eq!(env.fw_vars, PathBuf::from("/fw/vars.fd"));
        assert_eq!(env.shell, PathBuf::from("/fw/shell.efi"));
    }

    #[test]
    fn test_unknown_arch_tolerated() {
        let env = resolve("riscv64", &HarnessConfig::default(), Path::new("/nonexistent"));
        assert_eq!(env.qemu, "qemu-system-riscv64");
        assert!(env.platform_flags.is_empty());
        assert_eq!(env.boot_path(), PathBuf::from("EFI/BOOT/BOOTRISCV64.EFI"));
    }

    #[test]
    fn test_resolve_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let env = resolve("x86_64", &HarnessConfig::default(), Path::new("/nonexistent"));

        let exact = dir.path().join("hello.efi");
        fs::write(&exact, b"MZ").unwrap();
        assert_eq!(env.resolve_artifact(exact.to_str().unwrap()), exact);

        let base = dir.path().join("hello");
        assert_eq!(
            env.resolve_artifact(base.to_str().unwrap()),
            dir.path().join("hello-x64.efi")
        );
    }

    #[test]
    fn test_check_reports_missing_vars() {
        let dir = tempfile::tempdir().unwrap();
        let code = dir.path().join("code.fd");
        fs::write(&code, b"code").unwrap();
        let config = HarnessConfig {
            qemu: Some("sh".into()),
            fw_code: Some(code),
            fw_vars: Some(dir.path().join("vars.fd")),
            copy_shell: false,
            copy_artifact: false,
            ..HarnessConfig::default()
        };
        let env = resolve("x86_64", &config, dir.path());
        let err = env.check(Path::new("missing.efi"), &config).unwrap_err();
        match err.downcast_ref::<HarnessError>() {
            Some(HarnessError::MissingDependency { what, path }) => {
                assert_eq!(*what, "firmware vars");
                assert_eq!(path, &dir.path().join("vars.fd"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_check_missing_emulator() {
        let config = HarnessConfig {
            qemu: Some("definitely-not-an-emulator-binary".into()),
            ..HarnessConfig::default()
        };
        let env = resolve("x86_64", &config, Path::new("/nonexistent"));
        let err = env.check(Path::new("a.efi"), &config).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<HarnessError>(),
            Some(HarnessError::MissingEmulator(_))
        ));
    }
}
