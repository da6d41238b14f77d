//! Boot drive builder.
//!
//! The emulator exposes a host directory to the guest as a FAT volume
//! (`-drive file=fat:rw:<dir>`). This module lays that directory out:
//!
//! ```text
//! <drive>/
//!   EFI/BOOT/BOOT<FW>.EFI   UEFI shell, started by the firmware
//!   startup.nsh             run by the shell on boot
//!   <artifact>.efi          program under test
//! ```
//!
//! The generated `startup.nsh` brackets everything it prints in tags so the
//! log can be split back into firmware info, program output and the
//! program's own status afterwards.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info};

pub const STARTUP_SCRIPT: &str = "startup.nsh";

/// How the drive is assembled. Each flag is independent.
#[derive(Debug, Clone)]
pub struct DriveOptions {
    /// Delete an existing drive directory first.
    pub remove_existing: bool,
    /// Copy the artifact to the drive root.
    pub copy_artifact: bool,
    /// Copy the shell to the boot path.
    pub copy_shell: bool,
    /// Use this script verbatim instead of generating one.
    pub script: Option<PathBuf>,
}

/// A built drive directory.
#[derive(Debug)]
pub struct Drive {
    pub root: PathBuf,
}

impl Drive {
    pub fn startup_script(&self) -> PathBuf {
        self.root.join(STARTUP_SCRIPT)
    }
}

pub struct DriveBuilder<'a> {
    root: PathBuf,
    artifact: &'a Path,
    shell: &'a Path,
    boot_path: PathBuf,
    options: DriveOptions,
}

impl<'a> DriveBuilder<'a> {
    pub fn new(
        root: impl Into<PathBuf>,
        artifact: &'a Path,
        shell: &'a Path,
        boot_path: PathBuf,
        options: DriveOptions,
    ) -> Self {
        Self {
            root: root.into(),
            artifact,
            shell,
            boot_path,
            options,
        }
    }

    pub fn build(self) -> Result<Drive> {
        let root = self.root;
        if self.options.remove_existing && root.exists() {
            debug!(path = %root.display(), "removing existing drive");
            fs::remove_dir_all(&root)
                .with_context(|| format!("Failed to remove drive {}", root.display()))?;
        }

        let boot_file = root.join(&self.boot_path);
        if let Some(boot_dir) = boot_file.parent() {
            fs::create_dir_all(boot_dir)
                .with_context(|| format!("Failed to create {}", boot_dir.display()))?;
        }

        let artifact_name = file_name(self.artifact)?;

        if self.options.copy_artifact {
            copy(self.artifact, &root.join(&artifact_name))?;
        }
        if self.options.copy_shell {
            copy(self.shell, &boot_file)?;
        }

        let script_path = root.join(STARTUP_SCRIPT);
        match &self.options.script {
            Some(script) => copy(script, &script_path)?,
            None => fs::write(&script_path, startup_script(&artifact_name))
                .with_context(|| format!("Failed to write {}", script_path.display()))?,
        }

        info!(path = %root.display(), "drive ready");
        Ok(Drive { root })
    }
}

fn file_name(path: &Path) -> Result<String> {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .with_context(|| format!("Artifact path {} has no file name", path.display()))
}

fn copy(from: &Path, to: &Path) -> Result<()> {
    fs::copy(from, to)
        .with_context(|| format!("Failed to copy {} to {}", from.display(), to.display()))?;
    Ok(())
}

/// Generate the shell script that runs `artifact` from the drive root.
pub fn startup_script(artifact: &str) -> String {
    let lines = [
        "@echo -off".to_string(),
        r#"echo "<uefiver>%uefiversion%</uefiver>""#.to_string(),
        r#"echo "<shellver>%uefishellversion%</shellver>""#.to_string(),
        r#"echo "<ver>""#.to_string(),
        "ver".to_string(),
        r#"echo "</ver>""#.to_string(),
        r#"echo -n "<cmd>""#.to_string(),
        format!(r"fs0:\{artifact}"),
        r#"echo -n "</cmd><cres>%lasterror%</cres>""#.to_string(),
        "reset -s".to_string(),
    ];
    let mut script = lines.join("\r\n");
    script.push_str("\r\n");
    script
}
