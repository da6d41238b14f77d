//! CPU architecture naming.
//!
//! QEMU and the UEFI firmware disagree on what to call each CPU family:
//! QEMU wants `x86_64`/`aarch64` in its binary names, while firmware images,
//! boot loader paths and artifact names use the UEFI short codes (`x64`,
//! `aa64`, ...). Anything outside the table is passed through untouched.

/// A resolved architecture: the name QEMU uses and the UEFI firmware code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Arch {
    /// Emulator naming, e.g. `x86_64` in `qemu-system-x86_64`.
    pub emulator: String,
    /// UEFI firmware architecture code, e.g. `x64`.
    pub firmware: String,
}

impl Arch {
    /// Resolve `name`, falling back to the host architecture when `None`.
    pub fn resolve(name: Option<&str>) -> Self {
        let name = name.unwrap_or(host_arch());
        Arch {
            emulator: emulator_arch(name).to_string(),
            firmware: firmware_arch(name).to_string(),
        }
    }

    /// Replace the firmware code with an explicit override.
    pub fn with_firmware(mut self, firmware: Option<&str>) -> Self {
        if let Some(fw) = firmware {
            self.firmware = fw.to_string();
        }
        self
    }

    pub fn family(&self) -> Family {
        Family::from_firmware(&self.firmware)
    }
}

/// Supported CPU families, keyed by firmware code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    X64,
    Ia32,
    Arm,
    Aa64,
    Other,
}

impl Family {
    pub fn from_firmware(code: &str) -> Self {
        match code {
            "x64" => Family::X64,
            "ia32" => Family::Ia32,
            "arm" => Family::Arm,
            "aa64" => Family::Aa64,
            _ => Family::Other,
        }
    }
}

pub fn host_arch() -> &'static str {
    std::env::consts::ARCH
}

/// Map a CPU name to the UEFI firmware architecture code.
pub fn firmware_arch(name: &str) -> &str {
    match name {
        "x86_64" | "amd64" | "x64" => "x64",
        "i386" | "i486" | "i586" | "i686" | "x86" | "ia32" => "ia32",
        "arm" | "armv7" | "armv7l" | "armhf" => "arm",
        "aarch64" | "arm64" | "aa64" => "aa64",
        other => other,
    }
}

/// Map a CPU name to the suffix of the matching `qemu-system-*` binary.
pub fn emulator_arch(name: &str) -> &str {
    match name {
        "x86_64" | "amd64" | "x64" => "x86_64",
        "i386" | "i486" | "i586" | "i686" | "x86" | "ia32" => "i386",
        "arm" | "armv7" | "armv7l" | "armhf" => "arm",
        "aarch64" | "arm64" | "aa64" => "aarch64",
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_architectures() {
        assert_eq!(firmware_arch("x86_64"), "x64");
        assert_eq!(firmware_arch("i686"), "ia32");
        assert_eq!(firmware_arch("arm"), "arm");
        assert_eq!(firmware_arch("aarch64"), "aa64");

        assert_eq!(emulator_arch("x86_64"), "x86_64");
        assert_eq!(emulator_arch("i686"), "i386");
        assert_eq!(emulator_arch("arm64"), "aarch64");
    }

    #[test]
    fn test_x86_64_names_differ() {
        let arch = Arch::resolve(Some("x86_64"));
        assert_ne!(arch.emulator, arch.firmware);
        assert_eq!(arch.family(), Family::X64);
    }

    #[test]
    fn test_unknown_passes_through() {
        assert_eq!(firmware_arch("riscv64"), "riscv64");
        assert_eq!(emulator_arch("riscv64"), "riscv64");
        assert_eq!(Arch::resolve(Some("riscv64")).family(), Family::Other);
    }

    #[test]
    fn test_resolution_is_idempotent() {
        for name in ["x86_64", "i386", "armv7", "aarch64", "mips", ""] {
            let once = firmware_arch(name);
            assert_eq!(firmware_arch(once), once);
            let emu = emulator_arch(name);
            assert_eq!(emulator_arch(emu), emu);
        }
    }

    #[test]
    fn test_firmware_override_wins() {
        let arch = Arch::resolve(Some("x86_64")).with_firmware(Some("ia32"));
        assert_eq!(arch.firmware, "ia32");
        assert_eq!(arch.emulator, "x86_64");
    }

    #[test]
    fn test_host_default() {
        let arch = Arch::resolve(None);
        assert_eq!(arch.firmware, firmware_arch(host_arch()));
    }

    #[test]
    fn test_resolve_from_owned_name() {
        let name = String::from("arm64");
        let arch = Arch::resolve(Some(name.as_str()));
        drop(name);
        assert_eq!(arch.emulator, "aarch64");
        assert_eq!(arch.firmware, "aa64");
    }
}
