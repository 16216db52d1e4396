//! Hardware platform and CPU architecture detection.
//!
//! The boot loader variant is chosen from the hardware platform family, not
//! from the CPU alone: an x86_64 machine booted through UEFI needs a
//! different loader than the same machine booted through BIOS, and IBM Power
//! systems differ by firmware. Detection reads a handful of firmware and CPU
//! markers from `/sys` and `/proc`; the root of those files is configurable
//! so detection can be exercised against a fixture tree.

use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use strum::EnumString;
use tracing::debug;

/// Hardware platform family.
#[derive(Debug, Clone, PartialEq, Eq, Hash, EnumString)]
#[strum(ascii_case_insensitive)]
pub enum PlatformType {
    /// x86 machine booted through BIOS.
    X86,
    /// Machine booted through UEFI.
    Efi,
    /// Apple hardware booted through UEFI.
    MacEfi,
    /// Generic PowerPC machine.
    Ppc,
    /// IBM Power Systems (pSeries) PowerPC machine.
    IpSeriesPpc,
    /// PowerPC machine running OPAL/petitboot firmware.
    PowerNv,
    /// IBM Z.
    S390,
    /// 32-bit ARM board without UEFI.
    Arm,
    /// 32-bit ARM machine booted through UEFI.
    ArmEfi,
    /// 64-bit ARM machine booted through UEFI.
    Aarch64Efi,
    /// Hardware without a known boot loader.
    #[strum(disabled)]
    Unsupported(String),
}

impl std::fmt::Display for PlatformType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::X86 => f.write_str("X86"),
            Self::Efi => f.write_str("EFI"),
            Self::MacEfi => f.write_str("MacEFI"),
            Self::Ppc => f.write_str("PPC"),
            Self::IpSeriesPpc => f.write_str("IPSeriesPPC"),
            Self::PowerNv => f.write_str("PowerNV"),
            Self::S390 => f.write_str("S390"),
            Self::Arm => f.write_str("ARM"),
            Self::ArmEfi => f.write_str("ArmEFI"),
            Self::Aarch64Efi => f.write_str("Aarch64EFI"),
            Self::Unsupported(arch) => write!(f, "unsupported ({})", arch),
        }
    }
}

/// CPU architecture of the machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Arch {
    X86_64,
    I686,
    Ppc64,
    Ppc64le,
    S390x,
    Aarch64,
    Arm,
    Other(String),
}

impl std::fmt::Display for Arch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::X86_64 => f.write_str("x86_64"),
            Self::I686 => f.write_str("i686"),
            Self::Ppc64 => f.write_str("ppc64"),
            Self::Ppc64le => f.write_str("ppc64le"),
            Self::S390x => f.write_str("s390x"),
            Self::Aarch64 => f.write_str("aarch64"),
            Self::Arm => f.write_str("arm"),
            Self::Other(name) => f.write_str(name),
        }
    }
}

impl Arch {
    /// Maps a Rust/uname architecture name to an `Arch`.
    pub fn from_name(name: &str) -> Self {
        match name {
            "x86_64" => Self::X86_64,
            "x86" | "i386" | "i486" | "i586" | "i686" => Self::I686,
            "powerpc64" | "ppc64" => Self::Ppc64,
            "ppc64le" => Self::Ppc64le,
            "s390x" => Self::S390x,
            "aarch64" => Self::Aarch64,
            "arm" | "armv7l" | "armv7hl" => Self::Arm,
            other => Self::Other(other.to_string()),
        }
    }

    /// Returns the architecture this binary was compiled for.
    pub fn host() -> Self {
        Self::from_name(std::env::consts::ARCH)
    }

    /// Returns true for IBM Z.
    pub fn is_s390(&self) -> bool {
        matches!(self, Self::S390x)
    }

    /// Returns true for 32- and 64-bit PowerPC.
    pub fn is_ppc(&self) -> bool {
        matches!(self, Self::Ppc64 | Self::Ppc64le)
    }

    /// Returns true for 32- and 64-bit x86.
    pub fn is_x86(&self) -> bool {
        matches!(self, Self::X86_64 | Self::I686)
    }
}

/// Source of the detected hardware platform.
pub trait PlatformDetector {
    /// Detects the platform family of the running machine.
    fn detect(&self) -> PlatformType;
}

/// A detector that always reports the same platform.
#[derive(Debug, Clone)]
pub struct FixedPlatform(pub PlatformType);

impl PlatformDetector for FixedPlatform {
    fn detect(&self) -> PlatformType {
        self.0.clone()
    }
}

/// Detects the platform from the running host's firmware markers.
#[derive(Debug, Clone)]
pub struct HostPlatformDetector {
    root: Utf8PathBuf,
    arch: Arch,
}

impl Default for HostPlatformDetector {
    fn default() -> Self {
        Self::new("/", Arch::host())
    }
}

impl HostPlatformDetector {
    /// Creates a detector reading `/sys` and `/proc` below `root`.
    pub fn new(root: impl Into<Utf8PathBuf>, arch: Arch) -> Self {
        Self {
            root: root.into(),
            arch,
        }
    }

    fn path(&self, relative: &str) -> Utf8PathBuf {
        self.root.join(relative.trim_start_matches('/'))
    }

    fn is_efi(&self) -> bool {
        self.path("/sys/firmware/efi").exists()
    }

    fn is_mac(&self) -> bool {
        read_trimmed(&self.path("/sys/class/dmi/id/sys_vendor"))
            .is_some_and(|vendor| vendor.starts_with("Apple"))
    }

    /// Returns the value of the `platform` line in `/proc/cpuinfo`.
    fn ppc_machine(&self) -> Option<String> {
        let cpuinfo = fs::read_to_string(self.path("/proc/cpuinfo")).ok()?;
        cpuinfo.lines().find_map(|line| {
            let (key, value) = line.split_once(':')?;
            (key.trim() == "platform").then(|| value.trim().to_string())
        })
    }
}

impl PlatformDetector for HostPlatformDetector {
    fn detect(&self) -> PlatformType {
        let efi = self.is_efi();
        let platform = match &self.arch {
            Arch::S390x => PlatformType::S390,
            arch if arch.is_ppc() => match self.ppc_machine().as_deref() {
                Some("PowerNV") => PlatformType::PowerNv,
                Some("pSeries") => PlatformType::IpSeriesPpc,
                _ => PlatformType::Ppc,
            },
            // 64-bit ARM servers only boot through UEFI.
            Arch::Aarch64 => PlatformType::Aarch64Efi,
            Arch::Arm if efi => PlatformType::ArmEfi,
            Arch::Arm => PlatformType::Arm,
            arch if arch.is_x86() && efi && self.is_mac() => PlatformType::MacEfi,
            arch if arch.is_x86() && efi => PlatformType::Efi,
            arch if arch.is_x86() => PlatformType::X86,
            arch => PlatformType::Unsupported(arch.to_string()),
        };
        debug!(arch = %self.arch, efi, "detected platform: {:?}", platform);
        platform
    }
}

fn read_trimmed(path: &Utf8Path) -> Option<String> {
    fs::read_to_string(path).ok().map(|s| s.trim().to_string())
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    fn fixture() -> (tempfile::TempDir, Utf8PathBuf) {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf())
            .expect("path should be valid UTF-8");
        (dir, root)
    }

    fn write(root: &Utf8Path, relative: &str, content: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_x86_bios() {
        let (_dir, root) = fixture();
        let detector = HostPlatformDetector::new(root, Arch::X86_64);
        assert_eq!(detector.detect(), PlatformType::X86);
    }

    #[test]
    fn test_x86_efi_and_mac() {
        let (_dir, root) = fixture();
        fs::create_dir_all(root.join("sys/firmware/efi")).unwrap();
        let detector = HostPlatformDetector::new(root.clone(), Arch::X86_64);
        assert_eq!(detector.detect(), PlatformType::Efi);

        write(&root, "sys/class/dmi/id/sys_vendor", "Apple Inc.\n");
        assert_eq!(detector.detect(), PlatformType::MacEfi);
    }

    #[test]
    fn test_ppc_machines() {
        let (_dir, root) = fixture();
        let detector = HostPlatformDetector::new(root.clone(), Arch::Ppc64le);
        assert_eq!(detector.detect(), PlatformType::Ppc);

        write(&root, "proc/cpuinfo", "processor\t: 0\nplatform\t: PowerNV\n");
        assert_eq!(detector.detect(), PlatformType::PowerNv);

        write(&root, "proc/cpuinfo", "processor\t: 0\nplatform\t: pSeries\n");
        assert_eq!(detector.detect(), PlatformType::IpSeriesPpc);
    }

    #[test]
    fn test_arm_variants() {
        let (_dir, root) = fixture();
        let arm = HostPlatformDetector::new(root.clone(), Arch::Arm);
        assert_eq!(arm.detect(), PlatformType::Arm);

        fs::create_dir_all(root.join("sys/firmware/efi")).unwrap();
        assert_eq!(arm.detect(), PlatformType::ArmEfi);

        let aarch64 = HostPlatformDetector::new(root, Arch::Aarch64);
        assert_eq!(aarch64.detect(), PlatformType::Aarch64Efi);
    }

    #[test]
    fn test_s390_and_unsupported() {
        let (_dir, root) = fixture();
        assert_eq!(
            HostPlatformDetector::new(root.clone(), Arch::S390x).detect(),
            PlatformType::S390
        );
        assert_eq!(
            HostPlatformDetector::new(root, Arch::from_name("riscv64")).detect(),
            PlatformType::Unsupported("riscv64".to_string())
        );
    }

    #[test]
    fn test_arch_from_name() {
        assert_eq!(Arch::from_name("s390x"), Arch::S390x);
        assert!(Arch::from_name("s390x").is_s390());
        assert!(!Arch::from_name("x86_64").is_s390());
        assert_eq!(Arch::from_name("i686"), Arch::I686);
        assert_eq!(Arch::from_name("riscv64").to_string(), "riscv64");
        assert_eq!(Arch::X86_64.to_string(), "x86_64");
    }

    #[test]
    fn test_platform_type_from_str() {
        assert_eq!(PlatformType::from_str("powernv").unwrap(), PlatformType::PowerNv);
        assert_eq!(PlatformType::from_str("S390").unwrap(), PlatformType::S390);
        assert!(PlatformType::from_str("riscv").is_err());
    }
}
