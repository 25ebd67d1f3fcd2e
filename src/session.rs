use std::path::Path;

use crate::{config::Profile, error::SetupError, logger::Logger, textfile};

/// Marker dropped next to the binary when it is copied into the staging
/// root; its presence tells a fresh invocation it is running post-chroot.
pub const CHROOT_MARKER: &str = "/root/.arch-setup-chroot";

/// Hostname of the supported live environment.
pub const LIVE_HOSTNAME: &str = "archiso";

// ── Boot environment ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootMode {
    Bios,
    Uefi,
}

impl BootMode {
    /// Detected once at process start from the EFI variable tree.
    pub fn detect() -> Self {
        if Path::new("/sys/firmware/efi/efivars").exists() {
            BootMode::Uefi
        } else {
            BootMode::Bios
        }
    }

    pub fn is_uefi(self) -> bool {
        self == BootMode::Uefi
    }

    pub fn label(self) -> &'static str {
        match self {
            BootMode::Bios => "BIOS/CSM",
            BootMode::Uefi => "UEFI",
        }
    }
}

/// Which half of the installation this process is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Live,
    Chroot,
}

/// Live when the hostname sentinel names the live ISO; chroot when the
/// handoff marker exists. Anything else is the wrong machine.
pub fn detect_phase() -> Result<Phase, SetupError> {
    let hostname = textfile::read_first_line("/etc/hostname");
    phase_from(hostname.as_deref(), Path::new(CHROOT_MARKER).exists())
        .ok_or(SetupError::WrongEnvironment)
}

fn phase_from(hostname: Option<&str>, marker_exists: bool) -> Option<Phase> {
    if hostname == Some(LIVE_HOSTNAME) {
        Some(Phase::Live)
    } else if marker_exists {
        Some(Phase::Chroot)
    } else {
        None
    }
}

// ── Command-line flags ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct Flags {
    /// Skip the initial confirmation and clear any stale session log.
    pub debug: bool,
    /// Leave the mirrorlist as the live environment shipped it.
    pub skip_mirrorlist: bool,
    /// MBR GRUB device, passed positionally on the chroot re-invocation.
    pub grub_device_arg: Option<String>,
}

// ── Session context ───────────────────────────────────────────────────────────

/// Everything the menus and steps share, passed by `&mut` instead of living
/// in globals: the install profile, the session log, detected boot facts and
/// the state the Mounting Menu accumulates for the later steps.
#[derive(Debug)]
pub struct Context {
    pub profile: Profile,
    pub log: Logger,
    pub boot_mode: BootMode,
    pub flags: Flags,
    /// Whether a verified pkgcache mount redirected pacman's cache.
    pub pkgcache_enabled: bool,
    grub_device: Option<String>,
}

impl Context {
    pub fn new(profile: Profile, log: Logger, boot_mode: BootMode, flags: Flags) -> Self {
        let grub_device = flags.grub_device_arg.clone();
        Context {
            profile,
            log,
            boot_mode,
            flags,
            pkgcache_enabled: false,
            grub_device,
        }
    }

    /// Records the whole-disk MBR GRUB target from a just-mounted root or
    /// boot partition. Set at most once, and only in BIOS/CSM mode.
    pub fn capture_grub_device(&mut self, partition: &str) {
        if self.boot_mode.is_uefi() || self.grub_device.is_some() {
            return;
        }
        let disk = whole_disk(partition);
        self.log
            .note(&format!("MBR GRUB target captured: {}", disk));
        self.grub_device = Some(disk);
    }

    pub fn grub_device(&self) -> Option<&str> {
        self.grub_device.as_deref()
    }
}

// ── Device-name helpers ───────────────────────────────────────────────────────

/// Strips the partition designator from a partition path:
/// `/dev/sda2` → `/dev/sda`, `/dev/nvme0n1p2` → `/dev/nvme0n1`.
pub fn whole_disk(partition: &str) -> String {
    let trimmed = partition.trim_end_matches(|c: char| c.is_ascii_digit());
    if trimmed.len() < partition.len() {
        // nvme/mmcblk style: the digit block was preceded by a 'p' separator.
        if let Some(stem) = trimmed.strip_suffix('p') {
            if stem.ends_with(|c: char| c.is_ascii_digit()) {
                return stem.to_string();
            }
        }
    }
    trimmed.to_string()
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn context(boot_mode: BootMode) -> Context {
        let dir = tempfile::tempdir().unwrap();
        Context::new(
            Profile::default(),
            Logger::new(dir.path().join("setup.log")),
            boot_mode,
            Flags::default(),
        )
    }

    #[test]
    fn whole_disk_strips_simple_partition_numbers() {
        assert_eq!(whole_disk("/dev/sda2"), "/dev/sda");
        assert_eq!(whole_disk("/dev/vdb12"), "/dev/vdb");
        assert_eq!(whole_disk("/dev/sda"), "/dev/sda");
    }

    #[test]
    fn whole_disk_handles_nvme_and_mmc_designators() {
        assert_eq!(whole_disk("/dev/nvme0n1p2"), "/dev/nvme0n1");
        assert_eq!(whole_disk("/dev/mmcblk0p1"), "/dev/mmcblk0");
    }

    #[test]
    fn grub_device_is_captured_once_in_bios_mode() {
        let mut ctx = context(BootMode::Bios);
        ctx.capture_grub_device("/dev/sda2");
        ctx.capture_grub_device("/dev/sdb1");
        assert_eq!(ctx.grub_device(), Some("/dev/sda"));
    }

    #[test]
    fn grub_device_is_never_captured_on_uefi() {
        let mut ctx = context(BootMode::Uefi);
        ctx.capture_grub_device("/dev/sda2");
        assert_eq!(ctx.grub_device(), None);
    }

    #[test]
    fn chroot_argument_seeds_the_grub_device() {
        let dir = tempfile::tempdir().unwrap();
        let flags = Flags {
            grub_device_arg: Some("/dev/sda".into()),
            ..Flags::default()
        };
        let ctx = Context::new(
            Profile::default(),
            Logger::new(dir.path().join("setup.log")),
            BootMode::Bios,
            flags,
        );
        assert_eq!(ctx.grub_device(), Some("/dev/sda"));
    }

    #[test]
    fn phase_follows_the_hostname_sentinel() {
        assert_eq!(phase_from(Some("archiso"), false), Some(Phase::Live));
        assert_eq!(phase_from(None, true), Some(Phase::Chroot));
        assert_eq!(phase_from(Some("desktop"), true), Some(Phase::Chroot));
        assert_eq!(phase_from(Some("desktop"), false), None);
        assert_eq!(phase_from(None, false), None);
    }
}
