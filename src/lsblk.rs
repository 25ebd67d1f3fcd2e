use std::collections::{BTreeSet, HashMap};

use crate::cmd::Cmd;

/// Mount point under which the new system is assembled before the chroot
/// handoff.
pub const STAGING_ROOT: &str = "/mnt";

// ── Data types ────────────────────────────────────────────────────────────────

/// One parsed block-device entry from the live inventory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceLine {
    pub path: String,              // /dev/sda1
    pub dev_type: String,          // disk | part
    pub fstype: Option<String>,    // ext4, vfat, swap, …
    pub mountpoint: Option<String>,
    pub swap: bool,
}

/// Canonical purpose assigned to a partition during mounting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    Root,
    Efi,
    Boot,
    Home,
    PkgCache,
    Swap,
    /// Operator-defined mount point, relative to the staging root.
    Other(String),
}

impl Role {
    /// Mount point relative to the staging root. Swap has none.
    pub fn mount_point(&self) -> Option<String> {
        match self {
            Role::Root => Some("/".into()),
            Role::Efi => Some("/efi".into()),
            Role::Boot => Some("/boot".into()),
            Role::Home => Some("/home".into()),
            Role::PkgCache => Some("/pkgcache".into()),
            Role::Swap => None,
            Role::Other(path) => Some(path.clone()),
        }
    }

    pub fn label(&self) -> &str {
        match self {
            Role::Root => "root",
            Role::Efi => "efi",
            Role::Boot => "boot",
            Role::Home => "home",
            Role::PkgCache => "pkgcache",
            Role::Swap => "swap",
            Role::Other(path) => path,
        }
    }

    /// Maps a mount point (relative to the staging root) back to its role.
    fn from_mount_point(rel: &str) -> Role {
        match rel {
            "" | "/" => Role::Root,
            "/efi" => Role::Efi,
            "/boot" => Role::Boot,
            "/home" => Role::Home,
            "/pkgcache" => Role::PkgCache,
            other => Role::Other(other.to_string()),
        }
    }
}

// ── Mount plan ────────────────────────────────────────────────────────────────

/// The accumulated role→device record for the current session. Derived
/// fresh from the live inventory on every menu render — never cached — so
/// it always reflects the true kernel state, including mounts the operator
/// just made by hand.
#[derive(Debug, Clone, Default)]
pub struct MountPlan {
    assignments: Vec<(Role, String)>,
}

impl MountPlan {
    pub fn from_devices(devices: &[DeviceLine]) -> Self {
        let mut plan = MountPlan::default();
        for dev in devices {
            if dev.swap {
                plan.assign(Role::Swap, &dev.path);
                continue;
            }
            let Some(mp) = dev.mountpoint.as_deref() else { continue };
            let rel = match mp.strip_prefix(STAGING_ROOT) {
                Some(rel) => rel,
                None => continue, // live-environment mount, not ours
            };
            plan.assign(Role::from_mount_point(rel), &dev.path);
        }
        plan
    }

    /// First assignment wins; at most one device per role.
    fn assign(&mut self, role: Role, device: &str) {
        if self.device_for(&role).is_none() {
            self.assignments.push((role, device.to_string()));
        }
    }

    pub fn device_for(&self, role: &Role) -> Option<&str> {
        self.assignments
            .iter()
            .find(|(r, _)| r == role)
            .map(|(_, dev)| dev.as_str())
    }

    pub fn root(&self) -> Option<&str> {
        self.device_for(&Role::Root)
    }

    pub fn efi(&self) -> Option<&str> {
        self.device_for(&Role::Efi)
    }

    /// Operator-defined mount points in assignment order.
    pub fn others(&self) -> impl Iterator<Item = (&str, &str)> {
        self.assignments.iter().filter_map(|(role, dev)| match role {
            Role::Other(path) => Some((path.as_str(), dev.as_str())),
            _ => None,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }
}

// ── Inventory queries ─────────────────────────────────────────────────────────

/// The live block-device tree, loopback and optical drives filtered out.
pub fn inventory() -> Vec<DeviceLine> {
    let output = Cmd::new("lsblk")
        .args(["--pairs", "--output", "NAME,TYPE,FSTYPE,MOUNTPOINT"])
        .read();
    parse_inventory(&output)
}

/// Current mount state as a role mapping. Re-invoked on every menu render.
pub fn mount_state() -> MountPlan {
    MountPlan::from_devices(&inventory())
}

/// Partitions the Mounting Menu may offer for assignment: not mounted
/// anywhere and not already active as swap.
pub fn unmounted_candidates(devices: &[DeviceLine]) -> Vec<&DeviceLine> {
    devices
        .iter()
        .filter(|d| d.dev_type == "part" && d.mountpoint.is_none() && !d.swap)
        .collect()
}

/// Filesystem types in use by devices assigned to the staging root (or
/// swap). Drives the conditional utility-package list at base install.
pub fn assigned_fstypes(devices: &[DeviceLine]) -> BTreeSet<String> {
    devices
        .iter()
        .filter(|d| {
            d.swap
                || d.mountpoint.as_deref().is_some_and(|mp| {
                    mp == STAGING_ROOT
                        || mp
                            .strip_prefix(STAGING_ROOT)
                            .is_some_and(|rel| rel.starts_with('/'))
                })
        })
        .filter_map(|d| d.fstype.clone())
        .collect()
}

// ── lsblk --pairs parser ──────────────────────────────────────────────────────
//
// Each line looks like:   NAME="sda1" TYPE="part" FSTYPE="ext4" MOUNTPOINT="/mnt"

fn parse_inventory(output: &str) -> Vec<DeviceLine> {
    output
        .lines()
        .filter_map(|line| {
            let m = parse_pairs(line);
            let dev_type = m.get("TYPE").cloned().unwrap_or_default();
            if dev_type.is_empty() || dev_type == "loop" || dev_type == "rom" {
                return None;
            }
            let name = m.get("NAME").map(String::as_str).unwrap_or("");
            if name.is_empty() {
                return None;
            }
            let raw_mp = m.get("MOUNTPOINT").filter(|s| !s.is_empty()).cloned();
            let swap = raw_mp.as_deref() == Some("[SWAP]");
            Some(DeviceLine {
                path: format!("/dev/{}", name),
                dev_type,
                fstype: m.get("FSTYPE").filter(|s| !s.is_empty()).cloned(),
                mountpoint: if swap { None } else { raw_mp },
                swap,
            })
        })
        .collect()
}

fn parse_pairs(line: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    let mut rest = line.trim();

    while !rest.is_empty() {
        let Some(eq) = rest.find('=') else { break };
        let key = rest[..eq].split_whitespace().last().unwrap_or("").to_string();
        rest = &rest[eq + 1..];

        if !rest.starts_with('"') {
            break;
        }
        rest = &rest[1..]; // skip opening "

        let Some(close) = rest.find('"') else { break };
        let value = rest[..close].to_string();
        rest = &rest[close + 1..]; // skip closing "

        if !key.is_empty() {
            map.insert(key, value);
        }
    }

    map
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"NAME="loop0" TYPE="loop" FSTYPE="squashfs" MOUNTPOINT="/run/archiso/airootfs"
NAME="sr0" TYPE="rom" FSTYPE="iso9660" MOUNTPOINT=""
NAME="sda" TYPE="disk" FSTYPE="" MOUNTPOINT=""
NAME="sda1" TYPE="part" FSTYPE="ext4" MOUNTPOINT="/mnt/boot"
NAME="sda2" TYPE="part" FSTYPE="ext4" MOUNTPOINT="/mnt"
NAME="sda3" TYPE="part" FSTYPE="swap" MOUNTPOINT="[SWAP]"
NAME="sdb1" TYPE="part" FSTYPE="xfs" MOUNTPOINT=""
NAME="sdb2" TYPE="part" FSTYPE="ext4" MOUNTPOINT="/mnt/srv/data"
"#;

    #[test]
    fn parser_skips_loop_and_optical_devices() {
        let devices = parse_inventory(SAMPLE);
        assert!(devices.iter().all(|d| d.dev_type != "loop" && d.dev_type != "rom"));
        assert_eq!(devices.len(), 6);
    }

    #[test]
    fn swap_entries_carry_the_flag_not_a_mountpoint() {
        let devices = parse_inventory(SAMPLE);
        let swap = devices.iter().find(|d| d.path == "/dev/sda3").unwrap();
        assert!(swap.swap);
        assert_eq!(swap.mountpoint, None);
    }

    #[test]
    fn plan_classifies_root_boot_swap_and_other() {
        let plan = MountPlan::from_devices(&parse_inventory(SAMPLE));
        assert_eq!(plan.root(), Some("/dev/sda2"));
        assert_eq!(plan.device_for(&Role::Boot), Some("/dev/sda1"));
        assert_eq!(plan.device_for(&Role::Swap), Some("/dev/sda3"));
        assert_eq!(plan.efi(), None);
        let others: Vec<_> = plan.others().collect();
        assert_eq!(others, [("/srv/data", "/dev/sdb2")]);
    }

    #[test]
    fn live_environment_mounts_are_not_part_of_the_plan() {
        let devices = parse_inventory(
            r#"NAME="sda1" TYPE="part" FSTYPE="ext4" MOUNTPOINT="/run/media/usb""#,
        );
        assert!(MountPlan::from_devices(&devices).is_empty());
    }

    #[test]
    fn at_most_one_device_holds_root() {
        let devices = vec![
            DeviceLine {
                path: "/dev/sda2".into(),
                dev_type: "part".into(),
                fstype: Some("ext4".into()),
                mountpoint: Some("/mnt".into()),
                swap: false,
            },
            DeviceLine {
                path: "/dev/sdb1".into(),
                dev_type: "part".into(),
                fstype: Some("btrfs".into()),
                mountpoint: Some("/mnt".into()),
                swap: false,
            },
        ];
        let plan = MountPlan::from_devices(&devices);
        assert_eq!(plan.root(), Some("/dev/sda2"));
    }

    #[test]
    fn candidates_are_unmounted_non_swap_partitions() {
        let devices = parse_inventory(SAMPLE);
        let names: Vec<_> = unmounted_candidates(&devices)
            .iter()
            .map(|d| d.path.as_str())
            .collect();
        assert_eq!(names, ["/dev/sdb1"]);
    }

    #[test]
    fn fstypes_cover_assigned_devices_only() {
        let types = assigned_fstypes(&parse_inventory(SAMPLE));
        let expected: BTreeSet<String> =
            ["ext4", "swap"].iter().map(|s| s.to_string()).collect();
        assert_eq!(types, expected);
    }

    #[test]
    fn efi_mount_point_maps_to_the_efi_role() {
        let devices = parse_inventory(
            r#"NAME="nvme0n1p1" TYPE="part" FSTYPE="vfat" MOUNTPOINT="/mnt/efi""#,
        );
        let plan = MountPlan::from_devices(&devices);
        assert_eq!(plan.efi(), Some("/dev/nvme0n1p1"));
    }
}
