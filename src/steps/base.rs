use std::{collections::BTreeSet, fs, path::Path};

use console::style;
use dialoguer::Confirm;

use crate::{
    cmd::{self, Cmd},
    config::{Profile, PROFILE_FILE},
    error::SetupError,
    lsblk::{self, Role, STAGING_ROOT},
    session::{Context, CHROOT_MARKER},
    ui,
};

/// Where the installer copies itself inside the staging root.
const CHROOT_BINARY: &str = "/root/arch-setup";

// ── Base install ──────────────────────────────────────────────────────────────

/// Bootstraps the base system into the staging root, writes the fstab,
/// copies the installer in and re-executes it inside the chroot.
pub fn run(ctx: &mut Context) -> Result<(), SetupError> {
    let devices = lsblk::inventory();
    let packages = package_list(&ctx.profile, &lsblk::assigned_fstypes(&devices));

    let extra = ctx.profile.extra_packages().len();
    let extra_label = format!("{} package(s) from the profile", extra);
    ui::print_kv_box(
        "Base system",
        &[
            ("kernel", ctx.profile.kernel_package()),
            ("firmware", "linux-firmware"),
            ("extras", extra_label.as_str()),
        ],
    );
    println!();

    if !Confirm::new()
        .with_prompt("Proceed with base installation?")
        .default(true)
        .interact()?
    {
        return Err(SetupError::Cancelled);
    }

    println!();
    // pacstrap streams download progress — keep it interactive, but still
    // record the invocation in the session log.
    let pacstrap = Cmd::new("pacstrap")
        .arg(STAGING_ROOT)
        .args(packages.iter().cloned());
    ctx.log.command(&pacstrap.rendered());
    let code = pacstrap.interactive();
    if code != 0 {
        ctx.log.failure(&pacstrap.rendered(), code);
        ui::print_error(&format!("pacstrap failed with exit code {}.", code));
        return Err(SetupError::BaseInstall);
    }
    ui::print_success("Base system installed.");

    generate_fstab(ctx)?;
    copy_installer(ctx)?;
    enter_chroot(ctx)?;
    finish(ctx);
    Ok(())
}

/// Static requirements plus the utility package for every filesystem type
/// actually assigned in the mount plan.
fn package_list(profile: &Profile, fstypes: &BTreeSet<String>) -> Vec<String> {
    let mut packages = vec![
        "base".to_string(),
        profile.kernel_package().to_string(),
        "linux-firmware".to_string(),
    ];
    packages.extend(profile.extra_packages());
    for fstype in fstypes {
        if let Some(pkg) = utility_package(fstype) {
            if !packages.iter().any(|p| p == pkg) {
                packages.push(pkg.to_string());
            }
        }
    }
    packages
}

fn utility_package(fstype: &str) -> Option<&'static str> {
    match fstype {
        "ext2" | "ext3" | "ext4" => Some("e2fsprogs"),
        "vfat" | "fat32" => Some("dosfstools"),
        "btrfs" => Some("btrfs-progs"),
        "xfs" => Some("xfsprogs"),
        "ntfs" => Some("ntfs-3g"),
        "exfat" => Some("exfatprogs"),
        "f2fs" => Some("f2fs-tools"),
        _ => None,
    }
}

// ── fstab ─────────────────────────────────────────────────────────────────────

/// `genfstab -U /mnt >> /mnt/etc/fstab`, with the pkgcache mount taken out
/// of the picture first so it isn't captured as a permanent entry, then put
/// back if it was verified and enabled.
fn generate_fstab(ctx: &mut Context) -> Result<(), SetupError> {
    let plan = lsblk::mount_state();
    let cache_device = plan.device_for(&Role::PkgCache).map(str::to_string);
    let cache_target = format!("{}/pkgcache", STAGING_ROOT);

    if cache_device.is_some() {
        ctx.log.note("unmounting pkgcache before fstab generation");
        cmd::best_effort("umount", &[cache_target.as_str()]);
    }

    fs::create_dir_all(format!("{}/etc", STAGING_ROOT))?;

    let pb = ui::spinner("Generating /mnt/etc/fstab (UUID-based)…");
    let code = Cmd::new("genfstab")
        .args(["-U", STAGING_ROOT])
        .append_to(Path::new("/mnt/etc/fstab"), &ctx.log);
    pb.finish_and_clear();

    if code != 0 {
        ui::print_error(&format!("genfstab failed with exit code {}.", code));
        return Err(SetupError::BaseInstall);
    }
    ui::print_success("fstab written to /mnt/etc/fstab.");

    if let Some(device) = cache_device {
        if ctx.pkgcache_enabled {
            let remount = Cmd::new("mount").arg(&device).arg(&cache_target);
            if remount.logged(&ctx.log) == 0 {
                ui::print_success("Package cache remounted.");
            } else {
                ui::print_warning("Could not remount the package cache — continuing without it.");
                ctx.pkgcache_enabled = false;
            }
        }
    }
    Ok(())
}

// ── Handoff ───────────────────────────────────────────────────────────────────

/// Copies the running binary and its profile into the staging root and
/// drops the marker the chroot phase detects itself by.
fn copy_installer(ctx: &Context) -> Result<(), SetupError> {
    let root_home = format!("{}/root", STAGING_ROOT);
    fs::create_dir_all(&root_home)?;

    let exe = std::env::current_exe()?;
    fs::copy(&exe, format!("{}{}", STAGING_ROOT, CHROOT_BINARY))?;

    match Profile::locate() {
        Some(profile) => {
            fs::copy(profile, format!("{}/{}", root_home, PROFILE_FILE))?;
        }
        None => ui::print_warning("Install profile not found for copying — chroot phase will abort."),
    }

    fs::write(format!("{}{}", STAGING_ROOT, CHROOT_MARKER), "handoff\n")?;
    ctx.log.note("installer and profile copied into the staging root");
    Ok(())
}

/// Re-executes the installer inside the new system. The captured MBR GRUB
/// device travels as the single positional argument.
fn enter_chroot(ctx: &mut Context) -> Result<(), SetupError> {
    println!();
    ui::print_info("Entering the new system to finish configuration…");
    println!("{}", style("─".repeat(52)).dim());
    println!();

    let mut chroot = Cmd::new("arch-chroot").arg(STAGING_ROOT).arg(CHROOT_BINARY);
    if let Some(device) = ctx.grub_device() {
        chroot = chroot.arg(device);
    }
    ctx.log.command(&chroot.rendered());
    let code = chroot.interactive();

    println!();
    println!("{}", style("─".repeat(52)).dim());
    if code == 0 {
        ui::print_success("Chroot phase completed.");
    } else {
        ctx.log.failure(&chroot.rendered(), code);
        ui::print_warning(&format!(
            "Chroot phase exited with code {} — check the logs inside the new system.",
            code
        ));
    }
    Ok(())
}

fn finish(ctx: &Context) {
    let dest = Path::new(STAGING_ROOT).join("var/log/arch-setup-live.log");
    if ctx.log.relocate(&dest).is_ok() {
        ui::print_info(&format!("Session log archived at {}.", dest.display()));
    }

    println!();
    ui::print_kv_box(
        "All done",
        &[
            ("unmount", "umount -R /mnt"),
            ("swap off", "swapoff -a"),
            ("reboot", "reboot"),
        ],
    );
    println!();
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn types(list: &[&str]) -> BTreeSet<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn base_list_tracks_the_kernel_choice() {
        let mut profile = Profile::default();
        let packages = package_list(&profile, &BTreeSet::new());
        assert_eq!(packages, ["base", "linux", "linux-firmware"]);

        profile.use_lts_kernel = true;
        let packages = package_list(&profile, &BTreeSet::new());
        assert!(packages.contains(&"linux-lts".to_string()));
    }

    #[test]
    fn xfsprogs_is_included_only_when_xfs_is_assigned() {
        let profile = Profile::default();
        let with = package_list(&profile, &types(&["ext4", "xfs"]));
        assert!(with.contains(&"xfsprogs".to_string()));
        assert!(with.contains(&"e2fsprogs".to_string()));

        let without = package_list(&profile, &types(&["ext4"]));
        assert!(!without.contains(&"xfsprogs".to_string()));
    }

    #[test]
    fn profile_extras_ride_along_without_duplicates() {
        let mut profile = Profile::default();
        profile.base_pkgs = "vim htop e2fsprogs".to_string();
        let packages = package_list(&profile, &types(&["ext4"]));
        assert!(packages.contains(&"vim".to_string()));
        assert_eq!(packages.iter().filter(|p| *p == "e2fsprogs").count(), 1);
    }

    #[test]
    fn swap_needs_no_utility_package() {
        assert_eq!(utility_package("swap"), None);
        assert_eq!(utility_package("vfat"), Some("dosfstools"));
    }
}
