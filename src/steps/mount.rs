use std::{
    fs, io,
    path::Path,
    thread,
    time::Duration,
};

use console::style;
use dialoguer::{Confirm, Input, Select};

use crate::{
    cmd::{self, Cmd},
    error::SetupError,
    lsblk::{self, MountPlan, Role, STAGING_ROOT},
    session::Context,
    textfile::{self, PatchOutcome},
    ui,
};

/// Live environment's pacman configuration; a verified pkgcache mount
/// redirects its CacheDir so downloaded packages land on the new disk.
const PACMAN_CONF: &str = "/etc/pacman.conf";

/// Redraw delay after a routine success, so the screen doesn't flash
/// through states faster than the operator can read them.
const COOLDOWN: Duration = Duration::from_millis(250);

// ── Filesystem choices ────────────────────────────────────────────────────────

/// The fixed set of filesystems the format submenu offers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsType {
    Btrfs,
    Ext4,
    Exfat,
    Fat32,
    Ntfs,
    Swap,
    Xfs,
}

impl FsType {
    const ALL: [FsType; 7] = [
        FsType::Btrfs,
        FsType::Ext4,
        FsType::Exfat,
        FsType::Fat32,
        FsType::Ntfs,
        FsType::Swap,
        FsType::Xfs,
    ];

    fn label(self) -> &'static str {
        match self {
            FsType::Btrfs => "Btrfs",
            FsType::Ext4 => "ext4",
            FsType::Exfat => "exFAT",
            FsType::Fat32 => "FAT32",
            FsType::Ntfs => "NTFS",
            FsType::Swap => "swap",
            FsType::Xfs => "XFS",
        }
    }

    /// The format invocation, with the type-specific flags each tool wants.
    fn format_cmd(self, device: &str) -> Cmd {
        match self {
            FsType::Btrfs => Cmd::new("mkfs.btrfs").arg("-f").arg(device),
            FsType::Ext4 => Cmd::new("mkfs.ext4").arg(device),
            FsType::Exfat => Cmd::new("mkfs.exfat").arg(device),
            FsType::Fat32 => Cmd::new("mkfs.fat").args(["-F32", "-s2"]).arg(device),
            FsType::Ntfs => Cmd::new("mkfs.ntfs").args(["-F", "-Q"]).arg(device),
            FsType::Swap => Cmd::new("mkswap").arg(device),
            FsType::Xfs => Cmd::new("mkfs.xfs").arg("-f").arg(device),
        }
    }
}

// ── Menu selections ───────────────────────────────────────────────────────────

/// Role codes the menu accepts, before a concrete mount point is known
/// (`Other` asks for its path later in the assignment flow).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RoleKey {
    Root,
    Efi,
    Boot,
    Home,
    PkgCache,
    Swap,
    Other,
}

#[derive(Debug, PartialEq, Eq)]
enum Selection {
    Exit,
    Assign(RoleKey),
    Identify(IdTool),
    Invalid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IdTool {
    Lsblk,
    Blkid,
    Fdisk,
}

impl IdTool {
    fn command(self) -> Cmd {
        match self {
            IdTool::Lsblk => {
                Cmd::new("lsblk").args(["--output", "NAME,SIZE,TYPE,FSTYPE,MOUNTPOINT"])
            }
            IdTool::Blkid => Cmd::new("blkid"),
            IdTool::Fdisk => Cmd::new("fdisk").arg("-l"),
        }
    }
}

/// `uefi` gates the EFI role: requesting it in BIOS mode is invalid input,
/// not an error.
fn parse_selection(input: &str, uefi: bool) -> Selection {
    match input.trim().to_ascii_uppercase().as_str() {
        "" => Selection::Exit,
        "R" => Selection::Assign(RoleKey::Root),
        "E" if uefi => Selection::Assign(RoleKey::Efi),
        "B" => Selection::Assign(RoleKey::Boot),
        "H" => Selection::Assign(RoleKey::Home),
        "C" => Selection::Assign(RoleKey::PkgCache),
        "S" => Selection::Assign(RoleKey::Swap),
        "O" => Selection::Assign(RoleKey::Other),
        "L" => Selection::Identify(IdTool::Lsblk),
        "I" => Selection::Identify(IdTool::Blkid),
        "P" => Selection::Identify(IdTool::Fdisk),
        _ => Selection::Invalid,
    }
}

/// Whether ENTER is allowed to leave the menu, given the current plan.
#[derive(Debug, PartialEq, Eq)]
enum ExitDecision {
    Exit,
    NeedRoot,
    ConfirmEfi,
}

fn exit_decision(plan: &MountPlan, uefi: bool) -> ExitDecision {
    if plan.root().is_none() {
        ExitDecision::NeedRoot
    } else if uefi && plan.efi().is_none() {
        ExitDecision::ConfirmEfi
    } else {
        ExitDecision::Exit
    }
}

// ── Mounting menu ─────────────────────────────────────────────────────────────

/// Interactive mounting loop: assigns roles to partitions, optionally
/// formatting them first, until a root filesystem is mounted (and, on UEFI,
/// an ESP is mounted or explicitly waived).
pub fn run(ctx: &mut Context) -> Result<(), SetupError> {
    let mut show_guide = true;

    loop {
        // Always re-derive the plan from the kernel's view — the operator
        // may have mounted or formatted things behind our back.
        let plan = lsblk::mount_state();
        render(ctx, &plan, show_guide);
        show_guide = true;

        let input: String = Input::new()
            .with_prompt("Selection (ENTER to continue)")
            .allow_empty(true)
            .interact_text()?;

        let uefi = ctx.boot_mode.is_uefi();
        match parse_selection(&input, uefi) {
            Selection::Exit => match exit_decision(&plan, uefi) {
                ExitDecision::Exit => return Ok(()),
                ExitDecision::NeedRoot => {
                    ui::print_warning("A root partition must be mounted before continuing.");
                    settle(true)?;
                }
                ExitDecision::ConfirmEfi => {
                    let proceed = Confirm::new()
                        .with_prompt("No EFI system partition is mounted at /efi. Continue anyway?")
                        .default(false)
                        .interact()?;
                    if proceed {
                        ctx.log.note("operator waived the /efi mount on a UEFI system");
                        return Ok(());
                    }
                }
            },
            Selection::Assign(key) => {
                let pause = assign(ctx, key)?;
                settle(pause)?;
            }
            Selection::Identify(tool) => {
                identify(ctx, tool)?;
            }
            Selection::Invalid => show_guide = false,
        }
    }
}

fn assignment_label(plan: &MountPlan, role: &Role) -> String {
    match plan.device_for(role) {
        Some(dev) => dev.to_string(),
        None => "not mounted".to_string(),
    }
}

fn render(ctx: &Context, plan: &MountPlan, show_guide: bool) {
    ui::print_menu_header("Partition Mounting");

    let root = assignment_label(plan, &Role::Root);
    let efi = assignment_label(plan, &Role::Efi);
    let mut mandatory: Vec<(&str, &str)> = vec![("Root  (R)", root.as_str())];
    if ctx.boot_mode.is_uefi() {
        mandatory.push(("EFI   (E)", efi.as_str()));
    }
    ui::print_kv_box("Mandatory", &mandatory);
    println!();

    let boot = assignment_label(plan, &Role::Boot);
    let home = assignment_label(plan, &Role::Home);
    let cache = assignment_label(plan, &Role::PkgCache);
    let swap = assignment_label(plan, &Role::Swap);
    let mut optional: Vec<(&str, &str)> = vec![
        ("Boot  (B)", boot.as_str()),
        ("Home  (H)", home.as_str()),
        ("Cache (C)", cache.as_str()),
        ("Swap  (S)", swap.as_str()),
    ];
    let others: Vec<(String, String)> = plan
        .others()
        .map(|(path, dev)| (format!("{}  (O)", path), dev.to_string()))
        .collect();
    for (path, dev) in &others {
        optional.push((path.as_str(), dev.as_str()));
    }
    ui::print_kv_box("Optional", &optional);

    if show_guide {
        println!();
        println!(
            "   {}  assign a role to a partition",
            style("R/E/B/H/C/S/O").cyan().bold()
        );
        println!(
            "   {}  identify devices (lsblk / blkid / fdisk -l)",
            style("L/I/P        ").cyan().bold()
        );
        println!(
            "   {}  continue once the mandatory mounts are in place",
            style("ENTER        ").cyan().bold()
        );
    }
    println!();
}

/// After a failed action, block until the operator has read the message;
/// after a success, just take a breath before redrawing.
fn settle(pause: bool) -> Result<(), SetupError> {
    if pause {
        let _: String = Input::new()
            .with_prompt("Press ENTER to return to the menu")
            .allow_empty(true)
            .interact_text()?;
    } else {
        thread::sleep(COOLDOWN);
    }
    Ok(())
}

fn identify(ctx: &mut Context, tool: IdTool) -> Result<(), SetupError> {
    let cmd = tool.command();
    ctx.log.command(&cmd.rendered());
    println!();
    cmd.interactive();
    println!();
    settle(true)
}

// ── Role assignment ───────────────────────────────────────────────────────────

/// Walks one partition through format → mount (or swapon). Returns the
/// pause flag: `true` when something failed and the operator should get to
/// read about it before the menu redraws.
fn assign(ctx: &mut Context, key: RoleKey) -> Result<bool, SetupError> {
    let devices = lsblk::inventory();
    let candidates = lsblk::unmounted_candidates(&devices);
    if candidates.is_empty() {
        ui::print_warning("Nothing left to mount — every partition is mounted or in use.");
        return Ok(true);
    }

    println!();
    ui::print_info("Unmounted partitions:");
    for dev in &candidates {
        println!(
            "     {:<16} {}",
            style(&dev.path).white().bold(),
            style(dev.fstype.as_deref().unwrap_or("no filesystem")).dim()
        );
    }
    println!();

    let input: String = Input::new()
        .with_prompt("Partition to use (e.g. 'sda1' or '/dev/sda1')")
        .allow_empty(true)
        .interact_text()?;
    let Some(device) = normalize_device(&input) else {
        if !input.trim().is_empty() {
            ui::print_warning("That doesn't look like a device name.");
            return Ok(true);
        }
        return Ok(false); // quiet cancel
    };

    // Optional formatting. EFI and swap force their filesystem; everything
    // else picks from the fixed list.
    if Confirm::new()
        .with_prompt(format!("Format {} first?", device))
        .default(false)
        .interact()?
    {
        let fstype = match key {
            RoleKey::Efi => FsType::Fat32,
            RoleKey::Swap => FsType::Swap,
            _ => {
                let labels: Vec<&str> = FsType::ALL.iter().map(|f| f.label()).collect();
                let idx = Select::new()
                    .with_prompt("Filesystem")
                    .items(&labels)
                    .default(1) // ext4
                    .interact()?;
                FsType::ALL[idx]
            }
        };
        let code = cmd::run_with_spinner(
            &fstype.format_cmd(&device),
            &ctx.log,
            &format!("Formatting {} as {}…", device, fstype.label()),
            &format!("{} formatted as {}.", device, fstype.label()),
        );
        if code != 0 {
            return Ok(true);
        }
    }

    if key == RoleKey::Swap {
        return Ok(activate_swap(ctx, &device));
    }

    // Resolve the mount point: fixed for canonical roles, prompted for
    // operator-defined ones.
    let role = match key {
        RoleKey::Root => Role::Root,
        RoleKey::Efi => Role::Efi,
        RoleKey::Boot => Role::Boot,
        RoleKey::Home => Role::Home,
        RoleKey::PkgCache => Role::PkgCache,
        RoleKey::Other => {
            let path: String = Input::new()
                .with_prompt("Mount point inside the new system (absolute, e.g. /srv/data)")
                .allow_empty(true)
                .interact_text()?;
            let path = path.trim().to_string();
            if path.is_empty() || !path.starts_with('/') {
                ui::print_warning("Mount cancelled — the mount point must be an absolute path.");
                return Ok(true);
            }
            Role::Other(path)
        }
        RoleKey::Swap => unreachable!("swap handled above"),
    };

    let options: String = Input::new()
        .with_prompt("Mount options (optional, e.g. 'noatime,compress=zstd')")
        .allow_empty(true)
        .interact_text()?;

    mount_role(ctx, key, &role, &device, options.trim())
}

fn activate_swap(ctx: &mut Context, device: &str) -> bool {
    let cmd = Cmd::new("swapon").arg(device);
    let code = cmd.logged(&ctx.log);
    if code != 0 {
        ui::print_error(&format!("swapon {} failed with code {}.", device, code));
        return true;
    }
    ui::print_success(&format!("Swap on {} activated.", device));
    false
}

/// Mounts `device` at the role's path under the staging root and runs the
/// post-mount hooks (GRUB-device capture, pkgcache probe). Returns the
/// pause flag.
fn mount_role(
    ctx: &mut Context,
    key: RoleKey,
    role: &Role,
    device: &str,
    options: &str,
) -> Result<bool, SetupError> {
    let rel = role.mount_point().expect("swap never reaches mount_role");
    let target = if rel == "/" {
        STAGING_ROOT.to_string()
    } else {
        format!("{}{}", STAGING_ROOT, rel)
    };

    if let Err(e) = fs::create_dir_all(&target) {
        ui::print_error(&format!("Could not create {}: {}", target, e));
        return Ok(true);
    }

    let mut mount = Cmd::new("mount");
    if !options.is_empty() {
        mount = mount.args(["-o", options]);
    }
    let mount = mount.arg(device).arg(&target);
    let code = mount.logged(&ctx.log);
    if code != 0 {
        ui::print_error(&format!("Mounting {} at {} failed with code {}.", device, target, code));
        return Ok(true);
    }
    ui::print_success(&format!("{} mounted at {}.", device, target));

    // First root-or-boot mount on a BIOS system pins the MBR GRUB target.
    if matches!(key, RoleKey::Root | RoleKey::Boot) {
        ctx.capture_grub_device(device);
    }

    if key == RoleKey::PkgCache {
        return Ok(!enable_pkgcache(ctx, device, &target));
    }
    Ok(false)
}

// ── Package cache redirection ─────────────────────────────────────────────────

/// Verifies the fresh pkgcache mount is actually writable, then points
/// pacman's CacheDir at it. The probe runs before any config edit, so the
/// failure path only has to undo the mount — on failure the end state is
/// identical to the pre-attempt state.
fn enable_pkgcache(ctx: &mut Context, device: &str, target: &str) -> bool {
    if let Err(e) = write_probe(Path::new(target)) {
        ui::print_error(&format!("{} is not writable ({}) — unmounting it again.", target, e));
        cmd::best_effort("umount", &[target]);
        ctx.log
            .note(&format!("pkgcache probe failed on {}; mount rolled back", device));
        return false;
    }

    let snapshot = fs::read(PACMAN_CONF).ok();
    match patch_cache_dir(Path::new(PACMAN_CONF), target) {
        Ok(()) => {
            ctx.pkgcache_enabled = true;
            ui::print_success(&format!("pacman cache redirected to {}.", target));
            true
        }
        Err(e) => {
            // Put the config back exactly as it was, then undo the mount.
            if let Some(bytes) = snapshot {
                let _ = fs::write(PACMAN_CONF, bytes);
            }
            cmd::best_effort("umount", &[target]);
            ui::print_error(&format!("Could not update {}: {} — mount rolled back.", PACMAN_CONF, e));
            false
        }
    }
}

/// Create, verify and delete a marker file on the new mount.
fn write_probe(dir: &Path) -> io::Result<()> {
    let probe = dir.join(".arch-setup-probe");
    fs::write(&probe, b"probe")?;
    let content = fs::read(&probe)?;
    fs::remove_file(&probe)?;
    if content != b"probe" {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "probe readback mismatch"));
    }
    Ok(())
}

/// Rewrites pacman's CacheDir to `dir`: the commented stock line first,
/// then an already-set one, falling back to appending.
fn patch_cache_dir(conf: &Path, dir: &str) -> io::Result<()> {
    let replacement = format!("CacheDir    = {}", dir);
    if textfile::replace_line(conf, "#CacheDir", &replacement, true)? == PatchOutcome::Applied {
        return Ok(());
    }
    if textfile::replace_line(conf, "CacheDir", &replacement, true)? == PatchOutcome::Applied {
        return Ok(());
    }
    textfile::write_line(conf, &replacement)
}

// ── Device-name normalization ─────────────────────────────────────────────────

/// `sda1` → `/dev/sda1`; full paths pass through. Anything implausibly
/// short is rejected.
fn normalize_device(input: &str) -> Option<String> {
    let name = input.trim();
    if name.len() < 3 {
        return None;
    }
    if name.starts_with('/') {
        Some(name.to_string())
    } else {
        Some(format!("/dev/{}", name))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lsblk::DeviceLine;

    fn part(path: &str, mountpoint: Option<&str>, swap: bool) -> DeviceLine {
        DeviceLine {
            path: path.to_string(),
            dev_type: "part".to_string(),
            fstype: Some("ext4".to_string()),
            mountpoint: mountpoint.map(str::to_string),
            swap,
        }
    }

    #[test]
    fn selection_keys_map_to_roles() {
        assert_eq!(parse_selection("r", true), Selection::Assign(RoleKey::Root));
        assert_eq!(parse_selection("S", false), Selection::Assign(RoleKey::Swap));
        assert_eq!(parse_selection("o", false), Selection::Assign(RoleKey::Other));
        assert_eq!(parse_selection("l", false), Selection::Identify(IdTool::Lsblk));
        assert_eq!(parse_selection("", true), Selection::Exit);
    }

    #[test]
    fn efi_role_requires_uefi_mode() {
        assert_eq!(parse_selection("E", true), Selection::Assign(RoleKey::Efi));
        assert_eq!(parse_selection("E", false), Selection::Invalid);
    }

    #[test]
    fn exit_needs_a_root_mount_no_matter_what() {
        let plan = MountPlan::from_devices(&[part("/dev/sda1", Some("/mnt/home"), false)]);
        assert_eq!(exit_decision(&plan, false), ExitDecision::NeedRoot);
        assert_eq!(exit_decision(&plan, true), ExitDecision::NeedRoot);
    }

    #[test]
    fn uefi_exit_without_efi_demands_confirmation() {
        let plan = MountPlan::from_devices(&[part("/dev/sda2", Some("/mnt"), false)]);
        assert_eq!(exit_decision(&plan, true), ExitDecision::ConfirmEfi);
        assert_eq!(exit_decision(&plan, false), ExitDecision::Exit);
    }

    #[test]
    fn satisfied_uefi_plan_exits_cleanly() {
        let plan = MountPlan::from_devices(&[
            part("/dev/sda1", Some("/mnt/efi"), false),
            part("/dev/sda2", Some("/mnt"), false),
        ]);
        assert_eq!(exit_decision(&plan, true), ExitDecision::Exit);
    }

    #[test]
    fn device_names_normalize_to_dev_paths() {
        assert_eq!(normalize_device("sda1").as_deref(), Some("/dev/sda1"));
        assert_eq!(normalize_device("/dev/nvme0n1p2").as_deref(), Some("/dev/nvme0n1p2"));
        assert_eq!(normalize_device(" sdb2 ").as_deref(), Some("/dev/sdb2"));
    }

    #[test]
    fn implausibly_short_device_names_are_rejected() {
        assert_eq!(normalize_device(""), None);
        assert_eq!(normalize_device("a"), None);
        assert_eq!(normalize_device("sd"), None);
    }

    #[test]
    fn format_commands_carry_type_specific_flags() {
        assert_eq!(
            FsType::Fat32.format_cmd("/dev/sda1").rendered(),
            "mkfs.fat -F32 -s2 /dev/sda1"
        );
        assert_eq!(
            FsType::Ntfs.format_cmd("/dev/sdb1").rendered(),
            "mkfs.ntfs -F -Q /dev/sdb1"
        );
        assert_eq!(FsType::Swap.format_cmd("/dev/sda3").rendered(), "mkswap /dev/sda3");
        assert_eq!(FsType::Xfs.format_cmd("/dev/sdc1").rendered(), "mkfs.xfs -f /dev/sdc1");
        assert_eq!(FsType::Ext4.format_cmd("/dev/sda2").rendered(), "mkfs.ext4 /dev/sda2");
    }

    #[test]
    fn cache_dir_patch_prefers_the_commented_stock_line() {
        let dir = tempfile::tempdir().unwrap();
        let conf = dir.path().join("pacman.conf");
        fs::write(&conf, "[options]\n#CacheDir    = /var/cache/pacman/pkg/\nColor\n").unwrap();

        patch_cache_dir(&conf, "/mnt/pkgcache").unwrap();
        assert_eq!(
            fs::read_to_string(&conf).unwrap(),
            "[options]\nCacheDir    = /mnt/pkgcache\nColor\n"
        );
    }

    #[test]
    fn cache_dir_patch_rewrites_an_existing_setting() {
        let dir = tempfile::tempdir().unwrap();
        let conf = dir.path().join("pacman.conf");
        fs::write(&conf, "CacheDir = /old\n").unwrap();

        patch_cache_dir(&conf, "/mnt/pkgcache").unwrap();
        assert_eq!(fs::read_to_string(&conf).unwrap(), "CacheDir    = /mnt/pkgcache\n");
    }

    #[test]
    fn cache_dir_patch_appends_when_no_line_matches() {
        let dir = tempfile::tempdir().unwrap();
        let conf = dir.path().join("pacman.conf");
        fs::write(&conf, "[options]\n").unwrap();

        patch_cache_dir(&conf, "/mnt/pkgcache").unwrap();
        assert_eq!(
            fs::read_to_string(&conf).unwrap(),
            "[options]\nCacheDir    = /mnt/pkgcache\n"
        );
    }

    #[test]
    fn write_probe_round_trips_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        write_probe(dir.path()).unwrap();
        assert!(fs::read_dir(dir.path()).unwrap().next().is_none());
    }

    #[test]
    fn write_probe_fails_on_missing_directory() {
        assert!(write_probe(Path::new("/no/such/mount")).is_err());
    }
}
