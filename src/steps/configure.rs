use std::{fs, io, path::Path};

use dialoguer::Confirm;

use crate::{
    cmd::Cmd,
    error::SetupError,
    session::{Context, CHROOT_MARKER},
    steps::prepare,
    textfile::{self, PatchOutcome},
    ui,
};

const LOCALE_GEN: &str = "/etc/locale.gen";
const PACMAN_CONF: &str = "/etc/pacman.conf";
const GRUB_DEFAULT: &str = "/etc/default/grub";

// ── Chroot phase driver ───────────────────────────────────────────────────────

/// Runs the whole post-install catalog inside the new system. Individual
/// feature failures are counted and reported, never fatal — a multi-hour
/// unattended install should not halt because one optional package failed.
/// Only the bootloader (after the operator declines to continue) and a
/// forced database refresh abort the phase.
pub fn run(ctx: &mut Context) -> Result<(), SetupError> {
    ui::print_banner();
    ui::print_info("Live phase complete — finishing configuration inside the new system.");

    let mut errors = 0u32;

    ui::print_step(1, 8, "Locale & Console");
    errors += locale(ctx);
    errors += vconsole(ctx);

    ui::print_step(2, 8, "Time");
    errors += timezone(ctx);

    ui::print_step(3, 8, "Identity");
    errors += identity(ctx);

    ui::print_step(4, 8, "Package Manager");
    errors += package_manager(ctx)?;

    ui::print_step(5, 8, "Users & Access");
    errors += users(ctx)?;

    ui::print_step(6, 8, "Bootloader");
    errors += bootloader(ctx)?;

    ui::print_step(7, 8, "Networking & Services");
    errors += network(ctx);
    errors += time_sync(ctx);
    errors += ssh(ctx);
    errors += firewall(ctx);

    ui::print_step(8, 8, "Hardware & Desktop");
    errors += xorg(ctx);
    errors += gpu(ctx);
    errors += virtualization(ctx);
    errors += power(ctx);
    errors += audio(ctx);
    errors += bluetooth(ctx);
    errors += printing(ctx);
    errors += desktop(ctx);
    errors += aur(ctx);

    // The marker served its purpose; a reboot should not look like a chroot.
    let _ = fs::remove_file(CHROOT_MARKER);
    let _ = ctx.log.relocate(Path::new("/var/log/arch-setup.log"));

    println!();
    ui::report(errors, "Post-install configuration");
    ui::print_info("Exit the chroot, unmount and reboot when ready.");
    Ok(())
}

// ── Shared helpers ────────────────────────────────────────────────────────────

fn install(ctx: &Context, packages: &[&str]) -> u32 {
    if packages.is_empty() {
        return 0;
    }
    let code = Cmd::new("pacman")
        .args(["-S", "--noconfirm", "--noprogressbar", "--needed"])
        .args(packages.iter().copied())
        .logged(&ctx.log);
    u32::from(code != 0)
}

fn enable_service(ctx: &Context, unit: &str) -> u32 {
    let code = Cmd::new("systemctl").args(["enable", unit]).logged(&ctx.log);
    u32::from(code != 0)
}

/// Uncomments a config line unless it is already active. Treats
/// "already uncommented" as success so re-runs stay clean.
fn ensure_uncommented(ctx: &Context, path: &str, prefix: &str) -> u32 {
    if let Ok(Some(_)) = textfile::line_number(path, prefix) {
        return 0;
    }
    match textfile::uncomment_line(path, prefix, "#") {
        Ok(PatchOutcome::Applied) => 0,
        Ok(PatchOutcome::NotFound) => {
            ctx.log.note(&format!("no '{}' line found in {}", prefix, path));
            1
        }
        Err(e) => {
            ctx.log.note(&format!("patching {} failed: {}", path, e));
            1
        }
    }
}

fn count(result: io::Result<()>, ctx: &Context, what: &str) -> u32 {
    match result {
        Ok(()) => 0,
        Err(e) => {
            ctx.log.note(&format!("{} failed: {}", what, e));
            1
        }
    }
}

// ── Locale & console ──────────────────────────────────────────────────────────

fn locale(ctx: &Context) -> u32 {
    let mut errors = 0;

    for locale in ctx.profile.locale_list() {
        // UTF-8 variants are favored unless a charset was given explicitly
        // (e.g. "en_US ISO-8859-1").
        let enabled = if locale.contains(' ') {
            ensure_uncommented(ctx, LOCALE_GEN, &locale) == 0
        } else {
            ensure_uncommented(ctx, LOCALE_GEN, &format!("{}.UTF-8", locale)) == 0
                || ensure_uncommented(ctx, LOCALE_GEN, &locale) == 0
        };
        if !enabled {
            ui::print_warning(&format!("Locale '{}' not found in {}.", locale, LOCALE_GEN));
            errors += 1;
        }
    }

    let code = Cmd::new("locale-gen").logged(&ctx.log);
    errors += u32::from(code != 0);

    let p = &ctx.profile;
    let conf = textfile::overwrite("/etc/locale.conf", &format!("LANG={}", p.lang))
        .and_then(|_| textfile::write_line("/etc/locale.conf", &format!("LANGUAGE={}", p.language)))
        .and_then(|_| {
            textfile::write_line("/etc/locale.conf", &format!("LC_COLLATE={}", p.lc_collate))
        });
    errors += count(conf, ctx, "writing /etc/locale.conf");

    ui::report(errors, "Locales generated and configured.");
    errors
}

fn vconsole(ctx: &Context) -> u32 {
    let mut errors = 0;
    let mut result =
        textfile::overwrite("/etc/vconsole.conf", &format!("KEYMAP={}", ctx.profile.keymap));
    let font = ctx.profile.font.trim();
    if result.is_ok() && !font.is_empty() && font != "default" {
        result = textfile::write_line("/etc/vconsole.conf", &format!("FONT={}", font));
    }
    errors += count(result, ctx, "writing /etc/vconsole.conf");
    ui::report(errors, "Console keymap persisted.");
    errors
}

// ── Time ──────────────────────────────────────────────────────────────────────

fn timezone(ctx: &Context) -> u32 {
    let mut errors = 0;
    let zone = format!("/usr/share/zoneinfo/{}", ctx.profile.timezone);
    let code = Cmd::new("ln")
        .args(["-sfn", zone.as_str(), "/etc/localtime"])
        .logged(&ctx.log);
    errors += u32::from(code != 0);

    // Localtime hardware clock only matters when dual-booting Windows.
    let mut hwclock = Cmd::new("hwclock").arg("--systohc");
    if ctx.profile.use_localtime {
        hwclock = hwclock.arg("--localtime");
    }
    errors += u32::from(hwclock.logged(&ctx.log) != 0);

    ui::report(errors, &format!("Timezone set to {}.", ctx.profile.timezone));
    errors
}

// ── Identity ──────────────────────────────────────────────────────────────────

fn identity(ctx: &Context) -> u32 {
    let mut errors = 0;
    let hostname = ctx.profile.effective_hostname();

    errors += count(
        textfile::overwrite("/etc/hostname", &hostname),
        ctx,
        "writing /etc/hostname",
    );

    let hosts = textfile::overwrite("/etc/hosts", "127.0.0.1\tlocalhost")
        .and_then(|_| textfile::write_line("/etc/hosts", "::1\t\tlocalhost"))
        .and_then(|_| {
            textfile::write_line(
                "/etc/hosts",
                &format!("127.0.1.1\t{}.localdomain\t{}", hostname, hostname),
            )
        });
    errors += count(hosts, ctx, "writing /etc/hosts");

    ui::report(errors, &format!("Hostname set to '{}'.", hostname));
    errors
}

// ── Package manager ───────────────────────────────────────────────────────────

fn package_manager(ctx: &mut Context) -> Result<u32, SetupError> {
    let mut errors = 0;
    errors += ensure_uncommented(ctx, PACMAN_CONF, "Color");

    if ctx.profile.enable_multilib {
        match enable_multilib_file(Path::new(PACMAN_CONF)) {
            Ok(true) => {
                ui::print_info("Enabled the [multilib] repository.");
                // A new repository needs its database; a forced refresh
                // failing here is fatal by contract.
                prepare::refresh_databases(ctx, true)?;
            }
            Ok(false) => ctx.log.note("[multilib] already enabled or absent"),
            Err(e) => {
                ctx.log.note(&format!("enabling [multilib] failed: {}", e));
                errors += 1;
            }
        }
    }

    ui::report(errors, "pacman configured.");
    Ok(errors)
}

/// Uncomments the `[multilib]` block header and the `Include` line directly
/// underneath it. Prefix matching alone cannot do this: the stock config
/// carries several commented `Include` lines belonging to other blocks.
fn enable_multilib_in(content: &str) -> Option<String> {
    let mut lines: Vec<String> = content.lines().map(str::to_string).collect();
    let mut changed = false;

    for i in 0..lines.len() {
        if lines[i].trim() == "#[multilib]" {
            lines[i] = "[multilib]".to_string();
            changed = true;
            if let Some(next) = lines.get_mut(i + 1) {
                if let Some(stripped) = next.trim_start().strip_prefix('#') {
                    if stripped.starts_with("Include") {
                        *next = stripped.to_string();
                    }
                }
            }
        }
    }

    if !changed {
        return None;
    }
    let mut out = lines.join("\n");
    if content.ends_with('\n') {
        out.push('\n');
    }
    Some(out)
}

fn enable_multilib_file(conf: &Path) -> io::Result<bool> {
    let content = fs::read_to_string(conf)?;
    match enable_multilib_in(&content) {
        Some(updated) => {
            fs::write(conf, updated)?;
            Ok(true)
        }
        None => Ok(false),
    }
}

// ── Users & access ────────────────────────────────────────────────────────────

fn users(ctx: &mut Context) -> Result<u32, SetupError> {
    let mut errors = 0;

    ui::print_info("Set the root password.");
    errors += password_with_retries(ctx, "root");

    let restricted = ctx.profile.restricted_list();
    let passwdless = ctx.profile.passwdless_list();

    for user in ctx.profile.user_list() {
        let mut useradd = Cmd::new("useradd").args(["-m", "-U"]);
        if !restricted.contains(&user) {
            useradd = useradd.args(["-G", "wheel"]);
        }
        let code = useradd.arg(&user).logged(&ctx.log);
        if code != 0 {
            ui::print_error(&format!("Could not create user '{}'.", user));
            errors += 1;
            continue;
        }

        if passwdless.contains(&user) {
            let code = Cmd::new("passwd").args(["-d", user.as_str()]).logged(&ctx.log);
            errors += u32::from(code != 0);
        } else {
            ui::print_info(&format!("Set the password for '{}'.", user));
            errors += password_with_retries(ctx, &user);
        }
    }

    errors += sudoers(ctx);
    ui::report(errors, "Users and access configured.");
    Ok(errors)
}

/// Interactive password entry, retried up to three times before giving up
/// on that account (the install continues; the operator can fix it later).
fn password_with_retries(ctx: &Context, account: &str) -> u32 {
    for attempt in 1..=3 {
        let code = Cmd::new("passwd").arg(account).interactive();
        if code == 0 {
            return 0;
        }
        if attempt < 3 {
            ui::print_warning("Password not set — try again.");
        }
    }
    ctx.log.note(&format!("password for '{}' not set after 3 attempts", account));
    ui::print_error(&format!("Giving up on the password for '{}'.", account));
    1
}

fn sudoers(ctx: &Context) -> u32 {
    let has_admin = ctx
        .profile
        .user_list()
        .iter()
        .any(|u| !ctx.profile.restricted_list().contains(u));
    if !has_admin {
        return 0;
    }

    let mut errors = install(ctx, &["sudo"]);
    let rule = if ctx.profile.sudo_ask_pass {
        "%wheel ALL=(ALL:ALL) ALL"
    } else {
        "%wheel ALL=(ALL:ALL) NOPASSWD: ALL"
    };
    errors += count(
        textfile::overwrite("/etc/sudoers.d/10-wheel", rule),
        ctx,
        "writing the sudoers drop-in",
    );
    let code = Cmd::new("chmod")
        .args(["440", "/etc/sudoers.d/10-wheel"])
        .logged(&ctx.log);
    errors + u32::from(code != 0)
}

// ── Bootloader ────────────────────────────────────────────────────────────────

fn bootloader(ctx: &mut Context) -> Result<u32, SetupError> {
    let mut errors = 0;
    let uefi = ctx.boot_mode.is_uefi();

    let mut packages = vec!["grub"];
    if uefi {
        packages.push("efibootmgr");
    }
    if ctx.profile.multibooting {
        packages.push("os-prober");
    }
    errors += install(ctx, &packages);

    let code = if uefi {
        Cmd::new("grub-install")
            .args(["--target=x86_64-efi", "--efi-directory=/efi", "--bootloader-id=GRUB"])
            .logged(&ctx.log)
    } else {
        match ctx.grub_device().map(str::to_string) {
            Some(device) => Cmd::new("grub-install")
                .arg("--target=i386-pc")
                .arg(device)
                .logged(&ctx.log),
            None => {
                ctx.log.note("no MBR GRUB device was captured during mounting");
                -1
            }
        }
    };

    if code != 0 {
        ui::print_error("grub-install failed — the new system will not boot on its own.");
        let proceed = Confirm::new()
            .with_prompt("Continue without a working bootloader?")
            .default(false)
            .interact()?;
        if !proceed {
            return Err(SetupError::Bootloader);
        }
        ui::report(errors + 1, "Bootloader installation skipped.");
        return Ok(errors + 1);
    }

    if ctx.profile.multibooting {
        errors += ensure_uncommented(ctx, GRUB_DEFAULT, "GRUB_DISABLE_OS_PROBER");
    }
    let code = Cmd::new("grub-mkconfig")
        .args(["-o", "/boot/grub/grub.cfg"])
        .logged(&ctx.log);
    errors += u32::from(code != 0);

    ui::report(errors, "Bootloader installed.");
    Ok(errors)
}

// ── Networking & services ─────────────────────────────────────────────────────

fn network(ctx: &Context) -> u32 {
    let mut errors = install(ctx, &["networkmanager"]);
    errors += enable_service(ctx, "NetworkManager.service");
    ui::report(errors, "NetworkManager installed and enabled.");
    errors
}

fn time_sync(ctx: &Context) -> u32 {
    if !ctx.profile.enable_ntp {
        return 0;
    }
    let errors = enable_service(ctx, "systemd-timesyncd.service");
    ui::report(errors, "NTP synchronization enabled.");
    errors
}

fn ssh(ctx: &Context) -> u32 {
    let unit = match ctx.profile.ssh_server_type {
        1 => "sshd.socket",  // spawn on connections
        2 => "sshd.service", // permanent daemon
        _ => return 0,
    };
    let mut errors = install(ctx, &["openssh"]);
    errors += enable_service(ctx, unit);
    ui::report(errors, &format!("SSH server enabled ({}).", unit));
    errors
}

fn firewall(ctx: &Context) -> u32 {
    if !ctx.profile.enable_firewall {
        return 0;
    }
    let mut errors = install(ctx, &["ufw"]);
    errors += enable_service(ctx, "ufw.service");
    // Rules can only be loaded once the daemon runs on the installed system.
    ctx.log.note("ufw enabled; default rules apply on first boot");
    ui::report(errors, "Firewall installed and enabled.");
    errors
}

// ── Hardware & desktop ────────────────────────────────────────────────────────

fn xorg(ctx: &Context) -> u32 {
    let packages: &[&str] = match ctx.profile.xorg_install_type {
        1 => &["xorg-server", "xorg-xinit"],
        2 => &["xorg"],
        _ => return 0,
    };
    let errors = install(ctx, packages);
    ui::report(errors, "X.org installed.");
    errors
}

/// Driver package set for the GPU the PCI bus reports, if any.
fn gpu_packages(lspci: &str) -> Option<(&'static str, &'static [&'static str])> {
    let graphics: Vec<&str> = lspci
        .lines()
        .filter(|l| l.contains("VGA") || l.contains("3D controller"))
        .collect();
    if graphics.iter().any(|l| l.contains("NVIDIA")) {
        Some(("NVIDIA", &["nvidia", "nvidia-utils"]))
    } else if graphics.iter().any(|l| l.contains("AMD") || l.contains("ATI")) {
        Some(("AMD", &["xf86-video-amdgpu", "mesa", "vulkan-radeon"]))
    } else if graphics.iter().any(|l| l.contains("Intel")) {
        Some(("Intel", &["mesa", "vulkan-intel"]))
    } else {
        None
    }
}

fn gpu(ctx: &Context) -> u32 {
    if !ctx.profile.auto_detect_gpu {
        return 0;
    }
    let lspci = Cmd::new("lspci").read();
    match gpu_packages(&lspci) {
        Some((vendor, packages)) => {
            ui::print_info(&format!("{} GPU detected.", vendor));
            let errors = install(ctx, packages);
            ui::report(errors, &format!("{} drivers installed.", vendor));
            errors
        }
        None => {
            ctx.log.note("no supported GPU found in lspci output");
            0
        }
    }
}

/// Guest-addition package set for the hypervisor this system runs under.
fn guest_packages(virt: &str) -> Option<(&'static [&'static str], Option<&'static str>)> {
    match virt {
        "kvm" | "qemu" => Some((&["qemu-guest-agent"], Some("qemu-guest-agent.service"))),
        "oracle" => Some((&["virtualbox-guest-utils"], Some("vboxservice.service"))),
        "vmware" => Some((&["open-vm-tools"], Some("vmtoolsd.service"))),
        "microsoft" => Some((&["hyperv"], None)),
        _ => None,
    }
}

fn virtualization(ctx: &Context) -> u32 {
    let virt = Cmd::new("systemd-detect-virt").read();
    match guest_packages(virt.trim()) {
        Some((packages, service)) => {
            ui::print_info(&format!("Virtualization platform: {}.", virt.trim()));
            let mut errors = install(ctx, packages);
            if let Some(unit) = service {
                errors += enable_service(ctx, unit);
            }
            ui::report(errors, "Guest additions installed.");
            errors
        }
        None => 0,
    }
}

fn battery_present() -> bool {
    let Ok(entries) = fs::read_dir("/sys/class/power_supply") else {
        return false;
    };
    entries
        .flatten()
        .any(|e| e.file_name().to_string_lossy().starts_with("BAT"))
}

fn power(ctx: &Context) -> u32 {
    if !battery_present() {
        return 0;
    }
    let mut errors = install(ctx, &["tlp"]);
    errors += enable_service(ctx, "tlp.service");
    ui::report(errors, "Battery detected — TLP power management enabled.");
    errors
}

fn audio(ctx: &Context) -> u32 {
    let packages: &[&str] = if ctx.profile.use_pulseaudio {
        &["pulseaudio", "pulseaudio-alsa"]
    } else if !matches!(ctx.profile.desktop.as_str(), "" | "none") {
        &["pipewire", "pipewire-alsa", "pipewire-pulse", "wireplumber"]
    } else {
        return 0;
    };
    let errors = install(ctx, packages);
    ui::report(errors, "Audio stack installed.");
    errors
}

fn bluetooth(ctx: &Context) -> u32 {
    if !ctx.profile.enable_bluetooth {
        return 0;
    }
    let mut errors = install(ctx, &["bluez", "bluez-utils"]);
    errors += enable_service(ctx, "bluetooth.service");
    ui::report(errors, "Bluetooth enabled.");
    errors
}

fn printing(ctx: &Context) -> u32 {
    if !ctx.profile.enable_printing {
        return 0;
    }
    let mut errors = install(ctx, &["cups", "cups-pdf"]);
    errors += enable_service(ctx, "cups.socket");
    ui::report(errors, "Printing support enabled.");
    errors
}

/// Package set and display manager for each supported desktop.
fn desktop_packages(name: &str) -> Option<(&'static [&'static str], &'static str)> {
    match name {
        "gnome" => Some((&["gnome", "gnome-tweaks"], "gdm.service")),
        "xfce" => Some((
            &["xfce4", "xfce4-goodies", "lightdm", "lightdm-gtk-greeter"],
            "lightdm.service",
        )),
        "kde" => Some((&["plasma", "konsole", "dolphin", "sddm"], "sddm.service")),
        _ => None,
    }
}

fn desktop(ctx: &Context) -> u32 {
    let Some((packages, dm)) = desktop_packages(ctx.profile.desktop.as_str()) else {
        return 0;
    };
    let mut errors = install(ctx, packages);
    errors += enable_service(ctx, dm);
    ui::report(errors, &format!("{} desktop installed.", ctx.profile.desktop));
    errors
}

fn aur(ctx: &Context) -> u32 {
    if !ctx.profile.enable_aur {
        return 0;
    }
    let restricted = ctx.profile.restricted_list();
    let Some(builder) = ctx
        .profile
        .user_list()
        .into_iter()
        .find(|u| !restricted.contains(u))
    else {
        ui::print_warning("AUR requested but no unrestricted user exists — skipping.");
        return 0;
    };

    let mut errors = install(ctx, &["git", "base-devel"]);

    // makepkg refuses to run as root; build as the first admin user.
    let build = Cmd::new("sh")
        .args([
            "-c",
            "cd && rm -rf yay-bin && git clone https://aur.archlinux.org/yay-bin.git && cd yay-bin && makepkg -si --noconfirm",
        ])
        .as_user(&builder);
    ctx.log.command(&build.rendered());
    let code = build.interactive();
    if code != 0 {
        ctx.log.failure(&build.rendered(), code);
        errors += 1;
    }

    ui::report(errors, "AUR helper installed.");
    errors
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const PACMAN_SAMPLE: &str = "\
[options]
#Color

#[core-testing]
#Include = /etc/pacman.d/mirrorlist

[core]
Include = /etc/pacman.d/mirrorlist

#[multilib]
#Include = /etc/pacman.d/mirrorlist
";

    #[test]
    fn multilib_uncomments_its_own_include_only() {
        let updated = enable_multilib_in(PACMAN_SAMPLE).unwrap();
        assert!(updated.contains("\n[multilib]\nInclude = /etc/pacman.d/mirrorlist\n"));
        // The other commented block stays commented.
        assert!(updated.contains("#[core-testing]\n#Include"));
    }

    #[test]
    fn multilib_enable_is_idempotent() {
        let once = enable_multilib_in(PACMAN_SAMPLE).unwrap();
        assert_eq!(enable_multilib_in(&once), None);
    }

    #[test]
    fn gpu_detection_matches_the_graphics_lines() {
        let nvidia = "01:00.0 VGA compatible controller: NVIDIA Corporation GA104\n";
        assert_eq!(gpu_packages(nvidia).unwrap().0, "NVIDIA");

        let amd = "05:00.0 VGA compatible controller: Advanced Micro Devices, Inc. [AMD/ATI] Navi\n";
        assert_eq!(gpu_packages(amd).unwrap().0, "AMD");

        let intel = "00:02.0 VGA compatible controller: Intel Corporation UHD Graphics\n";
        assert_eq!(gpu_packages(intel).unwrap().0, "Intel");
    }

    #[test]
    fn gpu_detection_ignores_non_graphics_devices() {
        // An Intel network controller must not trigger the Intel GPU set.
        let sample = "00:1f.6 Ethernet controller: Intel Corporation Ethernet Connection\n";
        assert_eq!(gpu_packages(sample), None);
        assert_eq!(gpu_packages(""), None);
    }

    #[test]
    fn guest_packages_cover_the_common_hypervisors() {
        assert!(guest_packages("kvm").is_some());
        assert!(guest_packages("oracle").is_some());
        assert_eq!(guest_packages("none"), None);
        assert_eq!(guest_packages(""), None);
    }

    #[test]
    fn desktop_table_knows_its_display_managers() {
        assert_eq!(desktop_packages("gnome").unwrap().1, "gdm.service");
        assert_eq!(desktop_packages("kde").unwrap().1, "sddm.service");
        assert_eq!(desktop_packages("none"), None);
        assert_eq!(desktop_packages(""), None);
    }
}
