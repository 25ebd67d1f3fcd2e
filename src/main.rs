mod cmd;
mod config;
mod error;
mod logger;
mod lsblk;
mod session;
mod steps;
mod textfile;
mod ui;

use dialoguer::Confirm;

use config::{Profile, PROFILE_FILE};
use error::SetupError;
use logger::Logger;
use session::{BootMode, Context, Flags, Phase};

// ── Entry point ───────────────────────────────────────────────────────────────
//
// Exit codes are a stable contract for unattended use:
//   1  generic failure / cancelled
//   2  install profile missing or invalid
//   3  not a supported live environment or installer chroot
//   4  not running as root
//   5  no network connectivity
//   6  package database refresh failed
//   7  forced database refresh failed
//   8  console keymap setup failed
//   9  base system installation failed
//  10  bootloader installation failed

fn main() {
    let flags = parse_flags();

    if let Err(e) = run(flags) {
        println!();
        ui::print_error(&format!("{}", e));
        std::process::exit(e.exit_code());
    }
}

/// Supported flags: `--debug`, `--skip-mirrorlist`, plus one positional
/// argument (the MBR GRUB device) on the chroot re-invocation.
fn parse_flags() -> Flags {
    let mut flags = Flags::default();
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--debug" => flags.debug = true,
            "--skip-mirrorlist" => flags.skip_mirrorlist = true,
            other if !other.starts_with('-') => {
                flags.grub_device_arg = Some(other.to_string());
            }
            other => {
                eprintln!("ignoring unknown flag '{}'", other);
            }
        }
    }
    flags
}

fn run(flags: Flags) -> Result<(), SetupError> {
    // ── Guards ────────────────────────────────────────────────────────────────
    let phase = session::detect_phase()?;
    check_root()?;

    let profile_path =
        Profile::locate().ok_or_else(|| SetupError::MissingProfile(PROFILE_FILE.to_string()))?;
    let profile = Profile::load(&profile_path)?;

    let log = Logger::session();
    if flags.debug {
        log.clear();
    }

    let boot_mode = BootMode::detect();
    let mut ctx = Context::new(profile, log, boot_mode, flags);

    match phase {
        Phase::Live => live_phase(&mut ctx),
        Phase::Chroot => steps::configure::run(&mut ctx),
    }
}

// ── Live phase ────────────────────────────────────────────────────────────────

fn live_phase(ctx: &mut Context) -> Result<(), SetupError> {
    ui::print_banner();
    ui::print_info(&format!("{} live environment detected.", ctx.boot_mode.label()));
    ui::print_info("This wizard installs Arch Linux in two phases: live setup, then chroot.");
    ctx.log.note(&format!("boot mode: {}", ctx.boot_mode.label()));

    if !ctx.flags.debug {
        println!();
        if !Confirm::new()
            .with_prompt("Start the installation?")
            .default(true)
            .interact()?
        {
            return Err(SetupError::Cancelled);
        }
    }

    // ── Step 1: environment preparation ───────────────────────────────────────
    ui::print_step(1, 5, "System Preparation");
    steps::prepare::connectivity(ctx)?;
    steps::prepare::refresh_databases(ctx, false)?;
    steps::prepare::console_setup(ctx)?;
    steps::prepare::ntp(ctx);

    // ── Step 2: mirrors ───────────────────────────────────────────────────────
    ui::print_step(2, 5, "Mirror Selection");
    steps::prepare::rank_mirrors(ctx);

    // ── Step 3: partition the disks ───────────────────────────────────────────
    ui::print_step(3, 5, "Disk Partitioning");
    steps::prepare::release_previous_attempt(ctx);
    steps::partition::run(ctx)?;

    // ── Step 4: assign and mount roles ────────────────────────────────────────
    ui::print_step(4, 5, "Partition Mounting");
    steps::mount::run(ctx)?;

    // ── Step 5: bootstrap + chroot handoff ────────────────────────────────────
    ui::print_step(5, 5, "Base System & Handoff");
    steps::base::run(ctx)?;

    Ok(())
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Checks that the process is running as root (UID 0).
fn check_root() -> Result<(), SetupError> {
    let uid = std::fs::read_to_string("/proc/self/status")
        .ok()
        .and_then(|s| {
            s.lines()
                .find(|l| l.starts_with("Uid:"))
                .and_then(|l| l.split_whitespace().nth(1))
                .and_then(|v| v.parse::<u32>().ok())
        })
        .unwrap_or(1); // default to non-root if unreadable

    if uid != 0 {
        return Err(SetupError::NotRoot);
    }

    Ok(())
}
