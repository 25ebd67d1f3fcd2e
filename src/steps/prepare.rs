use crate::{
    cmd::{self, Cmd},
    error::SetupError,
    session::Context,
    ui,
};

// ── Pre-install checks and console setup ──────────────────────────────────────

/// Verifies network reachability with a single ping. No network is a fatal
/// precondition: everything after this point downloads packages.
pub fn connectivity(ctx: &Context) -> Result<(), SetupError> {
    let pb = ui::spinner("Checking network connectivity…");
    let code = Cmd::new("ping").args(["-c", "1", "-W", "5", "1.1.1.1"]).logged(&ctx.log);
    pb.finish_and_clear();

    if code != 0 {
        ui::print_error("No network connectivity.");
        return Err(SetupError::NoNetwork);
    }
    ui::print_success("Network is reachable.");
    Ok(())
}

/// Refreshes the pacman package databases. `force` re-downloads them even
/// when they look current (needed after enabling a new repository).
pub fn refresh_databases(ctx: &Context, force: bool) -> Result<(), SetupError> {
    let pb = ui::spinner("Refreshing package databases, please wait…");
    let flag = if force { "-Syy" } else { "-Sy" };
    let code = Cmd::new("pacman").arg(flag).logged(&ctx.log);
    pb.finish_and_clear();

    if code != 0 {
        ui::print_error("Database refresh failed — see the session log.");
        return Err(SetupError::DatabaseRefresh { forced: force });
    }
    ui::print_success("Package databases are up to date.");
    Ok(())
}

/// Loads the console keymap (fatal — a wrong keymap makes every following
/// prompt hazardous) and the console font (cosmetic, warn-only).
pub fn console_setup(ctx: &Context) -> Result<(), SetupError> {
    let keymap = ctx.profile.keymap.clone();
    let code = Cmd::new("loadkeys").arg(&keymap).logged(&ctx.log);
    if code != 0 {
        ui::print_error(&format!("Keymap '{}' could not be loaded.", keymap));
        return Err(SetupError::ConsoleSetup);
    }
    ui::print_success(&format!("Keymap '{}' loaded.", keymap));

    let font = ctx.profile.font.trim();
    if !font.is_empty() && font != "default" {
        let code = Cmd::new("setfont").arg(font).logged(&ctx.log);
        if code != 0 {
            ui::print_warning(&format!("Console font '{}' not found — keeping the default.", font));
        } else {
            ui::print_success(&format!("Console font '{}' set.", font));
        }
    }
    Ok(())
}

/// Enables NTP synchronization in the live environment. An accurate clock
/// prevents package-signature validation errors; failure is a warning only.
pub fn ntp(ctx: &Context) {
    if !ctx.profile.enable_ntp {
        return;
    }
    let code = Cmd::new("timedatectl").args(["set-ntp", "true"]).logged(&ctx.log);
    if code == 0 {
        ui::print_success("NTP time synchronization enabled.");
    } else {
        ui::print_warning("Could not enable NTP — beware of signature issues.");
    }
}

/// Ranks the mirrorlist by download rate. Slow but worthwhile on a full
/// install; `--skip-mirrorlist` keeps whatever the live environment shipped.
pub fn rank_mirrors(ctx: &Context) {
    if ctx.flags.skip_mirrorlist {
        ui::print_info("Keeping the shipped mirrorlist (--skip-mirrorlist).");
        return;
    }

    let pb = ui::spinner("Ranking pacman mirrors — this can take a minute…");
    let code = Cmd::new("reflector")
        .args([
            "--protocol",
            "https",
            "--latest",
            "20",
            "--sort",
            "rate",
            "--save",
            "/etc/pacman.d/mirrorlist",
        ])
        .logged(&ctx.log);
    pb.finish_and_clear();

    if code == 0 {
        ui::print_success("Mirrorlist ranked by download rate.");
    } else {
        ui::print_warning("Mirror ranking failed — keeping the shipped mirrorlist.");
    }
}

// ── Best-effort cleanup before partitioning ───────────────────────────────────

/// Unmounts leftovers from a previous attempt so formatting can't hit a
/// busy device.
pub fn release_previous_attempt(ctx: &Context) {
    ctx.log.note("releasing any mounts from a previous attempt");
    cmd::best_effort("umount", &["-R", crate::lsblk::STAGING_ROOT]);
}
