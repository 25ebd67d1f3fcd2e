use console::style;
use dialoguer::Input;

use crate::{cmd::Cmd, error::SetupError, session::Context, ui};

// ── Menu state ────────────────────────────────────────────────────────────────

/// What the operator picked on one round of the tool menu.
#[derive(Debug, PartialEq, Eq)]
enum Selection {
    Tool(&'static str),
    Freeform,
    Done,
    Invalid,
}

fn parse_selection(input: &str) -> Selection {
    match input.trim().to_ascii_uppercase().as_str() {
        "" => Selection::Done,
        "G" => Selection::Tool("cgdisk"),
        "F" => Selection::Tool("cfdisk"),
        "O" => Selection::Freeform,
        _ => Selection::Invalid,
    }
}

// ── Partitioning menu ─────────────────────────────────────────────────────────

/// Interactive partitioning loop. The operator either launches one of the
/// curses partitioning tools against a device, issues an arbitrary command
/// line, or presses ENTER to move on. No partition-count check happens
/// here — whether enough partitions exist is the Mounting Menu's problem.
pub fn run(ctx: &mut Context) -> Result<(), SetupError> {
    let mut show_guide = true;
    let mut revisit = false;

    loop {
        render(ctx, show_guide, revisit);
        show_guide = true;

        let input: String = Input::new()
            .with_prompt("Selection (G/F/O, ENTER to continue)")
            .allow_empty(true)
            .interact_text()?;

        match parse_selection(&input) {
            Selection::Done => return Ok(()),
            Selection::Tool(tool) => {
                run_tool(ctx, tool)?;
                revisit = true;
            }
            Selection::Freeform => {
                run_freeform(ctx)?;
                revisit = true;
            }
            // Invalid input: redraw with the guide hidden to cut the noise
            // on repeated mistakes.
            Selection::Invalid => show_guide = false,
        }
    }
}

fn render(ctx: &Context, show_guide: bool, revisit: bool) {
    ui::print_menu_header("Disk Partitioning");

    let listing = Cmd::new("lsblk")
        .args(["--output", "NAME,SIZE,TYPE,FSTYPE,MOUNTPOINT"])
        .read();
    if !listing.is_empty() {
        println!("{}", listing);
        println!();
    }

    if revisit {
        ui::print_info("Press ENTER once the partition table looks right.");
    } else {
        ui::print_info("If you don't need to partition, just press ENTER.");
    }

    if show_guide {
        println!();
        // The boot mode decides which tool leads the list.
        if ctx.boot_mode.is_uefi() {
            tool_entry('G', "cgdisk", "recommended for UEFI");
            tool_entry('F', "cfdisk", "for BIOS/CSM disks");
        } else {
            tool_entry('F', "cfdisk", "recommended for BIOS/CSM");
            tool_entry('G', "cgdisk", "for GPT/UEFI disks");
        }
        tool_entry('O', "something else", "raw command line");
        println!();
    }
}

fn tool_entry(key: char, tool: &str, hint: &str) {
    println!(
        "   Enter '{}' to partition using {}  {}",
        style(key).cyan().bold(),
        style(tool).white().bold(),
        style(format!("({})", hint)).dim()
    );
}

// ── Tool dispatch ─────────────────────────────────────────────────────────────

/// Prompts for a target device and hands the terminal to a partitioning
/// tool. Short names are normalized to `/dev/<name>`; empty input cancels.
fn run_tool(ctx: &mut Context, tool: &str) -> Result<(), SetupError> {
    let input: String = Input::new()
        .with_prompt(format!("Device to partition with {} (e.g. 'sda' or '/dev/sda')", tool))
        .allow_empty(true)
        .interact_text()?;

    let name = input.trim();
    if name.is_empty() {
        return Ok(());
    }
    let device = if name.starts_with('/') {
        name.to_string()
    } else {
        format!("/dev/{}", name)
    };

    let cmd = Cmd::new(tool).arg(&device);
    ctx.log.command(&cmd.rendered());
    let code = cmd.interactive();
    if code != 0 {
        ctx.log.failure(&cmd.rendered(), code);
        ui::print_warning(&format!("{} exited with code {}.", tool, code));
    }
    Ok(())
}

/// The escape hatch: a raw command line, executed verbatim with the
/// terminal handed over. The operator already has full shell access on the
/// live ISO — this is a convenience, not a security boundary.
fn run_freeform(ctx: &mut Context) -> Result<(), SetupError> {
    let input: String = Input::new()
        .with_prompt("Partitioning command line (e.g. 'fdisk /dev/sda')")
        .allow_empty(true)
        .interact_text()?;

    let Ok(words) = shell_words::split(input.trim()) else {
        ui::print_warning("Unbalanced quoting — command not run.");
        return Ok(());
    };
    let Some((program, args)) = words.split_first() else {
        return Ok(());
    };

    let cmd = Cmd::new(program).args(args.iter().cloned());
    ctx.log.command(&cmd.rendered());
    let code = cmd.interactive();
    if code != 0 {
        ctx.log.failure(&cmd.rendered(), code);
        ui::print_warning(&format!("Command exited with code {}.", code));
    }
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_leaves_the_menu() {
        assert_eq!(parse_selection(""), Selection::Done);
        assert_eq!(parse_selection("   "), Selection::Done);
    }

    #[test]
    fn tool_keys_are_case_insensitive() {
        assert_eq!(parse_selection("g"), Selection::Tool("cgdisk"));
        assert_eq!(parse_selection("G"), Selection::Tool("cgdisk"));
        assert_eq!(parse_selection("f"), Selection::Tool("cfdisk"));
        assert_eq!(parse_selection("o"), Selection::Freeform);
    }

    #[test]
    fn anything_else_is_invalid() {
        assert_eq!(parse_selection("x"), Selection::Invalid);
        assert_eq!(parse_selection("gf"), Selection::Invalid);
        assert_eq!(parse_selection("1"), Selection::Invalid);
    }
}
