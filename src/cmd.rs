use std::process::{Command, Stdio};

use crate::{logger::Logger, ui};

/// Exit code reported when a program cannot be spawned at all.
/// Matches the shell's "command not found" convention.
pub const SPAWN_FAILURE: i32 = 127;

// ── Typed command builder ─────────────────────────────────────────────────────

/// A single external command with structured arguments.
///
/// Installation steps never concatenate shell strings: device names, mount
/// points and options travel as discrete argv entries and quoting only
/// happens at the logging/`su -c` boundary, via `shell-words`.
///
/// Every run mode returns a plain exit code and never an error. A sequence
/// of fire-and-forget install steps must be able to continue past any single
/// failed command; callers that care inspect the code explicitly.
#[derive(Debug, Clone)]
pub struct Cmd {
    program: String,
    args: Vec<String>,
    user: Option<String>,
}

impl Cmd {
    pub fn new(program: impl Into<String>) -> Self {
        Cmd {
            program: program.into(),
            args: Vec::new(),
            user: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Runs the command as another user through `su - <user> -c`, with a
    /// login shell so the target user's environment applies.
    pub fn as_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// The shell-quoted command line, as written to the session log.
    pub fn rendered(&self) -> String {
        let argv: Vec<&str> = std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect();
        let line = shell_words::join(argv);
        match &self.user {
            Some(user) => format!("su - {} -c {}", user, shell_words::join([line.as_str()])),
            None => line,
        }
    }

    fn command(&self) -> Command {
        match &self.user {
            Some(user) => {
                let argv: Vec<&str> = std::iter::once(self.program.as_str())
                    .chain(self.args.iter().map(String::as_str))
                    .collect();
                let joined = shell_words::join(argv);
                let mut c = Command::new("su");
                c.args(["-", user.as_str(), "-c", joined.as_str()]);
                c
            }
            None => {
                let mut c = Command::new(&self.program);
                c.args(&self.args);
                c
            }
        }
    }

    // ── Run modes ─────────────────────────────────────────────────────────────

    /// Discard mode: output suppressed entirely.
    pub fn quiet(&self) -> i32 {
        let status = self
            .command()
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
        match status {
            Ok(s) => s.code().unwrap_or(-1),
            Err(_) => SPAWN_FAILURE,
        }
    }

    /// Log mode: the command line goes into the session log first, combined
    /// stdout/stderr stream into the log file, and a non-zero exit gets an
    /// extra record after the output.
    pub fn logged(&self, log: &Logger) -> i32 {
        let line = self.rendered();
        log.command(&line);

        let mut command = self.command();
        match (log.sink(), log.sink()) {
            (Some(out), Some(err)) => {
                command.stdout(Stdio::from(out)).stderr(Stdio::from(err));
            }
            _ => {
                command.stdout(Stdio::null()).stderr(Stdio::null());
            }
        }

        let code = match command.status() {
            Ok(s) => s.code().unwrap_or(-1),
            Err(_) => SPAWN_FAILURE,
        };
        if code != 0 {
            log.failure(&line, code);
        }
        code
    }

    /// Hand over the terminal (stdin/stdout/stderr inherited).
    /// For interactive programs: `cfdisk`, `pacstrap`, `arch-chroot`.
    pub fn interactive(&self) -> i32 {
        match self.command().status() {
            Ok(s) => s.code().unwrap_or(-1),
            Err(_) => SPAWN_FAILURE,
        }
    }

    /// Capture mode: stdout as text. Failures (spawn error or non-zero exit)
    /// yield an empty string — callers treat "no output" and "failed" alike.
    pub fn read(&self) -> String {
        match self.command().stderr(Stdio::null()).output() {
            Ok(output) if output.status.success() => {
                String::from_utf8_lossy(&output.stdout).trim_end().to_string()
            }
            _ => String::new(),
        }
    }

    /// Appends stdout to `file` (the `>> file` idiom), stderr to the session
    /// log. Used for `genfstab`.
    pub fn append_to(&self, file: &std::path::Path, log: &Logger) -> i32 {
        let line = format!("{} >> {}", self.rendered(), file.display());
        log.command(&line);

        let out = match std::fs::OpenOptions::new().append(true).create(true).open(file) {
            Ok(f) => f,
            Err(_) => {
                log.failure(&line, SPAWN_FAILURE);
                return SPAWN_FAILURE;
            }
        };

        let mut command = self.command();
        command.stdout(Stdio::from(out));
        match log.sink() {
            Some(err) => command.stderr(Stdio::from(err)),
            None => command.stderr(Stdio::null()),
        };

        let code = match command.status() {
            Ok(s) => s.code().unwrap_or(-1),
            Err(_) => SPAWN_FAILURE,
        };
        if code != 0 {
            log.failure(&line, code);
        }
        code
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Runs a command silently, discarding output and ignoring any error.
/// For cleanup operations where partial failure is acceptable (e.g. umount).
pub fn best_effort(program: &str, args: &[&str]) {
    let _ = Cmd::new(program).args(args.iter().copied()).quiet();
}

/// Runs a command in log mode behind a spinner.
/// On success prints `done_msg` with a ✓; on failure a ✗ naming the exit
/// code. Returns the exit code either way.
pub fn run_with_spinner(cmd: &Cmd, log: &Logger, spin_msg: &str, done_msg: &str) -> i32 {
    let pb = ui::spinner(spin_msg);
    let code = cmd.logged(log);
    pb.finish_and_clear();

    if code == 0 {
        ui::print_success(done_msg);
    } else {
        ui::print_error(&format!("'{}' failed with exit code {}.", cmd.rendered(), code));
    }
    code
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rendered_quotes_arguments_with_spaces() {
        let cmd = Cmd::new("mount").arg("/dev/sda1").arg("/mnt/my mount");
        assert_eq!(cmd.rendered(), "mount /dev/sda1 '/mnt/my mount'");
    }

    #[test]
    fn rendered_wraps_as_user_in_su() {
        let cmd = Cmd::new("makepkg").arg("-si").as_user("builder");
        assert_eq!(cmd.rendered(), "su - builder -c 'makepkg -si'");
    }

    #[test]
    fn quiet_returns_the_exit_code() {
        assert_eq!(Cmd::new("true").quiet(), 0);
        assert_eq!(Cmd::new("sh").args(["-c", "exit 7"]).quiet(), 7);
    }

    #[test]
    fn missing_program_maps_to_spawn_failure() {
        let code = Cmd::new("arch-setup-no-such-binary").quiet();
        assert_eq!(code, SPAWN_FAILURE);
    }

    #[test]
    fn read_captures_stdout() {
        assert_eq!(Cmd::new("echo").arg("hello").read(), "hello");
    }

    #[test]
    fn read_yields_empty_on_failure() {
        assert_eq!(Cmd::new("sh").args(["-c", "echo oops; exit 1"]).read(), "");
    }

    #[test]
    fn append_to_accumulates_output() {
        let dir = tempfile::tempdir().unwrap();
        let log = Logger::new(dir.path().join("setup.log"));
        let fstab = dir.path().join("fstab");

        std::fs::write(&fstab, "# existing\n").unwrap();
        Cmd::new("echo").arg("/dev/sda2 / ext4").append_to(&fstab, &log);
        let content = std::fs::read_to_string(&fstab).unwrap();
        assert_eq!(content, "# existing\n/dev/sda2 / ext4\n");
    }

    #[test]
    fn logged_records_command_output_and_failure() {
        let dir = tempfile::tempdir().unwrap();
        let log = Logger::new(dir.path().join("setup.log"));

        let ok = Cmd::new("echo").arg("captured").logged(&log);
        let bad = Cmd::new("sh").args(["-c", "exit 3"]).logged(&log);
        assert_eq!(ok, 0);
        assert_eq!(bad, 3);

        let content = std::fs::read_to_string(log.path()).unwrap();
        assert!(content.contains("# echo captured"));
        assert!(content.contains("captured"));
        assert!(content.contains("exited with code 3"));
    }
}
