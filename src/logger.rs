use std::{
    fs::{self, File, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
};

/// Session log location while the installer is running.
/// `relocate` copies it into the installed system at the end of the run.
pub const SESSION_LOG: &str = "/tmp/arch-setup.log";

// ── Session log ───────────────────────────────────────────────────────────────

/// Append-only session log. Every executed command line, its combined
/// stdout/stderr and any non-zero exit code end up here, plus freeform
/// diagnostic notes. Logging failures are swallowed: the log must never
/// take down the install it is documenting.
#[derive(Debug, Clone)]
pub struct Logger {
    path: PathBuf,
}

impl Logger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Logger { path: path.into() }
    }

    /// The log at its standard session path.
    pub fn session() -> Self {
        Logger::new(SESSION_LOG)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, text: &str) {
        if let Ok(mut f) = OpenOptions::new().append(true).create(true).open(&self.path) {
            let _ = writeln!(f, "{}", text);
        }
    }

    /// Appends a freeform diagnostic line.
    pub fn note(&self, text: &str) {
        self.append(text);
    }

    /// Appends a command header before the command executes.
    /// Format matches the log's shell heritage: a blank line, then `# <cmd>`.
    pub fn command(&self, line: &str) {
        self.append(&format!("\n# {}", line));
    }

    /// Records a failing exit code after the command's own output.
    pub fn failure(&self, line: &str, code: i32) {
        self.append(&format!("## '{}' exited with code {}", line, code));
    }

    /// An append handle suitable for redirecting child stdout/stderr.
    pub fn sink(&self) -> Option<File> {
        OpenOptions::new().append(true).create(true).open(&self.path).ok()
    }

    /// Removes a stale log from a previous run (debug flag).
    pub fn clear(&self) {
        let _ = fs::remove_file(&self.path);
    }

    /// Copies the log to its permanent home (e.g. under the staging root's
    /// `/var/log`). The temporary file is left behind; `/tmp` is volatile.
    pub fn relocate(&self, dest: &Path) -> io::Result<()> {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(&self.path, dest)?;
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_logger() -> (tempfile::TempDir, Logger) {
        let dir = tempfile::tempdir().unwrap();
        let log = Logger::new(dir.path().join("setup.log"));
        (dir, log)
    }

    #[test]
    fn note_appends_lines_in_order() {
        let (_dir, log) = temp_logger();
        log.note("first");
        log.note("second");
        let content = fs::read_to_string(log.path()).unwrap();
        assert_eq!(content, "first\nsecond\n");
    }

    #[test]
    fn command_header_is_prefixed_and_separated() {
        let (_dir, log) = temp_logger();
        log.command("mount /dev/sda1 /mnt");
        let content = fs::read_to_string(log.path()).unwrap();
        assert!(content.contains("\n# mount /dev/sda1 /mnt\n"));
    }

    #[test]
    fn failure_records_the_exit_code() {
        let (_dir, log) = temp_logger();
        log.failure("mkfs.xfs /dev/sdb1", 1);
        let content = fs::read_to_string(log.path()).unwrap();
        assert!(content.contains("exited with code 1"));
    }

    #[test]
    fn relocate_copies_and_keeps_the_original() {
        let (dir, log) = temp_logger();
        log.note("kept");
        let dest = dir.path().join("var/log/arch-setup.log");
        log.relocate(&dest).unwrap();
        assert_eq!(fs::read_to_string(&dest).unwrap(), "kept\n");
        assert!(log.path().exists());
    }

    #[test]
    fn clear_is_silent_when_nothing_exists() {
        let (_dir, log) = temp_logger();
        log.clear();
        log.clear();
        assert!(!log.path().exists());
    }
}
