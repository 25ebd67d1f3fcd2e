use std::{
    fs::{self, OpenOptions},
    io::{self, Write},
    path::Path,
};

/// Outcome of a patch operation. IO problems travel separately as
/// `io::Error`; `NotFound` means the file was left byte-for-byte unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchOutcome {
    Applied,
    NotFound,
}

// ── Line-oriented patch primitives ────────────────────────────────────────────
//
// Every post-install configuration change is expressed as "find the line that
// starts with X, replace/uncomment it". The target files are heterogeneous
// (shell-style KEY=value, ini-like blocks), so there is no structured parser:
// the operations are idempotent and safe to re-run instead.

/// Rewrites the first (or every) line starting with `prefix` to
/// `replacement`. An unmatched prefix performs no write at all.
pub fn replace_line(
    path: impl AsRef<Path>,
    prefix: &str,
    replacement: &str,
    only_first: bool,
) -> io::Result<PatchOutcome> {
    transform(path, |line, matched| {
        if line.starts_with(prefix) && (!only_first || !matched) {
            Some(replacement.to_string())
        } else {
            None
        }
    })
}

/// Strips the leading comment marker from the first line matching
/// `marker + prefix`. Running it twice reports `NotFound` the second time:
/// the marker is already gone.
pub fn uncomment_line(
    path: impl AsRef<Path>,
    prefix: &str,
    marker: &str,
) -> io::Result<PatchOutcome> {
    transform(path, |line, matched| {
        if matched {
            return None;
        }
        line.strip_prefix(marker)
            .filter(|rest| rest.starts_with(prefix))
            .map(str::to_string)
    })
}

/// 1-based line number of the first line starting with `prefix`.
pub fn line_number(path: impl AsRef<Path>, prefix: &str) -> io::Result<Option<usize>> {
    let content = fs::read_to_string(path)?;
    Ok(content
        .lines()
        .position(|line| line.starts_with(prefix))
        .map(|i| i + 1))
}

/// Appends a line, creating the file if necessary.
pub fn write_line(path: impl AsRef<Path>, text: &str) -> io::Result<()> {
    let mut f = OpenOptions::new().append(true).create(true).open(path)?;
    writeln!(f, "{}", text)
}

/// Replaces the whole file with a single line.
pub fn overwrite(path: impl AsRef<Path>, text: &str) -> io::Result<()> {
    fs::write(path, format!("{}\n", text))
}

/// First line of the file, without its newline. `None` if unreadable or
/// empty — used for the hostname sentinel probe.
pub fn read_first_line(path: impl AsRef<Path>) -> Option<String> {
    let content = fs::read_to_string(path).ok()?;
    content.lines().next().map(str::to_string)
}

// ── Shared rewrite machinery ──────────────────────────────────────────────────

/// Applies `edit(line, already_matched)` to each line and writes the file
/// back only when at least one edit fired. The trailing-newline state of the
/// original is preserved.
fn transform<F>(path: impl AsRef<Path>, mut edit: F) -> io::Result<PatchOutcome>
where
    F: FnMut(&str, bool) -> Option<String>,
{
    let path = path.as_ref();
    let content = fs::read_to_string(path)?;

    let mut matched = false;
    let lines: Vec<String> = content
        .lines()
        .map(|line| match edit(line, matched) {
            Some(new) => {
                matched = true;
                new
            }
            None => line.to_string(),
        })
        .collect();

    if !matched {
        return Ok(PatchOutcome::NotFound);
    }

    let mut out = lines.join("\n");
    if content.ends_with('\n') {
        out.push('\n');
    }
    fs::write(path, out)?;
    Ok(PatchOutcome::Applied)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn fixture(content: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conf");
        fs::write(&path, content).unwrap();
        (dir, path)
    }

    #[test]
    fn replace_line_rewrites_only_the_first_match() {
        let (_dir, path) = fixture("keep\nCacheDir = /old\nCacheDir = /old\n");
        let out = replace_line(&path, "CacheDir", "CacheDir = /mnt/pkgcache", true).unwrap();
        assert_eq!(out, PatchOutcome::Applied);
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "keep\nCacheDir = /mnt/pkgcache\nCacheDir = /old\n"
        );
    }

    #[test]
    fn replace_line_can_rewrite_every_match() {
        let (_dir, path) = fixture("x=1\nx=2\ny=3\n");
        replace_line(&path, "x=", "x=9", false).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "x=9\nx=9\ny=3\n");
    }

    #[test]
    fn unmatched_prefix_leaves_the_file_byte_identical() {
        let original = "a=1\nb=2";
        let (_dir, path) = fixture(original);
        let before = fs::metadata(&path).unwrap().modified().unwrap();
        let out = replace_line(&path, "missing", "whatever", true).unwrap();
        assert_eq!(out, PatchOutcome::NotFound);
        assert_eq!(fs::read_to_string(&path).unwrap(), original);
        assert_eq!(fs::metadata(&path).unwrap().modified().unwrap(), before);
    }

    #[test]
    fn uncomment_line_is_idempotent() {
        let (_dir, path) = fixture("#en_US.UTF-8 UTF-8\n#de_DE.UTF-8 UTF-8\n");
        let first = uncomment_line(&path, "en_US.UTF-8", "#").unwrap();
        assert_eq!(first, PatchOutcome::Applied);
        let after_once = fs::read_to_string(&path).unwrap();
        assert_eq!(after_once, "en_US.UTF-8 UTF-8\n#de_DE.UTF-8 UTF-8\n");

        // Second application: no commented match left, file untouched.
        let second = uncomment_line(&path, "en_US.UTF-8", "#").unwrap();
        assert_eq!(second, PatchOutcome::NotFound);
        assert_eq!(fs::read_to_string(&path).unwrap(), after_once);
    }

    #[test]
    fn line_number_is_one_based() {
        let (_dir, path) = fixture("alpha\nbeta\ngamma\n");
        assert_eq!(line_number(&path, "beta").unwrap(), Some(2));
        assert_eq!(line_number(&path, "delta").unwrap(), None);
    }

    #[test]
    fn write_line_creates_and_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fresh");
        write_line(&path, "first").unwrap();
        write_line(&path, "second").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "first\nsecond\n");
    }

    #[test]
    fn overwrite_truncates() {
        let (_dir, path) = fixture("old content\nmore\n");
        overwrite(&path, "myhostname").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "myhostname\n");
    }

    #[test]
    fn read_first_line_strips_the_newline() {
        let (_dir, path) = fixture("archiso\n");
        assert_eq!(read_first_line(&path).as_deref(), Some("archiso"));
        assert_eq!(read_first_line("/no/such/file"), None);
    }

    #[test]
    fn files_without_trailing_newline_keep_that_shape() {
        let (_dir, path) = fixture("a=1\nb=2");
        replace_line(&path, "b=", "b=9", true).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "a=1\nb=9");
    }
}
