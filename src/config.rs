use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::SetupError;

/// File name of the declarative install profile. Looked up in the working
/// directory first, then next to the executable (the chroot phase finds the
/// copy placed beside the binary).
pub const PROFILE_FILE: &str = "setup.toml";

// ── Install profile ───────────────────────────────────────────────────────────

/// Everything the operator decides ahead of time: locale, hostname, users
/// and the long tail of feature toggles. Loaded once at startup; a missing
/// or unparsable profile is a fatal precondition, not a recoverable default.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Profile {
    /// Virtual console keymap (`loadkeys`).
    pub keymap: String,
    /// Virtual console font (`setfont`); "default" leaves the kernel font.
    pub font: String,
    /// Timezone as `Region/City`.
    pub timezone: String,
    /// Locales to generate, comma separated. UTF-8 is favored unless a
    /// charset is given explicitly (e.g. `en_US ISO-8859-1`).
    pub locales: String,
    /// LANG for /etc/locale.conf.
    pub lang: String,
    /// LC_ALL-style fallback for the other LC_* settings.
    pub lc_all: String,
    /// LC_COLLATE (sorting / regex ranges).
    pub lc_collate: String,
    /// LANGUAGE fallback list, colon separated.
    pub language: String,

    /// Hostname; empty means "generate from the board name".
    pub hostname: String,
    /// Users to create, comma separated.
    pub users: String,
    /// Users kept out of the admin groups and sudoers.
    pub restricted_users: String,
    /// Users left without a password.
    pub passwdless_users: String,
    /// Whether sudo should still ask for a password.
    pub sudo_ask_pass: bool,

    pub enable_aur: bool,
    pub enable_multilib: bool,
    pub enable_firewall: bool,
    /// 0 = no SSH server, 1 = socket-activated daemon, 2 = permanent daemon.
    pub ssh_server_type: u8,
    pub use_lts_kernel: bool,
    /// Include os-prober support in GRUB for multiboot setups.
    pub multibooting: bool,
    /// Hardware clock on localtime instead of UTC (Windows multiboot).
    pub use_localtime: bool,
    /// 0 = no Xorg, 1 = minimal (server + xinit), 2 = full xorg group.
    pub xorg_install_type: u8,
    pub auto_detect_gpu: bool,
    /// Desktop environment: "" or "none", "gnome", "xfce", "kde".
    pub desktop: String,
    pub use_pulseaudio: bool,
    pub enable_bluetooth: bool,
    pub enable_printing: bool,
    pub enable_ntp: bool,

    /// Extra packages installed with the base system, space separated.
    pub base_pkgs: String,
}

impl Default for Profile {
    fn default() -> Self {
        Profile {
            keymap: "us".into(),
            font: "default".into(),
            timezone: "UTC".into(),
            locales: "en_US".into(),
            lang: "en_US.UTF-8".into(),
            lc_all: "en_US.UTF-8".into(),
            lc_collate: "C".into(),
            language: "en_US".into(),
            hostname: String::new(),
            users: String::new(),
            restricted_users: String::new(),
            passwdless_users: String::new(),
            sudo_ask_pass: true,
            enable_aur: false,
            enable_multilib: true,
            enable_firewall: false,
            ssh_server_type: 0,
            use_lts_kernel: false,
            multibooting: false,
            use_localtime: false,
            xorg_install_type: 0,
            auto_detect_gpu: true,
            desktop: String::new(),
            use_pulseaudio: false,
            enable_bluetooth: false,
            enable_printing: false,
            enable_ntp: true,
            base_pkgs: String::new(),
        }
    }
}

impl Profile {
    /// Finds the profile in the working directory or beside the executable.
    pub fn locate() -> Option<PathBuf> {
        let cwd = PathBuf::from(PROFILE_FILE);
        if cwd.is_file() {
            return Some(cwd);
        }
        let beside_exe = std::env::current_exe()
            .ok()?
            .parent()?
            .join(PROFILE_FILE);
        beside_exe.is_file().then_some(beside_exe)
    }

    pub fn load(path: &Path) -> Result<Self, SetupError> {
        let display = path.display().to_string();
        let content =
            std::fs::read_to_string(path).map_err(|_| SetupError::MissingProfile(display.clone()))?;
        let profile: Profile = toml::from_str(&content)
            .map_err(|e| SetupError::InvalidProfile(display.clone(), e.to_string()))?;
        profile.validate(&display)?;
        Ok(profile)
    }

    fn validate(&self, source: &str) -> Result<(), SetupError> {
        if !matches!(self.desktop.as_str(), "" | "none" | "gnome" | "xfce" | "kde") {
            return Err(SetupError::InvalidProfile(
                source.to_string(),
                format!("unknown desktop environment '{}'", self.desktop),
            ));
        }
        if self.ssh_server_type > 2 {
            return Err(SetupError::InvalidProfile(
                source.to_string(),
                format!("ssh_server_type must be 0..=2, got {}", self.ssh_server_type),
            ));
        }
        if self.xorg_install_type > 2 {
            return Err(SetupError::InvalidProfile(
                source.to_string(),
                format!("xorg_install_type must be 0..=2, got {}", self.xorg_install_type),
            ));
        }
        Ok(())
    }

    // ── Derived views ─────────────────────────────────────────────────────────

    fn split_list(list: &str) -> Vec<String> {
        list.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn user_list(&self) -> Vec<String> {
        Self::split_list(&self.users)
    }

    pub fn restricted_list(&self) -> Vec<String> {
        Self::split_list(&self.restricted_users)
    }

    pub fn passwdless_list(&self) -> Vec<String> {
        Self::split_list(&self.passwdless_users)
    }

    pub fn locale_list(&self) -> Vec<String> {
        Self::split_list(&self.locales)
    }

    pub fn kernel_package(&self) -> &'static str {
        if self.use_lts_kernel {
            "linux-lts"
        } else {
            "linux"
        }
    }

    pub fn extra_packages(&self) -> Vec<String> {
        self.base_pkgs
            .split_whitespace()
            .map(str::to_string)
            .collect()
    }

    /// The configured hostname, or one generated from the DMI board name
    /// (e.g. `arch-z270n-wifi`) when the profile leaves it empty.
    pub fn effective_hostname(&self) -> String {
        if !self.hostname.trim().is_empty() {
            return self.hostname.trim().to_string();
        }
        let board = std::fs::read_to_string("/sys/devices/virtual/dmi/id/board_name")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        match board {
            Some(board) => {
                let slug: String = board
                    .chars()
                    .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
                    .collect();
                format!("arch-{}", slug.trim_matches('-'))
            }
            None => "arch".to_string(),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_profile_gets_the_documented_defaults() {
        let p: Profile = toml::from_str("").unwrap();
        assert_eq!(p.keymap, "us");
        assert_eq!(p.lang, "en_US.UTF-8");
        assert!(p.enable_multilib);
        assert!(p.enable_ntp);
        assert!(!p.use_lts_kernel);
        assert_eq!(p.kernel_package(), "linux");
    }

    #[test]
    fn user_lists_split_on_commas_and_trim() {
        let p: Profile = toml::from_str(
            r#"
            users = "alice, bob,carol,"
            restricted_users = "guest"
            "#,
        )
        .unwrap();
        assert_eq!(p.user_list(), ["alice", "bob", "carol"]);
        assert_eq!(p.restricted_list(), ["guest"]);
        assert!(p.passwdless_list().is_empty());
    }

    #[test]
    fn extra_packages_split_on_whitespace() {
        let p: Profile = toml::from_str(r#"base_pkgs = "vim  htop""#).unwrap();
        assert_eq!(p.extra_packages(), ["vim", "htop"]);
    }

    #[test]
    fn lts_toggle_picks_the_lts_kernel() {
        let p: Profile = toml::from_str("use_lts_kernel = true").unwrap();
        assert_eq!(p.kernel_package(), "linux-lts");
    }

    #[test]
    fn unknown_desktop_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(PROFILE_FILE);
        std::fs::write(&path, r#"desktop = "cde""#).unwrap();
        let err = Profile::load(&path).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn missing_profile_is_a_fatal_precondition() {
        let err = Profile::load(Path::new("/no/such/setup.toml")).unwrap_err();
        assert!(matches!(err, SetupError::MissingProfile(_)));
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn explicit_hostname_wins_over_generation() {
        let p: Profile = toml::from_str(r#"hostname = "workstation""#).unwrap();
        assert_eq!(p.effective_hostname(), "workstation");
    }
}
