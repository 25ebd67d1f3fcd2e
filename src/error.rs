use thiserror::Error;

#[derive(Debug, Error)]
pub enum SetupError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Prompt error: {0}")]
    Prompt(#[from] dialoguer::Error),

    #[error("Installation cancelled by user")]
    Cancelled,

    #[error("This installer must be run as root")]
    NotRoot,

    #[error("Not running on a supported live environment or installer chroot")]
    WrongEnvironment,

    #[error("Install profile '{0}' is missing")]
    MissingProfile(String),

    #[error("Install profile '{0}' could not be parsed: {1}")]
    InvalidProfile(String, String),

    #[error("No network connectivity — check your connection and try again")]
    NoNetwork,

    #[error("Package database refresh failed (see the session log)")]
    DatabaseRefresh { forced: bool },

    #[error("Console keymap/font setup failed — is the keymap name valid?")]
    ConsoleSetup,

    #[error("Base system installation failed")]
    BaseInstall,

    #[error("Bootloader installation failed")]
    Bootloader,
}

impl SetupError {
    /// Stable exit codes for scripted/unattended use. Changing a value here
    /// is a breaking change.
    pub fn exit_code(&self) -> i32 {
        match self {
            SetupError::MissingProfile(_) | SetupError::InvalidProfile(..) => 2,
            SetupError::WrongEnvironment => 3,
            SetupError::NotRoot => 4,
            SetupError::NoNetwork => 5,
            SetupError::DatabaseRefresh { forced: false } => 6,
            SetupError::DatabaseRefresh { forced: true } => 7,
            SetupError::ConsoleSetup => 8,
            SetupError::BaseInstall => 9,
            SetupError::Bootloader => 10,
            _ => 1,
        }
    }
}
