use std::{path::PathBuf, process::ExitCode};

/// How a run ended. Mapped to a process exit code only in `main`.
#[derive(Debug)]
pub enum Outcome {
    /// Onboarding finished, the account was logged out and the session wiped.
    Completed,
    /// No config existed; an example one was written for the user to edit.
    ConfigCreated,
    Fatal(Fatal),
}

#[derive(Debug, thiserror::Error)]
pub enum Fatal {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("invalid {0} entered 3 times")]
    PairingInput(&'static str),

    #[error("device logged out")]
    LoggedOut,

    #[error("a new session was opened elsewhere, close it first")]
    ConcurrentSession,

    #[error("session corrupted, re-authenticate")]
    BadSession,

    #[error("connection closed with unknown status code {0}")]
    UnknownClose(u16),

    #[error("profile folder {0:?} not found")]
    ProfileFolderMissing(PathBuf),

    #[error("no .jpg/.jpeg/.png image in profile folder {0:?}")]
    NoProfileImage(PathBuf),

    #[error("interrupted")]
    Interrupted,

    #[error(transparent)]
    Startup(#[from] anyhow::Error),
}

impl Outcome {
    pub fn code(&self) -> u8 {
        match self {
            Outcome::Completed | Outcome::ConfigCreated => 0,
            Outcome::Fatal(_) => 1,
        }
    }

    pub fn exit_code(&self) -> ExitCode {
        ExitCode::from(self.code())
    }
}

impl From<Fatal> for Outcome {
    fn from(fatal: Fatal) -> Self {
        Outcome::Fatal(fatal)
    }
}
