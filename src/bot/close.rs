//! Classification of connection-close status codes.

use phf::phf_map;

use crate::outcome::Fatal;

pub const LOGGED_OUT: u16 = 401;
/// Also sent for timeouts.
pub const CONNECTION_LOST: u16 = 408;
pub const CONNECTION_CLOSED: u16 = 428;
pub const BAD_SESSION: u16 = 500;
pub const RESTART_REQUIRED: u16 = 515;

static REASONS: phf::Map<u16, &'static str> = phf_map! {
    401u16 => "logged out",
    403u16 => "forbidden",
    408u16 => "connection lost",
    411u16 => "multi-device mismatch",
    428u16 => "connection closed",
    440u16 => "connection replaced",
    500u16 => "bad session",
    503u16 => "service unavailable",
    515u16 => "restart required",
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseAction {
    LoggedOut,
    ConcurrentSession,
    BadSession,
    Retry,
    Unknown(u16),
}

/// Maps a close status code (0 when absent) to what the bot does next.
pub fn classify(status_code: Option<u16>) -> CloseAction {
    match status_code.unwrap_or(0) {
        LOGGED_OUT => CloseAction::LoggedOut,
        RESTART_REQUIRED => CloseAction::ConcurrentSession,
        BAD_SESSION => CloseAction::BadSession,
        CONNECTION_CLOSED | CONNECTION_LOST => CloseAction::Retry,
        code => CloseAction::Unknown(code),
    }
}

pub fn reason_name(code: u16) -> &'static str {
    REASONS.get(&code).copied().unwrap_or("unknown")
}

impl CloseAction {
    pub fn wipes_session(self) -> bool {
        matches!(
            self,
            CloseAction::LoggedOut | CloseAction::ConcurrentSession | CloseAction::BadSession
        )
    }

    /// Whether the cached pairing identity must be forgotten.
    pub fn clears_identity(self) -> bool {
        self == CloseAction::BadSession
    }

    /// The fatal reason ending the run, `None` when the bootstrap is retried.
    pub fn fatal(self) -> Option<Fatal> {
        match self {
            CloseAction::LoggedOut => Some(Fatal::LoggedOut),
            CloseAction::ConcurrentSession => Some(Fatal::ConcurrentSession),
            CloseAction::BadSession => Some(Fatal::BadSession),
            CloseAction::Retry => None,
            CloseAction::Unknown(code) => Some(Fatal::UnknownClose(code)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_codes_wipe() {
        for (code, action) in [
            (401, CloseAction::LoggedOut),
            (515, CloseAction::ConcurrentSession),
            (500, CloseAction::BadSession),
        ] {
            let got = classify(Some(code));
            assert_eq!(got, action);
            assert!(got.wipes_session());
            assert!(got.fatal().is_some());
        }
        assert!(classify(Some(500)).clears_identity());
        assert!(!classify(Some(401)).clears_identity());
    }

    #[test]
    fn test_transient_codes_retry() {
        for code in [428, 408] {
            let action = classify(Some(code));
            assert_eq!(action, CloseAction::Retry);
            assert!(!action.wipes_session());
            assert!(action.fatal().is_none());
        }
    }

    #[test]
    fn test_unknown_codes() {
        assert_eq!(classify(None), CloseAction::Unknown(0));
        assert_eq!(classify(Some(440)), CloseAction::Unknown(440));
        assert!(!classify(Some(403)).wipes_session());
        assert!(matches!(
            classify(Some(503)).fatal(),
            Some(Fatal::UnknownClose(503))
        ));
    }

    #[test]
    fn test_reason_names() {
        assert_eq!(reason_name(515), "restart required");
        assert_eq!(reason_name(999), "unknown");
    }
}
