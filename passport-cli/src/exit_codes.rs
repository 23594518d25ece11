//! Exit codes following sysexits.h conventions.
//!
//! These codes provide semantic meaning for different failure modes,
//! enabling scripts to tell a cancelled prompt from a rejected sign-in.

use passport_core::PassportError;

/// General error (catch-all).
pub const GENERAL_ERROR: i32 = 1;

/// Command line usage error (invalid arguments).
/// Maps to EX_USAGE from sysexits.h.
pub const USAGE_ERROR: i32 = 64;

/// Sign-in or registration rejected by the relying party.
/// Maps to EX_DATAERR from sysexits.h.
pub const AUTH_FAILED: i32 = 65;

/// No such account on this device.
/// Maps to EX_NOINPUT from sysexits.h.
pub const NOT_FOUND: i32 = 66;

/// Secure credentials not configured, device locked or relying party timed out.
/// Maps to EX_UNAVAILABLE from sysexits.h.
pub const UNAVAILABLE: i32 = 69;

/// I/O error (registry or key files).
/// Maps to EX_IOERR from sysexits.h.
pub const IO_ERROR: i32 = 74;

/// User cancelled a verification prompt; try again later.
/// Maps to EX_TEMPFAIL from sysexits.h.
pub const CANCELLED: i32 = 75;

/// Represents an exit code with optional error context.
pub struct ExitCode {
    pub code: i32,
    pub message: Option<String>,
}

impl ExitCode {
    pub fn from_anyhow(err: &anyhow::Error) -> Self {
        // Classify by the first core error in the chain
        let Some(core) = err.chain().find_map(|e| e.downcast_ref::<PassportError>()) else {
            return Self {
                code: GENERAL_ERROR,
                message: Some(format!("{err:#}")),
            };
        };

        let code = match core {
            PassportError::UserDeclined => CANCELLED,
            PassportError::NotConfigured
            | PassportError::DeviceUnavailable(_)
            | PassportError::Timeout(_) => UNAVAILABLE,
            PassportError::KeyMissing { .. }
            | PassportError::RegistrationFailed { .. }
            | PassportError::InvalidCredentials
            | PassportError::AuthenticationRejected => AUTH_FAILED,
            PassportError::AccountNotFound(_) => NOT_FOUND,
            PassportError::InvalidUsername(_)
            | PassportError::DuplicateUsername(_)
            | PassportError::InvalidConfig(_) => USAGE_ERROR,
            PassportError::Io(_) | PassportError::Storage(_) => IO_ERROR,
            PassportError::SerializationError(_) | PassportError::SignatureError(_) => {
                GENERAL_ERROR
            }
        };

        // Only the short message reaches the user; details go to debug logs
        Self {
            code,
            message: Some(core.user_message().to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_core_errors_are_classified_through_context() {
        let err = Err::<(), _>(PassportError::UserDeclined)
            .context("Sign-in failed")
            .unwrap_err();
        let exit = ExitCode::from_anyhow(&err);
        assert_eq!(exit.code, CANCELLED);
        assert_eq!(exit.message.as_deref(), Some("Sign-in was cancelled"));
    }

    #[test]
    fn test_other_errors_are_general() {
        let err = anyhow::anyhow!("something else");
        let exit = ExitCode::from_anyhow(&err);
        assert_eq!(exit.code, GENERAL_ERROR);
        assert_eq!(exit.message.as_deref(), Some("something else"));
    }

    #[test]
    fn test_not_found_and_unavailable() {
        let err = anyhow::Error::new(PassportError::AccountNotFound("bob".into()));
        assert_eq!(ExitCode::from_anyhow(&err).code, NOT_FOUND);

        let err = anyhow::Error::new(PassportError::NotConfigured);
        assert_eq!(ExitCode::from_anyhow(&err).code, UNAVAILABLE);
    }
}
