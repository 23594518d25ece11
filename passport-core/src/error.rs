use thiserror::Error;

#[derive(Error, Debug)]
pub enum PassportError {
    #[error("User declined the verification prompt")]
    UserDeclined,

    #[error("Secure credentials are not configured on this device")]
    NotConfigured,

    #[error("Local key missing for user {username}")]
    KeyMissing { username: String },

    #[error("Security device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Relying party rejected registration for user {user_id}")]
    RegistrationFailed { user_id: String },

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Relying party rejected the signed challenge")]
    AuthenticationRejected,

    #[error("Invalid username: {0}")]
    InvalidUsername(String),

    #[error("Username already registered: {0}")]
    DuplicateUsername(String),

    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("Relying party call timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Signature error: {0}")]
    SignatureError(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PassportError {
    /// Short, non-sensitive text suitable for the user-visible layer.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::UserDeclined => "Sign-in was cancelled",
            Self::NotConfigured => "Set up a PIN in your system settings to use key sign-in",
            Self::KeyMissing { .. } => "This device needs to be set up again",
            Self::DeviceUnavailable(_) => "Security device unavailable, try again later",
            Self::RegistrationFailed { .. } => "Account creation failed",
            Self::InvalidCredentials => "Invalid credentials",
            Self::AuthenticationRejected => "Sign-in failed",
            Self::InvalidUsername(_) => "Please enter a username",
            Self::DuplicateUsername(_) => "That username is already taken",
            Self::AccountNotFound(_) => "Account not found",
            Self::Timeout(_) => "The server did not respond in time",
            Self::Storage(_)
            | Self::SerializationError(_)
            | Self::SignatureError(_)
            | Self::InvalidConfig(_)
            | Self::Io(_) => "Something went wrong, try again",
        }
    }
}

pub type Result<T> = std::result::Result<T, PassportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_message_hides_details() {
        let err = PassportError::DeviceUnavailable("TPM 0x80280400 locked out".into());
        assert!(!err.user_message().contains("TPM"));
        assert!(err.to_string().contains("TPM"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: PassportError = io.into();
        assert!(matches!(err, PassportError::Io(_)));
        assert_eq!(err.user_message(), "Something went wrong, try again");
    }
}
