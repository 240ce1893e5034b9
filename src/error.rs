//! Crate-wide error type.
//!
//! Every fallible path surfaces an `AppError` carrying the process exit code
//! alongside the message. Exit codes used by this crate:
//!
//! - `2` - configuration error (bad model version, bad solver name, missing
//!   reference data, malformed term seeds)
//! - `3` - data error (unreadable scan CSV, missing persisted registry)
//! - `4` - numeric/internal error (degenerate solve that cannot be recovered,
//!   inconsistent vector lengths)

#[derive(Clone)]
pub struct AppError {
    exit_code: u8,
    message: String,
}

impl AppError {
    pub fn new(exit_code: u8, message: impl Into<String>) -> Self {
        Self {
            exit_code,
            message: message.into(),
        }
    }

    pub fn exit_code(&self) -> u8 {
        self.exit_code
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::fmt::Debug for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppError")
            .field("exit_code", &self.exit_code)
            .field("message", &self.message)
            .finish()
    }
}

impl std::error::Error for AppError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_shows_message_only() {
        let err = AppError::new(2, "unsupported model version 1003");
        assert_eq!(format!("{err}"), "unsupported model version 1003");
        assert_eq!(err.exit_code(), 2);
    }
}
