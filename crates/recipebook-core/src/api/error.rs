use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Identity provider rejected the request: {code}")]
    Rejected { code: String },

    #[error("Unrecognized error response (status {status}): {body}")]
    Unrecognized { status: u16, body: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// Message shown for any provider code without a dedicated entry
pub const UNKNOWN_ERROR_MESSAGE: &str = "An unknown error occurred";

/// Provider error codes and the message shown to the user for each.
///
/// The messages use the identity provider's full documented wording, e.g.
/// "The email address is already in use by another account." rather than a
/// short form like "email already in use".
const ERROR_MESSAGES: &[(&str, &str)] = &[
    (
        "EMAIL_EXISTS",
        "The email address is already in use by another account.",
    ),
    (
        "OPERATION_NOT_ALLOWED",
        "Password sign-in is disabled for this project.",
    ),
    (
        "TOO_MANY_ATTEMPTS_TRY_LATER",
        "We have blocked all requests from this device due to unusual activity. Try again later.",
    ),
    (
        "EMAIL_NOT_FOUND",
        "There is no user record corresponding to this identifier. The user may have been deleted.",
    ),
    (
        "INVALID_PASSWORD",
        "The password is invalid or the user does not have a password.",
    ),
    (
        "USER_DISABLED",
        "The user account has been disabled by an administrator.",
    ),
];

/// Look up the user-facing message for a provider error code.
pub fn message_for_code(code: Option<&str>) -> &'static str {
    code.and_then(|code| {
        ERROR_MESSAGES
            .iter()
            .find(|(known, _)| *known == code)
            .map(|(_, message)| *message)
    })
    .unwrap_or(UNKNOWN_ERROR_MESSAGE)
}

impl ProviderError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let cut: String = body.chars().take(MAX_ERROR_BODY_LENGTH).collect();
            format!("{}... (truncated, {} total bytes)", cut, body.len())
        }
    }

    pub fn unrecognized(status: reqwest::StatusCode, body: &str) -> Self {
        ProviderError::Unrecognized {
            status: status.as_u16(),
            body: Self::truncate_body(body),
        }
    }

    /// The provider's machine-readable error code, if the response carried one
    pub fn code(&self) -> Option<&str> {
        match self {
            ProviderError::Rejected { code } => Some(code.as_str()),
            _ => None,
        }
    }

    pub fn user_message(&self) -> &'static str {
        message_for_code(self.code())
    }
}
