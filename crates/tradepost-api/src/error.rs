use thiserror::Error;

/// An error that happens when talking to the backend, or before a call is
/// even made.
///
/// The enum is cloneable and comparable so that cache entries can store a
/// failed fetch next to the data it failed to replace.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    /// The backend could not be reached, or its response could not be read.
    #[error("request failed: {0}")]
    Transport(String),
    /// The backend answered with `success: false`.
    ///
    /// The attached message is the backend's own, and is shown to the user
    /// verbatim.
    #[error("server responded with error {code}: {message}")]
    Service {
        /// The application-level status code from the response envelope.
        code: i32,
        /// The backend's error message.
        message: String,
    },
    /// The backend reported success but omitted a payload that is required.
    #[error("server returned no data: {0}")]
    MissingData(String),
    /// The request was rejected locally, before any call was made.
    ///
    /// Validation errors never touch the cache.
    #[error("validation failed: {0}")]
    Validation(String),
    /// A mutation of the same kind is still in flight.
    #[error("{0} is already in progress")]
    Busy(&'static str),
}

/// Markers identifying an authentication failure in a backend error message.
///
/// The backend has no dedicated status for a missing or expired session, so
/// the session probe classifies failures by scanning the message.
const UNAUTHORIZED_MARKERS: &[&str] = &["login", "token", "unauthorized", "401", "403"];

impl ApiError {
    /// Whether this error reads like "the caller is not logged in".
    ///
    /// Only applied to the session probe, where an unauthenticated caller is
    /// an expected outcome and must not surface as a hard error.
    pub fn is_unauthorized(&self) -> bool {
        let message = match self {
            ApiError::Transport(message) => message,
            ApiError::Service { message, .. } => message,
            _ => return false,
        };
        let message = message.to_lowercase();
        UNAUTHORIZED_MARKERS
            .iter()
            .any(|marker| message.contains(marker))
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unauthorized_classification() {
        let err = ApiError::Service {
            code: 401,
            message: "Token is expired".into(),
        };
        assert!(err.is_unauthorized());

        let err = ApiError::Service {
            code: 500,
            message: "please login first".into(),
        };
        assert!(err.is_unauthorized());

        let err = ApiError::Transport("HTTP status client error (403 Forbidden)".into());
        assert!(err.is_unauthorized());

        let err = ApiError::Service {
            code: 500,
            message: "database gone away".into(),
        };
        assert!(!err.is_unauthorized());

        // validation problems are local and never an auth signal
        let err = ApiError::Validation("401".into());
        assert!(!err.is_unauthorized());
    }

    #[test]
    fn test_error_messages() {
        insta::assert_snapshot!(
            ApiError::Service {
                code: 500,
                message: "boom".into()
            },
            @"server responded with error 500: boom"
        );
        insta::assert_snapshot!(
            ApiError::MissingData("ok".into()),
            @"server returned no data: ok"
        );
        insta::assert_snapshot!(
            ApiError::Busy("create_product"),
            @"create_product is already in progress"
        );
    }
}
