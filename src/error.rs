//! Typed errors for the changelog pipeline.
//!
//! Every fallible library operation returns [`Result`]. The CLI and HTTP
//! layers translate these variants into exit codes and status codes; the
//! core never logs-and-swallows an error except the per-PR skips recorded
//! in a [`GenerationReport`](crate::generate::GenerationReport).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Invalid or expired credentials for GitHub or the completion service.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Upstream rate limit still exhausted after the retry budget.
    #[error("rate limited: {0}")]
    RateLimit(String),

    /// Connection failures, timeouts, and upstream 5xx responses.
    #[error("network error: {0}")]
    Network(String),

    /// A successful upstream response whose body could not be decoded.
    #[error("malformed upstream response: {0}")]
    Decode(String),

    /// The completion service returned something that is not a usable
    /// change record.
    #[error("unusable AI response: {0}")]
    AiResponse(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("repository '{0}' already exists")]
    Duplicate(String),

    #[error("version '{label}' already published for repository '{repo_id}'")]
    DuplicateVersion { repo_id: String, label: String },

    /// Malformed caller input, rejected before any network or store call.
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether a [`RetryPolicy`](crate::retry::RetryPolicy) may try again.
    ///
    /// Only rate limits and transient network/5xx failures qualify; auth and
    /// validation errors fail on the first attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::RateLimit(_) | Error::Network(_))
    }

    /// Process exit code used by the CLI for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            Error::Validation(_) | Error::Config(_) => 2,
            Error::NotFound(_) => 3,
            Error::Duplicate(_) | Error::DuplicateVersion { .. } => 4,
            Error::Auth(_) => 5,
            Error::RateLimit(_) => 6,
            Error::Network(_) | Error::Decode(_) | Error::AiResponse(_) => 7,
            Error::Storage(_) | Error::Serialization(_) | Error::Io(_) => 1,
        }
    }

    /// Short machine-readable code used in HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Auth(_) => "unauthorized",
            Error::RateLimit(_) => "rate_limited",
            Error::Network(_) | Error::Decode(_) | Error::AiResponse(_) => "upstream",
            Error::NotFound(_) => "not_found",
            Error::Duplicate(_) | Error::DuplicateVersion { .. } => "conflict",
            Error::Validation(_) => "bad_request",
            Error::Config(_) | Error::Storage(_) | Error::Serialization(_) | Error::Io(_) => {
                "internal"
            }
        }
    }

    /// Classify a transport-level `reqwest` failure.
    pub(crate) fn from_transport(service: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Error::Network(format!("{} request timed out: {}", service, err))
        } else if err.is_connect() {
            Error::Network(format!("could not connect to {}: {}", service, err))
        } else if err.is_decode() {
            Error::Decode(format!("{} returned an undecodable body: {}", service, err))
        } else {
            Error::Network(format!("{} request failed: {}", service, err))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_rate_limit_and_network_are_retryable() {
        assert!(Error::RateLimit("x".into()).is_retryable());
        assert!(Error::Network("x".into()).is_retryable());
        assert!(!Error::Auth("x".into()).is_retryable());
        assert!(!Error::AiResponse("x".into()).is_retryable());
        assert!(!Error::Decode("x".into()).is_retryable());
        assert!(!Error::Validation("x".into()).is_retryable());
        assert!(!Error::NotFound("x".into()).is_retryable());
    }

    #[test]
    fn test_exit_codes_are_nonzero() {
        let errors = [
            Error::Auth("a".into()),
            Error::RateLimit("r".into()),
            Error::Network("n".into()),
            Error::Decode("m".into()),
            Error::NotFound("nf".into()),
            Error::Duplicate("d".into()),
            Error::DuplicateVersion {
                repo_id: "r1".into(),
                label: "v1".into(),
            },
            Error::Validation("v".into()),
        ];
        for e in errors {
            assert_ne!(e.exit_code(), 0, "{e} mapped to success");
        }
    }

    #[test]
    fn test_duplicate_version_message_names_label() {
        let e = Error::DuplicateVersion {
            repo_id: "r1".into(),
            label: "v1.0.0".into(),
        };
        assert_eq!(
            e.to_string(),
            "version 'v1.0.0' already published for repository 'r1'"
        );
        assert_eq!(e.code(), "conflict");
    }
}
