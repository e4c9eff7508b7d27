use thiserror::Error;

use crate::Scope;

/// Terminal outcomes of a dispatched API call.
///
/// Retryable upstream and transport faults are absorbed inside the
/// dispatcher up to its attempt cap; only exhaustion surfaces here.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("no credentials configured for scope '{0}'")]
    NoCredentialForScope(Scope),

    #[error("every credential for scope '{0}' is at its hourly quota")]
    QuotaExhausted(Scope),

    #[error("upstream kept throttling after {attempts} attempts")]
    UpstreamThrottled { attempts: u32 },

    #[error("upstream unavailable: {reason}")]
    UpstreamUnavailable { reason: String },

    #[error("transport failure: {reason}")]
    TransportFailure { reason: String },

    #[error("invalid request: {reason}")]
    InvalidRequest { reason: String },
}

impl FetchError {
    /// Whether a caller may reasonably retry the whole operation later.
    pub const fn retryable(&self) -> bool {
        match self {
            Self::QuotaExhausted(_)
            | Self::UpstreamThrottled { .. }
            | Self::UpstreamUnavailable { .. }
            | Self::TransportFailure { .. } => true,
            Self::NoCredentialForScope(_) | Self::InvalidRequest { .. } => false,
        }
    }

    /// Short, non-technical phrasing for user-facing surfaces.
    pub const fn user_message(&self) -> &'static str {
        match self {
            Self::NoCredentialForScope(_) => "This request is not configured on this deployment.",
            Self::QuotaExhausted(_) => "The API quota is exhausted right now, try again shortly.",
            Self::UpstreamThrottled { .. } => "The game API is throttling us, try again shortly.",
            Self::UpstreamUnavailable { .. } => "The game API is down, try again later.",
            Self::TransportFailure { .. } => "Could not reach the game API, try again later.",
            Self::InvalidRequest { .. } => "That request could not be understood.",
        }
    }
}

/// Configuration problems detected at load time. Never retried.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no API keys configured for any scope")]
    NoKeysConfigured,

    #[error("scope '{scope}' lists an empty API key")]
    EmptyKey { scope: Scope },

    #[error("base URL must not be empty")]
    EmptyBaseUrl,

    #[error("environment variable '{name}' is not valid UTF-8")]
    InvalidEnvVar { name: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_errors_are_retryable() {
        assert!(FetchError::QuotaExhausted(Scope::Broad).retryable());
        assert!(FetchError::UpstreamThrottled { attempts: 4 }.retryable());
        assert!(FetchError::UpstreamUnavailable {
            reason: String::from("gave up after 4 attempts"),
        }
        .retryable());
        assert!(FetchError::TransportFailure {
            reason: String::from("connection reset"),
        }
        .retryable());
    }

    #[test]
    fn caller_errors_are_not_retryable() {
        assert!(!FetchError::NoCredentialForScope(Scope::Messaging).retryable());
        assert!(!FetchError::InvalidRequest {
            reason: String::from("empty query"),
        }
        .retryable());
    }

    #[test]
    fn user_messages_are_non_technical() {
        let error = FetchError::UpstreamThrottled { attempts: 4 };
        assert!(!error.user_message().contains("429"));
        assert!(!error.user_message().contains("attempt"));
    }
}
