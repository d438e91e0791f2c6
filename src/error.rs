use thiserror::Error;

#[derive(Debug, Error)]
pub enum KilnError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("auth failed for {provider}: {message}")]
    AuthFailed {
        provider: String,
        message: String,
        /// Provider-specific advice shown to the user.
        guidance: String,
    },

    #[error("access denied by {provider}: {message}")]
    Forbidden { provider: String, message: String },

    #[error("rate limited by {provider} after {attempts} attempts")]
    RateLimited { provider: String, attempts: u32 },

    #[error("server error from {provider} ({status}): {message}")]
    TransientServer {
        provider: String,
        status: u16,
        message: String,
    },

    #[error("upstream error from {provider} ({status}): {message}")]
    Upstream {
        provider: String,
        status: u16,
        message: String,
    },

    #[error("connection to {provider} failed after {attempts} attempts: {message}")]
    Connectivity {
        provider: String,
        attempts: u32,
        message: String,
    },

    #[error("protocol error from {provider}: {message}")]
    Protocol { provider: String, message: String },

    #[error("submission throttled, retry in {0}ms")]
    Throttled(u64),

    #[error("generation superseded by a newer submission")]
    Superseded,
}

impl KilnError {
    /// Extract provider name from structured error variants.
    /// Returns None for variants that don't carry provider context.
    pub fn provider(&self) -> Option<&str> {
        match self {
            Self::AuthFailed { provider, .. }
            | Self::Forbidden { provider, .. }
            | Self::RateLimited { provider, .. }
            | Self::TransientServer { provider, .. }
            | Self::Upstream { provider, .. }
            | Self::Connectivity { provider, .. }
            | Self::Protocol { provider, .. } => Some(provider),
            _ => None,
        }
    }

    /// Returns true for the kinds the transport retries with backoff.
    ///
    /// 5xx responses are surfaced without retry. Only 429 and network-level
    /// failures go back through the backoff scheduler.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Connectivity { .. })
    }

    /// Produce a sanitized message safe to show to the user.
    /// Does not leak request URLs, headers or raw upstream bodies.
    pub fn user_message(&self) -> String {
        match self {
            Self::Configuration(msg) => {
                format!("{msg}. Check the base URL, API key and model name settings.")
            }
            Self::AuthFailed { guidance, .. } => guidance.clone(),
            Self::Forbidden { provider, .. } => {
                format!("access denied by {provider}, check the API key permissions")
            }
            Self::RateLimited { provider, .. } => {
                format!("{provider} is rate limiting requests, try again shortly")
            }
            Self::TransientServer { provider, status, .. } => {
                if *status == 500 {
                    format!("{provider} reported an internal server error, try again later")
                } else {
                    format!("{provider} is temporarily unavailable, try again later")
                }
            }
            Self::Upstream {
                provider, message, ..
            } => format!("request to {provider} failed: {message}"),
            Self::Connectivity { .. } => {
                "network connection failed, check the connection and the base URL".to_string()
            }
            Self::Protocol { message, .. } => format!("API error: {message}"),
            Self::Throttled(ms) => {
                format!("please wait {}s before submitting again", ms.div_ceil(1000))
            }
            Self::Superseded => "generation replaced by a newer request".to_string(),
        }
    }
}
