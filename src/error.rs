use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Environment variable error: {0}")]
    Env(#[from] std::env::VarError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Twitter API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Too many requests (HTTP 429)")]
    RateLimited { retry_after: Option<u64> },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Initialization error: {0}")]
    Init(String),
}

pub type Result<T> = std::result::Result<T, AppError>;

/// Lets the admission controller tell a remote "too many requests" apart
/// from every other failure of a wrapped call.
pub trait RemoteFailure {
    fn is_rate_limited(&self) -> bool;
}

impl RemoteFailure for AppError {
    fn is_rate_limited(&self) -> bool {
        match self {
            AppError::RateLimited { .. } => true,
            AppError::Api { status, .. } => *status == 429,
            _ => false,
        }
    }
}

/// Outcome taxonomy of a gated call. None of these are fatal; the caller
/// decides whether to retry on a later invocation.
#[derive(Error, Debug)]
pub enum GateError<E>
where
    E: std::error::Error + 'static,
{
    #[error("{}", locally_throttled_message(.endpoint, .retry_after))]
    LocallyThrottled {
        endpoint: String,
        retry_after: Option<Duration>,
    },

    #[error("Remote rate limit reached for '{endpoint}'. Wait about 15 minutes before retrying.")]
    RemotelyThrottled {
        endpoint: String,
        #[source]
        source: E,
    },

    #[error("'{endpoint}' failed: {source}")]
    OperationFailed {
        endpoint: String,
        #[source]
        source: E,
    },
}

impl<E> GateError<E>
where
    E: std::error::Error + 'static,
{
    pub fn endpoint(&self) -> &str {
        match self {
            GateError::LocallyThrottled { endpoint, .. }
            | GateError::RemotelyThrottled { endpoint, .. }
            | GateError::OperationFailed { endpoint, .. } => endpoint,
        }
    }

    pub fn is_throttled(&self) -> bool {
        !matches!(self, GateError::OperationFailed { .. })
    }
}

fn locally_throttled_message(endpoint: &str, retry_after: &Option<Duration>) -> String {
    match retry_after {
        Some(wait) => format!(
            "Rate limit exceeded for '{}'. Retry after ~{:.0} seconds.",
            endpoint,
            wait.as_secs_f64().round()
        ),
        None => format!(
            "Rate limit exceeded for '{}'. Wait a while and retry.",
            endpoint
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_failure_classification() {
        assert!(AppError::RateLimited { retry_after: None }.is_rate_limited());
        assert!(AppError::Api { status: 429, message: "slow down".into() }.is_rate_limited());
        assert!(!AppError::Api { status: 500, message: "boom".into() }.is_rate_limited());
        assert!(!AppError::NotFound("@nobody".into()).is_rate_limited());
    }

    #[test]
    fn test_locally_throttled_message() {
        let err: GateError<AppError> = GateError::LocallyThrottled {
            endpoint: "dm_write".into(),
            retry_after: Some(Duration::from_secs_f64(799.6)),
        };
        assert_eq!(
            err.to_string(),
            "Rate limit exceeded for 'dm_write'. Retry after ~800 seconds."
        );

        let err: GateError<AppError> = GateError::LocallyThrottled {
            endpoint: "dm_write".into(),
            retry_after: None,
        };
        assert!(err.to_string().contains("Wait a while"));
        assert!(err.is_throttled());
    }

    #[test]
    fn test_operation_failed_message() {
        let err = GateError::OperationFailed {
            endpoint: "tweet".into(),
            source: AppError::Api { status: 403, message: "duplicate content".into() },
        };
        assert_eq!(err.endpoint(), "tweet");
        assert!(!err.is_throttled());
        assert!(err.to_string().contains("duplicate content"));
    }
}
