use solana_client::client_error::{ClientError, ClientErrorKind};
use thiserror::Error;

/// How an underlying RPC call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// Request hit the per-call HTTP timeout
    Timeout,
    /// Provider answered 429 Too Many Requests
    RateLimited,
    /// Any other non-success HTTP status
    Http(u16),
    /// JSON-RPC level error returned by the node
    Rpc,
    /// Connection refused/reset, DNS, I/O
    Connection,
    /// Response could not be decoded
    Serialization,
    Other,
}

/// Failure of a single network call against one endpoint.
#[derive(Debug, Clone, Error)]
#[error("{kind:?}: {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        self.kind == TransportErrorKind::RateLimited
    }
}

impl From<ClientError> for TransportError {
    fn from(err: ClientError) -> Self {
        let kind = match err.kind() {
            ClientErrorKind::Reqwest(e) => {
                if e.is_timeout() {
                    TransportErrorKind::Timeout
                } else if let Some(status) = e.status() {
                    match status.as_u16() {
                        429 => TransportErrorKind::RateLimited,
                        code => TransportErrorKind::Http(code),
                    }
                } else {
                    TransportErrorKind::Connection
                }
            }
            ClientErrorKind::Io(_) => TransportErrorKind::Connection,
            ClientErrorKind::RpcError(_) => TransportErrorKind::Rpc,
            ClientErrorKind::SerdeJson(_) => TransportErrorKind::Serialization,
            _ => TransportErrorKind::Other,
        };
        TransportError::new(kind, err.to_string())
    }
}

#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    /// Caller waited past `max_wait_time` for a request token
    #[error("Rate Limit Timeout: waited {waited_ms}ms for a request token (max {max_wait_ms}ms)")]
    RateLimitTimeout { waited_ms: u64, max_wait_ms: u64 },

    /// No endpoint is healthy and self-healing is currently exhausted
    #[error("Endpoint Unavailable: {0}")]
    EndpointUnavailable(String),

    /// Underlying network call failed on a specific endpoint
    #[error("Transport Error on {endpoint} during {method}: {source}")]
    Transport {
        endpoint: String,
        method: &'static str,
        #[source]
        source: TransportError,
    },

    #[error("Endpoint Not Found: {0}")]
    EndpointNotFound(String),

    #[error("Config Error: {0}")]
    ConfigError(String),

    #[error("Parse Error: {0}")]
    ParseError(String),

    #[error("Gateway is shut down")]
    ShutDown,
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        GatewayError::ParseError(format!("JSON serialization/deserialization error: {}", err))
    }
}

impl GatewayError {
    /// Whether a later attempt may succeed without changing anything
    pub fn is_recoverable(&self) -> bool {
        match self {
            GatewayError::RateLimitTimeout { .. } => true,
            GatewayError::EndpointUnavailable(_) => true,
            GatewayError::Transport { source, .. } => !matches!(
                source.kind,
                TransportErrorKind::Serialization | TransportErrorKind::Http(400..=428)
                    | TransportErrorKind::Http(430..=499)
            ),
            GatewayError::EndpointNotFound(_) => false,
            GatewayError::ConfigError(_) => false,
            GatewayError::ParseError(_) => false,
            GatewayError::ShutDown => false,
        }
    }

    /// Whether the gateway's own retry policy may re-run the call.
    ///
    /// Transport errors are never retried internally: the caller owns that
    /// decision so read latency stays predictable and transaction sends are
    /// never duplicated behind its back.
    pub fn should_retry(&self) -> bool {
        matches!(
            self,
            GatewayError::RateLimitTimeout { .. } | GatewayError::EndpointUnavailable(_)
        )
    }

    /// Endpoint the failure is attributed to, if any
    pub fn endpoint(&self) -> Option<&str> {
        match self {
            GatewayError::Transport { endpoint, .. } => Some(endpoint),
            GatewayError::EndpointNotFound(name) => Some(name),
            _ => None,
        }
    }

    pub fn categorize(&self) -> ErrorCategory {
        match self {
            GatewayError::RateLimitTimeout { .. } => ErrorCategory::RateLimit,
            GatewayError::EndpointUnavailable(_) => ErrorCategory::Availability,
            GatewayError::Transport { .. } => ErrorCategory::Network,
            GatewayError::EndpointNotFound(_) | GatewayError::ConfigError(_) => {
                ErrorCategory::Configuration
            }
            GatewayError::ParseError(_) => ErrorCategory::Data,
            GatewayError::ShutDown => ErrorCategory::Lifecycle,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    RateLimit,
    Availability,
    Network,
    Configuration,
    Data,
    Lifecycle,
}

pub type Result<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn transport(kind: TransportErrorKind) -> GatewayError {
        GatewayError::Transport {
            endpoint: "helius".to_string(),
            method: "getBalance",
            source: TransportError::new(kind, "boom"),
        }
    }

    #[test]
    fn test_only_admission_errors_are_retried() {
        assert!(GatewayError::RateLimitTimeout {
            waited_ms: 50,
            max_wait_ms: 40
        }
        .should_retry());
        assert!(GatewayError::EndpointUnavailable("all down".into()).should_retry());
        assert!(!transport(TransportErrorKind::Timeout).should_retry());
        assert!(!GatewayError::ShutDown.should_retry());
    }

    #[test]
    fn test_recoverability_of_transport_errors() {
        assert!(transport(TransportErrorKind::Timeout).is_recoverable());
        assert!(transport(TransportErrorKind::RateLimited).is_recoverable());
        assert!(transport(TransportErrorKind::Http(503)).is_recoverable());
        assert!(!transport(TransportErrorKind::Http(401)).is_recoverable());
        assert!(transport(TransportErrorKind::Http(429)).is_recoverable());
        assert!(!transport(TransportErrorKind::Serialization).is_recoverable());
    }

    #[test]
    fn test_transport_error_carries_endpoint() {
        let err = transport(TransportErrorKind::Connection);
        assert_eq!(err.endpoint(), Some("helius"));
        assert_eq!(err.categorize(), ErrorCategory::Network);
        assert!(err.to_string().contains("getBalance"));
    }
}
