//! Error handling for the gateway
//!
//! One error enum covers the whole request lifecycle. Retry and fallback
//! decisions are driven by the classification methods on [`GatewayError`],
//! never by string matching at call sites.

use thiserror::Error;

/// Result type alias for the gateway
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Main error type for the gateway
#[derive(Error, Debug, Clone)]
pub enum GatewayError {
    /// Missing or invalid configuration (no keys, unset endpoint, ...)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The provider does not implement the requested operation kind
    #[error("Unsupported operation: {provider} does not support {operation}")]
    UnsupportedOperation {
        /// Provider that rejected the operation
        provider: String,
        /// Operation kind that was requested
        operation: String,
    },

    /// No configured key supports the requested model
    #[error("Unsupported model: no key for provider {provider} supports model {model}")]
    UnsupportedModel {
        /// Provider the request targeted
        provider: String,
        /// Model that no key covers
        model: String,
    },

    /// Malformed canonical request
    #[error("Validation error: {0}")]
    Validation(String),

    /// Non-2xx response from a provider
    #[error("Provider API error ({status}): {message}")]
    ProviderAPI {
        /// HTTP status code returned by the provider
        status: u16,
        /// Provider-declared error type, if any
        error_type: Option<String>,
        /// Provider-declared error code, if any
        error_code: Option<String>,
        /// Human-readable message
        message: String,
    },

    /// The request body could not be encoded for the provider
    #[error("JSON marshaling error: {0}")]
    JsonMarshaling(String),

    /// Provider response could not be decoded
    #[error("JSON parsing error: {0}")]
    JsonParsing(String),

    /// Underlying I/O failure
    #[error("Network error: {0}")]
    Network(String),

    /// A bounded operation ran out of time
    #[error("Timeout: {0}")]
    Timeout(String),

    /// The request's context was cancelled
    #[error("Request cancelled")]
    RequestCancelled,

    /// A plugin intentionally returned an error short-circuit
    #[error("Plugin error: {message}")]
    PluginShortCircuit {
        /// Plugin that produced the error
        plugin: String,
        /// Error message
        message: String,
        /// Whether the fallback cascade may still run
        allow_fallbacks: bool,
    },

    /// Vector store failure
    #[error("Vector store error: {0}")]
    VectorStore(String),

    /// Log store failure
    #[error("Log store error: {0}")]
    LogStore(String),

    /// The gateway is shutting down
    #[error("Gateway is shutting down")]
    ShuttingDown,

    /// Internal invariant violation; logged, never expected in responses
    #[error("Internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Whether the retry layer may re-issue the request on the same
    /// (provider, key) pair.
    ///
    /// Retried: timeouts, network failures, 5xx and 429 provider errors.
    /// Everything else is terminal for the attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            GatewayError::Timeout(_) | GatewayError::Network(_) => true,
            GatewayError::ProviderAPI { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    /// Whether the fallback cascade may move on to the next
    /// `{provider, model}` alternate after this error.
    ///
    /// Cancellation and unsupported operations are surfaced as-is;
    /// plugin short-circuits carry their own flag.
    pub fn allows_fallbacks(&self) -> bool {
        match self {
            GatewayError::RequestCancelled
            | GatewayError::UnsupportedOperation { .. }
            | GatewayError::ShuttingDown => false,
            GatewayError::PluginShortCircuit {
                allow_fallbacks, ..
            } => *allow_fallbacks,
            _ => true,
        }
    }

    /// Provider HTTP status, when the error originated from a provider.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            GatewayError::ProviderAPI { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            GatewayError::Timeout(err.to_string())
        } else if err.is_connect() || err.is_request() || err.is_body() {
            GatewayError::Network(err.to_string())
        } else if err.is_decode() {
            GatewayError::JsonParsing(err.to_string())
        } else {
            GatewayError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        GatewayError::JsonMarshaling(err.to_string())
    }
}
