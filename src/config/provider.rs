//! Provider and credential configuration

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::utils::error::{GatewayError, Result};

/// Network timeouts and wire behaviour for one provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Connect timeout in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Whole-request timeout in milliseconds
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Idle timeout between stream chunks in milliseconds
    #[serde(default = "default_stream_idle_timeout_ms")]
    pub stream_idle_timeout_ms: u64,
    /// Optional HTTP proxy URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,
    /// Headers added to every provider request
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub default_headers: HashMap<String, String>,
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}
fn default_request_timeout_ms() -> u64 {
    120_000
}
fn default_stream_idle_timeout_ms() -> u64 {
    60_000
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            stream_idle_timeout_ms: default_stream_idle_timeout_ms(),
            proxy: None,
            default_headers: HashMap::new(),
        }
    }
}

impl NetworkConfig {
    /// Connect timeout as a [`Duration`]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Request timeout as a [`Duration`]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Stream idle timeout as a [`Duration`]
    pub fn stream_idle_timeout(&self) -> Duration {
        Duration::from_millis(self.stream_idle_timeout_ms)
    }
}

/// Retry policy for one provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retry attempts after the first failure
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// First backoff delay in milliseconds
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    /// Backoff ceiling in milliseconds
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

fn default_max_retries() -> u32 {
    2
}
fn default_initial_backoff_ms() -> u64 {
    500
}
fn default_max_backoff_ms() -> u64 {
    10_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl RetryConfig {
    /// Exponential backoff delay before retry attempt `attempt` (1-based),
    /// clamped to the configured ceiling.
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let delay = self
            .initial_backoff_ms
            .saturating_mul(1u64 << exp)
            .min(self.max_backoff_ms);
        Duration::from_millis(delay)
    }
}

/// Provider-specific credential extras
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeyExtra {
    /// Azure: model id to deployment name
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub azure_deployments: HashMap<String, String>,
    /// Azure: resource endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub azure_endpoint: Option<String>,
    /// Bedrock: AWS region
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bedrock_region: Option<String>,
    /// Vertex: GCP project id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vertex_project: Option<String>,
}

/// One provider credential
///
/// `value` supports `env.VAR_NAME` indirection, resolved when the config
/// is loaded so secrets never live in config files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyConfig {
    /// Stable key id, used in logs and context
    pub id: String,
    /// Opaque credential value or `env.VAR_NAME` reference
    pub value: String,
    /// Models this key may serve; empty means all
    #[serde(default)]
    pub supported_models: Vec<String>,
    /// Selection weight; zero removes the key from rotation
    #[serde(default = "default_weight")]
    pub weight: f64,
    /// Provider-specific extras
    #[serde(default)]
    pub extra: KeyExtra,
}

fn default_weight() -> f64 {
    1.0
}

impl KeyConfig {
    /// Resolve `env.VAR_NAME` indirection against the process environment
    pub fn resolve_env(&mut self) -> Result<()> {
        if let Some(var) = self.value.strip_prefix("env.") {
            self.value = std::env::var(var).map_err(|_| {
                GatewayError::Configuration(format!(
                    "key {}: environment variable {var} is not set",
                    self.id
                ))
            })?;
        }
        Ok(())
    }

    /// Whether this key may serve `model`
    pub fn supports_model(&self, model: &str) -> bool {
        self.supported_models.is_empty() || self.supported_models.iter().any(|m| m == model)
    }
}

/// Full configuration of one provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Base URL override (OpenAI-compatible providers)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Network behaviour
    #[serde(default)]
    pub network: NetworkConfig,
    /// Retry policy
    #[serde(default)]
    pub retry: RetryConfig,
    /// Worker count for this provider's pool
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Queue capacity for this provider's pool
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// Attach raw provider bodies to responses
    #[serde(default)]
    pub send_back_raw_response: bool,
    /// Credentials for this provider
    #[serde(default)]
    pub keys: Vec<KeyConfig>,
}

fn default_concurrency() -> usize {
    16
}
fn default_buffer_size() -> usize {
    64
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            network: NetworkConfig::default(),
            retry: RetryConfig::default(),
            concurrency: default_concurrency(),
            buffer_size: default_buffer_size(),
            send_back_raw_response: false,
            keys: Vec::new(),
        }
    }
}

impl ProviderConfig {
    /// Structural validation; `provider` names the section in messages
    pub fn validate(&self, provider: &str) -> Result<()> {
        if let Some(base_url) = &self.base_url {
            url::Url::parse(base_url).map_err(|e| {
                GatewayError::Configuration(format!("provider {provider}: invalid base_url: {e}"))
            })?;
        }
        if self.concurrency == 0 {
            return Err(GatewayError::Configuration(format!(
                "provider {provider}: concurrency must be at least 1"
            )));
        }
        if self.buffer_size == 0 {
            return Err(GatewayError::Configuration(format!(
                "provider {provider}: buffer_size must be at least 1"
            )));
        }
        for key in &self.keys {
            if key.weight < 0.0 {
                return Err(GatewayError::Configuration(format!(
                    "provider {provider}: key {} has negative weight",
                    key.id
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_growth_and_ceiling() {
        let retry = RetryConfig {
            max_retries: 5,
            initial_backoff_ms: 100,
            max_backoff_ms: 400,
        };
        assert_eq!(retry.backoff_for_attempt(1), Duration::from_millis(100));
        assert_eq!(retry.backoff_for_attempt(2), Duration::from_millis(200));
        assert_eq!(retry.backoff_for_attempt(3), Duration::from_millis(400));
        assert_eq!(retry.backoff_for_attempt(10), Duration::from_millis(400));
    }

    #[test]
    fn test_env_indirection() {
        std::env::set_var("OMNIGATE_TEST_KEY", "sk-resolved");
        let mut key = KeyConfig {
            id: "k1".into(),
            value: "env.OMNIGATE_TEST_KEY".into(),
            supported_models: vec![],
            weight: 1.0,
            extra: KeyExtra::default(),
        };
        key.resolve_env().unwrap();
        assert_eq!(key.value, "sk-resolved");

        let mut missing = KeyConfig {
            id: "k2".into(),
            value: "env.OMNIGATE_TEST_KEY_MISSING".into(),
            supported_models: vec![],
            weight: 1.0,
            extra: KeyExtra::default(),
        };
        assert!(missing.resolve_env().is_err());
    }

    #[test]
    fn test_model_support_matching() {
        let key = KeyConfig {
            id: "k1".into(),
            value: "sk-1".into(),
            supported_models: vec!["gpt-4o".into()],
            weight: 1.0,
            extra: KeyExtra::default(),
        };
        assert!(key.supports_model("gpt-4o"));
        assert!(!key.supports_model("gpt-4o-mini"));

        let open = KeyConfig {
            supported_models: vec![],
            ..key
        };
        assert!(open.supports_model("anything"));
    }

    #[test]
    fn test_validation_rejects_zero_concurrency() {
        let config = ProviderConfig {
            concurrency: 0,
            ..Default::default()
        };
        assert!(config.validate("openai").is_err());
    }
}
