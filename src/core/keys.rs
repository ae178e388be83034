//! Credential selection
//!
//! Weighted random selection among keys that support the request model.
//! The key list is read-only at runtime; hot reload replaces the whole
//! slice atomically so in-flight selections never observe a partial list.

use arc_swap::ArcSwap;
use rand::Rng;
use std::sync::Arc;
use tracing::debug;

use crate::config::KeyConfig;
use crate::core::types::ProviderType;
use crate::utils::error::{GatewayError, Result};

/// Selects credentials for one provider
pub struct KeySelector {
    provider: ProviderType,
    keys: ArcSwap<Vec<KeyConfig>>,
}

impl KeySelector {
    /// Build a selector over the provider's configured keys
    pub fn new(provider: ProviderType, keys: Vec<KeyConfig>) -> Self {
        Self {
            provider,
            keys: ArcSwap::from_pointee(keys),
        }
    }

    /// Replace the key list atomically
    pub fn reload(&self, keys: Vec<KeyConfig>) {
        debug!(provider = %self.provider, count = keys.len(), "key list reloaded");
        self.keys.store(Arc::new(keys));
    }

    /// Current key count
    pub fn len(&self) -> usize {
        self.keys.load().len()
    }

    /// Whether no keys are configured
    pub fn is_empty(&self) -> bool {
        self.keys.load().is_empty()
    }

    /// Pick a key for `model` by weighted random draw.
    ///
    /// Keys whose `supported_models` is empty match every model. The draw
    /// is uniform in `[0, total_weight)` resolved by cumulative scan, so
    /// over many trials each eligible key is chosen in proportion to its
    /// weight. Ties (all weights zero) fall back to the first eligible key.
    pub fn select(&self, model: &str) -> Result<KeyConfig> {
        self.select_with(model, &mut rand::thread_rng())
    }

    /// Same as [`select`](Self::select) with an injected RNG
    pub fn select_with<R: Rng>(&self, model: &str, rng: &mut R) -> Result<KeyConfig> {
        let keys = self.keys.load();
        if keys.is_empty() {
            return Err(GatewayError::Configuration(format!(
                "no keys configured for provider {}",
                self.provider
            )));
        }

        let eligible: Vec<&KeyConfig> = keys.iter().filter(|k| k.supports_model(model)).collect();
        if eligible.is_empty() {
            return Err(GatewayError::UnsupportedModel {
                provider: self.provider.to_string(),
                model: model.to_string(),
            });
        }

        let total_weight: f64 = eligible.iter().map(|k| k.weight.max(0.0)).sum();
        if total_weight <= 0.0 {
            return Ok(eligible[0].clone());
        }

        let draw = rng.gen_range(0.0..total_weight);
        let mut cumulative = 0.0;
        for key in &eligible {
            cumulative += key.weight.max(0.0);
            if draw < cumulative {
                return Ok((*key).clone());
            }
        }
        // Floating point edge at the top of the range
        Ok(eligible[eligible.len() - 1].clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KeyExtra;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashMap;

    fn key(id: &str, models: &[&str], weight: f64) -> KeyConfig {
        KeyConfig {
            id: id.to_string(),
            value: format!("sk-{id}"),
            supported_models: models.iter().map(|m| m.to_string()).collect(),
            weight,
            extra: KeyExtra::default(),
        }
    }

    #[test]
    fn test_no_keys_is_configuration_error() {
        let selector = KeySelector::new(ProviderType::OpenAI, vec![]);
        assert!(matches!(
            selector.select("gpt-4o"),
            Err(GatewayError::Configuration(_))
        ));
    }

    #[test]
    fn test_no_supporting_key_is_unsupported_model() {
        let selector =
            KeySelector::new(ProviderType::OpenAI, vec![key("a", &["gpt-4o"], 1.0)]);
        assert!(matches!(
            selector.select("gpt-3.5-turbo"),
            Err(GatewayError::UnsupportedModel { .. })
        ));
    }

    #[test]
    fn test_empty_supported_models_matches_all() {
        let selector = KeySelector::new(ProviderType::OpenAI, vec![key("open", &[], 1.0)]);
        assert_eq!(selector.select("any-model").unwrap().id, "open");
    }

    #[test]
    fn test_selected_key_always_supports_model() {
        let selector = KeySelector::new(
            ProviderType::OpenAI,
            vec![
                key("narrow", &["gpt-4o"], 5.0),
                key("other", &["gpt-3.5-turbo"], 5.0),
                key("open", &[], 1.0),
            ],
        );
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let chosen = selector.select_with("gpt-4o", &mut rng).unwrap();
            assert!(chosen.supports_model("gpt-4o"));
            assert_ne!(chosen.id, "other");
        }
    }

    #[test]
    fn test_weighted_distribution_converges() {
        let selector = KeySelector::new(
            ProviderType::OpenAI,
            vec![key("light", &[], 1.0), key("heavy", &[], 3.0)],
        );
        let mut rng = StdRng::seed_from_u64(42);
        let mut counts: HashMap<String, usize> = HashMap::new();
        let trials = 20_000;
        for _ in 0..trials {
            let chosen = selector.select_with("m", &mut rng).unwrap();
            *counts.entry(chosen.id).or_default() += 1;
        }
        let heavy_share = counts["heavy"] as f64 / trials as f64;
        assert!((heavy_share - 0.75).abs() < 0.02, "share was {heavy_share}");
    }

    #[test]
    fn test_all_zero_weights_fall_back_to_first() {
        let selector = KeySelector::new(
            ProviderType::OpenAI,
            vec![key("first", &[], 0.0), key("second", &[], 0.0)],
        );
        assert_eq!(selector.select("m").unwrap().id, "first");
    }

    #[test]
    fn test_reload_swaps_list() {
        let selector = KeySelector::new(ProviderType::OpenAI, vec![key("old", &[], 1.0)]);
        selector.reload(vec![key("new", &[], 1.0)]);
        assert_eq!(selector.select("m").unwrap().id, "new");
    }
}
