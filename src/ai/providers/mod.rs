//! Concrete [`LLMProvider`](crate::ai::provider::LLMProvider) adapters and
//! the factory that builds them from [`ProviderConfig`](crate::config::schema::ProviderConfig).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::ai::provider::LLMProvider;
use crate::config::schema::ProviderConfig;

pub mod openai_compatible;

pub use openai_compatible::{OpenAICompatibleConfig, OpenAICompatibleProvider, RateCard};

/// Canonical provider names accepted in a tier chain (spec.md §4.2).
/// Anything else is rejected at provider-set build time.
pub const KNOWN_PROVIDERS: &[&str] = &["anthropic", "openai", "gemini", "mistral", "openrouter"];

fn rate_card_for(provider: &str, model: &str) -> Option<RateCard> {
    // Illustrative per-model rate cards for the providers this crate knows
    // how to build. Real deployments override these via config; absent
    // entries simply cost $0, matching `OpenAICompatibleProvider::cost_usd`.
    let card = match (provider, model) {
        ("anthropic", m) if m.contains("opus") => RateCard {
            input_per_million: 15.0,
            output_per_million: 75.0,
        },
        ("anthropic", m) if m.contains("sonnet") => RateCard {
            input_per_million: 3.0,
            output_per_million: 15.0,
        },
        ("anthropic", m) if m.contains("haiku") => RateCard {
            input_per_million: 0.80,
            output_per_million: 4.0,
        },
        ("openai", m) if m.starts_with("gpt-4.1") => RateCard {
            input_per_million: 2.0,
            output_per_million: 8.0,
        },
        ("openai", m) if m.starts_with("o1") => RateCard {
            input_per_million: 15.0,
            output_per_million: 60.0,
        },
        ("gemini", m) if m.contains("pro") => RateCard {
            input_per_million: 1.25,
            output_per_million: 5.0,
        },
        ("gemini", m) if m.contains("flash") => RateCard {
            input_per_million: 0.075,
            output_per_million: 0.30,
        },
        ("mistral", m) if m.contains("large") => RateCard {
            input_per_million: 2.0,
            output_per_million: 6.0,
        },
        _ => return None,
    };
    Some(card)
}

fn provider_base_url(provider: &str) -> &'static str {
    match provider {
        "openai" => "https://api.openai.com/v1",
        "anthropic" => "https://api.anthropic.com/v1",
        "gemini" => "https://generativelanguage.googleapis.com/v1beta/openai",
        "mistral" => "https://api.mistral.ai/v1",
        "openrouter" => "https://openrouter.ai/api/v1",
        other => other,
    }
}

fn provider_context_limit(provider: &str) -> usize {
    match provider {
        "anthropic" => 200_000,
        "openai" => 128_000,
        "gemini" => 1_000_000,
        "mistral" => 128_000,
        "openrouter" => 128_000,
        _ => 32_000,
    }
}

fn provider_models(provider: &str) -> &'static [&'static str] {
    match provider {
        "anthropic" => &["claude-opus-4", "claude-sonnet-4.5", "claude-haiku-4"],
        "openai" => &["o1", "gpt-4.1"],
        "gemini" => &["gemini-2.5-pro", "gemini-2.5-flash"],
        "mistral" => &["mistral-large-latest"],
        _ => &[],
    }
}

/// Builds one [`LLMProvider`] per distinct name referenced across the
/// configured tier chains, reading each provider's API key from the
/// environment variable named in `api_key_env` (spec.md §4.2 "a provider
/// with no configured key is treated as unavailable, never attempted").
///
/// Providers with no key configured are silently omitted — callers
/// (`agent::failover`) treat a missing entry the same way they treat
/// [`crate::ai::provider::ProviderError::Unavailable`]: skip and move on.
pub fn build_provider_set(config: &ProviderConfig) -> HashMap<String, Arc<dyn LLMProvider>> {
    let mut names: Vec<&String> = config
        .mini_chain
        .iter()
        .chain(config.power_chain.iter())
        .chain(config.ludicrous_chain.iter())
        .collect();
    names.sort();
    names.dedup();

    let mut set = HashMap::new();
    for name in names {
        let Some(api_key) = config
            .api_key_env
            .get(name.as_str())
            .and_then(|var| std::env::var(var).ok())
        else {
            continue;
        };
        if api_key.is_empty() {
            continue;
        }

        let mut cfg = OpenAICompatibleConfig::new(api_key, provider_base_url(name))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .max_retries(config.max_retries);

        if name == "anthropic" {
            cfg = cfg.with_header("anthropic-version", "2023-06-01");
        }
        if name == "openrouter" {
            cfg = cfg
                .with_header("HTTP-Referer", "https://castellan.local")
                .with_header("X-Title", "Castellan");
        }
        for model in provider_models(name) {
            if let Some(rate) = rate_card_for(name, model) {
                cfg = cfg.with_rate(*model, rate);
            }
        }

        match OpenAICompatibleProvider::new(cfg, name.clone(), provider_context_limit(name)) {
            Ok(provider) => {
                set.insert(name.clone(), Arc::new(provider) as Arc<dyn LLMProvider>);
            }
            Err(e) => {
                tracing::warn!(provider = %name, error = %e, "failed to construct provider");
            }
        }
    }
    set
}
