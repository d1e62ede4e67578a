//! Provider failover and tier escalation (spec.md §4.2).
//!
//! [`FailoverController`] owns the provider set built by
//! [`crate::ai::providers::build_provider_set`] and the per-provider cooldown
//! bookkeeping. It knows nothing about tool calls, budgets, or conversation
//! state — that lives in [`crate::agent::loop_`], which constructs a
//! [`crate::agent::errors::FailureContext`] from its own state and attaches
//! it to whatever [`crate::ai::provider::ProviderError`] this controller
//! surfaces.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use crate::ai::provider::{LLMProvider, ProviderError};
use crate::ai::types::{CompletionRequest, CompletionResponse};
use crate::config::schema::{ModelTier, ProviderConfig};

/// Drives provider selection within one tier and tier-to-tier escalation
/// across a tier chain (spec.md §4.2 "Failover & escalation").
pub struct FailoverController {
    providers: HashMap<String, Arc<dyn LLMProvider>>,
    provider_config: ProviderConfig,
    cooldowns: Mutex<HashMap<String, Instant>>,
}

/// Outcome of one [`FailoverController::call_tier`] invocation: the response
/// plus which provider actually produced it, so the caller can log / persist
/// cost against the right row.
pub struct TierCallOutcome {
    pub response: CompletionResponse,
    pub provider: String,
    pub tier: ModelTier,
}

impl FailoverController {
    pub fn new(providers: HashMap<String, Arc<dyn LLMProvider>>, provider_config: ProviderConfig) -> Self {
        Self {
            providers,
            provider_config,
            cooldowns: Mutex::new(HashMap::new()),
        }
    }

    /// The next tier up the escalation ladder, if any (spec.md §4.2
    /// "mini → power → ludicrous").
    pub fn next_tier(tier: ModelTier) -> Option<ModelTier> {
        match tier {
            ModelTier::Mini => Some(ModelTier::Power),
            ModelTier::Power => Some(ModelTier::Ludicrous),
            ModelTier::Ludicrous => None,
        }
    }

    /// Whether escalation to the ludicrous tier is permitted at all
    /// (spec.md §4.2 "only consulted when `ludicrous_enabled` is true").
    pub fn ludicrous_enabled(&self) -> bool {
        self.provider_config.ludicrous_enabled
    }

    async fn is_cooling_down(&self, provider: &str) -> bool {
        let cooldowns = self.cooldowns.lock().await;
        match cooldowns.get(provider) {
            Some(until) => Instant::now() < *until,
            None => false,
        }
    }

    async fn start_cooldown(&self, provider: &str) {
        let mut cooldowns = self.cooldowns.lock().await;
        let until = Instant::now() + Duration::from_secs(self.provider_config.cooldown_secs);
        cooldowns.insert(provider.to_string(), until);
    }

    /// Traverse `tier`'s provider chain, retrying transient failures on the
    /// current provider up to `max_retries` times before cooling it down and
    /// moving to the next (spec.md §4.2 step 2 "same-tier retry ... then
    /// cooldown and advance"). A provider with no configured key was never
    /// added to `providers` by `build_provider_set` and is skipped exactly
    /// like one explicitly `Unavailable`.
    pub async fn call_tier(
        &self,
        tier: ModelTier,
        request: &CompletionRequest,
    ) -> Result<TierCallOutcome, ProviderError> {
        let chain = self.provider_config.chain_for(tier);
        let mut last_err = ProviderError::Unavailable("no provider configured for tier".to_string());

        for name in chain {
            if self.is_cooling_down(name).await {
                continue;
            }
            let Some(provider) = self.providers.get(name) else {
                continue;
            };

            let mut attempt = 0u32;
            loop {
                match provider.call(request.clone()).await {
                    Ok(response) => {
                        return Ok(TierCallOutcome {
                            response,
                            provider: name.clone(),
                            tier,
                        });
                    }
                    Err(ProviderError::RetryableTransport(msg)) => {
                        attempt += 1;
                        last_err = ProviderError::RetryableTransport(msg);
                        if attempt >= self.provider_config.max_retries {
                            self.start_cooldown(name).await;
                            break;
                        }
                        continue;
                    }
                    Err(ProviderError::Unavailable(msg)) => {
                        last_err = ProviderError::Unavailable(msg);
                        break;
                    }
                    Err(hard @ ProviderError::HardFailure(_)) => {
                        // Not failover-eligible: the model/provider rejected the
                        // request itself, not a transient transport condition.
                        return Err(hard);
                    }
                }
            }
        }

        Err(last_err)
    }

    /// Re-check whether `provider` is configured at all, independent of
    /// cooldown state — used by the loop when deciding whether an escalation
    /// restart on the same provider is even possible.
    pub fn has_provider(&self, provider: &str) -> bool {
        self.providers.contains_key(provider)
    }

    pub fn provider(&self, name: &str) -> Option<Arc<dyn LLMProvider>> {
        self.providers.get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyProvider {
        name: String,
        fail_times: AtomicU32,
    }

    #[async_trait]
    impl LLMProvider for FlakyProvider {
        async fn call(&self, _request: CompletionRequest) -> Result<CompletionResponse, ProviderError> {
            if self.fail_times.load(Ordering::SeqCst) > 0 {
                self.fail_times.fetch_sub(1, Ordering::SeqCst);
                return Err(ProviderError::RetryableTransport("503".into()));
            }
            Ok(CompletionResponse {
                content: "ok".into(),
                tool_calls: vec![],
                model: "test-model".into(),
                usage: None,
                finish_reason: Some("stop".into()),
            })
        }

        fn context_limit(&self) -> usize {
            32_000
        }

        fn supports_tools(&self) -> bool {
            true
        }

        fn provider_name(&self) -> &str {
            &self.name
        }

        fn cost_usd(&self, _model: &str, _input_tokens: u32, _output_tokens: u32) -> f64 {
            0.0
        }
    }

    fn test_config(chain: Vec<&str>) -> ProviderConfig {
        ProviderConfig {
            mini_chain: chain.into_iter().map(String::from).collect(),
            max_retries: 2,
            cooldown_secs: 60,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn retries_same_provider_before_advancing() {
        let mut providers: HashMap<String, Arc<dyn LLMProvider>> = HashMap::new();
        providers.insert(
            "flaky".into(),
            Arc::new(FlakyProvider {
                name: "flaky".into(),
                fail_times: AtomicU32::new(1),
            }),
        );
        let controller = FailoverController::new(providers, test_config(vec!["flaky"]));
        let req = CompletionRequest::new("test-model", "sys", Vec::new());
        let outcome = controller.call_tier(ModelTier::Mini, &req).await.unwrap();
        assert_eq!(outcome.provider, "flaky");
    }

    #[tokio::test]
    async fn advances_to_next_provider_after_exhausting_retries() {
        let mut providers: HashMap<String, Arc<dyn LLMProvider>> = HashMap::new();
        providers.insert(
            "bad".into(),
            Arc::new(FlakyProvider {
                name: "bad".into(),
                fail_times: AtomicU32::new(100),
            }),
        );
        providers.insert(
            "good".into(),
            Arc::new(FlakyProvider {
                name: "good".into(),
                fail_times: AtomicU32::new(0),
            }),
        );
        let controller = FailoverController::new(providers, test_config(vec!["bad", "good"]));
        let req = CompletionRequest::new("test-model", "sys", Vec::new());
        let outcome = controller.call_tier(ModelTier::Mini, &req).await.unwrap();
        assert_eq!(outcome.provider, "good");
    }

    #[tokio::test]
    async fn hard_failure_is_not_retried() {
        struct AlwaysHard;
        #[async_trait]
        impl LLMProvider for AlwaysHard {
            async fn call(&self, _request: CompletionRequest) -> Result<CompletionResponse, ProviderError> {
                Err(ProviderError::HardFailure("bad request".into()))
            }
            fn context_limit(&self) -> usize {
                32_000
            }
            fn supports_tools(&self) -> bool {
                true
            }
            fn provider_name(&self) -> &str {
                "hard"
            }
            fn cost_usd(&self, _model: &str, _i: u32, _o: u32) -> f64 {
                0.0
            }
        }
        let mut providers: HashMap<String, Arc<dyn LLMProvider>> = HashMap::new();
        providers.insert("hard".into(), Arc::new(AlwaysHard));
        let controller = FailoverController::new(providers, test_config(vec!["hard"]));
        let req = CompletionRequest::new("test-model", "sys", Vec::new());
        let err = controller.call_tier(ModelTier::Mini, &req).await.unwrap_err();
        assert!(matches!(err, ProviderError::HardFailure(_)));
    }

    #[test]
    fn next_tier_escalation_ladder() {
        assert_eq!(FailoverController::next_tier(ModelTier::Mini), Some(ModelTier::Power));
        assert_eq!(FailoverController::next_tier(ModelTier::Power), Some(ModelTier::Ludicrous));
        assert_eq!(FailoverController::next_tier(ModelTier::Ludicrous), None);
    }
}
