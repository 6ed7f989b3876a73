//! Completion service abstraction used by every agent.
//!
//! Agents only see [`CompletionService`]. Concrete implementations wrap a rig
//! completion model (Gemini or OpenAI); [`ResilientCompletion`] adds the
//! bounded retry and per-call timeout on top of any implementation.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use rig::client::CompletionClient;
use rig::completion::{AssistantContent, CompletionModel, CompletionRequest, Message};
use rig::message::{Text, UserContent};
use rig::one_or_many::OneOrMany;

use super::retry::{with_retry, RetryPolicy};
use crate::settings::schema::{AiProvider, AiSettings};

/// Text-completion capability consumed by the agents.
#[async_trait]
pub trait CompletionService: Send + Sync {
    /// Complete `prompt` under the given system instruction.
    async fn complete(&self, system: &str, prompt: &str) -> Result<String>;

    /// Human-readable provider/model description for logs.
    fn description(&self) -> String;
}

/// Completion backed by any rig [`CompletionModel`].
pub struct RigCompletion<M: CompletionModel> {
    model: M,
    model_name: String,
    temperature: f64,
    max_tokens: u64,
}

impl<M: CompletionModel> RigCompletion<M> {
    pub fn new(model: M, model_name: impl Into<String>) -> Self {
        Self {
            model,
            model_name: model_name.into(),
            temperature: 0.0,
            max_tokens: 2048,
        }
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u64) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

#[async_trait]
impl<M> CompletionService for RigCompletion<M>
where
    M: CompletionModel + Send + Sync,
{
    async fn complete(&self, system: &str, prompt: &str) -> Result<String> {
        let user_message = Message::User {
            content: OneOrMany::one(UserContent::Text(Text {
                text: prompt.to_string(),
            })),
        };

        let request = CompletionRequest {
            preamble: Some(system.to_string()),
            chat_history: OneOrMany::one(user_message),
            documents: vec![],
            tools: vec![],
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
            tool_choice: None,
            additional_params: None,
        };

        let response = self
            .model
            .completion(request)
            .await
            .map_err(|e| anyhow::anyhow!("{} completion failed: {}", self.model_name, e))?;

        let text: String = response
            .choice
            .iter()
            .filter_map(|content| match content {
                AssistantContent::Text(t) => Some(t.text.clone()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("");

        Ok(text)
    }

    fn description(&self) -> String {
        self.model_name.clone()
    }
}

/// Decorator that retries failed or stalled completions.
pub struct ResilientCompletion {
    inner: Arc<dyn CompletionService>,
    policy: RetryPolicy,
}

impl ResilientCompletion {
    pub fn new(inner: Arc<dyn CompletionService>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl CompletionService for ResilientCompletion {
    async fn complete(&self, system: &str, prompt: &str) -> Result<String> {
        let label = format!("completion ({})", self.inner.description());
        let text = with_retry(&self.policy, &label, || self.inner.complete(system, prompt)).await?;
        Ok(text)
    }

    fn description(&self) -> String {
        self.inner.description()
    }
}

/// Build the configured completion service, wrapped with retries.
pub fn create_completion_service(
    settings: &AiSettings,
    api_key: &str,
) -> Result<Arc<dyn CompletionService>> {
    if api_key.is_empty() {
        anyhow::bail!(
            "No API key configured for provider '{}'",
            settings.provider.as_str()
        );
    }

    let inner: Arc<dyn CompletionService> = match settings.provider {
        AiProvider::Gemini => {
            let client = rig::providers::gemini::Client::new(api_key);
            let model = client.completion_model(&settings.model);
            Arc::new(
                RigCompletion::new(model, format!("gemini/{}", settings.model))
                    .with_temperature(settings.temperature)
                    .with_max_tokens(settings.max_tokens),
            )
        }
        AiProvider::OpenAi => {
            let client = rig::providers::openai::Client::new(api_key);
            let model = client.completion_model(&settings.model);
            Arc::new(
                RigCompletion::new(model, format!("openai/{}", settings.model))
                    .with_temperature(settings.temperature)
                    .with_max_tokens(settings.max_tokens),
            )
        }
    };

    tracing::info!("[llm] Completion service ready: {}", inner.description());
    Ok(Arc::new(ResilientCompletion::new(
        inner,
        settings.retry_policy(),
    )))
}

/// Resolve the API key for the configured provider from settings or the environment.
pub fn resolve_api_key(settings: &AiSettings) -> Result<String> {
    let env_vars: &[&str] = match settings.provider {
        AiProvider::Gemini => &["GEMINI_API_KEY", "GOOGLE_API_KEY"],
        AiProvider::OpenAi => &["OPENAI_API_KEY"],
    };
    crate::settings::get_with_env_fallback(&settings.api_key, env_vars, None).with_context(|| {
        format!(
            "Set ai.api_key in settings or one of {}",
            env_vars.join(", ")
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Flaky {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl CompletionService for Flaky {
        async fn complete(&self, _system: &str, prompt: &str) -> Result<String> {
            if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
                anyhow::bail!("429 rate limited");
            }
            Ok(format!("echo: {prompt}"))
        }

        fn description(&self) -> String {
            "flaky".to_string()
        }
    }

    #[tokio::test]
    async fn test_resilient_completion_retries() {
        let inner = Arc::new(Flaky {
            failures: 2,
            calls: AtomicU32::new(0),
        });
        let service = ResilientCompletion::new(inner.clone(), RetryPolicy::immediate(3));

        let text = service.complete("system", "hello").await.unwrap();
        assert_eq!(text, "echo: hello");
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_resilient_completion_surfaces_exhaustion() {
        let inner = Arc::new(Flaky {
            failures: 10,
            calls: AtomicU32::new(0),
        });
        let service = ResilientCompletion::new(inner.clone(), RetryPolicy::immediate(3));

        let err = service.complete("system", "hello").await.unwrap_err();
        assert!(err.to_string().contains("3 attempt(s)"));
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_create_requires_api_key() {
        let settings = AiSettings::default();
        assert!(create_completion_service(&settings, "").is_err());
    }
}
