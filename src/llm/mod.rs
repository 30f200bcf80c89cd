pub mod models;
pub mod providers;

use crate::config::LlmConfig;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("LLM connection error: {0}")]
    Connection(String),
    #[error("LLM response error: {0}")]
    Response(String),
    #[error("LLM configuration error: {0}")]
    Config(String),
    #[error("LLM call timed out after {0:?}")]
    Timeout(Duration),
}

/// The NL-generation collaborator: prompt text in, raw model text out.
///
/// Implementations do not interpret the output; parsing SQL out of it is the
/// generator's job.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError>;

    fn name(&self) -> &str;
}

pub struct LlmManager {
    provider: Box<dyn CompletionProvider>,
    timeout: Duration,
}

impl LlmManager {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let provider: Box<dyn CompletionProvider> = match config.backend.as_str() {
            "remote" => Box::new(providers::remote::RemoteLlmProvider::new(config)?),
            "ollama" => Box::new(providers::ollama::OllamaProvider::new(config)?),
            "anthropic" => Box::new(providers::anthropic::AnthropicProvider::new(config)?),
            _ => {
                return Err(LlmError::Config(format!(
                    "Unsupported LLM backend: {}",
                    config.backend
                )));
            }
        };

        Ok(Self::with_provider(
            provider,
            Duration::from_secs(config.timeout_secs),
        ))
    }

    pub fn with_provider(provider: Box<dyn CompletionProvider>, timeout: Duration) -> Self {
        Self { provider, timeout }
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Runs one completion under the hard timeout.
    pub async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        debug!(
            provider = self.provider.name(),
            prompt_chars = prompt.len(),
            "Sending completion request"
        );
        match tokio::time::timeout(self.timeout, self.provider.complete(prompt)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(provider = self.provider.name(), "Completion timed out");
                Err(LlmError::Timeout(self.timeout))
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Replays canned responses in order and records every prompt it sees.
    pub struct ScriptedProvider {
        responses: Mutex<VecDeque<Result<String, LlmError>>>,
        pub prompts: Mutex<Vec<String>>,
        pub calls: AtomicUsize,
    }

    impl ScriptedProvider {
        pub fn new<I, S>(responses: I) -> Self
        where
            I: IntoIterator<Item = S>,
            S: Into<String>,
        {
            Self {
                responses: Mutex::new(responses.into_iter().map(|r| Ok(r.into())).collect()),
                prompts: Mutex::new(Vec::new()),
                calls: AtomicUsize::new(0),
            }
        }

        pub fn failing() -> Self {
            Self {
                responses: Mutex::new(VecDeque::from([Err(LlmError::Connection(
                    "refused".to_string(),
                ))])),
                prompts: Mutex::new(Vec::new()),
                calls: AtomicUsize::new(0),
            }
        }

        pub fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CompletionProvider for ScriptedProvider {
        async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.prompts.lock().push(prompt.to_string());
            self.responses
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(LlmError::Response("script exhausted".to_string())))
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    #[async_trait]
    impl<T: CompletionProvider> CompletionProvider for std::sync::Arc<T> {
        async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
            (**self).complete(prompt).await
        }

        fn name(&self) -> &str {
            (**self).name()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Sleepy;

    #[async_trait]
    impl CompletionProvider for Sleepy {
        async fn complete(&self, _prompt: &str) -> Result<String, LlmError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok("late".to_string())
        }

        fn name(&self) -> &str {
            "sleepy"
        }
    }

    #[tokio::test]
    async fn hung_provider_hits_timeout() {
        let manager = LlmManager::with_provider(Box::new(Sleepy), Duration::from_millis(20));
        let err = manager.complete("prompt").await.unwrap_err();
        assert!(matches!(err, LlmError::Timeout(_)));
    }

    #[test]
    fn unknown_backend_is_a_config_error() {
        let config = LlmConfig {
            backend: "telepathy".to_string(),
            ..LlmConfig::default()
        };
        assert!(matches!(LlmManager::new(&config), Err(LlmError::Config(_))));
    }
}
