//! Answer-generation collaborator.
//!
//! The generator is an injected dependency; this module defines the trait,
//! a typed failure split (retryable vs fatal, so callers never substitute
//! a fabricated answer), and the OpenAI chat implementation with the same
//! retry/backoff loop as the embedding client.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::config::GenerationConfig;

/// Failure classes of the generation collaborator. Retryable failures are
/// transient (rate limits, server errors, network); fatal ones will not
/// succeed on retry (bad request, missing credentials).
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("generation temporarily unavailable: {0}")]
    Retryable(String),
    #[error("generation failed: {0}")]
    Fatal(String),
}

#[async_trait]
pub trait Generator: Send + Sync {
    /// Produce an answer to `question` grounded in `contexts`.
    async fn generate(&self, question: &str, contexts: &[String])
        -> Result<String, GenerationError>;
}

/// Instantiate the generator named by the configuration.
pub fn create_generator(config: &GenerationConfig) -> anyhow::Result<Arc<dyn Generator>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledGenerator)),
        "openai" => Ok(Arc::new(OpenAiGenerator::new(config)?)),
        other => anyhow::bail!("Unknown generation provider: {}", other),
    }
}

/// Placeholder generator: every call is a fatal, clearly-attributed error.
pub struct DisabledGenerator;

#[async_trait]
impl Generator for DisabledGenerator {
    async fn generate(
        &self,
        _question: &str,
        _contexts: &[String],
    ) -> Result<String, GenerationError> {
        Err(GenerationError::Fatal(
            "generation provider is disabled; set [generation] provider in config".to_string(),
        ))
    }
}

/// Generator calling the OpenAI chat completions API.
pub struct OpenAiGenerator {
    model: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAiGenerator {
    pub fn new(config: &GenerationConfig) -> anyhow::Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("generation.model required for openai provider"))?;

        if std::env::var("OPENAI_API_KEY").is_err() {
            anyhow::bail!("OPENAI_API_KEY environment variable not set");
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            model,
            max_retries: config.max_retries,
            client,
        })
    }
}

/// Prompt assembled from the question and retrieved (possibly
/// pseudonymized) context passages.
fn build_prompt(question: &str, contexts: &[String]) -> String {
    format!(
        "Answer the user's question based on the following document excerpts.\n\
         If the answer is not clearly supported, say so.\n\n\
         Question: {}\n\n\
         Context:\n{}\n\n\
         Answer:",
        question,
        contexts.join("\n")
    )
}

#[async_trait]
impl Generator for OpenAiGenerator {
    async fn generate(
        &self,
        question: &str,
        contexts: &[String],
    ) -> Result<String, GenerationError> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| GenerationError::Fatal("OPENAI_API_KEY not set".to_string()))?;

        let body = serde_json::json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": build_prompt(question, contexts) }],
            "temperature": 0.2,
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post("https://api.openai.com/v1/chat/completions")
                .header("Authorization", format!("Bearer {}", api_key))
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let json: serde_json::Value = response.json().await.map_err(|e| {
                            GenerationError::Fatal(format!("invalid completion response: {}", e))
                        })?;
                        return extract_answer(&json);
                    }
                    let text = response.text().await.unwrap_or_default();
                    if status.as_u16() == 429 || status.is_server_error() {
                        last_err = Some(GenerationError::Retryable(format!(
                            "completions API {}: {}",
                            status, text
                        )));
                        continue;
                    }
                    return Err(GenerationError::Fatal(format!(
                        "completions API {}: {}",
                        status, text
                    )));
                }
                Err(e) => {
                    last_err = Some(GenerationError::Retryable(e.to_string()));
                    continue;
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| GenerationError::Retryable("generation retries exhausted".into())))
    }
}

fn extract_answer(json: &serde_json::Value) -> Result<String, GenerationError> {
    json.get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(|s| s.trim().to_string())
        .ok_or_else(|| {
            GenerationError::Fatal("invalid completion response: missing content".to_string())
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_prompt_includes_question_and_contexts() {
        let prompt = build_prompt(
            "How long does payout take?",
            &["Payout occurs within 2 bankdays.".to_string()],
        );
        assert!(prompt.contains("How long does payout take?"));
        assert!(prompt.contains("Payout occurs within 2 bankdays."));
    }

    #[test]
    fn test_extract_answer() {
        let json = serde_json::json!({
            "choices": [{ "message": { "content": "  Two bankdays.  " } }]
        });
        assert_eq!(extract_answer(&json).unwrap(), "Two bankdays.");
    }

    #[test]
    fn test_extract_answer_missing_content_is_fatal() {
        let json = serde_json::json!({ "choices": [] });
        assert!(matches!(
            extract_answer(&json),
            Err(GenerationError::Fatal(_))
        ));
    }

    #[tokio::test]
    async fn test_disabled_generator_is_fatal() {
        let err = DisabledGenerator
            .generate("q", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::Fatal(_)));
    }
}
