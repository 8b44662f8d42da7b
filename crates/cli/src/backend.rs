//! OpenAI-compatible `/chat/completions` backend.

use crate::config::BackendConfig;
use anyhow::{Context as AnyhowContext, Result};
use async_trait::async_trait;
use context_dispatch::{
    Backend, BackendError, CallUsage, CancellationToken, GenerateRequest, Generation, Role,
};
use context_protocol::{excerpt, EXCERPT_CHARS};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Most stop sequences OpenAI-style endpoints accept
const MAX_STOP_SEQUENCES: usize = 4;

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    stop: Vec<&'a str>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

pub struct OpenAiBackend {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    input_cost_per_mtok: f64,
    output_cost_per_mtok: f64,
}

impl OpenAiBackend {
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;
        if config.api_key.is_none() {
            log::warn!("No API key configured; requests are sent without authorization");
        }
        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.url.trim_end_matches('/')),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            input_cost_per_mtok: config.input_cost_per_mtok,
            output_cost_per_mtok: config.output_cost_per_mtok,
        })
    }

    fn body<'a>(&'a self, request: &'a GenerateRequest) -> ChatRequest<'a> {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        if !request.system.is_empty() {
            messages.push(ChatMessage {
                role: "system",
                content: &request.system,
            });
        }
        messages.extend(request.messages.iter().map(|message| ChatMessage {
            role: match message.role {
                Role::User => "user",
                Role::Assistant => "assistant",
            },
            content: &message.content,
        }));
        ChatRequest {
            model: &self.model,
            messages,
            max_tokens: request.max_tokens,
            stop: request
                .stop_sequences
                .iter()
                .take(MAX_STOP_SEQUENCES)
                .map(String::as_str)
                .collect(),
        }
    }

    /// Nanodollars for one call; the per-token price is `cost / 1e6` USD
    fn cost(&self, usage: &ChatUsage) -> u64 {
        let nanodollars = usage.prompt_tokens as f64 * self.input_cost_per_mtok * 1_000.0
            + usage.completion_tokens as f64 * self.output_cost_per_mtok * 1_000.0;
        nanodollars.round() as u64
    }

    async fn send(&self, request: &GenerateRequest) -> Result<Generation, BackendError> {
        let mut call = self.client.post(&self.endpoint).json(&self.body(request));
        if let Some(key) = &self.api_key {
            call = call.bearer_auth(key);
        }
        let response = call
            .send()
            .await
            .map_err(|err| BackendError::Transport(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        let payload: ChatResponse = response
            .json()
            .await
            .map_err(|err| BackendError::Transport(format!("invalid response body: {err}")))?;
        let text = payload
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| BackendError::Transport("response contained no choices".to_string()))?;
        let usage = payload.usage.unwrap_or_default();
        Ok(Generation {
            usage: CallUsage {
                input_tokens: usage.prompt_tokens,
                output_tokens: usage.completion_tokens,
                cost_nanodollars: self.cost(&usage),
            },
            text,
        })
    }
}

/// Rate limits and server errors are worth a re-send; other failures are not
fn classify_status(status: StatusCode, body: &str) -> BackendError {
    let message = format!("HTTP {status}: {}", excerpt(body.trim(), EXCERPT_CHARS));
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        BackendError::Transport(message)
    } else {
        BackendError::Rejected(message)
    }
}

#[async_trait]
impl Backend for OpenAiBackend {
    async fn generate(
        &self,
        request: &GenerateRequest,
        cancel: &CancellationToken,
    ) -> Result<Generation, BackendError> {
        log::debug!(
            "POST {} ({} message(s), max_tokens {})",
            self.endpoint,
            request.messages.len(),
            request.max_tokens
        );
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(BackendError::Cancelled),
            result = self.send(request) => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use context_dispatch::Message;
    use pretty_assertions::assert_eq;

    fn backend() -> OpenAiBackend {
        OpenAiBackend::new(&BackendConfig {
            url: "http://localhost:8080/v1/".to_string(),
            api_key: Some("secret".to_string()),
            input_cost_per_mtok: 0.15,
            output_cost_per_mtok: 0.6,
            ..BackendConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn endpoint_joins_base_url() {
        assert_eq!(backend().endpoint, "http://localhost:8080/v1/chat/completions");
    }

    #[test]
    fn body_puts_system_first_and_caps_stops() {
        let backend = backend();
        let mut request = GenerateRequest::new("sys", "question").with_max_tokens(64);
        request.messages.push(Message::assistant("draft"));
        request.messages.push(Message::user("fix it"));
        for stop in ["a", "b", "c", "d", "e"] {
            request = request.with_stop(stop);
        }

        let body = serde_json::to_value(backend.body(&request)).unwrap();
        let roles: Vec<&str> = body["messages"]
            .as_array()
            .unwrap()
            .iter()
            .map(|message| message["role"].as_str().unwrap())
            .collect();
        assert_eq!(roles, vec!["system", "user", "assistant", "user"]);
        assert_eq!(body["max_tokens"], 64);
        assert_eq!(body["stop"].as_array().unwrap().len(), MAX_STOP_SEQUENCES);
    }

    #[test]
    fn empty_stop_list_is_omitted() {
        let backend = backend();
        let request = GenerateRequest::new("sys", "question");
        let body = serde_json::to_value(backend.body(&request)).unwrap();
        assert!(body.get("stop").is_none());
    }

    #[test]
    fn status_classification() {
        assert!(matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, "slow down"),
            BackendError::Transport(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_GATEWAY, ""),
            BackendError::Transport(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::UNAUTHORIZED, "bad key"),
            BackendError::Rejected(message) if message.contains("bad key")
        ));
    }

    #[test]
    fn cost_uses_per_million_prices() {
        let usage = ChatUsage {
            prompt_tokens: 1_000_000,
            completion_tokens: 1_000,
        };
        // $0.15 + $0.0006
        assert_eq!(backend().cost(&usage), 150_600_000);
    }

    #[test]
    fn response_without_usage_parses() {
        let payload: ChatResponse =
            serde_json::from_str(r#"{"choices":[{"message":{"content":"hi"}}]}"#).unwrap();
        assert!(payload.usage.is_none());
        assert_eq!(payload.choices[0].message.content.as_deref(), Some("hi"));
    }
}
