//! OpenAI chat-completion summarizer.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::{Client as HttpClient, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

const SUMMARIZE_PROMPT: &str = "You are a helpful assistant. Your task is to extract all text that \
refers to the content of a video from the title and description a user gives you. Leave out \
sponsor messages, calls to subscribe and links that do not describe the content itself. You will \
not add introductory sentences like \"This text is about\" or \"Summary of...\". Just give the \
words verbatim. Trim any white space back to a simple space.";

/// Produces a content summary from a video's title and description.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, title: &str, description: &str) -> Result<String>;
}

#[derive(Clone, Debug)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub timeout: Duration,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

#[derive(Debug, Error)]
pub enum OpenAiError {
    #[error("http error: {0}")]
    Http(reqwest::Error),
    #[error("request timed out")]
    Timeout,
    #[error("api error {status}: {message}")]
    Api { status: StatusCode, message: String },
    #[error("response contained no completion choices")]
    EmptyResponse,
    #[error("mock summarizer response queue is empty")]
    MockQueueEmpty,
}

impl OpenAiError {
    fn http(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            OpenAiError::Timeout
        } else {
            OpenAiError::Http(err)
        }
    }
}

pub struct OpenAiSummarizer {
    http: HttpClient,
    cfg: OpenAiConfig,
}

impl OpenAiSummarizer {
    pub fn new(cfg: OpenAiConfig) -> Result<Self, OpenAiError> {
        let http = HttpClient::builder()
            .timeout(cfg.timeout)
            .build()
            .map_err(OpenAiError::http)?;
        Ok(Self { http, cfg })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/chat/completions",
            self.cfg.base_url.trim_end_matches('/')
        )
    }

    fn build_request(&self, title: &str, description: &str) -> ChatRequest {
        ChatRequest {
            model: self.cfg.model.clone(),
            messages: vec![
                ApiChatMessage {
                    role: "system",
                    content: SUMMARIZE_PROMPT.to_string(),
                },
                ApiChatMessage {
                    role: "user",
                    content: format!("{title}\n\n{description}"),
                },
            ],
        }
    }
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ApiChatMessage>,
}

#[derive(Serialize)]
struct ApiChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ApiErrorEnvelope {
    error: ApiErrorBody,
}

#[derive(Default, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    message: String,
}

#[async_trait]
impl Summarizer for OpenAiSummarizer {
    async fn summarize(&self, title: &str, description: &str) -> Result<String> {
        let request = self.build_request(title, description);
        let resp = self
            .http
            .post(self.endpoint())
            .bearer_auth(&self.cfg.api_key)
            .json(&request)
            .send()
            .await
            .map_err(OpenAiError::http)?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp
                .json::<ApiErrorEnvelope>()
                .await
                .map(|env| env.error.message)
                .unwrap_or_default();
            return Err(OpenAiError::Api { status, message }.into());
        }

        let body: ChatResponse = resp.json().await.map_err(OpenAiError::http)?;
        let content = body
            .choices
            .into_iter()
            .last()
            .and_then(|choice| choice.message.content)
            .ok_or(OpenAiError::EmptyResponse)?;
        Ok(content)
    }
}

/// Scripted summarizer: queued responses in call order, calls recorded. An
/// exhausted queue is an error so a missing setup line fails loudly.
#[derive(Default)]
pub struct MockSummarizer {
    responses: Mutex<VecDeque<Result<String>>>,
    calls: Mutex<Vec<(String, String)>>,
}

impl MockSummarizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_response(&self, response: Result<String>) {
        self.responses.lock().unwrap().push_back(response);
    }

    /// Recorded (title, description) pairs.
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Summarizer for MockSummarizer {
    async fn summarize(&self, title: &str, description: &str) -> Result<String> {
        self.calls
            .lock()
            .unwrap()
            .push((title.to_string(), description.to_string()));
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(OpenAiError::MockQueueEmpty.into()))
    }
}
