//! Ollama client (embeddings + chat), opt-in via environment.

use respan_core::{ChatBackend, EmbeddingBackend, Error, Result};
use serde::{Deserialize, Serialize};

fn env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn env_bool(key: &str) -> bool {
    env(key)
        .and_then(|s| s.parse::<bool>().ok())
        .unwrap_or(false)
}

#[derive(Debug, Clone)]
pub struct OllamaClient {
    client: reqwest::Client,
    base_url: String,
    embed_model: String,
    chat_model: String,
}

impl OllamaClient {
    pub fn from_env(client: reqwest::Client) -> Result<Self> {
        // Opt-in: don't accidentally start calling localhost if the user didn't ask for it.
        if !env_bool("RESPAN_OLLAMA_ENABLE") {
            return Err(Error::NotConfigured(
                "RESPAN_OLLAMA_ENABLE is not set (or false)".to_string(),
            ));
        }
        let base_url =
            env("RESPAN_OLLAMA_BASE_URL").unwrap_or_else(|| "http://127.0.0.1:11434".to_string());
        let embed_model =
            env("RESPAN_OLLAMA_EMBED_MODEL").unwrap_or_else(|| "nomic-embed-text".to_string());
        // A pragmatic default for "small but capable" local reasoning. Users
        // should override this based on what they have installed.
        let chat_model =
            env("RESPAN_OLLAMA_CHAT_MODEL").unwrap_or_else(|| "qwen2.5:3b-instruct".to_string());
        Ok(Self {
            client,
            base_url,
            embed_model,
            chat_model,
        })
    }

    pub fn with_base_url(client: reqwest::Client, base_url: String) -> Self {
        Self {
            client,
            base_url,
            embed_model: "nomic-embed-text".to_string(),
            chat_model: "qwen2.5:3b-instruct".to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait::async_trait]
impl EmbeddingBackend for OllamaClient {
    fn name(&self) -> &'static str {
        "ollama"
    }

    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        let req = EmbedRequest {
            model: self.embed_model.clone(),
            input: inputs.to_vec(),
        };
        let resp = self
            .client
            .post(self.endpoint("/api/embed"))
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .json(&req)
            .send()
            .await
            .map_err(|e| Error::Embedding(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Embedding(format!("ollama embed HTTP {status}")));
        }
        let parsed: EmbedResponse = resp
            .json()
            .await
            .map_err(|e| Error::Embedding(e.to_string()))?;
        if parsed.embeddings.len() != inputs.len() {
            return Err(Error::Embedding(format!(
                "ollama returned {} vectors for {} inputs",
                parsed.embeddings.len(),
                inputs.len()
            )));
        }
        Ok(parsed.embeddings)
    }
}

#[async_trait::async_trait]
impl ChatBackend for OllamaClient {
    fn name(&self) -> &'static str {
        "ollama"
    }

    async fn chat(&self, system: &str, user: &str, timeout_ms: u64) -> Result<String> {
        let req = ChatRequest {
            model: self.chat_model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: system.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: user.to_string(),
                },
            ],
            stream: Some(false),
        };
        let resp = self
            .client
            .post(self.endpoint("/api/chat"))
            .timeout(std::time::Duration::from_millis(timeout_ms))
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .json(&req)
            .send()
            .await
            .map_err(|e| Error::Assist(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Assist(format!("ollama chat HTTP {status}")));
        }
        let parsed: ChatResponse = resp.json().await.map_err(|e| Error::Assist(e.to_string()))?;
        Ok(parsed.message.content)
    }
}

#[derive(Debug, Clone, Serialize)]
struct EmbedRequest {
    model: String,
    input: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct EmbedResponse {
    #[serde(default)]
    embeddings: Vec<Vec<f32>>,
}

#[derive(Debug, Clone, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatResponse {
    message: ChatMessage,
}
