//! OpenAI-compatible HTTP client (embeddings + chat).
//!
//! Works against any service speaking the `/v1/embeddings` and
//! `/v1/chat/completions` shape: OpenAI itself, vLLM, llama.cpp server,
//! LM Studio, and most gateways.

use respan_core::{ChatBackend, EmbeddingBackend, Error, Result};
use serde::{Deserialize, Serialize};

fn env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

#[derive(Debug, Clone)]
pub struct OpenAiCompatClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    embed_model: String,
    chat_model: Option<String>,
}

impl OpenAiCompatClient {
    pub fn from_env(client: reqwest::Client) -> Result<Self> {
        let base_url = env("RESPAN_OPENAI_COMPAT_BASE_URL").ok_or_else(|| {
            Error::NotConfigured("missing RESPAN_OPENAI_COMPAT_BASE_URL".to_string())
        })?;
        let api_key = env("RESPAN_OPENAI_COMPAT_API_KEY");
        let embed_model = env("RESPAN_OPENAI_COMPAT_EMBED_MODEL").ok_or_else(|| {
            Error::NotConfigured("missing RESPAN_OPENAI_COMPAT_EMBED_MODEL".to_string())
        })?;
        // Chat is optional; without it the client is embeddings-only.
        let chat_model = env("RESPAN_OPENAI_COMPAT_CHAT_MODEL");

        Ok(Self {
            client,
            base_url,
            api_key,
            embed_model,
            chat_model,
        })
    }

    pub fn with_base_url(
        client: reqwest::Client,
        base_url: String,
        embed_model: String,
        chat_model: Option<String>,
    ) -> Self {
        Self {
            client,
            base_url,
            api_key: None,
            embed_model,
            chat_model,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn has_chat(&self) -> bool {
        self.chat_model.is_some()
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.base_url.trim_end_matches('/'))
    }

    fn authorized(&self, rb: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let rb = rb.header(reqwest::header::CONTENT_TYPE, "application/json");
        match &self.api_key {
            Some(k) => rb.header(reqwest::header::AUTHORIZATION, format!("Bearer {k}")),
            None => rb,
        }
    }
}

#[async_trait::async_trait]
impl EmbeddingBackend for OpenAiCompatClient {
    fn name(&self) -> &'static str {
        "openai_compat"
    }

    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        let req = EmbeddingsRequest {
            model: self.embed_model.clone(),
            input: inputs.to_vec(),
        };
        let resp = self
            .authorized(self.client.post(self.endpoint("/v1/embeddings")))
            .json(&req)
            .send()
            .await
            .map_err(|e| Error::Embedding(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Embedding(format!(
                "openai_compat embeddings HTTP {status}"
            )));
        }
        let parsed: EmbeddingsResponse = resp
            .json()
            .await
            .map_err(|e| Error::Embedding(e.to_string()))?;

        // Responses are not guaranteed to preserve input order; `index` is.
        let mut data = parsed.data;
        data.sort_by_key(|d| d.index);
        if data.len() != inputs.len() {
            return Err(Error::Embedding(format!(
                "openai_compat returned {} vectors for {} inputs",
                data.len(),
                inputs.len()
            )));
        }
        Ok(data.into_iter().map(|d| d.embedding).collect())
    }
}

#[async_trait::async_trait]
impl ChatBackend for OpenAiCompatClient {
    fn name(&self) -> &'static str {
        "openai_compat"
    }

    async fn chat(&self, system: &str, user: &str, timeout_ms: u64) -> Result<String> {
        let model = self
            .chat_model
            .clone()
            .ok_or_else(|| {
                Error::NotConfigured("missing RESPAN_OPENAI_COMPAT_CHAT_MODEL".to_string())
            })?;
        let req = ChatCompletionsRequest {
            model,
            messages: vec![
                Message {
                    role: "system".to_string(),
                    content: system.to_string(),
                },
                Message {
                    role: "user".to_string(),
                    content: user.to_string(),
                },
            ],
            temperature: Some(0.0),
            stream: Some(false),
        };

        let resp = self
            .authorized(
                self.client
                    .post(self.endpoint("/v1/chat/completions"))
                    .timeout(std::time::Duration::from_millis(timeout_ms)),
            )
            .json(&req)
            .send()
            .await
            .map_err(|e| Error::Assist(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Assist(format!(
                "openai_compat chat.completions HTTP {status}"
            )));
        }
        let parsed: ChatCompletionsResponse =
            resp.json().await.map_err(|e| Error::Assist(e.to_string()))?;
        Ok(parsed
            .choices
            .first()
            .map(|c| c.message.content.clone())
            .unwrap_or_default())
    }
}

#[derive(Debug, Clone, Serialize)]
struct EmbeddingsRequest {
    model: String,
    input: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct EmbeddingsResponse {
    #[serde(default)]
    data: Vec<EmbeddingDatum>,
}

#[derive(Debug, Clone, Deserialize)]
struct EmbeddingDatum {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

#[derive(Debug, Clone, Serialize)]
struct ChatCompletionsRequest {
    model: String,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatCompletionsResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Clone, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Clone, Deserialize)]
struct ChoiceMessage {
    content: String,
}
