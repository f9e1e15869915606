//! Local implementations of the matching cascade: the five layers, the
//! orchestrating pipeline, the anchor store, and the HTTP backends.

use sha2::{Digest, Sha256};
use std::sync::Arc;

pub mod assist;
pub mod cache;
pub mod exact;
pub mod fuzzy;
pub mod interpolate;
pub mod layer;
pub mod normalize;
pub mod ollama;
pub mod openai_compat;
pub mod pipeline;
pub mod semantic;

pub use cache::{AnchorCache, AnchorRecord, ANCHOR_SCHEMA_VERSION};
pub use pipeline::Pipeline;

use respan_core::{ChatBackend, EmbeddingBackend};

/// Canonical content hash for document text: lowercase hex SHA-256 of the
/// UTF-8 bytes. Drives both the anchor store key and the session
/// short-circuit.
pub fn content_hash_of(text: &str) -> String {
    let mut h = Sha256::new();
    h.update(text.as_bytes());
    hex::encode(h.finalize())
}

/// Network backends resolved from the environment, openai-compatible first,
/// then Ollama. Missing configuration is not an error; the cascade degrades
/// to its local layers.
#[derive(Default, Clone)]
pub struct EnvBackends {
    pub embedder: Option<Arc<dyn EmbeddingBackend>>,
    pub assistant: Option<Arc<dyn ChatBackend>>,
    pub embedder_name: Option<&'static str>,
    pub assistant_name: Option<&'static str>,
}

pub fn backends_from_env(client: reqwest::Client) -> EnvBackends {
    let mut out = EnvBackends::default();

    if let Ok(oai) = openai_compat::OpenAiCompatClient::from_env(client.clone()) {
        let has_chat = oai.has_chat();
        let oai = Arc::new(oai);
        out.embedder = Some(oai.clone());
        out.embedder_name = Some("openai_compat");
        if has_chat {
            out.assistant = Some(oai);
            out.assistant_name = Some("openai_compat");
        }
    }

    if out.embedder.is_none() || out.assistant.is_none() {
        if let Ok(ollama) = ollama::OllamaClient::from_env(client) {
            let ollama = Arc::new(ollama);
            if out.embedder.is_none() {
                out.embedder = Some(ollama.clone());
                out.embedder_name = Some("ollama");
            }
            if out.assistant.is_none() {
                out.assistant = Some(ollama);
                out.assistant_name = Some("ollama");
            }
        }
    }

    out
}
