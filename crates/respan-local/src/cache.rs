//! Filesystem store for anchor chunk sets.
//!
//! Anchors are produced once per source document and reused across many
//! matching sessions, so they are keyed by `(document_id, content_hash)` of
//! the source. A record that fails to parse is treated as a miss, never as an
//! error; the caller can always regenerate anchors.

use respan_core::{AnchorChunk, Error, Result};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// One stored anchor set.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct AnchorRecord {
    pub schema_version: u32,
    pub document_id: String,
    pub content_hash: String,
    pub stored_at_epoch_s: u64,
    pub chunks: Vec<AnchorChunk>,
    /// Free-form document structure (outline, page map) captured at anchor
    /// time; passed through untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structure: Option<serde_json::Value>,
}

pub const ANCHOR_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone)]
pub struct AnchorCache {
    root: PathBuf,
}

impl AnchorCache {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn key_for(document_id: &str, content_hash: &str) -> String {
        // Deterministic key: identity + content. Keep it stable.
        let mut h = Sha256::new();
        h.update(b"doc:");
        h.update(document_id.as_bytes());
        h.update(b"\nhash:");
        h.update(content_hash.as_bytes());
        hex::encode(h.finalize())
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root
            .join(&key[0..2])
            .join(&key[2..4])
            .join(format!("{key}.json"))
    }

    pub fn get(&self, document_id: &str, content_hash: &str) -> Result<Option<AnchorRecord>> {
        let key = Self::key_for(document_id, content_hash);
        let p = self.path_for(&key);
        if !p.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&p).map_err(|e| Error::Cache(e.to_string()))?;
        // Corrupt or schema-incompatible records are a miss.
        let record: AnchorRecord = match serde_json::from_slice(&bytes) {
            Ok(r) => r,
            Err(_) => return Ok(None),
        };
        if record.schema_version != ANCHOR_SCHEMA_VERSION
            || record.content_hash != content_hash
        {
            return Ok(None);
        }
        Ok(Some(record))
    }

    pub fn put(
        &self,
        document_id: &str,
        content_hash: &str,
        chunks: &[AnchorChunk],
        structure: Option<serde_json::Value>,
    ) -> Result<AnchorRecord> {
        let key = Self::key_for(document_id, content_hash);
        let p = self.path_for(&key);
        if let Some(parent) = p.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::Cache(e.to_string()))?;
        }
        let now_s = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::from_secs(0))
            .as_secs();

        let record = AnchorRecord {
            schema_version: ANCHOR_SCHEMA_VERSION,
            document_id: document_id.to_string(),
            content_hash: content_hash.to_string(),
            stored_at_epoch_s: now_s,
            chunks: chunks.to_vec(),
            structure,
        };

        // Write-then-rename so readers never observe a half-written record.
        let tmp = p.with_extension("json.tmp");
        fs::write(
            &tmp,
            serde_json::to_vec(&record).map_err(|e| Error::Cache(e.to_string()))?,
        )
        .map_err(|e| Error::Cache(e.to_string()))?;
        fs::rename(&tmp, &p).map_err(|e| Error::Cache(e.to_string()))?;
        Ok(record)
    }
}
