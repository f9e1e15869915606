use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("embedding failed: {0}")]
    Embedding(String),
    #[error("assist failed: {0}")]
    Assist(String),
    #[error("timeout: {0}")]
    Timeout(String),
    #[error("cache error: {0}")]
    Cache(String),
    #[error("not configured: {0}")]
    NotConfigured(String),
    #[error("session cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, Error>;

/// Bounding box in page coordinates, as reported by the structural extractor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Structural metadata attached to an anchor chunk by the upstream extractor.
///
/// Everything here is trusted as-is and never rewritten by the pipeline;
/// fields are optional because extractors vary in what they can produce.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_start: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_end: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub heading_path: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading_level: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_marker: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bboxes: Vec<BBox>,
}

/// One structurally-derived segment to be relocated inside the transformed text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnchorChunk {
    /// 0-based sequence position; defines the required non-crossing order.
    pub index: u32,
    pub content: String,
    #[serde(default)]
    pub metadata: ChunkMetadata,
}

/// The rewritten/cleaned document the anchors are matched against.
///
/// Immutable for the duration of a session; replaced wholesale between
/// sessions, never patched in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformedDocument {
    pub text: String,
    pub content_hash: String,
}

/// Categorical trust level for a recovered span.
///
/// `Exact > High > Medium > Synthetic`; a chunk only degrades to a lower
/// tier after every higher-trust strategy has failed for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceTier {
    Exact,
    High,
    Medium,
    Synthetic,
}

impl ConfidenceTier {
    /// Numeric trust rank; higher is more trusted.
    pub fn rank(&self) -> u8 {
        match self {
            ConfidenceTier::Exact => 3,
            ConfidenceTier::High => 2,
            ConfidenceTier::Medium => 1,
            ConfidenceTier::Synthetic => 0,
        }
    }
}

/// The recovered mapping for one anchor chunk.
///
/// Offsets are byte offsets into `TransformedDocument.text` and always lie on
/// `char` boundaries, so `&text[start_offset..end_offset]` is valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub chunk_index: u32,
    pub start_offset: usize,
    pub end_offset: usize,
    pub confidence: ConfidenceTier,
    /// Strategy that produced the span, plus a similarity score where one
    /// applies (e.g. `"fuzzy(0.91)"`).
    pub method: String,
}

/// Per-layer attempt/resolution counts. `errors` counts absorbed layer-local
/// failures (network errors, timeouts, rejected candidates); they never abort
/// a session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LayerStats {
    pub layer: String,
    pub attempted: usize,
    pub resolved: usize,
    pub errors: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierHistogram {
    pub exact: usize,
    pub high: usize,
    pub medium: usize,
    pub synthetic: usize,
}

impl TierHistogram {
    pub fn record(&mut self, tier: ConfidenceTier) {
        match tier {
            ConfidenceTier::Exact => self.exact += 1,
            ConfidenceTier::High => self.high += 1,
            ConfidenceTier::Medium => self.medium += 1,
            ConfidenceTier::Synthetic => self.synthetic += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.exact + self.high + self.medium + self.synthetic
    }

    pub fn fraction(&self, tier: ConfidenceTier) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        let n = match tier {
            ConfidenceTier::Exact => self.exact,
            ConfidenceTier::High => self.high,
            ConfidenceTier::Medium => self.medium,
            ConfidenceTier::Synthetic => self.synthetic,
        };
        n as f64 / total as f64
    }
}

/// Aggregated session statistics. `layers` always holds one entry per cascade
/// layer in execution order, zeros included, so operators can tell "layer ran
/// and matched nothing" apart from "layer missing".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchStats {
    pub layers: Vec<LayerStats>,
    pub histogram: TierHistogram,
}

/// One complete run of the cascade for one document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchSession {
    /// Exactly one result per anchor, ordered by `chunk_index`.
    pub results: Vec<MatchResult>,
    pub stats: MatchStats,
    pub transformed_content_hash: String,
    /// True when the session short-circuited and reused a prior session's
    /// results because the content hash was unchanged.
    #[serde(default)]
    pub reused: bool,
    #[serde(default)]
    pub timings_ms: BTreeMap<String, u128>,
}

/// Discrete progress notification emitted after each layer completes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub layer: String,
    pub attempted: usize,
    pub resolved: usize,
    pub remaining: usize,
}

/// Tunable knobs for one match session.
///
/// The similarity thresholds are defaults inferred from observed rewriter
/// behavior, not constants of nature; callers should tune them against their
/// own corpus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchOptions {
    /// Minimum normalized similarity for the fuzzy layer.
    pub fuzzy_threshold: f64,
    /// Minimum cosine similarity for the semantic layer (coarser layer,
    /// lower bar).
    pub semantic_threshold: f64,
    /// Whether the assisted (external reasoning) layer may run at all.
    pub assist_enabled: bool,
    /// Hard per-session budget of chunks offered to the assisted layer.
    pub assist_max_chunks: usize,
    /// Maximum inputs per embedding request.
    pub embed_batch_size: usize,
    pub embed_timeout_ms: u64,
    pub assist_timeout_ms: u64,
    /// How far (bytes) a Synthetic span may overlap a resolved neighbor.
    /// Exact/High/Medium spans never overlap. The default covers the minimal
    /// one-char span interpolation emits into a zero-width gap.
    pub synthetic_overlap_tolerance: usize,
}

impl Default for MatchOptions {
    fn default() -> Self {
        Self {
            fuzzy_threshold: 0.85,
            semantic_threshold: 0.70,
            assist_enabled: false,
            assist_max_chunks: 8,
            embed_batch_size: 64,
            embed_timeout_ms: 20_000,
            assist_timeout_ms: 20_000,
            synthetic_overlap_tolerance: 4,
        }
    }
}

/// Cooperative cancellation flag for a running session.
///
/// Cloning shares the flag. Cancellation is checked between layers; in-flight
/// network calls are aborted best-effort only.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Batched embedding provider for the semantic layer.
#[async_trait::async_trait]
pub trait EmbeddingBackend: Send + Sync {
    fn name(&self) -> &'static str;
    /// Returns one vector per input, in input order.
    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// External reasoning provider for the assisted layer.
#[async_trait::async_trait]
pub trait ChatBackend: Send + Sync {
    fn name(&self) -> &'static str;
    async fn chat(&self, system: &str, user: &str, timeout_ms: u64) -> Result<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_ranks_degrade_monotonically() {
        assert!(ConfidenceTier::Exact.rank() > ConfidenceTier::High.rank());
        assert!(ConfidenceTier::High.rank() > ConfidenceTier::Medium.rank());
        assert!(ConfidenceTier::Medium.rank() > ConfidenceTier::Synthetic.rank());
    }

    #[test]
    fn tier_serializes_lowercase() {
        let s = serde_json::to_string(&ConfidenceTier::Synthetic).unwrap();
        assert_eq!(s, "\"synthetic\"");
        let t: ConfidenceTier = serde_json::from_str("\"exact\"").unwrap();
        assert_eq!(t, ConfidenceTier::Exact);
    }

    #[test]
    fn histogram_fractions_sum_to_one() {
        let mut h = TierHistogram::default();
        h.record(ConfidenceTier::Exact);
        h.record(ConfidenceTier::Exact);
        h.record(ConfidenceTier::High);
        h.record(ConfidenceTier::Synthetic);
        assert_eq!(h.total(), 4);
        let sum = h.fraction(ConfidenceTier::Exact)
            + h.fraction(ConfidenceTier::High)
            + h.fraction(ConfidenceTier::Medium)
            + h.fraction(ConfidenceTier::Synthetic);
        assert!((sum - 1.0).abs() < 1e-9);
    }

    #[test]
    fn anchor_chunk_tolerates_missing_metadata_in_json() {
        let v: AnchorChunk =
            serde_json::from_str(r#"{"index": 3, "content": "Hello"}"#).unwrap();
        assert_eq!(v.index, 3);
        assert_eq!(v.metadata, ChunkMetadata::default());
    }

    #[test]
    fn cancel_token_is_shared_across_clones() {
        let t = CancelToken::new();
        let t2 = t.clone();
        assert!(!t2.is_cancelled());
        t.cancel();
        assert!(t2.is_cancelled());
    }
}
