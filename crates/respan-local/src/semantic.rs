//! Embedding-similarity matching over coarse segment windows.
//!
//! For chunks whose wording diverged past what edit distance can absorb, we
//! compare embeddings of the chunk content against paragraph-grouped segments
//! of the chunk's window and take the nearest neighbor by cosine similarity.
//! Spans are segment boundaries, so this layer is inherently coarser than the
//! textual ones; it reports `Medium` confidence and runs under a lower
//! threshold.
//!
//! All embedding traffic is batched: one request covers many inputs, bounded
//! by `embed_batch_size`, each wrapped in a hard timeout. Backend failures
//! are absorbed as "no match" for the affected chunks, never session errors.

use crate::layer::{LayerCtx, LayerOutcome, MatchLayer};
use crate::normalize::NormText;
use respan_core::{ConfidenceTier, EmbeddingBackend, Error};
use std::sync::Arc;
use std::time::Duration;

/// Segment grouping bounds, in bytes of document text. Paragraphs are grouped
/// toward the chunk's own length so segment spans stay comparable to the text
/// being located; multibyte-heavy text therefore gets fewer chars per segment,
/// which only shifts granularity, never offsets.
const SEGMENT_MIN_TARGET_BYTES: usize = 120;
const SEGMENT_MAX_BYTES: usize = 4_000;

pub struct SemanticLayer {
    backend: Arc<dyn EmbeddingBackend>,
}

impl SemanticLayer {
    pub fn new(backend: Arc<dyn EmbeddingBackend>) -> Self {
        Self { backend }
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na * nb)
    }
}

/// Paragraph-grouped segment spans (absolute byte offsets) for one window.
///
/// Splits on blank lines, greedily groups adjacent paragraphs toward
/// `target` bytes, and slices oversized groups at char boundaries so no
/// segment exceeds [`SEGMENT_MAX_BYTES`]. Whitespace-only output is dropped.
pub fn segment_window(text: &str, base: usize, target: usize) -> Vec<(usize, usize)> {
    let target = target.clamp(SEGMENT_MIN_TARGET_BYTES, SEGMENT_MAX_BYTES);

    // Paragraph ranges, split on blank lines.
    let mut paras: Vec<(usize, usize)> = Vec::new();
    let mut cursor = 0usize;
    let mut para_start: Option<usize> = None;
    for line in text.split_inclusive('\n') {
        let line_start = cursor;
        cursor += line.len();
        if line.trim().is_empty() {
            if let Some(s) = para_start.take() {
                paras.push((s, line_start));
            }
        } else if para_start.is_none() {
            para_start = Some(line_start);
        }
    }
    if let Some(s) = para_start {
        paras.push((s, text.len()));
    }

    // Greedy grouping toward the target size.
    let mut groups: Vec<(usize, usize)> = Vec::new();
    for &(s, e) in &paras {
        match groups.last_mut() {
            Some(last) if (last.1 - last.0) < target && (e - last.0) <= SEGMENT_MAX_BYTES => {
                last.1 = e;
            }
            _ => groups.push((s, e)),
        }
    }

    // Slice anything still oversized at char boundaries.
    let mut out: Vec<(usize, usize)> = Vec::new();
    for (s, e) in groups {
        let mut s = s;
        while e - s > SEGMENT_MAX_BYTES {
            let mut cut = s + SEGMENT_MAX_BYTES;
            while !text.is_char_boundary(cut) {
                cut -= 1;
            }
            out.push((s, cut));
            s = cut;
        }
        out.push((s, e));
    }

    // Trim whitespace edges and drop empty segments.
    out.into_iter()
        .filter_map(|(s, e)| {
            let seg = &text[s..e];
            let trimmed = seg.trim_end();
            let e2 = s + trimmed.len();
            let s2 = e2 - trimmed.trim_start().len();
            (s2 < e2).then_some((base + s2, base + e2))
        })
        .collect()
}

struct PendingChunk {
    pos: usize,
    /// Index of the chunk's vector in the embed input list.
    query: usize,
    /// (segment span, vector index) pairs.
    segments: Vec<((usize, usize), usize)>,
}

#[async_trait::async_trait]
impl MatchLayer for SemanticLayer {
    fn name(&self) -> &'static str {
        "semantic"
    }

    async fn resolve(&self, ctx: &mut LayerCtx<'_>) -> LayerOutcome {
        let mut out = LayerOutcome::default();
        let pending = ctx.pending();
        if pending.is_empty() {
            return out;
        }

        // Plan all embed inputs up front so one batched request can cover
        // many chunks. Windows are snapshotted here; acceptance below still
        // re-validates against neighbors, so a span accepted for an earlier
        // chunk can invalidate (not corrupt) a later candidate.
        let mut inputs: Vec<String> = Vec::new();
        let mut plan: Vec<PendingChunk> = Vec::new();
        for &pos in &pending {
            out.attempted += 1;
            let content = &ctx.anchors[pos].content;
            if content.trim().is_empty() {
                continue;
            }
            let (lo, hi) = ctx.window(pos);
            if lo >= hi {
                continue;
            }
            let target = NormText::new(content).len();
            let segs = segment_window(&ctx.doc.text[lo..hi], lo, target);
            if segs.is_empty() {
                continue;
            }
            let query = inputs.len();
            inputs.push(content.clone());
            let segments = segs
                .into_iter()
                .map(|(s, e)| {
                    let idx = inputs.len();
                    inputs.push(ctx.doc.text[s..e].to_string());
                    ((s, e), idx)
                })
                .collect();
            plan.push(PendingChunk {
                pos,
                query,
                segments,
            });
        }
        if plan.is_empty() {
            return out;
        }

        let vectors = match self.embed_batched(&inputs, ctx).await {
            Ok(v) => v,
            Err(_) => {
                // One absorbed failure per chunk that was waiting on vectors.
                out.errors += plan.len();
                return out;
            }
        };
        if vectors.len() != inputs.len() {
            out.errors += plan.len();
            return out;
        }

        // Apply in chunk_index order regardless of network completion order.
        for item in &plan {
            let query_vec = &vectors[item.query];
            let mut best: Option<((usize, usize), f32)> = None;
            for &((s, e), idx) in &item.segments {
                let score = cosine_similarity(query_vec, &vectors[idx]);
                if best.is_none_or(|(_, b)| score > b) {
                    best = Some(((s, e), score));
                }
            }
            let Some(((s, e), score)) = best else { continue };
            if f64::from(score) < ctx.opts.semantic_threshold {
                continue;
            }
            let method = format!("semantic({score:.2})");
            if ctx.accept(item.pos, s, e, ConfidenceTier::Medium, method) {
                out.resolved += 1;
            } else {
                out.errors += 1;
            }
        }
        out
    }
}

impl SemanticLayer {
    async fn embed_batched(
        &self,
        inputs: &[String],
        ctx: &LayerCtx<'_>,
    ) -> respan_core::Result<Vec<Vec<f32>>> {
        let batch_size = ctx.opts.embed_batch_size.max(1);
        let timeout = Duration::from_millis(ctx.opts.embed_timeout_ms.max(1));
        let mut vectors: Vec<Vec<f32>> = Vec::with_capacity(inputs.len());
        for batch in inputs.chunks(batch_size) {
            let got = tokio::time::timeout(timeout, self.backend.embed(batch))
                .await
                .map_err(|_| Error::Timeout(format!("embed batch of {}", batch.len())))??;
            if got.len() != batch.len() {
                return Err(Error::Embedding(format!(
                    "backend returned {} vectors for {} inputs",
                    got.len(),
                    batch.len()
                )));
            }
            vectors.extend(got);
        }
        Ok(vectors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use respan_core::{AnchorChunk, ChunkMetadata, MatchOptions, Result, TransformedDocument};

    /// Deterministic stub: inputs mentioning "alpha" embed to one axis,
    /// everything else to the other.
    struct KeywordBackend;

    #[async_trait::async_trait]
    impl EmbeddingBackend for KeywordBackend {
        fn name(&self) -> &'static str {
            "keyword-stub"
        }
        async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(inputs
                .iter()
                .map(|s| {
                    if s.to_lowercase().contains("alpha") {
                        vec![1.0, 0.1]
                    } else {
                        vec![0.1, 1.0]
                    }
                })
                .collect())
        }
    }

    struct DownBackend;

    #[async_trait::async_trait]
    impl EmbeddingBackend for DownBackend {
        fn name(&self) -> &'static str {
            "down-stub"
        }
        async fn embed(&self, _inputs: &[String]) -> Result<Vec<Vec<f32>>> {
            Err(Error::Embedding("service unavailable".into()))
        }
    }

    /// Stub that never answers within any reasonable deadline.
    struct SlowBackend;

    #[async_trait::async_trait]
    impl EmbeddingBackend for SlowBackend {
        fn name(&self) -> &'static str {
            "slow-stub"
        }
        async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
            tokio::time::sleep(std::time::Duration::from_secs(30)).await;
            Ok(inputs.iter().map(|_| vec![1.0, 0.0]).collect())
        }
    }

    fn chunk(index: u32, content: &str) -> AnchorChunk {
        AnchorChunk {
            index,
            content: content.to_string(),
            metadata: ChunkMetadata::default(),
        }
    }

    #[test]
    fn cosine_similarity_basics() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn segments_group_paragraphs_and_trim_whitespace() {
        let text = "para one line a\npara one line b\n\n\npara two\n\npara three\n";
        let segs = segment_window(text, 100, 10);
        assert!(!segs.is_empty());
        for &(s, e) in &segs {
            assert!(s < e);
            let seg = &text[s - 100..e - 100];
            assert_eq!(seg, seg.trim());
        }
        // Offsets are absolute (base applied).
        assert!(segs[0].0 >= 100);
    }

    #[test]
    fn oversized_paragraphs_are_sliced_at_char_boundaries() {
        // 5,000 two-byte chars: 10,000 bytes, so the byte cap must slice it.
        let big = "\u{00E9}".repeat(5_000);
        let segs = segment_window(&big, 0, 1_000);
        assert!(segs.len() >= 2);
        for &(s, e) in &segs {
            assert!(big.is_char_boundary(s) && big.is_char_boundary(e));
            assert!(e - s <= SEGMENT_MAX_BYTES);
        }
    }

    #[tokio::test]
    async fn nearest_segment_wins_and_span_is_segment_bounds() {
        let beta_para = "Completely different beta material here, padded out so the paragraph is long enough to stand alone as its own segment rather than being grouped with a neighbor.";
        let alpha_para = "A paragraph that clearly discusses alpha topics in depth, padded out so the paragraph is long enough to stand alone as its own segment rather than being grouped.";
        let text = format!("{beta_para}\n\n{alpha_para}\n\n{beta_para}");
        let text = text.as_str();
        let doc = TransformedDocument {
            text: text.to_string(),
            content_hash: "t".into(),
        };
        let anchors = [chunk(0, "the alpha topic, reworded beyond textual recovery")];
        let opts = MatchOptions::default();
        let mut slots = vec![None];
        let layer = SemanticLayer::new(Arc::new(KeywordBackend));
        let out = {
            let mut ctx = LayerCtx::new(&doc, &anchors, &opts, &mut slots);
            layer.resolve(&mut ctx).await
        };
        assert_eq!(out.resolved, 1);
        assert_eq!(out.errors, 0);
        let r = slots[0].as_ref().unwrap();
        assert_eq!(r.confidence, ConfidenceTier::Medium);
        assert!(r.method.starts_with("semantic("));
        assert!(text[r.start_offset..r.end_offset].contains("alpha"));
        assert!(!text[r.start_offset..r.end_offset].contains("beta"));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_backend_hits_the_batch_timeout_and_falls_through() {
        let doc = TransformedDocument {
            text: "one paragraph\n\nanother paragraph".to_string(),
            content_hash: "t".into(),
        };
        let anchors = [chunk(0, "anything at all")];
        let opts = MatchOptions {
            embed_timeout_ms: 50,
            ..Default::default()
        };
        let mut slots = vec![None];
        let layer = SemanticLayer::new(Arc::new(SlowBackend));
        let out = {
            let mut ctx = LayerCtx::new(&doc, &anchors, &opts, &mut slots);
            layer.resolve(&mut ctx).await
        };
        assert_eq!(out.resolved, 0);
        assert!(out.errors > 0);
        assert!(slots[0].is_none());
    }

    #[tokio::test]
    async fn backend_failure_is_absorbed_not_propagated() {
        let doc = TransformedDocument {
            text: "one paragraph\n\nanother paragraph".to_string(),
            content_hash: "t".into(),
        };
        let anchors = [chunk(0, "anything at all")];
        let opts = MatchOptions::default();
        let mut slots = vec![None];
        let layer = SemanticLayer::new(Arc::new(DownBackend));
        let out = {
            let mut ctx = LayerCtx::new(&doc, &anchors, &opts, &mut slots);
            layer.resolve(&mut ctx).await
        };
        assert_eq!(out.resolved, 0);
        assert!(out.errors > 0);
        assert!(slots[0].is_none());
    }
}
