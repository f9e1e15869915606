//! Literal substring matching, the fast path of the cascade.

use crate::layer::{LayerCtx, LayerOutcome, MatchLayer};
use respan_core::ConfidenceTier;

/// Forward-only literal search. Tries the raw chunk content first, then a
/// leading/trailing-whitespace-trimmed variant; never rewrites the interior.
/// The first occurrence inside the chunk's window wins.
#[derive(Debug, Default)]
pub struct ExactLayer;

#[async_trait::async_trait]
impl MatchLayer for ExactLayer {
    fn name(&self) -> &'static str {
        "exact"
    }

    async fn resolve(&self, ctx: &mut LayerCtx<'_>) -> LayerOutcome {
        let mut out = LayerOutcome::default();
        for pos in ctx.pending() {
            out.attempted += 1;
            let content = ctx.anchors[pos].content.clone();
            let (lo, hi) = ctx.window(pos);
            let hay = &ctx.doc.text[lo..hi];

            let hit = if content.is_empty() {
                None
            } else {
                hay.find(&content)
                    .map(|i| (lo + i, lo + i + content.len(), "exact"))
                    .or_else(|| {
                        let trimmed = content.trim();
                        if trimmed.is_empty() || trimmed == content {
                            return None;
                        }
                        hay.find(trimmed)
                            .map(|i| (lo + i, lo + i + trimmed.len(), "exact_trimmed"))
                    })
            };

            if let Some((start, end, method)) = hit {
                if ctx.accept(pos, start, end, ConfidenceTier::Exact, method.to_string()) {
                    out.resolved += 1;
                } else {
                    out.errors += 1;
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use respan_core::{AnchorChunk, ChunkMetadata, MatchOptions, TransformedDocument};

    fn run(anchors: &[AnchorChunk], text: &str) -> (Vec<Option<respan_core::MatchResult>>, LayerOutcome) {
        let doc = TransformedDocument {
            text: text.to_string(),
            content_hash: "t".into(),
        };
        let opts = MatchOptions::default();
        let mut slots = vec![None; anchors.len()];
        let outcome = {
            let mut ctx = LayerCtx::new(&doc, anchors, &opts, &mut slots);
            futures_util::future::FutureExt::now_or_never(ExactLayer.resolve(&mut ctx)).unwrap()
        };
        (slots, outcome)
    }

    fn chunk(index: u32, content: &str) -> AnchorChunk {
        AnchorChunk {
            index,
            content: content.to_string(),
            metadata: ChunkMetadata::default(),
        }
    }

    #[test]
    fn single_chunk_matches_at_origin() {
        let (slots, outcome) = run(&[chunk(0, "Hello world")], "Hello world");
        let r = slots[0].as_ref().unwrap();
        assert_eq!((r.start_offset, r.end_offset), (0, 11));
        assert_eq!(r.confidence, ConfidenceTier::Exact);
        assert_eq!(r.method, "exact");
        assert_eq!(outcome.resolved, 1);
    }

    #[test]
    fn duplicate_content_resolves_forward_only() {
        // Both chunks say "ab"; the second must take the second occurrence.
        let (slots, _) = run(&[chunk(0, "ab"), chunk(1, "ab")], "ab..ab");
        let r0 = slots[0].as_ref().unwrap();
        let r1 = slots[1].as_ref().unwrap();
        assert_eq!((r0.start_offset, r0.end_offset), (0, 2));
        assert_eq!((r1.start_offset, r1.end_offset), (4, 6));
    }

    #[test]
    fn trimmed_variant_matches_when_raw_misses() {
        let (slots, _) = run(&[chunk(0, "  Hello world\n")], "xx Hello world yy");
        let r = slots[0].as_ref().unwrap();
        assert_eq!(&"xx Hello world yy"[r.start_offset..r.end_offset], "Hello world");
        assert_eq!(r.method, "exact_trimmed");
    }

    #[test]
    fn absent_content_stays_unresolved() {
        let (slots, outcome) = run(&[chunk(0, "missing entirely")], "Hello world");
        assert!(slots[0].is_none());
        assert_eq!(outcome.attempted, 1);
        assert_eq!(outcome.resolved, 0);
    }
}
