//! Approximate matching over normalized sliding windows.
//!
//! Catches the rewriter's cosmetic edits (whitespace, quotes, hyphenation,
//! light rewording) that break literal search. Candidate windows of the
//! chunk's normalized length slide over the chunk's window; a cheap token
//! prefilter gates the full edit-distance scoring.

use crate::layer::{LayerCtx, LayerOutcome, MatchLayer};
use crate::normalize::{levenshtein_similarity, shingle_jaccard, NormText};
use respan_core::ConfidenceTier;

/// Below this normalized length a chunk is "short" and must clear a stricter
/// similarity bar; short strings reach high ratios by accident too easily.
const SHORT_CHUNK_CHARS: usize = 50;
const SHORT_CHUNK_THRESHOLD: f64 = 0.90;

/// Token-set Jaccard below which a candidate window is not worth the full
/// edit-distance pass. Deliberately loose; it only exists to skip hopeless
/// windows.
const PREFILTER_MIN_JACCARD: f64 = 0.1;

#[derive(Debug, Default)]
pub struct FuzzyLayer;

pub(crate) struct Best {
    pub(crate) score: f64,
    pub(crate) start: usize,
}

impl FuzzyLayer {
    /// Best-scoring alignment of `needle` inside `hay`, by normalized char
    /// offset. Ties break toward the window start (the closest forward
    /// candidate), keeping the cascade deterministic and order-preserving.
    pub(crate) fn best_alignment(needle: &NormText, hay: &NormText) -> Option<Best> {
        let clen = needle.len();
        let wlen = hay.len();
        if clen == 0 || wlen == 0 {
            return None;
        }
        if wlen <= clen {
            let score = levenshtein_similarity(needle.chars(), hay.chars());
            return Some(Best { score, start: 0 });
        }

        let needle_s = needle.as_string();
        // Step rule from the upstream system: sample denser for short chunks,
        // coarser for long ones.
        let step = (clen / 20).clamp(5, 10);
        let last = wlen - clen;

        let mut best: Option<Best> = None;
        let mut consider = |i: usize| {
            let cand = hay.window(i, i + clen);
            let cand_s: String = cand.iter().collect();
            if shingle_jaccard(&needle_s, &cand_s, 1) < PREFILTER_MIN_JACCARD {
                return;
            }
            let score = levenshtein_similarity(needle.chars(), cand);
            if best.as_ref().is_none_or(|b| score > b.score) {
                best = Some(Best { score, start: i });
            }
        };
        let mut i = 0;
        while i < last {
            consider(i);
            i += step;
        }
        consider(last);
        best
    }
}

#[async_trait::async_trait]
impl MatchLayer for FuzzyLayer {
    fn name(&self) -> &'static str {
        "fuzzy"
    }

    async fn resolve(&self, ctx: &mut LayerCtx<'_>) -> LayerOutcome {
        let mut out = LayerOutcome::default();
        for pos in ctx.pending() {
            out.attempted += 1;
            let needle = NormText::new(&ctx.anchors[pos].content);
            if needle.is_empty() {
                continue;
            }
            let (lo, hi) = ctx.window(pos);
            let hay = NormText::new(&ctx.doc.text[lo..hi]);

            let mut threshold = ctx.opts.fuzzy_threshold;
            if needle.len() < SHORT_CHUNK_CHARS {
                threshold = threshold.max(SHORT_CHUNK_THRESHOLD);
            }

            let Some(best) = Self::best_alignment(&needle, &hay) else {
                continue;
            };
            if best.score < threshold {
                continue;
            }
            let span_len = needle.len().min(hay.len());
            let (s, e) = hay.src_span(best.start, best.start + span_len);
            let method = format!("fuzzy({:.2})", best.score);
            if ctx.accept(pos, lo + s, lo + e, ConfidenceTier::High, method) {
                out.resolved += 1;
            } else {
                out.errors += 1;
            }
        }
        out
    }
}
