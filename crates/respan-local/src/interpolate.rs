//! Deterministic interpolation, the terminal catch-all.
//!
//! Whatever survives every other layer gets a span here, so the session's
//! completeness guarantee never depends on the network. Each unresolved run
//! between two resolved neighbors is split proportionally by the chunks'
//! original content lengths; a chunk with no resolved predecessor anchors at
//! the document start, one with no successor at the document end. Spans are
//! Synthetic: positionally plausible, textually unverified.

use crate::layer::{LayerCtx, LayerOutcome, MatchLayer};
use respan_core::ConfidenceTier;

#[derive(Debug, Default)]
pub struct InterpolationLayer;

fn snap_floor(text: &str, mut i: usize) -> usize {
    i = i.min(text.len());
    while i > 0 && !text.is_char_boundary(i) {
        i -= 1;
    }
    i
}

fn one_char_span_at(text: &str, at: usize) -> (usize, usize) {
    // Smallest non-empty span touching `at`; falls back across the document
    // end. Callers guarantee the text is non-empty.
    if at < text.len() {
        let start = snap_floor(text, at);
        let ch_len = text[start..].chars().next().map_or(1, char::len_utf8);
        (start, start + ch_len)
    } else {
        let end = text.len();
        let start = text
            .char_indices()
            .next_back()
            .map_or(0, |(i, _)| i);
        (start, end)
    }
}

#[async_trait::async_trait]
impl MatchLayer for InterpolationLayer {
    fn name(&self) -> &'static str {
        "interpolated"
    }

    async fn resolve(&self, ctx: &mut LayerCtx<'_>) -> LayerOutcome {
        let mut out = LayerOutcome::default();
        let text_len = ctx.doc.text.len();

        // Group pending chunks into runs of consecutive positions; every run
        // shares one gap between the same resolved neighbors.
        let mut runs: Vec<(usize, usize)> = Vec::new();
        for pos in ctx.pending() {
            match runs.last_mut() {
                Some((_, last)) if *last + 1 == pos => *last = pos,
                _ => runs.push((pos, pos)),
            }
        }

        for (first, last) in runs {
            let (lo, _) = ctx.window(first);
            let (_, hi) = ctx.window(last);
            let hi = hi.max(lo).min(text_len);

            let weights: Vec<usize> = (first..=last)
                .map(|p| ctx.anchors[p].content.chars().count().max(1))
                .collect();
            let total: usize = weights.iter().sum();

            let mut cum = 0usize;
            let mut prev_bound = lo;
            for (k, pos) in (first..=last).enumerate() {
                out.attempted += 1;
                cum += weights[k];
                let raw = lo as f64 + (hi - lo) as f64 * cum as f64 / total as f64;
                let bound = snap_floor(&ctx.doc.text, (raw.round() as usize).clamp(lo, hi));

                let (start, end) = if bound > prev_bound {
                    (prev_bound, bound)
                } else {
                    // Zero-width slot (empty gap or rounding collision):
                    // emit the minimal span; only Synthetic results may
                    // overlap a neighbor, within the configured tolerance.
                    one_char_span_at(&ctx.doc.text, prev_bound)
                };
                if ctx.accept(
                    pos,
                    start,
                    end,
                    ConfidenceTier::Synthetic,
                    "interpolated".to_string(),
                ) {
                    out.resolved += 1;
                } else {
                    out.errors += 1;
                }
                prev_bound = bound.max(prev_bound);
            }
        }
        out
    }
}
