//! The uniform strategy contract the cascade is built from.
//!
//! Layers are plain objects behind one trait, run in a fixed order by the
//! orchestrator; each sees only the chunks every earlier layer failed on.
//! `LayerCtx` owns the slot table (one optional result per anchor) and is the
//! only way a layer can hand back a span, so the ordering discipline lives in
//! exactly one place.

use respan_core::{AnchorChunk, ConfidenceTier, MatchOptions, MatchResult, TransformedDocument};

/// Counts a layer reports back to the orchestrator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LayerOutcome {
    pub attempted: usize,
    pub resolved: usize,
    /// Absorbed layer-local failures: backend errors, timeouts, and candidate
    /// spans rejected for crossing a neighbor.
    pub errors: usize,
}

/// Shared per-session state offered to each layer.
///
/// The forward-only cursor of the first pass generalizes here to per-chunk
/// windows: an unresolved chunk may only match between the end of its nearest
/// resolved predecessor and the start of its nearest resolved successor.
/// Because slots update in place, matches made earlier in the same pass
/// tighten the windows of later chunks automatically.
pub struct LayerCtx<'a> {
    pub doc: &'a TransformedDocument,
    pub anchors: &'a [AnchorChunk],
    pub opts: &'a MatchOptions,
    slots: &'a mut [Option<MatchResult>],
}

impl<'a> LayerCtx<'a> {
    pub fn new(
        doc: &'a TransformedDocument,
        anchors: &'a [AnchorChunk],
        opts: &'a MatchOptions,
        slots: &'a mut [Option<MatchResult>],
    ) -> Self {
        debug_assert_eq!(anchors.len(), slots.len());
        Self {
            doc,
            anchors,
            opts,
            slots,
        }
    }

    /// Positions (into `anchors`) still unresolved, in index order.
    pub fn pending(&self) -> Vec<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.is_none().then_some(i))
            .collect()
    }

    pub fn remaining(&self) -> usize {
        self.slots.iter().filter(|s| s.is_none()).count()
    }

    pub fn resolved_at(&self, pos: usize) -> Option<&MatchResult> {
        self.slots.get(pos).and_then(|s| s.as_ref())
    }

    /// Byte window `[lo, hi)` of `doc.text` the chunk at `pos` may match in.
    pub fn window(&self, pos: usize) -> (usize, usize) {
        let lo = self.slots[..pos]
            .iter()
            .rev()
            .find_map(|s| s.as_ref().map(|r| r.end_offset))
            .unwrap_or(0);
        let hi = self.slots[pos + 1..]
            .iter()
            .find_map(|s| s.as_ref().map(|r| r.start_offset))
            .unwrap_or(self.doc.text.len());
        (lo, hi.max(lo))
    }

    /// Nearest resolved neighbors of `pos`, for disambiguation context.
    pub fn neighbors(&self, pos: usize) -> (Option<&MatchResult>, Option<&MatchResult>) {
        let prev = self.slots[..pos].iter().rev().find_map(|s| s.as_ref());
        let next = self.slots[pos + 1..].iter().find_map(|s| s.as_ref());
        (prev, next)
    }

    /// Try to accept a candidate span for the chunk at `pos`.
    ///
    /// Enforces the session invariants at the single choke point: non-empty
    /// span, in bounds, on `char` boundaries, and not crossing a resolved
    /// neighbor (Synthetic spans may overlap by at most the configured
    /// tolerance). Returns false when the candidate is rejected; the chunk
    /// then stays unresolved for the next layer.
    pub fn accept(
        &mut self,
        pos: usize,
        start: usize,
        end: usize,
        confidence: ConfidenceTier,
        method: String,
    ) -> bool {
        if self.slots[pos].is_some() {
            return false;
        }
        let text = &self.doc.text;
        if start >= end || end > text.len() {
            return false;
        }
        if !text.is_char_boundary(start) || !text.is_char_boundary(end) {
            return false;
        }
        let (lo, hi) = self.window(pos);
        let tol = if confidence == ConfidenceTier::Synthetic {
            self.opts.synthetic_overlap_tolerance
        } else {
            0
        };
        if start + tol < lo || end > hi + tol {
            return false;
        }
        self.slots[pos] = Some(MatchResult {
            chunk_index: self.anchors[pos].index,
            start_offset: start,
            end_offset: end,
            confidence,
            method,
        });
        true
    }
}

/// One strategy in the cascade.
#[async_trait::async_trait]
pub trait MatchLayer: Send + Sync {
    fn name(&self) -> &'static str;
    /// Attempt every pending chunk; resolved chunks are recorded through the
    /// ctx. Must absorb its own failures (count them in `errors`), never
    /// propagate them.
    async fn resolve(&self, ctx: &mut LayerCtx<'_>) -> LayerOutcome;
}
