//! The cascade orchestrator.
//!
//! Owns the slot table for one session, drives the layers in fixed order over
//! whatever is still unresolved, and aggregates per-layer statistics and
//! timings. Per-chunk and per-layer failures are absorbed by the layers
//! themselves; the only fatal error is invalid session input (plus
//! cooperative cancellation). On `Ok`, every anchor has exactly one result.

use crate::assist::AssistLayer;
use crate::exact::ExactLayer;
use crate::fuzzy::FuzzyLayer;
use crate::interpolate::InterpolationLayer;
use crate::layer::{LayerCtx, MatchLayer};
use crate::semantic::SemanticLayer;
use respan_core::{
    AnchorChunk, CancelToken, ChatBackend, EmbeddingBackend, Error, LayerStats, MatchOptions,
    MatchResult, MatchSession, MatchStats, ProgressEvent, Result, TierHistogram,
    TransformedDocument,
};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc::UnboundedSender;

/// Cascade layer names, in execution order. Stats and progress always cover
/// all of them, zeros included, so "layer ran and matched nothing" is
/// distinguishable from "layer missing".
const LAYER_ORDER: [&str; 5] = ["exact", "fuzzy", "semantic", "assisted", "interpolated"];

#[derive(Default)]
pub struct Pipeline {
    embedder: Option<Arc<dyn EmbeddingBackend>>,
    assistant: Option<Arc<dyn ChatBackend>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_embedder(mut self, backend: Arc<dyn EmbeddingBackend>) -> Self {
        self.embedder = Some(backend);
        self
    }

    pub fn with_assistant(mut self, backend: Arc<dyn ChatBackend>) -> Self {
        self.assistant = Some(backend);
        self
    }

    /// Run the full cascade with default session plumbing.
    pub async fn run(
        &self,
        anchors: &[AnchorChunk],
        doc: &TransformedDocument,
        opts: &MatchOptions,
    ) -> Result<MatchSession> {
        self.run_with(anchors, doc, opts, None, None, None).await
    }

    /// Run the full cascade.
    ///
    /// `prev` enables the content-hash short-circuit: if the transformed text
    /// is unchanged since the prior session, its results are reused verbatim.
    /// `cancel` is checked between layers. `progress` receives one event per
    /// layer (all five, including skipped ones); send failures are ignored.
    pub async fn run_with(
        &self,
        anchors: &[AnchorChunk],
        doc: &TransformedDocument,
        opts: &MatchOptions,
        prev: Option<&MatchSession>,
        cancel: Option<CancelToken>,
        progress: Option<UnboundedSender<ProgressEvent>>,
    ) -> Result<MatchSession> {
        validate_input(anchors, doc)?;
        let t_total = Instant::now();

        if let Some(prev) = prev {
            if prev.transformed_content_hash == doc.content_hash
                && prev.results.len() == anchors.len()
            {
                let mut session = prev.clone();
                session.reused = true;
                session.timings_ms = [("total".to_string(), t_total.elapsed().as_millis())]
                    .into_iter()
                    .collect();
                return Ok(session);
            }
        }

        let mut slots: Vec<Option<MatchResult>> = vec![None; anchors.len()];
        let mut stats = MatchStats::default();
        let mut timings_ms = std::collections::BTreeMap::new();

        let semantic = self.embedder.clone().map(SemanticLayer::new);
        let assisted = if opts.assist_enabled {
            self.assistant.clone().map(AssistLayer::new)
        } else {
            None
        };

        for name in LAYER_ORDER {
            if cancel.as_ref().is_some_and(|c| c.is_cancelled()) {
                return Err(Error::Cancelled);
            }
            let layer: Option<&dyn MatchLayer> = match name {
                "exact" => Some(&ExactLayer),
                "fuzzy" => Some(&FuzzyLayer),
                "semantic" => semantic.as_ref().map(|l| l as &dyn MatchLayer),
                "assisted" => assisted.as_ref().map(|l| l as &dyn MatchLayer),
                "interpolated" => Some(&InterpolationLayer),
                _ => unreachable!(),
            };

            let t_layer = Instant::now();
            let outcome = match layer {
                Some(layer) => {
                    let mut ctx = LayerCtx::new(doc, anchors, opts, &mut slots);
                    layer.resolve(&mut ctx).await
                }
                // Layer not configured/enabled: report zeros, never omit.
                None => Default::default(),
            };
            timings_ms.insert(format!("layer_{name}"), t_layer.elapsed().as_millis());

            stats.layers.push(LayerStats {
                layer: name.to_string(),
                attempted: outcome.attempted,
                resolved: outcome.resolved,
                errors: outcome.errors,
            });
            if let Some(tx) = &progress {
                let _ = tx.send(ProgressEvent {
                    layer: name.to_string(),
                    attempted: outcome.attempted,
                    resolved: outcome.resolved,
                    remaining: slots.iter().filter(|s| s.is_none()).count(),
                });
            }
        }

        // Interpolation is total; an empty slot past this point is a
        // programming defect, not an expected runtime state.
        let results: Vec<MatchResult> = slots
            .into_iter()
            .map(|s| s.expect("interpolation resolves every chunk"))
            .collect();

        let mut histogram = TierHistogram::default();
        for r in &results {
            histogram.record(r.confidence);
        }
        stats.histogram = histogram;
        timings_ms.insert("total".to_string(), t_total.elapsed().as_millis());

        Ok(MatchSession {
            results,
            stats,
            transformed_content_hash: doc.content_hash.clone(),
            reused: false,
            timings_ms,
        })
    }
}

fn validate_input(anchors: &[AnchorChunk], doc: &TransformedDocument) -> Result<()> {
    if anchors.is_empty() {
        return Err(Error::InvalidInput("empty anchor list".to_string()));
    }
    if doc.text.trim().is_empty() {
        return Err(Error::InvalidInput(
            "empty or whitespace-only transformed text".to_string(),
        ));
    }
    for pair in anchors.windows(2) {
        if pair[1].index <= pair[0].index {
            return Err(Error::InvalidInput(format!(
                "anchor indexes must be strictly increasing (saw {} then {})",
                pair[0].index, pair[1].index
            )));
        }
    }
    Ok(())
}
