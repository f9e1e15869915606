//! Assisted matching via an external reasoning service.
//!
//! Optional, budgeted last resort before interpolation: the model is shown
//! the chunk content, a bounded slice of the chunk's window, and the
//! already-resolved neighbor spans as disambiguation context, and must answer
//! with a verbatim snippet copied from the document. We never trust model
//! offsets; the snippet is located locally (exact, then normalized fuzzy) and
//! validated against the ordering invariants like any other candidate.

use crate::fuzzy::FuzzyLayer;
use crate::layer::{LayerCtx, LayerOutcome, MatchLayer};
use crate::normalize::NormText;
use respan_core::{ChatBackend, ConfidenceTier};
use std::sync::Arc;

/// Bounds on prompt material, chars. Keeps requests cheap and predictable
/// even for pathological windows.
const MAX_CHUNK_PROMPT_CHARS: usize = 2_000;
const MAX_WINDOW_PROMPT_CHARS: usize = 8_000;
const NEIGHBOR_CONTEXT_CHARS: usize = 200;

const SYSTEM_PROMPT: &str = "You locate a passage inside a rewritten document. \
Reply with exactly one JSON object: {\"snippet\": \"...\"} where snippet is a \
short run of text copied VERBATIM from the DOCUMENT WINDOW that corresponds to \
the PASSAGE. Copy characters exactly as they appear in the window. If no \
corresponding text exists, reply {\"snippet\": \"\"}.";

pub struct AssistLayer {
    backend: Arc<dyn ChatBackend>,
}

impl AssistLayer {
    pub fn new(backend: Arc<dyn ChatBackend>) -> Self {
        Self { backend }
    }
}

fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}

fn tail_chars(s: &str, max_chars: usize) -> &str {
    let n = s.chars().count();
    if n <= max_chars {
        return s;
    }
    let skip = n - max_chars;
    match s.char_indices().nth(skip) {
        Some((i, _)) => &s[i..],
        None => s,
    }
}

/// Pull the snippet out of a model reply, tolerating code fences and prose
/// around the JSON object.
fn parse_snippet(reply: &str) -> Option<String> {
    let start = reply.find('{')?;
    let end = reply.rfind('}')?;
    if end <= start {
        return None;
    }
    let v: serde_json::Value = serde_json::from_str(&reply[start..=end]).ok()?;
    let s = v.get("snippet")?.as_str()?.trim().to_string();
    (!s.is_empty()).then_some(s)
}

/// Locate `snippet` inside `hay` (a byte-window of the document starting at
/// `lo`): exact first, then normalized fuzzy at `threshold`.
fn locate_snippet(snippet: &str, hay: &str, lo: usize, threshold: f64) -> Option<(usize, usize)> {
    if let Some(i) = hay.find(snippet) {
        return Some((lo + i, lo + i + snippet.len()));
    }
    let trimmed = snippet.trim();
    if !trimmed.is_empty() && trimmed != snippet {
        if let Some(i) = hay.find(trimmed) {
            return Some((lo + i, lo + i + trimmed.len()));
        }
    }
    let needle = NormText::new(snippet);
    let hay_n = NormText::new(hay);
    let best = FuzzyLayer::best_alignment(&needle, &hay_n)?;
    if best.score < threshold {
        return None;
    }
    let span_len = needle.len().min(hay_n.len());
    let (s, e) = hay_n.src_span(best.start, best.start + span_len);
    Some((lo + s, lo + e))
}

#[async_trait::async_trait]
impl MatchLayer for AssistLayer {
    fn name(&self) -> &'static str {
        "assisted"
    }

    async fn resolve(&self, ctx: &mut LayerCtx<'_>) -> LayerOutcome {
        let mut out = LayerOutcome::default();
        let budget = ctx.opts.assist_max_chunks;
        for pos in ctx.pending() {
            if out.attempted >= budget {
                break;
            }
            out.attempted += 1;

            let (lo, hi) = ctx.window(pos);
            if lo >= hi {
                continue;
            }
            let window_text = truncate_chars(&ctx.doc.text[lo..hi], MAX_WINDOW_PROMPT_CHARS);
            let passage = truncate_chars(&ctx.anchors[pos].content, MAX_CHUNK_PROMPT_CHARS);

            let (prev, next) = ctx.neighbors(pos);
            let before = prev
                .map(|r| tail_chars(&ctx.doc.text[r.start_offset..r.end_offset], NEIGHBOR_CONTEXT_CHARS))
                .unwrap_or("(document start)");
            let after = next
                .map(|r| truncate_chars(&ctx.doc.text[r.start_offset..r.end_offset], NEIGHBOR_CONTEXT_CHARS))
                .unwrap_or("(document end)");

            let user = format!(
                "PASSAGE (from the original document):\n{passage}\n\n\
                 CONTEXT BEFORE (already located):\n{before}\n\n\
                 CONTEXT AFTER (already located):\n{after}\n\n\
                 DOCUMENT WINDOW (find the passage in here):\n{window_text}"
            );

            let reply = match self
                .backend
                .chat(SYSTEM_PROMPT, &user, ctx.opts.assist_timeout_ms)
                .await
            {
                Ok(r) => r,
                Err(_) => {
                    out.errors += 1;
                    continue;
                }
            };
            let Some(snippet) = parse_snippet(&reply) else {
                continue;
            };
            // Only search the part of the window the model actually saw.
            let Some((start, end)) =
                locate_snippet(&snippet, window_text, lo, ctx.opts.fuzzy_threshold)
            else {
                out.errors += 1;
                continue;
            };
            if ctx.accept(pos, start, end, ConfidenceTier::Medium, "assisted".to_string()) {
                out.resolved += 1;
            } else {
                out.errors += 1;
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use respan_core::{AnchorChunk, ChunkMetadata, MatchOptions, Result, TransformedDocument};

    /// Stub that always answers with a fixed snippet payload.
    struct FixedChat(String);

    #[async_trait::async_trait]
    impl ChatBackend for FixedChat {
        fn name(&self) -> &'static str {
            "fixed-chat-stub"
        }
        async fn chat(&self, _system: &str, _user: &str, _timeout_ms: u64) -> Result<String> {
            Ok(self.0.clone())
        }
    }

    struct DownChat;

    #[async_trait::async_trait]
    impl ChatBackend for DownChat {
        fn name(&self) -> &'static str {
            "down-chat-stub"
        }
        async fn chat(&self, _system: &str, _user: &str, _timeout_ms: u64) -> Result<String> {
            Err(respan_core::Error::Assist("service unavailable".into()))
        }
    }

    fn chunk(index: u32, content: &str) -> AnchorChunk {
        AnchorChunk {
            index,
            content: content.to_string(),
            metadata: ChunkMetadata::default(),
        }
    }

    fn doc(text: &str) -> TransformedDocument {
        TransformedDocument {
            text: text.to_string(),
            content_hash: "t".into(),
        }
    }

    #[test]
    fn parse_snippet_tolerates_fences_and_prose() {
        let r = "Sure! ```json\n{\"snippet\": \"the exact text\"}\n```";
        assert_eq!(parse_snippet(r).as_deref(), Some("the exact text"));
        assert_eq!(parse_snippet("{\"snippet\": \"\"}"), None);
        assert_eq!(parse_snippet("no json here"), None);
    }

    #[tokio::test]
    async fn valid_snippet_resolves_as_medium() {
        let d = doc("intro text. the passage we want, reworded. outro text.");
        let anchors = [chunk(0, "the passage we want originally")];
        let opts = MatchOptions {
            assist_enabled: true,
            ..Default::default()
        };
        let mut slots = vec![None];
        let layer = AssistLayer::new(Arc::new(FixedChat(
            "{\"snippet\": \"the passage we want, reworded.\"}".to_string(),
        )));
        let out = {
            let mut ctx = LayerCtx::new(&d, &anchors, &opts, &mut slots);
            layer.resolve(&mut ctx).await
        };
        assert_eq!(out.resolved, 1);
        let r = slots[0].as_ref().unwrap();
        assert_eq!(r.confidence, ConfidenceTier::Medium);
        assert_eq!(r.method, "assisted");
        assert_eq!(
            &d.text[r.start_offset..r.end_offset],
            "the passage we want, reworded."
        );
    }

    #[tokio::test]
    async fn unlocatable_snippet_is_rejected_as_error() {
        let d = doc("nothing matching lives in this window at all.");
        let anchors = [chunk(0, "some chunk")];
        let opts = MatchOptions::default();
        let mut slots = vec![None];
        let layer = AssistLayer::new(Arc::new(FixedChat(
            "{\"snippet\": \"text that appears nowhere in the document window\"}".to_string(),
        )));
        let out = {
            let mut ctx = LayerCtx::new(&d, &anchors, &opts, &mut slots);
            layer.resolve(&mut ctx).await
        };
        assert_eq!(out.resolved, 0);
        assert_eq!(out.errors, 1);
        assert!(slots[0].is_none());
    }

    #[tokio::test]
    async fn budget_caps_attempts() {
        let d = doc("a b c d e f g h i j k l m n o p");
        let anchors: Vec<AnchorChunk> =
            (0..5).map(|i| chunk(i, "unfindable content")).collect();
        let opts = MatchOptions {
            assist_max_chunks: 2,
            ..Default::default()
        };
        let mut slots = vec![None; 5];
        let layer = AssistLayer::new(Arc::new(DownChat));
        let out = {
            let mut ctx = LayerCtx::new(&d, &anchors, &opts, &mut slots);
            layer.resolve(&mut ctx).await
        };
        assert_eq!(out.attempted, 2);
        assert_eq!(out.errors, 2);
    }
}
