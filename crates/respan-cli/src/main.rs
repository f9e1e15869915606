use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use respan_core::{AnchorChunk, MatchOptions, TransformedDocument};
use respan_local::{backends_from_env, content_hash_of, AnchorRecord, Pipeline};

#[derive(Parser, Debug)]
#[command(name = "respan")]
#[command(about = "Recover chunk positions inside rewritten document text", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Match anchor chunks against a transformed document (json on stdout).
    Match(MatchCmd),
    /// Diagnose configuration (json; booleans only, no secrets).
    Doctor(DoctorCmd),
    /// Print version info.
    Version(VersionCmd),
}

#[derive(clap::Args, Debug)]
struct MatchCmd {
    /// Anchors file: either a bare AnchorChunk array or a stored anchor record.
    #[arg(long)]
    anchors: std::path::PathBuf,
    /// Transformed document text (UTF-8).
    #[arg(long)]
    text: std::path::PathBuf,
    /// Document identity for the output envelope. Defaults to the record's
    /// document_id, else the anchors file stem.
    #[arg(long)]
    doc_id: Option<String>,
    /// Minimum similarity for a fuzzy match.
    #[arg(long)]
    fuzzy_threshold: Option<f64>,
    /// Minimum cosine similarity for a semantic match.
    #[arg(long)]
    semantic_threshold: Option<f64>,
    /// Enable the assisted layer (needs a configured chat backend).
    #[arg(long, default_value_t = false)]
    assist: bool,
    /// Output JSON path (default: stdout).
    #[arg(long)]
    out: Option<std::path::PathBuf>,
    /// Print one progress line per layer to stderr.
    #[arg(long, default_value_t = false)]
    progress: bool,
}

#[derive(clap::Args, Debug)]
struct DoctorCmd {}

#[derive(clap::Args, Debug)]
struct VersionCmd {}

/// Accepts both anchor file shapes without making callers declare which one
/// they have.
#[derive(serde::Deserialize)]
#[serde(untagged)]
enum AnchorsFile {
    Record(AnchorRecord),
    Bare(Vec<AnchorChunk>),
}

fn has_env(k: &str) -> bool {
    std::env::var(k).ok().is_some_and(|v| !v.trim().is_empty())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Match(args) => {
            let t0 = std::time::Instant::now();

            let anchors_raw = std::fs::read_to_string(&args.anchors)
                .with_context(|| format!("read anchors file {}", args.anchors.display()))?;
            let parsed: AnchorsFile =
                serde_json::from_str(&anchors_raw).context("parse anchors file")?;
            let (anchors, record_doc_id) = match parsed {
                AnchorsFile::Record(r) => (r.chunks, Some(r.document_id)),
                AnchorsFile::Bare(chunks) => (chunks, None),
            };
            let document_id = args
                .doc_id
                .or(record_doc_id)
                .or_else(|| {
                    args.anchors
                        .file_stem()
                        .map(|s| s.to_string_lossy().into_owned())
                })
                .unwrap_or_else(|| "unknown".to_string());

            let text = std::fs::read_to_string(&args.text)
                .with_context(|| format!("read text file {}", args.text.display()))?;
            let doc = TransformedDocument {
                content_hash: content_hash_of(&text),
                text,
            };

            let mut opts = MatchOptions::default();
            if let Some(t) = args.fuzzy_threshold {
                opts.fuzzy_threshold = t;
            }
            if let Some(t) = args.semantic_threshold {
                opts.semantic_threshold = t;
            }
            opts.assist_enabled = args.assist;

            let backends = backends_from_env(reqwest::Client::new());
            let mut pipeline = Pipeline::new();
            if let Some(e) = backends.embedder {
                pipeline = pipeline.with_embedder(e);
            }
            if let Some(a) = backends.assistant {
                pipeline = pipeline.with_assistant(a);
            }

            let progress_tx = if args.progress {
                let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<respan_core::ProgressEvent>();
                tokio::spawn(async move {
                    while let Some(ev) = rx.recv().await {
                        eprintln!(
                            "layer={} attempted={} resolved={} remaining={}",
                            ev.layer, ev.attempted, ev.resolved, ev.remaining
                        );
                    }
                });
                Some(tx)
            } else {
                None
            };

            let session = pipeline
                .run_with(&anchors, &doc, &opts, None, None, progress_tx)
                .await?;

            let v = serde_json::json!({
                "schema_version": 1,
                "kind": "match",
                "ok": true,
                "document_id": document_id,
                "content_hash": doc.content_hash,
                "elapsed_ms": t0.elapsed().as_millis() as u64,
                "session": session,
            });
            let rendered = serde_json::to_string_pretty(&v)?;
            match &args.out {
                Some(p) => {
                    if let Some(parent) = p.parent() {
                        std::fs::create_dir_all(parent).ok();
                    }
                    std::fs::write(p, rendered.as_bytes())
                        .with_context(|| format!("write {}", p.display()))?;
                }
                None => println!("{rendered}"),
            }
        }
        Commands::Doctor(_args) => {
            let cache_dir = std::env::var("RESPAN_CACHE_DIR")
                .ok()
                .filter(|s| !s.trim().is_empty());
            let v = serde_json::json!({
                "schema_version": 1,
                "kind": "doctor",
                "ok": true,
                "name": "respan",
                "version": env!("CARGO_PKG_VERSION"),
                // Env presence only; never print values.
                "configured": {
                    "openai_compat": has_env("RESPAN_OPENAI_COMPAT_BASE_URL")
                        && has_env("RESPAN_OPENAI_COMPAT_EMBED_MODEL"),
                    "openai_compat_chat": has_env("RESPAN_OPENAI_COMPAT_CHAT_MODEL"),
                    "ollama": has_env("RESPAN_OLLAMA_ENABLE"),
                },
                "cache_dir": cache_dir,
            });
            println!("{v}");
        }
        Commands::Version(_args) => {
            let v = serde_json::json!({
                "schema_version": 2,
                "name": "respan",
                "version": env!("CARGO_PKG_VERSION"),
            });
            println!("{v}");
        }
    }
    Ok(())
}
