use std::process::Command;

fn respan_match(anchors_json: &str, text: &str) -> std::process::Output {
    let tmp = tempfile::tempdir().expect("tempdir");
    let anchors_p = tmp.path().join("anchors.json");
    let text_p = tmp.path().join("doc.txt");
    std::fs::write(&anchors_p, anchors_json).unwrap();
    std::fs::write(&text_p, text).unwrap();

    let bin = assert_cmd::cargo::cargo_bin!("respan");
    Command::new(bin)
        .args([
            "match",
            "--anchors",
            anchors_p.to_str().unwrap(),
            "--text",
            text_p.to_str().unwrap(),
            "--doc-id",
            "contract-doc",
        ])
        // Hermetic: no network backends.
        .env_remove("RESPAN_OPENAI_COMPAT_BASE_URL")
        .env_remove("RESPAN_OPENAI_COMPAT_EMBED_MODEL")
        .env_remove("RESPAN_OPENAI_COMPAT_CHAT_MODEL")
        .env_remove("RESPAN_OLLAMA_ENABLE")
        .output()
        .expect("run respan match")
}

const ANCHORS: &str = r#"[
  {"index": 0, "content": "First paragraph about parsing."},
  {"index": 1, "content": "Second paragraph, with  odd   spacing."},
  {"index": 2, "content": "Third paragraph the rewriter deleted."}
]"#;

const TEXT: &str = "First paragraph about parsing.\n\nSecond paragraph, with odd spacing.\n\nClosing remarks.";

#[test]
fn match_emits_one_result_per_anchor() {
    let out = respan_match(ANCHORS, TEXT);
    assert!(
        out.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&out.stderr)
    );
    let v: serde_json::Value =
        serde_json::from_slice(&out.stdout).expect("parse match json");

    assert_eq!(v["schema_version"].as_u64(), Some(1));
    assert_eq!(v["kind"].as_str(), Some("match"));
    assert_eq!(v["document_id"].as_str(), Some("contract-doc"));
    assert_eq!(v["content_hash"].as_str().map(str::len), Some(64));

    let results = v["session"]["results"].as_array().expect("results array");
    assert_eq!(results.len(), 3);
    for (i, r) in results.iter().enumerate() {
        assert_eq!(r["chunk_index"].as_u64(), Some(i as u64));
        let start = r["start_offset"].as_u64().unwrap();
        let end = r["end_offset"].as_u64().unwrap();
        assert!(start < end);
        assert!(end <= TEXT.len() as u64);
    }
    assert_eq!(results[0]["confidence"].as_str(), Some("exact"));
    assert_eq!(results[1]["confidence"].as_str(), Some("high"));
    assert_eq!(results[2]["confidence"].as_str(), Some("synthetic"));

    // Stats cover all five layers, zeros included.
    let layers = v["session"]["stats"]["layers"].as_array().unwrap();
    assert_eq!(layers.len(), 5);
}

#[test]
fn match_is_deterministic_without_assist() {
    let a = respan_match(ANCHORS, TEXT);
    let b = respan_match(ANCHORS, TEXT);
    assert!(a.status.success() && b.status.success());
    let va: serde_json::Value = serde_json::from_slice(&a.stdout).unwrap();
    let vb: serde_json::Value = serde_json::from_slice(&b.stdout).unwrap();
    assert_eq!(va["session"]["results"], vb["session"]["results"]);
    assert_eq!(va["session"]["stats"], vb["session"]["stats"]);
    assert_eq!(va["content_hash"], vb["content_hash"]);
}

#[test]
fn match_accepts_a_stored_anchor_record() {
    let record = serde_json::json!({
        "schema_version": 1,
        "document_id": "record-doc",
        "content_hash": "0000",
        "stored_at_epoch_s": 0,
        "chunks": [
            {"index": 0, "content": "First paragraph about parsing."}
        ]
    });
    let tmp = tempfile::tempdir().unwrap();
    let anchors_p = tmp.path().join("record.json");
    let text_p = tmp.path().join("doc.txt");
    std::fs::write(&anchors_p, serde_json::to_vec(&record).unwrap()).unwrap();
    std::fs::write(&text_p, TEXT).unwrap();

    let bin = assert_cmd::cargo::cargo_bin!("respan");
    let out = Command::new(bin)
        .args([
            "match",
            "--anchors",
            anchors_p.to_str().unwrap(),
            "--text",
            text_p.to_str().unwrap(),
        ])
        .env_remove("RESPAN_OPENAI_COMPAT_BASE_URL")
        .env_remove("RESPAN_OLLAMA_ENABLE")
        .output()
        .expect("run respan match");
    assert!(out.status.success());
    let v: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    // document_id falls back to the record's.
    assert_eq!(v["document_id"].as_str(), Some("record-doc"));
}

#[test]
fn invalid_input_exits_nonzero() {
    let out = respan_match("[]", TEXT);
    assert!(!out.status.success());
    let err = String::from_utf8_lossy(&out.stderr);
    assert!(err.contains("invalid input"), "stderr: {err}");
}
