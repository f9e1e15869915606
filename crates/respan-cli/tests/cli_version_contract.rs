#[test]
fn respan_version_contract() {
    let bin = assert_cmd::cargo::cargo_bin!("respan");
    let out = std::process::Command::new(bin)
        .args(["version"])
        .output()
        .expect("run respan version");

    assert!(out.status.success(), "respan version failed");
    let s = String::from_utf8_lossy(&out.stdout);
    let v: serde_json::Value = serde_json::from_str(&s).expect("parse version json");

    assert_eq!(v["schema_version"].as_u64(), Some(2));
    assert_eq!(v["name"].as_str(), Some("respan"));
    assert!(!v["version"].as_str().unwrap_or("").is_empty());
}
