use std::fs;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn crag_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("crag");
    path
}

/// Keyword-presence vector: rust, python, infrastructure, bias.
fn stub_vector(text: &str) -> Vec<f32> {
    let t = text.to_lowercase();
    let has = |words: &[&str]| {
        if words.iter().any(|w| t.contains(w)) {
            1.0
        } else {
            0.0
        }
    };
    vec![
        has(&["rust", "cargo"]),
        has(&["python", "pytorch"]),
        has(&["kubernetes", "docker", "deployment"]),
        0.1,
    ]
}

fn read_request(stream: &mut TcpStream) -> Option<(String, String)> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        let n = stream.read(&mut chunk).ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        let text = String::from_utf8_lossy(&buf).to_string();
        if let Some(header_end) = text.find("\r\n\r\n") {
            let headers = &text[..header_end];
            let content_length = headers
                .lines()
                .find_map(|l| {
                    l.to_ascii_lowercase()
                        .strip_prefix("content-length:")
                        .map(|v| v.trim().parse::<usize>().unwrap_or(0))
                })
                .unwrap_or(0);
            if buf.len() >= header_end + 4 + content_length {
                let path = headers
                    .split_whitespace()
                    .nth(1)
                    .unwrap_or("/")
                    .to_string();
                let body =
                    String::from_utf8_lossy(&buf[header_end + 4..header_end + 4 + content_length])
                        .to_string();
                return Some((path, body));
            }
        }
    }
}

/// Minimal Ollama-compatible backend on a background thread. Serves
/// `/api/embed` with [`stub_vector`] and `/api/chat` with a fixed rerank
/// score or a fixed answer.
fn spawn_stub_backend() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    std::thread::spawn(move || {
        for stream in listener.incoming() {
            let mut stream = match stream {
                Ok(s) => s,
                Err(_) => continue,
            };
            let (path, body) = match read_request(&mut stream) {
                Some(r) => r,
                None => continue,
            };
            let request: serde_json::Value =
                serde_json::from_str(&body).unwrap_or(serde_json::Value::Null);

            let response = if path.ends_with("/api/embed") {
                let inputs: Vec<String> = request["input"]
                    .as_array()
                    .map(|a| {
                        a.iter()
                            .map(|v| v.as_str().unwrap_or_default().to_string())
                            .collect()
                    })
                    .unwrap_or_default();
                let vectors: Vec<Vec<f32>> = inputs.iter().map(|t| stub_vector(t)).collect();
                serde_json::json!({ "embeddings": vectors })
            } else if path.ends_with("/api/chat") {
                let user = request["messages"][1]["content"].as_str().unwrap_or("");
                let content = if user.contains("Relevance score") {
                    "0.8"
                } else {
                    "stub answer"
                };
                serde_json::json!({ "message": { "role": "assistant", "content": content } })
            } else {
                serde_json::json!({})
            };

            let body = response.to_string();
            let reply = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            let _ = stream.write_all(reply.as_bytes());
            let _ = stream.flush();
        }
    });
    format!("http://{}", addr)
}

fn write_test_files(root: &Path) -> PathBuf {
    let files_dir = root.join("files");
    fs::create_dir_all(&files_dir).unwrap();
    fs::write(
        files_dir.join("alpha.md"),
        "# Alpha Document\n\nThis is the alpha document about Rust programming.\n\nIt contains information about cargo and crates.",
    )
    .unwrap();
    fs::write(
        files_dir.join("beta.md"),
        "# Beta Document\n\nThis document discusses Python and machine learning.\n\nDeep learning frameworks like PyTorch are covered.",
    )
    .unwrap();
    fs::write(
        files_dir.join("gamma.txt"),
        "Gamma plain text file.\n\nContains notes about deployment and infrastructure.\n\nKubernetes and Docker are mentioned here.",
    )
    .unwrap();
    fs::write(files_dir.join("ignored.bin"), "not indexed").unwrap();
    files_dir
}

fn setup_test_env_with(backend: Option<&str>) -> (TempDir, PathBuf, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    let files_dir = write_test_files(&root);

    let mut config_content = format!(
        r#"[db]
path = "{}/data/crag.sqlite"

[chunking]
chunk_size = 200
overlap = 20

[logging]
level = "warn"
"#,
        root.display()
    );
    if let Some(url) = backend {
        config_content.push_str(&format!(
            r#"
[embedding]
provider = "ollama"
model = "stub-embed"
url = "{url}"
dims = 4
max_retries = 0

[llm]
provider = "ollama"
model = "stub-chat"
url = "{url}"
max_retries = 0
"#
        ));
    }

    let config_path = config_dir.join("crag.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path, files_dir)
}

fn setup_test_env() -> (TempDir, PathBuf, PathBuf) {
    setup_test_env_with(None)
}

fn run_crag(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = crag_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env("NO_PROXY", "127.0.0.1,localhost")
        .env_remove("RUST_LOG")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run crag binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path, _) = setup_test_env();

    let (stdout, stderr, success) = run_crag(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data").join("crag.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path, _) = setup_test_env();

    let (_, _, success1) = run_crag(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_crag(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_missing_config_fails() {
    let tmp = TempDir::new().unwrap();
    let (_, stderr, success) = run_crag(&tmp.path().join("nope.toml"), &["stats"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"));
}

#[test]
fn test_stats_on_empty_index() {
    let (_tmp, config_path, _) = setup_test_env();

    run_crag(&config_path, &["init"]);
    let (stdout, stderr, success) = run_crag(&config_path, &["stats"]);
    assert!(success, "stats failed: {}", stderr);
    assert!(stdout.contains("Documents:   0"));
    assert!(stdout.contains("Integrity:   ok"));
}

#[test]
fn test_index_errors_when_disabled() {
    let (_tmp, config_path, files_dir) = setup_test_env();

    let (_, stderr, success) =
        run_crag(&config_path, &["index", files_dir.to_str().unwrap()]);
    assert!(!success, "index should fail when provider disabled");
    assert!(
        stderr.contains("disabled"),
        "Should mention disabled, got: {}",
        stderr
    );
}

#[test]
fn test_search_empty_query() {
    let (_tmp, config_path, _) = setup_test_env();

    run_crag(&config_path, &["init"]);
    let (stdout, _, success) = run_crag(&config_path, &["search", ""]);
    assert!(success, "Empty query should not fail");
    assert!(stdout.contains("No results"));
}

#[test]
fn test_search_errors_when_disabled() {
    let (_tmp, config_path, _) = setup_test_env();

    let (_, stderr, success) = run_crag(&config_path, &["search", "test"]);
    assert!(!success, "search should fail when embeddings disabled");
    assert!(
        stderr.contains("embeddings"),
        "Should mention embeddings, got: {}",
        stderr
    );
}

#[test]
fn test_ask_rejects_out_of_range_threshold() {
    let (_tmp, config_path, _) = setup_test_env();

    for bad in ["1.5", "-0.1"] {
        let (_, stderr, success) =
            run_crag(&config_path, &["ask", "anything", "--threshold", bad]);
        assert!(!success, "threshold {} should be rejected", bad);
        assert!(
            stderr.contains("outside [0.0, 1.0]"),
            "Should report range error, got: {}",
            stderr
        );
    }
}

#[test]
fn test_ask_errors_when_llm_disabled() {
    let (_tmp, config_path, _) = setup_test_env();

    let (_, stderr, success) = run_crag(&config_path, &["ask", "anything", "--plain"]);
    assert!(!success);
    assert!(stderr.contains("LLM provider is disabled"), "got: {}", stderr);
}

#[test]
fn test_get_and_remove_missing_document() {
    let (_tmp, config_path, _) = setup_test_env();

    run_crag(&config_path, &["init"]);

    let (_, stderr, success) = run_crag(&config_path, &["get", "/no/such/file.md"]);
    assert!(!success, "get with missing path should fail");
    assert!(stderr.contains("not found"), "got: {}", stderr);

    let (_, stderr, success) = run_crag(&config_path, &["remove", "/no/such/file.md"]);
    assert!(!success, "remove with missing path should fail");
    assert!(stderr.contains("not found"), "got: {}", stderr);
}

#[test]
fn test_index_is_incremental() {
    let url = spawn_stub_backend();
    let (_tmp, config_path, files_dir) = setup_test_env_with(Some(&url));
    let dir = files_dir.to_str().unwrap();

    let (stdout, stderr, success) = run_crag(&config_path, &["index", dir]);
    assert!(success, "index failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("files found: 3"), "got: {}", stdout);
    assert!(stdout.contains("indexed: 3"));
    assert!(stdout.contains("ok"));

    let (stdout, _, _) = run_crag(&config_path, &["index", dir]);
    assert!(stdout.contains("indexed: 0"), "got: {}", stdout);
    assert!(stdout.contains("unchanged: 3"));

    std::thread::sleep(std::time::Duration::from_millis(20));
    fs::write(
        files_dir.join("alpha.md"),
        "# Alpha Document Updated\n\nStill about Rust.",
    )
    .unwrap();
    let (stdout, _, _) = run_crag(&config_path, &["index", dir]);
    assert!(stdout.contains("indexed: 1"), "got: {}", stdout);
    assert!(stdout.contains("unchanged: 2"));

    let (stdout, _, _) = run_crag(&config_path, &["index", dir, "--full"]);
    assert!(stdout.contains("indexed: 3"), "got: {}", stdout);

    fs::remove_file(files_dir.join("gamma.txt")).unwrap();
    let (stdout, _, _) = run_crag(&config_path, &["index", dir]);
    assert!(stdout.contains("removed: 1"), "got: {}", stdout);
}

#[test]
fn test_search_get_remove_stats_clear() {
    let url = spawn_stub_backend();
    let (_tmp, config_path, files_dir) = setup_test_env_with(Some(&url));
    run_crag(&config_path, &["index", files_dir.to_str().unwrap()]);

    let (stdout, stderr, success) =
        run_crag(&config_path, &["search", "rust and cargo", "--top-k", "2"]);
    assert!(success, "search failed: {}", stderr);
    let first = stdout.lines().next().unwrap_or_default();
    assert!(first.starts_with("1. "), "got: {}", stdout);
    assert!(first.contains("alpha.md"), "got: {}", stdout);
    assert!(!stdout.contains("3. "));

    let (stdout1, _, _) = run_crag(&config_path, &["search", "document"]);
    let (stdout2, _, _) = run_crag(&config_path, &["search", "document"]);
    assert_eq!(stdout1, stdout2, "Search results should be deterministic");

    let alpha = files_dir.join("alpha.md");
    let (stdout, _, success) = run_crag(&config_path, &["get", alpha.to_str().unwrap()]);
    assert!(success);
    assert!(stdout.contains("--- Document ---"));
    assert!(stdout.contains("alpha.md"));
    assert!(stdout.contains("[chunk 0]"));

    let (stdout, _, success) = run_crag(&config_path, &["stats"]);
    assert!(success);
    assert!(stdout.contains("Documents:   3"), "got: {}", stdout);
    assert!(stdout.contains("stub-embed (4 dims)"));
    assert!(stdout.contains("Integrity:   ok"));

    let (stdout, _, success) = run_crag(&config_path, &["remove", alpha.to_str().unwrap()]);
    assert!(success);
    assert!(stdout.contains("removed"));
    let (stdout, _, _) = run_crag(&config_path, &["stats"]);
    assert!(stdout.contains("Documents:   2"), "got: {}", stdout);

    let (stdout, _, success) = run_crag(&config_path, &["clear"]);
    assert!(success);
    assert!(stdout.contains("documents removed: 2"));
    let (stdout, _, _) = run_crag(&config_path, &["search", "rust"]);
    assert!(stdout.contains("No results"));
}

#[test]
fn test_ask_with_rerank_json() {
    let url = spawn_stub_backend();
    let (_tmp, config_path, files_dir) = setup_test_env_with(Some(&url));
    run_crag(&config_path, &["index", files_dir.to_str().unwrap()]);

    let (stdout, stderr, success) = run_crag(
        &config_path,
        &[
            "ask",
            "How do I use cargo with Rust?",
            "--rerank",
            "--top-k",
            "1",
            "--threshold",
            "0.5",
            "--json",
        ],
    );
    assert!(success, "ask failed: stdout={}, stderr={}", stdout, stderr);
    let json: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(json["answer"], "stub answer");
    assert_eq!(json["stats"]["rerank_enabled"], true);
    assert_eq!(json["stats"]["filter_enabled"], true);
    assert_eq!(json["stats"]["initial_count"], 2);
    assert_eq!(json["stats"]["final_count"], 1);
    assert_eq!(json["sources"].as_array().unwrap().len(), 1);
}

#[test]
fn test_ask_plain() {
    let url = spawn_stub_backend();
    let (_tmp, config_path, _) = setup_test_env_with(Some(&url));

    let (stdout, stderr, success) = run_crag(&config_path, &["ask", "hello", "--plain"]);
    assert!(success, "ask --plain failed: {}", stderr);
    assert_eq!(stdout.trim(), "stub answer");
}
