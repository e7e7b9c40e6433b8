use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

use context_ingest::core::models::{record_id, SourceKind};

fn cingest_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("cingest");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let data_dir = root.join("data");
    fs::create_dir_all(&data_dir).unwrap();

    // Vault fixture: two notes, one linking to the other.
    let vault_dir = root.join("vault");
    fs::create_dir_all(&vault_dir).unwrap();
    fs::write(
        vault_dir.join("alpha.md"),
        "# Alpha\n\nSee also [[beta]] for the follow-up. #rust\n",
    )
    .unwrap();
    fs::write(
        vault_dir.join("beta.md"),
        "# Beta\n\nStandalone note about deployment. #ops\n",
    )
    .unwrap();

    // Media fixture: two byte-identical images under different names.
    let images_dir = root.join("images");
    fs::create_dir_all(&images_dir).unwrap();
    fs::write(images_dir.join("one.png"), b"fake png bytes 0001").unwrap();
    fs::write(images_dir.join("two.png"), b"fake png bytes 0001").unwrap();

    let config_content = format!(
        r#"[db]
path = "{}/data/cingest.sqlite"

[workspace]
dir = "{}/workspace"
"#,
        root.display(),
        root.display()
    );

    let config_path = config_dir.join("cingest.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_cingest(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = cingest_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run cingest binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

fn vault_locator(config_path: &Path, note: &str) -> String {
    let root = config_path.parent().unwrap().parent().unwrap();
    let canonical = fs::canonicalize(root.join("vault")).unwrap();
    canonical.join(note).to_string_lossy().to_string()
}

#[test]
fn test_init_creates_database() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_cingest(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_cingest(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_cingest(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_importers_lists_every_kind() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_cingest(&config_path, &["importers"]);
    assert!(success, "importers failed: stderr={}", stderr);
    for kind in ["repository", "web", "image", "video", "audio", "vault"] {
        assert!(stdout.contains(kind), "missing kind {} in:\n{}", kind, stdout);
    }
}

#[test]
fn test_vault_import_idempotent_and_versioned() {
    let (_tmp, config_path) = setup_test_env();
    run_cingest(&config_path, &["init"]);

    let root = config_path.parent().unwrap().parent().unwrap().to_path_buf();
    let vault = root.join("vault").to_string_lossy().to_string();

    let (stdout, stderr, success) = run_cingest(&config_path, &["import", "vault", &vault]);
    assert!(success, "import failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("2 created"), "unexpected output:\n{}", stdout);

    // Re-importing without changes writes nothing.
    let (stdout, _, success) = run_cingest(&config_path, &["import", "vault", &vault]);
    assert!(success);
    assert!(stdout.contains("0 created"), "unexpected output:\n{}", stdout);
    assert!(stdout.contains("2 unchanged"), "unexpected output:\n{}", stdout);

    // Editing one note bumps only that record's version.
    fs::write(
        root.join("vault/alpha.md"),
        "# Alpha\n\nRewritten body, still linking [[beta]]. #rust\n",
    )
    .unwrap();
    let (stdout, _, success) = run_cingest(&config_path, &["import", "vault", &vault]);
    assert!(success);
    assert!(stdout.contains("1 updated"), "unexpected output:\n{}", stdout);
    assert!(stdout.contains("1 unchanged"), "unexpected output:\n{}", stdout);
}

#[test]
fn test_vault_wikilinks_become_edges() {
    let (_tmp, config_path) = setup_test_env();
    run_cingest(&config_path, &["init"]);

    let root = config_path.parent().unwrap().parent().unwrap().to_path_buf();
    let vault = root.join("vault").to_string_lossy().to_string();
    let (_, _, success) = run_cingest(&config_path, &["import", "vault", &vault]);
    assert!(success);

    let alpha_id = record_id(SourceKind::Vault, &vault_locator(&config_path, "alpha.md"));
    let beta_locator = vault_locator(&config_path, "beta.md");

    let (stdout, stderr, success) = run_cingest(&config_path, &["related", &alpha_id]);
    assert!(success, "related failed: stderr={}", stderr);
    assert!(
        stdout.contains(&beta_locator),
        "beta not reachable from alpha:\n{}",
        stdout
    );
}

#[test]
fn test_identical_images_get_duplicate_edges() {
    let (_tmp, config_path) = setup_test_env();
    run_cingest(&config_path, &["init"]);

    let root = config_path.parent().unwrap().parent().unwrap().to_path_buf();
    let images = root.join("images").to_string_lossy().to_string();

    let (stdout, stderr, success) = run_cingest(&config_path, &["import", "image", &images]);
    assert!(success, "import failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("2 created"), "unexpected output:\n{}", stdout);
    // The second identical file is recorded as a duplicate of the first,
    // without merging the two records.
    assert!(stdout.contains("1 duplicates"), "unexpected output:\n{}", stdout);

    let (stdout, _, success) = run_cingest(&config_path, &["query", "--kind", "image", "--latest"]);
    assert!(success);
    assert!(stdout.contains("2 record(s)"), "unexpected output:\n{}", stdout);
}

#[test]
fn test_query_prefix_filter() {
    let (_tmp, config_path) = setup_test_env();
    run_cingest(&config_path, &["init"]);

    let root = config_path.parent().unwrap().parent().unwrap().to_path_buf();
    let vault = root.join("vault").to_string_lossy().to_string();
    run_cingest(&config_path, &["import", "vault", &vault]);

    let canonical = fs::canonicalize(root.join("vault")).unwrap();
    let prefix = canonical.join("alpha").to_string_lossy().to_string();
    let (stdout, _, success) =
        run_cingest(&config_path, &["query", "--prefix", &prefix, "--latest"]);
    assert!(success);
    assert!(stdout.contains("1 record(s)"), "unexpected output:\n{}", stdout);
    assert!(stdout.contains("alpha.md"));
}

#[test]
fn test_get_and_remove_record() {
    let (_tmp, config_path) = setup_test_env();
    run_cingest(&config_path, &["init"]);

    let root = config_path.parent().unwrap().parent().unwrap().to_path_buf();
    let vault = root.join("vault").to_string_lossy().to_string();
    run_cingest(&config_path, &["import", "vault", &vault]);

    let beta_id = record_id(SourceKind::Vault, &vault_locator(&config_path, "beta.md"));

    let (stdout, stderr, success) = run_cingest(&config_path, &["get", &beta_id]);
    assert!(success, "get failed: stderr={}", stderr);
    assert!(stdout.contains("beta.md"));
    assert!(stdout.contains("\"version\": 1"));

    let (stdout, _, success) = run_cingest(&config_path, &["remove", &beta_id]);
    assert!(success);
    assert!(stdout.contains("removed 1 version(s)"));

    let (_, _, success) = run_cingest(&config_path, &["get", &beta_id]);
    assert!(!success, "get after remove should fail");
}

#[test]
fn test_missing_vault_fails_job() {
    let (_tmp, config_path) = setup_test_env();
    run_cingest(&config_path, &["init"]);

    let (_, stderr, success) = run_cingest(&config_path, &["import", "vault", "/no/such/vault"]);
    assert!(!success, "import of a missing vault should fail");
    assert!(
        stderr.contains("source unavailable"),
        "unexpected stderr:\n{}",
        stderr
    );
}

#[test]
fn test_unknown_option_rejected() {
    let (_tmp, config_path) = setup_test_env();
    run_cingest(&config_path, &["init"]);

    let root = config_path.parent().unwrap().parent().unwrap().to_path_buf();
    let vault = root.join("vault").to_string_lossy().to_string();

    let (_, stderr, success) = run_cingest(
        &config_path,
        &["import", "vault", &vault, "--option", "bogus=1"],
    );
    assert!(!success, "unknown option should fail the job");
    assert!(
        stderr.contains("invalid options"),
        "unexpected stderr:\n{}",
        stderr
    );
}
