use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn sitepatch_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_sitepatch"))
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    // Site files
    let public = root.join("public");
    fs::create_dir_all(public.join("js")).unwrap();
    fs::write(
        public.join("index.html"),
        "<html><body>\n<header>Old header</header>\n<nav><a href=\"about.html\">About</a></nav>\n</body></html>\n",
    )
    .unwrap();
    fs::write(
        public.join("shop.html"),
        "<html><body>\n<header class=\"legacy\">Shop</header>\n</body></html>\n",
    )
    .unwrap();
    fs::write(public.join("js/app.js"), "console.log('debug');\nstart();\n").unwrap();

    // Golden fragments and an external patchset
    let patch_dir = root.join("config/patchsets");
    fs::create_dir_all(patch_dir.join("fragments")).unwrap();
    fs::write(
        patch_dir.join("fragments/header.html"),
        "<header id=\"site-header\">Standard</header>",
    )
    .unwrap();
    fs::write(
        patch_dir.join("header.yaml"),
        r#"description: Standard header on every page
patches:
  - name: standard-header
    operation: replace_with
    payload_file: fragments/header.html
    anchor: { kind: tag, tag: header }
    guard: { kind: id, id: site-header }
    files: ["**/*.html"]
"#,
    )
    .unwrap();

    let config_content = r#"[run]
extensions = [".html"]

[patchsets.cart]
description = "Global cart script"

[[patchsets.cart.patches]]
name = "cart-script"
operation = "append_to_parent"
payload = '<script src="js/cart.js"></script>'
anchor = { kind = "tag", tag = "body" }
guard = { kind = "attribute", tag = "script", name = "src", value = "js/cart.js" }

[[patchsets.cart.patches]]
name = "support-link"
operation = "insert_after"
payload = '<a href="contact.html">Support</a>'
anchor = { kind = "attribute", tag = "a", name = "href", value = "about.html" }
guard = { kind = "attribute", tag = "a", name = "href", value = "contact.html" }

[patchsets.header]
file = "patchsets/header.yaml"

[[patchsets.js.patches]]
name = "drop-debug-log"
operation = "remove"
anchor = { kind = "regex", pattern = "console\\.log\\('debug'\\);\\n" }
files = ["js/**"]
"#;

    let config_path = root.join("config/sitepatch.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_sitepatch(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = sitepatch_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path)
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run sitepatch binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

fn public(config_path: &Path) -> PathBuf {
    config_path.parent().unwrap().parent().unwrap().join("public")
}

#[test]
fn test_check_lists_patchsets() {
    let (_tmp, config_path) = setup_test_env();
    let (stdout, stderr, success) = run_sitepatch(&config_path, &["check"]);
    assert!(success, "check failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("cart-script"));
    assert!(stdout.contains("standard-header"));
    assert!(stdout.contains("drop-debug-log"));
    assert!(stdout.contains("Standard header on every page"));
}

#[test]
fn test_run_patchset_then_rerun_is_noop() {
    let (_tmp, config_path) = setup_test_env();
    let root = public(&config_path);
    let root_arg = root.to_str().unwrap();

    let (stdout, stderr, success) =
        run_sitepatch(&config_path, &["run", root_arg, "--patchset", "cart"]);
    assert!(success, "run failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("files written: 2"));
    assert!(stdout.contains("ok"));

    let index = fs::read_to_string(root.join("index.html")).unwrap();
    assert!(index.contains(
        "<a href=\"about.html\">About</a><a href=\"contact.html\">Support</a>"
    ));
    assert_eq!(index.matches("js/cart.js").count(), 1);

    let (stdout, _, success) =
        run_sitepatch(&config_path, &["run", root_arg, "--patchset", "cart"]);
    assert!(success);
    assert!(stdout.contains("files written: 0"));
    assert_eq!(fs::read_to_string(root.join("index.html")).unwrap(), index);
}

#[test]
fn test_dry_run_writes_nothing() {
    let (_tmp, config_path) = setup_test_env();
    let root = public(&config_path);
    let before = fs::read_to_string(root.join("index.html")).unwrap();

    let (stdout, stderr, success) =
        run_sitepatch(&config_path, &["run", root.to_str().unwrap(), "--dry-run"]);
    assert!(success, "dry run failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("(dry-run)"));
    assert!(stdout.contains("would apply:"));
    assert_eq!(fs::read_to_string(root.join("index.html")).unwrap(), before);
}

#[test]
fn test_ext_flag_and_json_report() {
    let (_tmp, config_path) = setup_test_env();
    let root = public(&config_path);

    let (stdout, stderr, success) = run_sitepatch(
        &config_path,
        &[
            "run",
            root.to_str().unwrap(),
            "--ext",
            ".html,.js",
            "--patchset",
            "js",
            "--patchset",
            "header",
            "--json",
        ],
    );
    assert!(success, "run failed: stdout={}, stderr={}", stdout, stderr);

    let report: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    let outcomes = report["outcomes"].as_array().unwrap();
    let js = outcomes
        .iter()
        .find(|o| o["patch"] == "drop-debug-log")
        .unwrap();
    assert_eq!(js["status"], "applied");
    assert_eq!(
        fs::read_to_string(root.join("js/app.js")).unwrap(),
        "start();\n"
    );

    // The header patch is restricted to markup files.
    assert!(outcomes
        .iter()
        .filter(|o| o["patch"] == "standard-header")
        .all(|o| o["path"] != "js/app.js"));
    assert!(fs::read_to_string(root.join("shop.html"))
        .unwrap()
        .contains("<header id=\"site-header\">Standard</header>"));
}

#[test]
fn test_backup_flag() {
    let (_tmp, config_path) = setup_test_env();
    let root = public(&config_path);
    let original = fs::read_to_string(root.join("shop.html")).unwrap();

    let (_, stderr, success) = run_sitepatch(
        &config_path,
        &["run", root.to_str().unwrap(), "--patchset", "header", "--backup"],
    );
    assert!(success, "run failed: {}", stderr);

    let backup = fs::read_dir(&root)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .find(|p| {
            let name = p.file_name().unwrap().to_string_lossy().to_string();
            name.starts_with("shop.html.") && name.ends_with(".backup")
        })
        .expect("backup file");
    assert_eq!(fs::read_to_string(backup).unwrap(), original);
}

#[test]
fn test_unknown_patchset_fails() {
    let (_tmp, config_path) = setup_test_env();
    let root = public(&config_path);
    let (_, stderr, success) = run_sitepatch(
        &config_path,
        &["run", root.to_str().unwrap(), "--patchset", "nope"],
    );
    assert!(!success);
    assert!(stderr.contains("Unknown patchset"));
}

#[test]
fn test_bad_root_fails() {
    let (tmp, config_path) = setup_test_env();
    let missing = tmp.path().join("does-not-exist");
    let (_, stderr, success) =
        run_sitepatch(&config_path, &["run", missing.to_str().unwrap()]);
    assert!(!success);
    assert!(stderr.contains("Root directory does not exist"));
}

#[test]
fn test_invalid_config_fails_before_touching_files() {
    let (_tmp, config_path) = setup_test_env();
    let root = public(&config_path);
    let before = fs::read_to_string(root.join("index.html")).unwrap();

    fs::write(
        &config_path,
        r#"[[patchsets.a.patches]]
name = "bad"
operation = "remove"
anchor = { kind = "regex", pattern = "(unclosed" }
"#,
    )
    .unwrap();
    let (_, stderr, success) = run_sitepatch(&config_path, &["run", root.to_str().unwrap()]);
    assert!(!success);
    assert!(stderr.contains("Invalid regex"));
    assert_eq!(fs::read_to_string(root.join("index.html")).unwrap(), before);
}

#[test]
fn test_completions() {
    let (_tmp, config_path) = setup_test_env();
    let (stdout, _, success) = run_sitepatch(&config_path, &["completions", "bash"]);
    assert!(success);
    assert!(stdout.contains("sitepatch"));
}
