use pulseboard_core::Database;
use serde_json::Value;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

struct CliTestEnv {
    _temp_dir: TempDir,
    home: PathBuf,
    xdg_data: PathBuf,
    xdg_config: PathBuf,
    xdg_state: PathBuf,
}

impl CliTestEnv {
    fn new() -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let base = temp_dir.path().to_path_buf();
        let home = base.join("home");
        let xdg_data = base.join("xdg-data");
        let xdg_config = base.join("xdg-config");
        let xdg_state = base.join("xdg-state");

        fs::create_dir_all(&home).expect("failed to create HOME");
        fs::create_dir_all(&xdg_data).expect("failed to create XDG_DATA_HOME");
        fs::create_dir_all(xdg_config.join("pulseboard"))
            .expect("failed to create XDG_CONFIG_HOME");
        fs::create_dir_all(&xdg_state).expect("failed to create XDG_STATE_HOME");

        fs::write(
            xdg_config.join("pulseboard/config.toml"),
            "[metrics]\nlifetime_start = \"2025-01-01\"\n",
        )
        .expect("failed to write config");

        Self {
            _temp_dir: temp_dir,
            home,
            xdg_data,
            xdg_config,
            xdg_state,
        }
    }

    fn db_path(&self) -> PathBuf {
        self.xdg_data.join("pulseboard/documents.db")
    }
}

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("../pulseboard-core/tests/fixtures")
        .join(name)
}

fn run_bin(env: &CliTestEnv, args: &[&str]) -> Output {
    let bin_path = PathBuf::from(assert_cmd::cargo::cargo_bin!("pulseboard"));

    Command::new(bin_path)
        .args(args)
        .env("HOME", &env.home)
        .env("XDG_DATA_HOME", &env.xdg_data)
        .env("XDG_CONFIG_HOME", &env.xdg_config)
        .env("XDG_STATE_HOME", &env.xdg_state)
        .output()
        .unwrap_or_else(|e| panic!("failed to execute pulseboard: {e}"))
}

fn assert_success(args: &[&str], output: &Output) {
    if output.status.success() {
        return;
    }

    let rendered_args = args
        .iter()
        .map(|arg| OsString::from(arg).to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(" ");
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    panic!(
        "pulseboard {rendered_args} failed\nstatus: {}\nstdout:\n{}\nstderr:\n{}",
        output.status, stdout, stderr
    );
}

fn import_fixtures(env: &CliTestEnv) {
    for collection in ["dau-by-country", "mau-by-country", "daily-new-users"] {
        let path = fixture(&format!("{collection}.jsonl"));
        let path = path.to_string_lossy().into_owned();
        let args = ["import", collection, path.as_str()];
        let output = run_bin(env, &args);
        assert_success(&args, &output);
        assert!(String::from_utf8_lossy(&output.stdout).contains("Imported"));
    }
}

fn run_json(env: &CliTestEnv, args: &[&str]) -> Value {
    let output = run_bin(env, args);
    assert_success(args, &output);
    serde_json::from_slice(&output.stdout).unwrap_or_else(|e| {
        panic!(
            "stdout is not JSON ({e}):\n{}",
            String::from_utf8_lossy(&output.stdout)
        )
    })
}

fn count(db_path: &Path, collection: &str) -> i64 {
    let db = Database::open(&db_path.to_path_buf()).expect("failed to open db");
    db.migrate().expect("failed to migrate db");
    db.count_documents(collection).expect("failed to count documents")
}

#[test]
fn import_populates_document_store() {
    let env = CliTestEnv::new();
    import_fixtures(&env);

    let db_path = env.db_path();
    assert!(
        db_path.exists(),
        "database file should exist at {}",
        db_path.display()
    );
    // Blank lines are skipped, malformed rows are stored as-is
    assert_eq!(count(&db_path, "dau-by-country"), 8);
    assert_eq!(count(&db_path, "mau-by-country"), 4);
    assert_eq!(count(&db_path, "daily-new-users"), 5);

    let listing = run_bin(&env, &["collections"]);
    assert_success(&["collections"], &listing);
    assert!(String::from_utf8_lossy(&listing.stdout).contains("mau-by-country"));
}

#[test]
fn summary_and_ratio_reports() {
    let env = CliTestEnv::new();
    import_fixtures(&env);

    let summary = run_json(&env, &["--today", "2025-02-28", "summary"]);
    assert_eq!(summary["metrics"]["average_dau"], 23);
    assert_eq!(summary["metrics"]["total_new_users"], 10);
    assert_eq!(summary["formatted"]["total_interactions"], "132");

    let ratio = run_json(
        &env,
        &[
            "--today",
            "2025-02-28",
            "ratio",
            "--start",
            "2025-01-01",
            "--end",
            "2025-01-31",
            "--country",
            "Argentina",
        ],
    );
    let rows = ratio.as_array().expect("ratio should be a list");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["country"], "Argentina");
    assert_eq!(rows[0]["dau_mau_ratio"], 0.5);
}

#[test]
fn reversed_range_is_rejected() {
    let env = CliTestEnv::new();
    import_fixtures(&env);

    let output = run_bin(
        &env,
        &[
            "--today",
            "2025-02-28",
            "general",
            "--start",
            "2025-02-01",
            "--end",
            "2025-01-01",
        ],
    );
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("invalid date range"),
        "expected range error, got:\n{stderr}"
    );
}
