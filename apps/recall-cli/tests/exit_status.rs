use std::fs;
use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

/// Port nothing listens on, so remote calls fail fast with a refused connection.
const CLOSED: &str = "http://127.0.0.1:9";

fn write_config(dir: &Path, chunk_index_dir: &Path, remotes: bool) -> std::path::PathBuf {
    let config = format!(
        r#"
[sources]
memory_file = "{root}/MEMORY.md"
memory_dir = "{root}/memory"

[storage]
state_file = "{root}/state/index_state.json"
chunk_index_dir = "{chunks}"

[search]
timeout_ms = 2000

[facts]
enabled = {remotes}
base_url = "{closed}"

[archive]
enabled = {remotes}
base_url = "{closed}"
"#,
        root = dir.display(),
        chunks = chunk_index_dir.display(),
        remotes = remotes,
        closed = CLOSED,
    );
    let path = dir.join("recall.toml");
    fs::write(&path, config).expect("write config");
    path
}

fn recall(dir: &Path, config: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_recall"))
        .current_dir(dir)
        .env_clear()
        .arg("--config")
        .arg(config)
        .args(args)
        .output()
        .expect("run recall")
}

#[test]
fn indexing_without_sources_fails() {
    let dir = TempDir::new().expect("tempdir");
    let config = write_config(dir.path(), &dir.path().join("state/chunks"), false);
    let out = recall(dir.path(), &config, &["--index", "--quiet"]);
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("error:"));
}

#[test]
fn no_action_fails() {
    let dir = TempDir::new().expect("tempdir");
    let config = write_config(dir.path(), &dir.path().join("state/chunks"), false);
    assert!(!recall(dir.path(), &config, &[]).status.success());
}

#[test]
fn query_without_matches_succeeds() {
    let dir = TempDir::new().expect("tempdir");
    fs::write(dir.path().join("MEMORY.md"), "# Core\nThe boiler is serviced in October.\n").expect("write memory");
    let config = write_config(dir.path(), &dir.path().join("state/chunks"), false);

    let indexed = recall(dir.path(), &config, &["--index", "--quiet"]);
    assert!(indexed.status.success(), "{}", String::from_utf8_lossy(&indexed.stderr));

    let found = recall(dir.path(), &config, &["boiler"]);
    assert!(found.status.success());
    assert!(String::from_utf8_lossy(&found.stdout).contains("October"));

    let missing = recall(dir.path(), &config, &["xylophone"]);
    assert!(missing.status.success());
    assert!(String::from_utf8_lossy(&missing.stdout).contains("No results"));
}

#[test]
fn query_with_every_backend_down_succeeds() {
    let dir = TempDir::new().expect("tempdir");
    let blocker = dir.path().join("blocker");
    fs::write(&blocker, "not a directory").expect("write blocker");
    let config = write_config(dir.path(), &blocker.join("chunks"), true);

    let out = recall(dir.path(), &config, &["anything"]);
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    assert!(String::from_utf8_lossy(&out.stdout).contains("No backends available"));

    let json = recall(dir.path(), &config, &["--json", "anything"]);
    assert!(json.status.success());
    assert!(String::from_utf8_lossy(&json.stdout).contains("\"no_backends_available\""));
}
