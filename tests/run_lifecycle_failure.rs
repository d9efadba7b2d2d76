//! A task whose result document reports `"status": "failed"` must abort
//! the run before integration, even though the stub executor itself
//! exits zero (a structurally-invalid or non-`"done"` result is
//! equivalent to a non-zero executor exit).

use std::path::Path;
use std::process::Command;

use auto_codex::config::{CodexConfig, Config};
use auto_codex::error::exit_code;
use auto_codex::git::Repository;

fn init_repo(dir: &Path) {
    let run = |args: &[&str]| {
        assert!(Command::new("git").args(args).current_dir(dir).status().unwrap().success());
    };
    run(&["init", "-q", "-b", "main"]);
    run(&["config", "user.email", "test@example.com"]);
    run(&["config", "user.name", "Test"]);
    std::fs::write(dir.join("README.md"), "hello\n").unwrap();
    run(&["add", "-A"]);
    run(&["commit", "-q", "-m", "init"]);
}

fn write_stub_executor(path: &Path) {
    let script = r#"#!/bin/sh
schema=""
output=""
while [ $# -gt 0 ]; do
  case "$1" in
    --output-schema) schema="$2"; shift 2 ;;
    --output) output="$2"; shift 2 ;;
    *) shift ;;
  esac
done

case "$schema" in
  *plan.schema.json)
    cat > "$output" <<'PLAN'
{"title":"demo","overview":"a single task that fails","tasks":[
  {"id":"T01","title":"do it badly","prompt":"do it badly","depends_on":[]}
]}
PLAN
    ;;
  *task.schema.json)
    printf '{"status":"failed","summary":"could not complete","notes":"ran out of ideas"}\n' > "$output"
    ;;
  *merge.schema.json)
    printf '{"status":"resolved","notes":null}\n' > "$output"
    ;;
  *)
    echo "{}" > "$output"
    ;;
esac
"#;
    std::fs::write(path, script).unwrap();
    use std::os::unix::fs::PermissionsExt;
    let mut perms = std::fs::metadata(path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(path, perms).unwrap();
}

#[test]
fn failed_task_status_aborts_before_integration() {
    let dir = tempfile::tempdir().unwrap();
    init_repo(dir.path());
    let stub_dir = tempfile::tempdir().unwrap();
    let stub = stub_dir.path().join("codex-stub.sh");
    write_stub_executor(&stub);

    let repo = Repository::at(dir.path()).unwrap();
    let config = Config {
        agents: 1,
        codex: CodexConfig { executable: stub.to_string_lossy().into_owned(), ..Default::default() },
        ..Default::default()
    };

    let outcome = auto_codex::orchestrator::run_lifecycle(&repo, &config, "do it badly", None, None, false).unwrap();

    assert_eq!(outcome.exit_code, exit_code::TASK_FAILURE);
    assert!(repo.is_clean().unwrap(), "a failed run must never touch the base branch");
}
