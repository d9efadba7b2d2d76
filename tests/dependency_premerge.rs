//! Exercises the dependency pre-merge path end to end: a two-task chain
//! where `T02` depends on `T01`, so `task_runner::run_task` for `T02`
//! must merge `T01`'s branch into its own worktree before running its
//! own executor invocation.

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

/// `T02` depends on `T01`; each task writes its own marker file, so a
/// successful dependency pre-merge must make `T01`'s file visible in
/// `T02`'s worktree before `T02`'s own executor call runs, and both
/// files must be present once the whole run reaches the base branch.
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
{"title":"demo","overview":"a chain of two dependent tasks","tasks":[
  {"id":"T01","title":"add a","prompt":"create a.txt","depends_on":[]},
  {"id":"T02","title":"add b","prompt":"create b.txt","depends_on":["T01"]}
]}
PLAN
    ;;
  *task.schema.json)
    taskid=$(basename "$PWD")
    if [ "$taskid" = "T02" ]; then
      test -f T01-stub.txt || { echo "T01's file missing from T02's worktree" >&2; exit 1; }
    fi
    echo "hello from $taskid" > "$taskid-stub.txt"
    printf '{"status":"done","summary":"created %s-stub.txt","notes":null}\n' "$taskid" > "$output"
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
fn dependent_task_sees_dependency_file_after_premerge() {
    let dir = tempfile::tempdir().unwrap();
    init_repo(dir.path());
    let stub_dir = tempfile::tempdir().unwrap();
    let stub = stub_dir.path().join("codex-stub.sh");
    write_stub_executor(&stub);

    let repo = Repository::at(dir.path()).unwrap();
    let config = Config {
        agents: 4,
        codex: CodexConfig { executable: stub.to_string_lossy().into_owned(), ..Default::default() },
        ..Default::default()
    };

    let outcome =
        auto_codex::orchestrator::run_lifecycle(&repo, &config, "create a chain of files", None, None, false)
            .unwrap();

    assert_eq!(outcome.exit_code, exit_code::SUCCESS);
    assert!(dir.path().join("T01-stub.txt").exists());
    assert!(dir.path().join("T02-stub.txt").exists());
    assert!(repo.is_clean().unwrap());
}
