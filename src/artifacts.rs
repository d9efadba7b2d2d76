//! Persists per-run artifacts under the stable on-disk layout, and
//! materializes the embedded JSON schemas into a repository's
//! `.auto-codex/schemas/` directory on first use.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::AutoCodexError;
use crate::plan::Plan;

#[derive(Debug, Clone)]
pub struct RunPaths {
    pub run_root: PathBuf,
}

impl RunPaths {
    pub fn new(repo_root: &Path, run_id: &str) -> Self {
        Self { run_root: repo_root.join(".auto-codex").join("runs").join(run_id) }
    }

    pub fn plan_json(&self) -> PathBuf {
        self.run_root.join("plan.json")
    }

    pub fn plan_log(&self) -> PathBuf {
        self.run_root.join("plan.log")
    }

    pub fn tasks_dir(&self) -> PathBuf {
        self.run_root.join("tasks")
    }

    pub fn goal_md(&self) -> PathBuf {
        self.tasks_dir().join("GOAL.md")
    }

    pub fn task_md(&self, task_id: &str) -> PathBuf {
        self.tasks_dir().join(format!("{task_id}.md"))
    }

    pub fn result_json(&self, task_id: &str) -> PathBuf {
        self.run_root.join("results").join(format!("{task_id}.json"))
    }

    pub fn task_log(&self, task_id: &str) -> PathBuf {
        self.run_root.join("logs").join(format!("{task_id}.log"))
    }

    pub fn dep_merge_dir(&self, task_id: &str) -> PathBuf {
        self.run_root.join("dep-merges").join(task_id)
    }

    pub fn merge_context(&self) -> PathBuf {
        self.run_root.join("merge").join("MERGE_CONTEXT.md")
    }

    pub fn merge_result_json(&self, task_id: &str) -> PathBuf {
        self.run_root.join("merge").join(format!("merge-{task_id}.json"))
    }

    pub fn merge_log(&self, task_id: &str) -> PathBuf {
        self.run_root.join("merge").join(format!("merge-{task_id}.log"))
    }

    pub fn summary_md(&self) -> PathBuf {
        self.run_root.join("SUMMARY.md")
    }

    pub fn worktree_path(repo_root: &Path, run_id: &str, task_id: &str) -> PathBuf {
        repo_root.join(".auto-codex").join("worktrees").join(run_id).join(task_id)
    }
}

fn write_once(path: &Path, content: &str) -> Result<(), AutoCodexError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, content)?;
    Ok(())
}

/// Write the embedded schema documents to `.auto-codex/schemas/` if
/// they are not already present, so a repository's `.auto-codex/` tree
/// is self-describing without the binary alongside it.
pub fn ensure_schemas(repo_root: &Path) -> Result<(), AutoCodexError> {
    let dir = repo_root.join(".auto-codex").join("schemas");
    std::fs::create_dir_all(&dir)?;
    for (name, content) in [
        ("plan.schema.json", crate::plan::PLAN_SCHEMA),
        ("task.schema.json", include_str!("../schemas/task.schema.json")),
        ("merge.schema.json", include_str!("../schemas/merge.schema.json")),
    ] {
        let path = dir.join(name);
        if !path.exists() {
            std::fs::write(&path, content)?;
        }
    }
    Ok(())
}

pub fn write_goal_doc(paths: &RunPaths, goal: &str, plan: &Plan) -> Result<(), AutoCodexError> {
    let mut doc = String::new();
    writeln!(doc, "# {}", plan.title).unwrap();
    writeln!(doc, "\n{goal}\n").unwrap();
    writeln!(doc, "## Overview\n{}\n", plan.overview).unwrap();
    if let Some(notes) = &plan.merge_notes {
        writeln!(doc, "## Merge notes\n{notes}\n").unwrap();
    }
    write_once(&paths.goal_md(), &doc)
}

pub fn write_task_doc(paths: &RunPaths, task: &crate::plan::Task) -> Result<(), AutoCodexError> {
    let mut doc = String::new();
    writeln!(doc, "# {}: {}", task.id, task.title).unwrap();
    writeln!(doc, "\nDepends on: {}\n", if task.depends_on.is_empty() {
        "none".to_string()
    } else {
        task.depends_on.join(", ")
    })
    .unwrap();
    writeln!(doc, "## Prompt\n{}\n", task.prompt).unwrap();
    write_once(&paths.task_md(&task.id), &doc)
}

#[derive(Debug, Clone, Serialize, schemars::JsonSchema)]
pub struct TaskResult {
    pub task_id: String,
    pub branch: String,
    pub worktree_path: PathBuf,
    pub exit_code: Option<i32>,
    pub commit_sha: Option<String>,
    pub result_json_path: PathBuf,
    pub log_path: PathBuf,
    /// Parsed `summary`/`notes` from the executor's result document,
    /// used to build merge context during final integration.
    pub summary: Option<String>,
    pub notes: Option<String>,
}

impl TaskResult {
    pub fn is_success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Final `SUMMARY.md`: each task's status (OK or FAIL(code)), branch,
/// commit hash, and log/result paths.
pub fn write_summary(
    paths: &RunPaths,
    run_id: &str,
    results: &[TaskResult],
    fatal_cause: Option<&str>,
) -> Result<(), AutoCodexError> {
    let mut doc = String::new();
    writeln!(doc, "# Run {run_id}\n").unwrap();
    writeln!(doc, "| Task | Status | Branch | Commit | Log | Result |").unwrap();
    writeln!(doc, "|---|---|---|---|---|---|").unwrap();
    for r in results {
        let status = match r.exit_code {
            Some(0) => "OK".to_string(),
            Some(code) => format!("FAIL({code})"),
            None => "FAIL(none)".to_string(),
        };
        writeln!(
            doc,
            "| {} | {} | {} | {} | {} | {} |",
            r.task_id,
            status,
            r.branch,
            r.commit_sha.as_deref().unwrap_or("-"),
            r.log_path.display(),
            r.result_json_path.display(),
        )
        .unwrap();
    }
    if let Some(cause) = fatal_cause {
        writeln!(doc, "\n## Fatal cause\n{cause}\n").unwrap();
    }
    write_once(&paths.summary_md(), &doc)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_schemas_writes_three_files() {
        let dir = tempfile::tempdir().unwrap();
        ensure_schemas(dir.path()).unwrap();
        let schemas_dir = dir.path().join(".auto-codex/schemas");
        assert!(schemas_dir.join("plan.schema.json").exists());
        assert!(schemas_dir.join("task.schema.json").exists());
        assert!(schemas_dir.join("merge.schema.json").exists());
    }

    #[test]
    fn ensure_schemas_does_not_overwrite_existing() {
        let dir = tempfile::tempdir().unwrap();
        ensure_schemas(dir.path()).unwrap();
        let path = dir.path().join(".auto-codex/schemas/plan.schema.json");
        std::fs::write(&path, "custom").unwrap();
        ensure_schemas(dir.path()).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "custom");
    }

    #[test]
    fn summary_lists_ok_and_fail() {
        let dir = tempfile::tempdir().unwrap();
        let paths = RunPaths::new(dir.path(), "run1");
        let results = vec![
            TaskResult {
                task_id: "T01".into(),
                branch: "acdx/run1/T01".into(),
                worktree_path: PathBuf::from("/tmp/t01"),
                exit_code: Some(0),
                commit_sha: Some("abc123".into()),
                result_json_path: paths.result_json("T01"),
                log_path: paths.task_log("T01"),
                summary: Some("did it".into()),
                notes: None,
            },
            TaskResult {
                task_id: "T02".into(),
                branch: "acdx/run1/T02".into(),
                worktree_path: PathBuf::from("/tmp/t02"),
                exit_code: Some(1),
                commit_sha: None,
                result_json_path: paths.result_json("T02"),
                log_path: paths.task_log("T02"),
                summary: None,
                notes: None,
            },
        ];
        write_summary(&paths, "run1", &results, Some("task T02 failed")).unwrap();
        let text = std::fs::read_to_string(paths.summary_md()).unwrap();
        assert!(text.contains("OK"));
        assert!(text.contains("FAIL(1)"));
        assert!(text.contains("task T02 failed"));
    }
}
