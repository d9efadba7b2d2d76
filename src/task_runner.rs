//! Runs one task end to end: worktree creation, dependency pre-merge,
//! primary executor invocation, and commit-if-dirty.

use std::collections::BTreeSet;
use std::path::Path;

use crate::artifacts::{RunPaths, TaskResult};
use crate::config::Config;
use crate::error::AutoCodexError;
use crate::executor::{self, ApiKeyRotation, ExecutorInvocation, ExecutorMode};
use crate::git::{MergeMode, Repository};
use crate::merge_assist::{merge_with_executor_assist, ConflictResolver, MergeAssistOutcome};
use crate::plan::{Plan, Task};
use crate::result_doc;
use crate::run_id;

/// Invokes the executor with a pre-built dependency-merge prompt,
/// writing the merge output to `merge/merge-<taskId>.json` inside the
/// task's dep-merge artifact directory.
struct DependencyMergeResolver<'a> {
    repo_root: &'a Path,
    config: &'a Config,
    api_key: Option<(String, String)>,
    worktree_path: &'a Path,
    run_id: &'a str,
    task_id: &'a str,
    dep_branch: &'a str,
    dep_merges_dir: &'a Path,
    context_doc: &'a str,
}

impl ConflictResolver for DependencyMergeResolver<'_> {
    fn resolve(&mut self, conflicted_files: &[String]) -> Result<Option<i32>, AutoCodexError> {
        let prompt = executor::build_dependency_merge_prompt(
            self.run_id,
            self.task_id,
            self.dep_branch,
            conflicted_files,
            self.context_doc,
        );
        let output_path = self.dep_merges_dir.join("result.json");
        let log_path = self.dep_merges_dir.join("executor.log");
        let schema_path = self.repo_root.join(".auto-codex/schemas/merge.schema.json");
        executor::invoke(
            self.config,
            ExecutorInvocation {
                mode: ExecutorMode::WorkspaceWrite,
                cwd: self.worktree_path,
                prompt: &prompt,
                output_schema_path: Some(&schema_path),
                output_path: &output_path,
                log_path: &log_path,
                api_key_env: self.api_key.as_ref().map(|(k, v)| (k.as_str(), v.as_str())),
            },
        )
    }
}

fn dependency_merge_context(task_id: &str, dep_id: &str, dep_result: Option<&result_doc::TaskExecutorResult>) -> String {
    let mut doc = format!("Pre-merging {dep_id} into {task_id}.\n\n");
    if let Some(r) = dep_result {
        doc.push_str(&format!("### {dep_id}\n{}\n", r.summary));
        if let Some(notes) = &r.notes {
            doc.push_str(&format!("\n{notes}\n"));
        }
    }
    doc
}

/// Run one task. `dep_results` holds already-produced TaskResults for
/// every dependency, keyed by task id, so the pre-merge loop can read
/// their `results/<depId>.json` summaries for merge context.
pub fn run_task(
    repo: &Repository,
    config: &Config,
    run_paths: &RunPaths,
    run_id_str: &str,
    base_ref: &str,
    goal: &str,
    plan: &Plan,
    task: &Task,
    dep_results: &std::collections::HashMap<String, TaskResult>,
    api_keys: &ApiKeyRotation,
) -> Result<TaskResult, AutoCodexError> {
    let branch = run_id::branch_name(run_id_str, &task.id);
    let worktree_path = RunPaths::worktree_path(repo.root(), run_id_str, &task.id);
    let log_path = run_paths.task_log(&task.id);
    let result_path = run_paths.result_json(&task.id);

    // One key for the task's entire lifetime: every executor call
    // below, dependency merges and the primary invocation alike, reuses
    // this same rotation slot rather than drawing a fresh one each time.
    let api_key = api_keys.next_key();

    repo.worktree_add(base_ref, &branch, &worktree_path)?;

    // Deduplicate depends_on while preserving first-seen order.
    let mut seen = BTreeSet::new();
    let deps: Vec<&String> = task.depends_on.iter().filter(|d| seen.insert((*d).clone())).collect();

    for dep_id in deps {
        let dep_branch = run_id::branch_name(run_id_str, dep_id);
        let dep_result = dep_results.get(dep_id);
        let dep_summary = dep_result.and_then(|r| {
            std::fs::read_to_string(&r.result_json_path)
                .ok()
                .and_then(|text| serde_json::from_str::<result_doc::TaskExecutorResult>(&text).ok())
        });
        let context_doc = dependency_merge_context(&task.id, dep_id, dep_summary.as_ref());

        let dep_merges_dir = run_paths.dep_merge_dir(&task.id).join(dep_id);
        std::fs::create_dir_all(&dep_merges_dir)?;

        let mut resolver = DependencyMergeResolver {
            repo_root: repo.root(),
            config,
            api_key: api_key.clone(),
            worktree_path: &worktree_path,
            run_id: run_id_str,
            task_id: &task.id,
            dep_branch: &dep_branch,
            dep_merges_dir: &dep_merges_dir,
            context_doc: &context_doc,
        };

        let commit_message = format!("Merge {dep_branch} (deps for {})", task.id);
        let fail_task = task.id.clone();
        let fail_dep = dep_branch.clone();
        let outcome = merge_with_executor_assist(
            repo,
            &worktree_path,
            MergeMode::NoFfNoEdit,
            &dep_branch,
            &commit_message,
            &mut resolver,
            move |detail| AutoCodexError::DependencyMergeFailure {
                task_id: fail_task.clone(),
                dep_branch: fail_dep.clone(),
                detail,
            },
        );

        match outcome {
            Ok(MergeAssistOutcome::CleanNoConflict) => {}
            Ok(MergeAssistOutcome::ResolvedByExecutor) => {}
            Err(e) => return Err(e),
        }
    }

    // Primary task execution.
    let prompt = executor::build_task_prompt(
        run_id_str,
        base_ref,
        &task.id,
        &task.title,
        goal,
        &plan.overview,
        &task.prompt,
    );
    let schema_path = repo.root().join(".auto-codex/schemas/task.schema.json");
    let exit_code = executor::invoke(
        config,
        ExecutorInvocation {
            mode: ExecutorMode::WorkspaceWrite,
            cwd: &worktree_path,
            prompt: &prompt,
            output_schema_path: Some(&schema_path),
            output_path: &result_path,
            log_path: &log_path,
            api_key_env: api_key.as_ref().map(|(k, v)| (k.as_str(), v.as_str())),
        },
    )?;

    // Structurally-invalid results are treated as failures even if the
    // executor itself exited 0.
    let effective_exit_code = match exit_code {
        Some(0) => match result_doc::read_task_result(&result_path) {
            Ok(_) => Some(0),
            Err(_) => Some(1),
        },
        other => other,
    };

    let mut commit_sha = None;
    if effective_exit_code == Some(0) && !repo.is_clean_at(&worktree_path)? {
        repo.add_all(&worktree_path)?;
        repo.commit_no_verify(&worktree_path, &format!("{}: {}", task.id, task.title))?;
        commit_sha = Some(repo.head_sha(&worktree_path)?);
    }

    let parsed = result_doc::read_task_result(&result_path).ok();

    Ok(TaskResult {
        task_id: task.id.clone(),
        branch,
        worktree_path,
        exit_code: effective_exit_code,
        commit_sha,
        result_json_path: result_path,
        log_path,
        summary: parsed.as_ref().map(|p| p.summary.clone()),
        notes: parsed.and_then(|p| p.notes),
    })
}
