//! Final ordered integration onto the base branch, with
//! executor-assisted conflict resolution and post-merge quality gates.

use std::path::Path;

use crate::artifacts::{RunPaths, TaskResult};
use crate::config::{Config, PlaceholderCheckMode};
use crate::error::AutoCodexError;
use crate::executor::{self, ApiKeyRotation, ExecutorInvocation, ExecutorMode};
use crate::git::{MergeMode, Repository};
use crate::merge_assist::{merge_with_executor_assist, ConflictResolver, MergeAssistOutcome};
use crate::plan::Plan;

struct IntegrationResolver<'a> {
    repo_root: &'a Path,
    config: &'a Config,
    api_key: Option<(String, String)>,
    base_worktree: &'a Path,
    run_id: &'a str,
    base_branch: &'a str,
    merging_branch: &'a str,
    context_path: &'a Path,
    result_path: &'a Path,
    log_path: &'a Path,
    results: &'a [TaskResult],
    plan: &'a Plan,
}

impl ConflictResolver for IntegrationResolver<'_> {
    fn resolve(&mut self, conflicted_files: &[String]) -> Result<Option<i32>, AutoCodexError> {
        write_merge_context(
            self.context_path,
            self.run_id,
            self.merging_branch,
            conflicted_files,
            self.results,
            self.plan,
        )?;
        let prompt = executor::build_integration_merge_prompt(
            self.run_id,
            self.base_branch,
            self.merging_branch,
            conflicted_files,
            self.context_path,
        );
        let schema_path = self.repo_root.join(".auto-codex/schemas/merge.schema.json");
        executor::invoke(
            self.config,
            ExecutorInvocation {
                mode: ExecutorMode::WorkspaceWrite,
                cwd: self.base_worktree,
                prompt: &prompt,
                output_schema_path: Some(&schema_path),
                output_path: self.result_path,
                log_path: self.log_path,
                api_key_env: self.api_key.as_ref().map(|(k, v)| (k.as_str(), v.as_str())),
            },
        )
    }
}

fn write_merge_context(
    path: &Path,
    run_id: &str,
    branch: &str,
    conflicted_files: &[String],
    results: &[TaskResult],
    plan: &Plan,
) -> Result<(), AutoCodexError> {
    use std::fmt::Write as _;
    let mut doc = String::new();
    writeln!(doc, "# Merge context for run {run_id}").unwrap();
    writeln!(doc, "\nMerging branch: {branch}\n").unwrap();
    writeln!(doc, "## Conflicted files").unwrap();
    for f in conflicted_files {
        writeln!(doc, "- {f}").unwrap();
    }
    writeln!(doc).unwrap();
    for id in &plan.topo_order {
        if let Some(result) = results.iter().find(|r| &r.task_id == id) {
            let task = plan.tasks.get(id);
            let title = task.map(|t| t.title.as_str()).unwrap_or("");
            writeln!(doc, "### {id}: {title}").unwrap();
            if let Some(summary) = &result.summary {
                writeln!(doc, "{summary}").unwrap();
            }
            if let Some(notes) = &result.notes {
                writeln!(doc, "\n{notes}").unwrap();
            }
            writeln!(doc).unwrap();
        }
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, doc)?;
    Ok(())
}

/// Run final integration. Precondition (checked by the caller): every
/// `TaskResult` has exit code zero and a schema-valid result document.
pub fn integrate(
    repo: &Repository,
    config: &Config,
    run_paths: &RunPaths,
    run_id: &str,
    base_branch: &str,
    plan: &Plan,
    results: &[TaskResult],
    api_keys: &ApiKeyRotation,
) -> Result<Vec<String>, AutoCodexError> {
    let base_worktree = repo.root();

    // Filter the topological order to ids that produced a commit.
    let merge_order: Vec<&TaskResult> = plan
        .topo_order
        .iter()
        .filter_map(|id| results.iter().find(|r| &r.task_id == id))
        .filter(|r| r.commit_sha.is_some())
        .collect();

    let base_sha_before = repo.head_sha(base_worktree)?;

    for result in &merge_order {
        let context_path = run_paths.merge_context();
        let result_path = run_paths.merge_result_json(&result.task_id);
        let log_path = run_paths.merge_log(&result.task_id);

        let mut resolver = IntegrationResolver {
            repo_root: repo.root(),
            config,
            api_key: api_keys.next_key(),
            base_worktree,
            run_id,
            base_branch,
            merging_branch: &result.branch,
            context_path: &context_path,
            result_path: &result_path,
            log_path: &log_path,
            results,
            plan,
        };

        let commit_message = format!("Merge {}", result.branch);
        let branch_for_error = result.branch.clone();
        let outcome = merge_with_executor_assist(
            repo,
            base_worktree,
            MergeMode::NoFfNoCommit,
            &result.branch,
            &commit_message,
            &mut resolver,
            move |detail| AutoCodexError::IntegrationFailure { branch: branch_for_error.clone(), detail },
        )?;

        match outcome {
            MergeAssistOutcome::CleanNoConflict => {
                repo.commit_no_verify(base_worktree, &commit_message)?;
            }
            MergeAssistOutcome::ResolvedByExecutor => {
                if let Ok(merge_result) = crate::result_doc::read_merge_result(&result_path) {
                    if merge_result.status != "resolved" {
                        return Err(AutoCodexError::IntegrationFailure {
                            branch: result.branch.clone(),
                            detail: format!("merge result status {:?} is not \"resolved\"", merge_result.status),
                        });
                    }
                }
            }
        }
    }

    let head_sha_after = repo.head_sha(base_worktree)?;
    let changed_files = if base_sha_before == head_sha_after {
        Vec::new()
    } else {
        repo.diff_name_only(base_worktree, &base_sha_before, &head_sha_after)?
    };
    Ok(changed_files)
}

/// Post-merge placeholder quality scan: walk `changed_files`, emit a
/// warning or fail per `quality.placeholder_check`.
pub fn run_placeholder_scan(
    repo_root: &Path,
    config: &Config,
    changed_files: &[String],
) -> Result<(), AutoCodexError> {
    if config.quality.placeholder_check == PlaceholderCheckMode::Off
        || config.quality.placeholder_tokens.is_empty()
    {
        return Ok(());
    }

    use rayon::prelude::*;
    let hits: Vec<(String, String)> = changed_files
        .par_iter()
        .filter_map(|f| {
            let text = std::fs::read_to_string(repo_root.join(f)).ok()?;
            for token in &config.quality.placeholder_tokens {
                if text.contains(token.as_str()) {
                    return Some((f.clone(), token.clone()));
                }
            }
            None
        })
        .collect();

    if hits.is_empty() {
        return Ok(());
    }

    let detail = hits
        .iter()
        .map(|(f, t)| format!("{f}: found placeholder token {t:?}"))
        .collect::<Vec<_>>()
        .join("; ");

    match config.quality.placeholder_check {
        PlaceholderCheckMode::Off => Ok(()),
        PlaceholderCheckMode::Warn => {
            log::warn!("placeholder tokens found after integration: {detail}");
            Ok(())
        }
        PlaceholderCheckMode::Fail => Err(AutoCodexError::QualityGateFailure { detail }),
    }
}

/// Run the configured `test` command as the final quality gate.
pub fn run_test_command(repo_root: &Path, config: &Config) -> Result<(), AutoCodexError> {
    let Some(test_cmd) = &config.commands.test else { return Ok(()) };
    if test_cmd.is_empty() {
        return Ok(());
    }

    let shell_line = test_cmd.join(" ");
    let argv: Vec<&str> = if config.commands.test_shell {
        vec!["sh", "-c", &shell_line]
    } else {
        test_cmd.iter().map(String::as_str).collect()
    };

    let out = crate::process::run_capture(
        "integrator.test_command",
        crate::process::RunSpec {
            argv: &argv,
            cwd: Some(repo_root),
            env: &[],
            timeout: None,
            on_failure: crate::process::OnFailure::Return,
            stdin: None,
        },
    )?;

    if out.exit_code != Some(0) {
        return Err(AutoCodexError::QualityGateFailure {
            detail: format!("test command exited {:?}", out.exit_code),
        });
    }
    Ok(())
}
