//! Ties the components together for the `plan`, `run`, and `clean`
//! subcommands. Planning's own decomposition logic is the external
//! collaborator; this module only drives the read-only
//! executor invocation that produces `plan.json` and feeds it into the
//! validator.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::artifacts::{self, RunPaths, TaskResult};
use crate::config::Config;
use crate::error::{AutoCodexError, PreconditionKind};
use crate::executor::{self, ApiKeyRotation, ExecutorInvocation, ExecutorMode};
use crate::git::Repository;
use crate::plan::{self, Plan};
use crate::{integrator, run_id, scheduler, task_runner};

pub struct PlanOutcome {
    pub run_id: String,
    pub run_paths: RunPaths,
    pub plan: Plan,
}

/// `plan <goal> [-j N]`: produce `plan.json` via a read-only
/// executor invocation, validate it, and render per-task documents.
pub fn generate_plan(
    repo: &Repository,
    config: &Config,
    goal: &str,
) -> Result<PlanOutcome, AutoCodexError> {
    let run_id_str = run_id::generate();
    let run_paths = RunPaths::new(repo.root(), &run_id_str);
    artifacts::ensure_schemas(repo.root())?;

    let prompt = format!(
        "$auto-codex-plan\nrun_id: {run_id_str}\ngoal: {goal}\n\nDecompose the goal above into a DAG of tasks."
    );
    let schema_path = repo.root().join(".auto-codex/schemas/plan.schema.json");
    let plan_json_path = run_paths.plan_json();
    let plan_log_path = run_paths.plan_log();

    executor::invoke(
        config,
        ExecutorInvocation {
            mode: ExecutorMode::ReadOnly,
            cwd: repo.root(),
            prompt: &prompt,
            output_schema_path: Some(&schema_path),
            output_path: &plan_json_path,
            log_path: &plan_log_path,
            api_key_env: None,
        },
    )?;

    let plan_text = std::fs::read_to_string(&plan_json_path).map_err(|e| AutoCodexError::PlanInvalid {
        message: format!("executor did not produce a plan at {}: {e}", plan_json_path.display()),
    })?;
    let plan = plan::parse_and_validate(&plan_text)?;

    artifacts::write_goal_doc(&run_paths, goal, &plan)?;
    for task in plan.tasks.values() {
        artifacts::write_task_doc(&run_paths, task)?;
    }

    Ok(PlanOutcome { run_id: run_id_str, run_paths, plan })
}

pub struct RunOutcome {
    pub run_id: String,
    pub exit_code: i32,
    /// The plan's `merge_notes`, surfaced only on a fully successful run
    /// (scheduling, integration, and quality gates all passed).
    pub merge_notes: Option<String>,
}

/// `run <goal> [-j N] [--base <branch>] [--no-merge]`: full
/// lifecycle. Refuses to start on a dirty base; on any task failure
/// skips integration and exits non-zero.
pub fn run_lifecycle(
    repo: &Repository,
    config: &Config,
    goal: &str,
    agents_override: Option<usize>,
    base_override: Option<&str>,
    no_merge: bool,
) -> Result<RunOutcome, AutoCodexError> {
    if !repo.is_clean()? {
        return Err(AutoCodexError::Precondition {
            kind: PreconditionKind::DirtyBase,
            message: "base working copy is dirty; commit or stash before running".to_string(),
        });
    }

    let base_ref = match base_override {
        Some(b) => b.to_string(),
        None => repo.current_branch()?,
    };

    repo.ensure_local_excludes()?;

    let PlanOutcome { run_id, run_paths, plan } = generate_plan(repo, config, goal)?;

    let workers = Config::clamp_workers(agents_override.unwrap_or(config.agents));
    // Shared via `Arc` (not moved wholesale) so the same rotation state
    // is visible both to the per-task closure below and to the
    // integrator's own executor-assisted merges after scheduling ends.
    let api_keys = Arc::new(ApiKeyRotation::new(config.codex.api_keys_env.clone()));

    let repo_root = repo.root().to_path_buf();
    let config_clone = config.clone();
    let run_paths_clone = run_paths.clone();
    let run_id_clone = run_id.clone();
    let base_ref_clone = base_ref.clone();
    let goal_clone = goal.to_string();
    let plan_clone = plan.clone();
    let api_keys_for_tasks = Arc::clone(&api_keys);

    let scheduler_result = scheduler::run(&plan, workers, move |task_id| {
        let repo = Repository::at(&repo_root)?;
        let task = plan_clone.tasks.get(task_id).expect("scheduler only launches known task ids");
        // Dependencies of this task are guaranteed done before launch,
        // but their TaskResults live on the coordinator, not here; the
        // task runner re-reads each dependency's result JSON from disk
        // via its stable artifact path instead of needing that map
        // threaded through the scheduler closure.
        let dep_results = load_dep_results(&run_paths_clone, &task.depends_on);
        task_runner::run_task(
            &repo,
            &config_clone,
            &run_paths_clone,
            &run_id_clone,
            &base_ref_clone,
            &goal_clone,
            &plan_clone,
            task,
            &dep_results,
            &api_keys_for_tasks,
        )
    });

    let results = match scheduler_result {
        Ok(results) => results,
        Err(e) => {
            let partial = collect_partial_results(&run_paths, &run_id, &plan);
            artifacts::write_summary(&run_paths, &run_id, &partial, Some(&e.to_string()))?;
            return Ok(RunOutcome { run_id, exit_code: e.exit_code(), merge_notes: None });
        }
    };

    let ordered_results: Vec<TaskResult> =
        plan.topo_order.iter().filter_map(|id| results.get(id).cloned()).collect();

    if no_merge {
        artifacts::write_summary(&run_paths, &run_id, &ordered_results, None)?;
        return Ok(RunOutcome {
            run_id,
            exit_code: crate::error::exit_code::SUCCESS,
            merge_notes: plan.merge_notes.clone(),
        });
    }

    let integration = integrator::integrate(
        repo,
        config,
        &run_paths,
        &run_id,
        &base_ref,
        &plan,
        &ordered_results,
        &api_keys,
    );

    let changed_files = match integration {
        Ok(files) => files,
        Err(e) => {
            artifacts::write_summary(&run_paths, &run_id, &ordered_results, Some(&e.to_string()))?;
            return Ok(RunOutcome { run_id, exit_code: e.exit_code(), merge_notes: None });
        }
    };

    if let Err(e) = integrator::run_placeholder_scan(repo.root(), config, &changed_files) {
        artifacts::write_summary(&run_paths, &run_id, &ordered_results, Some(&e.to_string()))?;
        return Ok(RunOutcome { run_id, exit_code: e.exit_code(), merge_notes: None });
    }

    if let Err(e) = integrator::run_test_command(repo.root(), config) {
        artifacts::write_summary(&run_paths, &run_id, &ordered_results, Some(&e.to_string()))?;
        return Ok(RunOutcome { run_id, exit_code: e.exit_code(), merge_notes: None });
    }

    artifacts::write_summary(&run_paths, &run_id, &ordered_results, None)?;
    Ok(RunOutcome { run_id, exit_code: crate::error::exit_code::SUCCESS, merge_notes: plan.merge_notes })
}

fn load_dep_results(run_paths: &RunPaths, dep_ids: &[String]) -> HashMap<String, TaskResult> {
    let mut map = HashMap::new();
    for dep_id in dep_ids {
        let result_path = run_paths.result_json(dep_id);
        if result_path.exists() {
            map.insert(
                dep_id.clone(),
                TaskResult {
                    task_id: dep_id.clone(),
                    branch: String::new(),
                    worktree_path: PathBuf::new(),
                    exit_code: Some(0),
                    commit_sha: None,
                    result_json_path: result_path,
                    log_path: run_paths.task_log(dep_id),
                    summary: None,
                    notes: None,
                },
            );
        }
    }
    map
}

/// Best-effort TaskResults for a run the scheduler aborted early: the
/// scheduler surfaces only the first fatal cause, not every completed
/// task's own result, so the summary re-reads whatever result JSON each
/// task runner managed to write to disk before the drain finished.
fn collect_partial_results(run_paths: &RunPaths, run_id_str: &str, plan: &Plan) -> Vec<TaskResult> {
    plan.topo_order
        .iter()
        .filter_map(|id| {
            let result_path = run_paths.result_json(id);
            result_path.exists().then(|| {
                let parsed = crate::result_doc::read_task_result(&result_path);
                TaskResult {
                    task_id: id.clone(),
                    branch: run_id::branch_name(run_id_str, id),
                    worktree_path: PathBuf::new(),
                    exit_code: Some(if parsed.is_ok() { 0 } else { 1 }),
                    commit_sha: None,
                    result_json_path: result_path,
                    log_path: run_paths.task_log(id),
                    summary: parsed.as_ref().ok().map(|p| p.summary.clone()),
                    notes: parsed.ok().and_then(|p| p.notes),
                }
            })
        })
        .collect()
}

/// `clean <run_id>`: remove every worktree and branch for the run.
/// Idempotent: re-running after success is a no-op, never an error.
pub fn clean(repo: &Repository, run_id: &str) -> Result<(), AutoCodexError> {
    let worktrees_root = repo.root().join(".auto-codex").join("worktrees").join(run_id);
    if let Ok(entries) = std::fs::read_dir(&worktrees_root) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                let _ = repo.worktree_remove(&path);
            }
        }
    }
    let _ = std::fs::remove_dir_all(&worktrees_root);

    // Branch names are partitioned by task id but enumerated here via
    // `git branch --list` since the worktree directory may already be
    // gone on a second `clean` call.
    let sanitized = run_id::sanitize(run_id);
    let pattern = format!("acdx/{sanitized}/*");
    if let Ok(out) = crate::process::run_capture(
        "clean.list_branches",
        crate::process::RunSpec {
            argv: &["git", "branch", "--list", &pattern, "--format=%(refname:short)"],
            cwd: Some(repo.root()),
            env: &[],
            timeout: None,
            on_failure: crate::process::OnFailure::Return,
            stdin: None,
        },
    ) {
        for branch in out.stdout.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let _ = repo.branch_delete(branch);
        }
    }

    Ok(())
}
