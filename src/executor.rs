//! Invokes the external LLM executor in its two modes and mirrors its
//! output to a run log.
//!
//! Prompt bodies here are fully-known structured data (sentinel, ids,
//! free-text fields) assembled with plain string concatenation — there
//! is no user-authored template to render, so this stays a thin process
//! wrapper rather than reaching for a templating engine.

use std::path::Path;

use crate::config::{Config, ReasoningEffort, SandboxMode, WebSearchPolicy};
use crate::error::AutoCodexError;
use crate::process::{self, OnFailure, RunSpec};

/// Read-only planning vs workspace-write task/merge execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorMode {
    ReadOnly,
    WorkspaceWrite,
}

/// One invocation of the executor.
pub struct ExecutorInvocation<'a> {
    pub mode: ExecutorMode,
    pub cwd: &'a Path,
    pub prompt: &'a str,
    pub output_schema_path: Option<&'a Path>,
    pub output_path: &'a Path,
    pub log_path: &'a Path,
    pub api_key_env: Option<(&'a str, &'a str)>,
}

/// Assigns one `api_keys_env` entry per task launch, round-robin, so
/// each task sees a single key for its entire lifetime.
pub struct ApiKeyRotation {
    keys: Vec<String>,
    next: std::sync::atomic::AtomicUsize,
}

impl ApiKeyRotation {
    pub fn new(keys: Vec<String>) -> Self {
        Self { keys, next: std::sync::atomic::AtomicUsize::new(0) }
    }

    /// Returns the environment variable name to set and the value read
    /// from the orchestrator's own environment, or `None` if no keys
    /// are configured.
    pub fn next_key(&self) -> Option<(String, String)> {
        if self.keys.is_empty() {
            return None;
        }
        let idx = self.next.fetch_add(1, std::sync::atomic::Ordering::SeqCst) % self.keys.len();
        let name = self.keys[idx].clone();
        let value = std::env::var(&name).unwrap_or_default();
        Some((name, value))
    }
}

fn reasoning_effort_flag(effort: ReasoningEffort) -> &'static str {
    match effort {
        ReasoningEffort::None => "none",
        ReasoningEffort::Minimal => "minimal",
        ReasoningEffort::Low => "low",
        ReasoningEffort::Medium => "medium",
        ReasoningEffort::High => "high",
        ReasoningEffort::XHigh => "xhigh",
    }
}

/// Build the executor's argv from configuration and an invocation.
fn build_argv(config: &Config, inv: &ExecutorInvocation) -> Vec<String> {
    let mut argv = vec![config.codex.executable.clone()];

    match inv.mode {
        ExecutorMode::ReadOnly => {
            argv.push("--sandbox".into());
            argv.push("read-only".into());
        }
        ExecutorMode::WorkspaceWrite => {
            argv.push("--sandbox".into());
            argv.push(match config.codex.sandbox {
                SandboxMode::ReadOnly => "read-only".into(),
                SandboxMode::WorkspaceWrite => "workspace-write".into(),
            });
            if config.codex.network_access {
                argv.push("--network-access".into());
            }
        }
    }

    if config.codex.full_auto {
        argv.push("--full-auto".into());
    }

    argv.push("--model".into());
    argv.push(config.codex.model.clone());

    argv.push("--reasoning-effort".into());
    argv.push(reasoning_effort_flag(config.codex.reasoning_effort).into());

    match config.codex.web_search {
        WebSearchPolicy::Cached => {
            argv.push("--web-search".into());
            argv.push("cached".into());
        }
        WebSearchPolicy::Live => {
            argv.push("--web-search".into());
            argv.push("live".into());
            argv.push("--enable-search".into());
        }
    }

    if let Some(schema) = inv.output_schema_path {
        argv.push("--output-schema".into());
        argv.push(schema.to_string_lossy().into_owned());
    }

    argv.push("--output".into());
    argv.push(inv.output_path.to_string_lossy().into_owned());

    argv
}

/// Run the executor for one invocation, mirroring stdio to
/// `inv.log_path`. Returns the raw exit code: the executor's exit code
/// is the sole per-task success signal, so this function never itself
/// fails on a non-zero exit.
pub fn invoke(config: &Config, inv: ExecutorInvocation) -> Result<Option<i32>, AutoCodexError> {
    let argv_owned = build_argv(config, &inv);
    let argv: Vec<&str> = argv_owned.iter().map(String::as_str).collect();

    let mut env: Vec<(&str, &str)> = Vec::new();
    if let Some((k, v)) = inv.api_key_env {
        env.push((k, v));
    }

    write_prompt_to_stdin_and_run(&argv, inv.cwd, &env, inv.prompt, inv.log_path, inv.output_path)
}

/// Runs the executor through [`process::run_stream_to_log`] with the
/// prompt piped to stdin, the same primitive every other external
/// command in this crate funnels through. Also ensures `output_path`'s
/// parent directory exists, since the executor process itself (not
/// this crate) writes the result document there.
fn write_prompt_to_stdin_and_run(
    argv: &[&str],
    cwd: &Path,
    env: &[(&str, &str)],
    prompt: &str,
    log_path: &Path,
    output_path: &Path,
) -> Result<Option<i32>, AutoCodexError> {
    if let Some(parent) = output_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let spec = RunSpec {
        argv,
        cwd: Some(cwd),
        env,
        timeout: None,
        on_failure: OnFailure::Return,
        stdin: Some(prompt.as_bytes()),
    };
    let out = process::run_stream_to_log("executor.invoke", spec, log_path)?;
    Ok(out.exit_code)
}

/// Build the primary task prompt.
pub fn build_task_prompt(
    run_id: &str,
    base_ref: &str,
    task_id: &str,
    task_title: &str,
    goal: &str,
    plan_overview: &str,
    task_prompt: &str,
) -> String {
    format!(
        "$auto-codex-task\n\
         run_id: {run_id}\n\
         base_ref: {base_ref}\n\
         task_id: {task_id}\n\
         task_title: {task_title}\n\
         goal: {goal}\n\
         \n\
         ## Plan overview\n{plan_overview}\n\
         \n\
         ## Task\n{task_prompt}\n"
    )
}

/// Build a dependency pre-merge prompt.
pub fn build_dependency_merge_prompt(
    run_id: &str,
    task_id: &str,
    dep_branch: &str,
    conflicted_files: &[String],
    context_doc: &str,
) -> String {
    format!(
        "$auto-codex-merge\n\
         run_id: {run_id}\n\
         task_id: {task_id}\n\
         dependency_branch: {dep_branch}\n\
         conflicted_files:\n{}\n\
         \n\
         {context_doc}\n",
        conflicted_files.iter().map(|f| format!("- {f}")).collect::<Vec<_>>().join("\n")
    )
}

/// Build a final-integration merge prompt.
pub fn build_integration_merge_prompt(
    run_id: &str,
    base_branch: &str,
    merging_branch: &str,
    conflicted_files: &[String],
    context_path: &Path,
) -> String {
    format!(
        "$auto-codex-merge\n\
         run_id: {run_id}\n\
         base_branch: {base_branch}\n\
         merging_branch: {merging_branch}\n\
         conflicted_files:\n{}\n\
         context_path: {}\n",
        conflicted_files.iter().map(|f| format!("- {f}")).collect::<Vec<_>>().join("\n"),
        context_path.display()
    )
}
