//! Crate-wide error kinds.
//!
//! One named variant per failure mode, each carrying the structured
//! data a caller needs to render a useful message or branch on the
//! specific cause. Every fallible call site in this crate returns
//! `Result<_, AutoCodexError>` directly rather than a boxed error, so
//! the orchestrator can match on the variant to choose the run's exit
//! code and the summary's fatal-cause line.

use std::fmt;
use std::path::PathBuf;

/// A captured external-process failure: argv, exit status, and both
/// stdio streams. Every adapter that shells out (git, the executor,
/// configured `commands.*`) represents its failures through this shape.
#[derive(Debug, Clone)]
pub struct ProcessFailure {
    pub argv: Vec<String>,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl fmt::Display for ProcessFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = self
            .exit_code
            .map(|c| c.to_string())
            .unwrap_or_else(|| "signal".to_string());
        write!(f, "`{}` exited {code}", self.argv.join(" "))?;
        if !self.stderr.trim().is_empty() {
            write!(f, "\n{}", self.stderr.trim())?;
        }
        Ok(())
    }
}

/// Distinguishes the several causes folded into [`AutoCodexError::Precondition`]
/// so `exit_code()` can pick the cause-appropriate code instead of
/// treating every precondition failure as a dirty base.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreconditionKind {
    /// `start` does not resolve to a git repository.
    NotARepository,
    /// `.auto-codex/config.json` exists but failed to parse.
    InvalidConfig,
    /// The base working copy is not clean at the start of `run`.
    DirtyBase,
    /// A task or merge result document failed schema validation or parsing.
    MalformedResultDocument,
}

#[derive(Debug)]
pub enum AutoCodexError {
    /// Missing tools, dirty base, not in a repository, invalid config.
    /// Fatal before any state change.
    Precondition { kind: PreconditionKind, message: String },

    /// Plan schema or graph violation. Fatal; no tasks run.
    PlanInvalid { message: String },

    /// A task's executor exit was non-zero, or its result document was
    /// absent, unparseable, or not `status: "done"`.
    TaskFailure {
        task_id: String,
        exit_code: Option<i32>,
        detail: String,
    },

    /// Dependency pre-merge left residual conflict markers or unmerged
    /// paths after executor assistance, or the executor's merge call
    /// returned non-zero.
    DependencyMergeFailure {
        task_id: String,
        dep_branch: String,
        detail: String,
    },

    /// Final integration merge failed: residual markers, unmerged
    /// paths, or non-zero executor-assisted merge exit. Already
    /// committed merges on the base are not rolled back.
    IntegrationFailure { branch: String, detail: String },

    /// Placeholder check in `fail` mode matched, or `test` exited
    /// non-zero. Fatal for the run after integration.
    QualityGateFailure { detail: String },

    /// Scheduler observed an empty running set with a non-empty
    /// pending set.
    Deadlock { pending: Vec<String> },

    /// An external process failed outside the specific kinds above.
    Process(ProcessFailure),

    /// Wrapped I/O failure (e.g. failing to write an artifact file).
    Io { path: Option<PathBuf>, source: std::io::Error },
}

impl fmt::Display for AutoCodexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Precondition { message, .. } => write!(f, "precondition failed: {message}"),
            Self::PlanInvalid { message } => write!(f, "invalid plan: {message}"),
            Self::TaskFailure { task_id, exit_code, detail } => write!(
                f,
                "task {task_id} failed (exit {}): {detail}",
                exit_code.map(|c| c.to_string()).unwrap_or_else(|| "none".into())
            ),
            Self::DependencyMergeFailure { task_id, dep_branch, detail } => write!(
                f,
                "task {task_id}: pre-merge of {dep_branch} failed: {detail}"
            ),
            Self::IntegrationFailure { branch, detail } => {
                write!(f, "integration of {branch} failed: {detail}")
            }
            Self::QualityGateFailure { detail } => write!(f, "quality gate failed: {detail}"),
            Self::Deadlock { pending } => {
                write!(f, "scheduler deadlock: pending tasks {:?} have no ready path", pending)
            }
            Self::Process(p) => write!(f, "{p}"),
            Self::Io { path, source } => match path {
                Some(p) => write!(f, "io error at {}: {source}", p.display()),
                None => write!(f, "io error: {source}"),
            },
        }
    }
}

impl std::error::Error for AutoCodexError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<std::io::Error> for AutoCodexError {
    fn from(source: std::io::Error) -> Self {
        Self::Io { path: None, source }
    }
}

/// Exit codes returned by the `acdx` binary. Kept in one place so
/// `main.rs` and integration tests agree on their meaning.
pub mod exit_code {
    pub const SUCCESS: i32 = 0;
    pub const DIRTY_BASE: i32 = 10;
    pub const INVALID_PLAN: i32 = 11;
    pub const DEADLOCK: i32 = 12;
    pub const TASK_FAILURE: i32 = 13;
    pub const MERGE_FAILURE: i32 = 14;
    pub const QUALITY_GATE_FAILURE: i32 = 15;
    pub const GENERIC_FAILURE: i32 = 1;
}

impl AutoCodexError {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Precondition { kind, .. } => match kind {
                PreconditionKind::DirtyBase => exit_code::DIRTY_BASE,
                PreconditionKind::NotARepository
                | PreconditionKind::InvalidConfig
                | PreconditionKind::MalformedResultDocument => exit_code::GENERIC_FAILURE,
            },
            Self::PlanInvalid { .. } => exit_code::INVALID_PLAN,
            Self::Deadlock { .. } => exit_code::DEADLOCK,
            Self::TaskFailure { .. } => exit_code::TASK_FAILURE,
            Self::DependencyMergeFailure { .. } | Self::IntegrationFailure { .. } => {
                exit_code::MERGE_FAILURE
            }
            Self::QualityGateFailure { .. } => exit_code::QUALITY_GATE_FAILURE,
            Self::Process(_) | Self::Io { .. } => exit_code::GENERIC_FAILURE,
        }
    }
}
