//! Thin wrapper over the Git operations the orchestrator needs.
//!
//! Everything here shells out to `git` through [`crate::process`]. The
//! repository root is resolved once and cached on the handle; nothing
//! else is memoized, since every other call here already costs a
//! subprocess and there is no hot path that repeats an unchanged query
//! the way a long-lived interactive CLI would.

use std::path::{Path, PathBuf};

use crate::error::{AutoCodexError, PreconditionKind};
use crate::process::{self, OnFailure, RunSpec};

/// The two merge invocations the orchestrator uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeMode {
    /// `merge --no-ff --no-edit`, used for dependency pre-merge.
    NoFfNoEdit,
    /// `merge --no-ff --no-commit`, used for final integration.
    NoFfNoCommit,
}

impl MergeMode {
    fn flags(self) -> &'static [&'static str] {
        match self {
            MergeMode::NoFfNoEdit => &["--no-ff", "--no-edit"],
            MergeMode::NoFfNoCommit => &["--no-ff", "--no-commit"],
        }
    }
}

/// Outcome of a `merge()` call: a captured exit code plus output, never
/// an error by itself — a non-zero merge is an expected branch the
/// caller inspects (conflict vs. hard failure), not an `Err`.
pub struct MergeOutcome {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl MergeOutcome {
    pub fn is_success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

pub struct Repository {
    root: PathBuf,
}

impl Repository {
    /// Resolve the repository root from `start` (or the current
    /// directory). Fails as [`AutoCodexError::Precondition`] if not
    /// inside a repository.
    pub fn discover(start: Option<&Path>) -> Result<Self, AutoCodexError> {
        let cwd = match start {
            Some(p) => p.to_path_buf(),
            None => std::env::current_dir()?,
        };
        let out = process::run_capture(
            "git.root",
            RunSpec {
                argv: &["git", "rev-parse", "--show-toplevel"],
                cwd: Some(&cwd),
                env: &[],
                timeout: None,
                on_failure: OnFailure::Return,
                stdin: None,
            },
        )?;
        if out.exit_code != Some(0) {
            return Err(AutoCodexError::Precondition {
                kind: PreconditionKind::NotARepository,
                message: format!("{} is not inside a git repository", cwd.display()),
            });
        }
        Ok(Self { root: PathBuf::from(out.stdout.trim()) })
    }

    pub fn at(path: &Path) -> Result<Self, AutoCodexError> {
        Self::discover(Some(path))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn run(&self, context: &str, args: &[&str]) -> Result<process::CapturedOutput, AutoCodexError> {
        process::run_capture(
            context,
            RunSpec {
                argv: &prepend_git(args),
                cwd: Some(&self.root),
                env: &[],
                timeout: None,
                on_failure: OnFailure::Raise,
                stdin: None,
            },
        )
    }

    fn run_at(
        &self,
        context: &str,
        cwd: &Path,
        args: &[&str],
        on_failure: OnFailure,
    ) -> Result<process::CapturedOutput, AutoCodexError> {
        process::run_capture(
            context,
            RunSpec {
                argv: &prepend_git(args),
                cwd: Some(cwd),
                env: &[],
                timeout: None,
                on_failure,
                stdin: None,
            },
        )
    }

    pub fn current_branch(&self) -> Result<String, AutoCodexError> {
        let out = self.run("git.current_branch", &["rev-parse", "--abbrev-ref", "HEAD"])?;
        Ok(out.stdout.trim().to_string())
    }

    /// True iff `git status --porcelain` is empty at the repository root.
    pub fn is_clean(&self) -> Result<bool, AutoCodexError> {
        self.is_clean_at(&self.root)
    }

    /// True iff `git status --porcelain` is empty at an arbitrary
    /// worktree path (used by the task runner, which checks cleanliness
    /// inside each task's own worktree rather than the repo root).
    pub fn is_clean_at(&self, worktree_path: &Path) -> Result<bool, AutoCodexError> {
        let out = self.run_at("git.is_clean", worktree_path, &["status", "--porcelain"], OnFailure::Raise)?;
        Ok(out.stdout.trim().is_empty())
    }

    /// Create `new_branch` at `base_ref` and materialize a worktree at
    /// `path`.
    pub fn worktree_add(
        &self,
        base_ref: &str,
        new_branch: &str,
        path: &Path,
    ) -> Result<(), AutoCodexError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let path_str = path.to_string_lossy().into_owned();
        self.run(
            "git.worktree_add",
            &["worktree", "add", "-b", new_branch, &path_str, base_ref],
        )?;
        Ok(())
    }

    pub fn worktree_remove(&self, path: &Path) -> Result<(), AutoCodexError> {
        let path_str = path.to_string_lossy().into_owned();
        self.run("git.worktree_remove", &["worktree", "remove", "--force", &path_str])?;
        Ok(())
    }

    pub fn branch_delete(&self, name: &str) -> Result<(), AutoCodexError> {
        self.run("git.branch_delete", &["branch", "-D", name])?;
        Ok(())
    }

    /// Merge `ref_` into the worktree at `worktree_path` using `mode`.
    /// Never raises on a non-zero exit: conflicts are an expected
    /// outcome the caller must inspect via `unmerged_paths`.
    pub fn merge(
        &self,
        worktree_path: &Path,
        ref_: &str,
        mode: MergeMode,
    ) -> Result<MergeOutcome, AutoCodexError> {
        let mut args = vec!["merge"];
        args.extend_from_slice(mode.flags());
        args.push(ref_);
        let out = self.run_at("git.merge", worktree_path, &args, OnFailure::Return)?;
        Ok(MergeOutcome { exit_code: out.exit_code, stdout: out.stdout, stderr: out.stderr })
    }

    /// Best-effort abort; failures are swallowed since the caller is
    /// already on a failing path and an abort failure shouldn't mask
    /// the original cause.
    pub fn merge_abort(&self, worktree_path: &Path) {
        let _ = self.run_at("git.merge_abort", worktree_path, &["merge", "--abort"], OnFailure::Return);
    }

    /// Files still marked unmerged, from `diff --name-only --diff-filter=U`.
    pub fn unmerged_paths(&self, worktree_path: &Path) -> Result<Vec<String>, AutoCodexError> {
        let out = self.run_at(
            "git.unmerged_paths",
            worktree_path,
            &["diff", "--name-only", "--diff-filter=U"],
            OnFailure::Raise,
        )?;
        Ok(out.stdout.lines().map(str::to_string).filter(|l| !l.is_empty()).collect())
    }

    pub fn add_all(&self, worktree_path: &Path) -> Result<(), AutoCodexError> {
        self.run_at("git.add_all", worktree_path, &["add", "-A"], OnFailure::Raise)?;
        Ok(())
    }

    /// Commit with `--no-verify`. Callers only call this once they know
    /// the worktree is dirty or mid-merge; an empty-tree commit attempt
    /// is a caller bug, not something this wrapper guards against.
    pub fn commit_no_verify(&self, worktree_path: &Path, message: &str) -> Result<(), AutoCodexError> {
        self.run_at("git.commit", worktree_path, &["commit", "--no-verify", "-m", message], OnFailure::Raise)?;
        Ok(())
    }

    pub fn head_sha(&self, worktree_path: &Path) -> Result<String, AutoCodexError> {
        let out = self.run_at("git.head_sha", worktree_path, &["rev-parse", "HEAD"], OnFailure::Raise)?;
        Ok(out.stdout.trim().to_string())
    }

    /// Files that differ between `from` and `to` (`diff --name-only`).
    /// Used to derive the full set of files an integration run touched,
    /// across both clean and executor-assisted merges.
    pub fn diff_name_only(
        &self,
        worktree_path: &Path,
        from: &str,
        to: &str,
    ) -> Result<Vec<String>, AutoCodexError> {
        let range = format!("{from}..{to}");
        let out =
            self.run_at("git.diff_name_only", worktree_path, &["diff", "--name-only", &range], OnFailure::Raise)?;
        Ok(out.stdout.lines().map(str::to_string).filter(|l| !l.is_empty()).collect())
    }

    /// Append `.auto-codex/runs/` and `.auto-codex/worktrees/` to the
    /// repository's local ignore file (`.git/info/exclude`), once.
    pub fn ensure_local_excludes(&self) -> Result<(), AutoCodexError> {
        let common_dir_out = self.run("git.common_dir", &["rev-parse", "--git-common-dir"])?;
        let exclude_path = self.root.join(common_dir_out.stdout.trim()).join("info/exclude");
        if let Some(parent) = exclude_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let existing = std::fs::read_to_string(&exclude_path).unwrap_or_default();
        let mut to_append = Vec::new();
        for line in [".auto-codex/runs/", ".auto-codex/worktrees/"] {
            if !existing.lines().any(|l| l.trim() == line) {
                to_append.push(line);
            }
        }
        if !to_append.is_empty() {
            use std::io::Write;
            let mut f = std::fs::OpenOptions::new().create(true).append(true).open(&exclude_path)?;
            for line in to_append {
                writeln!(f, "{line}")?;
            }
        }
        Ok(())
    }
}

fn prepend_git<'a>(args: &[&'a str]) -> Vec<&'a str> {
    let mut v = Vec::with_capacity(args.len() + 1);
    v.push("git");
    v.extend_from_slice(args);
    v
}

/// Scan `text` for unresolved conflict markers (`<<<<<<<`, `=======`,
/// `>>>>>>>` at line start).
pub fn has_conflict_markers(text: &str) -> bool {
    static MARKERS: once_cell::sync::Lazy<regex::Regex> = once_cell::sync::Lazy::new(|| {
        regex::Regex::new(r"(?m)^(<{7}|={7}|>{7})").unwrap()
    });
    MARKERS.is_match(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;

    fn init_repo(dir: &Path) {
        Command::new("git").args(["init", "-q"]).current_dir(dir).status().unwrap();
        Command::new("git").args(["config", "user.email", "test@example.com"]).current_dir(dir).status().unwrap();
        Command::new("git").args(["config", "user.name", "Test"]).current_dir(dir).status().unwrap();
        std::fs::write(dir.join("README.md"), "hello\n").unwrap();
        Command::new("git").args(["add", "-A"]).current_dir(dir).status().unwrap();
        Command::new("git").args(["commit", "-q", "-m", "init"]).current_dir(dir).status().unwrap();
    }

    #[test]
    fn discover_and_is_clean() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());
        let repo = Repository::at(dir.path()).unwrap();
        assert!(repo.is_clean().unwrap());
        std::fs::write(dir.path().join("README.md"), "changed\n").unwrap();
        assert!(!repo.is_clean().unwrap());
    }

    #[test]
    fn discover_fails_outside_repo() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Repository::at(dir.path()).is_err());
    }

    #[test]
    fn worktree_add_creates_branch_and_path() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());
        let repo = Repository::at(dir.path()).unwrap();
        let wt_path = dir.path().join("wt-t01");
        repo.worktree_add("HEAD", "acdx/run1/T01", &wt_path).unwrap();
        assert!(wt_path.join("README.md").exists());
        let head = repo.head_sha(&wt_path).unwrap();
        assert_eq!(head.len(), 40);
    }

    #[test]
    fn conflict_marker_detection() {
        assert!(has_conflict_markers("<<<<<<< HEAD\nfoo\n=======\nbar\n>>>>>>> branch\n"));
        assert!(!has_conflict_markers("no markers here"));
    }
}
