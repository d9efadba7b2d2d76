//! The "merge-with-executor-assist" routine shared between dependency
//! pre-merge and final integration: attempt a plain merge; on conflict,
//! hand the conflicted files to the executor, then re-verify before
//! committing. Parameterized over merge flags, commit message, and a
//! context-builder closure.

use std::path::Path;

use crate::error::AutoCodexError;
use crate::git::{has_conflict_markers, MergeMode, Repository};

pub enum MergeAssistOutcome {
    /// The plain merge succeeded with no conflicts. For
    /// [`MergeMode::NoFfNoEdit`] git already created the merge commit;
    /// for [`MergeMode::NoFfNoCommit`] the caller still owes a commit.
    CleanNoConflict,
    /// The merge conflicted and the executor resolved it; this routine
    /// already performed the resulting commit.
    ResolvedByExecutor,
}

/// Invokes the executor given the list of conflicted files, returning
/// its exit code. Implementations write their own prompt/context
/// documents to disk as a side effect before invoking.
pub trait ConflictResolver {
    fn resolve(&mut self, conflicted_files: &[String]) -> Result<Option<i32>, AutoCodexError>;
}

pub fn merge_with_executor_assist(
    repo: &Repository,
    worktree_path: &Path,
    mode: MergeMode,
    ref_to_merge: &str,
    commit_message: &str,
    resolver: &mut dyn ConflictResolver,
    fail: impl Fn(String) -> AutoCodexError,
) -> Result<MergeAssistOutcome, AutoCodexError> {
    let outcome = repo.merge(worktree_path, ref_to_merge, mode)?;
    if outcome.is_success() {
        return Ok(MergeAssistOutcome::CleanNoConflict);
    }

    let conflicted = repo.unmerged_paths(worktree_path)?;
    if conflicted.is_empty() {
        repo.merge_abort(worktree_path);
        return Err(fail(format!(
            "merge of {ref_to_merge} failed with no conflicted paths: {}",
            outcome.stderr.trim()
        )));
    }

    // Capture original file contents so the marker re-scan below only
    // looks at files git itself flagged as conflicted.
    let originals: Vec<(String, String)> = conflicted
        .iter()
        .map(|f| {
            let text = std::fs::read_to_string(worktree_path.join(f)).unwrap_or_default();
            (f.clone(), text)
        })
        .collect();

    let exit_code = resolver.resolve(&conflicted)?;
    if exit_code != Some(0) {
        repo.merge_abort(worktree_path);
        return Err(fail(format!(
            "executor-assisted merge of {ref_to_merge} exited {:?}",
            exit_code
        )));
    }

    for (file, _) in &originals {
        let text = std::fs::read_to_string(worktree_path.join(file)).unwrap_or_default();
        if has_conflict_markers(&text) {
            repo.merge_abort(worktree_path);
            return Err(fail(format!("conflict markers remain in {file} after executor assistance")));
        }
    }

    repo.add_all(worktree_path)?;
    let still_unmerged = repo.unmerged_paths(worktree_path)?;
    if !still_unmerged.is_empty() {
        repo.merge_abort(worktree_path);
        return Err(fail(format!("paths still unmerged after executor assistance: {still_unmerged:?}")));
    }

    repo.commit_no_verify(worktree_path, commit_message)?;
    Ok(MergeAssistOutcome::ResolvedByExecutor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;

    fn run_git(dir: &Path, args: &[&str]) {
        assert!(Command::new("git").args(args).current_dir(dir).status().unwrap().success());
    }

    fn init_repo(dir: &Path) {
        run_git(dir, &["init", "-q", "-b", "main"]);
        run_git(dir, &["config", "user.email", "test@example.com"]);
        run_git(dir, &["config", "user.name", "Test"]);
        std::fs::write(dir.join("file.txt"), "base\n").unwrap();
        run_git(dir, &["add", "-A"]);
        run_git(dir, &["commit", "-q", "-m", "init"]);
    }

    struct NeverCalled;
    impl ConflictResolver for NeverCalled {
        fn resolve(&mut self, _conflicted_files: &[String]) -> Result<Option<i32>, AutoCodexError> {
            panic!("resolver should not run for a conflict-free merge");
        }
    }

    #[test]
    fn clean_merge_never_invokes_resolver() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());
        let repo = Repository::at(dir.path()).unwrap();

        run_git(dir.path(), &["checkout", "-q", "-b", "feature"]);
        std::fs::write(dir.path().join("other.txt"), "new\n").unwrap();
        run_git(dir.path(), &["add", "-A"]);
        run_git(dir.path(), &["commit", "-q", "-m", "add other.txt"]);
        run_git(dir.path(), &["checkout", "-q", "main"]);

        let mut resolver = NeverCalled;
        let outcome = merge_with_executor_assist(
            &repo,
            dir.path(),
            MergeMode::NoFfNoEdit,
            "feature",
            "merge feature",
            &mut resolver,
            |detail| AutoCodexError::IntegrationFailure { branch: "feature".to_string(), detail },
        )
        .unwrap();

        assert!(matches!(outcome, MergeAssistOutcome::CleanNoConflict));
        assert!(dir.path().join("other.txt").exists());
    }

    struct FixUpResolver<'a> {
        worktree_path: &'a Path,
    }
    impl ConflictResolver for FixUpResolver<'_> {
        fn resolve(&mut self, conflicted_files: &[String]) -> Result<Option<i32>, AutoCodexError> {
            for file in conflicted_files {
                std::fs::write(self.worktree_path.join(file), "resolved\n").unwrap();
            }
            Ok(Some(0))
        }
    }

    #[test]
    fn conflicting_merge_resolved_by_executor_commits() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());
        let repo = Repository::at(dir.path()).unwrap();

        run_git(dir.path(), &["checkout", "-q", "-b", "feature"]);
        std::fs::write(dir.path().join("file.txt"), "feature\n").unwrap();
        run_git(dir.path(), &["add", "-A"]);
        run_git(dir.path(), &["commit", "-q", "-m", "change on feature"]);
        run_git(dir.path(), &["checkout", "-q", "main"]);
        std::fs::write(dir.path().join("file.txt"), "main\n").unwrap();
        run_git(dir.path(), &["add", "-A"]);
        run_git(dir.path(), &["commit", "-q", "-m", "change on main"]);

        let mut resolver = FixUpResolver { worktree_path: dir.path() };
        let outcome = merge_with_executor_assist(
            &repo,
            dir.path(),
            MergeMode::NoFfNoEdit,
            "feature",
            "merge feature",
            &mut resolver,
            |detail| AutoCodexError::IntegrationFailure { branch: "feature".to_string(), detail },
        )
        .unwrap();

        assert!(matches!(outcome, MergeAssistOutcome::ResolvedByExecutor));
        assert_eq!(std::fs::read_to_string(dir.path().join("file.txt")).unwrap(), "resolved\n");
        assert!(repo.is_clean().unwrap());
    }

    struct GivesUpResolver;
    impl ConflictResolver for GivesUpResolver {
        fn resolve(&mut self, _conflicted_files: &[String]) -> Result<Option<i32>, AutoCodexError> {
            Ok(Some(1))
        }
    }

    #[test]
    fn resolver_failure_aborts_the_merge() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());
        let repo = Repository::at(dir.path()).unwrap();

        run_git(dir.path(), &["checkout", "-q", "-b", "feature"]);
        std::fs::write(dir.path().join("file.txt"), "feature\n").unwrap();
        run_git(dir.path(), &["add", "-A"]);
        run_git(dir.path(), &["commit", "-q", "-m", "change on feature"]);
        run_git(dir.path(), &["checkout", "-q", "main"]);
        std::fs::write(dir.path().join("file.txt"), "main\n").unwrap();
        run_git(dir.path(), &["add", "-A"]);
        run_git(dir.path(), &["commit", "-q", "-m", "change on main"]);

        let mut resolver = GivesUpResolver;
        let result = merge_with_executor_assist(
            &repo,
            dir.path(),
            MergeMode::NoFfNoEdit,
            "feature",
            "merge feature",
            &mut resolver,
            |detail| AutoCodexError::IntegrationFailure { branch: "feature".to_string(), detail },
        );

        assert!(result.is_err());
        assert!(repo.is_clean().unwrap(), "an aborted merge must leave the worktree clean");
    }

    struct LeavesMarkersResolver;
    impl ConflictResolver for LeavesMarkersResolver {
        fn resolve(&mut self, _conflicted_files: &[String]) -> Result<Option<i32>, AutoCodexError> {
            // Exits 0 but never actually touches the conflicted file, so
            // git's own conflict markers are still in the tree.
            Ok(Some(0))
        }
    }

    #[test]
    fn residual_conflict_markers_after_zero_exit_still_abort() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());
        let repo = Repository::at(dir.path()).unwrap();

        run_git(dir.path(), &["checkout", "-q", "-b", "feature"]);
        std::fs::write(dir.path().join("file.txt"), "feature\n").unwrap();
        run_git(dir.path(), &["add", "-A"]);
        run_git(dir.path(), &["commit", "-q", "-m", "change on feature"]);
        run_git(dir.path(), &["checkout", "-q", "main"]);
        std::fs::write(dir.path().join("file.txt"), "main\n").unwrap();
        run_git(dir.path(), &["add", "-A"]);
        run_git(dir.path(), &["commit", "-q", "-m", "change on main"]);

        let mut resolver = LeavesMarkersResolver;
        let result = merge_with_executor_assist(
            &repo,
            dir.path(),
            MergeMode::NoFfNoEdit,
            "feature",
            "merge feature",
            &mut resolver,
            |detail| AutoCodexError::IntegrationFailure { branch: "feature".to_string(), detail },
        );

        assert!(result.is_err(), "an executor that exits 0 but leaves markers must still fail the merge");
        assert!(repo.is_clean().unwrap(), "the merge must be aborted, not left half-resolved");
    }
}
