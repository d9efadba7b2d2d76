//! DAG-aware bounded worker pool.
//!
//! Grounded in this project's flat-parallelism work-item pattern (a
//! `crossbeam-channel` of completions drained by one coordinator) but
//! adapted from dispatch-everything-up-front to readiness-gated launch
//! control: the coordinator decides what to promote and when, rather
//! than handing the whole task list to a parallel iterator at once.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crossbeam_channel as chan;

use crate::artifacts::TaskResult;
use crate::error::AutoCodexError;
use crate::plan::Plan;

/// A completion message sent from a task-runner thread back to the
/// coordinator. The only mutable scheduling state lives on the
/// coordinator; task-runner threads never touch pending/running/done
/// directly.
enum Completion {
    Finished { task_id: String, result: Box<TaskResult> },
    Errored { task_id: String, error: String },
}

/// Runs `plan`'s tasks to completion, launching ready tasks up to
/// `workers` in parallel, in ascending-id order among simultaneously
/// ready tasks. `run_one` is called from a worker thread for exactly
/// one task and must not mutate shared scheduling state itself.
pub fn run<F>(plan: &Plan, workers: usize, run_one: F) -> Result<BTreeMap<String, TaskResult>, AutoCodexError>
where
    F: Fn(&str) -> Result<TaskResult, AutoCodexError> + Send + Sync + 'static,
{
    let workers = crate::config::Config::clamp_workers(workers);
    let run_one = Arc::new(run_one);

    let mut pending: BTreeSet<String> = plan.tasks.keys().cloned().collect();
    let mut running: BTreeSet<String> = BTreeSet::new();
    let mut done: BTreeSet<String> = BTreeSet::new();
    let mut results: BTreeMap<String, TaskResult> = BTreeMap::new();
    let mut launching_stopped = false;
    let mut fatal: Option<AutoCodexError> = None;

    let (tx, rx) = chan::unbounded::<Completion>();
    let mut handles = Vec::new();

    loop {
        if !launching_stopped {
            let ready: Vec<String> = pending
                .iter()
                .filter(|id| {
                    plan.tasks
                        .get(*id)
                        .map(|t| t.depends_on.iter().all(|d| done.contains(d)))
                        .unwrap_or(false)
                })
                .cloned()
                .collect();

            for id in ready {
                if running.len() >= workers {
                    break;
                }
                pending.remove(&id);
                running.insert(id.clone());

                let tx = tx.clone();
                let run_one = Arc::clone(&run_one);
                let task_id = id.clone();
                let handle = std::thread::spawn(move || {
                    let message = match run_one(&task_id) {
                        Ok(result) => Completion::Finished { task_id: task_id.clone(), result: Box::new(result) },
                        Err(e) => Completion::Errored { task_id: task_id.clone(), error: e.to_string() },
                    };
                    let _ = tx.send(message);
                });
                handles.push(handle);
            }
        }

        if running.is_empty() && pending.is_empty() {
            break;
        }

        if running.is_empty() && !pending.is_empty() {
            return Err(AutoCodexError::Deadlock { pending: pending.into_iter().collect() });
        }

        match rx.recv() {
            Ok(Completion::Finished { task_id, result }) => {
                running.remove(&task_id);
                let success = result.is_success();
                results.insert(task_id.clone(), *result);
                if success {
                    done.insert(task_id);
                } else if !launching_stopped {
                    launching_stopped = true;
                    pending.clear();
                    if fatal.is_none() {
                        fatal = Some(AutoCodexError::TaskFailure {
                            task_id: task_id.clone(),
                            exit_code: results.get(&task_id).and_then(|r| r.exit_code),
                            detail: "task exited non-zero or produced an invalid result".to_string(),
                        });
                    }
                }
            }
            Ok(Completion::Errored { task_id, error }) => {
                running.remove(&task_id);
                if !launching_stopped {
                    launching_stopped = true;
                    pending.clear();
                    if fatal.is_none() {
                        fatal = Some(AutoCodexError::TaskFailure { task_id, exit_code: None, detail: error });
                    }
                }
            }
            Err(_) => break,
        }
    }

    for handle in handles {
        let _ = handle.join();
    }

    if let Some(err) = fatal {
        return Err(err);
    }

    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::TaskResult;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn plan_with(tasks_json: &str) -> Plan {
        let json = format!(r#"{{"title":"t","overview":"o","tasks":{tasks_json}}}"#);
        crate::plan::parse_and_validate(&json).unwrap()
    }

    fn ok_result(id: &str) -> TaskResult {
        TaskResult {
            task_id: id.to_string(),
            branch: format!("acdx/run/{id}"),
            worktree_path: PathBuf::from("/tmp"),
            exit_code: Some(0),
            commit_sha: Some("abc".into()),
            result_json_path: PathBuf::from("/tmp/r.json"),
            log_path: PathBuf::from("/tmp/r.log"),
            summary: Some("ok".into()),
            notes: None,
        }
    }

    #[test]
    fn independent_pair_both_complete() {
        let plan = plan_with(
            r#"[
                {"id":"T01","title":"a","prompt":"p","depends_on":[]},
                {"id":"T02","title":"b","prompt":"p","depends_on":[]}
            ]"#,
        );
        let results = run(&plan, 2, |id| Ok(ok_result(id))).unwrap();
        assert_eq!(results.len(), 2);
        assert!(results["T01"].is_success());
        assert!(results["T02"].is_success());
    }

    #[test]
    fn bounded_parallelism_never_exceeds_workers() {
        let plan = plan_with(
            r#"[
                {"id":"T01","title":"a","prompt":"p","depends_on":[]},
                {"id":"T02","title":"b","prompt":"p","depends_on":[]},
                {"id":"T03","title":"c","prompt":"p","depends_on":[]}
            ]"#,
        );
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));
        let in_flight2 = Arc::clone(&in_flight);
        let max_seen2 = Arc::clone(&max_seen);
        let results = run(&plan, 1, move |id| {
            let now = in_flight2.fetch_add(1, Ordering::SeqCst) + 1;
            max_seen2.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(std::time::Duration::from_millis(5));
            in_flight2.fetch_sub(1, Ordering::SeqCst);
            Ok(ok_result(id))
        })
        .unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn task_failure_drains_in_flight_and_skips_pending() {
        let plan = plan_with(
            r#"[
                {"id":"T01","title":"a","prompt":"p","depends_on":[]},
                {"id":"T02","title":"b","prompt":"p","depends_on":[]},
                {"id":"T03","title":"c","prompt":"p","depends_on":[]}
            ]"#,
        );
        let result = run(&plan, 3, |id| {
            if id == "T02" {
                let mut r = ok_result(id);
                r.exit_code = Some(1);
                r.commit_sha = None;
                Ok(r)
            } else {
                Ok(ok_result(id))
            }
        });
        assert!(result.is_err());
    }

    #[test]
    fn deadlock_detected_for_unsatisfiable_pending() {
        // A graph that validation would normally reject; constructed
        // directly here to exercise the scheduler's own deadlock path.
        let mut plan = plan_with(r#"[{"id":"T01","title":"a","prompt":"p","depends_on":[]}]"#);
        plan.tasks.get_mut("T01").unwrap().depends_on.push("T02".to_string());
        plan.topo_order.clear();
        let result = run(&plan, 1, |id| Ok(ok_result(id)));
        assert!(result.is_err());
    }
}
