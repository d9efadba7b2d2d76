//! `RunId` generation and branch-name sanitization.

use std::sync::atomic::{AtomicU32, Ordering};

/// A locally-unique identifier for one invocation: a wall-clock
/// timestamp plus a short random-ish suffix. Only needs local
/// uniqueness (two runs in the same process, or in quick succession),
/// not cryptographic strength, so the suffix is drawn from the process
/// id and a process-local counter rather than a new RNG dependency.
pub fn generate() -> String {
    let now = chrono::Local::now();
    let timestamp = now.format("%Y%m%d-%H%M%S");
    let suffix = suffix();
    format!("{timestamp}-{suffix}")
}

fn suffix() -> String {
    static COUNTER: AtomicU32 = AtomicU32::new(0);
    let pid = std::process::id();
    let seq = COUNTER.fetch_add(1, Ordering::SeqCst);
    let mix = pid.wrapping_mul(2_654_435_761).wrapping_add(seq);
    format!("{:06x}", mix & 0xff_ffff)
}

/// Sanitize a RunId for embedding in a branch name: preserve
/// `[A-Za-z0-9._-]`, replace everything else with `-`.
pub fn sanitize(run_id: &str) -> String {
    run_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') { c } else { '-' })
        .collect()
}

/// Compute the branch name `acdx/<sanitizedRunId>/<taskId>`.
pub fn branch_name(run_id: &str, task_id: &str) -> String {
    format!("acdx/{}/{}", sanitize(run_id), task_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_replaces_disallowed_chars() {
        assert_eq!(sanitize("2026/07/28 run!"), "2026-07-28-run-");
        assert_eq!(sanitize("fine-run_1.2"), "fine-run_1.2");
    }

    #[test]
    fn branch_name_matches_pattern() {
        let name = branch_name("run id", "T01");
        let re = regex::Regex::new(r"^acdx/[A-Za-z0-9._-]+/T\d{2}$").unwrap();
        assert!(re.is_match(&name), "{name} did not match");
    }

    #[test]
    fn generated_run_ids_are_distinct() {
        let a = generate();
        let b = generate();
        assert_ne!(a, b);
    }
}
