//! Parsing and schema validation for the documents the executor writes
//! to `results/<taskId>.json` and `merge/merge-<taskId>.json`.

use serde::Deserialize;

use crate::error::{AutoCodexError, PreconditionKind};

pub const TASK_SCHEMA: &str = include_str!("../schemas/task.schema.json");
pub const MERGE_SCHEMA: &str = include_str!("../schemas/merge.schema.json");

#[derive(Debug, Clone, Deserialize)]
pub struct TaskExecutorResult {
    pub status: String,
    pub summary: String,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MergeExecutorResult {
    pub status: String,
    #[serde(default)]
    pub notes: Option<String>,
}

fn validate(schema_text: &str, json_text: &str) -> Result<serde_json::Value, String> {
    let instance: serde_json::Value =
        serde_json::from_str(json_text).map_err(|e| format!("malformed result JSON: {e}"))?;
    let schema: serde_json::Value =
        serde_json::from_str(schema_text).expect("embedded result schema is valid JSON");
    let validator =
        jsonschema::validator_for(&schema).map_err(|e| format!("embedded schema is invalid: {e}"))?;
    let errors: Vec<String> = validator.iter_errors(&instance).map(|e| e.to_string()).collect();
    if !errors.is_empty() {
        return Err(format!("result failed schema validation: {}", errors.join("; ")));
    }
    Ok(instance)
}

/// Read and validate a task result document. An absent or unparseable
/// file, or a `status` other than `"done"`, is a structural failure —
/// this is equivalent to a non-zero executor exit code.
pub fn read_task_result(path: &std::path::Path) -> Result<TaskExecutorResult, String> {
    let text = std::fs::read_to_string(path).map_err(|e| format!("missing result file: {e}"))?;
    validate(TASK_SCHEMA, &text)?;
    let parsed: TaskExecutorResult =
        serde_json::from_str(&text).map_err(|e| format!("malformed result JSON: {e}"))?;
    if parsed.status != "done" {
        return Err(format!("result status {:?} is not \"done\"", parsed.status));
    }
    Ok(parsed)
}

pub fn read_merge_result(path: &std::path::Path) -> Result<MergeExecutorResult, AutoCodexError> {
    let text = std::fs::read_to_string(path)?;
    let parsed: MergeExecutorResult = validate(MERGE_SCHEMA, &text)
        .map_err(|message| AutoCodexError::Precondition { kind: PreconditionKind::MalformedResultDocument, message })
        .and_then(|_| {
            serde_json::from_str(&text).map_err(|e| AutoCodexError::Precondition {
                kind: PreconditionKind::MalformedResultDocument,
                message: format!("malformed merge result: {e}"),
            })
        })?;
    Ok(parsed)
}
