//! Plan document parsing, schema validation, and deterministic
//! topological ordering.

use std::collections::{BTreeMap, BTreeSet};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::AutoCodexError;

/// Embedded at build time from the checked-in schema file so the
/// validator never drifts from what gets written to a repository's
/// `.auto-codex/schemas/plan.schema.json`.
pub const PLAN_SCHEMA: &str = include_str!("../schemas/plan.schema.json");

static TASK_ID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^T\d{2}$").unwrap());

#[derive(Debug, Clone, Serialize, Deserialize, schemars::JsonSchema)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub prompt: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, schemars::JsonSchema)]
pub struct PlanDocument {
    pub title: String,
    pub overview: String,
    #[serde(default)]
    pub merge_notes: Option<String>,
    pub tasks: Vec<Task>,
}

/// A validated plan: the parsed document plus its deterministic
/// topological order.
#[derive(Debug, Clone)]
pub struct Plan {
    pub title: String,
    pub overview: String,
    pub merge_notes: Option<String>,
    pub tasks: BTreeMap<String, Task>,
    /// Ids in deterministic topological order.
    pub topo_order: Vec<String>,
}

fn invalid(message: impl Into<String>) -> AutoCodexError {
    AutoCodexError::PlanInvalid { message: message.into() }
}

/// Parse and validate a plan document's JSON text against the embedded
/// schema, then the structural rules.
pub fn parse_and_validate(json_text: &str) -> Result<Plan, AutoCodexError> {
    validate_against_schema(json_text)?;

    let doc: PlanDocument =
        serde_json::from_str(json_text).map_err(|e| invalid(format!("malformed plan JSON: {e}")))?;

    validate_document(doc)
}

fn validate_against_schema(json_text: &str) -> Result<(), AutoCodexError> {
    let instance: serde_json::Value =
        serde_json::from_str(json_text).map_err(|e| invalid(format!("malformed plan JSON: {e}")))?;
    let schema: serde_json::Value =
        serde_json::from_str(PLAN_SCHEMA).expect("embedded plan schema is valid JSON");
    let validator = jsonschema::validator_for(&schema)
        .map_err(|e| invalid(format!("embedded plan schema is invalid: {e}")))?;
    let errors: Vec<String> = validator.iter_errors(&instance).map(|e| e.to_string()).collect();
    if !errors.is_empty() {
        return Err(invalid(format!("plan document failed schema validation: {}", errors.join("; "))));
    }
    Ok(())
}

fn validate_document(doc: PlanDocument) -> Result<Plan, AutoCodexError> {
    // Rule 1: tasks is a non-empty list.
    if doc.tasks.is_empty() {
        return Err(invalid("plan must contain at least one task"));
    }

    // Rule 2: id shape + uniqueness.
    let mut tasks = BTreeMap::new();
    for task in doc.tasks {
        if !TASK_ID_RE.is_match(&task.id) {
            return Err(invalid(format!("task id {:?} does not match T\\d{{2}}", task.id)));
        }
        if tasks.contains_key(&task.id) {
            return Err(invalid(format!("duplicate task id {:?}", task.id)));
        }
        tasks.insert(task.id.clone(), task);
    }

    // Rule 3: depends_on references, no self-dependency.
    for task in tasks.values() {
        for dep in &task.depends_on {
            if dep == &task.id {
                return Err(invalid(format!("task {:?} depends on itself", task.id)));
            }
            if !tasks.contains_key(dep) {
                return Err(invalid(format!(
                    "task {:?} depends on unknown task {:?}",
                    task.id, dep
                )));
            }
        }
    }

    // Rule 4: deterministic topological sort, cycle detection.
    let topo_order = topological_order(&tasks)?;

    Ok(Plan { title: doc.title, overview: doc.overview, merge_notes: doc.merge_notes, tasks, topo_order })
}

/// Repeatedly pop the lexicographically smallest ready node (all its
/// dependencies already consumed); push its children onto the ready
/// set as they become satisfiable. Fails with a cycle error if not all
/// nodes are consumed.
fn topological_order(tasks: &BTreeMap<String, Task>) -> Result<Vec<String>, AutoCodexError> {
    let mut remaining_deps: BTreeMap<String, BTreeSet<String>> = tasks
        .iter()
        .map(|(id, task)| (id.clone(), task.depends_on.iter().cloned().collect()))
        .collect();

    // children[x] = tasks that depend on x
    let mut children: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (id, task) in tasks {
        for dep in &task.depends_on {
            children.entry(dep.clone()).or_default().push(id.clone());
        }
    }

    let mut ready: BTreeSet<String> = remaining_deps
        .iter()
        .filter(|(_, deps)| deps.is_empty())
        .map(|(id, _)| id.clone())
        .collect();

    let mut order = Vec::with_capacity(tasks.len());
    while let Some(next) = ready.iter().next().cloned() {
        ready.remove(&next);
        order.push(next.clone());
        remaining_deps.remove(&next);
        if let Some(kids) = children.get(&next) {
            for kid in kids {
                if let Some(deps) = remaining_deps.get_mut(kid) {
                    deps.remove(&next);
                    if deps.is_empty() {
                        ready.insert(kid.clone());
                    }
                }
            }
        }
    }

    if order.len() != tasks.len() {
        let stuck: Vec<String> = remaining_deps.keys().cloned().collect();
        return Err(invalid(format!("dependency cycle detected among tasks {stuck:?}")));
    }

    Ok(order)
}

impl Plan {
    /// For every task, all of its dependencies occur at a strictly
    /// earlier position in `topo_order`.
    pub fn position_of(&self, id: &str) -> Option<usize> {
        self.topo_order.iter().position(|x| x == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan_json(tasks: &str) -> String {
        format!(r#"{{"title":"t","overview":"o","tasks":{tasks}}}"#)
    }

    #[test]
    fn single_task_no_deps() {
        let json = plan_json(r#"[{"id":"T01","title":"a","prompt":"p","depends_on":[]}]"#);
        let plan = parse_and_validate(&json).unwrap();
        assert_eq!(plan.topo_order, vec!["T01".to_string()]);
    }

    #[test]
    fn linear_chain_orders_by_dependency() {
        let json = plan_json(
            r#"[
                {"id":"T03","title":"c","prompt":"p","depends_on":["T02"]},
                {"id":"T01","title":"a","prompt":"p","depends_on":[]},
                {"id":"T02","title":"b","prompt":"p","depends_on":["T01"]}
            ]"#,
        );
        let plan = parse_and_validate(&json).unwrap();
        assert_eq!(plan.topo_order, vec!["T01".to_string(), "T02".to_string(), "T03".to_string()]);
        assert!(plan.position_of("T01") < plan.position_of("T02"));
        assert!(plan.position_of("T02") < plan.position_of("T03"));
    }

    #[test]
    fn independent_tasks_ordered_ascending_by_id() {
        let json = plan_json(
            r#"[
                {"id":"T02","title":"b","prompt":"p","depends_on":[]},
                {"id":"T01","title":"a","prompt":"p","depends_on":[]}
            ]"#,
        );
        let plan = parse_and_validate(&json).unwrap();
        assert_eq!(plan.topo_order, vec!["T01".to_string(), "T02".to_string()]);
    }

    #[test]
    fn cycle_is_rejected() {
        let json = plan_json(
            r#"[
                {"id":"T01","title":"a","prompt":"p","depends_on":["T02"]},
                {"id":"T02","title":"b","prompt":"p","depends_on":["T01"]}
            ]"#,
        );
        assert!(parse_and_validate(&json).is_err());
    }

    #[test]
    fn self_dependency_is_rejected() {
        let json = plan_json(r#"[{"id":"T01","title":"a","prompt":"p","depends_on":["T01"]}]"#);
        assert!(parse_and_validate(&json).is_err());
    }

    #[test]
    fn unknown_dependency_is_rejected() {
        let json = plan_json(r#"[{"id":"T01","title":"a","prompt":"p","depends_on":["T99"]}]"#);
        assert!(parse_and_validate(&json).is_err());
    }

    #[test]
    fn bad_id_shape_is_rejected() {
        let json = plan_json(r#"[{"id":"task1","title":"a","prompt":"p","depends_on":[]}]"#);
        assert!(parse_and_validate(&json).is_err());
    }

    #[test]
    fn empty_task_list_is_rejected() {
        let json = plan_json("[]");
        assert!(parse_and_validate(&json).is_err());
    }

    #[test]
    fn duplicate_ids_rejected() {
        let json = plan_json(
            r#"[
                {"id":"T01","title":"a","prompt":"p","depends_on":[]},
                {"id":"T01","title":"b","prompt":"p","depends_on":[]}
            ]"#,
        );
        assert!(parse_and_validate(&json).is_err());
    }

    #[test]
    fn round_trip_is_stable() {
        let json = plan_json(
            r#"[
                {"id":"T02","title":"b","prompt":"p","depends_on":["T01"]},
                {"id":"T01","title":"a","prompt":"p","depends_on":[]}
            ]"#,
        );
        let first = parse_and_validate(&json).unwrap().topo_order;
        let second = parse_and_validate(&json).unwrap().topo_order;
        assert_eq!(first, second);
    }
}
