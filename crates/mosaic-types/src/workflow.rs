//! Workflow template and execution-context types
//!
//! A template is an ordered list of steps with optional id-based jump
//! pointers. The jump pointers make it a state machine disguised as a list,
//! so templates validate their step graph at construction time: a pointer to
//! a nonexistent step id is an [`crate::MosaicError::InvalidTemplate`], not a
//! runtime surprise.

use crate::{MosaicError, Result, StepId, TemplateId, WorkflowId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A dot-path reference into a prior step's structured output,
/// e.g. `"fetch_data.quotes.price"` — the first segment is the step id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DotPath(pub String);

impl DotPath {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    /// The step id segment (everything before the first dot)
    pub fn step_id(&self) -> StepId {
        match self.0.split_once('.') {
            Some((head, _)) => StepId::new(head),
            None => StepId::new(self.0.clone()),
        }
    }

    /// The remaining segments inside that step's structured data
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('.').skip(1)
    }

    /// Resolve the path against a map of step results.
    ///
    /// Returns `None` if the step is missing, produced no structured data,
    /// or any intermediate segment is absent.
    pub fn resolve(&self, results: &HashMap<StepId, StepResult>) -> Option<serde_json::Value> {
        let result = results.get(&self.step_id())?;
        let mut current = &result.structured_data;
        for segment in self.segments() {
            current = match current {
                serde_json::Value::Object(map) => map.get(segment)?,
                serde_json::Value::Array(items) => {
                    let index: usize = segment.parse().ok()?;
                    items.get(index)?
                }
                _ => return None,
            };
        }
        Some(current.clone())
    }
}

impl From<&str> for DotPath {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A declarative predicate over the accumulated workflow context.
///
/// Conditions are data, not closures, so templates stay serializable and the
/// referenced paths can be checked at registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    /// The path resolves to any value
    Exists { path: DotPath },
    /// The path resolves to exactly this value
    Equals { path: DotPath, value: serde_json::Value },
    /// The path resolves to a truthy value (true, non-zero, non-empty)
    Truthy { path: DotPath },
    /// The named prior step reported success
    StepSucceeded { step: StepId },
}

impl Condition {
    /// Evaluate against the step results accumulated so far
    pub fn evaluate(&self, results: &HashMap<StepId, StepResult>) -> bool {
        match self {
            Self::Exists { path } => path.resolve(results).is_some(),
            Self::Equals { path, value } => {
                path.resolve(results).as_ref() == Some(value)
            }
            Self::Truthy { path } => match path.resolve(results) {
                Some(serde_json::Value::Bool(b)) => b,
                Some(serde_json::Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
                Some(serde_json::Value::String(s)) => !s.is_empty(),
                Some(serde_json::Value::Array(a)) => !a.is_empty(),
                Some(serde_json::Value::Object(o)) => !o.is_empty(),
                Some(serde_json::Value::Null) | None => false,
            },
            Self::StepSucceeded { step } => {
                results.get(step).map(|r| r.success).unwrap_or(false)
            }
        }
    }
}

/// How a step's hire is paid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMode {
    /// Single transfer on step success
    #[default]
    OneShot,
    /// Token-metered payment stream accruing during execution
    Streaming,
    /// Escrowed commit-reveal-proof job; payment settles only on a
    /// verified proof
    VerifiedJob,
}

/// One step in a workflow template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// Template-scoped step id
    pub id: StepId,
    /// Capability to hire for this step
    pub capability: String,
    /// Action passed through to the step executor
    pub action: String,
    /// Skip the step when this evaluates false
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
    /// Input fields resolved from prior step outputs
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub input_mapping: HashMap<String, DotPath>,
    /// Jump target on success (template-order successor when absent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_success: Option<StepId>,
    /// Jump target on failure (template-order successor when absent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_failure: Option<StepId>,
    /// A failing required step halts the whole workflow
    #[serde(default)]
    pub required: bool,
    /// How the hired agent is paid
    #[serde(default)]
    pub payment_mode: PaymentMode,
}

impl Step {
    /// Create a minimal step with the given id, capability, and action
    pub fn new(
        id: impl Into<StepId>,
        capability: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            capability: capability.into(),
            action: action.into(),
            condition: None,
            input_mapping: HashMap::new(),
            on_success: None,
            on_failure: None,
            required: false,
            payment_mode: PaymentMode::OneShot,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn with_input(mut self, field: impl Into<String>, path: impl Into<DotPath>) -> Self {
        self.input_mapping.insert(field.into(), path.into());
        self
    }

    pub fn on_success(mut self, step: impl Into<StepId>) -> Self {
        self.on_success = Some(step.into());
        self
    }

    pub fn on_failure(mut self, step: impl Into<StepId>) -> Self {
        self.on_failure = Some(step.into());
        self
    }

    pub fn with_payment_mode(mut self, mode: PaymentMode) -> Self {
        self.payment_mode = mode;
        self
    }
}

/// An immutable, validated workflow template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowTemplate {
    pub template_id: TemplateId,
    pub name: String,
    pub steps: Vec<Step>,
}

impl WorkflowTemplate {
    /// Build a template, validating the step graph.
    ///
    /// Rejects empty templates, duplicate step ids, and jump pointers to
    /// nonexistent step ids.
    pub fn new(name: impl Into<String>, steps: Vec<Step>) -> Result<Self> {
        if steps.is_empty() {
            return Err(MosaicError::InvalidTemplate {
                reason: "template has no steps".to_string(),
            });
        }

        let mut seen = std::collections::HashSet::new();
        for step in &steps {
            if !seen.insert(step.id.clone()) {
                return Err(MosaicError::InvalidTemplate {
                    reason: format!("duplicate step id '{}'", step.id),
                });
            }
        }

        for step in &steps {
            for target in [&step.on_success, &step.on_failure].into_iter().flatten() {
                if !seen.contains(target) {
                    return Err(MosaicError::InvalidTemplate {
                        reason: format!(
                            "step '{}' jumps to nonexistent step '{}'",
                            step.id, target
                        ),
                    });
                }
            }
        }

        Ok(Self {
            template_id: TemplateId::new(),
            name: name.into(),
            steps,
        })
    }

    /// Find a step by id
    pub fn step(&self, id: &StepId) -> Option<&Step> {
        self.steps.iter().find(|s| &s.id == id)
    }

    /// The template-order successor of the given step id
    pub fn successor(&self, id: &StepId) -> Option<&Step> {
        let index = self.steps.iter().position(|s| &s.id == id)?;
        self.steps.get(index + 1)
    }
}

/// Overall status of a workflow run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl WorkflowStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// The recorded outcome of one step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub success: bool,
    /// Human-readable output text
    pub output: Option<String>,
    /// Structured output referenced by later steps' input mappings
    pub structured_data: serde_json::Value,
    pub duration_ms: u64,
    pub skipped: bool,
    pub skip_reason: Option<String>,
}

impl StepResult {
    /// A skipped step: no output, no on_success/on_failure routing
    pub fn skipped(reason: impl Into<String>) -> Self {
        Self {
            success: true,
            output: None,
            structured_data: serde_json::Value::Null,
            duration_ms: 0,
            skipped: true,
            skip_reason: Some(reason.into()),
        }
    }

    /// A failed step carrying the error message as output
    pub fn failed(error: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            success: false,
            output: Some(error.into()),
            structured_data: serde_json::Value::Null,
            duration_ms,
            skipped: false,
            skip_reason: None,
        }
    }
}

/// Mutable state of one workflow run. Owned by the engine; destroyed when the
/// run ends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowContext {
    pub workflow_id: WorkflowId,
    pub template_id: TemplateId,
    /// The requester's free-text task
    pub task: String,
    pub current_step: Option<StepId>,
    pub step_results: HashMap<StepId, StepResult>,
    pub status: WorkflowStatus,
    pub started_at: DateTime<Utc>,
}

impl WorkflowContext {
    pub fn new(template_id: TemplateId, task: impl Into<String>) -> Self {
        Self {
            workflow_id: WorkflowId::new(),
            template_id,
            task: task.into(),
            current_step: None,
            step_results: HashMap::new(),
            status: WorkflowStatus::Pending,
            started_at: Utc::now(),
        }
    }
}

/// Final aggregated result of a workflow run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowResult {
    pub workflow_id: WorkflowId,
    pub status: WorkflowStatus,
    pub success: bool,
    /// Human-readable run summary
    pub summary: String,
    /// All step results keyed by step id, including the partial trail of a
    /// failed run
    pub step_results: HashMap<StepId, StepResult>,
    pub duration_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn result_with(data: serde_json::Value) -> StepResult {
        StepResult {
            success: true,
            output: Some("ok".to_string()),
            structured_data: data,
            duration_ms: 5,
            skipped: false,
            skip_reason: None,
        }
    }

    #[test]
    fn test_dot_path_resolution() {
        let mut results = HashMap::new();
        results.insert(
            StepId::from("fetch"),
            result_with(json!({"quotes": {"price": 42, "symbols": ["a", "b"]}})),
        );

        let path = DotPath::from("fetch.quotes.price");
        assert_eq!(path.resolve(&results), Some(json!(42)));

        let path = DotPath::from("fetch.quotes.symbols.1");
        assert_eq!(path.resolve(&results), Some(json!("b")));

        let path = DotPath::from("fetch.missing");
        assert_eq!(path.resolve(&results), None);

        let path = DotPath::from("absent_step.anything");
        assert_eq!(path.resolve(&results), None);
    }

    #[test]
    fn test_condition_evaluation() {
        let mut results = HashMap::new();
        results.insert(StepId::from("scan"), result_with(json!({"hits": 3, "clean": false})));

        assert!(Condition::Exists { path: "scan.hits".into() }.evaluate(&results));
        assert!(Condition::Truthy { path: "scan.hits".into() }.evaluate(&results));
        assert!(!Condition::Truthy { path: "scan.clean".into() }.evaluate(&results));
        assert!(Condition::Equals { path: "scan.hits".into(), value: json!(3) }.evaluate(&results));
        assert!(Condition::StepSucceeded { step: "scan".into() }.evaluate(&results));
        assert!(!Condition::StepSucceeded { step: "other".into() }.evaluate(&results));
    }

    #[test]
    fn test_template_rejects_duplicate_ids() {
        let result = WorkflowTemplate::new(
            "dup",
            vec![
                Step::new("a", "cap", "act"),
                Step::new("a", "cap", "act"),
            ],
        );
        assert!(matches!(result, Err(MosaicError::InvalidTemplate { .. })));
    }

    #[test]
    fn test_template_rejects_dangling_jump() {
        let result = WorkflowTemplate::new(
            "dangling",
            vec![Step::new("a", "cap", "act").on_success("nowhere")],
        );
        assert!(matches!(result, Err(MosaicError::InvalidTemplate { .. })));
    }

    #[test]
    fn test_template_rejects_empty() {
        let result = WorkflowTemplate::new("empty", vec![]);
        assert!(matches!(result, Err(MosaicError::InvalidTemplate { .. })));
    }

    #[test]
    fn test_template_successor() {
        let template = WorkflowTemplate::new(
            "seq",
            vec![Step::new("a", "cap", "act"), Step::new("b", "cap", "act")],
        )
        .unwrap();

        assert_eq!(template.successor(&"a".into()).unwrap().id, "b".into());
        assert!(template.successor(&"b".into()).is_none());
    }
}
