//! `CriticEvaluator`: the final gate on a builder attempt. Checks touched
//! files against the plan's allowed paths, that verification was plausibly
//! exercised, and that the builder didn't perform a disallowed effect.
//! Grounded on the deny/allow discipline in `tools::permission`.

use serde::{Deserialize, Serialize};

use crate::architect::Plan;
use crate::builder::BuilderOutput;
use crate::protocol::AgentRequest;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CriticStatus {
    Pass,
    Fail,
}

#[derive(Debug, Clone)]
pub struct CriticResult {
    pub status: CriticStatus,
    pub reasons: Vec<String>,
    pub retryable: bool,
    pub request: Option<AgentRequest>,
}

impl CriticResult {
    pub fn pass() -> Self {
        Self { status: CriticStatus::Pass, reasons: Vec::new(), retryable: true, request: None }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CriticOptions {
    pub allowed_paths: Vec<String>,
    pub allow_protocol_request: bool,
}

const DISALLOWED_EFFECT_MARKERS: &[&str] = &["rm -rf /", "curl | sh", "curl|sh", ":(){ :|:& };:", "sudo rm"];

#[derive(Default)]
pub struct CriticEvaluator;

impl CriticEvaluator {
    pub fn new() -> Self {
        Self
    }

    pub fn evaluate(&self, plan: &Plan, builder_output: &BuilderOutput, touched_files: &[String], opts: &CriticOptions) -> CriticResult {
        let mut reasons = Vec::new();
        let mut guardrail_violation = false;

        for touched in touched_files {
            if !opts.allowed_paths.iter().any(|p| p == touched) {
                let justified = mentions_justification(&builder_output.message, touched);
                if !justified {
                    reasons.push(format!("{touched} touched outside allowed paths"));
                    guardrail_violation = true;
                }
            }
        }

        if plan.verification.is_empty() {
            reasons.push("verification_not_exercised".to_string());
        } else if !verification_plausibly_exercised(plan, builder_output) {
            reasons.push("verification_not_plausibly_exercised".to_string());
        }

        if let Some(marker) = disallowed_effect(&builder_output.message) {
            reasons.push(format!("disallowed_tool_effect_detected:{marker}"));
            guardrail_violation = true;
        }

        if builder_output.context_request.is_some() && !opts.allow_protocol_request {
            reasons.push("protocol_request_not_permitted".to_string());
            guardrail_violation = true;
        }

        if reasons.is_empty() {
            return CriticResult::pass();
        }

        CriticResult {
            status: CriticStatus::Fail,
            reasons,
            retryable: !guardrail_violation,
            request: if opts.allow_protocol_request { builder_output.context_request.clone() } else { None },
        }
    }
}

fn mentions_justification(message: &str, path: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains(&path.to_lowercase()) && (lower.contains("justif") || lower.contains("necessary because") || lower.contains("required because"))
}

fn verification_plausibly_exercised(plan: &Plan, builder_output: &BuilderOutput) -> bool {
    let lower = builder_output.message.to_lowercase();
    if lower.contains("verified") || lower.contains("ran ") || lower.contains("tested") {
        return true;
    }
    plan.verification.iter().any(|step| lower.contains(&step.to_lowercase()))
}

fn disallowed_effect(message: &str) -> Option<&'static str> {
    let lower = message.to_lowercase();
    DISALLOWED_EFFECT_MARKERS.iter().find(|marker| lower.contains(&marker.to_lowercase())).copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::BuilderMode;

    fn output(message: &str) -> BuilderOutput {
        BuilderOutput { message: message.to_string(), touched_files: vec![], patch: None, context_request: None, mode_used: BuilderMode::ToolCalls }
    }

    #[test]
    fn passes_when_touched_files_match_plan_and_verification_mentioned() {
        let plan = Plan { target_files: vec!["src/a.rs".into()], verification: vec!["cargo test".into()], ..Default::default() };
        let out = output("Implemented the change. Ran cargo test to verify.");
        let critic = CriticEvaluator::new();
        let result = critic.evaluate(&plan, &out, &["src/a.rs".to_string()], &CriticOptions { allowed_paths: vec!["src/a.rs".into()], allow_protocol_request: false });
        assert_eq!(result.status, CriticStatus::Pass);
    }

    #[test]
    fn fails_retryably_when_verification_unexercised() {
        let plan = Plan { target_files: vec!["src/a.rs".into()], verification: vec!["cargo test".into()], ..Default::default() };
        let out = output("Implemented the change.");
        let critic = CriticEvaluator::new();
        let result = critic.evaluate(&plan, &out, &["src/a.rs".to_string()], &CriticOptions { allowed_paths: vec!["src/a.rs".into()], allow_protocol_request: false });
        assert_eq!(result.status, CriticStatus::Fail);
        assert!(result.retryable);
    }

    #[test]
    fn fails_non_retryably_on_disallowed_effect() {
        let plan = Plan { target_files: vec!["src/a.rs".into()], verification: vec!["cargo test".into()], ..Default::default() };
        let out = output("Ran cargo test, then executed rm -rf / to clean up.");
        let critic = CriticEvaluator::new();
        let result = critic.evaluate(&plan, &out, &["src/a.rs".to_string()], &CriticOptions { allowed_paths: vec!["src/a.rs".into()], allow_protocol_request: false });
        assert!(!result.retryable);
    }

    #[test]
    fn touching_unauthorized_path_is_a_guardrail_failure() {
        let plan = Plan { target_files: vec!["src/a.rs".into()], verification: vec!["cargo test".into()], ..Default::default() };
        let out = output("Ran cargo test.");
        let critic = CriticEvaluator::new();
        let result = critic.evaluate(&plan, &out, &["src/sneaky.rs".to_string()], &CriticOptions { allowed_paths: vec!["src/a.rs".into()], allow_protocol_request: false });
        assert!(!result.retryable);
    }
}
