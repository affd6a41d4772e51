//! `ArchitectPlanner`: turns a context bundle into a `Plan` DSL document, or
//! an `AGENT_REQUEST` when the model decides it lacks enough context. Parsing
//! follows the same "be forgiving of wrapper noise, then validate" discipline
//! as `planning.rs`'s prior free-text planner, retargeted at the stricter
//! `PLAN/TARGETS/RISK/VERIFY` section grammar this pipeline requires.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::builder::BuilderOutput;
use crate::context_assembler::ContextBundle;
use crate::generator::{user_message, Generator, GeneratorError, GeneratorRequest, ResponseFormat};
use crate::protocol::AgentRequest;

pub const REQUIRED_SECTIONS: &[&str] = &["PLAN", "TARGETS", "RISK", "VERIFY"];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Plan {
    pub steps: Vec<String>,
    pub target_files: Vec<String>,
    pub create_files: Vec<String>,
    pub risk_assessment: String,
    pub verification: Vec<String>,
}

impl Plan {
    pub fn all_targets(&self) -> Vec<String> {
        let mut out = self.target_files.clone();
        out.extend(self.create_files.iter().cloned());
        out.sort();
        out.dedup();
        out
    }

    /// sha256 of the raw text if present, else of a normalized rendering --
    /// used by the pass loop to detect a repeated plan hash across passes.
    pub fn content_hash(&self, raw: Option<&str>) -> String {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        match raw {
            Some(r) => hasher.update(r.as_bytes()),
            None => hasher.update(self.normalized().as_bytes()),
        }
        hex::encode(hasher.finalize())
    }

    fn normalized(&self) -> String {
        format!(
            "PLAN:{:?}\nTARGETS:{:?}\nCREATE:{:?}\nRISK:{}\nVERIFY:{:?}",
            self.steps, self.target_files, self.create_files, self.risk_assessment, self.verification
        )
    }
}

#[derive(Debug, Clone)]
pub struct ArchitectPlanResult {
    pub plan: Plan,
    pub raw: String,
    pub warnings: BTreeSet<String>,
    pub request: Option<AgentRequest>,
}

#[derive(Debug, Clone, Default)]
pub struct PlanOptions {
    pub instruction_hint: Option<String>,
    pub validate_only: bool,
    pub builder_note: Option<String>,
}

pub struct ArchitectPlanner {
    generator: Arc<dyn Generator>,
}

impl ArchitectPlanner {
    pub fn new(generator: Arc<dyn Generator>) -> Self {
        Self { generator }
    }

    pub async fn plan_with_request(
        &self,
        request: &str,
        context: &ContextBundle,
        opts: &PlanOptions,
    ) -> Result<ArchitectPlanResult, GeneratorError> {
        let prompt = build_architect_prompt(request, context, opts);
        let gen_request = GeneratorRequest {
            response_format: ResponseFormat::Default,
            ..GeneratorRequest::text_only(vec![user_message(prompt)])
        };
        let response = self.generator.generate(&gen_request).await?;
        Ok(interpret_architect_output(response.text()))
    }

    /// Second-order check: does the builder's artifact actually satisfy the
    /// plan's targets and verification intent.
    pub fn review_builder_output(&self, plan: &Plan, builder_output: &BuilderOutput, context: &ContextBundle) -> ReviewResult {
        let mut reasons = Vec::new();
        let mut warnings = BTreeSet::new();

        let allowed = plan.all_targets();
        for touched in &builder_output.touched_files {
            if !allowed.iter().any(|t| t == touched) {
                reasons.push(format!("touched {touched} outside plan targets"));
            }
        }

        if plan.verification.is_empty() {
            reasons.push("plan has no verification steps to satisfy".to_string());
        }

        if allowed.is_empty() {
            warnings.insert("plan_missing_target_files".to_string());
        }

        let _ = context;

        if reasons.is_empty() {
            ReviewResult { status: ReviewStatus::Pass, feedback: "builder output satisfies plan targets".to_string(), reasons: Vec::new(), warnings }
        } else {
            ReviewResult {
                status: ReviewStatus::Retry,
                feedback: reasons.join("; "),
                reasons,
                warnings,
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewStatus {
    Pass,
    Retry,
}

#[derive(Debug, Clone)]
pub struct ReviewResult {
    pub status: ReviewStatus,
    pub feedback: String,
    pub reasons: Vec<String>,
    pub warnings: BTreeSet<String>,
}

fn build_architect_prompt(request: &str, context: &ContextBundle, opts: &PlanOptions) -> String {
    let mut prompt = String::new();
    prompt.push_str("Produce a change plan as a PLAN/TARGETS/RISK/VERIFY document (optional CREATE section for new files).\n\n");
    if let Some(hint) = &opts.instruction_hint {
        prompt.push_str(&format!("Hint: {hint}\n\n"));
    }
    if let Some(note) = &opts.builder_note {
        prompt.push_str(&format!("Prior attempt feedback: {note}\n\n"));
    }
    prompt.push_str(&format!("Request:\n{request}\n\n"));
    prompt.push_str(&context.serialized.content);
    prompt
}

/// Parses a raw architect response into either an `AGENT_REQUEST` or a `Plan`
/// plus the canonical warning tag set.
pub fn interpret_architect_output(raw: &str) -> ArchitectPlanResult {
    if let Some(req) = AgentRequest::from_lane_text(raw) {
        return ArchitectPlanResult {
            plan: Plan::default(),
            raw: raw.to_string(),
            warnings: BTreeSet::new(),
            request: Some(req),
        };
    }

    let mut warnings = BTreeSet::new();
    let cleaned = strip_wrapper_noise(raw, &mut warnings);

    let sections = split_sections(&cleaned, &mut warnings);

    if sections.is_empty() {
        if let Some(plan) = try_json_fallback(&cleaned) {
            warnings.insert("architect_used_json_fallback".to_string());
            return ArchitectPlanResult { plan, raw: raw.to_string(), warnings, request: None };
        }
        warnings.insert("architect_non_dsl".to_string());
        return ArchitectPlanResult { plan: Plan::default(), raw: raw.to_string(), warnings, request: None };
    }

    let missing: Vec<&str> = REQUIRED_SECTIONS.iter().filter(|s| !sections.contains_key(**s)).cloned().collect();
    if !missing.is_empty() {
        warnings.insert("architect_missing_required_sections".to_string());
    }

    let steps = sections.get("PLAN").map(|s| lines_list(s)).unwrap_or_default();
    if steps.is_empty() {
        warnings.insert("plan_missing_steps".to_string());
    }

    let target_files = sections.get("TARGETS").map(|s| lines_list(s)).unwrap_or_default();
    if target_files.is_empty() {
        warnings.insert("plan_missing_target_files".to_string());
    }

    let create_files = sections.get("CREATE").map(|s| lines_list(s)).unwrap_or_default();

    let risk_assessment = sections.get("RISK").cloned().unwrap_or_default().trim().to_string();
    if risk_assessment.is_empty() {
        warnings.insert("plan_missing_risk_assessment".to_string());
    }

    let verification = sections.get("VERIFY").map(|s| lines_list(s)).unwrap_or_default();
    if verification.is_empty() {
        warnings.insert("plan_missing_verification".to_string());
    } else if verification.iter().all(|v| !looks_concrete_verification(v)) {
        warnings.insert("plan_missing_target_change_details:verify".to_string());
    }

    let plan = Plan { steps, target_files, create_files, risk_assessment, verification };
    ArchitectPlanResult { plan, raw: raw.to_string(), warnings, request: None }
}

fn strip_wrapper_noise(raw: &str, warnings: &mut BTreeSet<String>) -> String {
    let think_re = Regex::new(r"(?si)<think>.*?</think>").unwrap();
    let fence_re = Regex::new(r"(?s)```[a-zA-Z0-9]*\n(.*?)```").unwrap();

    let mut out = raw.to_string();

    if think_re.is_match(&out) {
        warnings.insert("architect_contains_think".to_string());
        out = think_re.replace_all(&out, "").to_string();
    }

    if fence_re.is_match(&out) {
        warnings.insert("architect_contains_fence".to_string());
        out = fence_re.replace_all(&out, "$1").to_string();
        warnings.insert("architect_repaired".to_string());
    }

    out.trim().to_string()
}

fn split_sections(text: &str, warnings: &mut BTreeSet<String>) -> BTreeMap<String, String> {
    let header_re = Regex::new(r"(?m)^\s*(PLAN|TARGETS|CREATE|RISK|VERIFY)\s*:?\s*$").unwrap();

    let mut matches: Vec<(String, usize, usize)> = Vec::new();
    for cap in header_re.captures_iter(text) {
        let m = cap.get(0).unwrap();
        matches.push((cap[1].to_string(), m.start(), m.end()));
    }

    if matches.is_empty() {
        return BTreeMap::new();
    }

    let mut seen_counts: BTreeMap<String, usize> = BTreeMap::new();
    for (name, _, _) in &matches {
        *seen_counts.entry(name.clone()).or_insert(0) += 1;
    }
    if seen_counts.values().any(|c| *c > 1) {
        warnings.insert("architect_multiple_section_blocks".to_string());
    }

    let mut sections: BTreeMap<String, String> = BTreeMap::new();
    for (i, (name, _, end)) in matches.iter().enumerate() {
        let body_end = matches.get(i + 1).map(|(_, start, _)| *start).unwrap_or(text.len());
        let body = text[*end..body_end].trim().to_string();
        // first occurrence wins; later duplicate blocks are noise already flagged above
        sections.entry(name.clone()).or_insert(body);
    }
    sections
}

fn lines_list(block: &str) -> Vec<String> {
    block
        .lines()
        .map(|l| l.trim())
        .map(|l| l.trim_start_matches('-').trim_start_matches('*').trim())
        .filter(|l| !l.is_empty())
        .map(|l| l.to_string())
        .collect()
}

pub(crate) fn looks_concrete_verification(step: &str) -> bool {
    let cmd_re = Regex::new(r"(?i)\b(pnpm|npm|yarn|bun|node|jest|vitest|mocha|ava|pytest|cargo|go|dotnet|mvn|gradle)\b.*\b(test|spec|check)\b").unwrap();
    let curl_re = Regex::new(r"(?i)curl\s+https?://").unwrap();
    let visit_re = Regex::new(r"(?i)\b(open|visit|navigate)\b.*(https?://|localhost)").unwrap();
    cmd_re.is_match(step) || curl_re.is_match(step) || visit_re.is_match(step)
}

fn try_json_fallback(cleaned: &str) -> Option<Plan> {
    let value: serde_json::Value = serde_json::from_str(cleaned).ok()?;
    let obj = value.as_object()?;
    let steps = obj.get("steps").and_then(|v| v.as_array()).map(|a| a.iter().filter_map(|v| v.as_str().map(String::from)).collect()).unwrap_or_default();
    let target_files = obj
        .get("target_files")
        .or_else(|| obj.get("targets"))
        .and_then(|v| v.as_array())
        .map(|a| a.iter().filter_map(|v| v.as_str().map(String::from)).collect())
        .unwrap_or_default();
    let create_files = obj.get("create_files").and_then(|v| v.as_array()).map(|a| a.iter().filter_map(|v| v.as_str().map(String::from)).collect()).unwrap_or_default();
    let risk_assessment = obj.get("risk_assessment").or_else(|| obj.get("risk")).and_then(|v| v.as_str()).unwrap_or_default().to_string();
    let verification = obj.get("verification").and_then(|v| v.as_array()).map(|a| a.iter().filter_map(|v| v.as_str().map(String::from)).collect()).unwrap_or_default();

    if steps.is_empty() && target_files.is_empty() {
        return None;
    }
    Some(Plan { steps, target_files, create_files, risk_assessment, verification })
}

/// True when `path` is "concrete": contains a `.`, isn't the literal
/// `unknown`, and isn't a placeholder like `<path>` or `path/to/file.ext`.
pub fn is_concrete_target(path: &str) -> bool {
    if path.eq_ignore_ascii_case("unknown") {
        return false;
    }
    if path.contains('<') || path.contains('>') {
        return false;
    }
    if path.contains("path/to/") {
        return false;
    }
    path.contains('.')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_dsl() {
        let raw = "PLAN\n- add greeting field\n\nTARGETS\n- src/index.ts\n\nRISK\nlow risk, isolated change\n\nVERIFY\n- npm test\n";
        let result = interpret_architect_output(raw);
        assert!(result.warnings.is_empty(), "unexpected warnings: {:?}", result.warnings);
        assert_eq!(result.plan.target_files, vec!["src/index.ts".to_string()]);
    }

    #[test]
    fn flags_non_dsl_output() {
        let result = interpret_architect_output("I think we should just wing it.");
        assert!(result.warnings.contains("architect_non_dsl"));
    }

    #[test]
    fn strips_fence_and_think_and_repairs() {
        let raw = "<think>scratch</think>```\nPLAN\n- step\n\nTARGETS\n- a.rs\n\nRISK\nlow\n\nVERIFY\n- cargo test\n```";
        let result = interpret_architect_output(raw);
        assert!(result.warnings.contains("architect_contains_think"));
        assert!(result.warnings.contains("architect_contains_fence"));
        assert!(result.warnings.contains("architect_repaired"));
        assert_eq!(result.plan.target_files, vec!["a.rs".to_string()]);
    }

    #[test]
    fn detects_duplicate_section_blocks() {
        let raw = "PLAN\n- a\n\nTARGETS\n- a.rs\n\nRISK\nlow\n\nVERIFY\n- cargo test\n\nPLAN\n- b\n";
        let result = interpret_architect_output(raw);
        assert!(result.warnings.contains("architect_multiple_section_blocks"));
    }

    #[test]
    fn missing_verification_detail_is_non_blocking_tag() {
        let raw = "PLAN\n- a\n\nTARGETS\n- a.rs\n\nRISK\nlow\n\nVERIFY\n- eyeball it\n";
        let result = interpret_architect_output(raw);
        assert!(result.warnings.contains("plan_missing_target_change_details:verify"));
    }

    #[test]
    fn concrete_target_predicate() {
        assert!(is_concrete_target("src/index.ts"));
        assert!(!is_concrete_target("unknown"));
        assert!(!is_concrete_target("<path>"));
        assert!(!is_concrete_target("path/to/file.ext"));
    }
}
