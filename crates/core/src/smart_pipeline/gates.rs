//! Pure scoring functions the architect loop consults between passes.
//! Kept free of I/O and of `PassState` so they're simple to unit test in
//! isolation from the loop's control flow.

use std::collections::BTreeSet;

use regex::Regex;

use crate::architect::{is_concrete_target, looks_concrete_verification, Plan};
use crate::context_assembler::ContextBundle;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StructuralGroundingOutcome {
    pub ok: bool,
    pub score: f64,
}

/// §4.6.4. Starts at 1.0, subtracts penalties for missing focus, missing
/// structural/fallback signal, indexing warnings, and low-confidence
/// selection. Passes at score >= 0.45, or trivially when there's nothing to
/// penalize.
pub fn structural_grounding(context: &ContextBundle, plan: &Plan, warnings: &BTreeSet<String>) -> StructuralGroundingOutcome {
    if warnings.is_empty() && !context.selection.low_confidence {
        return StructuralGroundingOutcome { ok: true, score: 1.0 };
    }

    let mut score = 1.0;

    let has_focus_path = !context.selection.focus.is_empty() || plan.target_files.iter().any(|t| is_concrete_target(t));
    if !has_focus_path {
        score -= 0.35;
    }

    let has_structural_signal = !context.symbols.is_empty() || !context.ast.is_empty();
    let has_fallback_signal = !context.files.is_empty() || !context.search_results.is_empty();

    if !has_structural_signal && !has_fallback_signal {
        score -= 0.25;
    } else if !has_structural_signal && has_fallback_signal {
        score -= 0.08;
    }

    let warning_hits = warnings
        .iter()
        .filter(|w| w.contains("_failed:") || w.starts_with("impact_graph_sparse:"))
        .count();
    score -= (0.1 * warning_hits as f64).min(0.4);

    if context.selection.low_confidence {
        score -= 0.2;
    }

    StructuralGroundingOutcome { ok: score >= 0.45, score }
}

pub const BLOCKING_QUALITY_REASONS: &[&str] =
    &["missing_concrete_targets", "invalid_target_paths", "verification_empty", "verification_non_concrete"];

pub fn is_blocking_quality_reason(reason: &str) -> bool {
    BLOCKING_QUALITY_REASONS.contains(&reason)
}

/// §4.6.5. Returns the reason tags that apply; callers decide pass/fail and
/// blocking-vs-recoverable via `is_blocking_quality_reason`.
pub fn plan_quality_gate(context: &ContextBundle, plan: &Plan, request: &str) -> Vec<String> {
    let mut reasons = Vec::new();

    let concrete_targets: Vec<&String> = plan.target_files.iter().filter(|t| is_concrete_target(t)).collect();
    if concrete_targets.is_empty() {
        reasons.push("missing_concrete_targets".to_string());
    } else {
        let known: BTreeSet<&String> = context.selection.all.iter().collect();
        let invalid = concrete_targets.iter().any(|t| !known.contains(*t) && !plan.create_files.contains(t));
        if invalid {
            reasons.push("invalid_target_paths".to_string());
        }
    }

    if plan.verification.is_empty() {
        reasons.push("verification_empty".to_string());
    } else if plan.verification.iter().all(|v| !looks_concrete_verification(v)) {
        reasons.push("verification_non_concrete".to_string());
    }

    let keywords = request_keywords(request);
    if keywords.len() >= 3 {
        let matched = keywords.iter().filter(|k| plan.target_files.iter().any(|t| t.to_lowercase().contains(k.as_str()))).count();
        let ratio = matched as f64 / keywords.len() as f64;
        let floor = if is_endpoint_intent(request) || is_ui_intent(request) { 0.45 } else { 0.2 };
        if ratio < floor {
            reasons.push("low_request_target_alignment".to_string());
        }
    }

    if has_strict_semantic_intent(request) {
        let corpus = plan.steps.join(" ").to_lowercase();
        let anchors = keywords.iter().filter(|k| corpus.contains(k.as_str())).count();
        let coverage = if keywords.is_empty() { 1.0 } else { anchors as f64 / keywords.len() as f64 };
        if coverage < 0.3 {
            reasons.push("low_request_plan_semantic_coverage".to_string());
        }
    }

    reasons
}

fn request_keywords(request: &str) -> Vec<String> {
    let re = Regex::new(r"[A-Za-z_][A-Za-z0-9_]{2,}").unwrap();
    let stop = ["the", "and", "for", "with", "that", "this", "from", "into", "update", "change", "make", "please"];
    let mut out = Vec::new();
    for m in re.find_iter(request) {
        let w = m.as_str().to_lowercase();
        if !stop.contains(&w.as_str()) && !out.contains(&w) {
            out.push(w);
        }
    }
    out
}

fn is_endpoint_intent(request: &str) -> bool {
    let lower = request.to_lowercase();
    ["endpoint", "api", "route", "server", "backend"].iter().any(|k| lower.contains(k))
}

fn is_ui_intent(request: &str) -> bool {
    let lower = request.to_lowercase();
    ["ui", "frontend", "component", "page", "button"].iter().any(|k| lower.contains(k))
}

fn has_strict_semantic_intent(request: &str) -> bool {
    let re = Regex::new(r"(?i)\b(calculate|store|validate|auth|encrypt|authorize)\b").unwrap();
    re.is_match(request)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SemanticGuardOutcome {
    pub ok: bool,
    pub patch_target_ratio: f64,
    pub general_ratio: f64,
}

/// §4.6.2 step 5. Anchors are the request's keywords, adjacent-keyword
/// bigrams, and quoted phrases. Passes when the anchors found in the
/// builder's touched file paths clear a 0.10 ratio, or -- when there are
/// >=3 keyword anchors -- when the anchors found anywhere in the builder's
/// output text clear 0.25. A request with no anchors has nothing to guard
/// against and passes trivially.
pub fn semantic_guard(request: &str, builder_message: &str, touched_files: &[String]) -> SemanticGuardOutcome {
    let keywords = request_keywords(request);

    let mut anchors: Vec<String> = keywords.clone();
    for pair in keywords.windows(2) {
        anchors.push(format!("{} {}", pair[0], pair[1]));
    }
    for phrase in quoted_phrases(request) {
        if !anchors.contains(&phrase) {
            anchors.push(phrase);
        }
    }
    anchors.retain(|a| !a.is_empty());

    if anchors.is_empty() {
        return SemanticGuardOutcome { ok: true, patch_target_ratio: 1.0, general_ratio: 1.0 };
    }

    let touched_corpus = touched_files.join(" ").to_lowercase();
    let patch_hits = anchors.iter().filter(|a| touched_corpus.contains(a.as_str())).count();
    let patch_target_ratio = patch_hits as f64 / anchors.len() as f64;

    let output_corpus = builder_message.to_lowercase();
    let general_hits = anchors.iter().filter(|a| output_corpus.contains(a.as_str())).count();
    let general_ratio = general_hits as f64 / anchors.len() as f64;

    let ok = patch_target_ratio >= 0.10 || (keywords.len() >= 3 && general_ratio >= 0.25);

    SemanticGuardOutcome { ok, patch_target_ratio, general_ratio }
}

fn quoted_phrases(request: &str) -> Vec<String> {
    let re = Regex::new(r#"["'“”]([^"'“”]{2,})["'“”]"#).unwrap();
    re.captures_iter(request).map(|c| c[1].trim().to_lowercase()).filter(|p| !p.is_empty()).collect()
}

/// Jaccard similarity over concrete target sets, used for the target-drift check.
pub fn target_drift(previous: &[String], current: &[String]) -> f64 {
    if previous.is_empty() && current.is_empty() {
        return 1.0;
    }
    let a: BTreeSet<&String> = previous.iter().collect();
    let b: BTreeSet<&String> = current.iter().collect();
    let intersection = a.intersection(&b).count();
    let union = a.union(&b).count();
    if union == 0 {
        1.0
    } else {
        intersection as f64 / union as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bundle_with_focus(focus: Vec<String>) -> ContextBundle {
        use crate::context_assembler::*;
        ContextBundle {
            queries: vec![],
            search_results: vec![],
            snippets: vec![],
            symbols: Default::default(),
            ast: Default::default(),
            impact: Default::default(),
            selection: Selection { all: focus.clone(), focus, periphery: vec![], low_confidence: false },
            files: vec![],
            repo_map: None,
            repo_map_raw: None,
            research: None,
            memory: String::new(),
            profile: String::new(),
            warnings: Default::default(),
            serialized: Serialized { mode: SerializedMode::BundleText, audience: Audience::Builder, content: String::new() },
            redaction: Default::default(),
        }
    }

    #[test]
    fn structural_grounding_passes_with_clean_bundle() {
        let bundle = bundle_with_focus(vec!["src/a.rs".into()]);
        let plan = Plan { target_files: vec!["src/a.rs".into()], ..Default::default() };
        let outcome = structural_grounding(&bundle, &plan, &BTreeSet::new());
        assert!(outcome.ok);
    }

    #[test]
    fn structural_grounding_fails_with_low_confidence_and_no_focus() {
        let mut bundle = bundle_with_focus(vec![]);
        bundle.selection.low_confidence = true;
        let plan = Plan::default();
        let mut warnings = BTreeSet::new();
        warnings.insert("docdex_search_failed:x".to_string());
        let outcome = structural_grounding(&bundle, &plan, &warnings);
        assert!(!outcome.ok);
    }

    #[test]
    fn plan_quality_flags_missing_concrete_targets() {
        let bundle = bundle_with_focus(vec![]);
        let plan = Plan { target_files: vec!["unknown".into()], verification: vec!["cargo test".into()], ..Default::default() };
        let reasons = plan_quality_gate(&bundle, &plan, "fix the bug");
        assert!(reasons.contains(&"missing_concrete_targets".to_string()));
        assert!(is_blocking_quality_reason("missing_concrete_targets"));
    }

    #[test]
    fn target_drift_identical_sets_is_one() {
        let a = vec!["src/a.rs".to_string()];
        assert_eq!(target_drift(&a, &a), 1.0);
    }

    #[test]
    fn semantic_guard_passes_when_touched_files_match_request_anchors() {
        let outcome = semantic_guard("update the greeting message in index.ts", "patched index.ts", &["index.ts".to_string()]);
        assert!(outcome.ok);
        assert!(outcome.patch_target_ratio >= 0.10);
    }

    #[test]
    fn semantic_guard_fails_when_output_is_unrelated_to_request() {
        let outcome =
            semantic_guard("validate the authentication token expiry", "rewrote the logging formatter", &["src/logging.rs".to_string()]);
        assert!(!outcome.ok);
    }

    #[test]
    fn semantic_guard_passes_trivially_with_no_anchors() {
        let outcome = semantic_guard("a an the", "anything", &[]);
        assert!(outcome.ok);
    }

    #[test]
    fn semantic_guard_honors_quoted_phrase_anchor() {
        let outcome = semantic_guard(r#"rename the function "computeTotal" everywhere"#, "renamed computeTotal to computeSum", &[]);
        assert!(outcome.ok);
    }
}
