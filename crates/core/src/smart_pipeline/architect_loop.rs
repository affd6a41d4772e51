//! The architect loop (plan → gate → retry-or-accept), §4.6.1. Wraps
//! `ArchitectPlanner` with the pass bookkeeping in `pass_state.rs` and the
//! scoring in `gates.rs`. A pass either accepts a plan, asks for more
//! context (`AGENT_REQUEST`), or exhausts into a degraded synthesized plan.

use std::collections::BTreeSet;

use serde_json::json;

use crate::architect::{is_concrete_target, ArchitectPlanner, Plan, PlanOptions};
use crate::audit::{AuditEvent, AuditSink};
use crate::context_assembler::{AssembleOptions, ContextAssembler, ContextBundle};
use crate::generator::GeneratorError;
use crate::lanes::{LaneKey, LaneRole, LaneStore};

use super::gates::{is_blocking_quality_reason, plan_quality_gate, structural_grounding, target_drift};
use super::pass_state::PassState;

#[derive(Debug, Clone)]
pub struct ArchitectLoopOutcome {
    pub plan: Plan,
    pub raw: String,
    pub passes_used: u32,
    pub degraded: bool,
    pub warnings: BTreeSet<String>,
    pub blocking_reasons: Vec<String>,
}

fn context_signature(bundle: &ContextBundle) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    for p in &bundle.selection.all {
        hasher.update(p.as_bytes());
        hasher.update(b"\0");
    }
    hex::encode(hasher.finalize())
}

pub async fn run(
    request: &str,
    context: &mut ContextBundle,
    assembler: &ContextAssembler,
    planner: &ArchitectPlanner,
    max_request_recovery: u32,
    audit: &dyn AuditSink,
    lanes: &mut LaneStore,
    lane_key: &LaneKey,
) -> Result<ArchitectLoopOutcome, GeneratorError> {
    let mut state = PassState::new(max_request_recovery, context_signature(context));
    let mut prior_warnings: BTreeSet<String> = BTreeSet::new();
    let mut prior_blocking: Vec<String> = Vec::new();
    let mut builder_note: Option<String> = None;

    loop {
        state.begin_pass();
        audit.emit(AuditEvent::PhaseStart { phase: "architect".to_string() });

        let hint = state.hint_for_pass(&prior_warnings, &prior_blocking);
        let opts = PlanOptions {
            instruction_hint: Some(hint.as_str().to_string()),
            validate_only: state.is_first_pass(),
            builder_note: builder_note.clone(),
        };

        let result = planner.plan_with_request(request, context, &opts).await?;
        audit.emit(AuditEvent::ArchitectOutput { detail: json!({"pass": state.pass, "hint": hint.as_str()}) });
        lanes.append(lane_key, LaneRole::Architect, "architect", result.raw.clone());

        if let Some(req) = result.request {
            if !state.note_request_recovery() {
                audit.emit(AuditEvent::ArchitectEarlyStop {
                    detail: json!({"reason": "architect_retry_skipped_no_new_context"}),
                });
                return Ok(degrade(request, context, &mut state, &result.plan, &result.raw));
            }

            let response = assembler.fulfill_agent_request(&req).await;
            audit.emit(AuditEvent::ArchitectRequestFulfilled { detail: json!({"request_id": req.request_id, "ok": response.all_ok()}) });
            lanes.append(lane_key, LaneRole::Context, "architect", req.to_lane_text());
            lanes.append(lane_key, LaneRole::Context, "context", response.to_lane_text());

            let preferred: Vec<String> = req.needs.iter().filter_map(|n| n.as_path().map(String::from)).collect();
            let refreshed = assembler.assemble(request, Some(AssembleOptions { preferred_files: preferred, ..Default::default() })).await;
            *context = refreshed;
            let sig = context_signature(context);
            audit.emit(AuditEvent::ContextRefresh { detail: json!({"signature": sig}) });
            state.rebind_context_signature(sig);

            builder_note = Some(format!("previous pass requested context via {}", req.request_id));
            prior_warnings = BTreeSet::new();
            prior_blocking = Vec::new();

            if state.exhausted() {
                return Ok(degrade(request, context, &mut state, &result.plan, &result.raw));
            }
            continue;
        }

        let plan = result.plan;
        let mut warnings = result.warnings;
        let mut blocking: Vec<String> = Vec::new();

        if warnings.contains("architect_non_dsl") || warnings.contains("architect_missing_required_sections") {
            blocking.push("architect_non_dsl".to_string());
        }

        let grounding = structural_grounding(context, &plan, &warnings);
        audit.emit(AuditEvent::ArchitectStructuralGrounding { detail: json!({"score": grounding.score, "ok": grounding.ok}) });
        if !grounding.ok {
            blocking.push("architect_structural_grounding".to_string());
        }

        let drift = target_drift(&state.previous_targets, &plan.all_targets());
        if !state.previous_targets.is_empty() && drift < 0.2 {
            audit.emit(AuditEvent::ArchitectTargetDrift { detail: json!({"drift": drift}) });
            warnings.insert("architect_target_drift".to_string());
        }

        let quality_reasons = plan_quality_gate(context, &plan, request);
        audit.emit(AuditEvent::ArchitectQualityGate { detail: json!({"reasons": quality_reasons}) });
        for reason in &quality_reasons {
            if is_blocking_quality_reason(reason) {
                blocking.push(reason.clone());
            } else {
                warnings.insert(reason.clone());
            }
        }

        let hash = plan.content_hash(Some(&result.raw));
        state.note_plan_hash(&hash);
        state.record_targets(plan.all_targets());

        if blocking.is_empty() {
            audit.emit(AuditEvent::PhaseEnd { phase: "architect".to_string(), detail: json!({"accepted": true, "pass": state.pass}) });
            return Ok(ArchitectLoopOutcome { plan, raw: result.raw, passes_used: state.pass, degraded: false, warnings, blocking_reasons: Vec::new() });
        }

        audit.emit(AuditEvent::ArchitectRetryStrategy { detail: json!({"blocking": blocking, "pass": state.pass}) });

        if state.exhausted() {
            audit.emit(AuditEvent::ArchitectDegraded { detail: json!({"blocking": blocking}) });
            lanes.append(lane_key, LaneRole::Architect, "pipeline", format!("degrading after exhausting passes; blocking: {}", blocking.join(", ")));
            return Ok(degrade(request, context, &mut state, &plan, &result.raw));
        }

        prior_warnings = warnings;
        prior_blocking = blocking;
        builder_note = Some(format!("prior pass blocked on: {}", prior_blocking.join(", ")));
    }
}

/// Terminal degradation: synthesize the most conservative plan the current
/// context can support rather than fail the whole run outright. Per §4.6.1,
/// the synthesized plan is itself re-checked against the quality gate; if it
/// still has blocking reasons (e.g. the context has no known paths to fall
/// back to), those reasons are surfaced so the caller can raise a terminal
/// error instead of silently accepting an unusable plan.
fn degrade(request: &str, context: &ContextBundle, state: &mut PassState, last_plan: &Plan, raw: &str) -> ArchitectLoopOutcome {
    state.degraded = true;
    // Prefer the context's own known paths per §4.6.1 ("synthesized from the
    // context's known paths"); a prior plan's unresolved targets only help if
    // they happen to already be concrete.
    let target_files = if !context.selection.focus.is_empty() {
        context.selection.focus.clone()
    } else {
        last_plan.target_files.iter().cloned().filter(|t| is_concrete_target(t)).collect()
    };

    let plan = Plan {
        steps: vec![format!("Investigate \"{request}\" manually; automatic planning did not converge.")],
        target_files,
        create_files: last_plan.create_files.clone(),
        risk_assessment: "unresolved: synthesized after exhausting architect passes".to_string(),
        verification: vec!["manual review required before merge; run `cargo test` to check for regressions".to_string()],
    };

    let mut warnings = BTreeSet::new();
    warnings.insert("architect_degraded".to_string());

    let residual: Vec<String> =
        plan_quality_gate(context, &plan, request).into_iter().filter(|r| is_blocking_quality_reason(r)).collect();

    ArchitectLoopOutcome { plan, raw: raw.to_string(), passes_used: state.pass, degraded: true, warnings, blocking_reasons: residual }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::CollectingAuditSink;
    use crate::context_assembler::ContextConfig;
    use crate::generator::{user_message, Generator, GeneratorRequest, GeneratorResponse};
    use crate::protocol::AgentRequest;
    use crate::repo_index::FixtureRepoIndex;
    use async_trait::async_trait;
    use nyzhi_provider::{Message, MessageContent, Role};
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};

    struct ScriptedGenerator(Mutex<Vec<String>>);

    #[async_trait]
    impl Generator for ScriptedGenerator {
        fn name(&self) -> &str {
            "scripted"
        }
        async fn generate(&self, _request: &GeneratorRequest) -> Result<GeneratorResponse, GeneratorError> {
            let mut scripts = self.0.lock().unwrap();
            let text = if scripts.len() > 1 { scripts.remove(0) } else { scripts[0].clone() };
            Ok(GeneratorResponse { message: Message { role: Role::Assistant, content: MessageContent::Text(text) }, usage: None, response_format_downgraded: false })
        }
    }

    fn well_formed_dsl() -> String {
        "PLAN\n- add greeting\n\nTARGETS\n- src/index.ts\n\nRISK\nlow\n\nVERIFY\n- npm test\n".to_string()
    }

    #[tokio::test]
    async fn accepts_a_well_formed_plan_on_first_pass() {
        let index = Arc::new(FixtureRepoIndex::new().with_file("src/index.ts", "const x = 1;\n"));
        let assembler = ContextAssembler::new(index, ContextConfig::default(), PathBuf::from("."));
        let mut context = assembler.assemble("update index greeting", None).await;

        let gen = Arc::new(ScriptedGenerator(Mutex::new(vec![well_formed_dsl()])));
        let planner = ArchitectPlanner::new(gen);
        let audit = CollectingAuditSink::new();

        let mut lanes = LaneStore::new();
        let lane_key = LaneKey::new("job", "run", "task", "key");
        let outcome = run("update index greeting", &mut context, &assembler, &planner, 1, &audit, &mut lanes, &lane_key).await.unwrap();
        assert!(!outcome.degraded);
        assert_eq!(outcome.passes_used, 1);
    }

    #[tokio::test]
    async fn recovers_from_non_dsl_output_on_second_pass() {
        let index = Arc::new(FixtureRepoIndex::new().with_file("src/index.ts", "const x = 1;\n"));
        let assembler = ContextAssembler::new(index, ContextConfig::default(), PathBuf::from("."));
        let mut context = assembler.assemble("update index greeting", None).await;

        let gen = Arc::new(ScriptedGenerator(Mutex::new(vec!["just wing it".to_string(), well_formed_dsl()])));
        let planner = ArchitectPlanner::new(gen);
        let audit = CollectingAuditSink::new();

        let mut lanes = LaneStore::new();
        let lane_key = LaneKey::new("job", "run", "task", "key");
        let outcome = run("update index greeting", &mut context, &assembler, &planner, 1, &audit, &mut lanes, &lane_key).await.unwrap();
        assert!(!outcome.degraded);
        assert_eq!(outcome.passes_used, 2);
    }

    #[tokio::test]
    async fn degrades_after_exhausting_passes_on_persistent_non_dsl() {
        let index = Arc::new(FixtureRepoIndex::new().with_file("src/index.ts", "const x = 1;\n"));
        let assembler = ContextAssembler::new(index, ContextConfig::default(), PathBuf::from("."));
        let mut context = assembler.assemble("update index greeting", None).await;

        let gen = Arc::new(ScriptedGenerator(Mutex::new(vec!["still not a plan".to_string()])));
        let planner = ArchitectPlanner::new(gen);
        let audit = CollectingAuditSink::new();

        let mut lanes = LaneStore::new();
        let lane_key = LaneKey::new("job", "run", "task", "key");
        let outcome = run("update index greeting", &mut context, &assembler, &planner, 0, &audit, &mut lanes, &lane_key).await.unwrap();
        assert!(outcome.degraded);
    }

    #[tokio::test]
    async fn agent_request_refreshes_context_then_accepts() {
        let index = Arc::new(FixtureRepoIndex::new().with_file("src/index.ts", "const x = 1;\n"));
        let assembler = ContextAssembler::new(index, ContextConfig::default(), PathBuf::from("."));
        let mut context = assembler.assemble("update index greeting", None).await;

        let req = AgentRequest::new("architect", "r1", vec![crate::protocol::AgentNeed::FileRead { path: "src/index.ts".into() }]);
        let gen = Arc::new(ScriptedGenerator(Mutex::new(vec![req.to_lane_text(), well_formed_dsl()])));
        let planner = ArchitectPlanner::new(gen);
        let audit = CollectingAuditSink::new();

        let mut lanes = LaneStore::new();
        let lane_key = LaneKey::new("job", "run", "task", "key");
        let outcome = run("update index greeting", &mut context, &assembler, &planner, 1, &audit, &mut lanes, &lane_key).await.unwrap();
        assert!(!outcome.degraded);
        assert!(audit.names().contains(&"architect_request_fulfilled"));
    }
}
