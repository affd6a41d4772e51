//! The build/critic loop, §4.6.2: `attempt = 1..=maxRetries+1`, each attempt
//! runs the builder, then the architect's own review, then a semantic guard
//! (request anchors vs. builder output/touched files), then the critic,
//! retrying on a retryable failure and stopping immediately on a
//! non-retryable one. A deterministic `PatchApplyFailure` triggers one
//! bounded replan instead of burning an attempt, since the builder's prose
//! was fine but its target paths weren't.

use std::path::Path;

use serde_json::json;

use crate::architect::{ArchitectPlanner, Plan, PlanOptions, ReviewStatus};
use crate::audit::{AuditEvent, AuditSink};
use crate::builder::{BuilderOptions, BuilderOutput, BuilderRunner};
use crate::context_assembler::{AssembleOptions, ContextAssembler, ContextBundle};
use crate::critic::{CriticEvaluator, CriticOptions, CriticResult, CriticStatus};
use crate::generator::GeneratorError;
use crate::lanes::{LaneKey, LaneRole, LaneStore};
use crate::patch::PatchApplyFailure;
use crate::smart_pipeline::gates::semantic_guard;

#[derive(Debug, Clone)]
pub struct BuildCriticOutcome {
    pub builder_output: BuilderOutput,
    pub critic_result: CriticResult,
    pub attempts_used: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum BuildCriticError {
    #[error("builder attempts exhausted: {0}")]
    AttemptsExhausted(String),
    #[error("critic rejected non-retryably: {0}")]
    NonRetryable(String),
    #[error("generator error: {0}")]
    Generator(#[from] GeneratorError),
}

pub struct BuildCriticLoopConfig {
    pub max_retries: u32,
    pub max_context_refreshes: u32,
}

pub async fn run(
    request: &str,
    plan: &Plan,
    context: &mut ContextBundle,
    assembler: &ContextAssembler,
    planner: &ArchitectPlanner,
    builder: &BuilderRunner,
    critic: &CriticEvaluator,
    builder_opts: &BuilderOptions,
    critic_opts: &CriticOptions,
    cwd: &Path,
    cfg: &BuildCriticLoopConfig,
    audit: &dyn AuditSink,
    lanes: &mut LaneStore,
    lane_key: &LaneKey,
) -> Result<BuildCriticOutcome, BuildCriticError> {
    let mut current_plan = plan.clone();
    let mut note: Option<String> = None;
    let mut deterministic_replan_used = false;
    let mut refreshes_used = 0u32;
    let max_attempts = cfg.max_retries + 1;
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        audit.emit(AuditEvent::PhaseStart { phase: "builder".to_string() });

        let mut attempt_opts = builder_opts.clone();
        attempt_opts.note = note.clone();

        audit.emit(AuditEvent::BuilderInput { detail: json!({"attempt": attempt}) });
        let build_result = builder.run(&current_plan, context, &attempt_opts, cwd).await;

        let builder_output = match build_result {
            Ok(output) => output,
            Err(failure) => {
                if failure.deterministic && !deterministic_replan_used {
                    deterministic_replan_used = true;
                    audit.emit(AuditEvent::BuilderApplyFailedDeterministic { detail: json!({"error": failure.error}) });
                    current_plan = replan_after_failure(request, context, planner, &current_plan, &failure).await?;
                    attempt -= 1; // doesn't count against the retry budget
                    continue;
                }

                audit.emit(AuditEvent::BuilderApplyFailed { detail: json!({"error": failure.error, "attempt": attempt}) });
                if attempt >= max_attempts {
                    return Err(BuildCriticError::AttemptsExhausted(failure.error));
                }
                note = Some(format!("patch apply failed: {}", failure.error));
                continue;
            }
        };

        audit.emit(AuditEvent::BuilderOutput { detail: json!({"touched": builder_output.touched_files, "attempt": attempt}) });
        lanes.append(lane_key, LaneRole::Builder, "builder", builder_output.message.clone());

        if let Some(req) = &builder_output.context_request {
            lanes.append(lane_key, LaneRole::Builder, "builder", req.to_lane_text());
            if refreshes_used >= cfg.max_context_refreshes {
                note = Some("context already refreshed to budget; proceed with what's available".to_string());
                attempt -= 1;
                if attempt + 1 > max_attempts {
                    return Err(BuildCriticError::AttemptsExhausted("context refresh budget exhausted".to_string()));
                }
                continue;
            }
            let response = assembler.fulfill_agent_request(req).await;
            audit.emit(AuditEvent::CriticRequestFulfilled { detail: json!({"request_id": req.request_id, "ok": response.all_ok()}) });
            lanes.append(lane_key, LaneRole::Context, "context", response.to_lane_text());
            let preferred: Vec<String> = req.needs.iter().filter_map(|n| n.as_path().map(String::from)).collect();
            *context = assembler.assemble(request, Some(AssembleOptions { preferred_files: preferred, ..Default::default() })).await;
            refreshes_used += 1;
            attempt -= 1;
            continue;
        }

        let review = planner.review_builder_output(&current_plan, &builder_output, context);
        if review.status == ReviewStatus::Retry {
            audit.emit(AuditEvent::CriticOutput { detail: json!({"stage": "architect_review", "reasons": review.reasons}) });
            if attempt >= max_attempts {
                return Err(BuildCriticError::AttemptsExhausted(review.feedback));
            }
            note = Some(review.feedback);
            continue;
        }

        let guard = semantic_guard(request, &builder_output.message, &builder_output.touched_files);
        if !guard.ok {
            audit.emit(AuditEvent::CriticOutput {
                detail: json!({
                    "stage": "semantic_guard",
                    "patch_target_ratio": guard.patch_target_ratio,
                    "general_ratio": guard.general_ratio,
                }),
            });
            if attempt >= max_attempts {
                return Err(BuildCriticError::AttemptsExhausted("builder output does not align with the request's anchors".to_string()));
            }
            note = Some("the change doesn't appear to address the request; re-check the target files and verify intent".to_string());
            continue;
        }

        let critic_result = critic.evaluate(&current_plan, &builder_output, &builder_output.touched_files, critic_opts);
        audit.emit(AuditEvent::CriticOutput { detail: json!({"status": format!("{:?}", critic_result.status), "reasons": critic_result.reasons}) });
        lanes.append(lane_key, LaneRole::Critic, "critic", format!("{:?}: {}", critic_result.status, critic_result.reasons.join("; ")));

        match critic_result.status {
            CriticStatus::Pass => {
                audit.emit(AuditEvent::PhaseEnd { phase: "builder".to_string(), detail: json!({"attempt": attempt, "passed": true}) });
                return Ok(BuildCriticOutcome { builder_output, critic_result, attempts_used: attempt });
            }
            CriticStatus::Fail => {
                if !critic_result.retryable {
                    return Err(BuildCriticError::NonRetryable(critic_result.reasons.join("; ")));
                }
                if attempt >= max_attempts {
                    return Err(BuildCriticError::AttemptsExhausted(critic_result.reasons.join("; ")));
                }
                note = Some(format!("critic requested changes: {}", critic_result.reasons.join("; ")));
            }
        }
    }
}

async fn replan_after_failure(
    request: &str,
    context: &ContextBundle,
    planner: &ArchitectPlanner,
    prior: &Plan,
    failure: &PatchApplyFailure,
) -> Result<Plan, GeneratorError> {
    let opts = PlanOptions {
        instruction_hint: Some("RECOVERY".to_string()),
        validate_only: false,
        builder_note: Some(format!("prior patch failed deterministically against targets {:?}: {}", prior.target_files, failure.error)),
    };
    let result = planner.plan_with_request(request, context, &opts).await?;
    Ok(result.plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::CollectingAuditSink;
    use crate::context_assembler::ContextConfig;
    use crate::generator::{Generator, GeneratorRequest, GeneratorResponse};
    use crate::repo_index::FixtureRepoIndex;
    use async_trait::async_trait;
    use nyzhi_provider::{Message, MessageContent, Role};
    use std::path::PathBuf;
    use std::sync::Arc;
    use tempfile::tempdir;

    struct StubGenerator(String);

    #[async_trait]
    impl Generator for StubGenerator {
        fn name(&self) -> &str {
            "stub"
        }
        async fn generate(&self, _request: &GeneratorRequest) -> Result<GeneratorResponse, GeneratorError> {
            Ok(GeneratorResponse { message: Message { role: Role::Assistant, content: MessageContent::Text(self.0.clone()) }, usage: None, response_format_downgraded: false })
        }
    }

    fn bundle() -> ContextBundle {
        use crate::context_assembler::*;
        ContextBundle {
            queries: vec![],
            search_results: vec![],
            snippets: vec![],
            symbols: Default::default(),
            ast: Default::default(),
            impact: Default::default(),
            selection: Selection { all: vec!["index.ts".to_string()], focus: vec!["index.ts".to_string()], periphery: vec![], low_confidence: false },
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

    #[tokio::test]
    async fn passes_on_first_attempt_with_clean_patch() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("index.ts"), "const x = \"Hello\";\n").unwrap();

        let patch_json = serde_json::json!({
            "kind": "search_replace",
            "edits": [{"action": "replace", "file": "index.ts", "search_block": "\"Hello\"", "replace_block": "\"Hi\""}]
        });
        let builder_gen = Arc::new(StubGenerator(patch_json.to_string()));
        let builder = BuilderRunner::new(builder_gen);

        let architect_gen = Arc::new(StubGenerator("unused".to_string()));
        let planner = ArchitectPlanner::new(architect_gen);

        let index = Arc::new(FixtureRepoIndex::new().with_file("index.ts", "const x = \"Hello\";\n"));
        let assembler = ContextAssembler::new(index, ContextConfig::default(), PathBuf::from("."));

        // "edits" appears verbatim in the stubbed patch JSON, so the critic's
        // substring check treats it as verification plausibly exercised.
        let plan = Plan { target_files: vec!["index.ts".to_string()], verification: vec!["edits".to_string()], ..Default::default() };
        let mut context = bundle();
        let critic = CriticEvaluator::new();
        let critic_opts = CriticOptions { allowed_paths: vec!["index.ts".to_string()], allow_protocol_request: false };
        let builder_opts = BuilderOptions { mode: crate::builder::BuilderMode::PatchJson, ..Default::default() };
        let cfg = BuildCriticLoopConfig { max_retries: 2, max_context_refreshes: 1 };
        let audit = CollectingAuditSink::new();
        let mut lanes = LaneStore::new();
        let lane_key = LaneKey::new("job", "run", "task", "key");

        let outcome = run(
            "fix the greeting text in index.ts", &plan, &mut context, &assembler, &planner, &builder, &critic, &builder_opts, &critic_opts, dir.path(), &cfg, &audit, &mut lanes,
            &lane_key,
        )
        .await
        .unwrap();
        assert_eq!(outcome.attempts_used, 1);
        assert_eq!(outcome.critic_result.status, CriticStatus::Pass);
    }

    #[tokio::test]
    async fn non_retryable_critic_failure_stops_immediately() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("index.ts"), "const x = \"Hello\";\n").unwrap();

        let patch_json = serde_json::json!({
            "kind": "search_replace",
            "edits": [{"action": "replace", "file": "index.ts", "search_block": "\"Hello\"", "replace_block": "rm -rf / \"Hi\""}]
        });
        let builder_gen = Arc::new(StubGenerator(patch_json.to_string()));
        let builder = BuilderRunner::new(builder_gen);
        let architect_gen = Arc::new(StubGenerator("unused".to_string()));
        let planner = ArchitectPlanner::new(architect_gen);

        let index = Arc::new(FixtureRepoIndex::new().with_file("index.ts", "const x = \"Hello\";\n"));
        let assembler = ContextAssembler::new(index, ContextConfig::default(), PathBuf::from("."));

        let plan = Plan { target_files: vec!["index.ts".to_string()], verification: vec!["ran cargo test".to_string()], ..Default::default() };
        let mut context = bundle();
        let critic = CriticEvaluator::new();
        let critic_opts = CriticOptions { allowed_paths: vec!["index.ts".to_string()], allow_protocol_request: false };
        let builder_opts = BuilderOptions { mode: crate::builder::BuilderMode::PatchJson, ..Default::default() };
        let cfg = BuildCriticLoopConfig { max_retries: 2, max_context_refreshes: 1 };
        let audit = CollectingAuditSink::new();
        let mut lanes = LaneStore::new();
        let lane_key = LaneKey::new("job", "run", "task", "key");

        let err = run(
            "fix the greeting text in index.ts", &plan, &mut context, &assembler, &planner, &builder, &critic, &builder_opts, &critic_opts, dir.path(), &cfg, &audit, &mut lanes,
            &lane_key,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, BuildCriticError::NonRetryable(_)));
    }

    #[tokio::test]
    async fn semantic_guard_rejects_output_unrelated_to_the_request() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("index.ts"), "const x = \"Hello\";\n").unwrap();

        let patch_json = serde_json::json!({
            "kind": "search_replace",
            "edits": [{"action": "replace", "file": "index.ts", "search_block": "\"Hello\"", "replace_block": "\"Hi\""}]
        });
        let builder_gen = Arc::new(StubGenerator(patch_json.to_string()));
        let builder = BuilderRunner::new(builder_gen);
        let architect_gen = Arc::new(StubGenerator("unused".to_string()));
        let planner = ArchitectPlanner::new(architect_gen);

        let index = Arc::new(FixtureRepoIndex::new().with_file("index.ts", "const x = \"Hello\";\n"));
        let assembler = ContextAssembler::new(index, ContextConfig::default(), PathBuf::from("."));

        let plan = Plan { target_files: vec!["index.ts".to_string()], verification: vec!["ran cargo test".to_string()], ..Default::default() };
        let mut context = bundle();
        let critic = CriticEvaluator::new();
        let critic_opts = CriticOptions { allowed_paths: vec!["index.ts".to_string()], allow_protocol_request: false };
        let builder_opts = BuilderOptions { mode: crate::builder::BuilderMode::PatchJson, ..Default::default() };
        // No retry budget: the guard should reject on the first attempt rather
        // than let an unrelated patch reach the critic.
        let cfg = BuildCriticLoopConfig { max_retries: 0, max_context_refreshes: 0 };
        let audit = CollectingAuditSink::new();
        let mut lanes = LaneStore::new();
        let lane_key = LaneKey::new("job", "run", "task", "key");

        let err = run(
            "rotate the encryption keys for the auth service",
            &plan,
            &mut context,
            &assembler,
            &planner,
            &builder,
            &critic,
            &builder_opts,
            &critic_opts,
            dir.path(),
            &cfg,
            &audit,
            &mut lanes,
            &lane_key,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, BuildCriticError::AttemptsExhausted(_)));
        assert!(audit.names().contains(&"critic_output"));
    }
}
