//! `SmartPipeline`: the full Preflight → (deep research) → Architect →
//! Build/Critic → Writeback sequence, §4.6. Everything this module touches
//! was built as its own unit (context_assembler, research, architect,
//! builder, critic, cost_preflight, memory_writeback); this file is only the
//! glue that runs them in order and decides what happens between phases.

pub mod architect_loop;
pub mod build_critic_loop;
pub mod gates;
pub mod pass_state;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use nyzhi_config::SmartPipelineConfig;
use serde_json::json;
use thiserror::Error;

use crate::architect::{ArchitectPlanner, Plan};
use crate::audit::{AuditEvent, AuditSink};
use crate::builder::{BuilderMode, BuilderOptions, BuilderOutput, BuilderRunner, PatchFormat};
use crate::context_assembler::{AssembleOptions, ContextAssembler, ContextBundle, ContextConfig};
use crate::cost_preflight::{CostEstimate, CostPreflight, CostPreflightConfig, CostPreflightError, Pricing};
use crate::critic::{CriticEvaluator, CriticOptions, CriticResult};
use crate::generator::{Generator, GeneratorError};
use crate::lanes::{LaneKey, LaneRole, LaneStore};
use crate::memory_writeback::{MemoryWriteback, WritebackInput};
use crate::repo_index::RepoIndex;
use crate::research::{run_research_tools, ResearchConfig, ResearchError, ResearchExecution};

use build_critic_loop::{BuildCriticError, BuildCriticLoopConfig};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("request is empty")]
    EmptyRequest,
    #[error(transparent)]
    CostCap(#[from] CostPreflightError),
    #[error("deep investigation failed: {0}")]
    Research(#[from] ResearchError),
    #[error(transparent)]
    Generator(#[from] GeneratorError),
    #[error(transparent)]
    BuildCritic(#[from] BuildCriticError),
    #[error("architect could not converge: {0}")]
    Architect(String),
}

#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub context: ContextBundle,
    pub research: Option<ResearchExecution>,
    pub plan: Plan,
    pub plan_degraded: bool,
    pub builder_output: BuilderOutput,
    pub critic_result: CriticResult,
    pub attempts: u32,
    pub cost_estimate: CostEstimate,
    pub lanes: LaneStore,
}

pub struct SmartPipelineDeps {
    pub index: Arc<dyn RepoIndex>,
    pub architect_generator: Arc<dyn Generator>,
    pub builder_generator: Arc<dyn Generator>,
    pub interpreter_generator: Option<Arc<dyn Generator>>,
    pub pricing: Pricing,
    pub project_root: PathBuf,
    pub memory_text: String,
    pub profile_text: String,
}

pub struct SmartPipeline {
    config: SmartPipelineConfig,
    deps: SmartPipelineDeps,
    audit: Arc<dyn AuditSink>,
}

impl SmartPipeline {
    pub fn new(config: SmartPipelineConfig, deps: SmartPipelineDeps, audit: Arc<dyn AuditSink>) -> Self {
        Self { config, deps, audit }
    }

    pub async fn run(&self, request: &str, cwd: &Path) -> Result<PipelineOutcome, PipelineError> {
        if request.trim().is_empty() {
            return Err(PipelineError::EmptyRequest);
        }

        let run_id = uuid::Uuid::new_v4().to_string();
        let lane_key = LaneKey::new(self.deps.project_root.display().to_string(), run_id.clone(), run_id, request.trim().to_string());
        let mut lanes = LaneStore::new();
        tracing::info!(job_id = %lane_key.job_id, run_id = %lane_key.run_id, "smart_pipeline run starting");

        self.audit.emit(AuditEvent::PhaseStart { phase: "context".to_string() });
        let assembler = ContextAssembler::new(self.deps.index.clone(), self.context_config(), self.deps.project_root.clone())
            .with_memory(self.deps.memory_text.clone(), self.deps.profile_text.clone());
        let mut context = assembler.assemble(request, None).await;
        self.audit.emit(AuditEvent::ContextSummary {
            detail: json!({"focus": context.selection.focus, "low_confidence": context.selection.low_confidence}),
        });
        lanes.append(
            &lane_key,
            LaneRole::Context,
            "pipeline",
            format!("focus: {:?}, low_confidence: {}", context.selection.focus, context.selection.low_confidence),
        );
        self.audit.emit(AuditEvent::PhaseEnd { phase: "context".to_string(), detail: json!({}) });

        let cost_preflight = CostPreflight::new(CostPreflightConfig {
            max_cost_per_run: self.config.cost.max_cost_per_run,
            char_per_token: self.config.cost.char_per_token,
        });
        let cost_estimate = cost_preflight.estimate_from_bundle(&context, &self.deps.pricing);
        self.audit.emit(AuditEvent::CostEstimate { detail: json!({"estimated_cost": cost_estimate.estimated_cost}) });
        cost_preflight.enforce_cap(&cost_estimate, false, || false)?;

        let research = if self.config.deep_investigation.enabled {
            self.audit.emit(AuditEvent::PhaseStart { phase: "research".to_string() });
            let research_cfg = ResearchConfig {
                tool_quota: self.config.deep_investigation.tool_quota,
                evidence_gate: self.config.deep_investigation.evidence_gate,
                min_cycles: self.config.deep_investigation.investigation_budget_cycles,
                min_duration: std::time::Duration::from_secs(0),
                max_cycles: self.config.deep_investigation.max_cycles,
            };
            let execution = run_research_tools(&self.deps.index, request, &context, &research_cfg).await.map_err(|e| {
                match &e {
                    ResearchError::QuotaFailed => self.audit.emit(AuditEvent::InvestigationQuotaFailed { detail: json!({}) }),
                    ResearchError::BudgetFailed => self.audit.emit(AuditEvent::InvestigationBudgetFailed { detail: json!({}) }),
                    ResearchError::EvidenceFailed => self.audit.emit(AuditEvent::InvestigationEvidenceFailed { detail: json!({}) }),
                    ResearchError::ExecutorMissing => {}
                }
                e
            })?;
            self.audit.emit(AuditEvent::InvestigationTelemetry { detail: json!({"cycles": execution.cycles, "tool_calls": execution.tool_calls}) });
            context.research = Some(execution.summary.clone());
            lanes.append(&lane_key, LaneRole::Research, "pipeline", execution.summary.clone());
            self.audit.emit(AuditEvent::PhaseEnd { phase: "research".to_string(), detail: json!({}) });
            Some(execution)
        } else {
            None
        };

        let planner = ArchitectPlanner::new(self.deps.architect_generator.clone());
        let architect_outcome = architect_loop::run(
            request,
            &mut context,
            &assembler,
            &planner,
            self.config.smart.max_request_recovery,
            self.audit.as_ref(),
            &mut lanes,
            &lane_key,
        )
        .await?;

        if architect_outcome.degraded && !architect_outcome.blocking_reasons.is_empty() {
            let reasons = architect_outcome.blocking_reasons.join(", ");
            self.writeback(
                &architect_outcome.plan,
                &CriticResult { status: crate::critic::CriticStatus::Fail, reasons: vec![reasons.clone()], retryable: false, request: None },
                &[reasons.clone()],
            );
            self.audit.emit(AuditEvent::RunFailed { detail: json!({"error": reasons, "stage": "architect"}) });
            return Err(PipelineError::Architect(reasons));
        }

        let builder = {
            let mut runner = BuilderRunner::new(self.deps.builder_generator.clone());
            if let Some(interp) = &self.deps.interpreter_generator {
                runner = runner.with_interpreter(interp.clone());
            }
            runner
        };
        let critic = CriticEvaluator::new();

        let builder_opts = BuilderOptions {
            mode: match self.config.builder.mode.as_str() {
                "patch_json" => BuilderMode::PatchJson,
                "freeform" => BuilderMode::Freeform,
                _ => BuilderMode::ToolCalls,
            },
            patch_format: match self.config.builder.patch_format.as_str() {
                "file_writes" => PatchFormat::FileWrites,
                _ => PatchFormat::SearchReplace,
            },
            fallback_to_interpreter: self.config.builder.fallback_to_interpreter,
            note: None,
            max_tokens: Some(self.config.limits.max_tokens),
        };

        let critic_opts = CriticOptions { allowed_paths: architect_outcome.plan.all_targets(), allow_protocol_request: true };

        // `allowAutoRetry = false` disables the rich recovery machinery: the
        // build/critic loop gets exactly one attempt and no context refresh,
        // rather than hard-coding that as a separate code path (spec.md §9).
        let loop_cfg = if self.config.smart.allow_auto_retry {
            BuildCriticLoopConfig { max_retries: self.config.limits.max_retries, max_context_refreshes: self.config.context.max_context_refreshes }
        } else {
            BuildCriticLoopConfig { max_retries: 0, max_context_refreshes: 0 }
        };

        let result = build_critic_loop::run(
            request,
            &architect_outcome.plan,
            &mut context,
            &assembler,
            &planner,
            &builder,
            &critic,
            &builder_opts,
            &critic_opts,
            cwd,
            &loop_cfg,
            self.audit.as_ref(),
            &mut lanes,
            &lane_key,
        )
        .await;

        match result {
            Ok(outcome) => {
                self.writeback(&architect_outcome.plan, &outcome.critic_result, &[]);
                self.audit.emit(AuditEvent::RunSummary { detail: json!({"attempts": outcome.attempts_used, "passed": true}) });
                Ok(PipelineOutcome {
                    context,
                    research,
                    plan: architect_outcome.plan,
                    plan_degraded: architect_outcome.degraded,
                    builder_output: outcome.builder_output,
                    critic_result: outcome.critic_result,
                    attempts: outcome.attempts_used,
                    cost_estimate,
                    lanes,
                })
            }
            Err(err) => {
                let lesson = err.to_string();
                self.writeback(&architect_outcome.plan, &CriticResult { status: crate::critic::CriticStatus::Fail, reasons: vec![lesson.clone()], retryable: false, request: None }, &[lesson]);
                self.audit.emit(AuditEvent::RunFailed { detail: json!({"error": err.to_string()}) });
                Err(err.into())
            }
        }
    }

    fn context_config(&self) -> ContextConfig {
        let c = &self.config.context;
        ContextConfig {
            max_files: c.max_files,
            max_total_bytes: c.max_total_bytes,
            focus_max_file_bytes: c.focus_max_file_bytes,
            periphery_max_bytes: c.periphery_max_bytes,
            token_budget: c.token_budget,
            include_repo_map: c.include_repo_map,
            include_impact: c.include_impact,
            include_snippets: c.include_snippets,
            skeletonize_large_files: c.skeletonize_large_files,
            redact_secrets: c.redact_secrets,
            ignore_files_from: c.ignore_files_from.clone(),
            redact_patterns: if self.config.security.redact_patterns.is_empty() {
                ContextConfig::default().redact_patterns
            } else {
                self.config.security.redact_patterns.clone()
            },
        }
    }

    fn writeback(&self, plan: &Plan, critic_result: &CriticResult, failures: &[String]) {
        let lesson = if critic_result.status == crate::critic::CriticStatus::Fail { Some(critic_result.reasons.join("; ")) } else { None };
        let input = WritebackInput {
            failures: if failures.is_empty() { critic_result.reasons.clone() } else { failures.to_vec() },
            max_retries: self.config.limits.max_retries,
            lesson,
            preferences: Vec::new(),
        };
        let _ = plan;
        let _ = MemoryWriteback::persist(&self.deps.project_root, &input);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::CollectingAuditSink;
    use crate::generator::{GeneratorRequest, GeneratorResponse};
    use crate::repo_index::FixtureRepoIndex;
    use async_trait::async_trait;
    use nyzhi_provider::{Message, MessageContent, ModelInfo, ModelTier, Role};
    use tempfile::tempdir;

    struct ScriptedGenerator(std::sync::Mutex<Vec<String>>);

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

    fn pricing() -> Pricing {
        Pricing {
            model: ModelInfo {
                id: "m".into(),
                name: "m".into(),
                provider: "test".into(),
                context_window: 100_000,
                max_output_tokens: 4096,
                supports_tools: true,
                supports_streaming: true,
                supports_vision: false,
                input_price_per_m: 3.0,
                output_price_per_m: 15.0,
                cache_read_price_per_m: 0.3,
                cache_write_price_per_m: 3.75,
                tier: ModelTier::Medium,
                thinking: None,
            },
            source: crate::cost_preflight::PricingSource::ModelCatalog,
        }
    }

    #[tokio::test]
    async fn happy_path_runs_end_to_end() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("index.ts"), "const x = \"Hello\";\n").unwrap();

        let index = Arc::new(FixtureRepoIndex::new().with_file("index.ts", "const x = \"Hello\";\n"));

        let plan_dsl = "PLAN\n- update greeting\n\nTARGETS\n- index.ts\n\nRISK\nlow\n\nVERIFY\n- edits\n".to_string();
        let patch_json = serde_json::json!({
            "kind": "search_replace",
            "edits": [{"action": "replace", "file": "index.ts", "search_block": "\"Hello\"", "replace_block": "\"Hi\""}]
        })
        .to_string();

        let deps = SmartPipelineDeps {
            index: index.clone(),
            architect_generator: Arc::new(ScriptedGenerator(std::sync::Mutex::new(vec![plan_dsl]))),
            builder_generator: Arc::new(ScriptedGenerator(std::sync::Mutex::new(vec![patch_json]))),
            interpreter_generator: None,
            pricing: pricing(),
            project_root: dir.path().to_path_buf(),
            memory_text: String::new(),
            profile_text: String::new(),
        };

        let pipeline = SmartPipeline::new(SmartPipelineConfig::default(), deps, Arc::new(CollectingAuditSink::new()));
        let outcome = pipeline.run("update index greeting", dir.path()).await.unwrap();
        assert!(!outcome.plan_degraded);
        assert_eq!(outcome.attempts, 1);
    }

    #[tokio::test]
    async fn empty_request_is_rejected_before_phase_one() {
        let dir = tempdir().unwrap();
        let index = Arc::new(FixtureRepoIndex::new());
        let deps = SmartPipelineDeps {
            index,
            architect_generator: Arc::new(ScriptedGenerator(std::sync::Mutex::new(vec!["x".to_string()]))),
            builder_generator: Arc::new(ScriptedGenerator(std::sync::Mutex::new(vec!["x".to_string()]))),
            interpreter_generator: None,
            pricing: pricing(),
            project_root: dir.path().to_path_buf(),
            memory_text: String::new(),
            profile_text: String::new(),
        };
        let pipeline = SmartPipeline::new(SmartPipelineConfig::default(), deps, Arc::new(CollectingAuditSink::new()));
        let err = pipeline.run("   ", dir.path()).await.unwrap_err();
        assert!(matches!(err, PipelineError::EmptyRequest));
    }
}
