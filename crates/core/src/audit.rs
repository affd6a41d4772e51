//! Structured audit events the pipeline emits at stable points. Every name
//! in the external interface's "Emitted audit events" list is a closed enum
//! variant; `detail` carries the event-specific payload as JSON so call
//! sites stay simple without one bespoke struct per event.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "detail", rename_all = "snake_case")]
pub enum AuditEvent {
    PhaseStart { phase: String },
    PhaseEnd { phase: String, detail: Value },
    ContextSummary { detail: Value },
    ContextRefresh { detail: Value },
    ContextLaneSummary { detail: Value },
    ArchitectOutput { detail: Value },
    ArchitectQualityGate { detail: Value },
    ArchitectStructuralGrounding { detail: Value },
    ArchitectVerificationInsufficient { detail: Value },
    ArchitectRelevance { detail: Value },
    ArchitectTargetDrift { detail: Value },
    ArchitectRetryStrategy { detail: Value },
    ArchitectNonDslDetected { detail: Value },
    ArchitectGuardrailRequest { detail: Value },
    ArchitectRequestFulfilled { detail: Value },
    ArchitectDegraded { detail: Value },
    ArchitectEarlyStop { detail: Value },
    BuilderInput { detail: Value },
    BuilderOutput { detail: Value },
    BuilderApplyFailed { detail: Value },
    BuilderApplyFailedDeterministic { detail: Value },
    CriticOutput { detail: Value },
    CriticRequestFulfilled { detail: Value },
    PhaseAgentSelected { detail: Value },
    PhaseAgentFallback { detail: Value },
    PhaseAgentFallbackRejected { detail: Value },
    CostEstimate { detail: Value },
    FastPathOverridden { detail: Value },
    PlanHintSuppressed { detail: Value },
    InvestigationTelemetry { detail: Value },
    InvestigationQuotaFailed { detail: Value },
    InvestigationBudgetFailed { detail: Value },
    InvestigationEvidenceFailed { detail: Value },
    RunCancelled { detail: Value },
    RunSummary { detail: Value },
    RunFailed { detail: Value },
}

impl AuditEvent {
    pub fn name(&self) -> &'static str {
        match self {
            AuditEvent::PhaseStart { .. } => "phase_start",
            AuditEvent::PhaseEnd { .. } => "phase_end",
            AuditEvent::ContextSummary { .. } => "context_summary",
            AuditEvent::ContextRefresh { .. } => "context_refresh",
            AuditEvent::ContextLaneSummary { .. } => "context_lane_summary",
            AuditEvent::ArchitectOutput { .. } => "architect_output",
            AuditEvent::ArchitectQualityGate { .. } => "architect_quality_gate",
            AuditEvent::ArchitectStructuralGrounding { .. } => "architect_structural_grounding",
            AuditEvent::ArchitectVerificationInsufficient { .. } => "architect_verification_insufficient",
            AuditEvent::ArchitectRelevance { .. } => "architect_relevance",
            AuditEvent::ArchitectTargetDrift { .. } => "architect_target_drift",
            AuditEvent::ArchitectRetryStrategy { .. } => "architect_retry_strategy",
            AuditEvent::ArchitectNonDslDetected { .. } => "architect_non_dsl_detected",
            AuditEvent::ArchitectGuardrailRequest { .. } => "architect_guardrail_request",
            AuditEvent::ArchitectRequestFulfilled { .. } => "architect_request_fulfilled",
            AuditEvent::ArchitectDegraded { .. } => "architect_degraded",
            AuditEvent::ArchitectEarlyStop { .. } => "architect_early_stop",
            AuditEvent::BuilderInput { .. } => "builder_input",
            AuditEvent::BuilderOutput { .. } => "builder_output",
            AuditEvent::BuilderApplyFailed { .. } => "builder_apply_failed",
            AuditEvent::BuilderApplyFailedDeterministic { .. } => "builder_apply_failed_deterministic",
            AuditEvent::CriticOutput { .. } => "critic_output",
            AuditEvent::CriticRequestFulfilled { .. } => "critic_request_fulfilled",
            AuditEvent::PhaseAgentSelected { .. } => "phase_agent_selected",
            AuditEvent::PhaseAgentFallback { .. } => "phase_agent_fallback",
            AuditEvent::PhaseAgentFallbackRejected { .. } => "phase_agent_fallback_rejected",
            AuditEvent::CostEstimate { .. } => "cost_estimate",
            AuditEvent::FastPathOverridden { .. } => "fast_path_overridden",
            AuditEvent::PlanHintSuppressed { .. } => "plan_hint_suppressed",
            AuditEvent::InvestigationTelemetry { .. } => "investigation_telemetry",
            AuditEvent::InvestigationQuotaFailed { .. } => "investigation_quota_failed",
            AuditEvent::InvestigationBudgetFailed { .. } => "investigation_budget_failed",
            AuditEvent::InvestigationEvidenceFailed { .. } => "investigation_evidence_failed",
            AuditEvent::RunCancelled { .. } => "run_cancelled",
            AuditEvent::RunSummary { .. } => "run_summary",
            AuditEvent::RunFailed { .. } => "run_failed",
        }
    }
}

pub trait AuditSink: Send + Sync {
    fn emit(&self, event: AuditEvent);
}

/// Default sink: routes every event through `tracing`, matching the rest of
/// the workspace's logging convention.
#[derive(Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn emit(&self, event: AuditEvent) {
        tracing::info!(event = event.name(), payload = %serde_json::to_string(&event).unwrap_or_default());
    }
}

/// In-memory sink for tests and for assembling `run_summary`.
#[derive(Default)]
pub struct CollectingAuditSink {
    events: std::sync::Mutex<Vec<AuditEvent>>,
}

impl CollectingAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.events.lock().unwrap().iter().map(|e| e.name()).collect()
    }
}

impl AuditSink for CollectingAuditSink {
    fn emit(&self, event: AuditEvent) {
        self.events.lock().unwrap().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn phase_start_and_end_are_paired_in_order() {
        let sink = CollectingAuditSink::new();
        sink.emit(AuditEvent::PhaseStart { phase: "architect".into() });
        sink.emit(AuditEvent::PhaseEnd { phase: "architect".into(), detail: json!({"ok": true}) });
        let names = sink.names();
        assert_eq!(names, vec!["phase_start", "phase_end"]);
    }

    #[test]
    fn event_name_matches_serialized_tag() {
        let event = AuditEvent::RunFailed { detail: json!({"reason": "x"}) };
        assert_eq!(event.name(), "run_failed");
    }
}
