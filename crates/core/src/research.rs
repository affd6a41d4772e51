//! Deep-mode research loop: `runResearchTools` iterates the `RepoIndex`
//! until an evidence gate, a tool quota, and a minimum cycle/time budget are
//! all satisfied, or the cycle bound is reached. Distinct from
//! `deep_mode.rs`, which only carries the system-prompt text for deep mode;
//! this module is the actual stateful loop that text describes.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::context_assembler::{ContextBundle, ResearchSummary};
use crate::repo_index::RepoIndex;

#[derive(Debug, Clone)]
pub struct ResearchConfig {
    pub tool_quota: usize,
    pub evidence_gate: usize,
    pub min_cycles: u32,
    pub min_duration: Duration,
    pub max_cycles: u32,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            tool_quota: 6,
            evidence_gate: 3,
            min_cycles: 2,
            min_duration: Duration::from_secs(0),
            max_cycles: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchExecution {
    pub cycles: u32,
    pub tool_calls: usize,
    pub evidence_gate_met: bool,
    pub quota_met: bool,
    pub budget_met: bool,
    pub summary: ResearchSummary,
}

impl ResearchExecution {
    pub fn saturated(&self) -> bool {
        self.evidence_gate_met && self.quota_met && self.budget_met
    }
}

#[derive(Debug, Error)]
pub enum ResearchError {
    #[error("deep_investigation_quota_failed")]
    QuotaFailed,
    #[error("deep_investigation_budget_failed")]
    BudgetFailed,
    #[error("deep_investigation_evidence_failed")]
    EvidenceFailed,
    #[error("research_executor_missing")]
    ExecutorMissing,
}

/// Runs the research loop against `index`, seeding queries from `request` and
/// the bundle's already-known focus set so early cycles don't repeat the
/// context assembler's own search.
pub async fn run_research_tools(
    index: &Arc<dyn RepoIndex>,
    request: &str,
    bundle: &ContextBundle,
    cfg: &ResearchConfig,
) -> Result<ResearchExecution, ResearchError> {
    let started = Instant::now();
    let mut tool_calls = 0usize;
    let mut facts: Vec<String> = Vec::new();
    let mut seen_paths: std::collections::BTreeSet<String> = bundle.selection.all.iter().cloned().collect();

    let mut cycle = 0u32;
    let mut stalled_cycles = 0u32;

    while cycle < cfg.max_cycles {
        cycle += 1;
        let query = research_query_for_cycle(request, cycle);

        let hits = match index.search(&query, 5).await {
            Ok(hits) => hits,
            Err(_) => Vec::new(),
        };
        tool_calls += 1;

        let mut new_this_cycle = 0usize;
        for hit in &hits {
            if seen_paths.insert(hit.path.clone()) {
                new_this_cycle += 1;
                if let Ok(impact) = index.impact(&hit.path).await {
                    tool_calls += 1;
                    if !impact.inbound.is_empty() || !impact.outbound.is_empty() {
                        facts.push(format!("{} touches {} inbound / {} outbound", hit.path, impact.inbound.len(), impact.outbound.len()));
                    }
                }
                facts.push(format!("observed {}", hit.path));
            }
        }

        if new_this_cycle == 0 {
            stalled_cycles += 1;
        } else {
            stalled_cycles = 0;
        }

        let evidence_gate_met = facts.len() >= cfg.evidence_gate;
        let quota_met = tool_calls >= cfg.tool_quota;
        let budget_met = cycle >= cfg.min_cycles && started.elapsed() >= cfg.min_duration;

        if evidence_gate_met && quota_met && budget_met {
            return Ok(ResearchExecution {
                cycles: cycle,
                tool_calls,
                evidence_gate_met,
                quota_met,
                budget_met,
                summary: ResearchSummary { cycles: cycle, tool_calls, evidence_gate_met, facts },
            });
        }

        if stalled_cycles >= 2 {
            break;
        }
    }

    let evidence_gate_met = facts.len() >= cfg.evidence_gate;
    let quota_met = tool_calls >= cfg.tool_quota;
    let budget_met = cycle >= cfg.min_cycles && started.elapsed() >= cfg.min_duration;

    if !evidence_gate_met {
        return Err(ResearchError::EvidenceFailed);
    }
    if !quota_met {
        return Err(ResearchError::QuotaFailed);
    }
    if !budget_met {
        return Err(ResearchError::BudgetFailed);
    }

    Ok(ResearchExecution {
        cycles: cycle,
        tool_calls,
        evidence_gate_met,
        quota_met,
        budget_met,
        summary: ResearchSummary { cycles: cycle, tool_calls, evidence_gate_met, facts },
    })
}

fn research_query_for_cycle(request: &str, cycle: u32) -> String {
    match cycle {
        1 => request.to_string(),
        _ => format!("{request} cycle{cycle}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context_assembler::{ContextAssembler, ContextConfig};
    use crate::repo_index::FixtureRepoIndex;
    use std::path::PathBuf;

    fn index() -> Arc<dyn RepoIndex> {
        Arc::new(
            FixtureRepoIndex::new()
                .with_file("src/greeting.rs", "pub fn greet() {}\n")
                .with_file("src/caller.rs", "use crate::greeting::greet;\n"),
        )
    }

    #[tokio::test]
    async fn saturates_with_low_thresholds() {
        let idx = index();
        let assembler = ContextAssembler::new(idx.clone(), ContextConfig::default(), PathBuf::from("."));
        let bundle = assembler.assemble("greet", None).await;

        let cfg = ResearchConfig { tool_quota: 1, evidence_gate: 1, min_cycles: 2, min_duration: Duration::from_secs(0), max_cycles: 5 };
        let result = run_research_tools(&idx, "greet", &bundle, &cfg).await.unwrap();
        assert!(result.saturated());
        assert!(result.cycles >= 2);
    }

    #[tokio::test]
    async fn unmet_evidence_gate_is_terminal() {
        let idx = index();
        let assembler = ContextAssembler::new(idx.clone(), ContextConfig::default(), PathBuf::from("."));
        let bundle = assembler.assemble("nothing_matches_here", None).await;

        let cfg = ResearchConfig { tool_quota: 1, evidence_gate: 50, min_cycles: 1, min_duration: Duration::from_secs(0), max_cycles: 2 };
        let err = run_research_tools(&idx, "nothing_matches_here", &bundle, &cfg).await.unwrap_err();
        assert!(matches!(err, ResearchError::EvidenceFailed));
    }
}
