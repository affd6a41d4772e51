//! State carried across architect-loop passes. Pure transition logic lives
//! here so `architect_loop.rs` reads as the sequence of gate checks it is,
//! with the bookkeeping factored out.

use std::collections::BTreeSet;

/// Per-pass instruction hint threaded into the architect prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstructionHint {
    Refine,
    StrictDsl,
    VerifyQuality,
    Recovery,
    AlternateRetry,
}

impl InstructionHint {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstructionHint::Refine => "REFINE",
            InstructionHint::StrictDsl => "STRICT_DSL",
            InstructionHint::VerifyQuality => "VERIFY_QUALITY",
            InstructionHint::Recovery => "RECOVERY",
            InstructionHint::AlternateRetry => "ALTERNATE_RETRY",
        }
    }
}

#[derive(Debug, Clone)]
pub struct PassState {
    pub pass: u32,
    pub max_passes: u32,
    pub request_recovery_count: u32,
    pub max_request_recovery: u32,
    pub alternate_hint_pending: bool,
    pub alternate_strategy_used: bool,
    pub context_signature: String,
    pub previous_targets: Vec<String>,
    pub previous_plan_hash: Option<String>,
    pub degraded: bool,
}

impl PassState {
    pub fn new(max_request_recovery: u32, context_signature: String) -> Self {
        Self {
            pass: 0,
            max_passes: 1 + max_request_recovery,
            request_recovery_count: 0,
            max_request_recovery,
            alternate_hint_pending: false,
            alternate_strategy_used: false,
            context_signature,
            previous_targets: Vec::new(),
            previous_plan_hash: None,
            degraded: false,
        }
    }

    pub fn begin_pass(&mut self) {
        self.pass += 1;
    }

    pub fn exhausted(&self) -> bool {
        self.pass >= self.max_passes
    }

    pub fn is_first_pass(&self) -> bool {
        self.pass <= 1
    }

    /// Instruction hint for the pass about to run, given the outcome tags
    /// carried over from the previous pass's gate evaluation.
    pub fn hint_for_pass(&self, prior_warnings: &BTreeSet<String>, prior_blocking: &[String]) -> InstructionHint {
        if self.alternate_hint_pending {
            return InstructionHint::AlternateRetry;
        }
        if prior_blocking.iter().any(|r| r == "architect_non_dsl" || r == "architect_missing_required_sections") {
            return InstructionHint::StrictDsl;
        }
        if prior_blocking.iter().any(|r| r.starts_with("verification_")) {
            return InstructionHint::VerifyQuality;
        }
        if prior_warnings.contains("docdex_low_confidence") || prior_warnings.contains("docdex_no_hits") {
            return InstructionHint::Recovery;
        }
        InstructionHint::Refine
    }

    /// Records a repeated plan hash; flips `alternate_hint_pending` once so
    /// the next pass is told to try a materially different approach.
    pub fn note_plan_hash(&mut self, hash: &str) -> bool {
        let repeated = self.previous_plan_hash.as_deref() == Some(hash);
        if repeated && !self.alternate_strategy_used {
            self.alternate_hint_pending = true;
            self.alternate_strategy_used = true;
        } else {
            self.alternate_hint_pending = false;
        }
        self.previous_plan_hash = Some(hash.to_string());
        repeated
    }

    pub fn record_targets(&mut self, targets: Vec<String>) {
        self.previous_targets = targets;
    }

    pub fn rebind_context_signature(&mut self, signature: String) {
        self.context_signature = signature;
    }

    pub fn note_request_recovery(&mut self) -> bool {
        if self.request_recovery_count >= self.max_request_recovery {
            return false;
        }
        self.request_recovery_count += 1;
        true
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextAction {
    Continue,
    Accept,
    Degrade,
    SkipRetryNoNewContext,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_passes_is_one_plus_recovery_budget() {
        let state = PassState::new(1, "sig".to_string());
        assert_eq!(state.max_passes, 2);
    }

    #[test]
    fn repeated_plan_hash_sets_alternate_hint_once() {
        let mut state = PassState::new(2, "sig".to_string());
        assert!(!state.note_plan_hash("abc"));
        assert!(state.note_plan_hash("abc"));
        assert!(state.alternate_hint_pending);
        // a second repeat shouldn't re-arm after the strategy's been used once
        state.alternate_hint_pending = false;
        assert!(state.note_plan_hash("abc"));
        assert!(!state.alternate_hint_pending);
    }

    #[test]
    fn request_recovery_is_bounded() {
        let mut state = PassState::new(1, "sig".to_string());
        assert!(state.note_request_recovery());
        assert!(!state.note_request_recovery());
    }
}
