//! Keyword heuristic classifier (fast, no API call)

use async_trait::async_trait;
use tracing::debug;

use super::{Classification, Classifier, TargetAgent, last_user_line};
use crate::error::ClassifierError;

/// Someone is stuck and needs a human to follow up
const ESCALATION_SIGNALS: &[&str] = &[
    "still waiting",
    "still not",
    "not resolved",
    "unresolved",
    "escalate",
    "complaint",
    "open a ticket",
    "speak to someone",
    "speak to a human",
    "nobody has",
];

const POLICY_SIGNALS: &[&str] = &[
    "policy",
    "coverage",
    "covered",
    "premium",
    "deductible",
    "renew",
    "beneficiary",
    "my plan",
];

/// Insurance-related, but not clearly about the policy itself
const INSURANCE_SIGNALS: &[&str] = &[
    "insurance",
    "insured",
    "insurer",
    "claim",
    "payout",
    "accident",
    "damage",
    "refund",
    "problem",
    "issue",
];

/// Deterministic classifier used when no model backend is configured
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordClassifier;

impl KeywordClassifier {
    pub fn new() -> Self {
        Self
    }

    pub fn classify_text(&self, chat_history: &str) -> Classification {
        let turn = last_user_line(chat_history).to_lowercase();
        let has = |signals: &[&str]| signals.iter().any(|s| turn.contains(s));

        let classification = if has(ESCALATION_SIGNALS) {
            Classification::new(TargetAgent::TicketingAgent, 0.8)
                .with_reasoning("The user reports an unresolved insurance issue.")
        } else if has(POLICY_SIGNALS) {
            Classification::new(TargetAgent::PolicyAgent, 0.8)
                .with_reasoning("The user asks about their policy.")
        } else if has(INSURANCE_SIGNALS) {
            // Unsure insurance queries go to ticketing
            Classification::new(TargetAgent::TicketingAgent, 0.6)
                .with_reasoning("Insurance-related, but not about the policy itself.")
        } else {
            Classification::new(TargetAgent::TriageAgent, 0.5)
                .with_reasoning("The query does not look insurance-related.")
        };

        debug!(
            "Keyword classifier chose {} ({:.2})",
            classification.target, classification.confidence
        );
        classification
    }
}

#[async_trait]
impl Classifier for KeywordClassifier {
    fn name(&self) -> &str {
        "keyword"
    }

    async fn classify(&self, chat_history: &str) -> Result<Classification, ClassifierError> {
        Ok(self.classify_text(chat_history))
    }
}
