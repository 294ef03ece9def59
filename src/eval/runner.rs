use std::sync::Arc;

use tracing::{error, info};

use crate::eval::judge::LlmJudge;
use crate::eval::reference::ReferenceSet;
use crate::eval::report::{EvalReport, PhaseRecord, ScenarioOutcome, ScenarioResult};
use crate::eval::semantic::SemanticEvaluator;
use crate::orders::OrderStore;
use crate::prompt::PromptBuilder;
use crate::providers::LLMProvider;
use crate::scenarios::ScenarioStore;
use crate::session::{SessionTurn, SupportSession};
use crate::LLMError;

/// The standard batch: one case per issue label.
pub const STANDARD_CASES: &[(&str, &str)] = &[
    ("LATE", "my order is late by 50 mins"),
    ("MISS", "missing Chicken Burger"),
    ("QUALITY", "The sushi was warm and stale."),
    ("WRONG", "I got a pepperoni pizza instead of a veggie one."),
    ("PAYMENT", "I was charged twice for my order."),
    ("ADDRESS", "My order is going to the wrong address!"),
    ("COLD", "My hot wings arrived cold."),
    ("TRACK", "Where is my food?"),
];

/// Batch harness: drives a fresh two-phase conversation per case and scores
/// both agent replies with the semantic scorer and the model judge. One
/// scenario's failure is recorded and the batch continues.
pub struct EvalHarness {
    provider: Arc<dyn LLMProvider>,
    model: String,
    scenarios: ScenarioStore,
    references: ReferenceSet,
    semantic: SemanticEvaluator,
    judge: LlmJudge,
}

impl EvalHarness {
    pub fn new(
        provider: Arc<dyn LLMProvider>,
        model: impl Into<String>,
        scenarios: ScenarioStore,
        references: ReferenceSet,
        semantic: SemanticEvaluator,
        judge: LlmJudge,
    ) -> Self {
        Self {
            provider,
            model: model.into(),
            scenarios,
            references,
            semantic,
            judge,
        }
    }

    pub async fn run(&self, cases: &[(&str, &str)]) -> EvalReport {
        let mut results = Vec::with_capacity(cases.len());

        for (issue_label, user_input) in cases {
            info!(scenario = issue_label, "running scenario");
            let outcome = match self.run_case(issue_label, user_input).await {
                Ok((phase1, phase2)) => ScenarioOutcome::Completed { phase1, phase2 },
                Err(err) => {
                    error!(scenario = issue_label, error = %err, "scenario failed");
                    ScenarioOutcome::Failed {
                        error: err.to_string(),
                    }
                }
            };
            results.push(ScenarioResult {
                scenario: issue_label.to_string(),
                user_input: user_input.to_string(),
                outcome,
            });
        }

        EvalReport::new(results)
    }

    async fn run_case(
        &self,
        issue_label: &str,
        user_input: &str,
    ) -> Result<(PhaseRecord, PhaseRecord), LLMError> {
        // Fresh order state per scenario so earlier resolutions can't leak.
        let store = Arc::new(OrderStore::open_in_memory()?);
        let template = self.scenarios.template_or_fallback(issue_label);
        let order = store.create_order(issue_label, &template)?;

        let prompt = PromptBuilder::new(&self.scenarios).build(issue_label)?;
        let mut session = SupportSession::new(
            self.provider.clone(),
            self.model.clone(),
            store,
            prompt,
            order.order_id.clone(),
            issue_label,
        )?;

        let processed_input = format!(
            "{user_input} (My order ID is {}). This is the initial description of the issue.",
            order.order_id
        );
        let turn1 = session.send_raw(&processed_input).await?;
        let turn1 = session.enforce_phase1_compliance(turn1).await?;
        let phase1 = self.score_phase(issue_label, user_input, turn1, 1).await?;

        let phase2_user = format!("{} Confirmed.", self.references.phase2_user_line(issue_label));
        let turn2 = session.send_raw(&phase2_user).await?;
        let phase2 = self.score_phase(issue_label, &phase2_user, turn2, 2).await?;

        Ok((phase1, phase2))
    }

    async fn score_phase(
        &self,
        issue_label: &str,
        user_input: &str,
        turn: SessionTurn,
        phase: u8,
    ) -> Result<PhaseRecord, LLMError> {
        let reference_line = self.references.ideal_agent_line(issue_label, phase);
        let semantic = self
            .semantic
            .evaluate(phase, reference_line.as_deref(), &turn.reply)
            .await;

        let tool_calls = turn.tool_names();
        let judge = self
            .judge
            .evaluate(issue_label, user_input, &turn.reply, phase, &tool_calls)
            .await?;

        Ok(PhaseRecord {
            user_input: user_input.to_string(),
            response: turn.reply,
            tool_calls,
            resolved: turn.resolved_via_store || turn.resolved_via_keywords,
            awaiting_confirmation: turn.awaiting_confirmation,
            degraded: turn.degraded,
            semantic,
            judge,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::scripted::ScriptedProvider;
    use crate::scenarios::ScenarioTemplate;

    const JUDGMENT: &str = r#"{"empathy": 8, "accuracy": 7, "policy_compliance": 8,
        "resolution_quality": 6, "phase_compliance": 9, "overall_score": 7.6,
        "justification": "Solid reply.", "strengths": [], "weaknesses": [],
        "failure_modes": []}"#;

    const REFERENCES: &str = "## 1. LATE (Late Delivery)

**Ideal Flow**:
User: my order is late by 50 mins
Agent: I'm so sorry for the delay. Could you confirm how late it is?
User: It's 50 minutes late now.
Agent: A credit has been issued. Has this resolved your issue?
";

    fn harness(agent: ScriptedProvider) -> EvalHarness {
        let scenarios = ScenarioStore::from_templates(vec![(
            "LATE".to_string(),
            ScenarioTemplate {
                status: "out for delivery".to_string(),
                items: vec!["Hot Wings".to_string()],
                eta: Some("15 minutes".to_string()),
                prompt_suffix: String::new(),
            },
        )]);
        let references = ReferenceSet::parse(REFERENCES);
        let judge_provider = Arc::new(ScriptedProvider::from_texts(vec![JUDGMENT; 4]));
        EvalHarness::new(
            Arc::new(agent),
            "scripted",
            scenarios,
            references,
            SemanticEvaluator::lexical(),
            LlmJudge::new(judge_provider, "scripted-judge"),
        )
    }

    #[tokio::test]
    async fn a_scripted_case_produces_two_scored_phases() {
        let agent = ScriptedProvider::from_texts([
            "I'm so sorry for the delay. Could you confirm how late it is?",
            "A credit has been issued. Has this resolved your issue?",
        ]);
        let report = harness(agent).run(&[("LATE", "my order is late by 50 mins")]).await;

        assert_eq!(report.completed(), 1);
        let ScenarioOutcome::Completed { phase1, phase2 } = &report.results[0].outcome else {
            panic!("expected completed outcome");
        };
        assert_eq!(phase1.semantic.phase, 1);
        assert!(phase1.semantic.similarity.expect("scored") > 90.0);
        assert_eq!(phase1.judge.empathy, 8.0);
        assert!(phase2.resolved, "keyword resolution should be detected");
        assert!(phase2.awaiting_confirmation);
        // Simulated Phase-2 turn comes from the reference flow.
        assert!(phase2.user_input.starts_with("It's 50 minutes late now."));
        assert!(phase2.user_input.ends_with(" Confirmed."));
    }

    #[tokio::test]
    async fn a_failing_scenario_does_not_stop_the_batch() {
        // One reply only: the second scenario's phase 1 fails, and with the
        // script exhausted its fallback degrades rather than erroring, so
        // the batch still records both scenarios.
        let agent = ScriptedProvider::from_texts([
            "I'm so sorry for the delay. Could you confirm how late it is?",
            "A credit has been issued. Has this resolved your issue?",
        ]);
        let report = harness(agent)
            .run(&[
                ("LATE", "my order is late by 50 mins"),
                ("LATE", "still late"),
            ])
            .await;

        assert_eq!(report.results.len(), 2);
        assert_eq!(report.completed(), 2);
        let ScenarioOutcome::Completed { phase1, .. } = &report.results[1].outcome else {
            panic!("expected completed outcome");
        };
        assert!(phase1.degraded);
    }
}
