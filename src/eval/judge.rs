use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::providers::LLMProvider;
use crate::types::{ChatMessage, CompletionRequest};
use crate::LLMError;

/// Model-judged rubric scores, each dimension 0 to 10.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgeScores {
    #[serde(default)]
    pub empathy: f32,
    #[serde(default)]
    pub accuracy: f32,
    #[serde(default)]
    pub policy_compliance: f32,
    #[serde(default)]
    pub resolution_quality: f32,
    #[serde(default)]
    pub phase_compliance: f32,
    #[serde(default)]
    pub overall_score: f32,
    #[serde(default)]
    pub justification: String,
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub weaknesses: Vec<String>,
    #[serde(default)]
    pub failure_modes: Vec<String>,
}

impl JudgeScores {
    /// All-zero scores tagged `evaluation_error`, returned when the judge's
    /// output cannot be parsed.
    pub fn evaluation_error() -> Self {
        Self {
            empathy: 0.0,
            accuracy: 0.0,
            policy_compliance: 0.0,
            resolution_quality: 0.0,
            phase_compliance: 0.0,
            overall_score: 0.0,
            justification: "Error parsing judge response".to_string(),
            strengths: Vec::new(),
            weaknesses: vec!["Evaluation failed".to_string()],
            failure_modes: vec!["evaluation_error".to_string()],
        }
    }

    pub fn is_evaluation_error(&self) -> bool {
        self.failure_modes.iter().any(|mode| mode == "evaluation_error")
    }
}

/// Outcome of a pairwise A/B comparison.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comparison {
    pub winner: String,
    #[serde(default)]
    pub confidence: f32,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub dimension_comparison: std::collections::BTreeMap<String, String>,
}

impl Comparison {
    fn tie(reasoning: &str) -> Self {
        Self {
            winner: "tie".to_string(),
            confidence: 0.0,
            reasoning: reasoning.to_string(),
            dimension_comparison: Default::default(),
        }
    }
}

/// Grades agent replies with a second model pass over a fixed five-dimension
/// rubric. Transport failures propagate; malformed judgments degrade to the
/// tagged zero default so a batch never stops on one bad judgment.
pub struct LlmJudge {
    provider: Arc<dyn LLMProvider>,
    model: String,
}

impl LlmJudge {
    pub fn new(provider: Arc<dyn LLMProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
        }
    }

    pub async fn evaluate(
        &self,
        scenario: &str,
        user_input: &str,
        agent_response: &str,
        phase: u8,
        tool_calls: &[String],
    ) -> Result<JudgeScores, LLMError> {
        let prompt = build_evaluation_prompt(scenario, user_input, agent_response, phase, tool_calls);
        let content = self.invoke(prompt).await?;

        match extract_json(&content).and_then(|json| serde_json::from_str::<JudgeScores>(json).ok())
        {
            Some(scores) => Ok(scores),
            None => {
                warn!(scenario, phase, "judge returned unparseable output");
                Ok(JudgeScores::evaluation_error())
            }
        }
    }

    /// Pairwise comparison of two candidate replies to the same query.
    pub async fn compare(
        &self,
        user_input: &str,
        response_a: &str,
        response_b: &str,
    ) -> Result<Comparison, LLMError> {
        let prompt = build_comparison_prompt(user_input, response_a, response_b);
        let content = self.invoke(prompt).await?;

        match extract_json(&content).and_then(|json| serde_json::from_str::<Comparison>(json).ok())
        {
            Some(comparison) => Ok(comparison),
            None => {
                warn!("judge returned unparseable comparison");
                Ok(Comparison::tie("Error parsing comparison"))
            }
        }
    }

    async fn invoke(&self, prompt: String) -> Result<String, LLMError> {
        let request = CompletionRequest::new(
            self.model.clone(),
            vec![ChatMessage::user(prompt)],
        )
        .with_temperature(0.0);

        let response = self.provider.complete(request).await?;
        Ok(response.message.text().unwrap_or_default().to_string())
    }
}

/// Extracts the JSON object between the first `{` and the last `}`, since
/// judge models tend to wrap their answer in prose.
pub fn extract_json(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&text[start..=end])
}

fn build_evaluation_prompt(
    scenario: &str,
    user_input: &str,
    agent_response: &str,
    phase: u8,
    tool_calls: &[String],
) -> String {
    let tool_info = if tool_calls.is_empty() {
        String::new()
    } else {
        format!("\n**Tools Called**: {}", tool_calls.join(", "))
    };

    let phase_requirements = if phase == 1 {
        "- Phase 1: Start with empathy, gather information, ask ONE clarifying question. \
         DO NOT offer solutions, credits, or resolutions."
    } else {
        "- Phase 2: Provide a clear solution based on confirmed details, ask for final confirmation."
    };

    format!(
        r#"You are an expert evaluator for customer support chatbot quality.

**Context:**
- Scenario Type: {scenario}
- Conversation Phase: {phase}
- User Query: "{user_input}"
- Agent Response: "{agent_response}"{tool_info}

**Evaluation Task:**
Rate the agent's response on the following dimensions (0-10 scale):

1. **Empathy (0-10)**: Does the agent acknowledge the customer's frustration with genuine care and understanding?
   - 0-3: Robotic, dismissive, or no empathy
   - 4-6: Basic acknowledgment but feels scripted
   - 7-8: Good empathy, feels genuine
   - 9-10: Exceptional empathy, makes customer feel truly heard

2. **Accuracy (0-10)**: Does the agent use correct, verified information?
   - 0-3: Hallucinated facts, wrong information
   - 4-6: Mostly accurate but vague
   - 7-8: Accurate with specific details
   - 9-10: Precise, verified information from tools

3. **Policy Compliance (0-10)**: Does the response follow company support policies?
   - 0-3: Major policy violations
   - 4-6: Minor deviations from policy
   - 7-8: Follows policy appropriately
   - 9-10: Perfect policy adherence with good judgment

4. **Resolution Quality (0-10)**: Is the proposed solution appropriate and effective?
   - 0-3: No solution or inappropriate solution
   - 4-6: Partial solution or unclear next steps
   - 7-8: Good solution, clearly communicated
   - 9-10: Optimal solution with clear confirmation

5. **Phase Compliance (0-10)**: Does the response follow phase-specific rules?
   - Phase 1: Must express empathy + ask clarifying question. Must NOT offer resolutions.
   - Phase 2: Must offer clear solution + ask for confirmation.

   - 0-3: Major phase violations (e.g., offering credits in Phase 1)
   - 4-6: Partial compliance with phase requirements
   - 7-8: Follows phase rules correctly
   - 9-10: Exemplary phase adherence

**Phase-Specific Requirements:**
{phase_requirements}

**Output Format (JSON only, no other text):**
{{
    "empathy": <score 0-10>,
    "accuracy": <score 0-10>,
    "policy_compliance": <score 0-10>,
    "resolution_quality": <score 0-10>,
    "phase_compliance": <score 0-10>,
    "overall_score": <average of above>,
    "justification": "<2-3 sentence explanation of scores>",
    "strengths": ["<strength 1>", "<strength 2>"],
    "weaknesses": ["<weakness 1>", "<weakness 2>"],
    "failure_modes": ["<any detected failures, e.g., 'hallucination', 'phase_violation', 'empathy_failure'>"]
}}
"#
    )
}

fn build_comparison_prompt(user_input: &str, response_a: &str, response_b: &str) -> String {
    format!(
        r#"You are comparing two customer support chatbot responses.

**User Query**: "{user_input}"

**Response A**: "{response_a}"

**Response B**: "{response_b}"

**Task**: Determine which response is better for customer support.

**Output Format (JSON only):**
{{
    "winner": "A" or "B" or "tie",
    "confidence": <0.0-1.0, how confident are you>,
    "reasoning": "<2-3 sentences explaining your choice>",
    "dimension_comparison": {{
        "empathy": "A" or "B" or "tie",
        "accuracy": "A" or "B" or "tie",
        "clarity": "A" or "B" or "tie",
        "professionalism": "A" or "B" or "tie"
    }}
}}
"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::scripted::ScriptedProvider;

    #[test]
    fn json_is_extracted_from_surrounding_prose() {
        let text = "Here is my judgment:\n{\"empathy\": 8}\nHope that helps.";
        assert_eq!(extract_json(text), Some("{\"empathy\": 8}"));
        assert_eq!(extract_json("no json at all"), None);
        assert_eq!(extract_json("} reversed {"), None);
    }

    #[tokio::test]
    async fn well_formed_judgment_is_parsed() {
        let provider = ScriptedProvider::from_texts([
            r#"Sure! {"empathy": 9, "accuracy": 8, "policy_compliance": 7,
                "resolution_quality": 6, "phase_compliance": 10,
                "overall_score": 8.0,
                "justification": "Strong empathy and correct phase behavior.",
                "strengths": ["empathy"], "weaknesses": [],
                "failure_modes": []}"#,
        ]);
        let judge = LlmJudge::new(std::sync::Arc::new(provider), "judge-model");

        let scores = judge
            .evaluate("LATE", "my order is late", "I'm so sorry...", 1, &[])
            .await
            .expect("judge");
        assert_eq!(scores.empathy, 9.0);
        assert_eq!(scores.phase_compliance, 10.0);
        assert!(!scores.is_evaluation_error());
    }

    #[tokio::test]
    async fn unparseable_judgment_degrades_to_the_tagged_default() {
        let provider = ScriptedProvider::from_texts(["I refuse to answer in JSON."]);
        let judge = LlmJudge::new(std::sync::Arc::new(provider), "judge-model");

        let scores = judge
            .evaluate("LATE", "input", "reply", 2, &[])
            .await
            .expect("judge");
        assert!(scores.is_evaluation_error());
        assert_eq!(scores.overall_score, 0.0);
    }

    #[tokio::test]
    async fn comparison_parses_or_falls_back_to_tie() {
        let provider = ScriptedProvider::from_texts([
            r#"{"winner": "B", "confidence": 0.8, "reasoning": "B is more specific.",
                "dimension_comparison": {"empathy": "tie", "accuracy": "B"}}"#,
            "not json",
        ]);
        let judge = LlmJudge::new(std::sync::Arc::new(provider), "judge-model");

        let first = judge.compare("q", "a", "b").await.expect("compare");
        assert_eq!(first.winner, "B");

        let second = judge.compare("q", "a", "b").await.expect("compare");
        assert_eq!(second.winner, "tie");
    }
}
