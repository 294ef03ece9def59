use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::Serialize;

use crate::eval::judge::JudgeScores;
use crate::eval::semantic::SemanticReport;

/// Everything recorded for one phase of one scenario.
#[derive(Debug, Clone, Serialize)]
pub struct PhaseRecord {
    pub user_input: String,
    pub response: String,
    pub tool_calls: Vec<String>,
    pub resolved: bool,
    pub awaiting_confirmation: bool,
    pub degraded: bool,
    pub semantic: SemanticReport,
    pub judge: JudgeScores,
}

#[derive(Debug, Clone, Serialize)]
pub enum ScenarioOutcome {
    Completed {
        phase1: PhaseRecord,
        phase2: PhaseRecord,
    },
    /// The scenario aborted; the batch carries on with the rest.
    Failed { error: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct ScenarioResult {
    pub scenario: String,
    pub user_input: String,
    pub outcome: ScenarioOutcome,
}

#[derive(Debug, Serialize)]
pub struct EvalReport {
    pub generated_at: DateTime<Local>,
    pub results: Vec<ScenarioResult>,
}

impl EvalReport {
    pub fn new(results: Vec<ScenarioResult>) -> Self {
        Self {
            generated_at: Local::now(),
            results,
        }
    }

    pub fn completed(&self) -> usize {
        self.results
            .iter()
            .filter(|result| matches!(result.outcome, ScenarioOutcome::Completed { .. }))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.completed()
    }

    pub fn timestamp(&self) -> String {
        self.generated_at.format("%Y-%m-%d_%H-%M-%S").to_string()
    }

    pub fn filename(&self) -> String {
        format!("evaluation_report_{}.md", self.timestamp())
    }

    /// Writes the markdown report into `dir`, returning the full path.
    pub fn write_to(&self, dir: impl AsRef<Path>) -> io::Result<PathBuf> {
        let path = dir.as_ref().join(self.filename());
        fs::write(&path, self.to_markdown())?;
        Ok(path)
    }

    pub fn to_markdown(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "# Agent Evaluation Report (Dual Evaluation Mode)");
        let _ = writeln!(out, "**Generated:** {}\n", self.timestamp());
        out.push_str("This report includes **two evaluation methods**:\n");
        out.push_str("1. **Semantic Similarity**: Reference-based comparison against ideal responses\n");
        out.push_str("2. **LLM-as-Judge**: Model-based evaluation across multiple dimensions\n\n");
        out.push_str("---\n\n");

        for result in &self.results {
            match &result.outcome {
                ScenarioOutcome::Failed { error } => {
                    let _ = writeln!(
                        out,
                        "## Scenario: {}\n- **Error**: {error}\n",
                        result.scenario
                    );
                }
                ScenarioOutcome::Completed { phase1, phase2 } => {
                    let _ = writeln!(out, "## Scenario: {}\n", result.scenario);
                    let _ = writeln!(out, "### User Input\n`{}`\n", result.user_input);

                    render_phase(&mut out, "Phase 1: Information Gathering", phase1, false);
                    render_phase(&mut out, "Phase 2: Resolution", phase2, true);
                    out.push_str("---\n\n");
                }
            }
        }

        out
    }
}

fn render_phase(out: &mut String, heading: &str, record: &PhaseRecord, resolution_phase: bool) {
    let _ = writeln!(out, "### {heading}\n");
    let _ = writeln!(out, "**Agent Response:**\n> {}\n", record.response);
    if !record.tool_calls.is_empty() {
        let _ = writeln!(out, "**Tools Called:** {}\n", record.tool_calls.join(", "));
    }
    if record.degraded {
        out.push_str("**Note:** agent invocation failed; the status fallback answered.\n\n");
    }

    let _ = writeln!(out, "**Semantic Evaluation:**\n- `{}`\n", record.semantic.summary());

    let judge = &record.judge;
    out.push_str("**LLM-as-Judge Evaluation:**\n");
    let _ = writeln!(out, "- **Overall Score:** {:.1}/10", judge.overall_score);
    if resolution_phase {
        let _ = writeln!(out, "- **Resolution Quality:** {}/10", judge.resolution_quality);
    } else {
        let _ = writeln!(out, "- **Empathy:** {}/10", judge.empathy);
    }
    let _ = writeln!(out, "- **Accuracy:** {}/10", judge.accuracy);
    let _ = writeln!(out, "- **Phase Compliance:** {}/10", judge.phase_compliance);
    let _ = writeln!(out, "- **Policy Compliance:** {}/10", judge.policy_compliance);
    let _ = writeln!(out, "- **Justification:** {}", judge.justification);
    if !judge.strengths.is_empty() {
        let _ = writeln!(out, "- **Strengths:** {}", judge.strengths.join(", "));
    }
    if !judge.weaknesses.is_empty() {
        let _ = writeln!(out, "- **Weaknesses:** {}", judge.weaknesses.join(", "));
    }
    if !judge.failure_modes.is_empty() {
        let _ = writeln!(out, "- **Failure Modes:** {}", judge.failure_modes.join(", "));
    }
    out.push('\n');
}
