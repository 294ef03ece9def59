//! Dual evaluation pipeline: reference-based semantic scoring plus an
//! LLM-judged rubric, batched over the standard scenario cases.

pub mod judge;
pub mod reference;
pub mod report;
pub mod runner;
pub mod semantic;

pub use judge::{Comparison, JudgeScores, LlmJudge};
pub use reference::ReferenceSet;
pub use report::{EvalReport, PhaseRecord, ScenarioOutcome, ScenarioResult};
pub use runner::{EvalHarness, STANDARD_CASES};
pub use semantic::{Embedder, ProviderEmbedder, RubricScores, SemanticEvaluator, SemanticReport};
