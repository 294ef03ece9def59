pub mod error;
pub mod providers;
pub mod types;
pub mod functions;
pub mod history;
pub mod scenarios;
pub mod orders;
pub mod tools;
pub mod prompt;
pub mod session;
pub mod eval;

pub use error::{LLMError, ScenarioError};
pub use providers::LLMProvider;
pub use types::{
    ChatMessage, CompletionRequest, CompletionResponse, MessageRole, ProviderCapabilities,
    TokenUsage,
};
pub use functions::{
    DynKernelFunction, FunctionCall, FunctionDefinition, FunctionRegistry, KernelFunction, Tool,
    ToolCall, ToolChoice,
};
pub use history::ChatHistory;
pub use scenarios::{ScenarioStore, ScenarioTemplate, ISSUE_LABELS};
pub use orders::{Order, OrderStore};
pub use prompt::{AgentPrompt, PromptBuilder};
pub use session::{Phase, SessionTurn, SupportSession, ToolInvocation};
pub use eval::{
    EvalHarness, EvalReport, JudgeScores, LlmJudge, ReferenceSet, SemanticEvaluator,
    STANDARD_CASES,
};
pub use schemars::JsonSchema;
