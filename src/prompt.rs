use handlebars::Handlebars;
use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use serde_json::json;
use tracing::warn;

use crate::scenarios::ScenarioStore;
use crate::types::ChatMessage;
use crate::LLMError;

/// System prompt template enforcing the two-phase conversational contract.
/// Phase discipline lives almost entirely in this text; the only hard gate
/// is the resolver's confirmation check.
const SYSTEM_TEMPLATE: &str = include_str!("../prompts/system.hbs");

const NO_INSTRUCTIONS: &str = "No specific instructions found.";

static FEW_SHOT_HEADER: Lazy<Regex> = Lazy::new(|| {
    RegexBuilder::new(r"^\s*\[FEW-SHOT EXAMPLES\]\s*$")
        .case_insensitive(true)
        .multi_line(true)
        .build()
        .expect("few-shot header regex")
});

// Older configuration styles mark the section with bold markdown instead.
static FEW_SHOT_HEADER_LEGACY: Lazy<Regex> = Lazy::new(|| {
    RegexBuilder::new(r"\*\*?Few-?shot examples?:?\*\*?")
        .case_insensitive(true)
        .build()
        .expect("legacy few-shot header regex")
});

static EXAMPLE_DELIMITER: Lazy<Regex> = Lazy::new(|| {
    RegexBuilder::new(r"Example\s+\w+\s*:")
        .case_insensitive(true)
        .build()
        .expect("example delimiter regex")
});

static TURN_DELIMITER: Lazy<Regex> = Lazy::new(|| {
    RegexBuilder::new(r"\*\*?User\s*:\*\*?|\*\*?Agent\s*:\*\*?|User\s*:|Agent\s*:")
        .case_insensitive(true)
        .build()
        .expect("turn delimiter regex")
});

/// The assembled prompt for one scenario: the rendered system instructions
/// plus parsed few-shot turns in their original order.
#[derive(Debug, Clone)]
pub struct AgentPrompt {
    pub system: String,
    pub few_shot: Vec<ChatMessage>,
}

pub struct PromptBuilder<'a> {
    scenarios: &'a ScenarioStore,
    handlebars: Handlebars<'static>,
}

impl<'a> PromptBuilder<'a> {
    pub fn new(scenarios: &'a ScenarioStore) -> Self {
        Self {
            scenarios,
            handlebars: Handlebars::new(),
        }
    }

    /// Builds the system instructions and few-shot turns for an issue label.
    /// Unknown labels get the generic instruction text rather than failing.
    pub fn build(&self, issue_label: &str) -> Result<AgentPrompt, LLMError> {
        let suffix = self
            .scenarios
            .get(issue_label)
            .map(|template| template.prompt_suffix.clone())
            .unwrap_or_else(|| NO_INSTRUCTIONS.to_string());

        let (few_shot_pairs, instructions) = parse_few_shot_examples(&suffix);

        let instructions = if instructions.trim().is_empty() {
            NO_INSTRUCTIONS.to_string()
        } else {
            instructions
        };

        let system = self
            .handlebars
            .render_template(SYSTEM_TEMPLATE, &json!({ "scenario_instructions": instructions }))
            .map_err(|error| LLMError::Provider(format!("prompt template error: {error}")))?;

        let mut few_shot = Vec::with_capacity(few_shot_pairs.len() * 2);
        for (user, agent) in few_shot_pairs {
            few_shot.push(ChatMessage::user(user));
            few_shot.push(ChatMessage::assistant(agent));
        }

        Ok(AgentPrompt { system, few_shot })
    }
}

/// Splits a prompt suffix into (user, agent) example pairs and the cleaned
/// instruction text. Malformed example blocks are skipped with a warning;
/// parsing is never fatal.
pub fn parse_few_shot_examples(suffix: &str) -> (Vec<(String, String)>, String) {
    let header = FEW_SHOT_HEADER
        .find(suffix)
        .or_else(|| FEW_SHOT_HEADER_LEGACY.find(suffix));

    let Some(header) = header else {
        return (Vec::new(), suffix.trim().to_string());
    };

    let instructions = suffix[..header.start()].trim().to_string();
    let examples_part = &suffix[header.end()..];

    let mut pairs = Vec::new();
    let blocks: Vec<&str> = EXAMPLE_DELIMITER.split(examples_part).skip(1).collect();
    for (index, block) in blocks.iter().enumerate() {
        let parts: Vec<&str> = TURN_DELIMITER.split(block).collect();
        if parts.len() < 3 {
            warn!(example = index + 1, "few-shot example missing a User or Agent half, skipping");
            continue;
        }

        let user_turn = parts[1].trim();
        let agent_turn = parts[2].trim();
        if user_turn.is_empty() || agent_turn.is_empty() {
            warn!(example = index + 1, "few-shot example has empty user or agent content, skipping");
            continue;
        }

        pairs.push((user_turn.to_string(), agent_turn.to_string()));
    }

    (pairs, instructions)
}
