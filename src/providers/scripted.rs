use std::sync::Mutex;

use async_trait::async_trait;

use crate::{
    functions::{FunctionCall, ToolCall},
    providers::LLMProvider,
    types::{ChatMessage, CompletionRequest, CompletionResponse, ProviderCapabilities},
    LLMError,
};

/// Replays a fixed sequence of assistant messages, one per `complete` call.
/// Lets the session loop and the eval runner be exercised deterministically,
/// including turns that request tool calls.
pub struct ScriptedProvider {
    responses: Mutex<std::vec::IntoIter<ChatMessage>>,
}

impl ScriptedProvider {
    pub fn new(responses: Vec<ChatMessage>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter()),
        }
    }

    pub fn from_texts<I, S>(texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(texts.into_iter().map(ChatMessage::assistant).collect())
    }

    /// Convenience for scripting an assistant turn that calls one tool.
    pub fn tool_call_turn(tool: &str, arguments: serde_json::Value) -> ChatMessage {
        let call = ToolCall::new(FunctionCall::new(tool, arguments)).with_id(format!(
            "scripted_{tool}"
        ));
        let mut message = ChatMessage::assistant("");
        message.content = None;
        message.tool_calls = vec![call];
        message
    }
}

#[async_trait]
impl LLMProvider for ScriptedProvider {
    async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse, LLMError> {
        let next = self
            .responses
            .lock()
            .map_err(|_| LLMError::Provider("scripted provider poisoned".to_string()))?
            .next();

        match next {
            Some(message) => Ok(CompletionResponse {
                message,
                usage: None,
            }),
            None => Err(LLMError::Provider(
                "no more scripted responses".to_string(),
            )),
        }
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities::new(true, false)
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}
