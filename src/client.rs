//! the injected completion seam.
//!
//! the chat page never builds its own http client. whoever issues requests
//! receives a `CompletionClient`, so tests can hand in a scripted stream.

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures_lite::{Stream, StreamExt};

use crate::error::ChatError;
use crate::{ChatMessage, LLMProvider, StreamChoice, StreamResponse};

/// lazy, finite, non-restartable sequence of text fragments for one turn.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String, ChatError>> + Send>>;

#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// opens a streaming completion for a single user input.
    async fn open_stream(&self, input: &str) -> Result<FragmentStream, ChatError>;
}

/// adapts an `llm` provider (openai-compatible chat completions).
#[derive(Clone)]
pub struct LlmClient {
    provider: Arc<dyn LLMProvider>,
}

impl LlmClient {
    pub fn new(provider: Arc<dyn LLMProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl CompletionClient for LlmClient {
    async fn open_stream(&self, input: &str) -> Result<FragmentStream, ChatError> {
        // one user message per turn; history is not forwarded.
        let messages = vec![ChatMessage::user().content(input.to_string()).build()];
        let stream = self.provider.chat_stream_struct(&messages).await?;
        Ok(Box::pin(stream.map(|item| {
            item.map(first_choice_content).map_err(ChatError::from)
        })))
    }
}

/// the delta text of the first choice; chunks without one yield "".
fn first_choice_content(chunk: StreamResponse) -> String {
    chunk
        .choices
        .into_iter()
        .next()
        .and_then(|StreamChoice { delta, .. }| delta.content)
        .unwrap_or_default()
}


#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn chunk(value: serde_json::Value) -> StreamResponse {
        serde_json::from_value(value).expect("valid stream chunk")
    }

    #[test]
    fn takes_first_choice_only() {
        let c = chunk(json!({
            "choices": [
                { "delta": { "content": "Hel" } },
                { "delta": { "content": "ignored" } }
            ]
        }));
        assert_eq!(first_choice_content(c), "Hel");
    }

    #[test]
    fn missing_content_becomes_empty_fragment() {
        let c = chunk(json!({ "choices": [ { "delta": {} } ] }));
        assert_eq!(first_choice_content(c), "");
    }

    #[test]
    fn chunk_without_choices_becomes_empty_fragment() {
        let c = chunk(json!({ "choices": [] }));
        assert_eq!(first_choice_content(c), "");
    }
}
