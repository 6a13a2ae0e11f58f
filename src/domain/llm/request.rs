use serde::{Deserialize, Serialize};

use super::{Message, MessageRole};

/// Parameters for a single completion call against a model backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// Conversation so far, system message(s) included
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Ask the backend for JSON-constrained output
    #[serde(default)]
    pub json_output: bool,
    /// Handle of a provider-side cached context to reuse, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cached_context: Option<String>,
}

impl CompletionRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            temperature: None,
            max_tokens: None,
            json_output: false,
            cached_context: None,
        }
    }

    pub fn builder() -> CompletionRequestBuilder {
        CompletionRequestBuilder::default()
    }

    /// Messages that are not system instructions, in order.
    pub fn conversation_messages(&self) -> Vec<&Message> {
        self.messages
            .iter()
            .filter(|m| m.role != MessageRole::System)
            .collect()
    }

    /// All system message contents joined into one instruction block.
    pub fn system_instruction(&self) -> Option<String> {
        let joined = self
            .messages
            .iter()
            .filter(|m| m.role == MessageRole::System)
            .map(|m| m.content())
            .collect::<Vec<_>>()
            .join("\n");

        if joined.is_empty() { None } else { Some(joined) }
    }
}

/// Builder for CompletionRequest
#[derive(Debug, Default)]
pub struct CompletionRequestBuilder {
    messages: Vec<Message>,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    json_output: bool,
    cached_context: Option<String>,
}

impl CompletionRequestBuilder {
    pub fn message(mut self, message: Message) -> Self {
        self.messages.push(message);
        self
    }

    pub fn messages(mut self, messages: Vec<Message>) -> Self {
        self.messages.extend(messages);
        self
    }

    pub fn system(self, content: impl Into<String>) -> Self {
        self.message(Message::system(content))
    }

    pub fn user(self, content: impl Into<String>) -> Self {
        self.message(Message::user(content))
    }

    pub fn assistant(self, content: impl Into<String>) -> Self {
        self.message(Message::assistant(content))
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn max_tokens(mut self, tokens: u32) -> Self {
        self.max_tokens = Some(tokens);
        self
    }

    pub fn json_output(mut self, json: bool) -> Self {
        self.json_output = json;
        self
    }

    pub fn cached_context(mut self, handle: impl Into<String>) -> Self {
        self.cached_context = Some(handle.into());
        self
    }

    pub fn build(self) -> CompletionRequest {
        CompletionRequest {
            messages: self.messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            json_output: self.json_output,
            cached_context: self.cached_context,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builder() {
        let request = CompletionRequest::builder()
            .system("You are a helpful assistant")
            .user("Hello!")
            .temperature(0.7)
            .max_tokens(100)
            .build();

        assert_eq!(request.messages.len(), 2);
        assert_eq!(request.temperature, Some(0.7));
        assert_eq!(request.max_tokens, Some(100));
        assert!(!request.json_output);
        assert!(request.cached_context.is_none());
    }

    #[test]
    fn test_system_instruction_joins_system_messages() {
        let request = CompletionRequest::builder()
            .system("First rule")
            .user("Hi")
            .system("Second rule")
            .build();

        assert_eq!(
            request.system_instruction(),
            Some("First rule\nSecond rule".to_string())
        );
        assert_eq!(request.conversation_messages().len(), 1);
    }

    #[test]
    fn test_no_system_instruction() {
        let request = CompletionRequest::builder().user("Hi").build();
        assert!(request.system_instruction().is_none());
    }
}
