//! Scripted providers for tests.

use async_trait::async_trait;
use conclave_core::error::ProviderError;
use conclave_core::message::{Message, MessageToolCall};
use conclave_core::provider::{Provider, ProviderRequest, ProviderResponse, Usage};
use std::sync::Mutex;

/// A mock provider that returns a sequence of scripted results.
///
/// Each call to `complete` returns the next entry in the queue. Panics if
/// more calls are made than entries provided.
pub struct SequentialMockProvider {
    steps: Mutex<Vec<Result<ProviderResponse, ProviderError>>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl SequentialMockProvider {
    pub fn new(responses: Vec<ProviderResponse>) -> Self {
        Self::scripted(responses.into_iter().map(Ok).collect())
    }

    /// Interleave responses and errors.
    pub fn scripted(steps: Vec<Result<ProviderResponse, ProviderError>>) -> Self {
        Self {
            steps: Mutex::new(steps),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Create a provider that returns a single text response (no tool calls).
    pub fn single_text(text: &str) -> Self {
        Self::new(vec![make_text_response(text)])
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Every request received so far, oldest first.
    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for SequentialMockProvider {
    fn name(&self) -> &str {
        "sequential_mock"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let call = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request);
            requests.len()
        };
        let mut steps = self.steps.lock().unwrap();
        if steps.is_empty() {
            panic!("SequentialMockProvider: no more responses (call #{call})");
        }
        steps.remove(0)
    }
}

type Responder = dyn Fn(&ProviderRequest) -> Result<ProviderResponse, ProviderError> + Send + Sync;

/// A provider that answers each request with a closure. Useful when
/// concurrent daemons make the call order nondeterministic.
pub struct FnProvider {
    respond: Box<Responder>,
    calls: Mutex<usize>,
}

impl FnProvider {
    pub fn new(
        respond: impl Fn(&ProviderRequest) -> Result<ProviderResponse, ProviderError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            respond: Box::new(respond),
            calls: Mutex::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl Provider for FnProvider {
    fn name(&self) -> &str {
        "fn_mock"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        *self.calls.lock().unwrap() += 1;
        (self.respond)(&request)
    }
}

/// The system prompt of a request, if any.
pub fn system_prompt(request: &ProviderRequest) -> &str {
    request
        .messages
        .first()
        .filter(|m| m.role == conclave_core::message::Role::System)
        .map(|m| m.content.as_str())
        .unwrap_or_default()
}

/// Create a simple text response (no tool calls).
pub fn make_text_response(text: &str) -> ProviderResponse {
    ProviderResponse {
        message: Message::assistant(text),
        usage: Some(Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        }),
        model: "mock-model".into(),
    }
}

/// Create a response with tool calls and optional thought content.
pub fn make_tool_call_response(tool_calls: Vec<MessageToolCall>, thought: &str) -> ProviderResponse {
    ProviderResponse {
        message: Message::assistant_with_tools(thought, tool_calls),
        ..make_text_response("")
    }
}

/// Helper to create a tool call.
pub fn make_tool_call(name: &str, args: serde_json::Value) -> MessageToolCall {
    MessageToolCall {
        id: format!("call_{name}"),
        name: name.to_string(),
        arguments: serde_json::to_string(&args).unwrap(),
    }
}
