//! Tiered recovery from context-overflow errors.
//!
//! Tier 0 sends the transcript as is. On overflow, tier 1 cuts every tool
//! result to 200 characters and retries; tier 2 collapses everything but the
//! system prompt and the last 4 messages into a one-line notice and retries.
//! An overflow after tier 2 is permanent.

use conclave_core::error::ProviderError;
use conclave_core::message::{Message, Role};
use conclave_core::provider::ProviderResponse;
use conclave_core::text::head_tail;
use conclave_providers::is_context_overflow;
use std::future::Future;
use tracing::warn;

/// Messages kept verbatim by the tier-2 collapse.
const COLLAPSE_KEEP: usize = 4;

/// Why an LLM call could not be completed.
#[derive(Debug, thiserror::Error)]
pub enum LlmFailure {
    #[error("context overflow persists after all recovery attempts: {0}")]
    OverflowPersists(ProviderError),

    #[error(transparent)]
    Provider(ProviderError),
}

/// Tier 1: cut every tool result after the first user turn to at most
/// ~200 characters. Returns how many were cut.
pub fn emergency_trim(messages: &mut [Message]) -> usize {
    let mut cut = 0;
    for msg in messages
        .iter_mut()
        .skip(2)
        .filter(|m| m.role == Role::Tool && m.content.len() > 200)
    {
        msg.content = head_tail(&msg.content, 100, 50, "\n[emergency trim]\n");
        cut += 1;
    }
    cut
}

/// Tier 2: keep the system prompt, a notice of what was dropped, and the
/// last 4 messages. Tool results whose assistant turn would be dropped go
/// too, since providers reject orphaned tool messages. Returns how many
/// messages were removed; transcripts of 6 or fewer are left alone.
pub fn collapse_history(messages: &mut Vec<Message>) -> usize {
    if messages.len() <= COLLAPSE_KEEP + 2 {
        return 0;
    }

    let mut start = messages.len() - COLLAPSE_KEEP;
    while start < messages.len() && messages[start].role == Role::Tool {
        start += 1;
    }
    let removed = start - 1;

    let tail = messages.split_off(start);
    messages.truncate(1);
    messages.push(Message::user(format!(
        "[{removed} earlier messages removed to fit context window. Continue based on the remaining context.]"
    )));
    messages.extend(tail);
    removed
}

/// Run `call` against the transcript, applying the recovery tiers on
/// context overflow. `messages` keeps whatever trimming was applied.
pub async fn complete_with_recovery<F, Fut>(
    messages: &mut Vec<Message>,
    label: &str,
    mut call: F,
) -> Result<ProviderResponse, LlmFailure>
where
    F: FnMut(Vec<Message>) -> Fut,
    Fut: Future<Output = Result<ProviderResponse, ProviderError>>,
{
    let err = match call(messages.clone()).await {
        Ok(response) => return Ok(response),
        Err(e) if is_context_overflow(&e) => e,
        Err(e) => return Err(LlmFailure::Provider(e)),
    };

    let cut = emergency_trim(messages);
    warn!(daemon = %label, cut, error = %err, "Context overflow, tier 1: emergency trim");
    let err = match call(messages.clone()).await {
        Ok(response) => return Ok(response),
        Err(e) if is_context_overflow(&e) => e,
        Err(e) => return Err(LlmFailure::Provider(e)),
    };

    let removed = collapse_history(messages);
    warn!(daemon = %label, removed, error = %err, "Context overflow, tier 2: collapsing history");
    match call(messages.clone()).await {
        Ok(response) => Ok(response),
        Err(e) if is_context_overflow(&e) => Err(LlmFailure::OverflowPersists(e)),
        Err(e) => Err(LlmFailure::Provider(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conclave_core::message::MessageToolCall;
    use std::sync::Mutex;

    fn overflow() -> ProviderError {
        ProviderError::ContextOverflow {
            status_code: 400,
            message: "maximum context length exceeded".into(),
        }
    }

    fn ok() -> ProviderResponse {
        ProviderResponse {
            message: Message::assistant("done"),
            usage: None,
            model: "m".into(),
        }
    }

    fn call(id: &str) -> MessageToolCall {
        MessageToolCall {
            id: id.into(),
            name: "bash".into(),
            arguments: "{}".into(),
        }
    }

    fn long_transcript() -> Vec<Message> {
        let mut msgs = vec![Message::system("system"), Message::user("task")];
        for i in 0..4 {
            let id = format!("c{i}");
            msgs.push(Message::assistant_with_tools("", vec![call(&id)]));
            msgs.push(Message::tool_result(id, "bash", "y".repeat(1_000)));
        }
        msgs
    }

    #[test]
    fn emergency_trim_cuts_tool_results_only() {
        let mut msgs = long_transcript();
        msgs[1].content = "u".repeat(1_000);
        assert_eq!(emergency_trim(&mut msgs), 4);
        assert_eq!(msgs[1].content.len(), 1_000);
        for m in msgs.iter().filter(|m| m.role == Role::Tool) {
            assert!(m.content.contains("[emergency trim]"));
            assert!(m.content.len() <= 200);
        }
    }

    #[test]
    fn collapse_keeps_system_notice_and_tail() {
        let mut msgs = long_transcript();
        let removed = collapse_history(&mut msgs);
        assert_eq!(removed, 5);
        assert_eq!(msgs.len(), 6);
        assert_eq!(msgs[0].role, Role::System);
        assert_eq!(
            msgs[1].content,
            "[5 earlier messages removed to fit context window. Continue based on the remaining context.]"
        );
        assert_eq!(msgs[2].role, Role::Assistant);
    }

    #[test]
    fn collapse_drops_orphaned_tool_results() {
        let mut msgs = long_transcript();
        msgs.push(Message::assistant("thinking"));
        // Tail now starts on a tool result whose call is being dropped.
        let removed = collapse_history(&mut msgs);
        assert_eq!(removed, 7);
        assert_eq!(msgs[2].role, Role::Assistant);
        assert_eq!(msgs.len(), 5);
    }

    #[test]
    fn short_transcripts_are_not_collapsed() {
        let mut msgs = long_transcript();
        msgs.truncate(6);
        assert_eq!(collapse_history(&mut msgs), 0);
        assert_eq!(msgs.len(), 6);
    }

    #[tokio::test]
    async fn tier_one_recovers() {
        let mut msgs = long_transcript();
        let calls = Mutex::new(0);
        let result = complete_with_recovery(&mut msgs, "Test", |_m| {
            let n = {
                let mut c = calls.lock().unwrap();
                *c += 1;
                *c
            };
            async move { if n == 1 { Err(overflow()) } else { Ok(ok()) } }
        })
        .await;
        assert!(result.is_ok());
        assert_eq!(*calls.lock().unwrap(), 2);
        assert!(msgs[3].content.contains("[emergency trim]"));
        assert_eq!(msgs.len(), 10);
    }

    #[tokio::test]
    async fn persistent_overflow_is_permanent() {
        let mut msgs = long_transcript();
        let result = complete_with_recovery(&mut msgs, "Test", |_m| async {
            Err::<ProviderResponse, _>(overflow())
        }).await;
        let err = result.unwrap_err();
        assert!(matches!(err, LlmFailure::OverflowPersists(_)));
        assert!(err.to_string().starts_with("context overflow persists after all recovery attempts"));
        assert_eq!(msgs.len(), 6);
    }

    #[tokio::test]
    async fn other_errors_skip_the_ladder() {
        let mut msgs = long_transcript();
        let result = complete_with_recovery(&mut msgs, "Test", |_m| async {
            Err::<ProviderResponse, _>(ProviderError::Network("reset".into()))
        })
        .await;
        assert!(matches!(result, Err(LlmFailure::Provider(ProviderError::Network(_)))));
        assert!(!msgs[3].content.contains("[emergency trim]"));
    }
}
