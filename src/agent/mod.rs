pub mod providers;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::types::{Message, StreamEvent};
use providers::LlmProvider;

/// Drives one completion request for the chat loop.
///
/// Messages go out as `[system prompt, recalled memories, history...]`;
/// events are forwarded to `tx` as they arrive and the concatenated reply
/// text is returned once the provider finishes.
pub struct AgentRunner {
    system_prompt: Option<String>,
}

impl AgentRunner {
    pub fn new(system_prompt: Option<String>) -> Self {
        Self {
            system_prompt: system_prompt.filter(|p| !p.trim().is_empty()),
        }
    }

    /// Build the provider payload for one turn.
    pub fn build_messages(
        &self,
        context: Option<&Message>,
        history: &[Message],
    ) -> Vec<serde_json::Value> {
        let mut out = Vec::with_capacity(history.len() + 2);
        if let Some(prompt) = &self.system_prompt {
            out.push(serde_json::json!({ "role": "system", "content": prompt }));
        }
        if let Some(ctx) = context {
            out.push(ctx.as_provider_message());
        }
        out.extend(history.iter().map(Message::as_provider_message));
        out
    }

    pub async fn run(
        &self,
        provider: &dyn LlmProvider,
        context: Option<&Message>,
        history: &[Message],
        tx: mpsc::Sender<StreamEvent>,
    ) -> anyhow::Result<String> {
        let messages = self.build_messages(context, history);
        debug!(messages = messages.len(), "starting completion");

        // Provider writes into an inner channel so the reply can be
        // accumulated here while still being forwarded for display.
        let (inner_tx, mut inner_rx) = mpsc::channel::<StreamEvent>(32);
        let call = provider.call_streaming(&messages, inner_tx);

        let collect = async {
            let mut reply = String::new();
            while let Some(event) = inner_rx.recv().await {
                match &event {
                    StreamEvent::Text(t) => reply.push_str(t),
                    StreamEvent::Usage {
                        input_tokens,
                        output_tokens,
                    } => debug!(input_tokens, output_tokens, "completion usage"),
                    StreamEvent::Error(e) => warn!("completion error: {e}"),
                    StreamEvent::Done => {}
                }
                let _ = tx.send(event).await;
            }
            reply
        };

        let (result, reply) = tokio::join!(call, collect);
        result?;
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_prompt_and_context_lead_the_payload() {
        let runner = AgentRunner::new(Some("Du bist Maat.".into()));
        let ctx = Message::text("system", "You remember: tea");
        let history = vec![Message::text("user", "hallo")];
        let msgs = runner.build_messages(Some(&ctx), &history);
        assert_eq!(msgs.len(), 3);
        assert_eq!(msgs[0]["content"], "Du bist Maat.");
        assert_eq!(msgs[1]["content"], "You remember: tea");
        assert_eq!(msgs[2]["role"], "user");
    }

    #[test]
    fn blank_system_prompt_is_dropped() {
        let runner = AgentRunner::new(Some("   ".into()));
        let msgs = runner.build_messages(None, &[Message::text("user", "x")]);
        assert_eq!(msgs.len(), 1);
    }
}
