use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::agent::AgentRunner;
use crate::agent::providers::LlmProvider;
use crate::commands::{self, Command, CommandSettings};
use crate::memory::{MemoryEngine, context_message};
use crate::types::{Message, StreamEvent};

/// Conversation turns kept in the prompt; older turns live on in memory.
pub const HISTORY_LIMIT: usize = 20;

#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    /// A slash command ran; the text is its rendered output.
    Command(String),
    Reply {
        text: String,
        /// Number of memories injected ahead of the turn.
        recalled: usize,
    },
    /// The completion failed; the session carries on.
    Failed(String),
    Exit,
}

/// One interactive session: memory, provider and rolling history.
///
/// This is the only place memory errors are caught. They are logged and
/// the session continues.
pub struct ChatSession {
    id: Uuid,
    engine: Arc<MemoryEngine>,
    provider: Box<dyn LlmProvider>,
    runner: AgentRunner,
    settings: CommandSettings,
    episodic_decay: f64,
    history: Vec<Message>,
}

impl ChatSession {
    pub fn new(
        engine: Arc<MemoryEngine>,
        provider: Box<dyn LlmProvider>,
        runner: AgentRunner,
        settings: CommandSettings,
        episodic_decay: f64,
    ) -> Self {
        let id = Uuid::new_v4();
        info!(session = %id, "chat session started");
        Self {
            id,
            engine,
            provider,
            runner,
            settings,
            episodic_decay,
            history: Vec::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    /// Handle one input line. Reply text is streamed to `tx` as it arrives.
    pub async fn handle_line(&mut self, line: &str, tx: mpsc::Sender<StreamEvent>) -> TurnOutcome {
        let line = line.trim();
        if line.is_empty() {
            return TurnOutcome::Command(String::new());
        }

        if let Some(cmd) = commands::parse(line) {
            if cmd == Command::Exit {
                return TurnOutcome::Exit;
            }
            let out = match commands::execute(&cmd, &self.engine, &self.settings) {
                Ok(out) => out,
                Err(e) => {
                    warn!(session = %self.id, "command {cmd:?} failed: {e}");
                    match cmd {
                        Command::Recall(_) | Command::MemorySearch(_) => "No memories found.".into(),
                        _ => format!("Memory error: {e}"),
                    }
                }
            };
            return TurnOutcome::Command(out);
        }

        self.converse(line, tx).await
    }

    async fn converse(&mut self, line: &str, tx: mpsc::Sender<StreamEvent>) -> TurnOutcome {
        // Recall before storing so the current line does not match itself.
        let hits = match self.engine.recall(line, self.settings.recall_limit) {
            Ok(hits) => hits,
            Err(e) => {
                warn!(session = %self.id, "recall failed: {e}");
                Vec::new()
            }
        };
        let recalled = hits.len();
        let context = context_message(&hits);

        if let Err(e) = self.engine.store("user", line) {
            warn!(session = %self.id, "failed to store user turn: {e}");
        }
        if let Err(e) = self.engine.decay_episodic(self.episodic_decay) {
            warn!(session = %self.id, "episodic decay failed: {e}");
        }

        self.history.push(Message::text("user", line));
        self.trim_history();

        let result = self
            .runner
            .run(self.provider.as_ref(), context.as_ref(), &self.history, tx)
            .await;

        let reply = match result {
            Ok(reply) if !reply.trim().is_empty() => reply,
            Ok(_) => {
                warn!(session = %self.id, "completion returned no text");
                return TurnOutcome::Failed("the model returned no text".into());
            }
            Err(e) => {
                warn!(session = %self.id, "completion failed: {e}");
                return TurnOutcome::Failed(e.to_string());
            }
        };

        if let Err(e) = self.engine.store("assistant", &reply) {
            warn!(session = %self.id, "failed to store assistant turn: {e}");
        }
        self.history.push(Message::text("assistant", reply.clone()));
        self.trim_history();
        debug!(session = %self.id, recalled, chars = reply.len(), "turn complete");

        TurnOutcome::Reply {
            text: reply,
            recalled,
        }
    }

    fn trim_history(&mut self) {
        if self.history.len() > HISTORY_LIMIT {
            let excess = self.history.len() - HISTORY_LIMIT;
            self.history.drain(..excess);
        }
    }
}
