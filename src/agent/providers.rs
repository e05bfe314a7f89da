use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use tokio::sync::mpsc;
use tracing::debug;

use crate::types::StreamEvent;

/// Trait for completion backends. Implementations stream events into `tx`
/// and finish with [`StreamEvent::Done`].
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn call_streaming(
        &self,
        messages: &[serde_json::Value],
        tx: mpsc::Sender<StreamEvent>,
    ) -> anyhow::Result<()>;
}

/// Any server exposing an OpenAI-style `/v1/chat/completions` endpoint
/// (llama.cpp server, Ollama, vLLM, LM Studio).
pub struct OpenAiCompatProvider {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    max_tokens: u32,
}

impl OpenAiCompatProvider {
    pub fn new(base_url: String, api_key: Option<String>, model: String, max_tokens: u32) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model,
            max_tokens,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url)
    }
}

/// Running token counts taken from `usage` blocks.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// Interpret one SSE `data:` payload. Returns `None` for the `[DONE]`
/// sentinel, otherwise any text delta it carried.
pub fn parse_chunk(data: &str, usage: &mut Usage) -> Option<Option<String>> {
    if data == "[DONE]" {
        return None;
    }
    let parsed: serde_json::Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => {
            debug!("skipping unparseable SSE data: {e}");
            return Some(None);
        }
    };

    if let Some(u) = parsed.get("usage") {
        if let Some(it) = u.get("prompt_tokens").and_then(|v| v.as_u64()) {
            usage.input_tokens = it as u32;
        }
        if let Some(ot) = u.get("completion_tokens").and_then(|v| v.as_u64()) {
            usage.output_tokens = ot as u32;
        }
    }

    let text = parsed
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|choices| choices.first())
        .and_then(|choice| choice.get("delta"))
        .and_then(|d| d.get("content"))
        .and_then(|c| c.as_str())
        .filter(|t| !t.is_empty())
        .map(str::to_string);
    Some(text)
}

/// Byte buffer that yields complete SSE events. Decoding waits for the
/// `\n\n` terminator, so a multi-byte character split across network
/// chunks is reassembled before it is turned into text.
#[derive(Debug, Default)]
pub struct SseBuffer {
    bytes: Vec<u8>,
}

impl SseBuffer {
    pub fn push(&mut self, chunk: &[u8]) {
        self.bytes.extend_from_slice(chunk);
    }

    /// Pop the next complete event, without its terminator.
    pub fn next_event(&mut self) -> Option<String> {
        let pos = self.bytes.windows(2).position(|w| w == b"\n\n")?;
        let event: Vec<u8> = self.bytes.drain(..pos + 2).take(pos).collect();
        Some(String::from_utf8_lossy(&event).into_owned())
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatProvider {
    async fn call_streaming(
        &self,
        messages: &[serde_json::Value],
        tx: mpsc::Sender<StreamEvent>,
    ) -> anyhow::Result<()> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "max_tokens": self.max_tokens,
            "stream": true,
            "stream_options": { "include_usage": true },
        });

        let mut request = self
            .client
            .post(self.endpoint())
            .header("content-type", "application/json")
            .json(&body);
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {key}"));
        }
        let response = request.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            let _ = tx.send(StreamEvent::Error(format!("{status}: {text}"))).await;
            let _ = tx.send(StreamEvent::Done).await;
            return Ok(());
        }

        let mut stream = response.bytes_stream();
        let mut buffer = SseBuffer::default();
        let mut usage = Usage::default();

        'read: while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            buffer.push(&chunk);

            while let Some(event) = buffer.next_event() {
                for line in event.lines() {
                    let Some(data) = line.strip_prefix("data: ") else {
                        continue;
                    };
                    match parse_chunk(data.trim(), &mut usage) {
                        None => break 'read,
                        Some(Some(text)) => {
                            let _ = tx.send(StreamEvent::Text(text)).await;
                        }
                        Some(None) => {}
                    }
                }
            }
        }

        let _ = tx
            .send(StreamEvent::Usage {
                input_tokens: usage.input_tokens,
                output_tokens: usage.output_tokens,
            })
            .await;
        let _ = tx.send(StreamEvent::Done).await;
        Ok(())
    }
}

/// Create a provider from config.
pub fn from_config(config: &crate::config::AgentDefConfig) -> anyhow::Result<Box<dyn LlmProvider>> {
    match config.provider.as_str() {
        "openai-compatible" => Ok(Box::new(OpenAiCompatProvider::new(
            config.base_url.clone(),
            config.api_key.clone(),
            config.model.clone(),
            config.max_tokens,
        ))),
        other => anyhow::bail!("unknown provider: {other}"),
    }
}
