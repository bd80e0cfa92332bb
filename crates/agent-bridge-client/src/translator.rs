//! Streaming response translator.
//!
//! Reduces the server's incremental SSE body into `StreamEvent`s:
//! - chunks that split a frame are buffered until the frame is complete
//! - keepalive comments and `ping` frames are dropped
//! - `data: [DONE]` becomes `Completed`
//! - EOF, read errors and idle timeouts before a terminal event become
//!   `Failed(ConnectionLost)`
//!
//! Events are emitted in the order received. Nothing is emitted after the
//! first terminal event.

use std::{fmt::Display, time::Duration};

use agent_bridge_core::{EventStream, FailureReason, StreamEvent};
use futures::{Stream, StreamExt};
use serde_json::Value;

/// Stop reasons that mean the turn failed server-side.
const ERROR_STOP_REASONS: &[&str] = &[
    "error",
    "llm_api_error",
    "invalid_llm_response",
    "invalid_tool_call",
    "no_tool_call",
];

/// A complete SSE frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// JSON payload.
    Data(String),
    /// Comment or ping; carries nothing.
    Keepalive,
    /// Terminal `[DONE]` sentinel.
    Done,
}

/// Incremental SSE line parser.
///
/// Also accepts newline-delimited JSON, treating each bare JSON line as a
/// frame of its own.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl FrameDecoder {
    /// Feed a chunk and collect every frame it completes.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Frame> {
        self.buf.extend_from_slice(chunk);
        let mut frames = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.buf.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw);
            if let Some(frame) = self.line(line.trim_end_matches(['\n', '\r'])) {
                frames.push(frame);
            }
        }
        frames
    }

    /// Flush an unterminated trailing line and any pending event at EOF.
    pub fn finish(&mut self) -> Vec<Frame> {
        let mut frames = Vec::new();
        if !self.buf.is_empty() {
            let raw = std::mem::take(&mut self.buf);
            let line = String::from_utf8_lossy(&raw).into_owned();
            if let Some(frame) = self.line(line.trim_end_matches('\r')) {
                frames.push(frame);
            }
        }
        if let Some(frame) = self.dispatch() {
            frames.push(frame);
        }
        frames
    }

    /// Whether a partial line or event is buffered.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        !self.buf.is_empty() || !self.data.is_empty()
    }

    fn line(&mut self, line: &str) -> Option<Frame> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return Some(Frame::Keepalive);
        }
        if self.data.is_empty() && self.event.is_none() {
            let trimmed = line.trim();
            if trimmed.starts_with('{') || trimmed == "[DONE]" {
                return Some(classify(trimmed));
            }
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "data" => self.data.push(value.to_string()),
            "event" => self.event = Some(value.to_string()),
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<Frame> {
        let event = self.event.take();
        if matches!(event.as_deref(), Some("ping" | "keepalive" | "heartbeat")) {
            self.data.clear();
            return Some(Frame::Keepalive);
        }
        if self.data.is_empty() {
            return None;
        }
        let data = self.data.join("\n");
        self.data.clear();
        Some(classify(data.trim()))
    }
}

fn classify(data: &str) -> Frame {
    match data {
        "[DONE]" => Frame::Done,
        "" => Frame::Keepalive,
        other => Frame::Data(other.to_string()),
    }
}

/// Map one JSON frame to at most one event.
///
/// # Errors
/// Returns the parse error message if the frame is not JSON.
pub fn translate_frame(data: &str) -> Result<Option<StreamEvent>, String> {
    let value: Value = serde_json::from_str(data).map_err(|e| e.to_string())?;

    if let Some(error) = value.get("error").filter(|e| !e.is_null()) {
        return Ok(Some(server_failure(error)));
    }

    let message_type = value
        .get("message_type")
        .or_else(|| value.get("type"))
        .and_then(Value::as_str)
        .unwrap_or_default();

    let event = match message_type {
        "assistant_message" => {
            let text = content_text(value.get("content"));
            (!text.is_empty()).then(|| StreamEvent::text(text))
        }
        "tool_call_message" => tool_call(&value),
        "error_message" => Some(server_failure(&value)),
        "stop_reason" => value
            .get("stop_reason")
            .and_then(Value::as_str)
            .filter(|reason| ERROR_STOP_REASONS.contains(reason))
            .map(|reason| {
                StreamEvent::failed(FailureReason::Server {
                    message: format!("turn stopped: {reason}"),
                })
            }),
        "ping" | "keepalive" => None,
        other => {
            tracing::debug!(message_type = other, "Ignoring stream frame");
            None
        }
    };
    Ok(event)
}

fn content_text(content: Option<&Value>) -> String {
    match content {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(parts)) => parts
            .iter()
            .filter_map(|p| p.get("text").and_then(Value::as_str))
            .collect(),
        _ => String::new(),
    }
}

fn tool_call(value: &Value) -> Option<StreamEvent> {
    let call = value.get("tool_call").or_else(|| {
        value
            .get("tool_calls")
            .and_then(Value::as_array)
            .and_then(|calls| calls.first())
    })?;
    let name = call.get("name").and_then(Value::as_str)?.to_string();
    let arguments = match call.get("arguments") {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    };
    Some(StreamEvent::ToolCall { name, arguments })
}

fn server_failure(error: &Value) -> StreamEvent {
    let message = match error {
        Value::String(s) => s.clone(),
        other => other
            .get("message")
            .or_else(|| other.get("detail"))
            .and_then(Value::as_str)
            .map_or_else(|| other.to_string(), str::to_string),
    };
    StreamEvent::failed(FailureReason::Server { message })
}

/// Stateful reducer from body chunks to events.
#[derive(Debug, Default)]
pub struct StreamTranslator {
    decoder: FrameDecoder,
    done: bool,
}

impl StreamTranslator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a terminal event has been emitted.
    #[must_use]
    pub const fn is_done(&self) -> bool {
        self.done
    }

    /// Feed a body chunk.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        if self.done {
            return Vec::new();
        }
        let frames = self.decoder.push(chunk);
        self.accept(frames, false)
    }

    /// The body ended. Emits `ConnectionLost` unless already terminated.
    ///
    /// A truncated trailing frame is discarded rather than reported as
    /// malformed, since the truncation is the disconnect itself.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        if self.done {
            return Vec::new();
        }
        let frames = self.decoder.finish();
        let mut events = self.accept(frames, true);
        if let Some(event) = self.fail(FailureReason::ConnectionLost) {
            events.push(event);
        }
        events
    }

    /// Terminate with the given reason, if not already terminated.
    pub fn fail(&mut self, reason: FailureReason) -> Option<StreamEvent> {
        if self.done {
            return None;
        }
        self.done = true;
        Some(StreamEvent::failed(reason))
    }

    fn accept(&mut self, frames: Vec<Frame>, at_eof: bool) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        for frame in frames {
            if self.done {
                break;
            }
            match frame {
                Frame::Keepalive => tracing::trace!("Keepalive frame"),
                Frame::Done => {
                    self.done = true;
                    events.push(StreamEvent::Completed);
                }
                Frame::Data(data) => match translate_frame(&data) {
                    Ok(Some(event)) => {
                        self.done = event.is_terminal();
                        events.push(event);
                    }
                    Ok(None) => {}
                    Err(e) if at_eof => {
                        tracing::debug!(error = %e, "Discarding truncated trailing frame");
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Malformed stream frame");
                        self.done = true;
                        events.push(StreamEvent::failed(FailureReason::Protocol { message: e }));
                    }
                },
            }
        }
        events
    }
}

/// Translate a response body into an `EventStream`.
///
/// The body is polled lazily; dropping the returned stream drops the body
/// and with it the connection. `idle_timeout` bounds the wait for each chunk.
pub fn translate_stream<S, B, E>(body: S, idle_timeout: Duration) -> EventStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
{
    Box::pin(async_stream::stream! {
        let mut translator = StreamTranslator::new();
        tokio::pin!(body);

        while !translator.is_done() {
            let Ok(next) = tokio::time::timeout(idle_timeout, body.next()).await else {
                tracing::warn!(?idle_timeout, "Stream idle timeout");
                if let Some(event) = translator.fail(FailureReason::ConnectionLost) {
                    yield event;
                }
                break;
            };
            match next {
                Some(Ok(chunk)) => {
                    for event in translator.push(chunk.as_ref()) {
                        yield event;
                    }
                }
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "Stream read failed");
                    if let Some(event) = translator.fail(FailureReason::ConnectionLost) {
                        yield event;
                    }
                }
                None => {
                    for event in translator.finish() {
                        yield event;
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use futures::stream;

    use super::*;

    fn assistant(text: &str) -> String {
        format!(
            "data: {}\n\n",
            serde_json::json!({"message_type": "assistant_message", "content": text})
        )
    }

    async fn collect(chunks: Vec<Result<String, String>>) -> Vec<StreamEvent> {
        translate_stream(stream::iter(chunks), Duration::from_secs(5))
            .collect()
            .await
    }

    #[tokio::test]
    async fn test_deltas_then_completed() {
        let events = collect(vec![
            Ok(assistant("Hello")),
            Ok(": keepalive\n\n".to_string()),
            Ok(assistant(" world")),
            Ok("event: ping\ndata: {}\n\n".to_string()),
            Ok("data: [DONE]\n\n".to_string()),
        ])
        .await;

        assert_eq!(
            events,
            vec![
                StreamEvent::text("Hello"),
                StreamEvent::text(" world"),
                StreamEvent::Completed,
            ]
        );
    }

    #[tokio::test]
    async fn test_frame_split_across_chunks() {
        let frame = assistant("reassembled");
        let (head, tail) = frame.split_at(17);
        let events = collect(vec![
            Ok(head.to_string()),
            Ok(tail.to_string()),
            Ok("data: [DO".to_string()),
            Ok("NE]\n\n".to_string()),
        ])
        .await;

        assert_eq!(events, vec![StreamEvent::text("reassembled"), StreamEvent::Completed]);
    }

    #[test]
    fn test_multibyte_split_across_chunks() {
        let frame = assistant("héllo");
        let bytes = frame.as_bytes();
        let split = frame.find('é').unwrap() + 1;

        let mut translator = StreamTranslator::new();
        assert!(translator.push(&bytes[..split]).is_empty());
        assert_eq!(translator.push(&bytes[split..]), vec![StreamEvent::text("héllo")]);
    }

    #[tokio::test]
    async fn test_disconnect_after_delta() {
        let events = collect(vec![Ok(assistant("partial"))]).await;
        assert_eq!(
            events,
            vec![
                StreamEvent::text("partial"),
                StreamEvent::failed(FailureReason::ConnectionLost),
            ]
        );
    }

    #[tokio::test]
    async fn test_read_error_is_connection_lost() {
        let events = collect(vec![
            Ok(assistant("one")),
            Err("connection reset".to_string()),
            Ok(assistant("never")),
        ])
        .await;
        assert_eq!(
            events,
            vec![
                StreamEvent::text("one"),
                StreamEvent::failed(FailureReason::ConnectionLost),
            ]
        );
    }

    #[tokio::test]
    async fn test_truncated_frame_at_eof_is_connection_lost() {
        let events = collect(vec![Ok("data: {\"message_type\": \"assis".to_string())]).await;
        assert_eq!(events, vec![StreamEvent::failed(FailureReason::ConnectionLost)]);
    }

    #[tokio::test]
    async fn test_malformed_frame_is_protocol_failure() {
        let events = collect(vec![
            Ok("data: not json\n\n".to_string()),
            Ok(assistant("ignored")),
        ])
        .await;
        assert!(matches!(
            events.as_slice(),
            [StreamEvent::Failed {
                reason: FailureReason::Protocol { .. }
            }]
        ));
    }

    #[tokio::test]
    async fn test_nothing_after_terminal() {
        let events = collect(vec![Ok(format!(
            "data: [DONE]\n\n{}",
            assistant("late")
        ))])
        .await;
        assert_eq!(events, vec![StreamEvent::Completed]);
    }

    #[tokio::test]
    async fn test_tool_calls_and_ignored_types() {
        let body = [
            serde_json::json!({"message_type": "reasoning_message", "reasoning": "hmm"}),
            serde_json::json!({"message_type": "tool_call_message", "tool_call": {"name": "archival_memory_search", "arguments": "{\"query\":\"tea\"}"}}),
            serde_json::json!({"message_type": "tool_return_message", "tool_return": "ok"}),
            serde_json::json!({"message_type": "usage_statistics", "total_tokens": 10}),
            serde_json::json!({"message_type": "stop_reason", "stop_reason": "end_turn"}),
        ]
        .iter()
        .map(|v| format!("data: {v}\n\n"))
        .collect::<String>()
            + "data: [DONE]\n\n";

        let events = collect(vec![Ok(body)]).await;
        assert_eq!(
            events,
            vec![
                StreamEvent::ToolCall {
                    name: "archival_memory_search".into(),
                    arguments: "{\"query\":\"tea\"}".into(),
                },
                StreamEvent::Completed,
            ]
        );
    }

    #[tokio::test]
    async fn test_server_error_frame() {
        let events = collect(vec![Ok(
            "data: {\"error\": {\"message\": \"rate limited\"}}\n\n".to_string()
        )])
        .await;
        assert_eq!(
            events,
            vec![StreamEvent::failed(FailureReason::Server {
                message: "rate limited".into()
            })]
        );
    }

    #[tokio::test]
    async fn test_error_stop_reason() {
        let frame = serde_json::json!({"message_type": "stop_reason", "stop_reason": "llm_api_error"});
        let events = collect(vec![Ok(format!("data: {frame}\n\n"))]).await;
        assert!(matches!(
            events.as_slice(),
            [StreamEvent::Failed {
                reason: FailureReason::Server { .. }
            }]
        ));
    }

    #[tokio::test]
    async fn test_ndjson_lines() {
        let events = collect(vec![Ok(format!(
            "{}\n{}\n[DONE]\n",
            serde_json::json!({"message_type": "assistant_message", "content": [{"type": "text", "text": "a"}, {"type": "text", "text": "b"}]}),
            serde_json::json!({"message_type": "assistant_message", "content": "c"}),
        ))])
        .await;
        assert_eq!(
            events,
            vec![StreamEvent::text("ab"), StreamEvent::text("c"), StreamEvent::Completed]
        );
    }

    #[tokio::test]
    async fn test_multiline_data_field() {
        let events = collect(vec![Ok(
            "data: {\"message_type\": \"assistant_message\",\ndata: \"content\": \"joined\"}\n\ndata: [DONE]\n\n"
                .to_string(),
        )])
        .await;
        assert_eq!(events, vec![StreamEvent::text("joined"), StreamEvent::Completed]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_timeout_is_connection_lost() {
        let body = stream::iter(vec![Ok::<_, String>(assistant("slow"))]).chain(stream::pending());
        let events: Vec<_> = translate_stream(body, Duration::from_secs(1)).collect().await;
        assert_eq!(
            events,
            vec![
                StreamEvent::text("slow"),
                StreamEvent::failed(FailureReason::ConnectionLost),
            ]
        );
    }

    #[test]
    fn test_decoder_crlf_and_comments() {
        let mut decoder = FrameDecoder::default();
        let frames = decoder.push(b": ping\r\n\r\ndata: {\"a\":1}\r\n\r\n");
        assert_eq!(
            frames,
            vec![Frame::Keepalive, Frame::Data("{\"a\":1}".to_string())]
        );
        assert!(!decoder.has_pending());
    }
}
