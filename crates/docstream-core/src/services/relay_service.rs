//! Backend relay: turns the provider's SSE token stream into session events.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use futures::stream::{BoxStream, Stream};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::history::prepare_history;
use super::provider_routes::{ModelRoute, RouteTable, VersionPlacement};
use super::session_registry::SessionRegistry;
use super::sse::{SseDecoder, SseFrame};
use crate::models::{ContentBlock, Message, StreamEvent, StreamSession};
use crate::settings::RelaySettings;

/// User-facing text for a request that hit its deadline.
pub const TIMEOUT_MESSAGE: &str =
    "The request took too long, likely due to file size. Please try again with a smaller file or a shorter prompt.";

/// Upper bound on provider error bodies echoed back to the client.
const ERROR_BODY_EXCERPT_CHARS: usize = 500;

/// Events of one session, `stream-start` first and exactly one terminal event last.
pub type EventStream = BoxStream<'static, StreamEvent>;

/// Client request to stream a reply.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendStreamRequest {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<String>,
    /// Enables server-side single-flight for this conversation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
}

impl SendStreamRequest {
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            system_instruction: None,
            conversation_id: None,
        }
    }

    pub fn with_system_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.system_instruction = Some(instruction.into());
        self
    }

    pub fn with_conversation_id(mut self, id: impl Into<String>) -> Self {
        self.conversation_id = Some(id.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RelayError {
    #[error("provider request exceeded its {0:?} deadline")]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("provider returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("provider reported an error: {0}")]
    Provider(String),

    #[error("conversation {0} already has a response in progress")]
    Busy(String),

    #[error("no API key configured")]
    MissingApiKey,
}

impl RelayError {
    /// Text carried by `stream-error`. Timeouts get their own wording.
    pub fn user_message(&self) -> String {
        match self {
            RelayError::Timeout(_) => TIMEOUT_MESSAGE.to_string(),
            RelayError::Transport(msg) => format!("Could not reach the model provider: {msg}"),
            RelayError::Status { status, body } if body.is_empty() => {
                format!("The model provider returned HTTP {status}.")
            }
            RelayError::Status { status, body } => {
                format!("The model provider returned HTTP {status}: {body}")
            }
            RelayError::Provider(msg) => format!("The model provider reported an error: {msg}"),
            RelayError::Busy(_) => {
                "A response is already being generated for this conversation.".to_string()
            }
            RelayError::MissingApiKey => {
                "No API key is configured for the model provider.".to_string()
            }
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, RelayError::Timeout(_))
    }

    fn from_reqwest(err: reqwest::Error, deadline: Duration) -> Self {
        if err.is_timeout() {
            RelayError::Timeout(deadline)
        } else {
            RelayError::Transport(err.to_string())
        }
    }
}

struct RelayInner {
    client: reqwest::Client,
    settings: RelaySettings,
    routes: RouteTable,
    sessions: SessionRegistry,
}

/// Streams completions from the model provider. Cheap to clone.
#[derive(Clone)]
pub struct StreamRelay {
    inner: Arc<RelayInner>,
}

impl StreamRelay {
    pub fn new(settings: RelaySettings) -> Result<Self, RelayError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("docstream/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| RelayError::Transport(format!("Failed to build HTTP client: {e}")))?;
        let routes = RouteTable::with_routes(settings.routes.clone());

        Ok(Self {
            inner: Arc::new(RelayInner {
                client,
                settings,
                routes,
                sessions: SessionRegistry::new(),
            }),
        })
    }

    pub fn settings(&self) -> &RelaySettings {
        &self.inner.settings
    }

    pub fn routes(&self) -> &RouteTable {
        &self.inner.routes
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.inner.sessions
    }

    /// Open a streaming session.
    ///
    /// `stream-start` is yielded before the provider is contacted. The whole call, from
    /// connect to the last frame, runs under the stream deadline.
    pub fn send(&self, request: SendStreamRequest) -> EventStream {
        let relay = self.clone();

        Box::pin(async_stream::stream! {
            let mut session = StreamSession::new(&request.model);
            let started = std::time::Instant::now();

            let start = StreamEvent::start();
            track(&mut session, &start);
            yield start;

            let _guard = match request.conversation_id.as_deref() {
                Some(id) => match relay.inner.sessions.try_acquire(id) {
                    Some(guard) => Some(guard),
                    None => {
                        let err = RelayError::Busy(id.to_string());
                        warn!(conversation_id = %id, "Rejecting concurrent stream request");
                        let event = StreamEvent::error(err.user_message());
                        track(&mut session, &event);
                        yield event;
                        return;
                    }
                },
                None => None,
            };

            let timeout = relay.inner.settings.stream_timeout();
            let deadline = Instant::now() + timeout;

            let opened =
                tokio::time::timeout_at(deadline, relay.open_stream(&request, timeout)).await;
            let response = match opened {
                Ok(Ok(response)) => response,
                Ok(Err(err)) => {
                    error!(
                        session_id = %session.id(),
                        error = %err,
                        "Failed to open provider stream"
                    );
                    let event = StreamEvent::error(err.user_message());
                    track(&mut session, &event);
                    yield event;
                    return;
                }
                Err(_) => {
                    error!(
                        session_id = %session.id(),
                        timeout = ?timeout,
                        "Provider did not respond before deadline"
                    );
                    let event = StreamEvent::error(RelayError::Timeout(timeout).user_message());
                    track(&mut session, &event);
                    yield event;
                    return;
                }
            };

            let mut events = decode_provider_stream(response.bytes_stream(), deadline, timeout);
            while let Some(event) = events.next().await {
                track(&mut session, &event);
                let terminal = event.is_terminal();
                yield event;
                if terminal {
                    break;
                }
            }

            info!(
                session_id = %session.id(),
                model = %session.model(),
                state = ?session.state(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Stream session ended"
            );
        })
    }

    /// Send a one-token request under the short warm-up deadline.
    pub async fn warm_up(&self, model: &str) -> Result<(), RelayError> {
        let timeout = self.inner.settings.warm_up_timeout();
        let route = self.inner.routes.resolve(model);
        let request = SendStreamRequest::new(model, vec![Message::user_text("ping")]);
        let mut body = build_request_body(route, &self.inner.settings, &request, false);
        body["max_tokens"] = json!(1);

        let result = tokio::time::timeout(timeout, self.post(route, model, &body, timeout)).await;
        match result {
            Ok(Ok(_)) => {
                debug!(model = %model, "Warm-up request succeeded");
                Ok(())
            }
            Ok(Err(err)) => {
                warn!(model = %model, error = %err, "Warm-up request failed");
                Err(err)
            }
            Err(_) => {
                warn!(model = %model, timeout = ?timeout, "Warm-up request timed out");
                Err(RelayError::Timeout(timeout))
            }
        }
    }

    async fn open_stream(
        &self,
        request: &SendStreamRequest,
        timeout: Duration,
    ) -> Result<reqwest::Response, RelayError> {
        let route = self.inner.routes.resolve(&request.model);
        let body = build_request_body(route, &self.inner.settings, request, true);
        self.post(route, &request.model, &body, timeout).await
    }

    async fn post(
        &self,
        route: &ModelRoute,
        model: &str,
        body: &Value,
        timeout: Duration,
    ) -> Result<reqwest::Response, RelayError> {
        let api_key = self
            .inner
            .settings
            .resolve_api_key()
            .ok_or(RelayError::MissingApiKey)?;
        let url = format!(
            "{}{}",
            self.inner.settings.base_url.trim_end_matches('/'),
            route.endpoint_path(model)
        );
        debug!(url = %url, model = %model, "Sending provider request");

        let mut builder = self
            .inner
            .client
            .post(&url)
            .header("x-api-key", api_key)
            .json(body);
        if route.version_placement == VersionPlacement::Header {
            builder = builder.header("anthropic-version", &route.api_version);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| RelayError::from_reqwest(e, timeout))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RelayError::Status {
                status: status.as_u16(),
                body: excerpt(body.trim(), ERROR_BODY_EXCERPT_CHARS),
            });
        }
        Ok(response)
    }
}

fn track(session: &mut StreamSession, event: &StreamEvent) {
    if let Err(e) = session.observe(event) {
        warn!(session_id = %session.id(), error = %e, "Relay emitted out-of-order event");
    }
}

/// Provider request body for `request` routed through `route`.
pub fn build_request_body(
    route: &ModelRoute,
    settings: &RelaySettings,
    request: &SendStreamRequest,
    stream: bool,
) -> Value {
    let history = prepare_history(
        &request.messages,
        settings.history_window,
        settings.max_message_chars,
    );

    let mut body = Map::new();
    if route.model_in_body {
        body.insert(
            "model".to_string(),
            json!(route.upstream_model(&request.model)),
        );
    }
    if route.version_placement == VersionPlacement::Body {
        body.insert("anthropic_version".to_string(), json!(route.api_version));
    }
    body.insert(
        "max_tokens".to_string(),
        json!(route.max_output_tokens.unwrap_or(settings.max_output_tokens)),
    );
    body.insert("stream".to_string(), json!(stream));
    if let Some(system) = request
        .system_instruction
        .as_deref()
        .filter(|s| !s.trim().is_empty())
    {
        body.insert("system".to_string(), json!(system));
    }
    body.insert("messages".to_string(), json!(history));
    for (key, value) in &route.extra_payload {
        body.insert(key.clone(), value.clone());
    }
    Value::Object(body)
}

/// Decode raw provider bytes into `stream-delta`* then one terminal event.
///
/// `deadline` bounds the whole stream, not each chunk.
pub fn decode_provider_stream<S, B, E>(
    bytes: S,
    deadline: Instant,
    timeout: Duration,
) -> EventStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let mut bytes = Box::pin(bytes);

    Box::pin(async_stream::stream! {
        let mut decoder = SseDecoder::new();
        let mut content = ContentAccumulator::default();
        let mut ended = false;

        'read: loop {
            let next = match tokio::time::timeout_at(deadline, bytes.next()).await {
                Ok(next) => next,
                Err(_) => {
                    error!(timeout = ?timeout, "Provider stream exceeded deadline");
                    yield StreamEvent::error(RelayError::Timeout(timeout).user_message());
                    return;
                }
            };

            let frames = match next {
                Some(Ok(chunk)) => decoder.push(chunk.as_ref()),
                Some(Err(e)) => {
                    let err = RelayError::Transport(e.to_string());
                    error!(error = %err, "Provider stream failed");
                    yield StreamEvent::error(err.user_message());
                    return;
                }
                None => break 'read,
            };

            for frame in frames {
                match handle_frame(&frame, &mut content) {
                    FrameOutcome::Skip => {}
                    FrameOutcome::Delta => yield StreamEvent::delta(content.snapshot()),
                    FrameOutcome::End => {
                        ended = true;
                        break 'read;
                    }
                    FrameOutcome::Failed(err) => {
                        error!(error = %err, "Provider reported stream error");
                        yield StreamEvent::error(err.user_message());
                        return;
                    }
                }
            }
        }

        if !ended && let Some(frame) = decoder.finish() {
            match handle_frame(&frame, &mut content) {
                FrameOutcome::Delta => yield StreamEvent::delta(content.snapshot()),
                FrameOutcome::Failed(err) => {
                    yield StreamEvent::error(err.user_message());
                    return;
                }
                FrameOutcome::Skip | FrameOutcome::End => {}
            }
        }

        yield StreamEvent::complete(content.into_message());
    })
}

enum FrameOutcome {
    Skip,
    Delta,
    End,
    Failed(RelayError),
}

fn handle_frame(frame: &SseFrame, content: &mut ContentAccumulator) -> FrameOutcome {
    // The sentinel is not JSON; never hand it to the parser.
    if frame.is_done_sentinel() {
        return FrameOutcome::End;
    }

    let event: ProviderEvent = match serde_json::from_str(&frame.data) {
        Ok(event) => event,
        Err(e) => {
            // Lenient: one bad frame must not end an otherwise healthy stream.
            warn!(
                error = %e,
                frame = %excerpt(&frame.data, 200),
                "Skipping malformed provider frame"
            );
            return FrameOutcome::Skip;
        }
    };

    match event {
        ProviderEvent::ContentBlockStart {
            index,
            content_block: ProviderBlock::Text { text },
        } => {
            if content.start_block(index, text) {
                FrameOutcome::Delta
            } else {
                FrameOutcome::Skip
            }
        }
        ProviderEvent::ContentBlockDelta {
            index,
            delta: ProviderDelta::TextDelta { text },
        } => {
            if content.append(index, &text) {
                FrameOutcome::Delta
            } else {
                FrameOutcome::Skip
            }
        }
        ProviderEvent::MessageStop => FrameOutcome::End,
        ProviderEvent::Error { error } => FrameOutcome::Failed(RelayError::Provider(
            if error.kind.is_empty() {
                error.message
            } else {
                format!("{} ({})", error.message, error.kind)
            },
        )),
        ProviderEvent::ContentBlockStart { .. }
        | ProviderEvent::ContentBlockDelta { .. }
        | ProviderEvent::MessageStart
        | ProviderEvent::ContentBlockStop
        | ProviderEvent::MessageDelta
        | ProviderEvent::Ping
        | ProviderEvent::Unknown => FrameOutcome::Skip,
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ProviderEvent {
    MessageStart,
    ContentBlockStart {
        index: usize,
        content_block: ProviderBlock,
    },
    ContentBlockDelta {
        index: usize,
        delta: ProviderDelta,
    },
    ContentBlockStop,
    MessageDelta,
    MessageStop,
    Ping,
    Error {
        error: ProviderErrorBody,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ProviderBlock {
    Text {
        #[serde(default)]
        text: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ProviderDelta {
    TextDelta { text: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct ProviderErrorBody {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    message: String,
}

/// Text blocks accumulated so far, keyed by provider block index.
#[derive(Debug, Default)]
struct ContentAccumulator {
    blocks: BTreeMap<usize, String>,
}

impl ContentAccumulator {
    /// Returns whether the block introduced new text.
    fn start_block(&mut self, index: usize, initial: String) -> bool {
        self.append(index, &initial)
    }

    fn append(&mut self, index: usize, text: &str) -> bool {
        if text.is_empty() {
            return false;
        }
        self.blocks.entry(index).or_default().push_str(text);
        true
    }

    /// Empty text blocks never leave the accumulator.
    fn snapshot(&self) -> Vec<ContentBlock> {
        self.blocks
            .values()
            .filter(|text| !text.is_empty())
            .map(ContentBlock::text)
            .collect()
    }

    fn into_message(self) -> Message {
        Message::assistant(
            self.blocks
                .into_values()
                .filter(|text| !text.is_empty())
                .map(ContentBlock::text)
                .collect(),
        )
    }
}

fn excerpt(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let mut cut: String = text.chars().take(max_chars).collect();
        cut.push('…');
        cut
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn frame(json: &str) -> String {
        format!("data: {json}\n\n")
    }

    fn text_delta(index: usize, text: &str) -> String {
        frame(&format!(
            r#"{{"type":"content_block_delta","index":{index},"delta":{{"type":"text_delta","text":"{text}"}}}}"#
        ))
    }

    fn block_start(index: usize) -> String {
        frame(&format!(
            r#"{{"type":"content_block_start","index":{index},"content_block":{{"type":"text","text":""}}}}"#
        ))
    }

    async fn decode(chunks: Vec<String>) -> Vec<StreamEvent> {
        let bytes = stream::iter(
            chunks
                .into_iter()
                .map(|c| Ok::<_, std::io::Error>(c.into_bytes())),
        );
        let deadline = Instant::now() + Duration::from_secs(5);
        decode_provider_stream(bytes, deadline, Duration::from_secs(5))
            .collect()
            .await
    }

    #[tokio::test]
    async fn test_deltas_carry_accumulated_content() {
        let events = decode(vec![
            frame(r#"{"type":"message_start","message":{"id":"msg_1"}}"#),
            block_start(0),
            text_delta(0, "Hel"),
            text_delta(0, "lo"),
            frame(r#"{"type":"content_block_stop","index":0}"#),
            frame(r#"{"type":"message_stop"}"#),
        ])
        .await;

        assert_eq!(
            events,
            vec![
                StreamEvent::delta(vec![ContentBlock::text("Hel")]),
                StreamEvent::delta(vec![ContentBlock::text("Hello")]),
                StreamEvent::complete(Message::assistant_text("Hello")),
            ]
        );
    }

    #[tokio::test]
    async fn test_empty_blocks_never_reach_the_message() {
        let events = decode(vec![
            block_start(0),
            text_delta(0, "Hi"),
            block_start(1),
            frame(r#"{"type":"message_stop"}"#),
        ])
        .await;

        assert_eq!(
            events,
            vec![
                StreamEvent::delta(vec![ContentBlock::text("Hi")]),
                StreamEvent::complete(Message::assistant_text("Hi")),
            ]
        );
    }

    #[tokio::test]
    async fn test_malformed_frame_is_skipped() {
        let events = decode(vec![
            text_delta(0, "Hel"),
            frame("{not json"),
            text_delta(0, "lo"),
            frame(r#"{"type":"message_stop"}"#),
        ])
        .await;

        assert_eq!(events.len(), 3);
        assert_eq!(
            events.last(),
            Some(&StreamEvent::complete(Message::assistant_text("Hello")))
        );
    }

    #[tokio::test]
    async fn test_done_sentinel_ends_stream() {
        let events = decode(vec![
            text_delta(0, "ok"),
            frame("[DONE]"),
            text_delta(0, " ignored"),
        ])
        .await;

        assert_eq!(
            events.last(),
            Some(&StreamEvent::complete(Message::assistant_text("ok")))
        );
        assert_eq!(events.len(), 2);
    }

    #[tokio::test]
    async fn test_frames_split_across_chunks() {
        let whole = text_delta(0, "split") + &frame(r#"{"type":"message_stop"}"#);
        let (a, b) = whole.split_at(17);
        let events = decode(vec![a.to_string(), b.to_string()]).await;
        assert_eq!(
            events.last(),
            Some(&StreamEvent::complete(Message::assistant_text("split")))
        );
    }

    #[tokio::test]
    async fn test_provider_error_event_is_terminal() {
        let events = decode(vec![
            text_delta(0, "partial"),
            frame(r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#),
            text_delta(0, " never"),
        ])
        .await;

        assert_eq!(events.len(), 2);
        assert_eq!(
            events[1],
            StreamEvent::error(
                "The model provider reported an error: Overloaded (overloaded_error)"
            )
        );
    }

    #[tokio::test]
    async fn test_multiple_blocks_kept_in_index_order() {
        let events = decode(vec![text_delta(1, "second"), text_delta(0, "first")]).await;
        assert_eq!(
            events.last(),
            Some(&StreamEvent::complete(Message::assistant(vec![
                ContentBlock::text("first"),
                ContentBlock::text("second"),
            ])))
        );
    }

    #[tokio::test]
    async fn test_transport_failure_mid_stream() {
        let chunks: Vec<Result<Vec<u8>, std::io::Error>> = vec![
            Ok(text_delta(0, "a").into_bytes()),
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset")),
        ];
        let events: Vec<_> = decode_provider_stream(
            stream::iter(chunks),
            Instant::now() + Duration::from_secs(5),
            Duration::from_secs(5),
        )
        .collect()
        .await;

        assert_eq!(events.len(), 2);
        match &events[1] {
            StreamEvent::Error(payload) => assert!(payload.error.contains("reset")),
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_stalled_stream_times_out_with_distinct_message() {
        let bytes = stream::pending::<Result<Vec<u8>, std::io::Error>>();
        let events: Vec<_> = decode_provider_stream(
            bytes,
            Instant::now() + Duration::from_millis(30),
            Duration::from_millis(30),
        )
        .collect()
        .await;

        assert_eq!(events, vec![StreamEvent::error(TIMEOUT_MESSAGE)]);
    }

    #[tokio::test]
    async fn test_eof_without_stop_still_completes() {
        let events = decode(vec![text_delta(0, "tail")]).await;
        assert_eq!(
            events.last(),
            Some(&StreamEvent::complete(Message::assistant_text("tail")))
        );
    }

    fn settings() -> RelaySettings {
        RelaySettings {
            base_url: "http://127.0.0.1:9".to_string(),
            api_key: Some("test-key".to_string()),
            ..RelaySettings::default()
        }
    }

    #[test]
    fn test_request_body_for_messages_api() {
        let table = RouteTable::builtin();
        let request = SendStreamRequest::new(
            "claude-3-7-sonnet-20250219",
            vec![
                Message::assistant_text("orphan greeting"),
                Message::user_text("Quote for a 2019 hatchback?"),
            ],
        )
        .with_system_instruction("You are an insurance assistant.");
        let route = table.resolve(&request.model);

        let body = build_request_body(route, &settings(), &request, true);
        assert_eq!(body["model"], json!("claude-3-7-sonnet-20250219"));
        assert_eq!(body["max_tokens"], json!(16_000));
        assert_eq!(body["stream"], json!(true));
        assert_eq!(body["system"], json!("You are an insurance assistant."));
        assert_eq!(body["temperature"], json!(0.3));
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
        assert!(body.get("anthropic_version").is_none());
    }

    #[test]
    fn test_request_body_for_body_versioned_route() {
        let table = RouteTable::builtin();
        let request = SendStreamRequest::new(
            "vertex/claude-3-5-sonnet@20240620",
            vec![Message::user_text("hi")],
        );
        let route = table.resolve(&request.model);

        let body = build_request_body(route, &settings(), &request, true);
        assert!(body.get("model").is_none());
        assert_eq!(body["anthropic_version"], json!("vertex-2023-10-16"));
        assert!(body.get("system").is_none());
    }

    #[test]
    fn test_request_body_trims_history() {
        let table = RouteTable::builtin();
        let mut settings = settings();
        settings.history_window = 2;
        settings.max_message_chars = 5;
        let request = SendStreamRequest::new(
            "claude-3-5-sonnet",
            vec![
                Message::user_text("old question"),
                Message::assistant_text("old answer"),
                Message::user_text("new question"),
            ],
        );
        let body = build_request_body(table.resolve(&request.model), &settings, &request, true);
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["content"][0]["text"], json!("new q"));
    }

    #[test]
    fn test_request_deserializes_camel_case() {
        let request: SendStreamRequest = serde_json::from_value(json!({
            "model": "claude-3-5-sonnet",
            "messages": [{"role": "user", "content": "hello"}],
            "systemInstruction": "be brief"
        }))
        .unwrap();
        assert_eq!(request.system_instruction.as_deref(), Some("be brief"));
        assert_eq!(request.messages[0].content, vec![ContentBlock::text("hello")]);
        assert!(request.conversation_id.is_none());
    }

    #[test]
    fn test_user_messages() {
        assert_eq!(
            RelayError::Timeout(Duration::from_secs(60)).user_message(),
            TIMEOUT_MESSAGE
        );
        assert_ne!(
            RelayError::Transport("refused".into()).user_message(),
            TIMEOUT_MESSAGE
        );
        assert!(
            RelayError::Status {
                status: 529,
                body: String::new()
            }
            .user_message()
            .contains("529")
        );
    }

    #[tokio::test]
    async fn test_busy_conversation_starts_then_errors() {
        let relay = StreamRelay::new(settings()).unwrap();
        let _held = relay.sessions().try_acquire("conv-1").unwrap();

        let request = SendStreamRequest::new("claude-3-5-sonnet", vec![Message::user_text("hi")])
            .with_conversation_id("conv-1");
        let events: Vec<_> = relay.send(request).collect().await;

        assert_eq!(
            events,
            vec![
                StreamEvent::start(),
                StreamEvent::error(RelayError::Busy("conv-1".into()).user_message()),
            ]
        );
        assert!(relay.sessions().is_active("conv-1"), "held registration untouched");
    }

    #[tokio::test]
    async fn test_unreachable_provider_yields_start_then_error() {
        let relay = StreamRelay::new(settings()).unwrap();
        let request = SendStreamRequest::new("claude-3-5-sonnet", vec![Message::user_text("hi")])
            .with_conversation_id("conv-9");
        let events: Vec<_> = relay.send(request).collect().await;

        assert_eq!(events.len(), 2);
        assert_eq!(events[0], StreamEvent::start());
        assert!(matches!(events[1], StreamEvent::Error(_)));
        assert!(!relay.sessions().is_active("conv-9"), "guard released after stream ends");
    }
}
