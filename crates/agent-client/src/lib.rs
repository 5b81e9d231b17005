//! # agent-client
//!
//! Client side of the streaming chat protocol. A streamed completion is a
//! lazy stream of [`ChatEvent`]s: records are decoded as bytes arrive and
//! folded into the running assistant message, ending with
//! [`ChatEvent::Completed`] when the server closes the body.
//!
//! ```rust,ignore
//! let client = ProtocolClient::new("http://localhost:3000/agent/chat/")?;
//! let mut events = client.get_streamed_completion(&request).await?;
//! while let Some(event) = events.next().await {
//!     match event? {
//!         ChatEvent::Delta(delta) => print!("{}", delta.content.unwrap_or_default()),
//!         ChatEvent::SessionToken(token) => session = Some(token),
//!         ChatEvent::Completed(reply) => history.push(reply.message),
//!     }
//! }
//! ```

use std::collections::VecDeque;
use std::fmt::Display;
use std::pin::Pin;

use agent_core::protocol::{
    ChatCompletion, ChatEvent, ChatRequest, ErrorRecord, JSONL_CONTENT_TYPE, MessageAssembler,
    RecordDecoder, StreamRecord,
};
use futures::{Stream, StreamExt};

/// Client-side failures
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server responded with HTTP {status}")]
    Status {
        status: u16,
        /// Error body, when the server sent one
        record: Option<ErrorRecord>,
    },

    #[error("connection lost mid-stream: {0}")]
    Transport(String),

    #[error("malformed record: {0}")]
    Decode(String),

    #[error("chat failed: {0}")]
    Chat(ErrorRecord),
}

impl ClientError {
    /// The protocol error, whether it came in-band or as an HTTP error body
    pub fn chat_error(&self) -> Option<&ErrorRecord> {
        match self {
            ClientError::Chat(record) => Some(record),
            ClientError::Status { record, .. } => record.as_ref(),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;

/// Stream of events for one streamed completion
pub type ChatEventStream = Pin<Box<dyn Stream<Item = Result<ChatEvent>> + Send>>;

pub struct ProtocolClient {
    http: reqwest::Client,
    base_url: String,
}

impl ProtocolClient {
    /// `base_url` is the chat root, e.g. `http://localhost:3000/agent/chat/`
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        Ok(Self::with_client(reqwest::Client::builder().build()?, base_url))
    }

    pub fn with_client(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn completion_url(&self) -> String {
        self.base_url.clone()
    }

    fn stream_url(&self) -> String {
        format!("{}/stream", self.base_url)
    }

    /// Send `request` and return the assembled reply in one piece
    pub async fn get_completion(&self, request: &ChatRequest) -> Result<ChatCompletion> {
        let response = self.http.post(self.completion_url()).json(request).send().await?;
        let response = check_status(response).await?;
        Ok(response.json().await?)
    }

    /// Send `request` and stream the reply. Nothing is read from the body
    /// until the returned stream is polled.
    pub async fn get_streamed_completion(&self, request: &ChatRequest) -> Result<ChatEventStream> {
        let response = self
            .http
            .post(self.stream_url())
            .header(reqwest::header::ACCEPT, JSONL_CONTENT_TYPE)
            .json(request)
            .send()
            .await?;
        let response = check_status(response).await?;

        tracing::debug!(url = %response.url(), "Chat stream opened");
        Ok(Box::pin(decode_events(
            Box::pin(response.bytes_stream()),
            request.session_token.clone(),
        )))
    }
}

/// Turn a non-2xx response into `ClientError::Status`, keeping the server's
/// error record when the body is one
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let record = serde_json::from_str::<ErrorRecord>(&body).ok();
    tracing::warn!(status = status.as_u16(), body = %body, "Chat request rejected");
    Err(ClientError::Status {
        status: status.as_u16(),
        record,
    })
}

struct EventState<S> {
    bytes: S,
    decoder: RecordDecoder,
    assembler: MessageAssembler,
    pending: VecDeque<Result<ChatEvent>>,
    done: bool,
}

impl<S> EventState<S> {
    /// Fold one decoded record into the message. Failures end the stream.
    fn accept(&mut self, record: agent_core::Result<StreamRecord>) {
        let outcome = record
            .map_err(|e| ClientError::Decode(e.to_string()))
            .and_then(|record| self.assembler.apply(record).map_err(ClientError::Chat));
        match outcome {
            Ok(events) => self.pending.extend(events.into_iter().map(Ok)),
            Err(err) => {
                self.pending.push_back(Err(err));
                self.done = true;
            }
        }
    }
}

/// Decode a JSONL body into chat events. `session_token` is the token the
/// request was sent with; a `SessionToken` event fires only when the server
/// reports a different one.
pub fn decode_events<S, B, E>(bytes: S, session_token: Option<String>) -> impl Stream<Item = Result<ChatEvent>> + Send
where
    S: Stream<Item = std::result::Result<B, E>> + Send + Unpin,
    B: AsRef<[u8]> + Send,
    E: Display + Send,
{
    let state = EventState {
        bytes,
        decoder: RecordDecoder::new(),
        assembler: MessageAssembler::new(session_token),
        pending: VecDeque::new(),
        done: false,
    };

    futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.pending.pop_front() {
                return Some((event, state));
            }
            if state.done {
                return None;
            }
            if let Some(record) = state.decoder.next_record() {
                state.accept(record);
                continue;
            }
            match state.bytes.next().await {
                Some(Ok(chunk)) => state.decoder.push(chunk.as_ref()),
                Some(Err(e)) => {
                    state.pending.push_back(Err(ClientError::Transport(e.to_string())));
                    state.done = true;
                }
                None => {
                    if let Some(record) = state.decoder.finish() {
                        state.accept(record);
                    }
                    if !state.done {
                        let assembler = std::mem::take(&mut state.assembler);
                        state.pending.push_back(Ok(ChatEvent::Completed(assembler.finish())));
                        state.done = true;
                    }
                }
            }
        }
    })
}
