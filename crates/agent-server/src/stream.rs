//! JSONL response body
//!
//! Turns the orchestrator's record channel into a chunked
//! `application/jsonl` body. Each record is written as soon as it arrives;
//! dropping the body (client gone) drops the receiver, which is what stops
//! the orchestrator.

use std::{
    convert::Infallible,
    pin::Pin,
    task::{Context, Poll},
};

use agent_core::protocol::{JSONL_CONTENT_TYPE, StreamRecord};
use axum::{
    body::{Body, Bytes},
    http::header,
    response::{IntoResponse, Response},
};
use futures::Stream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

pub struct JsonlResponse {
    first: Option<StreamRecord>,
    rx: ReceiverStream<StreamRecord>,
}

impl JsonlResponse {
    /// `first` has already been taken off `rx` to decide that the response
    /// is a stream rather than an error
    pub fn new(first: StreamRecord, rx: mpsc::Receiver<StreamRecord>) -> Self {
        Self {
            first: Some(first),
            rx: ReceiverStream::new(rx),
        }
    }

    fn encode(record: &StreamRecord) -> Option<Bytes> {
        match record.encode() {
            Ok(line) => Some(Bytes::from(line)),
            Err(e) => {
                tracing::error!("Failed to encode stream record: {}", e);
                None
            }
        }
    }
}

impl Stream for JsonlResponse {
    type Item = Result<Bytes, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if let Some(line) = self.first.take().as_ref().and_then(Self::encode) {
            return Poll::Ready(Some(Ok(line)));
        }
        loop {
            match Pin::new(&mut self.rx).poll_next(cx) {
                Poll::Ready(Some(record)) => {
                    if let Some(line) = Self::encode(&record) {
                        return Poll::Ready(Some(Ok(line)));
                    }
                }
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl IntoResponse for JsonlResponse {
    fn into_response(self) -> Response {
        (
            [
                (header::CONTENT_TYPE, JSONL_CONTENT_TYPE),
                (header::CACHE_CONTROL, "no-cache"),
            ],
            Body::from_stream(self),
        )
            .into_response()
    }
}
