//! Server-Sent Events rendering of pipeline output.
//!
//! Each [`OutputEvent`] becomes one SSE frame: `event` is the kind, `id` the
//! correlation id and `data` the JSON-encoded event.

use axum::response::sse::{Event as AxumEvent, KeepAlive};
use axum::response::{IntoResponse, Response, Sse};
use futures_util::Stream;
use kiln_core::kiln_types::OutputEvent;
use pin_project_lite::pin_project;
use std::convert::Infallible;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use crate::error::{Result, ServerError};

#[derive(Debug, Clone)]
pub struct SseEvent {
    pub event_type: Option<String>,
    pub data: String,
    pub id: Option<String>,
}

impl SseEvent {
    pub fn with_type(event_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event_type: Some(event_type.into()),
            data: data.into(),
            id: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn from_output_event(event: &OutputEvent) -> Result<Self> {
        let data = serde_json::to_string(event).map_err(ServerError::Json)?;
        Ok(Self::with_type(event.kind.as_str(), data).with_id(event.correlation_id.as_str()))
    }
}

impl From<SseEvent> for AxumEvent {
    fn from(event: SseEvent) -> Self {
        let mut axum_event = AxumEvent::default().data(event.data);

        if let Some(event_type) = event.event_type {
            axum_event = axum_event.event(event_type);
        }

        if let Some(id) = event.id {
            axum_event = axum_event.id(id);
        }

        axum_event
    }
}

pin_project! {
    /// Adapts a stream of output events into SSE frames.
    pub struct SseStream<S> {
        #[pin]
        inner: S,
    }
}

impl<S> SseStream<S> {
    pub fn new(stream: S) -> Self {
        Self { inner: stream }
    }
}

impl<S> Stream for SseStream<S>
where
    S: Stream<Item = OutputEvent>,
{
    type Item = std::result::Result<AxumEvent, Infallible>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();

        match this.inner.poll_next(cx) {
            Poll::Ready(Some(event)) => match SseEvent::from_output_event(&event) {
                Ok(sse_event) => Poll::Ready(Some(Ok(sse_event.into()))),
                Err(e) => {
                    log::error!("Failed to convert output event to SSE: {}", e);
                    let error_event = SseEvent::with_type(
                        "error",
                        format!(r#"{{"error": "Failed to serialize event: {}"}}"#, e),
                    );
                    Poll::Ready(Some(Ok(error_event.into())))
                }
            },
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

pub fn create_sse_response_with_keepalive<S>(
    stream: S,
    keepalive_interval: Duration,
    keepalive_text: impl Into<String>,
) -> Response
where
    S: Stream<Item = OutputEvent> + Send + 'static,
{
    Sse::new(SseStream::new(stream))
        .keep_alive(
            KeepAlive::new()
                .interval(keepalive_interval)
                .text(keepalive_text.into()),
        )
        .into_response()
}
