//! Server side: chat chunks to an axum SSE response

use super::{StreamMeta, END_EVENT, ERROR_EVENT, META_EVENT};
use crate::error::{ChatError, ErrorPayload};
use crate::message::ChatMessage;
use axum::response::sse::{Event, Sse};
use futures_util::stream::{self, BoxStream, Stream, StreamExt};
use std::convert::Infallible;
use std::pin::Pin;
use tracing::debug;

/// Boxed SSE event stream
pub type SseStream = Pin<Box<dyn Stream<Item = Result<Event, Infallible>> + Send>>;

enum Phase {
    Meta(StreamMeta),
    Body,
    Done,
}

/// Frame a chunk stream as SSE
///
/// Emits `meta` first, one data frame per `Ok` chunk, then `end`. An `Err`
/// item emits an `error` frame and ends the stream without `end`.
pub fn into_sse<S>(meta: StreamMeta, messages: S) -> Sse<SseStream>
where
    S: Stream<Item = Result<ChatMessage, ChatError>> + Send + 'static,
{
    let messages: BoxStream<'static, Result<ChatMessage, ChatError>> = messages.boxed();

    let events = stream::unfold((Phase::Meta(meta), messages), |(phase, mut messages)| async move {
        match phase {
            Phase::Meta(meta) => Some((meta_event(&meta), (Phase::Body, messages))),
            Phase::Body => match messages.next().await {
                Some(Ok(message)) => Some((message_event(&message), (Phase::Body, messages))),
                Some(Err(e)) => {
                    debug!("Closing chat stream with error frame: {}", e);
                    Some((error_event(&e), (Phase::Done, messages)))
                }
                None => Some((end_event(), (Phase::Done, messages))),
            },
            Phase::Done => None,
        }
    })
    .map(Ok::<_, Infallible>);

    let boxed: SseStream = Box::pin(events);
    Sse::new(boxed)
}

fn meta_event(meta: &StreamMeta) -> Event {
    Event::default()
        .event(META_EVENT)
        .data(serde_json::to_string(meta).unwrap_or_default())
}

fn message_event(message: &ChatMessage) -> Event {
    Event::default().data(serde_json::to_string(message).unwrap_or_default())
}

fn error_event(error: &ChatError) -> Event {
    Event::default()
        .event(ERROR_EVENT)
        .data(serde_json::to_string(&ErrorPayload::from(error)).unwrap_or_default())
}

fn end_event() -> Event {
    Event::default().event(END_EVENT).data("{}")
}
