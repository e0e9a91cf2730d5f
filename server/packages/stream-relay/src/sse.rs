use std::convert::Infallible;

use axum::response::sse::Event;
use futures::{Stream, StreamExt};
use serde_json::Value;

use crate::event::AgentEvent;

pub fn to_sse_event(event: &AgentEvent) -> Option<Event> {
    event.sse_data().map(|data| Event::default().data(data))
}

/// Frame carrying an arbitrary JSON payload verbatim.
pub fn json_frame(value: &Value) -> Event {
    Event::default().data(value.to_string())
}

pub fn done_frame() -> Event {
    Event::default().data("[DONE]")
}

pub fn event_stream_to_sse<S>(events: S) -> impl Stream<Item = Result<Event, Infallible>> + Send
where
    S: Stream<Item = AgentEvent> + Send,
{
    events.filter_map(|event| async move { to_sse_event(&event).map(Ok) })
}
