use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::response::sse::{Event, Sse};
use serde::Deserialize;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::{BroadcastStream, IntervalStream};
use tokio_stream::StreamExt;

use crate::errors::AppError;
use crate::services::notify::ChannelEvent;
use crate::state::AppState;

use super::resolve_token;

#[derive(Deserialize)]
pub struct EventsQuery {
    pub token: Option<String>,
}

/// Whether a subscriber watching `channel` should see `event`. `None` watches
/// every channel.
pub fn is_visible(channel: Option<&str>, event: &ChannelEvent) -> bool {
    channel.map_or(true, |key| key == event.key)
}

// GET /api/events?token=
pub async fn events_stream(
    State(state): State<Arc<AppState>>,
    Query(query): Query<EventsQuery>,
) -> Result<Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>>, AppError> {
    // EventSource can't set headers, so the token rides in the query string
    let user = resolve_token(&state, query.token.as_deref().unwrap_or(""))?;
    let channel = (!user.is_owner()).then(|| user.channel_key());

    let rx = state.events_tx.subscribe();
    tracing::debug!(user_id = %user.id, "event stream opened");

    let live_stream = BroadcastStream::new(rx).filter_map(move |result| match result {
        Ok(event) if is_visible(channel.as_deref(), &event) => {
            let data = serde_json::to_string(&event.payload).unwrap_or_default();
            Some(Ok::<_, Infallible>(
                Event::default().event(event.event).data(data),
            ))
        }
        Ok(_) => None,
        Err(BroadcastStreamRecvError::Lagged(skipped)) => {
            tracing::warn!(skipped, "event stream lagged");
            None
        }
    });

    let keepalive_stream = IntervalStream::new(tokio::time::interval(Duration::from_secs(30)))
        .map(|_| Ok::<_, Infallible>(Event::default().comment("keepalive")));

    Ok(Sse::new(live_stream.merge(keepalive_stream)))
}
