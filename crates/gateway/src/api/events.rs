//! SSE event feeds: bounded replay followed by live subscription.
//!
//! The store provides replay and live fan-out but does not deduplicate
//! across the seam; the transport tracks the replayed lines and drops a
//! live event that matches one, so a client sees every event at most
//! once. A disconnected client is detected by the store on the next
//! fan-out (closed channel) and unsubscribed.

use std::collections::HashSet;
use std::convert::Infallible;

use axum::extract::{Path, State};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use futures_core::Stream;

use crate::error::ApiResult;
use crate::state::AppState;

/// Events replayed before switching to the live feed.
const REPLAY_LIMIT: usize = 200;

pub async fn run_events(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>> {
    event_feed(state, id)
}

pub async fn session_events(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>> {
    event_feed(state, id)
}

fn event_feed(
    state: AppState,
    id: String,
) -> ApiResult<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>> {
    let replay = state.store.read_events(&id, REPLAY_LIMIT)?;
    let (subscriber_id, mut rx) = state.store.subscribe(&id);
    let store = state.store.clone();

    let stream = async_stream::stream! {
        let mut seen: HashSet<String> = HashSet::new();
        for event in replay {
            let Ok(json) = serde_json::to_string(&event) else { continue };
            seen.insert(json.clone());
            yield Ok(SseEvent::default().event(event.kind.clone()).data(json));
        }

        while let Some(event) = rx.recv().await {
            let Ok(json) = serde_json::to_string(&event) else { continue };
            // Boundary dedup: an event appended between replay and
            // subscription shows up in both; drop the live copy.
            if seen.remove(&json) {
                continue;
            }
            yield Ok(SseEvent::default().event(event.kind.clone()).data(json));
        }

        store.unsubscribe(&id, subscriber_id);
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
