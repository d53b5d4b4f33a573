//! `GET /api/sessions`, `GET /api/sessions/{id}`, `DELETE
//! /api/sessions/{id}`, and the `GET /api/sessions/{id}/events` SSE stream.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::Json;
use futures_util::stream::{self, Stream, StreamExt};
use serde::Serialize;

use sa_broadcaster::HEARTBEAT_INTERVAL;
use sa_domain::error::Error as DomainError;

use crate::api::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct SessionSummary {
    pub id: String,
    pub updated_at: chrono::DateTime<chrono::Utc>,
    pub message_count: usize,
}

pub async fn list_sessions(State(state): State<AppState>) -> impl IntoResponse {
    let sessions: Vec<SessionSummary> = state
        .sessions
        .list()
        .into_iter()
        .map(|s| SessionSummary {
            id: s.session_id,
            updated_at: s.updated_at,
            message_count: s.messages.len(),
        })
        .collect();
    Json(serde_json::json!({ "sessions": sessions }))
}

pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let session = state
        .sessions
        .get(&session_id)
        .ok_or_else(|| DomainError::NotFound(format!("session {session_id}")))?;
    Ok(Json(session.read().clone()))
}

pub async fn delete_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    state.sessions.delete(&session_id)?;
    state.broadcaster.drop_session(&session_id);
    Ok(StatusCode::NO_CONTENT)
}

/// SSE stream of a session's events, replaying everything after
/// `Last-Event-ID` before switching to live delivery, with a `: ping`
/// comment heartbeat every [`HEARTBEAT_INTERVAL`] to keep intermediaries
/// from closing an idle connection.
pub async fn session_events(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    headers: HeaderMap,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let last_event_id: u64 = headers
        .get("last-event-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);

    let subscription = state.broadcaster.subscribe(&session_id, last_event_id);
    let replay = stream::iter(subscription.replay.clone()).map(to_sse);
    let live = stream::unfold(subscription, move |sub| async move {
        tokio::select! {
            event = sub.recv() => event.map(|e| (to_sse(e), sub)),
            _ = tokio::time::sleep(HEARTBEAT_INTERVAL) => {
                Some((Ok(SseEvent::default().comment("ping")), sub))
            }
        }
    });

    Sse::new(replay.chain(live)).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}

fn to_sse(event: sa_domain::event::Event) -> Result<SseEvent, Infallible> {
    let kind = event.payload.kind();
    let data = serde_json::to_string(&event).unwrap_or_else(|_| "{}".to_string());
    Ok(SseEvent::default().event(kind).id(event.seq.to_string()).data(data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sa_domain::event::{Event, EventPayload};

    #[test]
    fn to_sse_never_fails_for_a_well_formed_event() {
        let event = Event::new(7, "s1", "t1", EventPayload::IterationStart { iteration: 2 });
        assert_eq!(event.payload.kind(), "iteration_start");
        // axum's `sse::Event` doesn't expose its fields publicly for direct
        // assertion; the meaningful check is that building it never panics
        // or errors for a well-formed domain event.
        assert!(to_sse(event).is_ok());
    }
}
