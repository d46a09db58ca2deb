use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::response::Sse;
use axum::response::sse::{Event, KeepAlive};
use futures::Stream;
use mediaconv_core::error::ApiError;
use mediaconv_transcoder::router::EventKind;

use crate::error::AppError;
use crate::state::AppState;

/// Server-sent events for one session.
/// GET /events/{session_id}
///
/// Carries every topic of the session; the SSE event name is the topic kind.
/// The stream ends once the session's terminal event has been sent. Unknown
/// and already finished sessions get 404.
pub async fn session_events(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let Some(mut sub) = state
        .converter
        .router()
        .attach(&session_id, &EventKind::ALL)
    else {
        return Err(ApiError::NotFound(format!("no running session {session_id}")).into());
    };

    let stream = async_stream::stream! {
        while let Some(evt) = sub.recv().await {
            match serde_json::to_string(&evt) {
                Ok(data) => yield Ok(Event::default().event(evt.kind().as_str()).data(data)),
                Err(e) => tracing::warn!(error = %e, "could not encode session event"),
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    ))
}
