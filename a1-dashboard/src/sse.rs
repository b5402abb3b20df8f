//! Server-Sent Events stream over the run context.
//!
//! The run executes on a plain thread, so the stream polls the shared
//! [`RunContext`](a1::context::RunContext) instead of subscribing to it.

use std::convert::Infallible;
use std::time::Duration;

use a1::context::{LogEntry, RunSnapshot};
use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use serde::Serialize;
use tracing::warn;

use crate::state::AppState;

const POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum SsePayload<'a> {
    Log { entry: &'a LogEntry },
    Status { run: &'a RunSnapshot },
}

impl SsePayload<'_> {
    fn event_name(&self) -> &'static str {
        match self {
            SsePayload::Log { .. } => "log",
            SsePayload::Status { .. } => "status",
        }
    }

    fn to_event(&self) -> Option<Event> {
        match serde_json::to_string(self) {
            Ok(json) => Some(Event::default().event(self.event_name()).data(json)),
            Err(e) => {
                warn!(error = %e, "failed to encode SSE payload");
                None
            }
        }
    }
}

/// SSE endpoint handler: new log entries as `log` events, run state changes
/// (running flag, session, metrics) as `status` events.
pub async fn events_handler(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let ctx = state.ctx;

    let stream = async_stream::stream! {
        yield Ok(Event::default().event("connected").data("{}"));

        let mut next = 0usize;
        let mut last: Option<RunSnapshot> = None;
        loop {
            let mut snapshot = ctx.snapshot();
            for entry in ctx.log_since(next) {
                next = entry.index + 1;
                if let Some(event) = (SsePayload::Log { entry: &entry }).to_event() {
                    yield Ok(event);
                }
            }

            // Log growth alone is not a status change.
            snapshot.log_len = 0;
            if last.as_ref() != Some(&snapshot) {
                if let Some(event) = (SsePayload::Status { run: &snapshot }).to_event() {
                    yield Ok(event);
                }
                last = Some(snapshot);
            }

            tokio::time::sleep(POLL_INTERVAL).await;
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)).text("ping"))
}

#[cfg(test)]
mod tests {
    use a1::core::events::LogKind;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use futures::StreamExt;
    use tower::ServiceExt;

    use crate::routes::app;
    use crate::state::AppState;

    #[tokio::test]
    async fn stream_sends_connected_then_log_entries() {
        let temp = tempfile::tempdir().expect("tempdir");
        let state = AppState::new(temp.path().to_path_buf());
        state.ctx.log(LogKind::Session, "Session #1 started");

        let response = app(state)
            .oneshot(
                Request::builder()
                    .uri("/events")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);

        let mut body = response.into_body().into_data_stream();
        let mut received = String::new();
        while !received.contains("Session #1 started") {
            let chunk = tokio::time::timeout(std::time::Duration::from_secs(5), body.next())
                .await
                .expect("chunk before timeout")
                .expect("stream open")
                .expect("chunk");
            received.push_str(&String::from_utf8_lossy(&chunk));
        }
        assert!(received.starts_with("event: connected"));
        assert!(received.contains("event: log"));
    }
}
