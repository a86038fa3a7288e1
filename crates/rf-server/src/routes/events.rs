//! Server-Sent Events (SSE) feed for one video.
//!
//! Joins the video's [`rf_core::events::ProgressHub`] topic and forwards every
//! event published after the subscription. There is no replay for late
//! joiners. The stream ends after a terminal event, when the hub closes, or
//! when the server begins shutting down. Dropping the connection drops the
//! [`rf_core::events::Subscription`], which releases the topic.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Path as PathParam, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Extension;
use tokio::sync::broadcast::error::RecvError;

use crate::authz::{load_authorized_video, Action, Principal};
use crate::context::AppContext;
use crate::error::AppError;
use crate::routes::videos::parse_video_id;

/// GET /api/videos/{id}/events -- SSE stream of this video's progress.
#[utoipa::path(
    get,
    path = "/api/videos/{id}/events",
    params(("id" = String, Path, description = "Video ID")),
    responses(
        (status = 200, description = "text/event-stream of uploaded, progress, complete and failed events"),
        (status = 404, description = "Not found or owned by another organization")
    )
)]
pub async fn video_events(
    State(ctx): State<AppContext>,
    Extension(principal): Extension<Principal>,
    PathParam(id): PathParam<String>,
) -> Result<Sse<impl futures_core::Stream<Item = Result<Event, Infallible>>>, AppError> {
    let video_id = parse_video_id(&id)?;
    {
        let conn = rf_db::pool::get_conn(&ctx.db)?;
        load_authorized_video(&conn, &principal, Action::SubscribeVideo, video_id)?;
    }

    let mut sub = ctx.hub.join(video_id);
    let shutdown = ctx.shutdown.clone();
    let heartbeat_every = Duration::from_secs(ctx.config.events.heartbeat_secs.max(1));

    tracing::debug!(video_id = %video_id, user_id = %principal.user_id, "SSE subscriber joined");

    let stream = async_stream::stream! {
        let mut heartbeat = tokio::time::interval(heartbeat_every);
        // The first tick completes immediately.
        heartbeat.tick().await;

        loop {
            tokio::select! {
                result = sub.recv() => {
                    match result {
                        Ok(event) => {
                            let terminal = event.payload.is_terminal();
                            match serde_json::to_string(&event) {
                                Ok(data) => {
                                    yield Ok(Event::default().event(event.payload.kind()).data(data));
                                }
                                Err(e) => tracing::warn!("Failed to serialize video event: {e}"),
                            }
                            if terminal {
                                break;
                            }
                        }
                        Err(RecvError::Lagged(n)) => {
                            tracing::debug!(video_id = %video_id, "SSE client lagged by {n} events");
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
                _ = heartbeat.tick() => {
                    yield Ok(Event::default()
                        .event("heartbeat")
                        .data(r#"{"type":"heartbeat"}"#));
                }
                _ = shutdown.cancelled() => break,
            }
        }

        tracing::debug!(video_id = %video_id, "SSE stream ended");
    };

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(heartbeat_every)
            .text("ping"),
    ))
}
