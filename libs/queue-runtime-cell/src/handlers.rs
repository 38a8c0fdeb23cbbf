use std::convert::Infallible;

use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
    Extension, Json,
};
use futures::Stream;
use serde_json::{json, Value};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};
use uuid::Uuid;

use shared_models::auth::User;
use shared_models::error::AppError;
use shared_utils::extractor::require_staff;

use crate::router::DisplayState;
use crate::DisplayReceiver;

fn event_stream(receiver: DisplayReceiver) -> impl Stream<Item = Result<Event, Infallible>> {
    futures::stream::unfold(receiver, |mut receiver| async move {
        loop {
            match receiver.recv().await {
                Ok(message) => {
                    let event = Event::default().event("notice").data(message);
                    return Some((Ok(event), receiver));
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Display subscriber lagged, {} updates skipped", skipped);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    })
}

/// Server-sent events for a waiting-room display: patient calls and seat
/// offers for one schedule.
pub async fn schedule_display_events(
    State(state): State<DisplayState>,
    Path(schedule_id): Path<Uuid>,
    Extension(user): Extension<User>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    require_staff(&user)?;
    debug!("Display subscribed to schedule {}", schedule_id);

    let receiver = state.broadcaster.subscribe(schedule_id).await;
    Ok(Sse::new(event_stream(receiver)).keep_alive(KeepAlive::default()))
}

/// Every notice across schedules, for monitoring consoles.
pub async fn global_display_events(
    State(state): State<DisplayState>,
    Extension(user): Extension<User>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    require_staff(&user)?;
    let receiver = state.broadcaster.subscribe_global();
    Ok(Sse::new(event_stream(receiver)).keep_alive(KeepAlive::default()))
}

#[axum::debug_handler(state = DisplayState)]
pub async fn get_sweeper_stats(
    State(state): State<DisplayState>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    require_staff(&user)?;

    let Some(sweeper) = &state.sweeper else {
        return Err(AppError::NotFound("Sweep worker is not running on this node".to_string()));
    };
    let stats = sweeper.stats().await;
    let channels = state.broadcaster.get_active_channels().await;

    Ok(Json(json!({
        "sweeper": stats,
        "active_display_channels": channels.len()
    })))
}
