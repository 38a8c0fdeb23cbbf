use std::sync::Arc;

use axum::{routing::get, Router};

use appointment_cell::{appointment_routes, AppState, ClinicEngine};
use queue_runtime_cell::{display_routes, DisplayBroadcaster, DisplayState, SweepWorker};
use shared_config::AppConfig;

pub fn create_router(
    config: Arc<AppConfig>,
    engine: Arc<ClinicEngine>,
    broadcaster: DisplayBroadcaster,
    sweeper: Option<Arc<SweepWorker>>,
) -> Router {
    let display_state = DisplayState {
        config: config.clone(),
        broadcaster,
        sweeper,
    };

    Router::new()
        .route("/", get(|| async { "Clinic slot engine is running!" }))
        .nest("/clinic", appointment_routes(AppState::new(config, engine)))
        .nest("/queue", display_routes(display_state))
}
