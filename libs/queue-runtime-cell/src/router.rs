use std::sync::Arc;

use axum::{middleware, routing::get, Router};

use shared_config::AppConfig;
use shared_utils::extractor::auth_middleware;

use crate::handlers::{get_sweeper_stats, global_display_events, schedule_display_events};
use crate::{DisplayBroadcaster, SweepWorker};

#[derive(Clone)]
pub struct DisplayState {
    pub config: Arc<AppConfig>,
    pub broadcaster: DisplayBroadcaster,
    pub sweeper: Option<Arc<SweepWorker>>,
}

pub fn display_routes(state: DisplayState) -> Router {
    let protected_routes = Router::new()
        .route("/schedules/{schedule_id}/display", get(schedule_display_events))
        .route("/display", get(global_display_events))
        .route("/runtime/sweeper", get(get_sweeper_stats))
        .layer(middleware::from_fn_with_state(state.config.clone(), auth_middleware));

    Router::new().merge(protected_routes).with_state(state)
}
