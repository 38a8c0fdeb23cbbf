// libs/appointment-cell/src/router.rs
use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use shared_config::AppConfig;
use shared_utils::extractor::auth_middleware;

use crate::engine::ClinicEngine;
use crate::handlers;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub engine: Arc<ClinicEngine>,
}

impl AppState {
    pub fn new(config: Arc<AppConfig>, engine: Arc<ClinicEngine>) -> Self {
        Self { config, engine }
    }
}

pub fn appointment_routes(state: AppState) -> Router {
    // Every route requires authentication; staff-only actions check the role in the handler.
    let protected_routes = Router::new()
        // Appointment lifecycle
        .route("/appointments", post(handlers::book_appointment))
        .route("/appointments/{appointment_id}", get(handlers::get_appointment))
        .route("/appointments/{appointment_id}/cancel", post(handlers::cancel_appointment))
        .route("/appointments/{appointment_id}/no-show", post(handlers::mark_no_show))
        .route("/appointments/{appointment_id}/complete", post(handlers::complete_appointment))
        .route("/appointments/{appointment_id}/recall", post(handlers::recall_appointment))
        .route("/appointments/{appointment_id}/missed-call", post(handlers::mark_missed_call))
        .route("/appointments/{appointment_id}/check-in-token", post(handlers::issue_check_in_token))
        .route("/appointments/{appointment_id}/add-on-payment", post(handlers::pay_add_on))

        // Day-of-visit
        .route("/check-in/redeem", post(handlers::redeem_check_in))
        .route("/schedules/{schedule_id}/availability", get(handlers::get_availability))
        .route("/schedules/{schedule_id}/queue", get(handlers::get_call_queue))
        .route("/schedules/{schedule_id}/call-next", post(handlers::call_next))

        // Waitlist
        .route("/waitlist", post(handlers::join_waitlist))
        .route("/waitlist/{entry_id}", get(handlers::get_waitlist_entry))
        .route("/waitlist/{entry_id}/pay", post(handlers::pay_waitlist_offer))
        .route("/waitlist/{entry_id}/cancel", post(handlers::cancel_waitlist_entry))

        // Add-on requests
        .route("/add-on-requests", post(handlers::submit_add_on))
        .route("/add-on-requests/{request_id}/approve", post(handlers::approve_add_on))
        .route("/add-on-requests/{request_id}/reject", post(handlers::reject_add_on))

        // Reference data and maintenance
        .route("/admin/schedules", post(handlers::register_schedule))
        .route("/admin/patients", post(handlers::register_patient))
        .route("/admin/sweep", post(handlers::run_sweep))

        .layer(middleware::from_fn_with_state(state.config.clone(), auth_middleware));

    Router::new()
        .merge(protected_routes)
        .with_state(state)
}
