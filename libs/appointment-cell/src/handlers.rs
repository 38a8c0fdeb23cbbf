// libs/appointment-cell/src/handlers.rs
use axum::{
    extract::{Path, State},
    Extension, Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use shared_models::auth::User;
use shared_models::error::AppError;
use shared_utils::extractor::{require_self_or_staff, require_staff};

use crate::models::{
    Appointment, AppointmentError, AppointmentKind, BookAppointmentRequest, ErrorCategory,
    JoinWaitlistRequest, Patient, PaymentRequest, RedeemCheckInRequest, Schedule,
    SubmitAddOnRequest,
};
use crate::router::AppState;

impl From<AppointmentError> for AppError {
    fn from(e: AppointmentError) -> Self {
        let message = e.to_string();
        match e.category() {
            ErrorCategory::NotFound => AppError::NotFound(message),
            ErrorCategory::Validation => AppError::ValidationError(message),
            ErrorCategory::Conflict => AppError::Conflict(message),
            ErrorCategory::Temporal => AppError::Unprocessable(message),
            ErrorCategory::Internal => AppError::Internal(message),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct DecisionBody {
    pub approver_id: Option<String>,
}

async fn owned_appointment(state: &AppState, user: &User, appointment_id: Uuid) -> Result<Appointment, AppError> {
    let appointment = state.engine.booking.get_appointment(appointment_id).await?;
    require_self_or_staff(user, &appointment.patient_id.to_string())?;
    Ok(appointment)
}

// ==============================================================================
// APPOINTMENTS
// ==============================================================================

#[axum::debug_handler(state = AppState)]
pub async fn book_appointment(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Json(request): Json<BookAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    require_self_or_staff(&user, &request.patient_id.to_string())?;
    if request.kind == AppointmentKind::WalkIn {
        require_staff(&user)?;
    }

    let appointment = state.engine.booking.book_appointment(request).await?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment,
        "message": "Appointment booked successfully"
    })))
}

#[axum::debug_handler(state = AppState)]
pub async fn get_appointment(
    State(state): State<AppState>,
    Path(appointment_id): Path<Uuid>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let appointment = owned_appointment(&state, &user, appointment_id).await?;
    Ok(Json(json!(appointment)))
}

#[axum::debug_handler(state = AppState)]
pub async fn cancel_appointment(
    State(state): State<AppState>,
    Path(appointment_id): Path<Uuid>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    owned_appointment(&state, &user, appointment_id).await?;
    let outcome = state.engine.booking.cancel_appointment(appointment_id).await?;

    Ok(Json(json!({
        "success": true,
        "appointment": outcome.appointment,
        "seat_released": outcome.seat_released,
        "backfill": outcome.backfill,
        "message": "Appointment cancelled"
    })))
}

#[axum::debug_handler(state = AppState)]
pub async fn mark_no_show(
    State(state): State<AppState>,
    Path(appointment_id): Path<Uuid>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    require_staff(&user)?;
    let outcome = state.engine.booking.mark_no_show(appointment_id).await?;
    Ok(Json(json!(outcome)))
}

#[axum::debug_handler(state = AppState)]
pub async fn complete_appointment(
    State(state): State<AppState>,
    Path(appointment_id): Path<Uuid>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    require_staff(&user)?;
    let outcome = state.engine.booking.mark_completed(appointment_id).await?;
    Ok(Json(json!(outcome)))
}

#[axum::debug_handler(state = AppState)]
pub async fn recall_appointment(
    State(state): State<AppState>,
    Path(appointment_id): Path<Uuid>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    require_staff(&user)?;
    let appointment = state.engine.booking.recall(appointment_id).await?;
    Ok(Json(json!(appointment)))
}

#[axum::debug_handler(state = AppState)]
pub async fn mark_missed_call(
    State(state): State<AppState>,
    Path(appointment_id): Path<Uuid>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    require_staff(&user)?;
    let appointment = state.engine.booking.mark_missed_call(appointment_id).await?;
    Ok(Json(json!(appointment)))
}

#[axum::debug_handler(state = AppState)]
pub async fn issue_check_in_token(
    State(state): State<AppState>,
    Path(appointment_id): Path<Uuid>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    owned_appointment(&state, &user, appointment_id).await?;
    let issued = state.engine.check_in.issue_token(appointment_id).await?;
    Ok(Json(json!(issued)))
}

#[axum::debug_handler(state = AppState)]
pub async fn pay_add_on(
    State(state): State<AppState>,
    Path(appointment_id): Path<Uuid>,
    Extension(user): Extension<User>,
    Json(payment): Json<PaymentRequest>,
) -> Result<Json<Value>, AppError> {
    owned_appointment(&state, &user, appointment_id).await?;
    let appointment = state.engine.add_on.pay(appointment_id, payment).await?;
    Ok(Json(json!(appointment)))
}

// ==============================================================================
// CHECK-IN & QUEUE
// ==============================================================================

/// Scanner endpoint. The token is the credential; the scanning device is staff.
#[axum::debug_handler(state = AppState)]
pub async fn redeem_check_in(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Json(request): Json<RedeemCheckInRequest>,
) -> Result<Json<Value>, AppError> {
    require_staff(&user)?;
    let result = state.engine.check_in.redeem(&request.token).await?;
    Ok(Json(json!(result)))
}

#[axum::debug_handler(state = AppState)]
pub async fn get_availability(
    State(state): State<AppState>,
    Path(schedule_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let availability = state.engine.booking.get_availability(schedule_id).await?;
    Ok(Json(json!(availability)))
}

#[axum::debug_handler(state = AppState)]
pub async fn get_call_queue(
    State(state): State<AppState>,
    Path(schedule_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let queue = state.engine.booking.get_call_queue(schedule_id).await?;
    Ok(Json(json!({
        "schedule_id": schedule_id,
        "total": queue.len(),
        "queue": queue
    })))
}

#[axum::debug_handler(state = AppState)]
pub async fn call_next(
    State(state): State<AppState>,
    Path(schedule_id): Path<Uuid>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    require_staff(&user)?;
    let called = state.engine.booking.call_next(schedule_id).await?;
    Ok(Json(json!({ "called": called })))
}

// ==============================================================================
// WAITLIST
// ==============================================================================

#[axum::debug_handler(state = AppState)]
pub async fn join_waitlist(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Json(request): Json<JoinWaitlistRequest>,
) -> Result<Json<Value>, AppError> {
    require_self_or_staff(&user, &request.patient_id.to_string())?;
    let entry = state.engine.waitlist.join(request).await?;
    Ok(Json(json!(entry)))
}

#[axum::debug_handler(state = AppState)]
pub async fn get_waitlist_entry(
    State(state): State<AppState>,
    Path(entry_id): Path<Uuid>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let entry = state.engine.waitlist.get_entry(entry_id).await?;
    require_self_or_staff(&user, &entry.patient_id.to_string())?;
    Ok(Json(json!(entry)))
}

#[axum::debug_handler(state = AppState)]
pub async fn pay_waitlist_offer(
    State(state): State<AppState>,
    Path(entry_id): Path<Uuid>,
    Extension(user): Extension<User>,
    Json(payment): Json<PaymentRequest>,
) -> Result<Json<Value>, AppError> {
    let entry = state.engine.waitlist.get_entry(entry_id).await?;
    require_self_or_staff(&user, &entry.patient_id.to_string())?;

    let appointment = state.engine.waitlist.pay_offer(entry_id, payment).await?;
    Ok(Json(json!({
        "success": true,
        "appointment": appointment
    })))
}

#[axum::debug_handler(state = AppState)]
pub async fn cancel_waitlist_entry(
    State(state): State<AppState>,
    Path(entry_id): Path<Uuid>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let entry = state.engine.waitlist.get_entry(entry_id).await?;
    require_self_or_staff(&user, &entry.patient_id.to_string())?;

    let entry = state.engine.waitlist.withdraw(entry_id).await?;
    Ok(Json(json!(entry)))
}

// ==============================================================================
// ADD-ON REQUESTS
// ==============================================================================

#[axum::debug_handler(state = AppState)]
pub async fn submit_add_on(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Json(request): Json<SubmitAddOnRequest>,
) -> Result<Json<Value>, AppError> {
    require_self_or_staff(&user, &request.patient_id.to_string())?;
    let stored = state.engine.add_on.submit(request).await?;
    Ok(Json(json!(stored)))
}

#[axum::debug_handler(state = AppState)]
pub async fn approve_add_on(
    State(state): State<AppState>,
    Path(request_id): Path<Uuid>,
    Extension(user): Extension<User>,
    Json(body): Json<DecisionBody>,
) -> Result<Json<Value>, AppError> {
    require_staff(&user)?;
    let approver = body.approver_id.unwrap_or_else(|| user.id.clone());
    let appointment = state.engine.add_on.approve(request_id, &approver).await?;
    Ok(Json(json!(appointment)))
}

#[axum::debug_handler(state = AppState)]
pub async fn reject_add_on(
    State(state): State<AppState>,
    Path(request_id): Path<Uuid>,
    Extension(user): Extension<User>,
    Json(body): Json<DecisionBody>,
) -> Result<Json<Value>, AppError> {
    require_staff(&user)?;
    let approver = body.approver_id.unwrap_or_else(|| user.id.clone());
    let request = state.engine.add_on.reject(request_id, &approver).await?;
    Ok(Json(json!(request)))
}

// ==============================================================================
// ADMINISTRATION
// ==============================================================================

#[axum::debug_handler(state = AppState)]
pub async fn register_schedule(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Json(schedule): Json<Schedule>,
) -> Result<Json<Value>, AppError> {
    require_staff(&user)?;
    let stored = state.engine.booking.register_schedule(schedule).await?;
    Ok(Json(json!(stored)))
}

#[axum::debug_handler(state = AppState)]
pub async fn register_patient(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Json(patient): Json<Patient>,
) -> Result<Json<Value>, AppError> {
    require_staff(&user)?;
    let stored = state.engine.booking.register_patient(patient).await?;
    Ok(Json(json!(stored)))
}

#[axum::debug_handler(state = AppState)]
pub async fn run_sweep(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    require_staff(&user)?;
    let report = state.engine.run_sweep().await?;
    Ok(Json(json!(report)))
}
