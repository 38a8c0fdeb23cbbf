// libs/appointment-cell/src/services/lifecycle.rs
//
// Status machine for a single booking plus the row-level transitions shared
// by several services. Everything here runs inside a store transaction.

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::{
    Appointment, AppointmentError, AppointmentKind, AppointmentStatus, PaymentStatus,
};
use crate::services::capacity::release_seat;
use crate::services::store::ClinicTables;

/// Validate that a status transition is allowed.
pub fn validate_status_transition(
    current: AppointmentStatus,
    next: AppointmentStatus,
) -> Result<(), AppointmentError> {
    if valid_transitions(current).contains(&next) {
        return Ok(());
    }
    warn!("Invalid status transition attempted: {} -> {}", current, next);
    Err(AppointmentError::InvalidStatusTransition {
        from: current,
        to: next,
    })
}

pub fn valid_transitions(current: AppointmentStatus) -> &'static [AppointmentStatus] {
    use AppointmentStatus::*;
    match current {
        PendingPayment => &[Scheduled, Cancelled],
        Scheduled => &[CheckedIn, Cancelled, NoShow],
        // Back to scheduled is the missed-call path. Cancelling is forbidden.
        CheckedIn => &[Completed, Scheduled],
        Completed | Cancelled | NoShow => &[],
    }
}

/// A booked patient who never checked in is a no-show once the window and
/// the grace period are both over.
pub fn should_mark_no_show(
    status: AppointmentStatus,
    window_end: DateTime<Utc>,
    grace_minutes: i64,
    now: DateTime<Utc>,
) -> bool {
    status == AppointmentStatus::Scheduled && now > window_end + Duration::minutes(grace_minutes)
}

/// Cancel a row and give back its seat if it held a counted one.
/// Returns whether a seat was actually released.
pub fn cancel_in_tables(
    t: &mut ClinicTables,
    appointment_id: Uuid,
    now: DateTime<Utc>,
) -> Result<bool, AppointmentError> {
    let row = t.appointment_mut(appointment_id)?;
    validate_status_transition(row.status, AppointmentStatus::Cancelled)?;

    let counted = row.holds_counted_seat();
    let schedule_id = row.schedule_id;

    row.status = AppointmentStatus::Cancelled;
    if row.payment_status == PaymentStatus::Paid {
        row.payment_status = PaymentStatus::Refunded;
    }
    row.clear_visit_progress();
    row.payment_deadline = None;
    row.updated_at = now;

    if counted {
        release_seat(t, schedule_id)
    } else {
        debug!("Appointment {} held no counted seat; ledger unchanged", appointment_id);
        Ok(false)
    }
}

/// Write an appointment row for the pair, reviving a cancelled record when one
/// exists. Revived rows always take the new visit number passed in.
pub fn place_appointment(
    t: &mut ClinicTables,
    patient_id: Uuid,
    schedule_id: Uuid,
    kind: AppointmentKind,
    status: AppointmentStatus,
    visit_number: u32,
    now: DateTime<Utc>,
) -> Result<Uuid, AppointmentError> {
    if t.active_appointment_for(patient_id, schedule_id).is_some() {
        return Err(AppointmentError::AlreadyBooked);
    }

    match t.cancelled_appointment_for(patient_id, schedule_id) {
        Some(id) => {
            let row = t.appointment_mut(id)?;
            let previous_visit = row.visit_number;
            let created_at = row.created_at;
            *row = Appointment::new(patient_id, schedule_id, kind, status, visit_number, now);
            row.id = id;
            row.created_at = created_at;
            debug!(
                "Revived appointment {} with visit number {} (was {})",
                id, visit_number, previous_visit
            );
            Ok(id)
        }
        None => {
            let appointment = Appointment::new(patient_id, schedule_id, kind, status, visit_number, now);
            let id = appointment.id;
            t.appointments.insert(id, appointment);
            Ok(id)
        }
    }
}
