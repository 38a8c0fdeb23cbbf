// libs/appointment-cell/src/services/capacity.rs
//
// Seat accounting for one schedule. `booked_seats` already includes seats
// hard-locked for notified waitlist entries; unpaid add-ons are counted
// separately as soft reservations until they pay.

use tracing::{info, warn};
use uuid::Uuid;

use crate::models::{AppointmentError, Schedule, ScheduleStatus, SeatAvailability};
use crate::services::store::ClinicTables;

pub fn pending_soft_reservations(tables: &ClinicTables, schedule_id: Uuid) -> u32 {
    tables
        .appointments
        .values()
        .filter(|a| a.schedule_id == schedule_id && a.is_soft_reservation())
        .count() as u32
}

/// Seats a new claimant could take right now. Clamped at zero for display.
pub fn available_seats(tables: &ClinicTables, schedule: &Schedule) -> u32 {
    schedule
        .total_seats
        .saturating_sub(schedule.booked_seats)
        .saturating_sub(pending_soft_reservations(tables, schedule.id))
}

pub fn seat_availability(tables: &ClinicTables, schedule_id: Uuid) -> Result<SeatAvailability, AppointmentError> {
    let schedule = tables.schedule(schedule_id)?;
    Ok(SeatAvailability {
        schedule_id,
        total_seats: schedule.total_seats,
        booked_seats: schedule.booked_seats,
        pending_soft_reservations: pending_soft_reservations(tables, schedule_id),
        available_seats: available_seats(tables, schedule),
    })
}

/// Take one seat. Checked arithmetic: rejects instead of clamping.
pub fn reserve_seat(tables: &mut ClinicTables, schedule_id: Uuid) -> Result<(), AppointmentError> {
    let pending = pending_soft_reservations(tables, schedule_id);
    let schedule = tables.schedule_mut(schedule_id)?;

    let occupied = schedule
        .booked_seats
        .checked_add(pending)
        .ok_or_else(|| AppointmentError::CapacityViolation("seat counter overflow".to_string()))?;
    if occupied >= schedule.total_seats {
        return Err(AppointmentError::NoSeats);
    }

    schedule.booked_seats += 1;
    debug_assert!(schedule.booked_seats <= schedule.total_seats);
    sync_status(tables, schedule_id)
}

/// Give one seat back. Underflow means an earlier accounting bug: floor at
/// zero and flag it rather than failing the caller.
pub fn release_seat(tables: &mut ClinicTables, schedule_id: Uuid) -> Result<bool, AppointmentError> {
    let schedule = tables.schedule_mut(schedule_id)?;

    let released = if schedule.booked_seats == 0 {
        warn!(
            "Seat counter for schedule {} already at zero on release; possible double release",
            schedule_id
        );
        false
    } else {
        schedule.booked_seats -= 1;
        true
    };

    sync_status(tables, schedule_id)?;
    Ok(released)
}

/// Count a paid add-on. If the schedule is already at capacity the add-on
/// extends it by one so `booked_seats <= total_seats` keeps holding.
pub fn commit_add_on_seat(tables: &mut ClinicTables, schedule_id: Uuid) -> Result<(), AppointmentError> {
    let schedule = tables.schedule_mut(schedule_id)?;

    if schedule.booked_seats >= schedule.total_seats {
        schedule.total_seats += 1;
        info!(
            "Schedule {} extended to {} seats for a paid add-on",
            schedule_id, schedule.total_seats
        );
    }
    schedule.booked_seats += 1;

    sync_status(tables, schedule_id)
}

/// Keep the schedule's full/available flag in line with the ledger.
pub fn sync_status(tables: &mut ClinicTables, schedule_id: Uuid) -> Result<(), AppointmentError> {
    let available = {
        let schedule = tables.schedule(schedule_id)?;
        if schedule.booked_seats > schedule.total_seats {
            return Err(AppointmentError::CapacityViolation(format!(
                "schedule {} has {} booked of {} seats",
                schedule_id, schedule.booked_seats, schedule.total_seats
            )));
        }
        available_seats(tables, schedule)
    };

    let schedule = tables.schedule_mut(schedule_id)?;
    schedule.status = match (schedule.status, available) {
        (ScheduleStatus::Cancelled, _) => ScheduleStatus::Cancelled,
        (_, 0) => ScheduleStatus::Full,
        (_, _) => ScheduleStatus::Available,
    };
    Ok(())
}
