// libs/appointment-cell/src/services/call_queue.rs
//
// Call ordering for the checked-in patients of one schedule. Pure functions
// over the current checked-in set; no hidden state and no randomness.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{Appointment, AppointmentKind};

/// Primary entries emitted before each same-doctor follow-up is spliced in.
const PRIMARY_RUN_PER_FOLLOW_UP: usize = 2;

/// Full call order: primary tier with same-doctor follow-ups interleaved,
/// then different-doctor follow-ups, re-queued patients, and add-ons.
pub fn build_call_queue(checked_in: Vec<Appointment>, schedule_doctor_id: Uuid) -> Vec<Appointment> {
    let mut primary = Vec::new();
    let mut same_doctor = Vec::new();
    let mut other_doctor = Vec::new();
    let mut requeued = Vec::new();
    let mut add_ons = Vec::new();

    for appointment in checked_in {
        if appointment.is_requeued() {
            requeued.push(appointment);
        } else if appointment.kind == AppointmentKind::AddOn || appointment.is_add_on {
            add_ons.push(appointment);
        } else if appointment.kind == AppointmentKind::SameDayFollowUp {
            if appointment.follow_up_doctor_id == Some(schedule_doctor_id) {
                same_doctor.push(appointment);
            } else {
                other_doctor.push(appointment);
            }
        } else {
            primary.push(appointment);
        }
    }

    primary.sort_by(compare_primary);
    same_doctor.sort_by(|a, b| by_time(a.check_in_time, b.check_in_time).then_with(|| tiebreak(a, b)));
    other_doctor.sort_by(|a, b| by_time(a.check_in_time, b.check_in_time).then_with(|| tiebreak(a, b)));
    requeued.sort_by(|a, b| by_time(a.recheck_in_time, b.recheck_in_time).then_with(|| tiebreak(a, b)));
    add_ons.sort_by(|a, b| by_time(a.check_in_time, b.check_in_time).then_with(|| tiebreak(a, b)));

    let mut queue = interleave_follow_ups(primary, same_doctor);
    queue.extend(other_doctor);
    queue.extend(requeued);
    queue.extend(add_ons);
    queue
}

/// After every two primary entries splice in one follow-up; leftovers go last.
fn interleave_follow_ups(primary: Vec<Appointment>, follow_ups: Vec<Appointment>) -> Vec<Appointment> {
    let mut merged = Vec::with_capacity(primary.len() + follow_ups.len());
    let mut follow_ups = follow_ups.into_iter();

    for (position, entry) in primary.into_iter().enumerate() {
        merged.push(entry);
        if (position + 1) % PRIMARY_RUN_PER_FOLLOW_UP == 0 {
            if let Some(follow_up) = follow_ups.next() {
                merged.push(follow_up);
            }
        }
    }
    merged.extend(follow_ups);
    merged
}

fn compare_primary(a: &Appointment, b: &Appointment) -> Ordering {
    is_walk_in(a)
        .cmp(&is_walk_in(b))
        .then_with(|| a.is_late.cmp(&b.is_late))
        .then_with(|| {
            if a.is_late {
                by_time(a.check_in_time, b.check_in_time)
            } else {
                by_number(a.real_time_queue_number, b.real_time_queue_number)
                    .then_with(|| by_time(a.check_in_time, b.check_in_time))
            }
        })
        .then_with(|| tiebreak(a, b))
}

fn is_walk_in(appointment: &Appointment) -> bool {
    appointment.is_walk_in || appointment.kind == AppointmentKind::WalkIn
}

fn tiebreak(a: &Appointment, b: &Appointment) -> Ordering {
    a.visit_number.cmp(&b.visit_number).then_with(|| a.id.cmp(&b.id))
}

// Missing values sort last.
fn by_time(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> Ordering {
    (a.is_none(), a).cmp(&(b.is_none(), b))
}

fn by_number(a: Option<u32>, b: Option<u32>) -> Ordering {
    (a.is_none(), a).cmp(&(b.is_none(), b))
}

/// Recompute `real_time_queue_number` for everyone currently checked in.
///
/// On-time arrivals rank first: early arrivals (before window start) by visit
/// number, then in-window arrivals by check-in time. Late and re-queued
/// patients keep their back-of-queue number when it still sits past the
/// on-time block, otherwise they are pushed to the next free number.
pub fn assign_queue_numbers(checked_in: &mut [Appointment], window_start: DateTime<Utc>) {
    let mut early: Vec<usize> = Vec::new();
    let mut in_window: Vec<usize> = Vec::new();
    let mut trailing: Vec<usize> = Vec::new();

    for (idx, appointment) in checked_in.iter().enumerate() {
        match appointment.check_in_time {
            Some(at) if !appointment.is_late && !appointment.is_requeued() => {
                if at < window_start {
                    early.push(idx);
                } else {
                    in_window.push(idx);
                }
            }
            _ => trailing.push(idx),
        }
    }

    early.sort_by(|&a, &b| tiebreak(&checked_in[a], &checked_in[b]));
    in_window.sort_by(|&a, &b| {
        by_time(checked_in[a].check_in_time, checked_in[b].check_in_time)
            .then_with(|| tiebreak(&checked_in[a], &checked_in[b]))
    });
    trailing.sort_by(|&a, &b| {
        let (x, y) = (&checked_in[a], &checked_in[b]);
        by_number(x.real_time_queue_number, y.real_time_queue_number)
            .then_with(|| by_time(x.recheck_in_time.or(x.check_in_time), y.recheck_in_time.or(y.check_in_time)))
            .then_with(|| tiebreak(x, y))
    });

    let mut last = 0u32;
    for idx in early.into_iter().chain(in_window) {
        last += 1;
        checked_in[idx].real_time_queue_number = Some(last);
    }
    for idx in trailing {
        let number = match checked_in[idx].real_time_queue_number {
            Some(existing) if existing > last => existing,
            _ => last + 1,
        };
        checked_in[idx].real_time_queue_number = Some(number);
        last = number;
    }
}

/// First queued patient who has not been called yet.
pub fn next_to_call(queue: &[Appointment]) -> Option<&Appointment> {
    queue.iter().find(|a| a.called_at.is_none())
}
