// libs/appointment-cell/src/services/booking.rs
use std::sync::Arc;

use chrono::Duration;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::context::ClinicContext;
use crate::models::{
    Appointment, AppointmentError, AppointmentKind, AppointmentStatus, BestEffort,
    BookAppointmentRequest, CancellationOutcome, CompletionOutcome, NoShowOutcome, Notice,
    Patient, Schedule, ScheduleStatus, SeatAvailability, WaitlistStatus,
};
use crate::services::call_queue::{build_call_queue, next_to_call};
use crate::services::capacity::{
    pending_soft_reservations, release_seat, reserve_seat, seat_availability, sync_status,
};
use crate::services::lifecycle::{
    cancel_in_tables, place_appointment, should_mark_no_show, validate_status_transition,
};
use crate::services::store::{Due, Scope};
use crate::services::waitlist::WaitlistService;

pub struct AppointmentBookingService {
    ctx: ClinicContext,
    waitlist: Arc<WaitlistService>,
}

impl AppointmentBookingService {
    pub fn new(ctx: ClinicContext, waitlist: Arc<WaitlistService>) -> Self {
        Self { ctx, waitlist }
    }

    // ==========================================================================
    // REFERENCE DATA
    // ==========================================================================

    /// Load or refresh a schedule owned by the scheduling subsystem. A refresh
    /// replaces the reference data but never the seat ledger: `booked_seats`
    /// stays as this engine counted it.
    #[instrument(skip(self, schedule), fields(schedule_id = %schedule.id))]
    pub async fn register_schedule(&self, schedule: Schedule) -> Result<Schedule, AppointmentError> {
        if schedule.end_time <= schedule.start_time {
            return Err(AppointmentError::ValidationError(
                "schedule end time must be after its start time".to_string(),
            ));
        }

        let schedule_id = schedule.id;
        let stored = self
            .ctx
            .store
            .transaction(Scope::schedule(schedule_id), |t| {
                let mut incoming = schedule;
                let taken = match t.schedules.get(&schedule_id) {
                    Some(existing) => {
                        incoming.booked_seats = existing.booked_seats;
                        existing.booked_seats + pending_soft_reservations(t, schedule_id)
                    }
                    None => incoming.booked_seats,
                };
                if incoming.total_seats < taken {
                    return Err(AppointmentError::ValidationError(format!(
                        "total seats ({}) below seats already taken ({})",
                        incoming.total_seats, taken
                    )));
                }

                t.schedules.insert(schedule_id, incoming);
                sync_status(t, schedule_id)?;
                t.schedule(schedule_id).cloned()
            })
            .await?;

        info!("Schedule {} registered with {} seats", schedule_id, stored.total_seats);
        Ok(stored)
    }

    pub async fn register_patient(&self, patient: Patient) -> Result<Patient, AppointmentError> {
        if patient.name.trim().is_empty() {
            return Err(AppointmentError::ValidationError("patient name is required".to_string()));
        }
        let stored = patient.clone();
        self.ctx
            .store
            .transaction(Scope::patient(patient.id), |t| {
                t.patients.insert(patient.id, patient);
                Ok(())
            })
            .await?;
        debug!("Patient {} registered", stored.id);
        Ok(stored)
    }

    pub async fn get_schedule(&self, schedule_id: Uuid) -> Result<Schedule, AppointmentError> {
        self.ctx
            .store
            .read(Scope::schedule(schedule_id), |t| t.schedule(schedule_id).cloned())
            .await?
    }

    pub async fn get_appointment(&self, appointment_id: Uuid) -> Result<Appointment, AppointmentError> {
        self.ctx
            .store
            .read(Scope::appointment(appointment_id), |t| t.appointment(appointment_id).cloned())
            .await?
    }

    pub async fn get_availability(&self, schedule_id: Uuid) -> Result<SeatAvailability, AppointmentError> {
        self.ctx
            .store
            .read(Scope::schedule(schedule_id), |t| seat_availability(t, schedule_id))
            .await?
    }

    // ==========================================================================
    // BOOKING & CANCELLATION
    // ==========================================================================

    #[instrument(skip(self))]
    pub async fn book_appointment(&self, request: BookAppointmentRequest) -> Result<Appointment, AppointmentError> {
        match request.kind {
            AppointmentKind::AddOn => {
                return Err(AppointmentError::ValidationError(
                    "add-on appointments are created by add-on approval".to_string(),
                ))
            }
            AppointmentKind::SameDayFollowUp if request.follow_up_doctor_id.is_none() => {
                return Err(AppointmentError::ValidationError(
                    "same-day follow-ups must name the originating doctor".to_string(),
                ))
            }
            _ => {}
        }

        let now = self.ctx.now();
        let band_start = self.ctx.rules.add_on_visit_number_start;
        let scope = Scope::schedule(request.schedule_id).with_patient(request.patient_id);
        let appointment = self
            .ctx
            .store
            .transaction(scope, |t| {
                if t.patient(request.patient_id)?.is_blacklisted {
                    return Err(AppointmentError::PatientBlacklisted);
                }
                let schedule = t.schedule(request.schedule_id)?;
                if schedule.status == ScheduleStatus::Cancelled {
                    return Err(AppointmentError::ScheduleNotBookable("schedule is cancelled".to_string()));
                }
                if schedule.has_ended(now) {
                    return Err(AppointmentError::PastSchedule);
                }
                if t.active_appointment_for(request.patient_id, request.schedule_id).is_some() {
                    return Err(AppointmentError::AlreadyBooked);
                }
                if t.notified_entry_for(request.patient_id, request.schedule_id).is_some() {
                    // A seat is already locked for this patient; it is claimed by paying the offer.
                    return Err(AppointmentError::AlreadyWaiting);
                }

                reserve_seat(t, request.schedule_id)?;

                let visit_number = t.next_visit_number(request.schedule_id, band_start)?;
                let id = place_appointment(
                    t,
                    request.patient_id,
                    request.schedule_id,
                    request.kind,
                    AppointmentStatus::Scheduled,
                    visit_number,
                    now,
                )?;
                let row = t.appointment_mut(id)?;
                row.follow_up_doctor_id = request.follow_up_doctor_id;
                let appointment = row.clone();

                // The patient no longer needs their standing request.
                let waiting: Vec<Uuid> = t
                    .waitlist
                    .values()
                    .filter(|e| {
                        e.patient_id == request.patient_id
                            && e.schedule_id == request.schedule_id
                            && e.status == WaitlistStatus::Waiting
                    })
                    .map(|e| e.id)
                    .collect();
                for entry_id in waiting {
                    let entry = t.waitlist_entry_mut(entry_id)?;
                    entry.status = WaitlistStatus::Expired;
                    entry.updated_at = now;
                }

                Ok(appointment)
            })
            .await
            .inspect_err(|e| warn!("Booking rejected for patient {}: {}", request.patient_id, e))?;

        info!(
            target: "audit",
            appointment_id = %appointment.id,
            schedule_id = %appointment.schedule_id,
            visit_number = appointment.visit_number,
            "appointment booked"
        );
        Ok(appointment)
    }

    /// Cancel and give the seat back, then attempt exactly one backfill.
    #[instrument(skip(self))]
    pub async fn cancel_appointment(&self, appointment_id: Uuid) -> Result<CancellationOutcome, AppointmentError> {
        let now = self.ctx.now();

        let (appointment, seat_released) = self
            .ctx
            .store
            .transaction(Scope::appointment(appointment_id), |t| {
                let current = t.appointment(appointment_id)?;
                match current.status {
                    AppointmentStatus::Cancelled => return Err(AppointmentError::AlreadyCancelled),
                    AppointmentStatus::CheckedIn => return Err(AppointmentError::AlreadyCheckedIn),
                    _ => validate_status_transition(current.status, AppointmentStatus::Cancelled)?,
                }
                if t.schedule(current.schedule_id)?.has_ended(now) {
                    return Err(AppointmentError::PastVisit);
                }

                let released = cancel_in_tables(t, appointment_id, now)?;
                Ok((t.appointment(appointment_id)?.clone(), released))
            })
            .await?;

        info!(
            target: "audit",
            appointment_id = %appointment_id,
            seat_released,
            "appointment cancelled"
        );

        let backfill = BestEffort::from_result(
            self.waitlist.promote_next(appointment.schedule_id).await,
            "waitlist backfill",
        );
        Ok(CancellationOutcome {
            appointment,
            seat_released,
            backfill,
        })
    }

    // ==========================================================================
    // DAY-OF-VISIT TRANSITIONS
    // ==========================================================================

    #[instrument(skip(self))]
    pub async fn mark_no_show(&self, appointment_id: Uuid) -> Result<NoShowOutcome, AppointmentError> {
        let now = self.ctx.now();
        let threshold = self.ctx.rules.no_show_blacklist_threshold;

        let (appointment, newly_blacklisted, no_show_count) = self
            .ctx
            .store
            .transaction(Scope::appointment(appointment_id), |t| {
                let row = t.appointment_mut(appointment_id)?;
                validate_status_transition(row.status, AppointmentStatus::NoShow)?;
                row.status = AppointmentStatus::NoShow;
                row.updated_at = now;
                let appointment = row.clone();

                let patient = t.patient_mut(appointment.patient_id)?;
                patient.no_show_count += 1;
                let newly_blacklisted = !patient.is_blacklisted && patient.no_show_count >= threshold;
                if newly_blacklisted {
                    patient.is_blacklisted = true;
                }
                let no_show_count = patient.no_show_count;

                release_seat(t, appointment.schedule_id)?;
                Ok((appointment, newly_blacklisted, no_show_count))
            })
            .await?;

        info!(
            target: "audit",
            appointment_id = %appointment_id,
            patient_id = %appointment.patient_id,
            no_show_count,
            "appointment marked no-show"
        );
        if newly_blacklisted {
            warn!("Patient {} blacklisted after {} no-shows", appointment.patient_id, no_show_count);
            self.ctx
                .notify(Notice::PatientBlacklisted {
                    patient_id: appointment.patient_id,
                    no_show_count,
                })
                .await;
        }

        let backfill = BestEffort::from_result(
            self.waitlist.promote_next(appointment.schedule_id).await,
            "waitlist backfill",
        );
        Ok(NoShowOutcome {
            appointment,
            patient_blacklisted: newly_blacklisted,
            backfill,
        })
    }

    /// Complete a called visit, then try to call the next patient.
    #[instrument(skip(self))]
    pub async fn mark_completed(&self, appointment_id: Uuid) -> Result<CompletionOutcome, AppointmentError> {
        let now = self.ctx.now();

        let appointment = self
            .ctx
            .store
            .transaction(Scope::appointment(appointment_id), |t| {
                let row = t.appointment_mut(appointment_id)?;
                validate_status_transition(row.status, AppointmentStatus::Completed)?;
                if row.called_at.is_none() {
                    return Err(AppointmentError::NotCalled);
                }
                row.status = AppointmentStatus::Completed;
                row.updated_at = now;
                Ok(row.clone())
            })
            .await?;

        info!(target: "audit", appointment_id = %appointment_id, "visit completed");

        let next_call = BestEffort::from_result(self.call_next(appointment.schedule_id).await, "auto-call next");
        Ok(CompletionOutcome {
            appointment,
            next_call,
        })
    }

    /// Call the first queued patient who has not been called yet.
    #[instrument(skip(self))]
    pub async fn call_next(&self, schedule_id: Uuid) -> Result<Option<Appointment>, AppointmentError> {
        let now = self.ctx.now();

        let called = self
            .ctx
            .store
            .transaction(Scope::schedule(schedule_id), |t| {
                let doctor_id = t.schedule(schedule_id)?.doctor_id;
                let queue = build_call_queue(t.checked_in_for(schedule_id), doctor_id);
                let Some(next_id) = next_to_call(&queue).map(|a| a.id) else {
                    return Ok(None);
                };

                let row = t.appointment_mut(next_id)?;
                row.called_at = Some(now);
                row.updated_at = now;
                Ok(Some(row.clone()))
            })
            .await?;

        match &called {
            Some(appointment) => {
                info!(target: "audit", appointment_id = %appointment.id, "patient called");
                self.notify_called(appointment).await;
            }
            None => debug!("Call queue for schedule {} is empty", schedule_id),
        }
        Ok(called)
    }

    /// Call an already-called patient again; counts as a missed call.
    #[instrument(skip(self))]
    pub async fn recall(&self, appointment_id: Uuid) -> Result<Appointment, AppointmentError> {
        let now = self.ctx.now();

        let appointment = self
            .ctx
            .store
            .transaction(Scope::appointment(appointment_id), |t| {
                let row = t.appointment_mut(appointment_id)?;
                if row.status != AppointmentStatus::CheckedIn {
                    return Err(AppointmentError::WrongStatus(format!(
                        "cannot recall a {} appointment",
                        row.status
                    )));
                }
                if row.called_at.is_none() {
                    return Err(AppointmentError::NotCalled);
                }
                row.missed_call_count += 1;
                row.called_at = Some(now);
                row.updated_at = now;
                Ok(row.clone())
            })
            .await?;

        info!(
            target: "audit",
            appointment_id = %appointment_id,
            missed_call_count = appointment.missed_call_count,
            "patient recalled"
        );
        self.notify_called(&appointment).await;
        Ok(appointment)
    }

    /// Staff action: the patient did not answer. Un-check-in so they can re-scan.
    #[instrument(skip(self))]
    pub async fn mark_missed_call(&self, appointment_id: Uuid) -> Result<Appointment, AppointmentError> {
        let now = self.ctx.now();

        let appointment = self
            .ctx
            .store
            .transaction(Scope::appointment(appointment_id), |t| {
                let row = t.appointment_mut(appointment_id)?;
                if row.status != AppointmentStatus::CheckedIn {
                    return Err(AppointmentError::WrongStatus(format!(
                        "missed call applies to checked-in appointments, not {}",
                        row.status
                    )));
                }
                validate_status_transition(row.status, AppointmentStatus::Scheduled)?;
                row.missed_call_count += 1;
                row.clear_visit_progress();
                row.status = AppointmentStatus::Scheduled;
                row.updated_at = now;
                let appointment = row.clone();

                t.rerank_queue(appointment.schedule_id)?;
                Ok(appointment)
            })
            .await?;

        info!(target: "audit", appointment_id = %appointment_id, "missed call recorded");
        Ok(appointment)
    }

    pub async fn get_call_queue(&self, schedule_id: Uuid) -> Result<Vec<Appointment>, AppointmentError> {
        self.ctx
            .store
            .read(Scope::schedule(schedule_id), |t| {
                let doctor_id = t.schedule(schedule_id)?.doctor_id;
                Ok(build_call_queue(t.checked_in_for(schedule_id), doctor_id))
            })
            .await?
    }

    /// Sweep: booked patients who never checked in become no-shows once the
    /// window plus the grace period has passed.
    pub async fn sweep_no_shows(&self) -> Result<Vec<Uuid>, AppointmentError> {
        let now = self.ctx.now();
        let grace = self.ctx.rules.auto_no_show_grace_minutes;

        let schedules = self
            .ctx
            .store
            .due_schedules(Due::MissedVisits {
                window_ended_before: now - Duration::minutes(grace),
            })
            .await?;

        let mut overdue: Vec<Uuid> = Vec::new();
        for schedule_id in schedules {
            let ids: Vec<Uuid> = self
                .ctx
                .store
                .read(Scope::schedule(schedule_id), |t| {
                    t.appointments
                        .values()
                        .filter(|a| {
                            t.schedules
                                .get(&a.schedule_id)
                                .is_some_and(|s| should_mark_no_show(a.status, s.window_end(), grace, now))
                        })
                        .map(|a| a.id)
                        .collect()
                })
                .await?;
            overdue.extend(ids);
        }

        let mut marked = Vec::with_capacity(overdue.len());
        for appointment_id in overdue {
            match self.mark_no_show(appointment_id).await {
                Ok(_) => marked.push(appointment_id),
                // Someone else moved it first.
                Err(AppointmentError::InvalidStatusTransition { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(marked)
    }

    async fn notify_called(&self, appointment: &Appointment) {
        self.ctx
            .notify(Notice::PatientCalled {
                appointment_id: appointment.id,
                patient_id: appointment.patient_id,
                schedule_id: appointment.schedule_id,
                visit_number: appointment.visit_number,
                queue_number: appointment.real_time_queue_number,
            })
            .await;
    }
}
