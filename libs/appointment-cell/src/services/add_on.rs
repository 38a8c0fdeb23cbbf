// libs/appointment-cell/src/services/add_on.rs
//
// Over-capacity requests. An approved add-on is held as a soft reservation
// (kind add-on + PENDING_PAYMENT) and only touches `booked_seats` once paid.

use std::sync::Arc;

use chrono::Duration;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::context::ClinicContext;
use crate::models::{
    AddOnRequest, AddOnRequestStatus, Appointment, AppointmentError, AppointmentKind,
    AppointmentStatus, BestEffort, Notice, PaymentRequest, PaymentStatus, ScheduleStatus,
    SubmitAddOnRequest,
};
use crate::services::capacity::{commit_add_on_seat, sync_status};
use crate::services::lifecycle::{cancel_in_tables, place_appointment, validate_status_transition};
use crate::services::store::{Due, Scope};
use crate::services::waitlist::WaitlistService;

pub struct AddOnService {
    ctx: ClinicContext,
    waitlist: Arc<WaitlistService>,
}

impl AddOnService {
    pub fn new(ctx: ClinicContext, waitlist: Arc<WaitlistService>) -> Self {
        Self { ctx, waitlist }
    }

    #[instrument(skip(self))]
    pub async fn submit(&self, request: SubmitAddOnRequest) -> Result<AddOnRequest, AppointmentError> {
        let now = self.ctx.now();
        let scope = Scope::schedule(request.schedule_id).with_patient(request.patient_id);

        let stored = self
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
                let duplicate = t.add_on_requests.values().any(|r| {
                    r.patient_id == request.patient_id
                        && r.schedule_id == request.schedule_id
                        && r.status == AddOnRequestStatus::Pending
                });
                if duplicate {
                    return Err(AppointmentError::ValidationError(
                        "an add-on request for this schedule is already pending".to_string(),
                    ));
                }

                let add_on = AddOnRequest {
                    id: Uuid::new_v4(),
                    patient_id: request.patient_id,
                    schedule_id: request.schedule_id,
                    reason: request.reason.clone(),
                    status: AddOnRequestStatus::Pending,
                    decided_by: None,
                    decided_at: None,
                    appointment_id: None,
                    created_at: now,
                };
                t.add_on_requests.insert(add_on.id, add_on.clone());
                Ok(add_on)
            })
            .await?;

        info!(target: "audit", request_id = %stored.id, "add-on request submitted");
        Ok(stored)
    }

    /// Approve a pending request into a payment-pending add-on appointment.
    #[instrument(skip(self))]
    pub async fn approve(&self, request_id: Uuid, approver_id: &str) -> Result<Appointment, AppointmentError> {
        let now = self.ctx.now();
        let deadline = now + Duration::hours(self.ctx.rules.add_on_payment_hours);
        let band_start = self.ctx.rules.add_on_visit_number_start;

        let appointment = self
            .ctx
            .store
            .transaction(Scope::add_on_request(request_id), |t| {
                let request = t.add_on_request(request_id)?.clone();
                if request.status != AddOnRequestStatus::Pending {
                    return Err(AppointmentError::WrongStatus(format!(
                        "add-on request is already {:?}",
                        request.status
                    )));
                }
                let schedule = t.schedule(request.schedule_id)?;
                if schedule.status == ScheduleStatus::Cancelled {
                    return Err(AppointmentError::ScheduleNotBookable("schedule is cancelled".to_string()));
                }
                if schedule.has_ended(now) {
                    return Err(AppointmentError::PastSchedule);
                }

                let visit_number = t.next_add_on_visit_number(request.schedule_id, band_start);
                let appointment_id = place_appointment(
                    t,
                    request.patient_id,
                    request.schedule_id,
                    AppointmentKind::AddOn,
                    AppointmentStatus::PendingPayment,
                    visit_number,
                    now,
                )?;
                let row = t.appointment_mut(appointment_id)?;
                row.payment_deadline = Some(deadline);
                let appointment = row.clone();

                if let Some(stored) = t.add_on_requests.get_mut(&request_id) {
                    stored.status = AddOnRequestStatus::Approved;
                    stored.decided_by = Some(approver_id.to_string());
                    stored.decided_at = Some(now);
                    stored.appointment_id = Some(appointment_id);
                }

                // Soft reservation may close the schedule for new bookings.
                sync_status(t, request.schedule_id)?;
                Ok(appointment)
            })
            .await?;

        info!(
            target: "audit",
            request_id = %request_id,
            appointment_id = %appointment.id,
            approver = approver_id,
            visit_number = appointment.visit_number,
            "add-on approved"
        );
        self.ctx
            .notify(Notice::AddOnApproved {
                appointment_id: appointment.id,
                patient_id: appointment.patient_id,
                schedule_id: appointment.schedule_id,
                pay_by: deadline,
            })
            .await;
        Ok(appointment)
    }

    #[instrument(skip(self))]
    pub async fn reject(&self, request_id: Uuid, approver_id: &str) -> Result<AddOnRequest, AppointmentError> {
        let now = self.ctx.now();

        let rejected = self
            .ctx
            .store
            .transaction(Scope::add_on_request(request_id), |t| {
                let request = t
                    .add_on_requests
                    .get_mut(&request_id)
                    .ok_or(AppointmentError::AddOnRequestNotFound)?;
                if request.status != AddOnRequestStatus::Pending {
                    return Err(AppointmentError::WrongStatus(format!(
                        "add-on request is already {:?}",
                        request.status
                    )));
                }
                request.status = AddOnRequestStatus::Rejected;
                request.decided_by = Some(approver_id.to_string());
                request.decided_at = Some(now);
                Ok(request.clone())
            })
            .await?;

        info!(target: "audit", request_id = %request_id, approver = approver_id, "add-on rejected");
        Ok(rejected)
    }

    /// Pay for an approved add-on before its deadline. This is the only point
    /// at which the add-on is counted in `booked_seats`.
    #[instrument(skip(self, payment))]
    pub async fn pay(&self, appointment_id: Uuid, payment: PaymentRequest) -> Result<Appointment, AppointmentError> {
        if payment.payment_method.trim().is_empty() || payment.transaction_id.trim().is_empty() {
            return Err(AppointmentError::ValidationError(
                "payment method and transaction id are required".to_string(),
            ));
        }
        let now = self.ctx.now();

        let appointment = self
            .ctx
            .store
            .transaction(Scope::appointment(appointment_id), |t| {
                let row = t.appointment(appointment_id)?;
                if row.kind != AppointmentKind::AddOn {
                    return Err(AppointmentError::WrongKind(row.kind));
                }
                if row.status != AppointmentStatus::PendingPayment {
                    return Err(AppointmentError::WrongStatus(format!(
                        "add-on payment requires PENDING_PAYMENT, appointment is {}",
                        row.status
                    )));
                }
                if row.payment_deadline.is_some_and(|deadline| now > deadline) {
                    return Err(AppointmentError::Expired);
                }
                validate_status_transition(row.status, AppointmentStatus::Scheduled)?;
                let schedule_id = row.schedule_id;

                // Flip first so the row stops counting as a soft reservation.
                let row = t.appointment_mut(appointment_id)?;
                row.status = AppointmentStatus::Scheduled;
                row.payment_status = PaymentStatus::Paid;
                row.payment_method = Some(payment.payment_method.clone());
                row.transaction_id = Some(payment.transaction_id.clone());
                row.payment_deadline = None;
                row.updated_at = now;
                let appointment = row.clone();

                commit_add_on_seat(t, schedule_id)?;
                Ok(appointment)
            })
            .await?;

        info!(target: "audit", appointment_id = %appointment_id, "add-on paid");
        Ok(appointment)
    }

    /// Sweep: cancel add-ons whose payment deadline elapsed. No seat was ever
    /// counted for them, so only the soft reservation disappears.
    #[instrument(skip(self))]
    pub async fn expire_unpaid(&self) -> Result<Vec<Uuid>, AppointmentError> {
        let now = self.ctx.now();

        let schedules = self
            .ctx
            .store
            .due_schedules(Due::UnpaidAddOns { deadline_before: now })
            .await?;

        let mut expired: Vec<(Uuid, Uuid)> = Vec::new();
        for schedule_id in schedules {
            let cancelled = self
                .ctx
                .store
                .transaction(Scope::schedule(schedule_id), |t| {
                    let overdue: Vec<Uuid> = t
                        .appointments
                        .values()
                        .filter(|a| a.schedule_id == schedule_id && a.is_soft_reservation())
                        .filter(|a| a.payment_deadline.is_some_and(|deadline| now > deadline))
                        .map(|a| a.id)
                        .collect();

                    for appointment_id in &overdue {
                        cancel_in_tables(t, *appointment_id, now)?;
                    }
                    sync_status(t, schedule_id)?;
                    Ok(overdue)
                })
                .await?;
            expired.extend(cancelled.into_iter().map(|id| (id, schedule_id)));
        }

        let mut ids = Vec::with_capacity(expired.len());
        for (appointment_id, schedule_id) in expired {
            info!(target: "audit", appointment_id = %appointment_id, "unpaid add-on expired");
            let promoted = BestEffort::from_result(self.waitlist.promote_next(schedule_id).await, "waitlist promotion");
            debug!("Promotion after add-on expiry: {:?}", promoted);
            ids.push(appointment_id);
        }
        Ok(ids)
    }

    pub async fn get_request(&self, request_id: Uuid) -> Result<AddOnRequest, AppointmentError> {
        self.ctx
            .store
            .read(Scope::add_on_request(request_id), |t| t.add_on_request(request_id).cloned())
            .await?
    }
}
