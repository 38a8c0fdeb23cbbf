// libs/appointment-cell/src/services/waitlist.rs
//
// A notified entry always owns one already-counted seat: promotion increments
// `booked_seats` before any appointment exists, and every path out of
// `notified` (payment, withdrawal, expiry) either converts or releases it.

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::context::ClinicContext;
use crate::models::{
    Appointment, AppointmentError, AppointmentKind, AppointmentStatus, BestEffort,
    JoinWaitlistRequest, Notice, PaymentRequest, PaymentStatus, ScheduleStatus, WaitlistEntry,
    WaitlistStatus,
};
use crate::services::capacity::{available_seats, release_seat, reserve_seat};
use crate::services::lifecycle::place_appointment;
use crate::services::store::{ClinicTables, Due, Scope};

enum OfferPayment {
    Booked(Appointment),
    Lost(WaitlistEntry),
}

pub struct WaitlistService {
    ctx: ClinicContext,
}

impl WaitlistService {
    pub fn new(ctx: ClinicContext) -> Self {
        Self { ctx }
    }

    fn payment_window(&self) -> Duration {
        Duration::minutes(self.ctx.rules.waitlist_payment_minutes)
    }

    #[instrument(skip(self))]
    pub async fn join(&self, request: JoinWaitlistRequest) -> Result<WaitlistEntry, AppointmentError> {
        let now = self.ctx.now();
        let scope = Scope::schedule(request.schedule_id).with_patient(request.patient_id);

        let entry = self
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
                if t.waiting_entry_for(request.patient_id, request.schedule_id).is_some()
                    || t.notified_entry_for(request.patient_id, request.schedule_id).is_some()
                {
                    return Err(AppointmentError::AlreadyWaiting);
                }

                let entry = WaitlistEntry::new(request.patient_id, request.schedule_id, now);
                t.waitlist.insert(entry.id, entry.clone());
                Ok(entry)
            })
            .await?;

        info!(target: "audit", entry_id = %entry.id, schedule_id = %entry.schedule_id, "patient joined waitlist");

        // A seat may already be free (e.g. released between the patient's read and this call).
        let promoted = BestEffort::from_result(self.promote_next(entry.schedule_id).await, "waitlist promotion");
        debug!("Promotion after join: {:?}", promoted);

        let entry_id = entry.id;
        let current = self
            .ctx
            .store
            .read(Scope::waitlist_entry(entry_id), |t| t.waitlist.get(&entry_id).cloned())
            .await?;
        Ok(current.unwrap_or(entry))
    }

    /// Lock the next free seat for the first eligible waiting patient.
    /// Safe to call when nothing is free: it is then a no-op.
    #[instrument(skip(self))]
    pub async fn promote_next(&self, schedule_id: Uuid) -> Result<Option<WaitlistEntry>, AppointmentError> {
        let now = self.ctx.now();

        let promoted = self
            .ctx
            .store
            .transaction(Scope::schedule(schedule_id), |t| promote_in_tables(t, schedule_id, now))
            .await?;

        if let Some(entry) = &promoted {
            info!(
                target: "audit",
                entry_id = %entry.id,
                schedule_id = %schedule_id,
                "waitlist entry notified, seat locked"
            );
            self.ctx
                .notify(Notice::WaitlistSeatOffered {
                    entry_id: entry.id,
                    patient_id: entry.patient_id,
                    schedule_id,
                    pay_by: now + self.payment_window(),
                })
                .await;
        }
        Ok(promoted)
    }

    /// Convert a notified entry into a paid appointment on its locked seat.
    #[instrument(skip(self, payment))]
    pub async fn pay_offer(&self, entry_id: Uuid, payment: PaymentRequest) -> Result<Appointment, AppointmentError> {
        validate_payment(&payment)?;
        let now = self.ctx.now();
        let window = self.payment_window();
        let band_start = self.ctx.rules.add_on_visit_number_start;

        let outcome = self
            .ctx
            .store
            .transaction(Scope::waitlist_entry(entry_id), |t| {
                let entry = t.waitlist_entry(entry_id)?.clone();
                if entry.status != WaitlistStatus::Notified {
                    return Err(AppointmentError::WrongStatus(format!(
                        "waitlist entry is {:?}, not notified",
                        entry.status
                    )));
                }

                let deadline = entry.notification_sent_at.unwrap_or(entry.updated_at) + window;
                let already_holds = t.active_appointment_for(entry.patient_id, entry.schedule_id).is_some();
                if now > deadline || already_holds {
                    let lost = expire_in_tables(t, entry_id, now)?;
                    return Ok(OfferPayment::Lost(lost));
                }

                let visit_number = t.next_visit_number(entry.schedule_id, band_start)?;
                // The seat was counted at promotion; no further increment.
                let appointment_id = place_appointment(
                    t,
                    entry.patient_id,
                    entry.schedule_id,
                    AppointmentKind::Regular,
                    AppointmentStatus::Scheduled,
                    visit_number,
                    now,
                )?;
                let row = t.appointment_mut(appointment_id)?;
                row.payment_status = PaymentStatus::Paid;
                row.payment_method = Some(payment.payment_method.clone());
                row.transaction_id = Some(payment.transaction_id.clone());
                let appointment = row.clone();

                let entry = t.waitlist_entry_mut(entry_id)?;
                entry.status = WaitlistStatus::Booked;
                entry.appointment_id = Some(appointment_id);
                entry.updated_at = now;

                Ok(OfferPayment::Booked(appointment))
            })
            .await?;

        match outcome {
            OfferPayment::Booked(appointment) => {
                info!(
                    target: "audit",
                    entry_id = %entry_id,
                    appointment_id = %appointment.id,
                    "waitlist offer paid"
                );
                Ok(appointment)
            }
            OfferPayment::Lost(entry) => {
                warn!("Waitlist entry {} paid after its seat was released", entry_id);
                self.after_release(&entry).await;
                Err(AppointmentError::SeatLost)
            }
        }
    }

    /// Patient withdraws. A notified entry gives its locked seat back.
    #[instrument(skip(self))]
    pub async fn withdraw(&self, entry_id: Uuid) -> Result<WaitlistEntry, AppointmentError> {
        let now = self.ctx.now();

        let (entry, released) = self
            .ctx
            .store
            .transaction(Scope::waitlist_entry(entry_id), |t| {
                let status = t.waitlist_entry(entry_id)?.status;
                match status {
                    WaitlistStatus::Waiting => {
                        let entry = t.waitlist_entry_mut(entry_id)?;
                        entry.status = WaitlistStatus::Expired;
                        entry.updated_at = now;
                        Ok((entry.clone(), false))
                    }
                    WaitlistStatus::Notified => Ok((expire_in_tables(t, entry_id, now)?, true)),
                    other => Err(AppointmentError::WrongStatus(format!(
                        "waitlist entry is already {:?}",
                        other
                    ))),
                }
            })
            .await?;

        info!(target: "audit", entry_id = %entry_id, released, "waitlist entry withdrawn");
        if released {
            let promoted = BestEffort::from_result(self.promote_next(entry.schedule_id).await, "waitlist promotion");
            debug!("Promotion after withdrawal: {:?}", promoted);
        }
        Ok(entry)
    }

    /// Sweep: expire notified entries past their payment window, release
    /// their seats and promote one successor per released seat.
    /// Returns (expired entry ids, promoted entry ids).
    #[instrument(skip(self))]
    pub async fn expire_stale_offers(&self) -> Result<(Vec<Uuid>, Vec<Uuid>), AppointmentError> {
        let now = self.ctx.now();
        let window = self.payment_window();

        let schedules = self
            .ctx
            .store
            .due_schedules(Due::StaleOffers {
                notified_before: now - window,
            })
            .await?;

        let mut expired = Vec::new();
        for schedule_id in schedules {
            let released = self
                .ctx
                .store
                .transaction(Scope::schedule(schedule_id), |t| {
                    let mut stale: Vec<(DateTime<Utc>, Uuid)> = t
                        .waitlist
                        .values()
                        .filter(|e| e.schedule_id == schedule_id && e.status == WaitlistStatus::Notified)
                        .filter_map(|e| e.notification_sent_at.map(|sent| (sent, e.id)))
                        .filter(|(sent, _)| now > *sent + window)
                        .collect();
                    stale.sort();

                    stale
                        .into_iter()
                        .map(|(_, id)| expire_in_tables(t, id, now))
                        .collect::<Result<Vec<_>, _>>()
                })
                .await?;
            expired.extend(released);
        }

        let mut promoted = Vec::new();
        for entry in &expired {
            info!(target: "audit", entry_id = %entry.id, "waitlist offer expired unpaid");
            self.ctx
                .notify(Notice::WaitlistOfferExpired {
                    entry_id: entry.id,
                    patient_id: entry.patient_id,
                    schedule_id: entry.schedule_id,
                })
                .await;
            match self.promote_next(entry.schedule_id).await {
                Ok(Some(next)) => promoted.push(next.id),
                Ok(None) => {}
                Err(e) => warn!("Promotion after expiry failed for schedule {}: {}", entry.schedule_id, e),
            }
        }

        Ok((expired.into_iter().map(|e| e.id).collect(), promoted))
    }

    pub async fn get_entry(&self, entry_id: Uuid) -> Result<WaitlistEntry, AppointmentError> {
        self.ctx
            .store
            .read(Scope::waitlist_entry(entry_id), |t| t.waitlist_entry(entry_id).cloned())
            .await?
    }

    async fn after_release(&self, entry: &WaitlistEntry) {
        self.ctx
            .notify(Notice::WaitlistOfferExpired {
                entry_id: entry.id,
                patient_id: entry.patient_id,
                schedule_id: entry.schedule_id,
            })
            .await;
        let promoted = BestEffort::from_result(self.promote_next(entry.schedule_id).await, "waitlist promotion");
        debug!("Promotion after lost offer: {:?}", promoted);
    }
}

fn validate_payment(payment: &PaymentRequest) -> Result<(), AppointmentError> {
    if payment.payment_method.trim().is_empty() || payment.transaction_id.trim().is_empty() {
        return Err(AppointmentError::ValidationError(
            "payment method and transaction id are required".to_string(),
        ));
    }
    Ok(())
}

pub(crate) fn promote_in_tables(
    t: &mut ClinicTables,
    schedule_id: Uuid,
    now: DateTime<Utc>,
) -> Result<Option<WaitlistEntry>, AppointmentError> {
    let schedule = t.schedule(schedule_id)?;
    if schedule.status == ScheduleStatus::Cancelled || schedule.has_ended(now) {
        return Ok(None);
    }
    if available_seats(t, schedule) == 0 {
        debug!("No free seat on schedule {}; nothing to promote", schedule_id);
        return Ok(None);
    }

    let mut waiting: Vec<(DateTime<Utc>, Uuid)> = t
        .waitlist
        .values()
        .filter(|e| e.schedule_id == schedule_id && e.status == WaitlistStatus::Waiting)
        .map(|e| (e.created_at, e.id))
        .collect();
    waiting.sort();

    for (_, entry_id) in waiting {
        let patient_id = t.waitlist_entry(entry_id)?.patient_id;
        let ineligible = t.patients.get(&patient_id).map_or(true, |p| p.is_blacklisted)
            || t.active_appointment_for(patient_id, schedule_id).is_some();

        if ineligible {
            let entry = t.waitlist_entry_mut(entry_id)?;
            entry.status = WaitlistStatus::Expired;
            entry.updated_at = now;
            debug!("Skipped ineligible waitlist entry {}", entry_id);
            continue;
        }

        // Re-checked inside the same unit of work as the increment.
        reserve_seat(t, schedule_id)?;

        let entry = t.waitlist_entry_mut(entry_id)?;
        entry.status = WaitlistStatus::Notified;
        entry.notification_sent_at = Some(now);
        entry.updated_at = now;
        return Ok(Some(entry.clone()));
    }

    Ok(None)
}

/// notified -> expired, releasing the locked seat.
fn expire_in_tables(
    t: &mut ClinicTables,
    entry_id: Uuid,
    now: DateTime<Utc>,
) -> Result<WaitlistEntry, AppointmentError> {
    let entry = t.waitlist_entry_mut(entry_id)?;
    entry.status = WaitlistStatus::Expired;
    entry.updated_at = now;
    let entry = entry.clone();
    release_seat(t, entry.schedule_id)?;
    Ok(entry)
}
