#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use uuid::Uuid;

use appointment_cell::models::*;
use appointment_cell::services::{ClinicStore, MemoryTokenStore, RecordingNotifier};
use appointment_cell::{ClinicEngine, Clock, ManualClock};
use shared_config::ClinicRules;

pub const VISIT_DAY: (i32, u32, u32) = (2025, 3, 10);

/// Wall-clock instant on the visit day.
pub fn at(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(VISIT_DAY.0, VISIT_DAY.1, VISIT_DAY.2, hour, minute, 0)
        .unwrap()
}

pub fn day_before() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(VISIT_DAY.0, VISIT_DAY.1, VISIT_DAY.2 - 1, 9, 0, 0)
        .unwrap()
}

pub fn card_payment() -> PaymentRequest {
    PaymentRequest {
        payment_method: "card".to_string(),
        transaction_id: format!("txn-{}", Uuid::new_v4()),
    }
}

pub struct Clinic {
    pub engine: Arc<ClinicEngine>,
    pub clock: Arc<ManualClock>,
    pub notifier: Arc<RecordingNotifier>,
    pub doctor_id: Uuid,
    pub schedule_id: Uuid,
}

impl Clinic {
    /// Morning schedule 08:00-11:30 with the given capacity; clock set to the day before.
    pub async fn with_seats(total_seats: u32) -> Self {
        Self::build(total_seats, NaiveTime::from_hms_opt(8, 0, 0).unwrap(), NaiveTime::from_hms_opt(11, 30, 0).unwrap(), RecordingNotifier::new()).await
    }

    pub async fn with_window(total_seats: u32, start: NaiveTime, end: NaiveTime) -> Self {
        Self::build(total_seats, start, end, RecordingNotifier::new()).await
    }

    pub async fn with_failing_notifier(total_seats: u32) -> Self {
        Self::build(total_seats, NaiveTime::from_hms_opt(8, 0, 0).unwrap(), NaiveTime::from_hms_opt(11, 30, 0).unwrap(), RecordingNotifier::failing()).await
    }

    async fn build(total_seats: u32, start: NaiveTime, end: NaiveTime, notifier: RecordingNotifier) -> Self {
        let clock = Arc::new(ManualClock::new(day_before()));
        let notifier = Arc::new(notifier);
        let tokens = Arc::new(MemoryTokenStore::new(clock.clone()));
        let store = Arc::new(ClinicStore::in_memory());

        let engine = Arc::new(ClinicEngine::new(
            store,
            clock.clone(),
            notifier.clone(),
            tokens,
            ClinicRules::default(),
        ));

        let doctor_id = Uuid::new_v4();
        let schedule = Schedule {
            id: Uuid::new_v4(),
            doctor_id,
            doctor_name: "Dr. Amara Okafor".to_string(),
            department_name: "General Medicine".to_string(),
            location: "Clinic B, Room 4".to_string(),
            visit_date: NaiveDate::from_ymd_opt(VISIT_DAY.0, VISIT_DAY.1, VISIT_DAY.2).unwrap(),
            start_time: start,
            end_time: end,
            total_seats,
            booked_seats: 0,
            status: ScheduleStatus::Available,
        };
        let schedule_id = schedule.id;
        engine.booking.register_schedule(schedule).await.unwrap();

        Self {
            engine,
            clock,
            notifier,
            doctor_id,
            schedule_id,
        }
    }

    pub async fn patient(&self, name: &str) -> Uuid {
        let patient = Patient {
            id: Uuid::new_v4(),
            name: name.to_string(),
            is_blacklisted: false,
            no_show_count: 0,
        };
        self.engine.booking.register_patient(patient).await.unwrap().id
    }

    pub async fn book(&self, patient_id: Uuid) -> Appointment {
        self.engine
            .booking
            .book_appointment(BookAppointmentRequest::regular(patient_id, self.schedule_id))
            .await
            .unwrap()
    }

    pub async fn book_kind(&self, patient_id: Uuid, kind: AppointmentKind, follow_up_doctor_id: Option<Uuid>) -> Appointment {
        self.engine
            .booking
            .book_appointment(BookAppointmentRequest {
                patient_id,
                schedule_id: self.schedule_id,
                kind,
                follow_up_doctor_id,
            })
            .await
            .unwrap()
    }

    pub async fn seats(&self) -> SeatAvailability {
        self.engine.booking.get_availability(self.schedule_id).await.unwrap()
    }

    pub async fn appointment(&self, id: Uuid) -> Appointment {
        self.engine.booking.get_appointment(id).await.unwrap()
    }

    /// Issue a fresh token and scan it at the current clock time.
    pub async fn scan(&self, appointment_id: Uuid) -> Result<CheckInResult, AppointmentError> {
        let issued = self.engine.check_in.issue_token(appointment_id).await?;
        self.engine.check_in.redeem(&issued.token).await
    }

    pub fn clock_now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn notices(&self) -> Vec<Notice> {
        self.notifier.notices()
    }
}
