#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use uuid::Uuid;

use appointment_cell::{
    ClinicEngine, ClinicStore, ManualClock, MemoryTokenStore, Notice, Notifier, Patient,
    Schedule, ScheduleStatus,
};
use shared_config::ClinicRules;

pub fn visit_day_at(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 10, hour, minute, 0).unwrap()
}

pub fn called(schedule_id: Uuid) -> Notice {
    Notice::PatientCalled {
        appointment_id: Uuid::new_v4(),
        patient_id: Uuid::new_v4(),
        schedule_id,
        visit_number: 4,
        queue_number: Some(2),
    }
}

pub struct Harness {
    pub engine: Arc<ClinicEngine>,
    pub clock: Arc<ManualClock>,
    pub schedule_id: Uuid,
}

impl Harness {
    /// One 08:00-11:30 schedule on 2025-03-10, clock at 09:00 the day before.
    pub async fn new(total_seats: u32, notifier: Arc<dyn Notifier>) -> Self {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2025, 3, 9, 9, 0, 0).unwrap()));
        let tokens = Arc::new(MemoryTokenStore::new(clock.clone()));
        let store = Arc::new(ClinicStore::in_memory());
        let engine = Arc::new(ClinicEngine::new(store, clock.clone(), notifier, tokens, ClinicRules::default()));

        let schedule = Schedule {
            id: Uuid::new_v4(),
            doctor_id: Uuid::new_v4(),
            doctor_name: "Dr. Lena Park".to_string(),
            department_name: "Pediatrics".to_string(),
            location: "Wing C".to_string(),
            visit_date: NaiveDate::from_ymd_opt(2025, 3, 10).unwrap(),
            start_time: NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
            end_time: NaiveTime::from_hms_opt(11, 30, 0).unwrap(),
            total_seats,
            booked_seats: 0,
            status: ScheduleStatus::Available,
        };
        let schedule_id = schedule.id;
        engine.booking.register_schedule(schedule).await.unwrap();

        Self { engine, clock, schedule_id }
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
}
