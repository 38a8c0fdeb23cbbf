// libs/appointment-cell/src/services/store.rs
//
// Units of work are scoped to one schedule: the schedule row is locked, every
// row hanging off it is loaded, the domain closure runs against that working
// set and only the rows it changed are written back before the lock is
// released. Patients touched by the unit are locked alongside.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use crate::models::{
    AddOnRequest, Appointment, AppointmentError, AppointmentKind, AppointmentStatus, Patient,
    Schedule, WaitlistEntry, WaitlistStatus,
};
use crate::services::call_queue::assign_queue_numbers;
use crate::services::memory_store::MemoryBackend;

/// The row a unit of work is opened from. Anything but a schedule or a
/// patient is resolved to its schedule first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anchor {
    Schedule(Uuid),
    Appointment(Uuid),
    WaitlistEntry(Uuid),
    AddOnRequest(Uuid),
    Patient(Uuid),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scope {
    anchor: Anchor,
    patients: Vec<Uuid>,
}

impl Scope {
    pub fn schedule(id: Uuid) -> Self {
        Self::from_anchor(Anchor::Schedule(id))
    }

    pub fn appointment(id: Uuid) -> Self {
        Self::from_anchor(Anchor::Appointment(id))
    }

    pub fn waitlist_entry(id: Uuid) -> Self {
        Self::from_anchor(Anchor::WaitlistEntry(id))
    }

    pub fn add_on_request(id: Uuid) -> Self {
        Self::from_anchor(Anchor::AddOnRequest(id))
    }

    pub fn patient(id: Uuid) -> Self {
        Self::from_anchor(Anchor::Patient(id)).with_patient(id)
    }

    /// Also load (and lock) a patient that no row in scope references yet.
    pub fn with_patient(mut self, patient_id: Uuid) -> Self {
        if !self.patients.contains(&patient_id) {
            self.patients.push(patient_id);
        }
        self
    }

    pub fn anchor(&self) -> Anchor {
        self.anchor
    }

    pub fn extra_patients(&self) -> &[Uuid] {
        &self.patients
    }

    fn from_anchor(anchor: Anchor) -> Self {
        Self {
            anchor,
            patients: Vec::new(),
        }
    }
}

/// Work the sweep may have to do, used to find the schedules worth opening.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Due {
    /// Notified waitlist entries whose offer went out before this instant.
    StaleOffers { notified_before: DateTime<Utc> },
    /// Unpaid add-ons whose payment deadline is before this instant.
    UnpaidAddOns { deadline_before: DateTime<Utc> },
    /// Scheduled appointments on schedules whose window ended before this instant.
    MissedVisits { window_ended_before: DateTime<Utc> },
}

/// Rows a unit of work inserted or modified.
#[derive(Debug, Default)]
pub struct ChangeSet {
    pub schedules: Vec<Schedule>,
    pub patients: Vec<Patient>,
    pub appointments: Vec<Appointment>,
    pub waitlist: Vec<WaitlistEntry>,
    pub add_on_requests: Vec<AddOnRequest>,
}

impl ChangeSet {
    pub fn between(before: &ClinicTables, after: &ClinicTables) -> Self {
        Self {
            schedules: changed_rows(&before.schedules, &after.schedules),
            patients: changed_rows(&before.patients, &after.patients),
            appointments: changed_rows(&before.appointments, &after.appointments),
            waitlist: changed_rows(&before.waitlist, &after.waitlist),
            add_on_requests: changed_rows(&before.add_on_requests, &after.add_on_requests),
        }
    }

    pub fn len(&self) -> usize {
        self.schedules.len()
            + self.patients.len()
            + self.appointments.len()
            + self.waitlist.len()
            + self.add_on_requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn changed_rows<T: Clone + PartialEq>(before: &HashMap<Uuid, T>, after: &HashMap<Uuid, T>) -> Vec<T> {
    after
        .iter()
        .filter(|(id, row)| before.get(id) != Some(*row))
        .map(|(_, row)| row.clone())
        .collect()
}

/// An open unit of work holding its scope's locks until commit or rollback.
#[async_trait]
pub trait UnitOfWork: Send {
    fn tables(&self) -> &ClinicTables;

    async fn commit(self: Box<Self>, changes: ChangeSet) -> Result<(), AppointmentError>;

    async fn rollback(self: Box<Self>);
}

/// Durable storage behind the engine.
#[async_trait]
pub trait ClinicBackend: Send + Sync {
    /// Lock the scope's schedule and patients and load every row in scope.
    async fn begin(&self, scope: &Scope) -> Result<Box<dyn UnitOfWork>, AppointmentError>;

    /// Committed rows in scope, without taking locks.
    async fn load(&self, scope: &Scope) -> Result<ClinicTables, AppointmentError>;

    async fn due_schedules(&self, due: Due) -> Result<Vec<Uuid>, AppointmentError>;
}

pub struct ClinicStore {
    backend: Arc<dyn ClinicBackend>,
}

impl ClinicStore {
    pub fn new(backend: Arc<dyn ClinicBackend>) -> Self {
        Self { backend }
    }

    /// Process-local store for tests and tooling.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::default()))
    }

    /// Run `work` as one atomic unit over `scope`. The changed rows are
    /// written only when the closure returns Ok.
    pub async fn transaction<T, F>(&self, scope: Scope, work: F) -> Result<T, AppointmentError>
    where
        F: FnOnce(&mut ClinicTables) -> Result<T, AppointmentError>,
    {
        let unit = self.backend.begin(&scope).await?;
        let mut draft = unit.tables().clone();

        match work(&mut draft) {
            Ok(value) => {
                let changes = ChangeSet::between(unit.tables(), &draft);
                debug!("Committing {} changed rows for {:?}", changes.len(), scope.anchor());
                unit.commit(changes).await?;
                Ok(value)
            }
            Err(e) => {
                unit.rollback().await;
                debug!("Transaction rolled back: {}", e);
                Err(e)
            }
        }
    }

    /// Read-only access to the committed rows in `scope`.
    pub async fn read<T, F>(&self, scope: Scope, query: F) -> Result<T, AppointmentError>
    where
        F: FnOnce(&ClinicTables) -> T,
    {
        let tables = self.backend.load(&scope).await?;
        Ok(query(&tables))
    }

    pub async fn due_schedules(&self, due: Due) -> Result<Vec<Uuid>, AppointmentError> {
        self.backend.due_schedules(due).await
    }
}

/// Every row the engine reads or writes inside one unit of work.
#[derive(Debug, Clone, Default)]
pub struct ClinicTables {
    pub schedules: HashMap<Uuid, Schedule>,
    pub patients: HashMap<Uuid, Patient>,
    pub appointments: HashMap<Uuid, Appointment>,
    pub waitlist: HashMap<Uuid, WaitlistEntry>,
    pub add_on_requests: HashMap<Uuid, AddOnRequest>,
}

impl ClinicTables {
    pub fn schedule(&self, id: Uuid) -> Result<&Schedule, AppointmentError> {
        self.schedules.get(&id).ok_or(AppointmentError::ScheduleNotFound)
    }

    pub fn schedule_mut(&mut self, id: Uuid) -> Result<&mut Schedule, AppointmentError> {
        self.schedules.get_mut(&id).ok_or(AppointmentError::ScheduleNotFound)
    }

    pub fn patient(&self, id: Uuid) -> Result<&Patient, AppointmentError> {
        self.patients.get(&id).ok_or(AppointmentError::PatientNotFound)
    }

    pub fn patient_mut(&mut self, id: Uuid) -> Result<&mut Patient, AppointmentError> {
        self.patients.get_mut(&id).ok_or(AppointmentError::PatientNotFound)
    }

    pub fn appointment(&self, id: Uuid) -> Result<&Appointment, AppointmentError> {
        self.appointments.get(&id).ok_or(AppointmentError::NotFound)
    }

    pub fn appointment_mut(&mut self, id: Uuid) -> Result<&mut Appointment, AppointmentError> {
        self.appointments.get_mut(&id).ok_or(AppointmentError::NotFound)
    }

    pub fn waitlist_entry(&self, id: Uuid) -> Result<&WaitlistEntry, AppointmentError> {
        self.waitlist.get(&id).ok_or(AppointmentError::WaitlistEntryNotFound)
    }

    pub fn waitlist_entry_mut(&mut self, id: Uuid) -> Result<&mut WaitlistEntry, AppointmentError> {
        self.waitlist.get_mut(&id).ok_or(AppointmentError::WaitlistEntryNotFound)
    }

    pub fn add_on_request(&self, id: Uuid) -> Result<&AddOnRequest, AppointmentError> {
        self.add_on_requests.get(&id).ok_or(AppointmentError::AddOnRequestNotFound)
    }

    /// The patient's one non-cancelled appointment on this schedule, if any.
    pub fn active_appointment_for(&self, patient_id: Uuid, schedule_id: Uuid) -> Option<&Appointment> {
        self.appointments.values().find(|a| {
            a.patient_id == patient_id
                && a.schedule_id == schedule_id
                && a.status != AppointmentStatus::Cancelled
        })
    }

    /// Most recently touched cancelled record for the pair; revived on re-booking.
    pub fn cancelled_appointment_for(&self, patient_id: Uuid, schedule_id: Uuid) -> Option<Uuid> {
        self.appointments
            .values()
            .filter(|a| {
                a.patient_id == patient_id
                    && a.schedule_id == schedule_id
                    && a.status == AppointmentStatus::Cancelled
            })
            .max_by_key(|a| a.updated_at)
            .map(|a| a.id)
    }

    pub fn waiting_entry_for(&self, patient_id: Uuid, schedule_id: Uuid) -> Option<&WaitlistEntry> {
        self.waitlist.values().find(|e| {
            e.patient_id == patient_id
                && e.schedule_id == schedule_id
                && e.status == WaitlistStatus::Waiting
        })
    }

    pub fn notified_entry_for(&self, patient_id: Uuid, schedule_id: Uuid) -> Option<&WaitlistEntry> {
        self.waitlist.values().find(|e| {
            e.patient_id == patient_id
                && e.schedule_id == schedule_id
                && e.status == WaitlistStatus::Notified
        })
    }

    /// Regular numbering never reuses a number, including cancelled ones, and
    /// stays below the add-on band.
    pub fn next_visit_number(&self, schedule_id: Uuid, add_on_band_start: u32) -> Result<u32, AppointmentError> {
        let next = self
            .appointments
            .values()
            .filter(|a| a.schedule_id == schedule_id && a.kind != AppointmentKind::AddOn)
            .map(|a| a.visit_number)
            .max()
            .unwrap_or(0)
            + 1;

        if next >= add_on_band_start {
            return Err(AppointmentError::ScheduleNotBookable(format!(
                "regular visit numbers are exhausted below {}",
                add_on_band_start
            )));
        }
        Ok(next)
    }

    pub fn next_add_on_visit_number(&self, schedule_id: Uuid, band_start: u32) -> u32 {
        self.appointments
            .values()
            .filter(|a| a.schedule_id == schedule_id && a.kind == AppointmentKind::AddOn)
            .map(|a| a.visit_number + 1)
            .max()
            .unwrap_or(band_start)
            .max(band_start)
    }

    pub fn checked_in_for(&self, schedule_id: Uuid) -> Vec<Appointment> {
        self.appointments
            .values()
            .filter(|a| a.schedule_id == schedule_id && a.status == AppointmentStatus::CheckedIn)
            .cloned()
            .collect()
    }

    pub fn max_queue_number(&self, schedule_id: Uuid) -> u32 {
        self.appointments
            .values()
            .filter(|a| a.schedule_id == schedule_id && a.status == AppointmentStatus::CheckedIn)
            .filter_map(|a| a.real_time_queue_number)
            .max()
            .unwrap_or(0)
    }

    /// Recompute placement ranks for everyone checked in on the schedule.
    pub fn rerank_queue(&mut self, schedule_id: Uuid) -> Result<(), AppointmentError> {
        let window_start = self.schedule(schedule_id)?.window_start();
        let mut checked_in = self.checked_in_for(schedule_id);
        assign_queue_numbers(&mut checked_in, window_start);

        for ranked in checked_in {
            if let Some(row) = self.appointments.get_mut(&ranked.id) {
                row.real_time_queue_number = ranked.real_time_queue_number;
            }
        }
        Ok(())
    }

    /// Schedule the anchor row belongs to, when it exists.
    pub fn resolve(&self, anchor: Anchor) -> Option<Uuid> {
        match anchor {
            Anchor::Schedule(id) => Some(id),
            Anchor::Appointment(id) => self.appointments.get(&id).map(|a| a.schedule_id),
            Anchor::WaitlistEntry(id) => self.waitlist.get(&id).map(|e| e.schedule_id),
            Anchor::AddOnRequest(id) => self.add_on_requests.get(&id).map(|r| r.schedule_id),
            Anchor::Patient(_) => None,
        }
    }

    /// Patients referenced by any loaded row, sorted so locks are always
    /// taken in the same order.
    pub fn referenced_patients(&self, extra: &[Uuid]) -> Vec<Uuid> {
        let mut ids: Vec<Uuid> = self
            .appointments
            .values()
            .map(|a| a.patient_id)
            .chain(self.waitlist.values().map(|e| e.patient_id))
            .chain(self.add_on_requests.values().map(|r| r.patient_id))
            .chain(extra.iter().copied())
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }

    /// Copy of the rows a unit of work on `scope` may touch.
    pub fn scoped(&self, scope: &Scope) -> ClinicTables {
        let mut tables = ClinicTables::default();

        if let Some(schedule_id) = self.resolve(scope.anchor()) {
            if let Some(schedule) = self.schedules.get(&schedule_id) {
                tables.schedules.insert(schedule_id, schedule.clone());
            }
            tables.appointments = rows_on(&self.appointments, |a| a.schedule_id == schedule_id);
            tables.waitlist = rows_on(&self.waitlist, |e| e.schedule_id == schedule_id);
            tables.add_on_requests = rows_on(&self.add_on_requests, |r| r.schedule_id == schedule_id);
        }

        for patient_id in tables.referenced_patients(scope.extra_patients()) {
            if let Some(patient) = self.patients.get(&patient_id) {
                tables.patients.insert(patient_id, patient.clone());
            }
        }
        tables
    }

    pub fn apply(&mut self, changes: ChangeSet) {
        self.schedules.extend(changes.schedules.into_iter().map(|r| (r.id, r)));
        self.patients.extend(changes.patients.into_iter().map(|r| (r.id, r)));
        self.appointments.extend(changes.appointments.into_iter().map(|r| (r.id, r)));
        self.waitlist.extend(changes.waitlist.into_iter().map(|r| (r.id, r)));
        self.add_on_requests.extend(changes.add_on_requests.into_iter().map(|r| (r.id, r)));
    }

    pub fn due_schedules(&self, due: Due) -> Vec<Uuid> {
        let mut ids: Vec<Uuid> = match due {
            Due::StaleOffers { notified_before } => self
                .waitlist
                .values()
                .filter(|e| e.status == WaitlistStatus::Notified)
                .filter(|e| e.notification_sent_at.is_some_and(|sent| sent < notified_before))
                .map(|e| e.schedule_id)
                .collect(),
            Due::UnpaidAddOns { deadline_before } => self
                .appointments
                .values()
                .filter(|a| a.is_soft_reservation())
                .filter(|a| a.payment_deadline.is_some_and(|deadline| deadline < deadline_before))
                .map(|a| a.schedule_id)
                .collect(),
            Due::MissedVisits { window_ended_before } => self
                .appointments
                .values()
                .filter(|a| a.status == AppointmentStatus::Scheduled)
                .filter(|a| {
                    self.schedules
                        .get(&a.schedule_id)
                        .is_some_and(|s| s.window_end() < window_ended_before)
                })
                .map(|a| a.schedule_id)
                .collect(),
        };
        ids.sort();
        ids.dedup();
        ids
    }
}

fn rows_on<T: Clone>(rows: &HashMap<Uuid, T>, keep: impl Fn(&T) -> bool) -> HashMap<Uuid, T> {
    rows.iter()
        .filter(|(_, row)| keep(row))
        .map(|(id, row)| (*id, row.clone()))
        .collect()
}
