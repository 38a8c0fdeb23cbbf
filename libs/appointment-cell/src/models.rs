// libs/appointment-cell/src/models.rs
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ==============================================================================
// SCHEDULE & PATIENT (owned by the scheduling / patient subsystems)
// ==============================================================================

/// One doctor's fixed-capacity slot for a date, time window and location.
///
/// `booked_seats` counts confirmed bookings *and* seats hard-locked for notified
/// waitlist entries: a `notified` entry always implies one already-counted seat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    pub id: Uuid,
    pub doctor_id: Uuid,
    pub doctor_name: String,
    pub department_name: String,
    pub location: String,
    pub visit_date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub total_seats: u32,
    pub booked_seats: u32,
    pub status: ScheduleStatus,
}

impl Schedule {
    pub fn window_start(&self) -> DateTime<Utc> {
        self.visit_date.and_time(self.start_time).and_utc()
    }

    pub fn window_end(&self) -> DateTime<Utc> {
        self.visit_date.and_time(self.end_time).and_utc()
    }

    pub fn has_ended(&self, now: DateTime<Utc>) -> bool {
        now > self.window_end()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleStatus {
    Available,
    Full,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Patient {
    pub id: Uuid,
    pub name: String,
    pub is_blacklisted: bool,
    pub no_show_count: u32,
}

// ==============================================================================
// APPOINTMENT
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AppointmentStatus {
    #[serde(rename = "PENDING_PAYMENT")]
    PendingPayment,
    #[serde(rename = "scheduled")]
    Scheduled,
    #[serde(rename = "CHECKED_IN")]
    CheckedIn,
    #[serde(rename = "completed")]
    Completed,
    #[serde(rename = "cancelled")]
    Cancelled,
    #[serde(rename = "NO_SHOW")]
    NoShow,
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppointmentStatus::PendingPayment => write!(f, "PENDING_PAYMENT"),
            AppointmentStatus::Scheduled => write!(f, "scheduled"),
            AppointmentStatus::CheckedIn => write!(f, "CHECKED_IN"),
            AppointmentStatus::Completed => write!(f, "completed"),
            AppointmentStatus::Cancelled => write!(f, "cancelled"),
            AppointmentStatus::NoShow => write!(f, "NO_SHOW"),
        }
    }
}

impl AppointmentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AppointmentStatus::Completed | AppointmentStatus::Cancelled | AppointmentStatus::NoShow
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Unpaid,
    Paid,
    Refunded,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentKind {
    #[default]
    Regular,
    WalkIn,
    AddOn,
    SameDayFollowUp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub schedule_id: Uuid,
    pub status: AppointmentStatus,
    pub payment_status: PaymentStatus,
    pub kind: AppointmentKind,
    /// Assigned at booking; stable identity for the day. Revived bookings get a fresh one.
    pub visit_number: u32,
    /// Placement rank, recomputed on every check-in event for the schedule.
    pub real_time_queue_number: Option<u32>,
    pub check_in_time: Option<DateTime<Utc>>,
    pub called_at: Option<DateTime<Utc>>,
    pub recheck_in_time: Option<DateTime<Utc>>,
    pub missed_call_count: u32,
    pub is_on_time: bool,
    pub is_late: bool,
    pub is_walk_in: bool,
    pub is_add_on: bool,
    /// Doctor seen earlier the same day, for same-day follow-ups.
    pub follow_up_doctor_id: Option<Uuid>,
    pub payment_deadline: Option<DateTime<Utc>>,
    pub payment_method: Option<String>,
    pub transaction_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Appointment {
    pub fn new(
        patient_id: Uuid,
        schedule_id: Uuid,
        kind: AppointmentKind,
        status: AppointmentStatus,
        visit_number: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            patient_id,
            schedule_id,
            status,
            payment_status: PaymentStatus::Unpaid,
            kind,
            visit_number,
            real_time_queue_number: None,
            check_in_time: None,
            called_at: None,
            recheck_in_time: None,
            missed_call_count: 0,
            is_on_time: false,
            is_late: false,
            is_walk_in: kind == AppointmentKind::WalkIn,
            is_add_on: kind == AppointmentKind::AddOn,
            follow_up_doctor_id: None,
            payment_deadline: None,
            payment_method: None,
            transaction_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether this appointment is currently counted in the schedule's `booked_seats`.
    /// Unpaid add-ons are held through the ledger's soft-reservation term instead.
    pub fn holds_counted_seat(&self) -> bool {
        match self.status {
            AppointmentStatus::Scheduled | AppointmentStatus::CheckedIn => true,
            AppointmentStatus::PendingPayment => self.kind != AppointmentKind::AddOn,
            _ => false,
        }
    }

    pub fn is_soft_reservation(&self) -> bool {
        self.kind == AppointmentKind::AddOn && self.status == AppointmentStatus::PendingPayment
    }

    pub fn is_requeued(&self) -> bool {
        self.recheck_in_time.is_some() && self.missed_call_count > 0
    }

    /// Clear every day-of-visit field, returning the booking to a pre-check-in state.
    pub fn clear_visit_progress(&mut self) {
        self.real_time_queue_number = None;
        self.check_in_time = None;
        self.called_at = None;
        self.recheck_in_time = None;
        self.is_on_time = false;
        self.is_late = false;
    }
}

// ==============================================================================
// WAITLIST & ADD-ON REQUESTS
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WaitlistStatus {
    Waiting,
    Notified,
    Booked,
    Expired,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaitlistEntry {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub schedule_id: Uuid,
    pub status: WaitlistStatus,
    /// FIFO key for promotion.
    pub created_at: DateTime<Utc>,
    /// Starts the payment-deadline clock once a seat is locked for this entry.
    pub notification_sent_at: Option<DateTime<Utc>>,
    pub appointment_id: Option<Uuid>,
    pub updated_at: DateTime<Utc>,
}

impl WaitlistEntry {
    pub fn new(patient_id: Uuid, schedule_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            patient_id,
            schedule_id,
            status: WaitlistStatus::Waiting,
            created_at: now,
            notification_sent_at: None,
            appointment_id: None,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AddOnRequestStatus {
    Pending,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddOnRequest {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub schedule_id: Uuid,
    pub reason: Option<String>,
    pub status: AddOnRequestStatus,
    pub decided_by: Option<String>,
    pub decided_at: Option<DateTime<Utc>>,
    pub appointment_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

// ==============================================================================
// REQUEST/RESPONSE MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookAppointmentRequest {
    pub patient_id: Uuid,
    pub schedule_id: Uuid,
    #[serde(default)]
    pub kind: AppointmentKind,
    pub follow_up_doctor_id: Option<Uuid>,
}

impl BookAppointmentRequest {
    pub fn regular(patient_id: Uuid, schedule_id: Uuid) -> Self {
        Self {
            patient_id,
            schedule_id,
            kind: AppointmentKind::Regular,
            follow_up_doctor_id: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRequest {
    pub payment_method: String,
    pub transaction_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinWaitlistRequest {
    pub patient_id: Uuid,
    pub schedule_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitAddOnRequest {
    pub patient_id: Uuid,
    pub schedule_id: Uuid,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedeemCheckInRequest {
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssuedCheckInToken {
    pub token: String,
    pub expires_in_seconds: i64,
    pub refresh_interval_seconds: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckInResult {
    pub appointment_id: Uuid,
    pub patient_name: String,
    pub doctor_name: String,
    pub department_name: String,
    pub visit_number: u32,
    pub check_in_time: DateTime<Utc>,
    pub real_time_queue_number: Option<u32>,
    pub is_late: bool,
    /// True when this scan re-queued a patient who missed their call.
    pub requeued: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SeatAvailability {
    pub schedule_id: Uuid,
    pub total_seats: u32,
    pub booked_seats: u32,
    pub pending_soft_reservations: u32,
    pub available_seats: u32,
}

// ==============================================================================
// BEST-EFFORT SIDE EFFECTS
// ==============================================================================

/// Result of a post-commit step (backfill, auto-call, notification). The primary
/// transition is already durable when this is produced; callers may ignore it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "value", rename_all = "snake_case")]
pub enum BestEffort<T> {
    Applied(T),
    Failed(String),
}

impl<T> BestEffort<T> {
    pub fn from_result<E: fmt::Display>(result: Result<T, E>, step: &str) -> Self {
        match result {
            Ok(value) => BestEffort::Applied(value),
            Err(e) => {
                tracing::warn!("Best-effort step '{}' failed: {}", step, e);
                BestEffort::Failed(e.to_string())
            }
        }
    }

    pub fn applied(&self) -> Option<&T> {
        match self {
            BestEffort::Applied(value) => Some(value),
            BestEffort::Failed(_) => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancellationOutcome {
    pub appointment: Appointment,
    pub seat_released: bool,
    pub backfill: BestEffort<Option<WaitlistEntry>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoShowOutcome {
    pub appointment: Appointment,
    pub patient_blacklisted: bool,
    pub backfill: BestEffort<Option<WaitlistEntry>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionOutcome {
    pub appointment: Appointment,
    pub next_call: BestEffort<Option<Appointment>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SweepReport {
    pub expired_offers: Vec<Uuid>,
    pub promoted_entries: Vec<Uuid>,
    pub expired_add_ons: Vec<Uuid>,
    pub auto_no_shows: Vec<Uuid>,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.expired_offers.is_empty()
            && self.promoted_entries.is_empty()
            && self.expired_add_ons.is_empty()
            && self.auto_no_shows.is_empty()
    }
}

// ==============================================================================
// NOTIFICATIONS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notice {
    WaitlistSeatOffered {
        entry_id: Uuid,
        patient_id: Uuid,
        schedule_id: Uuid,
        pay_by: DateTime<Utc>,
    },
    WaitlistOfferExpired {
        entry_id: Uuid,
        patient_id: Uuid,
        schedule_id: Uuid,
    },
    AddOnApproved {
        appointment_id: Uuid,
        patient_id: Uuid,
        schedule_id: Uuid,
        pay_by: DateTime<Utc>,
    },
    PatientCalled {
        appointment_id: Uuid,
        patient_id: Uuid,
        schedule_id: Uuid,
        visit_number: u32,
        queue_number: Option<u32>,
    },
    AppointmentAutoCancelled {
        appointment_id: Uuid,
        patient_id: Uuid,
        schedule_id: Uuid,
        reason: String,
    },
    PatientBlacklisted {
        patient_id: Uuid,
        no_show_count: u32,
    },
}

impl Notice {
    pub fn schedule_id(&self) -> Option<Uuid> {
        match self {
            Notice::WaitlistSeatOffered { schedule_id, .. }
            | Notice::WaitlistOfferExpired { schedule_id, .. }
            | Notice::AddOnApproved { schedule_id, .. }
            | Notice::PatientCalled { schedule_id, .. }
            | Notice::AppointmentAutoCancelled { schedule_id, .. } => Some(*schedule_id),
            Notice::PatientBlacklisted { .. } => None,
        }
    }

    pub fn patient_id(&self) -> Uuid {
        match self {
            Notice::WaitlistSeatOffered { patient_id, .. }
            | Notice::WaitlistOfferExpired { patient_id, .. }
            | Notice::AddOnApproved { patient_id, .. }
            | Notice::PatientCalled { patient_id, .. }
            | Notice::AppointmentAutoCancelled { patient_id, .. }
            | Notice::PatientBlacklisted { patient_id, .. } => *patient_id,
        }
    }
}

// ==============================================================================
// ERRORS
// ==============================================================================

/// Broad classes used to decide how a rejection is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Validation,
    Conflict,
    Temporal,
    NotFound,
    Internal,
}

#[derive(Debug, Clone, Serialize, Deserialize, thiserror::Error, PartialEq)]
pub enum AppointmentError {
    #[error("Appointment not found")]
    NotFound,

    #[error("Schedule not found")]
    ScheduleNotFound,

    #[error("Patient not found")]
    PatientNotFound,

    #[error("Waitlist entry not found")]
    WaitlistEntryNotFound,

    #[error("Add-on request not found")]
    AddOnRequestNotFound,

    #[error("Patient already holds an appointment on this schedule")]
    AlreadyBooked,

    #[error("No seats available")]
    NoSeats,

    #[error("Schedule is not bookable: {0}")]
    ScheduleNotBookable(String),

    #[error("Patient is blacklisted and cannot book")]
    PatientBlacklisted,

    #[error("Schedule has already ended")]
    PastSchedule,

    #[error("Appointment is already cancelled")]
    AlreadyCancelled,

    #[error("Visit window has passed")]
    PastVisit,

    #[error("Checked-in appointments cannot be cancelled")]
    AlreadyCheckedIn,

    #[error("Appointment has not been called yet")]
    NotCalled,

    #[error("Check-in code is invalid or expired, please refresh")]
    InvalidOrExpiredToken,

    #[error("Appointment is already checked in")]
    DuplicateCheckIn,

    #[error("Operation not allowed in current status: {0}")]
    WrongStatus(String),

    #[error("Too early to check in, check-in opens at {opens_at}")]
    TooEarly { opens_at: DateTime<Utc> },

    #[error("Check-in window closed, cannot check in")]
    WindowClosed,

    #[error("Check-in crossed into another clinic session, appointment was cancelled")]
    CrossSessionExpired,

    #[error("Patient is already waiting for this schedule")]
    AlreadyWaiting,

    #[error("The offered seat is no longer held for this entry")]
    SeatLost,

    #[error("Payment deadline has passed")]
    Expired,

    #[error("Operation does not apply to {0:?} appointments")]
    WrongKind(AppointmentKind),

    #[error("Invalid status transition from {from} to {to}")]
    InvalidStatusTransition {
        from: AppointmentStatus,
        to: AppointmentStatus,
    },

    #[error("Seat counter invariant violated: {0}")]
    CapacityViolation(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl AppointmentError {
    pub fn category(&self) -> ErrorCategory {
        use AppointmentError::*;
        match self {
            NotFound | ScheduleNotFound | PatientNotFound | WaitlistEntryNotFound
            | AddOnRequestNotFound => ErrorCategory::NotFound,
            ValidationError(_) | WrongKind(_) => ErrorCategory::Validation,
            PastSchedule | PastVisit | TooEarly { .. } | WindowClosed | CrossSessionExpired
            | Expired => ErrorCategory::Temporal,
            CapacityViolation(_) | Storage(_) => ErrorCategory::Internal,
            AlreadyBooked | NoSeats | ScheduleNotBookable(_) | PatientBlacklisted
            | AlreadyCancelled | AlreadyCheckedIn | NotCalled | InvalidOrExpiredToken
            | DuplicateCheckIn | WrongStatus(_) | AlreadyWaiting | SeatLost
            | InvalidStatusTransition { .. } => ErrorCategory::Conflict,
        }
    }
}
