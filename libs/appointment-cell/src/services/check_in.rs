// libs/appointment-cell/src/services/check_in.rs
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::context::ClinicContext;
use crate::models::{
    Appointment, AppointmentError, AppointmentStatus, BestEffort, CheckInResult,
    IssuedCheckInToken, Notice,
};
use crate::services::lifecycle::cancel_in_tables;
use crate::services::store::{ClinicTables, Scope};
use crate::services::waitlist::WaitlistService;
use crate::services::window::{classify_check_in_attempt, CheckInClass};

const TOKEN_BYTES: usize = 32;

/// Short-lived token facts. `take` must be an atomic read-and-delete.
#[async_trait]
pub trait CheckInTokenStore: Send + Sync {
    /// Bind `token` to the appointment. Any earlier token for the same
    /// appointment stops resolving.
    async fn put(&self, token: &str, appointment_id: Uuid, ttl_seconds: i64) -> anyhow::Result<()>;

    /// Resolve and consume. Unknown, consumed and expired tokens all yield `None`.
    async fn take(&self, token: &str) -> anyhow::Result<Option<Uuid>>;
}

pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

struct StoredToken {
    appointment_id: Uuid,
    expires_at: DateTime<Utc>,
}

#[derive(Default)]
struct TokenTables {
    by_token: HashMap<String, StoredToken>,
    by_appointment: HashMap<Uuid, String>,
}

impl TokenTables {
    /// Drop tokens that can no longer be redeemed, along with their reverse entries.
    fn purge_expired(&mut self, now: DateTime<Utc>) {
        self.by_token.retain(|_, stored| stored.expires_at > now);
        let live = &self.by_token;
        self.by_appointment.retain(|_, token| live.contains_key(token));
    }
}

/// In-process token store for single-node deployments and tests.
pub struct MemoryTokenStore {
    clock: Arc<dyn Clock>,
    tables: Mutex<TokenTables>,
}

impl MemoryTokenStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            tables: Mutex::new(TokenTables::default()),
        }
    }
}

#[async_trait]
impl CheckInTokenStore for MemoryTokenStore {
    async fn put(&self, token: &str, appointment_id: Uuid, ttl_seconds: i64) -> anyhow::Result<()> {
        let now = self.clock.now();
        let expires_at = now + Duration::seconds(ttl_seconds);
        let mut tables = self.tables.lock().await;
        tables.purge_expired(now);

        if let Some(previous) = tables.by_appointment.insert(appointment_id, token.to_string()) {
            tables.by_token.remove(&previous);
        }
        tables.by_token.insert(
            token.to_string(),
            StoredToken {
                appointment_id,
                expires_at,
            },
        );
        Ok(())
    }

    async fn take(&self, token: &str) -> anyhow::Result<Option<Uuid>> {
        let now = self.clock.now();
        let mut tables = self.tables.lock().await;

        let Some(stored) = tables.by_token.remove(token) else {
            return Ok(None);
        };
        if tables.by_appointment.get(&stored.appointment_id).map(String::as_str) == Some(token) {
            tables.by_appointment.remove(&stored.appointment_id);
        }
        if stored.expires_at <= now {
            return Ok(None);
        }
        Ok(Some(stored.appointment_id))
    }
}

enum Redemption {
    CheckedIn(CheckInResult),
    CrossSession(Appointment),
}

pub struct CheckInService {
    ctx: ClinicContext,
    tokens: Arc<dyn CheckInTokenStore>,
    waitlist: Arc<WaitlistService>,
}

impl CheckInService {
    pub fn new(ctx: ClinicContext, tokens: Arc<dyn CheckInTokenStore>, waitlist: Arc<WaitlistService>) -> Self {
        Self { ctx, tokens, waitlist }
    }

    /// Issue (or refresh) the QR token for an appointment. A new token
    /// supersedes the previous one.
    #[instrument(skip(self))]
    pub async fn issue_token(&self, appointment_id: Uuid) -> Result<IssuedCheckInToken, AppointmentError> {
        let now = self.ctx.now();
        let window_end = self
            .ctx
            .store
            .read(Scope::appointment(appointment_id), |t| {
                let appointment = t.appointment(appointment_id)?;
                match appointment.status {
                    AppointmentStatus::Scheduled | AppointmentStatus::CheckedIn => {}
                    other => {
                        return Err(AppointmentError::WrongStatus(format!(
                            "check-in codes are not issued for {} appointments",
                            other
                        )))
                    }
                }
                Ok(t.schedule(appointment.schedule_id)?.window_end())
            })
            .await??;

        if now > window_end {
            return Err(AppointmentError::WindowClosed);
        }

        let ttl = (window_end - now)
            .num_seconds()
            .max(self.ctx.rules.check_in_token_floor_seconds);
        let token = generate_token();
        self.tokens
            .put(&token, appointment_id, ttl)
            .await
            .map_err(|e| AppointmentError::Storage(e.to_string()))?;

        debug!("Issued check-in token for appointment {} (ttl {}s)", appointment_id, ttl);
        Ok(IssuedCheckInToken {
            token,
            expires_in_seconds: ttl,
            refresh_interval_seconds: self.ctx.rules.qr_refresh_interval_seconds,
        })
    }

    /// Redeem a scanned token. The token is consumed before any validation so
    /// it can never be redeemed twice, even when the check-in is rejected.
    #[instrument(skip(self, token))]
    pub async fn redeem(&self, token: &str) -> Result<CheckInResult, AppointmentError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(AppointmentError::ValidationError("check-in token is required".to_string()));
        }

        let appointment_id = self
            .tokens
            .take(token)
            .await
            .map_err(|e| AppointmentError::Storage(e.to_string()))?
            .ok_or(AppointmentError::InvalidOrExpiredToken)?;

        let now = self.ctx.now();
        let rules = self.ctx.rules.clone();

        let redemption = self
            .ctx
            .store
            .transaction(Scope::appointment(appointment_id), |t| {
                check_in_in_tables(t, appointment_id, now, &rules)
            })
            .await
            .inspect_err(|e| warn!("Check-in rejected for appointment {}: {}", appointment_id, e))?;

        match redemption {
            Redemption::CheckedIn(result) => {
                info!(
                    target: "audit",
                    appointment_id = %result.appointment_id,
                    queue_number = ?result.real_time_queue_number,
                    late = result.is_late,
                    requeued = result.requeued,
                    "patient checked in"
                );
                Ok(result)
            }
            Redemption::CrossSession(appointment) => {
                info!(
                    target: "audit",
                    appointment_id = %appointment.id,
                    "appointment auto-cancelled on cross-session check-in"
                );
                let backfill = BestEffort::from_result(
                    self.waitlist.promote_next(appointment.schedule_id).await,
                    "waitlist backfill",
                );
                debug!("Cross-session backfill: {:?}", backfill);
                self.ctx
                    .notify(Notice::AppointmentAutoCancelled {
                        appointment_id: appointment.id,
                        patient_id: appointment.patient_id,
                        schedule_id: appointment.schedule_id,
                        reason: "check-in crossed into another clinic session".to_string(),
                    })
                    .await;
                Err(AppointmentError::CrossSessionExpired)
            }
        }
    }
}

fn check_in_in_tables(
    t: &mut ClinicTables,
    appointment_id: Uuid,
    now: DateTime<Utc>,
    rules: &shared_config::ClinicRules,
) -> Result<Redemption, AppointmentError> {
    let appointment = t.appointment(appointment_id)?.clone();
    let schedule = t.schedule(appointment.schedule_id)?.clone();

    let requeued = match appointment.status {
        AppointmentStatus::CheckedIn if appointment.called_at.is_none() => {
            return Err(AppointmentError::DuplicateCheckIn);
        }
        AppointmentStatus::CheckedIn => {
            // Re-scan after a call the patient did not answer: back of the queue.
            if now > schedule.window_end() {
                return Err(AppointmentError::WindowClosed);
            }
            let back_of_queue = t.max_queue_number(schedule.id) + 1;
            let row = t.appointment_mut(appointment_id)?;
            row.called_at = None;
            row.recheck_in_time = Some(now);
            row.missed_call_count += 1;
            row.real_time_queue_number = Some(back_of_queue);
            row.updated_at = now;
            true
        }
        AppointmentStatus::Scheduled => {
            let class = classify_check_in_attempt(now, schedule.window_start(), schedule.window_end(), rules);
            let late = match class {
                CheckInClass::TooEarly { opens_at } => return Err(AppointmentError::TooEarly { opens_at }),
                CheckInClass::WindowClosed => return Err(AppointmentError::WindowClosed),
                CheckInClass::CrossSessionExpired => {
                    cancel_in_tables(t, appointment_id, now)?;
                    let cancelled = t.appointment(appointment_id)?.clone();
                    return Ok(Redemption::CrossSession(cancelled));
                }
                CheckInClass::OnTime => false,
                CheckInClass::Late => true,
            };

            // Un-checked-in by a missed call: this scan re-queues rather than
            // restoring the patient's primary rank.
            let requeue = appointment.missed_call_count > 0;
            let back_of_queue = t.max_queue_number(schedule.id) + 1;

            let row = t.appointment_mut(appointment_id)?;
            row.status = AppointmentStatus::CheckedIn;
            row.check_in_time = Some(now);
            row.called_at = None;
            row.is_on_time = !late;
            row.is_late = late;
            if requeue {
                row.recheck_in_time = Some(now);
                row.real_time_queue_number = Some(back_of_queue);
            } else {
                row.real_time_queue_number = None;
            }
            row.updated_at = now;
            requeue
        }
        other => {
            return Err(AppointmentError::WrongStatus(format!(
                "cannot check in a {} appointment",
                other
            )))
        }
    };

    t.rerank_queue(schedule.id)?;

    let row = t.appointment(appointment_id)?;
    let patient_name = t.patient(row.patient_id)?.name.clone();
    Ok(Redemption::CheckedIn(CheckInResult {
        appointment_id,
        patient_name,
        doctor_name: schedule.doctor_name.clone(),
        department_name: schedule.department_name.clone(),
        visit_number: row.visit_number,
        check_in_time: row.check_in_time.unwrap_or(now),
        real_time_queue_number: row.real_time_queue_number,
        is_late: row.is_late,
        requeued,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::TimeZone;

    #[test]
    fn tokens_are_url_safe_and_unique() {
        let a = generate_token();
        let b = generate_token();
        assert_ne!(a, b);
        assert_eq!(a.len(), 43);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[tokio::test]
    async fn memory_store_consumes_once_and_supersedes() {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2025, 3, 10, 8, 0, 0).unwrap()));
        let store = MemoryTokenStore::new(clock.clone());
        let appointment_id = Uuid::new_v4();

        store.put("first", appointment_id, 60).await.unwrap();
        store.put("second", appointment_id, 60).await.unwrap();

        assert_eq!(store.take("first").await.unwrap(), None);
        assert_eq!(store.take("second").await.unwrap(), Some(appointment_id));
        assert_eq!(store.take("second").await.unwrap(), None);
    }

    #[tokio::test]
    async fn issuing_purges_tokens_that_expired_unredeemed() {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2025, 3, 10, 8, 0, 0).unwrap()));
        let store = MemoryTokenStore::new(clock.clone());
        let (stale, live, fresh) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

        store.put("stale", stale, 30).await.unwrap();
        store.put("live", live, 600).await.unwrap();
        clock.advance(Duration::seconds(31));
        store.put("fresh", fresh, 30).await.unwrap();

        {
            let tables = store.tables.lock().await;
            assert!(!tables.by_token.contains_key("stale"));
            assert!(!tables.by_appointment.contains_key(&stale));
            assert_eq!(tables.by_token.len(), 2);
            assert_eq!(tables.by_appointment.len(), 2);
        }
        assert_eq!(store.take("live").await.unwrap(), Some(live));
        assert_eq!(store.take("fresh").await.unwrap(), Some(fresh));
    }

    #[tokio::test]
    async fn memory_store_expires_tokens() {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2025, 3, 10, 8, 0, 0).unwrap()));
        let store = MemoryTokenStore::new(clock.clone());
        store.put("qr", Uuid::new_v4(), 30).await.unwrap();

        clock.advance(Duration::seconds(31));
        assert_eq!(store.take("qr").await.unwrap(), None);
    }
}
