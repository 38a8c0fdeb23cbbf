// libs/appointment-cell/src/services/postgres_store.rs
//
// Postgres backend. A unit of work is one database transaction: the schedule
// row is taken with SELECT ... FOR UPDATE, so every read-check-write on a
// schedule's ledger is serialized across processes, and the changed rows are
// upserted before COMMIT.

use async_trait::async_trait;
use serde::Serialize;
use sqlx::postgres::{PgConnection, PgPool};
use sqlx::types::Json;
use sqlx::{Postgres, Transaction};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::models::{
    AddOnRequest, Appointment, AppointmentError, AppointmentKind, AppointmentStatus, Patient,
    Schedule, WaitlistEntry, WaitlistStatus,
};
use crate::services::store::{Anchor, ChangeSet, ClinicBackend, ClinicTables, Due, Scope, UnitOfWork};

pub struct PgClinicBackend {
    pool: PgPool,
}

impl PgClinicBackend {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

struct PgUnit {
    tx: Transaction<'static, Postgres>,
    loaded: ClinicTables,
}

#[async_trait]
impl UnitOfWork for PgUnit {
    fn tables(&self) -> &ClinicTables {
        &self.loaded
    }

    async fn commit(self: Box<Self>, changes: ChangeSet) -> Result<(), AppointmentError> {
        let PgUnit { mut tx, .. } = *self;
        write_changes(&mut tx, &changes).await.map_err(storage_error)?;
        tx.commit().await.map_err(storage_error)?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) {
        let PgUnit { tx, .. } = *self;
        if let Err(e) = tx.rollback().await {
            warn!("Rollback failed: {}", e);
        }
    }
}

#[async_trait]
impl ClinicBackend for PgClinicBackend {
    #[instrument(skip(self))]
    async fn begin(&self, scope: &Scope) -> Result<Box<dyn UnitOfWork>, AppointmentError> {
        let mut tx = self.pool.begin().await.map_err(storage_error)?;
        let loaded = load_scope(&mut tx, scope, true).await.map_err(storage_error)?;
        Ok(Box::new(PgUnit { tx, loaded }))
    }

    async fn load(&self, scope: &Scope) -> Result<ClinicTables, AppointmentError> {
        let mut conn = self.pool.acquire().await.map_err(storage_error)?;
        load_scope(&mut conn, scope, false).await.map_err(storage_error)
    }

    async fn due_schedules(&self, due: Due) -> Result<Vec<Uuid>, AppointmentError> {
        let ids = match due {
            Due::StaleOffers { notified_before } => {
                sqlx::query_scalar::<_, Uuid>(
                    "SELECT DISTINCT schedule_id FROM waitlist_entries \
                     WHERE status = $1 AND notification_sent_at < $2",
                )
                .bind(label(&WaitlistStatus::Notified))
                .bind(notified_before)
                .fetch_all(&self.pool)
                .await
            }
            Due::UnpaidAddOns { deadline_before } => {
                sqlx::query_scalar::<_, Uuid>(
                    "SELECT DISTINCT schedule_id FROM appointments \
                     WHERE status = $1 AND kind = $2 AND payment_deadline < $3",
                )
                .bind(label(&AppointmentStatus::PendingPayment))
                .bind(label(&AppointmentKind::AddOn))
                .bind(deadline_before)
                .fetch_all(&self.pool)
                .await
            }
            Due::MissedVisits { window_ended_before } => {
                sqlx::query_scalar::<_, Uuid>(
                    "SELECT DISTINCT a.schedule_id FROM appointments a \
                     JOIN schedules s ON s.id = a.schedule_id \
                     WHERE a.status = $1 AND s.window_end < $2",
                )
                .bind(label(&AppointmentStatus::Scheduled))
                .bind(window_ended_before)
                .fetch_all(&self.pool)
                .await
            }
        };
        ids.map_err(storage_error)
    }
}

async fn resolve_anchor(conn: &mut PgConnection, anchor: Anchor) -> Result<Option<Uuid>, sqlx::Error> {
    let query = match anchor {
        Anchor::Schedule(id) => return Ok(Some(id)),
        Anchor::Patient(_) => return Ok(None),
        Anchor::Appointment(id) => {
            sqlx::query_scalar::<_, Uuid>("SELECT schedule_id FROM appointments WHERE id = $1").bind(id)
        }
        Anchor::WaitlistEntry(id) => {
            sqlx::query_scalar::<_, Uuid>("SELECT schedule_id FROM waitlist_entries WHERE id = $1").bind(id)
        }
        Anchor::AddOnRequest(id) => {
            sqlx::query_scalar::<_, Uuid>("SELECT schedule_id FROM add_on_requests WHERE id = $1").bind(id)
        }
    };
    query.fetch_optional(&mut *conn).await
}

async fn load_scope(conn: &mut PgConnection, scope: &Scope, lock: bool) -> Result<ClinicTables, sqlx::Error> {
    let lock_clause = if lock { " FOR UPDATE" } else { "" };
    let mut tables = ClinicTables::default();

    if let Some(schedule_id) = resolve_anchor(conn, scope.anchor()).await? {
        let sql = format!("SELECT doc FROM schedules WHERE id = $1{lock_clause}");
        let schedule = sqlx::query_scalar::<_, Json<Schedule>>(&sql)
            .bind(schedule_id)
            .fetch_optional(&mut *conn)
            .await?;
        if let Some(Json(schedule)) = schedule {
            tables.schedules.insert(schedule.id, schedule);
        }

        let appointments = sqlx::query_scalar::<_, Json<Appointment>>("SELECT doc FROM appointments WHERE schedule_id = $1")
            .bind(schedule_id)
            .fetch_all(&mut *conn)
            .await?;
        tables.appointments = appointments.into_iter().map(|Json(a)| (a.id, a)).collect();

        let waitlist = sqlx::query_scalar::<_, Json<WaitlistEntry>>("SELECT doc FROM waitlist_entries WHERE schedule_id = $1")
            .bind(schedule_id)
            .fetch_all(&mut *conn)
            .await?;
        tables.waitlist = waitlist.into_iter().map(|Json(e)| (e.id, e)).collect();

        let requests = sqlx::query_scalar::<_, Json<AddOnRequest>>("SELECT doc FROM add_on_requests WHERE schedule_id = $1")
            .bind(schedule_id)
            .fetch_all(&mut *conn)
            .await?;
        tables.add_on_requests = requests.into_iter().map(|Json(r)| (r.id, r)).collect();
    }

    let patient_ids = tables.referenced_patients(scope.extra_patients());
    if !patient_ids.is_empty() {
        // Sorted ids, so concurrent units lock patients in the same order.
        let sql = format!("SELECT doc FROM patients WHERE id = ANY($1) ORDER BY id{lock_clause}");
        let patients = sqlx::query_scalar::<_, Json<Patient>>(&sql)
            .bind(&patient_ids[..])
            .fetch_all(&mut *conn)
            .await?;
        tables.patients = patients.into_iter().map(|Json(p)| (p.id, p)).collect();
    }

    debug!(
        "Loaded {} appointments, {} waitlist entries, {} patients for {:?}",
        tables.appointments.len(),
        tables.waitlist.len(),
        tables.patients.len(),
        scope.anchor()
    );
    Ok(tables)
}

/// Parents first so foreign keys hold at every statement.
async fn write_changes(conn: &mut PgConnection, changes: &ChangeSet) -> Result<(), sqlx::Error> {
    for schedule in &changes.schedules {
        sqlx::query(
            "INSERT INTO schedules \
                (id, doctor_id, visit_date, window_end, total_seats, booked_seats, status, doc, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NOW()) \
             ON CONFLICT (id) DO UPDATE SET \
                doctor_id = EXCLUDED.doctor_id, visit_date = EXCLUDED.visit_date, \
                window_end = EXCLUDED.window_end, total_seats = EXCLUDED.total_seats, \
                booked_seats = EXCLUDED.booked_seats, status = EXCLUDED.status, \
                doc = EXCLUDED.doc, updated_at = NOW()",
        )
        .bind(schedule.id)
        .bind(schedule.doctor_id)
        .bind(schedule.visit_date)
        .bind(schedule.window_end())
        .bind(i64::from(schedule.total_seats))
        .bind(i64::from(schedule.booked_seats))
        .bind(label(&schedule.status))
        .bind(Json(schedule))
        .execute(&mut *conn)
        .await?;
    }

    for patient in &changes.patients {
        sqlx::query(
            "INSERT INTO patients (id, doc, updated_at) VALUES ($1, $2, NOW()) \
             ON CONFLICT (id) DO UPDATE SET doc = EXCLUDED.doc, updated_at = NOW()",
        )
        .bind(patient.id)
        .bind(Json(patient))
        .execute(&mut *conn)
        .await?;
    }

    for appointment in &changes.appointments {
        sqlx::query(
            "INSERT INTO appointments \
                (id, schedule_id, patient_id, status, kind, payment_deadline, doc, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, NOW()) \
             ON CONFLICT (id) DO UPDATE SET \
                status = EXCLUDED.status, kind = EXCLUDED.kind, \
                payment_deadline = EXCLUDED.payment_deadline, doc = EXCLUDED.doc, updated_at = NOW()",
        )
        .bind(appointment.id)
        .bind(appointment.schedule_id)
        .bind(appointment.patient_id)
        .bind(label(&appointment.status))
        .bind(label(&appointment.kind))
        .bind(appointment.payment_deadline)
        .bind(Json(appointment))
        .execute(&mut *conn)
        .await?;
    }

    for entry in &changes.waitlist {
        sqlx::query(
            "INSERT INTO waitlist_entries \
                (id, schedule_id, patient_id, status, notification_sent_at, doc, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, NOW()) \
             ON CONFLICT (id) DO UPDATE SET \
                status = EXCLUDED.status, notification_sent_at = EXCLUDED.notification_sent_at, \
                doc = EXCLUDED.doc, updated_at = NOW()",
        )
        .bind(entry.id)
        .bind(entry.schedule_id)
        .bind(entry.patient_id)
        .bind(label(&entry.status))
        .bind(entry.notification_sent_at)
        .bind(Json(entry))
        .execute(&mut *conn)
        .await?;
    }

    for request in &changes.add_on_requests {
        sqlx::query(
            "INSERT INTO add_on_requests (id, schedule_id, patient_id, status, doc, updated_at) \
             VALUES ($1, $2, $3, $4, $5, NOW()) \
             ON CONFLICT (id) DO UPDATE SET status = EXCLUDED.status, doc = EXCLUDED.doc, updated_at = NOW()",
        )
        .bind(request.id)
        .bind(request.schedule_id)
        .bind(request.patient_id)
        .bind(label(&request.status))
        .bind(Json(request))
        .execute(&mut *conn)
        .await?;
    }

    Ok(())
}

/// The wire name of a status or kind, as stored in the filter columns.
fn label<T: Serialize>(value: &T) -> String {
    match serde_json::to_value(value) {
        Ok(serde_json::Value::String(name)) => name,
        Ok(other) => other.to_string(),
        Err(_) => String::new(),
    }
}

fn storage_error(e: sqlx::Error) -> AppointmentError {
    AppointmentError::Storage(e.to_string())
}
