// libs/appointment-cell/src/services/memory_store.rs
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::models::AppointmentError;
use crate::services::store::{ChangeSet, ClinicBackend, ClinicTables, Due, Scope, UnitOfWork};

/// Process-local backend. One lock covers every schedule, so units of work
/// run strictly one after another. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryBackend {
    tables: Arc<Mutex<ClinicTables>>,
}

struct MemoryUnit {
    committed: OwnedMutexGuard<ClinicTables>,
    loaded: ClinicTables,
}

#[async_trait]
impl UnitOfWork for MemoryUnit {
    fn tables(&self) -> &ClinicTables {
        &self.loaded
    }

    async fn commit(self: Box<Self>, changes: ChangeSet) -> Result<(), AppointmentError> {
        let MemoryUnit { mut committed, .. } = *self;
        committed.apply(changes);
        Ok(())
    }

    async fn rollback(self: Box<Self>) {}
}

#[async_trait]
impl ClinicBackend for MemoryBackend {
    async fn begin(&self, scope: &Scope) -> Result<Box<dyn UnitOfWork>, AppointmentError> {
        let committed = Arc::clone(&self.tables).lock_owned().await;
        let loaded = committed.scoped(scope);
        Ok(Box::new(MemoryUnit { committed, loaded }))
    }

    async fn load(&self, scope: &Scope) -> Result<ClinicTables, AppointmentError> {
        Ok(self.tables.lock().await.scoped(scope))
    }

    async fn due_schedules(&self, due: Due) -> Result<Vec<Uuid>, AppointmentError> {
        Ok(self.tables.lock().await.due_schedules(due))
    }
}
