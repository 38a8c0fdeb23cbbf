pub mod add_on;
pub mod booking;
pub mod call_queue;
pub mod capacity;
pub mod check_in;
pub mod lifecycle;
pub mod memory_store;
pub mod notifier;
pub mod postgres_store;
pub mod store;
pub mod waitlist;
pub mod window;

pub use add_on::AddOnService;
pub use booking::AppointmentBookingService;
pub use check_in::{generate_token, CheckInService, CheckInTokenStore, MemoryTokenStore};
pub use notifier::{LogNotifier, Notifier, RecordingNotifier};
pub use memory_store::MemoryBackend;
pub use postgres_store::PgClinicBackend;
pub use store::{Anchor, ChangeSet, ClinicBackend, ClinicStore, ClinicTables, Due, Scope, UnitOfWork};
pub use waitlist::WaitlistService;
