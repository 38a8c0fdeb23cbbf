pub mod clock;
pub mod context;
pub mod engine;
pub mod handlers;
pub mod models;
pub mod router;
pub mod services;

pub use clock::{Clock, ManualClock, SystemClock};
pub use context::ClinicContext;
pub use engine::ClinicEngine;
pub use models::*;
pub use router::{appointment_routes, AppState};
pub use services::*;
