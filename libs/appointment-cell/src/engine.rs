// libs/appointment-cell/src/engine.rs
use std::sync::Arc;

use shared_config::ClinicRules;
use tracing::{info, instrument, warn};

use crate::clock::Clock;
use crate::context::ClinicContext;
use crate::models::{AppointmentError, SweepReport};
use crate::services::add_on::AddOnService;
use crate::services::booking::AppointmentBookingService;
use crate::services::check_in::{CheckInService, CheckInTokenStore};
use crate::services::notifier::Notifier;
use crate::services::store::ClinicStore;
use crate::services::waitlist::WaitlistService;

/// Entry point for the HTTP layer and the sweep worker.
pub struct ClinicEngine {
    pub context: ClinicContext,
    pub booking: Arc<AppointmentBookingService>,
    pub check_in: Arc<CheckInService>,
    pub waitlist: Arc<WaitlistService>,
    pub add_on: Arc<AddOnService>,
}

impl ClinicEngine {
    pub fn new(
        store: Arc<ClinicStore>,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn Notifier>,
        tokens: Arc<dyn CheckInTokenStore>,
        rules: ClinicRules,
    ) -> Self {
        let context = ClinicContext::new(store, clock, notifier, rules);
        let waitlist = Arc::new(WaitlistService::new(context.clone()));

        Self {
            booking: Arc::new(AppointmentBookingService::new(context.clone(), waitlist.clone())),
            check_in: Arc::new(CheckInService::new(context.clone(), tokens, waitlist.clone())),
            add_on: Arc::new(AddOnService::new(context.clone(), waitlist.clone())),
            waitlist,
            context,
        }
    }

    /// One pass of every deadline rule. Each step runs independently so a
    /// failure in one does not starve the others.
    #[instrument(skip(self))]
    pub async fn run_sweep(&self) -> Result<SweepReport, AppointmentError> {
        let mut report = SweepReport::default();
        let mut first_error = None;

        match self.waitlist.expire_stale_offers().await {
            Ok((expired, promoted)) => {
                report.expired_offers = expired;
                report.promoted_entries = promoted;
            }
            Err(e) => {
                warn!("Waitlist expiry sweep failed: {}", e);
                first_error.get_or_insert(e);
            }
        }

        match self.add_on.expire_unpaid().await {
            Ok(expired) => report.expired_add_ons = expired,
            Err(e) => {
                warn!("Add-on expiry sweep failed: {}", e);
                first_error.get_or_insert(e);
            }
        }

        match self.booking.sweep_no_shows().await {
            Ok(marked) => report.auto_no_shows = marked,
            Err(e) => {
                warn!("No-show sweep failed: {}", e);
                first_error.get_or_insert(e);
            }
        }

        if !report.is_empty() {
            info!(
                "Sweep: {} offers expired, {} promoted, {} add-ons expired, {} no-shows",
                report.expired_offers.len(),
                report.promoted_entries.len(),
                report.expired_add_ons.len(),
                report.auto_no_shows.len()
            );
        }

        match first_error {
            Some(e) if report.is_empty() => Err(e),
            _ => Ok(report),
        }
    }
}
