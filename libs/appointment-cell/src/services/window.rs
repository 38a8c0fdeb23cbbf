// libs/appointment-cell/src/services/window.rs
//
// All check-in boundary arithmetic lives here. Both check-in redemption and
// queue ranking consume the classification instead of comparing timestamps.

use chrono::{DateTime, Duration, NaiveTime, Utc};
use shared_config::ClinicRules;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckInClass {
    TooEarly { opens_at: DateTime<Utc> },
    OnTime,
    Late,
    CrossSessionExpired,
    WindowClosed,
}

pub fn classify_check_in_attempt(
    now: DateTime<Utc>,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
    rules: &ClinicRules,
) -> CheckInClass {
    let opens_at = window_start - Duration::minutes(rules.early_check_in_minutes);
    let cutoff = window_end - Duration::minutes(rules.late_cutoff_minutes);

    if now < opens_at {
        return CheckInClass::TooEarly { opens_at };
    }
    if now > window_end {
        return CheckInClass::WindowClosed;
    }
    if now >= cutoff {
        let crossed_day = now.date_naive() != window_start.date_naive();
        let crossed_session = session_index(now.time(), &rules.session_boundaries)
            != session_index(window_start.time(), &rules.session_boundaries);
        if crossed_day || crossed_session {
            return CheckInClass::CrossSessionExpired;
        }
        return CheckInClass::Late;
    }
    CheckInClass::OnTime
}

/// 0 = before the first boundary (morning), 1 = afternoon, and so on.
pub fn session_index(time: NaiveTime, boundaries: &[NaiveTime]) -> usize {
    boundaries.iter().filter(|boundary| **boundary <= time).count()
}
