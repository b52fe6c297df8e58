use super::{division::DivisionId, guest::GuestId};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

/// One check-in/check-out cycle. `checkout_at` is `None` while the visit is active.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Visit {
    pub id: i64,
    pub guest_id: GuestId,
    pub division: DivisionId,
    pub checkin_at: DateTime<Utc>,
    pub checkout_at: Option<DateTime<Utc>>,
}

impl Visit {
    pub fn is_active(&self) -> bool {
        self.checkout_at.is_none()
    }

    /// Length of a closed visit. Active visits have no duration yet.
    pub fn duration(&self) -> Option<Duration> {
        self.checkout_at.map(|out| out - self.checkin_at)
    }
}

/// A visit joined with the guest it belongs to, as listed per day.
#[derive(Debug, Clone, Serialize)]
pub struct GuestVisit {
    pub guest: super::guest::GuestRecord,
    pub visit: Visit,
}
