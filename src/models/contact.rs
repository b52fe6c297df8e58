use super::{division::DivisionId, guest::GuestId};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

/// Closed time interval during which two guests were present together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ContactWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl ContactWindow {
    pub fn duration(&self) -> Duration {
        self.end - self.start
    }
}

/// Derived overlap record between two guests' visits in one division.
///
/// The guest pair is stored ordered (`guest_a < guest_b`) so that the pair is
/// unordered for deduplication purposes. Guests are referenced by identifier
/// only; the edge never keeps a guest record alive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContactEdge {
    pub guest_a: GuestId,
    pub guest_b: GuestId,
    pub visit_a: i64,
    pub visit_b: i64,
    pub division: DivisionId,
    pub window: ContactWindow,
}

impl ContactEdge {
    /// Build an edge, normalizing the order of the two participants.
    pub fn new(
        (guest_1, visit_1): (GuestId, i64),
        (guest_2, visit_2): (GuestId, i64),
        division: DivisionId,
        window: ContactWindow,
    ) -> Self {
        if guest_1 <= guest_2 {
            Self {
                guest_a: guest_1,
                guest_b: guest_2,
                visit_a: visit_1,
                visit_b: visit_2,
                division,
                window,
            }
        } else {
            Self {
                guest_a: guest_2,
                guest_b: guest_1,
                visit_a: visit_2,
                visit_b: visit_1,
                division,
                window,
            }
        }
    }

    /// The participant that is not `me`, if `me` is part of the edge.
    pub fn other(&self, me: &GuestId) -> Option<&GuestId> {
        if &self.guest_a == me {
            Some(&self.guest_b)
        } else if &self.guest_b == me {
            Some(&self.guest_a)
        } else {
            None
        }
    }
}

/// One item of a tracing query, seen from the queried guest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Contact {
    pub other_guest: GuestId,
    pub division: DivisionId,
    pub window: ContactWindow,
    /// `true` for overlaps with a still-open visit, computed at query time and
    /// not stored.
    pub provisional: bool,
}
