//! Interval arithmetic for contact derivation.

use crate::models::contact::ContactWindow;
use crate::models::visit::Visit;
use chrono::{DateTime, Duration, Utc};

/// Intersection of two closed intervals, if they intersect at all.
pub fn intersect(
    a: (DateTime<Utc>, DateTime<Utc>),
    b: (DateTime<Utc>, DateTime<Utc>),
) -> Option<ContactWindow> {
    let start = a.0.max(b.0);
    let end = a.1.min(b.1);
    (start <= end).then_some(ContactWindow { start, end })
}

/// Overlap of two visits, treating an open visit as lasting until `now`.
/// Returns `None` unless the overlap lasts at least `min_overlap`.
pub fn visit_overlap(
    a: &Visit,
    b: &Visit,
    now: DateTime<Utc>,
    min_overlap: Duration,
) -> Option<ContactWindow> {
    if a.division != b.division || a.guest_id == b.guest_id {
        return None;
    }
    let span = |v: &Visit| (v.checkin_at, v.checkout_at.unwrap_or(now).max(v.checkin_at));
    intersect(span(a), span(b)).filter(|w| w.duration() >= min_overlap)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::division::DivisionId;
    use crate::models::guest::GuestId;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, h, m, 0).unwrap()
    }

    fn visit(id: i64, guest: char, division: usize, from: (u32, u32), to: Option<(u32, u32)>) -> Visit {
        Visit {
            id,
            guest_id: GuestId::parse(&guest.to_string().repeat(32)).unwrap(),
            division: DivisionId(division),
            checkin_at: at(from.0, from.1),
            checkout_at: to.map(|(h, m)| at(h, m)),
        }
    }

    #[test]
    fn overlapping_visits_yield_the_shared_window() {
        let a = visit(1, 'a', 0, (10, 0), Some((10, 30)));
        let b = visit(2, 'b', 0, (10, 15), Some((10, 45)));
        let w = visit_overlap(&a, &b, at(12, 0), Duration::minutes(5)).unwrap();
        assert_eq!(w.start, at(10, 15));
        assert_eq!(w.end, at(10, 30));
        assert_eq!(visit_overlap(&b, &a, at(12, 0), Duration::minutes(5)), Some(w));
    }

    #[test]
    fn disjoint_or_short_overlaps_are_ignored() {
        let a = visit(1, 'a', 0, (10, 0), Some((10, 30)));
        let c = visit(3, 'c', 0, (11, 0), Some((11, 30)));
        assert_eq!(visit_overlap(&a, &c, at(12, 0), Duration::minutes(5)), None);

        let d = visit(4, 'd', 0, (10, 28), Some((11, 0)));
        assert_eq!(visit_overlap(&a, &d, at(12, 0), Duration::minutes(5)), None);
        assert!(visit_overlap(&a, &d, at(12, 0), Duration::minutes(2)).is_some());
    }

    #[test]
    fn different_divisions_never_overlap() {
        let a = visit(1, 'a', 0, (10, 0), Some((10, 30)));
        let b = visit(2, 'b', 1, (10, 0), Some((10, 30)));
        assert_eq!(visit_overlap(&a, &b, at(12, 0), Duration::zero()), None);
    }

    #[test]
    fn open_visit_extends_to_now() {
        let a = visit(1, 'a', 0, (10, 0), None);
        let b = visit(2, 'b', 0, (10, 20), Some((11, 0)));
        let w = visit_overlap(&a, &b, at(10, 40), Duration::minutes(5)).unwrap();
        assert_eq!(w.end, at(10, 40));
    }
}
