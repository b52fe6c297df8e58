use chrono::{Duration, NaiveDate};
use rguestlog::core::auth::AuthContext;
use rguestlog::errors::{AppError, ErrorKind};
use rguestlog::models::guest::{ContactInfo, GuestId};
use rguestlog::models::guest_status::{GuestStatus, ScanDirection};
use std::collections::HashSet;

mod common;
use common::{admin, at, contact, engine, hall, lab, operator, register};

#[tokio::test]
async fn checkin_then_checkout_closes_the_visit() {
    let t = engine();
    let ledger = t.engine.ledger();
    let g = register(&t.engine, "Ada");
    assert_eq!(g.status, GuestStatus::Registered);

    t.clock.set(at(10, 0));
    let open = ledger.checkin(&admin(), &g.id, hall()).await.unwrap();
    assert!(open.is_active());
    assert_eq!(ledger.guest_status(&g.id).unwrap(), GuestStatus::CheckedIn);

    t.clock.set(at(11, 30));
    let closed = ledger.checkout(&admin(), &g.id).await.unwrap();
    assert_eq!(closed.id, open.id);
    assert_eq!(closed.checkin_at, at(10, 0));
    assert_eq!(closed.checkout_at, Some(at(11, 30)));
    assert!(closed.checkin_at <= closed.checkout_at.unwrap());

    assert_eq!(ledger.count_active(hall()).unwrap(), 0);
    let visits = ledger.fetch_visits(&admin(), &g.id).unwrap();
    assert_eq!(visits.len(), 1);
    assert!(visits.iter().all(|v| !v.is_active()));
}

#[tokio::test]
async fn checkout_never_precedes_checkin() {
    let t = engine();
    let ledger = t.engine.ledger();
    let g = register(&t.engine, "Ada");

    t.clock.set(at(10, 0));
    ledger.checkin(&admin(), &g.id, hall()).await.unwrap();

    // wall clock stepped backwards
    t.clock.set(at(9, 0));
    let closed = ledger.checkout(&admin(), &g.id).await.unwrap();
    assert_eq!(closed.checkout_at, Some(at(10, 0)));
}

#[test]
fn registered_identifiers_are_distinct() {
    let t = engine();
    let ids: HashSet<GuestId> = (0..200)
        .map(|i| register(&t.engine, &format!("Guest{}", i)).id)
        .collect();
    assert_eq!(ids.len(), 200);
}

#[test]
fn registration_validates_division_and_contact() {
    let t = engine();
    let ledger = t.engine.ledger();

    let err = ledger.register_guest(9, contact("Ada")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let no_reachability = ContactInfo {
        phone: None,
        email: None,
        ..contact("Ada")
    };
    let err = ledger.register_guest(0, no_reachability).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let no_name = ContactInfo {
        first_name: "  ".into(),
        ..contact("Ada")
    };
    assert!(ledger.register_guest(0, no_name).is_err());
}

#[tokio::test]
async fn scan_is_a_strict_toggle() {
    let t = engine();
    let ledger = t.engine.ledger();
    let g = register(&t.engine, "Ada");

    let expected = [
        ScanDirection::CheckedIn,
        ScanDirection::CheckedOut,
        ScanDirection::CheckedIn,
        ScanDirection::CheckedOut,
        ScanDirection::CheckedIn,
    ];
    for (i, want) in expected.iter().enumerate() {
        t.clock.set(at(10, i as u32 * 10));
        let outcome = ledger.scan(&admin(), &g.id, hall()).await.unwrap();
        assert_eq!(outcome.direction, *want, "scan #{}", i);
    }

    assert_eq!(ledger.count_active(hall()).unwrap(), 1);
    assert_eq!(ledger.fetch_visits(&admin(), &g.id).unwrap().len(), 3);
}

#[tokio::test]
async fn state_conflicts_are_reported() {
    let t = engine();
    let ledger = t.engine.ledger();
    let g = register(&t.engine, "Ada");

    let err = ledger.checkout(&admin(), &g.id).await.unwrap_err();
    assert!(matches!(err, AppError::NotCheckedIn(_)));

    ledger.checkin(&admin(), &g.id, hall()).await.unwrap();
    let err = ledger.checkin(&admin(), &g.id, lab()).await.unwrap_err();
    assert!(matches!(err, AppError::AlreadyCheckedIn(_)));
    assert_eq!(ledger.count_active(lab()).unwrap(), 0);
    assert_eq!(ledger.count_active(hall()).unwrap(), 1);
}

#[tokio::test]
async fn unknown_guest_is_rejected() {
    let t = engine();
    let ghost = GuestId::parse(&"x".repeat(32)).unwrap();
    let err = t
        .engine
        .ledger()
        .checkin(&admin(), &ghost, hall())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnknownGuest);
}

#[tokio::test]
async fn bound_operator_only_works_its_division() {
    let t = engine();
    let ledger = t.engine.ledger();
    let g = register(&t.engine, "Ada");

    let err = ledger.scan(&operator(1), &g.id, hall()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unauthorized);

    let outcome = ledger.scan(&operator(0), &g.id, hall()).await.unwrap();
    assert_eq!(outcome.direction, ScanDirection::CheckedIn);

    // the lab operator cannot close a hall visit either
    let err = ledger.checkout(&operator(1), &g.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unauthorized);
    assert_eq!(ledger.guest_status(&g.id).unwrap(), GuestStatus::CheckedIn);
}

#[test]
fn tokens_resolve_to_their_guest() {
    let t = engine();
    let ledger = t.engine.ledger();
    let g = register(&t.engine, "Ada");

    assert_eq!(ledger.validate_token(g.token.as_str()).unwrap(), g.id);
    assert_eq!(ledger.resolve_scanned(g.token.as_str()).unwrap(), g.id);
    assert_eq!(ledger.resolve_scanned(g.id.as_str()).unwrap(), g.id);

    let err = ledger.validate_token("garbage").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidToken);
    let err = ledger.resolve_scanned(&"y".repeat(32)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnknownGuest);
}

#[tokio::test]
async fn history_queries_need_an_admin() {
    let t = engine();
    let ledger = t.engine.ledger();
    let g = register(&t.engine, "Ada");

    let err = ledger.fetch_visits(&operator(0), &g.id).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unauthorized);

    let date = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
    let err = ledger.fetch_guests(&operator(0), date).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unauthorized);
}

#[tokio::test]
async fn guests_are_listed_per_day_in_checkin_order() {
    let t = engine();
    let ledger = t.engine.ledger();
    let a = register(&t.engine, "Ada");
    let b = register(&t.engine, "Bob");

    t.clock.set(at(9, 0));
    ledger.checkin(&admin(), &b.id, hall()).await.unwrap();
    t.clock.set(at(9, 30));
    ledger.checkin(&admin(), &a.id, lab()).await.unwrap();

    // next day
    t.clock.set(at(9, 0) + Duration::days(1));
    ledger.checkout(&admin(), &a.id).await.unwrap();
    ledger.checkin(&admin(), &a.id, hall()).await.unwrap();

    let date = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
    let listed = ledger.fetch_guests(&AuthContext::system(), date).unwrap();
    let order: Vec<_> = listed.iter().map(|gv| gv.guest.id.clone()).collect();
    assert_eq!(order, vec![b.id.clone(), a.id.clone()]);
    assert_eq!(listed[1].visit.division, lab());

    let next = date.succ_opt().unwrap();
    assert_eq!(ledger.fetch_guests(&admin(), next).unwrap().len(), 1);
}

#[tokio::test]
async fn checkout_all_closes_every_active_visit() {
    let t = engine();
    let ledger = t.engine.ledger();
    let guests: Vec<_> = (0..4).map(|i| register(&t.engine, &format!("G{}", i))).collect();

    ledger.checkin(&admin(), &guests[0].id, hall()).await.unwrap();
    ledger.checkin(&admin(), &guests[1].id, lab()).await.unwrap();
    ledger.checkin(&admin(), &guests[2].id, hall()).await.unwrap();

    let err = ledger.checkout_all(&operator(0)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unauthorized);

    assert_eq!(ledger.checkout_all(&AuthContext::system()).await.unwrap(), 3);
    for d in t.engine.divisions().ids() {
        assert_eq!(ledger.count_active(d).unwrap(), 0);
    }
    assert_eq!(ledger.checkout_all(&AuthContext::system()).await.unwrap(), 0);
    assert_eq!(ledger.guest_status(&guests[3].id).unwrap(), GuestStatus::Registered);
}
