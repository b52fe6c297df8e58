use chrono::{Duration, TimeZone, Utc};
use rguestlog::core::scheduler::{Job, ScheduleEntry, Scheduler};
use rguestlog::models::guest_status::GuestStatus;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

mod common;
use common::{admin, at, engine, engine_with, hall, lab, register, settings};

#[test]
fn next_fire_is_strictly_in_the_future() {
    let t = engine();
    let scheduler = Scheduler::from_settings(t.engine.clone());

    let (fire, job) = scheduler.next_fire(at(1, 0)).unwrap();
    assert_eq!(fire, at(3, 0));
    assert_eq!(job, Job::Cleanup);

    // exactly at the trigger: the next one is tomorrow
    let (fire, _) = scheduler.next_fire(at(3, 0)).unwrap();
    assert_eq!(fire, at(3, 0) + Duration::days(1));
}

#[test]
fn next_fire_uses_the_configured_timezone() {
    let mut s = settings();
    // summer time, UTC+2
    s.timezone = chrono_tz::Europe::Berlin;
    s.autocheckout_hours = vec![3, 22];
    let t = engine_with(s, at(0, 0));
    let scheduler = Scheduler::from_settings(t.engine.clone());

    // 02:30 local; 03:00 local is 01:00 UTC
    let (fire, _) = scheduler.next_fire(at(0, 30)).unwrap();
    assert_eq!(fire, at(1, 0));

    // 04:00 local; the 22:00 local entry wins
    let (fire, _) = scheduler.next_fire(at(2, 0)).unwrap();
    assert_eq!(fire, at(20, 0));
}

#[test]
fn next_fire_crosses_dst_changes() {
    let mut s = settings();
    s.timezone = chrono_tz::Europe::Rome;
    s.autocheckout_hours = vec![];
    let t = engine_with(s, at(0, 0));
    let utc = |y, mo, d, h, mi| Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap();

    let three = Scheduler::new(
        t.engine.clone(),
        vec![ScheduleEntry {
            hour: 3,
            job: Job::Cleanup,
        }],
    );
    // 2025-03-29 03:00 CET; the next 03:00 is already summer time
    let (fire, _) = three.next_fire(utc(2025, 3, 29, 2, 0)).unwrap();
    assert_eq!(fire, utc(2025, 3, 30, 1, 0));
    let (fire, _) = three.next_fire(fire).unwrap();
    assert_eq!(fire, utc(2025, 3, 31, 1, 0));
    assert_eq!(fire - utc(2025, 3, 30, 1, 0), Duration::hours(24));

    // 02:00 does not exist on 2025-03-30: it fires when the gap ends
    let two = Scheduler::new(
        t.engine.clone(),
        vec![ScheduleEntry {
            hour: 2,
            job: Job::Purge,
        }],
    );
    let (fire, job) = two.next_fire(utc(2025, 3, 29, 12, 0)).unwrap();
    assert_eq!(fire, utc(2025, 3, 30, 1, 0));
    assert_eq!(job, Job::Purge);
    let (fire, _) = two.next_fire(fire).unwrap();
    assert_eq!(fire, utc(2025, 3, 31, 0, 0));

    // 02:00 happens twice on 2025-10-26: only the first one fires
    let (fire, _) = two.next_fire(utc(2025, 10, 25, 12, 0)).unwrap();
    assert_eq!(fire, utc(2025, 10, 26, 0, 0));
    let (fire, _) = two.next_fire(fire).unwrap();
    assert_eq!(fire, utc(2025, 10, 27, 1, 0));
}

#[test]
fn no_entries_means_no_trigger() {
    let t = engine();
    let scheduler = Scheduler::new(t.engine.clone(), vec![]);
    assert!(scheduler.next_fire(at(1, 0)).is_none());
}

#[tokio::test]
async fn cleanup_checks_everyone_out() {
    let t = engine();
    let ledger = t.engine.ledger();
    let a = register(&t.engine, "Ada");
    let b = register(&t.engine, "Bob");
    ledger.checkin(&admin(), &a.id, hall()).await.unwrap();
    ledger.checkin(&admin(), &b.id, lab()).await.unwrap();

    t.clock.set(at(3, 0) + Duration::days(1));
    let report = Scheduler::from_settings(t.engine.clone()).run_cleanup().await;

    assert!(report.is_success());
    assert_eq!(report.checked_out, Some(2));
    assert!(report.purged.is_some());
    for (_, count) in t.engine.occupancy().unwrap() {
        assert_eq!(count, 0);
    }
    assert_eq!(ledger.guest_status(&a.id).unwrap(), GuestStatus::CheckedOut);
}

#[tokio::test]
async fn single_jobs_run_only_their_step() {
    let t = engine();
    let a = register(&t.engine, "Ada");
    t.engine.ledger().checkin(&admin(), &a.id, hall()).await.unwrap();

    let scheduler = Scheduler::new(t.engine.clone(), vec![]);
    let report = scheduler.run_job(Job::Purge).await;
    assert!(report.checked_out.is_none());
    assert!(report.purged.is_some());
    assert_eq!(t.engine.ledger().count_active(hall()).unwrap(), 1);

    let report = scheduler.run_job(Job::CheckoutAll).await;
    assert_eq!(report.checked_out, Some(1));
    assert!(report.purged.is_none());
}

#[tokio::test]
async fn failed_checkout_does_not_stop_the_purge() {
    let t = engine();
    let ledger = t.engine.ledger();
    let old = register(&t.engine, "Ada");
    t.clock.set(at(10, 0));
    ledger.checkin(&admin(), &old.id, hall()).await.unwrap();
    t.clock.set(at(11, 0));
    ledger.checkout(&admin(), &old.id).await.unwrap();

    t.clock.set(at(9, 0) + Duration::days(40));
    let present = register(&t.engine, "Bob");
    ledger.checkin(&admin(), &present.id, hall()).await.unwrap();

    // closing a visit now fails; deleting old ones still works
    t.engine
        .pool()
        .with_conn(|c| {
            Ok(c.execute_batch(
                "CREATE TRIGGER visits_frozen BEFORE UPDATE ON visits
                 BEGIN SELECT RAISE(ABORT, 'visits are frozen'); END;",
            )?)
        })
        .unwrap();

    let scheduler = Scheduler::from_settings(t.engine.clone());
    let report = scheduler.run_cleanup().await;
    assert!(!report.is_success());
    assert_eq!(report.failures.len(), 1);
    assert!(report.failures[0].contains("checkout_all"), "{:?}", report.failures);
    assert!(report.checked_out.is_none());
    let purged = report.purged.unwrap();
    assert_eq!(purged.visits, 1);
    assert_eq!(purged.guests, 1);

    // the failed step left the active visit alone
    assert_eq!(ledger.count_active(hall()).unwrap(), 1);
    assert_eq!(ledger.guest_status(&present.id).unwrap(), GuestStatus::CheckedIn);

    t.engine
        .pool()
        .with_conn(|c| Ok(c.execute_batch("DROP TRIGGER visits_frozen")?))
        .unwrap();
    let report = scheduler.run_cleanup().await;
    assert!(report.is_success());
    assert_eq!(report.checked_out, Some(1));
    assert_eq!(ledger.count_active(hall()).unwrap(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn forced_checkout_racing_scans_keeps_one_active_visit() {
    let t = engine();
    let g = register(&t.engine, "Ada");
    let scheduler = Arc::new(Scheduler::new(t.engine.clone(), vec![]));

    let mut scans = Vec::new();
    for _ in 0..4 {
        let engine = t.engine.clone();
        let id = g.id.clone();
        scans.push(tokio::spawn(async move {
            for _ in 0..25 {
                engine.ledger().scan(&admin(), &id, hall()).await.unwrap();
                tokio::task::yield_now().await;
            }
        }));
    }
    let sweeps = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move {
            let mut failures = 0;
            for _ in 0..25 {
                failures += scheduler.run_job(Job::CheckoutAll).await.failures.len();
                tokio::task::yield_now().await;
            }
            failures
        })
    };

    for h in scans {
        h.await.unwrap();
    }
    assert_eq!(sweeps.await.unwrap(), 0);

    let ledger = t.engine.ledger();
    let visits = ledger.fetch_visits(&admin(), &g.id).unwrap();
    let active = visits.iter().filter(|v| v.is_active()).count();
    assert!(active <= 1);
    assert!(
        visits
            .iter()
            .filter_map(|v| v.checkout_at.map(|out| (v.checkin_at, out)))
            .all(|(checkin, out)| out >= checkin)
    );
    assert_eq!(ledger.count_active(hall()).unwrap(), active);

    let expected = if active == 1 {
        GuestStatus::CheckedIn
    } else {
        GuestStatus::CheckedOut
    };
    assert_eq!(ledger.guest_status(&g.id).unwrap(), expected);
}

#[tokio::test]
async fn startup_runs_only_when_configured() {
    let t = engine();
    assert!(Scheduler::from_settings(t.engine.clone()).startup().await.is_none());

    let mut s = settings();
    s.clean_on_start = true;
    let t = engine_with(s, at(8, 0));
    let a = register(&t.engine, "Ada");
    t.engine.ledger().checkin(&admin(), &a.id, hall()).await.unwrap();

    let report = Scheduler::from_settings(t.engine.clone())
        .startup()
        .await
        .unwrap();
    assert_eq!(report.checked_out, Some(1));
}

#[tokio::test(start_paused = true)]
async fn loop_fires_and_stops_on_shutdown() {
    let t = engine();
    let a = register(&t.engine, "Ada");
    t.engine.ledger().checkin(&admin(), &a.id, hall()).await.unwrap();
    t.clock.set(at(2, 59));

    let (done_tx, mut done_rx) = mpsc::unbounded_channel();
    let scheduler = Scheduler::from_settings(t.engine.clone()).notify_finished(done_tx);
    let (tx, rx) = watch::channel(false);
    let handle = tokio::spawn(async move { scheduler.run(rx).await });

    for _ in 0..10 {
        if t.engine.ledger().count_active(hall()).unwrap() == 0 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_secs(60)).await;
    }
    assert_eq!(t.engine.ledger().count_active(hall()).unwrap(), 0);
    assert_eq!(done_rx.recv().await, Some(Job::Cleanup));

    tx.send(true).unwrap();
    tokio::time::timeout(std::time::Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();
}
