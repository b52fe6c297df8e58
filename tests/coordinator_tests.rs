use rguestlog::core::auth::AuthContext;
use rguestlog::errors::ErrorKind;
use rguestlog::models::division::DivisionId;
use rguestlog::models::guest_status::{GuestStatus, ScanDirection};
use rguestlog::server::coordinator::ScanCoordinator;
use rguestlog::server::protocol::{ClientMessage, ScanStatus, ServerMessage};
use std::sync::Arc;
use tokio::sync::mpsc;

mod common;
use common::{admin, at, engine, hall, operator, register};

fn drain(rx: &mut mpsc::UnboundedReceiver<ServerMessage>) -> Vec<ServerMessage> {
    let mut out = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        out.push(msg);
    }
    out
}

fn scan(guid: &str) -> ClientMessage {
    ClientMessage::Scan {
        guid: guid.to_string(),
    }
}

#[tokio::test]
async fn register_scan_in_scan_out() {
    let t = engine();
    let coordinator = ScanCoordinator::new(t.engine.clone());
    let (tx, mut rx) = mpsc::unbounded_channel();
    let device = coordinator.bind(operator(0), 0, tx).await.unwrap();

    // bind announces the current count
    assert!(matches!(
        drain(&mut rx).as_slice(),
        [ServerMessage::CountUpdate { count: 0, .. }]
    ));

    let g1 = register(&t.engine, "Ada");

    t.clock.set(at(10, 0));
    let reply = coordinator.handle(&device, scan(g1.token.as_str())).await;
    assert_eq!(
        reply,
        ServerMessage::ScanResult {
            guid: g1.token.0.clone(),
            status: ScanStatus::CheckedIn,
            count: 1,
            error: None,
            message: None,
        }
    );
    assert_eq!(t.engine.ledger().count_active(hall()).unwrap(), 1);

    t.clock.set(at(10, 45));
    let reply = coordinator.handle(&device, scan(g1.token.as_str())).await;
    assert!(matches!(
        reply,
        ServerMessage::ScanResult {
            status: ScanStatus::CheckedOut,
            count: 0,
            ..
        }
    ));
    assert_eq!(t.engine.ledger().count_active(hall()).unwrap(), 0);

    let visits = t.engine.ledger().fetch_visits(&admin(), &g1.id).unwrap();
    assert_eq!(visits.len(), 1);
    assert_eq!(visits[0].checkin_at, at(10, 0));
    assert_eq!(visits[0].checkout_at, Some(at(10, 45)));
}

#[tokio::test]
async fn counts_are_broadcast_to_the_division_room() {
    let t = engine();
    let coordinator = ScanCoordinator::new(t.engine.clone());

    let (tx_a, mut rx_a) = mpsc::unbounded_channel();
    let (tx_b, mut rx_b) = mpsc::unbounded_channel();
    let (tx_lab, mut rx_lab) = mpsc::unbounded_channel();
    let desk_a = coordinator.bind(operator(0), 0, tx_a).await.unwrap();
    let _desk_b = coordinator.bind(operator(0), 0, tx_b).await.unwrap();
    let _lab = coordinator.bind(operator(1), 1, tx_lab).await.unwrap();
    assert_eq!(coordinator.room_size(hall()), 2);
    drain(&mut rx_a);
    drain(&mut rx_b);
    drain(&mut rx_lab);

    let g = register(&t.engine, "Ada");
    coordinator.handle(&desk_a, scan(g.id.as_str())).await;

    for rx in [&mut rx_a, &mut rx_b] {
        assert_eq!(
            drain(rx),
            vec![ServerMessage::CountUpdate {
                division: DivisionId(0),
                name: "Hall".into(),
                count: 1,
            }]
        );
    }
    assert!(drain(&mut rx_lab).is_empty());

    coordinator.unbind(desk_a.id);
    assert_eq!(coordinator.room_size(hall()), 1);
    assert_eq!(coordinator.device_count(), 2);
}

#[tokio::test]
async fn invalid_scans_become_error_results() {
    let t = engine();
    let coordinator = ScanCoordinator::new(t.engine.clone());
    let (tx, _rx) = mpsc::unbounded_channel();
    let device = coordinator.bind(operator(0), 0, tx).await.unwrap();

    let reply = coordinator.handle(&device, scan("definitely-not-a-token")).await;
    assert!(matches!(
        reply,
        ServerMessage::ScanResult {
            status: ScanStatus::Error,
            error: Some(ErrorKind::InvalidToken),
            ..
        }
    ));

    let reply = coordinator.handle(&device, scan(&"z".repeat(32))).await;
    assert!(matches!(
        reply,
        ServerMessage::ScanResult {
            error: Some(ErrorKind::UnknownGuest),
            ..
        }
    ));
}

#[tokio::test]
async fn devices_bind_only_where_allowed() {
    let t = engine();
    let coordinator = ScanCoordinator::new(t.engine.clone());

    let (tx, _rx) = mpsc::unbounded_channel();
    let err = coordinator.bind(operator(1), 0, tx).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unauthorized);

    let (tx, _rx) = mpsc::unbounded_channel();
    let err = coordinator.bind(admin(), 7, tx).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(coordinator.device_count(), 0);
}

#[tokio::test]
async fn status_and_ping() {
    let t = engine();
    let coordinator = ScanCoordinator::new(t.engine.clone());
    let (tx, _rx) = mpsc::unbounded_channel();
    let device = coordinator.bind(AuthContext::staff(5, false, None), 0, tx).await.unwrap();
    let g = register(&t.engine, "Ada");

    let reply = coordinator
        .handle(
            &device,
            ClientMessage::Status {
                guid: g.id.to_string(),
            },
        )
        .await;
    assert_eq!(
        reply,
        ServerMessage::GuestStatus {
            guid: g.id.to_string(),
            status: GuestStatus::Registered,
        }
    );

    assert_eq!(coordinator.handle(&device, ClientMessage::Ping).await, ServerMessage::Pong);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_scans_of_one_guest_never_double_check_in() {
    let t = engine();
    let ledger_engine = t.engine.clone();
    let g = register(&t.engine, "Ada");

    let mut handles = Vec::new();
    for _ in 0..16 {
        let engine = ledger_engine.clone();
        let id = g.id.clone();
        handles.push(tokio::spawn(async move {
            engine.ledger().scan(&admin(), &id, hall()).await.unwrap().direction
        }));
    }

    let mut directions = Vec::new();
    for h in handles {
        directions.push(h.await.unwrap());
    }

    let ins = directions.iter().filter(|d| **d == ScanDirection::CheckedIn).count();
    let outs = directions.len() - ins;
    // strict alternation: equal numbers of each after an even number of scans
    assert_eq!(ins, 8);
    assert_eq!(outs, 8);
    assert_eq!(t.engine.ledger().count_active(hall()).unwrap(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_devices_count_each_guest_once() {
    let t = engine();
    let coordinator = Arc::new(ScanCoordinator::new(t.engine.clone()));
    let guests: Vec<_> = (0..10).map(|i| register(&t.engine, &format!("G{}", i))).collect();

    let mut handles = Vec::new();
    for desk in 0..3 {
        let coordinator = coordinator.clone();
        let ids: Vec<String> = guests.iter().map(|g| g.id.to_string()).collect();
        handles.push(tokio::spawn(async move {
            let (tx, _rx) = mpsc::unbounded_channel();
            let device = coordinator.bind(operator(0), 0, tx).await.unwrap();
            // every desk scans every guest once; three toggles leave each one in
            for id in ids.iter().cycle().skip(desk).take(ids.len()) {
                coordinator.handle(&device, scan(id)).await;
            }
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    assert_eq!(t.engine.ledger().count_active(hall()).unwrap(), 10);
    for g in &guests {
        let visits = t.engine.ledger().fetch_visits(&admin(), &g.id).unwrap();
        assert_eq!(visits.iter().filter(|v| v.is_active()).count(), 1);
        assert_eq!(visits.len(), 2);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn last_count_update_matches_the_store_after_concurrent_scans() {
    let t = engine();
    let coordinator = Arc::new(ScanCoordinator::new(t.engine.clone()));
    let guests: Vec<_> = (0..12).map(|i| register(&t.engine, &format!("G{}", i))).collect();

    let mut receivers = Vec::new();
    let mut desks = Vec::new();
    for _ in 0..4 {
        let (tx, rx) = mpsc::unbounded_channel();
        desks.push(coordinator.bind(operator(0), 0, tx).await.unwrap());
        receivers.push(rx);
    }

    let mut handles = Vec::new();
    for (n, desk) in desks.iter().enumerate() {
        let coordinator = coordinator.clone();
        let desk = desk.clone();
        // odd desks scan a guest twice so counts go up and down
        let ids: Vec<String> = guests
            .iter()
            .skip(n)
            .step_by(2)
            .map(|g| g.id.to_string())
            .collect();
        handles.push(tokio::spawn(async move {
            for id in &ids {
                coordinator.handle(&desk, scan(id)).await;
                if n % 2 == 1 {
                    coordinator.handle(&desk, scan(id)).await;
                }
            }
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    let expected = t.engine.ledger().count_active(hall()).unwrap();
    for rx in &mut receivers {
        let last = drain(rx)
            .into_iter()
            .filter_map(|m| match m {
                ServerMessage::CountUpdate { count, .. } => Some(count),
                _ => None,
            })
            .last();
        assert_eq!(last, Some(expected));
    }
}

#[tokio::test]
async fn broadcast_all_refreshes_every_room() {
    let t = engine();
    let coordinator = ScanCoordinator::new(t.engine.clone());
    let (tx_hall, mut rx_hall) = mpsc::unbounded_channel();
    let (tx_lab, mut rx_lab) = mpsc::unbounded_channel();
    coordinator.bind(operator(0), 0, tx_hall).await.unwrap();
    coordinator.bind(operator(1), 1, tx_lab).await.unwrap();
    drain(&mut rx_hall);
    drain(&mut rx_lab);

    let g = register(&t.engine, "Ada");
    t.engine.ledger().checkin(&admin(), &g.id, hall()).await.unwrap();
    t.engine.ledger().checkout_all(&admin()).await.unwrap();

    assert_eq!(coordinator.broadcast_all().await, 2);
    assert!(matches!(
        drain(&mut rx_hall).as_slice(),
        [ServerMessage::CountUpdate { count: 0, .. }]
    ));
    assert!(matches!(
        drain(&mut rx_lab).as_slice(),
        [ServerMessage::CountUpdate { count: 0, .. }]
    ));
}
