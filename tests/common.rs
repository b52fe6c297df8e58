#![allow(dead_code)]
use assert_cmd::{Command, cargo_bin_cmd};
use chrono::{DateTime, Duration, TimeZone, Utc};
use rguestlog::core::auth::AuthContext;
use rguestlog::core::clock::Clock;
use rguestlog::core::engine::{Engine, EngineSettings};
use rguestlog::core::token::KeyMaterial;
use rguestlog::core::tracer::TracingPolicy;
use rguestlog::db::pool::DbPool;
use rguestlog::models::division::{DivisionId, Divisions};
use rguestlog::models::guest::{ContactInfo, GuestRecord};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

pub fn rgl() -> Command {
    cargo_bin_cmd!("rguestlog")
}

/// Clock the tests move by hand.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, t: DateTime<Utc>) {
        *self.now.lock().unwrap() = t;
    }

    pub fn advance(&self, d: Duration) {
        *self.now.lock().unwrap() += d;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

/// 2025-06-01 at `h:m` UTC.
pub fn at(h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, h, m, 0).unwrap()
}

pub fn day(d: u32, h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, d, h, m, 0).unwrap()
}

pub struct TestEngine {
    pub engine: Arc<Engine>,
    pub clock: Arc<ManualClock>,
}

pub fn settings() -> EngineSettings {
    EngineSettings {
        divisions: Divisions::new(vec!["Hall".into(), "Lab".into(), "Canteen".into()]).unwrap(),
        timezone: chrono_tz::UTC,
        retention: Duration::days(28),
        policy: TracingPolicy {
            min_overlap: Duration::minutes(5),
            traced_divisions: None,
        },
        autocheckout_hours: vec![3],
        clean_on_start: false,
    }
}

pub fn engine_with(settings: EngineSettings, start: DateTime<Utc>) -> TestEngine {
    let clock = Arc::new(ManualClock::new(start));
    let pool = Arc::new(DbPool::in_memory().unwrap());
    let engine = Engine::new(pool, &KeyMaterial::generate(), settings, clock.clone()).unwrap();
    TestEngine {
        engine: Arc::new(engine),
        clock,
    }
}

pub fn engine() -> TestEngine {
    engine_with(settings(), at(8, 0))
}

pub fn contact(first: &str) -> ContactInfo {
    ContactInfo {
        first_name: first.to_string(),
        last_name: "Tester".to_string(),
        phone: Some("+39 000 000".to_string()),
        email: None,
        address: None,
    }
}

pub fn register(engine: &Engine, name: &str) -> GuestRecord {
    engine.ledger().register_guest(0, contact(name)).unwrap()
}

pub fn admin() -> AuthContext {
    AuthContext::staff(1, true, None)
}

pub fn operator(division: usize) -> AuthContext {
    AuthContext::staff(42, false, Some(DivisionId(division)))
}

pub fn hall() -> DivisionId {
    DivisionId(0)
}

pub fn lab() -> DivisionId {
    DivisionId(1)
}

/// Fresh directory for CLI tests; config and database live inside it.
pub fn temp_home() -> TempDir {
    tempfile::tempdir().unwrap()
}

pub fn config_path(dir: &TempDir) -> String {
    dir.path().join("rguestlog.conf").to_string_lossy().to_string()
}
