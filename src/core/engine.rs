//! The engine value: built once at startup and shared by reference with the
//! transport layer, the scan coordinator and the scheduler.

use crate::config::Config;
use crate::core::clock::Clock;
use crate::core::ledger::Ledger;
use crate::core::locks::GuestLocks;
use crate::core::staff::StaffDirectory;
use crate::core::token::{KeyMaterial, TokenService};
use crate::core::tracer::{ContactTracer, TracingPolicy};
use crate::db::pool::DbPool;
use crate::errors::AppResult;
use crate::models::division::{DivisionId, Divisions};
use crate::models::visit::Visit;
use crate::utils::time::parse_timezone;
use chrono::Duration;
use chrono_tz::Tz;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

/// Engine knobs derived from the configuration file.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub divisions: Divisions,
    pub timezone: Tz,
    pub retention: Duration,
    pub policy: TracingPolicy,
    pub autocheckout_hours: Vec<u32>,
    pub clean_on_start: bool,
}

impl EngineSettings {
    pub fn from_config(cfg: &Config) -> AppResult<Self> {
        cfg.validate()?;
        let divisions = cfg.division_list()?;
        let traced_divisions = cfg
            .traced_divisions
            .as_ref()
            .map(|list| list.iter().map(|i| divisions.resolve(*i)).collect::<AppResult<Vec<_>>>())
            .transpose()?;

        Ok(Self {
            divisions,
            timezone: parse_timezone(&cfg.timezone)?,
            retention: Duration::days(i64::from(cfg.retention_days)),
            policy: TracingPolicy {
                min_overlap: Duration::minutes(i64::from(cfg.min_overlap_minutes)),
                traced_divisions,
            },
            autocheckout_hours: cfg.autocheckout_hours.clone(),
            clean_on_start: cfg.clean_on_start,
        })
    }
}

#[derive(Debug)]
pub struct Engine {
    pool: Arc<DbPool>,
    ledger: Ledger,
    tracer: Arc<ContactTracer>,
    staff: StaffDirectory,
    settings: EngineSettings,
    clock: Arc<dyn Clock>,
    closed_rx: Mutex<Option<mpsc::UnboundedReceiver<Visit>>>,
}

impl Engine {
    pub fn new(
        pool: Arc<DbPool>,
        keys: &KeyMaterial,
        settings: EngineSettings,
        clock: Arc<dyn Clock>,
    ) -> AppResult<Self> {
        let tokens = Arc::new(TokenService::from_keys(keys)?);
        let locks = Arc::new(GuestLocks::new());
        let (closed_tx, closed_rx) = mpsc::unbounded_channel();

        let ledger = Ledger::new(
            pool.clone(),
            tokens,
            locks.clone(),
            clock.clone(),
            settings.divisions.clone(),
            settings.timezone,
            closed_tx,
        );
        let tracer = Arc::new(ContactTracer::new(
            pool.clone(),
            locks,
            clock.clone(),
            settings.policy.clone(),
        ));
        let staff = StaffDirectory::new(pool.clone(), clock.clone(), settings.divisions.clone());

        Ok(Self {
            pool,
            ledger,
            tracer,
            staff,
            settings,
            clock,
            closed_rx: Mutex::new(Some(closed_rx)),
        })
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn tracer(&self) -> &ContactTracer {
        &self.tracer
    }

    pub fn staff(&self) -> &StaffDirectory {
        &self.staff
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn divisions(&self) -> &Divisions {
        &self.settings.divisions
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn pool(&self) -> &Arc<DbPool> {
        &self.pool
    }

    /// Current occupancy of every division, in configuration order.
    pub fn occupancy(&self) -> AppResult<Vec<(DivisionId, usize)>> {
        self.settings
            .divisions
            .ids()
            .map(|d| Ok((d, self.ledger.count_active(d)?)))
            .collect()
    }

    /// Start the background contact tracer. Only the first call spawns a
    /// worker; later calls return `None`.
    pub fn spawn_tracer(&self) -> Option<JoinHandle<()>> {
        let rx = self
            .closed_rx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()?;
        debug!("spawning contact tracer worker");
        Some(tokio::spawn(self.tracer.clone().run_worker(rx)))
    }
}
