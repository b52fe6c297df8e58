pub mod cleanup;
pub mod init;
pub mod serve;
pub mod staff;

use crate::config::Config;
use crate::core::clock::SystemClock;
use crate::core::engine::{Engine, EngineSettings};
use crate::core::token::KeyMaterial;
use crate::db::pool::DbPool;
use crate::errors::AppResult;
use std::path::Path;
use std::sync::Arc;

/// Open the store, load (or create) the keypair and build the engine.
pub fn open_engine(cfg: &Config) -> AppResult<Arc<Engine>> {
    let settings = EngineSettings::from_config(cfg)?;
    let pool = Arc::new(DbPool::open(&cfg.database)?);
    let keys = KeyMaterial::load_or_generate(Path::new(&cfg.privkey), Path::new(&cfg.pubkey))?;
    let engine = Engine::new(pool, &keys, settings, Arc::new(SystemClock))?;
    Ok(Arc::new(engine))
}
