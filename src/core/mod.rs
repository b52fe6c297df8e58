pub mod auth;
pub mod calculator;
pub mod clock;
pub mod engine;
pub mod ledger;
pub mod locks;
pub mod scheduler;
pub mod staff;
pub mod token;
pub mod tracer;

pub use engine::{Engine, EngineSettings};
