pub mod log;
pub mod migrate;
pub mod pool;
pub mod queries;
pub mod staff;

pub use pool::DbPool;
