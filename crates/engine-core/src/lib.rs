pub mod error;
pub mod hash;
pub mod metrics;
pub mod pool;
pub mod retry;
pub mod runlog;
pub mod state;
