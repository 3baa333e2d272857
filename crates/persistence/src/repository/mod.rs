//! Repository implementations for database operations

pub mod jobs;
pub mod strategies;

pub use jobs::JobRepository;
pub use strategies::StrategyRepository;
