// Core modules
pub mod clock;
pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod exchange;
pub mod execution;
pub mod jobs;
pub mod models;
pub mod notify;
pub mod portfolio;
pub mod reporting;
pub mod scheduler;

// Re-export commonly used types
pub use context::AppContext;
pub use error::DcaError;
pub use models::*;

// Error handling
pub type Result<T> = std::result::Result<T, DcaError>;
