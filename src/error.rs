//! Error taxonomy for the DCA engine.
//!
//! Only `Config` is fatal. Every other kind is caught at the component that
//! produced it and turned into a logged outcome.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DcaError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("insufficient balance: {balance:.2} available, {required:.2} required")]
    InsufficientBalance { balance: f64, required: f64 },

    #[error("exchange error: {0}")]
    Exchange(String),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("notification error: {0}")]
    Notification(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DcaError {
    /// Whether the process must refuse to start (or stop) on this error.
    pub fn is_fatal(&self) -> bool {
        matches!(self, DcaError::Config(_))
    }

    /// Whether this error originated in the trade ledger.
    pub fn is_persistence(&self) -> bool {
        matches!(
            self,
            DcaError::Persistence(_) | DcaError::Database(_) | DcaError::Migration(_)
        )
    }
}

impl From<config::ConfigError> for DcaError {
    fn from(err: config::ConfigError) -> Self {
        DcaError::Config(err.to_string())
    }
}
