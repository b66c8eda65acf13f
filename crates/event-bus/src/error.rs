use thiserror::Error;

/// Errors that can occur when publishing or reading domain events.
#[derive(Debug, Error)]
pub enum EventBusError {
    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The envelope is missing a required field.
    #[error("Invalid event envelope: {0}")]
    InvalidEnvelope(String),
}

/// Result type for event transport operations.
pub type Result<T> = std::result::Result<T, EventBusError>;
