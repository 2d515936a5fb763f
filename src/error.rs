//! Error types for the context broker

use thiserror::Error;

/// Result type alias for broker operations
pub type Result<T> = std::result::Result<T, BrokerError>;

#[derive(Error, Debug)]
pub enum BrokerError {

    // =============================
    // Memory Store Errors
    // =============================

    #[error("Memory store error: {0}")]
    StoreError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Memory {id} not found in category {category}")]
    RecordNotFound { category: String, id: uuid::Uuid },

    // =============================
    // Broker Errors
    // =============================

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Audit error: {0}")]
    AuditError(String),
}
