//! Ord Context Broker
//!
//! Memory integration for Ord GPT, a Bitcoin / Ordinals assistant:
//! - Records every chat turn with its epoch (turn number) and an audit event
//! - Keeps deduplicated Bitcoin facts and Ordinals knowledge
//! - Upserts per-user preferences
//! - Assembles the context bundle handed to reply generation
//!
//! All durable state lives behind the `MemoryStore` trait.

pub mod audit;
pub mod broker;
pub mod config;
pub mod error;
pub mod memory;
pub mod models;

pub use error::Result;

// Re-export common types
pub use broker::{ContextBroker, RecordedResponse};
pub use config::BrokerConfig;
pub use memory::{build_store, InMemoryMemoryStore, MemoryStore, PgMemoryStore};
pub use models::*;

/// Install the fmt subscriber used by the binaries
///
/// Logs go to stderr; stdout is reserved for command output.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // A second call (e.g. from tests) keeps the first subscriber
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
