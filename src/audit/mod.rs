//! Event construction and integrity checks
//!
//! Events are the write-only audit trail of the broker.

use crate::error::BrokerError;
use crate::models::{Event, Metadata};
use crate::Result;
use chrono::Utc;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::io::Write;
use uuid::Uuid;

#[derive(Serialize)]
struct DigestInput<'a> {
    description: &'a str,
    metadata: &'a Metadata,
}

/// Build an event and stamp its digest
pub fn new_event(description: impl Into<String>, metadata: Metadata) -> Result<Event> {
    let description = description.into();
    let digest = compute_event_digest(&description, &metadata)?;

    Ok(Event {
        event_id: Uuid::new_v4(),
        description,
        metadata,
        created_at: Utc::now(),
        digest,
    })
}

/// Compute SHA256 hash of an event body
/// Uses zero-copy streaming serialization into hasher
pub fn compute_event_digest(description: &str, metadata: &Metadata) -> Result<String> {
    let mut hasher = Sha256::new();
    let input = DigestInput {
        description,
        metadata,
    };

    // Stream JSON directly into hasher (no intermediate String)
    serde_json::to_writer(&mut HashWriter(&mut hasher), &input)
        .map_err(|e| BrokerError::AuditError(format!("Failed to hash event: {}", e)))?;

    Ok(hex::encode(hasher.finalize()))
}

/// Check that an event's content still matches its digest
pub fn verify_event(event: &Event) -> bool {
    compute_event_digest(&event.description, &event.metadata)
        .map(|digest| digest == event.digest)
        .unwrap_or(false)
}

/// Adapter to allow writing into Sha256 via std::io::Write
struct HashWriter<'a, H: Digest>(&'a mut H);

impl<'a, H: Digest> Write for HashWriter<'a, H> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
