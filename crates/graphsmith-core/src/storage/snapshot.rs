//! Snapshot envelope
//!
//! ```json
//! {"format_version": 1, "saved_at": "...", "checksum": "<sha256 hex>",
//!  "payload": {"system": {...}, "entities": [...], "relationships": [...]}}
//! ```
//!
//! The checksum covers the serialized payload. Class nodes and class
//! masters are derived from the registry and never stored.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::domain::KnowledgeBase;
use crate::error::{Error, Result};

/// Envelope version written by this build
pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotEnvelope {
    pub format_version: u32,
    pub saved_at: DateTime<Utc>,
    pub checksum: String,
    pub payload: serde_json::Value,
}

/// Hex SHA-256 of a payload's canonical serialization
pub fn payload_checksum(payload: &serde_json::Value) -> Result<String> {
    let mut hasher = Sha256::new();
    hasher.update(serde_json::to_vec(payload)?);
    Ok(hex::encode(hasher.finalize()))
}

/// Serialize a knowledge base into envelope bytes
pub fn encode_snapshot(knowledge: &KnowledgeBase) -> Result<Vec<u8>> {
    let payload = serde_json::to_value(knowledge)?;
    let envelope = SnapshotEnvelope {
        format_version: FORMAT_VERSION,
        saved_at: Utc::now(),
        checksum: payload_checksum(&payload)?,
        payload,
    };
    Ok(serde_json::to_vec_pretty(&envelope)?)
}

/// Verify and deserialize envelope bytes
pub fn decode_snapshot(bytes: &[u8]) -> Result<KnowledgeBase> {
    let envelope: SnapshotEnvelope = serde_json::from_slice(bytes)
        .map_err(|e| Error::SnapshotCorrupted(format!("unreadable envelope: {}", e)))?;

    if envelope.format_version != FORMAT_VERSION {
        return Err(Error::SnapshotCorrupted(format!(
            "unsupported format version {} (expected {})",
            envelope.format_version, FORMAT_VERSION
        )));
    }

    let actual = payload_checksum(&envelope.payload)?;
    if !actual.eq_ignore_ascii_case(&envelope.checksum) {
        return Err(Error::SnapshotCorrupted(format!(
            "checksum mismatch: recorded {}, computed {}",
            envelope.checksum, actual
        )));
    }

    let knowledge: KnowledgeBase = serde_json::from_value(envelope.payload)
        .map_err(|e| Error::SnapshotCorrupted(format!("invalid payload: {}", e)))?;
    debug!(
        saved_at = %envelope.saved_at,
        entities = knowledge.graph.entity_count(),
        "Snapshot decoded"
    );
    Ok(knowledge)
}
