//! Persistence of the knowledge base
//!
//! Snapshots are checksummed JSON envelopes handed to a [`SnapshotSink`].

mod sink;
mod snapshot;

pub use sink::{FileSnapshotSink, MemorySnapshotSink, SnapshotSink};
pub use snapshot::{FORMAT_VERSION, SnapshotEnvelope, decode_snapshot, encode_snapshot, payload_checksum};
