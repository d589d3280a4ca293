// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Persisted truth snapshots.
//!
//! On-disk layout is a versioned CBOR envelope around
//! `{ commit_id, tick, timestamp, entities: [(net_id, truth)] }`. CBOR is
//! the only supported encoding: entity maps are serialised from `BTreeMap`
//! iteration so the byte stream is deterministic for identical state.
//!
//! Resuming a core from disk restores the snapshot into the truth log and
//! continues the commit counter after it; the embedder replays
//! `commits_since(snapshot.commit_id)` from its durable transport before
//! accepting new traffic.

use std::io::{Read, Write};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::clock::Tick;
use crate::ident::NetId;
use crate::truth::{CommitId, EntityTruth, TruthLog, TruthSnapshot};

/// Current on-disk format version.
pub const PERSIST_VERSION: u16 = 1;

/// Persistence failures.
#[derive(Debug, Error)]
pub enum PersistError {
    /// Underlying I/O failed.
    #[error("snapshot i/o failed: {0}")]
    Io(#[from] std::io::Error),
    /// Encoding failed.
    #[error("snapshot encode failed: {0}")]
    Encode(String),
    /// Decoding failed.
    #[error("snapshot decode failed: {0}")]
    Decode(String),
    /// The file carries an unsupported format version.
    #[error("unsupported snapshot version {found} (supported: {PERSIST_VERSION})")]
    UnsupportedVersion {
        /// Version found in the envelope.
        found: u16,
    },
    /// No snapshot exists to save.
    #[error("truth log has no snapshot to persist")]
    NoSnapshot,
}

/// Versioned on-disk snapshot envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedSnapshot {
    /// Format version; see [`PERSIST_VERSION`].
    pub version: u16,
    /// Id of the last commit folded into the snapshot.
    pub commit_id: CommitId,
    /// Tick of that commit.
    pub tick: Tick,
    /// Wall-clock milliseconds at snapshot time, telemetry only.
    pub timestamp: Option<u64>,
    /// Entity truth states, ordered by id.
    pub entities: Vec<(NetId, EntityTruth)>,
}

impl From<TruthSnapshot> for PersistedSnapshot {
    fn from(snapshot: TruthSnapshot) -> Self {
        Self {
            version: PERSIST_VERSION,
            commit_id: snapshot.commit_id,
            tick: snapshot.tick,
            timestamp: snapshot.timestamp,
            entities: snapshot.entities.into_iter().collect(),
        }
    }
}

impl From<PersistedSnapshot> for TruthSnapshot {
    fn from(persisted: PersistedSnapshot) -> Self {
        Self {
            commit_id: persisted.commit_id,
            tick: persisted.tick,
            timestamp: persisted.timestamp,
            entities: persisted.entities.into_iter().collect(),
        }
    }
}

/// Writes `snapshot` as versioned CBOR.
pub fn save_snapshot<W: Write>(snapshot: TruthSnapshot, writer: W) -> Result<(), PersistError> {
    let persisted = PersistedSnapshot::from(snapshot);
    ciborium::ser::into_writer(&persisted, writer).map_err(|e| PersistError::Encode(e.to_string()))
}

/// Persists the truth log's newest snapshot.
pub fn save_latest<W: Write>(log: &TruthLog, writer: W) -> Result<CommitId, PersistError> {
    let snapshot = log.latest_snapshot().ok_or(PersistError::NoSnapshot)?;
    let commit_id = snapshot.commit_id;
    save_snapshot(snapshot, writer)?;
    Ok(commit_id)
}

/// Reads a versioned CBOR snapshot.
pub fn load_snapshot<R: Read>(reader: R) -> Result<TruthSnapshot, PersistError> {
    let persisted: PersistedSnapshot =
        ciborium::de::from_reader(reader).map_err(|e| PersistError::Decode(e.to_string()))?;
    if persisted.version != PERSIST_VERSION {
        return Err(PersistError::UnsupportedVersion {
            found: persisted.version,
        });
    }
    Ok(persisted.into())
}

/// Restores a truth log from a persisted snapshot stream.
///
/// After this returns, the embedder must replay
/// `commits_since(returned commit id)` from its durable transport before
/// admitting new traffic; the log itself holds no commits newer than the
/// snapshot.
pub fn resume<R: Read>(log: &TruthLog, reader: R) -> Result<CommitId, PersistError> {
    let snapshot = load_snapshot(reader)?;
    let commit_id = snapshot.commit_id;
    log.restore_snapshot(snapshot);
    Ok(commit_id)
}
