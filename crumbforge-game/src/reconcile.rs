//! Session-start merge of the server balance with the record cached at the
//! previous session's termination.
//!
//! The cached record is a single-use handoff: it is deleted as soon as it is
//! read, whether or not it parsed. The tie-break is "higher balance wins";
//! every other field comes from the server.
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::hash::Hasher;
use thiserror::Error;
use twox_hash::XxHash64;

use crate::accrual::EffectiveRates;
use crate::constants::{LOG_TARGET_RECONCILE, RECORD_CHECKSUM_SEED, RECORD_ENVELOPE_VERSION};
use crate::state::PlayerEconomyState;
use crate::storage::{CacheError, LocalCache};

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("malformed cache record: {0}")]
    MalformedCacheRecord(String),
    #[error("failed to encode cache record: {0}")]
    Encode(#[from] serde_json::Error),
    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// Snapshot written at termination and consumed once at the next session start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationRecord {
    pub balance: f64,
    #[serde(default)]
    pub upgrade_counts: BTreeMap<String, u32>,
    #[serde(default)]
    pub rates: EffectiveRates,
}

impl ReconciliationRecord {
    #[must_use]
    pub fn capture(state: &PlayerEconomyState, rates: EffectiveRates) -> Self {
        Self {
            balance: state.balance(),
            upgrade_counts: state
                .upgrade_counts
                .iter()
                .map(|(id, count)| (id.clone(), *count))
                .collect(),
            rates,
        }
    }

    /// Rebuild an economy state from the snapshot alone (used when the server
    /// cannot be reached at session start).
    #[must_use]
    pub fn to_state(&self) -> PlayerEconomyState {
        let counts: HashMap<String, u32> = self
            .upgrade_counts
            .iter()
            .map(|(id, count)| (id.clone(), *count))
            .collect();
        PlayerEconomyState::new(self.balance, counts)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct RecordEnvelope {
    v: u32,
    checksum: String,
    record: ReconciliationRecord,
}

fn checksum(record: &ReconciliationRecord) -> Result<String, serde_json::Error> {
    let canonical = serde_json::to_vec(record)?;
    let mut hasher = XxHash64::with_seed(RECORD_CHECKSUM_SEED);
    hasher.write(&canonical);
    Ok(format!("{:016x}", hasher.finish()))
}

/// Serialize a record into its checksummed envelope.
///
/// # Errors
///
/// Returns an error if the record cannot be serialized.
pub fn encode_record(record: &ReconciliationRecord) -> Result<Vec<u8>, ReconcileError> {
    let envelope = RecordEnvelope {
        v: RECORD_ENVELOPE_VERSION,
        checksum: checksum(record)?,
        record: record.clone(),
    };
    Ok(serde_json::to_vec(&envelope)?)
}

/// Parse and verify an envelope produced by [`encode_record`].
///
/// # Errors
///
/// Returns [`ReconcileError::MalformedCacheRecord`] for unparsable, truncated,
/// tampered, wrong-version, or out-of-range records.
pub fn decode_record(bytes: &[u8]) -> Result<ReconciliationRecord, ReconcileError> {
    let envelope: RecordEnvelope = serde_json::from_slice(bytes)
        .map_err(|err| ReconcileError::MalformedCacheRecord(err.to_string()))?;
    if envelope.v != RECORD_ENVELOPE_VERSION {
        return Err(ReconcileError::MalformedCacheRecord(format!(
            "unsupported version {}",
            envelope.v
        )));
    }
    let expected = checksum(&envelope.record)?;
    if expected != envelope.checksum {
        return Err(ReconcileError::MalformedCacheRecord(
            "checksum mismatch".to_string(),
        ));
    }
    let balance = envelope.record.balance;
    if !balance.is_finite() || balance < 0.0 {
        return Err(ReconcileError::MalformedCacheRecord(format!(
            "balance out of range: {balance}"
        )));
    }
    Ok(envelope.record)
}

/// Write the termination snapshot under `key`.
///
/// # Errors
///
/// Returns an error if encoding fails or the cache rejects the write.
pub fn store_record(
    cache: &impl LocalCache,
    key: &str,
    record: &ReconciliationRecord,
) -> Result<(), ReconcileError> {
    let bytes = encode_record(record)?;
    cache.set(key, &bytes)?;
    log::debug!(target: LOG_TARGET_RECONCILE, "stored handoff record under {key}");
    Ok(())
}

/// Read and delete the handoff record under `key`.
///
/// Absent, unreadable and malformed records all yield `None`; the key is
/// removed in every case so a bad record is never replayed.
pub fn take_cached_record(cache: &impl LocalCache, key: &str) -> Option<ReconciliationRecord> {
    let bytes = match cache.get(key) {
        Ok(Some(bytes)) => bytes,
        Ok(None) => return None,
        Err(err) => {
            log::warn!(target: LOG_TARGET_RECONCILE, "cache read for {key} failed: {err}");
            discard(cache, key);
            return None;
        }
    };
    discard(cache, key);
    match decode_record(&bytes) {
        Ok(record) => Some(record),
        Err(err) => {
            log::warn!(target: LOG_TARGET_RECONCILE, "ignoring cached record {key}: {err}");
            None
        }
    }
}

fn discard(cache: &impl LocalCache, key: &str) {
    if let Err(err) = cache.delete(key) {
        log::warn!(target: LOG_TARGET_RECONCILE, "could not clear cached record {key}: {err}");
    }
}

/// Outcome of merging server and cached state.
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciled {
    pub state: PlayerEconomyState,
    /// The cached balance was strictly higher, so the server is stale and must
    /// be updated.
    pub must_persist: bool,
}

/// Merge `server` with an optional cached record.
#[must_use]
pub fn reconcile(server: PlayerEconomyState, cached: Option<&ReconciliationRecord>) -> Reconciled {
    let Some(record) = cached else {
        return Reconciled {
            state: server,
            must_persist: false,
        };
    };
    let must_persist = record.balance > server.balance();
    let mut state = server;
    if must_persist {
        log::info!(
            target: LOG_TARGET_RECONCILE,
            "cached balance {} exceeds server balance {}; keeping cached",
            record.balance,
            state.balance()
        );
        state.raise_balance_to(record.balance);
    }
    Reconciled {
        state,
        must_persist,
    }
}
