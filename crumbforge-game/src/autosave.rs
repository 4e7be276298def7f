//! Periodic remote saves with drop-on-overlap, plus the synchronous terminal
//! write to the local cache.
//!
//! The scheduler is a plain state machine: the owner asks it for a write on
//! each timer fire and reports the outcome back. It never holds more than one
//! outstanding ticket.
use serde::{Deserialize, Serialize};

use crate::accrual::EffectiveRates;
use crate::constants::LOG_TARGET_AUTOSAVE;
use crate::reconcile::{ReconcileError, ReconciliationRecord, store_record};
use crate::remote::{PersistenceError, PlayerPatch};
use crate::storage::LocalCache;

/// What a periodic save pushes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SaveSnapshot {
    pub balance: f64,
    pub rates: EffectiveRates,
}

impl SaveSnapshot {
    #[must_use]
    pub const fn to_patch(self) -> PlayerPatch {
        PlayerPatch::balance(self.balance, self.rates)
    }
}

/// Identifies one issued write so late completions can be matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SaveTicket(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AutosaveStats {
    pub issued: u64,
    pub dropped: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub terminal_writes: u64,
}

#[derive(Debug, Default)]
pub struct AutosaveScheduler {
    in_flight: Option<SaveTicket>,
    next_ticket: u64,
    stats: AutosaveStats,
}

impl AutosaveScheduler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    #[must_use]
    pub const fn stats(&self) -> AutosaveStats {
        self.stats
    }

    /// Timer fired. Returns the write to issue, or `None` when the previous
    /// write is still outstanding (this fire is dropped, not queued).
    pub fn on_timer(&mut self, snapshot: SaveSnapshot) -> Option<(SaveTicket, PlayerPatch)> {
        if let Some(ticket) = self.in_flight {
            self.stats.dropped += 1;
            log::debug!(
                target: LOG_TARGET_AUTOSAVE,
                "autosave skipped; write {} still in flight",
                ticket.0
            );
            return None;
        }
        let ticket = SaveTicket(self.next_ticket);
        self.next_ticket += 1;
        self.in_flight = Some(ticket);
        self.stats.issued += 1;
        log::debug!(
            target: LOG_TARGET_AUTOSAVE,
            "autosave {} issued (balance {:.2})",
            ticket.0,
            snapshot.balance
        );
        Some((ticket, snapshot.to_patch()))
    }

    /// Record the outcome of `ticket`. A failure is not retried; the next
    /// timer fire sends fresher values anyway.
    pub fn complete(&mut self, ticket: SaveTicket, result: Result<(), PersistenceError>) {
        if self.in_flight != Some(ticket) {
            log::debug!(target: LOG_TARGET_AUTOSAVE, "ignoring stale completion {}", ticket.0);
            return;
        }
        self.in_flight = None;
        match result {
            Ok(()) => self.stats.succeeded += 1,
            Err(err) => {
                self.stats.failed += 1;
                log::warn!(target: LOG_TARGET_AUTOSAVE, "autosave {} failed: {err}", ticket.0);
            }
        }
    }

    /// Pre-termination hook: write `record` to the local cache synchronously.
    /// Independent of any remote write still in flight.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be encoded or the cache rejects it.
    pub fn write_terminal(
        &mut self,
        cache: &impl LocalCache,
        key: &str,
        record: &ReconciliationRecord,
    ) -> Result<(), ReconcileError> {
        store_record(cache, key, record)?;
        self.stats.terminal_writes += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::take_cached_record;
    use crate::storage::MemoryCache;
    use std::collections::BTreeMap;

    fn snapshot(balance: f64) -> SaveSnapshot {
        SaveSnapshot {
            balance,
            rates: EffectiveRates { cpc: 1, cps: 2 },
        }
    }

    #[test]
    fn overlapping_fires_are_dropped() {
        let mut scheduler = AutosaveScheduler::new();
        let (ticket, patch) = scheduler.on_timer(snapshot(10.0)).unwrap();
        assert_eq!(patch.cookies, Some(10.0));
        assert_eq!(patch.cookies_per_second, Some(2));
        assert!(scheduler.on_timer(snapshot(12.0)).is_none());
        assert!(scheduler.on_timer(snapshot(14.0)).is_none());
        assert!(scheduler.in_flight());

        scheduler.complete(ticket, Ok(()));
        assert!(!scheduler.in_flight());
        let (_, patch) = scheduler.on_timer(snapshot(16.0)).unwrap();
        assert_eq!(patch.cookies, Some(16.0));

        let stats = scheduler.stats();
        assert_eq!(stats.issued, 2);
        assert_eq!(stats.dropped, 2);
        assert_eq!(stats.succeeded, 1);
    }

    #[test]
    fn failure_frees_the_slot_and_stale_completions_are_ignored() {
        let mut scheduler = AutosaveScheduler::new();
        let (first, _) = scheduler.on_timer(snapshot(1.0)).unwrap();
        scheduler.complete(first, Err(PersistenceError::Write("timeout".into())));
        let (second, _) = scheduler.on_timer(snapshot(2.0)).unwrap();
        scheduler.complete(first, Ok(()));
        assert!(scheduler.in_flight());
        scheduler.complete(second, Ok(()));
        assert_eq!(scheduler.stats().failed, 1);
        assert_eq!(scheduler.stats().succeeded, 1);
    }

    #[test]
    fn terminal_write_lands_in_cache_even_with_remote_outstanding() {
        let cache = MemoryCache::new();
        let mut scheduler = AutosaveScheduler::new();
        let _outstanding = scheduler.on_timer(snapshot(5.0)).unwrap();
        let record = ReconciliationRecord {
            balance: 7.0,
            upgrade_counts: BTreeMap::new(),
            rates: EffectiveRates { cpc: 1, cps: 2 },
        };
        scheduler.write_terminal(&cache, "k", &record).unwrap();
        assert_eq!(scheduler.stats().terminal_writes, 1);
        assert_eq!(take_cached_record(&cache, "k"), Some(record));
    }
}
