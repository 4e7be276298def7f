//! Backend wrapper that injects latency and failures from a seeded RNG.
use async_trait::async_trait;
use crumbforge_game::{Boost, PersistenceError, PlayerPatch, PlayerRecord, PlayerStore};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlakyStats {
    pub calls: u64,
    pub injected_failures: u64,
}

#[derive(Debug, Clone)]
pub struct FlakyStore<S> {
    inner: S,
    rng: Arc<Mutex<ChaCha8Rng>>,
    failure_rate: f64,
    latency: Duration,
    calls: Arc<AtomicU64>,
    injected_failures: Arc<AtomicU64>,
}

impl<S: PlayerStore> FlakyStore<S> {
    /// `failure_rate` is clamped to `[0, 1]`; each call sleeps between half
    /// and one and a half times `latency`.
    pub fn new(inner: S, seed: u64, failure_rate: f64, latency: Duration) -> Self {
        let failure_rate = if failure_rate.is_finite() {
            failure_rate.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Self {
            inner,
            rng: Arc::new(Mutex::new(ChaCha8Rng::seed_from_u64(seed))),
            failure_rate,
            latency,
            calls: Arc::new(AtomicU64::new(0)),
            injected_failures: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn stats(&self) -> FlakyStats {
        FlakyStats {
            calls: self.calls.load(Ordering::SeqCst),
            injected_failures: self.injected_failures.load(Ordering::SeqCst),
        }
    }

    /// Sleep for this call's latency; `true` when the call should fail.
    async fn delay_and_roll(&self) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let (delay, fail) = {
            let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
            let delay = if self.latency.is_zero() {
                Duration::ZERO
            } else {
                self.latency.mul_f64(rng.gen_range(0.5..1.5))
            };
            (delay, rng.gen_bool(self.failure_rate))
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if fail {
            self.injected_failures.fetch_add(1, Ordering::SeqCst);
        }
        fail
    }
}

#[async_trait]
impl<S: PlayerStore> PlayerStore for FlakyStore<S> {
    async fn fetch_player(&self, player_id: &str) -> Result<Option<PlayerRecord>, PersistenceError> {
        if self.delay_and_roll().await {
            return Err(PersistenceError::Read("injected read failure".to_string()));
        }
        self.inner.fetch_player(player_id).await
    }

    async fn update_player(
        &self,
        player_id: &str,
        patch: PlayerPatch,
    ) -> Result<(), PersistenceError> {
        if self.delay_and_roll().await {
            return Err(PersistenceError::Write("injected write failure".to_string()));
        }
        self.inner.update_player(player_id, patch).await
    }

    async fn list_active_boosts(&self) -> Result<Vec<Boost>, PersistenceError> {
        if self.delay_and_roll().await {
            return Err(PersistenceError::Read("injected read failure".to_string()));
        }
        self.inner.list_active_boosts().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crumbforge_game::MemoryPlayerStore;

    #[tokio::test(start_paused = true)]
    async fn always_failing_store_never_reaches_the_backend() {
        let backend = MemoryPlayerStore::new();
        backend.insert_player(PlayerRecord::new("p1", "ada"));
        let flaky = FlakyStore::new(backend.clone(), 3, 1.0, Duration::from_millis(200));

        let started = tokio::time::Instant::now();
        assert!(flaky.fetch_player("p1").await.is_err());
        assert!(
            flaky
                .update_player("p1", PlayerPatch::cookies(5.0))
                .await
                .is_err()
        );
        assert!(started.elapsed() >= Duration::from_millis(200));
        assert!(backend.updates().is_empty());
        assert_eq!(
            flaky.stats(),
            FlakyStats {
                calls: 2,
                injected_failures: 2
            }
        );
    }

    #[tokio::test]
    async fn zero_rate_passes_through() {
        let backend = MemoryPlayerStore::new();
        backend.insert_player(PlayerRecord::new("p1", "ada"));
        let flaky = FlakyStore::new(backend.clone(), 3, f64::NAN, Duration::ZERO);

        assert!(flaky.fetch_player("p1").await.unwrap().is_some());
        flaky
            .update_player("p1", PlayerPatch::cookies(5.0))
            .await
            .unwrap();
        assert_eq!(backend.updates().len(), 1);
        assert_eq!(flaky.stats().injected_failures, 0);
    }
}
