//! Tokio driver for one [`EconomySession`].
//!
//! A single task owns the session and multiplexes the accrual ticker, the
//! autosave ticker, the boost poller and the command channel. Remote calls are
//! spawned and report back over a completion channel, so a slow backend never
//! delays clicks or ticks.
use chrono::Utc;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, Interval, MissedTickBehavior, interval_at};

use crate::autosave::SaveTicket;
use crate::boost::Boost;
use crate::config::ConfigError;
use crate::constants::LOG_TARGET_SESSION;
use crate::reconcile::ReconcileError;
use crate::remote::{PersistenceError, PlayerRecord, PlayerStore};
use crate::session::{EconomySession, SessionSnapshot, SyncStatus};
use crate::shop::{ShopError, ShopItem};
use crate::state::EconomyError;
use crate::storage::LocalCache;

const COMMAND_BUFFER: usize = 64;
const COMPLETION_BUFFER: usize = 16;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session task has stopped")]
    Closed,
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Economy(#[from] EconomyError),
    #[error(transparent)]
    Shop(#[from] ShopError),
    #[error("terminal write failed: {0}")]
    Terminal(#[from] ReconcileError),
}

enum SessionMessage {
    Click(oneshot::Sender<u64>),
    Purchase {
        upgrade_id: String,
        reply: oneshot::Sender<Result<u64, EconomyError>>,
    },
    BuyItem {
        item: ShopItem,
        reply: oneshot::Sender<Result<(), ShopError>>,
    },
    ClaimGrant {
        boost_id: String,
        reply: oneshot::Sender<Result<(), ShopError>>,
    },
    Snapshot(oneshot::Sender<SessionSnapshot>),
    Shutdown(oneshot::Sender<Result<SessionSnapshot, ReconcileError>>),
}

enum Completion {
    Saved(SaveTicket, Result<(), PersistenceError>),
    Patched(u64, Result<(), PersistenceError>),
    Boosts(Result<Vec<Boost>, PersistenceError>),
    Player(Result<Option<PlayerRecord>, PersistenceError>),
}

/// Caller side of a running session.
pub struct SessionHandle {
    sender: mpsc::Sender<SessionMessage>,
    status: watch::Receiver<SyncStatus>,
    task: JoinHandle<()>,
}

impl SessionHandle {
    /// Move `session` onto a new task. Dropping the handle without calling
    /// [`SessionHandle::shutdown`] still performs the terminal cache write.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Config`] if the session's config has a zero
    /// cadence or an empty cache prefix.
    pub fn spawn<C>(
        session: EconomySession,
        store: Arc<dyn PlayerStore>,
        cache: C,
    ) -> Result<Self, SessionError>
    where
        C: LocalCache + Send + 'static,
    {
        session.config().validate()?;
        let (sender, messages) = mpsc::channel(COMMAND_BUFFER);
        let (completions_tx, completions_rx) = mpsc::channel(COMPLETION_BUFFER);
        let (status_tx, status) = watch::channel(session.status().clone());
        let event_loop = SessionEventLoop {
            session,
            store,
            cache,
            messages,
            completions_tx,
            completions_rx,
            status_tx,
            accruing: false,
            polling: false,
            fetching_player: false,
        };
        let task = tokio::spawn(event_loop.run());
        Ok(Self {
            sender,
            status,
            task,
        })
    }

    /// Credit one click; returns the amount credited.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Closed`] once the session has stopped.
    pub async fn click(&self) -> Result<u64, SessionError> {
        self.request(SessionMessage::Click).await
    }

    /// Buy the next unit of `upgrade_id`; returns the price paid.
    ///
    /// # Errors
    ///
    /// Returns the purchase error, or [`SessionError::Closed`].
    pub async fn purchase(&self, upgrade_id: &str) -> Result<u64, SessionError> {
        let upgrade_id = upgrade_id.to_string();
        Ok(self
            .request(|reply| SessionMessage::Purchase { upgrade_id, reply })
            .await??)
    }

    /// # Errors
    ///
    /// Returns the shop error, or [`SessionError::Closed`].
    pub async fn buy_item(&self, item: ShopItem) -> Result<(), SessionError> {
        Ok(self
            .request(|reply| SessionMessage::BuyItem { item, reply })
            .await??)
    }

    /// # Errors
    ///
    /// Returns the shop error, or [`SessionError::Closed`].
    pub async fn claim_free_grant(&self, boost_id: &str) -> Result<(), SessionError> {
        let boost_id = boost_id.to_string();
        Ok(self
            .request(|reply| SessionMessage::ClaimGrant { boost_id, reply })
            .await??)
    }

    /// # Errors
    ///
    /// Returns [`SessionError::Closed`] once the session has stopped.
    pub async fn snapshot(&self) -> Result<SessionSnapshot, SessionError> {
        self.request(SessionMessage::Snapshot).await
    }

    /// Watch the backend sync status.
    #[must_use]
    pub fn status(&self) -> watch::Receiver<SyncStatus> {
        self.status.clone()
    }

    /// Write the terminal record to the local cache, then stop every timer.
    /// Returns the final snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Terminal`] if the cache write failed (the
    /// session is stopped regardless), or [`SessionError::Closed`].
    pub async fn shutdown(self) -> Result<SessionSnapshot, SessionError> {
        let result = self.request(SessionMessage::Shutdown).await;
        let Self { sender, task, .. } = self;
        drop(sender);
        if let Err(err) = task.await {
            log::warn!(target: LOG_TARGET_SESSION, "session task ended abnormally: {err}");
        }
        Ok(result??)
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> SessionMessage,
    ) -> Result<T, SessionError> {
        let (reply, response) = oneshot::channel();
        self.sender
            .send(build(reply))
            .await
            .map_err(|_| SessionError::Closed)?;
        response.await.map_err(|_| SessionError::Closed)
    }
}

struct SessionEventLoop<C> {
    session: EconomySession,
    store: Arc<dyn PlayerStore>,
    cache: C,
    messages: mpsc::Receiver<SessionMessage>,
    completions_tx: mpsc::Sender<Completion>,
    completions_rx: mpsc::Receiver<Completion>,
    status_tx: watch::Sender<SyncStatus>,
    accruing: bool,
    polling: bool,
    fetching_player: bool,
}

fn ticker(period: Duration) -> Interval {
    let mut interval = interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval
}

impl<C: LocalCache> SessionEventLoop<C> {
    async fn run(mut self) {
        let config = self.session.config().clone();
        let mut accrual = ticker(config.tick_interval());
        let mut autosave = ticker(config.autosave_interval());
        let mut poll = ticker(config.boost_poll_interval());
        self.refresh_accrual(&mut accrual);

        log::info!(
            target: LOG_TARGET_SESSION,
            "session loop started for {} (tick {:?}, autosave {:?}, poll {:?})",
            self.session.player_id(),
            config.tick_interval(),
            config.autosave_interval(),
            config.boost_poll_interval()
        );

        loop {
            tokio::select! {
                _ = accrual.tick(), if self.accruing => {
                    self.session.tick(Instant::now().into_std(), Utc::now());
                    self.refresh_accrual(&mut accrual);
                }
                _ = autosave.tick() => self.start_autosave(),
                _ = poll.tick(), if !self.polling => self.start_boost_poll(),
                Some(done) = self.completions_rx.recv() => {
                    self.handle_completion(done, &mut accrual);
                }
                message = self.messages.recv() => match message {
                    Some(SessionMessage::Shutdown(reply)) => {
                        let _ = reply.send(self.terminate());
                        break;
                    }
                    Some(message) => self.handle_message(message, &mut accrual),
                    None => {
                        if let Err(err) = self.terminate() {
                            log::warn!(target: LOG_TARGET_SESSION, "terminal write failed: {err}");
                        }
                        break;
                    }
                },
            }
        }
        log::info!(target: LOG_TARGET_SESSION, "session loop stopped for {}", self.session.player_id());
    }

    fn refresh_accrual(&mut self, accrual: &mut Interval) {
        let was_accruing = self.accruing;
        self.accruing = self
            .session
            .sync_accrual(Instant::now().into_std(), Utc::now());
        if self.accruing && !was_accruing {
            accrual.reset();
        }
    }

    fn handle_message(&mut self, message: SessionMessage, accrual: &mut Interval) {
        let now = Utc::now();
        match message {
            SessionMessage::Click(reply) => {
                let _ = reply.send(self.session.click(now));
            }
            SessionMessage::Purchase { upgrade_id, reply } => {
                let result = self.session.purchase_upgrade(&upgrade_id);
                if result.is_ok() {
                    self.push_pending();
                    self.refresh_accrual(accrual);
                }
                let _ = reply.send(result);
            }
            SessionMessage::BuyItem { item, reply } => {
                let result = self.session.buy_shop_item(&item).map(|_| self.push_pending());
                let _ = reply.send(result);
            }
            SessionMessage::ClaimGrant { boost_id, reply } => {
                let result = self
                    .session
                    .claim_free_grant(&boost_id, now)
                    .map(|_| self.push_pending());
                let _ = reply.send(result);
            }
            SessionMessage::Snapshot(reply) => {
                let _ = reply.send(self.session.snapshot(now));
            }
            SessionMessage::Shutdown(_) => {}
        }
    }

    fn handle_completion(&mut self, done: Completion, accrual: &mut Interval) {
        match done {
            Completion::Saved(ticket, result) => self.session.autosave_finished(ticket, result),
            Completion::Patched(revision, Ok(())) => self.session.sync_acknowledged(revision),
            Completion::Patched(_, Err(err)) => {
                log::warn!(target: LOG_TARGET_SESSION, "player update failed: {err}");
            }
            Completion::Player(result) => {
                self.fetching_player = false;
                match result {
                    Ok(Some(record)) => {
                        self.session.adopt_server_record(&record);
                        self.refresh_accrual(accrual);
                    }
                    Ok(None) => {
                        let player_id = self.session.player_id().to_string();
                        self.session
                            .mark_degraded(PersistenceError::NotFound(player_id).to_string());
                    }
                    Err(err) => self.session.mark_degraded(err.to_string()),
                }
                self.publish_status();
            }
            Completion::Boosts(result) => {
                self.polling = false;
                match result {
                    Ok(boosts) => {
                        self.session.replace_boosts(boosts);
                        self.session.mark_healthy();
                        self.refresh_accrual(accrual);
                    }
                    Err(err) => self.session.mark_degraded(err.to_string()),
                }
                self.publish_status();
            }
        }
    }

    fn start_autosave(&mut self) {
        let Some((ticket, patch)) = self.session.autosave_due(Utc::now()) else {
            return;
        };
        let store = Arc::clone(&self.store);
        let player_id = self.session.player_id().to_string();
        let done = self.completions_tx.clone();
        tokio::spawn(async move {
            let result = store.update_player(&player_id, patch).await;
            let _ = done.send(Completion::Saved(ticket, result)).await;
        });
    }

    fn start_boost_poll(&mut self) {
        self.polling = true;
        let store = Arc::clone(&self.store);
        let done = self.completions_tx.clone();
        tokio::spawn(async move {
            let result = store.list_active_boosts().await;
            let _ = done.send(Completion::Boosts(result)).await;
        });
        if !self.session.player_loaded() && !self.fetching_player {
            self.start_player_fetch();
        }
    }

    /// Retry the read a degraded start missed.
    fn start_player_fetch(&mut self) {
        self.fetching_player = true;
        let store = Arc::clone(&self.store);
        let player_id = self.session.player_id().to_string();
        let done = self.completions_tx.clone();
        tokio::spawn(async move {
            let result = store.fetch_player(&player_id).await;
            let _ = done.send(Completion::Player(result)).await;
        });
    }

    /// Send upgrade and shop changes right away. A failure leaves them owed;
    /// the next autosave carries them again.
    fn push_pending(&self) {
        let Some((revision, patch)) = self.session.pending_sync() else {
            return;
        };
        let store = Arc::clone(&self.store);
        let player_id = self.session.player_id().to_string();
        let done = self.completions_tx.clone();
        tokio::spawn(async move {
            let result = store.update_player(&player_id, patch).await;
            let _ = done.send(Completion::Patched(revision, result)).await;
        });
    }

    fn publish_status(&self) {
        let status = self.session.status().clone();
        self.status_tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }

    fn terminate(&mut self) -> Result<SessionSnapshot, ReconcileError> {
        let now = Utc::now();
        self.session.record_terminal(&self.cache, now)?;
        Ok(self.session.snapshot(now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{UpgradeCatalog, UpgradeCatalogEntry};
    use crate::config::EconomyConfig;
    use crate::reconcile::take_cached_record;
    use crate::remote::{MemoryPlayerStore, PlayerPatch};
    use crate::state::PlayerEconomyState;
    use crate::storage::MemoryCache;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::sleep;

    fn catalog() -> UpgradeCatalog {
        UpgradeCatalog::from_entries(vec![UpgradeCatalogEntry {
            id: "grandma".into(),
            name: "Grandma".into(),
            cpc_bonus: 0.0,
            cps_bonus: 5.0,
            base_cost: 1.0,
            cost_growth: 1.0,
        }])
    }

    fn session(grandmas: u32) -> EconomySession {
        let counts = if grandmas == 0 {
            HashMap::new()
        } else {
            HashMap::from([("grandma".to_string(), grandmas)])
        };
        EconomySession::new(
            "p1",
            PlayerEconomyState::new(0.0, counts),
            catalog(),
            EconomyConfig::default(),
        )
    }

    fn store() -> MemoryPlayerStore {
        let store = MemoryPlayerStore::new();
        store.insert_player(PlayerRecord::new("p1", "ada"));
        store
    }

    struct SlowStore {
        inner: MemoryPlayerStore,
        delay: Duration,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    #[async_trait]
    impl PlayerStore for SlowStore {
        async fn fetch_player(
            &self,
            player_id: &str,
        ) -> Result<Option<PlayerRecord>, PersistenceError> {
            self.inner.fetch_player(player_id).await
        }

        async fn update_player(
            &self,
            player_id: &str,
            patch: PlayerPatch,
        ) -> Result<(), PersistenceError> {
            let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(current, Ordering::SeqCst);
            sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.inner.update_player(player_id, patch).await
        }

        async fn list_active_boosts(&self) -> Result<Vec<Boost>, PersistenceError> {
            self.inner.list_active_boosts().await
        }
    }

    #[tokio::test]
    async fn zero_cadence_is_rejected_before_spawning() {
        let config = EconomyConfig {
            autosave_interval_ms: 0,
            ..EconomyConfig::default()
        };
        let session = EconomySession::new("p1", PlayerEconomyState::default(), catalog(), config);
        let spawned = SessionHandle::spawn(session, Arc::new(store()), MemoryCache::new());
        assert!(matches!(spawned, Err(SessionError::Config(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn passive_accrual_follows_elapsed_time() {
        let handle =
            SessionHandle::spawn(session(1), Arc::new(store()), MemoryCache::new()).unwrap();
        sleep(Duration::from_millis(3_500)).await;
        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.rates.cps, 5);
        assert!((snapshot.balance - 15.0).abs() < 1e-9);
        handle.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn accrual_resumes_after_first_generator() {
        let handle =
            SessionHandle::spawn(session(0), Arc::new(store()), MemoryCache::new()).unwrap();
        sleep(Duration::from_secs(5)).await;
        assert_eq!(handle.click().await.unwrap(), 1);
        assert!((handle.snapshot().await.unwrap().balance - 1.0).abs() < f64::EPSILON);

        assert_eq!(handle.purchase("grandma").await.unwrap(), 1);
        sleep(Duration::from_millis(2_500)).await;
        assert!((handle.snapshot().await.unwrap().balance - 10.0).abs() < 1e-9);
        handle.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn slow_backend_never_sees_overlapping_autosaves() {
        let store = Arc::new(SlowStore {
            inner: store(),
            delay: Duration::from_secs(7),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        });
        let handle =
            SessionHandle::spawn(session(1), store.clone(), MemoryCache::new()).unwrap();
        sleep(Duration::from_secs(20)).await;

        let stats = handle.snapshot().await.unwrap().autosave;
        assert_eq!(store.max_in_flight.load(Ordering::SeqCst), 1);
        assert!(stats.issued >= 2);
        assert!(stats.dropped >= 3);
        handle.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_writes_cache_and_stops_timers() {
        let store = store();
        let cache = MemoryCache::new();
        let handle =
            SessionHandle::spawn(session(0), Arc::new(store.clone()), cache.clone()).unwrap();
        for _ in 0..3 {
            handle.click().await.unwrap();
        }
        let last = handle.shutdown().await.unwrap();
        assert!((last.balance - 3.0).abs() < f64::EPSILON);
        assert_eq!(last.autosave.terminal_writes, 1);

        let writes = store.updates().len();
        sleep(Duration::from_secs(30)).await;
        assert_eq!(store.updates().len(), writes);

        let record = take_cached_record(&cache, "crumbforge.reconcile.p1").unwrap();
        assert!((record.balance - 3.0).abs() < f64::EPSILON);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_handle_still_writes_terminal_record() {
        let cache = MemoryCache::new();
        let handle =
            SessionHandle::spawn(session(0), Arc::new(store()), cache.clone()).unwrap();
        handle.click().await.unwrap();
        drop(handle);
        sleep(Duration::from_millis(10)).await;
        assert!(cache.contains("crumbforge.reconcile.p1"));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_boost_poll_degrades_until_next_success() {
        let store = store();
        let handle =
            SessionHandle::spawn(session(0), Arc::new(store.clone()), MemoryCache::new()).unwrap();
        let status = handle.status();

        store.set_fail_reads(true);
        sleep(Duration::from_millis(10_500)).await;
        assert!(status.borrow().is_degraded());
        assert!(handle.snapshot().await.unwrap().status.is_degraded());

        store.set_fail_reads(false);
        sleep(Duration::from_secs(10)).await;
        assert_eq!(*status.borrow(), SyncStatus::Healthy);
        handle.shutdown().await.unwrap();
    }
}
