//! JavaScript-facing session for the game page.
//!
//! The page fetches the player record and boost list from the backend and
//! hands them over as JSON; remote writes go back out the same way. Accrual,
//! reconciliation and the unload handoff run here.
use chrono::Utc;
use crumbforge_game::{
    Boost, EconomyConfig, EconomySession, PlayerPatch, PlayerRecord, SaveTicket, default_catalog,
    format_compact, reconcile, take_cached_record,
};
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use wasm_bindgen::prelude::*;

use crate::WebError;
use crate::dom::{console_error, performance_now_ms};
use crate::storage::BrowserCache;
use crate::timers::{AccrualMark, IntervalTimer, UnloadHook, interval_ms};

#[wasm_bindgen]
pub struct WebSession {
    inner: Rc<RefCell<EconomySession>>,
    mark: Rc<Cell<AccrualMark>>,
    cache: BrowserCache,
    pending_patch: Option<PlayerPatch>,
    save_ticket: Option<SaveTicket>,
    accrual: Option<IntervalTimer>,
    unload: Option<UnloadHook>,
}

#[wasm_bindgen]
impl WebSession {
    /// Reconcile the fetched player record with the handoff left by the
    /// previous page unload.
    ///
    /// # Errors
    /// Returns an error for unparsable JSON or when `localStorage` is unavailable.
    #[wasm_bindgen(constructor)]
    pub fn new(player_json: &str, boosts_json: &str) -> Result<Self, WebError> {
        let record: PlayerRecord = serde_json::from_str(player_json)?;
        let boosts: Vec<Boost> = serde_json::from_str(boosts_json)?;
        let cache = BrowserCache::local()?;
        let config = EconomyConfig::default();

        let cached = take_cached_record(&cache, &config.cache_key(&record.id));
        let merged = reconcile(record.economy_state(), cached.as_ref());
        let pending_patch = merged
            .must_persist
            .then(|| PlayerPatch::cookies(merged.state.balance()));
        if pending_patch.is_some() {
            log::info!(
                "handoff for {} is ahead of the server; balance {:.2} pending upload",
                record.id,
                merged.state.balance()
            );
        }

        let mut session =
            EconomySession::new(record.id.clone(), merged.state, default_catalog().clone(), config)
                .with_profile(record.shop_profile());
        session.replace_boosts(boosts);

        Ok(Self {
            inner: Rc::new(RefCell::new(session)),
            mark: Rc::new(Cell::new(AccrualMark::default())),
            cache,
            pending_patch,
            save_ticket: None,
            accrual: None,
            unload: None,
        })
    }

    /// Start the accrual timer and register the unload handoff.
    ///
    /// # Errors
    /// Returns an error if the browser refuses either registration.
    pub fn start(&mut self) -> Result<(), WebError> {
        let period = interval_ms(self.inner.borrow().config().tick_interval());
        self.sync_accrual();
        let session = Rc::clone(&self.inner);
        let mark = Rc::clone(&self.mark);
        self.accrual = Some(IntervalTimer::every(period, move || {
            accrue(&session, &mark);
        })?);

        let session = Rc::clone(&self.inner);
        let cache = self.cache.clone();
        self.unload = Some(UnloadHook::install(move || {
            let Ok(mut session) = session.try_borrow_mut() else {
                return;
            };
            if let Err(err) = session.record_terminal(&cache, Utc::now()) {
                console_error(&format!("unload handoff failed: {err}"));
            }
        })?);
        Ok(())
    }

    /// Write the handoff now and detach every timer and listener.
    ///
    /// # Errors
    /// Returns an error if the local cache rejects the write.
    pub fn stop(&mut self) -> Result<(), WebError> {
        self.accrual = None;
        self.unload = None;
        self.mark.set(AccrualMark::default());
        self.inner
            .borrow_mut()
            .record_terminal(&self.cache, Utc::now())?;
        Ok(())
    }

    /// Credit one click; returns the amount credited.
    pub fn click(&self) -> f64 {
        let credited = self.inner.borrow_mut().click(Utc::now());
        crumbforge_game::numbers::u64_to_f64(credited)
    }

    /// Buy one upgrade. Returns the JSON patch the page should send. If that
    /// send fails, the next autosave payload carries the change again.
    ///
    /// # Errors
    /// Returns an error for unknown upgrades or insufficient funds.
    pub fn purchase(&self, upgrade_id: &str) -> Result<Option<String>, WebError> {
        self.inner.borrow_mut().purchase_upgrade(upgrade_id)?;
        self.sync_accrual();
        self.owed_patch()
    }

    /// Claim a free-grant boost. Returns the JSON patch to send.
    ///
    /// # Errors
    /// Returns an error if the grant is unknown, expired, or already satisfied.
    #[wasm_bindgen(js_name = claimFreeGrant)]
    pub fn claim_free_grant(&self, boost_id: &str) -> Result<Option<String>, WebError> {
        self.inner
            .borrow_mut()
            .claim_free_grant(boost_id, Utc::now())?;
        self.owed_patch()
    }

    /// Replace the boost list with the page's latest poll result.
    ///
    /// # Errors
    /// Returns an error for unparsable JSON.
    #[wasm_bindgen(js_name = setBoosts)]
    pub fn set_boosts(&self, boosts_json: &str) -> Result<(), WebError> {
        let boosts: Vec<Boost> = serde_json::from_str(boosts_json)?;
        {
            let mut session = self.inner.borrow_mut();
            session.replace_boosts(boosts);
            session.mark_healthy();
        }
        self.sync_accrual();
        Ok(())
    }

    /// The page could not reach the backend; keep running on local state.
    #[wasm_bindgen(js_name = reportReadFailure)]
    pub fn report_read_failure(&self, reason: &str) {
        self.inner.borrow_mut().mark_degraded(reason);
    }

    /// Balance update owed to the backend after reconciliation, once.
    #[wasm_bindgen(js_name = takePendingPatch)]
    pub fn take_pending_patch(&mut self) -> Option<String> {
        let patch = self.pending_patch.take()?;
        serde_json::to_string(&patch).ok()
    }

    /// Periodic save payload, or `undefined` while the previous save is
    /// still outstanding.
    #[wasm_bindgen(js_name = beginAutosave)]
    pub fn begin_autosave(&mut self) -> Result<Option<String>, WebError> {
        let Some((ticket, patch)) = self.inner.borrow_mut().autosave_due(Utc::now()) else {
            return Ok(None);
        };
        self.save_ticket = Some(ticket);
        Ok(Some(serde_json::to_string(&patch)?))
    }

    /// Report how the save from [`WebSession::begin_autosave`] went.
    #[wasm_bindgen(js_name = finishAutosave)]
    pub fn finish_autosave(&mut self, error: Option<String>) {
        let Some(ticket) = self.save_ticket.take() else {
            log::debug!("autosave result reported with no save outstanding");
            return;
        };
        let result = error.map_or(Ok(()), |message| {
            Err(crumbforge_game::PersistenceError::Write(message))
        });
        self.inner.borrow_mut().autosave_finished(ticket, result);
    }

    #[wasm_bindgen(js_name = balanceLabel)]
    pub fn balance_label(&self) -> String {
        format_compact(self.inner.borrow().state().balance())
    }

    /// Full snapshot as JSON for the stats panel.
    ///
    /// # Errors
    /// Returns an error if serialization fails.
    #[wasm_bindgen(js_name = snapshotJson)]
    pub fn snapshot_json(&self) -> Result<String, WebError> {
        Ok(serde_json::to_string(
            &self.inner.borrow().snapshot(Utc::now()),
        )?)
    }
}

impl WebSession {
    /// Start or stop measuring passive accrual to match the current rate.
    fn sync_accrual(&self) {
        let Some(now_ms) = performance_now_ms() else {
            return;
        };
        let generating = self.inner.borrow().rates(Utc::now()).cps > 0;
        let mut mark = self.mark.get();
        mark.sync(generating, now_ms);
        self.mark.set(mark);
    }

    fn owed_patch(&self) -> Result<Option<String>, WebError> {
        let Some((_, patch)) = self.inner.borrow().pending_sync() else {
            return Ok(None);
        };
        Ok(Some(serde_json::to_string(&patch)?))
    }
}

/// One accrual timer fire: credit the time since the previous reading.
fn accrue(session: &RefCell<EconomySession>, mark: &Cell<AccrualMark>) {
    let Ok(mut session) = session.try_borrow_mut() else {
        return;
    };
    let Some(now_ms) = performance_now_ms() else {
        return;
    };
    let now = Utc::now();
    let generating = session.rates(now).cps > 0;
    let mut current = mark.get();
    if let Some(elapsed) = current.fire(generating, now_ms) {
        session.advance(elapsed, now);
    }
    mark.set(current);
}
