#![forbid(unsafe_code)]
//! Browser shell for the Crumbforge economy: `localStorage` handoff cache,
//! the `beforeunload` terminal write and `setInterval` accrual.
#[cfg(target_arch = "wasm32")]
use wasm_bindgen::prelude::*;

use crumbforge_game::{EconomyError, ReconcileError, ShopError};

pub mod dom;
pub mod session;
pub mod storage;
pub mod timers;

pub use session::WebSession;
pub use storage::BrowserCache;

#[derive(Debug, thiserror::Error)]
pub enum WebError {
    #[error("browser window unavailable")]
    NoWindow,
    #[error("localStorage unavailable: {0}")]
    StorageUnavailable(String),
    #[error("javascript error: {0}")]
    Js(String),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
    #[error(transparent)]
    Economy(#[from] EconomyError),
    #[error(transparent)]
    Shop(#[from] ShopError),
}

impl From<WebError> for wasm_bindgen::JsValue {
    fn from(err: WebError) -> Self {
        Self::from_str(&err.to_string())
    }
}

#[cfg(target_arch = "wasm32")]
#[wasm_bindgen(start)]
pub fn start() {
    #[cfg(feature = "console_error_panic_hook")]
    console_error_panic_hook::set_once();
}
