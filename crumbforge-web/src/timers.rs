//! Page-level hooks: `setInterval` timers and the `beforeunload` listener.
//! Both unregister themselves on drop.
use std::time::Duration;
use wasm_bindgen::JsCast;
use wasm_bindgen::closure::Closure;
use web_sys::{BeforeUnloadEvent, Window};

use crate::WebError;
use crate::dom::{js_error_message, window};

const UNLOAD_EVENT: &str = "beforeunload";

pub struct IntervalTimer {
    window: Window,
    handle: i32,
    _callback: Closure<dyn FnMut()>,
}

impl IntervalTimer {
    /// Call `callback` every `period_ms` until the timer is dropped.
    ///
    /// # Errors
    /// Returns an error if the browser refuses to schedule the interval.
    pub fn every(period_ms: i32, callback: impl FnMut() + 'static) -> Result<Self, WebError> {
        let window = window()?;
        let callback = Closure::<dyn FnMut()>::new(callback);
        let handle = window
            .set_interval_with_callback_and_timeout_and_arguments_0(
                callback.as_ref().unchecked_ref(),
                period_ms,
            )
            .map_err(|err| WebError::Js(js_error_message(&err)))?;
        Ok(Self {
            window,
            handle,
            _callback: callback,
        })
    }
}

impl Drop for IntervalTimer {
    fn drop(&mut self) {
        self.window.clear_interval_with_handle(self.handle);
    }
}

pub struct UnloadHook {
    window: Window,
    callback: Closure<dyn FnMut(BeforeUnloadEvent)>,
}

impl UnloadHook {
    /// Run `on_unload` from the page's `beforeunload` event. It must finish
    /// synchronously; the page may be gone before any promise settles.
    ///
    /// # Errors
    /// Returns an error if the listener cannot be registered.
    pub fn install(mut on_unload: impl FnMut() + 'static) -> Result<Self, WebError> {
        let window = window()?;
        let callback = Closure::<dyn FnMut(BeforeUnloadEvent)>::new(move |_: BeforeUnloadEvent| {
            on_unload();
        });
        window
            .add_event_listener_with_callback(UNLOAD_EVENT, callback.as_ref().unchecked_ref())
            .map_err(|err| WebError::Js(js_error_message(&err)))?;
        Ok(Self { window, callback })
    }
}

impl Drop for UnloadHook {
    fn drop(&mut self) {
        let _ = self
            .window
            .remove_event_listener_with_callback(UNLOAD_EVENT, self.callback.as_ref().unchecked_ref());
    }
}

/// Interval milliseconds for `setInterval`, saturating at `i32::MAX`.
#[must_use]
pub fn interval_ms(period: Duration) -> i32 {
    i32::try_from(period.as_millis()).unwrap_or(i32::MAX)
}

/// Elapsed time between two `performance.now()` readings. Clock skew and
/// garbage readings count as zero.
#[must_use]
pub fn elapsed_between(previous_ms: f64, now_ms: f64) -> Duration {
    let delta = now_ms - previous_ms;
    if delta.is_finite() && delta > 0.0 {
        Duration::try_from_secs_f64(delta / 1_000.0).unwrap_or(Duration::ZERO)
    } else {
        Duration::ZERO
    }
}

/// Previous `performance.now()` reading for passive accrual. Measuring
/// starts when generation starts, so no stretch of generating time is
/// skipped or credited twice.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AccrualMark {
    last_ms: Option<f64>,
}

impl AccrualMark {
    #[must_use]
    pub const fn is_armed(&self) -> bool {
        self.last_ms.is_some()
    }

    /// Match the mark to the passive rate after it may have changed (start,
    /// purchase, boost refresh).
    pub fn sync(&mut self, generating: bool, now_ms: f64) {
        match (generating, self.last_ms) {
            (true, None) => self.last_ms = Some(now_ms),
            (false, Some(_)) => self.last_ms = None,
            _ => {}
        }
    }

    /// Timer fire at `now_ms`: the time to credit since the previous reading.
    pub fn fire(&mut self, generating: bool, now_ms: f64) -> Option<Duration> {
        if !generating {
            self.last_ms = None;
            return None;
        }
        self.last_ms
            .replace(now_ms)
            .map(|previous| elapsed_between(previous, now_ms))
    }
}
