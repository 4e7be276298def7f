//! `localStorage` as the local handoff cache.
use crumbforge_game::{CacheError, LocalCache};
use web_sys::Storage;

use crate::WebError;
use crate::dom::{js_error_message, local_storage};

/// [`LocalCache`] over a browser `Storage`. Values are stored as UTF-8 text,
/// which the JSON handoff envelope always is.
#[derive(Debug, Clone)]
pub struct BrowserCache {
    storage: Storage,
}

impl BrowserCache {
    /// Bind to `window.localStorage`.
    ///
    /// # Errors
    /// Returns an error when storage is disabled or there is no window.
    pub fn local() -> Result<Self, WebError> {
        Ok(Self {
            storage: local_storage()?,
        })
    }

    #[must_use]
    pub const fn from_storage(storage: Storage) -> Self {
        Self { storage }
    }
}

pub(crate) fn value_text(value: &[u8]) -> Result<&str, CacheError> {
    std::str::from_utf8(value)
        .map_err(|err| CacheError::Unavailable(format!("value is not UTF-8: {err}")))
}

impl LocalCache for BrowserCache {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        self.storage
            .get_item(key)
            .map(|value| value.map(String::into_bytes))
            .map_err(|err| CacheError::Unavailable(js_error_message(&err)))
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), CacheError> {
        self.storage
            .set_item(key, value_text(value)?)
            .map_err(|err| CacheError::Unavailable(js_error_message(&err)))
    }

    fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.storage
            .remove_item(key)
            .map_err(|err| CacheError::Unavailable(js_error_message(&err)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_utf8_values_are_rejected() {
        assert_eq!(value_text(br#"{"v":1}"#).unwrap(), r#"{"v":1}"#);
        assert!(matches!(
            value_text(&[0xff, 0xfe]),
            Err(CacheError::Unavailable(_))
        ));
    }
}
