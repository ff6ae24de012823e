//! Extension trait for [`Store`] with typed convenience methods.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::{CacheError, Store};

/// Typed convenience methods for [`Store`].
///
/// Provides `get_json`/`set_json` for serde-serializable types. These are
/// implemented as default methods on an extension trait so that [`Store`]
/// stays object-safe and implementors only handle raw bytes.
///
/// # Example
///
/// ```
/// use tz_cache::{MemoryStore, StoreExt};
///
/// let store = MemoryStore::new();
/// store.set_json("tikz.index", &vec!["abc".to_owned()]).unwrap();
/// let index: Option<Vec<String>> = store.get_json("tikz.index").unwrap();
/// assert_eq!(index, Some(vec!["abc".to_owned()]));
/// ```
pub trait StoreExt: Store {
    /// Retrieve a JSON-deserialized value.
    ///
    /// Returns `Ok(None)` on a miss and an error if the stored bytes are not
    /// valid JSON for `T`.
    fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CacheError> {
        match self.get(key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Store a value as JSON.
    fn set_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), CacheError> {
        let bytes = serde_json::to_vec(value)?;
        self.set(key, &bytes)
    }
}

impl<S: Store + ?Sized> StoreExt for S {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStore;

    #[test]
    fn test_get_json_miss() {
        let store = MemoryStore::new();
        let value: Option<u32> = store.get_json("tikz.version").unwrap();
        assert_eq!(value, None);
    }

    #[test]
    fn test_get_json_invalid_payload() {
        let store = MemoryStore::new();
        store.set("tikz.version", b"not json").unwrap();

        let result: Result<Option<u32>, _> = store.get_json("tikz.version");
        assert!(matches!(result, Err(CacheError::Json(_))));
    }
}
