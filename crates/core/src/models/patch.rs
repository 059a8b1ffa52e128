//! Shared helpers for allow-listed JSON drafts and patches

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};

use crate::error::{Error, Result};

/// Decode an allow-listed document. Unknown keys and bad values are
/// `InvalidArgument`, not a transport error.
pub(crate) fn from_json<T: DeserializeOwned>(what: &str, value: serde_json::Value) -> Result<T> {
    if !value.is_object() {
        return Err(Error::InvalidArgument(format!("{} must be a JSON object", what)));
    }
    serde_json::from_value(value).map_err(|e| Error::InvalidArgument(format!("{}: {}", what, e)))
}

/// Distinguishes an absent key (`None`) from an explicit `null` (`Some(None)`).
pub(crate) fn double_option<'de, D, T>(deserializer: D) -> std::result::Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Trimmed, non-blank text or `InvalidArgument`
pub(crate) fn require_text(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::InvalidArgument(format!("{} must not be blank", field)));
    }
    Ok(())
}
