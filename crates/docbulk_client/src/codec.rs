//! Document codecs for typed repositories.

use crate::error::{ClientError, ClientResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::marker::PhantomData;

/// Converts between typed documents and their stored JSON bytes.
///
/// Implementors must produce a single JSON object per document; the bulk
/// body frames sources by line.
///
/// # Example
///
/// ```rust,ignore
/// use docbulk_client::{DocumentCodec, JsonCodec};
///
/// #[derive(serde::Serialize, serde::Deserialize)]
/// struct Thing {
///     title: String,
/// }
///
/// let codec = JsonCodec::<Thing>::new();
/// let bytes = codec.encode(&Thing { title: "hi".into() })?;
/// assert_eq!(bytes, br#"{"title":"hi"}"#);
/// ```
pub trait DocumentCodec<T>: Send + Sync {
    /// Serializes a document.
    fn encode(&self, value: &T) -> ClientResult<Vec<u8>>;

    /// Deserializes a document.
    fn decode(&self, bytes: &[u8]) -> ClientResult<T>;
}

/// The default codec, backed by `serde_json`.
pub struct JsonCodec<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonCodec<T> {
    /// Creates a JSON codec.
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for JsonCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for JsonCodec<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for JsonCodec<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("JsonCodec")
    }
}

impl<T> DocumentCodec<T> for JsonCodec<T>
where
    T: Serialize + DeserializeOwned,
{
    fn encode(&self, value: &T) -> ClientResult<Vec<u8>> {
        serde_json::to_vec(value).map_err(|e| ClientError::Codec(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> ClientResult<T> {
        serde_json::from_slice(bytes).map_err(|e| ClientError::Codec(e.to_string()))
    }
}
