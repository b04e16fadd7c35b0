use std::fmt;

use crate::{
    error::{M3uaError, M3uaResult},
    fetch::{resolve_url, Fetcher},
    playlist::EncryptionDescriptor,
};

/// Raw decryption key.
///
/// The bytes are only exposed through [KeyMaterial::as_bytes] and
/// [KeyMaterial::to_hex]; formatting never prints them.
#[derive(Clone, PartialEq, Eq)]
pub struct KeyMaterial(Vec<u8>);

impl KeyMaterial {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Lowercase hex, the form `openssl enc -K` expects.
    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyMaterial(<{} bytes>)", self.0.len())
    }
}

pub struct KeyResolver<F> {
    fetcher: F,
    /// Fetch the key from this url instead of `prefix + uri`.
    key_url: Option<String>,
}

impl<F> KeyResolver<F>
where
    F: Fetcher,
{
    pub fn new(fetcher: F) -> Self {
        Self {
            fetcher,
            key_url: None,
        }
    }

    pub fn with_key_url(mut self, key_url: Option<String>) -> Self {
        self.key_url = key_url;
        self
    }

    /// Fetch the key described by `encryption`.
    ///
    /// Returns `None` for unencrypted playlists without touching the network.
    pub async fn resolve(
        &self,
        encryption: Option<&EncryptionDescriptor>,
        prefix: &str,
    ) -> M3uaResult<Option<KeyMaterial>> {
        let Some(encryption) = encryption else {
            return Ok(None);
        };

        if encryption.uri.is_empty() {
            return Err(M3uaError::MissingKeyUri);
        }

        let url = self
            .key_url
            .clone()
            .unwrap_or_else(|| resolve_url(prefix, &encryption.uri));
        tracing::debug!("Fetching {} key from {url}", encryption.method);

        let bytes = self
            .fetcher
            .fetch_resource(&url)
            .await
            .map_err(|e| M3uaError::KeyFetchFailed {
                url: url.clone(),
                source: Box::new(e),
            })?;
        let key = KeyMaterial::new(bytes.to_vec());
        validate(encryption, &key)?;

        tracing::debug!("Key fetched: {key:?}");
        Ok(Some(key))
    }
}

fn validate(encryption: &EncryptionDescriptor, key: &KeyMaterial) -> M3uaResult<()> {
    match encryption.key_len() {
        Some(expected) if key.len() != expected => Err(M3uaError::InvalidKey {
            method: encryption.method.clone(),
            expected,
            actual: key.len(),
        }),
        None if key.is_empty() => Err(M3uaError::InvalidKey {
            method: encryption.method.clone(),
            expected: 1,
            actual: 0,
        }),
        _ => Ok(()),
    }
}
