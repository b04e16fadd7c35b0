use std::sync::LazyLock;

use regex::Regex;

use crate::error::{M3uaError, M3uaResult};

const KEY_HEADER: &str = "#EXT-X-KEY:";
const MEDIA_SEQUENCE_HEADER: &str = "#EXT-X-MEDIA-SEQUENCE:";

/// `#EXT-X-KEY:METHOD=<method>,URI=<uri>[,IV=<iv>]`
static KEY_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"^#EXT-X-KEY:METHOD=(?P<method>[^,]+),URI=(?P<uri>"[^"]*"|[^,"]+)(?:,IV=(?P<iv>[^,]+))?$"#,
    )
    .unwrap()
});

/// A parsed media playlist.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Playlist {
    /// Segment uris in document order.
    pub segments: Vec<String>,
    /// The first `#EXT-X-KEY` tag of the document, if any.
    pub encryption: Option<EncryptionDescriptor>,
    /// Value of `#EXT-X-MEDIA-SEQUENCE`, 0 when absent.
    pub media_sequence: u64,
}

impl Playlist {
    pub fn is_encrypted(&self) -> bool {
        self.encryption.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptionDescriptor {
    /// Cipher identifier as written in the playlist, e.g. `AES-128`.
    pub method: String,
    /// Key uri with surrounding quotes stripped.
    pub uri: String,
    /// Decoded initialization vector.
    pub iv: Option<Vec<u8>>,
}

impl EncryptionDescriptor {
    /// Cipher name understood by `openssl enc`, e.g. `aes-128-cbc`.
    pub fn cipher_name(&self) -> String {
        format!("{}-cbc", self.method.to_lowercase())
    }

    /// Key length in bytes, `None` for methods other than AES-128/192/256.
    pub fn key_len(&self) -> Option<usize> {
        match self.method.to_ascii_uppercase().as_str() {
            "AES-128" => Some(16),
            "AES-192" => Some(24),
            "AES-256" => Some(32),
            _ => None,
        }
    }

    /// Check that the stream can be decrypted with AES-CBC before anything is
    /// fetched for it.
    pub fn validate(&self) -> M3uaResult<()> {
        if self.key_len().is_none() {
            return Err(M3uaError::UnsupportedMethod(self.method.clone()));
        }
        match &self.iv {
            Some(iv) if iv.len() != 16 => Err(M3uaError::InvalidIv(iv.len())),
            _ => Ok(()),
        }
    }

    /// The explicit IV, or the media sequence number as a 128-bit big-endian integer.
    pub fn iv_or_sequence(&self, media_sequence: u64) -> Vec<u8> {
        match &self.iv {
            Some(iv) => iv.clone(),
            None => (media_sequence as u128).to_be_bytes().to_vec(),
        }
    }
}

/// Parse a media playlist.
///
/// Every non-empty line not starting with `#` is a segment uri. Only the first
/// `#EXT-X-KEY` tag is honored; later ones are ignored. A key tag that matches
/// neither `METHOD=..,URI=..` nor `METHOD=..,URI=..,IV=..` is an error.
pub fn parse(document: &[u8]) -> M3uaResult<Playlist> {
    let document = std::str::from_utf8(document)
        .map_err(|e| M3uaError::MalformedPlaylist(format!("not valid UTF-8: {e}")))?;
    let document = document.strip_prefix('\u{feff}').unwrap_or(document);

    let mut playlist = Playlist::default();
    for line in document.split('\n') {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if !line.starts_with('#') {
            playlist.segments.push(line.to_string());
            continue;
        }

        if line.contains(KEY_HEADER) {
            if playlist.encryption.is_none() {
                playlist.encryption = Some(parse_key(line)?);
            } else {
                tracing::debug!("Ignoring additional key tag: {line}");
            }
        } else if let Some(sequence) = line.strip_prefix(MEDIA_SEQUENCE_HEADER) {
            match sequence.trim().parse() {
                Ok(sequence) => playlist.media_sequence = sequence,
                Err(e) => tracing::debug!("Ignoring media sequence tag {line}: {e}"),
            }
        }
    }

    Ok(playlist)
}

fn parse_key(line: &str) -> M3uaResult<EncryptionDescriptor> {
    let captures = KEY_REGEX
        .captures(line)
        .ok_or_else(|| M3uaError::MalformedPlaylist(format!("unrecognized key tag: {line}")))?;

    let method = captures["method"].to_string();
    let uri = captures["uri"].trim_matches('"').to_string();
    if uri.is_empty() {
        return Err(M3uaError::MalformedPlaylist(format!(
            "key tag without uri: {line}"
        )));
    }

    let iv = captures
        .name("iv")
        .map(|iv| {
            let iv = iv.as_str();
            let hex = iv
                .strip_prefix("0x")
                .or_else(|| iv.strip_prefix("0X"))
                .unwrap_or(iv);
            hex::decode(hex)
                .map_err(|e| M3uaError::MalformedPlaylist(format!("invalid iv {iv}: {e}")))
        })
        .transpose()?;

    Ok(EncryptionDescriptor { method, uri, iv })
}
