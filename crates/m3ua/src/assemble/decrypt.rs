use std::path::Path;

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, KeyIvInit};

use crate::{
    error::{M3uaError, M3uaResult},
    key::KeyMaterial,
    playlist::EncryptionDescriptor,
    tool::ResolvedTool,
};

/// Everything needed to decrypt the concatenated stream.
#[derive(Debug, Clone)]
pub struct DecryptParams {
    method: String,
    key: KeyMaterial,
    iv: Vec<u8>,
}

impl DecryptParams {
    /// Without an explicit IV, `media_sequence` is used as the IV.
    pub fn new(key: KeyMaterial, encryption: &EncryptionDescriptor, media_sequence: u64) -> Self {
        Self {
            method: encryption.method.clone(),
            key,
            iv: encryption.iv_or_sequence(media_sequence),
        }
    }

    /// `openssl enc` cipher name, e.g. `aes-128-cbc`.
    pub fn cipher(&self) -> String {
        format!("{}-cbc", self.method.to_lowercase())
    }

    pub fn iv_hex(&self) -> String {
        hex::encode(&self.iv)
    }
}

pub(super) async fn decrypt(
    tool: &ResolvedTool,
    params: &DecryptParams,
    input: &Path,
    output: &Path,
) -> M3uaResult<()> {
    match tool {
        ResolvedTool::Builtin => {
            let data = tokio::fs::read(input).await?;
            let data = decrypt_cbc(params, &data)?;
            tokio::fs::write(output, data).await?;
        }
        ResolvedTool::External(tool) => {
            let mut command = tool.command();
            command
                .arg(params.cipher())
                .args(["-d", "-nosalt", "-K"])
                .arg(params.key.to_hex())
                .arg("-iv")
                .arg(params.iv_hex())
                .arg("-in")
                .arg(input)
                .arg("-out")
                .arg(output);
            tool.run(command).await?;
        }
    }
    Ok(())
}

fn decrypt_cbc(params: &DecryptParams, data: &[u8]) -> M3uaResult<Vec<u8>> {
    if params.iv.len() != 16 {
        return Err(M3uaError::InvalidIv(params.iv.len()));
    }

    let key = params.key.as_bytes();
    let invalid_key = |expected| M3uaError::InvalidKey {
        method: params.method.clone(),
        expected,
        actual: key.len(),
    };

    Ok(match params.cipher().as_str() {
        "aes-128-cbc" => cbc::Decryptor::<aes::Aes128>::new_from_slices(key, &params.iv)
            .map_err(|_| invalid_key(16))?
            .decrypt_padded_vec_mut::<Pkcs7>(data)?,
        "aes-192-cbc" => cbc::Decryptor::<aes::Aes192>::new_from_slices(key, &params.iv)
            .map_err(|_| invalid_key(24))?
            .decrypt_padded_vec_mut::<Pkcs7>(data)?,
        "aes-256-cbc" => cbc::Decryptor::<aes::Aes256>::new_from_slices(key, &params.iv)
            .map_err(|_| invalid_key(32))?
            .decrypt_padded_vec_mut::<Pkcs7>(data)?,
        _ => return Err(M3uaError::UnsupportedMethod(params.method.clone())),
    })
}
