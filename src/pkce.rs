use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::{TryRngCore, rngs::OsRng};
use sha2::{Digest, Sha256};

use crate::HydraError;

const VERIFIER_BYTES: usize = 32;

/// Bytes of OS randomness behind every state value; 128 bits minimum.
pub(crate) const STATE_BYTES: usize = 24;

/// Returns `len` bytes from the OS RNG, encoded as unpadded url-safe base64.
pub(crate) fn random_token(len: usize) -> Result<String, HydraError> {
    let mut bytes = vec![0u8; len];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|err| HydraError::OsRng {
            message: err.to_string(),
        })?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

#[derive(Debug, Clone)]
pub struct PkcePair {
    pub code_verifier: String,
    pub code_challenge: String,
}

impl PkcePair {
    pub fn generate() -> Result<Self, HydraError> {
        Ok(Self::from_verifier(random_token(VERIFIER_BYTES)?))
    }

    pub fn from_verifier(code_verifier: impl Into<String>) -> Self {
        let code_verifier = code_verifier.into();
        let digest = Sha256::digest(code_verifier.as_bytes());
        Self {
            code_challenge: URL_SAFE_NO_PAD.encode(digest),
            code_verifier,
        }
    }
}
