use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use super::action::ActionError;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "X-Tripwire-Signature";

/// Base64 HMAC-SHA256 of `payload`.
pub fn sign_payload(secret: &[u8], payload: &[u8]) -> Result<String, ActionError> {
    let mut mac =
        HmacSha256::new_from_slice(secret).map_err(|e| ActionError::Signing(e.to_string()))?;
    mac.update(payload);
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
pub fn verify_signature(secret: &[u8], payload: &[u8], signature_b64: &str) -> bool {
    let Ok(sig) = STANDARD.decode(signature_b64) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
        return false;
    };
    mac.update(payload);
    mac.verify_slice(&sig).is_ok()
}
