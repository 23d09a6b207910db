//! Bearer tokens of the form `base64(user_id:expires_at).base64(hmac)`, and
//! argon2 password hashes.

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha1::Sha1;

type HmacSha1 = Hmac<Sha1>;

fn signer(secret: &str) -> Option<HmacSha1> {
    HmacSha1::new_from_slice(secret.as_bytes()).ok()
}

pub fn issue_token(secret: &str, user_id: &str, expires_at: i64) -> anyhow::Result<String> {
    let payload = format!("{user_id}:{expires_at}");
    let mut mac = signer(secret).ok_or_else(|| anyhow::anyhow!("invalid token secret"))?;
    mac.update(payload.as_bytes());
    let signature = mac.finalize().into_bytes();

    Ok(format!(
        "{}.{}",
        URL_SAFE_NO_PAD.encode(payload),
        URL_SAFE_NO_PAD.encode(signature)
    ))
}

/// Returns the user id carried by a valid, unexpired token.
pub fn verify_token(secret: &str, token: &str, now: i64) -> Option<String> {
    let (payload_b64, signature_b64) = token.split_once('.')?;
    let payload = URL_SAFE_NO_PAD.decode(payload_b64).ok()?;
    let signature = URL_SAFE_NO_PAD.decode(signature_b64).ok()?;

    let mut mac = signer(secret)?;
    mac.update(&payload);
    mac.verify_slice(&signature).ok()?;

    let payload = String::from_utf8(payload).ok()?;
    let (user_id, expires_at) = payload.rsplit_once(':')?;
    let expires_at: i64 = expires_at.parse().ok()?;
    if expires_at <= now || user_id.is_empty() {
        return None;
    }
    Some(user_id.to_string())
}

/// PHC-format argon2id hash with a random salt.
pub fn hash_password(password: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("failed to hash password: {e}"))?;
    Ok(hash.to_string())
}

/// False for a mismatch and for a missing or malformed stored hash.
pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    match PasswordHash::new(stored_hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}
