#![forbid(unsafe_code)]

//! Shared security helpers: password hashing, random tokens and the root
//! guard used by the binaries.

use anyhow::{Result, bail};
use argon2::Argon2;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use nix::unistd::Uid;
use rand_core::{OsRng, RngCore};

use crate::error::{ReelError, ReelResult};

pub const MIN_PASSWORD_LENGTH: usize = 12;

/// Fails fast when a binary is started as root. The service only needs write
/// access to its storage root and database, so it should run under an
/// unprivileged account.
pub fn ensure_not_root(process: &str) -> Result<()> {
    if Uid::current().is_root() {
        bail!("{process} must not be run as root; use an unprivileged service account");
    }
    Ok(())
}

/// Hashes a plaintext password with Argon2id and a fresh random salt. The
/// returned PHC string embeds the parameters and salt.
pub fn hash_password(password: &str) -> ReelResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|err| ReelError::PasswordHash(err.to_string()))?;
    Ok(hash.to_string())
}

/// Returns `Ok(false)` on a mismatch; only a malformed stored hash is an error.
pub fn verify_password(password: &str, hash: &str) -> ReelResult<bool> {
    let parsed =
        PasswordHash::new(hash).map_err(|err| ReelError::PasswordHash(err.to_string()))?;
    match Argon2::default().verify_password(password.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(err) => Err(ReelError::PasswordHash(err.to_string())),
    }
}

pub fn validate_password_strength(password: &str) -> ReelResult<()> {
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(ReelError::validation(format!(
            "password must be at least {MIN_PASSWORD_LENGTH} characters long"
        )));
    }
    Ok(())
}

/// 32 random bytes, URL-safe base64 without padding. Used for session ids.
pub fn session_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Short lowercase hex token used to disambiguate storage names.
pub fn short_hex_token() -> String {
    let mut bytes = [0u8; 4];
    OsRng.fill_bytes(&mut bytes);
    bytes.iter().map(|byte| format!("{byte:02x}")).collect()
}
