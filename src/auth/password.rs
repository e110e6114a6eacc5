use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use lazy_static::lazy_static;
use rand::rngs::OsRng;
use tracing::error;

pub const MIN_PASSWORD_LEN: usize = 8;

lazy_static! {
    static ref DUMMY_HASH: Option<String> = hash_password("dummy-password-never-matches").ok();
}

pub fn hash_password(plain: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2
        .hash_password(plain.as_bytes(), &salt)
        .map_err(|e| {
            error!(error = %e, "argon2 hash_password error");
            anyhow::anyhow!(e.to_string())
        })?
        .to_string();
    Ok(hash)
}

pub fn verify_password(plain: &str, hash: &str) -> anyhow::Result<bool> {
    let parsed = PasswordHash::new(hash).map_err(|e| {
        error!(error = %e, "argon2 parse hash error");
        anyhow::anyhow!(e.to_string())
    })?;
    Ok(Argon2::default()
        .verify_password(plain.as_bytes(), &parsed)
        .is_ok())
}

/// Runs a full verification against a throwaway hash, for paths where no
/// account exists.
pub fn verify_against_dummy(plain: &str) {
    if let Some(hash) = DUMMY_HASH.as_deref() {
        let _ = verify_password(plain, hash);
    }
}
