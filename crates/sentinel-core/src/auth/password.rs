use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};

use crate::error::SentinelError;

/// Argon2id memory cost in KiB.
pub const MEMORY_COST_KIB: u32 = 19_456;
/// Argon2id iterations. With the memory cost above, one verification takes
/// roughly 100ms on commodity hardware.
pub const TIME_COST: u32 = 2;
pub const PARALLELISM: u32 = 1;

fn argon2() -> Result<Argon2<'static>, SentinelError> {
    let params = Params::new(MEMORY_COST_KIB, TIME_COST, PARALLELISM, None)
        .map_err(|e| SentinelError::Internal(format!("Invalid Argon2 parameters: {}", e)))?;
    Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
}

/// Hash a plaintext password using Argon2id with a random salt.
///
/// Fails only if the salt source or the hasher itself fails.
pub fn hash_password(password: &str) -> Result<String, SentinelError> {
    let salt = SaltString::generate(&mut OsRng);

    argon2()?
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| SentinelError::Internal(format!("Failed to hash password: {}", e)))
}

/// Verify a plaintext password against a stored hash.
///
/// A malformed digest verifies as `false`; it is logged, never surfaced.
pub fn verify_password(password: &str, hash: &str) -> bool {
    let parsed_hash = match PasswordHash::new(hash) {
        Ok(parsed) => parsed,
        Err(e) => {
            tracing::warn!(error = %e, "stored password hash is malformed");
            return false;
        }
    };

    // Parameters come from the PHC string, so hashes created with older
    // costs keep verifying.
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok()
}

fn join_error(e: tokio::task::JoinError) -> SentinelError {
    SentinelError::Internal(format!("Password hashing task failed: {}", e))
}

/// [`hash_password`] on the blocking pool, off the async workers.
pub async fn hash_password_async(password: &str) -> Result<String, SentinelError> {
    let password = password.to_string();
    tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .map_err(join_error)?
}

/// [`verify_password`] on the blocking pool.
pub async fn verify_password_async(password: &str, hash: &str) -> Result<bool, SentinelError> {
    let (password, hash) = (password.to_string(), hash.to_string());
    tokio::task::spawn_blocking(move || verify_password(&password, &hash))
        .await
        .map_err(join_error)
}

/// Password policy: at least 8 characters, one uppercase, one lowercase,
/// one digit, and no whitespace.
pub fn validate_password_strength(password: &str) -> Result<(), SentinelError> {
    if password.chars().count() < 8 {
        return Err(SentinelError::Validation(
            "Password must be at least 8 characters".to_string(),
        ));
    }
    if password.chars().any(char::is_whitespace) {
        return Err(SentinelError::Validation(
            "Password must not contain whitespace".to_string(),
        ));
    }

    let has_upper = password.chars().any(char::is_uppercase);
    let has_lower = password.chars().any(char::is_lowercase);
    let has_digit = password.chars().any(|c| c.is_ascii_digit());
    if !(has_upper && has_lower && has_digit) {
        return Err(SentinelError::Validation(
            "Password must contain an uppercase letter, a lowercase letter and a digit"
                .to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_uses_configured_parameters() {
        let hash = hash_password("Passw0rd1").unwrap();
        assert!(hash.starts_with("$argon2id$v=19$m=19456,t=2,p=1$"));
    }

    #[test]
    fn malformed_digest_is_false_not_error() {
        assert!(!verify_password("Passw0rd1", "not-a-phc-string"));
        assert!(!verify_password("Passw0rd1", ""));
    }

    #[tokio::test]
    async fn blocking_pool_helpers_agree_with_sync_ones() {
        let hash = hash_password_async("Passw0rd1").await.unwrap();
        assert!(verify_password_async("Passw0rd1", &hash).await.unwrap());
        assert!(!verify_password_async("Passw0rd2", &hash).await.unwrap());
        assert!(verify_password("Passw0rd1", &hash));
    }

    #[test]
    fn strength_rules() {
        assert!(validate_password_strength("Passw0rd1").is_ok());
        assert!(validate_password_strength("Pw0rd").is_err());
        assert!(validate_password_strength("password1").is_err());
        assert!(validate_password_strength("PASSWORD1").is_err());
        assert!(validate_password_strength("Password").is_err());
        assert!(validate_password_strength("Pass w0rd1").is_err());
    }
}
