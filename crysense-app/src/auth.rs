//! Password hashing and sign-up validation.
//!
//! Stored hashes look like `sha256$<base64 salt>$<hex digest>` where the
//! digest is SHA-256 over `salt || password`. Accounts created before salting
//! hold a bare 64-character hex digest of the password; those still verify.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use rand::RngCore;
use sha2::{Digest, Sha256};

pub const MIN_PASSWORD_LEN: usize = 6;
const SCHEME: &str = "sha256";
const SALT_LEN: usize = 16;

fn hex_digest(parts: &[&[u8]]) -> String {
    let mut hasher = Sha256::new();
    for p in parts {
        hasher.update(p);
    }
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

fn eq_ct(a: &str, b: &str) -> bool {
    a.len() == b.len()
        && a
            .bytes()
            .zip(b.bytes())
            .fold(0u8, |acc, (x, y)| acc | (x ^ y))
            == 0
}

pub fn hash_password(password: &str) -> String {
    let mut salt = [0u8; SALT_LEN];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    let salt = BASE64.encode(salt);
    let digest = hex_digest(&[salt.as_bytes(), password.as_bytes()]);
    format!("{SCHEME}${salt}${digest}")
}

pub fn verify_password(password: &str, stored: &str) -> bool {
    let mut parts = stored.splitn(3, '$');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(SCHEME), Some(salt), Some(digest)) => {
            eq_ct(&hex_digest(&[salt.as_bytes(), password.as_bytes()]), digest)
        }
        (Some(legacy), None, None) => eq_ct(&hex_digest(&[password.as_bytes()]), legacy),
        _ => false,
    }
}

/// Check a sign-up form. Uniqueness is enforced by the store.
pub fn validate_signup(username: &str, password: &str, confirm: &str) -> Result<(), String> {
    if username.trim().is_empty() {
        return Err("Username must not be empty".into());
    }
    if password != confirm {
        return Err("Passwords do not match".into());
    }
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn salted_hash_verifies_only_the_right_password() {
        let stored = hash_password("lullaby");
        assert!(stored.starts_with("sha256$"));
        assert!(verify_password("lullaby", &stored));
        assert!(!verify_password("lullabY", &stored));
    }

    #[test]
    fn same_password_gets_different_salts() {
        assert_ne!(hash_password("lullaby"), hash_password("lullaby"));
    }

    #[test]
    fn legacy_unsalted_digest_still_verifies() {
        // sha256("password")
        let legacy = "5e884898da28047151d0e56f8dc6292773603d0d6aabbdd62a11ef721d1542d8";
        assert!(verify_password("password", legacy));
        assert!(!verify_password("passw0rd", legacy));
    }

    #[test]
    fn malformed_hash_never_verifies() {
        assert!(!verify_password("x", "md5$abc$def"));
        assert!(!verify_password("", ""));
    }

    #[test]
    fn signup_rules() {
        assert!(validate_signup("ana", "secret", "secret").is_ok());
        assert_eq!(
            validate_signup("ana", "secret", "secreT").unwrap_err(),
            "Passwords do not match"
        );
        assert!(validate_signup("ana", "12345", "12345")
            .unwrap_err()
            .contains("at least 6"));
        assert!(validate_signup("  ", "secret", "secret").is_err());
    }
}
