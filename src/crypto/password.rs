//! Password verification against opaque credential records.
//!
//! Records use the LDAP userPassword scheme-prefix convention, so an
//! external provisioning tool can hand the proxy anything an LDAP server
//! would store. The `{SSHA*}` family shares one digest-parameterized
//! implementation over the fixed `base64(digest || salt)` wire layout;
//! Argon2 and bcrypt verification is delegated to their crates, which
//! compare in constant time themselves.

use crate::errors::{ProxyError, Result};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHasher as Argon2Hasher, SaltString},
    Argon2, PasswordVerifier as Argon2Verifier,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use bcrypt::{hash as bcrypt_hash, verify as bcrypt_verify, DEFAULT_COST};
use rand::RngCore;
use serde::Deserialize;
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};
use std::fmt;

/// Salt length for newly minted salted records. Verification accepts any
/// salt length, so records minted elsewhere still check out.
const SALT_LEN: usize = 16;

/// Supported password hash methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashMethod {
    /// Salted SHA-1 (LDAP standard default)
    Ssha,
    /// Salted SHA-256
    Ssha256,
    /// Salted SHA-512
    Ssha512,
    /// Argon2id (modern, recommended)
    Argon2id,
    /// bcrypt
    Bcrypt,
    /// Plain text (test fixtures and legacy stores only)
    Plain,
}

impl HashMethod {
    /// Returns the LDAP scheme prefix for this method.
    pub fn scheme(&self) -> &'static str {
        match self {
            HashMethod::Ssha => "{SSHA}",
            HashMethod::Ssha256 => "{SSHA256}",
            HashMethod::Ssha512 => "{SSHA512}",
            HashMethod::Argon2id => "{ARGON2}",
            HashMethod::Bcrypt => "{BCRYPT}",
            HashMethod::Plain => "",
        }
    }

    /// Detects the hash method from a stored record.
    pub fn detect(record: &str) -> Self {
        let upper = record.to_uppercase();
        if upper.starts_with("{SSHA512}") {
            HashMethod::Ssha512
        } else if upper.starts_with("{SSHA256}") {
            HashMethod::Ssha256
        } else if upper.starts_with("{SSHA}") {
            HashMethod::Ssha
        } else if upper.starts_with("{ARGON2}") {
            HashMethod::Argon2id
        } else if upper.starts_with("{BCRYPT}") || record.starts_with("$2") {
            HashMethod::Bcrypt
        } else {
            HashMethod::Plain
        }
    }

    /// Returns true if this is a salted, production-grade method.
    pub fn is_secure(&self) -> bool {
        !matches!(self, HashMethod::Plain)
    }
}

impl Default for HashMethod {
    fn default() -> Self {
        HashMethod::Ssha // LDAP standard default
    }
}

impl fmt::Display for HashMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.scheme())
    }
}

/// An opaque client credential record.
///
/// Holds the full scheme-tagged hash string. The merger only ever calls
/// [`Credential::verify`]; the stored value is never compared directly and
/// never printed.
#[derive(Clone, Deserialize)]
#[serde(transparent)]
pub struct Credential(String);

impl Credential {
    /// Wraps an existing LDAP-formatted record.
    pub fn new(record: impl Into<String>) -> Self {
        Self(record.into())
    }

    /// Builds a plaintext record. Test fixtures and legacy stores only.
    pub fn plain(password: impl Into<String>) -> Self {
        Self(password.into())
    }

    /// The hash method this record uses.
    pub fn method(&self) -> HashMethod {
        HashMethod::detect(&self.0)
    }

    /// Verifies a candidate password against this record.
    pub fn verify(&self, candidate: &str) -> Result<bool> {
        match self.method() {
            HashMethod::Ssha => check_salted::<Sha1>(&self.0, HashMethod::Ssha, candidate),
            HashMethod::Ssha256 => {
                check_salted::<Sha256>(&self.0, HashMethod::Ssha256, candidate)
            }
            HashMethod::Ssha512 => {
                check_salted::<Sha512>(&self.0, HashMethod::Ssha512, candidate)
            }
            HashMethod::Argon2id => verify_argon2(&self.0, candidate),
            HashMethod::Bcrypt => verify_bcrypt(&self.0, candidate),
            HashMethod::Plain => Ok(digest_eq(candidate.as_bytes(), self.0.as_bytes())),
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credential({})", self.method())
    }
}

/// A string that must not leak through Debug output or diagnostics.
#[derive(Clone, Deserialize)]
#[serde(transparent)]
pub struct SecretString(String);

impl SecretString {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Grants access to the wrapped value at the call site that needs it.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretString(<redacted>)")
    }
}

impl From<&str> for SecretString {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Hashes a password into a credential record using the given method.
pub fn hash_password(password: &str, method: HashMethod) -> Result<Credential> {
    let record = match method {
        HashMethod::Ssha => mint_salted::<Sha1>(method, password),
        HashMethod::Ssha256 => mint_salted::<Sha256>(method, password),
        HashMethod::Ssha512 => mint_salted::<Sha512>(method, password),
        HashMethod::Argon2id => hash_argon2(password)?,
        HashMethod::Bcrypt => hash_bcrypt(password)?,
        HashMethod::Plain => password.to_string(),
    };

    Ok(Credential(record))
}

// ============ Salted digest family ============

/// One digest pass over password-then-salt, the `{SSHA*}` layout.
fn salted_digest<D: Digest>(password: &str, salt: &[u8]) -> Vec<u8> {
    let mut hasher = D::new();
    hasher.update(password.as_bytes());
    hasher.update(salt);
    hasher.finalize().to_vec()
}

/// Mints a fresh record: `base64(digest || salt)` behind the scheme tag.
fn mint_salted<D: Digest>(method: HashMethod, password: &str) -> String {
    let mut salt = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);

    let mut packed = salted_digest::<D>(password, &salt);
    packed.extend_from_slice(&salt);

    format!("{}{}", method.scheme(), BASE64.encode(&packed))
}

/// Checks a candidate against a salted record. The salt is whatever
/// follows the digest in the decoded payload.
fn check_salted<D: Digest>(record: &str, method: HashMethod, candidate: &str) -> Result<bool> {
    let payload = BASE64
        .decode(strip_scheme(record, method))
        .map_err(|e| ProxyError::Credential(format!("invalid base64: {}", e)))?;

    let digest_len = <D as Digest>::output_size();
    if payload.len() < digest_len {
        return Err(ProxyError::Credential(format!(
            "{} record shorter than its digest",
            method.scheme()
        )));
    }

    let (stored, salt) = payload.split_at(digest_len);
    let computed = salted_digest::<D>(candidate, salt);

    Ok(constant_time_eq(&computed, stored))
}

/// Drops the record's scheme tag, whatever its case.
fn strip_scheme(record: &str, method: HashMethod) -> &str {
    let scheme = method.scheme();
    match record.get(..scheme.len()) {
        Some(head) if head.eq_ignore_ascii_case(scheme) => &record[scheme.len()..],
        _ => record,
    }
}

// ============ Argon2 / bcrypt ============

fn hash_argon2(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| ProxyError::Credential(format!("argon2 hash failed: {}", e)))?;

    Ok(format!("{}{}", HashMethod::Argon2id.scheme(), hash))
}

fn verify_argon2(record: &str, candidate: &str) -> Result<bool> {
    let parsed = argon2::PasswordHash::new(strip_scheme(record, HashMethod::Argon2id))
        .map_err(|e| ProxyError::Credential(format!("invalid argon2 record: {}", e)))?;

    Ok(Argon2::default()
        .verify_password(candidate.as_bytes(), &parsed)
        .is_ok())
}

fn hash_bcrypt(password: &str) -> Result<String> {
    let hash = bcrypt_hash(password, DEFAULT_COST)
        .map_err(|e| ProxyError::Credential(format!("bcrypt hash failed: {}", e)))?;

    Ok(format!("{}{}", HashMethod::Bcrypt.scheme(), hash))
}

fn verify_bcrypt(record: &str, candidate: &str) -> Result<bool> {
    bcrypt_verify(candidate, strip_scheme(record, HashMethod::Bcrypt))
        .map_err(|e| ProxyError::Credential(format!("bcrypt verify failed: {}", e)))
}

// ============ Utilities ============

/// Constant-time comparison to prevent timing attacks.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Compares two byte strings of possibly different lengths without leaking
/// where they diverge, by comparing their SHA-256 digests.
fn digest_eq(a: &[u8], b: &[u8]) -> bool {
    let da = Sha256::digest(a);
    let db = Sha256::digest(b);
    constant_time_eq(&da, &db)
}
