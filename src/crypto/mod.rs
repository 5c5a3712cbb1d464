//! Credential handling for the proxy's identity store.
//!
//! Client records carry opaque, scheme-tagged password hashes in the LDAP
//! `userPassword` format. Verification never exposes the stored value and
//! compares digests in constant time.
//!
//! Supported hash methods:
//! - SSHA (Salted SHA-1) - LDAP standard default
//! - SSHA-512 / SSHA-256 - Salted SHA-2 variants
//! - Argon2id - Modern secure option
//! - bcrypt - Widely used secure option
//! - Plain - test fixtures and legacy stores only

pub mod password;

pub use password::{hash_password, Credential, HashMethod, SecretString};
