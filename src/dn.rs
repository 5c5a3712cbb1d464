//! Distinguished Name canonicalization.
//!
//! The client directory is keyed by DN, and RFC 4514 leaves room for
//! spellings that must compare equal: attribute types are
//! case-insensitive and whitespace around separators is insignificant.
//! Inbound bind DNs are reduced to a canonical key before lookup. RDN
//! values are kept exactly as written, escape sequences included, so a
//! registration matches the escape spelling it was stored with.

use crate::errors::{ProxyError, Result};

/// Canonical lookup key for a DN: attribute types lowercased, spacing
/// around separators dropped, RDN values untouched.
pub fn canonicalize(dn: &str) -> Result<String> {
    let dn = dn.trim();
    if dn.is_empty() {
        return Ok(String::new());
    }

    let mut parts = Vec::new();
    for rdn in rdn_slices(dn) {
        let rdn = rdn.trim();
        let (attr, value) = rdn
            .split_once('=')
            .ok_or_else(|| ProxyError::InvalidDn(format!("RDN without '=': {}", rdn)))?;

        let attr = attr.trim();
        if attr.is_empty() {
            return Err(ProxyError::InvalidDn(format!(
                "RDN without attribute type: {}",
                rdn
            )));
        }

        parts.push(format!("{}={}", attr.to_ascii_lowercase(), value.trim()));
    }

    Ok(parts.join(","))
}

/// Splits a DN at unescaped commas, borrowing the input. A backslash
/// shields exactly the character after it (`cn=Doe\, Jane` is one RDN).
fn rdn_slices(dn: &str) -> Vec<&str> {
    let mut slices = Vec::new();
    let mut start = 0;
    let mut shielded = false;

    for (i, c) in dn.char_indices() {
        if shielded {
            shielded = false;
        } else if c == '\\' {
            shielded = true;
        } else if c == ',' {
            slices.push(&dn[start..i]);
            start = i + 1;
        }
    }
    slices.push(&dn[start..]);

    slices
}
