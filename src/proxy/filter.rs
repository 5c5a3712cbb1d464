//! Rendering decoded search filters for backend dispatch.
//!
//! The front-end codec hands us a structured filter; the backend client
//! speaks RFC 4515 strings. Assertion values are re-escaped on the way
//! through, so a hostile client cannot smuggle filter syntax into a
//! backend query.

use ldap3_proto::proto::LdapFilter;
use std::fmt::Write;

/// Renders a decoded filter into its RFC 4515 string form.
pub fn render_filter(filter: &LdapFilter) -> String {
    let mut out = String::new();
    write_filter(&mut out, filter);
    out
}

fn write_filter(out: &mut String, filter: &LdapFilter) {
    match filter {
        LdapFilter::And(inner) => {
            out.push_str("(&");
            for f in inner {
                write_filter(out, f);
            }
            out.push(')');
        }
        LdapFilter::Or(inner) => {
            out.push_str("(|");
            for f in inner {
                write_filter(out, f);
            }
            out.push(')');
        }
        LdapFilter::Not(inner) => {
            out.push_str("(!");
            write_filter(out, inner);
            out.push(')');
        }
        LdapFilter::Equality(attr, value) => write_assertion(out, attr, "=", value),
        LdapFilter::Present(attr) => {
            let _ = write!(out, "({}=*)", attr);
        }
        LdapFilter::Substring(attr, parts) => {
            let _ = write!(out, "({}=", attr);
            if let Some(initial) = &parts.initial {
                write_value(out, initial);
            }
            out.push('*');
            for any in &parts.any {
                write_value(out, any);
                out.push('*');
            }
            if let Some(final_) = &parts.final_ {
                write_value(out, final_);
            }
            out.push(')');
        }
        LdapFilter::GreaterOrEqual(attr, value) => write_assertion(out, attr, ">=", value),
        LdapFilter::LessOrEqual(attr, value) => write_assertion(out, attr, "<=", value),
        LdapFilter::Approx(attr, value) => write_assertion(out, attr, "~=", value),
        LdapFilter::Extensible(assertion) => {
            out.push('(');
            if let Some(type_) = &assertion.type_ {
                out.push_str(type_);
            }
            if assertion.dn_attributes {
                out.push_str(":dn");
            }
            if let Some(rule) = &assertion.matching_rule {
                out.push(':');
                out.push_str(rule);
            }
            out.push_str(":=");
            write_value(out, &assertion.match_value);
            out.push(')');
        }
    }
}

fn write_assertion(out: &mut String, attr: &str, op: &str, value: &str) {
    let _ = write!(out, "({}{}", attr, op);
    write_value(out, value);
    out.push(')');
}

/// RFC 4515 escaping: filter metacharacters in assertion values are
/// emitted as backslash-hex.
fn write_value(out: &mut String, value: &str) {
    for c in value.chars() {
        match c {
            '(' | ')' | '*' | '\\' | '\0' => {
                let _ = write!(out, "\\{:02x}", c as u32);
            }
            _ => out.push(c),
        }
    }
}
