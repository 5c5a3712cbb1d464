//! Operation payload data structures.

use ldap3::SearchEntry;
use ldap3_proto::proto::{LdapPartialAttribute, LdapSearchResultEntry, LdapSearchScope};
use std::collections::HashMap;

/// A directory entry returned by a backend search.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    /// Distinguished Name of the entry.
    pub dn: String,
    /// Textual attributes and their values.
    pub attributes: HashMap<String, Vec<String>>,
    /// Attributes whose values are not valid UTF-8.
    pub bin_attributes: HashMap<String, Vec<Vec<u8>>>,
}

impl Entry {
    /// Creates a new entry.
    pub fn new(dn: impl Into<String>) -> Self {
        Self {
            dn: dn.into(),
            attributes: HashMap::new(),
            bin_attributes: HashMap::new(),
        }
    }

    /// Adds an attribute with multiple values.
    pub fn with_attribute(
        mut self,
        name: impl Into<String>,
        values: Vec<impl Into<String>>,
    ) -> Self {
        self.attributes
            .insert(name.into(), values.into_iter().map(|v| v.into()).collect());
        self
    }

    /// Gets the first value of an attribute.
    pub fn get_first(&self, attr: &str) -> Option<&str> {
        self.attributes
            .get(attr)
            .and_then(|v| v.first())
            .map(|s| s.as_str())
    }

    /// Gets all values of an attribute.
    pub fn get_all(&self, attr: &str) -> Option<&Vec<String>> {
        self.attributes.get(attr)
    }

    /// Converts into the wire representation sent to the client.
    pub fn into_result_entry(self) -> LdapSearchResultEntry {
        let mut attributes: Vec<LdapPartialAttribute> = self
            .attributes
            .into_iter()
            .map(|(atype, vals)| LdapPartialAttribute {
                atype,
                vals: vals.into_iter().map(String::into_bytes).collect(),
            })
            .collect();

        attributes.extend(
            self.bin_attributes
                .into_iter()
                .map(|(atype, vals)| LdapPartialAttribute { atype, vals }),
        );

        LdapSearchResultEntry {
            dn: self.dn,
            attributes,
        }
    }
}

impl From<SearchEntry> for Entry {
    fn from(entry: SearchEntry) -> Self {
        Self {
            dn: entry.dn,
            attributes: entry.attrs,
            bin_attributes: entry.bin_attrs,
        }
    }
}

/// Search scope forwarded to every backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchScope {
    /// Search only the base object.
    Base,
    /// Search only immediate children.
    OneLevel,
    /// Search the entire subtree.
    Subtree,
}

impl SearchScope {
    /// Maps the decoded wire scope. Descendant-style scopes collapse to
    /// subtree, the widest the backend protocol supports.
    pub fn from_wire(scope: &LdapSearchScope) -> Self {
        match scope {
            LdapSearchScope::Base => SearchScope::Base,
            LdapSearchScope::OneLevel => SearchScope::OneLevel,
            _ => SearchScope::Subtree,
        }
    }
}

impl From<SearchScope> for ldap3::Scope {
    fn from(scope: SearchScope) -> Self {
        match scope {
            SearchScope::Base => ldap3::Scope::Base,
            SearchScope::OneLevel => ldap3::Scope::OneLevel,
            SearchScope::Subtree => ldap3::Scope::Subtree,
        }
    }
}

impl Default for SearchScope {
    fn default() -> Self {
        Self::Subtree
    }
}

/// One decoded, backend-ready search operation.
#[derive(Debug, Clone)]
pub struct SearchSpec {
    pub base: String,
    pub scope: SearchScope,
    /// Rendered RFC 4515 filter string.
    pub filter: String,
    pub attrs: Vec<String>,
    /// Client-requested size limit (0 = none), forwarded to each backend.
    pub size_limit: i32,
    /// Client-requested time limit in seconds (0 = none).
    pub time_limit: i32,
}

impl SearchSpec {
    pub fn new(base: impl Into<String>, filter: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            scope: SearchScope::default(),
            filter: filter.into(),
            attrs: vec![],
            size_limit: 0,
            time_limit: 0,
        }
    }
}
