//! Name lookup for SNI-based binding selection
//!
//! Two tiers: exact names, then single-label wildcards (`*.example.com`
//! covers `api.example.com` but not `a.b.example.com`). All names are
//! compared lowercase.

use std::collections::HashMap;

/// Maps identity names to binding positions
#[derive(Debug, Default, Clone)]
pub struct CertificateIndex {
    exact: HashMap<String, usize>,
    wildcard: HashMap<String, usize>,
}

impl CertificateIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a name for a binding. The earliest binding keeps a name.
    pub fn insert(&mut self, name: &str, binding: usize) {
        let name = normalize(name);
        if name.is_empty() {
            return;
        }

        match name.strip_prefix("*.") {
            Some(suffix) if !suffix.is_empty() && !suffix.contains('*') => {
                self.wildcard.entry(suffix.to_string()).or_insert(binding);
            }
            _ => {
                self.exact.entry(name).or_insert(binding);
            }
        }
    }

    /// Find the binding for a requested name
    pub fn lookup(&self, requested: &str) -> Option<usize> {
        let host = normalize(requested);
        if host.is_empty() {
            return None;
        }

        if let Some(binding) = self.exact.get(&host) {
            return Some(*binding);
        }

        // A wildcard covers exactly one leading label
        let (_, parent) = host.split_once('.')?;
        self.wildcard.get(parent).copied()
    }

    pub fn exact_len(&self) -> usize {
        self.exact.len()
    }

    pub fn wildcard_len(&self) -> usize {
        self.wildcard.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exact.is_empty() && self.wildcard.is_empty()
    }
}

fn normalize(name: &str) -> String {
    name.trim().trim_end_matches('.').to_ascii_lowercase()
}
