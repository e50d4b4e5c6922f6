//! Node directory: resolves node names to transport addresses

use std::collections::{BTreeMap, HashMap};

/// Name-to-address lookup used by the lifecycle manager
pub trait NodeDirectory: Send + Sync {
    fn lookup(&self, name: &str) -> Option<String>;
}

/// Directory built from configuration.
///
/// Exact entries win over patterns. Patterns use `*` (any run of
/// characters) and `?` (any single character) and are tried longest
/// first. An address may contain `{node}`, replaced with the looked-up
/// name.
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    exact: HashMap<String, String>,
    patterns: Vec<(String, String)>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: &BTreeMap<String, String>) -> Self {
        let mut dir = Self::new();
        for (name, address) in entries {
            dir.insert(name.clone(), address.clone());
        }
        dir
    }

    pub fn insert(&mut self, name: impl Into<String>, address: impl Into<String>) {
        let name = name.into();
        let address = address.into();
        if name.contains(['*', '?']) {
            self.patterns.retain(|(p, _)| *p != name);
            self.patterns.push((name, address));
            self.patterns.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        } else {
            self.exact.insert(name, address);
        }
    }

    pub fn len(&self) -> usize {
        self.exact.len() + self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl NodeDirectory for StaticDirectory {
    fn lookup(&self, name: &str) -> Option<String> {
        let address = self.exact.get(name).or_else(|| {
            self.patterns
                .iter()
                .find(|(pattern, _)| glob_match(pattern.as_bytes(), name.as_bytes()))
                .map(|(_, address)| address)
        })?;
        Some(address.replace("{node}", name))
    }
}

fn glob_match(pattern: &[u8], name: &[u8]) -> bool {
    let (mut p, mut n) = (0, 0);
    let mut star: Option<(usize, usize)> = None;
    while n < name.len() {
        if p < pattern.len() && (pattern[p] == b'?' || pattern[p] == name[n]) {
            p += 1;
            n += 1;
        } else if p < pattern.len() && pattern[p] == b'*' {
            star = Some((p, n));
            p += 1;
        } else if let Some((sp, sn)) = star {
            p = sp + 1;
            n = sn + 1;
            star = Some((sp, sn + 1));
        } else {
            return false;
        }
    }
    pattern[p..].iter().all(|&c| c == b'*')
}
