use super::network::{AclParseError, NetworkSpec};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use std::sync::Arc;

/// One allow or deny rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AclEntry {
    /// Network the rule applies to.
    pub network: NetworkSpec,
    /// `true` to allow, `false` to deny.
    pub allow: bool,
}

impl AclEntry {
    /// An allow rule.
    #[must_use]
    pub fn allow(network: NetworkSpec) -> Self {
        Self {
            network,
            allow: true,
        }
    }

    /// A deny rule.
    #[must_use]
    pub fn deny(network: NetworkSpec) -> Self {
        Self {
            network,
            allow: false,
        }
    }
}

impl fmt::Display for AclEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = if self.allow { "allow" } else { "deny" };
        write!(f, "{}:{}", verb, self.network)
    }
}

impl FromStr for AclEntry {
    type Err = AclParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (verb, network) = s
            .trim()
            .split_once(':')
            .ok_or_else(|| AclParseError::InvalidEntry(s.to_string()))?;
        let allow = match verb.trim().to_ascii_lowercase().as_str() {
            "allow" => true,
            "deny" => false,
            _ => return Err(AclParseError::InvalidEntry(s.to_string())),
        };
        Ok(Self {
            network: network.parse()?,
            allow,
        })
    }
}

/// Ordered, shareable list of ACL entries.
///
/// Clones share the same entries: a change made through any clone is seen
/// by the bridge on its next accepted connection.
#[derive(Debug, Clone, Default)]
pub struct AccessControlList {
    entries: Arc<RwLock<Vec<AclEntry>>>,
}

impl AccessControlList {
    /// Create an empty list (denies everyone).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a list from entries, keeping their order.
    #[must_use]
    pub fn from_entries(entries: impl IntoIterator<Item = AclEntry>) -> Self {
        Self {
            entries: Arc::new(RwLock::new(entries.into_iter().collect())),
        }
    }

    /// Append an entry at the lowest priority.
    pub fn add(&self, entry: AclEntry) {
        self.entries.write().push(entry);
    }

    /// Insert an entry at `index`, clamped to the list length.
    pub fn insert(&self, index: usize, entry: AclEntry) {
        let mut entries = self.entries.write();
        let index = index.min(entries.len());
        entries.insert(index, entry);
    }

    /// Remove the first entry equal to `entry`. Returns whether one was found.
    pub fn remove(&self, entry: &AclEntry) -> bool {
        let mut entries = self.entries.write();
        match entries.iter().position(|e| e == entry) {
            Some(index) => {
                entries.remove(index);
                true
            }
            None => false,
        }
    }

    /// Remove every entry.
    pub fn clear(&self) {
        self.entries.write().clear();
    }

    /// Snapshot of the entries in evaluation order.
    #[must_use]
    pub fn entries(&self) -> Vec<AclEntry> {
        self.entries.read().clone()
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the list has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Decide whether `peer` may connect.
    #[must_use]
    pub fn is_allowed(&self, peer: IpAddr) -> bool {
        self.entries
            .read()
            .iter()
            .find(|entry| entry.network.contains(peer))
            .is_some_and(|entry| entry.allow)
    }
}
