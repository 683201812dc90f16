use std::collections::BTreeMap;

use tracing::debug;

/// A server believed reachable, keyed by its canonical base URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerCandidate {
    pub address: String,
    pub server_name: Option<String>,
    pub protocol_version: Option<String>,
    /// Consecutive scans this candidate failed to answer.
    pub misses: u32,
}

impl ServerCandidate {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            server_name: None,
            protocol_version: None,
            misses: 0,
        }
    }

    /// Name to show for this server: the announced name or the address.
    pub fn label(&self) -> &str {
        self.server_name.as_deref().unwrap_or(&self.address)
    }

    /// Fill metadata this candidate lacks from another sighting of the same
    /// address. Returns whether anything changed.
    pub(crate) fn absorb(&mut self, other: &ServerCandidate) -> bool {
        let mut changed = false;
        if other.server_name.is_some() && other.server_name != self.server_name {
            self.server_name = other.server_name.clone();
            changed = true;
        }
        if other.protocol_version.is_some() && other.protocol_version != self.protocol_version {
            self.protocol_version = other.protocol_version.clone();
            changed = true;
        }
        changed
    }
}

/// What changed when a scan result was merged.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MergeReport {
    pub discovered: Vec<ServerCandidate>,
    pub updated: Vec<ServerCandidate>,
    pub evicted: Vec<ServerCandidate>,
}

impl MergeReport {
    pub fn is_empty(&self) -> bool {
        self.discovered.is_empty() && self.updated.is_empty() && self.evicted.is_empty()
    }
}

/// Persistent candidate map with miss-count hysteresis, so a single dropped
/// broadcast does not flap a server out of view.
#[derive(Debug, Clone)]
pub struct CandidateSet {
    entries: BTreeMap<String, ServerCandidate>,
    max_misses: u32,
}

impl CandidateSet {
    pub fn new(max_misses: u32) -> Self {
        Self {
            entries: BTreeMap::new(),
            max_misses: max_misses.max(1),
        }
    }

    /// Merge one scan result. Present candidates reset to zero misses, absent
    /// ones gain a miss and are evicted once they reach the limit.
    pub fn merge(&mut self, scan: &[ServerCandidate]) -> MergeReport {
        let mut report = MergeReport::default();

        let mut evict = Vec::new();
        for (address, entry) in self.entries.iter_mut() {
            match scan.iter().find(|c| &c.address == address) {
                Some(seen) => {
                    let revived = entry.misses > 0;
                    entry.misses = 0;
                    if entry.absorb(seen) || revived {
                        report.updated.push(entry.clone());
                    }
                },
                None => {
                    entry.misses += 1;
                    debug!(server = %address, misses = entry.misses, "candidate missed a scan");
                    if entry.misses >= self.max_misses {
                        evict.push(address.clone());
                    }
                },
            }
        }

        for address in evict {
            if let Some(gone) = self.entries.remove(&address) {
                debug!(server = %address, "candidate evicted");
                report.evicted.push(gone);
            }
        }

        for seen in scan {
            if !self.entries.contains_key(&seen.address) {
                let fresh = ServerCandidate {
                    misses: 0,
                    ..seen.clone()
                };
                debug!(server = %fresh.address, "candidate discovered");
                self.entries.insert(fresh.address.clone(), fresh.clone());
                report.discovered.push(fresh);
            }
        }

        report
    }

    pub fn get(&self, address: &str) -> Option<&ServerCandidate> {
        self.entries.get(address)
    }

    pub fn list(&self) -> Vec<ServerCandidate> {
        self.entries.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
