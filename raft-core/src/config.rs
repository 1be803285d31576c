//! Static cluster configuration and timing tunables.

use crate::types::PeerAddr;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Timing parameters for the election and replication drivers. Defaults
/// match the specification's §6.3 tunables exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tunables {
    pub follower_timeout_min_ms: u64,
    pub follower_timeout_max_ms: u64,
    pub candidate_election_min_ms: u64,
    pub candidate_election_max_ms: u64,
    pub heartbeat_interval_ms: u64,
}

impl Default for Tunables {
    fn default() -> Self {
        Self {
            follower_timeout_min_ms: 300,
            follower_timeout_max_ms: 600,
            candidate_election_min_ms: 150,
            candidate_election_max_ms: 300,
            heartbeat_interval_ms: 100,
        }
    }
}

impl Tunables {
    pub fn follower_timeout_range(&self) -> (Duration, Duration) {
        (
            Duration::from_millis(self.follower_timeout_min_ms),
            Duration::from_millis(self.follower_timeout_max_ms),
        )
    }

    pub fn candidate_election_range(&self) -> (Duration, Duration) {
        (
            Duration::from_millis(self.candidate_election_min_ms),
            Duration::from_millis(self.candidate_election_max_ms),
        )
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }
}

/// The statically configured cluster: who we are, and who everyone else is.
/// Fixed for the lifetime of a node (membership changes are out of scope).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    self_addr: PeerAddr,
    cluster_addrs: Vec<PeerAddr>,
    #[serde(default)]
    tunables: Tunables,
}

impl ClusterConfig {
    /// `cluster_addrs` must include `self_addr`; it is deduplicated and
    /// sorted so iteration order is deterministic across nodes (useful for
    /// tests and for reproducible logs).
    pub fn new(self_addr: impl Into<PeerAddr>, mut cluster_addrs: Vec<PeerAddr>) -> Self {
        let self_addr = self_addr.into();
        if !cluster_addrs.contains(&self_addr) {
            cluster_addrs.push(self_addr.clone());
        }
        cluster_addrs.sort();
        cluster_addrs.dedup();

        Self {
            self_addr,
            cluster_addrs,
            tunables: Tunables::default(),
        }
    }

    pub fn with_tunables(mut self, tunables: Tunables) -> Self {
        self.tunables = tunables;
        self
    }

    pub fn self_addr(&self) -> &PeerAddr {
        &self.self_addr
    }

    pub fn cluster_addrs(&self) -> &[PeerAddr] {
        &self.cluster_addrs
    }

    /// All cluster members except ourselves.
    pub fn other_addrs(&self) -> Vec<PeerAddr> {
        self.cluster_addrs
            .iter()
            .filter(|a| **a != self.self_addr)
            .cloned()
            .collect()
    }

    pub fn tunables(&self) -> &Tunables {
        &self.tunables
    }

    /// Strict majority of `cluster_addrs`, e.g. 2 for a 3-node cluster.
    pub fn majority(&self) -> usize {
        self.cluster_addrs.len() / 2 + 1
    }

    pub fn cluster_size(&self) -> usize {
        self.cluster_addrs.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn other_addrs_excludes_self() {
        let cfg = ClusterConfig::new(
            "a",
            vec!["a".to_string(), "b".to_string(), "c".to_string()],
        );
        let mut others = cfg.other_addrs();
        others.sort();
        assert_eq!(others, vec!["b".to_string(), "c".to_string()]);
    }

    #[test]
    fn self_addr_implicitly_included_in_cluster() {
        let cfg = ClusterConfig::new("a", vec!["b".to_string(), "c".to_string()]);
        assert_eq!(cfg.cluster_size(), 3);
    }

    #[test]
    fn majority_is_strict() {
        let cfg = ClusterConfig::new("a", vec!["a".into(), "b".into(), "c".into()]);
        assert_eq!(cfg.majority(), 2);

        let cfg4 = ClusterConfig::new("a", vec!["a".into(), "b".into(), "c".into(), "d".into()]);
        assert_eq!(cfg4.majority(), 3);
    }

    #[test]
    fn default_tunables_match_spec() {
        let t = Tunables::default();
        assert_eq!(t.follower_timeout_min_ms, 300);
        assert_eq!(t.follower_timeout_max_ms, 600);
        assert_eq!(t.candidate_election_min_ms, 150);
        assert_eq!(t.candidate_election_max_ms, 300);
        assert_eq!(t.heartbeat_interval_ms, 100);
    }
}
