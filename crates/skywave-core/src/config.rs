//! Typed engine configuration.
//!
//! The core never reads configuration files; the daemon (or a test) builds
//! these records and passes them in. Defaults match a conservative HF
//! deployment: slow beacons, patient timeouts, small bursts.

use std::{collections::HashMap, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};

/// Node role. Gates local behavior only — a relay and a full node are
/// indistinguishable on the air for traffic in transit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeMode {
    /// Full participation: originates, stores, syncs.
    #[default]
    Full,
    /// Forwards everything, originates nothing, stores nothing.
    Relay,
    /// Forwards like a relay and additionally emits diagnostics.
    Monitor,
}

impl NodeMode {
    /// Whether this mode stores chat rows and participates in sync.
    #[must_use]
    pub const fn stores_chat(self) -> bool {
        matches!(self, Self::Full)
    }

    /// Whether this mode may originate chat traffic.
    #[must_use]
    pub const fn originates_chat(self) -> bool {
        matches!(self, Self::Full)
    }

    /// Static name, for logs and error messages.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Relay => "relay",
            Self::Monitor => "monitor",
        }
    }
}

impl FromStr for NodeMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "full" => Ok(Self::Full),
            "relay" => Ok(Self::Relay),
            "monitor" => Ok(Self::Monitor),
            other => Err(format!("unknown node mode {other:?} (full|relay|monitor)")),
        }
    }
}

/// Mesh-layer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    /// Interval between self-originated OGM beacons.
    pub ogm_interval: Duration,
    /// Fraction of the OGM interval used as random jitter, in percent.
    /// Jitter avoids synchronized collisions between nodes sharing a
    /// channel.
    pub ogm_jitter_pct: u8,
    /// TTL stamped on every self-originated frame.
    pub initial_ttl: u8,
    /// A neighbor unseen for this long is dropped, and routes through it
    /// invalidated.
    pub neighbor_timeout: Duration,
    /// Dedup cache capacity; oldest entries are evicted beyond this.
    pub dedup_capacity: usize,
    /// Dedup entries older than this are expired. Must exceed expected
    /// propagation time across the mesh.
    pub dedup_ttl: Duration,
    /// Cost added to an OGM's cumulative metric per received hop. Clamped
    /// to at least 1 so metrics stay strictly monotone along a path.
    pub link_cost: u8,
    /// DATA payloads longer than this are candidates for compression.
    pub compress_threshold: usize,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            ogm_interval: Duration::from_secs(60),
            ogm_jitter_pct: 10,
            initial_ttl: 8,
            neighbor_timeout: Duration::from_secs(300),
            dedup_capacity: 4096,
            dedup_ttl: Duration::from_secs(600),
            link_cost: 1,
            compress_threshold: 160,
        }
    }
}

/// Per-channel sync policy mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelSyncMode {
    /// Repair as soon as gaps confirm.
    #[default]
    Eager,
    /// Enqueue repairs; emit only when no eager channel has outstanding
    /// work.
    Deferred,
    /// Never initiate sync for this channel.
    Off,
}

/// Per-channel sync policy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelSyncPolicy {
    /// When this channel is allowed to initiate repairs.
    pub mode: ChannelSyncMode,
    /// Maximum rows requested in a single sync request.
    pub max_burst: u32,
}

impl Default for ChannelSyncPolicy {
    fn default() -> Self {
        Self { mode: ChannelSyncMode::Eager, max_burst: 32 }
    }
}

/// Gap detection and sync configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Rows enumerated by an inventory request.
    pub inventory_last_n: u32,
    /// How long to wait for an answer before retrying a request.
    pub request_timeout: Duration,
    /// Hard cap on attempts per outstanding range.
    pub max_retries: u32,
    /// A gap confirms once the origin moves this many seqnos past its end.
    pub confirm_margin: u32,
    /// A gap also confirms after this much time since first evidence.
    pub confirm_timeout: Duration,
    /// Minimum spacing between answers to the same requester, protecting RF
    /// airtime.
    pub responder_min_interval: Duration,
    /// Per-channel overrides; unlisted channels use the default policy.
    pub per_channel: HashMap<String, ChannelSyncPolicy>,
    /// Policy for channels without an override.
    pub default_policy: ChannelSyncPolicy,
}

impl SyncConfig {
    /// Effective policy for a channel.
    #[must_use]
    pub fn policy_for(&self, channel: &str) -> ChannelSyncPolicy {
        self.per_channel.get(channel).copied().unwrap_or(self.default_policy)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            inventory_last_n: 50,
            request_timeout: Duration::from_secs(90),
            max_retries: 4,
            confirm_margin: 3,
            confirm_timeout: Duration::from_secs(60),
            responder_min_interval: Duration::from_secs(30),
            per_channel: HashMap::new(),
            default_policy: ChannelSyncPolicy::default(),
        }
    }
}

/// Retention policy for stored chat rows.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Whether pruning runs at all.
    pub enabled: bool,
    /// Rows older than this many days are pruned.
    pub days: u32,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self { enabled: false, days: 30 }
    }
}

/// Chat-layer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Node role.
    pub node_mode: NodeMode,
    /// Display nick attached to outbound messages. Defaults to the
    /// callsign when empty.
    pub nick: String,
    /// Gap detection and sync tuning.
    pub sync: SyncConfig,
    /// Retention policy.
    pub retention: RetentionConfig,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            node_mode: NodeMode::Full,
            nick: String::new(),
            sync: SyncConfig::default(),
            retention: RetentionConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_mode_parses() {
        assert_eq!("full".parse::<NodeMode>(), Ok(NodeMode::Full));
        assert_eq!("relay".parse::<NodeMode>(), Ok(NodeMode::Relay));
        assert_eq!("monitor".parse::<NodeMode>(), Ok(NodeMode::Monitor));
        assert!("router".parse::<NodeMode>().is_err());
    }

    #[test]
    fn relay_and_monitor_never_store_or_originate() {
        for mode in [NodeMode::Relay, NodeMode::Monitor] {
            assert!(!mode.stores_chat());
            assert!(!mode.originates_chat());
        }
        assert!(NodeMode::Full.stores_chat());
    }

    #[test]
    fn channel_policy_lookup_falls_back_to_default() {
        let config = SyncConfig {
            per_channel: [(
                "#emergency".to_string(),
                ChannelSyncPolicy { mode: ChannelSyncMode::Eager, max_burst: 64 },
            )]
            .into_iter()
            .collect(),
            default_policy: ChannelSyncPolicy { mode: ChannelSyncMode::Deferred, max_burst: 8 },
            ..SyncConfig::default()
        };

        assert_eq!(config.policy_for("#emergency").max_burst, 64);
        assert_eq!(config.policy_for("#casual").mode, ChannelSyncMode::Deferred);
    }
}
