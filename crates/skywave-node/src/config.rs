//! Daemon configuration: YAML file plus CLI overrides.
//!
//! The file schema mirrors the documented option names (`mesh.*`,
//! `ardop.*`, `tcp_mesh.*`, `chat.*`); everything is optional except the
//! callsign, which must come from the file or the command line. The
//! result of [`FileConfig::build`] is the typed setup record the runtime
//! consumes — the engine itself never sees YAML.

use std::{collections::HashMap, path::PathBuf, time::Duration};

use serde::Deserialize;
use skywave_core::{
    ChannelSyncMode, ChannelSyncPolicy, ChatConfig, MeshConfig, NodeMode, RetentionConfig,
    SyncConfig,
};
use skywave_link::tcp::TcpLinkConfig;

use crate::DaemonError;

/// Fully resolved daemon setup.
#[derive(Debug, Clone)]
pub struct DaemonSetup {
    /// Station callsign.
    pub callsign: String,
    /// Mesh engine tuning.
    pub mesh: MeshConfig,
    /// Chat layer tuning.
    pub chat: ChatConfig,
    /// Chat database path.
    pub db_path: PathBuf,
    /// Outbound links to bring up.
    pub links: Vec<TcpLinkConfig>,
    /// Optional wired-mesh listen address with its admission password.
    pub listen: Option<(String, Option<String>)>,
    /// Pre-shared key for the opt-in payload encryption, if enabled.
    pub payload_key: Option<[u8; 32]>,
}

/// `mesh:` section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MeshSection {
    /// Station callsign.
    pub callsign: Option<String>,
    /// Seconds between OGM beacons.
    pub ogm_interval_s: Option<u64>,
    /// TTL stamped on originated frames.
    pub initial_ttl: Option<u8>,
    /// Seconds before a silent neighbor is dropped.
    pub neighbor_timeout_s: Option<u64>,
    /// Dedup cache capacity.
    pub dedup_capacity: Option<usize>,
    /// Dedup entry lifetime in seconds.
    pub dedup_ttl_s: Option<u64>,
}

/// `ardop:` section — the HF/VHF modem bridge.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ArdopSection {
    /// Modem host.
    pub host: String,
    /// Modem data port.
    pub port: u16,
    /// First reconnect delay in seconds.
    pub reconnect_backoff_initial_s: Option<u64>,
    /// Reconnect delay cap in seconds.
    pub reconnect_backoff_max_s: Option<u64>,
}

/// `tcp_mesh:` section — wired backbone links.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TcpMeshSection {
    /// Listen address for inbound peers.
    pub listen: Option<String>,
    /// Peers to dial.
    #[serde(default)]
    pub peers: Vec<String>,
    /// Link-admission password (also required of inbound peers).
    pub password: Option<String>,
}

/// `chat.sync.per_channel` entry.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PerChannelSection {
    /// `eager`, `deferred`, or `off`.
    pub mode: String,
    /// Max rows per sync request.
    pub max_burst: Option<u32>,
}

/// `chat.sync:` section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SyncSection {
    /// Rows per inventory request.
    pub inventory_last_n: Option<u32>,
    /// Seconds before a sync request is retried.
    pub request_timeout_s: Option<u64>,
    /// Attempt cap per outstanding range.
    pub max_retries: Option<u32>,
    /// Per-channel policies.
    #[serde(default)]
    pub per_channel: HashMap<String, PerChannelSection>,
}

/// `chat.retention:` section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetentionSection {
    /// Whether pruning runs.
    pub enabled: Option<bool>,
    /// Age limit in days.
    pub days: Option<u32>,
}

/// `chat:` section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChatSection {
    /// Chat database path.
    pub db_path: Option<String>,
    /// `full`, `relay`, or `monitor`.
    pub node_mode: Option<String>,
    /// Display nick; defaults to the callsign.
    pub nick: Option<String>,
    /// Sync tuning.
    #[serde(default)]
    pub sync: SyncSection,
    /// Retention policy.
    #[serde(default)]
    pub retention: RetentionSection,
}

/// `encryption:` section. Off unless the explicit flag is set.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EncryptionSection {
    /// The explicit, clearly named opt-in.
    #[serde(default)]
    pub enable_payload_encryption: bool,
    /// 64 hex digits of pre-shared key.
    pub preshared_key_hex: Option<String>,
}

/// Whole config file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    /// Mesh options.
    #[serde(default)]
    pub mesh: MeshSection,
    /// Modem bridge.
    pub ardop: Option<ArdopSection>,
    /// Wired mesh.
    #[serde(default)]
    pub tcp_mesh: TcpMeshSection,
    /// Chat options.
    #[serde(default)]
    pub chat: ChatSection,
    /// Payload encryption (non-amateur deployments only).
    #[serde(default)]
    pub encryption: EncryptionSection,
}

/// CLI values that override the file.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    /// `--callsign`.
    pub callsign: Option<String>,
    /// `--db-path`.
    pub db_path: Option<PathBuf>,
    /// `--mode`.
    pub mode: Option<NodeMode>,
}

impl FileConfig {
    /// Parse a YAML config file.
    ///
    /// # Errors
    ///
    /// - [`DaemonError::Config`] on unreadable or invalid YAML
    pub fn load(path: &std::path::Path) -> Result<Self, DaemonError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| DaemonError::Config(format!("cannot read {}: {e}", path.display())))?;
        serde_yaml::from_str(&text)
            .map_err(|e| DaemonError::Config(format!("invalid config {}: {e}", path.display())))
    }

    /// Resolve file values and CLI overrides into a typed setup.
    ///
    /// # Errors
    ///
    /// - [`DaemonError::Config`] if the callsign is missing, a mode or
    ///   policy string is unrecognized, or the encryption key is malformed
    pub fn build(self, cli: CliOverrides) -> Result<DaemonSetup, DaemonError> {
        let callsign = cli
            .callsign
            .or(self.mesh.callsign)
            .ok_or_else(|| DaemonError::Config("mesh.callsign is required".into()))?;

        let mesh_defaults = MeshConfig::default();
        let mesh = MeshConfig {
            ogm_interval: self
                .mesh
                .ogm_interval_s
                .map_or(mesh_defaults.ogm_interval, Duration::from_secs),
            initial_ttl: self.mesh.initial_ttl.unwrap_or(mesh_defaults.initial_ttl),
            neighbor_timeout: self
                .mesh
                .neighbor_timeout_s
                .map_or(mesh_defaults.neighbor_timeout, Duration::from_secs),
            dedup_capacity: self.mesh.dedup_capacity.unwrap_or(mesh_defaults.dedup_capacity),
            dedup_ttl: self.mesh.dedup_ttl_s.map_or(mesh_defaults.dedup_ttl, Duration::from_secs),
            ..mesh_defaults
        };

        let node_mode = match (cli.mode, self.chat.node_mode) {
            (Some(mode), _) => mode,
            (None, Some(text)) => text.parse().map_err(DaemonError::Config)?,
            (None, None) => NodeMode::Full,
        };

        let sync_defaults = SyncConfig::default();
        let mut per_channel = HashMap::new();
        for (channel, section) in self.chat.sync.per_channel {
            let mode = match section.mode.as_str() {
                "eager" => ChannelSyncMode::Eager,
                "deferred" => ChannelSyncMode::Deferred,
                "off" => ChannelSyncMode::Off,
                other => {
                    return Err(DaemonError::Config(format!(
                        "unknown sync mode {other:?} for channel {channel:?}"
                    )));
                },
            };
            per_channel.insert(channel, ChannelSyncPolicy {
                mode,
                max_burst: section.max_burst.unwrap_or(sync_defaults.default_policy.max_burst),
            });
        }

        let sync = SyncConfig {
            inventory_last_n: self
                .chat
                .sync
                .inventory_last_n
                .unwrap_or(sync_defaults.inventory_last_n),
            request_timeout: self
                .chat
                .sync
                .request_timeout_s
                .map_or(sync_defaults.request_timeout, Duration::from_secs),
            max_retries: self.chat.sync.max_retries.unwrap_or(sync_defaults.max_retries),
            per_channel,
            ..sync_defaults
        };

        let retention_defaults = RetentionConfig::default();
        let retention = RetentionConfig {
            enabled: self.chat.retention.enabled.unwrap_or(retention_defaults.enabled),
            days: self.chat.retention.days.unwrap_or(retention_defaults.days),
        };

        let chat = ChatConfig {
            node_mode,
            nick: self.chat.nick.unwrap_or_default(),
            sync,
            retention,
        };

        let db_path = cli
            .db_path
            .or(self.chat.db_path.map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("skywave-chat.db"));

        let mut links = Vec::new();
        if let Some(ardop) = self.ardop {
            let mut link = TcpLinkConfig::new("ardop", format!("{}:{}", ardop.host, ardop.port));
            if let Some(s) = ardop.reconnect_backoff_initial_s {
                link.backoff_initial = Duration::from_secs(s);
            }
            if let Some(s) = ardop.reconnect_backoff_max_s {
                link.backoff_max = Duration::from_secs(s);
            }
            links.push(link);
        }
        for (index, peer) in self.tcp_mesh.peers.iter().enumerate() {
            let link = TcpLinkConfig {
                password: self.tcp_mesh.password.clone(),
                ..TcpLinkConfig::new(format!("tcp{index}"), peer.clone())
            };
            links.push(link);
        }
        let listen = self
            .tcp_mesh
            .listen
            .map(|addr| (addr, self.tcp_mesh.password.clone()));

        let payload_key = if self.encryption.enable_payload_encryption {
            let hex_key = self.encryption.preshared_key_hex.ok_or_else(|| {
                DaemonError::Config(
                    "encryption.enable_payload_encryption requires preshared_key_hex".into(),
                )
            })?;
            let bytes = hex::decode(&hex_key)
                .map_err(|e| DaemonError::Config(format!("bad preshared_key_hex: {e}")))?;
            let key: [u8; 32] = bytes.try_into().map_err(|_| {
                DaemonError::Config("preshared_key_hex must be 64 hex digits".into())
            })?;
            Some(key)
        } else {
            None
        };

        Ok(DaemonSetup { callsign, mesh, chat, db_path, links, listen, payload_key })
    }
}
