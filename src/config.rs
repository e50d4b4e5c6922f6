//! Node configuration
//!
//! Loaded once from TOML at startup (or on reload) and treated as
//! read-only policy by the rest of the crate.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::*;
use crate::error::ConfigError;
use crate::link::LinkMode;
use crate::node::voting::VoteMode;

/// Top-level configuration for one node instance
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub node: NodeSettings,
    pub timers: TimerConfig,
    pub links: LinkPolicy,
    pub voting: VotingConfig,
    pub network: NetworkConfig,
    pub api: ApiConfig,
    /// Node directory: node name (or `*`/`?` pattern) to transport address
    pub directory: BTreeMap<String, String>,
    /// Links brought up when the daemon starts
    pub startup_links: Vec<StartupLink>,
}

/// Identity and duplex behaviour of the local node
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeSettings {
    pub name: String,
    /// 0 = half duplex, 1 = half duplex with repeat, 2+ = full duplex repeater
    pub duplex: u8,
    /// CTCSS group this node acts on; "0" means none
    pub ctcss_group: String,
    /// Emit courtesy-tone telemetry on local unkey
    pub courtesy_tones: bool,
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self {
            name: "1999".to_string(),
            duplex: 2,
            ctcss_group: "0".to_string(),
            courtesy_tones: true,
        }
    }
}

/// Timer policy, all values in milliseconds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimerConfig {
    pub poll_interval_ms: u64,
    pub retry_ms: u64,
    pub rx_linger_ms: u64,
    pub newkey_ms: u64,
    pub redundant_tx_ms: u64,
    pub rx_failsafe_factor: u32,
    pub linklist_ms: u64,
    pub linklist_short_ms: u64,
    pub linklist_stale_factor: u32,
    pub disc_grace_ms: u64,
    pub hang_time_ms: u64,
    pub link_follow_ms: u64,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            retry_ms: DEFAULT_RETRY_MS,
            rx_linger_ms: DEFAULT_RX_LINGER_MS,
            newkey_ms: DEFAULT_NEWKEY_MS,
            redundant_tx_ms: DEFAULT_REDUNDANT_TX_MS,
            rx_failsafe_factor: 3,
            linklist_ms: DEFAULT_LINKLIST_MS,
            linklist_short_ms: DEFAULT_LINKLIST_SHORT_MS,
            linklist_stale_factor: 3,
            disc_grace_ms: DEFAULT_DISC_GRACE_MS,
            hang_time_ms: 0,
            link_follow_ms: 30_000,
        }
    }
}

impl TimerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn retry(&self) -> Duration {
        Duration::from_millis(self.retry_ms)
    }

    pub fn rx_linger(&self) -> Duration {
        Duration::from_millis(self.rx_linger_ms)
    }

    pub fn newkey(&self) -> Duration {
        Duration::from_millis(self.newkey_ms)
    }

    pub fn redundant_tx(&self) -> Duration {
        Duration::from_millis(self.redundant_tx_ms)
    }

    /// Loss-of-refresh window after which a newKey==1 peer is unkeyed
    pub fn rx_failsafe(&self) -> Duration {
        self.redundant_tx() * self.rx_failsafe_factor.max(1)
    }

    pub fn linklist(&self) -> Duration {
        Duration::from_millis(self.linklist_ms)
    }

    pub fn linklist_short(&self) -> Duration {
        Duration::from_millis(self.linklist_short_ms)
    }

    pub fn linklist_stale(&self) -> Duration {
        self.linklist() * self.linklist_stale_factor.max(1)
    }

    pub fn disc_grace(&self) -> Duration {
        Duration::from_millis(self.disc_grace_ms)
    }

    pub fn hang_time(&self) -> Duration {
        Duration::from_millis(self.hang_time_ms)
    }

    pub fn link_follow(&self) -> Duration {
        Duration::from_millis(self.link_follow_ms)
    }
}

/// Registry and retry policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkPolicy {
    pub max_links: usize,
    pub max_name_len: usize,
    pub max_retries_demand: u32,
    pub max_retries_permanent: u32,
    pub text_queue_len: usize,
    /// Nodes whose links carry keying only on demand, following local
    /// traffic for `link_follow_ms`
    pub demand_nodes: Vec<String>,
}

impl Default for LinkPolicy {
    fn default() -> Self {
        Self {
            max_links: MAX_LINKS,
            max_name_len: MAX_NODE_NAME_LEN,
            max_retries_demand: MAX_RETRIES_DEMAND,
            max_retries_permanent: MAX_RETRIES_PERMANENT,
            text_queue_len: 64,
            demand_nodes: Vec::new(),
        }
    }
}

/// Receiver voting policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VotingConfig {
    pub mode: VoteMode,
    pub margin: u32,
    /// Evaluate the arbitrator every N scheduler ticks
    pub interval_ticks: u32,
    /// Peers whose far end is itself a voting receiver
    pub voter_nodes: Vec<String>,
}

impl Default for VotingConfig {
    fn default() -> Self {
        Self {
            mode: VoteMode::Off,
            margin: 10,
            interval_ticks: 2,
            voter_nodes: Vec::new(),
        }
    }
}

/// Transport listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub bind_address: String,
    pub port: u16,
    pub keepalive_secs: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: DEFAULT_LINK_PORT,
            keepalive_secs: 15,
        }
    }
}

/// HTTP management API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub enabled: bool,
    pub bind_address: String,
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: "127.0.0.1".to_string(),
            port: DEFAULT_API_PORT,
        }
    }
}

/// A link the daemon brings up on start
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartupLink {
    pub node: String,
    #[serde(default = "default_startup_mode")]
    pub mode: LinkMode,
    #[serde(default)]
    pub permanent: bool,
}

fn default_startup_mode() -> LinkMode {
    LinkMode::Transceive
}

impl NodeConfig {
    /// Parse configuration from a TOML string
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: NodeConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&text)
    }

    /// Platform config location, e.g. `~/.config/rptlink/rptlink.toml`
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("org", "rptlink", "rptlink")
            .map(|dirs| dirs.config_dir().join("rptlink.toml"))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let name = &self.node.name;
        if name.is_empty() || name.len() > self.links.max_name_len {
            return Err(ConfigError::Invalid(format!("node name {:?}", name)));
        }
        if name.starts_with('0') {
            return Err(ConfigError::Invalid(
                "node names starting with '0' are reserved for local monitors".into(),
            ));
        }
        if name.contains(char::is_whitespace) {
            return Err(ConfigError::Invalid(format!("node name {:?} contains whitespace", name)));
        }
        if self.timers.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("poll_interval_ms must be non-zero".into()));
        }
        if self.voting.interval_ticks == 0 {
            return Err(ConfigError::Invalid("voting.interval_ticks must be non-zero".into()));
        }
        if self.links.max_links == 0 {
            return Err(ConfigError::Invalid("links.max_links must be non-zero".into()));
        }
        Ok(())
    }

    pub fn is_voter_node(&self, name: &str) -> bool {
        self.voting.voter_nodes.iter().any(|n| n == name)
    }

    pub fn is_demand_node(&self, name: &str) -> bool {
        self.links.demand_nodes.iter().any(|n| n == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = NodeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.timers.poll_interval(), Duration::from_millis(20));
        assert_eq!(config.timers.rx_failsafe(), Duration::from_millis(6000));
    }

    #[test]
    fn test_parse_toml() {
        let text = r#"
            [node]
            name = "2000"
            duplex = 2
            ctcss_group = "5"

            [voting]
            mode = "continuous"
            margin = 12
            voter_nodes = ["2100", "2101"]

            [links]
            demand_nodes = ["2002"]

            [directory]
            "2001" = "10.0.0.2:4570"
            "3*" = "hub.example.net:4570"

            [[startup_links]]
            node = "2001"
            permanent = true
        "#;

        let config = NodeConfig::from_toml(text).unwrap();
        assert_eq!(config.node.name, "2000");
        assert_eq!(config.node.ctcss_group, "5");
        assert_eq!(config.voting.mode, VoteMode::Continuous);
        assert_eq!(config.voting.margin, 12);
        assert!(config.is_voter_node("2101"));
        assert!(!config.is_voter_node("2001"));
        assert_eq!(config.directory.len(), 2);
        assert_eq!(config.startup_links[0].mode, LinkMode::Transceive);
        assert!(config.startup_links[0].permanent);
        assert!(config.is_demand_node("2002"));
        // unset fields keep their defaults
        assert_eq!(config.links.max_retries_demand, MAX_RETRIES_DEMAND);
    }

    #[test]
    fn test_reject_reserved_name() {
        let text = r#"
            [node]
            name = "0123"
        "#;
        assert!(matches!(
            NodeConfig::from_toml(text),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_reject_zero_poll_interval() {
        let mut config = NodeConfig::default();
        config.timers.poll_interval_ms = 0;
        assert!(config.validate().is_err());
    }
}
