//! TOML configuration for the tether daemon.
//!
//! Every section is optional; a missing file means all defaults.

use std::path::Path;

use serde::Deserialize;
use tether_cluster::BalancerConfig;
use tether_types::{
    DEFAULT_RESET_CHANNEL_PREFIX, DEFAULT_VNODES_PER_NODE, NodeDescriptor, SpaceId,
};

/// Top-level configuration, parsed from TOML.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Hash ring tuning.
    pub ring: RingSection,
    /// Reset notification channels.
    pub notify: NotifySection,
    /// Logging configuration.
    pub log: LogSection,
    /// Static seed nodes, applied as one discovery add at startup.
    pub nodes: Vec<SeedNode>,
}

/// `[ring]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RingSection {
    /// Virtual nodes per physical node.
    pub vnodes_per_node: u16,
}

impl Default for RingSection {
    fn default() -> Self {
        Self {
            vnodes_per_node: DEFAULT_VNODES_PER_NODE,
        }
    }
}

/// `[notify]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct NotifySection {
    /// Reset channel of a node = prefix + node id.
    pub channel_prefix: String,
}

impl Default for NotifySection {
    fn default() -> Self {
        Self {
            channel_prefix: DEFAULT_RESET_CHANNEL_PREFIX.to_string(),
        }
    }
}

/// `[log]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LogSection {
    /// Log level filter (e.g. `"info"`, `"debug"`, `"warn"`).
    pub level: String,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// `[[nodes]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct SeedNode {
    /// Host name or IP.
    pub host: String,
    /// Listening port.
    pub port: u16,
    /// Accepted spaces.
    #[serde(default)]
    pub spaces: Vec<u32>,
    /// Advertised connection cap.
    #[serde(default)]
    pub max_connections: Option<u32>,
}

impl SeedNode {
    /// The discovery descriptor for this seed.
    pub fn descriptor(&self) -> NodeDescriptor {
        let mut descriptor =
            NodeDescriptor::new(&self.host, self.port, self.spaces.iter().copied().map(SpaceId));
        descriptor.max_connections = self.max_connections;
        descriptor
    }
}

impl CliConfig {
    /// Load config from a TOML file, or use defaults if no path given.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(p) => {
                let content = std::fs::read_to_string(p)?;
                let config: CliConfig = toml::from_str(&content)?;
                Ok(config)
            }
            None => Ok(Self::default()),
        }
    }

    /// Parse config from a TOML string (used in tests).
    #[cfg(test)]
    pub fn from_toml(s: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(s)?)
    }

    /// Library-side balancer settings.
    pub fn balancer(&self) -> BalancerConfig {
        BalancerConfig {
            vnodes_per_node: self.ring.vnodes_per_node,
            channel_prefix: self.notify.channel_prefix.clone(),
        }
    }

    /// Seed nodes as discovery descriptors.
    pub fn seed_descriptors(&self) -> Vec<NodeDescriptor> {
        self.nodes.iter().map(SeedNode::descriptor).collect()
    }
}
