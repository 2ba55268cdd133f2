use std::{
    collections::HashMap,
    net::{IpAddr, Ipv4Addr},
};

use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub(crate) struct Config {
    #[serde(default = "default_address")]
    pub(crate) address: IpAddr,
    #[serde(default = "default_port")]
    pub(crate) port: u16,
    pub(crate) tls: Option<TlsConfig>,

    /// Hostnames this node answers on. Requests addressed to one of these
    /// hosts are never resolved to a token, and no token may take one of
    /// these names.
    #[serde(default)]
    pub(crate) hostnames: Vec<String>,

    #[serde(default)]
    pub(crate) cluster: ClusterConfig,

    /// Root recorded on newly created tokens. Defaults to the cluster name.
    pub(crate) root: Option<String>,

    /// How many prior revisions a token record retains.
    #[serde(default = "default_history_length")]
    pub(crate) history_length: usize,

    /// Per-owner cap on live (non-deleted) tokens. Absent means unlimited.
    #[serde(default = "default_owner_token_limit")]
    pub(crate) owner_token_limit: Option<usize>,

    /// Base URLs of sibling registry replicas, e.g.
    /// `https://replica-2.example.net:9091`.
    #[serde(default)]
    pub(crate) peers: Vec<String>,
    #[serde(default = "default_peer_timeout_secs")]
    pub(crate) peer_timeout_secs: u64,
    #[serde(default = "default_max_concurrent_peer_requests")]
    pub(crate) max_concurrent_peer_requests: u16,

    /// Principals granted the administer-token and unrestricted run-as
    /// capabilities.
    #[serde(default)]
    pub(crate) admins: Vec<String>,

    #[serde(default)]
    pub(crate) database: DatabaseConfig,
    #[serde(default = "default_kv_cache_capacity")]
    pub(crate) kv_cache_capacity: usize,

    #[serde(default = "default_max_request_size")]
    pub(crate) max_request_size: u32,
    #[serde(default = "default_log")]
    pub(crate) log: String,
}

impl Config {
    /// The root stamped onto tokens that do not already carry one.
    pub(crate) fn token_root(&self) -> &str {
        self.root.as_deref().unwrap_or(&self.cluster.name)
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct TlsConfig {
    pub(crate) certs: String,
    pub(crate) key: String,
}

#[derive(Clone, Debug, Deserialize)]
pub(crate) struct ClusterConfig {
    #[serde(default = "default_cluster_name")]
    pub(crate) name: String,

    /// Static host → cluster mapping, loaded at boot and consulted before
    /// falling back to [`ClusterConfig::name`].
    #[serde(default)]
    pub(crate) host_overrides: HashMap<String, String>,
}

impl ClusterConfig {
    /// Calculates the cluster for a request, from its `Host` header when one
    /// was sent.
    pub(crate) fn calculate(&self, host: Option<&str>) -> String {
        host.map(strip_port)
            .and_then(|host| self.host_overrides.get(host))
            .unwrap_or(&self.name)
            .clone()
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            name: default_cluster_name(),
            host_overrides: HashMap::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct DatabaseConfig {
    #[serde(default = "default_database_backend")]
    pub(crate) backend: String,
    #[serde(default)]
    pub(crate) path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: default_database_backend(),
            path: String::new(),
        }
    }
}

/// Drops a trailing `:port` from a host header value.
pub(crate) fn strip_port(host: &str) -> &str {
    host.rsplit_once(':').map_or(host, |(name, _port)| name)
}

fn default_address() -> IpAddr {
    Ipv4Addr::LOCALHOST.into()
}

fn default_port() -> u16 {
    9091
}

fn default_cluster_name() -> String {
    "default-cluster".to_owned()
}

fn default_history_length() -> usize {
    5
}

fn default_owner_token_limit() -> Option<usize> {
    Some(1000)
}

fn default_peer_timeout_secs() -> u64 {
    30
}

fn default_max_concurrent_peer_requests() -> u16 {
    16
}

fn default_database_backend() -> String {
    if cfg!(feature = "sqlite") {
        "sqlite".to_owned()
    } else {
        "memory".to_owned()
    }
}

fn default_kv_cache_capacity() -> usize {
    10_000
}

fn default_max_request_size() -> u32 {
    // Default to 1 MB; token bodies are small
    1024 * 1024
}

fn default_log() -> String {
    "info".to_owned()
}
