// Copyright (c) 2026 Duskboard
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Process configuration: a TOML file read once at startup, with a
//! handful of environment-variable overrides for the knobs that vary
//! per deployment (data directory, listen address, bootstrap nodes).

use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::core::cache::CacheLimits;

/// Configuration load/parse failures. Fatal at startup; never recovered.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Could not read the config file.
    #[error("read config file: {0}")]
    Read(#[from] std::io::Error),
    /// Config file was not valid TOML for this schema.
    #[error("parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    /// `listen_addr` did not parse as `host:port`.
    #[error("invalid listen address: {0}")]
    BadListenAddr(String),
    /// A `node_allow`/`node_deny` entry was not a valid regex.
    #[error("invalid node filter pattern: {0}")]
    BadPattern(#[from] regex::Error),
}

/// Per-thread-type retention/sync knobs, as they appear in the TOML file
/// (see [`CacheLimits`] for the resolved, normalised form).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheTypeConfig {
    /// Maximum number of records ever retained.
    pub save_record: u64,
    /// Maximum number of live records kept in `record/`.
    pub save_size: u64,
    /// Oldest-fetch window in seconds, used when a cache is empty.
    pub get_range: i64,
    /// Overlap window in seconds for incremental range sync.
    pub sync_range: i64,
    /// Tombstone retention window in seconds (auto-raised above `sync_range`).
    pub save_removed: i64,
}

impl Default for CacheTypeConfig {
    fn default() -> Self {
        Self {
            save_record: 1200,
            save_size: 200,
            get_range: 100 * 24 * 3600,
            sync_range: 10 * 24 * 3600,
            save_removed: 50 * 24 * 3600,
        }
    }
}

impl From<CacheTypeConfig> for CacheLimits {
    fn from(c: CacheTypeConfig) -> Self {
        CacheLimits {
            save_record: c.save_record,
            save_size: c.save_size,
            get_range: c.get_range,
            sync_range: c.sync_range,
            save_removed: c.save_removed,
        }
        .normalized()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct RawConfig {
    data_dir: String,
    listen_addr: String,
    server_name: Option<String>,
    init_node: Vec<String>,
    node_allow: Vec<String>,
    node_deny: Vec<String>,
    default_nodes: usize,
    share_nodes: usize,
    search_depth: usize,
    retry_join: usize,
    retry: usize,
    update_nodes: usize,
    default_timeout_secs: u64,
    get_timeout_secs: u64,
    record_limit_kib: u64,
    admission_permits: usize,
    anti_entropy_interval_secs: u64,
    anti_entropy_pass_timeout_secs: u64,
    thread: CacheTypeConfig,
}

impl Default for RawConfig {
    fn default() -> Self {
        Self {
            data_dir: "./data".to_string(),
            listen_addr: "0.0.0.0:8000".to_string(),
            server_name: None,
            init_node: Vec::new(),
            node_allow: Vec::new(),
            node_deny: Vec::new(),
            default_nodes: 5,
            share_nodes: 5,
            search_depth: 30,
            retry_join: 2,
            retry: 5,
            update_nodes: 10,
            default_timeout_secs: 15,
            get_timeout_secs: 60,
            record_limit_kib: 2048,
            admission_permits: 64,
            anti_entropy_interval_secs: 300,
            anti_entropy_pass_timeout_secs: 240,
            thread: CacheTypeConfig::default(),
        }
    }
}

/// Fully resolved, process-wide configuration. Built once at startup and
/// held for the lifetime of the [`crate::context::Context`].
#[derive(Clone)]
pub struct Config {
    /// Root data directory (keys, audit log).
    pub data_dir: PathBuf,
    /// Where per-thread cache directories live (`<data_dir>/cache`).
    pub cache_dir: PathBuf,
    /// Address the wire server binds to.
    pub listen_addr: SocketAddr,
    /// Explicit server name for `myself`, bypassing the ping-for-reflected-ip path.
    pub server_name: Option<String>,
    /// Bootstrap nodestrs used by [`crate::networking::node_manager::NodeManager::initialize`].
    pub init_node: Vec<String>,
    /// Compiled `node_allow` patterns.
    pub node_allow: Vec<regex::Regex>,
    /// Compiled `node_deny` patterns.
    pub node_deny: Vec<regex::Regex>,
    /// Cap on the general neighbour list.
    pub default_nodes: usize,
    /// Cap on a per-thread source list.
    pub share_nodes: usize,
    /// Max candidates considered by `search`.
    pub search_depth: usize,
    /// Max attempts `join` makes while below `default_nodes`.
    pub retry_join: usize,
    /// Consecutive-miss bound for `more_nodes`.
    pub retry: usize,
    /// Extra random fan-out targets for `tell_update`.
    pub update_nodes: usize,
    /// Timeout for control messages (`/ping`, `/join`, `/bye`, `/node`, `/have`, `/update`).
    pub default_timeout: Duration,
    /// Timeout for `/get` and `/head`.
    pub get_timeout: Duration,
    /// `record_limit * 1024`, the spam-by-size threshold.
    pub record_limit_bytes: usize,
    /// Inbound HTTP admission-control permit count.
    pub admission_permits: usize,
    /// Anti-entropy loop period.
    pub anti_entropy_interval: Duration,
    /// Wall-clock deadline for one anti-entropy pass.
    pub anti_entropy_pass_timeout: Duration,
    /// Resolved retention/sync knobs for the `thread` cache type.
    pub thread_limits: CacheLimits,
}

impl Config {
    /// Load from a TOML file at `path` (defaults applied if it doesn't
    /// exist), then apply environment-variable overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw: RawConfig = if path.exists() {
            let text = std::fs::read_to_string(path)?;
            toml::from_str(&text)?
        } else {
            RawConfig::default()
        };
        Self::from_raw(raw)
    }

    fn from_raw(mut raw: RawConfig) -> Result<Self, ConfigError> {
        if let Ok(v) = std::env::var("DUSKBOARD_DATA_DIR") {
            raw.data_dir = v;
        }
        if let Ok(v) = std::env::var("DUSKBOARD_LISTEN_ADDR") {
            raw.listen_addr = v;
        }
        if let Ok(v) = std::env::var("DUSKBOARD_INIT_NODE") {
            raw.init_node = v
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }

        let listen_addr = raw
            .listen_addr
            .parse()
            .map_err(|_| ConfigError::BadListenAddr(raw.listen_addr.clone()))?;
        let node_allow = raw
            .node_allow
            .iter()
            .map(|p| regex::Regex::new(p))
            .collect::<Result<Vec<_>, _>>()?;
        let node_deny = raw
            .node_deny
            .iter()
            .map(|p| regex::Regex::new(p))
            .collect::<Result<Vec<_>, _>>()?;
        let data_dir = PathBuf::from(raw.data_dir);
        let cache_dir = data_dir.join("cache");

        Ok(Self {
            cache_dir,
            data_dir,
            listen_addr,
            server_name: raw.server_name,
            init_node: raw.init_node,
            node_allow,
            node_deny,
            default_nodes: raw.default_nodes,
            share_nodes: raw.share_nodes,
            search_depth: raw.search_depth,
            retry_join: raw.retry_join,
            retry: raw.retry,
            update_nodes: raw.update_nodes,
            default_timeout: Duration::from_secs(raw.default_timeout_secs),
            get_timeout: Duration::from_secs(raw.get_timeout_secs),
            record_limit_bytes: (raw.record_limit_kib as usize) * 1024,
            admission_permits: raw.admission_permits,
            anti_entropy_interval: Duration::from_secs(raw.anti_entropy_interval_secs),
            anti_entropy_pass_timeout: Duration::from_secs(raw.anti_entropy_pass_timeout_secs),
            thread_limits: raw.thread.into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_parse_to_a_usable_config() {
        let cfg = Config::from_raw(RawConfig::default()).unwrap();
        assert_eq!(cfg.default_nodes, 5);
        assert_eq!(cfg.share_nodes, 5);
        assert_eq!(cfg.search_depth, 30);
        assert_eq!(cfg.record_limit_bytes, 2048 * 1024);
        assert!(cfg.thread_limits.save_removed > cfg.thread_limits.sync_range);
    }

    #[test]
    fn bad_listen_addr_is_rejected() {
        let mut raw = RawConfig::default();
        raw.listen_addr = "not-an-addr".to_string();
        assert!(matches!(Config::from_raw(raw), Err(ConfigError::BadListenAddr(_))));
    }

    #[test]
    fn invalid_regex_is_rejected() {
        let mut raw = RawConfig::default();
        raw.node_allow = vec!["(".to_string()];
        assert!(matches!(Config::from_raw(raw), Err(ConfigError::BadPattern(_))));
    }
}
