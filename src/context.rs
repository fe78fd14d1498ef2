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

//! Process-wide state: one [`Context`] built at startup and shared (via
//! `Arc`) by the wire server and the anti-entropy driver.

use std::sync::Arc;

use anyhow::{Context as _, Result};
use tracing::warn;

use crate::config::Config;
use crate::core::cache::CacheRegistry;
use crate::core::record::DefaultSpamFilter;
use crate::core::security::keystore::{FileEd25519Backend, Keystore};
use crate::monitoring::metrics::Metrics;
use crate::networking::node::Node;
use crate::networking::node_manager::{NodeLimits, NodeManager};
use crate::networking::peer_client::{PeerTransport, ReqwestTransport};

/// Everything a request handler or the anti-entropy loop needs.
pub struct Context {
    /// Resolved configuration.
    pub config: Config,
    /// The neighbour overlay.
    pub nodes: NodeManager,
    /// Local thread stores, keyed by `datfile`.
    pub caches: CacheRegistry,
    /// Prometheus counters.
    pub metrics: Metrics,
    /// The record-signing key, if identity/signing is enabled for this node.
    pub signer: Option<Keystore<FileEd25519Backend>>,
}

impl Context {
    /// Build the process-wide state: load/create the signing key, wire up
    /// the cache registry and node manager, and resolve `myself` either
    /// from `config.server_name` or by pinging `config.init_node`.
    pub async fn bootstrap(config: Config) -> Result<Arc<Self>> {
        std::fs::create_dir_all(&config.data_dir).context("create data dir")?;
        std::fs::create_dir_all(&config.cache_dir).context("create cache dir")?;

        let signer = match Keystore::<FileEd25519Backend>::open(
            config.data_dir.to_string_lossy().as_ref(),
        ) {
            Ok(ks) => Some(ks),
            Err(e) => {
                warn!(error = ?e, "no signing identity available, records will be unsigned");
                None
            }
        };

        let metrics = Metrics::new().context("register metrics")?;

        let spam_check = Arc::new(DefaultSpamFilter::default());
        let caches = CacheRegistry::new(
            config.cache_dir.clone(),
            config.thread_limits,
            config.record_limit_bytes,
            spam_check,
        );

        let client = reqwest::Client::builder()
            .build()
            .context("build http client")?;
        let transport: Arc<dyn PeerTransport> = Arc::new(ReqwestTransport::new(
            client,
            config.default_timeout,
            config.get_timeout,
        ));

        let limits = NodeLimits {
            default_nodes: config.default_nodes,
            share_nodes: config.share_nodes,
            search_depth: config.search_depth,
            retry_join: config.retry_join,
            retry: config.retry,
            update_nodes: config.update_nodes,
        };
        let nodes = NodeManager::new(
            limits,
            transport,
            config.node_allow.clone(),
            config.node_deny.clone(),
        );

        if let Some(name) = &config.server_name {
            if let Some(node) = Node::new(name.clone()) {
                nodes.set_myself(node).await;
            } else {
                warn!(server_name = %name, "configured server_name is not a valid nodestr");
            }
        } else {
            let candidates: Vec<Node> = config.init_node.iter().filter_map(|s| Node::new(s.clone())).collect();
            let port = config.listen_addr.port();
            nodes.resolve_myself_via_ping(&candidates, "", port).await;
        }

        let ctx = Arc::new(Self { config, nodes, caches, metrics, signer });
        Ok(ctx)
    }
}
