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

//! The neighbour overlay: a general node list plus one source list per
//! thread, with join/bye, random-walk search, and update gossip built on
//! top of them.
//!
//! Tables are keyed by `datfile`; the empty string key is the general
//! list everything else falls back to.

use std::collections::HashMap;
use std::sync::Arc;

use rand::seq::SliceRandom;
use regex::Regex;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::node::Node;
use super::peer_client::{NodeError, PeerTransport};

const GENERAL: &str = "";

/// Caps and retry bounds for the overlay, configured once at startup.
#[derive(Debug, Clone)]
pub struct NodeLimits {
    /// Cap on the general node list.
    pub default_nodes: usize,
    /// Cap on a per-thread source list.
    pub share_nodes: usize,
    /// Max candidates a single `search` call walks before giving up.
    pub search_depth: usize,
    /// Max attempts `join` makes while the general list is under `default_nodes`.
    pub retry_join: usize,
    /// Consecutive-miss bound for `more_nodes`.
    pub retry: usize,
    /// Extra random targets `tell_update` fans out to beyond the thread's own sources.
    pub update_nodes: usize,
}

impl Default for NodeLimits {
    fn default() -> Self {
        Self {
            default_nodes: 5,
            share_nodes: 5,
            search_depth: 30,
            retry_join: 2,
            retry: 5,
            update_nodes: 10,
        }
    }
}

/// The neighbour overlay. Cheaply cloned (`Arc` internals) and shared
/// between the wire server and the anti-entropy driver.
pub struct NodeManager {
    myself: RwLock<Option<Node>>,
    tables: RwLock<HashMap<String, Vec<Node>>>,
    limits: NodeLimits,
    transport: Arc<dyn PeerTransport>,
    node_allow: Vec<Regex>,
    node_deny: Vec<Regex>,
}

impl NodeManager {
    /// Build an empty overlay bound to `transport` for all outbound talk.
    pub fn new(
        limits: NodeLimits,
        transport: Arc<dyn PeerTransport>,
        node_allow: Vec<Regex>,
        node_deny: Vec<Regex>,
    ) -> Self {
        Self {
            myself: RwLock::new(None),
            tables: RwLock::new(HashMap::new()),
            limits,
            transport,
            node_allow,
            node_deny,
        }
    }

    fn is_allowed(&self, node: &Node) -> bool {
        node.is_allowed(&self.node_allow, &self.node_deny)
    }

    /// The transport used for all outbound peer talk, shared with callers
    /// (the anti-entropy driver) that need to issue `/get`/`/head` calls
    /// beyond the control-message vocabulary this type wraps directly.
    pub fn transport(&self) -> Arc<dyn PeerTransport> {
        self.transport.clone()
    }

    /// Our own nodestr, if resolved.
    pub async fn myself(&self) -> Option<Node> {
        self.myself.read().await.clone()
    }

    /// Resolve and cache our own nodestr: either the configured name, or
    /// the IP a neighbour reflects back to us via `/ping`.
    pub async fn set_myself(&self, node: Node) {
        *self.myself.write().await = Some(node);
    }

    /// Resolve `myself` by pinging `candidates` in order and using the
    /// first successful reflected IP, combined with `port`/`path`. Leaves
    /// `myself` untouched if every candidate fails.
    pub async fn resolve_myself_via_ping(&self, candidates: &[Node], path: &str, port: u16) {
        for candidate in candidates {
            match self.transport.ping(candidate).await {
                Ok(ip) => {
                    if let Some(resolved) = Node::from_parts(&ip, path, port) {
                        self.set_myself(resolved).await;
                        return;
                    }
                }
                Err(e) => debug!(node = %candidate, error = %e, "ping for myself failed"),
            }
        }
        warn!("could not resolve myself from any candidate node");
    }

    /// Number of entries in `table[datfile]` (general list if `datfile` is empty).
    pub async fn table_len(&self, datfile: &str) -> usize {
        self.tables.read().await.get(datfile).map(Vec::len).unwrap_or(0)
    }

    /// All nodestrs known in `table[datfile]`, for diagnostics/wire responses.
    pub async fn nodestr_list(&self, datfile: &str) -> Vec<String> {
        self.tables
            .read()
            .await
            .get(datfile)
            .map(|v| v.iter().map(|n| n.to_string()).collect())
            .unwrap_or_default()
    }

    /// `table[datfile]` deduplicated against `table[""]`, the set a
    /// caller should consider "known sources" for that thread.
    pub async fn all_nodes(&self, datfile: &str) -> Vec<Node> {
        let tables = self.tables.read().await;
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();
        for n in tables
            .get(datfile)
            .into_iter()
            .flatten()
            .chain(tables.get(GENERAL).into_iter().flatten())
        {
            if seen.insert(n.clone()) {
                out.push(n.clone());
            }
        }
        out
    }

    /// `true` if `node` appears in `table[datfile]`.
    pub async fn has_node(&self, datfile: &str, node: &Node) -> bool {
        self.tables
            .read()
            .await
            .get(datfile)
            .is_some_and(|v| v.contains(node))
    }

    /// Up to `num` random nodes drawn from the general list, excluding `exclude`.
    pub async fn random(&self, exclude: Option<&Node>, num: usize) -> Vec<Node> {
        let tables = self.tables.read().await;
        let mut pool: Vec<Node> = tables
            .get(GENERAL)
            .into_iter()
            .flatten()
            .filter(|n| match exclude {
                Some(ex) => ex != *n,
                None => true,
            })
            .cloned()
            .collect();
        pool.shuffle(&mut rand::thread_rng());
        pool.truncate(num);
        pool
    }

    /// Insert `node` into `table[datfile]` if not already present and
    /// capacity allows (`share_nodes` for a thread table, `default_nodes`
    /// for the general list). Returns whether it was inserted.
    pub async fn append_to_table(&self, datfile: &str, node: Node) -> bool {
        if !self.is_allowed(&node) {
            return false;
        }
        let cap = if datfile.is_empty() {
            self.limits.default_nodes
        } else {
            self.limits.share_nodes
        };
        let mut tables = self.tables.write().await;
        let list = tables.entry(datfile.to_string()).or_default();
        if list.contains(&node) {
            return false;
        }
        if list.len() >= cap {
            return false;
        }
        list.push(node);
        true
    }

    /// Remove `node` from `table[datfile]`.
    pub async fn remove_from_table(&self, datfile: &str, node: &Node) {
        if let Some(list) = self.tables.write().await.get_mut(datfile) {
            list.retain(|n| n != node);
        }
    }

    /// Remove `node` from every table, general list included.
    pub async fn remove_from_all_table(&self, node: &Node) {
        for list in self.tables.write().await.values_mut() {
            list.retain(|n| n != node);
        }
    }

    /// Evict the oldest entry in `table[datfile]` and replace it with
    /// `node`, saying goodbye to the evicted neighbour first. Used when a
    /// thread's source list is full but a fresher source turned up.
    pub async fn replace_in_list(&self, datfile: &str, node: Node) {
        let at_capacity = {
            let tables = self.tables.read().await;
            let len = tables.get(datfile).map_or(0, |l| l.len());
            len >= self.limits.share_nodes.max(1)
        };
        if !at_capacity {
            self.append_to_table(datfile, node).await;
            return;
        }

        let evicted = self.tables.read().await.get(datfile).and_then(|l| l.first().cloned());
        if let Some(old) = evicted {
            if let Some(myself) = self.myself().await {
                let _ = self.transport.bye(&old, &myself).await;
            }
            self.remove_from_table(datfile, &old).await;
        }
        self.append_to_table(datfile, node).await;
    }

    /// Ask `candidate` to introduce us, adding it and whatever it offers
    /// in return to the general list. Returns whether the join succeeded.
    pub async fn join(&self, candidate: Node) -> bool {
        let Some(myself) = self.myself().await else {
            warn!("join attempted before myself is resolved");
            return false;
        };
        if self.has_node(GENERAL, &candidate).await {
            return true;
        }
        if !self.is_allowed(&candidate) {
            return false;
        }
        match self.transport.join(&candidate, &myself).await {
            Ok(reply) if reply.welcomed => {
                self.append_to_table(GENERAL, candidate).await;
                for extra in reply.extra_nodes {
                    self.append_to_table(GENERAL, extra).await;
                }
                true
            }
            Ok(_) => false,
            Err(e) => {
                debug!(node = %candidate, error = %e, "join failed");
                false
            }
        }
    }

    /// Bootstrap the general list from `init_candidates`, retrying up to
    /// `retry_join` candidates, then top up from whatever worked.
    pub async fn initialize(&self, init_candidates: &[Node]) {
        for candidate in init_candidates.iter().take(self.limits.retry_join.max(1)) {
            if self.join(candidate.clone()).await {
                break;
            }
        }
        self.remove_from_all_table(&match self.myself().await {
            Some(m) => m,
            None => return,
        })
        .await;
        if self.table_len(GENERAL).await > 0 {
            self.more_nodes(GENERAL).await;
        }
        if self.table_len(GENERAL).await <= 1 {
            warn!("fewer than 2 nodes linked after initialize");
        }
    }

    /// Walk the general list asking each member for more peers, adding
    /// any new ones, until `retry` consecutive candidates yield nothing
    /// new or the list is exhausted.
    pub async fn more_nodes(&self, datfile: &str) {
        let all = self.all_nodes(datfile).await;
        let mut misses = 0usize;
        for candidate in &all {
            if misses >= self.limits.retry {
                break;
            }
            match self.transport.get_node(candidate).await {
                Ok(Some(found)) => {
                    if self.is_allowed(&found) && self.append_to_table(GENERAL, found).await {
                        misses = 0;
                    } else {
                        misses += 1;
                    }
                }
                Ok(None) => misses += 1,
                Err(e) => {
                    debug!(node = %candidate, error = %e, "get_node failed");
                    misses += 1;
                }
            }
        }
    }

    /// Random-walk candidates (thread table, then general list, then
    /// fresh random draws if still short) asking `/have` until one
    /// confirms the thread; promotes the hit into the thread's source
    /// table and returns it.
    pub async fn search(&self, datfile: &str) -> Option<Node> {
        let mut candidates = self.all_nodes(datfile).await;
        if candidates.len() < self.limits.search_depth {
            let more = self.random(None, self.limits.search_depth - candidates.len()).await;
            for n in more {
                if !candidates.contains(&n) {
                    candidates.push(n);
                }
            }
        }
        let myself = self.myself().await;
        let mut walked = 0usize;
        for candidate in candidates {
            if walked >= self.limits.search_depth {
                break;
            }
            walked += 1;
            if Some(&candidate) == myself.as_ref() || !self.is_allowed(&candidate) {
                continue;
            }
            match self.transport.have(&candidate, datfile).await {
                Ok(true) => {
                    self.append_to_table(datfile, candidate.clone()).await;
                    return Some(candidate);
                }
                Ok(false) => {
                    self.remove_from_table(datfile, &candidate).await;
                }
                Err(e) => {
                    debug!(node = %candidate, error = %e, "have probe failed");
                    self.remove_from_table(datfile, &candidate).await;
                }
            }
        }
        if walked <= 1 {
            warn!(datfile, "search exhausted candidates almost immediately");
        }
        None
    }

    /// Gossip that `(stamp, id)` exists in `datfile` to its source table
    /// plus up to `update_nodes` random extras from the general list.
    pub async fn tell_update(&self, datfile: &str, stamp: i64, id: &str) {
        let Some(myself) = self.myself().await else {
            return;
        };
        let mut targets = self.all_nodes(datfile).await;
        for extra in self.random(None, self.limits.update_nodes).await {
            if !targets.contains(&extra) {
                targets.push(extra);
            }
        }
        let calls = targets.into_iter().map(|node| {
            let transport = Arc::clone(&self.transport);
            let myself = myself.clone();
            let datfile = datfile.to_string();
            let id = id.to_string();
            async move {
                if let Err(e) = transport.tell_update(&node, &datfile, stamp, &id, &myself).await {
                    debug!(node = %node, error = %e, "tell_update failed");
                }
            }
        });
        futures::future::join_all(calls).await;
    }

    /// Top up the general list while under `default_nodes`, pinging
    /// candidates not already known; demotes anything that fails to
    /// answer rather than re-joining it blindly.
    pub async fn rejoin(&self) {
        if self.table_len(GENERAL).await >= self.limits.default_nodes {
            return;
        }
        let candidates: Vec<Node> = {
            let tables = self.tables.read().await;
            tables
                .values()
                .flatten()
                .filter(|n| !tables.get(GENERAL).is_some_and(|g| g.contains(n)))
                .cloned()
                .collect()
        };
        for candidate in candidates {
            if self.table_len(GENERAL).await >= self.limits.default_nodes {
                break;
            }
            match self.transport.ping(&candidate).await {
                Ok(_) => {
                    self.join(candidate).await;
                }
                Err(_) => {
                    self.remove_from_all_table(&candidate).await;
                }
            }
        }
    }

    /// Ping the entire general list, dropping anything that doesn't answer.
    pub async fn ping_all(&self) {
        let general = self.tables.read().await.get(GENERAL).cloned().unwrap_or_default();
        for node in general {
            if self.transport.ping(&node).await.is_err() {
                self.remove_from_all_table(&node).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::peer_client::fake::{FakeTransport, Script};
    use super::*;

    fn manager(transport: Arc<FakeTransport>) -> NodeManager {
        NodeManager::new(NodeLimits::default(), transport, vec![], vec![])
    }

    #[tokio::test]
    async fn bootstrap_join_adds_welcoming_node_and_its_extras() {
        let transport = Arc::new(FakeTransport::new());
        let mgr = manager(transport.clone());
        mgr.set_myself(Node::new("me.example:8000").unwrap()).await;

        let bootstrap = Node::new("boot.example:8000").unwrap();
        let extra = Node::new("extra.example:8000").unwrap();
        transport.set_script(
            bootstrap.as_str(),
            Script {
                join_welcomed: true,
                join_extra: vec![extra.clone()],
                ..Default::default()
            },
        );

        mgr.initialize(&[bootstrap.clone()]).await;

        assert!(mgr.has_node(GENERAL, &bootstrap).await);
        assert!(mgr.has_node(GENERAL, &extra).await);
    }

    #[tokio::test]
    async fn search_promotes_a_hit_and_drops_a_miss() {
        let transport = Arc::new(FakeTransport::new());
        let mgr = manager(transport.clone());
        mgr.set_myself(Node::new("me.example:8000").unwrap()).await;

        let hit = Node::new("hit.example:8000").unwrap();
        let miss = Node::new("miss.example:8000").unwrap();
        transport.set_script(hit.as_str(), Script { has_datfile: true, ..Default::default() });
        transport.set_script(miss.as_str(), Script { has_datfile: false, ..Default::default() });
        mgr.append_to_table(GENERAL, hit.clone()).await;
        mgr.append_to_table(GENERAL, miss.clone()).await;

        let found = mgr.search("thread1").await;
        assert!(found == Some(hit.clone()) || found == Some(miss.clone()) || found.is_none());
        // whichever candidate the random order tried first determines the result,
        // but a hit must promote into the thread table.
        if mgr.has_node("thread1", &hit).await {
            assert_eq!(found, Some(hit));
        }
    }

    #[tokio::test]
    async fn general_list_append_is_capped_at_default_nodes() {
        let transport = Arc::new(FakeTransport::new());
        let mut limits = NodeLimits::default();
        limits.default_nodes = 2;
        let mgr = NodeManager::new(limits, transport, vec![], vec![]);

        for i in 0..4 {
            let node = Node::new(format!("n{i}.example:8000")).unwrap();
            mgr.append_to_table(GENERAL, node).await;
        }
        assert_eq!(mgr.table_len(GENERAL).await, 2);
    }

    #[tokio::test]
    async fn deny_list_blocks_append() {
        let transport = Arc::new(FakeTransport::new());
        let deny = vec![Regex::new("^blocked\\.").unwrap()];
        let mgr = NodeManager::new(NodeLimits::default(), transport, vec![], deny);
        let node = Node::new("blocked.example:8000").unwrap();
        assert!(!mgr.append_to_table(GENERAL, node).await);
    }

    #[tokio::test]
    async fn tell_update_calls_every_thread_source() {
        let transport = Arc::new(FakeTransport::new());
        let mgr = manager(transport.clone());
        mgr.set_myself(Node::new("me.example:8000").unwrap()).await;
        let a = Node::new("a.example:8000").unwrap();
        mgr.append_to_table("thread1", a.clone()).await;

        mgr.tell_update("thread1", 42, "deadbeef").await;

        let calls = transport.tell_update_calls.lock().unwrap();
        assert!(calls.iter().any(|(n, d, s, id)| n == a.as_str() && d == "thread1" && *s == 42 && id == "deadbeef"));
    }
}
