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

//! Outbound peer talk: the small HTTP vocabulary a node speaks to its
//! neighbours, abstracted behind [`PeerTransport`] so [`super::node_manager::NodeManager`]
//! can be exercised without real sockets.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use super::node::Node;

/// Failures talking to a neighbour. Always recoverable: the caller drops
/// or demotes the offending node and moves on.
#[derive(Debug, Error)]
pub enum NodeError {
    /// The neighbour did not answer, or answered with a transport-level error.
    #[error("request to {0} failed: {1}")]
    Unreachable(String, String),
    /// The neighbour answered, but not with the shape this call expects.
    #[error("malformed response from {0}: {1}")]
    BadResponse(String, String),
    /// The neighbour is not allowed by our filter rules.
    #[error("{0} is not an allowed node")]
    Disallowed(String),
}

/// Outcome of a `/join` call: the remote's welcome line plus any nodes
/// it chose to introduce us to (the `extnode` behaviour of the original
/// protocol — a join reply may be followed by further nodestrs).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinReply {
    /// `true` for a `WELCOME` line, `false` for anything else (for example `BYEBYE`).
    pub welcomed: bool,
    /// Extra nodestrs the remote returned after the welcome line.
    pub extra_nodes: Vec<Node>,
}

/// The wire vocabulary one node speaks to another. Implemented for real
/// traffic by [`ReqwestTransport`]; implemented by hand in tests with a
/// scripted fake so [`super::node_manager::NodeManager`] logic can be
/// asserted without a socket.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// `GET /ping` — expects two lines, `PONG` and the responder's IP as seen by them.
    async fn ping(&self, node: &Node) -> Result<String, NodeError>;

    /// `GET /node` — a single random nodestr known to the remote, or empty.
    async fn get_node(&self, node: &Node) -> Result<Option<Node>, NodeError>;

    /// `GET /join/<myself>` — announce ourselves and ask to be let in.
    async fn join(&self, node: &Node, myself: &Node) -> Result<JoinReply, NodeError>;

    /// `GET /bye/<myself>` — announce our departure.
    async fn bye(&self, node: &Node, myself: &Node) -> Result<(), NodeError>;

    /// `GET /have/<datfile>` — does the remote carry this thread at all.
    async fn have(&self, node: &Node, datfile: &str) -> Result<bool, NodeError>;

    /// `GET /update/<datfile>/<stamp>/<id>/<myself>` — gossip that a record exists.
    async fn tell_update(
        &self,
        node: &Node,
        datfile: &str,
        stamp: i64,
        id: &str,
        myself: &Node,
    ) -> Result<(), NodeError>;

    /// `GET /get/<datfile>/<stamp>/<id>` — exact single-record fetch.
    async fn get_exact(&self, node: &Node, datfile: &str, stamp: i64, id: &str) -> Result<String, NodeError>;

    /// `GET /get/<datfile>/<begin>-[<end>]` — full record lines in range.
    async fn get_range(
        &self,
        node: &Node,
        datfile: &str,
        begin: i64,
        end: Option<i64>,
    ) -> Result<String, NodeError>;

    /// `GET /head/<datfile>/<begin>-[<end>]` — `stamp_id` index lines in range.
    async fn head_range(
        &self,
        node: &Node,
        datfile: &str,
        begin: i64,
        end: Option<i64>,
    ) -> Result<String, NodeError>;
}

fn format_range(begin: i64, end: Option<i64>) -> String {
    match end {
        Some(e) => format!("{begin}-{e}"),
        None => format!("{begin}-"),
    }
}

/// Real-network [`PeerTransport`] built on a shared [`reqwest::Client`].
pub struct ReqwestTransport {
    client: reqwest::Client,
    default_timeout: Duration,
    get_timeout: Duration,
}

impl ReqwestTransport {
    /// Build a transport. `default_timeout` bounds small control calls;
    /// `get_timeout` (normally longer) bounds range fetches elsewhere in
    /// the crate — this struct only issues control calls, but keeps both
    /// so callers can share one timeout policy.
    pub fn new(client: reqwest::Client, default_timeout: Duration, get_timeout: Duration) -> Self {
        Self {
            client,
            default_timeout,
            get_timeout,
        }
    }

    async fn get_text(&self, url: &str, timeout: Duration) -> Result<String, NodeError> {
        let resp = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| NodeError::Unreachable(url.to_string(), e.to_string()))?;
        resp.text()
            .await
            .map_err(|e| NodeError::Unreachable(url.to_string(), e.to_string()))
    }
}

#[async_trait]
impl PeerTransport for ReqwestTransport {
    async fn ping(&self, node: &Node) -> Result<String, NodeError> {
        let url = format!("{}/ping", node.base_url());
        let body = self.get_text(&url, self.default_timeout).await?;
        let mut lines = body.lines();
        match lines.next() {
            Some("PONG") => {}
            _ => return Err(NodeError::BadResponse(node.to_string(), body)),
        }
        lines
            .next()
            .map(|ip| ip.trim().to_string())
            .ok_or_else(|| NodeError::BadResponse(node.to_string(), body.clone()))
    }

    async fn get_node(&self, node: &Node) -> Result<Option<Node>, NodeError> {
        let url = format!("{}/node", node.base_url());
        let body = self.get_text(&url, self.default_timeout).await?;
        let trimmed = body.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }
        Ok(Node::new(trimmed))
    }

    async fn join(&self, node: &Node, myself: &Node) -> Result<JoinReply, NodeError> {
        let url = format!("{}/join/{}", node.base_url(), myself.to_wire());
        let body = self.get_text(&url, self.default_timeout).await?;
        let mut lines = body.lines();
        let welcomed = matches!(lines.next(), Some("WELCOME"));
        let extra_nodes = lines.filter_map(Node::new).collect();
        Ok(JoinReply { welcomed, extra_nodes })
    }

    async fn bye(&self, node: &Node, myself: &Node) -> Result<(), NodeError> {
        let url = format!("{}/bye/{}", node.base_url(), myself.to_wire());
        self.get_text(&url, self.default_timeout).await?;
        Ok(())
    }

    async fn have(&self, node: &Node, datfile: &str) -> Result<bool, NodeError> {
        let url = format!("{}/have/{datfile}", node.base_url());
        let body = self.get_text(&url, self.default_timeout).await?;
        Ok(body.trim() == "YES")
    }

    async fn tell_update(
        &self,
        node: &Node,
        datfile: &str,
        stamp: i64,
        id: &str,
        myself: &Node,
    ) -> Result<(), NodeError> {
        let url = format!(
            "{}/update/{datfile}/{stamp}/{id}/{}",
            node.base_url(),
            myself.to_wire()
        );
        self.get_text(&url, self.get_timeout).await?;
        Ok(())
    }

    async fn get_exact(&self, node: &Node, datfile: &str, stamp: i64, id: &str) -> Result<String, NodeError> {
        let url = format!("{}/get/{datfile}/{stamp}/{id}", node.base_url());
        self.get_text(&url, self.get_timeout).await
    }

    async fn get_range(
        &self,
        node: &Node,
        datfile: &str,
        begin: i64,
        end: Option<i64>,
    ) -> Result<String, NodeError> {
        let url = format!("{}/get/{datfile}/{}", node.base_url(), format_range(begin, end));
        self.get_text(&url, self.get_timeout).await
    }

    async fn head_range(
        &self,
        node: &Node,
        datfile: &str,
        begin: i64,
        end: Option<i64>,
    ) -> Result<String, NodeError> {
        let url = format!("{}/head/{datfile}/{}", node.base_url(), format_range(begin, end));
        self.get_text(&url, self.get_timeout).await
    }
}

#[cfg(test)]
pub(crate) mod fake {
    //! A deterministic, in-memory [`super::PeerTransport`] for exercising
    //! [`super::super::node_manager::NodeManager`] without a socket.

    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;

    /// Scripted response for one neighbour.
    #[derive(Debug, Clone, Default)]
    pub struct Script {
        pub ping_ip: Option<String>,
        pub get_node: Option<Node>,
        pub join_welcomed: bool,
        pub join_extra: Vec<Node>,
        pub has_datfile: bool,
        pub unreachable: bool,
        pub get_range_response: String,
        pub head_range_response: String,
        pub get_exact_responses: HashMap<String, String>,
    }

    /// A fake transport driven entirely by pre-programmed [`Script`]s keyed by nodestr.
    #[derive(Default)]
    pub struct FakeTransport {
        scripts: Mutex<HashMap<String, Script>>,
        pub tell_update_calls: Mutex<Vec<(String, String, i64, String)>>,
        pub bye_calls: Mutex<Vec<String>>,
    }

    impl FakeTransport {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set_script(&self, nodestr: &str, script: Script) {
            self.scripts.lock().unwrap().insert(nodestr.to_string(), script);
        }

        fn script_for(&self, node: &Node) -> Option<Script> {
            self.scripts.lock().unwrap().get(node.as_str()).cloned()
        }
    }

    #[async_trait]
    impl PeerTransport for FakeTransport {
        async fn ping(&self, node: &Node) -> Result<String, NodeError> {
            let script = self.script_for(node).unwrap_or_default();
            if script.unreachable {
                return Err(NodeError::Unreachable(node.to_string(), "fake offline".into()));
            }
            script
                .ping_ip
                .ok_or_else(|| NodeError::BadResponse(node.to_string(), String::new()))
        }

        async fn get_node(&self, node: &Node) -> Result<Option<Node>, NodeError> {
            let script = self.script_for(node).unwrap_or_default();
            if script.unreachable {
                return Err(NodeError::Unreachable(node.to_string(), "fake offline".into()));
            }
            Ok(script.get_node)
        }

        async fn join(&self, node: &Node, _myself: &Node) -> Result<JoinReply, NodeError> {
            let script = self.script_for(node).unwrap_or_default();
            if script.unreachable {
                return Err(NodeError::Unreachable(node.to_string(), "fake offline".into()));
            }
            Ok(JoinReply {
                welcomed: script.join_welcomed,
                extra_nodes: script.join_extra,
            })
        }

        async fn bye(&self, node: &Node, _myself: &Node) -> Result<(), NodeError> {
            self.bye_calls.lock().unwrap().push(node.to_string());
            Ok(())
        }

        async fn have(&self, node: &Node, _datfile: &str) -> Result<bool, NodeError> {
            let script = self.script_for(node).unwrap_or_default();
            if script.unreachable {
                return Err(NodeError::Unreachable(node.to_string(), "fake offline".into()));
            }
            Ok(script.has_datfile)
        }

        async fn tell_update(
            &self,
            node: &Node,
            datfile: &str,
            stamp: i64,
            id: &str,
            _myself: &Node,
        ) -> Result<(), NodeError> {
            self.tell_update_calls
                .lock()
                .unwrap()
                .push((node.to_string(), datfile.to_string(), stamp, id.to_string()));
            Ok(())
        }

        async fn get_exact(&self, node: &Node, _datfile: &str, stamp: i64, id: &str) -> Result<String, NodeError> {
            let script = self.script_for(node).unwrap_or_default();
            if script.unreachable {
                return Err(NodeError::Unreachable(node.to_string(), "fake offline".into()));
            }
            let key = format!("{stamp}_{id}");
            Ok(script.get_exact_responses.get(&key).cloned().unwrap_or_default())
        }

        async fn get_range(
            &self,
            node: &Node,
            _datfile: &str,
            _begin: i64,
            _end: Option<i64>,
        ) -> Result<String, NodeError> {
            let script = self.script_for(node).unwrap_or_default();
            if script.unreachable {
                return Err(NodeError::Unreachable(node.to_string(), "fake offline".into()));
            }
            Ok(script.get_range_response)
        }

        async fn head_range(
            &self,
            node: &Node,
            _datfile: &str,
            _begin: i64,
            _end: Option<i64>,
        ) -> Result<String, NodeError> {
            let script = self.script_for(node).unwrap_or_default();
            if script.unreachable {
                return Err(NodeError::Unreachable(node.to_string(), "fake offline".into()));
            }
            Ok(script.head_range_response)
        }
    }
}
