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

//! A neighbour, identified by its wire-form "nodestr".
//!
//! On the wire and in tables a node is just `host:port/path`, with `/`
//! replaced by `+` so the whole thing can sit inside a single URL path
//! segment (`/join/<nodestr>`). [`Node`] keeps the slash form internally
//! and converts at the edges.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;

/// A neighbour node, keyed by its canonical (slash-form) nodestr.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Node {
    nodestr: String,
}

static NODESTR_SHAPE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[^:/+\s]+:\d+(/.*)?$").unwrap());

impl Node {
    /// Build a `Node` from wire form (`+` in place of `/`) or already-canonical form.
    pub fn new(nodestr: impl Into<String>) -> Option<Self> {
        let raw = nodestr.into();
        let canonical = raw.replace('+', "/");
        if canonical.is_empty() || !NODESTR_SHAPE.is_match(&canonical) {
            return None;
        }
        Some(Self { nodestr: canonical })
    }

    /// Build a `Node` from separate host, path, and port components.
    pub fn from_parts(host: &str, path: &str, port: u16) -> Option<Self> {
        let path = path.trim_start_matches('/');
        let nodestr = if path.is_empty() {
            format!("{host}:{port}")
        } else {
            format!("{host}:{port}/{path}")
        };
        Self::new(nodestr)
    }

    /// The canonical, slash-form nodestr (`host:port/path`).
    pub fn as_str(&self) -> &str {
        &self.nodestr
    }

    /// The wire-safe form with `/` replaced by `+`, suitable for a URL path segment.
    pub fn to_wire(&self) -> String {
        self.nodestr.replace('/', "+")
    }

    /// The base URL (`http://host:port`) this node is reachable at.
    pub fn base_url(&self) -> String {
        let host_port = self.nodestr.split('/').next().unwrap_or(&self.nodestr);
        format!("http://{host_port}")
    }

    /// True if `self` passes the allow/deny filters.
    ///
    /// `node_allow` being empty means "allow everything"; a non-empty
    /// allow list requires at least one match. `node_deny` always wins:
    /// any match there rejects the node regardless of the allow result.
    pub fn is_allowed(&self, node_allow: &[Regex], node_deny: &[Regex]) -> bool {
        let allowed = node_allow.is_empty() || node_allow.iter().any(|re| re.is_match(&self.nodestr));
        let denied = node_deny.iter().any(|re| re.is_match(&self.nodestr));
        allowed && !denied
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.nodestr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_and_canonical_forms_round_trip() {
        let n = Node::new("example.com:8000+thread").unwrap();
        assert_eq!(n.as_str(), "example.com:8000/thread");
        assert_eq!(n.to_wire(), "example.com:8000+thread");
    }

    #[test]
    fn from_parts_builds_expected_nodestr() {
        let n = Node::from_parts("10.0.0.1", "/thread", 8000).unwrap();
        assert_eq!(n.as_str(), "10.0.0.1:8000/thread");
    }

    #[test]
    fn rejects_malformed_nodestr() {
        assert!(Node::new("").is_none());
        assert!(Node::new("no-port-here").is_none());
    }

    #[test]
    fn base_url_drops_path_segment() {
        let n = Node::new("example.com:8000+thread").unwrap();
        assert_eq!(n.base_url(), "http://example.com:8000");
    }

    #[test]
    fn empty_allow_list_allows_unless_denied() {
        let n = Node::new("example.com:8000").unwrap();
        assert!(n.is_allowed(&[], &[]));
        let deny = vec![Regex::new("example\\.com").unwrap()];
        assert!(!n.is_allowed(&[], &deny));
    }

    #[test]
    fn nonempty_allow_list_requires_a_match() {
        let n = Node::new("example.com:8000").unwrap();
        let allow = vec![Regex::new("^other\\.").unwrap()];
        assert!(!n.is_allowed(&allow, &[]));
        let allow = vec![Regex::new("^example\\.").unwrap()];
        assert!(n.is_allowed(&allow, &[]));
    }

    #[test]
    fn deny_overrides_allow() {
        let n = Node::new("example.com:8000").unwrap();
        let allow = vec![Regex::new("^example\\.").unwrap()];
        let deny = vec![Regex::new("^example\\.").unwrap()];
        assert!(!n.is_allowed(&allow, &deny));
    }
}
