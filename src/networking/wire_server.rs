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

//! The inbound half of the wire protocol: an axum router answering
//! exactly the paths a neighbour's `PeerTransport` issues, backed by
//! [`crate::core::cache::Cache`] and [`super::node_manager::NodeManager`].
//!
//! Every handler returns `text/plain`; nothing here carries business
//! logic beyond translating a path into a `Cache`/`NodeManager` call.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Path, State};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Router};
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::debug;

use crate::context::Context;
use crate::core::record::Record;
use super::node::Node;

/// Wire-level failures, always surfaced as a plain-text body rather than
/// propagated as a panic.
#[derive(Debug, Error)]
pub enum WireError {
    /// A path segment was not a well-formed nodestr/datfile/range.
    #[error("bad request")]
    BadRequest,
}

impl IntoResponse for WireError {
    fn into_response(self) -> Response {
        (axum::http::StatusCode::BAD_REQUEST, self.to_string()).into_response()
    }
}

/// Admission-control state for the bounding middleware: a fixed permit
/// pool plus the metrics counter bumped when it's exhausted.
#[derive(Clone)]
struct AdmissionState {
    semaphore: Arc<Semaphore>,
    ctx: Arc<Context>,
}

/// Build the router. `ctx` is shared (cloned cheaply via `Arc`) across
/// every request; the admission-control semaphore gates handler bodies,
/// not routing.
pub fn router(ctx: Arc<Context>) -> Router {
    let permits = ctx.config.admission_permits;
    let admission = AdmissionState {
        semaphore: Arc::new(Semaphore::new(permits)),
        ctx: ctx.clone(),
    };

    Router::new()
        .route("/ping", get(ping))
        .route("/node", get(node))
        .route("/join/:nodestr", get(join))
        .route("/bye/:nodestr", get(bye))
        .route("/have/:datfile", get(have))
        .route("/get/:datfile/:stamp/:id", get(get_exact))
        .route("/get/:datfile/:range", get(get_range))
        .route("/head/:datfile/:range", get(head_range))
        .route("/update/:datfile/:stamp/:id/:origin", get(update))
        .route("/metrics", get(metrics))
        .layer(middleware::from_fn_with_state(admission, admission_control))
        .with_state(ctx)
}

async fn admission_control(
    State(admission): State<AdmissionState>,
    request: axum::extract::Request,
    next: Next,
) -> Response {
    match admission.semaphore.try_acquire() {
        Ok(_permit) => next.run(request).await,
        Err(_) => {
            admission.ctx.metrics.wire_admission_rejected_total.inc();
            (axum::http::StatusCode::SERVICE_UNAVAILABLE, "BUSY\n").into_response()
        }
    }
}

/// `GET /ping` — reply with `PONG` and the caller's address as we see it.
async fn ping(ConnectInfo(addr): ConnectInfo<SocketAddr>) -> String {
    format!("PONG\n{}\n", addr.ip())
}

/// `GET /node` — one random general-list neighbour, or an empty body.
async fn node(State(ctx): State<Arc<Context>>) -> String {
    match ctx.nodes.random(None, 1).await.into_iter().next() {
        Some(n) => format!("{}\n", n.to_wire()),
        None => String::new(),
    }
}

/// `GET /join/<nodestr>` — welcome a neighbour into the general list.
async fn join(State(ctx): State<Arc<Context>>, Path(nodestr): Path<String>) -> String {
    let Some(candidate) = Node::new(nodestr) else {
        return "BYEBYE\n".to_string();
    };
    let inserted = ctx.nodes.append_to_table("", candidate).await;
    if inserted {
        ctx.metrics.join_total.inc();
        ctx.metrics.general_node_list_size.set(ctx.nodes.table_len("").await as i64);
        "WELCOME\n".to_string()
    } else {
        "BYEBYE\n".to_string()
    }
}

/// `GET /bye/<nodestr>` — drop a neighbour from every table.
async fn bye(State(ctx): State<Arc<Context>>, Path(nodestr): Path<String>) -> String {
    if let Some(candidate) = Node::new(nodestr) {
        ctx.nodes.remove_from_all_table(&candidate).await;
        ctx.metrics.bye_total.inc();
        ctx.metrics.general_node_list_size.set(ctx.nodes.table_len("").await as i64);
    }
    "BYEBYE\n".to_string()
}

/// `GET /have/<datfile>` — does this node carry the thread at all.
async fn have(State(ctx): State<Arc<Context>>, Path(datfile): Path<String>) -> Result<String, WireError> {
    let cache = ctx.caches.get_or_create(&datfile).await.map_err(|_| WireError::BadRequest)?;
    Ok(if cache.has_record().await { "YES\n" } else { "NO\n" }.to_string())
}

/// `GET /get/<datfile>/<stamp>/<id>` — exact single-record lookup.
async fn get_exact(
    State(ctx): State<Arc<Context>>,
    Path((datfile, stamp, id)): Path<(String, i64, String)>,
) -> Result<String, WireError> {
    let _cache = ctx.caches.get_or_create(&datfile).await.map_err(|_| WireError::BadRequest)?;
    let idstr = format!("{stamp}_{id}");
    let path = cache_record_path(&ctx, &datfile, &idstr).await;
    Ok(path.and_then(|p| std::fs::read_to_string(p).ok()).unwrap_or_default())
}

async fn cache_record_path(ctx: &Context, datfile: &str, idstr: &str) -> Option<std::path::PathBuf> {
    let _ = ctx.caches.get_or_create(datfile).await.ok()?;
    let dir = ctx.config.cache_dir.join(crate::core::cache::dathash(datfile)).join("record");
    let path = dir.join(idstr);
    path.exists().then_some(path)
}

fn parse_range(range: &str) -> Result<(i64, Option<i64>), WireError> {
    let (begin_str, end_str) = range.split_once('-').ok_or(WireError::BadRequest)?;
    let begin: i64 = begin_str.parse().map_err(|_| WireError::BadRequest)?;
    let end = if end_str.is_empty() {
        None
    } else {
        Some(end_str.parse().map_err(|_| WireError::BadRequest)?)
    };
    Ok((begin, end))
}

/// `GET /get/<datfile>/<begin>-[<end>]` — full record lines in range.
async fn get_range(
    State(ctx): State<Arc<Context>>,
    Path((datfile, range)): Path<(String, String)>,
) -> Result<String, WireError> {
    let (begin, end) = parse_range(&range)?;
    let cache = ctx.caches.get_or_create(&datfile).await.map_err(|_| WireError::BadRequest)?;
    let _ = cache.recompute_info().await;
    let dir = ctx.config.cache_dir.join(crate::core::cache::dathash(&datfile)).join("record");
    let mut out = String::new();
    let Ok(entries) = std::fs::read_dir(&dir) else { return Ok(out) };
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        let Some((stamp, _)) = name.split_once('_') else { continue };
        let Ok(stamp) = stamp.parse::<i64>() else { continue };
        if stamp < begin || end.is_some_and(|e| stamp > e) {
            continue;
        }
        if let Ok(line) = std::fs::read_to_string(entry.path()) {
            out.push_str(line.trim_end());
            out.push('\n');
        }
    }
    Ok(out)
}

/// `GET /head/<datfile>/<begin>-[<end>]` — `stamp_id` index lines in range.
async fn head_range(
    State(ctx): State<Arc<Context>>,
    Path((datfile, range)): Path<(String, String)>,
) -> Result<String, WireError> {
    let (begin, end) = parse_range(&range)?;
    let _ = ctx.caches.get_or_create(&datfile).await.map_err(|_| WireError::BadRequest)?;
    let dir = ctx.config.cache_dir.join(crate::core::cache::dathash(&datfile)).join("record");
    let mut out = String::new();
    let Ok(entries) = std::fs::read_dir(&dir) else { return Ok(out) };
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        let Some((stamp_str, id)) = name.split_once('_') else { continue };
        let Ok(stamp) = stamp_str.parse::<i64>() else { continue };
        if stamp < begin || end.is_some_and(|e| stamp > e) {
            continue;
        }
        out.push_str(&format!("{stamp}_{id}\n"));
    }
    Ok(out)
}

/// `GET /update/<datfile>/<stamp>/<id>/<origin>` — a neighbour is telling us
/// about a record we may not have; fetch it from `origin` in the background.
async fn update(
    State(ctx): State<Arc<Context>>,
    Path((datfile, stamp, id, origin)): Path<(String, i64, String, String)>,
) -> Result<String, WireError> {
    let cache = ctx.caches.get_or_create(&datfile).await.map_err(|_| WireError::BadRequest)?;
    let idstr = format!("{stamp}_{id}");
    let already = cache_record_path(&ctx, &datfile, &idstr).await.is_some();
    if !already {
        if let Some(origin_node) = Node::new(origin) {
            tokio::spawn(fetch_and_ingest(ctx.clone(), datfile, stamp, id, origin_node));
        }
    }
    Ok(String::new())
}

async fn fetch_and_ingest(ctx: Arc<Context>, datfile: String, stamp: i64, id: String, origin: Node) {
    let url = format!("{}/get/{datfile}/{stamp}/{id}", origin.base_url());
    let client = reqwest::Client::new();
    let Ok(resp) = client.get(&url).timeout(ctx.config.get_timeout).send().await else {
        debug!(%origin, "update fetch failed");
        return;
    };
    let Ok(body) = resp.text().await else { return };
    if let Ok(cache) = ctx.caches.get_or_create(&datfile).await {
        let outcome = cache.accept_exact(&body, stamp, &id).await;
        if outcome.got() {
            ctx.metrics.records_ingested_total.inc();
            ctx.nodes.tell_update(&datfile, stamp, &id).await;
        }
        if outcome.spam {
            ctx.metrics.records_spam_total.inc();
        }
        if outcome.removed {
            ctx.metrics.records_removed_total.inc();
        }
    }
}

/// `GET /metrics` — Prometheus text exposition.
async fn metrics(State(ctx): State<Arc<Context>>) -> Response {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let families = ctx.metrics.registry.gather();
    let mut buf = Vec::new();
    if encoder.encode(&families, &mut buf).is_err() {
        return (axum::http::StatusCode::INTERNAL_SERVER_ERROR, "encode error").into_response();
    }
    ([("content-type", encoder.format_type())], buf).into_response()
}

/// Build a record line that would be accepted by [`Record::parse`] for a
/// wire handler's own response body (used by tests to assert round-trips
/// through the range/exact endpoints).
#[cfg(test)]
fn sample_line(stamp: i64, body: &str) -> String {
    Record::build(stamp, &[("body", body)], None).unwrap().to_line()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_range_accepts_open_ended() {
        assert_eq!(parse_range("10-").unwrap(), (10, None));
        assert_eq!(parse_range("10-20").unwrap(), (10, Some(20)));
        assert!(parse_range("abc").is_err());
    }

    #[test]
    fn sample_line_parses_back() {
        let line = sample_line(1, "hi");
        assert!(Record::parse(&line).is_ok());
    }
}
