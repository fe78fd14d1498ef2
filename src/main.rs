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

//! Duskboard node entrypoint.
//!
//! Loads configuration, bootstraps the process-wide [`duskboard::context::Context`],
//! then spawns the wire server and the anti-entropy driver as sibling tasks
//! and waits on whichever exits first.

use std::net::SocketAddr;
use std::path::PathBuf;

use tracing::{error, info};

use duskboard::config::Config;
use duskboard::context::Context;
use duskboard::networking::node::Node;
use duskboard::{driver, networking};

fn env(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

#[tokio::main]
async fn main() {
    let production = cfg!(feature = "production");
    let subscriber = tracing_subscriber::fmt().with_target(false).with_level(true);
    let _ = if production {
        subscriber.json().try_init()
    } else {
        subscriber.compact().try_init()
    };

    let config_path = PathBuf::from(env("DUSKBOARD_CONFIG", "duskboard.toml"));
    let config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, path = %config_path.display(), "failed to load configuration");
            std::process::exit(1);
        }
    };
    let listen_addr = config.listen_addr;

    let ctx = match Context::bootstrap(config).await {
        Ok(ctx) => ctx,
        Err(e) => {
            error!(error = ?e, "failed to bootstrap node");
            std::process::exit(1);
        }
    };

    let init_nodes: Vec<Node> = ctx
        .config
        .init_node
        .iter()
        .filter_map(|s| Node::new(s.clone()))
        .collect();
    if !init_nodes.is_empty() {
        ctx.nodes.initialize(&init_nodes).await;
    }

    info!(%listen_addr, nodes = init_nodes.len(), "duskboard node starting");

    let app = networking::wire_server::router(ctx.clone());
    let listener = match tokio::net::TcpListener::bind(listen_addr).await {
        Ok(l) => l,
        Err(e) => {
            error!(error = %e, %listen_addr, "failed to bind wire server");
            std::process::exit(1);
        }
    };
    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        {
            error!(error = %e, "wire server exited");
        }
    });

    let driver_ctx = ctx.clone();
    let driver_task = tokio::spawn(async move {
        driver::run_forever(driver_ctx).await;
    });

    tokio::select! {
        res = server => {
            if let Err(e) = res {
                error!(error = %e, "wire server task panicked");
            }
        }
        res = driver_task => {
            if let Err(e) = res {
                error!(error = %e, "anti-entropy driver task panicked");
            }
        }
    }
}
