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

//! Prometheus counters for the record store, the overlay, and the wire
//! server, exposed at `/metrics` as ambient observability infrastructure.

use prometheus::{IntCounter, IntGauge, Registry};
use thiserror::Error;

/// Metrics registration failures. Fatal at startup.
#[derive(Debug, Error)]
pub enum MetricsError {
    /// A metric name collided, or `prometheus` otherwise rejected registration.
    #[error("prometheus")]
    Prom,
}

/// Process-wide counters, registered once and cloned (cheaply, `Arc`-backed
/// internally by `prometheus`) into every component that needs to bump one.
#[derive(Clone)]
pub struct Metrics {
    /// Registry backing `/metrics`.
    pub registry: Registry,

    /// Records accepted into any cache.
    pub records_ingested_total: IntCounter,
    /// Records tombstoned on arrival by the spam heuristic or size limit.
    pub records_spam_total: IntCounter,
    /// Records moved to `removed/` by a remove-directive or by GC.
    pub records_removed_total: IntCounter,

    /// Current size of the general neighbour list.
    pub general_node_list_size: IntGauge,
    /// Successful inbound or outbound `/join` handshakes.
    pub join_total: IntCounter,
    /// Inbound or outbound `/bye` notifications.
    pub bye_total: IntCounter,
    /// `search` calls that found a source for a thread.
    pub search_hit_total: IntCounter,
    /// `search` calls that exhausted every candidate without a hit.
    pub search_miss_total: IntCounter,

    /// Inbound requests rejected by the admission-control semaphore.
    pub wire_admission_rejected_total: IntCounter,
}

impl Metrics {
    /// Create and register every counter against a fresh registry.
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let records_ingested_total =
            IntCounter::new("duskboard_records_ingested_total", "Records accepted into any cache")
                .map_err(|_| MetricsError::Prom)?;
        let records_spam_total = IntCounter::new(
            "duskboard_records_spam_total",
            "Records tombstoned on arrival by the spam heuristic or size limit",
        )
        .map_err(|_| MetricsError::Prom)?;
        let records_removed_total = IntCounter::new(
            "duskboard_records_removed_total",
            "Records moved to removed/ by a remove-directive or GC",
        )
        .map_err(|_| MetricsError::Prom)?;

        let general_node_list_size = IntGauge::new(
            "duskboard_general_node_list_size",
            "Current size of the general neighbour list",
        )
        .map_err(|_| MetricsError::Prom)?;
        let join_total = IntCounter::new("duskboard_join_total", "Successful join handshakes")
            .map_err(|_| MetricsError::Prom)?;
        let bye_total = IntCounter::new("duskboard_bye_total", "Bye notifications sent or received")
            .map_err(|_| MetricsError::Prom)?;
        let search_hit_total =
            IntCounter::new("duskboard_search_hit_total", "Searches that found a thread source")
                .map_err(|_| MetricsError::Prom)?;
        let search_miss_total = IntCounter::new(
            "duskboard_search_miss_total",
            "Searches that exhausted every candidate without a hit",
        )
        .map_err(|_| MetricsError::Prom)?;

        let wire_admission_rejected_total = IntCounter::new(
            "duskboard_wire_admission_rejected_total",
            "Inbound requests rejected by the admission-control semaphore",
        )
        .map_err(|_| MetricsError::Prom)?;

        for metric in [
            Box::new(records_ingested_total.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(records_spam_total.clone()),
            Box::new(records_removed_total.clone()),
            Box::new(general_node_list_size.clone()),
            Box::new(join_total.clone()),
            Box::new(bye_total.clone()),
            Box::new(search_hit_total.clone()),
            Box::new(search_miss_total.clone()),
            Box::new(wire_admission_rejected_total.clone()),
        ] {
            registry.register(metric).map_err(|_| MetricsError::Prom)?;
        }

        Ok(Self {
            registry,
            records_ingested_total,
            records_spam_total,
            records_removed_total,
            general_node_list_size,
            join_total,
            bye_total,
            search_hit_total,
            search_miss_total,
            wire_admission_rejected_total,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_register_without_name_collisions() {
        let metrics = Metrics::new().unwrap();
        metrics.records_ingested_total.inc();
        assert_eq!(metrics.records_ingested_total.get(), 1);
        assert!(!metrics.registry.gather().is_empty());
    }
}
