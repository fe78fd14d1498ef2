#![forbid(unsafe_code)]
#![allow(missing_docs)]

//! Observability: Prometheus metrics exposed over the wire server.

pub mod metrics;
