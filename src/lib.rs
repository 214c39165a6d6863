//! Gantry - a path-routing API gateway.
//!
//! Gantry accepts inbound HTTP requests on `/gw/backend/<name>/<path>`,
//! resolves the named backend from a registry loaded once at startup, runs
//! any registered pluggable stages, forwards the request to the backend and
//! relays the response while a server span and a fixed metric set record
//! the whole journey.
//!
//! # Architecture
//! The request path is a chain of four stages wired once at startup:
//! observability → router → custom slot → forwarder. Stages implement the
//! [`FlowComponent`](core::flow::FlowComponent) capability and own their
//! successor, so the topology is immutable while serving. The crate
//! separates **ports** (traits) from **adapters** (implementations) and
//! keeps business logic inside `core`.
//!
//! # Quick Example
//! ```no_run
//! use std::sync::Arc;
//!
//! use gantry::{BackendRegistry, HttpClientAdapter, Pipeline, config::GatewayConfig};
//!
//! # #[tokio::main] async fn main() -> eyre::Result<()> {
//! let config: GatewayConfig = gantry::config::load_config("gantry.toml").await?;
//! let registry = Arc::new(BackendRegistry::from_config(&config.backends)?);
//! let client = Arc::new(HttpClientAdapter::new()?);
//! let pipeline = Arc::new(Pipeline::assemble(registry, client, Vec::new()));
//! gantry::adapters::http_server::serve(&config.listen_addr, pipeline).await?;
//! # Ok(()) }
//! ```
//!
//! # Error Handling
//! All fallible APIs return `eyre::Result<T>` or a domain specific error
//! type; per-request failures map to structured JSON error responses.
//!
//! # Telemetry
//! The pipeline obtains its tracer and instruments from the globally
//! configured OpenTelemetry providers. Exporter wiring is left to the
//! embedding application.
//!
//! # License
//! Licensed under Apache-2.0.
pub mod config;
pub mod ports;
pub mod tracing_setup;

// These modules are implementation details and should not be directly used by users
pub mod adapters;
pub mod core;

// Re-export the specific types needed by the binary crate and embedders
pub use crate::{
    adapters::HttpClientAdapter,
    core::{Backend, BackendRegistry, FlowComponent, FlowContext, FlowStage, GatewayError, Next,
        Pipeline},
    ports::http_client::HttpClient,
};
