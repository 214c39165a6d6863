//! One-time assembly of the stage chain and per-request dispatch.
//!
//! The chain is Observability → Router → Custom → Forwarder. Every stage
//! receives its successor at construction, so the topology is fixed before
//! the first request and immutable while serving.
use std::sync::Arc;

use axum::body::Body;
use hyper::{Request, Response};

use crate::{
    core::{
        backend::BackendRegistry,
        custom::{CustomStage, FlowStage},
        flow::{FlowComponent, FlowContext},
        forwarder::ForwarderStage,
        observability::ObservabilityStage,
        router::RouterStage,
    },
    ports::http_client::HttpClient,
};

/// The assembled gateway pipeline.
pub struct Pipeline {
    head: Arc<dyn FlowComponent>,
}

impl Pipeline {
    /// Wire the fixed stage chain. Runs once at startup; the resulting
    /// topology cannot be rewired.
    pub fn assemble(
        registry: Arc<BackendRegistry>,
        client: Arc<dyn HttpClient>,
        custom_stages: Vec<Arc<dyn FlowStage>>,
    ) -> Self {
        if registry.is_empty() {
            tracing::warn!("backend registry is empty, every request will fail routing");
        }

        let forwarder: Arc<dyn FlowComponent> = Arc::new(ForwarderStage::new(client));
        let custom: Arc<dyn FlowComponent> = Arc::new(CustomStage::new(custom_stages, forwarder));
        let router: Arc<dyn FlowComponent> = Arc::new(RouterStage::new(registry, custom));
        let head: Arc<dyn FlowComponent> = Arc::new(ObservabilityStage::new(router));

        Self { head }
    }

    /// Run one request through the pipeline with a fresh per-request
    /// context.
    pub async fn dispatch(&self, req: Request<Body>) -> Response<Body> {
        self.head.handle(req, FlowContext::new()).await
    }
}
