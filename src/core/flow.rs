//! The pipeline contract: stages, the per-request context, and the error
//! taxonomy every stage maps terminal failures through.
//!
//! Stages form a chain of responsibility. Each non-terminal stage owns its
//! successor as an `Arc<dyn FlowComponent>` assigned once at construction;
//! there is no runtime rewiring API, so a mis-wired chain is a compile-time
//! or startup-time fault, never a per-request one.
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use axum::body::Body;
use http::header;
use hyper::{Request, Response, StatusCode, header::HeaderValue};
use serde::Serialize;
use thiserror::Error;

use crate::{
    core::{backend::Backend, capture::ResponseRecord},
    ports::http_client::HttpClientError,
};

/// A pipeline stage. Takes ownership of the request and the per-request
/// context and produces the response, either by delegating to its successor
/// or by writing a terminal response itself.
#[async_trait]
pub trait FlowComponent: Send + Sync {
    async fn handle(&self, req: Request<Body>, ctx: FlowContext) -> Response<Body>;
}

/// Handle to a stage's successor, passed to pluggable sub-stages so they can
/// continue the chain or short-circuit by not calling it.
#[derive(Clone)]
pub struct Next {
    inner: Arc<dyn FlowComponent>,
}

impl Next {
    pub(crate) fn new(inner: Arc<dyn FlowComponent>) -> Self {
        Self { inner }
    }

    /// Continue with the downstream chain.
    pub async fn run(self, req: Request<Body>, ctx: FlowContext) -> Response<Body> {
        self.inner.handle(req, ctx).await
    }
}

#[derive(Debug)]
struct ResolvedBackend {
    backend: Arc<Backend>,
    /// Low-cardinality copy of the name for span and metric tagging.
    name: Arc<str>,
}

/// Per-request scoped context threaded through the stages.
///
/// Cloning is cheap; all slots are shared handles. Annotations are set-once:
/// the first writer wins and later attempts are ignored, so a value read by
/// an upstream stage after the chain returns is the one the resolving stage
/// stored.
#[derive(Clone)]
pub struct FlowContext {
    resolved: Arc<OnceLock<ResolvedBackend>>,
    principal: Arc<OnceLock<String>>,
    response: ResponseRecord,
    trace: opentelemetry::Context,
}

impl FlowContext {
    pub fn new() -> Self {
        Self {
            resolved: Arc::new(OnceLock::new()),
            principal: Arc::new(OnceLock::new()),
            response: ResponseRecord::new(),
            trace: opentelemetry::Context::new(),
        }
    }

    /// Replace the trace context carried to downstream stages.
    pub(crate) fn with_trace_context(mut self, cx: opentelemetry::Context) -> Self {
        self.trace = cx;
        self
    }

    /// The trace context the forwarder propagates to the backend.
    pub fn trace_context(&self) -> &opentelemetry::Context {
        &self.trace
    }

    /// Record the resolved backend for downstream stages and for metric and
    /// span tagging. Set-once; a second attempt is ignored.
    pub fn annotate_backend(&self, backend: Arc<Backend>) {
        let name: Arc<str> = Arc::from(backend.name());
        if self.resolved.set(ResolvedBackend { backend, name }).is_err() {
            tracing::warn!("backend annotation already set for this request, keeping the first");
        }
    }

    /// The resolved backend, if routing ran and succeeded.
    pub fn backend(&self) -> Option<Arc<Backend>> {
        self.resolved.get().map(|resolved| resolved.backend.clone())
    }

    /// The resolved backend's name for tagging.
    pub fn backend_name(&self) -> Option<&str> {
        self.resolved.get().map(|resolved| resolved.name.as_ref())
    }

    /// Record an authenticated principal for later stages. Set-once.
    pub fn annotate_principal(&self, principal: &str) {
        if self.principal.set(principal.to_string()).is_err() {
            tracing::warn!("principal annotation already set for this request, keeping the first");
        }
    }

    pub fn principal(&self) -> Option<&str> {
        self.principal.get().map(String::as_str)
    }

    /// The shared status/byte capture for this request's response.
    pub fn response_record(&self) -> &ResponseRecord {
        &self.response
    }
}

impl Default for FlowContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Terminal per-request failures of the pipeline.
///
/// Display strings double as the user-facing error message, so they stay
/// generic; backend-internal detail goes to the log at the failure site.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum GatewayError {
    /// Request path does not have the `/gw/backend/<name>/<path>` shape
    #[error("request path does not match the gateway pattern /gw/backend/{{name}}/{{path}}")]
    PatternMismatch,

    /// Well-shaped path naming an unregistered backend
    #[error("no backend registered under name '{0}'")]
    BackendNotFound(String),

    /// The forwarder ran without a resolved backend in context
    #[error("no backend was resolved for this request")]
    BackendMissing,

    /// The outbound request could not be constructed
    #[error("failed to build the outbound request")]
    OutboundRequest(#[source] http::Error),

    /// The outbound call failed at the transport level
    #[error("failed to reach the upstream service")]
    Forwarding(#[source] HttpClientError),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl GatewayError {
    /// HTTP status this failure maps to.
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::PatternMismatch => StatusCode::BAD_REQUEST,
            GatewayError::BackendNotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::BackendMissing
            | GatewayError::OutboundRequest(_)
            | GatewayError::Forwarding(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Write the terminal JSON error response, finalizing the request's
    /// response record with this failure's status.
    pub fn into_response(self, ctx: &FlowContext) -> Response<Body> {
        let status = self.status();
        ctx.response_record().finalize(status);

        let body = ErrorBody {
            error: self.to_string(),
        };
        let payload = serde_json::to_string_pretty(&body)
            .unwrap_or_else(|_| format!("{{\n  \"error\": \"{status}\"\n}}"));

        let mut response = Response::new(Body::from(payload));
        *response.status_mut() = status;
        response
            .headers_mut()
            .insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        response
    }
}
