//! Terminal stage: the single outbound call to the resolved backend.
//!
//! Builds the outbound request from the inbound one (same method, gateway
//! prefix stripped from the path, headers copied verbatim, Host rewritten
//! to the backend authority, trace context injected), issues exactly one
//! call through the `HttpClient` port and relays the backend response with
//! its body streaming through untouched. No retries.
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use hyper::{Request, Response, header, header::HeaderValue};

use crate::{
    core::{
        backend::Backend,
        flow::{FlowComponent, FlowContext, GatewayError},
        propagation,
    },
    ports::http_client::HttpClient,
};

/// Forwarding stage. Terminal: owns no successor.
pub struct ForwarderStage {
    client: Arc<dyn HttpClient>,
}

impl ForwarderStage {
    pub fn new(client: Arc<dyn HttpClient>) -> Self {
        Self { client }
    }

    async fn forward(
        &self,
        req: Request<Body>,
        backend: &Backend,
        ctx: &FlowContext,
    ) -> Result<Response<Body>, GatewayError> {
        let (mut parts, body) = req.into_parts();

        let path_and_query =
            outbound_path_and_query(parts.uri.path(), parts.uri.query(), backend.name());
        let uri = format!("http://{}{}", backend.authority(), path_and_query);
        parts.uri = uri
            .parse::<hyper::Uri>()
            .map_err(|e| GatewayError::OutboundRequest(e.into()))?;

        // Inbound headers travel verbatim; only Host is rewritten so the
        // backend sees its own authority.
        let host = HeaderValue::from_str(&backend.authority())
            .map_err(|e| GatewayError::OutboundRequest(e.into()))?;
        parts.headers.insert(header::HOST, host);
        propagation::inject_trace_context(ctx.trace_context(), &mut parts.headers);

        // The body stream passes through unread and unbuffered.
        let outbound = Request::from_parts(parts, body);
        let response = self
            .client
            .send_request(outbound)
            .await
            .map_err(GatewayError::Forwarding)?;

        // Commit the backend's status before any response byte can flush an
        // implicit one.
        ctx.response_record().finalize(response.status());
        Ok(response)
    }
}

#[async_trait]
impl FlowComponent for ForwarderStage {
    async fn handle(&self, req: Request<Body>, ctx: FlowContext) -> Response<Body> {
        let Some(backend) = ctx.backend() else {
            tracing::error!(
                method = %req.method(),
                path = %req.uri().path(),
                "request reached the forwarder without a resolved backend"
            );
            return GatewayError::BackendMissing.into_response(&ctx);
        };

        let method = req.method().clone();
        let path = req.uri().path().to_string();
        match self.forward(req, &backend, &ctx).await {
            Ok(response) => response,
            Err(err) => {
                tracing::error!(
                    method = %method,
                    path = %path,
                    backend = %backend,
                    error = ?err,
                    "forwarding failed"
                );
                err.into_response(&ctx)
            }
        }
    }
}

/// Derive the outbound path and query from the inbound request.
///
/// The gateway prefix `/gw/backend/<name>` is stripped so the backend
/// observes only the tail path; the query string is preserved. A path that
/// unexpectedly lacks the prefix is forwarded unchanged.
fn outbound_path_and_query(path: &str, query: Option<&str>, backend_name: &str) -> String {
    let prefix = format!("/gw/backend/{backend_name}");
    let tail = match path.strip_prefix(&prefix) {
        Some(rest) if rest.starts_with('/') => rest,
        _ => path,
    };
    match query {
        Some(query) => format!("{tail}?{query}"),
        None => tail.to_string(),
    }
}
