//! Backend resolution from the request path.
//!
//! The router checks the gateway path shape, resolves the named backend
//! from the read-only registry, annotates the request context and hands the
//! request to the next stage. Both failure modes are terminal and mapped to
//! client errors; no downstream stage runs after a routing failure.
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use hyper::{Request, Response};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::core::{
    backend::{Backend, BackendRegistry},
    flow::{FlowComponent, FlowContext, GatewayError},
};

/// `/gw/backend/<name>/<rest...>` with a non-empty name token and a
/// non-empty rest segment.
static GATEWAY_PATH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^/gw/backend/([A-Za-z0-9_-]+)(/.+)$").expect("gateway path pattern is valid")
});

/// Split a request path into the backend name and the tail forwarded to it.
pub fn match_gateway_path(path: &str) -> Option<(&str, &str)> {
    let captures = GATEWAY_PATH.captures(path)?;
    let name = captures.get(1)?.as_str();
    let tail = captures.get(2)?.as_str();
    Some((name, tail))
}

/// Resolve the backend a request path addresses.
///
/// Pattern mismatch and unknown names are the two routing failures; both
/// leave the registry untouched.
pub fn resolve_backend(
    registry: &BackendRegistry,
    path: &str,
) -> Result<Arc<Backend>, GatewayError> {
    let (name, _tail) = match_gateway_path(path).ok_or(GatewayError::PatternMismatch)?;
    registry
        .resolve(name)
        .ok_or_else(|| GatewayError::BackendNotFound(name.to_string()))
}

/// Routing stage: resolves and annotates the backend, or fails closed.
pub struct RouterStage {
    registry: Arc<BackendRegistry>,
    next: Arc<dyn FlowComponent>,
}

impl RouterStage {
    pub fn new(registry: Arc<BackendRegistry>, next: Arc<dyn FlowComponent>) -> Self {
        Self { registry, next }
    }
}

#[async_trait]
impl FlowComponent for RouterStage {
    async fn handle(&self, req: Request<Body>, ctx: FlowContext) -> Response<Body> {
        match resolve_backend(&self.registry, req.uri().path()) {
            Ok(backend) => {
                // Surface the backend on the request-scoped span, if the
                // server adapter declared the field.
                tracing::Span::current().record("backend", backend.name());
                tracing::debug!(backend = %backend.name(), path = %req.uri().path(), "resolved backend");
                ctx.annotate_backend(backend);
                self.next.handle(req, ctx).await
            }
            Err(err) => {
                tracing::warn!(
                    method = %req.method(),
                    path = %req.uri().path(),
                    error = %err,
                    "routing failed"
                );
                err.into_response(&ctx)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use hyper::StatusCode;

    use super::*;

    fn registry() -> BackendRegistry {
        BackendRegistry::from_backends(vec![
            Backend::new("echo", "127.0.0.1", 9000).unwrap(),
            Backend::new("orders", "orders.internal", 8080).unwrap(),
        ])
    }

    #[test]
    fn test_match_extracts_name_and_tail() {
        assert_eq!(
            match_gateway_path("/gw/backend/echo/hi"),
            Some(("echo", "/hi"))
        );
        assert_eq!(
            match_gateway_path("/gw/backend/orders/v1/items"),
            Some(("orders", "/v1/items"))
        );
        assert_eq!(
            match_gateway_path("/gw/backend/svc-a_2/deep/nested/path"),
            Some(("svc-a_2", "/deep/nested/path"))
        );
    }

    #[test]
    fn test_match_rejects_malformed_paths() {
        for path in [
            "/",
            "/gw",
            "/gw/back",
            "/gw/backend",
            "/gw/backend/",
            "/gw/backend/echo",
            "/gw/backend/echo/",
            "/gw/backend//hi",
            "/gw/backend/na me/hi",
            "/other/backend/echo/hi",
        ] {
            assert!(match_gateway_path(path).is_none(), "path {path} must not match");
        }
    }

    #[test]
    fn test_resolve_known_backend() {
        let registry = registry();
        let backend = resolve_backend(&registry, "/gw/backend/echo/hi").unwrap();
        assert_eq!(backend.name(), "echo");
    }

    #[test]
    fn test_resolve_pattern_mismatch_maps_to_400() {
        let registry = registry();
        let err = resolve_backend(&registry, "/gw/back").unwrap_err();
        assert!(matches!(err, GatewayError::PatternMismatch));
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_resolve_unknown_name_maps_to_404() {
        let registry = registry();
        let err = resolve_backend(&registry, "/gw/backend/idontexist/x").unwrap_err();
        assert!(matches!(err, GatewayError::BackendNotFound(_)));
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_resolve_duplicate_names_first_wins() {
        let registry = BackendRegistry::from_backends(vec![
            Backend::new("dup", "first.internal", 1).unwrap(),
            Backend::new("dup", "second.internal", 2).unwrap(),
        ]);

        let backend = resolve_backend(&registry, "/gw/backend/dup/x").unwrap();
        assert_eq!(backend.host(), "first.internal");
    }
}
