//! W3C trace-context carriage over HTTP headers.
//!
//! Thin adapters between `http::HeaderMap` and the globally configured
//! text-map propagator. The binary installs the standard `traceparent`
//! propagator at startup; embedders may install their own.
use http::{HeaderMap, HeaderValue, header::HeaderName};
use opentelemetry::{
    Context,
    global,
    propagation::{Extractor, Injector},
};

struct HeaderExtractor<'a>(&'a HeaderMap);

impl Extractor for HeaderExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|value| value.to_str().ok())
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(|header| header.as_str()).collect()
    }
}

struct HeaderInjector<'a>(&'a mut HeaderMap);

impl Injector for HeaderInjector<'_> {
    fn set(&mut self, key: &str, value: String) {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(key.as_bytes()),
            HeaderValue::from_str(&value),
        ) {
            self.0.insert(name, value);
        } else {
            tracing::warn!(key, "dropping unencodable propagation header");
        }
    }
}

/// Read any inbound distributed-trace context from request headers.
pub fn extract_trace_context(headers: &HeaderMap) -> Context {
    global::get_text_map_propagator(|propagator| propagator.extract(&HeaderExtractor(headers)))
}

/// Write the active trace context into outbound request headers so the
/// backend continues the same trace.
pub fn inject_trace_context(cx: &Context, headers: &mut HeaderMap) {
    global::get_text_map_propagator(|propagator| {
        propagator.inject_context(cx, &mut HeaderInjector(headers));
    });
}

#[cfg(test)]
mod tests {
    use opentelemetry::trace::{
        SpanContext, SpanId, TraceContextExt, TraceFlags, TraceId, TraceState,
    };
    use opentelemetry_sdk::propagation::TraceContextPropagator;

    use super::*;

    fn remote_context() -> Context {
        let span_context = SpanContext::new(
            TraceId::from_hex("0af7651916cd43dd8448eb211c80319c").unwrap(),
            SpanId::from_hex("b7ad6b7169203331").unwrap(),
            TraceFlags::SAMPLED,
            true,
            TraceState::default(),
        );
        Context::new().with_remote_span_context(span_context)
    }

    #[test]
    fn test_inject_and_extract_round_trip() {
        global::set_text_map_propagator(TraceContextPropagator::new());

        let mut headers = HeaderMap::new();
        inject_trace_context(&remote_context(), &mut headers);

        let traceparent = headers.get("traceparent").expect("traceparent injected");
        assert!(
            traceparent
                .to_str()
                .unwrap()
                .contains("0af7651916cd43dd8448eb211c80319c")
        );

        let extracted = extract_trace_context(&headers);
        let span_context = extracted.span().span_context().clone();
        assert!(span_context.is_valid());
        assert_eq!(
            span_context.trace_id(),
            TraceId::from_hex("0af7651916cd43dd8448eb211c80319c").unwrap()
        );
    }

    #[test]
    fn test_extract_without_headers_yields_invalid_context() {
        global::set_text_map_propagator(TraceContextPropagator::new());

        let headers = HeaderMap::new();
        let extracted = extract_trace_context(&headers);
        assert!(!extracted.span().span_context().is_valid());
    }
}
