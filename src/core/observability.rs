//! Outermost stage: one server span and five metrics per request.
//!
//! The stage extracts any inbound trace context, opens a span bounding the
//! whole downstream chain, swaps counting wrappers into the request and
//! response, and records the metric set once the chain returns. Instruments
//! and the tracer come from the globally configured providers; the stage
//! never alters the semantics of what is being proxied.
use std::{sync::Arc, time::Instant};

use async_trait::async_trait;
use axum::body::Body;
use hyper::{Request, Response};
use opentelemetry::{
    KeyValue, global,
    global::BoxedTracer,
    metrics::{Counter, Histogram},
    trace::{SpanKind, Status, TraceContextExt, Tracer},
};
use opentelemetry_semantic_conventions::attribute::{
    HTTP_REQUEST_METHOD, HTTP_RESPONSE_STATUS_CODE,
};

use crate::core::{
    capture::{CountedBody, RecordingBody},
    flow::{FlowComponent, FlowContext},
    propagation,
};

/// Metric attribute carrying the resolved backend name.
const BACKEND_ATTRIBUTE: &str = "gateway.backend";
/// Backend tag when the request never reached a successful resolution.
const UNKNOWN_BACKEND: &str = "unknown";

/// Fixed byte-size bucket boundaries, shared by request and response size
/// histograms for cross-deployment comparability.
const SIZE_BOUNDARIES: [f64; 8] = [
    0.0, 100.0, 1_000.0, 10_000.0, 100_000.0, 1_000_000.0, 10_000_000.0, 100_000_000.0,
];
/// Fixed duration bucket boundaries in milliseconds.
const DURATION_BOUNDARIES_MS: [f64; 5] = [1.0, 10.0, 100.0, 1_000.0, 10_000.0];

struct PipelineInstruments {
    requests: Counter<u64>,
    request_size: Histogram<u64>,
    duration: Histogram<f64>,
    responses: Counter<u64>,
    response_size: Histogram<u64>,
}

impl PipelineInstruments {
    fn new() -> Self {
        let meter = global::meter("gantry");
        Self {
            requests: meter
                .u64_counter("gantry_requests")
                .with_description("Requests entering the gateway pipeline.")
                .build(),
            request_size: meter
                .u64_histogram("gantry_request_size_bytes")
                .with_description("Inbound request body size in bytes.")
                .with_unit("By")
                .with_boundaries(SIZE_BOUNDARIES.to_vec())
                .build(),
            duration: meter
                .f64_histogram("gantry_request_duration_ms")
                .with_description("Pipeline execution time in milliseconds.")
                .with_unit("ms")
                .with_boundaries(DURATION_BOUNDARIES_MS.to_vec())
                .build(),
            responses: meter
                .u64_counter("gantry_responses")
                .with_description("Responses written by the gateway, by status code.")
                .build(),
            response_size: meter
                .u64_histogram("gantry_response_size_bytes")
                .with_description("Outbound response body size in bytes.")
                .with_unit("By")
                .with_boundaries(SIZE_BOUNDARIES.to_vec())
                .build(),
        }
    }
}

/// Observability stage wrapping the rest of the pipeline.
pub struct ObservabilityStage {
    tracer: BoxedTracer,
    instruments: PipelineInstruments,
    next: Arc<dyn FlowComponent>,
}

impl ObservabilityStage {
    pub fn new(next: Arc<dyn FlowComponent>) -> Self {
        Self {
            tracer: global::tracer("gantry"),
            instruments: PipelineInstruments::new(),
            next,
        }
    }
}

#[async_trait]
impl FlowComponent for ObservabilityStage {
    async fn handle(&self, req: Request<Body>, ctx: FlowContext) -> Response<Body> {
        let parent_cx = propagation::extract_trace_context(req.headers());
        let span = self
            .tracer
            .span_builder("gateway.request")
            .with_kind(SpanKind::Server)
            .start_with_context(&self.tracer, &parent_cx);
        let cx = parent_cx.with_span(span);
        let ctx = ctx.with_trace_context(cx.clone());

        let method = req.method().as_str().to_string();

        let (parts, body) = req.into_parts();
        let (counted_body, request_bytes) = CountedBody::wrap(body);
        let req = Request::from_parts(parts, counted_body);

        let record = ctx.response_record().clone();
        let started = Instant::now();
        let response = self.next.handle(req, ctx.clone()).await;
        let elapsed_ms = started.elapsed().as_secs_f64() * 1_000.0;

        record.finalize(response.status());

        let span_status = match record.status() {
            None => Status::error("no available status code"),
            Some(status) if status.as_u16() >= 400 => Status::error(
                status
                    .canonical_reason()
                    .unwrap_or("unknown status")
                    .to_string(),
            ),
            Some(_) => Status::Ok,
        };

        let backend_name = ctx
            .backend_name()
            .unwrap_or(UNKNOWN_BACKEND)
            .to_string();

        {
            let span = cx.span();
            span.set_attribute(KeyValue::new(HTTP_REQUEST_METHOD, method.clone()));
            span.set_attribute(KeyValue::new(BACKEND_ATTRIBUTE, backend_name.clone()));
            if let Some(status) = record.status() {
                span.set_attribute(KeyValue::new(
                    HTTP_RESPONSE_STATUS_CODE,
                    i64::from(status.as_u16()),
                ));
            }
            span.set_status(span_status);
        }

        let tags = [
            KeyValue::new(HTTP_REQUEST_METHOD, method),
            KeyValue::new(BACKEND_ATTRIBUTE, backend_name),
        ];
        self.instruments.requests.add(1, &tags);
        self.instruments
            .request_size
            .record(request_bytes.num_bytes(), &tags);
        self.instruments.duration.record(elapsed_ms, &tags);

        let status_tag = record
            .status()
            .map(|status| i64::from(status.as_u16()))
            .unwrap_or(0);
        let response_tags = [
            tags[0].clone(),
            tags[1].clone(),
            KeyValue::new(HTTP_RESPONSE_STATUS_CODE, status_tag),
        ];
        self.instruments.responses.add(1, &response_tags);

        // Response bytes only exist once the relayed body has streamed out;
        // the wrapper's completion hook records the size and closes the
        // span at end of stream, or on drop if the client disconnects.
        let (parts, body) = response.into_parts();
        let response_size = self.instruments.response_size.clone();
        let recording_body = RecordingBody::wrap(body, record, move |record| {
            response_size.record(record.num_bytes(), &tags);
            cx.span().end();
        });
        Response::from_parts(parts, recording_body)
    }
}

#[cfg(test)]
mod tests {
    use hyper::StatusCode;

    use super::*;

    /// Terminal double returning a fixed response.
    struct Fixed {
        status: StatusCode,
        body: &'static str,
    }

    #[async_trait]
    impl FlowComponent for Fixed {
        async fn handle(&self, req: Request<Body>, _ctx: FlowContext) -> Response<Body> {
            // Drain the inbound body the way a proxying client would.
            use http_body_util::BodyExt;
            let _ = req.into_body().collect().await;

            let mut response = Response::new(Body::from(self.body));
            *response.status_mut() = self.status;
            response
        }
    }

    #[tokio::test]
    async fn test_wrapped_request_and_response_are_counted() {
        use http_body_util::BodyExt;

        let stage = ObservabilityStage::new(Arc::new(Fixed {
            status: StatusCode::OK,
            body: "pong",
        }));

        let req = Request::builder()
            .method("POST")
            .uri("/gw/backend/echo/hi")
            .body(Body::from("ping!"))
            .unwrap();
        let ctx = FlowContext::new();
        let response = stage.handle(req, ctx.clone()).await;

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], b"pong");

        // The record captured the terminal status and the relayed bytes.
        assert_eq!(ctx.response_record().status(), Some(StatusCode::OK));
        assert_eq!(ctx.response_record().num_bytes(), 4);
    }

    #[tokio::test]
    async fn test_first_finalized_status_survives_downstream_response() {
        let stage = ObservabilityStage::new(Arc::new(Fixed {
            status: StatusCode::OK,
            body: "",
        }));

        let ctx = FlowContext::new();
        // A stage finalized an error before the chain returned 200.
        ctx.response_record().finalize(StatusCode::FORBIDDEN);

        let req = Request::builder()
            .uri("/gw/backend/echo/hi")
            .body(Body::empty())
            .unwrap();
        let _response = stage.handle(req, ctx.clone()).await;

        assert_eq!(ctx.response_record().status(), Some(StatusCode::FORBIDDEN));
    }
}
