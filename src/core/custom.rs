//! Pluggable slot between routing and forwarding.
//!
//! Embedders register `FlowStage` implementations (authorization checks,
//! principal annotation, request vetting). Stages run in ascending `order`,
//! ties keeping registration order. Each stage either continues the chain
//! through its `Next` handle or short-circuits by returning a response of
//! its own. With no stages registered the slot is a transparent
//! pass-through.
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use hyper::{Request, Response};

use crate::core::flow::{FlowComponent, FlowContext, Next};

/// A pluggable sub-stage of the custom slot.
#[async_trait]
pub trait FlowStage: Send + Sync {
    /// Relative position inside the slot; lower runs earlier. Stages without
    /// an ordering opinion keep the default.
    fn order(&self) -> i32 {
        0
    }

    /// Handle the request: call `next.run(req, ctx)` to continue, or return
    /// a response directly to short-circuit (e.g. 401/403).
    async fn handle(&self, req: Request<Body>, ctx: FlowContext, next: Next) -> Response<Body>;
}

/// One registered sub-stage linked to its successor.
struct StageLink {
    stage: Arc<dyn FlowStage>,
    next: Arc<dyn FlowComponent>,
}

#[async_trait]
impl FlowComponent for StageLink {
    async fn handle(&self, req: Request<Body>, ctx: FlowContext) -> Response<Body> {
        self.stage
            .handle(req, ctx, Next::new(self.next.clone()))
            .await
    }
}

/// The custom slot as a single pipeline stage.
///
/// Sub-stages are sorted and linked once at construction; the chain is
/// never re-sorted or rewired while serving.
pub struct CustomStage {
    head: Arc<dyn FlowComponent>,
}

impl CustomStage {
    pub fn new(mut stages: Vec<Arc<dyn FlowStage>>, next: Arc<dyn FlowComponent>) -> Self {
        // Stable sort: equal-order stages keep their registration order.
        stages.sort_by_key(|stage| stage.order());

        let mut head = next;
        for stage in stages.into_iter().rev() {
            head = Arc::new(StageLink { stage, next: head });
        }

        Self { head }
    }
}

#[async_trait]
impl FlowComponent for CustomStage {
    async fn handle(&self, req: Request<Body>, ctx: FlowContext) -> Response<Body> {
        self.head.handle(req, ctx).await
    }
}
