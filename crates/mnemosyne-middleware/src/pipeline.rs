//! Ordered middleware pipeline.
//!
//! Stages run in insertion order: every pre-handler stage, the handler, then
//! the post-handler stages on the way back out. The order is fixed once the
//! pipeline is built.

use crate::context::MiddlewareContext;
use crate::middleware::{BoxFuture, Middleware, Next};
use crate::types::{Request, Response};
use std::sync::Arc;

/// A type-erased middleware that can be stored in a vector.
pub type BoxedMiddleware = Arc<dyn Middleware>;

/// An immutable middleware pipeline.
///
/// # Example
///
/// ```ignore
/// use mnemosyne_middleware::{IdempotencyMiddleware, Pipeline};
///
/// let pipeline = Pipeline::builder()
///     .add_pre_handler_stage(IdempotencyMiddleware::new(store))
///     .build();
///
/// let response = pipeline.process(ctx, request, handler).await;
/// ```
pub struct Pipeline {
    pre_handler_stages: Vec<BoxedMiddleware>,
    post_handler_stages: Vec<BoxedMiddleware>,
}

impl Pipeline {
    /// Creates a new pipeline builder.
    #[must_use]
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    /// Processes a request through every stage and the handler.
    pub async fn process<H>(&self, mut ctx: MiddlewareContext, request: Request, handler: H) -> Response
    where
        H: FnOnce(&mut MiddlewareContext, Request) -> BoxFuture<'static, Response> + Send + 'static,
    {
        let next = self.build_chain(handler);
        next.run(&mut ctx, request).await
    }

    fn build_chain<'a, H>(&'a self, handler: H) -> Next<'a>
    where
        H: FnOnce(&mut MiddlewareContext, Request) -> BoxFuture<'static, Response> + Send + 'a,
    {
        let mut next = Next::handler(handler);

        for middleware in self.post_handler_stages.iter().rev() {
            next = Next::new(middleware.as_ref(), next);
        }

        for middleware in self.pre_handler_stages.iter().rev() {
            next = Next::new(middleware.as_ref(), next);
        }

        next
    }

    /// Returns the names of all middleware stages in order.
    #[must_use]
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.pre_handler_stages
            .iter()
            .chain(&self.post_handler_stages)
            .map(|mw| mw.name())
            .collect()
    }

    /// Returns the number of middleware stages.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.pre_handler_stages.len() + self.post_handler_stages.len()
    }
}

/// Builder for constructing a [`Pipeline`].
#[derive(Default)]
pub struct PipelineBuilder {
    pre_handler_stages: Vec<BoxedMiddleware>,
    post_handler_stages: Vec<BoxedMiddleware>,
}

impl PipelineBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a stage that runs before the handler.
    #[must_use]
    pub fn add_pre_handler_stage<M: Middleware>(mut self, middleware: M) -> Self {
        self.pre_handler_stages.push(Arc::new(middleware));
        self
    }

    /// Appends a stage that runs after the pre-handler stages, closest to the handler.
    #[must_use]
    pub fn add_post_handler_stage<M: Middleware>(mut self, middleware: M) -> Self {
        self.post_handler_stages.push(Arc::new(middleware));
        self
    }

    /// Builds the pipeline.
    #[must_use]
    pub fn build(self) -> Pipeline {
        Pipeline {
            pre_handler_stages: self.pre_handler_stages,
            post_handler_stages: self.post_handler_stages,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::full;
    use http::StatusCode;
    use std::sync::Mutex;

    struct OrderTracking {
        name: &'static str,
        order: Arc<Mutex<Vec<&'static str>>>,
    }

    impl Middleware for OrderTracking {
        fn name(&self) -> &'static str {
            self.name
        }

        fn process<'a>(
            &'a self,
            ctx: &'a mut MiddlewareContext,
            request: Request,
            next: Next<'a>,
        ) -> BoxFuture<'a, Response> {
            Box::pin(async move {
                self.order.lock().unwrap().push(self.name);
                next.run(ctx, request).await
            })
        }
    }

    fn request() -> Request {
        http::Request::builder()
            .method("POST")
            .uri("/test")
            .body(full(""))
            .unwrap()
    }

    #[tokio::test]
    async fn test_pipeline_executes_in_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let stage = |name| OrderTracking {
            name,
            order: order.clone(),
        };

        let pipeline = Pipeline::builder()
            .add_pre_handler_stage(stage("first"))
            .add_pre_handler_stage(stage("second"))
            .add_post_handler_stage(stage("third"))
            .build();

        assert_eq!(pipeline.stage_count(), 3);
        assert_eq!(pipeline.stage_names(), vec!["first", "second", "third"]);

        let handler_order = order.clone();
        let response = pipeline
            .process(MiddlewareContext::new(), request(), move |_ctx, _req| {
                handler_order.lock().unwrap().push("handler");
                Box::pin(async { http::Response::new(full("OK")) })
            })
            .await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            *order.lock().unwrap(),
            vec!["first", "second", "third", "handler"]
        );
    }

    #[tokio::test]
    async fn test_empty_pipeline_calls_handler() {
        let pipeline = Pipeline::builder().build();
        assert_eq!(pipeline.stage_count(), 0);

        let response = pipeline
            .process(MiddlewareContext::new(), request(), |_ctx, _req| {
                Box::pin(async {
                    let mut response = http::Response::new(full("created"));
                    *response.status_mut() = StatusCode::CREATED;
                    response
                })
            })
            .await;

        assert_eq!(response.status(), StatusCode::CREATED);
    }
}
