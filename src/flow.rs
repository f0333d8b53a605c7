//! Flows (spec §4.7): a named, schema-validated entry point that runs inside
//! an [`ExecutionContext`], its handler wrapped by the owning scope's
//! extension pipeline the same way executor resolution is.

use std::any::Any;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::time::Duration;

use crate::context::{CloseMode, ExecutionContext};
use crate::error::CoreError;
use crate::extension::{ExecutionMode, ExecutionOperation, NextFn};
use crate::schema::{validate, Schema};
use crate::scope::Scope;
use crate::tag::TaggedValue;

type HandlerFn<I, O> =
    Rc<dyn Fn(I, ExecutionContext) -> Pin<Box<dyn Future<Output = Result<O, CoreError>>>>>;

/// A named, schema-validated flow: `input -> output` through a handler that
/// receives the [`ExecutionContext`] it is running in.
pub struct FlowDefinition<I: 'static, O: 'static> {
    name: &'static str,
    version: &'static str,
    input_schema: Rc<dyn Schema<I>>,
    output_schema: Rc<dyn Schema<O>>,
    tags: Vec<TaggedValue>,
    handler: HandlerFn<I, O>,
}

impl<I: 'static, O: 'static> Clone for FlowDefinition<I, O> {
    fn clone(&self) -> Self {
        FlowDefinition {
            name: self.name,
            version: self.version,
            input_schema: self.input_schema.clone(),
            output_schema: self.output_schema.clone(),
            tags: self.tags.clone(),
            handler: self.handler.clone(),
        }
    }
}

impl<I: 'static, O: 'static> FlowDefinition<I, O> {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn version(&self) -> &'static str {
        self.version
    }

    pub fn tagged(mut self, tagged: TaggedValue) -> Self {
        self.tags.push(tagged);
        self
    }

    pub fn with_version(mut self, version: &'static str) -> Self {
        self.version = version;
        self
    }

    /// Runs this flow as a fresh top-level execution against `scope`.
    pub async fn execute(&self, scope: &Scope, input: I) -> Result<O, CoreError> {
        self.execute_with(scope, input, None).await
    }

    /// As [`FlowDefinition::execute`], arming a timer that cancels the
    /// context (and so its whole subtree) if it has not settled by `timeout`.
    pub async fn execute_with(
        &self,
        scope: &Scope,
        input: I,
        timeout: Option<Duration>,
    ) -> Result<O, CoreError> {
        let ctx = ExecutionContext::new_root(scope.clone(), self.name);
        self.run_with_timeout(&ctx, input, timeout, None).await
    }

    /// Runs this flow nested inside an existing context, as a child call.
    pub async fn call_nested(&self, parent: &ExecutionContext, input: I) -> Result<O, CoreError> {
        let ctx = parent.child(self.name, false)?;
        self.run(&ctx, input, None).await
    }

    /// As [`FlowDefinition::call_nested`], additionally supporting a journal
    /// `key` (a repeated call with the same key on the same parent context
    /// replays the first call's outcome instead of re-running the flow) and
    /// a per-call `timeout`.
    pub async fn call_nested_with(
        &self,
        parent: &ExecutionContext,
        input: I,
        key: Option<&str>,
        timeout: Option<Duration>,
    ) -> Result<O, CoreError>
    where
        O: Clone,
    {
        match key {
            Some(key) => {
                let this = self.clone();
                let parent_for_child = parent.clone();
                let key_owned = key.to_string();
                parent
                    .exec(key, move || async move {
                        let ctx = parent_for_child.child(this.name, false)?;
                        this.run_with_timeout(&ctx, input, timeout, Some(key_owned))
                            .await
                    })
                    .await
            }
            None => {
                let ctx = parent.child(self.name, false)?;
                self.run_with_timeout(&ctx, input, timeout, None).await
            }
        }
    }

    async fn run_with_timeout(
        &self,
        ctx: &ExecutionContext,
        input: I,
        timeout: Option<Duration>,
        key: Option<String>,
    ) -> Result<O, CoreError> {
        match timeout {
            None => self.run(ctx, input, key).await,
            Some(duration) => match tokio::time::timeout(duration, self.run(ctx, input, key)).await {
                Ok(result) => result,
                Err(_elapsed) => {
                    // The timeout future above already dropped `run`'s own
                    // future, so `run`'s close-on-every-exit-path never ran:
                    // this is the one path that must close the context itself.
                    let _ = ctx.close(CloseMode::Abort);
                    Err(CoreError::aborted("timeout"))
                }
            },
        }
    }

    /// Runs the flow body, then closes `ctx` on every exit path: gracefully
    /// on success, with `mode: Abort` (cancelling any still-running children)
    /// on failure.
    async fn run(&self, ctx: &ExecutionContext, input: I, key: Option<String>) -> Result<O, CoreError> {
        let result = self.run_body(ctx, input, key).await;
        let mode = if result.is_ok() { CloseMode::Graceful } else { CloseMode::Abort };
        ctx.close(mode)?;
        result
    }

    async fn run_body(&self, ctx: &ExecutionContext, input: I, key: Option<String>) -> Result<O, CoreError> {
        let input = validate(self.input_schema.as_ref(), input)
            .map_err(|e| e.enrich_path(self.name))?;
        let output = self.invoke_through_extensions(ctx, input, key).await?;
        validate(self.output_schema.as_ref(), output).map_err(|e| e.enrich_path(self.name))
    }

    async fn invoke_through_extensions(
        &self,
        ctx: &ExecutionContext,
        input: I,
        key: Option<String>,
    ) -> Result<O, CoreError> {
        let op = ExecutionOperation {
            flow_name: self.name,
            depth: ctx.depth(),
            mode: ExecutionMode::Sequential,
            key,
            context: ctx.clone(),
            count: None,
        };
        let handler = self.handler.clone();
        let ctx_for_base = ctx.clone();
        let base: NextFn = Box::new(move || {
            let fut = (handler)(input, ctx_for_base);
            Box::pin(async move { fut.await.map(|v| Box::new(v) as Box<dyn Any>) })
        });
        let extensions = ctx.scope().extensions_snapshot();
        let mut chain = base;
        for ext in extensions.into_iter() {
            let scope = ctx.scope().clone();
            let op = op.clone();
            let prev = chain;
            chain = Box::new(move || ext.wrap_execution(&scope, &op, prev));
        }
        let boxed = chain().await?;
        Ok(*boxed
            .downcast::<O>()
            .expect("extension pipeline must preserve the flow's output type"))
    }
}

/// Declares a flow, the `flow(name, { input, output }, handler)` form from
/// spec.md.
pub fn flow<I, O, F, Fut>(
    name: &'static str,
    input: impl Schema<I> + 'static,
    output: impl Schema<O> + 'static,
    handler: F,
) -> FlowDefinition<I, O>
where
    I: 'static,
    O: 'static,
    F: Fn(I, ExecutionContext) -> Fut + 'static,
    Fut: Future<Output = Result<O, CoreError>> + 'static,
{
    FlowDefinition {
        name,
        version: "1",
        input_schema: Rc::new(input),
        output_schema: Rc::new(output),
        tags: Vec::new(),
        handler: Rc::new(move |i, ctx| Box::pin(handler(i, ctx))),
    }
}
