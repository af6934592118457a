//! Public rendering surface.
//!
//! [`RenderContext::render`] renders a node to completion;
//! [`RenderContext::render_stream`] yields intermediate frames. A stream is
//! either cumulative (each item is the running complete string) or
//! append-only (each item is the delta to append); the mode is forced with
//! [`RenderOptions::with_append_only`], and otherwise inferred: append-only
//! iff the root node is a producer declaring the [`crate::node::APPEND_ONLY`]
//! sentinel.
//!
//! With a stop predicate the output is segment-shaped - interleaved text runs
//! and opaque un-expanded elements - through
//! [`RenderContext::render_partial`] and [`RenderContext::render_frames`].

pub(crate) mod engine;
mod frame;

pub use frame::{Frame, Segment};

use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_stream::stream;
use futures_util::stream::{BoxStream, Stream, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::context::RenderContext;
use crate::error::RenderResult;
use crate::node::{Element, Node};

use engine::{guarded, EngineOptions};

/// Caller-supplied test arresting expansion at specific elements. Matched
/// elements appear in the output as opaque values; their children are never
/// evaluated.
pub type StopPredicate = Arc<dyn Fn(&Element) -> bool + Send + Sync>;

/// Options for a single render call.
#[derive(Clone, Default)]
pub struct RenderOptions {
    stop: Option<StopPredicate>,
    append_only: Option<bool>,
    signal: Option<CancellationToken>,
}

impl RenderOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stop(mut self, stop: impl Fn(&Element) -> bool + Send + Sync + 'static) -> Self {
        self.stop = Some(Arc::new(stop));
        self
    }

    /// Force the stream mode instead of inferring it from the root node.
    pub fn with_append_only(mut self, append_only: bool) -> Self {
        self.append_only = Some(append_only);
        self
    }

    /// Cooperative cancellation token checked at every suspension point.
    pub fn with_signal(mut self, signal: CancellationToken) -> Self {
        self.signal = Some(signal);
        self
    }
}

impl fmt::Debug for RenderOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderOptions")
            .field("stop", &self.stop.is_some())
            .field("append_only", &self.append_only)
            .field("signal", &self.signal.is_some())
            .finish()
    }
}

/// Stream of text frames produced by `render_stream`.
pub struct RenderStream {
    inner: BoxStream<'static, RenderResult<String>>,
}

impl Stream for RenderStream {
    type Item = RenderResult<String>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().inner.poll_next_unpin(cx)
    }
}

/// Stream of segment frames produced by `render_frames`.
pub struct FrameStream {
    inner: BoxStream<'static, RenderResult<Frame>>,
}

impl Stream for FrameStream {
    type Item = RenderResult<Frame>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().inner.poll_next_unpin(cx)
    }
}

impl RenderContext {
    fn engine_ctx(&self, opts: &RenderOptions) -> (RenderContext, Arc<EngineOptions>) {
        let ctx = match &opts.signal {
            Some(signal) => self.with_cancellation(signal.clone()),
            None => self.clone(),
        };
        (
            ctx,
            Arc::new(EngineOptions {
                stop: opts.stop.clone(),
            }),
        )
    }

    /// Render to completion; the concatenation of all frames.
    pub async fn render(&self, node: impl Into<Node>) -> RenderResult<String> {
        self.render_with(node, RenderOptions::new()).await
    }

    /// Render to completion with options.
    pub async fn render_with(
        &self,
        node: impl Into<Node>,
        opts: RenderOptions,
    ) -> RenderResult<String> {
        self.final_frame(node.into(), opts).await?.to_text()
    }

    /// Render with a stop predicate; matched elements appear in the result
    /// un-expanded, interleaved with the surrounding text.
    pub async fn render_partial(
        &self,
        node: impl Into<Node>,
        stop: impl Fn(&Element) -> bool + Send + Sync + 'static,
    ) -> RenderResult<Vec<Segment>> {
        let frame = self
            .final_frame(node.into(), RenderOptions::new().with_stop(stop))
            .await?;
        Ok(frame.into_segments())
    }

    async fn final_frame(&self, node: Node, opts: RenderOptions) -> RenderResult<Frame> {
        let (ctx, engine_opts) = self.engine_ctx(&opts);
        let mut frames = engine::node_frames(ctx, node, engine_opts);
        let mut last = Frame::empty();
        while let Some(item) = frames.next().await {
            last = item?;
        }
        Ok(last)
    }

    /// Render incrementally.
    pub fn render_stream(&self, node: impl Into<Node>) -> RenderStream {
        self.render_stream_with(node, RenderOptions::new())
    }

    /// Render incrementally with options.
    pub fn render_stream_with(&self, node: impl Into<Node>, opts: RenderOptions) -> RenderStream {
        let (ctx, engine_opts) = self.engine_ctx(&opts);
        let node = node.into();
        let mode = opts.append_only;
        RenderStream {
            inner: Box::pin(stream! {
                let cancel = ctx.cancellation().clone();

                // resolve the stream mode, peeking a root producer's first
                // yield for the append-only sentinel when nothing was forced
                let (append_only, mut frames) = match (mode, node) {
                    (None, Node::Stream(producer)) => {
                        let mut cursor = producer.cursor();
                        let first = match guarded(&cancel, cursor.next()).await {
                            Ok(item) => item,
                            Err(cancelled) => {
                                yield Err(cancelled);
                                return;
                            }
                        };
                        match first {
                            Some(Ok(Node::AppendOnly)) => (
                                true,
                                engine::producer_frames(ctx, cursor, None, Some(true), engine_opts),
                            ),
                            first => (
                                false,
                                engine::producer_frames(ctx, cursor, first, Some(false), engine_opts),
                            ),
                        }
                    }
                    (mode, node) => (
                        mode.unwrap_or(false),
                        engine::node_frames(ctx, node, engine_opts),
                    ),
                };

                let mut prev = Frame::empty();
                let mut emitted = false;
                while let Some(item) = frames.next().await {
                    let frame = match item {
                        Ok(frame) => frame,
                        Err(err) => {
                            yield Err(err);
                            return;
                        }
                    };
                    if append_only {
                        let delta = frame.delta_from(&prev);
                        prev = frame;
                        if !delta.is_empty() {
                            emitted = true;
                            let text = delta.to_text();
                            let failed = text.is_err();
                            yield text;
                            if failed {
                                return;
                            }
                        }
                    } else if !emitted || frame != prev {
                        prev = frame.clone();
                        emitted = true;
                        let text = frame.to_text();
                        let failed = text.is_err();
                        yield text;
                        if failed {
                            return;
                        }
                    }
                }
                // a cumulative stream always reports at least one frame
                if !append_only && !emitted {
                    yield prev.to_text();
                }
            }),
        }
    }

    /// Segment-level incremental rendering; the shape to consume when a stop
    /// predicate is in force.
    pub fn render_frames(&self, node: impl Into<Node>, opts: RenderOptions) -> FrameStream {
        let (ctx, engine_opts) = self.engine_ctx(&opts);
        let node = node.into();
        FrameStream {
            inner: Box::pin(stream! {
                let mut frames = engine::node_frames(ctx, node, engine_opts);
                let mut last: Option<Frame> = None;
                while let Some(item) = frames.next().await {
                    match item {
                        Ok(frame) => {
                            if last.as_ref() != Some(&frame) {
                                last = Some(frame.clone());
                                yield Ok(frame);
                            }
                        }
                        Err(err) => {
                            yield Err(err);
                            return;
                        }
                    }
                }
                if last.is_none() {
                    yield Ok(Frame::empty());
                }
            }),
        }
    }
}
