//! Streaming frame engine.
//!
//! Structural recursion over nodes with cooperative concurrency: every
//! subtree renders to a stream of frames, sequences advance their children
//! concurrently and stitch the results positionally, and every suspension
//! point races the render's cancellation token.
//!
//! The engine always produces cumulative frames. The emitted frame of a
//! sequence is the concatenation of the final frames of its completed prefix
//! plus the live frame of the first still-running child; later children keep
//! rendering but their output is withheld until the prefix completes, which
//! keeps every emitted frame a prefix-extension of the previous one.

use std::future::Future;
use std::sync::Arc;

use async_stream::stream;
use futures_util::future::{ready, BoxFuture, FutureExt};
use futures_util::stream::{self as futures_stream, BoxStream, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::context::{LogLevel, RenderContext};
use crate::error::{RenderError, RenderResult};
use crate::node::{Element, Eventual, Node, ProducerCursor, Tag};
use crate::render::frame::Frame;
use crate::render::StopPredicate;

pub(crate) type Frames = BoxStream<'static, RenderResult<Frame>>;

/// Options threaded through one render pass.
pub(crate) struct EngineOptions {
    pub(crate) stop: Option<StopPredicate>,
}

/// Race a suspension point against the cancellation token.
pub(crate) async fn guarded<F>(cancel: &CancellationToken, future: F) -> RenderResult<F::Output>
where
    F: Future,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(RenderError::Cancelled),
        out = future => Ok(out),
    }
}

fn single_frame(frame: Frame) -> Frames {
    futures_stream::once(ready(Ok(frame))).boxed()
}

/// Render `node` to a stream of cumulative frames. Every stream emits at
/// least one frame; the last frame is the subtree's final value.
pub(crate) fn node_frames(ctx: RenderContext, node: Node, opts: Arc<EngineOptions>) -> Frames {
    match node {
        Node::Empty | Node::AppendOnly => single_frame(Frame::empty()),
        Node::Text(text) => single_frame(Frame::text(&*text)),
        Node::Sequence(children) if children.is_empty() => single_frame(Frame::empty()),
        Node::Sequence(children) => sequence_frames(ctx, children, opts),
        Node::Element(element) => element_frames(ctx, element, opts),
        Node::Eventual(eventual) => eventual_frames(ctx, eventual, opts),
        Node::Stream(producer) => producer_frames(ctx, producer.cursor(), None, None, opts),
        Node::Indirect(indirect) => node_frames(ctx, indirect.target(), opts),
    }
}

/// One dispatch step of an element: the node it renders to and the context
/// that node renders under. Provider elements derive the child context here;
/// memo wrappers resolve through the context's memo table.
pub(crate) fn expand_element(
    element: &Element,
    ctx: &RenderContext,
) -> BoxFuture<'static, RenderResult<(RenderContext, Node)>> {
    let element = element.clone();
    let ctx = ctx.clone();
    async move {
        match element.tag() {
            Tag::Fragment => Ok((ctx.clone(), element.props().children().clone())),
            Tag::Provider(binding) => Ok((
                ctx.with_binding(binding),
                element.props().children().clone(),
            )),
            Tag::Component(component) => {
                let component = component.clone();
                // the component and its subtree log under the element's name
                let child_ctx = ctx.scoped_logger(component.name());
                match component
                    .render(element.props().clone(), child_ctx.clone())
                    .await
                {
                    Ok(node) => Ok((child_ctx, node)),
                    Err(err) => Err(err.in_component(component.name())),
                }
            }
            Tag::Memo(inner) => ctx.memo_store().evaluate(inner, &ctx).await,
        }
    }
    .boxed()
}

fn element_frames(ctx: RenderContext, element: Element, opts: Arc<EngineOptions>) -> Frames {
    if let Some(stop) = &opts.stop {
        if stop(&element) {
            return single_frame(Frame::element(element));
        }
    }
    Box::pin(stream! {
        let cancel = ctx.cancellation().clone();
        let name = element.tag().name();
        ctx.logger().log(LogLevel::Debug, Some(name.as_str()), "render start");

        let expanded = match guarded(&cancel, expand_element(&element, &ctx)).await {
            Ok(result) => result,
            Err(cancelled) => {
                yield Err(cancelled);
                return;
            }
        };
        match expanded {
            Ok((child_ctx, node)) => {
                let mut frames = node_frames(child_ctx, node, opts.clone());
                loop {
                    let item = match guarded(&cancel, frames.next()).await {
                        Ok(Some(item)) => item,
                        Ok(None) => break,
                        Err(cancelled) => {
                            yield Err(cancelled);
                            return;
                        }
                    };
                    let failed = item.is_err();
                    yield item;
                    if failed {
                        return;
                    }
                }
            }
            Err(err) => {
                ctx.logger().log(
                    LogLevel::Error,
                    Some(name.as_str()),
                    &format!("render failed: {}", err),
                );
                yield Err(err);
            }
        }
    })
}

fn eventual_frames(ctx: RenderContext, eventual: Eventual, opts: Arc<EngineOptions>) -> Frames {
    Box::pin(stream! {
        let cancel = ctx.cancellation().clone();
        // the subtree is empty until resolution
        yield Ok(Frame::empty());

        let resolved = match guarded(&cancel, eventual.resolved()).await {
            Ok(result) => result,
            Err(cancelled) => {
                yield Err(cancelled);
                return;
            }
        };
        match resolved {
            Ok(node) => {
                let mut frames = node_frames(ctx.clone(), node, opts.clone());
                loop {
                    let item = match guarded(&cancel, frames.next()).await {
                        Ok(Some(item)) => item,
                        Ok(None) => break,
                        Err(cancelled) => {
                            yield Err(cancelled);
                            return;
                        }
                    };
                    let failed = item.is_err();
                    yield item;
                    if failed {
                        return;
                    }
                }
            }
            Err(err) => yield Err(err),
        }
    })
}

enum SeqEvent {
    Frame(usize, RenderResult<Frame>),
    Done(usize),
}

fn sequence_frames(ctx: RenderContext, children: Arc<[Node]>, opts: Arc<EngineOptions>) -> Frames {
    Box::pin(stream! {
        let cancel = ctx.cancellation().clone();
        let indexed: Vec<BoxStream<'static, SeqEvent>> = children
            .iter()
            .cloned()
            .enumerate()
            .map(|(index, child)| {
                node_frames(ctx.clone(), child, opts.clone())
                    .map(move |frame| SeqEvent::Frame(index, frame))
                    .chain(futures_stream::once(ready(SeqEvent::Done(index))))
                    .boxed()
            })
            .collect();
        let mut merged = futures_stream::select_all(indexed);
        let mut slots: Vec<Frame> = vec![Frame::empty(); children.len()];
        let mut finished: Vec<bool> = vec![false; children.len()];
        let mut last_emitted: Option<Frame> = None;

        loop {
            let event = match guarded(&cancel, merged.next()).await {
                Ok(Some(event)) => event,
                Ok(None) => break,
                Err(cancelled) => {
                    yield Err(cancelled);
                    return;
                }
            };
            match event {
                SeqEvent::Frame(index, Ok(frame)) => slots[index] = frame,
                SeqEvent::Frame(_, Err(err)) => {
                    yield Err(err);
                    return;
                }
                SeqEvent::Done(index) => finished[index] = true,
            }
            let frame = visible_frame(&slots, &finished);
            if last_emitted.as_ref() != Some(&frame) {
                last_emitted = Some(frame.clone());
                yield Ok(frame);
            }
        }
        if last_emitted.is_none() {
            yield Ok(Frame::empty());
        }
    })
}

/// Positional stitching with monotone withholding: completed children
/// contribute their final frames in order, the first still-running child
/// contributes its live frame, later children are withheld.
fn visible_frame(slots: &[Frame], finished: &[bool]) -> Frame {
    let mut out = Frame::empty();
    for (index, slot) in slots.iter().enumerate() {
        out.append(slot);
        if !finished[index] {
            break;
        }
    }
    out
}

/// Render a producer. `pending` carries an item the caller already pulled
/// while resolving the stream mode; `declared` short-circuits sentinel
/// detection when the caller has done it.
pub(crate) fn producer_frames(
    ctx: RenderContext,
    mut cursor: ProducerCursor,
    mut pending: Option<RenderResult<Node>>,
    declared: Option<bool>,
    opts: Arc<EngineOptions>,
) -> Frames {
    Box::pin(stream! {
        let cancel = ctx.cancellation().clone();

        let mut append_only = declared;
        if append_only.is_none() {
            let first = if pending.is_some() {
                pending.take()
            } else {
                match guarded(&cancel, cursor.next()).await {
                    Ok(item) => item,
                    Err(cancelled) => {
                        yield Err(cancelled);
                        return;
                    }
                }
            };
            match first {
                Some(Ok(Node::AppendOnly)) => append_only = Some(true),
                other => {
                    append_only = Some(false);
                    pending = other;
                }
            }
        }
        let append_only = append_only.unwrap_or(false);

        // committed: concatenation of completed yields (append-only only)
        let mut committed = Frame::empty();
        let mut emitted: Option<Frame> = None;

        loop {
            let item = if pending.is_some() {
                pending.take()
            } else {
                match guarded(&cancel, cursor.next()).await {
                    Ok(item) => item,
                    Err(cancelled) => {
                        yield Err(cancelled);
                        return;
                    }
                }
            };
            let node = match item {
                None => break,
                Some(Err(err)) => {
                    yield Err(err);
                    return;
                }
                // a sentinel echoed as the return value is ignored
                Some(Ok(Node::AppendOnly)) => continue,
                Some(Ok(node)) => node,
            };

            let mut inner = node_frames(ctx.clone(), node, opts.clone());
            let mut inner_last = Frame::empty();
            loop {
                let inner_item = match guarded(&cancel, inner.next()).await {
                    Ok(item) => item,
                    Err(cancelled) => {
                        yield Err(cancelled);
                        return;
                    }
                };
                let frame = match inner_item {
                    None => break,
                    Some(Err(err)) => {
                        yield Err(err);
                        return;
                    }
                    Some(Ok(frame)) => frame,
                };
                inner_last = frame;
                let current = if append_only {
                    committed.appended(&inner_last)
                } else {
                    inner_last.clone()
                };
                if emitted.as_ref() != Some(&current) {
                    emitted = Some(current.clone());
                    yield Ok(current);
                }
            }
            if append_only {
                committed.append(&inner_last);
            }
        }

        // a producer that yields nothing renders as the empty string
        if emitted.is_none() {
            yield Ok(Frame::empty());
        }
    })
}
