//! Per-context memoization.
//!
//! [`memoize`] returns a node that is behaviorally equivalent to its input
//! but guaranteed idempotent per render context: however many times the tree
//! observes it, the underlying work - component invocation, future
//! resolution, producer pulls - happens once, and every consumer sees the
//! same frames in the same order.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use futures_util::future::{BoxFuture, FutureExt, Shared};
use futures_util::StreamExt;

use crate::context::RenderContext;
use crate::error::RenderResult;
use crate::node::{Element, Eventual, Node, Props, RawProducer, Tag};
use crate::render::engine::expand_element;

/// Memoize `node`.
///
/// Scalars pass through; sequences memoize element-wise; elements are wrapped
/// in the memo tag (wrapping an already-wrapped element is a no-op);
/// eventuals share their resolution; producers gain a replay buffer shared by
/// all consumers. Indirect nodes are resolved once and their target
/// memoized.
pub fn memoize(node: Node) -> Node {
    match node {
        Node::Empty | Node::Text(_) | Node::AppendOnly => node,
        Node::Sequence(children) => {
            Node::Sequence(children.iter().cloned().map(memoize).collect())
        }
        Node::Element(element) => {
            if element.tag().is_memo() {
                Node::Element(element)
            } else {
                Node::Element(Element::new(Tag::Memo(element), Props::new()))
            }
        }
        Node::Eventual(eventual) => {
            if eventual.is_memoized() {
                Node::Eventual(eventual)
            } else {
                let future = {
                    let eventual = eventual.clone();
                    async move { eventual.resolved().await.map(memoize) }
                }
                .boxed()
                .shared();
                Node::Eventual(Eventual::memoized_from(future))
            }
        }
        Node::Stream(producer) => Node::Stream(producer.into_shared()),
        Node::Indirect(indirect) => memoize(indirect.target()),
    }
}

/// One memoized element evaluation: the context the result renders under and
/// the (memoized) node it produced.
pub(crate) type SharedEval = Shared<BoxFuture<'static, RenderResult<(RenderContext, Node)>>>;

/// Per-context memo table, keyed by element identity. The table lives on the
/// context and is discarded with it, so cached subtrees never outlive their
/// scope.
#[derive(Clone, Default)]
pub(crate) struct MemoStore {
    slots: Arc<Mutex<HashMap<u64, SharedEval>>>,
}

impl MemoStore {
    /// Get or start the single evaluation of `element` under `ctx`.
    /// Concurrent callers share one in-flight evaluation; failures are cached
    /// like results.
    pub(crate) fn evaluate(&self, element: &Element, ctx: &RenderContext) -> SharedEval {
        let mut slots = self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        slots
            .entry(element.id())
            .or_insert_with(|| {
                let element = element.clone();
                let ctx = ctx.clone();
                async move {
                    let (child_ctx, node) = expand_element(&element, &ctx).await?;
                    Ok((child_ctx, memoize(node)))
                }
                .boxed()
                .shared()
            })
            .clone()
    }
}

#[derive(Default)]
struct SharedState {
    frames: Vec<RenderResult<Node>>,
    done: bool,
}

enum Buffered {
    Ready(RenderResult<Node>),
    Done,
    Pending,
}

struct SharedProducerInner {
    /// Pulls are serialized on the source lock, so at most one underlying
    /// `next` is outstanding however many consumers are waiting.
    source: RawProducer,
    state: Mutex<SharedState>,
}

/// A producer whose frames are buffered and fanned out to every consumer.
/// Late joiners replay the buffered prefix before awaiting live frames. A
/// failure is buffered like a frame and replayed for the lifetime of the
/// producer.
#[derive(Clone)]
pub(crate) struct SharedProducer {
    inner: Arc<SharedProducerInner>,
}

impl SharedProducer {
    pub(crate) fn new(source: RawProducer) -> Self {
        Self {
            inner: Arc::new(SharedProducerInner {
                source,
                state: Mutex::new(SharedState::default()),
            }),
        }
    }

    pub(crate) fn cursor(&self) -> SharedCursor {
        SharedCursor {
            producer: self.clone(),
            index: 0,
        }
    }

    fn look(&self, index: usize) -> Buffered {
        let state = self
            .inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if index < state.frames.len() {
            Buffered::Ready(state.frames[index].clone())
        } else if state.done {
            Buffered::Done
        } else {
            Buffered::Pending
        }
    }

    async fn next_from(&self, index: usize) -> Option<RenderResult<Node>> {
        loop {
            match self.look(index) {
                Buffered::Ready(frame) => return Some(frame),
                Buffered::Done => return None,
                Buffered::Pending => {}
            }

            let mut raw = self.inner.source.lock().await;
            // another consumer may have advanced the buffer while we waited
            match self.look(index) {
                Buffered::Ready(frame) => return Some(frame),
                Buffered::Done => return None,
                Buffered::Pending => {}
            }

            let item = match raw.as_mut() {
                Some(stream) => stream.next().await,
                None => None,
            };

            let mut state = self
                .inner
                .state
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            match item {
                Some(Ok(node)) => state.frames.push(Ok(memoize(node))),
                Some(Err(err)) => {
                    state.frames.push(Err(err));
                    state.done = true;
                    *raw = None;
                }
                None => {
                    state.done = true;
                    *raw = None;
                }
            }
        }
    }
}

/// One consumer's replay position in a [`SharedProducer`].
pub(crate) struct SharedCursor {
    producer: SharedProducer,
    index: usize,
}

impl SharedCursor {
    pub(crate) async fn next(&mut self) -> Option<RenderResult<Node>> {
        let item = self.producer.next_from(self.index).await;
        if item.is_some() {
            self.index += 1;
        }
        item
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RenderError;
    use futures_util::stream;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counted_producer(count: Arc<AtomicUsize>, frames: Vec<&'static str>) -> Node {
        let stream = stream::iter(frames).map(move |text| {
            count.fetch_add(1, Ordering::SeqCst);
            Node::from(text)
        });
        memoize(Node::stream(stream))
    }

    #[test]
    fn test_memoize_wraps_elements_once() {
        let fragment = Element::fragment("x");
        let once = memoize(Node::Element(fragment));
        let twice = memoize(once.clone());

        let wrapped = once.as_element().expect("element");
        assert!(wrapped.tag().is_memo());
        let rewrapped = twice.as_element().expect("element");
        assert!(rewrapped.same(wrapped));
    }

    #[test]
    fn test_memoize_recurses_into_sequences() {
        let node = memoize(Node::seq([
            Node::from("a"),
            Node::Element(Element::fragment("b")),
        ]));
        match node {
            Node::Sequence(children) => {
                assert!(matches!(children[0], Node::Text(_)));
                let element = children[1].as_element().expect("element");
                assert!(element.tag().is_memo());
            }
            other => panic!("expected sequence, got {:?}", other),
        }
    }

    #[test]
    fn test_shared_producer_replays_to_late_joiners() {
        tokio_test::block_on(async {
            let count = Arc::new(AtomicUsize::new(0));
            let node = counted_producer(count.clone(), vec!["a", "ab", "abc"]);
            let Node::Stream(producer) = node else {
                panic!("expected stream node");
            };

            let mut first = producer.cursor();
            let mut texts = Vec::new();
            while let Some(item) = first.next().await {
                match item.expect("frame") {
                    Node::Text(text) => texts.push(text.to_string()),
                    other => panic!("expected text, got {:?}", other),
                }
            }
            assert_eq!(texts, ["a", "ab", "abc"]);

            // late joiner replays the buffer without touching the source
            let mut second = producer.cursor();
            let mut replay = Vec::new();
            while let Some(item) = second.next().await {
                match item.expect("frame") {
                    Node::Text(text) => replay.push(text.to_string()),
                    other => panic!("expected text, got {:?}", other),
                }
            }
            assert_eq!(replay, ["a", "ab", "abc"]);
            assert_eq!(count.load(Ordering::SeqCst), 3);
        });
    }

    #[test]
    fn test_shared_producer_interleaved_consumers_share_pulls() {
        tokio_test::block_on(async {
            let count = Arc::new(AtomicUsize::new(0));
            let node = counted_producer(count.clone(), vec!["x", "y"]);
            let Node::Stream(producer) = node else {
                panic!("expected stream node");
            };

            let mut a = producer.cursor();
            let mut b = producer.cursor();
            assert!(a.next().await.is_some());
            assert!(b.next().await.is_some());
            assert!(b.next().await.is_some());
            assert!(a.next().await.is_some());
            assert!(a.next().await.is_none());
            assert!(b.next().await.is_none());
            assert_eq!(count.load(Ordering::SeqCst), 2);
        });
    }

    #[test]
    fn test_shared_producer_caches_failure() {
        tokio_test::block_on(async {
            let node = memoize(Node::try_stream(stream::iter(vec![
                Ok(Node::from("partial")),
                Err(RenderError::provider_api("boom")),
            ])));
            let Node::Stream(producer) = node else {
                panic!("expected stream node");
            };

            for _ in 0..2 {
                let mut cursor = producer.cursor();
                assert!(matches!(cursor.next().await, Some(Ok(Node::Text(_)))));
                match cursor.next().await {
                    Some(Err(err)) => {
                        assert_eq!(err.code(), crate::error::ErrorCode::ProviderApi)
                    }
                    other => panic!("expected cached failure, got {:?}", other),
                }
                assert!(cursor.next().await.is_none());
            }
        });
    }

    #[test]
    fn test_memoized_eventual_resolves_to_memoized_node() {
        tokio_test::block_on(async {
            let node = memoize(Node::eventual(async {
                Ok(Node::Element(Element::fragment("inner")))
            }));
            let Node::Eventual(eventual) = node else {
                panic!("expected eventual node");
            };
            assert!(eventual.is_memoized());
            let resolved = eventual.resolved().await.expect("resolved");
            let element = resolved.as_element().expect("element");
            assert!(element.tag().is_memo());
        });
    }
}
