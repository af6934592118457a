//! Renderable node tree.
//!
//! A [`Node`] is anything the renderer can turn into text: scalar leaves,
//! ordered sequences, elements, eventuals (single-value futures), and lazy
//! incremental producers. Nodes are immutable values; cloning shares
//! structure.

mod element;

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt, Shared};
use futures_util::stream::{BoxStream, Stream, StreamExt};
use tokio::sync::Mutex;

use crate::error::RenderResult;
use crate::memo::{SharedCursor, SharedProducer};

pub use element::{Component, Element, FnComponent, Props, Tag};

/// Sentinel a producer yields first to declare the append-only discipline:
/// each subsequent yield is a delta appended to a running value rather than a
/// replacement frame.
pub const APPEND_ONLY: Node = Node::AppendOnly;

/// A node that delegates its rendering to another, hidden node. Semantics
/// beyond the delegation itself are owned by the collaborator providing the
/// implementation.
pub trait IndirectNode: Send + Sync {
    /// The node rendering is delegated to.
    fn target(&self) -> Node;
}

/// Any renderable value.
#[derive(Clone)]
pub enum Node {
    /// Renders as the empty string (nullish and boolean leaves).
    Empty,
    /// Verbatim text.
    Text(Arc<str>),
    /// Ordered concatenation of children.
    Sequence(Arc<[Node]>),
    /// An element.
    Element(Element),
    /// A single-value future resolving to a node.
    Eventual(Eventual),
    /// A lazy incremental producer.
    Stream(Producer),
    /// The append-only sentinel; meaningful only as a producer's first yield
    /// and otherwise renders as empty.
    AppendOnly,
    /// Delegates rendering to a hidden target node.
    Indirect(Arc<dyn IndirectNode>),
}

impl Node {
    /// Ordered sequence from any iterable of node-convertible values.
    pub fn seq<I, N>(nodes: I) -> Node
    where
        I: IntoIterator<Item = N>,
        N: Into<Node>,
    {
        let children: Vec<Node> = nodes.into_iter().map(Into::into).collect();
        Node::Sequence(Arc::from(children))
    }

    /// Node resolved later by a future.
    pub fn eventual<F>(future: F) -> Node
    where
        F: Future<Output = RenderResult<Node>> + Send + 'static,
    {
        Node::Eventual(Eventual::new(future))
    }

    /// Lazy incremental producer from an infallible node stream.
    pub fn stream<S>(stream: S) -> Node
    where
        S: Stream<Item = Node> + Send + 'static,
    {
        Node::Stream(Producer::from_nodes(stream))
    }

    /// Lazy incremental producer from a fallible node stream.
    pub fn try_stream<S>(stream: S) -> Node
    where
        S: Stream<Item = RenderResult<Node>> + Send + 'static,
    {
        Node::Stream(Producer::new(stream))
    }

    /// Delegating node; see [`IndirectNode`].
    pub fn indirect(target: Arc<dyn IndirectNode>) -> Node {
        Node::Indirect(target)
    }

    /// Structural discriminant for elements.
    pub fn is_element(&self) -> bool {
        matches!(self, Node::Element(_))
    }

    pub fn as_element(&self) -> Option<&Element> {
        match self {
            Node::Element(element) => Some(element),
            _ => None,
        }
    }

    /// Structural discriminant for indirect nodes.
    pub fn is_indirect(&self) -> bool {
        matches!(self, Node::Indirect(_))
    }
}

impl Default for Node {
    fn default() -> Self {
        Node::Empty
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Empty => write!(f, "Empty"),
            Node::Text(text) => write!(f, "Text({:?})", text),
            Node::Sequence(children) => f.debug_list().entries(children.iter()).finish(),
            Node::Element(element) => write!(f, "{:?}", element),
            Node::Eventual(_) => write!(f, "Eventual(..)"),
            Node::Stream(_) => write!(f, "Stream(..)"),
            Node::AppendOnly => write!(f, "AppendOnly"),
            Node::Indirect(_) => write!(f, "Indirect(..)"),
        }
    }
}

impl From<&str> for Node {
    fn from(text: &str) -> Self {
        Node::Text(Arc::from(text))
    }
}

impl From<String> for Node {
    fn from(text: String) -> Self {
        Node::Text(Arc::from(text.as_str()))
    }
}

impl From<i32> for Node {
    fn from(n: i32) -> Self {
        Node::from(n.to_string())
    }
}

impl From<i64> for Node {
    fn from(n: i64) -> Self {
        Node::from(n.to_string())
    }
}

impl From<u64> for Node {
    fn from(n: u64) -> Self {
        Node::from(n.to_string())
    }
}

impl From<usize> for Node {
    fn from(n: usize) -> Self {
        Node::from(n.to_string())
    }
}

impl From<f64> for Node {
    fn from(n: f64) -> Self {
        Node::from(n.to_string())
    }
}

// Booleans render as empty, matching the treatment of nullish leaves.
impl From<bool> for Node {
    fn from(_: bool) -> Self {
        Node::Empty
    }
}

impl From<()> for Node {
    fn from(_: ()) -> Self {
        Node::Empty
    }
}

impl From<Element> for Node {
    fn from(element: Element) -> Self {
        Node::Element(element)
    }
}

impl From<Vec<Node>> for Node {
    fn from(children: Vec<Node>) -> Self {
        Node::Sequence(Arc::from(children))
    }
}

impl<N: Into<Node>> From<Option<N>> for Node {
    fn from(value: Option<N>) -> Self {
        match value {
            Some(v) => v.into(),
            None => Node::Empty,
        }
    }
}

/// A shared, promise-like future resolving to a node. Cloning shares the
/// underlying computation; every awaiter observes the same result.
#[derive(Clone)]
pub struct Eventual {
    future: Shared<BoxFuture<'static, RenderResult<Node>>>,
    memoized: bool,
}

impl Eventual {
    pub fn new<F>(future: F) -> Self
    where
        F: Future<Output = RenderResult<Node>> + Send + 'static,
    {
        Self {
            future: future.boxed().shared(),
            memoized: false,
        }
    }

    /// Await resolution. Repeated calls observe the same result.
    pub async fn resolved(&self) -> RenderResult<Node> {
        self.future.clone().await
    }

    pub(crate) fn is_memoized(&self) -> bool {
        self.memoized
    }

    pub(crate) fn memoized_from(future: Shared<BoxFuture<'static, RenderResult<Node>>>) -> Self {
        Self {
            future,
            memoized: true,
        }
    }
}

pub(crate) type RawProducer = Arc<Mutex<Option<BoxStream<'static, RenderResult<Node>>>>>;

#[derive(Clone)]
enum ProducerInner {
    /// Single-consumption stream; concurrent consumers steal frames from one
    /// another. Memoize to share.
    Raw(RawProducer),
    /// Replay-buffered stream produced by memoization.
    Shared(SharedProducer),
}

/// A lazy incremental producer of nodes. Each yield becomes the subtree's
/// current frame; the last yield is the final value.
#[derive(Clone)]
pub struct Producer {
    inner: ProducerInner,
}

impl Producer {
    pub fn new<S>(stream: S) -> Self
    where
        S: Stream<Item = RenderResult<Node>> + Send + 'static,
    {
        Self {
            inner: ProducerInner::Raw(Arc::new(Mutex::new(Some(stream.boxed())))),
        }
    }

    pub fn from_nodes<S>(stream: S) -> Self
    where
        S: Stream<Item = Node> + Send + 'static,
    {
        Self::new(stream.map(Ok))
    }

    /// Share this producer's frames between consumers through a replay
    /// buffer. Already-shared producers are returned unchanged.
    pub(crate) fn into_shared(self) -> Producer {
        match self.inner {
            ProducerInner::Raw(raw) => Producer {
                inner: ProducerInner::Shared(SharedProducer::new(raw)),
            },
            ProducerInner::Shared(_) => self,
        }
    }

    pub(crate) fn cursor(&self) -> ProducerCursor {
        match &self.inner {
            ProducerInner::Raw(raw) => ProducerCursor::Raw(raw.clone()),
            ProducerInner::Shared(shared) => ProducerCursor::Shared(shared.cursor()),
        }
    }
}

/// One consumer's position in a producer.
pub(crate) enum ProducerCursor {
    Raw(RawProducer),
    Shared(SharedCursor),
}

impl ProducerCursor {
    /// Pull the next yielded node, if any. For raw producers this consumes
    /// the underlying stream; for shared producers it replays the buffer
    /// before pulling.
    pub(crate) async fn next(&mut self) -> Option<RenderResult<Node>> {
        match self {
            Self::Raw(raw) => {
                let mut guard = raw.lock().await;
                match guard.as_mut() {
                    Some(stream) => {
                        let item = stream.next().await;
                        if item.is_none() {
                            *guard = None;
                        }
                        item
                    }
                    None => None,
                }
            }
            Self::Shared(cursor) => cursor.next().await,
        }
    }
}

/// Compact single-line structural rendering of a node tree, for logs and
/// error messages. Lazy parts are shown opaquely; nothing is evaluated.
pub fn debug_tree(node: &Node) -> String {
    let mut out = String::new();
    write_node(&mut out, node);
    out
}

fn write_node(out: &mut String, node: &Node) {
    match node {
        Node::Empty => out.push_str("()"),
        Node::Text(text) => out.push_str(&format!("{:?}", text)),
        Node::Sequence(children) => {
            out.push('[');
            for (i, child) in children.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_node(out, child);
            }
            out.push(']');
        }
        Node::Element(element) => write_element(out, element),
        Node::Eventual(_) => out.push_str("<eventual>"),
        Node::Stream(_) => out.push_str("<stream>"),
        Node::AppendOnly => out.push_str("<append-only>"),
        Node::Indirect(_) => out.push_str("<indirect>"),
    }
}

fn write_element(out: &mut String, element: &Element) {
    out.push('<');
    out.push_str(&element.tag().name());
    let mut keys: Vec<&String> = element.props().values().keys().collect();
    keys.sort();
    for key in keys {
        if let Some(value) = element.props().value(key) {
            out.push_str(&format!(" {}={}", key, value));
        }
    }
    match element.props().children() {
        Node::Empty => out.push_str("/>"),
        children => {
            out.push('>');
            write_node(out, children);
            out.push_str("</");
            out.push_str(&element.tag().name());
            out.push('>');
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;

    #[test]
    fn test_scalar_conversions() {
        assert!(matches!(Node::from(true), Node::Empty));
        assert!(matches!(Node::from(()), Node::Empty));
        assert!(matches!(Node::from(Option::<&str>::None), Node::Empty));
        match Node::from(42i64) {
            Node::Text(text) => assert_eq!(&*text, "42"),
            other => panic!("expected text, got {:?}", other),
        }
        match Node::from("hello") {
            Node::Text(text) => assert_eq!(&*text, "hello"),
            other => panic!("expected text, got {:?}", other),
        }
    }

    #[test]
    fn test_seq_builder() {
        match Node::seq(["a", "b", "c"]) {
            Node::Sequence(children) => assert_eq!(children.len(), 3),
            other => panic!("expected sequence, got {:?}", other),
        }
    }

    #[test]
    fn test_raw_producer_is_single_consumption() {
        tokio_test::block_on(async {
            let producer = Producer::from_nodes(stream::iter([Node::from("a"), Node::from("b")]));
            let mut first = producer.cursor();
            let mut second = producer.cursor();

            assert!(matches!(first.next().await, Some(Ok(Node::Text(_)))));
            // the second cursor steals the remaining frame
            assert!(matches!(second.next().await, Some(Ok(Node::Text(_)))));
            assert!(first.next().await.is_none());
        });
    }

    #[test]
    fn test_eventual_resolves_once_for_all_awaiters() {
        tokio_test::block_on(async {
            let eventual = Eventual::new(async { Ok(Node::from("done")) });
            let a = eventual.resolved().await.expect("resolved");
            let b = eventual.resolved().await.expect("resolved");
            assert!(matches!(a, Node::Text(_)));
            assert!(matches!(b, Node::Text(_)));
        });
    }

    #[test]
    fn test_debug_tree_shape() {
        let greet = FnComponent::new("Greet", |_props, _ctx| async move { Ok(Node::Empty) });
        let element = Element::component(
            greet,
            Props::new().with_value("name", "x").with_children("hi"),
        );
        let tree = Node::seq([Node::from("a"), Node::Element(element), Node::Empty]);
        assert_eq!(debug_tree(&tree), r#"["a", <Greet name="x">"hi"</Greet>, ()]"#);
    }
}
