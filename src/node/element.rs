//! Elements, tags, props and the component abstraction.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use serde_json::Value;

use crate::context::{ContextBinding, RenderContext};
use crate::error::RenderResult;
use crate::node::Node;

static NEXT_ELEMENT_ID: AtomicU64 = AtomicU64::new(1);

/// Component trait - the unit of composition.
///
/// Components are stateless callables. The renderer invokes `render` with the
/// element's frozen props and the current render context; the returned node
/// may itself be a stream (`Node::Stream`) for components that emit
/// intermediate output. Side effects in a component body must be idempotent
/// within a single context because memoization may replay the surrounding
/// tree.
#[async_trait]
pub trait Component: Send + Sync {
    /// Component name used in logs and error reports.
    fn name(&self) -> &str;

    /// Produce the node this component renders to.
    async fn render(&self, props: Props, ctx: RenderContext) -> RenderResult<Node>;
}

/// Adapter turning a plain async function or closure into a [`Component`].
pub struct FnComponent {
    name: String,
    body: Arc<dyn Fn(Props, RenderContext) -> BoxFuture<'static, RenderResult<Node>> + Send + Sync>,
}

impl FnComponent {
    /// Wrap a closure as a shareable component tag.
    pub fn new<F, Fut>(name: impl Into<String>, body: F) -> Arc<dyn Component>
    where
        F: Fn(Props, RenderContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = RenderResult<Node>> + Send + 'static,
    {
        Arc::new(Self {
            name: name.into(),
            body: Arc::new(move |props, ctx| Box::pin(body(props, ctx))),
        })
    }
}

#[async_trait]
impl Component for FnComponent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn render(&self, props: Props, ctx: RenderContext) -> RenderResult<Node> {
        (self.body)(props, ctx).await
    }
}

/// Immutable element props: a keyed map of JSON values plus the distinguished
/// `children` node.
#[derive(Clone, Default)]
pub struct Props {
    values: HashMap<String, Value>,
    children: Node,
}

impl Props {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a keyed prop value.
    pub fn with_value(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    /// Set the children node.
    pub fn with_children(mut self, children: impl Into<Node>) -> Self {
        self.children = children.into();
        self
    }

    pub fn value(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Convenience accessor for string-valued props.
    pub fn str_value(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(|v| v.as_str())
    }

    pub fn values(&self) -> &HashMap<String, Value> {
        &self.values
    }

    pub fn children(&self) -> &Node {
        &self.children
    }
}

impl fmt::Debug for Props {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Props")
            .field("values", &self.values)
            .field("children", &self.children)
            .finish()
    }
}

/// What an element renders through.
#[derive(Clone)]
pub enum Tag {
    /// User component.
    Component(Arc<dyn Component>),
    /// Grouping intrinsic; renders its children unchanged.
    Fragment,
    /// Context provider intrinsic; rebinds a context key for its subtree.
    Provider(ContextBinding),
    /// Memo wrapper; evaluates the wrapped element once per render context.
    Memo(Element),
}

impl Tag {
    /// Identity test against a component tag. Two elements share a component
    /// tag only when they were built from the same `Arc`.
    pub fn is_component(&self, component: &Arc<dyn Component>) -> bool {
        match self {
            Self::Component(c) => Arc::ptr_eq(c, component),
            _ => false,
        }
    }

    /// Display name for logs and debug output. Memo wrappers report the name
    /// of the element they wrap.
    pub fn name(&self) -> String {
        match self {
            Self::Component(c) => c.name().to_string(),
            Self::Fragment => "Fragment".to_string(),
            Self::Provider(binding) => format!("Provider({})", binding.key_name()),
            Self::Memo(inner) => inner.tag().name(),
        }
    }

    pub fn is_fragment(&self) -> bool {
        matches!(self, Self::Fragment)
    }

    pub fn is_provider(&self) -> bool {
        matches!(self, Self::Provider(_))
    }

    pub fn is_memo(&self) -> bool {
        matches!(self, Self::Memo(_))
    }
}

impl From<Arc<dyn Component>> for Tag {
    fn from(component: Arc<dyn Component>) -> Self {
        Self::Component(component)
    }
}

impl fmt::Debug for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tag({})", self.name())
    }
}

struct ElementInner {
    id: u64,
    tag: Tag,
    props: Props,
}

/// An immutable render-tree element.
///
/// Elements are value-equal by identity: two elements compare equal only when
/// they originate from the same construction. Cloning shares the identity.
#[derive(Clone)]
pub struct Element {
    inner: Arc<ElementInner>,
}

impl Element {
    /// Construct an element from a tag and props.
    pub fn new(tag: impl Into<Tag>, props: Props) -> Self {
        Self {
            inner: Arc::new(ElementInner {
                id: NEXT_ELEMENT_ID.fetch_add(1, Ordering::Relaxed),
                tag: tag.into(),
                props,
            }),
        }
    }

    /// Construct an element, merging trailing children into `props.children`.
    /// One child is stored directly; several become an ordered sequence.
    pub fn with_children(tag: impl Into<Tag>, props: Props, children: Vec<Node>) -> Self {
        let props = match children.len() {
            0 => props,
            1 => {
                let mut children = children;
                props.with_children(children.remove(0))
            }
            _ => props.with_children(Node::Sequence(Arc::from(children))),
        };
        Self::new(tag, props)
    }

    /// Construct an element from a component tag.
    pub fn component(component: Arc<dyn Component>, props: Props) -> Self {
        Self::new(Tag::Component(component), props)
    }

    /// Group sibling nodes without introducing any output of its own.
    pub fn fragment(children: impl Into<Node>) -> Self {
        Self::new(Tag::Fragment, Props::new().with_children(children))
    }

    /// Process-unique identity of this element.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn tag(&self) -> &Tag {
        &self.inner.tag
    }

    pub fn props(&self) -> &Props {
        &self.inner.props
    }

    /// Identity comparison; the only equality the renderer recognizes.
    pub fn same(&self, other: &Element) -> bool {
        self.inner.id == other.inner.id
    }
}

impl PartialEq for Element {
    fn eq(&self, other: &Self) -> bool {
        self.same(other)
    }
}

impl Eq for Element {}

impl fmt::Debug for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{} #{}>", self.tag().name(), self.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_props_builder_and_accessors() {
        let props = Props::new()
            .with_value("model", "tee-9")
            .with_value("temperature", json!(0.2))
            .with_children("hi");
        assert_eq!(props.str_value("model"), Some("tee-9"));
        assert_eq!(props.value("temperature"), Some(&json!(0.2)));
        assert!(matches!(props.children(), Node::Text(_)));
    }

    #[test]
    fn test_with_children_merges_trailing_children() {
        let one = Element::with_children(Tag::Fragment, Props::new(), vec![Node::from("a")]);
        assert!(matches!(one.props().children(), Node::Text(_)));

        let many = Element::with_children(
            Tag::Fragment,
            Props::new(),
            vec![Node::from("a"), Node::from("b")],
        );
        match many.props().children() {
            Node::Sequence(children) => assert_eq!(children.len(), 2),
            other => panic!("expected sequence, got {:?}", other),
        }
    }

    #[test]
    fn test_element_identity() {
        let fragment = Element::fragment("x");
        let clone = fragment.clone();
        let other = Element::fragment("x");
        assert_eq!(fragment, clone);
        assert!(fragment.same(&clone));
        assert_ne!(fragment, other);
    }

    #[test]
    fn test_component_tag_identity() {
        let greet = FnComponent::new("Greet", |props, _ctx| async move {
            Ok(Node::from(format!(
                "hi {}",
                props.str_value("name").unwrap_or("?")
            )))
        });
        let other = FnComponent::new("Greet", |_props, _ctx| async move { Ok(Node::Empty) });

        let element = Element::component(greet.clone(), Props::new());
        assert!(element.tag().is_component(&greet));
        assert!(!element.tag().is_component(&other));
        assert_eq!(element.tag().name(), "Greet");
    }
}
