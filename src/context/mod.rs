//! Scoped render contexts, context keys and loggers.
//!
//! A [`RenderContext`] is the bag of scoped bindings carried through the
//! tree: context values, a logger, the memo table and the cooperative
//! cancellation token. Contexts are immutable; providers derive a new context
//! for their subtree and never mutate the parent.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::memo::{self, MemoStore};
use crate::node::{Element, Node, Props, Tag};

static NEXT_KEY_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Logger severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Logging interface carried by the render context. Collaborators may
/// implement their own sink; the renderer reports element lifecycle events
/// through it.
pub trait Logger: Send + Sync {
    fn log(&self, level: LogLevel, element: Option<&str>, message: &str);
}

/// Default logger: forwards to `tracing`. Without a subscriber installed this
/// is a no-op.
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn log(&self, level: LogLevel, element: Option<&str>, message: &str) {
        let element = element.unwrap_or("");
        match level {
            LogLevel::Debug => tracing::debug!(element, "{}", message),
            LogLevel::Info => tracing::info!(element, "{}", message),
            LogLevel::Warn => tracing::warn!(element, "{}", message),
            LogLevel::Error => tracing::error!(element, "{}", message),
        }
    }
}

/// Logger that discards everything.
pub struct NoopLogger;

impl Logger for NoopLogger {
    fn log(&self, _level: LogLevel, _element: Option<&str>, _message: &str) {}
}

/// Logger bound to an element name, so a subtree's logs carry their origin.
pub struct ElementLogger {
    inner: Arc<dyn Logger>,
    element: String,
}

impl ElementLogger {
    pub fn wrap(inner: Arc<dyn Logger>, element: impl Into<String>) -> Arc<dyn Logger> {
        Arc::new(Self {
            inner,
            element: element.into(),
        })
    }
}

impl Logger for ElementLogger {
    fn log(&self, level: LogLevel, element: Option<&str>, message: &str) {
        self.inner
            .log(level, element.or(Some(self.element.as_str())), message);
    }
}

struct KeyInner<T> {
    id: u64,
    name: String,
    default: Arc<T>,
}

/// A typed context key with a default value. Keys created separately are
/// never equal, whatever their names.
pub struct ContextKey<T> {
    inner: Arc<KeyInner<T>>,
}

impl<T> Clone for ContextKey<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Send + Sync + 'static> ContextKey<T> {
    pub fn new(name: impl Into<String>, default: T) -> Self {
        Self {
            inner: Arc::new(KeyInner {
                id: NEXT_KEY_ID.fetch_add(1, Ordering::Relaxed),
                name: name.into(),
                default: Arc::new(default),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub(crate) fn id(&self) -> u64 {
        self.inner.id
    }

    pub(crate) fn default_value(&self) -> Arc<T> {
        self.inner.default.clone()
    }

    /// Build the intrinsic provider element rebinding this key to `value`
    /// for `children`.
    pub fn provider(&self, value: T, children: impl Into<Node>) -> Element {
        Element::new(
            Tag::Provider(ContextBinding::new(self, value)),
            Props::new().with_children(children),
        )
    }
}

impl<T> fmt::Debug for ContextKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContextKey({} #{})", self.inner.name, self.inner.id)
    }
}

/// Erased `{key, value}` pair carried by a provider element.
#[derive(Clone)]
pub struct ContextBinding {
    key_id: u64,
    key_name: Arc<str>,
    value: Arc<dyn Any + Send + Sync>,
}

impl ContextBinding {
    fn new<T: Send + Sync + 'static>(key: &ContextKey<T>, value: T) -> Self {
        Self {
            key_id: key.id(),
            key_name: Arc::from(key.name()),
            value: Arc::new(value),
        }
    }

    pub fn key_name(&self) -> &str {
        &self.key_name
    }
}

impl fmt::Debug for ContextBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContextBinding({})", self.key_name)
    }
}

/// Options for creating a root render context.
pub struct RenderContextOptions {
    logger: Arc<dyn Logger>,
    bindings: HashMap<u64, Arc<dyn Any + Send + Sync>>,
}

impl RenderContextOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = logger;
        self
    }

    /// Bind `key` at the root, below any provider overrides.
    pub fn with_initial<T: Send + Sync + 'static>(mut self, key: &ContextKey<T>, value: T) -> Self {
        self.bindings.insert(key.id(), Arc::new(value));
        self
    }
}

impl Default for RenderContextOptions {
    fn default() -> Self {
        Self {
            logger: Arc::new(TracingLogger),
            bindings: HashMap::new(),
        }
    }
}

struct ContextInner {
    id: u64,
    bindings: HashMap<u64, Arc<dyn Any + Send + Sync>>,
    logger: Arc<dyn Logger>,
    cancel: CancellationToken,
    memo: MemoStore,
}

/// The scoped binding bag carried through the tree.
///
/// This is also the context handed to components: it exposes `render`,
/// `render_stream`, `memoized`, `get_context`, `logger` and the cancellation
/// token.
#[derive(Clone)]
pub struct RenderContext {
    inner: Arc<ContextInner>,
}

impl RenderContext {
    /// Fresh root context with default options.
    pub fn new() -> Self {
        Self::with_options(RenderContextOptions::default())
    }

    /// Fresh root context.
    pub fn with_options(options: RenderContextOptions) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                id: NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed),
                bindings: options.bindings,
                logger: options.logger,
                cancel: CancellationToken::new(),
                memo: MemoStore::default(),
            }),
        }
    }

    /// Value bound to `key` along the provider chain, or the key's default.
    pub fn get_context<T: Send + Sync + 'static>(&self, key: &ContextKey<T>) -> Arc<T> {
        match self.inner.bindings.get(&key.id()) {
            Some(value) => match value.clone().downcast::<T>() {
                Ok(typed) => typed,
                // unreachable unless a binding was forged for a foreign key
                Err(_) => {
                    self.logger().log(
                        LogLevel::Error,
                        None,
                        &format!("context value for '{}' has the wrong type", key.name()),
                    );
                    key.default_value()
                }
            },
            None => key.default_value(),
        }
    }

    /// Derived context with `key` rebound for a subtree. The receiver is
    /// unchanged; the derived context has its own memo table.
    pub fn push_context<T: Send + Sync + 'static>(
        &self,
        key: &ContextKey<T>,
        value: T,
    ) -> RenderContext {
        self.derive_with_binding(key.id(), Arc::new(value))
    }

    pub(crate) fn with_binding(&self, binding: &ContextBinding) -> RenderContext {
        self.derive_with_binding(binding.key_id, binding.value.clone())
    }

    fn derive_with_binding(
        &self,
        key_id: u64,
        value: Arc<dyn Any + Send + Sync>,
    ) -> RenderContext {
        let mut bindings = self.inner.bindings.clone();
        bindings.insert(key_id, value);
        Self {
            inner: Arc::new(ContextInner {
                id: NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed),
                bindings,
                logger: self.inner.logger.clone(),
                cancel: self.inner.cancel.clone(),
                memo: MemoStore::default(),
            }),
        }
    }

    /// Same context identity (bindings and memo table) with a cancellation
    /// token attached for one render call.
    pub(crate) fn with_cancellation(&self, cancel: CancellationToken) -> RenderContext {
        Self {
            inner: Arc::new(ContextInner {
                id: self.inner.id,
                bindings: self.inner.bindings.clone(),
                logger: self.inner.logger.clone(),
                cancel,
                memo: self.inner.memo.clone(),
            }),
        }
    }

    /// Same context identity with the logger bound to an element name, so a
    /// subtree's logs carry their origin.
    pub(crate) fn scoped_logger(&self, element: &str) -> RenderContext {
        Self {
            inner: Arc::new(ContextInner {
                id: self.inner.id,
                bindings: self.inner.bindings.clone(),
                logger: ElementLogger::wrap(self.inner.logger.clone(), element),
                cancel: self.inner.cancel.clone(),
                memo: self.inner.memo.clone(),
            }),
        }
    }

    pub fn logger(&self) -> &Arc<dyn Logger> {
        &self.inner.logger
    }

    /// Cooperative cancellation token for this render. Components doing
    /// long-lived work should poll it.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.inner.cancel
    }

    /// Memoize `node`: behaviorally equivalent, but the underlying work runs
    /// at most once per render context however often the node is observed.
    pub fn memoized(&self, node: impl Into<Node>) -> Node {
        memo::memoize(node.into())
    }

    pub(crate) fn memo_store(&self) -> &MemoStore {
        &self.inner.memo
    }

    pub(crate) fn id(&self) -> u64 {
        self.inner.id
    }
}

impl Default for RenderContext {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RenderContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderContext")
            .field("id", &self.inner.id)
            .field("bindings", &self.inner.bindings.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct CapturingLogger {
        entries: Mutex<Vec<(LogLevel, Option<String>, String)>>,
    }

    impl CapturingLogger {
        fn new() -> Self {
            Self {
                entries: Mutex::new(Vec::new()),
            }
        }
    }

    impl Logger for CapturingLogger {
        fn log(&self, level: LogLevel, element: Option<&str>, message: &str) {
            self.entries.lock().expect("entries").push((
                level,
                element.map(|e| e.to_string()),
                message.to_string(),
            ));
        }
    }

    #[test]
    fn test_element_logger_supplies_element_name() {
        let capture = Arc::new(CapturingLogger::new());
        let logger = ElementLogger::wrap(capture.clone(), "Greet");
        logger.log(LogLevel::Info, None, "start");
        logger.log(LogLevel::Debug, Some("Inner"), "nested");

        let entries = capture.entries.lock().expect("entries");
        assert_eq!(
            entries[0],
            (LogLevel::Info, Some("Greet".to_string()), "start".to_string())
        );
        // an explicit element name wins over the bound one
        assert_eq!(
            entries[1],
            (LogLevel::Debug, Some("Inner".to_string()), "nested".to_string())
        );
    }

    #[test]
    fn test_get_context_returns_default_when_unbound() {
        let key = ContextKey::new("temperature", 0.7f64);
        let ctx = RenderContext::new();
        assert_eq!(*ctx.get_context(&key), 0.7);
    }

    #[test]
    fn test_push_context_derives_without_mutating_parent() {
        let key = ContextKey::new("model", "base".to_string());
        let root = RenderContext::new();
        let derived = root.push_context(&key, "override".to_string());

        assert_eq!(*root.get_context(&key), "base");
        assert_eq!(*derived.get_context(&key), "override");
        assert_ne!(root.id(), derived.id());
    }

    #[test]
    fn test_initial_bindings_sit_below_overrides() {
        let key = ContextKey::new("model", "default".to_string());
        let ctx = RenderContext::with_options(
            RenderContextOptions::new().with_initial(&key, "initial".to_string()),
        );
        assert_eq!(*ctx.get_context(&key), "initial");

        let overridden = ctx.push_context(&key, "inner".to_string());
        assert_eq!(*overridden.get_context(&key), "inner");
        assert_eq!(*ctx.get_context(&key), "initial");
    }

    #[test]
    fn test_provider_element_carries_binding() {
        let key = ContextKey::new("model", "base".to_string());
        let element = key.provider("scoped".to_string(), Node::from("child"));
        match element.tag() {
            Tag::Provider(binding) => assert_eq!(binding.key_name(), "model"),
            other => panic!("expected provider tag, got {:?}", other),
        }
    }

    #[test]
    fn test_distinct_keys_with_same_name_do_not_collide() {
        let a = ContextKey::new("k", 1u32);
        let b = ContextKey::new("k", 2u32);
        let ctx = RenderContext::new().push_context(&a, 10u32);
        assert_eq!(*ctx.get_context(&a), 10);
        assert_eq!(*ctx.get_context(&b), 2);
    }
}
