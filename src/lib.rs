//! # Weft
//!
//! Declarative composition runtime for LLM applications.
//!
//! Weft renders a tree of components - synchronous, asynchronous, or lazy
//! incremental producers - into a monotonic stream of text frames converging
//! on a final string. This crate contains:
//! - Node / Element tree model and composition rules
//! - Streaming renderer with stop predicates and append-only streams
//! - Scoped context propagation (providers, loggers, cancellation)
//! - Per-context memoization so non-idempotent subtrees are observed safely
//! - Structured error taxonomy with stable codes
//!
//! This crate does NOT care about:
//! - Which model vendor a component talks to
//! - Tool-use strategies or prompt construction
//! - How the rendered text is displayed or persisted

pub mod context;
pub mod error;
pub mod memo;
pub mod node;
pub mod render;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::context::{
        ContextKey, ElementLogger, LogLevel, Logger, NoopLogger, RenderContext,
        RenderContextOptions, TracingLogger,
    };
    pub use crate::error::{ErrorCode, ErrorKind, RenderError, RenderResult};
    pub use crate::memo::memoize;
    pub use crate::node::{
        debug_tree, Component, Element, Eventual, FnComponent, IndirectNode, Node, Producer,
        Props, Tag, APPEND_ONLY,
    };
    pub use crate::render::{
        Frame, FrameStream, RenderOptions, RenderStream, Segment, StopPredicate,
    };
}

// Re-export key types at crate root
pub use context::{ContextKey, Logger, RenderContext, RenderContextOptions};
pub use error::{ErrorCode, ErrorKind, RenderError, RenderResult};
pub use memo::memoize;
pub use node::{Component, Element, FnComponent, Node, Props, Tag, APPEND_ONLY};
pub use render::{Frame, RenderOptions, RenderStream, Segment};
