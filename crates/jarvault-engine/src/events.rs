//! Host boundary.
//!
//! The engine never talks to the host directly; everything outbound goes
//! through [`HostHooks`], and runtime exceptions arrive as plain
//! [`ExceptionTrace`] values.

use async_trait::async_trait;
use jarvault_core::model::{BundleStatus, Jar, JarId, RequestedVersion};

/// Callbacks into the embedding host.
///
/// Implementations must be cheap and non-blocking; the engine invokes them
/// from its own tasks.
#[async_trait]
pub trait HostHooks: Send + Sync {
    /// Debounced "drop your cached view" notification. Fired once per burst
    /// of state changes, after the quiet period elapses.
    async fn invalidate_caches(&self);

    /// Per-(bundle, requested version) status transition for display.
    fn status_changed(&self, bundle: &str, requested: &RequestedVersion, status: BundleStatus);

    /// A newly materialized jar, to be picked up by class indexing and any
    /// host-side bookkeeping.
    fn jar_discovered(&self, id: &JarId, jar: &Jar);
}

/// A host that ignores every signal. Useful as a default and in tests.
#[derive(Debug, Default)]
pub struct NullHooks;

#[async_trait]
impl HostHooks for NullHooks {
    async fn invalidate_caches(&self) {}

    fn status_changed(&self, _bundle: &str, _requested: &RequestedVersion, _status: BundleStatus) {}

    fn jar_discovered(&self, _id: &JarId, _jar: &Jar) {}
}

/// One frame of a captured runtime exception.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackFrame {
    /// Fully-qualified name of the declaring class, e.g.
    /// `org.example.plugin.cli.Analyzer`.
    pub declaring_class: String,
}

impl StackFrame {
    pub fn new(declaring_class: impl Into<String>) -> Self {
        Self {
            declaring_class: declaring_class.into(),
        }
    }
}

/// A captured runtime exception with its (optional) cause chain.
#[derive(Debug, Clone, Default)]
pub struct ExceptionTrace {
    pub frames: Vec<StackFrame>,
    pub cause: Option<Box<ExceptionTrace>>,
}

impl ExceptionTrace {
    pub fn new(frames: Vec<StackFrame>) -> Self {
        Self {
            frames,
            cause: None,
        }
    }

    pub fn with_cause(mut self, cause: ExceptionTrace) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }
}
