//! Resolution cache, filesystem monitoring and orchestration.
//!
//! The entry point is [`BundleVault`]: construct it from a
//! [`config::VaultConfig`] and a [`events::HostHooks`] implementation, call
//! [`BundleVault::start`] to bring up watching and periodic actualization,
//! then feed it host lookups via [`BundleVault::request_artifact`] and
//! runtime exceptions via [`BundleVault::report_exception`].

pub mod attribution;
pub mod config;
pub mod debounce;
pub mod events;
pub mod jar;
pub mod jobs;
pub mod monitor;
pub mod orchestrator;
pub mod store;

pub use attribution::ExceptionAttributor;
pub use config::{BundleConfig, VaultConfig, VaultSettings};
pub use events::{ExceptionTrace, HostHooks, NullHooks, StackFrame};
pub use monitor::{ChangeEvent, FsMonitor, RootKind, SelfUpdateGuard};
pub use orchestrator::BundleVault;
pub use store::StateStore;
