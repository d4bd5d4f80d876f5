//! Maven-style repository access and bundle resolution.
//!
//! This crate knows how repositories and the local cache are laid out on
//! disk and over HTTP ([`layout`]), talks to remote ([`remote`]) and local
//! ([`local`]) repositories, and drives whole-bundle resolution
//! ([`resolver`]): every coordinate of a bundle materialized at one version
//! from one repository, checksum-validated, or not at all.

pub mod layout;
pub mod local;
pub mod metadata;
pub mod remote;
pub mod resolver;

pub use local::LocalRepository;
pub use remote::RemoteRepository;
pub use resolver::{BundleResolver, BundleResult, LocatorResult, remove_cached_files};
