//! Core abstractions for jarvault.
//!
//! This crate provides the pieces shared by the repository clients and the
//! resolution engine:
//!
//! - **Data model**: repositories, coordinates, bundle descriptors, the
//!   requested/resolved version split, artifact identity and state.
//! - **Version matching**: runtime-prefix stripping and policy-driven
//!   selection of one version valid for a whole bundle.
//! - **Naming overrides**: template-to-regex compilation for non-standard
//!   local build layouts.
//! - **Fetch layer**: the shared HTTP client with 404/transient-error
//!   separation.
//! - **Checksums**: SHA-256 helpers gating disk cache reuse.

pub mod checksum;
pub mod error;
pub mod fetch;
pub mod model;
pub mod naming;
pub mod version;

pub use checksum::{sha256_bytes, sha256_file};
pub use error::{BundleError, Result};
pub use fetch::HttpFetcher;
pub use model::{
    ArtifactCoordinate, ArtifactState, BundleDescriptor, BundleStatus, CachedArtifact, Jar, JarId,
    MatchPolicy, NamingOverride, Repository, RepositoryKind, RequestedVersion, ResolvedVersion,
    RuntimeVersion,
};
pub use naming::{CompiledNaming, DetectedVersions, NamingCompiler};
pub use version::{VersionFilter, select_bundle_version, strip_runtime_prefix};
