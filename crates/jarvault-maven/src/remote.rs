//! Remote repository client.

use crate::layout;
use crate::metadata;
use jarvault_core::error::Result;
use jarvault_core::fetch::HttpFetcher;
use jarvault_core::model::{ArtifactCoordinate, Repository};
use std::path::Path;
use std::sync::Arc;

/// Client for one configured remote repository.
///
/// All methods distinguish "definitively absent" (`Ok(None)`) from
/// transient failure (`Err`): the resolver maps the former to `NotFound`
/// and the latter to `FailedToFetch`.
pub struct RemoteRepository {
    pub name: String,
    base: String,
    fetcher: Arc<HttpFetcher>,
}

impl RemoteRepository {
    pub fn new(repository: &Repository, fetcher: Arc<HttpFetcher>) -> Self {
        Self {
            name: repository.name.clone(),
            base: repository.location.trim_end_matches('/').to_string(),
            fetcher,
        }
    }

    /// Fetches the version manifest for a coordinate. `Ok(None)` when the
    /// repository has no metadata document for it.
    pub async fn fetch_versions(
        &self,
        coordinate: &ArtifactCoordinate,
    ) -> Result<Option<Vec<String>>> {
        let url = layout::metadata_url(&self.base, coordinate);
        match self.fetcher.get_text(&url).await? {
            Some(document) => Ok(Some(metadata::parse_versions(&document)?)),
            None => Ok(None),
        }
    }

    /// Fetches the published checksum for an artifact, if any.
    pub async fn fetch_checksum(
        &self,
        coordinate: &ArtifactCoordinate,
        full_version: &str,
        classifier: Option<&str>,
    ) -> Result<Option<String>> {
        let url = format!(
            "{}.{}",
            layout::artifact_url(&self.base, coordinate, full_version, classifier),
            layout::CHECKSUM_SUFFIX
        );
        Ok(self
            .fetcher
            .get_text(&url)
            .await?
            .map(|text| text.trim().to_lowercase()))
    }

    /// Downloads an artifact to `dest`. `Ok(None)` when the artifact (for
    /// the given classifier) does not exist.
    pub async fn download_artifact(
        &self,
        coordinate: &ArtifactCoordinate,
        full_version: &str,
        classifier: Option<&str>,
        dest: &Path,
    ) -> Result<Option<u64>> {
        let url = layout::artifact_url(&self.base, coordinate, full_version, classifier);
        self.fetcher.download(&url, dest).await
    }
}
