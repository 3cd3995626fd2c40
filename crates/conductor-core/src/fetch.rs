//! Source-control access for build configuration files.

use async_trait::async_trait;

use crate::{RepositorySlug, Result};

/// Fetches the raw build configuration of a repository at a ref.
#[async_trait]
pub trait ConfigFetcher: Send + Sync {
    /// Raw bytes of the configuration file at `git_ref` (a sha or branch).
    ///
    /// Transport failures and missing files are [`crate::Error::Fetch`] /
    /// [`crate::Error::NotFound`]; they are fatal for the caller.
    async fn fetch_config(&self, slug: &RepositorySlug, git_ref: &str) -> Result<Vec<u8>>;
}
