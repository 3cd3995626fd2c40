//! Configuration fetch, decode and validation.

use conductor_config::{CiConfig, ConfigResult, parse_ci_config};
use conductor_core::fetch::ConfigFetcher;
use conductor_core::{Error, RepositorySlug, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::debug;

type CacheKey = (RepositorySlug, String);

/// Resolves the build configuration of a repository at a ref.
///
/// Raw text may be reused for `ttl`; parsing and validation run on every call.
pub struct ConfigResolver {
    fetcher: Arc<dyn ConfigFetcher>,
    ttl: Duration,
    cache: Mutex<HashMap<CacheKey, (Instant, String)>>,
}

impl ConfigResolver {
    pub fn new(fetcher: Arc<dyn ConfigFetcher>, ttl: Duration) -> Self {
        Self {
            fetcher,
            ttl,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve the configuration at `git_ref`.
    ///
    /// The outer error is fatal (fetch or decode failure). The inner result
    /// carries validation failures, which callers report rather than raise.
    pub async fn resolve(
        &self,
        slug: &RepositorySlug,
        git_ref: &str,
    ) -> Result<ConfigResult<CiConfig>> {
        let text = self.fetch_text(slug, git_ref).await?;
        Ok(parse_ci_config(&text))
    }

    async fn fetch_text(&self, slug: &RepositorySlug, git_ref: &str) -> Result<String> {
        let key = (slug.clone(), git_ref.to_string());
        if let Some(text) = self.cached(&key) {
            debug!(repo = %slug, git_ref, "Using cached configuration");
            return Ok(text);
        }

        let bytes = self.fetcher.fetch_config(slug, git_ref).await?;
        let text = String::from_utf8(bytes).map_err(|e| {
            Error::Decode(format!(
                "configuration of {} at {} is not valid UTF-8: {}",
                slug, git_ref, e
            ))
        })?;

        if !self.ttl.is_zero() {
            if let Ok(mut cache) = self.cache.lock() {
                cache.retain(|_, (at, _)| at.elapsed() < self.ttl);
                cache.insert(key, (Instant::now(), text.clone()));
            }
        }

        Ok(text)
    }

    fn cached(&self, key: &CacheKey) -> Option<String> {
        if self.ttl.is_zero() {
            return None;
        }
        let cache = self.cache.lock().ok()?;
        cache
            .get(key)
            .filter(|(at, _)| at.elapsed() < self.ttl)
            .map(|(_, text)| text.clone())
    }
}
