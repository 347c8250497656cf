//! Process-lifetime cached system prompt.

use replybot_core::error::ProviderError;
use replybot_core::provider::{CacheRef, Provider, ToolDefinition};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Owns one provider-side cache entry from startup until shutdown.
///
/// Shared by every invocation. Provider-side entries expire; an invocation
/// that finds its reference gone calls [`PromptCache::renew`], and the rest
/// pick up the replacement.
pub struct PromptCache {
    provider: Arc<dyn Provider>,
    system_prompt: String,
    tools: Vec<ToolDefinition>,
    current: RwLock<Option<CacheRef>>,
}

impl PromptCache {
    /// Create the cache entry. Returns the error so the caller can decide
    /// whether to run uncached.
    pub async fn create(
        provider: Arc<dyn Provider>,
        system_prompt: &str,
        tools: &[ToolDefinition],
    ) -> Result<Self, ProviderError> {
        let cache = provider.create_cache(system_prompt, tools).await?;
        info!(provider = provider.name(), cache = %cache, "Prompt cache created");
        Ok(Self {
            provider,
            system_prompt: system_prompt.to_string(),
            tools: tools.to_vec(),
            current: RwLock::new(Some(cache)),
        })
    }

    /// The live reference, or `None` once released.
    pub async fn cache_ref(&self) -> Option<CacheRef> {
        self.current.read().await.clone()
    }

    /// Replace `stale` with a freshly created entry.
    ///
    /// Concurrent callers holding the same stale reference share one
    /// re-creation. Returns `Ok(None)` if the cache was released meanwhile.
    pub async fn renew(&self, stale: &CacheRef) -> Result<Option<CacheRef>, ProviderError> {
        let mut current = self.current.write().await;
        match current.as_ref() {
            None => return Ok(None),
            Some(live) if live != stale => return Ok(Some(live.clone())),
            Some(_) => {}
        }
        let fresh = self
            .provider
            .create_cache(&self.system_prompt, &self.tools)
            .await?;
        info!(stale = %stale, cache = %fresh, "Prompt cache re-created");
        *current = Some(fresh.clone());
        Ok(Some(fresh))
    }

    /// Delete the provider-side entry. Failures are logged, not returned.
    pub async fn release(&self) {
        let Some(cache) = self.current.write().await.take() else {
            return;
        };
        match self.provider.delete_cache(&cache).await {
            Ok(()) => info!(cache = %cache, "Prompt cache released"),
            Err(e) => warn!(cache = %cache, error = %e, "Failed to release prompt cache"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::ScriptedProvider;
    use std::sync::atomic::Ordering;

    #[tokio::test]
    async fn create_and_release_once() {
        let provider = Arc::new(ScriptedProvider::outputs(vec![]));
        let cache = PromptCache::create(provider.clone(), "prompt", &[]).await.unwrap();
        assert_eq!(cache.cache_ref().await, Some(CacheRef("cache-0".into())));
        assert_eq!(provider.created_caches.load(Ordering::SeqCst), 1);

        cache.release().await;
        cache.release().await;
        assert_eq!(provider.deleted_caches.load(Ordering::SeqCst), 1);
        assert_eq!(cache.cache_ref().await, None);
    }

    #[tokio::test]
    async fn renew_replaces_the_stale_entry_once() {
        let provider = Arc::new(ScriptedProvider::outputs(vec![]));
        let cache = PromptCache::create(provider.clone(), "prompt", &[]).await.unwrap();
        let stale = CacheRef("cache-0".into());

        let fresh = cache.renew(&stale).await.unwrap();
        assert_eq!(fresh, Some(CacheRef("cache-1".into())));

        // A second holder of the same stale reference gets the replacement.
        let again = cache.renew(&stale).await.unwrap();
        assert_eq!(again, Some(CacheRef("cache-1".into())));
        assert_eq!(provider.created_caches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn renew_after_release_is_a_no_op() {
        let provider = Arc::new(ScriptedProvider::outputs(vec![]));
        let cache = PromptCache::create(provider.clone(), "prompt", &[]).await.unwrap();
        cache.release().await;

        let renewed = cache.renew(&CacheRef("cache-0".into())).await.unwrap();
        assert_eq!(renewed, None);
        assert_eq!(provider.created_caches.load(Ordering::SeqCst), 1);
    }
}
