//! Style and script collaborators used by the block loader.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use pagekit_core_types::{Fetcher, PageError};
use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::document::Block;
use crate::errors::{LoaderError, LoaderResult};
use crate::plugin::PageContext;

/// Adds each stylesheet to the page at most once.
#[derive(Default)]
pub struct StyleLoader {
    links: Mutex<Vec<String>>,
}

impl StyleLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetches `href` unless it is already linked. A failed fetch is reported
    /// as an error; the link stays in place either way.
    pub async fn load_css(&self, href: &str, page: &PageContext) -> LoaderResult<()> {
        {
            let mut links = self.links.lock();
            if links.iter().any(|l| l == href) {
                return Ok(());
            }
            links.push(href.to_string());
        }
        let url = page.absolute_url(href);
        let response = page.fetcher().fetch(&url).await?;
        if !response.ok() {
            return Err(PageError::fetch(url, format!("status {}", response.status)).into());
        }
        debug!(href, "stylesheet loaded");
        Ok(())
    }

    pub fn stylesheets(&self) -> Vec<String> {
        self.links.lock().clone()
    }
}

/// The default export of a block script.
#[async_trait]
pub trait BlockDecorator: Send + Sync {
    async fn decorate(&self, block: &Arc<Block>, page: &PageContext) -> LoaderResult<()>;
}

#[derive(Clone, Default)]
pub struct BlockModule {
    pub default: Option<Arc<dyn BlockDecorator>>,
}

#[async_trait]
pub trait ModuleLoader: Send + Sync {
    async fn import(&self, path: &str) -> LoaderResult<BlockModule>;
}

#[async_trait]
impl<M> ModuleLoader for Arc<M>
where
    M: ModuleLoader + ?Sized,
{
    async fn import(&self, path: &str) -> LoaderResult<BlockModule> {
        (**self).import(path).await
    }
}

/// Block scripts compiled into the host. A path resolves to the decorator
/// registered for that exact path, then to the one registered for the file
/// stem (`/blocks/hero/hero.js` -> `hero`). Other paths are looked up through
/// the fetcher when one is configured: a script that exists but has no native
/// implementation imports as a module without a default export.
#[derive(Default)]
pub struct ModuleRegistry {
    by_path: RwLock<HashMap<String, Arc<dyn BlockDecorator>>>,
    by_block: RwLock<HashMap<String, Arc<dyn BlockDecorator>>>,
    fetcher: Option<Arc<dyn Fetcher>>,
    base: Option<url::Url>,
    imports: Mutex<Vec<String>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up unknown scripts over `fetcher`, resolving relative paths
    /// against `base`.
    pub fn with_fetcher(mut self, fetcher: Arc<dyn Fetcher>, base: url::Url) -> Self {
        self.fetcher = Some(fetcher);
        self.base = Some(base);
        self
    }

    pub fn register_block(&self, block_name: &str, decorator: Arc<dyn BlockDecorator>) {
        self.by_block
            .write()
            .insert(block_name.to_string(), decorator);
    }

    pub fn register_path(&self, path: &str, decorator: Arc<dyn BlockDecorator>) {
        self.by_path.write().insert(path.to_string(), decorator);
    }

    /// Every path passed to `import`, in call order.
    pub fn imports(&self) -> Vec<String> {
        self.imports.lock().clone()
    }

    fn native(&self, path: &str) -> Option<Arc<dyn BlockDecorator>> {
        if let Some(found) = self.by_path.read().get(path) {
            return Some(Arc::clone(found));
        }
        let stem = Path::new(path.split(['?', '#']).next().unwrap_or(path))
            .file_stem()
            .and_then(|s| s.to_str())?;
        self.by_block.read().get(stem).cloned()
    }
}

#[async_trait]
impl ModuleLoader for ModuleRegistry {
    async fn import(&self, path: &str) -> LoaderResult<BlockModule> {
        self.imports.lock().push(path.to_string());
        if let Some(default) = self.native(path) {
            return Ok(BlockModule {
                default: Some(default),
            });
        }
        let Some(fetcher) = &self.fetcher else {
            return Err(LoaderError::ModuleNotFound(path.to_string()));
        };
        let url = match &self.base {
            Some(base) => base
                .join(path)
                .map(|u| u.to_string())
                .unwrap_or_else(|_| path.to_string()),
            None => path.to_string(),
        };
        let response = fetcher.fetch(&url).await?;
        if response.ok() {
            Ok(BlockModule::default())
        } else {
            Err(LoaderError::ModuleNotFound(path.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use pagekit_core_types::StaticFetcher;
    use url::Url;

    use super::*;

    struct Noop;

    #[async_trait]
    impl BlockDecorator for Noop {
        async fn decorate(&self, _block: &Arc<Block>, _page: &PageContext) -> LoaderResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn css_is_fetched_once_per_href() {
        let fetcher = Arc::new(StaticFetcher::new().with("https://example.com/a.css", "body{}"));
        let page = PageContext::new(
            Url::parse("https://example.com/").unwrap(),
            "",
            fetcher.clone(),
        );
        let styles = StyleLoader::new();
        styles.load_css("/a.css", &page).await.unwrap();
        styles.load_css("/a.css", &page).await.unwrap();
        assert_eq!(fetcher.request_count("https://example.com/a.css"), 1);
        assert!(styles.load_css("/missing.css", &page).await.is_err());
        assert_eq!(styles.stylesheets().len(), 2);
    }

    #[tokio::test]
    async fn registry_prefers_exact_path_then_stem() {
        let registry = ModuleRegistry::new();
        registry.register_block("hero", Arc::new(Noop));
        assert!(registry
            .import("/blocks/hero/hero.js")
            .await
            .unwrap()
            .default
            .is_some());
        assert!(matches!(
            registry.import("/blocks/cards/cards.js").await,
            Err(LoaderError::ModuleNotFound(_))
        ));
    }

    #[tokio::test]
    async fn fetched_script_without_native_code_has_no_default() {
        let fetcher = Arc::new(StaticFetcher::new().with("https://example.com/blocks/x/x.js", ""));
        let registry = ModuleRegistry::new()
            .with_fetcher(fetcher, Url::parse("https://example.com/").unwrap());
        let module = registry.import("/blocks/x/x.js").await.unwrap();
        assert!(module.default.is_none());
        assert!(registry.import("/blocks/y/y.js").await.is_err());
    }
}
