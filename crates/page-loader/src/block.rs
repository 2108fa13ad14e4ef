//! Block loading state machine.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::document::{build_block, Block, BlockStatus, Document, Main};
use crate::plugin::{PageContext, PluginHost};
use crate::plugins::decorator::decorate_block;
use crate::resolver::{resolve_block_config, BlockConfig};
use crate::resources::{ModuleLoader, StyleLoader};
use crate::sections::update_sections_status;

/// Drives blocks from initialized to loaded. Each block's style and script
/// are requested at most once; failures are logged and the block still ends
/// up loaded.
pub struct BlockLoader {
    host: Arc<PluginHost>,
    page: Arc<PageContext>,
    styles: StyleLoader,
    modules: Arc<dyn ModuleLoader>,
}

impl BlockLoader {
    pub fn new(host: Arc<PluginHost>, page: Arc<PageContext>, modules: Arc<dyn ModuleLoader>) -> Self {
        Self {
            host,
            page,
            styles: StyleLoader::new(),
            modules,
        }
    }

    pub fn styles(&self) -> &StyleLoader {
        &self.styles
    }

    pub fn config_for(&self, block: &Block) -> BlockConfig {
        resolve_block_config(block.name(), &self.host, &self.page)
    }

    pub async fn load_block(&self, block: &Arc<Block>) {
        if !block.begin_loading() {
            debug!(block = %block.name(), status = %block.status(), "block already claimed");
            return;
        }
        let config = self.config_for(block);
        let page = self.page.as_ref();

        let css = async {
            if let Err(err) = self.styles.load_css(&config.css_path, page).await {
                warn!(block = %config.block_name, error = %err, "failed to load block styles");
            }
        };
        let script = async {
            match self.modules.import(&config.js_path).await {
                Ok(module) => {
                    if let Some(default) = module.default {
                        if let Err(err) = default.decorate(block, page).await {
                            warn!(block = %config.block_name, error = %err, "block decoration failed");
                        }
                    }
                }
                Err(err) => {
                    warn!(block = %config.block_name, error = %err, "failed to load module for block");
                }
            }
        };
        tokio::join!(css, script);

        block.set_status(BlockStatus::Loaded);
        debug!(block = %config.block_name, "block loaded");
    }

    /// Loads every decorated block in document order, one at a time,
    /// refreshing section status before the first and after each block.
    pub async fn load_blocks(&self, main: &Main) {
        update_sections_status(main);
        for block in main.blocks() {
            self.load_block(&block).await;
            update_sections_status(main);
        }
    }

    pub async fn load_header(&self, document: &Document) -> Arc<Block> {
        let block = build_block("header", Vec::new());
        document.set_header(Arc::clone(&block));
        decorate_block(&block, None);
        self.load_block(&block).await;
        block
    }

    pub async fn load_footer(&self, document: &Document) -> Arc<Block> {
        let block = build_block("footer", Vec::new());
        document.set_footer(Arc::clone(&block));
        decorate_block(&block, None);
        self.load_block(&block).await;
        block
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use pagekit_core_types::StaticFetcher;
    use url::Url;

    use super::*;
    use crate::errors::{LoaderError, LoaderResult};
    use crate::resources::{BlockDecorator, ModuleRegistry};

    #[derive(Default)]
    struct Counting(AtomicUsize);

    #[async_trait]
    impl BlockDecorator for Counting {
        async fn decorate(&self, block: &Arc<Block>, _page: &PageContext) -> LoaderResult<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            block.add_class("decorated");
            Ok(())
        }
    }

    struct Broken;

    #[async_trait]
    impl BlockDecorator for Broken {
        async fn decorate(&self, _block: &Arc<Block>, _page: &PageContext) -> LoaderResult<()> {
            Err(LoaderError::plugin("boom"))
        }
    }

    fn loader(fetcher: Arc<StaticFetcher>, registry: Arc<ModuleRegistry>) -> BlockLoader {
        let page = PageContext::new(Url::parse("https://example.com/").unwrap(), "", fetcher);
        BlockLoader::new(Arc::new(PluginHost::new()), Arc::new(page), registry)
    }

    #[tokio::test]
    async fn load_block_is_idempotent() {
        let fetcher = Arc::new(
            StaticFetcher::new().with("https://example.com/blocks/hero/hero.css", ".hero{}"),
        );
        let registry = Arc::new(ModuleRegistry::new());
        let counting = Arc::new(Counting::default());
        registry.register_block("hero", counting.clone());
        let loader = loader(fetcher.clone(), registry);

        let block = build_block("hero", Vec::new());
        decorate_block(&block, None);
        tokio::join!(loader.load_block(&block), loader.load_block(&block));
        loader.load_block(&block).await;

        assert_eq!(block.status(), BlockStatus::Loaded);
        assert_eq!(counting.0.load(Ordering::SeqCst), 1);
        assert_eq!(
            fetcher.request_count("https://example.com/blocks/hero/hero.css"),
            1
        );
        assert!(block.has_class("decorated"));
    }

    #[tokio::test]
    async fn failures_still_mark_block_loaded() {
        let registry = Arc::new(ModuleRegistry::new());
        registry.register_block("broken", Arc::new(Broken));
        let loader = loader(Arc::new(StaticFetcher::new()), registry);

        let broken = build_block("broken", Vec::new());
        let missing = build_block("missing", Vec::new());
        loader.load_block(&broken).await;
        loader.load_block(&missing).await;
        assert_eq!(broken.status(), BlockStatus::Loaded);
        assert_eq!(missing.status(), BlockStatus::Loaded);
    }

    #[tokio::test]
    async fn header_and_footer_fill_their_slots() {
        let registry = Arc::new(ModuleRegistry::new());
        let header_code = Arc::new(Counting::default());
        registry.register_block("header", header_code.clone());
        let loader = loader(Arc::new(StaticFetcher::new()), registry);
        let doc = Document::builder(Url::parse("https://example.com/").unwrap()).build();

        loader.load_header(&doc).await;
        loader.load_footer(&doc).await;
        assert_eq!(doc.header().unwrap().status(), BlockStatus::Loaded);
        assert_eq!(doc.footer().unwrap().name(), "footer");
        assert_eq!(header_code.0.load(Ordering::SeqCst), 1);
    }
}
