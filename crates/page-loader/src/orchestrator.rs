//! Phased page load: eager, LCP, blocks, lazy, a pause, delayed.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{info, info_span, warn, Instrument};

use crate::block::BlockLoader;
use crate::document::{BlockStatus, Document, SectionStatus};
use crate::errors::LoaderResult;
use crate::plugin::{
    dispatch, Hook, HookCtx, PageContext, Phase, Plugin, PluginApi, PluginHost, PluginOptions,
    Registration,
};
use crate::resources::ModuleLoader;

pub const DEFAULT_DELAYED_DURATION: Duration = Duration::from_millis(3000);

/// Caller-supplied `load<Phase>` hook.
#[async_trait]
pub trait PhaseHook: Send + Sync {
    async fn run(&self, ctx: &HookCtx<'_>) -> LoaderResult<()>;
}

#[derive(Clone)]
pub struct LoadOptions {
    /// Block names allowed to be loaded as the LCP block.
    pub lcp_blocks: Vec<String>,
    pub delayed_duration: Duration,
    pub load_eager: Option<Arc<dyn PhaseHook>>,
    pub load_lazy: Option<Arc<dyn PhaseHook>>,
    pub load_delayed: Option<Arc<dyn PhaseHook>>,
    /// Call-time options, overlaid by each plugin's own options.
    pub options: PluginOptions,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            lcp_blocks: Vec::new(),
            delayed_duration: DEFAULT_DELAYED_DURATION,
            load_eager: None,
            load_lazy: None,
            load_delayed: None,
            options: PluginOptions::new(),
        }
    }
}

impl LoadOptions {
    fn load_hook(&self, phase: Phase) -> Option<&Arc<dyn PhaseHook>> {
        match phase {
            Phase::Eager => self.load_eager.as_ref(),
            Phase::Lazy => self.load_lazy.as_ref(),
            Phase::Delayed => self.load_delayed.as_ref(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadProgress {
    Idle,
    Eager,
    Lcp,
    Blocks,
    Lazy,
    /// Lazy work is done; only best-effort delayed work remains.
    Ready,
    Delayed,
    Complete,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HookFailure {
    pub phase: Phase,
    pub plugin: String,
    pub hook: String,
    pub message: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct PhaseTiming {
    pub phase: Phase,
    pub elapsed_ms: u64,
}

#[derive(Clone, Debug, Serialize)]
pub struct BlockReport {
    pub name: String,
    pub status: BlockStatus,
    pub css_path: String,
    pub js_path: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct SectionReport {
    pub status: Option<SectionStatus>,
    pub visible: bool,
    pub classes: Vec<String>,
    pub blocks: Vec<BlockReport>,
}

#[derive(Clone, Debug, Serialize)]
pub struct PageLoadReport {
    pub url: String,
    pub body_classes: Vec<String>,
    pub body_visible: bool,
    pub sections: Vec<SectionReport>,
    pub stylesheets: Vec<String>,
    pub failures: Vec<HookFailure>,
    pub timings: Vec<PhaseTiming>,
}

/// Owns the page context and runs the lifecycle over registered plugins.
pub struct PageLoader {
    document: Arc<Document>,
    host: Arc<PluginHost>,
    page: Arc<PageContext>,
    blocks: BlockLoader,
    progress: watch::Sender<LoadProgress>,
    failures: Mutex<Vec<HookFailure>>,
    timings: Mutex<Vec<PhaseTiming>>,
}

impl PageLoader {
    pub fn new(document: Arc<Document>, page: PageContext, modules: Arc<dyn ModuleLoader>) -> Self {
        let host = Arc::new(PluginHost::new());
        let page = Arc::new(page);
        let blocks = BlockLoader::new(Arc::clone(&host), Arc::clone(&page), modules);
        let (progress, _) = watch::channel(LoadProgress::Idle);
        Self {
            document,
            host,
            page,
            blocks,
            progress,
            failures: Mutex::new(Vec::new()),
            timings: Mutex::new(Vec::new()),
        }
    }

    pub fn document(&self) -> &Arc<Document> {
        &self.document
    }

    pub fn page(&self) -> &Arc<PageContext> {
        &self.page
    }

    pub fn host(&self) -> &Arc<PluginHost> {
        &self.host
    }

    pub fn blocks(&self) -> &BlockLoader {
        &self.blocks
    }

    pub fn with_plugin(&self, plugin: Arc<dyn Plugin>, registration: Registration) -> Option<PluginApi> {
        self.host
            .with_plugin(plugin, registration, &self.document, &self.page)
    }

    pub fn set_plugin_options(&self, name: &str, options: PluginOptions) -> LoaderResult<()> {
        self.host.set_plugin_options(name, options)
    }

    pub fn subscribe(&self) -> watch::Receiver<LoadProgress> {
        self.progress.subscribe()
    }

    pub fn failures(&self) -> Vec<HookFailure> {
        self.failures.lock().clone()
    }

    fn advance(&self, progress: LoadProgress) {
        self.progress.send_replace(progress);
    }

    fn hook_ctx(&self, options: PluginOptions) -> HookCtx<'_> {
        HookCtx {
            document: &self.document,
            page: &self.page,
            blocks: &self.blocks,
            options,
        }
    }

    fn record_failure(&self, phase: Phase, plugin: &str, hook: &str, message: String) {
        warn!(phase = %phase, plugin, hook, error = %message, "hook failed");
        self.failures.lock().push(HookFailure {
            phase,
            plugin: plugin.to_string(),
            hook: hook.to_string(),
            message,
        });
    }

    async fn run_plugin_hooks(&self, phase: Phase, hook: Hook, options: &PluginOptions) {
        for entry in self.host.snapshot() {
            if !entry.plugin.hooks().contains(hook) {
                continue;
            }
            let ctx = self.hook_ctx(entry.options.merged_over(options));
            if let Err(err) = dispatch(entry.plugin.as_ref(), hook, &ctx).await {
                self.record_failure(phase, entry.plugin.name(), hook.as_str(), err.to_string());
            }
        }
    }

    /// Runs `pre<Phase>` hooks in registration order, then the caller's
    /// `load<Phase>` hook, then `post<Phase>` hooks. A failing hook is
    /// recorded and does not stop the ones after it.
    pub async fn exec_phase(&self, phase: Phase, opts: &LoadOptions) {
        let started = Instant::now();
        let span = info_span!("phase", phase = phase.as_str());
        async {
            self.run_plugin_hooks(phase, phase.pre(), &opts.options).await;
            if let Some(hook) = opts.load_hook(phase) {
                let ctx = self.hook_ctx(opts.options.clone());
                if let Err(err) = hook.run(&ctx).await {
                    self.record_failure(phase, "page", phase.load_hook_name(), err.to_string());
                }
            }
            self.run_plugin_hooks(phase, phase.post(), &opts.options).await;
        }
        .instrument(span)
        .await;
        self.timings.lock().push(PhaseTiming {
            phase,
            elapsed_ms: started.elapsed().as_millis() as u64,
        });
    }

    /// Loads the first block when it is an LCP block, reveals the body and
    /// waits for the first main image to load or fail.
    pub async fn wait_for_lcp(&self, lcp_blocks: &[String]) {
        let main = self.document.main();
        if let Some(block) = main.first_block() {
            if lcp_blocks.iter().any(|name| name == block.name()) {
                self.blocks.load_block(&block).await;
            }
        }
        self.document.show_body();
        if let Some(image) = main.first_image() {
            if !image.complete() {
                image.set_eager();
                image.settled().await;
            }
        }
    }

    pub async fn load_page(&self, opts: &LoadOptions) -> PageLoadReport {
        info!(url = %self.document.url(), "page load started");
        self.advance(LoadProgress::Eager);
        self.exec_phase(Phase::Eager, opts).await;

        self.advance(LoadProgress::Lcp);
        self.wait_for_lcp(&opts.lcp_blocks).await;

        self.advance(LoadProgress::Blocks);
        self.blocks.load_blocks(self.document.main()).await;

        self.advance(LoadProgress::Lazy);
        self.exec_phase(Phase::Lazy, opts).await;
        self.advance(LoadProgress::Ready);

        tokio::time::sleep(opts.delayed_duration).await;
        self.advance(LoadProgress::Delayed);
        self.exec_phase(Phase::Delayed, opts).await;
        self.advance(LoadProgress::Complete);
        info!(url = %self.document.url(), failures = self.failures.lock().len(), "page load complete");
        self.report()
    }

    pub fn report(&self) -> PageLoadReport {
        let sections = self
            .document
            .main()
            .sections()
            .iter()
            .map(|section| SectionReport {
                status: section.status(),
                visible: section.is_visible(),
                classes: section.classes(),
                blocks: section
                    .blocks()
                    .iter()
                    .map(|block| {
                        let config = self.blocks.config_for(block);
                        BlockReport {
                            name: block.name().to_string(),
                            status: block.status(),
                            css_path: config.css_path,
                            js_path: config.js_path,
                        }
                    })
                    .collect(),
            })
            .collect();
        PageLoadReport {
            url: self.document.url().to_string(),
            body_classes: self.document.body_classes(),
            body_visible: self.document.is_body_visible(),
            sections,
            stylesheets: self.blocks.styles().stylesheets(),
            failures: self.failures(),
            timings: self.timings.lock().clone(),
        }
    }
}
