//! Plugin trait, registration host and the shared page context.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use pagekit_core_types::Fetcher;
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};
use url::Url;

use crate::block::BlockLoader;
use crate::document::{ContentDecoder, Document};
use crate::errors::LoaderResult;
use crate::resolver::BlockConfig;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Eager,
    Lazy,
    Delayed,
}

impl Phase {
    pub const ALL: [Phase; 3] = [Phase::Eager, Phase::Lazy, Phase::Delayed];

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Eager => "eager",
            Phase::Lazy => "lazy",
            Phase::Delayed => "delayed",
        }
    }

    pub fn pre(self) -> Hook {
        match self {
            Phase::Eager => Hook::PreEager,
            Phase::Lazy => Hook::PreLazy,
            Phase::Delayed => Hook::PreDelayed,
        }
    }

    pub fn post(self) -> Hook {
        match self {
            Phase::Eager => Hook::PostEager,
            Phase::Lazy => Hook::PostLazy,
            Phase::Delayed => Hook::PostDelayed,
        }
    }

    /// Name of the caller-supplied hook running between pre and post.
    pub fn load_hook_name(self) -> &'static str {
        match self {
            Phase::Eager => "loadEager",
            Phase::Lazy => "loadLazy",
            Phase::Delayed => "loadDelayed",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum Hook {
    #[serde(rename = "preEager")]
    PreEager,
    #[serde(rename = "postEager")]
    PostEager,
    #[serde(rename = "preLazy")]
    PreLazy,
    #[serde(rename = "postLazy")]
    PostLazy,
    #[serde(rename = "preDelayed")]
    PreDelayed,
    #[serde(rename = "postDelayed")]
    PostDelayed,
}

impl Hook {
    pub fn as_str(self) -> &'static str {
        match self {
            Hook::PreEager => "preEager",
            Hook::PostEager => "postEager",
            Hook::PreLazy => "preLazy",
            Hook::PostLazy => "postLazy",
            Hook::PreDelayed => "preDelayed",
            Hook::PostDelayed => "postDelayed",
        }
    }

    fn bit(self) -> u8 {
        match self {
            Hook::PreEager => 1,
            Hook::PostEager => 1 << 1,
            Hook::PreLazy => 1 << 2,
            Hook::PostLazy => 1 << 3,
            Hook::PreDelayed => 1 << 4,
            Hook::PostDelayed => 1 << 5,
        }
    }
}

impl fmt::Display for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The lifecycle hooks a plugin implements. The orchestrator only calls
/// hooks present in the set.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HookSet(u8);

impl HookSet {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub fn of(hooks: &[Hook]) -> Self {
        hooks.iter().fold(Self::empty(), |set, hook| set.with(*hook))
    }

    pub fn with(self, hook: Hook) -> Self {
        Self(self.0 | hook.bit())
    }

    pub fn contains(self, hook: Hook) -> bool {
        self.0 & hook.bit() != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

/// Options bag handed to plugin hooks.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct PluginOptions(Map<String, Value>);

impl PluginOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.0.get(key).and_then(Value::as_bool)
    }

    pub fn base_path(&self) -> Option<&str> {
        self.get_str("basePath")
    }

    /// Returns `base` with every key of `self` laid over it.
    pub fn merged_over(&self, base: &PluginOptions) -> PluginOptions {
        let mut merged = base.0.clone();
        for (key, value) in &self.0 {
            merged.insert(key.clone(), value.clone());
        }
        PluginOptions(merged)
    }

    pub fn extend(&mut self, other: PluginOptions) {
        self.0.extend(other.0);
    }
}

impl From<Map<String, Value>> for PluginOptions {
    fn from(value: Map<String, Value>) -> Self {
        Self(value)
    }
}

pub type PluginApi = Arc<dyn Any + Send + Sync>;

/// Page-wide state shared by plugins, the block loader and the resolver.
/// Owned by the page loader and borrowed by everything else.
pub struct PageContext {
    page_url: Url,
    code_base_path: String,
    fetcher: Arc<dyn Fetcher>,
    content_decoder: Option<Arc<dyn ContentDecoder>>,
    apis: RwLock<HashMap<String, PluginApi>>,
    extensions: RwLock<HashMap<TypeId, Box<dyn Any + Send + Sync>>>,
}

impl PageContext {
    pub fn new(page_url: Url, code_base_path: impl Into<String>, fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            page_url,
            code_base_path: code_base_path.into(),
            fetcher,
            content_decoder: None,
            apis: RwLock::new(HashMap::new()),
            extensions: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_content_decoder(mut self, decoder: Arc<dyn ContentDecoder>) -> Self {
        self.content_decoder = Some(decoder);
        self
    }

    pub fn page_url(&self) -> &Url {
        &self.page_url
    }

    /// Scheme, host and port of the page, without a trailing slash.
    pub fn origin(&self) -> String {
        self.page_url.origin().ascii_serialization()
    }

    pub fn code_base_path(&self) -> &str {
        &self.code_base_path
    }

    pub fn fetcher(&self) -> &Arc<dyn Fetcher> {
        &self.fetcher
    }

    /// Decoder for content fetched in place of the page's own main.
    pub fn content_decoder(&self) -> Option<&Arc<dyn ContentDecoder>> {
        self.content_decoder.as_ref()
    }

    /// Resolves a site path against the page origin. Absolute URLs pass
    /// through.
    pub fn absolute_url(&self, path: &str) -> String {
        match self.page_url.join(path) {
            Ok(url) => url.to_string(),
            Err(_) => path.to_string(),
        }
    }

    pub fn publish_api(&self, name: &str, api: PluginApi) {
        self.apis.write().insert(name.to_string(), api);
    }

    /// Typed view of the API published under `name`.
    pub fn api<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        let api = self.apis.read().get(name).cloned()?;
        api.downcast::<T>().ok()
    }

    pub fn api_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.apis.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn set_extension<T: Send + Sync + 'static>(&self, value: T) {
        self.extensions
            .write()
            .insert(TypeId::of::<T>(), Box::new(value));
    }

    pub fn extension<T: Clone + Send + Sync + 'static>(&self) -> Option<T> {
        self.extensions
            .read()
            .get(&TypeId::of::<T>())
            .and_then(|boxed| boxed.downcast_ref::<T>())
            .cloned()
    }
}

impl fmt::Debug for PageContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageContext")
            .field("page_url", &self.page_url.as_str())
            .field("code_base_path", &self.code_base_path)
            .field("apis", &self.api_names())
            .finish()
    }
}

/// What a hook sees while it runs.
pub struct HookCtx<'a> {
    pub document: &'a Arc<Document>,
    pub page: &'a PageContext,
    pub blocks: &'a BlockLoader,
    pub options: PluginOptions,
}

#[async_trait]
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    /// Hooks the orchestrator will call. An overridden hook method that is
    /// missing from this set never runs, so both must be kept in step.
    fn hooks(&self) -> HookSet {
        HookSet::empty()
    }

    async fn pre_eager(&self, _ctx: &HookCtx<'_>) -> LoaderResult<()> {
        Ok(())
    }

    async fn post_eager(&self, _ctx: &HookCtx<'_>) -> LoaderResult<()> {
        Ok(())
    }

    async fn pre_lazy(&self, _ctx: &HookCtx<'_>) -> LoaderResult<()> {
        Ok(())
    }

    async fn post_lazy(&self, _ctx: &HookCtx<'_>) -> LoaderResult<()> {
        Ok(())
    }

    async fn pre_delayed(&self, _ctx: &HookCtx<'_>) -> LoaderResult<()> {
        Ok(())
    }

    async fn post_delayed(&self, _ctx: &HookCtx<'_>) -> LoaderResult<()> {
        Ok(())
    }

    fn patches_block_config(&self) -> bool {
        false
    }

    fn patch_block_config(&self, config: BlockConfig, _page: &PageContext) -> BlockConfig {
        config
    }

    fn api(&self) -> Option<PluginApi> {
        None
    }
}

pub(crate) async fn dispatch(plugin: &dyn Plugin, hook: Hook, ctx: &HookCtx<'_>) -> LoaderResult<()> {
    match hook {
        Hook::PreEager => plugin.pre_eager(ctx).await,
        Hook::PostEager => plugin.post_eager(ctx).await,
        Hook::PreLazy => plugin.pre_lazy(ctx).await,
        Hook::PostLazy => plugin.post_lazy(ctx).await,
        Hook::PreDelayed => plugin.pre_delayed(ctx).await,
        Hook::PostDelayed => plugin.post_delayed(ctx).await,
    }
}

pub type PluginCondition = Arc<dyn Fn(&Document, &PageContext) -> bool + Send + Sync>;

/// Registration-time options for [`PluginHost::with_plugin`].
#[derive(Clone, Default)]
pub struct Registration {
    pub options: PluginOptions,
    pub condition: Option<PluginCondition>,
}

impl Registration {
    pub fn new(options: PluginOptions) -> Self {
        Self {
            options,
            condition: None,
        }
    }

    pub fn when<F>(mut self, condition: F) -> Self
    where
        F: Fn(&Document, &PageContext) -> bool + Send + Sync + 'static,
    {
        self.condition = Some(Arc::new(condition));
        self
    }
}

#[derive(Clone)]
pub struct RegisteredPlugin {
    pub plugin: Arc<dyn Plugin>,
    pub options: PluginOptions,
}

impl fmt::Debug for RegisteredPlugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredPlugin")
            .field("name", &self.plugin.name())
            .field("options", &self.options)
            .finish()
    }
}

/// Plugins in registration order.
#[derive(Default)]
pub struct PluginHost {
    plugins: RwLock<Vec<RegisteredPlugin>>,
}

impl PluginHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `plugin` unless its condition rejects the page. Returns the
    /// plugin API when one is exposed.
    pub fn with_plugin(
        &self,
        plugin: Arc<dyn Plugin>,
        registration: Registration,
        document: &Document,
        page: &PageContext,
    ) -> Option<PluginApi> {
        let name = plugin.name().to_string();
        if let Some(condition) = &registration.condition {
            if !condition(document, page) {
                debug!(plugin = %name, "plugin condition not met, skipping");
                return None;
            }
        }

        let api = plugin.api();
        if plugin.hooks().is_empty() && !plugin.patches_block_config() && api.is_none() {
            warn!(plugin = %name, "plugin declares no hooks and will never run");
        }

        let mut options = registration.options;
        options.insert("basePath", format!("{}/scripts/", page.code_base_path()));

        let entry = RegisteredPlugin {
            plugin,
            options,
        };
        {
            let mut plugins = self.plugins.write();
            match plugins.iter_mut().find(|p| p.plugin.name() == name) {
                Some(existing) => *existing = entry,
                None => plugins.push(entry),
            }
        }
        if let Some(api) = &api {
            page.publish_api(&name, Arc::clone(api));
        }
        debug!(plugin = %name, "plugin registered");
        api
    }

    /// Merges `options` into the stored options of `name`.
    pub fn set_plugin_options(&self, name: &str, options: PluginOptions) -> LoaderResult<()> {
        let mut plugins = self.plugins.write();
        let entry = plugins
            .iter_mut()
            .find(|p| p.plugin.name() == name)
            .ok_or_else(|| crate::errors::LoaderError::PluginNotFound(name.to_string()))?;
        entry.options.extend(options);
        Ok(())
    }

    pub fn options(&self, name: &str) -> Option<PluginOptions> {
        self.plugins
            .read()
            .iter()
            .find(|p| p.plugin.name() == name)
            .map(|p| p.options.clone())
    }

    pub fn names(&self) -> Vec<String> {
        self.plugins
            .read()
            .iter()
            .map(|p| p.plugin.name().to_string())
            .collect()
    }

    /// Cloned view so that hooks can run without holding the lock.
    pub fn snapshot(&self) -> Vec<RegisteredPlugin> {
        self.plugins.read().clone()
    }
}
