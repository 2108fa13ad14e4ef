//! The experimentation plugin: decides a variant in the eager phase and
//! patches block paths for it.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use pagekit_core_types::{to_camel_case, to_class_name};
use pagekit_loader::{
    BlockConfig, Document, Hook, HookCtx, HookSet, LoaderResult, PageContext, Plugin, PluginApi,
    PluginOptions,
};
use parking_lot::RwLock;
use regex::Regex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{
    ExperimentConfig, ExperimentConfigLoader, ManifestParser, SheetManifestParser, DEFAULT_BASE_PATH,
    DEFAULT_CONFIG_FILE,
};
use crate::decision::{
    decision_policy_for, DecisionContext, DecisionEngine, RandomizationUnit, DEFAULT_IDENTITY_NAMESPACE,
};
use crate::errors::ExperimentResult;
use crate::patch;

pub const EXPERIMENTATION_PLUGIN: &str = "experimentation";

/// Viewports narrower than this count as mobile.
pub const MOBILE_BREAKPOINT: u32 = 600;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentOptions {
    pub base_path: String,
    pub config_file: String,
    pub meta_tag: String,
    pub query_parameter: String,
    pub randomization_unit: RandomizationUnit,
    pub identity_namespace: String,
}

impl Default for ExperimentOptions {
    fn default() -> Self {
        Self {
            base_path: DEFAULT_BASE_PATH.to_string(),
            config_file: DEFAULT_CONFIG_FILE.to_string(),
            meta_tag: "experiment".to_string(),
            query_parameter: "experiment".to_string(),
            randomization_unit: RandomizationUnit::Device,
            identity_namespace: DEFAULT_IDENTITY_NAMESPACE.to_string(),
        }
    }
}

impl ExperimentOptions {
    /// Lays the hook options over `self`. `basePath` is left alone since the
    /// plugin host always sets it to the scripts folder.
    pub fn overridden_by(&self, options: &PluginOptions) -> ExperimentOptions {
        let pick = |key: &str, fallback: &str| options.get_str(key).unwrap_or(fallback).to_string();
        ExperimentOptions {
            config_file: pick("configFile", &self.config_file),
            meta_tag: pick("metaTag", &self.meta_tag),
            query_parameter: pick("queryParameter", &self.query_parameter),
            ..self.clone()
        }
    }
}

/// The experiment running on the page, shared with the block resolver.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveExperiment {
    pub config: ExperimentConfig,
    pub run: bool,
    pub selected_variant: Option<String>,
    pub forced: bool,
}

#[derive(Debug, Default)]
pub struct ExperimentApi {
    active: RwLock<Option<ActiveExperiment>>,
}

impl ExperimentApi {
    pub fn active(&self) -> Option<ActiveExperiment> {
        self.active.read().clone()
    }

    fn publish(&self, experiment: ActiveExperiment, page: &PageContext) {
        page.set_extension(experiment.clone());
        *self.active.write() = Some(experiment);
    }
}

fn is_bot(user_agent: &str) -> bool {
    static BOT: OnceLock<Option<Regex>> = OnceLock::new();
    BOT.get_or_init(|| Regex::new(r"(?i)bot|crawl|spider").ok())
        .as_ref()
        .is_some_and(|re| re.is_match(user_agent))
}

/// The page's experiment id, unless the visitor is a crawler.
pub fn experiment_id(document: &Document, meta_tag: &str) -> Option<String> {
    if is_bot(document.user_agent()) {
        return None;
    }
    let id = to_class_name(&document.get_metadata(meta_tag));
    (!id.is_empty()).then_some(id)
}

/// `mobile` and `desktop` split at the breakpoint; other audiences match.
pub fn is_valid_audience(audience: &str, viewport_width: u32) -> bool {
    match audience {
        "mobile" => viewport_width < MOBILE_BREAKPOINT,
        "desktop" => viewport_width >= MOBILE_BREAKPOINT,
        _ => true,
    }
}

/// Splits `<experiment>/<variant>`.
pub fn forced_assignment(value: &str) -> (String, Option<String>) {
    match value.split_once('/') {
        Some((experiment, variant)) => (experiment.to_string(), Some(variant.to_string())),
        None => (value.to_string(), None),
    }
}

pub struct ExperimentationPlugin {
    options: ExperimentOptions,
    engine: DecisionEngine,
    context: DecisionContext,
    parser: Arc<dyn ManifestParser>,
    api: Arc<ExperimentApi>,
}

impl ExperimentationPlugin {
    pub fn new(options: ExperimentOptions, engine: DecisionEngine) -> Self {
        Self {
            options,
            engine,
            context: DecisionContext::new(),
            parser: Arc::new(SheetManifestParser),
            api: Arc::new(ExperimentApi::default()),
        }
    }

    /// Identities used on the visitor path.
    pub fn with_context(mut self, context: DecisionContext) -> Self {
        self.context = context;
        self
    }

    pub fn with_parser(mut self, parser: Arc<dyn ManifestParser>) -> Self {
        self.parser = parser;
        self
    }

    pub fn api_handle(&self) -> Arc<ExperimentApi> {
        Arc::clone(&self.api)
    }

    pub fn options(&self) -> &ExperimentOptions {
        &self.options
    }

    /// Runs the page's experiment with the plugin's own options.
    pub async fn run_experiment(&self, document: &Document, page: &PageContext) -> ExperimentResult<()> {
        self.run_experiment_with(&self.options, document, page).await
    }

    pub async fn run_experiment_with(
        &self,
        options: &ExperimentOptions,
        document: &Document,
        page: &PageContext,
    ) -> ExperimentResult<()> {
        let Some(id) = experiment_id(document, &options.meta_tag) else {
            return Ok(());
        };

        let (forced_experiment, forced_variant) = match document.query_param(&options.query_parameter) {
            Some(value) => forced_assignment(&value),
            None => (String::new(), None),
        };
        let forced = forced_experiment == id;

        let loader = ExperimentConfigLoader::new(Arc::clone(page.fetcher()))
            .with_parser(Arc::clone(&self.parser))
            .with_origin(page.page_url().clone());
        let Some(config) = loader
            .load(&id, &options.base_path, &options.config_file)
            .await?
        else {
            return Ok(());
        };
        if !config.is_active() && !forced {
            debug!(experiment = %id, "experiment inactive");
            return Ok(());
        }

        let audience = to_class_name(config.audience.as_deref().unwrap_or_default());
        let run = forced || is_valid_audience(&audience, document.viewport_width());
        let mut active = ActiveExperiment {
            config,
            run,
            selected_variant: None,
            forced,
        };
        self.api.publish(active.clone(), page);
        if !run {
            debug!(experiment = %id, audience = %audience, "audience does not match");
            return Ok(());
        }

        let forced_choice = forced_variant.filter(|_| forced).and_then(|variant| {
            let names = &active.config.variant_names;
            let camel = to_camel_case(&variant);
            [variant, camel].into_iter().find(|v| names.contains(v))
        });
        let selected = match forced_choice {
            Some(variant) => variant,
            None => {
                let policy = decision_policy_for(
                    &active.config,
                    options.randomization_unit,
                    &options.identity_namespace,
                );
                let decision = self.engine.evaluate(&policy, &self.context)?;
                match decision.treatment() {
                    Some(treatment) => treatment.to_string(),
                    None => return Ok(()),
                }
            }
        };
        active.selected_variant = Some(selected.clone());
        self.api.publish(active.clone(), page);
        info!(experiment = %id, variant = %selected, forced, "running experiment");

        self.swap_content(&active, &selected, document, page).await;
        Ok(())
    }

    /// Full-page content experiment: the variant's first page replaces main
    /// when the current path is one of the control pages. Runs before the
    /// decorator so the swapped sections are the ones that get loaded.
    async fn swap_content(&self, active: &ActiveExperiment, selected: &str, document: &Document, page: &PageContext) {
        let config = &active.config;
        if config.control() == Some(selected) {
            return;
        }
        let (Some(variant), Some(control)) = (config.variants.get(selected), config.control_variant()) else {
            return;
        };
        let Some(first_page) = variant.content.first() else {
            return;
        };
        let current_path = document.url().path();
        let Some(index) = control.content.iter().position(|p| p == current_path) else {
            return;
        };
        if variant.content.get(index).map(String::as_str) == Some(current_path) {
            return;
        }

        document.add_body_class(format!("experiment-{}", config.id));
        document.add_body_class(format!("variant-{selected}"));

        let plain = format!("{first_page}.plain.html");
        let url = page.absolute_url(&plain);
        match page.fetcher().fetch(&url).await {
            Ok(response) if response.ok() => {
                let Some(decoder) = page.content_decoder() else {
                    warn!(url = %url, "no content decoder, keeping page content");
                    return;
                };
                let html = response.text();
                match decoder.decode(&html) {
                    Ok(content) => {
                        debug!(url = %url, sections = content.sections.len(), "swapped in experiment content");
                        document.main().replace_content(html, content);
                    }
                    Err(err) => warn!(url = %url, error = %err, "error decoding experiment content"),
                }
            }
            Ok(response) => {
                warn!(url = %url, status = response.status, "error loading experiment content");
            }
            Err(err) => warn!(url = %url, error = %err, "error loading experiment content"),
        }
    }
}

#[async_trait]
impl Plugin for ExperimentationPlugin {
    fn name(&self) -> &str {
        EXPERIMENTATION_PLUGIN
    }

    fn hooks(&self) -> HookSet {
        HookSet::of(&[Hook::PreEager])
    }

    async fn pre_eager(&self, ctx: &HookCtx<'_>) -> LoaderResult<()> {
        let options = self.options.overridden_by(&ctx.options);
        self.run_experiment_with(&options, ctx.document, ctx.page).await?;
        Ok(())
    }

    fn patches_block_config(&self) -> bool {
        true
    }

    fn patch_block_config(&self, config: BlockConfig, page: &PageContext) -> BlockConfig {
        patch::patch_block_config(
            config,
            self.api.active().as_ref(),
            &page.origin(),
            page.code_base_path(),
        )
    }

    fn api(&self) -> Option<PluginApi> {
        Some(self.api_handle())
    }
}
