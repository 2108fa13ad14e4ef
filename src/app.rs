//! Wires settings, fetchers and plugins into a page load.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use pagekit_core_types::Fetcher;
use pagekit_experimentation::{
    decision_policy_for, ActiveExperiment, AssignmentStore, Decision, DecisionContext,
    DecisionEngine, DecisionPolicy, ExperimentConfig, ExperimentOptions, ExperimentationPlugin,
    FileKvStore, KeyValueStore, ManifestParser, MemoryKvStore, RandomizationUnit,
    SheetManifestParser,
};
use pagekit_loader::plugins::{DecoratorPlugin, Placeholders, PlaceholdersApi, PlaceholdersPlugin};
use pagekit_loader::{
    HookCtx, LoadOptions, LoaderResult, ModuleRegistry, PageContext, PageLoadReport, PageLoader,
    PhaseHook, Registration,
};
use pagekit_settings::Settings;
use serde::Serialize;
use tracing::{debug, info};
use url::Url;

use crate::fetch::{DirFetcher, HttpFetcher};
use crate::page_source::{DescriptionDecoder, PageDescription};

/// Where resources come from when no site root is given.
#[derive(Clone, Debug)]
pub enum Source {
    Dir(PathBuf),
    Http(Option<Url>),
}

impl Source {
    pub fn fetcher(&self) -> Arc<dyn Fetcher> {
        match self {
            Source::Dir(root) => Arc::new(DirFetcher::new(root)),
            Source::Http(None) => Arc::new(HttpFetcher::new()),
            Source::Http(Some(base)) => Arc::new(HttpFetcher::new().with_base(base.clone())),
        }
    }
}

#[derive(Clone, Debug)]
pub struct PageRequest {
    pub page: PathBuf,
    pub url: Url,
    pub source: Source,
    pub context: DecisionContext,
    pub viewport_width: u32,
    pub user_agent: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadOutcome {
    #[serde(flatten)]
    pub report: PageLoadReport,
    pub experiment: Option<ActiveExperiment>,
    pub placeholders: Option<Placeholders>,
    /// Main content swapped in by a full-page experiment.
    pub replaced_html: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateOutcome {
    pub config: ExperimentConfig,
    pub policy: DecisionPolicy,
    pub decision: Decision,
}

/// Loads header and footer blocks during the lazy phase.
struct PageChrome {
    header: bool,
    footer: bool,
}

#[async_trait]
impl PhaseHook for PageChrome {
    async fn run(&self, ctx: &HookCtx<'_>) -> LoaderResult<()> {
        if self.header {
            ctx.blocks.load_header(ctx.document).await;
        }
        if self.footer {
            ctx.blocks.load_footer(ctx.document).await;
        }
        Ok(())
    }
}

/// Assignment store backed by `experimentation.storage_path`, or memory.
pub fn assignment_store(settings: &Settings) -> Result<Arc<AssignmentStore>> {
    let config = &settings.experimentation;
    let kv: Arc<dyn KeyValueStore> = match &config.storage_path {
        Some(path) => Arc::new(
            FileKvStore::open(path)
                .with_context(|| format!("opening assignment store {path}"))?,
        ),
        None => Arc::new(MemoryKvStore::new()),
    };
    Ok(Arc::new(AssignmentStore::with_key(kv, config.storage_key.clone())))
}

pub fn experiment_options(settings: &Settings) -> Result<ExperimentOptions> {
    let config = &settings.experimentation;
    Ok(ExperimentOptions {
        base_path: config.base_path.clone(),
        config_file: config.config_file.clone(),
        meta_tag: config.meta_tag.clone(),
        query_parameter: config.query_parameter.clone(),
        randomization_unit: RandomizationUnit::from_str(&config.randomization_unit)?,
        identity_namespace: config.identity_namespace.clone(),
    })
}

pub async fn run_page_load(settings: &Settings, request: PageRequest) -> Result<LoadOutcome> {
    let raw = tokio::fs::read_to_string(&request.page)
        .await
        .with_context(|| format!("reading page description {}", request.page.display()))?;
    let description = PageDescription::from_json(&raw)
        .with_context(|| format!("parsing page description {}", request.page.display()))?;
    let document =
        description.build_document(request.url.clone(), &request.user_agent, request.viewport_width);

    let fetcher = request.source.fetcher();
    let modules = ModuleRegistry::new().with_fetcher(Arc::clone(&fetcher), request.url.clone());
    let page = PageContext::new(request.url.clone(), settings.page.code_base_path.clone(), fetcher)
        .with_content_decoder(Arc::new(DescriptionDecoder));
    let loader = PageLoader::new(document, page, Arc::new(modules));

    loader.with_plugin(Arc::new(DecoratorPlugin::new()), Registration::default());

    let mut placeholders: Option<Arc<PlaceholdersApi>> = None;
    if settings.placeholders.enabled {
        let plugin = PlaceholdersPlugin::new(settings.placeholders.prefix.clone());
        placeholders = Some(plugin.api_handle());
        loader.with_plugin(Arc::new(plugin), Registration::default());
    }

    if settings.experimentation.enabled {
        let options = experiment_options(settings)?;
        let engine = DecisionEngine::new(assignment_store(settings)?);
        let meta_tag = options.meta_tag.clone();
        let plugin = ExperimentationPlugin::new(options, engine).with_context(request.context);
        let registration = Registration::default()
            .when(move |document, _| !document.get_metadata(&meta_tag).is_empty());
        if loader.with_plugin(Arc::new(plugin), registration).is_none() {
            debug!("page has no experiment metadata");
        }
    }

    let options = LoadOptions {
        lcp_blocks: settings.page.lcp_blocks.clone(),
        delayed_duration: Duration::from_millis(settings.page.delayed_duration_ms),
        load_lazy: Some(Arc::new(PageChrome {
            header: description.header,
            footer: description.footer,
        })),
        ..LoadOptions::default()
    };
    let report = loader.load_page(&options).await;
    info!(url = %report.url, failures = report.failures.len(), "page loaded");

    Ok(LoadOutcome {
        experiment: loader.page().extension::<ActiveExperiment>(),
        placeholders: placeholders.map(|api| api.placeholders()),
        replaced_html: loader.document().main().replaced_html(),
        report,
    })
}

/// Validates a manifest on disk and evaluates it once.
pub async fn evaluate_manifest(
    settings: &Settings,
    manifest: &Path,
    experiment_id: &str,
    unit: RandomizationUnit,
    context: &DecisionContext,
) -> Result<EvaluateOutcome> {
    let raw = tokio::fs::read(manifest)
        .await
        .with_context(|| format!("reading manifest {}", manifest.display()))?;
    let json: serde_json::Value = serde_json::from_slice(&raw)
        .with_context(|| format!("parsing manifest {}", manifest.display()))?;
    let base_path = format!("{}/{experiment_id}", settings.experimentation.base_path);
    let config = SheetManifestParser
        .parse(&json)?
        .validate(experiment_id, &manifest.display().to_string(), &base_path)?;

    let policy = decision_policy_for(&config, unit, &settings.experimentation.identity_namespace);
    let engine = DecisionEngine::new(assignment_store(settings)?);
    let decision = engine.evaluate(&policy, context)?;
    Ok(EvaluateOutcome {
        config,
        policy,
        decision,
    })
}
