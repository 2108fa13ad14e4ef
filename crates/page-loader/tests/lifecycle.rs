use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pagekit_core_types::StaticFetcher;
use pagekit_loader::plugins::DecoratorPlugin;
use pagekit_loader::{
    build_block, Block, BlockDecorator, BlockStatus, Document, Hook, HookCtx, HookSet, Image,
    LoadOptions, LoadProgress, LoaderError, LoaderResult, ModuleRegistry, PageContext, PageLoader,
    PhaseHook, Plugin, PluginOptions, Registration, Section, SectionStatus,
};
use parking_lot::Mutex;
use tokio::time::Instant;
use url::Url;

type Journal = Arc<Mutex<Vec<(String, Instant)>>>;

struct Recorder {
    name: &'static str,
    hooks: HookSet,
    journal: Journal,
    fail_on: Option<Hook>,
}

impl Recorder {
    fn new(name: &'static str, hooks: &[Hook], journal: &Journal) -> Self {
        Self {
            name,
            hooks: HookSet::of(hooks),
            journal: Arc::clone(journal),
            fail_on: None,
        }
    }

    fn record(&self, hook: Hook, ctx: &HookCtx<'_>) -> LoaderResult<()> {
        let flag = ctx.options.get_str("flag").unwrap_or("-").to_string();
        self.journal
            .lock()
            .push((format!("{}:{}:{}", self.name, hook, flag), Instant::now()));
        if self.fail_on == Some(hook) {
            return Err(LoaderError::plugin("boom"));
        }
        Ok(())
    }
}

#[async_trait]
impl Plugin for Recorder {
    fn name(&self) -> &str {
        self.name
    }

    fn hooks(&self) -> HookSet {
        self.hooks
    }

    async fn pre_eager(&self, ctx: &HookCtx<'_>) -> LoaderResult<()> {
        self.record(Hook::PreEager, ctx)
    }

    async fn post_eager(&self, ctx: &HookCtx<'_>) -> LoaderResult<()> {
        self.record(Hook::PostEager, ctx)
    }

    async fn pre_lazy(&self, ctx: &HookCtx<'_>) -> LoaderResult<()> {
        self.record(Hook::PreLazy, ctx)
    }

    async fn post_lazy(&self, ctx: &HookCtx<'_>) -> LoaderResult<()> {
        self.record(Hook::PostLazy, ctx)
    }

    async fn pre_delayed(&self, ctx: &HookCtx<'_>) -> LoaderResult<()> {
        self.record(Hook::PreDelayed, ctx)
    }

    async fn post_delayed(&self, ctx: &HookCtx<'_>) -> LoaderResult<()> {
        self.record(Hook::PostDelayed, ctx)
    }
}

struct LoadHook(&'static str, Journal);

#[async_trait]
impl PhaseHook for LoadHook {
    async fn run(&self, _ctx: &HookCtx<'_>) -> LoaderResult<()> {
        self.1.lock().push((self.0.to_string(), Instant::now()));
        Ok(())
    }
}

#[derive(Default)]
struct CountingBlock(AtomicUsize);

#[async_trait]
impl BlockDecorator for CountingBlock {
    async fn decorate(&self, _block: &Arc<Block>, _page: &PageContext) -> LoaderResult<()> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

const ALL_HOOKS: [Hook; 6] = [
    Hook::PreEager,
    Hook::PostEager,
    Hook::PreLazy,
    Hook::PostLazy,
    Hook::PreDelayed,
    Hook::PostDelayed,
];

fn empty_loader() -> PageLoader {
    let url = Url::parse("https://example.com/").expect("url");
    let document = Document::builder(url.clone()).build();
    let page = PageContext::new(url, "", Arc::new(StaticFetcher::new()));
    PageLoader::new(document, page, Arc::new(ModuleRegistry::new()))
}

fn labels(journal: &Journal) -> Vec<String> {
    journal.lock().iter().map(|(label, _)| label.clone()).collect()
}

#[tokio::test(start_paused = true)]
async fn phases_run_in_order_with_delay_before_delayed() {
    let journal: Journal = Arc::default();
    let loader = empty_loader();
    loader.with_plugin(
        Arc::new(Recorder::new("a", &ALL_HOOKS, &journal)),
        Registration::new(PluginOptions::new().with("flag", "own")),
    );
    loader.with_plugin(
        Arc::new(Recorder::new("b", &[Hook::PreEager, Hook::PreDelayed], &journal)),
        Registration::default(),
    );

    let opts = LoadOptions {
        load_eager: Some(Arc::new(LoadHook("loadEager", Arc::clone(&journal)))),
        load_delayed: Some(Arc::new(LoadHook("loadDelayed", Arc::clone(&journal)))),
        options: PluginOptions::new().with("flag", "call"),
        ..LoadOptions::default()
    };
    let mut progress = loader.subscribe();
    let report = loader.load_page(&opts).await;

    assert_eq!(
        labels(&journal),
        vec![
            "a:preEager:own",
            "b:preEager:call",
            "loadEager",
            "a:postEager:own",
            "a:preLazy:own",
            "a:postLazy:own",
            "a:preDelayed:own",
            "b:preDelayed:call",
            "loadDelayed",
            "a:postDelayed:own",
        ]
    );

    let entries = journal.lock().clone();
    let post_lazy = entries[5].1;
    let pre_delayed = entries[6].1;
    assert!(pre_delayed - post_lazy >= Duration::from_millis(3000));
    assert!(report.failures.is_empty());
    assert!(report.body_visible);
    assert_eq!(*progress.borrow_and_update(), LoadProgress::Complete);
}

#[tokio::test(start_paused = true)]
async fn failing_hook_does_not_stop_siblings_or_later_phases() {
    let journal: Journal = Arc::default();
    let loader = empty_loader();
    let mut failing = Recorder::new("failing", &[Hook::PreEager, Hook::PreLazy], &journal);
    failing.fail_on = Some(Hook::PreEager);
    loader.with_plugin(Arc::new(failing), Registration::default());
    loader.with_plugin(
        Arc::new(Recorder::new("steady", &[Hook::PreEager], &journal)),
        Registration::default(),
    );

    let opts = LoadOptions {
        delayed_duration: Duration::from_millis(10),
        ..LoadOptions::default()
    };
    let report = loader.load_page(&opts).await;

    assert_eq!(
        labels(&journal),
        vec!["failing:preEager:-", "steady:preEager:-", "failing:preLazy:-"]
    );
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].plugin, "failing");
    assert_eq!(report.failures[0].hook, "preEager");
    assert!(report.failures[0].message.contains("boom"));
}

#[tokio::test(start_paused = true)]
async fn full_load_reveals_sections_in_order() {
    let url = Url::parse("https://example.com/").expect("url");
    let hero_image = Image::new("/media/hero.png");
    let first = Section::new(vec![build_block("hero", Vec::new())]);
    let second = Section::new(vec![
        build_block("cards", Vec::new()),
        build_block(
            "section-metadata",
            vec![vec!["style".into(), "dark".into()]],
        ),
    ]);
    let document = Document::builder(url.clone())
        .metadata("template", "landing")
        .section(Arc::clone(&first))
        .section(Arc::clone(&second))
        .image(Arc::clone(&hero_image))
        .build();

    let fetcher = Arc::new(
        StaticFetcher::new()
            .with("https://example.com/blocks/hero/hero.css", ".hero{}")
            .with("https://example.com/blocks/cards/cards.css", ".cards{}"),
    );
    let registry = Arc::new(ModuleRegistry::new());
    let hero_code = Arc::new(CountingBlock::default());
    registry.register_block("hero", hero_code.clone());
    let page = PageContext::new(url, "", fetcher.clone());
    let loader = PageLoader::new(document, page, registry);
    loader.with_plugin(Arc::new(DecoratorPlugin::new()), Registration::default());

    let image = Arc::clone(&hero_image);
    let settle = async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        image.mark_loaded();
    };
    let opts = LoadOptions {
        lcp_blocks: vec!["hero".to_string()],
        ..LoadOptions::default()
    };
    let (report, ()) = tokio::join!(loader.load_page(&opts), settle);

    assert!(report.body_classes.iter().any(|c| c == "landing"));
    for section in [&first, &second] {
        assert_eq!(section.status(), Some(SectionStatus::Loaded));
        assert!(section.is_visible());
        for block in section.blocks() {
            assert_eq!(block.status(), BlockStatus::Loaded);
        }
    }
    assert!(second.classes().iter().any(|c| c == "dark"));
    assert_eq!(second.blocks().len(), 1);
    assert_eq!(hero_code.0.load(Ordering::SeqCst), 1);
    assert_eq!(
        fetcher.request_count("https://example.com/blocks/hero/hero.css"),
        1
    );
    assert!(hero_image.is_eager());
    assert_eq!(report.sections.len(), 2);
    assert_eq!(report.sections[0].blocks[0].js_path, "/blocks/hero/hero.js");
}

#[tokio::test(start_paused = true)]
async fn overridden_hooks_outside_the_hook_set_never_run() {
    let journal: Journal = Arc::default();
    let loader = empty_loader();
    loader.with_plugin(
        Arc::new(Recorder::new("silent", &[], &journal)),
        Registration::default(),
    );
    loader.with_plugin(
        Arc::new(Recorder::new("partial", &[Hook::PostLazy], &journal)),
        Registration::default(),
    );

    let report = loader.load_page(&LoadOptions::default()).await;

    assert_eq!(labels(&journal), vec!["partial:postLazy:-".to_string()]);
    assert!(report.failures.is_empty());
}
