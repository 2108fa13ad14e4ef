//! In-memory page model: metadata, sections, blocks and images.
//!
//! Statuses live behind their own locks so that the loader can flip them from
//! `&self` while other tasks hold the same `Arc`. Status transitions are
//! check-and-set under a single lock, which is what makes block loading
//! idempotent.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use pagekit_core_types::{to_camel_case, to_class_name};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;
use url::Url;

use crate::errors::LoaderResult;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockStatus {
    Uninitialized,
    Initialized,
    Loading,
    Loaded,
}

impl BlockStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            BlockStatus::Uninitialized => "uninitialized",
            BlockStatus::Initialized => "initialized",
            BlockStatus::Loading => "loading",
            BlockStatus::Loaded => "loaded",
        }
    }

    /// Blocks still holding back the reveal of their section.
    pub fn is_pending(self) -> bool {
        matches!(self, BlockStatus::Initialized | BlockStatus::Loading)
    }
}

impl fmt::Display for BlockStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SectionStatus {
    Initialized,
    Loading,
    Loaded,
}

impl SectionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SectionStatus::Initialized => "initialized",
            SectionStatus::Loading => "loading",
            SectionStatus::Loaded => "loaded",
        }
    }
}

impl fmt::Display for SectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named, independently loadable content unit.
pub struct Block {
    name: String,
    classes: RwLock<Vec<String>>,
    rows: RwLock<Vec<Vec<String>>>,
    status: Mutex<BlockStatus>,
    data: RwLock<BTreeMap<String, String>>,
}

impl Block {
    /// Creates an undecorated block. `"Columns (wide, dark)"` names a
    /// `columns` block carrying the `wide` and `dark` variant classes.
    pub fn new(class_name: &str, rows: Vec<Vec<String>>) -> Arc<Self> {
        let (head, variants) = match class_name.split_once('(') {
            Some((head, rest)) => (head, rest.trim_end().trim_end_matches(')')),
            None => (class_name, ""),
        };
        let name = to_class_name(head);
        let classes: Vec<String> = std::iter::once(name.clone())
            .chain(variants.split(',').map(|v| to_class_name(v.trim())))
            .filter(|c| !c.is_empty())
            .collect();
        Arc::new(Self {
            name,
            classes: RwLock::new(classes),
            rows: RwLock::new(rows),
            status: Mutex::new(BlockStatus::Uninitialized),
            data: RwLock::new(BTreeMap::new()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> BlockStatus {
        *self.status.lock()
    }

    /// Moves the block to `status` unless that would go backwards.
    pub fn set_status(&self, status: BlockStatus) -> bool {
        let mut guard = self.status.lock();
        if rank(status) < rank(*guard) {
            return false;
        }
        *guard = status;
        true
    }

    /// Atomically claims the block for loading. Returns false when the block
    /// is already loading or loaded.
    pub fn begin_loading(&self) -> bool {
        let mut guard = self.status.lock();
        if matches!(*guard, BlockStatus::Loading | BlockStatus::Loaded) {
            return false;
        }
        *guard = BlockStatus::Loading;
        true
    }

    pub fn classes(&self) -> Vec<String> {
        self.classes.read().clone()
    }

    pub fn add_class(&self, class: impl Into<String>) {
        let class = class.into();
        let mut guard = self.classes.write();
        if !guard.contains(&class) {
            guard.push(class);
        }
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.classes.read().iter().any(|c| c == class)
    }

    pub fn rows(&self) -> Vec<Vec<String>> {
        self.rows.read().clone()
    }

    pub fn set_rows(&self, rows: Vec<Vec<String>>) {
        *self.rows.write() = rows;
    }

    pub fn set_data(&self, key: impl Into<String>, value: impl Into<String>) {
        self.data.write().insert(key.into(), value.into());
    }

    /// Reads a `data-*` attribute. `block-status` is always answered from the
    /// live status once the block is decorated.
    pub fn data_attribute(&self, key: &str) -> Option<String> {
        if key == "block-status" {
            let status = self.status();
            return (status != BlockStatus::Uninitialized).then(|| status.as_str().to_string());
        }
        self.data.read().get(key).cloned()
    }
}

impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Block")
            .field("name", &self.name)
            .field("status", &self.status())
            .finish()
    }
}

fn rank(status: BlockStatus) -> u8 {
    match status {
        BlockStatus::Uninitialized => 0,
        BlockStatus::Initialized => 1,
        BlockStatus::Loading => 2,
        BlockStatus::Loaded => 3,
    }
}

/// Builds an undecorated block from a table of cells.
pub fn build_block(name: &str, rows: Vec<Vec<String>>) -> Arc<Block> {
    Block::new(name, rows)
}

/// Turns a two-column block into a key/value map. Keys are sanitised; a cell
/// holding several comma-separated values becomes a list.
pub fn read_block_config(block: &Block) -> BTreeMap<String, Value> {
    let mut config = BTreeMap::new();
    for row in block.rows() {
        if row.len() < 2 {
            continue;
        }
        let key = to_class_name(&row[0]);
        let values: Vec<&str> = row[1]
            .split('\n')
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .collect();
        let value = match values.as_slice() {
            [single] => Value::String(single.to_string()),
            [] => Value::String(String::new()),
            many => Value::Array(many.iter().map(|v| Value::String(v.to_string())).collect()),
        };
        config.insert(key, value);
    }
    config
}

/// An ordered group of blocks, the unit of progressive reveal.
pub struct Section {
    blocks: RwLock<Vec<Arc<Block>>>,
    status: Mutex<Option<SectionStatus>>,
    visible: AtomicBool,
    classes: RwLock<Vec<String>>,
    data: RwLock<BTreeMap<String, String>>,
}

impl Section {
    pub fn new(blocks: Vec<Arc<Block>>) -> Arc<Self> {
        Arc::new(Self {
            blocks: RwLock::new(blocks),
            status: Mutex::new(None),
            visible: AtomicBool::new(true),
            classes: RwLock::new(Vec::new()),
            data: RwLock::new(BTreeMap::new()),
        })
    }

    pub fn blocks(&self) -> Vec<Arc<Block>> {
        self.blocks.read().clone()
    }

    pub fn push_block(&self, block: Arc<Block>) {
        self.blocks.write().push(block);
    }

    pub fn remove_block(&self, block: &Arc<Block>) {
        self.blocks.write().retain(|b| !Arc::ptr_eq(b, block));
    }

    pub fn status(&self) -> Option<SectionStatus> {
        *self.status.lock()
    }

    pub(crate) fn set_status(&self, status: SectionStatus) {
        *self.status.lock() = Some(status);
    }

    pub fn is_visible(&self) -> bool {
        self.visible.load(Ordering::SeqCst)
    }

    pub fn set_visible(&self, visible: bool) {
        self.visible.store(visible, Ordering::SeqCst);
    }

    pub fn classes(&self) -> Vec<String> {
        self.classes.read().clone()
    }

    pub fn add_class(&self, class: impl Into<String>) {
        let class = class.into();
        let mut guard = self.classes.write();
        if !guard.contains(&class) {
            guard.push(class);
        }
    }

    pub fn set_data(&self, key: &str, value: impl Into<String>) {
        self.data.write().insert(to_camel_case(key), value.into());
    }

    pub fn data_attribute(&self, key: &str) -> Option<String> {
        if key == "section-status" {
            return self.status().map(|s| s.as_str().to_string());
        }
        self.data.read().get(key).cloned()
    }
}

impl fmt::Debug for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Section")
            .field("status", &self.status())
            .field("blocks", &self.blocks.read().len())
            .finish()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageState {
    Pending,
    Loaded,
    Errored,
}

pub struct Image {
    src: String,
    eager: AtomicBool,
    state: watch::Sender<ImageState>,
}

impl Image {
    pub fn new(src: impl Into<String>) -> Arc<Self> {
        let (state, _) = watch::channel(ImageState::Pending);
        Arc::new(Self {
            src: src.into(),
            eager: AtomicBool::new(false),
            state,
        })
    }

    pub fn src(&self) -> &str {
        &self.src
    }

    /// True once the image has either loaded or failed.
    pub fn complete(&self) -> bool {
        *self.state.borrow() != ImageState::Pending
    }

    pub fn state(&self) -> ImageState {
        *self.state.borrow()
    }

    pub fn mark_loaded(&self) {
        self.state.send_replace(ImageState::Loaded);
    }

    pub fn mark_errored(&self) {
        self.state.send_replace(ImageState::Errored);
    }

    pub fn set_eager(&self) {
        self.eager.store(true, Ordering::SeqCst);
    }

    pub fn is_eager(&self) -> bool {
        self.eager.load(Ordering::SeqCst)
    }

    /// Resolves on load or error.
    pub async fn settled(&self) {
        let mut rx = self.state.subscribe();
        let _ = rx.wait_for(|state| *state != ImageState::Pending).await;
    }
}

/// Sections and images decoded from a content document.
#[derive(Default)]
pub struct MainContent {
    pub sections: Vec<Arc<Section>>,
    pub images: Vec<Arc<Image>>,
}

/// Turns fetched page content into main sections.
pub trait ContentDecoder: Send + Sync {
    fn decode(&self, raw: &str) -> LoaderResult<MainContent>;
}

/// The main content container.
#[derive(Default)]
pub struct Main {
    sections: RwLock<Vec<Arc<Section>>>,
    images: RwLock<Vec<Arc<Image>>>,
    replaced_html: RwLock<Option<String>>,
}

impl Main {
    pub fn new(sections: Vec<Arc<Section>>, images: Vec<Arc<Image>>) -> Self {
        Self {
            sections: RwLock::new(sections),
            images: RwLock::new(images),
            replaced_html: RwLock::new(None),
        }
    }

    pub fn sections(&self) -> Vec<Arc<Section>> {
        self.sections.read().clone()
    }

    /// Decorated blocks in document order.
    pub fn blocks(&self) -> Vec<Arc<Block>> {
        self.sections
            .read()
            .iter()
            .flat_map(|section| section.blocks())
            .filter(|block| block.status() != BlockStatus::Uninitialized)
            .collect()
    }

    pub fn first_block(&self) -> Option<Arc<Block>> {
        self.blocks().into_iter().next()
    }

    pub fn first_image(&self) -> Option<Arc<Image>> {
        self.images.read().first().cloned()
    }

    /// Swaps the main content for `content`, decoded from `html`. The new
    /// sections start undecorated; whatever was in main before is dropped.
    pub fn replace_content(&self, html: String, content: MainContent) {
        *self.sections.write() = content.sections;
        *self.images.write() = content.images;
        *self.replaced_html.write() = Some(html);
    }

    pub fn replaced_html(&self) -> Option<String> {
        self.replaced_html.read().clone()
    }
}

pub struct Document {
    url: Url,
    user_agent: String,
    viewport_width: u32,
    metadata: Vec<(String, String)>,
    body_classes: RwLock<Vec<String>>,
    body_visible: AtomicBool,
    main: Main,
    header: RwLock<Option<Arc<Block>>>,
    footer: RwLock<Option<Arc<Block>>>,
}

impl Document {
    pub fn builder(url: Url) -> DocumentBuilder {
        DocumentBuilder::new(url)
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    pub fn viewport_width(&self) -> u32 {
        self.viewport_width
    }

    /// All values for `name` joined with `", "`; empty when absent.
    pub fn get_metadata(&self, name: &str) -> String {
        self.metadata
            .iter()
            .filter(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// First value of query parameter `name`.
    pub fn query_param(&self, name: &str) -> Option<String> {
        self.url
            .query_pairs()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
    }

    pub fn main(&self) -> &Main {
        &self.main
    }

    pub fn body_classes(&self) -> Vec<String> {
        self.body_classes.read().clone()
    }

    pub fn add_body_class(&self, class: impl Into<String>) {
        let class = class.into();
        let mut guard = self.body_classes.write();
        if !guard.contains(&class) {
            guard.push(class);
        }
    }

    pub fn is_body_visible(&self) -> bool {
        self.body_visible.load(Ordering::SeqCst)
    }

    pub fn show_body(&self) {
        self.body_visible.store(true, Ordering::SeqCst);
    }

    pub fn header(&self) -> Option<Arc<Block>> {
        self.header.read().clone()
    }

    pub fn footer(&self) -> Option<Arc<Block>> {
        self.footer.read().clone()
    }

    pub(crate) fn set_header(&self, block: Arc<Block>) {
        *self.header.write() = Some(block);
    }

    pub(crate) fn set_footer(&self, block: Arc<Block>) {
        *self.footer.write() = Some(block);
    }
}

pub struct DocumentBuilder {
    url: Url,
    user_agent: String,
    viewport_width: u32,
    metadata: Vec<(String, String)>,
    sections: Vec<Arc<Section>>,
    images: Vec<Arc<Image>>,
}

impl DocumentBuilder {
    fn new(url: Url) -> Self {
        Self {
            url,
            user_agent: String::new(),
            viewport_width: 1280,
            metadata: Vec::new(),
            sections: Vec::new(),
            images: Vec::new(),
        }
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn viewport_width(mut self, width: u32) -> Self {
        self.viewport_width = width;
        self
    }

    pub fn metadata(mut self, name: impl Into<String>, content: impl Into<String>) -> Self {
        self.metadata.push((name.into(), content.into()));
        self
    }

    pub fn section(mut self, section: Arc<Section>) -> Self {
        self.sections.push(section);
        self
    }

    pub fn image(mut self, image: Arc<Image>) -> Self {
        self.images.push(image);
        self
    }

    pub fn build(self) -> Arc<Document> {
        Arc::new(Document {
            url: self.url,
            user_agent: self.user_agent,
            viewport_width: self.viewport_width,
            metadata: self.metadata,
            body_classes: RwLock::new(Vec::new()),
            body_visible: AtomicBool::new(false),
            main: Main::new(self.sections, self.images),
            header: RwLock::new(None),
            footer: RwLock::new(None),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url() -> Url {
        Url::parse("https://example.com/page?experiment=hero/challenger-1&x=1").unwrap()
    }

    #[test]
    fn block_status_is_monotonic() {
        let block = build_block("Hero", Vec::new());
        assert_eq!(block.name(), "hero");
        assert!(block.set_status(BlockStatus::Initialized));
        assert!(block.begin_loading());
        assert!(!block.begin_loading());
        assert!(block.set_status(BlockStatus::Loaded));
        assert!(!block.set_status(BlockStatus::Initialized));
        assert_eq!(block.status(), BlockStatus::Loaded);
        assert_eq!(block.data_attribute("block-status").as_deref(), Some("loaded"));
    }

    #[test]
    fn metadata_joins_values_and_query_params_decode() {
        let doc = Document::builder(url())
            .metadata("og:title", "Foo")
            .metadata("keywords", "a")
            .metadata("keywords", "b")
            .build();
        assert_eq!(doc.get_metadata("og:title"), "Foo");
        assert_eq!(doc.get_metadata("keywords"), "a, b");
        assert_eq!(doc.get_metadata("missing"), "");
        assert_eq!(
            doc.query_param("experiment").as_deref(),
            Some("hero/challenger-1")
        );
    }

    #[test]
    fn read_block_config_splits_multi_values() {
        let block = build_block(
            "config",
            vec![
                vec!["Prop 0".into(), "Plain text".into()],
                vec!["Prop 1".into(), "First\nSecond".into()],
                vec!["ignored".into()],
            ],
        );
        let cfg = read_block_config(&block);
        assert_eq!(cfg["prop-0"], Value::String("Plain text".into()));
        assert_eq!(cfg["prop-1"], serde_json::json!(["First", "Second"]));
        assert_eq!(cfg.len(), 2);
    }

    #[test]
    fn replace_content_drops_the_previous_sections() {
        let doc = Document::builder(url())
            .section(Section::new(vec![build_block("control-only", Vec::new())]))
            .image(Image::new("/control.png"))
            .build();
        let first = doc.main().sections()[0].blocks()[0].clone();
        first.set_status(BlockStatus::Initialized);

        doc.main().replace_content(
            "<main>variant</main>".into(),
            MainContent {
                sections: vec![Section::new(vec![build_block("promo", Vec::new())])],
                images: vec![Image::new("/variant.png")],
            },
        );

        let sections = doc.main().sections();
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].blocks()[0].name(), "promo");
        // Fresh content is undecorated until the decorator runs.
        assert!(doc.main().blocks().is_empty());
        assert_eq!(doc.main().first_image().unwrap().src(), "/variant.png");
        assert_eq!(doc.main().replaced_html().as_deref(), Some("<main>variant</main>"));
    }

    #[tokio::test]
    async fn image_settles_on_error() {
        let image = Image::new("/hero.png");
        assert!(!image.complete());
        let waiter = {
            let image = Arc::clone(&image);
            tokio::spawn(async move { image.settled().await })
        };
        image.mark_errored();
        waiter.await.unwrap();
        assert_eq!(image.state(), ImageState::Errored);
    }
}
