//! Built-in plugin turning raw page content into sections and blocks.

use std::sync::Arc;

use async_trait::async_trait;
use pagekit_core_types::to_class_name;
use serde_json::Value;
use tracing::debug;

use crate::document::{read_block_config, Block, BlockStatus, Document, Main, Section, SectionStatus};
use crate::errors::LoaderResult;
use crate::plugin::{Hook, HookCtx, HookSet, Plugin, PluginApi};

pub const DECORATOR_PLUGIN: &str = "decorator";

const SECTION_METADATA: &str = "section-metadata";

/// Marks a block as loadable: `block` class, `data-block-name`, status
/// `initialized`, and a `<name>-container` class on its section.
pub fn decorate_block(block: &Block, section: Option<&Section>) {
    let name = block.name();
    if name.is_empty() {
        return;
    }
    block.add_class("block");
    block.set_data("block-name", name);
    block.set_status(BlockStatus::Initialized);
    if let Some(section) = section {
        section.add_class(format!("{name}-container"));
    }
}

pub fn decorate_blocks(main: &Main) {
    for section in main.sections() {
        for block in section.blocks() {
            decorate_block(&block, Some(&section));
        }
    }
}

/// Hides every section until its blocks load and folds section metadata
/// into classes and data attributes.
pub fn decorate_sections(main: &Main) {
    for section in main.sections() {
        section.add_class("section");
        section.set_status(SectionStatus::Initialized);
        section.set_visible(false);

        let Some(meta_block) = section
            .blocks()
            .into_iter()
            .find(|block| block.name() == SECTION_METADATA)
        else {
            continue;
        };
        for (key, value) in read_block_config(&meta_block) {
            let value = match value {
                Value::String(s) => s,
                Value::Array(items) => items
                    .iter()
                    .filter_map(Value::as_str)
                    .collect::<Vec<_>>()
                    .join(","),
                other => other.to_string(),
            };
            if key == "style" {
                for style in value.split(',') {
                    let class = to_class_name(style.trim());
                    if !class.is_empty() {
                        section.add_class(class);
                    }
                }
            } else {
                section.set_data(&key, value);
            }
        }
        section.remove_block(&meta_block);
    }
}

fn add_metadata_classes(document: &Document, name: &str) {
    let value = document.get_metadata(name);
    if value.is_empty() {
        return;
    }
    for class in value.split(',').map(|c| to_class_name(c.trim())) {
        if !class.is_empty() {
            document.add_body_class(class);
        }
    }
}

/// Decoration helpers published for other plugins and block code.
#[derive(Debug, Default)]
pub struct DecoratorApi;

impl DecoratorApi {
    pub fn decorate_block(&self, block: &Arc<Block>, section: Option<&Section>) {
        decorate_block(block, section);
    }

    pub fn decorate_blocks(&self, main: &Main) {
        decorate_blocks(main);
    }

    pub fn decorate_sections(&self, main: &Main) {
        decorate_sections(main);
    }
}

#[derive(Debug, Default)]
pub struct DecoratorPlugin;

impl DecoratorPlugin {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Plugin for DecoratorPlugin {
    fn name(&self) -> &str {
        DECORATOR_PLUGIN
    }

    fn hooks(&self) -> HookSet {
        HookSet::of(&[Hook::PreEager, Hook::PostEager])
    }

    async fn pre_eager(&self, ctx: &HookCtx<'_>) -> LoaderResult<()> {
        add_metadata_classes(ctx.document, "template");
        add_metadata_classes(ctx.document, "theme");
        Ok(())
    }

    async fn post_eager(&self, ctx: &HookCtx<'_>) -> LoaderResult<()> {
        let main = ctx.document.main();
        decorate_sections(main);
        decorate_blocks(main);
        debug!(blocks = main.blocks().len(), "main content decorated");
        Ok(())
    }

    fn api(&self) -> Option<PluginApi> {
        Some(Arc::new(DecoratorApi))
    }
}

#[cfg(test)]
mod tests {
    use url::Url;

    use super::*;
    use crate::document::build_block;

    #[test]
    fn sections_take_metadata_and_hide() {
        let meta = build_block(
            "Section Metadata",
            vec![
                vec!["Style".into(), "Highlight, Dark Mode".into()],
                vec!["Background Color".into(), "blue".into()],
            ],
        );
        let hero = build_block("hero", Vec::new());
        let section = Section::new(vec![hero.clone(), meta]);
        let main = Main::new(vec![section.clone()], Vec::new());

        decorate_sections(&main);
        decorate_blocks(&main);

        assert_eq!(section.status(), Some(SectionStatus::Initialized));
        assert!(!section.is_visible());
        let classes = section.classes();
        for expected in ["section", "highlight", "dark-mode", "hero-container"] {
            assert!(classes.iter().any(|c| c == expected), "missing {expected}");
        }
        assert_eq!(
            section.data_attribute("backgroundColor").as_deref(),
            Some("blue")
        );
        assert_eq!(section.blocks().len(), 1);
        assert_eq!(hero.status(), BlockStatus::Initialized);
        assert_eq!(hero.data_attribute("block-name").as_deref(), Some("hero"));
        assert!(hero.has_class("block"));
    }

    #[test]
    fn template_and_theme_become_body_classes() {
        let doc = Document::builder(Url::parse("https://example.com/").unwrap())
            .metadata("template", "Article, Wide")
            .metadata("theme", "dark")
            .build();
        add_metadata_classes(&doc, "template");
        add_metadata_classes(&doc, "theme");
        assert_eq!(doc.body_classes(), vec!["article", "wide", "dark"]);
    }
}
