//! JSON page descriptions: the already-parsed shape of a page, fed to the
//! loader in place of a live DOM.

use std::collections::BTreeMap;
use std::sync::Arc;

use pagekit_loader::{
    build_block, ContentDecoder, Document, Image, LoaderError, LoaderResult, MainContent, Section,
};
use serde::Deserialize;
use url::Url;

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct PageDescription {
    pub metadata: BTreeMap<String, MetaContent>,
    pub sections: Vec<SectionDescription>,
    pub images: Vec<ImageDescription>,
    pub header: bool,
    pub footer: bool,
}

/// One value, or several for repeated meta tags.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum MetaContent {
    One(String),
    Many(Vec<String>),
}

impl MetaContent {
    fn values(&self) -> &[String] {
        match self {
            MetaContent::One(value) => std::slice::from_ref(value),
            MetaContent::Many(values) => values,
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct SectionDescription {
    pub blocks: Vec<BlockDescription>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct BlockDescription {
    /// Authored block name, variants in parentheses: `Columns (wide)`.
    pub name: String,
    #[serde(default)]
    pub rows: Vec<Vec<String>>,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ImageOutcome {
    #[default]
    Loaded,
    Errored,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ImageDescription {
    pub src: String,
    #[serde(default)]
    pub outcome: ImageOutcome,
}

impl PageDescription {
    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }

    /// Builds the document. There is no network behind the images, so each
    /// one is settled up front with its described outcome.
    pub fn build_document(&self, url: Url, user_agent: &str, viewport_width: u32) -> Arc<Document> {
        let mut builder = Document::builder(url)
            .user_agent(user_agent)
            .viewport_width(viewport_width);
        for (name, content) in &self.metadata {
            for value in content.values() {
                builder = builder.metadata(name.clone(), value.clone());
            }
        }
        let content = self.main_content();
        for section in content.sections {
            builder = builder.section(section);
        }
        for image in content.images {
            builder = builder.image(image);
        }
        builder.build()
    }

    /// Fresh sections and settled images for main.
    pub fn main_content(&self) -> MainContent {
        let sections = self
            .sections
            .iter()
            .map(|section| {
                let blocks = section
                    .blocks
                    .iter()
                    .map(|block| build_block(&block.name, block.rows.clone()))
                    .collect();
                Section::new(blocks)
            })
            .collect();
        let images = self
            .images
            .iter()
            .map(|description| {
                let image = Image::new(description.src.clone());
                match description.outcome {
                    ImageOutcome::Loaded => image.mark_loaded(),
                    ImageOutcome::Errored => image.mark_errored(),
                }
                image
            })
            .collect();
        MainContent { sections, images }
    }
}

/// Reads experiment content pages (`*.plain.html`) as page descriptions.
/// Only the sections and images are used.
#[derive(Clone, Copy, Debug, Default)]
pub struct DescriptionDecoder;

impl ContentDecoder for DescriptionDecoder {
    fn decode(&self, raw: &str) -> LoaderResult<MainContent> {
        let description =
            PageDescription::from_json(raw).map_err(|err| LoaderError::Content(err.to_string()))?;
        Ok(description.main_content())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"{
        "metadata": {"template": "Article", "og:locale": ["en", "de"]},
        "sections": [
            {"blocks": [{"name": "Hero", "rows": [["Title", "Hello"]]}]},
            {"blocks": [
                {"name": "Columns (wide, dark)"},
                {"name": "Section Metadata", "rows": [["Style", "highlight"]]}
            ]}
        ],
        "images": [{"src": "/media/hero.jpg"}, {"src": "/media/broken.jpg", "outcome": "errored"}],
        "header": true
    }"#;

    #[test]
    fn description_builds_a_document() {
        let description = PageDescription::from_json(PAGE).unwrap();
        assert!(description.header);
        assert!(!description.footer);

        let url = Url::parse("https://example.com/article").unwrap();
        let document = description.build_document(url, "Mozilla/5.0", 390);
        assert_eq!(document.viewport_width(), 390);
        assert_eq!(document.get_metadata("template"), "Article");
        assert_eq!(document.get_metadata("og:locale"), "en, de");

        let sections = document.main().sections();
        assert_eq!(sections.len(), 2);
        let blocks = sections[1].blocks();
        assert_eq!(blocks[0].name(), "columns");
        assert!(blocks[0].has_class("wide"));
        assert_eq!(blocks[1].name(), "section-metadata");

        let image = document.main().first_image().unwrap();
        assert!(image.complete());
    }

    #[test]
    fn decoder_yields_fresh_sections_and_rejects_markup() {
        let content = DescriptionDecoder.decode(PAGE).unwrap();
        assert_eq!(content.sections.len(), 2);
        assert_eq!(content.sections[0].blocks()[0].name(), "hero");
        assert_eq!(content.images.len(), 2);
        assert!(content.images[1].complete());

        let err = DescriptionDecoder.decode("<div>not json</div>").err().unwrap();
        assert!(matches!(err, LoaderError::Content(_)));
    }

    #[test]
    fn empty_object_is_an_empty_page() {
        let description = PageDescription::from_json("{}").unwrap();
        assert!(description.sections.is_empty());
        assert!(!description.header);
    }
}
