//! Experiment manifests: parsing, validation and loading.

use std::collections::BTreeMap;
use std::sync::Arc;

use pagekit_core_types::{to_camel_case, Fetcher};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use crate::errors::{ExperimentError, ExperimentResult};

pub const DEFAULT_BASE_PATH: &str = "/experiments";
pub const DEFAULT_CONFIG_FILE: &str = "manifest.json";

/// A sheet is either `{ "data": [...] }` or a bare array of rows.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Sheet<T> {
    Wrapped { data: Vec<T> },
    Bare(Vec<T>),
}

impl<T> Sheet<T> {
    fn into_rows(self) -> Vec<T> {
        match self {
            Sheet::Wrapped { data } => data,
            Sheet::Bare(rows) => rows,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SettingsRow {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Value", default)]
    value: Value,
}

#[derive(Debug, Deserialize)]
struct VariantRow {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Label", default)]
    label: Option<String>,
    #[serde(rename = "Split", default)]
    split: Value,
    #[serde(rename = "Pages", alias = "Page", default)]
    pages: Option<String>,
    #[serde(rename = "Blocks", alias = "Block", default)]
    blocks: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Manifest {
    settings: Sheet<SettingsRow>,
    variants: Sheet<VariantRow>,
}

fn cell_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Parser output before validation. Custom parsers may leave fields unset;
/// validation decides whether the result is usable.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawExperimentConfig {
    pub label: Option<String>,
    pub audience: Option<String>,
    pub status: Option<String>,
    #[serde(default)]
    pub blocks: Vec<String>,
    #[serde(default)]
    pub variant_names: Vec<String>,
    #[serde(default)]
    pub variants: BTreeMap<String, RawVariant>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawVariant {
    pub label: Option<String>,
    pub percentage_split: Option<String>,
    pub content: Option<Vec<String>>,
    pub code: Option<Vec<String>>,
}

/// Turns a fetched manifest into a raw config.
pub trait ManifestParser: Send + Sync {
    fn parse(&self, manifest: &Value) -> ExperimentResult<RawExperimentConfig>;
}

/// Reads the `settings` and `variants` sheets.
#[derive(Clone, Copy, Debug, Default)]
pub struct SheetManifestParser;

impl ManifestParser for SheetManifestParser {
    fn parse(&self, manifest: &Value) -> ExperimentResult<RawExperimentConfig> {
        let manifest: Manifest = from_value(manifest)?;
        let mut config = RawExperimentConfig::default();

        for row in manifest.settings.into_rows() {
            let value = cell_text(&row.value);
            match to_camel_case(&row.name).as_str() {
                "audience" => config.audience = value,
                "status" => config.status = value,
                "experimentName" => config.label = value,
                "blocks" => {
                    config.blocks = value
                        .unwrap_or_default()
                        .split([',', '\n'])
                        .map(str::trim)
                        .filter(|b| !b.is_empty())
                        .map(str::to_string)
                        .collect();
                }
                _ => {}
            }
        }

        for row in manifest.variants.into_rows() {
            let name = to_camel_case(&row.name);
            config.variant_names.push(name.clone());
            config.variants.insert(
                name,
                RawVariant {
                    label: row.label,
                    percentage_split: Some(cell_text(&row.split).unwrap_or_default()),
                    content: Some(split_list(row.pages.as_deref())),
                    code: Some(split_list(row.blocks.as_deref())),
                },
            );
        }
        Ok(config)
    }
}

fn from_value<T: DeserializeOwned>(value: &Value) -> ExperimentResult<T> {
    T::deserialize(value).map_err(|err| ExperimentError::invalid(format!("manifest shape: {err}")))
}

/// Comma separated cell. Empty items are kept: an empty code entry marks the
/// default position.
fn split_list(cell: Option<&str>) -> Vec<String> {
    match cell.map(str::trim) {
        None | Some("") => Vec::new(),
        Some(cell) => cell.split(',').map(|item| item.trim().to_string()).collect(),
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Variant {
    pub label: Option<String>,
    pub percentage_split: String,
    pub content: Vec<String>,
    pub code: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentConfig {
    pub id: String,
    pub label: Option<String>,
    pub audience: Option<String>,
    pub status: Option<String>,
    pub blocks: Vec<String>,
    /// Index 0 is the control.
    pub variant_names: Vec<String>,
    pub variants: BTreeMap<String, Variant>,
    pub manifest: String,
    pub base_path: String,
}

impl RawExperimentConfig {
    /// Every variant needs `code`, `content` and a split that is empty or
    /// numeric.
    pub fn validate(self, id: &str, manifest: &str, base_path: &str) -> ExperimentResult<ExperimentConfig> {
        if self.variant_names.is_empty() || self.variants.is_empty() {
            return Err(ExperimentError::invalid(format!("{id}: no variants")));
        }
        let mut variants = BTreeMap::new();
        for (name, raw) in self.variants {
            let (Some(code), Some(content)) = (raw.code, raw.content) else {
                return Err(ExperimentError::invalid(format!(
                    "{id}: variant {name} is missing code or content"
                )));
            };
            let Some(split) = raw.percentage_split else {
                return Err(ExperimentError::invalid(format!(
                    "{id}: variant {name} has no split"
                )));
            };
            let split = split.trim().to_string();
            if !split.is_empty() && split.parse::<f64>().is_err() {
                return Err(ExperimentError::invalid(format!(
                    "{id}: variant {name} has non-numeric split {split:?}"
                )));
            }
            variants.insert(
                name,
                Variant {
                    label: raw.label,
                    percentage_split: split,
                    content,
                    code,
                },
            );
        }
        if let Some(missing) = self.variant_names.iter().find(|n| !variants.contains_key(*n)) {
            return Err(ExperimentError::invalid(format!(
                "{id}: variant {missing} is listed but not defined"
            )));
        }
        Ok(ExperimentConfig {
            id: id.to_string(),
            label: self.label,
            audience: self.audience,
            status: self.status,
            blocks: self.blocks,
            variant_names: self.variant_names,
            variants,
            manifest: manifest.to_string(),
            base_path: base_path.to_string(),
        })
    }
}

impl ExperimentConfig {
    pub fn control(&self) -> Option<&str> {
        self.variant_names.first().map(String::as_str)
    }

    pub fn control_variant(&self) -> Option<&Variant> {
        self.control().and_then(|name| self.variants.get(name))
    }

    pub fn is_active(&self) -> bool {
        self.status
            .as_deref()
            .map(|status| to_camel_case(status) == "active")
            .unwrap_or(false)
    }

    pub fn affects_block(&self, block_name: &str) -> bool {
        self.blocks.iter().any(|b| b == block_name)
    }

    /// `(variant, percentage)` in variant order. Splits up to 1 are
    /// fractions, larger ones percentages. Variants with an empty split share
    /// what the explicit splits leave of 100, never below 0.
    pub fn allocation_percentages(&self) -> Vec<(String, f64)> {
        let explicit: Vec<Option<f64>> = self
            .variant_names
            .iter()
            .map(|name| {
                let split = self.variants.get(name)?.percentage_split.trim();
                let value = split.parse::<f64>().ok()?;
                Some(if value <= 1.0 { value * 100.0 } else { value })
            })
            .collect();
        let assigned: f64 = explicit.iter().flatten().sum();
        let open = explicit.iter().filter(|v| v.is_none()).count();
        let remainder = if open == 0 {
            0.0
        } else {
            (100.0 - assigned).max(0.0) / open as f64
        };
        self.variant_names
            .iter()
            .zip(explicit)
            .map(|(name, value)| (name.clone(), value.unwrap_or(remainder)))
            .collect()
    }
}

/// Fetches `<base_path>/<id>/<config_file>` and validates it.
pub struct ExperimentConfigLoader {
    fetcher: Arc<dyn Fetcher>,
    parser: Arc<dyn ManifestParser>,
    origin: Option<Url>,
}

impl ExperimentConfigLoader {
    pub fn new(fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            fetcher,
            parser: Arc::new(SheetManifestParser),
            origin: None,
        }
    }

    pub fn with_parser(mut self, parser: Arc<dyn ManifestParser>) -> Self {
        self.parser = parser;
        self
    }

    /// Resolve manifest paths against `origin` before fetching.
    pub fn with_origin(mut self, origin: Url) -> Self {
        self.origin = Some(origin);
        self
    }

    /// `Ok(None)` when the manifest cannot be fetched or read; `Err` when it
    /// parses but does not describe a usable experiment.
    pub async fn load(
        &self,
        experiment_id: &str,
        base_path: &str,
        config_file: &str,
    ) -> ExperimentResult<Option<ExperimentConfig>> {
        let path = format!("{base_path}/{experiment_id}/{config_file}");
        let url = match &self.origin {
            Some(origin) => origin
                .join(&path)
                .map(|u| u.to_string())
                .unwrap_or_else(|_| path.clone()),
            None => path.clone(),
        };

        let response = match self.fetcher.fetch(&url).await {
            Ok(response) => response,
            Err(err) => {
                warn!(experiment = %experiment_id, error = %err, "error loading experiment manifest");
                return Ok(None);
            }
        };
        if !response.ok() {
            warn!(experiment = %experiment_id, status = response.status, url = %url, "error loading experiment config");
            return Ok(None);
        }
        let json: Value = match response.json() {
            Ok(json) => json,
            Err(err) => {
                warn!(experiment = %experiment_id, error = %err, "experiment manifest is not json");
                return Ok(None);
            }
        };

        let raw = self.parser.parse(&json)?;
        let config = raw.validate(experiment_id, &path, &format!("{base_path}/{experiment_id}"))?;
        debug!(experiment = %experiment_id, variants = config.variant_names.len(), "experiment config loaded");
        Ok(Some(config))
    }
}

#[cfg(test)]
mod tests {
    use pagekit_core_types::StaticFetcher;
    use serde_json::json;

    use super::*;

    fn parse(value: Value) -> RawExperimentConfig {
        SheetManifestParser.parse(&value).unwrap()
    }

    #[test]
    fn parses_wrapped_and_bare_sheets() {
        let wrapped = parse(json!({
            "settings": {"data": [
                {"Name": "Experiment Name", "Value": "Hero test"},
                {"Name": "Status", "Value": "Active"},
                {"Name": "Audience", "Value": "Desktop"},
                {"Name": "Blocks", "Value": "hero, cards\nfooter"}
            ]},
            "variants": {"data": [
                {"Name": "control", "Split": "", "Pages": "/a", "Blocks": ",/blocks/hero"},
                {"Name": "challenger-1", "Label": "C1", "Split": "0.5", "Page": "/b", "Block": "/experiments/hero-test/c1,"}
            ]}
        }));
        assert_eq!(wrapped.label.as_deref(), Some("Hero test"));
        assert_eq!(wrapped.blocks, vec!["hero", "cards", "footer"]);
        assert_eq!(wrapped.variant_names, vec!["control", "challenger-1"]);
        let control = &wrapped.variants["control"];
        assert_eq!(control.code.as_deref(), Some(&["".to_string(), "/blocks/hero".to_string()][..]));
        let challenger = &wrapped.variants["challenger-1"];
        assert_eq!(challenger.content.as_deref(), Some(&["/b".to_string()][..]));
        assert_eq!(challenger.percentage_split.as_deref(), Some("0.5"));

        let bare = parse(json!({
            "settings": [{"Name": "Status", "Value": "active"}],
            "variants": [{"Name": "control", "Split": ""}]
        }));
        assert_eq!(bare.status.as_deref(), Some("active"));
        assert_eq!(bare.variants["control"].content.as_deref(), Some(&[][..]));
    }

    #[test]
    fn empty_split_takes_the_remainder() {
        let raw = parse(json!({
            "settings": [{"Name": "Status", "Value": "active"}],
            "variants": [
                {"Name": "control", "Split": "", "Pages": "/a"},
                {"Name": "v1", "Split": "50", "Pages": "/b"}
            ]
        }));
        let config = raw.validate("exp", "/experiments/exp/manifest.json", "/experiments/exp").unwrap();
        assert_eq!(
            config.allocation_percentages(),
            vec![("control".to_string(), 50.0), ("v1".to_string(), 50.0)]
        );
        assert!(config.is_active());
    }

    #[test]
    fn fractional_splits_become_percentages() {
        let raw = parse(json!({
            "settings": [],
            "variants": [
                {"Name": "control", "Split": ""},
                {"Name": "a", "Split": "0.25"},
                {"Name": "b", "Split": 0.6}
            ]
        }));
        let config = raw.validate("exp", "m", "b").unwrap();
        let pct: Vec<f64> = config.allocation_percentages().into_iter().map(|(_, p)| p).collect();
        assert!((pct[0] - 15.0).abs() < 1e-9);
        assert_eq!(pct[1], 25.0);
        assert!((pct[2] - 60.0).abs() < 1e-9);
        assert!(!config.is_active());
    }

    #[test]
    fn remainder_never_goes_negative() {
        let raw = parse(json!({
            "settings": [],
            "variants": [
                {"Name": "control", "Split": ""},
                {"Name": "a", "Split": "80"},
                {"Name": "b", "Split": "40"}
            ]
        }));
        let config = raw.validate("exp", "m", "b").unwrap();
        assert_eq!(config.allocation_percentages()[0].1, 0.0);
    }

    #[test]
    fn validation_rejects_incomplete_variants() {
        let mut raw = RawExperimentConfig::default();
        assert!(matches!(raw.clone().validate("x", "m", "b"), Err(ExperimentError::InvalidConfig(_))));

        raw.variant_names.push("control".into());
        raw.variants.insert(
            "control".into(),
            RawVariant {
                percentage_split: Some(String::new()),
                content: Some(Vec::new()),
                code: None,
                ..RawVariant::default()
            },
        );
        assert!(raw.clone().validate("x", "m", "b").is_err());

        let variant = raw.variants.get_mut("control").unwrap();
        variant.code = Some(Vec::new());
        variant.percentage_split = Some("half".into());
        assert!(raw.clone().validate("x", "m", "b").is_err());

        raw.variants.get_mut("control").unwrap().percentage_split = Some("".into());
        assert!(raw.validate("x", "m", "b").is_ok());
    }

    #[tokio::test]
    async fn loader_distinguishes_missing_from_invalid() {
        let fetcher = Arc::new(
            StaticFetcher::new()
                .with(
                    "https://example.com/experiments/good/manifest.json",
                    r#"{"settings":[{"Name":"Status","Value":"active"}],"variants":[{"Name":"control","Split":""}]}"#,
                )
                .with("https://example.com/experiments/empty/manifest.json", r#"{"settings":[],"variants":[]}"#)
                .with("https://example.com/experiments/garbled/manifest.json", "not json"),
        );
        let loader =
            ExperimentConfigLoader::new(fetcher).with_origin(Url::parse("https://example.com/").unwrap());

        let good = loader.load("good", DEFAULT_BASE_PATH, DEFAULT_CONFIG_FILE).await.unwrap().unwrap();
        assert_eq!(good.manifest, "/experiments/good/manifest.json");
        assert_eq!(good.base_path, "/experiments/good");

        assert!(loader.load("absent", DEFAULT_BASE_PATH, DEFAULT_CONFIG_FILE).await.unwrap().is_none());
        assert!(loader.load("garbled", DEFAULT_BASE_PATH, DEFAULT_CONFIG_FILE).await.unwrap().is_none());
        assert!(matches!(
            loader.load("empty", DEFAULT_BASE_PATH, DEFAULT_CONFIG_FILE).await,
            Err(ExperimentError::InvalidConfig(_))
        ));
    }
}
