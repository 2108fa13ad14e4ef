//! Built-in plugin loading the placeholders sheet in the lazy phase.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use pagekit_core_types::{to_camel_case, PageError};
use parking_lot::{Mutex, RwLock};
use serde::Deserialize;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::errors::LoaderResult;
use crate::plugin::{Hook, HookCtx, HookSet, PageContext, Plugin, PluginApi};

pub const PLACEHOLDERS_PLUGIN: &str = "placeholders";
pub const DEFAULT_PREFIX: &str = "default";

pub type Placeholders = BTreeMap<String, String>;

#[derive(Debug, Deserialize)]
struct Sheet {
    #[serde(default)]
    data: Vec<Row>,
}

#[derive(Debug, Deserialize)]
struct Row {
    #[serde(rename = "Key", default)]
    key: Option<String>,
    #[serde(rename = "Text", default)]
    text: Option<String>,
}

/// `<prefix>/placeholders.json`, with the `default` prefix mapping to the
/// site root.
pub fn placeholders_path(prefix: &str) -> String {
    let prefix = if prefix == DEFAULT_PREFIX { "" } else { prefix };
    format!("{prefix}/placeholders.json")
}

/// Placeholders most recently loaded by the plugin.
#[derive(Debug, Default)]
pub struct PlaceholdersApi {
    current: RwLock<Placeholders>,
}

impl PlaceholdersApi {
    pub fn placeholders(&self) -> Placeholders {
        self.current.read().clone()
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.current.read().get(key).cloned()
    }
}

pub struct PlaceholdersPlugin {
    prefix: String,
    api: Arc<PlaceholdersApi>,
    cache: Mutex<HashMap<String, Arc<OnceCell<Placeholders>>>>,
}

impl PlaceholdersPlugin {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            api: Arc::new(PlaceholdersApi::default()),
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn api_handle(&self) -> Arc<PlaceholdersApi> {
        Arc::clone(&self.api)
    }

    /// Loads the sheet for `prefix` once; later calls share the result.
    /// Any failure yields an empty map.
    pub async fn fetch_placeholders(&self, prefix: &str, page: &PageContext) -> Placeholders {
        let cell = {
            let mut cache = self.cache.lock();
            Arc::clone(cache.entry(prefix.to_string()).or_default())
        };
        cell.get_or_init(|| async {
            match load_sheet(prefix, page).await {
                Ok(map) => map,
                Err(err) => {
                    warn!(prefix, error = %err, "failed to load placeholders");
                    Placeholders::new()
                }
            }
        })
        .await
        .clone()
    }
}

impl Default for PlaceholdersPlugin {
    fn default() -> Self {
        Self::new(DEFAULT_PREFIX)
    }
}

async fn load_sheet(prefix: &str, page: &PageContext) -> Result<Placeholders, PageError> {
    let url = page.absolute_url(&placeholders_path(prefix));
    let response = page.fetcher().fetch(&url).await?;
    if !response.ok() {
        return Err(PageError::fetch(url, format!("status {}", response.status)));
    }
    let sheet: Sheet = response.json()?;
    let map: Placeholders = sheet
        .data
        .into_iter()
        .filter_map(|row| match row.key {
            Some(key) if !key.is_empty() => Some((to_camel_case(&key), row.text.unwrap_or_default())),
            _ => None,
        })
        .collect();
    debug!(prefix, count = map.len(), "placeholders loaded");
    Ok(map)
}

#[async_trait]
impl Plugin for PlaceholdersPlugin {
    fn name(&self) -> &str {
        PLACEHOLDERS_PLUGIN
    }

    fn hooks(&self) -> HookSet {
        HookSet::of(&[Hook::PreLazy])
    }

    async fn pre_lazy(&self, ctx: &HookCtx<'_>) -> LoaderResult<()> {
        let prefix = ctx
            .options
            .get_str("prefix")
            .unwrap_or(&self.prefix)
            .to_string();
        let loaded = self.fetch_placeholders(&prefix, ctx.page).await;
        *self.api.current.write() = loaded;
        Ok(())
    }

    fn api(&self) -> Option<PluginApi> {
        Some(self.api_handle())
    }
}
