use serde::Serialize;

use crate::plugin::{PageContext, PluginHost};

/// Resource paths of a block.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockConfig {
    pub block_name: String,
    pub css_path: String,
    pub js_path: String,
}

impl BlockConfig {
    /// `<base>/blocks/<name>/<name>.{css,js}`
    pub fn conventional(block_name: &str, code_base_path: &str) -> Self {
        Self {
            block_name: block_name.to_string(),
            css_path: format!("{code_base_path}/blocks/{block_name}/{block_name}.css"),
            js_path: format!("{code_base_path}/blocks/{block_name}/{block_name}.js"),
        }
    }
}

/// Starts from the conventional paths and lets every patching plugin rewrite
/// them, in registration order.
pub fn resolve_block_config(block_name: &str, host: &PluginHost, page: &PageContext) -> BlockConfig {
    let base = BlockConfig::conventional(block_name, page.code_base_path());
    host.snapshot()
        .iter()
        .filter(|entry| entry.plugin.patches_block_config())
        .fold(base, |config, entry| entry.plugin.patch_block_config(config, page))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use pagekit_core_types::StaticFetcher;
    use url::Url;

    use super::*;
    use crate::document::Document;
    use crate::plugin::{Plugin, Registration};

    struct Suffix(&'static str);

    #[async_trait]
    impl Plugin for Suffix {
        fn name(&self) -> &str {
            self.0
        }

        fn patches_block_config(&self) -> bool {
            true
        }

        fn patch_block_config(&self, mut config: BlockConfig, _page: &PageContext) -> BlockConfig {
            config.js_path.push_str(self.0);
            config
        }
    }

    struct Bystander;

    #[async_trait]
    impl Plugin for Bystander {
        fn name(&self) -> &str {
            "bystander"
        }
    }

    #[test]
    fn conventional_paths_use_code_base() {
        let config = BlockConfig::conventional("hero", "/code");
        assert_eq!(config.css_path, "/code/blocks/hero/hero.css");
        assert_eq!(config.js_path, "/code/blocks/hero/hero.js");
    }

    #[test]
    fn patchers_fold_in_registration_order() {
        let url = Url::parse("https://example.com/").unwrap();
        let doc = Document::builder(url.clone()).build();
        let page = PageContext::new(url, "", Arc::new(StaticFetcher::new()));
        let host = PluginHost::new();
        for plugin in [
            Arc::new(Suffix("?a")) as Arc<dyn Plugin>,
            Arc::new(Bystander),
            Arc::new(Suffix("&b")),
        ] {
            host.with_plugin(plugin, Registration::default(), &doc, &page);
        }
        let config = resolve_block_config("cards", &host, &page);
        assert_eq!(config.js_path, "/blocks/cards/cards.js?a&b");
        assert_eq!(config.css_path, "/blocks/cards/cards.css");
    }
}
