//! Rewrites block resource paths for the variant a visitor runs.

use pagekit_loader::BlockConfig;
use url::Url;

use crate::plugin::ActiveExperiment;

/// Returns `config` with its paths pointing at the variant's code when the
/// running experiment covers this block and the variant overrides it.
///
/// The override position is looked up in the control's code list: the empty
/// entry first, then the block name, then `/blocks/<name>`.
pub fn patch_block_config(
    config: BlockConfig,
    experiment: Option<&ActiveExperiment>,
    page_origin: &str,
    code_base_path: &str,
) -> BlockConfig {
    let Some(experiment) = experiment.filter(|e| e.run) else {
        return config;
    };
    let Some(selected) = experiment.selected_variant.as_deref() else {
        return config;
    };
    let settings = &experiment.config;
    if settings.control() == Some(selected) || !settings.affects_block(&config.block_name) {
        return config;
    }
    let (Some(variant), Some(control)) = (settings.variants.get(selected), settings.control_variant()) else {
        return config;
    };
    if variant.code.is_empty() {
        return config;
    }

    let name = &config.block_name;
    let block_path = format!("/blocks/{name}");
    let Some(index) = control
        .code
        .iter()
        .position(|c| c.is_empty())
        .or_else(|| control.code.iter().position(|c| c == name))
        .or_else(|| control.code.iter().position(|c| *c == block_path))
    else {
        return config;
    };
    let Some(code) = variant.code.get(index) else {
        return config;
    };

    let (origin, path) = if code.starts_with("http://") || code.starts_with("https://") {
        match Url::parse(code) {
            Ok(url) => {
                let origin = url.origin().ascii_serialization();
                let origin = if origin == page_origin { String::new() } else { origin };
                let path = if url.path() == "/" {
                    block_path.clone()
                } else {
                    url.path().trim_end_matches('/').to_string()
                };
                (origin, path)
            }
            Err(_) => return config,
        }
    } else {
        (String::new(), code.clone())
    };
    if origin.is_empty() && path.is_empty() {
        return config;
    }

    BlockConfig {
        css_path: format!("{origin}{code_base_path}{path}/{name}.css"),
        js_path: format!("{origin}{code_base_path}{path}/{name}.js"),
        block_name: config.block_name,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::config::{ExperimentConfig, Variant};

    fn variant(code: &[&str]) -> Variant {
        Variant {
            label: None,
            percentage_split: String::new(),
            content: Vec::new(),
            code: code.iter().map(|c| c.to_string()).collect(),
        }
    }

    fn running(control_code: &[&str], variant_code: &[&str], selected: &str) -> ActiveExperiment {
        let mut variants = BTreeMap::new();
        variants.insert("control".to_string(), variant(control_code));
        variants.insert("challenger".to_string(), variant(variant_code));
        ActiveExperiment {
            config: ExperimentConfig {
                id: "hero-test".into(),
                label: None,
                audience: None,
                status: Some("active".into()),
                blocks: vec!["hero".into()],
                variant_names: vec!["control".into(), "challenger".into()],
                variants,
                manifest: "/experiments/hero-test/manifest.json".into(),
                base_path: "/experiments/hero-test".into(),
            },
            run: true,
            selected_variant: Some(selected.into()),
            forced: false,
        }
    }

    fn base(name: &str) -> BlockConfig {
        BlockConfig::conventional(name, "")
    }

    const ORIGIN: &str = "https://example.com";

    #[test]
    fn relative_override_replaces_the_path() {
        let exp = running(&[""], &["/experiments/hero-test/challenger"], "challenger");
        let patched = patch_block_config(base("hero"), Some(&exp), ORIGIN, "");
        assert_eq!(patched.js_path, "/experiments/hero-test/challenger/hero.js");
        assert_eq!(patched.css_path, "/experiments/hero-test/challenger/hero.css");
    }

    #[test]
    fn cross_origin_override_keeps_the_origin() {
        let exp = running(&["/blocks/hero"], &["https://branch--site.example.net/"], "challenger");
        let patched = patch_block_config(base("hero"), Some(&exp), ORIGIN, "/code");
        assert_eq!(
            patched.js_path,
            "https://branch--site.example.net/code/blocks/hero/hero.js"
        );
    }

    #[test]
    fn same_origin_absolute_override_drops_the_origin() {
        let exp = running(&["hero"], &["https://example.com/experiments/x"], "challenger");
        let patched = patch_block_config(base("hero"), Some(&exp), ORIGIN, "");
        assert_eq!(patched.js_path, "/experiments/x/hero.js");
    }

    #[test]
    fn untouched_when_not_applicable() {
        let exp = running(&[""], &["/x"], "control");
        assert_eq!(patch_block_config(base("hero"), Some(&exp), ORIGIN, ""), base("hero"));

        let exp = running(&[""], &["/x"], "challenger");
        assert_eq!(patch_block_config(base("cards"), Some(&exp), ORIGIN, ""), base("cards"));

        let exp = running(&["/blocks/other"], &["/x"], "challenger");
        assert_eq!(patch_block_config(base("hero"), Some(&exp), ORIGIN, ""), base("hero"));

        let exp = running(&[""], &[], "challenger");
        assert_eq!(patch_block_config(base("hero"), Some(&exp), ORIGIN, ""), base("hero"));

        let mut exp = running(&[""], &["/x"], "challenger");
        exp.run = false;
        assert_eq!(patch_block_config(base("hero"), Some(&exp), ORIGIN, ""), base("hero"));

        assert_eq!(patch_block_config(base("hero"), None, ORIGIN, ""), base("hero"));
    }
}
