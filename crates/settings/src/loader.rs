use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::apply::apply_override;
use crate::defaults::default_settings;
use crate::errors::{SettingsError, SettingsResult};
use crate::model::{SettingSource, Settings};

const ENV_PREFIX: &str = "PAGEKIT__";
const ENV_JSON: &str = "PAGEKIT_OVERRIDE_JSON";

#[derive(Debug, Default)]
pub struct LoadOptions {
    pub paths: Vec<PathBuf>,
    pub include_env: bool,
    /// `path=value` pairs, applied last.
    pub cli_overrides: Vec<String>,
}

impl LoadOptions {
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            paths: vec![path.into()],
            include_env: true,
            cli_overrides: Vec::new(),
        }
    }
}

pub fn load_settings(path: Option<&Path>, cli_overrides: &[String]) -> SettingsResult<Settings> {
    let options = LoadOptions {
        paths: path.map(Path::to_path_buf).into_iter().collect(),
        include_env: true,
        cli_overrides: cli_overrides.to_vec(),
    };
    load_settings_with_options(&options)
}

pub fn load_settings_with_options(options: &LoadOptions) -> SettingsResult<Settings> {
    let mut settings = default_settings();
    bootstrap_builtin_provenance(&mut settings)?;

    for path in &options.paths {
        let overlays = overlays_from_file(path)?;
        debug!(path = %path.display(), keys = overlays.len(), "settings file applied");
        apply_overlays(&mut settings, overlays)?;
    }

    if options.include_env {
        let overlays = overlays_from_vars(env::vars())?;
        apply_overlays(&mut settings, overlays)?;
    }

    let mut cli = Vec::with_capacity(options.cli_overrides.len());
    for raw in &options.cli_overrides {
        let (path, value) = parse_override(raw)?;
        cli.push(SettingsOverlay {
            path,
            value,
            source: SettingSource::Cli,
        });
    }
    apply_overlays(&mut settings, cli)?;

    Ok(settings)
}

/// Splits `path=value`; the value goes through the same parsing as
/// environment values.
pub fn parse_override(raw: &str) -> SettingsResult<(String, Value)> {
    let (path, value) = raw
        .split_once('=')
        .ok_or_else(|| SettingsError::Invalid(format!("expected path=value, got {raw:?}")))?;
    let path = path.trim();
    if path.is_empty() {
        return Err(SettingsError::Invalid(format!("empty path in {raw:?}")));
    }
    Ok((path.to_ascii_lowercase(), parse_value(value.trim())))
}

struct SettingsOverlay {
    path: String,
    value: Value,
    source: SettingSource,
}

fn apply_overlays(settings: &mut Settings, overlays: Vec<SettingsOverlay>) -> SettingsResult<()> {
    for overlay in overlays {
        apply_override(settings, &overlay.path, &overlay.value, overlay.source)?;
    }
    Ok(())
}

fn overlays_from_file(path: &Path) -> SettingsResult<Vec<SettingsOverlay>> {
    let content = fs::read_to_string(path)
        .map_err(|err| SettingsError::Io(format!("{}: {err}", path.display())))?;
    let yaml_value: serde_yaml::Value =
        serde_yaml::from_str(&content).map_err(|err| SettingsError::Invalid(format!("{err}")))?;
    let json_value =
        serde_json::to_value(yaml_value).map_err(|err| SettingsError::Invalid(format!("{err}")))?;
    Ok(flatten_value(json_value, None, SettingSource::File))
}

/// Prefixed variables first, then the JSON blob, so the blob wins.
fn overlays_from_vars(
    vars: impl IntoIterator<Item = (String, String)>,
) -> SettingsResult<Vec<SettingsOverlay>> {
    let mut overlays = Vec::new();
    let mut json_blob = None;
    for (key, raw) in vars {
        if key == ENV_JSON {
            json_blob = Some(raw);
            continue;
        }
        let Some(stripped) = key.strip_prefix(ENV_PREFIX) else {
            continue;
        };
        let path = stripped
            .split("__")
            .filter(|segment| !segment.is_empty())
            .map(|segment| segment.to_ascii_lowercase())
            .collect::<Vec<_>>()
            .join(".");
        if path.is_empty() {
            continue;
        }
        overlays.push(SettingsOverlay {
            path,
            value: parse_value(&raw),
            source: SettingSource::Env,
        });
    }

    if let Some(raw_json) = json_blob.filter(|raw| !raw.trim().is_empty()) {
        let json_value: Value = serde_json::from_str(&raw_json)
            .map_err(|err| SettingsError::Invalid(format!("{ENV_JSON}: {err}")))?;
        overlays.extend(flatten_value(json_value, None, SettingSource::Env));
    }
    Ok(overlays)
}

fn parse_value(raw: &str) -> Value {
    if raw.is_empty() {
        return Value::Null;
    }
    if let Ok(parsed) = serde_json::from_str::<Value>(raw) {
        return parsed;
    }
    if let Ok(boolean) = raw.parse::<bool>() {
        return Value::Bool(boolean);
    }
    if let Ok(int_val) = raw.parse::<i64>() {
        return Value::Number(int_val.into());
    }
    Value::String(raw.to_string())
}

/// Objects become dotted paths; everything else, arrays included, is a leaf.
fn flatten_value(value: Value, prefix: Option<String>, source: SettingSource) -> Vec<SettingsOverlay> {
    match value {
        Value::Object(map) => {
            let mut result = Vec::new();
            for (key, value) in map {
                let key_segment = key.trim().to_ascii_lowercase();
                let next_prefix = match &prefix {
                    Some(prefix) if !prefix.is_empty() => format!("{prefix}.{key_segment}"),
                    _ => key_segment,
                };
                result.extend(flatten_value(value, Some(next_prefix), source));
            }
            result
        }
        other => match prefix {
            Some(path) => vec![SettingsOverlay {
                path,
                value: other,
                source,
            }],
            None => Vec::new(),
        },
    }
}

fn bootstrap_builtin_provenance(settings: &mut Settings) -> SettingsResult<()> {
    let sections = [
        ("page", serde_json::to_value(&settings.page)),
        ("experimentation", serde_json::to_value(&settings.experimentation)),
        ("placeholders", serde_json::to_value(&settings.placeholders)),
        ("logging", serde_json::to_value(&settings.logging)),
    ];
    let mut overlays = Vec::new();
    for (name, value) in sections {
        let value = value.map_err(|err| SettingsError::Invalid(format!("{err}")))?;
        overlays.extend(flatten_value(value, Some(name.into()), SettingSource::Builtin));
    }
    for overlay in overlays {
        settings.set_provenance(&overlay.path, overlay.source);
    }
    Ok(())
}
