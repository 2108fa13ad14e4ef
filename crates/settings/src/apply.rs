use serde_json::Value;

use crate::errors::{SettingsError, SettingsResult};
use crate::model::{SettingSource, Settings};

/// Sets one dotted `path` and records where the value came from. Unknown
/// paths and mistyped values are rejected and leave `settings` untouched.
pub fn apply_override(
    settings: &mut Settings,
    path: &str,
    value: &Value,
    source: SettingSource,
) -> SettingsResult<()> {
    match path {
        "page.code_base_path" => {
            settings.page.code_base_path = to_string(path, value)?.trim_end_matches('/').to_string()
        }
        "page.delayed_duration_ms" => settings.page.delayed_duration_ms = to_u64(path, value)?,
        "page.lcp_blocks" => settings.page.lcp_blocks = to_list(path, value)?,
        "experimentation.enabled" => settings.experimentation.enabled = to_bool(path, value)?,
        "experimentation.base_path" => settings.experimentation.base_path = to_string(path, value)?,
        "experimentation.config_file" => {
            settings.experimentation.config_file = to_string(path, value)?
        }
        "experimentation.meta_tag" => settings.experimentation.meta_tag = to_string(path, value)?,
        "experimentation.query_parameter" => {
            settings.experimentation.query_parameter = to_string(path, value)?
        }
        "experimentation.randomization_unit" => {
            settings.experimentation.randomization_unit = to_unit(path, value)?
        }
        "experimentation.identity_namespace" => {
            settings.experimentation.identity_namespace = to_string(path, value)?
        }
        "experimentation.storage_key" => {
            settings.experimentation.storage_key = to_string(path, value)?
        }
        "experimentation.storage_path" => {
            settings.experimentation.storage_path = match value {
                Value::Null => None,
                other => Some(to_string(path, other)?),
            }
        }
        "placeholders.enabled" => settings.placeholders.enabled = to_bool(path, value)?,
        "placeholders.prefix" => settings.placeholders.prefix = to_string(path, value)?,
        "logging.filter" => settings.logging.filter = to_string(path, value)?,
        "logging.json" => settings.logging.json = to_bool(path, value)?,
        path => return Err(SettingsError::UnsupportedPath(path.to_string())),
    }
    settings.set_provenance(path, source);
    Ok(())
}

fn to_u64(path: &str, value: &Value) -> SettingsResult<u64> {
    value
        .as_u64()
        .ok_or_else(|| SettingsError::invalid_value(path, format!("expected non-negative integer, got {value}")))
}

fn to_bool(path: &str, value: &Value) -> SettingsResult<bool> {
    value
        .as_bool()
        .ok_or_else(|| SettingsError::invalid_value(path, format!("expected bool, got {value}")))
}

/// Strings, plus numbers and bools in their text form: `--set meta_tag=1`
/// parses as a number before it gets here.
fn to_string(path: &str, value: &Value) -> SettingsResult<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        other => Err(SettingsError::invalid_value(path, format!("expected string, got {other}"))),
    }
}

/// A JSON array of strings or a comma separated string.
fn to_list(path: &str, value: &Value) -> SettingsResult<Vec<String>> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => items.iter().map(|item| to_string(path, item)).collect(),
        Value::String(s) => Ok(s
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()),
        other => Err(SettingsError::invalid_value(path, format!("expected list, got {other}"))),
    }
}

fn to_unit(path: &str, value: &Value) -> SettingsResult<String> {
    let unit = to_string(path, value)?.to_ascii_uppercase();
    match unit.as_str() {
        "VISITOR" | "DEVICE" => Ok(unit),
        _ => Err(SettingsError::invalid_value(
            path,
            format!("expected VISITOR or DEVICE, got {unit}"),
        )),
    }
}
