use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq)]
pub struct Settings {
    pub page: PageSettings,
    pub experimentation: ExperimentationSettings,
    pub placeholders: PlaceholdersSettings,
    pub logging: LoggingSettings,
    #[serde(default)]
    pub provenance: BTreeMap<String, SettingsProvenance>,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq)]
pub struct PageSettings {
    pub code_base_path: String,
    pub delayed_duration_ms: u64,
    pub lcp_blocks: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq)]
pub struct ExperimentationSettings {
    pub enabled: bool,
    pub base_path: String,
    pub config_file: String,
    pub meta_tag: String,
    pub query_parameter: String,
    /// `VISITOR` or `DEVICE`.
    pub randomization_unit: String,
    pub identity_namespace: String,
    pub storage_key: String,
    /// JSON file backing assignments; in memory when unset.
    pub storage_path: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq)]
pub struct PlaceholdersSettings {
    pub enabled: bool,
    pub prefix: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq)]
pub struct LoggingSettings {
    pub filter: String,
    pub json: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SettingsProvenance {
    pub path: String,
    pub source: SettingSource,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum SettingSource {
    Builtin,
    File,
    Env,
    Cli,
}

impl Settings {
    pub fn set_provenance(&mut self, path: &str, source: SettingSource) {
        self.provenance.insert(
            path.to_string(),
            SettingsProvenance {
                path: path.to_string(),
                source,
            },
        );
    }

    pub fn source_of(&self, path: &str) -> Option<SettingSource> {
        self.provenance.get(path).map(|p| p.source)
    }
}
