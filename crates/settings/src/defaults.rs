use crate::model::{
    ExperimentationSettings, LoggingSettings, PageSettings, PlaceholdersSettings, Settings,
};

pub fn default_settings() -> Settings {
    Settings {
        page: PageSettings {
            code_base_path: String::new(),
            delayed_duration_ms: 3_000,
            lcp_blocks: Vec::new(),
        },
        experimentation: ExperimentationSettings {
            enabled: true,
            base_path: "/experiments".into(),
            config_file: "manifest.json".into(),
            meta_tag: "experiment".into(),
            query_parameter: "experiment".into(),
            randomization_unit: "DEVICE".into(),
            identity_namespace: "ECID".into(),
            storage_key: "unified-decisioning-experiments".into(),
            storage_path: None,
        },
        placeholders: PlaceholdersSettings {
            enabled: true,
            prefix: "default".into(),
        },
        logging: LoggingSettings {
            filter: "info".into(),
            json: false,
        },
        provenance: Default::default(),
    }
}
