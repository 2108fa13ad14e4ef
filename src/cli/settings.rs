use anyhow::Result;
use clap::Args;
use pagekit_settings::Settings;

use super::print_json;

#[derive(Args, Clone, Debug)]
pub struct SettingsArgs {
    /// Leave out per-key provenance
    #[arg(long)]
    pub no_provenance: bool,
}

pub async fn cmd_settings(args: SettingsArgs, settings: &Settings) -> Result<()> {
    if args.no_provenance {
        let mut settings = settings.clone();
        settings.provenance.clear();
        return print_json(&settings);
    }
    print_json(settings)
}
