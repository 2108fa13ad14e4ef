use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, ValueEnum};
use pagekit_experimentation::RandomizationUnit;
use pagekit_settings::Settings;

use super::{identity_context, parse_identity, print_json};
use crate::app::evaluate_manifest;

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum UnitArg {
    Visitor,
    Device,
}

impl From<UnitArg> for RandomizationUnit {
    fn from(value: UnitArg) -> Self {
        match value {
            UnitArg::Visitor => RandomizationUnit::Visitor,
            UnitArg::Device => RandomizationUnit::Device,
        }
    }
}

#[derive(Args, Clone, Debug)]
pub struct EvaluateArgs {
    /// Manifest JSON file
    #[arg(long, value_name = "FILE")]
    pub manifest: PathBuf,
    /// Experiment id the manifest belongs to
    #[arg(long)]
    pub experiment: String,
    /// Visitor identity, e.g. ECID=1234 (repeatable)
    #[arg(long = "identity", value_name = "NS=ID", value_parser = parse_identity)]
    pub identities: Vec<(String, String)>,
    /// Randomization unit; defaults to experimentation.randomization_unit
    #[arg(long, value_enum, ignore_case = true)]
    pub unit: Option<UnitArg>,
}

pub async fn cmd_evaluate(args: EvaluateArgs, settings: &Settings) -> Result<()> {
    let unit: RandomizationUnit = match args.unit {
        Some(unit) => unit.into(),
        None => settings.experimentation.randomization_unit.parse()?,
    };
    let outcome = evaluate_manifest(
        settings,
        &args.manifest,
        &args.experiment,
        unit,
        &identity_context(&args.identities),
    )
    .await?;
    print_json(&outcome)
}
