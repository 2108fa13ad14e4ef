use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use pagekit_settings::Settings;
use url::Url;

use super::{identity_context, parse_identity, print_json};
use crate::app::{run_page_load, PageRequest, Source};

#[derive(Args, Clone, Debug)]
pub struct LoadArgs {
    /// JSON page description
    #[arg(long, value_name = "FILE")]
    pub page: PathBuf,
    /// URL the page is served at
    #[arg(long)]
    pub url: Url,
    /// Serve resources from this site directory
    #[arg(long, value_name = "DIR", conflicts_with = "origin")]
    pub root: Option<PathBuf>,
    /// Fetch resources from this origin instead of the page's
    #[arg(long)]
    pub origin: Option<Url>,
    /// Visitor identity, e.g. ECID=1234 (repeatable)
    #[arg(long = "identity", value_name = "NS=ID", value_parser = parse_identity)]
    pub identities: Vec<(String, String)>,
    /// Viewport width in pixels
    #[arg(long, default_value_t = 1280)]
    pub width: u32,
    /// User agent reported to plugins
    #[arg(long, default_value = "Mozilla/5.0 (X11; Linux x86_64) pagekit")]
    pub user_agent: String,
}

pub async fn cmd_load(args: LoadArgs, settings: &Settings) -> Result<()> {
    let source = match args.root {
        Some(root) => Source::Dir(root),
        None => Source::Http(args.origin),
    };
    let request = PageRequest {
        page: args.page,
        url: args.url,
        source,
        context: identity_context(&args.identities),
        viewport_width: args.width,
        user_agent: args.user_agent,
    };
    let outcome = run_page_load(settings, request).await?;
    print_json(&outcome)
}
