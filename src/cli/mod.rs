pub mod bucket;
pub mod evaluate;
pub mod load;
pub mod settings;

pub use bucket::{cmd_bucket, BucketArgs};
pub use evaluate::{cmd_evaluate, EvaluateArgs};
pub use load::{cmd_load, LoadArgs};
pub use settings::{cmd_settings, SettingsArgs};

use pagekit_experimentation::DecisionContext;

/// Parses `NAMESPACE=ID`.
pub fn parse_identity(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((namespace, id)) if !namespace.trim().is_empty() && !id.trim().is_empty() => {
            Ok((namespace.trim().to_string(), id.trim().to_string()))
        }
        _ => Err(format!("expected NAMESPACE=ID, got {raw:?}")),
    }
}

pub fn identity_context(identities: &[(String, String)]) -> DecisionContext {
    identities
        .iter()
        .fold(DecisionContext::new(), |context, (namespace, id)| {
            context.with_identity(namespace.clone(), id.clone())
        })
}

pub(crate) fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
