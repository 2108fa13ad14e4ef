use anyhow::Result;
use clap::Args;
use pagekit_experimentation::{get_bucket, murmurhash3_32_gc};
use serde_json::json;

use super::print_json;

#[derive(Args, Clone, Debug)]
pub struct BucketArgs {
    /// Salted id, usually `<experiment>.<identity>`
    pub key: String,
}

pub async fn cmd_bucket(args: BucketArgs) -> Result<()> {
    print_json(&json!({
        "key": args.key,
        "hash": murmurhash3_32_gc(&args.key, 0),
        "bucket": get_bucket(&args.key),
    }))
}
