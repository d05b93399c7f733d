//! The `darkroom key` command: print the cache key for a request.
//!
//! Pure derivation. Nothing is read from storage, so the source format the
//! fallback rule needs is taken from `--source-format`.

use clap::Args;
use darkroom_core::{CacheKeyDeriver, Config};
use serde::Serialize;
use uuid::Uuid;

use super::read_spec;

#[derive(Args, Debug)]
pub struct KeyArgs {
    /// Source image ID
    pub image_id: Uuid,

    /// Transform spec as JSON, or @file
    #[arg(long, short)]
    pub spec: String,

    /// Format of the source image, used when the spec names no format
    #[arg(long, default_value = "jpeg")]
    pub source_format: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct KeyReport {
    cache_key: String,
    spec_hash: String,
    canonical: String,
}

/// Execute the key command.
pub fn execute(args: KeyArgs, config: Config) -> anyhow::Result<()> {
    let spec = read_spec(&args.spec)?;
    spec.validate()?;
    let spec = spec.with_format_fallback(&args.source_format);

    let deriver = CacheKeyDeriver::new(&config.cache);
    let report = KeyReport {
        cache_key: deriver.derive(&args.image_id.to_string(), &spec).into_string(),
        spec_hash: deriver.spec_hash(&spec),
        canonical: spec.canonical(),
    };

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
