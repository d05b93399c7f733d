//! Command implementations.

pub mod config;
pub mod execute;
pub mod key;
pub mod transform;
pub mod upload;

use anyhow::Context;
use darkroom_core::TransformSpec;
use std::path::Path;

/// Parse a `--spec` argument: inline JSON, or `@path` to read it from a file.
pub fn read_spec(arg: &str) -> anyhow::Result<TransformSpec> {
    let body = match arg.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(Path::new(path))
            .with_context(|| format!("Failed to read spec file {path}"))?,
        None => arg.to_string(),
    };
    TransformSpec::from_json(&body).context("Invalid transform spec")
}
