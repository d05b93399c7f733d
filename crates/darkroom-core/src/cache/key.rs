//! Content-addressed cache keys for transformation results.

use blake3::Hasher as Blake3Hasher;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::CacheConfig;
use crate::spec::TransformSpec;

/// Object-store key of a transformation result:
/// `transformed/{sourceImageId}_{hash}.{targetFormat}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Derives [`CacheKey`]s from a source image id and a transform spec.
///
/// The digest is BLAKE3 over [`TransformSpec::canonical`], hex encoded and
/// truncated to `hash_len` characters. Truncation trades collision
/// resistance for short keys: at the default 12 characters (48 bits) an
/// accidental collision needs on the order of 2^24 distinct transforms of the
/// same source image. Uniqueness is never assumed from the key alone; the
/// record store enforces `(owner, key)` uniqueness.
#[derive(Debug, Clone)]
pub struct CacheKeyDeriver {
    hash_len: usize,
}

impl Default for CacheKeyDeriver {
    fn default() -> Self {
        Self::new(&CacheConfig::default())
    }
}

impl CacheKeyDeriver {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            hash_len: config.key_hash_len.clamp(8, 64),
        }
    }

    /// Derive the key for `(source_image_id, spec)`.
    ///
    /// Pure and deterministic. Callers on the request path pass a spec that
    /// already went through [`TransformSpec::with_format_fallback`].
    pub fn derive(&self, source_image_id: &str, spec: &TransformSpec) -> CacheKey {
        let hash = self.spec_hash(spec);
        CacheKey(format!(
            "transformed/{}_{}.{}",
            source_image_id,
            hash,
            spec.target_format()
        ))
    }

    /// Truncated hex digest of the spec's canonical form.
    pub fn spec_hash(&self, spec: &TransformSpec) -> String {
        let mut hasher = Blake3Hasher::new();
        hasher.update(spec.canonical().as_bytes());
        let mut hex = hasher.finalize().to_hex().to_string();
        hex.truncate(self.hash_len);
        hex
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::OutputFormat;

    const SOURCE: &str = "6f1c3a52-9d7e-4b8a-a1f0-2c4d5e6f7a8b";

    #[test]
    fn test_key_layout() {
        let spec = TransformSpec {
            format: Some(OutputFormat::Webp),
            ..Default::default()
        };
        let key = CacheKeyDeriver::default().derive(SOURCE, &spec);
        let s = key.as_str();
        assert!(s.starts_with(&format!("transformed/{SOURCE}_")));
        assert!(s.ends_with(".webp"));

        let hash = &s[format!("transformed/{SOURCE}_").len()..s.len() - ".webp".len()];
        assert_eq!(hash.len(), 12);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_derive_is_deterministic_across_field_order() {
        let deriver = CacheKeyDeriver::default();
        let a = TransformSpec::from_json(
            r#"{"format":"webp","resize":{"width":500,"height":400},"filters":{"sepia":true}}"#,
        )
        .unwrap();
        let b = TransformSpec::from_json(
            r#"{"filters":{"sepia":true},"resize":{"height":400,"width":500},"format":"webp"}"#,
        )
        .unwrap();
        assert_eq!(deriver.derive(SOURCE, &a), deriver.derive(SOURCE, &b));
    }

    #[test]
    fn test_defaulted_quality_hashes_identically() {
        let deriver = CacheKeyDeriver::default();
        let explicit =
            TransformSpec::from_json(r#"{"format":"jpeg","compress":{"quality":80}}"#).unwrap();
        let omitted = TransformSpec::from_json(r#"{"format":"jpeg"}"#).unwrap();
        assert_eq!(
            deriver.derive(SOURCE, &explicit),
            deriver.derive(SOURCE, &omitted)
        );
    }

    #[test]
    fn test_quality_only_keys_lossy_output() {
        let deriver = CacheKeyDeriver::default();
        let key = |json: &str| deriver.derive(SOURCE, &TransformSpec::from_json(json).unwrap());

        assert_eq!(
            key(r#"{"format":"webp","compress":{"quality":10}}"#),
            key(r#"{"format":"webp","compress":{"quality":95}}"#)
        );
        assert_ne!(
            key(r#"{"format":"jpeg","compress":{"quality":10}}"#),
            key(r#"{"format":"jpeg","compress":{"quality":95}}"#)
        );
    }

    #[test]
    fn test_source_id_and_spec_both_matter() {
        let deriver = CacheKeyDeriver::default();
        let spec = TransformSpec::from_json(r#"{"rotate":90,"format":"png"}"#).unwrap();
        let other = TransformSpec::from_json(r#"{"rotate":180,"format":"png"}"#).unwrap();
        assert_ne!(deriver.derive("a", &spec), deriver.derive("b", &spec));
        assert_ne!(deriver.derive("a", &spec), deriver.derive("a", &other));
    }

    #[test]
    fn test_hash_length_is_configurable() {
        let deriver = CacheKeyDeriver::new(&CacheConfig { key_hash_len: 32 });
        let hash = deriver.spec_hash(&TransformSpec::default());
        assert_eq!(hash.len(), 32);
        // A longer key extends the shorter one.
        assert!(hash.starts_with(&CacheKeyDeriver::default().spec_hash(&TransformSpec::default())));
    }
}
