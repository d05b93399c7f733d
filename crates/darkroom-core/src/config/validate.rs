//! Configuration validation with range checks.

use crate::error::ConfigError;

use super::Config;

impl Config {
    /// Validate configuration values are within acceptable ranges.
    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if !(8..=64).contains(&self.cache.key_hash_len) {
            return Err(ConfigError::ValidationError(
                "cache.key_hash_len must be between 8 and 64".into(),
            ));
        }
        if self.storage.max_upload_bytes == 0 {
            return Err(ConfigError::ValidationError(
                "storage.max_upload_bytes must be > 0".into(),
            ));
        }
        if self.queue.name.is_empty() || self.queue.dead_letter_name.is_empty() {
            return Err(ConfigError::ValidationError(
                "queue.name and queue.dead_letter_name must be set".into(),
            ));
        }
        if self.queue.name == self.queue.dead_letter_name {
            return Err(ConfigError::ValidationError(
                "queue.dead_letter_name must differ from queue.name".into(),
            ));
        }
        if self.queue.prefetch == 0 {
            return Err(ConfigError::ValidationError(
                "queue.prefetch must be > 0".into(),
            ));
        }
        if self.worker.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "worker.max_attempts must be > 0".into(),
            ));
        }
        if !(self.pipeline.watermark_width_ratio > 0.0
            && self.pipeline.watermark_width_ratio <= 1.0)
        {
            return Err(ConfigError::ValidationError(
                "pipeline.watermark_width_ratio must be in (0.0, 1.0]".into(),
            ));
        }
        if self.pipeline.timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "pipeline.timeout_ms must be > 0".into(),
            ));
        }
        if self.pipeline.max_image_dimension == 0 {
            return Err(ConfigError::ValidationError(
                "pipeline.max_image_dimension must be > 0".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_passes_validation() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_prefetch() {
        let mut config = Config::default();
        config.queue.prefetch = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("prefetch"));
    }

    #[test]
    fn test_validate_rejects_zero_upload_limit() {
        let mut config = Config::default();
        config.storage.max_upload_bytes = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("max_upload_bytes"));
    }

    #[test]
    fn test_validate_rejects_zero_max_attempts() {
        let mut config = Config::default();
        config.worker.max_attempts = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("max_attempts"));
    }

    #[test]
    fn test_validate_rejects_shared_dead_letter_queue() {
        let mut config = Config::default();
        config.queue.dead_letter_name = config.queue.name.clone();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("dead_letter_name"));
    }

    #[test]
    fn test_validate_rejects_hash_len_out_of_range() {
        let mut config = Config::default();
        config.cache.key_hash_len = 65;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("key_hash_len"));
    }

    #[test]
    fn test_validate_rejects_bad_watermark_ratio() {
        let mut config = Config::default();
        config.pipeline.watermark_width_ratio = 1.5;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("watermark_width_ratio"));
    }
}
