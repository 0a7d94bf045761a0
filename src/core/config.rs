use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Result, ShrMapError};

pub const DEFAULT_MAPPING_IDENTITY: &str = "shr";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CompilerConfig {
    /// Mapping identity whose annotations are compiled.
    pub mapping_identity: String,
    /// Treat a discriminator element with several distinct fixed values as unresolved.
    pub strict_discriminators: bool,
    /// Emit `resourceType` for entry elements.
    pub emit_resource_type: bool,
    pub container_promotion: bool,
    /// Emit value pass-through plans for elements without a profile.
    pub value_fallback: bool,
    pub performance: PerformanceConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PerformanceConfig {
    pub max_concurrent_compilations: usize,
    /// Elements compiled per blocking task.
    pub batch_size: usize,
    pub cache_plans: bool,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            mapping_identity: DEFAULT_MAPPING_IDENTITY.to_string(),
            strict_discriminators: true,
            emit_resource_type: true,
            container_promotion: true,
            value_fallback: true,
            performance: PerformanceConfig::default(),
        }
    }
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            max_concurrent_compilations: num_cpus::get().max(1),
            batch_size: 32,
            cache_plans: true,
        }
    }
}

impl CompilerConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.mapping_identity.trim().is_empty() {
            return Err(ShrMapError::configuration("mapping identity must not be empty"));
        }
        if self.performance.max_concurrent_compilations == 0 {
            return Err(ShrMapError::configuration(
                "max concurrent compilations must be at least 1",
            ));
        }
        if self.performance.batch_size == 0 {
            return Err(ShrMapError::configuration("batch size must be at least 1"));
        }
        Ok(())
    }

    pub fn with_mapping_identity(mut self, identity: impl Into<String>) -> Self {
        self.mapping_identity = identity.into();
        self
    }

    pub fn with_strict_discriminators(mut self, strict: bool) -> Self {
        self.strict_discriminators = strict;
        self
    }

    pub fn with_container_promotion(mut self, enabled: bool) -> Self {
        self.container_promotion = enabled;
        self
    }

    pub fn with_value_fallback(mut self, enabled: bool) -> Self {
        self.value_fallback = enabled;
        self
    }

    pub fn with_max_concurrency(mut self, workers: usize) -> Self {
        self.performance.max_concurrent_compilations = workers;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.performance.batch_size = batch_size;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = CompilerConfig::default();
        assert_eq!(config.mapping_identity, "shr");
        assert!(config.performance.max_concurrent_compilations >= 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: CompilerConfig =
            serde_json::from_str(r#"{"mappingIdentity": "cimi", "containerPromotion": false}"#)
                .unwrap();
        assert_eq!(config.mapping_identity, "cimi");
        assert!(!config.container_promotion);
        assert!(config.strict_discriminators);
    }

    #[test]
    fn test_invalid_config_rejected() {
        assert!(CompilerConfig::default().with_max_concurrency(0).validate().is_err());
        assert!(
            CompilerConfig::default()
                .with_mapping_identity(" ")
                .validate()
                .is_err()
        );
    }
}
