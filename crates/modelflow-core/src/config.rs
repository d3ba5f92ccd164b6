//! Pipeline configuration.
//!
//! Everything the pipeline builder needs about its surroundings (region,
//! bucket, names, instance type, callback timeout) lives in
//! [`PipelineConfig`] and is passed explicitly; nothing is read from
//! process-wide state after loading.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::domain::error::{PipelineError, Result};

/// Default callback wait, in seconds.
pub const DEFAULT_CALLBACK_TIMEOUT_SECS: u64 = 600;

/// Default instance type for model hosting and batch transform.
pub const DEFAULT_INSTANCE_TYPE: &str = "ml.m5.large";

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "MODELFLOW_";

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_instance_type() -> String {
    DEFAULT_INSTANCE_TYPE.to_string()
}

fn default_callback_timeout_secs() -> u64 {
    DEFAULT_CALLBACK_TIMEOUT_SECS
}

fn default_pipeline_name() -> String {
    "latest-model-batch-transform".to_string()
}

fn default_model_name_prefix() -> String {
    "latest-approved".to_string()
}

/// Configuration for building and running the batch-inference pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_region")]
    pub region: String,

    /// Artifact bucket; default data and output locations derive from it.
    #[serde(default)]
    pub bucket: String,

    #[serde(default = "default_pipeline_name")]
    pub pipeline_name: String,

    /// Model-package group the fetch node queries.
    #[serde(default)]
    pub model_package_group: String,

    #[serde(default = "default_instance_type")]
    pub instance_type: String,

    #[serde(default = "default_callback_timeout_secs")]
    pub callback_timeout_secs: u64,

    /// Default for the `BatchData` parameter (`s3://<bucket>/batch-data/input` when unset).
    #[serde(default)]
    pub batch_data: Option<String>,

    /// Where transform results go (`s3://<bucket>/batch-data/output` when unset).
    #[serde(default)]
    pub transform_output_prefix: Option<String>,

    #[serde(default = "default_model_name_prefix")]
    pub model_name_prefix: String,
}

impl PipelineConfig {
    pub fn new(bucket: impl Into<String>, model_package_group: impl Into<String>) -> Self {
        Self {
            region: default_region(),
            bucket: bucket.into(),
            pipeline_name: default_pipeline_name(),
            model_package_group: model_package_group.into(),
            instance_type: default_instance_type(),
            callback_timeout_secs: DEFAULT_CALLBACK_TIMEOUT_SECS,
            batch_data: None,
            transform_output_prefix: None,
            model_name_prefix: default_model_name_prefix(),
        }
    }

    pub fn with_callback_timeout_secs(mut self, secs: u64) -> Self {
        self.callback_timeout_secs = secs;
        self
    }

    /// Parse a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| PipelineError::Config(format!("invalid config: {}", e)))
    }

    /// Load a TOML file, apply `MODELFLOW_*` environment overrides and validate.
    pub fn load(path: &Path) -> Result<Self> {
        let config = Self::from_file(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Read a TOML file and apply `MODELFLOW_*` environment overrides.
    ///
    /// Not validated: `bucket` and `model_package_group` may still be empty
    /// until a later layer fills them in.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let mut config = Self::from_toml_str(&raw)?;
        config.apply_env()?;
        Ok(config)
    }

    /// Apply overrides from the process environment.
    ///
    /// Reads `MODELFLOW_REGION`, `MODELFLOW_BUCKET`, `MODELFLOW_PIPELINE_NAME`,
    /// `MODELFLOW_MODEL_PACKAGE_GROUP`, `MODELFLOW_INSTANCE_TYPE`,
    /// `MODELFLOW_CALLBACK_TIMEOUT_SECS`, `MODELFLOW_BATCH_DATA`.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(format!("{}{}", ENV_PREFIX, key)).ok())
    }

    /// Apply overrides from an arbitrary lookup keyed by the un-prefixed name.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("REGION") {
            self.region = v;
        }
        if let Some(v) = lookup("BUCKET") {
            self.bucket = v;
        }
        if let Some(v) = lookup("PIPELINE_NAME") {
            self.pipeline_name = v;
        }
        if let Some(v) = lookup("MODEL_PACKAGE_GROUP") {
            self.model_package_group = v;
        }
        if let Some(v) = lookup("INSTANCE_TYPE") {
            self.instance_type = v;
        }
        if let Some(v) = lookup("CALLBACK_TIMEOUT_SECS") {
            self.callback_timeout_secs = v.parse().map_err(|_| {
                PipelineError::Config(format!("CALLBACK_TIMEOUT_SECS is not a number: {}", v))
            })?;
        }
        if let Some(v) = lookup("BATCH_DATA") {
            self.batch_data = Some(v);
        }
        Ok(())
    }

    /// Reject configurations the builder cannot use.
    pub fn validate(&self) -> Result<()> {
        if self.bucket.trim().is_empty() {
            return Err(PipelineError::Config("bucket is empty".to_string()));
        }
        if self.model_package_group.trim().is_empty() {
            return Err(PipelineError::Config(
                "model_package_group is empty".to_string(),
            ));
        }
        if self.pipeline_name.trim().is_empty() {
            return Err(PipelineError::Config("pipeline_name is empty".to_string()));
        }
        if self.callback_timeout_secs == 0 {
            return Err(PipelineError::Config(
                "callback_timeout_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Default value of the `BatchData` parameter.
    pub fn batch_data_default(&self) -> String {
        self.batch_data
            .clone()
            .unwrap_or_else(|| format!("s3://{}/batch-data/input", self.bucket))
    }

    /// Prefix transform jobs write results under.
    pub fn transform_output(&self) -> String {
        self.transform_output_prefix
            .clone()
            .unwrap_or_else(|| format!("s3://{}/batch-data/output", self.bucket))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_from_minimal_toml() {
        let config = PipelineConfig::from_toml_str(
            r#"
            bucket = "ml-artifacts"
            model_package_group = "churn"
            "#,
        )
        .expect("parse");

        assert_eq!(config.region, "us-east-1");
        assert_eq!(config.instance_type, DEFAULT_INSTANCE_TYPE);
        assert_eq!(config.callback_timeout_secs, 600);
        assert_eq!(
            config.batch_data_default(),
            "s3://ml-artifacts/batch-data/input"
        );
        assert_eq!(
            config.transform_output(),
            "s3://ml-artifacts/batch-data/output"
        );
        config.validate().expect("valid");
    }

    #[test]
    fn test_missing_group_fails_validation() {
        let config = PipelineConfig::from_toml_str(r#"bucket = "b""#).expect("parse");
        assert_eq!(config.model_package_group, "");
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("model_package_group"));
    }

    #[test]
    fn test_overrides_fill_fields_missing_from_file() {
        let mut config =
            PipelineConfig::from_toml_str(r#"model_package_group = "g""#).expect("parse");
        assert!(config.validate().is_err());

        config
            .apply_overrides(|k| (k == "BUCKET").then(|| "from-override".to_string()))
            .expect("overrides");
        config.validate().expect("valid after overrides");
        assert_eq!(config.bucket, "from-override");
        assert_eq!(config.batch_data_default(), "s3://from-override/batch-data/input");
    }

    #[test]
    fn test_load_takes_bucket_from_env() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.toml");
        std::fs::write(&path, "model_package_group = \"g\"\n").unwrap();

        std::env::set_var("MODELFLOW_BUCKET", "from-env");
        let loaded = PipelineConfig::load(&path);
        std::env::remove_var("MODELFLOW_BUCKET");

        let config = loaded.expect("load");
        assert_eq!(config.bucket, "from-env");
        assert_eq!(config.model_package_group, "g");
    }

    #[test]
    fn test_overrides_apply() {
        let env: HashMap<&str, &str> = [
            ("REGION", "eu-west-1"),
            ("CALLBACK_TIMEOUT_SECS", "30"),
            ("BATCH_DATA", "s3://other/input"),
        ]
        .into_iter()
        .collect();

        let mut config = PipelineConfig::new("b", "g");
        config
            .apply_overrides(|k| env.get(k).map(|v| v.to_string()))
            .expect("overrides");

        assert_eq!(config.region, "eu-west-1");
        assert_eq!(config.callback_timeout_secs, 30);
        assert_eq!(config.batch_data_default(), "s3://other/input");
    }

    #[test]
    fn test_non_numeric_timeout_override_rejected() {
        let mut config = PipelineConfig::new("b", "g");
        let err = config
            .apply_overrides(|k| (k == "CALLBACK_TIMEOUT_SECS").then(|| "soon".to_string()))
            .unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }

    #[test]
    fn test_validate_rejects_zero_timeout_and_empty_group() {
        let config = PipelineConfig::new("b", "g").with_callback_timeout_secs(0);
        assert!(config.validate().is_err());

        let config = PipelineConfig::new("b", "  ");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.toml");
        std::fs::write(
            &path,
            "bucket = \"file-bucket\"\nmodel_package_group = \"fraud\"\ninstance_type = \"ml.c5.xlarge\"\n",
        )
        .unwrap();

        let config = PipelineConfig::load(&path).expect("load");
        assert_eq!(config.model_package_group, "fraud");
        assert_eq!(config.instance_type, "ml.c5.xlarge");
    }
}
