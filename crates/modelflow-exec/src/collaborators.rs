//! Seams to the services that host models and run batch transforms.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Inputs of a create-model call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateModelRequest {
    /// Run on whose behalf the model is created.
    pub run_id: String,

    /// Inference container image.
    pub image_uri: String,

    /// Location of the model artifact.
    pub model_data_url: String,

    pub instance_type: Option<String>,
}

/// Inputs of a batch transform call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformRequest {
    pub run_id: String,
    pub model_name: String,
    pub input_data_location: String,
    pub output_location: Option<String>,
    pub instance_type: Option<String>,
}

/// Handle of a finished transform job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformJob {
    pub job_name: String,
    pub output_location: String,
}

/// Registers a hosted model and returns its name.
#[async_trait]
pub trait ModelHost: Send + Sync {
    async fn create_model(&self, request: CreateModelRequest) -> anyhow::Result<String>;
}

/// Runs batch inference to completion.
#[async_trait]
pub trait BatchTransformer: Send + Sync {
    async fn run_transform(&self, request: TransformRequest) -> anyhow::Result<TransformJob>;
}
