//! modelflow Core Library
//!
//! Latest-approved model selection and the static fetch → create-model →
//! transform pipeline topology, plus the callback, configuration, recording
//! and observability pieces the executor builds on.

pub mod callback;
pub mod config;
pub mod definition;
pub mod domain;
pub mod obs;
pub mod recording;
pub mod selector;
pub mod telemetry;

pub use callback::{
    CallbackBroker, CallbackInvoker, CallbackOutcome, CallbackRequest, CallbackToken,
    PendingCallback, SignalError,
};
pub use config::{PipelineConfig, DEFAULT_CALLBACK_TIMEOUT_SECS, DEFAULT_INSTANCE_TYPE};
pub use definition::{
    batch_data_parameter, standard_node_specs, standard_pipeline, PipelineBuilder,
    PipelineDefinition, BATCH_DATA_PARAM, CREATE_MODEL_NODE, FETCH_NODE, IMAGE_URI_OUTPUT,
    MODEL_NAME_OUTPUT, MODEL_URL_OUTPUT, TRANSFORM_NODE,
};
pub use domain::{
    Edge, ErrorKind, Event, EventKind, InputBinding, NodeId, NodeKind, NodeSpec, OutputDecl,
    OutputRef, OutputType, PipelineError, PipelineNode, PipelineParameter, ResolvedInput, Result,
};
pub use recording::RunRecorder;
pub use selector::{
    callback_outputs, pick_latest_approved, FetchLatestModelHandler, RegistrySelector,
};
pub use telemetry::init_tracing;

pub use modelflow_state::{ApprovalStatus, ModelPackageRecord, ModelRegistry};
