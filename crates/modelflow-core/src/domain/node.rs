//! Pipeline node, parameter and edge types.
//!
//! `NodeSpec` / `InputBinding` are the name-based form a caller writes.
//! `PipelineNode` / `ResolvedInput` are the arena-indexed form produced by
//! [`crate::definition::PipelineBuilder::build`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// What a node asks its collaborator to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// Delegated to an externally invoked handler that signals completion.
    ExternalCallback,
    /// Registers a hosted model from an image and an artifact.
    CreateModel,
    /// Runs batch inference over a dataset.
    Transform,
}

impl NodeKind {
    pub fn name(&self) -> &'static str {
        match self {
            NodeKind::ExternalCallback => "external_callback",
            NodeKind::CreateModel => "create_model",
            NodeKind::Transform => "transform",
        }
    }

    /// Inputs a node of this kind cannot run without.
    pub fn required_inputs(&self) -> &'static [&'static str] {
        use crate::definition::{
            IMAGE_URI_INPUT, INPUT_DATA_LOCATION_INPUT, MODEL_DATA_URL_INPUT, MODEL_NAME_INPUT,
        };
        match self {
            NodeKind::ExternalCallback => &[],
            NodeKind::CreateModel => &[IMAGE_URI_INPUT, MODEL_DATA_URL_INPUT],
            NodeKind::Transform => &[MODEL_NAME_INPUT, INPUT_DATA_LOCATION_INPUT],
        }
    }
}

/// Declared type of a node output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputType {
    String,
    Integer,
    Boolean,
    Float,
}

impl OutputType {
    /// Whether a produced string value parses as this type.
    pub fn accepts(&self, value: &str) -> bool {
        match self {
            OutputType::String => true,
            OutputType::Integer => value.parse::<i64>().is_ok(),
            OutputType::Boolean => value.parse::<bool>().is_ok(),
            OutputType::Float => value.parse::<f64>().is_ok(),
        }
    }
}

/// A named, typed node output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputDecl {
    pub name: String,
    pub output_type: OutputType,
}

/// A run-time overridable string parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineParameter {
    pub name: String,
    pub default_value: String,
}

impl PipelineParameter {
    pub fn new(name: impl Into<String>, default_value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            default_value: default_value.into(),
        }
    }
}

/// Name-based input binding, resolved at build time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputBinding {
    Constant { value: String },
    Parameter { name: String },
    Output { node: String, output: String },
}

impl InputBinding {
    pub fn constant(value: impl Into<String>) -> Self {
        InputBinding::Constant {
            value: value.into(),
        }
    }

    pub fn parameter(name: impl Into<String>) -> Self {
        InputBinding::Parameter { name: name.into() }
    }

    pub fn output(node: impl Into<String>, output: impl Into<String>) -> Self {
        InputBinding::Output {
            node: node.into(),
            output: output.into(),
        }
    }
}

/// Unresolved node description handed to the builder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSpec {
    pub name: String,
    pub kind: NodeKind,
    pub inputs: BTreeMap<String, InputBinding>,
    pub outputs: Vec<OutputDecl>,
    /// Only meaningful for `ExternalCallback` nodes.
    pub callback_timeout_secs: Option<u64>,
}

impl NodeSpec {
    pub fn new(name: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            name: name.into(),
            kind,
            inputs: BTreeMap::new(),
            outputs: Vec::new(),
            callback_timeout_secs: None,
        }
    }

    pub fn input(mut self, name: impl Into<String>, binding: InputBinding) -> Self {
        self.inputs.insert(name.into(), binding);
        self
    }

    pub fn output(mut self, name: impl Into<String>, output_type: OutputType) -> Self {
        self.outputs.push(OutputDecl {
            name: name.into(),
            output_type,
        });
        self
    }

    /// Drop a declared output, if present.
    pub fn without_output(mut self, name: &str) -> Self {
        self.outputs.retain(|o| o.name != name);
        self
    }

    pub fn with_callback_timeout_secs(mut self, secs: u64) -> Self {
        self.callback_timeout_secs = Some(secs);
        self
    }
}

/// Index of a node in the definition's node arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub usize);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A specific output of a specific node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutputRef {
    pub node: NodeId,
    /// Position in the upstream node's `outputs`.
    pub index: usize,
}

/// Input binding after build-time resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResolvedInput {
    Constant { value: String },
    /// Index into the definition's `parameters`.
    Parameter { index: usize },
    Output { source: OutputRef },
}

/// A node in a built definition. Immutable after build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineNode {
    pub id: NodeId,
    pub name: String,
    pub kind: NodeKind,
    pub inputs: BTreeMap<String, ResolvedInput>,
    pub outputs: Vec<OutputDecl>,
    pub callback_timeout_secs: Option<u64>,
}

impl PipelineNode {
    pub fn output_index(&self, name: &str) -> Option<usize> {
        self.outputs.iter().position(|o| o.name == name)
    }
}

/// Data-flow edge from an upstream output to a downstream input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub source: OutputRef,
    pub target: NodeId,
    pub input: String,
}
