//! Static pipeline topology.
//!
//! [`PipelineBuilder`] turns name-based [`NodeSpec`]s into a
//! [`PipelineDefinition`]: an arena of [`PipelineNode`]s whose inputs point at
//! upstream outputs by `(NodeId, output index)`. Every structural mistake is
//! reported as `InvalidTopology` here, before anything runs.
//!
//! A node may only reference nodes declared before it, so declaration order
//! is always a valid execution order and the graph cannot contain cycles.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::PipelineConfig;
use crate::domain::error::{PipelineError, Result};
use crate::domain::node::{
    Edge, InputBinding, NodeId, NodeKind, NodeSpec, OutputDecl, OutputRef, OutputType,
    PipelineNode, PipelineParameter, ResolvedInput,
};

pub const FETCH_NODE: &str = "FetchLatestModel";
pub const CREATE_MODEL_NODE: &str = "CreateModel";
pub const TRANSFORM_NODE: &str = "Transform";

pub const MODEL_URL_OUTPUT: &str = "ModelUrl";
pub const IMAGE_URI_OUTPUT: &str = "ImageUri";
pub const MODEL_NAME_OUTPUT: &str = "ModelName";

pub const BATCH_DATA_PARAM: &str = "BatchData";

pub const GROUP_NAME_INPUT: &str = "group_name";
pub const IMAGE_URI_INPUT: &str = "image_uri";
pub const MODEL_DATA_URL_INPUT: &str = "model_data_url";
pub const INSTANCE_TYPE_INPUT: &str = "instance_type";
pub const MODEL_NAME_INPUT: &str = "model_name";
pub const INPUT_DATA_LOCATION_INPUT: &str = "input_data_location";
pub const OUTPUT_LOCATION_INPUT: &str = "output_location";

/// A built, validated pipeline. Immutable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineDefinition {
    pub name: String,
    pub parameters: Vec<PipelineParameter>,
    pub nodes: Vec<PipelineNode>,
    pub edges: Vec<Edge>,
}

impl PipelineDefinition {
    pub fn node(&self, id: NodeId) -> Option<&PipelineNode> {
        self.nodes.get(id.0)
    }

    pub fn node_by_name(&self, name: &str) -> Option<&PipelineNode> {
        self.nodes.iter().find(|n| n.name == name)
    }

    pub fn parameter(&self, name: &str) -> Option<&PipelineParameter> {
        self.parameters.iter().find(|p| p.name == name)
    }

    /// Declaration of the output an edge or input points at.
    pub fn output_decl(&self, source: OutputRef) -> Option<&OutputDecl> {
        self.node(source.node)
            .and_then(|n| n.outputs.get(source.index))
    }

    /// Nodes whose outputs feed `id`, in id order.
    pub fn upstream_of(&self, id: NodeId) -> Vec<NodeId> {
        let set: BTreeSet<NodeId> = self
            .edges
            .iter()
            .filter(|e| e.target == id)
            .map(|e| e.source.node)
            .collect();
        set.into_iter().collect()
    }

    /// Nodes consuming outputs of `id`, in id order.
    pub fn downstream_of(&self, id: NodeId) -> Vec<NodeId> {
        let set: BTreeSet<NodeId> = self
            .edges
            .iter()
            .filter(|e| e.source.node == id)
            .map(|e| e.target)
            .collect();
        set.into_iter().collect()
    }

    /// Effective parameter values for one run, in declaration order.
    ///
    /// Overrides naming an undeclared parameter are rejected.
    pub fn resolve_parameters(&self, overrides: &BTreeMap<String, String>) -> Result<Vec<String>> {
        for name in overrides.keys() {
            if self.parameter(name).is_none() {
                return Err(PipelineError::InvalidParameter(format!(
                    "pipeline {} has no parameter {}",
                    self.name, name
                )));
            }
        }
        Ok(self
            .parameters
            .iter()
            .map(|p| {
                overrides
                    .get(&p.name)
                    .cloned()
                    .unwrap_or_else(|| p.default_value.clone())
            })
            .collect())
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Collects parameters and node specs, then resolves them into a definition.
#[derive(Debug, Clone)]
pub struct PipelineBuilder {
    name: String,
    parameters: Vec<PipelineParameter>,
    nodes: Vec<NodeSpec>,
}

impl PipelineBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parameters: Vec::new(),
            nodes: Vec::new(),
        }
    }

    pub fn parameter(mut self, parameter: PipelineParameter) -> Self {
        self.parameters.push(parameter);
        self
    }

    pub fn node(mut self, spec: NodeSpec) -> Self {
        self.nodes.push(spec);
        self
    }

    pub fn nodes(mut self, specs: impl IntoIterator<Item = NodeSpec>) -> Self {
        self.nodes.extend(specs);
        self
    }

    /// Resolve every name-based reference into a typed edge.
    pub fn build(self) -> Result<PipelineDefinition> {
        if self.nodes.is_empty() {
            return Err(PipelineError::InvalidTopology(format!(
                "pipeline {} has no nodes",
                self.name
            )));
        }

        let mut param_index: HashMap<&str, usize> = HashMap::new();
        for (i, p) in self.parameters.iter().enumerate() {
            if param_index.insert(p.name.as_str(), i).is_some() {
                return Err(PipelineError::InvalidTopology(format!(
                    "duplicate parameter {}",
                    p.name
                )));
            }
        }

        let all_names: HashSet<&str> = self.nodes.iter().map(|n| n.name.as_str()).collect();
        let mut declared: HashMap<&str, NodeId> = HashMap::new();
        let mut nodes: Vec<PipelineNode> = Vec::with_capacity(self.nodes.len());
        let mut edges = Vec::new();

        for (i, spec) in self.nodes.iter().enumerate() {
            let id = NodeId(i);
            if declared.contains_key(spec.name.as_str()) {
                return Err(PipelineError::InvalidTopology(format!(
                    "duplicate node {}",
                    spec.name
                )));
            }

            let mut seen_outputs = HashSet::new();
            for output in &spec.outputs {
                if !seen_outputs.insert(output.name.as_str()) {
                    return Err(PipelineError::InvalidTopology(format!(
                        "node {} declares output {} twice",
                        spec.name, output.name
                    )));
                }
            }

            if spec.kind == NodeKind::ExternalCallback && spec.callback_timeout_secs == Some(0) {
                return Err(PipelineError::InvalidTopology(format!(
                    "callback node {} has a zero timeout",
                    spec.name
                )));
            }

            let mut inputs = BTreeMap::new();
            for (input_name, binding) in &spec.inputs {
                let resolved = match binding {
                    InputBinding::Constant { value } => ResolvedInput::Constant {
                        value: value.clone(),
                    },
                    InputBinding::Parameter { name } => {
                        let index = param_index.get(name.as_str()).copied().ok_or_else(|| {
                            PipelineError::InvalidTopology(format!(
                                "node {} input {} references undeclared parameter {}",
                                spec.name, input_name, name
                            ))
                        })?;
                        ResolvedInput::Parameter { index }
                    }
                    InputBinding::Output { node, output } => {
                        let source_id = match declared.get(node.as_str()) {
                            Some(id) => *id,
                            None if all_names.contains(node.as_str()) => {
                                return Err(PipelineError::InvalidTopology(format!(
                                    "node {} input {} references {} which is not upstream",
                                    spec.name, input_name, node
                                )));
                            }
                            None => {
                                return Err(PipelineError::InvalidTopology(format!(
                                    "node {} input {} references unknown node {}",
                                    spec.name, input_name, node
                                )));
                            }
                        };
                        let index = nodes[source_id.0].output_index(output).ok_or_else(|| {
                            PipelineError::InvalidTopology(format!(
                                "node {} input {} references output {}.{} which is not declared",
                                spec.name, input_name, node, output
                            ))
                        })?;
                        let source = OutputRef {
                            node: source_id,
                            index,
                        };
                        edges.push(Edge {
                            source,
                            target: id,
                            input: input_name.clone(),
                        });
                        ResolvedInput::Output { source }
                    }
                };
                inputs.insert(input_name.clone(), resolved);
            }

            if let Some(missing) = spec
                .kind
                .required_inputs()
                .iter()
                .find(|name| !inputs.contains_key(**name))
            {
                return Err(PipelineError::InvalidTopology(format!(
                    "{} node {} is missing required input {}",
                    spec.kind.name(),
                    spec.name,
                    missing
                )));
            }

            declared.insert(spec.name.as_str(), id);
            nodes.push(PipelineNode {
                id,
                name: spec.name.clone(),
                kind: spec.kind,
                inputs,
                outputs: spec.outputs.clone(),
                callback_timeout_secs: spec.callback_timeout_secs,
            });
        }

        debug!(
            pipeline = %self.name,
            nodes = nodes.len(),
            edges = edges.len(),
            "pipeline definition built"
        );

        Ok(PipelineDefinition {
            name: self.name,
            parameters: self.parameters,
            nodes,
            edges,
        })
    }
}

/// The `BatchData` parameter with its configured default.
pub fn batch_data_parameter(config: &PipelineConfig) -> PipelineParameter {
    PipelineParameter::new(BATCH_DATA_PARAM, config.batch_data_default())
}

/// Node specs of the fetch → create-model → transform chain.
pub fn standard_node_specs(config: &PipelineConfig) -> Vec<NodeSpec> {
    let fetch = NodeSpec::new(FETCH_NODE, NodeKind::ExternalCallback)
        .input(
            GROUP_NAME_INPUT,
            InputBinding::constant(&config.model_package_group),
        )
        .output(MODEL_URL_OUTPUT, OutputType::String)
        .output(IMAGE_URI_OUTPUT, OutputType::String)
        .with_callback_timeout_secs(config.callback_timeout_secs);

    let create_model = NodeSpec::new(CREATE_MODEL_NODE, NodeKind::CreateModel)
        .input(
            IMAGE_URI_INPUT,
            InputBinding::output(FETCH_NODE, IMAGE_URI_OUTPUT),
        )
        .input(
            MODEL_DATA_URL_INPUT,
            InputBinding::output(FETCH_NODE, MODEL_URL_OUTPUT),
        )
        .input(
            INSTANCE_TYPE_INPUT,
            InputBinding::constant(&config.instance_type),
        )
        .output(MODEL_NAME_OUTPUT, OutputType::String);

    let transform = NodeSpec::new(TRANSFORM_NODE, NodeKind::Transform)
        .input(
            MODEL_NAME_INPUT,
            InputBinding::output(CREATE_MODEL_NODE, MODEL_NAME_OUTPUT),
        )
        .input(
            INPUT_DATA_LOCATION_INPUT,
            InputBinding::parameter(BATCH_DATA_PARAM),
        )
        .input(
            OUTPUT_LOCATION_INPUT,
            InputBinding::constant(config.transform_output()),
        )
        .input(
            INSTANCE_TYPE_INPUT,
            InputBinding::constant(&config.instance_type),
        );

    vec![fetch, create_model, transform]
}

/// Build the three-node batch-inference pipeline described by `config`.
pub fn standard_pipeline(config: &PipelineConfig) -> Result<PipelineDefinition> {
    config.validate()?;
    PipelineBuilder::new(&config.pipeline_name)
        .parameter(batch_data_parameter(config))
        .nodes(standard_node_specs(config))
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::error::ErrorKind;

    fn config() -> PipelineConfig {
        PipelineConfig::new("ml-artifacts", "churn-models")
    }

    fn topology_message(result: Result<PipelineDefinition>) -> String {
        match result {
            Err(PipelineError::InvalidTopology(msg)) => msg,
            other => panic!("expected InvalidTopology, got {:?}", other),
        }
    }

    #[test]
    fn standard_pipeline_has_three_nodes_in_order() {
        let def = standard_pipeline(&config()).expect("build");
        let names: Vec<_> = def.nodes.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec![FETCH_NODE, CREATE_MODEL_NODE, TRANSFORM_NODE]);
        assert_eq!(def.nodes[0].kind, NodeKind::ExternalCallback);
        assert_eq!(def.nodes[1].kind, NodeKind::CreateModel);
        assert_eq!(def.nodes[2].kind, NodeKind::Transform);
        assert_eq!(def.nodes[0].callback_timeout_secs, Some(600));
    }

    #[test]
    fn standard_pipeline_edges_resolve_to_declared_outputs() {
        let def = standard_pipeline(&config()).expect("build");
        assert_eq!(def.edges.len(), 3);

        let create = def.node_by_name(CREATE_MODEL_NODE).unwrap();
        match &create.inputs[IMAGE_URI_INPUT] {
            ResolvedInput::Output { source } => {
                assert_eq!(source.node, NodeId(0));
                assert_eq!(def.output_decl(*source).unwrap().name, IMAGE_URI_OUTPUT);
            }
            other => panic!("unexpected binding {:?}", other),
        }

        let transform = def.node_by_name(TRANSFORM_NODE).unwrap();
        assert_eq!(
            transform.inputs[INPUT_DATA_LOCATION_INPUT],
            ResolvedInput::Parameter { index: 0 }
        );
        assert!(transform.outputs.is_empty());

        assert_eq!(def.upstream_of(NodeId(1)), vec![NodeId(0)]);
        assert_eq!(def.downstream_of(NodeId(1)), vec![NodeId(2)]);
        assert!(def.downstream_of(NodeId(2)).is_empty());
    }

    #[test]
    fn removing_image_uri_output_is_invalid_topology() {
        let config = config();
        let mut specs = standard_node_specs(&config);
        specs[0] = specs[0].clone().without_output(IMAGE_URI_OUTPUT);

        let err = PipelineBuilder::new("p")
            .parameter(batch_data_parameter(&config))
            .nodes(specs)
            .build()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidTopology);
        assert!(err.to_string().contains(IMAGE_URI_OUTPUT));
    }

    #[test]
    fn forward_reference_is_rejected() {
        let msg = topology_message(
            PipelineBuilder::new("p")
                .node(
                    NodeSpec::new("a", NodeKind::CreateModel)
                        .input("x", InputBinding::output("b", "out")),
                )
                .node(
                    NodeSpec::new("b", NodeKind::ExternalCallback)
                        .output("out", OutputType::String),
                )
                .build(),
        );
        assert!(msg.contains("not upstream"));
    }

    #[test]
    fn self_reference_is_rejected() {
        let msg = topology_message(
            PipelineBuilder::new("p")
                .node(
                    NodeSpec::new("a", NodeKind::CreateModel)
                        .input("x", InputBinding::output("a", "out"))
                        .output("out", OutputType::String),
                )
                .build(),
        );
        assert!(msg.contains("not upstream"));
    }

    #[test]
    fn unknown_node_and_parameter_are_rejected() {
        let msg = topology_message(
            PipelineBuilder::new("p")
                .node(
                    NodeSpec::new("a", NodeKind::Transform)
                        .input("x", InputBinding::output("ghost", "out")),
                )
                .build(),
        );
        assert!(msg.contains("unknown node ghost"));

        let msg = topology_message(
            PipelineBuilder::new("p")
                .node(
                    NodeSpec::new("a", NodeKind::Transform)
                        .input("x", InputBinding::parameter("Missing")),
                )
                .build(),
        );
        assert!(msg.contains("undeclared parameter"));
    }

    #[test]
    fn duplicates_and_empty_are_rejected() {
        topology_message(PipelineBuilder::new("p").build());

        topology_message(
            PipelineBuilder::new("p")
                .node(NodeSpec::new("a", NodeKind::Transform))
                .node(NodeSpec::new("a", NodeKind::Transform))
                .build(),
        );

        topology_message(
            PipelineBuilder::new("p")
                .node(
                    NodeSpec::new("a", NodeKind::ExternalCallback)
                        .output("o", OutputType::String)
                        .output("o", OutputType::String),
                )
                .build(),
        );

        topology_message(
            PipelineBuilder::new("p")
                .parameter(PipelineParameter::new("P", "1"))
                .parameter(PipelineParameter::new("P", "2"))
                .node(NodeSpec::new("a", NodeKind::Transform))
                .build(),
        );
    }

    #[test]
    fn missing_required_input_is_rejected() {
        let config = config();
        let mut specs = standard_node_specs(&config);
        specs[2].inputs.remove(INPUT_DATA_LOCATION_INPUT);

        let msg = topology_message(
            PipelineBuilder::new("p")
                .parameter(batch_data_parameter(&config))
                .nodes(specs)
                .build(),
        );
        assert!(msg.contains(INPUT_DATA_LOCATION_INPUT));
    }

    #[test]
    fn resolve_parameters_applies_overrides() {
        let def = standard_pipeline(&config()).expect("build");
        let values = def.resolve_parameters(&BTreeMap::new()).unwrap();
        assert_eq!(values, vec!["s3://ml-artifacts/batch-data/input".to_string()]);

        let mut overrides = BTreeMap::new();
        overrides.insert(BATCH_DATA_PARAM.to_string(), "s3://elsewhere/in".to_string());
        let values = def.resolve_parameters(&overrides).unwrap();
        assert_eq!(values, vec!["s3://elsewhere/in".to_string()]);

        overrides.insert("Unknown".to_string(), "x".to_string());
        let err = def.resolve_parameters(&overrides).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParameter);
    }

    #[test]
    fn standard_pipeline_rejects_invalid_config() {
        let err = standard_pipeline(&PipelineConfig::new("", "g")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[test]
    fn definition_serializes_to_json() {
        let def = standard_pipeline(&config()).expect("build");
        let json = def.to_json_pretty().unwrap();
        let back: PipelineDefinition = serde_json::from_str(&json).unwrap();
        assert_eq!(def, back);
    }
}
