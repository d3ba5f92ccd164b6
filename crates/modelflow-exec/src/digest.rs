//! Pipeline definition identity.

use modelflow_core::{PipelineDefinition, Result};
use modelflow_state::ContentDigest;
use sha2::{Digest, Sha256};

/// Digest of the full definition, constants and parameter defaults included.
///
/// Runs of the same definition share this digest in the ledger.
pub fn definition_digest(definition: &PipelineDefinition) -> Result<ContentDigest> {
    let canonical = serde_json::to_vec(definition)?;
    Ok(ContentDigest::from_bytes(&canonical))
}

/// Digest of the graph shape only: node names and kinds in order, plus edges.
///
/// Two definitions that differ only in configured values share this digest.
pub fn topology_digest(definition: &PipelineDefinition) -> String {
    let mut hasher = Sha256::new();
    for node in &definition.nodes {
        hasher.update(node.name.as_bytes());
        hasher.update(b"\0");
        hasher.update(node.kind.name().as_bytes());
        hasher.update(b"\0");
    }
    for edge in &definition.edges {
        hasher.update(edge.source.node.0.to_le_bytes());
        hasher.update(edge.source.index.to_le_bytes());
        hasher.update(edge.target.0.to_le_bytes());
        hasher.update(edge.input.as_bytes());
        hasher.update(b"\0");
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use modelflow_core::{standard_pipeline, PipelineConfig};

    #[test]
    fn test_definition_digest_deterministic() {
        let config = PipelineConfig::new("ml-artifacts", "churn-models");
        let a = definition_digest(&standard_pipeline(&config).unwrap()).unwrap();
        let b = definition_digest(&standard_pipeline(&config).unwrap()).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
    }

    #[test]
    fn test_definition_digest_tracks_values() {
        let a = standard_pipeline(&PipelineConfig::new("ml-artifacts", "churn-models")).unwrap();
        let b = standard_pipeline(&PipelineConfig::new("ml-artifacts", "fraud-models")).unwrap();
        assert_ne!(definition_digest(&a).unwrap(), definition_digest(&b).unwrap());
        assert_eq!(topology_digest(&a), topology_digest(&b));
    }
}
