// ============================================================
// Layer 3 — ModelArtifact
// ============================================================
// An opaque weight blob plus the metadata needed to rebuild the
// network around it. The domain never looks inside `weights`;
// only the ml layer knows how to decode them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Name of the checkpoint with the lowest validation loss.
pub const BEST: &str = "best";

/// Name of the checkpoint written after the last epoch.
pub const FINAL: &str = "final";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    /// Identifier of the network family, e.g. "xray-cnn-v1".
    pub architecture:   String,
    /// Serialized model hyperparameters.
    pub model_config:   serde_json::Value,
    /// Epoch the weights were captured at (1-based).
    pub epoch:          usize,
    pub metric_name:    String,
    pub metric_value:   f64,
    /// (width, height) the network was trained on.
    pub target_size:    (u32, u32),
    pub weights_sha256: String,
    pub created_at:     DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelArtifact {
    pub metadata: ArtifactMetadata,
    pub weights:  Vec<u8>,
}

impl ModelArtifact {
    /// Wrap serialized weights; the digest is computed here.
    pub fn new(
        architecture: impl Into<String>,
        model_config: serde_json::Value,
        epoch:        usize,
        metric_name:  impl Into<String>,
        metric_value: f64,
        target_size:  (u32, u32),
        weights:      Vec<u8>,
    ) -> Self {
        let metadata = ArtifactMetadata {
            architecture: architecture.into(),
            model_config,
            epoch,
            metric_name: metric_name.into(),
            metric_value,
            target_size,
            weights_sha256: sha256_hex(&weights),
            created_at: Utc::now(),
        };
        Self { metadata, weights }
    }

    /// True when the stored digest matches the weight bytes.
    pub fn is_intact(&self) -> bool {
        sha256_hex(&self.weights) == self.metadata.weights_sha256
    }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_detects_tampering() {
        let mut artifact = ModelArtifact::new(
            "xray-cnn-v1", serde_json::json!({}), 1, "val_loss", 0.4, (8, 8), vec![1, 2, 3],
        );
        assert!(artifact.is_intact());
        artifact.weights[0] = 9;
        assert!(!artifact.is_intact());
    }
}
