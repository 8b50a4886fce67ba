//! Binary model bundle: a fitted pipeline plus its feature manifest
//!
//! File layout: 4 magic bytes, a little-endian `u32` format version, a
//! little-endian `u64` FNV-1a checksum of the payload, then the bincode
//! payload.

use crate::drift::FeatureManifest;
use crate::error::{ForecastError, Result};
use crate::training::Pipeline;
use bincode::Options;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::info;

/// How the stored model was trained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrainingMode {
    Full,
    Incremental,
}

/// Descriptive fields stored next to the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleMetadata {
    /// Target names, in output order
    pub target_names: Vec<String>,
    pub mode: TrainingMode,
    pub trained_at: DateTime<Utc>,
    /// Rows the final model was trained on
    pub n_samples: usize,
}

impl BundleMetadata {
    pub fn new(target_names: Vec<String>, mode: TrainingMode, n_samples: usize) -> Self {
        Self {
            target_names,
            mode,
            trained_at: Utc::now(),
            n_samples,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct Payload {
    pipeline: Pipeline,
    manifest: FeatureManifest,
    metadata: BundleMetadata,
}

/// Persisted model artifact
#[derive(Debug, Clone)]
pub struct ModelBundle {
    pub pipeline: Pipeline,
    pub manifest: FeatureManifest,
    pub metadata: BundleMetadata,
}

impl ModelBundle {
    pub const MAGIC: [u8; 4] = *b"EFMB";
    pub const FORMAT_VERSION: u32 = 1;
    const HEADER_LEN: usize = 16;

    pub fn new(pipeline: Pipeline, manifest: FeatureManifest, metadata: BundleMetadata) -> Self {
        Self {
            pipeline,
            manifest,
            metadata,
        }
    }

    /// Output arity of the stored pipeline
    pub fn n_outputs(&self) -> usize {
        self.pipeline.n_outputs()
    }

    pub fn into_parts(self) -> (Pipeline, FeatureManifest) {
        (self.pipeline, self.manifest)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let payload = codec()
            .serialize(&PayloadRef {
                pipeline: &self.pipeline,
                manifest: &self.manifest,
                metadata: &self.metadata,
            })
            .map_err(|e| ForecastError::SerializationError(format!("Failed to serialize bundle: {}", e)))?;

        let mut bytes = Vec::with_capacity(Self::HEADER_LEN + payload.len());
        bytes.extend_from_slice(&Self::MAGIC);
        bytes.extend_from_slice(&Self::FORMAT_VERSION.to_le_bytes());
        bytes.extend_from_slice(&checksum(&payload).to_le_bytes());
        bytes.extend_from_slice(&payload);
        Ok(bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < Self::HEADER_LEN || bytes[..4] != Self::MAGIC {
            return Err(ForecastError::CorruptArtifact(
                "not a model bundle (bad magic bytes)".to_string(),
            ));
        }

        let mut version = [0u8; 4];
        version.copy_from_slice(&bytes[4..8]);
        let version = u32::from_le_bytes(version);
        if version != Self::FORMAT_VERSION {
            return Err(ForecastError::CorruptArtifact(format!(
                "unsupported bundle format version {}",
                version
            )));
        }

        let mut stored = [0u8; 8];
        stored.copy_from_slice(&bytes[8..16]);
        let payload = &bytes[Self::HEADER_LEN..];
        if u64::from_le_bytes(stored) != checksum(payload) {
            return Err(ForecastError::CorruptArtifact("checksum mismatch".to_string()));
        }

        let payload: Payload = decode_payload(payload)?;

        if let Some(n) = payload.pipeline.n_features_in() {
            if n != payload.manifest.len() {
                return Err(ForecastError::CorruptArtifact(format!(
                    "manifest lists {} features but the model expects {}",
                    payload.manifest.len(),
                    n
                )));
            }
        }

        Ok(Self {
            pipeline: payload.pipeline,
            manifest: payload.manifest,
            metadata: payload.metadata,
        })
    }

    /// Save to file, creating parent directories
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, self.to_bytes()?)?;
        info!(path = %path.display(), features = self.manifest.len(), "Model bundle saved");
        Ok(())
    }

    /// Load from file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = fs::read(path.as_ref())?;
        Self::from_bytes(&bytes)
    }
}

#[derive(Serialize)]
struct PayloadRef<'a> {
    pipeline: &'a Pipeline,
    manifest: &'a FeatureManifest,
    metadata: &'a BundleMetadata,
}

/// Fixed-width integers, little endian, no trailing bytes
fn codec() -> impl Options {
    bincode::DefaultOptions::new().with_fixint_encoding()
}

/// Decode a payload without reading or claiming more bytes than it holds
fn decode_payload<T: DeserializeOwned>(payload: &[u8]) -> Result<T> {
    codec()
        .with_limit(payload.len() as u64)
        .deserialize(payload)
        .map_err(|e| ForecastError::CorruptArtifact(format!("undecodable payload: {}", e)))
}

/// FNV-1a over the payload
fn checksum(data: &[u8]) -> u64 {
    const FNV_OFFSET: u64 = 14695981039346656037;
    const FNV_PRIME: u64 = 1099511628211;

    data.iter().fold(FNV_OFFSET, |hash, byte| (hash ^ *byte as u64).wrapping_mul(FNV_PRIME))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::training::{BoostingConfig, PipelineFactory};
    use ndarray::Array2;

    fn fitted_bundle() -> ModelBundle {
        let x = Array2::from_shape_fn((30, 2), |(i, j)| (i + j) as f64);
        let y = Array2::from_shape_fn((30, 1), |(i, _)| i as f64);
        let mut pipeline = PipelineFactory::new()
            .with_config(BoostingConfig {
                n_estimators: 5,
                ..Default::default()
            })
            .create();
        pipeline.fit(&x, &y).unwrap();
        ModelBundle::new(
            pipeline,
            FeatureManifest::new(vec!["a".to_string(), "b".to_string()]),
            BundleMetadata::new(vec!["sessions".to_string()], TrainingMode::Full, 30),
        )
    }

    #[test]
    fn test_bytes_preserve_predictions() {
        let bundle = fitted_bundle();
        let restored = ModelBundle::from_bytes(&bundle.to_bytes().unwrap()).unwrap();

        let x = Array2::from_shape_fn((5, 2), |(i, j)| (i * j) as f64);
        assert_eq!(bundle.pipeline.predict(&x).unwrap(), restored.pipeline.predict(&x).unwrap());
        assert_eq!(restored.manifest, bundle.manifest);
        assert_eq!(restored.metadata, bundle.metadata);
    }

    #[test]
    fn test_bad_magic() {
        let err = ModelBundle::from_bytes(b"not a bundle at all").unwrap_err();
        assert!(matches!(err, ForecastError::CorruptArtifact(_)));
    }

    #[test]
    fn test_flipped_payload_byte() {
        let mut bytes = fitted_bundle().to_bytes().unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        assert!(matches!(ModelBundle::from_bytes(&bytes), Err(ForecastError::CorruptArtifact(_))));
    }

    #[test]
    fn test_oversized_length_claim_is_rejected() {
        let mut payload = (1u64 << 40).to_le_bytes().to_vec();
        payload.extend_from_slice(b"abcd");

        let err = decode_payload::<String>(&payload).unwrap_err();
        assert!(matches!(&err, ForecastError::CorruptArtifact(msg) if msg.contains("size limit")));
    }

    #[test]
    fn test_trailing_payload_bytes_are_rejected() {
        let bundle = fitted_bundle();
        let mut bytes = bundle.to_bytes().unwrap();
        bytes.extend_from_slice(&[0, 0, 0, 0]);
        let sum = checksum(&bytes[ModelBundle::HEADER_LEN..]);
        bytes[8..16].copy_from_slice(&sum.to_le_bytes());

        assert!(matches!(ModelBundle::from_bytes(&bytes), Err(ForecastError::CorruptArtifact(_))));
    }

    #[test]
    fn test_truncated() {
        let bytes = fitted_bundle().to_bytes().unwrap();
        assert!(matches!(ModelBundle::from_bytes(&bytes[..10]), Err(ForecastError::CorruptArtifact(_))));
    }
}
