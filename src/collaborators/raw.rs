//! Byte-level artifact codec

use super::traits::ArtifactCodec;
use async_trait::async_trait;
use std::path::Path;

/// Artifact kept as the raw file contents
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawArtifact(pub Vec<u8>);

impl From<Vec<u8>> for RawArtifact {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

/// Codec that copies artifact bytes in and out of files unchanged
#[derive(Debug, Clone)]
pub struct RawCodec {
    extension: String,
}

impl RawCodec {
    /// Codec writing files with the given extension (without dot)
    pub fn new(extension: impl Into<String>) -> Self {
        Self {
            extension: extension.into().trim_start_matches('.').to_string(),
        }
    }
}

#[async_trait]
impl ArtifactCodec<RawArtifact> for RawCodec {
    async fn load(&self, path: &Path) -> crate::Result<RawArtifact> {
        Ok(RawArtifact(tokio::fs::read(path).await?))
    }

    async fn store(&self, path: &Path, artifact: &RawArtifact) -> crate::Result<()> {
        tokio::fs::write(path, &artifact.0)
            .await
            .map_err(|e| crate::Error::persist(path, e))
    }

    fn extension(&self) -> &str {
        &self.extension
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn leading_dot_is_ignored() {
        assert_eq!(RawCodec::new(".mat").extension(), "mat");
    }

    #[tokio::test]
    async fn store_then_load_returns_same_bytes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("model.mat");
        let codec = RawCodec::new("mat");

        codec
            .store(&path, &RawArtifact(b"model-bytes".to_vec()))
            .await
            .unwrap();
        let loaded = codec.load(&path).await.unwrap();
        assert_eq!(loaded.0, b"model-bytes");
    }

    #[tokio::test]
    async fn store_into_missing_directory_is_persist_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing").join("model.mat");
        let err = RawCodec::new("mat")
            .store(&path, &RawArtifact::default())
            .await
            .unwrap_err();
        assert!(matches!(err, crate::Error::Persist { .. }));
    }
}
