//! Program artifact fetching
//!
//! Artifacts are addressed by file name relative to a root: a static-asset
//! server (`HttpArtifactSource`) or a local directory (`FsArtifactSource`).

use async_trait::async_trait;
use prover_common::{ProgramArtifacts, ProgramId};
use std::path::PathBuf;
use thiserror::Error;
use tracing::debug;

use crate::ControllerError;

/// Why a single artifact could not be fetched
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("not found")]
    NotFound,

    #[error("server returned {0}")]
    Status(u16),

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("read failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Somewhere artifacts can be fetched from by name
#[async_trait]
pub trait ArtifactSource: Send + Sync {
    async fn fetch(&self, name: &str) -> Result<Vec<u8>, FetchError>;
}

/// Fetches artifacts over HTTP from a static-asset server
pub struct HttpArtifactSource {
    base_url: String,
    cache_bust: Option<String>,
    client: reqwest::Client,
}

impl HttpArtifactSource {
    pub fn new(base_url: String, cache_bust: Option<String>) -> Self {
        Self {
            base_url,
            cache_bust,
            client: reqwest::Client::new(),
        }
    }

    fn url_for(&self, name: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        match &self.cache_bust {
            Some(query) => format!("{}/{}?{}", base, name, query),
            None => format!("{}/{}", base, name),
        }
    }
}

#[async_trait]
impl ArtifactSource for HttpArtifactSource {
    async fn fetch(&self, name: &str) -> Result<Vec<u8>, FetchError> {
        let url = self.url_for(name);
        debug!("Fetching artifact: {}", url);

        let response = self.client.get(&url).send().await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(FetchError::NotFound);
        }

        if !response.status().is_success() {
            return Err(FetchError::Status(response.status().as_u16()));
        }

        Ok(response.bytes().await?.to_vec())
    }
}

/// Reads artifacts from a local directory
pub struct FsArtifactSource {
    root: PathBuf,
}

impl FsArtifactSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl ArtifactSource for FsArtifactSource {
    async fn fetch(&self, name: &str) -> Result<Vec<u8>, FetchError> {
        let path = self.root.join(name);
        debug!("Reading artifact: {}", path.display());

        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(FetchError::NotFound),
            Err(e) => Err(FetchError::Io(e)),
        }
    }
}

/// Fetch all three artifacts of `program` concurrently.
///
/// The first failure aborts the whole fetch; whatever else was received is
/// dropped, so a retry starts from nothing.
pub async fn fetch_program(
    source: &dyn ArtifactSource,
    program: ProgramId,
) -> Result<ProgramArtifacts, ControllerError> {
    let files = program.files();
    let (prover_preprocessing, verifier_preprocessing, elf_bytes) = tokio::try_join!(
        fetch_named(source, files.prover),
        fetch_named(source, files.verifier),
        fetch_named(source, files.elf),
    )?;

    Ok(ProgramArtifacts {
        prover_preprocessing,
        verifier_preprocessing,
        elf_bytes,
    })
}

async fn fetch_named(source: &dyn ArtifactSource, name: &str) -> Result<Vec<u8>, ControllerError> {
    source
        .fetch(name)
        .await
        .map_err(|e| ControllerError::Fetch {
            artifact: name.to_string(),
            reason: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_url_with_cache_bust() {
        let source = HttpArtifactSource::new(
            "http://localhost:8080/".to_string(),
            Some("v=2".to_string()),
        );
        assert_eq!(
            source.url_for("sha2.elf"),
            "http://localhost:8080/sha2.elf?v=2"
        );
    }

    #[test]
    fn test_http_url_without_cache_bust() {
        let source = HttpArtifactSource::new("http://localhost:8080".to_string(), None);
        assert_eq!(
            source.url_for("keccak_prover.bin"),
            "http://localhost:8080/keccak_prover.bin"
        );
    }

    #[tokio::test]
    async fn test_fs_source_reads_all_three() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("sha2_prover.bin"), [1u8; 8]).unwrap();
        std::fs::write(dir.path().join("sha2_verifier.bin"), [2u8; 4]).unwrap();
        std::fs::write(dir.path().join("sha2.elf"), [3u8; 2]).unwrap();

        let source = FsArtifactSource::new(dir.path());
        let artifacts = fetch_program(&source, ProgramId::Sha2).await.unwrap();
        assert_eq!(artifacts.prover_preprocessing.len(), 8);
        assert_eq!(artifacts.verifier_preprocessing.len(), 4);
        assert_eq!(artifacts.elf_bytes.len(), 2);
    }

    #[tokio::test]
    async fn test_fs_source_names_missing_artifact() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("keccak_prover.bin"), [1u8; 8]).unwrap();
        std::fs::write(dir.path().join("keccak.elf"), [3u8; 2]).unwrap();

        let source = FsArtifactSource::new(dir.path());
        match fetch_program(&source, ProgramId::Keccak).await {
            Err(ControllerError::Fetch { artifact, reason }) => {
                assert_eq!(artifact, "keccak_verifier.bin");
                assert_eq!(reason, "not found");
            }
            other => panic!("expected fetch error, got {:?}", other.map(|a| a.total_len())),
        }
    }
}
