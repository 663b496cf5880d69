//! Persisting the captured download to its deterministic destination.

use std::fs;
use std::path::{Path, PathBuf};

use crate::result::{FetchError, FetchResult};

/// The exported report file, saved to local disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadArtifact {
    /// Where the artifact was written
    pub path: PathBuf,
    /// Size in bytes
    pub bytes: u64,
}

/// Copy the captured download over `destination`, creating parent
/// directories as needed. The destination is overwritten each run, so
/// repeated runs never accumulate artifacts.
pub fn persist(source: &Path, destination: &Path) -> FetchResult<DownloadArtifact> {
    let persist_err = |source: std::io::Error| FetchError::ArtifactPersist {
        path: destination.to_path_buf(),
        source,
    };

    if let Some(parent) = destination.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(persist_err)?;
        }
    }
    let bytes = fs::copy(source, destination).map_err(persist_err)?;
    Ok(DownloadArtifact {
        path: destination.to_path_buf(),
        bytes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("capture");
        fs::write(&source, b"report").unwrap();

        let destination = dir.path().join("data/nested/nautica_raw.xlsx");
        let artifact = persist(&source, &destination).unwrap();

        assert_eq!(artifact.bytes, 6);
        assert_eq!(fs::read(&destination).unwrap(), b"report");
    }

    #[test]
    fn overwrites_existing_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("capture");
        let destination = dir.path().join("nautica_raw.xlsx");

        fs::write(&source, b"first run").unwrap();
        persist(&source, &destination).unwrap();
        fs::write(&source, b"second").unwrap();
        let artifact = persist(&source, &destination).unwrap();

        assert_eq!(artifact.bytes, 6);
        assert_eq!(fs::read(&destination).unwrap(), b"second");
        // Still exactly one file at the destination directory level.
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 2);
    }

    #[test]
    fn missing_source_maps_to_artifact_persist() {
        let dir = tempfile::tempdir().unwrap();
        let err = persist(&dir.path().join("absent"), &dir.path().join("out.xlsx")).unwrap_err();
        assert_eq!(err.kind(), "artifact-persist");
    }
}
