use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use crate::{DeviceError, DeviceFs};

/// Real sandbox filesystem rooted at the app-private directory.
pub struct SandboxFs {
    base: PathBuf,
}

impl SandboxFs {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        // Paths arrive sandbox-relative; a `file://` prefix from the
        // native side is tolerated and stripped.
        let path = path.strip_prefix("file://").unwrap_or(path);
        self.base.join(Path::new(path))
    }
}

#[async_trait]
impl DeviceFs for SandboxFs {
    async fn read_file(&self, path: &str) -> Result<String, DeviceError> {
        tokio::fs::read_to_string(self.resolve(path))
            .await
            .map_err(|error| DeviceError::io("reading file", error))
    }

    async fn append_file(&self, path: &str, contents: &str) -> Result<(), DeviceError> {
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.resolve(path))
            .await
            .map_err(|error| DeviceError::io("opening file for append", error))?;
        file.write_all(contents.as_bytes())
            .await
            .map_err(|error| DeviceError::io("appending to file", error))?;
        file.flush()
            .await
            .map_err(|error| DeviceError::io("flushing append", error))
    }

    async fn write_file(&self, path: &str, contents: &str) -> Result<(), DeviceError> {
        // Atomic replace: write a sibling then rename, so a concurrent
        // reader never observes a half-written state file.
        let target = self.resolve(path);
        let temp = target.with_extension("tmp");
        tokio::fs::write(&temp, contents)
            .await
            .map_err(|error| DeviceError::io("writing temp file", error))?;
        tokio::fs::rename(&temp, &target)
            .await
            .map_err(|error| DeviceError::io("renaming temp file into place", error))
    }

    async fn mkdir(&self, path: &str) -> Result<(), DeviceError> {
        tokio::fs::create_dir_all(self.resolve(path))
            .await
            .map_err(|error| DeviceError::io("creating directory", error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn append_accumulates_lines() {
        let dir = tempfile::tempdir().expect("tempdir");
        let fs = SandboxFs::new(dir.path());

        fs.append_file("protocol.sherlo", "{\"a\":1}\n")
            .await
            .expect("append");
        fs.append_file("protocol.sherlo", "{\"b\":2}\n")
            .await
            .expect("append");

        let content = fs.read_file("protocol.sherlo").await.expect("read");
        assert_eq!(content, "{\"a\":1}\n{\"b\":2}\n");
    }

    #[tokio::test]
    async fn write_replaces_whole_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let fs = SandboxFs::new(dir.path());

        fs.write_file("state.sherlo", "first").await.expect("write");
        fs.write_file("state.sherlo", "second").await.expect("write");

        let content = fs.read_file("state.sherlo").await.expect("read");
        assert_eq!(content, "second");
    }

    #[tokio::test]
    async fn mkdir_is_recursive_and_idempotent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let fs = SandboxFs::new(dir.path());

        fs.mkdir("snapshots/nested").await.expect("mkdir");
        fs.mkdir("snapshots/nested").await.expect("mkdir again");
        assert!(dir.path().join("snapshots/nested").is_dir());
    }

    #[tokio::test]
    async fn file_uri_prefix_is_tolerated() {
        let dir = tempfile::tempdir().expect("tempdir");
        let fs = SandboxFs::new(dir.path());

        fs.write_file("file://log.sherlo", "x").await.expect("write");
        let content = fs.read_file("log.sherlo").await.expect("read");
        assert_eq!(content, "x");
    }
}
