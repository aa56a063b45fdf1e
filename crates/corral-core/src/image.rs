//! Root filesystem lookup for sandboxes.

use crate::error::{CoreError, Result};
use crate::sandbox::SandboxName;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;

/// Provides the root filesystem directory for a sandbox.
#[async_trait]
pub trait ImageStore: Send + Sync {
    /// Return the image root for `name`, materialising it if the store can.
    async fn ensure(&self, name: &SandboxName) -> Result<PathBuf>;
}

/// Images stored as directories under a common root.
///
/// When a sandbox has no directory yet and a bootstrap template is set, the
/// template is run through `sh -c` with `{dir}` replaced by the quoted
/// target directory, e.g. `debootstrap stable {dir}`.
#[derive(Debug, Clone)]
pub struct DirectoryImages {
    root: PathBuf,
    bootstrap: Option<String>,
}

impl DirectoryImages {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            bootstrap: None,
        }
    }

    /// Set the bootstrap command template.
    pub fn with_bootstrap(mut self, template: impl Into<String>) -> Self {
        self.bootstrap = Some(template.into());
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory the image for `name` lives in, whether or not it exists.
    pub fn path_for(&self, name: &SandboxName) -> PathBuf {
        self.root.join(name.as_str())
    }

    async fn bootstrap(&self, template: &str, dir: &Path) -> Result<()> {
        tokio::fs::create_dir_all(&self.root).await?;
        let command = template.replace("{dir}", &shell_quote(&dir.display().to_string()));
        tracing::info!(dir = %dir.display(), %command, "Bootstrapping sandbox image");

        let output = Command::new("sh").arg("-c").arg(&command).output().await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            tracing::error!(dir = %dir.display(), %stderr, "Image bootstrap failed");
            return Err(CoreError::ImageMissing(dir.to_path_buf()));
        }
        Ok(())
    }
}

#[async_trait]
impl ImageStore for DirectoryImages {
    async fn ensure(&self, name: &SandboxName) -> Result<PathBuf> {
        let dir = self.path_for(name);
        if is_dir(&dir).await {
            return Ok(dir);
        }

        match &self.bootstrap {
            Some(template) => {
                self.bootstrap(template, &dir).await?;
                if is_dir(&dir).await {
                    Ok(dir)
                } else {
                    Err(CoreError::ImageMissing(dir))
                }
            }
            None => {
                tracing::error!(sandbox = %name, dir = %dir.display(), "No image for sandbox");
                Err(CoreError::ImageMissing(dir))
            }
        }
    }
}

async fn is_dir(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false)
}

fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> SandboxName {
        SandboxName::new(s).unwrap()
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("/a b"), "'/a b'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }

    #[tokio::test]
    async fn test_existing_directory() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir(tmp.path().join("web")).unwrap();

        let images = DirectoryImages::new(tmp.path());
        assert_eq!(images.ensure(&name("web")).await.unwrap(), tmp.path().join("web"));
    }

    #[tokio::test]
    async fn test_missing_without_bootstrap() {
        let tmp = tempfile::tempdir().unwrap();
        let images = DirectoryImages::new(tmp.path());
        let err = images.ensure(&name("web")).await.unwrap_err();
        assert!(matches!(err, CoreError::ImageMissing(p) if p == tmp.path().join("web")));
    }

    #[tokio::test]
    async fn test_bootstrap_creates_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let images = DirectoryImages::new(tmp.path().join("images")).with_bootstrap("mkdir -p {dir}");

        let dir = images.ensure(&name("web")).await.unwrap();
        assert!(dir.is_dir());
        assert_eq!(dir, tmp.path().join("images").join("web"));
    }

    #[tokio::test]
    async fn test_bootstrap_failure() {
        let tmp = tempfile::tempdir().unwrap();
        let images = DirectoryImages::new(tmp.path()).with_bootstrap("exit 3");
        assert!(matches!(
            images.ensure(&name("web")).await,
            Err(CoreError::ImageMissing(_))
        ));
    }

    #[tokio::test]
    async fn test_bootstrap_that_creates_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let images = DirectoryImages::new(tmp.path()).with_bootstrap("true {dir}");
        assert!(images.ensure(&name("web")).await.is_err());
    }
}
