//! Named network namespace management.

use crate::error::{NetError, ResourceKind, Result};
use crate::host::NetHost;
use crate::naming::validate_namespace_name;
use std::sync::Arc;

/// Creates, deletes and tests named network namespaces.
#[derive(Clone)]
pub struct NamespaceManager {
    host: Arc<dyn NetHost>,
}

impl NamespaceManager {
    pub fn new(host: Arc<dyn NetHost>) -> Self {
        Self { host }
    }

    /// Check whether a namespace is registered on the host.
    ///
    /// Never fails: any lookup error reads as "does not exist".
    pub async fn exists(&self, name: &str) -> bool {
        match self.host.namespaces().await {
            Ok(names) => names.iter().any(|n| n == name),
            Err(e) => {
                tracing::debug!(netns = %name, error = %e, "Namespace lookup failed");
                false
            }
        }
    }

    /// Create a namespace.
    ///
    /// # Errors
    /// `InvalidName` for a malformed name, `AlreadyExists` if it is present.
    pub async fn create(&self, name: &str) -> Result<()> {
        validate_namespace_name(name)?;
        if self.exists(name).await {
            tracing::error!(netns = %name, "Namespace already exists");
            return Err(NetError::already_exists(ResourceKind::Namespace, name));
        }
        self.host.add_namespace(name).await?;
        tracing::info!(netns = %name, "Namespace created");
        Ok(())
    }

    /// Create a namespace unless it already exists.
    ///
    /// Returns `true` if this call created it.
    pub async fn ensure(&self, name: &str) -> Result<bool> {
        if self.exists(name).await {
            tracing::debug!(netns = %name, "Namespace already present");
            return Ok(false);
        }
        self.create(name).await.map(|()| true)
    }

    /// Delete a namespace and every interface inside it.
    ///
    /// A veth endpoint living in the namespace is destroyed with it, which
    /// takes its peer in the default namespace along.
    pub async fn delete(&self, name: &str) -> Result<()> {
        if !self.exists(name).await {
            tracing::error!(netns = %name, "Cannot delete missing namespace");
            return Err(NetError::not_found(ResourceKind::Namespace, name));
        }
        self.host.delete_namespace(name).await?;
        tracing::info!(netns = %name, "Namespace deleted");
        Ok(())
    }

    /// List all named namespaces.
    pub async fn list(&self) -> Result<Vec<String>> {
        self.host.namespaces().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryHost;

    fn manager() -> NamespaceManager {
        NamespaceManager::new(Arc::new(MemoryHost::new()))
    }

    #[tokio::test]
    async fn test_create_and_delete() {
        let ns = manager();
        assert!(!ns.exists("ns1").await);

        ns.create("ns1").await.unwrap();
        assert!(ns.exists("ns1").await);
        assert_eq!(ns.list().await.unwrap(), vec!["ns1"]);

        ns.delete("ns1").await.unwrap();
        assert!(!ns.exists("ns1").await);
    }

    #[tokio::test]
    async fn test_create_twice_fails() {
        let ns = manager();
        ns.create("ns1").await.unwrap();
        let err = ns.create("ns1").await.unwrap_err();
        assert!(err.is_already_exists());
    }

    #[tokio::test]
    async fn test_ensure_is_idempotent() {
        let ns = manager();
        assert!(ns.ensure("ns1").await.unwrap());
        assert!(!ns.ensure("ns1").await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_missing() {
        let err = manager().delete("nope").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_invalid_name_not_created() {
        let ns = manager();
        assert!(ns.create("a/b").await.is_err());
        assert!(!ns.exists("a/b").await);
    }
}
