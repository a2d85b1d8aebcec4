//! Durable operator records, looked up by token digest.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use dashmap::DashMap;

use corvid_protocol::Operator;

use crate::identity::{generate_token, token_digest};
use crate::ServerError;

/// Lookup of operators by the digest of their bearer token.
#[async_trait]
pub trait OperatorStore: Send + Sync {
    async fn operator_by_token(&self, token_digest: &str) -> Result<Option<Operator>, ServerError>;
}

/// Operators persisted as a JSON array.
///
/// Every lookup re-reads the file, so edits made by `corvid-server operator`
/// while the server runs are picked up on the next cache miss.
pub struct FileOperatorStore {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl FileOperatorStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All operators; a missing file is an empty store.
    pub async fn load(&self) -> Result<Vec<Operator>, ServerError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.is_empty() => Ok(Vec::new()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Create an operator and return it with its raw token. The raw token is
    /// not persisted and cannot be recovered later.
    pub async fn add_operator(&self, name: &str) -> Result<(Operator, String), ServerError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ServerError::Store("operator name must not be empty".into()));
        }
        let _guard = self.write_lock.lock().await;
        let mut operators = self.load().await?;
        if operators.iter().any(|o| o.name == name) {
            return Err(ServerError::DuplicateOperator(name.to_string()));
        }
        let token = generate_token();
        let operator = Operator {
            name: name.to_string(),
            token_digest: token_digest(&token),
            created_at: chrono::Utc::now(),
        };
        operators.push(operator.clone());
        self.save(&operators).await?;
        tracing::info!(operator = %operator.name, "Operator added");
        Ok((operator, token))
    }

    /// Remove an operator by name. Returns false if no such operator exists.
    /// A running server keeps serving cached identities until its token cache
    /// is cleared.
    pub async fn remove_operator(&self, name: &str) -> Result<bool, ServerError> {
        let _guard = self.write_lock.lock().await;
        let mut operators = self.load().await?;
        let before = operators.len();
        operators.retain(|o| o.name != name);
        if operators.len() == before {
            return Ok(false);
        }
        self.save(&operators).await?;
        tracing::info!(operator = %name, "Operator removed");
        Ok(true)
    }

    async fn save(&self, operators: &[Operator]) -> Result<(), ServerError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let data = serde_json::to_vec_pretty(operators)?;
        tokio::fs::write(&self.path, data).await?;
        // Owner read/write only.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o600)).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl OperatorStore for FileOperatorStore {
    async fn operator_by_token(&self, token_digest: &str) -> Result<Option<Operator>, ServerError> {
        let operators = self.load().await?;
        Ok(operators.into_iter().find(|o| o.token_digest == token_digest))
    }
}

/// In-memory operator store keyed by token digest.
#[derive(Debug, Default)]
pub struct MemoryOperatorStore {
    operators: DashMap<String, Operator>,
}

impl MemoryOperatorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `name` under a known raw token.
    pub fn insert_with_token(&self, name: &str, token: &str) -> Operator {
        let operator = Operator {
            name: name.to_string(),
            token_digest: token_digest(token),
            created_at: chrono::Utc::now(),
        };
        self.operators.insert(operator.token_digest.clone(), operator.clone());
        operator
    }

    /// Register `name` under a fresh token and return the raw token.
    pub fn insert(&self, name: &str) -> String {
        let token = generate_token();
        self.insert_with_token(name, &token);
        token
    }

    pub fn remove(&self, name: &str) {
        self.operators.retain(|_, o| o.name != name);
    }
}

#[async_trait]
impl OperatorStore for MemoryOperatorStore {
    async fn operator_by_token(&self, token_digest: &str) -> Result<Option<Operator>, ServerError> {
        Ok(self.operators.get(token_digest).map(|e| e.value().clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn file_store_round_trips_operators() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileOperatorStore::new(dir.path().join("ops/operators.json"));
        assert!(store.load().await.unwrap().is_empty());

        let (alice, token) = store.add_operator("alice").await.unwrap();
        let found = store.operator_by_token(&token_digest(&token)).await.unwrap();
        assert_eq!(found, Some(alice));
        assert!(store.operator_by_token(&token_digest("wrong")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn file_store_never_persists_raw_token() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileOperatorStore::new(dir.path().join("operators.json"));
        let (_, token) = store.add_operator("alice").await.unwrap();
        let raw = std::fs::read_to_string(store.path()).unwrap();
        assert!(!raw.contains(&token));
        assert!(raw.contains(&token_digest(&token)));
    }

    #[tokio::test]
    async fn file_store_rejects_duplicates_and_blank_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileOperatorStore::new(dir.path().join("operators.json"));
        store.add_operator("alice").await.unwrap();
        assert!(matches!(
            store.add_operator("alice").await,
            Err(ServerError::DuplicateOperator(_))
        ));
        assert!(matches!(store.add_operator("   ").await, Err(ServerError::Store(_))));
    }

    #[tokio::test]
    async fn file_store_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileOperatorStore::new(dir.path().join("operators.json"));
        let (_, token) = store.add_operator("alice").await.unwrap();
        assert!(store.remove_operator("alice").await.unwrap());
        assert!(!store.remove_operator("alice").await.unwrap());
        assert!(store.operator_by_token(&token_digest(&token)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("operators.json");
        std::fs::write(&path, "{not json").unwrap();
        let store = FileOperatorStore::new(path);
        assert!(matches!(store.operator_by_token("x").await, Err(ServerError::Json(_))));
    }
}
