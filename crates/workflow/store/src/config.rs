//! Storage backend configuration

use std::sync::Arc;

use planroom_workflow_types::WorkflowResult;

use crate::{InMemoryWorkflowStore, PostgresWorkflowStore, WorkflowStore};

/// Which backend the workflow engine persists to
#[derive(Debug, Clone)]
pub enum StoreConfig {
    /// Keep all workflow state in process memory only
    Memory,
    /// Persist to PostgreSQL
    Postgres {
        database_url: String,
        max_connections: u32,
    },
}

impl StoreConfig {
    pub fn memory() -> Self {
        Self::Memory
    }

    pub fn postgres(database_url: impl Into<String>, max_connections: u32) -> Self {
        Self::Postgres {
            database_url: database_url.into(),
            max_connections,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Postgres { .. } => "postgres",
        }
    }

    /// Build the configured backend
    pub async fn bootstrap(self) -> WorkflowResult<Arc<dyn WorkflowStore>> {
        match self {
            Self::Memory => Ok(Arc::new(InMemoryWorkflowStore::new())),
            Self::Postgres {
                database_url,
                max_connections,
            } => {
                let store =
                    PostgresWorkflowStore::connect(&database_url, max_connections).await?;
                Ok(Arc::new(store))
            }
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::Memory
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels() {
        assert_eq!(StoreConfig::memory().label(), "memory");
        assert_eq!(
            StoreConfig::postgres("postgres://localhost/planroom", 5).label(),
            "postgres"
        );
        assert_eq!(StoreConfig::default().label(), "memory");
    }

    #[tokio::test]
    async fn test_bootstrap_memory() {
        let store = StoreConfig::memory().bootstrap().await.unwrap();
        assert!(store.load_templates().await.unwrap().is_empty());
    }
}
