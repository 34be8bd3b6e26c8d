//! In-memory store: HashMaps behind async RwLocks.
//!
//! Backs tests and storage-less deployments. Semantics match the RocksDB
//! store exactly, including the duplicate-creation failure the document
//! session relies on for its find-or-create fallback.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use tripsync_core::{
    Document, DocumentStore, Project, ProjectStore, ProjectUpdate, SimpleUser,
    StoreError, UserRecord, UserStore, UserUpdate,
};

/// One store serving all three trait surfaces.
#[derive(Default)]
pub struct MemoryStore {
    documents: RwLock<HashMap<String, Document>>,
    projects: RwLock<HashMap<String, Project>>,
    users: RwLock<HashMap<String, UserRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn find(&self, id: &str) -> Result<Option<Document>, StoreError> {
        Ok(self.documents.read().await.get(id).cloned())
    }

    async fn create(&self, doc: Document) -> Result<(), StoreError> {
        let mut documents = self.documents.write().await;
        if documents.contains_key(&doc.id) {
            return Err(StoreError::Duplicate(doc.id));
        }
        documents.insert(doc.id.clone(), doc);
        Ok(())
    }

    async fn update_content(
        &self,
        id: &str,
        content: serde_json::Value,
    ) -> Result<(), StoreError> {
        let mut documents = self.documents.write().await;
        match documents.get_mut(id) {
            Some(doc) => doc.content = content,
            None => {
                documents.insert(
                    id.to_string(),
                    Document {
                        id: id.to_string(),
                        content,
                    },
                );
            }
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.documents.write().await.remove(id).is_some())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<usize, StoreError> {
        let mut documents = self.documents.write().await;
        let before = documents.len();
        documents.retain(|id, _| !id.starts_with(prefix));
        Ok(before - documents.len())
    }
}

#[async_trait]
impl ProjectStore for MemoryStore {
    async fn find(&self, id: &str) -> Result<Option<Project>, StoreError> {
        Ok(self.projects.read().await.get(id).cloned())
    }

    async fn create(&self, project: Project) -> Result<(), StoreError> {
        let mut projects = self.projects.write().await;
        if projects.contains_key(&project.id) {
            return Err(StoreError::Duplicate(project.id));
        }
        projects.insert(project.id.clone(), project);
        Ok(())
    }

    async fn update(&self, id: &str, update: ProjectUpdate) -> Result<bool, StoreError> {
        let mut projects = self.projects.write().await;
        match projects.get_mut(id) {
            Some(project) => {
                update.apply(project);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.projects.write().await.remove(id).is_some())
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn find(&self, id: &str) -> Result<Option<UserRecord>, StoreError> {
        Ok(self.users.read().await.get(id).cloned())
    }

    async fn update(&self, user: &SimpleUser, update: UserUpdate) -> Result<(), StoreError> {
        let mut users = self.users.write().await;
        let record = users
            .entry(user.id.clone())
            .or_insert_with(|| UserRecord::new(user.clone()));
        update.apply(record);
        Ok(())
    }
}
