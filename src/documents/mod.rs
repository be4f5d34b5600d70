//! Company documents
//!
//! The document provider fetches, normalizes and stores a company's recent
//! filings. [`DocumentCache`] sits in front of it and guarantees that at most
//! one fetch per company is in flight.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::error::DocumentError;
use crate::models::{CompanyId, DocumentBundle};

pub mod cache;
pub mod mock;
pub mod quartr;

pub use cache::{CacheStatus, DocumentCache};
pub use mock::MockDocumentProvider;
pub use quartr::QuartrDocumentProvider;

/// Fetch + normalize + store, as one call.
///
/// May take seconds. Called once per cache miss.
#[async_trait]
pub trait DocumentProvider: Send + Sync {
    async fn fetch_and_normalize(
        &self,
        company_id: &CompanyId,
    ) -> Result<DocumentBundle, DocumentError>;
}

/// Storage for normalized bundles, used by provider implementations.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn put(&self, bundle: &DocumentBundle) -> Result<(), DocumentError>;
    async fn get(&self, company_id: &CompanyId) -> Result<DocumentBundle, DocumentError>;
}

/// In-memory document store for development
pub struct InMemoryDocumentStore {
    bundles: RwLock<HashMap<CompanyId, DocumentBundle>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self {
            bundles: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn put(&self, bundle: &DocumentBundle) -> Result<(), DocumentError> {
        let mut bundles = self.bundles.write().await;
        bundles.insert(bundle.company_id.clone(), bundle.clone());
        Ok(())
    }

    async fn get(&self, company_id: &CompanyId) -> Result<DocumentBundle, DocumentError> {
        let bundles = self.bundles.read().await;
        bundles
            .get(company_id)
            .cloned()
            .ok_or_else(|| DocumentError::NotFound(company_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_store_roundtrip() {
        let store = InMemoryDocumentStore::new();
        let company = CompanyId::new("4742");

        assert_eq!(
            store.get(&company).await,
            Err(DocumentError::NotFound("4742".to_string()))
        );

        let bundle = DocumentBundle::new(company.clone(), vec![]);
        store.put(&bundle).await.unwrap();
        assert_eq!(store.get(&company).await.unwrap().company_id, company);
    }
}
