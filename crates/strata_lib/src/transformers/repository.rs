use std::marker::PhantomData;

use async_trait::async_trait;
use strata_common_types::inputs::BlockRange;
use strata_common_types::{Fingerprint, Header, HeaderId};
use strata_store::{EventModel, Store};
use thiserror::Error;

/// A write failed and was rolled back, so the header is still unchecked.
#[derive(Debug, Error)]
#[error("failed to persist event models: {0:#}")]
pub struct PersistenceError(#[from] pub anyhow::Error);

/// Where an orchestrator keeps its models and checkpoints. One repository
/// serves exactly one transformer kind.
#[async_trait]
pub trait Repository: Send + Sync {
    type Model: Send + Sync;

    /// Stores `models` and marks the header as checked, atomically.
    async fn create(&self, header_id: HeaderId, models: Vec<Self::Model>)
        -> Result<usize, PersistenceError>;

    /// Marks a header without matching logs as checked.
    async fn mark_header_checked(&self, header_id: HeaderId) -> Result<(), PersistenceError>;

    /// Headers in `range` that aren't checked yet, lowest first. Header
    /// order between siblings at the same height is unspecified.
    async fn missing_headers(
        &self,
        range: BlockRange,
        fingerprint: &Fingerprint,
    ) -> Result<Vec<Header>, PersistenceError>;
}

/// [`Repository`] backed by the database, for any model with its own event
/// table.
#[derive(Debug, Clone)]
pub struct StoreRepository<M> {
    store: Store,
    kind: String,
    _model: PhantomData<fn() -> M>,
}

impl<M> StoreRepository<M> {
    pub fn new(store: Store, kind: impl Into<String>) -> Self {
        Self {
            store,
            kind: kind.into(),
            _model: PhantomData,
        }
    }
}

#[async_trait]
impl<M: EventModel> Repository for StoreRepository<M> {
    type Model = M;

    async fn create(&self, header_id: HeaderId, models: Vec<M>) -> Result<usize, PersistenceError> {
        Ok(self
            .store
            .create_event_models(header_id, &self.kind, &models)
            .await?)
    }

    async fn mark_header_checked(&self, header_id: HeaderId) -> Result<(), PersistenceError> {
        Ok(self.store.mark_header_checked(header_id, &self.kind).await?)
    }

    async fn missing_headers(
        &self,
        range: BlockRange,
        fingerprint: &Fingerprint,
    ) -> Result<Vec<Header>, PersistenceError> {
        Ok(self
            .store
            .missing_headers(range, fingerprint, &self.kind)
            .await?)
    }
}
