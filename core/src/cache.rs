//! Single-slot holder for the loaded speech model.
//!
//! The model is built on first use and kept until the process exits. The
//! slot is an at-most-once cell: a failed load leaves it empty, so the next
//! request tries again, while a successful load is never repeated.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::OnceCell;
use tokio::task;
use tracing::{debug, info};

use crate::model::{ModelError, ModelLoader, SpeechModel};

pub struct ModelCache {
    loader: Arc<dyn ModelLoader>,
    cell: OnceCell<Arc<dyn SpeechModel>>,
}

impl ModelCache {
    pub fn new(loader: Arc<dyn ModelLoader>) -> Self {
        Self {
            loader,
            cell: OnceCell::new(),
        }
    }

    /// Check that the backing engine is available without loading it.
    pub async fn probe(&self) -> Result<(), ModelError> {
        let loader = Arc::clone(&self.loader);
        task::spawn_blocking(move || loader.probe())
            .await
            .map_err(|e| ModelError::Unavailable(e.to_string()))?
    }

    /// Return the cached model, loading it first if this is the first use.
    pub async fn get_or_init(&self) -> Result<Arc<dyn SpeechModel>, ModelError> {
        if let Some(model) = self.cell.get() {
            debug!(target: "model_cache", model = model.name(), "Using cached model");
            return Ok(Arc::clone(model));
        }

        let model = self
            .cell
            .get_or_try_init(|| async {
                info!(target: "model_cache", "Loading model (first use)");
                let started = Instant::now();
                let loader = Arc::clone(&self.loader);
                let model = task::spawn_blocking(move || loader.load())
                    .await
                    .map_err(|e| ModelError::LoadFailed(e.to_string()))??;
                info!(
                    target: "model_cache",
                    model = model.name(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Model loaded and cached"
                );
                Ok::<_, ModelError>(model)
            })
            .await?;

        Ok(Arc::clone(model))
    }

    /// The cached model, if one has been loaded
    pub fn get(&self) -> Option<Arc<dyn SpeechModel>> {
        self.cell.get().cloned()
    }

    pub fn is_loaded(&self) -> bool {
        self.cell.initialized()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MockModelLoader, MockSpeechModel};
    use mockall::Sequence;

    fn stub_model() -> Arc<dyn SpeechModel> {
        let mut model = MockSpeechModel::new();
        model.expect_name().return_const("stub");
        Arc::new(model)
    }

    #[tokio::test]
    async fn test_load_runs_once_across_many_gets() {
        let mut loader = MockModelLoader::new();
        loader
            .expect_load()
            .times(1)
            .returning(|| Ok(stub_model()));

        let cache = ModelCache::new(Arc::new(loader));
        assert!(!cache.is_loaded());

        let first = cache.get_or_init().await.unwrap();
        for _ in 0..10 {
            let again = cache.get_or_init().await.unwrap();
            assert!(Arc::ptr_eq(&first, &again));
        }
        assert!(cache.is_loaded());
    }

    #[tokio::test]
    async fn test_failed_load_leaves_slot_empty() {
        let mut seq = Sequence::new();
        let mut loader = MockModelLoader::new();
        loader
            .expect_load()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Err(ModelError::LoadFailed("weights missing".into())));
        loader
            .expect_load()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(stub_model()));

        let cache = ModelCache::new(Arc::new(loader));
        let err = cache.get_or_init().await.err().unwrap();
        assert!(err.to_string().contains("weights missing"));
        assert!(cache.get().is_none());

        cache.get_or_init().await.unwrap();
        assert!(cache.get().is_some());
    }

    #[tokio::test]
    async fn test_probe_does_not_load() {
        let mut loader = MockModelLoader::new();
        loader.expect_probe().times(1).returning(|| Ok(()));
        loader.expect_load().never();

        let cache = ModelCache::new(Arc::new(loader));
        cache.probe().await.unwrap();
        assert!(!cache.is_loaded());
    }
}
