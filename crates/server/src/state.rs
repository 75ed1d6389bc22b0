use emotion_monitor_core::pipeline::EmotionPipeline;
use emotion_monitor_core::store::Store;

#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub pipeline: EmotionPipeline,
}

impl AppState {
    pub fn new(store: Store, pipeline: EmotionPipeline) -> Self {
        Self { store, pipeline }
    }

    /// Run a store call on the blocking pool.
    pub async fn with_store<F, T>(&self, f: F) -> Result<T, crate::error::ApiError>
    where
        F: FnOnce(&Store) -> Result<T, emotion_monitor_core::store::StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.store.clone();
        Ok(tokio::task::spawn_blocking(move || f(&store)).await??)
    }
}
