use crate::config::schema::EngineConfig;
use crate::error::{OpusMtError, Result};
use crate::lang::LanguagePair;
use crate::models::ModelRepository;
use crate::worker::process::TranslationWorker;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Language pair -> running translation worker
///
/// At most one live worker exists per pair. Check-and-create happens under a
/// single lock, so concurrent lookups for the same pair never start two
/// processes. Exited workers are replaced lazily on the next lookup.
pub struct WorkerRegistry {
    repository: Arc<ModelRepository>,
    engine: EngineConfig,
    workers: Mutex<HashMap<LanguagePair, Arc<TranslationWorker>>>,
}

impl WorkerRegistry {
    #[must_use]
    pub fn new(repository: Arc<ModelRepository>, engine: EngineConfig) -> Self {
        Self {
            repository,
            engine,
            workers: Mutex::new(HashMap::new()),
        }
    }

    /// Return the live worker for `pair`, starting one if needed
    ///
    /// # Errors
    /// - Returns `ModelMissing` if no model directory exists for `pair`
    /// - Returns `WorkerUnavailable` if the engine process cannot be started
    pub async fn get_or_start(&self, pair: &LanguagePair) -> Result<Arc<TranslationWorker>> {
        let mut workers = self.workers.lock().await;

        if let Some(worker) = workers.get(pair) {
            if worker.is_running() {
                return Ok(Arc::clone(worker));
            }
            tracing::info!("Worker for {pair} has exited, starting a new one");
        }

        let model_dir = self
            .repository
            .resolve_latest_local(pair)
            .ok_or_else(|| OpusMtError::ModelMissing(pair.to_string()))?;

        let worker = Arc::new(TranslationWorker::spawn(&model_dir, pair.clone(), &self.engine)?);
        workers.insert(pair.clone(), Arc::clone(&worker));

        Ok(worker)
    }

    /// Pairs that currently have a registered worker
    pub async fn active_pairs(&self) -> Vec<LanguagePair> {
        let workers = self.workers.lock().await;
        let mut pairs: Vec<LanguagePair> = workers
            .iter()
            .filter(|(_, w)| w.is_running())
            .map(|(p, _)| p.clone())
            .collect();
        pairs.sort();
        pairs
    }

    /// Terminate every worker and clear the registry
    pub async fn shutdown(&self) {
        let mut workers = self.workers.lock().await;
        for (_, worker) in workers.drain() {
            worker.terminate();
        }
    }
}
