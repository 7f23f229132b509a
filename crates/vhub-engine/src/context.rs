//! Process-wide analysis context.
//!
//! Owns the registry, cache, pipeline and broadcast manager, and the
//! background tasks that keep them running.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use vhub_models::{AnalysisRequest, AnalysisResult};

use crate::broadcast::BroadcastManager;
use crate::cache::ResultCache;
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::frame::FrameSource;
use crate::model::{ModelLoader, SharedModelManager};
use crate::pipeline::ProcessingPipeline;
use crate::registry::ClassifierRegistry;

pub struct AnalysisContext {
    config: EngineConfig,
    registry: Arc<ClassifierRegistry>,
    cache: Arc<ResultCache>,
    pipeline: Arc<ProcessingPipeline>,
    broadcast: Arc<BroadcastManager>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl AnalysisContext {
    pub fn new(
        config: EngineConfig,
        loader: Arc<dyn ModelLoader>,
        frames: Arc<dyn FrameSource>,
    ) -> Self {
        let models = Arc::new(SharedModelManager::new(loader));
        let registry = Arc::new(ClassifierRegistry::new(models));
        let cache = Arc::new(ResultCache::new(config.cache.clone()));
        let pipeline = Arc::new(ProcessingPipeline::new(
            Arc::clone(&registry),
            Arc::clone(&cache),
            frames,
            config.pipeline.clone(),
        ));
        let broadcast = Arc::new(BroadcastManager::new(config.broadcast.clone()));
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            config,
            registry,
            cache,
            pipeline,
            broadcast,
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Create and initialize the default classifiers and start background tasks.
    ///
    /// Classifiers that fail to load stay registered and uninitialized.
    pub async fn initialize(&self) -> EngineResult<()> {
        for classifier_type in &self.config.default_classifiers {
            let name = classifier_type.as_str();
            match self.registry.create_classifier(name, name, None).await {
                Ok(_) | Err(EngineError::ClassifierExists(_)) => {}
                Err(e) => return Err(e),
            }
        }

        let failed = self.registry.initialize_all().await;
        if !failed.is_empty() {
            warn!(failed = ?failed, "Some classifiers failed to initialize");
        }

        {
            let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
            if tasks.is_empty() {
                tasks.push(self.broadcast.spawn_fanout(self.shutdown_tx.subscribe()));
                tasks.push(self.spawn_cache_sweeper());
            }
        }

        let stats = self.registry.stats().await;
        info!(
            registered = stats.registered,
            initialized = stats.initialized,
            loaded_models = stats.loaded_models,
            "Analysis context initialized"
        );
        Ok(())
    }

    fn spawn_cache_sweeper(&self) -> JoinHandle<()> {
        let cache = Arc::clone(&self.cache);
        let mut shutdown = self.shutdown_tx.subscribe();
        let mut ticker = tokio::time::interval(self.config.cache.sweep_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        cache.sweep_expired();
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("Cache sweeper stopped");
        })
    }

    /// Analyze the latest frame and broadcast freshly computed results.
    pub async fn process_request(&self, request: &AnalysisRequest) -> EngineResult<AnalysisResult> {
        let result = self.pipeline.process_request(request).await?;
        if !result.cache_hit && !result.pipeline_info.classifiers_run.is_empty() {
            self.broadcast.broadcast(result.clone());
        }
        Ok(result)
    }

    /// Run `request` against the latest frame at the configured frame rate
    /// until shutdown.
    pub fn spawn_driver(self: &Arc<Self>, request: AnalysisRequest) {
        let context = Arc::clone(self);
        let mut shutdown = self.shutdown_tx.subscribe();
        let mut ticker = tokio::time::interval(self.config.frame_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let handle = tokio::spawn(async move {
            info!(fps = context.config.fps, classifiers = ?request.classifiers, "Analysis driver started");
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match context.process_request(&request).await {
                            Ok(_) => {}
                            Err(EngineError::NoFrameAvailable) => {
                                debug!("Driver tick skipped: no frame yet");
                            }
                            Err(e) => warn!(error = %e, "Driver analysis failed"),
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("Analysis driver stopped");
        });
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handle);
    }

    /// Stop background tasks and release every model.
    pub async fn shutdown(&self) {
        info!("Shutting down analysis context");
        let _ = self.shutdown_tx.send(true);

        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Background task ended abnormally");
            }
        }

        self.registry.cleanup_all().await;
        self.cache.clear();
        info!("Analysis context shut down");
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ClassifierRegistry> {
        &self.registry
    }

    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.cache
    }

    pub fn pipeline(&self) -> &Arc<ProcessingPipeline> {
        &self.pipeline
    }

    pub fn broadcast(&self) -> &Arc<BroadcastManager> {
        &self.broadcast
    }

    pub fn latest_result(&self) -> Option<AnalysisResult> {
        self.pipeline.latest_result()
    }
}
