//! Memory layer integration for the server
//!
//! Owns the [`MemoryEngine`] and tracks the one background optimization the
//! engine allows at a time.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::Path;
use tiered_memory::{EngineConfig, MemoryEngine, OptimizationHandle, OptimizationReport};
use tokio::sync::Mutex;

use crate::error::{ServerError, ServerResult};

/// Snapshot of the background optimization state
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizationStatus {
    pub running: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    pub cancel_requested: bool,
    /// Report of the most recently finished run
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_report: Option<OptimizationReport>,
}

#[derive(Default)]
struct Background {
    handle: Option<OptimizationHandle>,
    last_report: Option<OptimizationReport>,
}

pub struct MemoryService {
    engine: MemoryEngine,
    background: Mutex<Background>,
}

impl MemoryService {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            engine: MemoryEngine::new(config),
            background: Mutex::new(Background::default()),
        }
    }

    /// Load a (possibly partial) JSON `EngineConfig` from disk
    pub fn from_config_file(path: &Path) -> ServerResult<Self> {
        let json = std::fs::read_to_string(path)?;
        let config = EngineConfig::from_json(&json)?;
        tracing::info!("Loaded engine configuration from {}", path.display());
        Ok(Self::new(config))
    }

    pub fn engine(&self) -> &MemoryEngine {
        &self.engine
    }

    /// Run the full optimization on the caller's task
    pub async fn optimize_now(&self, dry_run: bool) -> ServerResult<OptimizationReport> {
        let engine = self.engine.clone();
        let report = tokio::task::spawn_blocking(move || engine.optimize(dry_run))
            .await
            .map_err(|e| ServerError::Memory(tiered_memory::MemoryError::other(e.to_string())))??;
        tracing::info!(
            "Optimization finished in {} ms ({} errors)",
            report.duration_ms,
            report.errors.len()
        );
        Ok(report)
    }

    /// Start a background optimization; returns its start time
    pub async fn start_optimization(&self, dry_run: bool) -> ServerResult<DateTime<Utc>> {
        let mut background = self.background.lock().await;
        Self::collect_finished(&mut background).await;

        let handle = self.engine.spawn_optimization(dry_run)?;
        let started_at = handle.started_at();
        background.handle = Some(handle);
        Ok(started_at)
    }

    pub async fn optimization_status(&self) -> OptimizationStatus {
        let mut background = self.background.lock().await;
        Self::collect_finished(&mut background).await;

        OptimizationStatus {
            running: background.handle.is_some(),
            started_at: background.handle.as_ref().map(OptimizationHandle::started_at),
            cancel_requested: background
                .handle
                .as_ref()
                .map_or(false, OptimizationHandle::is_cancelled),
            last_report: background.last_report.clone(),
        }
    }

    /// Request cancellation; false when nothing is running
    pub async fn cancel_optimization(&self) -> bool {
        let mut background = self.background.lock().await;
        Self::collect_finished(&mut background).await;

        match &background.handle {
            Some(handle) => {
                handle.cancel();
                tracing::info!("Cancellation requested for background optimization");
                true
            }
            None => false,
        }
    }

    /// Move a finished run's report out of its handle
    async fn collect_finished(background: &mut Background) {
        if !background.handle.as_ref().map_or(false, OptimizationHandle::is_finished) {
            return;
        }
        if let Some(handle) = background.handle.take() {
            match handle.join().await {
                Ok(report) => background.last_report = Some(report),
                Err(e) => tracing::warn!("Background optimization failed: {}", e),
            }
        }
    }
}

impl Default for MemoryService {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}
