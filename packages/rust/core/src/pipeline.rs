//! One classification run: bootstrap → detect → reconcile → propagate.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{Instrument, error, info, info_span};

use agentsync_shared::{
    AgencyCandidate, PipelineConfig, PipelineStage, ReconcileResult, Result, RunId,
    SyncTaskHandle,
};
use agentsync_store::{DocumentStore, IndexStatus};

use crate::detector::AgencyDetector;
use crate::propagator::SyncPropagator;
use crate::registry::AgentRegistry;

/// Summary of a finished run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: RunId,
    pub registry_index: String,
    /// Whether the registry index had to be created by this run.
    pub registry_status: IndexStatus,
    /// Number of candidates detected.
    pub candidates: usize,
    pub reconcile: ReconcileResult,
    /// Handle of the submitted flag update, `None` when nothing was detected.
    pub task: Option<SyncTaskHandle>,
    pub stage: PipelineStage,
    pub elapsed: Duration,
}

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when the run enters a new stage, including `Failed`.
    fn stage(&self, stage: PipelineStage);
    /// Called once detection has produced its candidates.
    fn candidates_found(&self, count: usize);
    /// Called when the run completes.
    fn done(&self, report: &RunReport);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn stage(&self, _stage: PipelineStage) {}
    fn candidates_found(&self, _count: usize) {}
    fn done(&self, _report: &RunReport) {}
}

/// The batch job. Holds its store and configuration; no global state.
pub struct SyncPipeline {
    config: PipelineConfig,
    detector: AgencyDetector,
    registry: AgentRegistry,
    propagator: SyncPropagator,
}

impl SyncPipeline {
    pub fn new(store: Arc<dyn DocumentStore>, config: PipelineConfig) -> Self {
        let detector = AgencyDetector::new(
            Arc::clone(&store),
            config.listings.clone(),
            config.detection.clone(),
        );
        let registry = AgentRegistry::new(Arc::clone(&store), config.registry.clone());
        let propagator = SyncPropagator::new(store, config.listings.clone());
        Self {
            config,
            detector,
            registry,
            propagator,
        }
    }

    /// Run the pipeline once.
    ///
    /// Failures while bootstrapping the registry, detecting, or submitting
    /// the flag update abort the run with an error tagged with that stage.
    /// Effects of earlier stages are kept. Per-record write failures only
    /// show up in [`RunReport::reconcile`].
    pub async fn run(&self, progress: &dyn ProgressReporter) -> Result<RunReport> {
        let run_id = RunId::new();
        let span = info_span!(
            "sync_run",
            %run_id,
            listings = %self.config.listings.index,
            registry = %self.config.registry.index,
        );

        let result = self.execute(run_id, progress).instrument(span).await;
        if let Err(e) = &result {
            error!(error = %e, stage = ?e.stage(), "sync run failed");
            progress.stage(PipelineStage::Failed);
        }
        result
    }

    async fn execute(&self, run_id: RunId, progress: &dyn ProgressReporter) -> Result<RunReport> {
        let start = Instant::now();
        info!("starting sync run");

        // --- Init: registry bootstrap ---
        progress.stage(PipelineStage::Init);
        let registry_status = self
            .registry
            .init()
            .await
            .map_err(|e| e.at_stage(PipelineStage::Init))?;

        // --- Detecting ---
        progress.stage(PipelineStage::Detecting);
        let candidates = self
            .detector
            .detect(self.config.detection.min_listing_count)
            .await
            .map_err(|e| e.at_stage(PipelineStage::Detecting))?;
        progress.candidates_found(candidates.len());

        // --- Reconciling ---
        progress.stage(PipelineStage::Reconciling);
        let reconcile = self.registry.reconcile(&candidates).await;

        // --- Propagating ---
        let task = if candidates.is_empty() {
            info!("no agencies detected; skipping propagation");
            None
        } else {
            progress.stage(PipelineStage::Propagating);
            let handle = self
                .propagator
                .propagate(&contact_ids(&candidates))
                .await
                .map_err(|e| e.at_stage(PipelineStage::Propagating))?;
            Some(handle)
        };

        progress.stage(PipelineStage::Done);
        let report = RunReport {
            run_id,
            registry_index: self.config.registry.index.clone(),
            registry_status,
            candidates: candidates.len(),
            reconcile,
            task,
            stage: PipelineStage::Done,
            elapsed: start.elapsed(),
        };

        info!(
            candidates = report.candidates,
            upserted = report.reconcile.upserted,
            failed = report.reconcile.failed,
            task_id = ?report.task.as_ref().map(|t| t.task_id.as_str()),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "sync run complete"
        );
        progress.done(&report);
        Ok(report)
    }
}

/// Contact ids of this run's candidates; the propagation scope.
fn contact_ids(candidates: &[AgencyCandidate]) -> Vec<String> {
    candidates.iter().map(|c| c.contact_id.clone()).collect()
}
