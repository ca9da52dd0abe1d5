// THEORY:
// The `parallel_pipeline` runs many independent inspections at once. Images share
// nothing but the read-only pipeline (model, config, feedback), so the batch is
// embarrassingly parallel. The only real concerns are bounding the worker count
// and keeping one bad image from taking the batch down.
//
// Key architectural principles:
// 1.  **Blocking Work Off the Runtime**: Decoding, inference and pixel loops are CPU
//     bound. Each image runs inside `spawn_blocking`, never on an async worker.
// 2.  **Bounded Concurrency**: A semaphore sized to the CPU count (by default) caps how
//     many images are in flight, so a large folder cannot decode thousands of
//     images into memory at once.
// 3.  **Per-Item Isolation**: Every image yields its own `Result`. A failed decode, a
//     model error or even a panic inside a worker becomes an `Err` for that entry.
// 4.  **Order Preserved**: Results come back in input order regardless of which
//     worker finished first.

use crate::config::OutputLayout;
use crate::core_modules::anomaly_model::AnomalyModel;
use crate::error::{InspectionError, Result};
use crate::pipeline::{InspectionPipeline, PipelineResult};
use futures::future::join_all;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Outcome for one input image.
#[derive(Debug)]
pub struct BatchItem {
    pub image: PathBuf,
    pub outcome: Result<PipelineResult>,
}

/// Summary counts for a finished batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub succeeded: usize,
    pub failed: usize,
}

impl BatchSummary {
    pub fn of(items: &[BatchItem]) -> Self {
        let succeeded = items.iter().filter(|i| i.outcome.is_ok()).count();
        Self {
            succeeded,
            failed: items.len() - succeeded,
        }
    }
}

pub struct BatchRunner<M> {
    pipeline: Arc<InspectionPipeline<M>>,
    workers: usize,
}

impl<M: AnomalyModel + 'static> BatchRunner<M> {
    pub fn new(pipeline: InspectionPipeline<M>) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            workers: num_cpus::get().max(1),
        }
    }

    /// Caps concurrent images. Zero is treated as one.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn pipeline(&self) -> &InspectionPipeline<M> {
        &self.pipeline
    }

    /// Inspects every image. The returned list matches `images` one to one.
    pub async fn run(&self, images: Vec<PathBuf>, layout: OutputLayout) -> Vec<BatchItem> {
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let layout = Arc::new(layout);
        tracing::info!(images = images.len(), workers = self.workers, "starting batch");

        let tasks = images.into_iter().map(|image| {
            let semaphore = Arc::clone(&semaphore);
            let pipeline = Arc::clone(&self.pipeline);
            let layout = Arc::clone(&layout);
            async move {
                let outcome = Self::run_one(semaphore, pipeline, layout, image.clone()).await;
                if let Err(e) = &outcome {
                    tracing::error!(image = %image.display(), error = %e, "inspection failed");
                }
                BatchItem { image, outcome }
            }
        });

        let items = join_all(tasks).await;
        let summary = BatchSummary::of(&items);
        tracing::info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            "batch finished"
        );
        items
    }

    async fn run_one(
        semaphore: Arc<Semaphore>,
        pipeline: Arc<InspectionPipeline<M>>,
        layout: Arc<OutputLayout>,
        image: PathBuf,
    ) -> Result<PipelineResult> {
        let _permit = semaphore
            .acquire_owned()
            .await
            .map_err(|e| InspectionError::Worker {
                message: e.to_string(),
            })?;

        tokio::task::spawn_blocking(move || pipeline.run(&image, &layout))
            .await
            .map_err(|e| InspectionError::Worker {
                message: if e.is_panic() {
                    "worker panicked".to_string()
                } else {
                    e.to_string()
                },
            })?
    }
}
