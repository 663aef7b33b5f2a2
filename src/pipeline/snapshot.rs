//! Single-writer, multi-reader holder of the published generation.

use std::sync::{Arc, Mutex, PoisonError, RwLock};

use super::runner::{Pipeline, PipelineInputs, RunReport};
use super::tables::DerivedTables;

/// Readers clone an `Arc` of the current generation and never block a run
/// for longer than the final swap. Runs are serialised by a writer lock, so
/// two runs cannot interleave their table replacements.
#[derive(Debug, Default)]
pub struct SnapshotStore {
    current: RwLock<Arc<DerivedTables>>,
    writer: Mutex<()>,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The most recently published generation.
    pub fn current(&self) -> Arc<DerivedTables> {
        let guard = self.current.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&guard)
    }

    /// Run the pipeline and publish the resulting generation.
    pub fn run(&self, pipeline: &Pipeline, inputs: &PipelineInputs) -> RunReport {
        self.run_and_publish(pipeline, inputs, |_, _| Ok::<(), std::convert::Infallible>(()))
            .map(|(report, ())| report)
            .unwrap_or_else(|never| match never {})
    }

    /// Run the pipeline, hand the new generation to `persist` while still
    /// holding the writer lock, and publish it only if `persist` succeeds.
    pub fn run_and_publish<T, E, F>(
        &self,
        pipeline: &Pipeline,
        inputs: &PipelineInputs,
        persist: F,
    ) -> Result<(RunReport, T), E>
    where
        F: FnOnce(&DerivedTables, &RunReport) -> Result<T, E>,
    {
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);

        let previous = self.current();
        let (next, report) = pipeline.run(inputs, &previous);
        let persisted = persist(&next, &report)?;

        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(next);
        tracing::debug!("Published generation {}", report.generation);

        Ok((report, persisted))
    }
}
