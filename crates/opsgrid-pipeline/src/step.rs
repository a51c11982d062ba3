//! Ordered step execution.

use std::future::Future;

use tracing::{debug, info, warn};

use crate::error::{PipelineError, PipelineResult};

/// Runs one pipeline's steps in order and records which completed.
///
/// A provider failure inside a step comes back as
/// [`PipelineError::Step`] carrying the pipeline and step names; other
/// errors pass through unchanged.
pub struct StepRunner {
    pipeline: &'static str,
    deployment: String,
    completed: Vec<&'static str>,
}

impl StepRunner {
    pub fn new(pipeline: &'static str, deployment: &str) -> Self {
        Self {
            pipeline,
            deployment: deployment.to_string(),
            completed: Vec::new(),
        }
    }

    pub async fn step<T, Fut>(&mut self, name: &'static str, work: Fut) -> PipelineResult<T>
    where
        Fut: Future<Output = PipelineResult<T>>,
    {
        debug!(pipeline = self.pipeline, deployment = %self.deployment, step = name, "step starting");
        match work.await {
            Ok(value) => {
                self.completed.push(name);
                Ok(value)
            }
            Err(err) => {
                warn!(pipeline = self.pipeline, deployment = %self.deployment, step = name, error = %err, "step failed");
                Err(match err {
                    PipelineError::Cloud(source) => PipelineError::Step {
                        pipeline: self.pipeline,
                        step: name,
                        source,
                    },
                    other => other,
                })
            }
        }
    }

    /// Log completion and hand back the step list.
    pub fn finish(self) -> Vec<&'static str> {
        info!(pipeline = self.pipeline, deployment = %self.deployment, steps = self.completed.len(), "pipeline deployed");
        self.completed
    }
}
