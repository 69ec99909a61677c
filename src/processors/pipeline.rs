//! Ordered processor composition.

use serde_json::{Map, Value};
use tracing::debug;

use super::Processor;

/// Final outcome of a pipeline run.
#[derive(Debug, Clone)]
pub struct ProcessorResult {
    pub content: String,
    /// Per-processor metadata, keyed by processor name.
    pub metadata: Map<String, Value>,
    /// Input length in bytes across the whole pipeline.
    pub original_size: usize,
    /// Output length in bytes across the whole pipeline.
    pub processed_size: usize,
    /// True iff at least one processor's parameters were present and it ran.
    pub applied: bool,
    /// Last non-fatal processor failure, if any.
    pub error: Option<String>,
}

/// An ordered sequence of processors sharing one parameter map. Each
/// stage's output is the next stage's input; stages whose parameters are
/// absent are skipped; stage failures leave the content unchanged.
#[derive(Default)]
pub struct ProcessorPipeline {
    processors: Vec<Box<dyn Processor>>,
}

impl ProcessorPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, processor: Box<dyn Processor>) -> Self {
        self.processors.push(processor);
        self
    }

    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }

    pub fn run(&self, content: String, params: &Map<String, Value>) -> ProcessorResult {
        let original_size = content.len();
        let mut current = content;
        let mut metadata = Map::new();
        let mut applied = false;
        let mut error = None;

        for processor in &self.processors {
            if !processor.wants(params) {
                continue;
            }
            let step_input_size = current.len();
            match processor.apply(&current, params) {
                Ok(output) => {
                    applied |= output.applied;
                    let mut step_meta = output.metadata;
                    step_meta.insert("originalSize".to_string(), step_input_size.into());
                    step_meta.insert("processedSize".to_string(), output.content.len().into());
                    step_meta.insert("applied".to_string(), output.applied.into());
                    metadata.insert(processor.name().to_string(), Value::Object(step_meta));
                    current = output.content;
                }
                Err(e) => {
                    debug!(processor = processor.name(), error = %e, "processor failed");
                    let mut step_meta = Map::new();
                    step_meta.insert("error".to_string(), Value::String(e.clone()));
                    metadata.insert(processor.name().to_string(), Value::Object(step_meta));
                    error = Some(format!("{}: {}", processor.name(), e));
                }
            }
        }

        ProcessorResult {
            original_size,
            processed_size: current.len(),
            content: current,
            metadata,
            applied,
            error,
        }
    }
}
