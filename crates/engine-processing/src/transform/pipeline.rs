use super::error::TransformError;
use model::records::row::RowData;
use std::sync::Arc;

/// Row-level mapping applied between extract and load.
pub trait RowTransform: Send + Sync {
    fn apply(&self, row: RowData) -> Result<RowData, TransformError>;
}

/// Wraps a closure as a transform.
pub struct FnTransform<F>(pub F);

impl<F> RowTransform for FnTransform<F>
where
    F: Fn(RowData) -> Result<RowData, TransformError> + Send + Sync,
{
    fn apply(&self, row: RowData) -> Result<RowData, TransformError> {
        (self.0)(row)
    }
}

pub trait TransformPipelineExt {
    fn add_if<T, F>(self, condition: bool, factory: F) -> Self
    where
        T: RowTransform + 'static,
        F: FnOnce() -> T;
}

/// Transforms run in insertion order; the first error stops the row.
#[derive(Clone)]
pub struct TransformPipeline {
    transforms: Vec<Arc<dyn RowTransform>>,
}

impl TransformPipeline {
    pub fn new() -> Self {
        Self {
            transforms: Vec::new(),
        }
    }

    pub fn apply(&self, row: RowData) -> Result<RowData, TransformError> {
        self.transforms
            .iter()
            .try_fold(row, |acc, transform| transform.apply(acc))
    }

    pub fn add_transform<T: RowTransform + 'static>(mut self, transform: T) -> Self {
        self.transforms.push(Arc::new(transform));
        self
    }

    pub fn add_fn<F>(self, f: F) -> Self
    where
        F: Fn(RowData) -> Result<RowData, TransformError> + Send + Sync + 'static,
    {
        self.add_transform(FnTransform(f))
    }

    pub fn len(&self) -> usize {
        self.transforms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }
}

impl TransformPipelineExt for TransformPipeline {
    fn add_if<T, F>(mut self, condition: bool, factory: F) -> Self
    where
        T: RowTransform + 'static,
        F: FnOnce() -> T,
    {
        if condition {
            self = self.add_transform(factory());
        }
        self
    }
}

impl Default for TransformPipeline {
    fn default() -> Self {
        Self::new()
    }
}
