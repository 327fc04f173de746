use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::JobError;
use crate::models::JobResult;

/// A business operation a scheduled job performs. Opaque to the engine.
#[async_trait]
pub trait JobOperation: Send + Sync {
    async fn run(&self) -> Result<JobResult, JobError>;
}

/// Adapter turning an async closure into a [`JobOperation`].
pub struct FnOperation<F>(F);

#[async_trait]
impl<F, Fut> JobOperation for FnOperation<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<JobResult, JobError>> + Send + 'static,
{
    async fn run(&self) -> Result<JobResult, JobError> {
        (self.0)().await
    }
}

/// Handlers keyed by operation-type tag.
#[derive(Clone, Default)]
pub struct OperationRegistry {
    handlers: HashMap<String, Arc<dyn JobOperation>>,
}

impl OperationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, operation_type: impl Into<String>, operation: Arc<dyn JobOperation>) -> &mut Self {
        self.handlers.insert(operation_type.into(), operation);
        self
    }

    pub fn register_fn<F, Fut>(&mut self, operation_type: impl Into<String>, f: F) -> &mut Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<JobResult, JobError>> + Send + 'static,
    {
        self.register(operation_type, Arc::new(FnOperation(f)))
    }

    pub fn get(&self, operation_type: &str) -> Option<Arc<dyn JobOperation>> {
        self.handlers.get(operation_type).cloned()
    }

    pub fn contains(&self, operation_type: &str) -> bool {
        self.handlers.contains_key(operation_type)
    }

    pub fn operation_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.handlers.keys().cloned().collect();
        types.sort();
        types
    }
}
