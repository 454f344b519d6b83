use crate::session::metadata::DumpReason;
use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::debug;

/// A source of application state, invoked once per dump
#[async_trait]
pub trait StateProducer: Send + Sync {
    /// Produce this producer's slice of the snapshot for `reason`
    async fn produce(&self, reason: &DumpReason) -> Result<Value>;
}

/// Adapter turning an async closure into a [`StateProducer`]
pub struct FnProducer<F> {
    func: F,
}

impl<F> FnProducer<F> {
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

#[async_trait]
impl<F, Fut> StateProducer for FnProducer<F>
where
    F: Fn(DumpReason) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    async fn produce(&self, reason: &DumpReason) -> Result<Value> {
        (self.func)(reason.clone()).await
    }
}

/// Adapter for synchronous closures returning any serializable value
pub struct SyncProducer<F> {
    func: F,
}

impl<F> SyncProducer<F> {
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

#[async_trait]
impl<F, T> StateProducer for SyncProducer<F>
where
    F: Fn(&DumpReason) -> T + Send + Sync,
    T: Serialize + 'static,
{
    async fn produce(&self, reason: &DumpReason) -> Result<Value> {
        Ok(serde_json::to_value((self.func)(reason))?)
    }
}

/// Opaque reference to a registered producer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProducerHandle {
    index: usize,
}

impl ProducerHandle {
    /// Position of the producer in registration order, which is also its
    /// slot in a multi-producer `state` array
    pub fn index(&self) -> usize {
        self.index
    }
}

/// Append-only, ordered list of state producers
#[derive(Default)]
pub struct StateProducerRegistry {
    producers: RwLock<Vec<Arc<dyn StateProducer>>>,
}

impl StateProducerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a producer; no deduplication is performed
    pub fn register(&self, producer: impl StateProducer + 'static) -> ProducerHandle {
        self.register_arc(Arc::new(producer))
    }

    pub fn register_arc(&self, producer: Arc<dyn StateProducer>) -> ProducerHandle {
        let mut producers = self
            .producers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        producers.push(producer);

        let handle = ProducerHandle {
            index: producers.len() - 1,
        };
        debug!("Registered state producer #{}", handle.index);
        handle
    }

    /// Register an async closure
    pub fn register_fn<F, Fut>(&self, func: F) -> ProducerHandle
    where
        F: Fn(DumpReason) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        self.register(FnProducer::new(func))
    }

    /// Register a synchronous closure returning any serializable value
    pub fn register_sync<F, T>(&self, func: F) -> ProducerHandle
    where
        F: Fn(&DumpReason) -> T + Send + Sync + 'static,
        T: Serialize + 'static,
    {
        self.register(SyncProducer::new(func))
    }

    pub fn len(&self) -> usize {
        self.producers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ordered copy of the current producers
    ///
    /// The lock is released before returning, so callers can await producers
    /// without blocking registration.
    pub fn snapshot(&self) -> Vec<Arc<dyn StateProducer>> {
        self.producers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
