use crate::session::error::DumpError;
use crate::session::metadata::DumpReason;
use crate::session::registry::StateProducerRegistry;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// Combined result of every registered producer
#[derive(Debug, Clone, PartialEq)]
pub enum Snapshot {
    /// No producers were registered; the dump must be suppressed
    Empty,
    Single(Value),
    /// One slot per producer, in registration order
    Multiple(Vec<Value>),
}

impl Snapshot {
    pub fn is_empty(&self) -> bool {
        matches!(self, Snapshot::Empty)
    }

    /// On-disk shape of `state`: the value itself for a single producer, an
    /// array for several, nothing when there is nothing to write
    pub fn into_state(self) -> Option<Value> {
        match self {
            Snapshot::Empty => None,
            Snapshot::Single(value) => Some(value),
            Snapshot::Multiple(values) => Some(Value::Array(values)),
        }
    }
}

/// Collects state from every registered producer
#[derive(Clone)]
pub struct SnapshotAggregator {
    registry: Arc<StateProducerRegistry>,
}

impl SnapshotAggregator {
    pub fn new(registry: Arc<StateProducerRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<StateProducerRegistry> {
        &self.registry
    }

    /// Invoke producers sequentially in registration order
    ///
    /// The first failing producer aborts the collection and its error is
    /// returned unchanged; later producers are not invoked.
    pub async fn collect(&self, reason: &DumpReason) -> Result<Snapshot, DumpError> {
        let producers = self.registry.snapshot();

        match producers.as_slice() {
            [] => Ok(Snapshot::Empty),
            [producer] => {
                let value = producer
                    .produce(reason)
                    .await
                    .map_err(|e| DumpError::producer(0, e))?;
                Ok(Snapshot::Single(value))
            }
            many => {
                let mut values = Vec::with_capacity(many.len());
                for (index, producer) in many.iter().enumerate() {
                    debug!("Collecting state from producer #{} ({})", index, reason);
                    let value = producer
                        .produce(reason)
                        .await
                        .map_err(|e| DumpError::producer(index, e))?;
                    values.push(value);
                }
                Ok(Snapshot::Multiple(values))
            }
        }
    }
}
