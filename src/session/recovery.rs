use crate::session::metadata::SessionRecord;
use crate::session::persistence::PersistenceGateway;
use std::sync::Arc;
use tracing::info;

/// Startup read path for the last persisted session
#[derive(Clone)]
pub struct RecoveryService {
    gateway: Arc<PersistenceGateway>,
}

impl RecoveryService {
    pub fn new(gateway: Arc<PersistenceGateway>) -> Self {
        Self { gateway }
    }

    /// Load the last record, or `None` when there is no usable prior session
    pub async fn recover(&self) -> Option<SessionRecord> {
        let record = self.gateway.read().await;
        if record.is_none() {
            info!("Starting without a prior session");
        }
        record
    }

    /// Like [`recover`](Self::recover), also handing the result to `callback`
    pub async fn recover_with<F>(&self, callback: F) -> Option<SessionRecord>
    where
        F: FnOnce(Option<&SessionRecord>),
    {
        let record = self.recover().await;
        callback(record.as_ref());
        record
    }
}
