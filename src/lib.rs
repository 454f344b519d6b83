//! # sessionkeeper
//!
//! Persist an application-defined snapshot of a long-running process to disk
//! at controlled moments (periodic autosave, graceful shutdown, uncaught
//! faults) and recover the most recent snapshot at startup.
//!
//! ## Architecture Overview
//!
//! - **[`session::registry`]**: ordered, append-only list of state producers
//! - **[`session::aggregator`]**: invokes producers in registration order
//! - **[`session::persistence`]**: atomic write and best-effort read of the session file
//! - **[`session::manager`]**: the lifecycle coordinator and its single-flight dump discipline
//! - **[`session::recovery`]**: startup read path
//! - **[`session::hooks`]**: termination signals and panic interception
//!
//! ## On-disk format
//!
//! ```json
//! {
//!   "meta": { "at": 1700000000000, "reason": "autosave" },
//!   "state": { "foo": "bar" }
//! }
//! ```
//!
//! With more than one producer registered, `state` is an array with one slot
//! per producer in registration order. `meta.error` is present only for
//! `uncaught-exception` dumps.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use sessionkeeper::{LifecycleCoordinator, SnapshotConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = SnapshotConfig::new("session.json").with_autosave_ms(60_000);
//!     let coordinator = Arc::new(LifecycleCoordinator::new(config).with_process_hooks());
//!
//!     if let Some(record) = coordinator.recovery().await {
//!         println!("Recovered state: {}", record.state());
//!     }
//!
//!     coordinator.register_sync(|_reason| serde_json::json!({ "open_files": 3 }));
//!     coordinator.start()?;
//!
//!     // ... run the application ...
//!     Ok(())
//! }
//! ```

/// Snapshot lifecycle: producers, aggregation, persistence, coordination
/// and recovery.
pub mod session;

/// Command-line argument parsing and configuration discovery.
pub mod cli;

/// Environment constants and path utilities.
pub mod env;

pub use session::{
    Completion, DumpError, DumpReason, ExitEvent, ExitHook, FaultInfo, FileStorage,
    LifecycleCoordinator, LifecyclePhase, PersistenceGateway, PersistenceResult,
    ProcessExitHook, ProducerHandle, RecoveryService, SessionMeta, SessionRecord, Snapshot,
    SnapshotAggregator, SnapshotConfig, StateProducer, StateProducerRegistry, Storage,
};
