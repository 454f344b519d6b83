use crate::session::aggregator::SnapshotAggregator;
use crate::session::config::SnapshotConfig;
use crate::session::error::DumpError;
use crate::session::hooks::{Completion, ExitEvent, ExitHook, ProcessExitHook};
use crate::session::metadata::{DumpReason, FaultInfo, SessionMeta, SessionRecord};
use crate::session::persistence::{PersistenceGateway, PersistenceResult, Storage};
use crate::session::recovery::RecoveryService;
use crate::session::registry::{ProducerHandle, StateProducer, StateProducerRegistry};
use anyhow::Result;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, error, info, warn};

/// Observable lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecyclePhase {
    Idle,
    Dumping,
    /// A shutdown or fault dump has been claimed; no further autosaves run
    ShutdownDumped,
}

#[derive(Debug, Default)]
struct LifecycleState {
    in_flight: Option<DumpReason>,
    shutdown_dumped: bool,
}

impl LifecycleState {
    fn phase(&self) -> LifecyclePhase {
        if self.in_flight.is_some() {
            LifecyclePhase::Dumping
        } else if self.shutdown_dumped {
            LifecyclePhase::ShutdownDumped
        } else {
            LifecyclePhase::Idle
        }
    }
}

/// Clears the in-flight marker when the dump that claimed it ends, including
/// when its future is dropped early.
struct InFlight<'a> {
    state: &'a watch::Sender<LifecycleState>,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.state.send_modify(|state| state.in_flight = None);
    }
}

/// Decides when snapshots are taken and makes sure only one is ever in flight
///
/// Every trigger (autosave tick, termination notice, uncaught fault) claims
/// the single dump slot with a check-and-set on the lifecycle state before
/// touching producers or the session file.
pub struct LifecycleCoordinator {
    config: SnapshotConfig,
    registry: Arc<StateProducerRegistry>,
    aggregator: SnapshotAggregator,
    gateway: Arc<PersistenceGateway>,
    recovery: RecoveryService,
    exit_hook: Option<Arc<dyn ExitHook>>,
    state: watch::Sender<LifecycleState>,
    failed: AtomicBool,
    started: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl LifecycleCoordinator {
    /// Create a coordinator persisting to the local filesystem
    pub fn new(config: SnapshotConfig) -> Self {
        let gateway = PersistenceGateway::file(config.path.clone());
        Self::with_gateway(config, gateway)
    }

    /// Create a coordinator over a custom storage collaborator
    pub fn with_storage(config: SnapshotConfig, storage: Arc<dyn Storage>) -> Self {
        let gateway = PersistenceGateway::new(config.path.clone(), storage);
        Self::with_gateway(config, gateway)
    }

    fn with_gateway(config: SnapshotConfig, gateway: PersistenceGateway) -> Self {
        let registry = Arc::new(StateProducerRegistry::new());
        let gateway = Arc::new(gateway);

        Self {
            aggregator: SnapshotAggregator::new(registry.clone()),
            recovery: RecoveryService::new(gateway.clone()),
            registry,
            gateway,
            config,
            exit_hook: None,
            state: watch::channel(LifecycleState::default()).0,
            failed: AtomicBool::new(false),
            started: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Attach the facility that delivers termination notices and faults
    pub fn with_exit_hook(mut self, hook: Arc<dyn ExitHook>) -> Self {
        self.exit_hook = Some(hook);
        self
    }

    /// Attach OS signal and panic hooks configured from `catch_exceptions`
    pub fn with_process_hooks(self) -> Self {
        let hook = ProcessExitHook::new(
            self.config.catch_exceptions,
            self.config.fault_dump_timeout(),
        );
        self.with_exit_hook(Arc::new(hook))
    }

    pub fn config(&self) -> &SnapshotConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<StateProducerRegistry> {
        &self.registry
    }

    pub fn gateway(&self) -> &Arc<PersistenceGateway> {
        &self.gateway
    }

    pub fn register_snapshot(&self, producer: impl StateProducer + 'static) -> ProducerHandle {
        self.registry.register(producer)
    }

    pub fn register_fn<F, Fut>(&self, func: F) -> ProducerHandle
    where
        F: Fn(DumpReason) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        self.registry.register_fn(func)
    }

    pub fn register_sync<F, T>(&self, func: F) -> ProducerHandle
    where
        F: Fn(&DumpReason) -> T + Send + Sync + 'static,
        T: Serialize + 'static,
    {
        self.registry.register_sync(func)
    }

    /// Load the last persisted session
    pub async fn recovery(&self) -> Option<SessionRecord> {
        self.recovery.recover().await
    }

    pub async fn recovery_with<F>(&self, callback: F) -> Option<SessionRecord>
    where
        F: FnOnce(Option<&SessionRecord>),
    {
        self.recovery.recover_with(callback).await
    }

    pub fn phase(&self) -> LifecyclePhase {
        self.state.borrow().phase()
    }

    /// Whether an uncaught fault was reported
    pub fn has_failed(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }

    /// Status the host should exit with
    pub fn exit_code(&self) -> i32 {
        if self.has_failed() { 1 } else { 0 }
    }

    /// Start the autosave timer and install the exit hook, if any
    pub fn start(self: &Arc<Self>) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            warn!("Lifecycle coordinator already started");
            return Ok(());
        }

        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(period) = self.config.autosave_interval() {
            tasks.push(self.spawn_autosave(period));
            info!("Autosave started with interval: {}ms", period.as_millis());
        } else {
            debug!("Autosave disabled");
        }

        if let Some(hook) = &self.exit_hook {
            let (events_tx, events_rx) = mpsc::unbounded_channel();
            hook.install(events_tx)?;
            tasks.push(tokio::spawn(Arc::clone(self).run_exit_events(events_rx)));
            debug!("Exit hook installed");
        }

        info!(
            "Lifecycle coordinator started for {}",
            self.gateway.path().display()
        );
        Ok(())
    }

    /// Stop background tasks; dumps already running finish on their own
    pub fn stop(&self) {
        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        for task in tasks {
            task.abort();
        }
        debug!("Lifecycle coordinator stopped");
    }

    fn spawn_autosave(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let coordinator = Arc::clone(self);

        tokio::spawn(async move {
            let mut timer = interval_at(Instant::now() + period, period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                timer.tick().await;
                if coordinator.phase() == LifecyclePhase::ShutdownDumped {
                    debug!("Autosave loop ending after shutdown dump");
                    break;
                }

                // A panicking producer only loses this tick
                let tick = tokio::spawn({
                    let coordinator = Arc::clone(&coordinator);
                    async move { coordinator.autosave_tick().await }
                });
                match tick.await {
                    Ok(_) => {}
                    Err(e) if e.is_panic() => error!("Autosave tick panicked: {}", e),
                    Err(e) => {
                        debug!("Autosave tick cancelled: {}", e);
                        break;
                    }
                }
            }
        })
    }

    async fn run_exit_events(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<ExitEvent>) {
        while let Some(event) = events.recv().await {
            let coordinator = Arc::clone(&self);
            match event {
                ExitEvent::TerminationRequested { signal, completion } => {
                    info!("Termination requested ({})", signal);
                    tokio::spawn(async move {
                        coordinator.handle_shutdown(Some(completion)).await;
                        if let Some(hook) = &coordinator.exit_hook {
                            hook.request_exit(coordinator.exit_code());
                        }
                    });
                }
                ExitEvent::UncaughtFault { fault, completion } => {
                    tokio::spawn(async move {
                        coordinator.handle_fault(fault).await;
                        completion.complete();
                    });
                }
            }
        }
    }

    /// Periodic dump; skipped when any dump is in flight or after shutdown
    ///
    /// Returns whether a record was written.
    pub async fn autosave_tick(&self) -> bool {
        let claimed = self.state.send_if_modified(|state| {
            if state.in_flight.is_some() || state.shutdown_dumped {
                return false;
            }
            state.in_flight = Some(DumpReason::Autosave);
            true
        });

        if !claimed {
            debug!("Autosave skipped ({:?})", self.phase());
            return false;
        }

        let _in_flight = InFlight { state: &self.state };
        self.run_dump(DumpReason::Autosave, None, None).await
    }

    /// Dump on demand with a custom reason, under the same single-flight rule
    /// as autosave
    pub async fn dump_now(&self, reason: DumpReason) -> bool {
        let claimed = self.state.send_if_modified(|state| {
            if state.in_flight.is_some() || state.shutdown_dumped {
                return false;
            }
            state.in_flight = Some(reason.clone());
            true
        });

        if !claimed {
            debug!("Manual dump ({}) skipped ({:?})", reason, self.phase());
            return false;
        }

        let _in_flight = InFlight { state: &self.state };
        self.run_dump(reason, None, None).await
    }

    /// Handle a termination notice
    ///
    /// The first notice latches the shutdown state before dumping, so any
    /// notice racing it sees the latch. A notice that does not dump still
    /// waits for an in-flight write to settle. `completion` always fires.
    /// Returns whether this call wrote a record.
    pub async fn handle_shutdown(&self, completion: Option<Completion>) -> bool {
        let claimed = self.state.send_if_modified(|state| {
            if state.shutdown_dumped || state.in_flight.is_some() {
                return false;
            }
            state.shutdown_dumped = true;
            state.in_flight = Some(DumpReason::Shutdown);
            true
        });

        let written = if claimed {
            let _in_flight = InFlight { state: &self.state };
            info!("Shutdown dump started");
            self.run_dump(DumpReason::Shutdown, None, self.config.shutdown_timeout())
                .await
        } else {
            debug!("Shutdown already handled ({:?})", self.phase());
            self.wait_until_settled().await;
            false
        };

        if let Some(completion) = completion {
            completion.complete();
        }
        written
    }

    /// Handle a fault that escaped the application
    ///
    /// Dumps with reason `uncaught-exception` unless a dump is already in
    /// flight, then applies the termination policy. Returns whether a record
    /// was written.
    pub async fn handle_fault(&self, fault: FaultInfo) -> bool {
        error!("Uncaught fault: {}", fault.message);
        if !fault.stack.is_empty() {
            error!("{}", fault.stack);
        }

        let claimed = self.state.send_if_modified(|state| {
            if state.in_flight.is_some() {
                return false;
            }
            state.shutdown_dumped = true;
            state.in_flight = Some(DumpReason::UncaughtException);
            true
        });

        let written = if claimed {
            let _in_flight = InFlight { state: &self.state };
            self.run_dump(
                DumpReason::UncaughtException,
                Some(fault),
                self.config.shutdown_timeout(),
            )
            .await
        } else {
            warn!("Dump already in flight, not dumping for fault");
            false
        };

        self.apply_fault_policy();
        written
    }

    fn apply_fault_policy(&self) {
        self.failed.store(true, Ordering::SeqCst);

        if !self.config.exit_exceptions {
            info!("Process marked as failed; leaving it running");
            return;
        }

        match &self.exit_hook {
            Some(hook) => hook.request_exit(1),
            None => warn!("No exit hook attached; process marked as failed instead of exiting"),
        }
    }

    async fn wait_until_settled(&self) {
        let mut state = self.state.subscribe();
        let _ = state.wait_for(|state| state.in_flight.is_none()).await;
    }

    /// Shared dump path; failures are logged and reported as `false`
    async fn run_dump(
        &self,
        reason: DumpReason,
        error: Option<FaultInfo>,
        limit: Option<Duration>,
    ) -> bool {
        if self.registry.is_empty() {
            debug!("No state producers registered, skipping {} dump", reason);
            return false;
        }

        let attempt = self.write_snapshot(reason.clone(), error);
        let outcome = match limit {
            Some(limit) => tokio::time::timeout(limit, attempt)
                .await
                .unwrap_or(Err(DumpError::Timeout(limit))),
            None => attempt.await,
        };

        match outcome {
            Ok(Some(result)) => {
                info!(
                    "Session dumped ({}): {} bytes in {}ms",
                    reason, result.bytes_written, result.duration_ms
                );
                true
            }
            Ok(None) => false,
            Err(e) => {
                error!("Session dump ({}) failed: {}", reason, e);
                false
            }
        }
    }

    async fn write_snapshot(
        &self,
        reason: DumpReason,
        error: Option<FaultInfo>,
    ) -> Result<Option<PersistenceResult>, DumpError> {
        let meta = SessionMeta::now(reason.clone(), error);
        let Some(state) = self.aggregator.collect(&reason).await?.into_state() else {
            return Ok(None);
        };

        let record = SessionRecord::new(meta, state);
        self.gateway.write(&record).await.map(Some)
    }
}
