use crate::session::*;
use async_trait::async_trait;
use serde_json::{Value, json};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::{Notify, mpsc};

/// Filesystem storage that counts writes and can be told to fail them
#[derive(Default)]
struct CountingStorage {
    inner: FileStorage,
    writes: AtomicUsize,
    fail_writes: bool,
}

impl CountingStorage {
    fn failing() -> Self {
        Self {
            fail_writes: true,
            ..Default::default()
        }
    }

    fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Storage for CountingStorage {
    async fn write(&self, path: &Path, bytes: &[u8]) -> io::Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if self.fail_writes {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "read-only"));
        }
        self.inner.write(path, bytes).await
    }

    async fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        self.inner.read(path).await
    }
}

/// Exit hook that records exit requests instead of exiting
#[derive(Default)]
struct RecordingExitHook {
    exits: Mutex<Vec<i32>>,
    events: Mutex<Option<mpsc::UnboundedSender<ExitEvent>>>,
}

impl RecordingExitHook {
    fn exits(&self) -> Vec<i32> {
        self.exits.lock().unwrap().clone()
    }

    fn send(&self, event: ExitEvent) {
        self.events
            .lock()
            .unwrap()
            .as_ref()
            .expect("hook not installed")
            .send(event)
            .unwrap();
    }
}

impl ExitHook for RecordingExitHook {
    fn install(&self, events: mpsc::UnboundedSender<ExitEvent>) -> anyhow::Result<()> {
        *self.events.lock().unwrap() = Some(events);
        Ok(())
    }

    fn request_exit(&self, code: i32) {
        self.exits.lock().unwrap().push(code);
    }
}

fn session_path(dir: &TempDir) -> PathBuf {
    dir.path().join("state").join("session.json")
}

fn create_coordinator(
    dir: &TempDir,
    tweak: impl FnOnce(&mut SnapshotConfig),
) -> (LifecycleCoordinator, Arc<CountingStorage>) {
    let mut config = SnapshotConfig::new(session_path(dir));
    tweak(&mut config);
    let storage = Arc::new(CountingStorage::default());
    let coordinator = LifecycleCoordinator::with_storage(config, storage.clone());
    (coordinator, storage)
}

fn read_file(path: &Path) -> Value {
    serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
}

/// Registers a producer that blocks until `release` is notified
fn register_blocking_producer(
    coordinator: &LifecycleCoordinator,
) -> (Arc<Notify>, Arc<AtomicUsize>) {
    let release = Arc::new(Notify::new());
    let calls = Arc::new(AtomicUsize::new(0));

    coordinator.register_fn({
        let release = release.clone();
        let calls = calls.clone();
        move |_reason| {
            let release = release.clone();
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                release.notified().await;
                Ok(json!({ "slow": true }))
            }
        }
    });

    (release, calls)
}

async fn wait_for_calls(calls: &AtomicUsize, expected: usize) {
    while calls.load(Ordering::SeqCst) < expected {
        tokio::task::yield_now().await;
    }
}

async fn wait_for_exits(hook: &RecordingExitHook, expected: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while hook.exits().len() < expected {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("exit was not requested");
}

#[test]
fn test_dump_reason_wire_names() {
    assert_eq!(serde_json::to_value(DumpReason::Shutdown).unwrap(), json!("shutdown"));
    assert_eq!(serde_json::to_value(DumpReason::Autosave).unwrap(), json!("autosave"));
    assert_eq!(
        serde_json::to_value(DumpReason::UncaughtException).unwrap(),
        json!("uncaught-exception")
    );

    let custom: DumpReason = serde_json::from_value(json!("before-upgrade")).unwrap();
    assert_eq!(custom, DumpReason::Other("before-upgrade".to_string()));
    assert_eq!(serde_json::to_value(&custom).unwrap(), json!("before-upgrade"));
}

#[test]
fn test_record_field_order() {
    let fault = FaultInfo::new("boom").with_stack("at main").with_field("code", 7);
    let record = SessionRecord::new(
        SessionMeta::now(DumpReason::UncaughtException, Some(fault)),
        json!({ "k": 1 }),
    );

    let text = serde_json::to_string_pretty(&record).unwrap();
    let position = |needle: &str| text.find(needle).unwrap();

    assert!(position("\"meta\"") < position("\"state\""));
    assert!(position("\"at\"") < position("\"reason\""));
    assert!(position("\"reason\"") < position("\"error\""));

    let value: Value = serde_json::from_str(&text).unwrap();
    assert_eq!(value["meta"]["error"]["code"], json!(7));
    assert_eq!(value["meta"]["error"]["stack"], json!("at main"));
}

#[test]
fn test_error_omitted_without_fault() {
    let record = SessionRecord::new(SessionMeta::now(DumpReason::Autosave, None), json!(null));
    let value = serde_json::to_value(&record).unwrap();

    assert!(value["meta"].get("error").is_none());
}

#[test]
fn test_fault_from_error_chain() {
    let error = anyhow::anyhow!("disk full").context("flushing journal");
    let fault = FaultInfo::from_anyhow(&error);

    assert_eq!(fault.message, "flushing journal");
    assert!(fault.stack.contains("disk full"));

    let io_error = io::Error::other("socket closed");
    let fault = FaultInfo::from_error(&io_error);
    assert_eq!(fault.message, "socket closed");
}

#[tokio::test]
async fn test_aggregator_shapes() {
    let registry = Arc::new(StateProducerRegistry::new());
    let aggregator = SnapshotAggregator::new(registry.clone());

    assert_eq!(
        aggregator.collect(&DumpReason::Autosave).await.unwrap(),
        Snapshot::Empty
    );

    registry.register_sync(|_| json!({ "a": 1 }));
    assert_eq!(
        aggregator.collect(&DumpReason::Autosave).await.unwrap(),
        Snapshot::Single(json!({ "a": 1 }))
    );

    registry.register_sync(|_| Value::Null);
    registry.register_sync(|reason: &DumpReason| reason.to_string());
    assert_eq!(
        aggregator.collect(&DumpReason::Shutdown).await.unwrap(),
        Snapshot::Multiple(vec![json!({ "a": 1 }), Value::Null, json!("shutdown")])
    );
}

#[tokio::test]
async fn test_aggregator_runs_producers_in_order() {
    let registry = Arc::new(StateProducerRegistry::new());
    let aggregator = SnapshotAggregator::new(registry.clone());
    let log = Arc::new(Mutex::new(Vec::new()));

    for index in 0..3 {
        let log = log.clone();
        registry.register_fn(move |_reason| {
            let log = log.clone();
            async move {
                tokio::task::yield_now().await;
                log.lock().unwrap().push(index);
                Ok(json!(index))
            }
        });
    }

    let snapshot = aggregator.collect(&DumpReason::Autosave).await.unwrap();

    assert_eq!(*log.lock().unwrap(), vec![0, 1, 2]);
    assert_eq!(snapshot.into_state(), Some(json!([0, 1, 2])));
}

#[tokio::test]
async fn test_aggregator_propagates_producer_failure() {
    let registry = Arc::new(StateProducerRegistry::new());
    let aggregator = SnapshotAggregator::new(registry.clone());
    let later_calls = Arc::new(AtomicUsize::new(0));

    registry.register_sync(|_| 1);
    registry.register_fn(|_reason| async { Err(anyhow::anyhow!("database unavailable")) });
    let counter = later_calls.clone();
    registry.register_sync(move |_| counter.fetch_add(1, Ordering::SeqCst));

    let error = aggregator.collect(&DumpReason::Autosave).await.unwrap_err();

    assert!(matches!(error, DumpError::Producer { index: 1, .. }));
    assert!(error.to_string().contains("database unavailable"));
    assert_eq!(later_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_registry_handles_follow_registration_order() {
    let registry = StateProducerRegistry::new();

    let first = registry.register_sync(|_| 1);
    let second = registry.register_sync(|_| 1);

    assert_eq!(first.index(), 0);
    assert_eq!(second.index(), 1);
    assert_eq!(registry.len(), 2);
}

#[tokio::test]
async fn test_autosave_single_producer_scenario() {
    let dir = tempfile::tempdir().unwrap();
    let (coordinator, storage) = create_coordinator(&dir, |_| {});
    coordinator.register_sync(|_| json!({ "foo": "bar" }));

    let before = chrono::Utc::now().timestamp_millis();
    assert!(coordinator.autosave_tick().await);
    let after = chrono::Utc::now().timestamp_millis();

    let value = read_file(&session_path(&dir));
    assert_eq!(value["meta"]["reason"], json!("autosave"));
    let at = value["meta"]["at"].as_i64().unwrap();
    assert!(at >= before && at <= after);
    assert_eq!(value["state"], json!({ "foo": "bar" }));
    assert_eq!(storage.writes(), 1);
    assert_eq!(coordinator.phase(), LifecyclePhase::Idle);
}

#[tokio::test]
async fn test_shutdown_two_producers_scenario() {
    let dir = tempfile::tempdir().unwrap();
    let (coordinator, _storage) = create_coordinator(&dir, |_| {});
    coordinator.register_sync(|_| 1);
    coordinator.register_sync(|_| "x");

    assert!(coordinator.handle_shutdown(None).await);

    let value = read_file(&session_path(&dir));
    assert_eq!(value["meta"]["reason"], json!("shutdown"));
    assert_eq!(value["state"], json!([1, "x"]));
    assert_eq!(coordinator.phase(), LifecyclePhase::ShutdownDumped);
}

#[tokio::test]
async fn test_uncaught_fault_scenario() {
    let dir = tempfile::tempdir().unwrap();
    let hook = Arc::new(RecordingExitHook::default());
    let (coordinator, _storage) = create_coordinator(&dir, |_| {});
    let coordinator = coordinator.with_exit_hook(hook.clone());
    coordinator.register_sync(|_| json!({ "jobs": 2 }));

    assert!(coordinator.handle_fault(FaultInfo::new("oops")).await);

    let value = read_file(&session_path(&dir));
    assert_eq!(value["meta"]["reason"], json!("uncaught-exception"));
    assert_eq!(value["meta"]["error"]["message"], json!("oops"));
    assert_eq!(hook.exits(), vec![1]);
    assert!(coordinator.has_failed());
}

#[tokio::test]
async fn test_fault_without_exit_marks_failure() {
    let dir = tempfile::tempdir().unwrap();
    let hook = Arc::new(RecordingExitHook::default());
    let (coordinator, _storage) = create_coordinator(&dir, |config| {
        config.exit_exceptions = false;
    });
    let coordinator = coordinator.with_exit_hook(hook.clone());
    coordinator.register_sync(|_| 0);

    coordinator.handle_fault(FaultInfo::new("recoverable")).await;

    assert!(hook.exits().is_empty());
    assert!(coordinator.has_failed());
    assert_eq!(coordinator.exit_code(), 1);
}

#[tokio::test]
async fn test_zero_producers_never_overwrites() {
    let dir = tempfile::tempdir().unwrap();
    let (coordinator, storage) = create_coordinator(&dir, |_| {});

    let path = session_path(&dir);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, r#"{"meta":{"at":1,"reason":"shutdown"},"state":"good"}"#).unwrap();

    assert!(!coordinator.autosave_tick().await);
    assert!(!coordinator.handle_shutdown(None).await);
    assert!(!coordinator.handle_fault(FaultInfo::new("early crash")).await);

    assert_eq!(storage.writes(), 0);
    assert_eq!(read_file(&path)["state"], json!("good"));
}

#[tokio::test]
async fn test_shutdown_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let (coordinator, storage) = create_coordinator(&dir, |_| {});
    coordinator.register_sync(|_| json!({ "n": 1 }));

    let (first, mut first_done) = Completion::channel();
    let (second, mut second_done) = Completion::channel();

    assert!(coordinator.handle_shutdown(Some(first)).await);
    assert!(!coordinator.handle_shutdown(Some(second)).await);

    assert_eq!(storage.writes(), 1);
    assert!(first_done.try_recv().is_ok());
    assert!(second_done.try_recv().is_ok());
}

#[tokio::test]
async fn test_autosave_skipped_while_dump_in_flight() {
    let dir = tempfile::tempdir().unwrap();
    let (coordinator, storage) = create_coordinator(&dir, |_| {});
    let coordinator = Arc::new(coordinator);
    let (release, calls) = register_blocking_producer(&coordinator);

    let in_flight = tokio::spawn({
        let coordinator = coordinator.clone();
        async move { coordinator.autosave_tick().await }
    });
    wait_for_calls(&calls, 1).await;
    assert_eq!(coordinator.phase(), LifecyclePhase::Dumping);

    assert!(!coordinator.autosave_tick().await);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    release.notify_one();
    assert!(in_flight.await.unwrap());

    assert_eq!(storage.writes(), 1);
    assert_eq!(coordinator.phase(), LifecyclePhase::Idle);
}

#[tokio::test]
async fn test_shutdown_during_autosave_waits_without_dumping() {
    let dir = tempfile::tempdir().unwrap();
    let (coordinator, storage) = create_coordinator(&dir, |_| {});
    let coordinator = Arc::new(coordinator);
    let (release, calls) = register_blocking_producer(&coordinator);

    let autosave = tokio::spawn({
        let coordinator = coordinator.clone();
        async move { coordinator.autosave_tick().await }
    });
    wait_for_calls(&calls, 1).await;

    let (completion, mut done) = Completion::channel();
    let shutdown = tokio::spawn({
        let coordinator = coordinator.clone();
        async move { coordinator.handle_shutdown(Some(completion)).await }
    });
    tokio::task::yield_now().await;
    assert!(done.try_recv().is_err());

    release.notify_one();
    assert!(autosave.await.unwrap());
    assert!(!shutdown.await.unwrap());

    assert!(done.try_recv().is_ok());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(storage.writes(), 1);
    assert_eq!(read_file(&session_path(&dir))["meta"]["reason"], json!("autosave"));
}

#[tokio::test]
async fn test_fault_during_dump_skips_but_applies_policy() {
    let dir = tempfile::tempdir().unwrap();
    let hook = Arc::new(RecordingExitHook::default());
    let (coordinator, storage) = create_coordinator(&dir, |_| {});
    let coordinator = Arc::new(coordinator.with_exit_hook(hook.clone()));
    let (release, calls) = register_blocking_producer(&coordinator);

    let autosave = tokio::spawn({
        let coordinator = coordinator.clone();
        async move { coordinator.autosave_tick().await }
    });
    wait_for_calls(&calls, 1).await;

    assert!(!coordinator.handle_fault(FaultInfo::new("second fault")).await);
    assert_eq!(hook.exits(), vec![1]);

    release.notify_one();
    assert!(autosave.await.unwrap());
    assert_eq!(storage.writes(), 1);
}

#[tokio::test]
async fn test_producer_failure_still_completes_shutdown() {
    let dir = tempfile::tempdir().unwrap();
    let (coordinator, storage) = create_coordinator(&dir, |_| {});
    coordinator.register_fn(|_reason| async { Err(anyhow::anyhow!("corrupt cache")) });

    let (completion, mut done) = Completion::channel();
    assert!(!coordinator.handle_shutdown(Some(completion)).await);

    assert!(done.try_recv().is_ok());
    assert_eq!(storage.writes(), 0);
    assert!(!session_path(&dir).exists());
}

#[tokio::test]
async fn test_write_failure_still_completes_shutdown() {
    let dir = tempfile::tempdir().unwrap();
    let storage = Arc::new(CountingStorage::failing());
    let config = SnapshotConfig::new(session_path(&dir));
    let coordinator = LifecycleCoordinator::with_storage(config, storage.clone());
    coordinator.register_sync(|_| 42);

    let (completion, mut done) = Completion::channel();
    assert!(!coordinator.handle_shutdown(Some(completion)).await);

    assert!(done.try_recv().is_ok());
    assert_eq!(storage.writes(), 1);
    assert_eq!(coordinator.phase(), LifecyclePhase::ShutdownDumped);
}

#[tokio::test]
async fn test_shutdown_timeout_bounds_hung_producer() {
    let dir = tempfile::tempdir().unwrap();
    let (coordinator, storage) = create_coordinator(&dir, |config| {
        config.shutdown_timeout_ms = Some(50);
    });
    let (_release, _calls) = register_blocking_producer(&coordinator);

    let (completion, mut done) = Completion::channel();
    assert!(!coordinator.handle_shutdown(Some(completion)).await);

    assert!(done.try_recv().is_ok());
    assert_eq!(storage.writes(), 0);
    assert_eq!(coordinator.phase(), LifecyclePhase::ShutdownDumped);
}

#[tokio::test]
async fn test_no_autosave_after_shutdown() {
    let dir = tempfile::tempdir().unwrap();
    let (coordinator, storage) = create_coordinator(&dir, |_| {});
    coordinator.register_sync(|_| "final");

    coordinator.handle_shutdown(None).await;
    assert!(!coordinator.autosave_tick().await);
    assert!(!coordinator.dump_now(DumpReason::Other("manual".into())).await);

    assert_eq!(storage.writes(), 1);
}

#[tokio::test]
async fn test_dump_now_with_custom_reason() {
    let dir = tempfile::tempdir().unwrap();
    let (coordinator, _storage) = create_coordinator(&dir, |_| {});
    coordinator.register_sync(|reason: &DumpReason| reason.to_string());

    assert!(coordinator.dump_now(DumpReason::Other("before-upgrade".into())).await);

    let record = coordinator.recovery().await.unwrap();
    assert_eq!(record.reason(), &DumpReason::Other("before-upgrade".into()));
    assert_eq!(record.state(), &json!("before-upgrade"));
}

#[tokio::test]
async fn test_recovery_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let gateway = Arc::new(PersistenceGateway::file(session_path(&dir)));
    let recovery = RecoveryService::new(gateway.clone());

    let record = SessionRecord::new(
        SessionMeta::now(
            DumpReason::UncaughtException,
            Some(FaultInfo::new("oops").with_stack("trace").with_field("pid", 42)),
        ),
        json!([{ "nested": [1, 2.5, null, true] }, "text", []]),
    );

    let result = gateway.write(&record).await.unwrap();
    assert!(result.bytes_written > 0);

    let recovered = recovery.recover().await.unwrap();
    assert_eq!(recovered, record);
}

#[tokio::test]
async fn test_recovery_missing_and_corrupt_files() {
    let dir = tempfile::tempdir().unwrap();
    let path = session_path(&dir);
    let recovery = RecoveryService::new(Arc::new(PersistenceGateway::file(path.clone())));

    assert!(recovery.recover().await.is_none());

    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, "{ \"meta\": { \"at\": 1, ").unwrap();
    assert!(recovery.recover().await.is_none());

    std::fs::write(&path, r#"{"state": 1}"#).unwrap();
    assert!(recovery.recover().await.is_none());
}

#[tokio::test]
async fn test_recovery_with_callback() {
    let dir = tempfile::tempdir().unwrap();
    let (coordinator, _storage) = create_coordinator(&dir, |_| {});

    let mut seen = None;
    let result = coordinator
        .recovery_with(|record| seen = Some(record.is_some()))
        .await;

    assert!(result.is_none());
    assert_eq!(seen, Some(false));
}

#[tokio::test]
async fn test_file_storage_leaves_no_temp_files() {
    let dir = tempfile::tempdir().unwrap();
    let gateway = PersistenceGateway::file(session_path(&dir));

    for n in 0..3 {
        let record = SessionRecord::new(SessionMeta::now(DumpReason::Autosave, None), json!(n));
        gateway.write(&record).await.unwrap();
    }

    let entries: Vec<_> = std::fs::read_dir(session_path(&dir).parent().unwrap())
        .unwrap()
        .map(|entry| entry.unwrap().file_name())
        .collect();
    assert_eq!(entries, vec![std::ffi::OsString::from("session.json")]);
    assert_eq!(gateway.read().await.unwrap().state(), &json!(2));
}

#[tokio::test]
async fn test_exit_events_drive_shutdown() {
    let dir = tempfile::tempdir().unwrap();
    let hook = Arc::new(RecordingExitHook::default());
    let (coordinator, _storage) = create_coordinator(&dir, |_| {});
    let coordinator = Arc::new(coordinator.with_exit_hook(hook.clone()));
    coordinator.register_sync(|_| json!({ "open": 3 }));

    coordinator.start().unwrap();

    let (completion, done) = Completion::channel();
    hook.send(ExitEvent::TerminationRequested {
        signal: "SIGTERM".to_string(),
        completion,
    });
    done.await.unwrap();

    let value = read_file(&session_path(&dir));
    assert_eq!(value["meta"]["reason"], json!("shutdown"));
    assert_eq!(value["state"], json!({ "open": 3 }));
    wait_for_exits(&hook, 1).await;
    assert_eq!(hook.exits(), vec![0]);

    coordinator.stop();
}

#[tokio::test]
async fn test_shutdown_after_tolerated_fault_exits_with_failure() {
    let dir = tempfile::tempdir().unwrap();
    let hook = Arc::new(RecordingExitHook::default());
    let (coordinator, _storage) = create_coordinator(&dir, |config| {
        config.exit_exceptions = false;
    });
    let coordinator = Arc::new(coordinator.with_exit_hook(hook.clone()));
    coordinator.register_sync(|_| 1);

    coordinator.start().unwrap();

    let (completion, done) = Completion::channel();
    hook.send(ExitEvent::UncaughtFault {
        fault: FaultInfo::new("worker panicked"),
        completion,
    });
    done.await.unwrap();
    assert!(coordinator.has_failed());
    assert!(hook.exits().is_empty());

    let (completion, done) = Completion::channel();
    hook.send(ExitEvent::TerminationRequested {
        signal: "SIGTERM".to_string(),
        completion,
    });
    done.await.unwrap();
    wait_for_exits(&hook, 1).await;

    assert_eq!(hook.exits(), vec![1]);
    let value = read_file(&session_path(&dir));
    assert_eq!(value["meta"]["reason"], json!("uncaught-exception"));

    coordinator.stop();
}

#[tokio::test]
async fn test_exit_events_drive_fault_dump() {
    let dir = tempfile::tempdir().unwrap();
    let hook = Arc::new(RecordingExitHook::default());
    let (coordinator, _storage) = create_coordinator(&dir, |_| {});
    let coordinator = Arc::new(coordinator.with_exit_hook(hook.clone()));
    coordinator.register_sync(|_| 5);

    coordinator.start().unwrap();

    let (completion, done) = Completion::channel();
    hook.send(ExitEvent::UncaughtFault {
        fault: FaultInfo::new("worker panicked").with_field("kind", "panic"),
        completion,
    });
    done.await.unwrap();

    let value = read_file(&session_path(&dir));
    assert_eq!(value["meta"]["error"]["message"], json!("worker panicked"));
    assert_eq!(value["meta"]["error"]["kind"], json!("panic"));
    assert_eq!(hook.exits(), vec![1]);

    coordinator.stop();
}

#[tokio::test]
async fn test_autosave_timer_writes_periodically() {
    let dir = tempfile::tempdir().unwrap();
    let (coordinator, storage) = create_coordinator(&dir, |config| {
        config.autosave = Some(20);
    });
    let coordinator = Arc::new(coordinator);
    coordinator.register_sync(|_| "tick");

    coordinator.start().unwrap();
    tokio::time::timeout(Duration::from_secs(5), async {
        while storage.writes() < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("autosave did not fire");
    coordinator.stop();

    let record = coordinator.recovery().await.unwrap();
    assert_eq!(record.reason(), &DumpReason::Autosave);
}

#[tokio::test]
async fn test_autosave_survives_panicking_producer() {
    let dir = tempfile::tempdir().unwrap();
    let (coordinator, storage) = create_coordinator(&dir, |config| {
        config.autosave = Some(20);
        config.catch_exceptions = false;
    });
    let coordinator = Arc::new(coordinator);
    let calls = Arc::new(AtomicUsize::new(0));
    coordinator.register_sync({
        let calls = calls.clone();
        move |_| {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("first snapshot fails");
            }
            "recovered"
        }
    });

    coordinator.start().unwrap();
    tokio::time::timeout(Duration::from_secs(5), async {
        while storage.writes() < 1 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("autosave stopped after a producer panic");
    coordinator.stop();

    assert!(calls.load(Ordering::SeqCst) >= 2);
    let record = coordinator.recovery().await.unwrap();
    assert_eq!(record.state(), &json!("recovered"));
}
