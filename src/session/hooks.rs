//! Process exit hooks.
//!
//! The coordinator never talks to the operating system directly. An
//! [`ExitHook`] delivers termination notices and uncaught faults as
//! [`ExitEvent`]s and performs the final exit when asked to.

use crate::session::metadata::FaultInfo;
use anyhow::{Context, Result};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

/// One-shot "dump finished, you may proceed" callback
pub struct Completion(Box<dyn FnOnce() + Send + 'static>);

impl Completion {
    pub fn new(callback: impl FnOnce() + Send + 'static) -> Self {
        Self(Box::new(callback))
    }

    /// Completion paired with a receiver that resolves once it fires
    ///
    /// Dropping the completion without firing it also resolves the receiver
    /// (with an error), so a waiter is never stranded.
    pub fn channel() -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        let completion = Self::new(move || {
            let _ = tx.send(());
        });
        (completion, rx)
    }

    pub fn complete(self) {
        (self.0)()
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Completion")
    }
}

/// Notices delivered by an exit hook
#[derive(Debug)]
pub enum ExitEvent {
    /// The process is about to terminate; fire `completion` to let it exit
    TerminationRequested {
        signal: String,
        completion: Completion,
    },
    /// A fault escaped the application; fire `completion` once handled
    UncaughtFault {
        fault: FaultInfo,
        completion: Completion,
    },
}

/// Environment-provided termination and fault facility
pub trait ExitHook: Send + Sync {
    /// Start delivering notices on `events`
    fn install(&self, events: mpsc::UnboundedSender<ExitEvent>) -> Result<()>;

    /// Terminate the process with `code`
    fn request_exit(&self, code: i32);
}

/// Exit hook backed by OS signals and the `std::panic` hook
///
/// The first SIGINT, SIGTERM or SIGHUP is forwarded. The coordinator then
/// exits through [`ExitHook::request_exit`] with its own status; a completion
/// dropped without firing exits with status 1. With fault catching
/// enabled, every panic is forwarded and the panicking thread waits up to
/// `fault_dump_timeout` for the dump before the previous hook runs.
pub struct ProcessExitHook {
    catch_faults: bool,
    fault_dump_timeout: Duration,
    installed: AtomicBool,
}

impl ProcessExitHook {
    pub fn new(catch_faults: bool, fault_dump_timeout: Duration) -> Self {
        Self {
            catch_faults,
            fault_dump_timeout,
            installed: AtomicBool::new(false),
        }
    }

    fn install_signal_listener(&self, events: mpsc::UnboundedSender<ExitEvent>) -> Result<()> {
        #[cfg(unix)]
        let (mut terminate, mut hangup) = {
            use tokio::signal::unix::{SignalKind, signal};
            (
                signal(SignalKind::terminate()).context("Failed to listen for SIGTERM")?,
                signal(SignalKind::hangup()).context("Failed to listen for SIGHUP")?,
            )
        };

        tokio::spawn(async move {
            #[cfg(unix)]
            let signal = tokio::select! {
                result = tokio::signal::ctrl_c() => match result {
                    Ok(()) => "SIGINT",
                    Err(e) => {
                        warn!("Failed to listen for Ctrl-C: {}", e);
                        return;
                    }
                },
                _ = terminate.recv() => "SIGTERM",
                _ = hangup.recv() => "SIGHUP",
            };

            #[cfg(not(unix))]
            let signal = match tokio::signal::ctrl_c().await {
                Ok(()) => "CTRL_C",
                Err(e) => {
                    warn!("Failed to listen for Ctrl-C: {}", e);
                    return;
                }
            };

            info!("Received {}, waiting for shutdown dump", signal);
            let (completion, done) = Completion::channel();
            let event = ExitEvent::TerminationRequested {
                signal: signal.to_string(),
                completion,
            };
            if events.send(event).is_err() {
                std::process::exit(0);
            }
            // The coordinator exits through `request_exit` once the dump is done
            if done.await.is_err() {
                warn!("Shutdown handler ended without completing");
                std::process::exit(1);
            }
        });

        Ok(())
    }

    fn install_panic_hook(&self, events: mpsc::UnboundedSender<ExitEvent>) {
        let timeout = self.fault_dump_timeout;
        let previous = std::panic::take_hook();

        std::panic::set_hook(Box::new(move |panic_info| {
            previous(panic_info);

            let (tx, rx) = std::sync::mpsc::channel();
            let event = ExitEvent::UncaughtFault {
                fault: FaultInfo::from_panic(panic_info),
                completion: Completion::new(move || {
                    let _ = tx.send(());
                }),
            };
            if events.send(event).is_ok()
                && let Err(std::sync::mpsc::RecvTimeoutError::Timeout) = rx.recv_timeout(timeout)
            {
                warn!("Fault dump did not finish within {:?}", timeout);
            }
        }));
    }
}

impl ExitHook for ProcessExitHook {
    fn install(&self, events: mpsc::UnboundedSender<ExitEvent>) -> Result<()> {
        if self.installed.swap(true, Ordering::SeqCst) {
            warn!("Process exit hook already installed");
            return Ok(());
        }

        self.install_signal_listener(events.clone())?;
        if self.catch_faults {
            self.install_panic_hook(events);
        }
        Ok(())
    }

    fn request_exit(&self, code: i32) {
        info!("Exiting with status {}", code);
        std::process::exit(code);
    }
}
