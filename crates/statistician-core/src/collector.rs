use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::config::CollectorConfig;
use crate::poller::{poll_loop, PollerContext, PollerExit};
use crate::registry::{ControlPort, DeviceClass, ParameterRegistry, RegistryError};
use crate::snapshot::{SessionEnd, SessionReport, Snapshot};

const POLLER_THREAD_NAME: &str = "statistician-poller";

#[derive(Debug, Error)]
pub enum CollectorError {
    #[error("failed to attach to device: {0}")]
    Initialization(#[source] RegistryError),
    #[error("collector is not initialized")]
    NotInitialized,
    #[error("statistics poller is already running")]
    AlreadyRunning,
    #[error("failed to spawn statistics poller: {0}")]
    Spawn(#[source] io::Error),
}

struct Binding<R: ParameterRegistry> {
    device: Arc<R>,
    class: DeviceClass,
    port: Option<Arc<dyn ControlPort>>,
}

struct Poller {
    handle: JoinHandle<PollerExit>,
    started_at: DateTime<Utc>,
    /// Copy of the snapshot handed to the thread, restored if the thread dies
    /// without handing its snapshot back.
    seed: Snapshot,
}

/// Polls a device's diagnostic counters on a background thread while the
/// caller runs its acquisition loop.
///
/// The snapshot is moved into the poller on [`start`](Self::start) and
/// handed back when [`stop`](Self::stop) joins it, so [`snapshot`](Self::snapshot)
/// only ever exposes a quiesced view.
pub struct StatisticsCollector<R: ParameterRegistry + 'static> {
    config: CollectorConfig,
    binding: Option<Binding<R>>,
    snapshot: Option<Snapshot>,
    poller: Option<Poller>,
    stop: Arc<AtomicBool>,
    sweeps: Arc<AtomicU64>,
    last_session: Option<SessionReport>,
}

impl<R: ParameterRegistry + 'static> StatisticsCollector<R> {
    pub fn new(config: CollectorConfig) -> Self {
        Self {
            config,
            binding: None,
            snapshot: None,
            poller: None,
            stop: Arc::new(AtomicBool::new(true)),
            sweeps: Arc::new(AtomicU64::new(0)),
            last_session: None,
        }
    }

    pub fn config(&self) -> &CollectorConfig {
        &self.config
    }

    /// Binds the collector to an open device and resets every statistic to
    /// its sentinel. On failure the collector is left unbound and the call
    /// can be retried.
    pub fn initialize(&mut self, device: Arc<R>) -> Result<DeviceClass, CollectorError> {
        self.stop();

        self.binding = None;
        self.snapshot = None;
        self.last_session = None;
        self.sweeps.store(0, Ordering::Relaxed);

        let class = device
            .device_class()
            .map_err(CollectorError::Initialization)?;
        let port = match class {
            DeviceClass::Usb => device
                .control_port()
                .map_err(CollectorError::Initialization)?,
            DeviceClass::GigE => None,
        };

        if class == DeviceClass::Usb && port.is_none() {
            warn!("device exposes no control port, raw link counters will not be read");
        }

        self.snapshot = Some(Snapshot::new(class));
        self.binding = Some(Binding {
            device,
            class,
            port,
        });
        info!(%class, "statistics collector initialized");
        Ok(class)
    }

    pub fn start(&mut self) -> Result<(), CollectorError> {
        let Some(binding) = self.binding.as_ref() else {
            return Err(CollectorError::NotInitialized);
        };
        if self.poller.is_some() {
            return Err(CollectorError::AlreadyRunning);
        }
        let Some(snapshot) = self.snapshot.take() else {
            return Err(CollectorError::NotInitialized);
        };

        self.stop.store(false, Ordering::Release);
        self.sweeps.store(0, Ordering::Relaxed);

        let ctx = PollerContext {
            registry: Arc::clone(&binding.device),
            port: binding.port.clone(),
            class: binding.class,
            config: self.config.clone(),
            stop: Arc::clone(&self.stop),
            sweeps: Arc::clone(&self.sweeps),
        };
        let seed = snapshot.clone();
        let started_at = Utc::now();

        let spawned = thread::Builder::new()
            .name(POLLER_THREAD_NAME.to_string())
            .spawn(move || poll_loop(ctx, snapshot));

        match spawned {
            Ok(handle) => {
                self.poller = Some(Poller {
                    handle,
                    started_at,
                    seed,
                });
                info!(class = %binding.class, "statistics poller started");
                Ok(())
            }
            Err(err) => {
                self.stop.store(true, Ordering::Release);
                self.snapshot = Some(seed);
                Err(CollectorError::Spawn(err))
            }
        }
    }

    /// Asks the poller to finish its current sweep and waits for it to exit.
    ///
    /// Returns `None` when no poller was running.
    pub fn stop(&mut self) -> Option<SessionReport> {
        self.stop.store(true, Ordering::Release);

        let poller = self.poller.take()?;
        let joined = poller.handle.join();
        let sweeps = self.sweeps.load(Ordering::Relaxed);

        let report = match joined {
            Ok(exit) => {
                self.snapshot = Some(exit.snapshot);
                SessionReport {
                    end: exit.end,
                    sweeps,
                    started_at: poller.started_at,
                    ended_at: exit.ended_at,
                }
            }
            Err(_) => {
                error!("statistics poller thread died, keeping pre-start snapshot");
                self.snapshot = Some(poller.seed);
                SessionReport {
                    end: SessionEnd::Panicked,
                    sweeps,
                    started_at: poller.started_at,
                    ended_at: Utc::now(),
                }
            }
        };

        info!(sweeps = report.sweeps, end = ?report.end, "statistics poller stopped");
        self.last_session = Some(report.clone());
        Some(report)
    }

    /// The collected statistics, or `None` while the poller owns them or
    /// before the collector has been initialized.
    pub fn snapshot(&self) -> Option<&Snapshot> {
        self.snapshot.as_ref()
    }

    pub fn is_initialized(&self) -> bool {
        self.binding.is_some()
    }

    /// True from a successful `start` until `stop`, even if the poller has
    /// already exited on its own.
    pub fn is_running(&self) -> bool {
        self.poller.is_some()
    }

    /// True when a started poller has already left its loop, e.g. after the
    /// device went away. `stop` still has to be called to collect it.
    pub fn poller_exited(&self) -> bool {
        self.poller
            .as_ref()
            .is_some_and(|poller| poller.handle.is_finished())
    }

    pub fn device_class(&self) -> Option<DeviceClass> {
        self.binding.as_ref().map(|b| b.class)
    }

    /// Sweeps completed by the current or most recent session.
    pub fn sweep_count(&self) -> u64 {
        self.sweeps.load(Ordering::Relaxed)
    }

    pub fn last_session(&self) -> Option<&SessionReport> {
        self.last_session.as_ref()
    }
}

impl<R: ParameterRegistry + 'static> Drop for StatisticsCollector<R> {
    fn drop(&mut self) {
        self.stop();
    }
}
