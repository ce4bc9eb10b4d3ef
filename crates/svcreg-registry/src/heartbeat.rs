//! Heartbeat Monitor - periodic liveness probing of every registration
//!
//! One background loop per registry. Each cycle:
//! 1. snapshots the registrations,
//! 2. runs one probe window per registration, all windows concurrently,
//! 3. joins every window (one barrier per cycle, so probe latency does not
//!    grow with the number of registrations),
//! 4. sleeps for the configured interval.
//!
//! A window makes up to `attempts` probes, `retry_delay` apart. The first
//! failure evicts the registration (which fans out a "removed" patch); a
//! later success in the same window re-adds it (which fans out an "added"
//! patch and re-primes it). A registration that fails the whole window
//! stays evicted until it registers again.

use crate::config::HeartbeatConfig;
use crate::storage::RegistrationStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use svcreg_common::Registration;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

/// Checks whether one instance is alive.
#[async_trait]
pub trait LivenessProbe: Send + Sync {
    async fn probe(&self, heartbeat_url: &str) -> ProbeResult;
}

/// Result of a single liveness probe.
#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub is_healthy: bool,
    pub checked_at: DateTime<Utc>,
    pub response_time_ms: Option<u64>,
    pub error_message: Option<String>,
}

impl ProbeResult {
    pub fn healthy(elapsed: Duration) -> Self {
        Self {
            is_healthy: true,
            checked_at: Utc::now(),
            response_time_ms: Some(elapsed.as_millis() as u64),
            error_message: None,
        }
    }

    pub fn unhealthy(reason: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            is_healthy: false,
            checked_at: Utc::now(),
            response_time_ms: Some(elapsed.as_millis() as u64),
            error_message: Some(reason.into()),
        }
    }
}

/// How one registration's probe window ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowOutcome {
    /// First probe succeeded.
    Healthy,
    /// Evicted on a failed probe, re-added on a later success.
    Recovered,
    /// Every probe failed; the registration stays removed.
    Evicted,
    /// The registration left the store before this window could evict it.
    Departed,
}

/// Outcome counts for one full cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub healthy: usize,
    pub recovered: usize,
    pub evicted: usize,
    pub departed: usize,
}

impl CycleReport {
    fn record(&mut self, outcome: WindowOutcome) {
        match outcome {
            WindowOutcome::Healthy => self.healthy += 1,
            WindowOutcome::Recovered => self.recovered += 1,
            WindowOutcome::Evicted => self.evicted += 1,
            WindowOutcome::Departed => self.departed += 1,
        }
    }

    pub fn checked(&self) -> usize {
        self.healthy + self.recovered + self.evicted + self.departed
    }
}

/// Heartbeat monitor - runs the probe loop in the background
pub struct HeartbeatMonitor {
    store: Arc<RegistrationStore>,
    probe: Arc<dyn LivenessProbe>,
    config: HeartbeatConfig,
    task_handle: Mutex<Option<JoinHandle<()>>>,
}

impl HeartbeatMonitor {
    pub fn new(
        store: Arc<RegistrationStore>,
        probe: Arc<dyn LivenessProbe>,
        config: HeartbeatConfig,
    ) -> Self {
        Self {
            store,
            probe,
            config,
            task_handle: Mutex::new(None),
        }
    }

    /// Starts the background loop. Calling it again while the loop runs is
    /// a no-op; returns true if this call started it.
    pub fn start(&self) -> bool {
        let mut task_handle = self.task_handle.lock();
        if task_handle.is_some() {
            debug!("Heartbeat monitor already started");
            return false;
        }

        let store = Arc::clone(&self.store);
        let probe = Arc::clone(&self.probe);
        let config = self.config.clone();

        *task_handle = Some(tokio::spawn(async move {
            Self::run_loop(store, probe, config).await;
        }));

        info!(
            interval = ?self.config.interval,
            attempts = self.config.attempts,
            retry_delay = ?self.config.retry_delay,
            "Heartbeat monitor started"
        );
        true
    }

    /// Stops the background loop.
    pub fn stop(&self) {
        if let Some(task) = self.task_handle.lock().take() {
            task.abort();
            debug!("Heartbeat monitor stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.task_handle
            .lock()
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Runs one full cycle in the caller's task.
    pub async fn run_cycle(&self) -> CycleReport {
        Self::cycle(&self.store, &self.probe, &self.config).await
    }

    async fn run_loop(
        store: Arc<RegistrationStore>,
        probe: Arc<dyn LivenessProbe>,
        config: HeartbeatConfig,
    ) {
        loop {
            let report = Self::cycle(&store, &probe, &config).await;
            debug!(
                checked = report.checked(),
                evicted = report.evicted,
                recovered = report.recovered,
                "Heartbeat cycle complete"
            );
            sleep(config.interval).await;
        }
    }

    async fn cycle(
        store: &Arc<RegistrationStore>,
        probe: &Arc<dyn LivenessProbe>,
        config: &HeartbeatConfig,
    ) -> CycleReport {
        let mut windows = JoinSet::new();
        for registration in store.snapshot() {
            let store = Arc::clone(store);
            let probe = Arc::clone(probe);
            let config = config.clone();
            windows.spawn(async move {
                probe_window(&store, probe.as_ref(), &config, registration).await
            });
        }

        let mut report = CycleReport::default();
        while let Some(joined) = windows.join_next().await {
            match joined {
                Ok(outcome) => report.record(outcome),
                Err(e) => error!("Heartbeat probe task failed: {}", e),
            }
        }
        report
    }
}

impl Drop for HeartbeatMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn probe_window(
    store: &RegistrationStore,
    probe: &dyn LivenessProbe,
    config: &HeartbeatConfig,
    registration: Registration,
) -> WindowOutcome {
    let service = &registration.service_name;
    let url = &registration.service_url;
    let mut healthy = true;
    let mut evicted = false;

    for attempt in 1..=config.attempts {
        let probed = timeout(config.probe_timeout, probe.probe(&registration.heartbeat_url)).await;
        let result = match probed {
            Ok(result) => result,
            Err(_) => ProbeResult::unhealthy(
                format!("no answer within {:?}", config.probe_timeout),
                config.probe_timeout,
            ),
        };

        if result.is_healthy {
            debug!(
                %service,
                %url,
                checked_at = %result.checked_at,
                response_time_ms = result.response_time_ms,
                "Heartbeat check passed"
            );
            if healthy {
                return WindowOutcome::Healthy;
            }
            if !evicted {
                // Someone else removed it; do not bring it back.
                return WindowOutcome::Departed;
            }

            info!(%service, %url, attempt, "Heartbeat recovered, re-adding service");
            if let Err(e) = store.add(registration.clone()).await {
                warn!(%service, %url, "Failed to re-add service: {}", e);
            }
            return WindowOutcome::Recovered;
        }

        warn!(
            %service,
            %url,
            attempt,
            checked_at = %result.checked_at,
            response_time_ms = result.response_time_ms,
            reason = result.error_message.as_deref().unwrap_or("unknown"),
            "Heartbeat check failed"
        );

        if healthy {
            healthy = false;
            match store.remove(url) {
                Ok(_round) => evicted = true,
                Err(e) if e.is_not_found() => {
                    debug!(%service, %url, "Service already deregistered");
                }
                Err(e) => error!(%service, %url, "Failed to evict service: {}", e),
            }
        }

        if attempt < config.attempts {
            sleep(config.retry_delay).await;
        }
    }

    if evicted {
        warn!(%service, %url, "Service evicted after failed heartbeat window");
        WindowOutcome::Evicted
    } else {
        WindowOutcome::Departed
    }
}
