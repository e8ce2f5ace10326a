// src/monitor/mod.rs
// Health monitoring for external services: periodic probes, per-service
// status history, and a watch channel feeding the breaker cascade and the
// recovery engine.

pub mod breaker;
pub mod probes;
pub mod recovery;

pub use breaker::{BreakerPhase, CircuitBreaker};
pub use probes::{CacheProbe, GraphProbe, VectorProbe};
pub use recovery::{
    RecoveryAction, RecoveryAttempt, RecoveryEngine, RecoveryRule, RestartHandle, TriggerCondition,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::MonitorConfig;

/// Outbound dependency names used by the breaker, monitor, and recovery
pub const SERVICE_VECTOR: &str = "vector";
pub const SERVICE_GRAPH: &str = "graph";
pub const SERVICE_CACHE: &str = "cache";

/// Consecutive failures before a service is marked unhealthy
const UNHEALTHY_AFTER: u32 = 3;

/// Consecutive slow probes before a service is marked degraded
const DEGRADED_AFTER: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Unknown,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unhealthy => "unhealthy",
            Self::Unknown => "unknown",
        }
    }
}

/// One probe observation
#[derive(Debug, Clone, Serialize)]
pub struct HealthSample {
    pub at: DateTime<Utc>,
    pub latency_ms: u64,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Rolling view of one service's health
#[derive(Debug, Clone, Serialize)]
pub struct ServiceHealth {
    pub name: String,
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_latency_ms: Option<u64>,
    pub consecutive_failures: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub last_transition: DateTime<Utc>,
    #[serde(skip)]
    pub history: VecDeque<HealthSample>,
    #[serde(skip)]
    degraded_streak: u32,
}

impl ServiceHealth {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            status: HealthStatus::Unknown,
            last_latency_ms: None,
            consecutive_failures: 0,
            last_error: None,
            last_transition: Utc::now(),
            history: VecDeque::new(),
            degraded_streak: 0,
        }
    }
}

pub type HealthSnapshot = HashMap<String, ServiceHealth>;

/// A single liveness probe against one external service
#[async_trait]
pub trait HealthProbe: Send + Sync {
    fn name(&self) -> &'static str;

    async fn probe(&self) -> std::result::Result<(), String>;
}

/// Periodically probes every configured service. Probes for one service
/// never overlap: each round runs them sequentially inside the single
/// monitor task.
pub struct HealthMonitor {
    probes: Vec<Arc<dyn HealthProbe>>,
    state: RwLock<HealthSnapshot>,
    tx: watch::Sender<HealthSnapshot>,
    config: MonitorConfig,
}

impl HealthMonitor {
    pub fn new(probes: Vec<Arc<dyn HealthProbe>>, config: MonitorConfig) -> Self {
        let initial: HealthSnapshot = probes
            .iter()
            .map(|p| (p.name().to_string(), ServiceHealth::new(p.name())))
            .collect();
        let (tx, _) = watch::channel(initial.clone());
        Self {
            probes,
            state: RwLock::new(initial),
            tx,
            config,
        }
    }

    /// Channel consumed by the recovery engine and the breaker cascade
    pub fn subscribe(&self) -> watch::Receiver<HealthSnapshot> {
        self.tx.subscribe()
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        self.state.read().expect("monitor lock").clone()
    }

    /// Worst status across all services, for GET /health
    pub fn overall(&self) -> HealthStatus {
        let state = self.state.read().expect("monitor lock");
        let mut overall = HealthStatus::Healthy;
        for health in state.values() {
            match health.status {
                HealthStatus::Unhealthy => return HealthStatus::Unhealthy,
                HealthStatus::Degraded => overall = HealthStatus::Degraded,
                _ => {}
            }
        }
        overall
    }

    /// Run one probe round and publish the updated snapshot
    pub async fn probe_all(&self) {
        for probe in &self.probes {
            let started = Instant::now();
            let result = probe.probe().await;
            let sample = HealthSample {
                at: Utc::now(),
                latency_ms: started.elapsed().as_millis() as u64,
                ok: result.is_ok(),
                error: result.err(),
            };
            self.apply(probe.name(), sample);
        }
        let snapshot = self.snapshot();
        let _ = self.tx.send(snapshot);
    }

    fn apply(&self, service: &str, sample: HealthSample) {
        let mut state = self.state.write().expect("monitor lock");
        let health = state
            .entry(service.to_string())
            .or_insert_with(|| ServiceHealth::new(service));
        apply_sample(
            health,
            sample,
            self.config.degraded_latency_ms,
            self.config.history_size,
        );
    }

    /// Probe loop driven by the configured interval until shutdown
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.config.probe_interval_secs,
            services = self.probes.len(),
            "Health monitor started"
        );
        let mut interval =
            tokio::time::interval(Duration::from_secs(self.config.probe_interval_secs.max(1)));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.probe_all().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Health monitor shutting down");
                        break;
                    }
                }
            }
        }
    }
}

/// Status derivation is a function of the probe sequence alone:
/// - any success clears the consecutive-failure counter
/// - 3 consecutive failures mark the service unhealthy
/// - 3 consecutive slow-but-successful probes mark it degraded
fn apply_sample(
    health: &mut ServiceHealth,
    sample: HealthSample,
    degraded_latency_ms: u64,
    history_size: usize,
) {
    health.last_latency_ms = Some(sample.latency_ms);

    if sample.ok {
        health.consecutive_failures = 0;
        health.last_error = None;
        if sample.latency_ms >= degraded_latency_ms {
            health.degraded_streak += 1;
        } else {
            health.degraded_streak = 0;
        }
        let new_status = if health.degraded_streak >= DEGRADED_AFTER {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };
        transition(health, new_status);
    } else {
        health.consecutive_failures += 1;
        health.degraded_streak = 0;
        health.last_error = sample.error.clone();
        if health.consecutive_failures >= UNHEALTHY_AFTER {
            transition(health, HealthStatus::Unhealthy);
        }
    }

    health.history.push_back(sample);
    while health.history.len() > history_size {
        health.history.pop_front();
    }
}

fn transition(health: &mut ServiceHealth, status: HealthStatus) {
    if health.status != status {
        debug!(
            service = %health.name,
            from = health.status.as_str(),
            to = status.as_str(),
            "Service status transition"
        );
        health.status = status;
        health.last_transition = Utc::now();
    }
}

/// Force breakers open for services the monitor reports unhealthy
pub fn spawn_cascade(
    monitor: &HealthMonitor,
    breaker: Arc<CircuitBreaker>,
    mut shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    let mut health_rx = monitor.subscribe();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                changed = health_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let snapshot = health_rx.borrow().clone();
                    for (name, health) in snapshot {
                        if health.status == HealthStatus::Unhealthy {
                            warn!(service = %name, "Unhealthy service — forcing circuit open");
                            breaker.force_open(&name);
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(ok: bool, latency_ms: u64) -> HealthSample {
        HealthSample {
            at: Utc::now(),
            latency_ms,
            ok,
            error: (!ok).then(|| "connection refused".to_string()),
        }
    }

    fn fresh() -> ServiceHealth {
        ServiceHealth::new("graph")
    }

    #[test]
    fn test_three_failures_mark_unhealthy() {
        let mut health = fresh();
        for _ in 0..2 {
            apply_sample(&mut health, sample(false, 10), 1000, 32);
            assert_ne!(health.status, HealthStatus::Unhealthy);
        }
        apply_sample(&mut health, sample(false, 10), 1000, 32);
        assert_eq!(health.status, HealthStatus::Unhealthy);
        assert_eq!(health.consecutive_failures, 3);
    }

    #[test]
    fn test_success_clears_failure_counter() {
        let mut health = fresh();
        apply_sample(&mut health, sample(false, 10), 1000, 32);
        apply_sample(&mut health, sample(false, 10), 1000, 32);
        apply_sample(&mut health, sample(true, 10), 1000, 32);
        assert_eq!(health.consecutive_failures, 0);
        assert_eq!(health.status, HealthStatus::Healthy);
    }

    #[test]
    fn test_three_slow_probes_mark_degraded() {
        let mut health = fresh();
        for _ in 0..3 {
            apply_sample(&mut health, sample(true, 2500), 1000, 32);
        }
        assert_eq!(health.status, HealthStatus::Degraded);
        // A fast probe restores healthy
        apply_sample(&mut health, sample(true, 20), 1000, 32);
        assert_eq!(health.status, HealthStatus::Healthy);
    }

    #[test]
    fn test_status_is_function_of_sequence() {
        let runs: Vec<HealthStatus> = (0..2)
            .map(|_| {
                let mut health = fresh();
                for s in [
                    sample(true, 10),
                    sample(false, 10),
                    sample(false, 10),
                    sample(false, 10),
                ] {
                    apply_sample(&mut health, s, 1000, 32);
                }
                health.status
            })
            .collect();
        assert_eq!(runs[0], runs[1]);
        assert_eq!(runs[0], HealthStatus::Unhealthy);
    }

    #[test]
    fn test_history_is_bounded() {
        let mut health = fresh();
        for _ in 0..100 {
            apply_sample(&mut health, sample(true, 10), 1000, 8);
        }
        assert_eq!(health.history.len(), 8);
    }

    struct FlakyProbe;

    #[async_trait]
    impl HealthProbe for FlakyProbe {
        fn name(&self) -> &'static str {
            "graph"
        }
        async fn probe(&self) -> std::result::Result<(), String> {
            Err("boom".into())
        }
    }

    #[tokio::test]
    async fn test_probe_all_publishes_snapshot() {
        let monitor = HealthMonitor::new(
            vec![Arc::new(FlakyProbe)],
            MonitorConfig {
                probe_interval_secs: 30,
                degraded_latency_ms: 1000,
                history_size: 32,
            },
        );
        let mut rx = monitor.subscribe();
        monitor.probe_all().await;
        assert!(rx.has_changed().unwrap());
        let snapshot = rx.borrow_and_update().clone();
        assert_eq!(snapshot["graph"].consecutive_failures, 1);
        assert_eq!(snapshot["graph"].last_error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_overall_is_worst_status() {
        let monitor = HealthMonitor::new(
            vec![Arc::new(FlakyProbe)],
            MonitorConfig {
                probe_interval_secs: 30,
                degraded_latency_ms: 1000,
                history_size: 32,
            },
        );
        assert_eq!(monitor.overall(), HealthStatus::Healthy);
        for _ in 0..3 {
            monitor.probe_all().await;
        }
        assert_eq!(monitor.overall(), HealthStatus::Unhealthy);
    }
}
