// src/monitor/recovery.rs
// Rule-driven remediation: evaluates health snapshots against a rule list
// and runs bounded recovery actions, escalating when caps are exhausted.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::process::Stdio;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{error, info, warn};

use super::{HealthProbe, HealthSnapshot, SERVICE_CACHE, SERVICE_GRAPH, SERVICE_VECTOR, ServiceHealth};
use crate::config::RecoveryConfig;
use crate::metrics::PromMetrics;
use crate::stores::SharedCache;

/// Bounded in-memory log of recovery attempts
const ATTEMPT_LOG_SIZE: usize = 256;

/// TTL for the ephemeral recovery markers written to the shared cache
const RECOVERY_KEY_TTL_SECS: u64 = 3600;

/// Condition that fires a rule against a service's health
#[derive(Debug, Clone)]
pub enum TriggerCondition {
    ConsecutiveFailures(u32),
    LatencyAtLeastMs(u64),
    ErrorMatches(String),
}

impl TriggerCondition {
    fn matches(&self, health: &ServiceHealth) -> bool {
        match self {
            Self::ConsecutiveFailures(n) => health.consecutive_failures >= *n,
            Self::LatencyAtLeastMs(t) => health.last_latency_ms.is_some_and(|l| l >= *t),
            Self::ErrorMatches(pattern) => health
                .last_error
                .as_deref()
                .is_some_and(|e| e.contains(pattern.as_str())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryAction {
    RestartContainer,
    ClearCache,
    Reconnect,
    Escalate,
    Noop,
}

impl RecoveryAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RestartContainer => "restart_container",
            Self::ClearCache => "clear_cache",
            Self::Reconnect => "reconnect",
            Self::Escalate => "escalate",
            Self::Noop => "noop",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RecoveryRule {
    /// "*", an exact service name, or a prefix ending in '*'
    pub service_pattern: String,
    pub trigger: TriggerCondition,
    pub action: RecoveryAction,
    pub max_attempts: u32,
}

impl RecoveryRule {
    fn matches_service(&self, service: &str) -> bool {
        let pattern = self.service_pattern.as_str();
        if pattern == "*" {
            return true;
        }
        match pattern.strip_suffix('*') {
            Some(prefix) => service.starts_with(prefix),
            None => service == pattern,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RecoveryAttempt {
    pub service: String,
    pub action: RecoveryAction,
    pub at: DateTime<Utc>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Per-service attempt ordinal
    pub ordinal: u32,
}

/// Injected restart command; the recovery engine is the only component
/// permitted to issue restart-class commands.
#[async_trait]
pub trait RestartHandle: Send + Sync {
    async fn restart(&self, service: &str) -> std::result::Result<(), String>;
}

/// Runs a configured shell command with the service name appended
pub struct ShellRestart {
    command: String,
}

impl ShellRestart {
    pub fn new(command: String) -> Self {
        Self { command }
    }
}

#[async_trait]
impl RestartHandle for ShellRestart {
    async fn restart(&self, service: &str) -> std::result::Result<(), String> {
        let line = format!("{} {}", self.command, service);
        info!(command = %line, "Running restart command");
        let status = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(&line)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|e| e.to_string())?;
        if status.success() {
            Ok(())
        } else {
            Err(format!("restart command exited with {status}"))
        }
    }
}

/// Logs the request instead of restarting; used when no restart command
/// is configured
pub struct LogOnlyRestart;

#[async_trait]
impl RestartHandle for LogOnlyRestart {
    async fn restart(&self, service: &str) -> std::result::Result<(), String> {
        warn!(service, "No restart command configured — restart request logged only");
        Ok(())
    }
}

#[derive(Default)]
struct ServiceRecoveryState {
    last_attempt: Option<Instant>,
    recent: VecDeque<Instant>,
    rule_attempts: HashMap<usize, u32>,
    ordinal: u32,
}

/// Evaluates recovery rules against health snapshots
pub struct RecoveryEngine {
    rules: Vec<RecoveryRule>,
    cache: Arc<dyn SharedCache>,
    restart: Arc<dyn RestartHandle>,
    probes: HashMap<&'static str, Arc<dyn HealthProbe>>,
    config: RecoveryConfig,
    prom: Arc<PromMetrics>,
    state: Mutex<HashMap<String, ServiceRecoveryState>>,
    attempts: RwLock<VecDeque<RecoveryAttempt>>,
}

impl RecoveryEngine {
    pub fn new(
        rules: Vec<RecoveryRule>,
        cache: Arc<dyn SharedCache>,
        restart: Arc<dyn RestartHandle>,
        probes: Vec<Arc<dyn HealthProbe>>,
        config: RecoveryConfig,
        prom: Arc<PromMetrics>,
    ) -> Self {
        Self {
            rules,
            cache,
            restart,
            probes: probes.into_iter().map(|p| (p.name(), p)).collect(),
            config,
            prom,
            state: Mutex::new(HashMap::new()),
            attempts: RwLock::new(VecDeque::new()),
        }
    }

    /// Default rule list. The first matching rule wins, so the
    /// service-specific restart rules precede the generic reconnect
    /// wildcard — a service at 5 consecutive failures restarts instead of
    /// being absorbed by the 3-failure reconnect rule.
    pub fn default_rules() -> Vec<RecoveryRule> {
        vec![
            RecoveryRule {
                service_pattern: format!("{SERVICE_GRAPH}*"),
                trigger: TriggerCondition::ConsecutiveFailures(5),
                action: RecoveryAction::RestartContainer,
                max_attempts: 2,
            },
            RecoveryRule {
                service_pattern: format!("{SERVICE_VECTOR}*"),
                trigger: TriggerCondition::ConsecutiveFailures(5),
                action: RecoveryAction::RestartContainer,
                max_attempts: 2,
            },
            RecoveryRule {
                service_pattern: SERVICE_CACHE.into(),
                trigger: TriggerCondition::LatencyAtLeastMs(5000),
                action: RecoveryAction::ClearCache,
                max_attempts: 3,
            },
            RecoveryRule {
                service_pattern: "*".into(),
                trigger: TriggerCondition::ErrorMatches("model not found".into()),
                action: RecoveryAction::Escalate,
                max_attempts: 5,
            },
            RecoveryRule {
                service_pattern: "*".into(),
                trigger: TriggerCondition::ConsecutiveFailures(3),
                action: RecoveryAction::Reconnect,
                max_attempts: 3,
            },
        ]
    }

    /// Recent attempt records, oldest first
    pub fn attempts(&self) -> Vec<RecoveryAttempt> {
        self.attempts
            .read()
            .expect("recovery lock")
            .iter()
            .cloned()
            .collect()
    }

    /// Evaluate every rule against the snapshot, running at most one action
    /// per service per pass. Returns the attempts recorded this pass.
    pub async fn evaluate(&self, snapshot: &HealthSnapshot) -> Vec<RecoveryAttempt> {
        let mut recorded = Vec::new();

        for (service, health) in snapshot {
            let Some((rule_idx, action)) = self.pick_action(service, health) else {
                continue;
            };
            let attempt = self.execute(service, rule_idx, action).await;
            recorded.push(attempt);
        }

        recorded
    }

    /// Find the first applicable rule, applying cooldowns and caps. A rule
    /// past its cap (or a service past its hourly cap) downgrades to
    /// escalation. Inside the cooldown, attempts collapse to none.
    fn pick_action(&self, service: &str, health: &ServiceHealth) -> Option<(usize, RecoveryAction)> {
        let fired = self
            .rules
            .iter()
            .enumerate()
            .find(|(_, rule)| rule.matches_service(service) && rule.trigger.matches(health))?;
        let (rule_idx, rule) = fired;

        let mut state = self.state.lock().expect("recovery lock");
        let service_state = state.entry(service.to_string()).or_default();

        // Cooldown: repeated triggers collapse into the previous attempt
        if let Some(last) = service_state.last_attempt
            && last.elapsed() < Duration::from_secs(self.config.cooldown_secs)
        {
            return None;
        }

        let now = Instant::now();
        service_state
            .recent
            .retain(|t| now.duration_since(*t) < Duration::from_secs(3600));

        let rule_count = service_state
            .rule_attempts
            .get(&rule_idx)
            .copied()
            .unwrap_or(0);
        let over_hourly_cap =
            service_state.recent.len() as u32 >= self.config.max_attempts_per_hour;
        let over_rule_cap = rule_count >= rule.max_attempts;

        let action = if over_hourly_cap || over_rule_cap {
            RecoveryAction::Escalate
        } else {
            service_state.rule_attempts.insert(rule_idx, rule_count + 1);
            rule.action
        };

        service_state.last_attempt = Some(now);
        service_state.recent.push_back(now);
        service_state.ordinal += 1;

        Some((rule_idx, action))
    }

    async fn execute(
        &self,
        service: &str,
        _rule_idx: usize,
        action: RecoveryAction,
    ) -> RecoveryAttempt {
        info!(service, action = action.as_str(), "Running recovery action");

        let result = match action {
            RecoveryAction::RestartContainer => self.restart.restart(service).await,
            RecoveryAction::ClearCache => self
                .cache
                .delete_prefix(&format!("monitoring:{service}:"))
                .await
                .map(|_| ())
                .map_err(|e| e.to_string()),
            RecoveryAction::Reconnect => match self.probes.get(service) {
                Some(probe) => probe.probe().await,
                None => Err(format!("no probe registered for {service}")),
            },
            RecoveryAction::Escalate => {
                error!(
                    service,
                    alert = true,
                    "Recovery escalation: automated remediation exhausted or ineligible"
                );
                Ok(())
            }
            RecoveryAction::Noop => Ok(()),
        };

        let ordinal = {
            let state = self.state.lock().expect("recovery lock");
            state.get(service).map(|s| s.ordinal).unwrap_or(0)
        };
        let attempt = RecoveryAttempt {
            service: service.to_string(),
            action,
            at: Utc::now(),
            success: result.is_ok(),
            error: result.err(),
            ordinal,
        };

        // Ephemeral marker so other replicas can observe recent recoveries
        let key = format!("recovery:{}:{}", service, attempt.at.timestamp());
        if let Ok(json) = serde_json::to_string(&attempt) {
            if let Err(e) = self.cache.set_ex(&key, &json, RECOVERY_KEY_TTL_SECS).await {
                warn!(service, error = %e, "Failed to write recovery marker");
            }
        }

        self.prom
            .recovery_attempts_total
            .with_label_values(&[action.as_str()])
            .inc();

        let mut log = self.attempts.write().expect("recovery lock");
        log.push_back(attempt.clone());
        while log.len() > ATTEMPT_LOG_SIZE {
            log.pop_front();
        }

        attempt
    }

    /// Evaluation loop fed by the health monitor's watch channel
    pub async fn run(
        self: Arc<Self>,
        mut health_rx: watch::Receiver<HealthSnapshot>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!(rules = self.rules.len(), "Recovery engine started");
        loop {
            tokio::select! {
                changed = health_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let snapshot = health_rx.borrow_and_update().clone();
                    let attempts = self.evaluate(&snapshot).await;
                    for attempt in &attempts {
                        info!(
                            service = %attempt.service,
                            action = attempt.action.as_str(),
                            success = attempt.success,
                            ordinal = attempt.ordinal,
                            "Recovery attempt recorded"
                        );
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Recovery engine shutting down");
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::MemoryCache;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingRestart {
        calls: AtomicU32,
    }

    #[async_trait]
    impl RestartHandle for CountingRestart {
        async fn restart(&self, _service: &str) -> std::result::Result<(), String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn failing_health(service: &str, consecutive: u32) -> ServiceHealth {
        let mut health = ServiceHealth::new(service);
        health.consecutive_failures = consecutive;
        health.last_error = Some("connection refused".into());
        health
    }

    fn snapshot_of(health: ServiceHealth) -> HealthSnapshot {
        HashMap::from([(health.name.clone(), health)])
    }

    fn engine(
        rules: Vec<RecoveryRule>,
        restart: Arc<CountingRestart>,
        cooldown_secs: u64,
    ) -> RecoveryEngine {
        RecoveryEngine::new(
            rules,
            Arc::new(MemoryCache::new()),
            restart,
            Vec::new(),
            RecoveryConfig {
                cooldown_secs,
                max_attempts_per_hour: 5,
                restart_command: None,
            },
            Arc::new(PromMetrics::new()),
        )
    }

    fn restart_rule(max_attempts: u32) -> RecoveryRule {
        RecoveryRule {
            service_pattern: "graph".into(),
            trigger: TriggerCondition::ConsecutiveFailures(5),
            action: RecoveryAction::RestartContainer,
            max_attempts,
        }
    }

    #[tokio::test]
    async fn test_rule_cap_escalates_third_attempt() {
        let restart = Arc::new(CountingRestart {
            calls: AtomicU32::new(0),
        });
        let engine = engine(vec![restart_rule(2)], restart.clone(), 0);
        let snapshot = snapshot_of(failing_health("graph", 5));

        let first = engine.evaluate(&snapshot).await;
        let second = engine.evaluate(&snapshot).await;
        let third = engine.evaluate(&snapshot).await;

        assert_eq!(first[0].action, RecoveryAction::RestartContainer);
        assert_eq!(second[0].action, RecoveryAction::RestartContainer);
        assert_eq!(third[0].action, RecoveryAction::Escalate);
        assert_eq!(restart.calls.load(Ordering::SeqCst), 2);
        assert_eq!(engine.attempts().len(), 3);
    }

    #[tokio::test]
    async fn test_default_rules_restart_graph_then_escalate() {
        // A graph service stuck at 5 consecutive failures must hit the
        // restart rule (cap 2), not the generic reconnect wildcard, and
        // the third evaluation must escalate instead of restarting again.
        let restart = Arc::new(CountingRestart {
            calls: AtomicU32::new(0),
        });
        let engine = RecoveryEngine::new(
            RecoveryEngine::default_rules(),
            Arc::new(MemoryCache::new()),
            restart.clone(),
            Vec::new(),
            RecoveryConfig {
                cooldown_secs: 0,
                max_attempts_per_hour: 5,
                restart_command: None,
            },
            Arc::new(PromMetrics::new()),
        );
        let snapshot = snapshot_of(failing_health("graph", 5));

        let first = engine.evaluate(&snapshot).await;
        let second = engine.evaluate(&snapshot).await;
        let third = engine.evaluate(&snapshot).await;

        assert_eq!(first[0].action, RecoveryAction::RestartContainer);
        assert_eq!(second[0].action, RecoveryAction::RestartContainer);
        assert_eq!(third[0].action, RecoveryAction::Escalate);
        assert_eq!(restart.calls.load(Ordering::SeqCst), 2);

        let recorded = engine.attempts();
        assert_eq!(recorded.len(), 3);
        assert_eq!(
            recorded
                .iter()
                .filter(|a| a.action == RecoveryAction::RestartContainer)
                .count(),
            2
        );
    }

    #[tokio::test]
    async fn test_default_rules_reconnect_below_restart_threshold() {
        // Between 3 and 4 consecutive failures only the reconnect
        // wildcard applies
        let restart = Arc::new(CountingRestart {
            calls: AtomicU32::new(0),
        });
        let engine = RecoveryEngine::new(
            RecoveryEngine::default_rules(),
            Arc::new(MemoryCache::new()),
            restart.clone(),
            Vec::new(),
            RecoveryConfig {
                cooldown_secs: 0,
                max_attempts_per_hour: 5,
                restart_command: None,
            },
            Arc::new(PromMetrics::new()),
        );

        let attempts = engine.evaluate(&snapshot_of(failing_health("graph", 3))).await;
        assert_eq!(attempts[0].action, RecoveryAction::Reconnect);
        assert_eq!(restart.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cooldown_collapses_repeat_triggers() {
        let restart = Arc::new(CountingRestart {
            calls: AtomicU32::new(0),
        });
        let engine = engine(vec![restart_rule(5)], restart.clone(), 60);
        let snapshot = snapshot_of(failing_health("graph", 5));

        let first = engine.evaluate(&snapshot).await;
        let second = engine.evaluate(&snapshot).await;
        assert_eq!(first.len(), 1);
        assert!(second.is_empty());
        assert_eq!(restart.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_below_trigger_threshold_is_quiet() {
        let restart = Arc::new(CountingRestart {
            calls: AtomicU32::new(0),
        });
        let engine = engine(vec![restart_rule(5)], restart, 0);
        let snapshot = snapshot_of(failing_health("graph", 2));
        assert!(engine.evaluate(&snapshot).await.is_empty());
    }

    #[tokio::test]
    async fn test_error_pattern_rule() {
        let restart = Arc::new(CountingRestart {
            calls: AtomicU32::new(0),
        });
        let rules = vec![RecoveryRule {
            service_pattern: "*".into(),
            trigger: TriggerCondition::ErrorMatches("model not found".into()),
            action: RecoveryAction::Escalate,
            max_attempts: 5,
        }];
        let engine = engine(rules, restart, 0);

        let mut health = ServiceHealth::new("vector");
        health.last_error = Some("embedding model not found on server".into());
        let attempts = engine.evaluate(&snapshot_of(health)).await;
        assert_eq!(attempts[0].action, RecoveryAction::Escalate);
    }

    #[tokio::test]
    async fn test_clear_cache_is_idempotent() {
        let cache = Arc::new(MemoryCache::new());
        cache
            .set_ex("monitoring:cache:probe", "x", 60)
            .await
            .unwrap();
        let engine = RecoveryEngine::new(
            vec![RecoveryRule {
                service_pattern: "cache".into(),
                trigger: TriggerCondition::ConsecutiveFailures(1),
                action: RecoveryAction::ClearCache,
                max_attempts: 5,
            }],
            cache.clone(),
            Arc::new(LogOnlyRestart),
            Vec::new(),
            RecoveryConfig {
                cooldown_secs: 0,
                max_attempts_per_hour: 10,
                restart_command: None,
            },
            Arc::new(PromMetrics::new()),
        );

        let snapshot = snapshot_of(failing_health("cache", 1));
        let first = engine.evaluate(&snapshot).await;
        let second = engine.evaluate(&snapshot).await;
        assert!(first[0].success);
        assert!(second[0].success);
        assert_eq!(cache.get("monitoring:cache:probe").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_attempt_ordinals_increment() {
        let restart = Arc::new(CountingRestart {
            calls: AtomicU32::new(0),
        });
        let engine = engine(vec![restart_rule(5)], restart, 0);
        let snapshot = snapshot_of(failing_health("graph", 5));

        let first = engine.evaluate(&snapshot).await;
        let second = engine.evaluate(&snapshot).await;
        assert_eq!(first[0].ordinal, 1);
        assert_eq!(second[0].ordinal, 2);
    }

    #[test]
    fn test_service_pattern_matching() {
        let rule = restart_rule(1);
        assert!(rule.matches_service("graph"));
        assert!(!rule.matches_service("vector"));

        let wildcard = RecoveryRule {
            service_pattern: "*".into(),
            ..restart_rule(1)
        };
        assert!(wildcard.matches_service("anything"));

        let prefix = RecoveryRule {
            service_pattern: "graph*".into(),
            ..restart_rule(1)
        };
        assert!(prefix.matches_service("graph-replica-2"));
    }
}
