// src/tuning/mod.rs
// Feedback-driven confidence tuning: correlates per-query scoring features
// with feedback in a trailing window and proposes bounded weight deltas.

use chrono::{Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::config::TunerConfig;
use crate::error::Result;
use crate::metrics::{LabeledRecord, RecordStore, TuningState, WeightDeltas};

/// How often the scheduled tuner wakes up
const TUNER_INTERVAL: Duration = Duration::from_secs(6 * 3600);

/// Result of one tuning pass over one project
#[derive(Debug, Clone, Serialize)]
pub struct TuningOutcome {
    pub project: String,
    pub sample_count: usize,
    /// Deltas proposed by this pass (zero when abstaining)
    pub proposed: WeightDeltas,
    /// Accumulated deltas after this pass
    pub accumulated: WeightDeltas,
    pub applied: bool,
    pub reason: Option<String>,
}

/// Out-of-band learner over query records with attached feedback
pub struct ConfidenceTuner {
    records: Arc<dyn RecordStore>,
    config: TunerConfig,
}

impl ConfidenceTuner {
    pub fn new(records: Arc<dyn RecordStore>, config: TunerConfig) -> Self {
        Self { records, config }
    }

    /// Run one tuning pass. With `dry_run` the proposed deltas are returned
    /// without persisting anything.
    pub async fn run(&self, project: Option<&str>, dry_run: bool) -> Result<Vec<TuningOutcome>> {
        let since = Utc::now() - ChronoDuration::days(self.config.window_days);
        let labeled = self.records.labeled_records_since(since, project).await?;

        let mut by_project: BTreeMap<String, Vec<LabeledRecord>> = BTreeMap::new();
        for record in labeled {
            by_project
                .entry(record.project.clone())
                .or_default()
                .push(record);
        }

        let mut outcomes = Vec::new();
        for (project, records) in by_project {
            outcomes.push(self.tune_project(&project, &records, dry_run).await?);
        }
        Ok(outcomes)
    }

    async fn tune_project(
        &self,
        project: &str,
        records: &[LabeledRecord],
        dry_run: bool,
    ) -> Result<TuningOutcome> {
        let prior = self.records.tuning_config(project).await?;
        let prior_deltas = prior.as_ref().map(|s| s.deltas).unwrap_or_default();

        if records.len() < self.config.min_samples {
            debug!(
                project,
                samples = records.len(),
                min = self.config.min_samples,
                "Tuning abstained: not enough feedback"
            );
            return Ok(TuningOutcome {
                project: project.to_string(),
                sample_count: records.len(),
                proposed: WeightDeltas::default(),
                accumulated: prior_deltas,
                applied: false,
                reason: Some(format!(
                    "abstained: {} samples below minimum {}",
                    records.len(),
                    self.config.min_samples
                )),
            });
        }

        // At most one persisted mutation per tuning window
        let rate_limited = prior.as_ref().is_some_and(|s| {
            s.last_tuned
                .is_some_and(|t| t > Utc::now() - ChronoDuration::days(self.config.window_days))
        });

        let usefulness: Vec<f32> = records.iter().map(|r| r.usefulness).collect();
        let proposed = WeightDeltas {
            staleness_penalty: self.propose(
                records.iter().map(|r| r.features.staleness).collect(),
                &usefulness,
            ),
            orphan_penalty: self.propose(
                records.iter().map(|r| r.features.orphan_ratio).collect(),
                &usefulness,
            ),
            connectivity_bonus: self.propose(
                records.iter().map(|r| r.features.connectivity).collect(),
                &usefulness,
            ),
        };

        // Deltas are additive across runs, clipped after addition
        let accumulated = WeightDeltas {
            staleness_penalty: prior_deltas.staleness_penalty + proposed.staleness_penalty,
            orphan_penalty: prior_deltas.orphan_penalty + proposed.orphan_penalty,
            connectivity_bonus: prior_deltas.connectivity_bonus + proposed.connectivity_bonus,
        }
        .clipped(self.config.delta_bound);

        if dry_run || rate_limited {
            return Ok(TuningOutcome {
                project: project.to_string(),
                sample_count: records.len(),
                proposed,
                accumulated,
                applied: false,
                reason: rate_limited.then(|| "rate limited: already tuned this window".to_string()),
            });
        }

        let state = TuningState {
            project: project.to_string(),
            deltas: accumulated,
            tuning_count: prior.map(|s| s.tuning_count).unwrap_or(0) + 1,
            last_tuned: Some(Utc::now()),
        };
        self.records.save_tuning_config(&state).await?;
        info!(
            project,
            samples = records.len(),
            staleness = accumulated.staleness_penalty,
            orphan = accumulated.orphan_penalty,
            connectivity = accumulated.connectivity_bonus,
            "Tuning configuration updated"
        );

        Ok(TuningOutcome {
            project: project.to_string(),
            sample_count: records.len(),
            proposed,
            accumulated,
            applied: true,
            reason: None,
        })
    }

    /// delta = sign(corr) × min(|corr|, max_step) × learning_rate
    fn propose(&self, xs: Vec<f32>, ys: &[f32]) -> f32 {
        let Some(corr) = pearson(&xs, ys) else {
            return 0.0;
        };
        corr.signum() * corr.abs().min(self.config.max_step) * self.config.learning_rate
    }

    /// Scheduled loop; one pass per wakeup across all projects
    pub async fn run_scheduled(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(
            window_days = self.config.window_days,
            min_samples = self.config.min_samples,
            "Confidence tuner scheduled"
        );
        let mut interval = tokio::time::interval(TUNER_INTERVAL);
        interval.tick().await; // immediate first tick is skipped
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.run(None, false).await {
                        Ok(outcomes) => {
                            let applied = outcomes.iter().filter(|o| o.applied).count();
                            debug!(projects = outcomes.len(), applied, "Tuning pass finished");
                        }
                        Err(e) => tracing::warn!(error = %e, "Tuning pass failed"),
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Confidence tuner shutting down");
                        break;
                    }
                }
            }
        }
    }
}

/// Pearson correlation; `None` when either series is degenerate
fn pearson(xs: &[f32], ys: &[f32]) -> Option<f32> {
    if xs.len() != ys.len() || xs.len() < 2 {
        return None;
    }
    let n = xs.len() as f32;
    let mean_x = xs.iter().sum::<f32>() / n;
    let mean_y = ys.iter().sum::<f32>() / n;

    let mut covariance = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for (x, y) in xs.iter().zip(ys) {
        let dx = x - mean_x;
        let dy = y - mean_y;
        covariance += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }
    if var_x == 0.0 || var_y == 0.0 {
        return None;
    }
    Some(covariance / (var_x.sqrt() * var_y.sqrt()))
}
