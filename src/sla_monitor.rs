//! # SLA Monitor
//!
//! Background task that finds assigned opportunities nobody has contacted
//! within their pipeline's SLA window, claims each one, and hands the claimed
//! timeout to the redistribution state machine. The claim is a
//! compare-and-swap on the opportunity, so overlapping scans (another replica,
//! a slow previous tick) and concurrent manual reassignments never produce two
//! decisions for the same timeout.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::{counter, gauge, histogram};
use rand::Rng;
use sea_orm::DatabaseConnection;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::time::{Duration as TokioDuration, Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::config::{AppConfig, SlaMonitorConfig};
use crate::distribution::{AssignmentService, RedistributionAction, RedistributionStateMachine};
use crate::error::DistributionError;
use crate::models::opportunity;
use crate::repositories::{ClaimOutcome, DistributionConfigRepository, OpportunityRepository};

/// Counters for one `scan_and_redistribute` pass.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    pub pipelines_scanned: u64,
    pub pipelines_skipped: u64,
    pub candidates: u64,
    pub claims_won: u64,
    pub claims_lost: u64,
    pub redistributions: u64,
    pub queued_for_manual: u64,
    pub limit_actions: u64,
    pub discarded: u64,
    pub failures: u64,
}

impl ScanReport {
    fn record(&mut self, outcome: CandidateOutcome) {
        match outcome {
            CandidateOutcome::ClaimLost => self.claims_lost += 1,
            CandidateOutcome::Decided(action) => {
                self.claims_won += 1;
                match action {
                    RedistributionAction::Redistributed { .. } => self.redistributions += 1,
                    RedistributionAction::QueuedForManual => self.queued_for_manual += 1,
                    RedistributionAction::LimitApplied(_) => self.limit_actions += 1,
                    RedistributionAction::Discarded => self.discarded += 1,
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum CandidateOutcome {
    ClaimLost,
    Decided(RedistributionAction),
}

/// Background SLA monitor service.
#[derive(Clone)]
pub struct SlaMonitor {
    settings: SlaMonitorConfig,
    configs: DistributionConfigRepository,
    opportunities: OpportunityRepository,
    state_machine: RedistributionStateMachine,
    batch_size: u64,
}

impl SlaMonitor {
    /// Create a monitor using the `pipeline_members` roster.
    pub fn new(config: Arc<AppConfig>, db: Arc<DatabaseConnection>) -> Self {
        let assignments = AssignmentService::new(db.clone());
        Self::with_assignments(config, db, assignments)
    }

    /// Create a monitor that redistributes through an existing assignment service.
    pub fn with_assignments(
        config: Arc<AppConfig>,
        db: Arc<DatabaseConnection>,
        assignments: AssignmentService,
    ) -> Self {
        let settings = config.sla_monitor.clone();
        Self {
            batch_size: settings.batch_size.max(1),
            settings,
            configs: DistributionConfigRepository::new(db.clone()),
            opportunities: OpportunityRepository::new(db.clone()),
            state_machine: RedistributionStateMachine::new(db, assignments),
        }
    }

    /// Override the number of candidates read per pipeline per scan.
    pub fn with_batch_size(mut self, batch_size: u64) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Run the monitor loop until the provided shutdown token fires.
    #[instrument(skip_all)]
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), DistributionError> {
        info!(
            tick_interval_seconds = self.settings.tick_interval_seconds,
            concurrency = self.settings.concurrency,
            "Starting SLA monitor"
        );
        let tick_interval = TokioDuration::from_secs(self.settings.tick_interval_seconds);

        let startup_delay = startup_delay(&self.settings);
        if !startup_delay.is_zero() {
            debug!(delay_ms = startup_delay.as_millis() as u64, "Delaying first SLA scan");
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("SLA monitor stopped before first scan");
                    return Ok(());
                }
                _ = sleep(startup_delay) => {}
            }
        }

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("SLA monitor shutdown requested");
                    break;
                }
                _ = sleep(tick_interval) => {
                    let tick_started = Instant::now();
                    if let Err(err) = self.scan_and_redistribute(Utc::now()).await {
                        error!(error = ?err, "SLA scan failed");
                    }
                    histogram!("sla_monitor_tick_duration_ms")
                        .record(tick_started.elapsed().as_secs_f64() * 1_000.0);
                }
            }
        }

        info!("SLA monitor stopped");
        Ok(())
    }

    /// One pass over every SLA-enabled pipeline as of `now`.
    ///
    /// A failure on one opportunity or one pipeline is logged and counted; the
    /// pass continues with the rest.
    pub async fn scan_and_redistribute(
        &self,
        now: DateTime<Utc>,
    ) -> Result<ScanReport, DistributionError> {
        let mut report = ScanReport::default();
        let pipelines = self.configs.list_sla_enabled().await?;

        for config in pipelines {
            if let Err(err) = config.validate() {
                report.pipelines_skipped += 1;
                warn!(
                    pipeline_id = %config.pipeline_id,
                    error = %err,
                    "Skipping pipeline with invalid SLA configuration"
                );
                continue;
            }

            let cutoff = now - config.sla_window();
            let candidates = match self
                .opportunities
                .sla_candidates(config.pipeline_id, cutoff, self.batch_size)
                .await
            {
                Ok(candidates) => candidates,
                Err(err) => {
                    report.failures += 1;
                    error!(
                        pipeline_id = %config.pipeline_id,
                        error = ?err,
                        "Failed to load SLA candidates"
                    );
                    continue;
                }
            };

            report.pipelines_scanned += 1;
            report.candidates += candidates.len() as u64;
            if !candidates.is_empty() {
                debug!(
                    pipeline_id = %config.pipeline_id,
                    overdue = candidates.len(),
                    sla_minutes = config.sla_minutes,
                    "Found overdue opportunities"
                );
            }

            self.process_batch(config.pipeline_id, candidates, now, &mut report)
                .await;
        }

        gauge!("sla_monitor_overdue_gauge").set(report.candidates as f64);
        counter!("sla_monitor_claims_won_total").increment(report.claims_won);
        counter!("sla_monitor_claims_lost_total").increment(report.claims_lost);
        counter!("sla_monitor_redistributions_total").increment(report.redistributions);
        counter!("sla_monitor_failures_total").increment(report.failures);

        info!(
            pipelines = report.pipelines_scanned,
            candidates = report.candidates,
            claims_won = report.claims_won,
            claims_lost = report.claims_lost,
            redistributions = report.redistributions,
            queued_for_manual = report.queued_for_manual,
            limit_actions = report.limit_actions,
            failures = report.failures,
            "SLA scan completed"
        );

        Ok(report)
    }

    async fn process_batch(
        &self,
        pipeline_id: Uuid,
        candidates: Vec<opportunity::Model>,
        now: DateTime<Utc>,
        report: &mut ScanReport,
    ) {
        let semaphore = Arc::new(Semaphore::new(self.settings.concurrency.max(1) as usize));
        let mut handles = Vec::new();

        for candidate in candidates {
            let monitor = self.clone();
            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                report.failures += 1;
                error!(opportunity_id = %candidate.id, "SLA monitor semaphore closed");
                continue;
            };

            let handle = tokio::spawn(async move {
                let _permit = permit;
                let opportunity_id = candidate.id;
                (
                    opportunity_id,
                    monitor.process_candidate(pipeline_id, candidate, now).await,
                )
            });
            handles.push(handle);
        }

        for handle in handles {
            match handle.await {
                Ok((_, Ok(outcome))) => report.record(outcome),
                Ok((opportunity_id, Err(err))) => {
                    report.failures += 1;
                    let metric_labels = vec![("code", err.code().to_string())];
                    counter!("sla_monitor_decision_failures_total", &metric_labels).increment(1);
                    error!(
                        opportunity_id = %opportunity_id,
                        pipeline_id = %pipeline_id,
                        code = err.code(),
                        error = ?err,
                        "SLA decision failed"
                    );
                }
                Err(err) => {
                    report.failures += 1;
                    error!(error = ?err, "SLA task panicked or was cancelled");
                }
            }
        }
    }

    async fn process_candidate(
        &self,
        pipeline_id: Uuid,
        candidate: opportunity::Model,
        now: DateTime<Utc>,
    ) -> Result<CandidateOutcome, DistributionError> {
        let version = match self.opportunities.claim_for_sla(&candidate, now).await? {
            ClaimOutcome::Won { version } => version,
            ClaimOutcome::Lost => {
                debug!(
                    opportunity_id = %candidate.id,
                    pipeline_id = %pipeline_id,
                    "SLA claim lost; opportunity changed concurrently"
                );
                return Ok(CandidateOutcome::ClaimLost);
            }
        };

        let action = self
            .state_machine
            .decide(candidate.id, pipeline_id, version, now)
            .await?;

        Ok(CandidateOutcome::Decided(action))
    }
}

fn startup_delay(settings: &SlaMonitorConfig) -> TokioDuration {
    if settings.startup_jitter_pct <= 0.0 {
        return TokioDuration::ZERO;
    }
    let max_seconds = settings.tick_interval_seconds as f64 * settings.startup_jitter_pct.min(1.0);
    let seconds = rand::thread_rng().gen_range(0.0..=max_seconds);
    TokioDuration::from_secs_f64(seconds)
}
