//! Scheduler: runs every collector concurrently on a fixed interval
//!
//! State machine: `Idle → CycleRunning → Idle → … → Stopped`.
//!
//! Each cycle spawns one task per collector, each bounded by its own
//! deadline. A collector that fails or times out is recorded in the cycle
//! summary and attempted again next cycle; it never delays the others. A
//! per-collector in-flight lock guarantees no two runs of the same collector
//! overlap.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::collector::{Collector, FailureKind, RunReport};
use crate::retry::duration_ms;
use crate::status::StatusRegistry;

// ── Errors ──────────────────────────────────────────────────────────

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("scheduler is stopped")]
    Stopped,

    #[error("invalid scheduler config: {0}")]
    InvalidConfig(String),

    #[error("collector {0} is already registered")]
    DuplicateCollector(String),
}

// ── Configuration ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Time between cycle starts.
    #[serde(with = "duration_ms", rename = "interval_ms")]
    pub interval: Duration,
    /// Per-collector deadline inside a cycle. Must not exceed `interval`.
    #[serde(with = "duration_ms", rename = "deadline_ms")]
    pub deadline: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300),
            deadline: Duration::from_secs(240),
        }
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.interval.is_zero() {
            return Err(SchedulerError::InvalidConfig("interval must be positive".into()));
        }
        if self.deadline.is_zero() {
            return Err(SchedulerError::InvalidConfig("deadline must be positive".into()));
        }
        if self.deadline > self.interval {
            return Err(SchedulerError::InvalidConfig(format!(
                "deadline {:?} exceeds interval {:?}",
                self.deadline, self.interval
            )));
        }
        Ok(())
    }
}

// ── Cycle Results ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    Idle,
    CycleRunning,
    Stopped,
}

/// How one collector fared in one cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Success(RunReport),
    Failure {
        kind: FailureKind,
        message: String,
    },
    TimedOut {
        #[serde(with = "duration_ms", rename = "deadline_ms")]
        deadline: Duration,
    },
    Skipped {
        reason: String,
    },
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    /// Failures and timeouts.
    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Failure { .. } | Outcome::TimedOut { .. })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CycleSummary {
    pub cycle_id: Uuid,
    pub started_at: DateTime<Utc>,
    #[serde(with = "duration_ms", rename = "duration_ms")]
    pub duration: Duration,
    pub outcomes: BTreeMap<String, Outcome>,
}

impl CycleSummary {
    pub fn succeeded(&self) -> usize {
        self.outcomes.values().filter(|o| o.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.values().filter(|o| o.is_failure()).count()
    }

    pub fn skipped(&self) -> usize {
        self.outcomes
            .values()
            .filter(|o| matches!(o, Outcome::Skipped { .. }))
            .count()
    }
}

// ── Scheduler ───────────────────────────────────────────────────────

struct Slot {
    collector: Arc<dyn Collector>,
    in_flight: Arc<Mutex<()>>,
}

pub struct Scheduler {
    config: SchedulerConfig,
    slots: Vec<Slot>,
    status: Arc<StatusRegistry>,
    state: StdMutex<SchedulerState>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig, status: Arc<StatusRegistry>) -> Result<Self, SchedulerError> {
        config.validate()?;
        Ok(Self {
            config,
            slots: Vec::new(),
            status,
            state: StdMutex::new(SchedulerState::Idle),
        })
    }

    pub fn add(&mut self, collector: Arc<dyn Collector>) -> Result<(), SchedulerError> {
        let name = collector.name().to_string();
        if self.slots.iter().any(|s| s.collector.name() == name) {
            return Err(SchedulerError::DuplicateCollector(name));
        }
        self.status.register(&name, collector.current_watermark());
        self.slots.push(Slot {
            collector,
            in_flight: Arc::new(Mutex::new(())),
        });
        Ok(())
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn collector_names(&self) -> Vec<String> {
        self.slots.iter().map(|s| s.collector.name().to_string()).collect()
    }

    pub fn state(&self) -> SchedulerState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn transition(&self, next: SchedulerState) -> Result<(), SchedulerError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if *state == SchedulerState::Stopped {
            return Err(SchedulerError::Stopped);
        }
        *state = next;
        Ok(())
    }

    /// Enter the terminal state. Subsequent cycles are refused.
    pub fn stop(&self) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = SchedulerState::Stopped;
    }

    /// Run every collector once, concurrently, and wait for all of them.
    pub async fn run_cycle(&self) -> Result<CycleSummary, SchedulerError> {
        self.transition(SchedulerState::CycleRunning)?;

        let cycle_id = Uuid::now_v7();
        let started_at = Utc::now();
        let started = tokio::time::Instant::now();
        let deadline = self.config.deadline;

        let mut outcomes = BTreeMap::new();
        let mut tasks = JoinSet::new();

        for slot in &self.slots {
            let name = slot.collector.name().to_string();
            let guard = match Arc::clone(&slot.in_flight).try_lock_owned() {
                Ok(guard) => guard,
                Err(_) => {
                    warn!(%cycle_id, collector = %name, "Previous run still in flight, skipping");
                    outcomes.insert(
                        name,
                        Outcome::Skipped {
                            reason: "previous run still in flight".to_string(),
                        },
                    );
                    continue;
                }
            };
            let collector = Arc::clone(&slot.collector);
            tasks.spawn(async move {
                let _guard = guard;
                let outcome = match tokio::time::timeout(deadline, collector.run()).await {
                    Ok(Ok(report)) => Outcome::Success(report),
                    Ok(Err(err)) => Outcome::Failure {
                        kind: err.kind(),
                        message: err.to_string(),
                    },
                    Err(_) => Outcome::TimedOut { deadline },
                };
                (name, outcome)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((name, outcome)) => {
                    outcomes.insert(name, outcome);
                }
                Err(e) => error!(%cycle_id, error = %e, "Collector task aborted"),
            }
        }
        for slot in &self.slots {
            outcomes
                .entry(slot.collector.name().to_string())
                .or_insert_with(|| Outcome::Failure {
                    kind: FailureKind::Internal,
                    message: "collector task panicked".to_string(),
                });
        }

        let finished_at = Utc::now();
        for (name, outcome) in &outcomes {
            match outcome {
                Outcome::Success(report) => self.status.record_success(name, report, finished_at),
                Outcome::Failure { message, .. } => {
                    warn!(%cycle_id, collector = %name, error = %message, "Collector failed");
                    self.status.record_failure(name, message, finished_at);
                }
                Outcome::TimedOut { deadline } => {
                    warn!(%cycle_id, collector = %name, deadline_ms = deadline.as_millis() as u64, "Collector exceeded deadline");
                    self.status
                        .record_failure(name, &format!("deadline of {:?} exceeded", deadline), finished_at);
                }
                Outcome::Skipped { .. } => self.status.record_skipped(name, finished_at),
            }
        }
        self.status.record_cycle();

        let summary = CycleSummary {
            cycle_id,
            started_at,
            duration: started.elapsed(),
            outcomes,
        };
        info!(
            %cycle_id,
            collectors = summary.outcomes.len(),
            succeeded = summary.succeeded(),
            failed = summary.failed(),
            skipped = summary.skipped(),
            duration_ms = summary.duration.as_millis() as u64,
            "Cycle complete"
        );

        // A concurrent `stop` wins over returning to Idle.
        let _ = self.transition(SchedulerState::Idle);
        Ok(summary)
    }

    /// Tick on the configured interval until `shutdown` fires, then stop.
    /// A cycle in progress when the signal arrives is cancelled. Returns the
    /// number of completed cycles.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> u64 {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut cycles = 0;

        info!(
            collectors = self.slots.len(),
            interval_ms = self.config.interval.as_millis() as u64,
            deadline_ms = self.config.deadline.as_millis() as u64,
            "Scheduler started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => break,
            }
            tokio::select! {
                result = self.run_cycle() => match result {
                    Ok(_) => cycles += 1,
                    Err(SchedulerError::Stopped) => break,
                    Err(e) => error!(error = %e, "Cycle failed to start"),
                },
                _ = shutdown.changed() => {
                    info!("Shutdown during cycle, cancelling in-flight collectors");
                    break;
                }
            }
        }

        self.stop();
        info!(cycles, "Scheduler stopped");
        cycles
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::CollectorError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Fake {
        name: &'static str,
        delay: Duration,
        calls: AtomicU32,
    }

    impl Fake {
        fn new(name: &'static str, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                name,
                delay,
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl Collector for Fake {
        fn name(&self) -> &str {
            self.name
        }

        async fn run(&self) -> Result<RunReport, CollectorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(RunReport {
                batch: None,
                fetch_attempts: 1,
                rows_parsed: 0,
                rows_skipped: 0,
                rows_deduplicated: 0,
                rows_already_present: 0,
                rows_appended: 0,
                watermark_before: None,
                watermark_after: None,
            })
        }
    }

    fn config(interval: u64, deadline: u64) -> SchedulerConfig {
        SchedulerConfig {
            interval: Duration::from_secs(interval),
            deadline: Duration::from_secs(deadline),
        }
    }

    #[test]
    fn test_deadline_longer_than_interval_rejected() {
        let err = Scheduler::new(config(60, 120), Arc::new(StatusRegistry::new()))
            .err()
            .unwrap();
        assert!(matches!(err, SchedulerError::InvalidConfig(_)));
    }

    #[test]
    fn test_duplicate_collector_rejected() {
        let mut s = Scheduler::new(config(60, 30), Arc::new(StatusRegistry::new())).unwrap();
        s.add(Fake::new("a", Duration::ZERO)).unwrap();
        assert_eq!(
            s.add(Fake::new("a", Duration::ZERO)),
            Err(SchedulerError::DuplicateCollector("a".to_string()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_cycle_skips_in_flight_collector() {
        let slow = Fake::new("slow", Duration::from_secs(20));
        let mut s = Scheduler::new(config(60, 30), Arc::new(StatusRegistry::new())).unwrap();
        s.add(slow.clone()).unwrap();
        let s = Arc::new(s);

        let first = {
            let s = Arc::clone(&s);
            tokio::spawn(async move { s.run_cycle().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        let second = s.run_cycle().await.unwrap();
        assert!(matches!(second.outcomes["slow"], Outcome::Skipped { .. }));

        let first = first.await.unwrap().unwrap();
        assert!(first.outcomes["slow"].is_success());
        assert_eq!(slow.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_shutdown() {
        let fast = Fake::new("fast", Duration::from_millis(5));
        let mut s = Scheduler::new(config(60, 30), Arc::new(StatusRegistry::new())).unwrap();
        s.add(fast.clone()).unwrap();
        let s = Arc::new(s);

        let (tx, rx) = watch::channel(false);
        let handle = {
            let s = Arc::clone(&s);
            tokio::spawn(async move { s.run(rx).await })
        };

        // First tick fires immediately; the second one after 60s.
        tokio::time::sleep(Duration::from_secs(90)).await;
        tx.send(true).unwrap();
        let cycles = handle.await.unwrap();

        assert_eq!(cycles, 2);
        assert_eq!(fast.calls.load(Ordering::SeqCst), 2);
        assert_eq!(s.state(), SchedulerState::Stopped);
        assert_eq!(s.run_cycle().await.err(), Some(SchedulerError::Stopped));
    }
}
