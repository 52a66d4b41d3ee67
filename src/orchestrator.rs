//! Fans out every adapter, one tokio task each, and aggregates the outcome.
//! A single in-flight guard keeps runs from overlapping.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures::future::{join_all, BoxFuture, FutureExt, Shared};
use metrics::{counter, gauge, histogram};
use serde::Serialize;

use crate::delay::Delay;
use crate::ingest::ensure_metrics_described;
use crate::ingest::types::{SourceAdapter, Status};

pub type StatusMap = BTreeMap<String, Status>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceOutcome {
    pub ok: bool,
    pub jobs: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HarvestReport {
    pub outcomes: BTreeMap<String, SourceOutcome>,
    pub elapsed: Duration,
}

impl HarvestReport {
    pub fn total_jobs(&self) -> usize {
        self.outcomes.values().map(|o| o.jobs).sum()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.values().filter(|o| !o.ok).count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("a harvest is already running")]
pub struct AlreadyRunning;

struct RunGuard {
    flag: Arc<AtomicBool>,
}

impl RunGuard {
    fn try_acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag: flag.clone() })
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

type SharedCheck = Shared<BoxFuture<'static, StatusMap>>;

pub struct Orchestrator {
    adapters: Vec<Arc<dyn SourceAdapter>>,
    delay: Delay,
    stagger_window: Duration,
    running: Arc<AtomicBool>,
    status_check: Mutex<Option<SharedCheck>>,
}

impl Orchestrator {
    pub fn new(adapters: Vec<Arc<dyn SourceAdapter>>, delay: Delay, stagger_window: Duration) -> Self {
        ensure_metrics_described();
        Self {
            adapters,
            delay,
            stagger_window,
            running: Arc::new(AtomicBool::new(false)),
            status_check: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Run every adapter once. With `skip_stagger == false` each adapter
    /// first sleeps a random slice of the stagger window.
    pub async fn run_all(&self, skip_stagger: bool) -> Result<HarvestReport, AlreadyRunning> {
        let guard = RunGuard::try_acquire(&self.running).ok_or(AlreadyRunning)?;
        let report = self.run_guarded(skip_stagger).await;
        drop(guard);
        Ok(report)
    }

    /// Start a run in the background with no stagger. Fails fast if one is
    /// already in flight.
    pub fn try_trigger_now(self: &Arc<Self>) -> Result<(), AlreadyRunning> {
        let guard = RunGuard::try_acquire(&self.running).ok_or(AlreadyRunning)?;
        let this = self.clone();
        tokio::spawn(async move {
            let _guard = guard;
            this.run_guarded(true).await;
        });
        Ok(())
    }

    async fn run_guarded(&self, skip_stagger: bool) -> HarvestReport {
        let started = Instant::now();
        tracing::info!(sources = self.adapters.len(), skip_stagger, "harvest started");

        let tasks = self.adapters.iter().map(|adapter| {
            let adapter = adapter.clone();
            let delay = self.delay.clone();
            let window = self.stagger_window;
            let name = adapter.name().to_string();
            let handle = tokio::spawn(async move {
                if !skip_stagger {
                    let waited = delay.stagger(window).await;
                    tracing::debug!(source = %adapter.name(), waited_ms = waited.as_millis() as u64, "stagger elapsed");
                }
                adapter.harvest().await
            });
            async move { (name, handle.await) }
        });

        let mut outcomes = BTreeMap::new();
        for (name, joined) in join_all(tasks).await {
            let outcome = match joined {
                Ok(Ok(jobs)) => {
                    tracing::info!(source = %name, jobs = jobs.len(), "source finished");
                    SourceOutcome {
                        ok: true,
                        jobs: jobs.len(),
                        error: None,
                    }
                }
                Ok(Err(e)) => {
                    counter!("harvest_adapter_errors_total").increment(1);
                    tracing::error!(source = %name, error = ?e, "source failed");
                    SourceOutcome {
                        ok: false,
                        jobs: 0,
                        error: Some(format!("{e:#}")),
                    }
                }
                Err(join_err) => {
                    counter!("harvest_adapter_errors_total").increment(1);
                    tracing::error!(source = %name, error = %join_err, "source task panicked");
                    SourceOutcome {
                        ok: false,
                        jobs: 0,
                        error: Some(join_err.to_string()),
                    }
                }
            };
            outcomes.insert(name, outcome);
        }

        let report = HarvestReport {
            outcomes,
            elapsed: started.elapsed(),
        };
        counter!("harvest_runs_total").increment(1);
        histogram!("harvest_run_seconds").record(report.elapsed.as_secs_f64());
        gauge!("harvest_last_run_ts").set(chrono::Utc::now().timestamp() as f64);
        tracing::info!(
            jobs = report.total_jobs(),
            failed = report.failed(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "harvest finished"
        );
        report
    }

    /// Status of every source. Concurrent callers share one in-flight check.
    pub async fn check_all(&self) -> StatusMap {
        let fut = {
            let mut slot = self.status_check.lock().unwrap_or_else(|p| p.into_inner());
            match slot.as_ref() {
                Some(existing) => existing.clone(),
                None => {
                    let adapters = self.adapters.clone();
                    let fresh: SharedCheck = async move {
                        let checks = adapters.iter().map(|a| async move {
                            (a.name().to_string(), a.check_status().await)
                        });
                        join_all(checks).await.into_iter().collect::<StatusMap>()
                    }
                    .boxed()
                    .shared();
                    *slot = Some(fresh.clone());
                    fresh
                }
            }
        };

        let result = fut.clone().await;

        let mut slot = self.status_check.lock().unwrap_or_else(|p| p.into_inner());
        if slot.as_ref().is_some_and(|cur| cur.ptr_eq(&fut)) {
            *slot = None;
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingPacer, StaticAdapter};

    fn orch(adapters: Vec<Arc<dyn SourceAdapter>>) -> (Orchestrator, Arc<RecordingPacer>) {
        let pacer = Arc::new(RecordingPacer::default());
        (
            Orchestrator::new(adapters, Delay::new(pacer.clone()), Duration::from_secs(3600)),
            pacer,
        )
    }

    #[tokio::test]
    async fn one_failing_source_does_not_fail_the_run() {
        let ok: Arc<dyn SourceAdapter> = Arc::new(StaticAdapter::ok("a", 3));
        let bad: Arc<dyn SourceAdapter> = Arc::new(StaticAdapter::failing("b"));
        let (o, pacer) = orch(vec![ok, bad]);

        let report = o.run_all(true).await.unwrap();
        assert_eq!(report.outcomes["a"].jobs, 3);
        assert!(report.outcomes["a"].ok);
        assert!(!report.outcomes["b"].ok);
        assert!(report.outcomes["b"].error.is_some());
        assert!(pacer.recorded().is_empty());
        assert!(!o.is_running());
    }

    #[tokio::test]
    async fn stagger_is_within_window() {
        let a: Arc<dyn SourceAdapter> = Arc::new(StaticAdapter::ok("a", 0));
        let b: Arc<dyn SourceAdapter> = Arc::new(StaticAdapter::ok("b", 0));
        let (o, pacer) = orch(vec![a, b]);

        o.run_all(false).await.unwrap();
        let waits = pacer.recorded();
        assert_eq!(waits.len(), 2);
        assert!(waits.iter().all(|d| *d < Duration::from_secs(3600)));
    }

    #[tokio::test]
    async fn overlapping_run_is_refused() {
        let slow = Arc::new(StaticAdapter::ok("slow", 1).with_gate());
        let gate = slow.gate_handle();
        let (o, _) = orch(vec![slow as Arc<dyn SourceAdapter>]);
        let o = Arc::new(o);

        o.try_trigger_now().unwrap();
        assert!(o.is_running());
        assert_eq!(o.try_trigger_now(), Err(AlreadyRunning));
        assert!(matches!(o.run_all(true).await, Err(AlreadyRunning)));

        gate.notify_one();
        while o.is_running() {
            tokio::task::yield_now().await;
        }
        assert!(o.run_all(true).await.is_ok());
    }

    #[tokio::test]
    async fn concurrent_status_checks_share_one_probe() {
        let a = Arc::new(StaticAdapter::ok("a", 0));
        let (o, _) = orch(vec![a.clone() as Arc<dyn SourceAdapter>]);

        let (s1, s2) = tokio::join!(o.check_all(), o.check_all());
        assert_eq!(s1, s2);
        assert_eq!(s1["a"], Status::Success);
        assert_eq!(a.status_checks(), 1);

        o.check_all().await;
        assert_eq!(a.status_checks(), 2);
    }
}
