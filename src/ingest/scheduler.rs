// src/ingest/scheduler.rs
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::orchestrator::{AlreadyRunning, Orchestrator};

/// Spawn the periodic harvest loop. The first run happens one `every` after
/// startup; a tick that lands while a run is in flight is skipped.
pub fn spawn_harvest_scheduler(orch: Arc<Orchestrator>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + every, every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            match orch.run_all(false).await {
                Ok(report) => tracing::info!(
                    target: "scheduler",
                    jobs = report.total_jobs(),
                    failed = report.failed(),
                    "scheduled harvest done"
                ),
                Err(AlreadyRunning) => {
                    tracing::info!(target: "scheduler", "harvest already running, tick skipped")
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delay::Delay;
    use crate::ingest::types::SourceAdapter;
    use crate::testing::{RecordingPacer, StaticAdapter};

    fn orch(adapter: Arc<StaticAdapter>) -> Arc<Orchestrator> {
        Arc::new(Orchestrator::new(
            vec![adapter as Arc<dyn SourceAdapter>],
            Delay::new(Arc::new(RecordingPacer::default())),
            Duration::from_secs(3600),
        ))
    }

    #[tokio::test]
    async fn ticks_run_the_orchestrator() {
        let adapter = Arc::new(StaticAdapter::ok("a", 1));
        let handle = spawn_harvest_scheduler(orch(adapter.clone()), Duration::from_millis(20));

        tokio::time::sleep(Duration::from_millis(150)).await;
        handle.abort();
        assert!(adapter.harvests() >= 2);
    }

    #[tokio::test]
    async fn ticks_during_a_run_are_skipped() {
        let adapter = Arc::new(StaticAdapter::ok("slow", 1).with_gate());
        let gate = adapter.gate_handle();
        let o = orch(adapter.clone());
        let handle = spawn_harvest_scheduler(o.clone(), Duration::from_millis(20));

        tokio::time::sleep(Duration::from_millis(150)).await;
        // Still blocked inside the first run; later ticks did not start another.
        assert_eq!(adapter.harvests(), 1);
        assert!(o.is_running());

        gate.notify_one();
        handle.abort();
    }
}
