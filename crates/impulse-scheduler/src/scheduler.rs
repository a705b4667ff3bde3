//! Background loop running engine cycles on a fixed tick.
//!
//! One loop per engine. Stopping is cooperative: a cycle in flight always
//! completes, the loop exits at the next sleep or before the next cycle.

use std::sync::{Arc, Mutex};

use impulse_core::{ImpulseError, Result};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::engine::{Engine, LoopState};

struct Worker {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

pub struct Scheduler {
    engine: Arc<Engine>,
    worker: Mutex<Option<Worker>>,
}

impl Scheduler {
    /// Wrap an engine. Nothing runs until [`start`](Self::start).
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            worker: Mutex::new(None),
        }
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    /// Spawn the loop on the current tokio runtime.
    pub fn start(&self) -> Result<()> {
        let runtime = Handle::try_current()
            .map_err(|e| ImpulseError::Other(format!("no tokio runtime: {e}")))?;
        let mut worker = self
            .worker
            .lock()
            .map_err(|_| ImpulseError::Other("scheduler lock poisoned".into()))?;
        if worker.is_some() || !self.engine.claim_loop() {
            return Err(ImpulseError::AlreadyRunning);
        }

        let (shutdown, rx) = watch::channel(false);
        let engine = self.engine.clone();
        let handle = runtime.spawn(run_loop(engine, rx));
        *worker = Some(Worker { shutdown, handle });
        tracing::info!(
            "⏰ Scheduler started (tick {}s, backoff {}s)",
            self.engine.tick().as_secs(),
            self.engine.error_backoff().as_secs()
        );
        Ok(())
    }

    /// Signal shutdown and wait for the loop to exit.
    pub async fn stop(&self) -> Result<()> {
        let worker = self
            .worker
            .lock()
            .map_err(|_| ImpulseError::Other("scheduler lock poisoned".into()))?
            .take()
            .ok_or(ImpulseError::NotRunning)?;

        worker.shutdown.send(true).ok();
        if let Err(e) = worker.handle.await {
            tracing::error!("❌ Scheduler loop ended abnormally: {}", e);
            self.engine.release_loop();
            self.engine.set_state(LoopState::Idle);
        }
        tracing::info!("🛑 Scheduler stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.worker.lock().map(|w| w.is_some()).unwrap_or(false)
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if let Ok(mut worker) = self.worker.lock() {
            if let Some(worker) = worker.take() {
                worker.shutdown.send(true).ok();
            }
        }
    }
}

async fn run_loop(engine: Arc<Engine>, mut shutdown: watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow() {
            break;
        }

        let pause = match engine.run_loop_cycle().await {
            Ok(result) => {
                if !result.is_idle() {
                    tracing::info!(
                        "🔄 Cycle #{} done: {} triggers, {} opportunities, {:.2} distributed",
                        result.sequence,
                        result.triggers_fired,
                        result.opportunities_acted,
                        result.distributed
                    );
                }
                engine.tick()
            }
            Err(e) => {
                tracing::error!(
                    "❌ Cycle failed: {}, retrying in {}s",
                    e,
                    engine.error_backoff().as_secs()
                );
                engine.error_backoff()
            }
        };

        if *shutdown.borrow() {
            break;
        }
        engine.set_state(LoopState::Sleeping);
        tokio::select! {
            _ = tokio::time::sleep(pause) => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    engine.set_state(LoopState::Idle);
    engine.release_loop();
    tracing::debug!("⏹️ Scheduler loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::{TimeZone, Utc};
    use impulse_core::config::ImpulseConfig;
    use impulse_core::{Capability, FnCapability, Invocation, Outcome};
    use std::time::Duration;

    fn engine_with(capability: Arc<dyn Capability>) -> Arc<Engine> {
        let mut config = ImpulseConfig::parse(
            r#"
            [scheduler]
            tick_secs = 60

            [[triggers]]
            name = "pulse"
            interval_secs = 0
            "#,
        )
        .unwrap();
        config.scheduler.seed = Some(5);
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 3, 4, 0, 0, 0).unwrap(),
        ));
        Arc::new(
            Engine::builder(config)
                .capability("pulse", capability)
                .clock(clock)
                .build()
                .unwrap(),
        )
    }

    fn instant() -> Arc<dyn Capability> {
        Arc::new(FnCapability::new("instant", |_inv: Invocation| async {
            Ok(Outcome::success(1.0, 1))
        }))
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_runs_cycles_until_stopped() {
        let scheduler = Scheduler::new(engine_with(instant()));
        scheduler.start().unwrap();
        assert!(scheduler.is_running());

        tokio::time::sleep(Duration::from_secs(150)).await;
        scheduler.stop().await.unwrap();

        let cycles = scheduler.engine().metrics().await.cycles;
        assert!(cycles >= 2, "expected at least two cycles, got {cycles}");
        assert!(!scheduler.is_running());
        assert!(!scheduler.engine().is_loop_running());
        assert_eq!(scheduler.engine().state(), LoopState::Idle);

        // no cycles after stop
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(scheduler.engine().metrics().await.cycles, cycles);
    }

    #[tokio::test(start_paused = true)]
    async fn test_double_start_rejected() {
        let engine = engine_with(instant());
        let scheduler = Scheduler::new(engine.clone());
        scheduler.start().unwrap();
        assert!(matches!(scheduler.start(), Err(ImpulseError::AlreadyRunning)));

        let second = Scheduler::new(engine);
        assert!(matches!(second.start(), Err(ImpulseError::AlreadyRunning)));

        scheduler.stop().await.unwrap();
        second.start().unwrap();
        second.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_when_not_running() {
        let scheduler = Scheduler::new(engine_with(instant()));
        assert!(matches!(scheduler.stop().await, Err(ImpulseError::NotRunning)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_lets_cycle_finish() {
        let slow: Arc<dyn Capability> = Arc::new(FnCapability::new("slow", |_inv: Invocation| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Outcome::success(1.0, 1))
        }));
        let scheduler = Scheduler::new(engine_with(slow));
        let mut state = scheduler.engine().subscribe_state();
        scheduler.start().unwrap();

        state
            .wait_for(|s| *s == LoopState::Evaluating)
            .await
            .unwrap();
        scheduler.stop().await.unwrap();

        let metrics = scheduler.engine().metrics().await;
        assert_eq!(metrics.cycles, 1);
        assert_eq!(metrics.trigger_failures, 0);
    }

    #[test]
    fn test_start_requires_runtime() {
        let scheduler = Scheduler::new(engine_with(instant()));
        assert!(scheduler.start().is_err());
        assert!(!scheduler.engine().is_loop_running());
    }
}
