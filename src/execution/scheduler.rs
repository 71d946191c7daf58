use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::Result;

/// Receiving side of a loop's stop signal
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    pub fn new(rx: watch::Receiver<bool>) -> Self {
        Self { rx }
    }

    /// A signal that never fires, for one-off cycles
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Sleep for `duration` unless shutdown arrives first.
    ///
    /// Returns true when the loop should stop.
    pub async fn sleep(&mut self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_triggered() {
                return true;
            }
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => return false,
                changed = self.rx.changed() => {
                    if changed.is_err() {
                        // Sender gone: nobody can stop us any more
                        tokio::time::sleep_until(deadline).await;
                        return self.is_triggered();
                    }
                }
            }
        }
    }
}

/// A periodic job driven by [`spawn_loop`]
#[async_trait]
pub trait PollingLoop: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// Target period between cycle starts
    fn interval(&self) -> Duration;

    /// Pause after a failed cycle
    fn error_backoff(&self) -> Duration;

    async fn tick(&self, shutdown: &mut Shutdown) -> Result<()>;
}

/// Handle to a running loop
pub struct LoopHandle {
    name: &'static str,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl LoopHandle {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Signal shutdown and wait for the current cycle to wind down
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "{} loop ended abnormally", self.name);
        }
    }
}

/// Run `job` until its handle is stopped.
///
/// After a successful cycle the loop sleeps `interval - elapsed` (never
/// negative); after a failed one it sleeps the error backoff. A failed
/// cycle is logged and never ends the loop.
pub fn spawn_loop<L: PollingLoop>(job: Arc<L>) -> LoopHandle {
    let (tx, rx) = watch::channel(false);
    let name = job.name();

    let task = tokio::spawn(async move {
        let mut shutdown = Shutdown::new(rx);
        tracing::info!("▶️  {} loop started (every {:?})", name, job.interval());

        loop {
            if shutdown.is_triggered() {
                break;
            }

            let started = Instant::now();
            let pause = match job.tick(&mut shutdown).await {
                Ok(()) => job.interval().saturating_sub(started.elapsed()),
                Err(e) => {
                    tracing::error!(error = %e, "❌ {} cycle failed", name);
                    job.error_backoff()
                }
            };

            if shutdown.sleep(pause).await {
                break;
            }
        }

        tracing::info!("⏹️  {} loop stopped", name);
    });

    LoopHandle {
        name,
        shutdown: tx,
        task,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TradingError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counter {
        ticks: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl PollingLoop for Counter {
        fn name(&self) -> &'static str {
            "counter"
        }

        fn interval(&self) -> Duration {
            Duration::from_millis(10)
        }

        fn error_backoff(&self) -> Duration {
            Duration::from_millis(10)
        }

        async fn tick(&self, _shutdown: &mut Shutdown) -> Result<()> {
            self.ticks.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(TradingError::Gateway("boom".to_string()));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_loop_runs_until_stopped() {
        let job = Arc::new(Counter {
            ticks: AtomicUsize::new(0),
            fail: false,
        });
        let handle = spawn_loop(job.clone());

        tokio::time::sleep(Duration::from_millis(60)).await;
        handle.stop().await;

        let ticks = job.ticks.load(Ordering::SeqCst);
        assert!(ticks >= 2, "expected several ticks, got {ticks}");

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(job.ticks.load(Ordering::SeqCst), ticks);
    }

    #[tokio::test]
    async fn test_failed_cycles_do_not_stop_loop() {
        let job = Arc::new(Counter {
            ticks: AtomicUsize::new(0),
            fail: true,
        });
        let handle = spawn_loop(job.clone());

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(!handle.is_finished());
        handle.stop().await;

        assert!(job.ticks.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_sleep() {
        let (tx, rx) = watch::channel(false);
        let mut shutdown = Shutdown::new(rx);

        let sleeper = tokio::spawn(async move { shutdown.sleep(Duration::from_secs(60)).await });
        tx.send(true).unwrap();

        let stopped = tokio::time::timeout(Duration::from_secs(1), sleeper)
            .await
            .unwrap()
            .unwrap();
        assert!(stopped);
    }

    #[tokio::test]
    async fn test_never_sleeps_full_duration() {
        let mut shutdown = Shutdown::never();
        let started = Instant::now();
        assert!(!shutdown.sleep(Duration::from_millis(20)).await);
        assert!(started.elapsed() >= Duration::from_millis(20));
    }
}
