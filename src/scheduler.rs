use std::future::Future;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Duration, Instant, MissedTickBehavior};

/// Milliseconds until the next epoch-aligned boundary of `period`.
fn millis_to_boundary(now_ms: u64, period: Duration) -> u64 {
    let period_ms = period.as_millis() as u64;
    period_ms - now_ms % period_ms
}

/// Instant of the next epoch-aligned `period` boundary, plus a grace delay.
///
/// Exchange candles close on epoch-aligned boundaries, so a loop starting
/// here (with a little grace for the exchange to finalize the candle) always
/// sees the candle that just closed.
pub fn next_boundary(period: Duration, grace: Duration) -> Instant {
    let now_ms = chrono::Utc::now().timestamp_millis() as u64;
    Instant::now() + Duration::from_millis(millis_to_boundary(now_ms, period)) + grace
}

/// Runs the refresh loops on clock-aligned ticks with graceful shutdown.
pub struct Scheduler {
    shutdown: watch::Sender<bool>,
    tasks: Vec<(String, JoinHandle<()>)>,
}

impl Scheduler {
    pub fn new() -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            shutdown,
            tasks: Vec::new(),
        }
    }

    /// Spawn a named loop ticking after each epoch-aligned `period` boundary.
    ///
    /// The first tick waits for the next boundary instead of firing at
    /// spawn, and a tick that overruns its period skips the missed ones. A
    /// shutdown signal stops the loop between ticks; a running tick finishes
    /// first.
    pub fn spawn_aligned<F, Fut>(
        &mut self,
        name: &str,
        period: Duration,
        grace: Duration,
        mut tick: F,
    ) where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let mut shutdown = self.shutdown.subscribe();
        let task_name = name.to_string();

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(next_boundary(period, grace), period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => tick().await,
                    _ = shutdown.changed() => {
                        tracing::info!("{} loop stopped", task_name);
                        break;
                    }
                }
            }
        });

        self.tasks.push((name.to_string(), handle));
    }

    /// Stop every loop and wait for each to finish its current tick.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for (name, handle) in self.tasks {
            if let Err(e) = handle.await {
                tracing::warn!("{} loop did not stop cleanly: {}", name, e);
            }
        }
    }
}
