//! Metrics sampling loop
//!
//! Periodically samples the host until shutdown. The interval can be changed
//! at runtime (slow polling under aggressive reduction) and polling can be
//! halted entirely during a thermal emergency.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

use super::MetricsCollector;

impl MetricsCollector {
    /// Start the sampling loop; returns when `shutdown` fires
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let mut period = self.current_interval();
        info!(
            interval_ms = period.as_millis() as u64,
            memory_limit_bytes = self.memory_limit(),
            "Starting metrics sampling loop"
        );

        let mut ticker = interval_at(Instant::now(), period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if self.is_polling() {
                        let metrics = self.tick().await;

                        // Log roughly once a minute at the default interval
                        if self.samples_taken() % 12 == 0 {
                            debug!(
                                cpu_percent = metrics.cpu.usage,
                                memory_percent = metrics.memory.usage_ratio() * 100.0,
                                temperature = metrics.cpu.temperature,
                                "Sampling cycle complete"
                            );
                        }
                    }

                    let next = self.current_interval();
                    if next != period {
                        period = next;
                        ticker = interval_at(Instant::now() + period, period);
                        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    }
                }
                _ = shutdown.recv() => {
                    info!("Shutting down metrics sampling loop");
                    break;
                }
            }
        }
    }
}
