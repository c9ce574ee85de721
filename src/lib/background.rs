use std::future::Future;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Runs `tick` every `period` until `shutdown` is cancelled.
///
/// Ticks never overlap and a tick that has started runs to completion;
/// cancellation is only observed between ticks. The first tick fires
/// immediately. A zero `period` is raised to one millisecond.
pub async fn run_periodically<F, Fut>(
    name: &'static str,
    period: Duration,
    shutdown: CancellationToken,
    mut tick: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    let period = period.max(MIN_PERIOD);
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tracing::info!(loop_name = name, period_ms = period.as_millis() as u64, "Starting loop");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::info!(loop_name = name, "Loop stopped");
                break;
            }
            _ = interval.tick() => tick().await,
        }
    }
}
