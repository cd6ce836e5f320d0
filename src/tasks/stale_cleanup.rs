//! Stale timer sweep background task

use std::time::Duration;

use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::{error::Result, state::TimerService};

/// Background task that deletes long-idle timers, once at start-up and then
/// every `every`
pub async fn stale_cleanup_task(service: TimerService, retention: Duration, every: Duration) {
    info!(
        "Starting stale timer cleanup task (retention {}d, every {}h)",
        retention.as_secs() / 86_400,
        every.as_secs() / 3_600
    );

    let mut interval = interval(every);

    loop {
        interval.tick().await;

        if let Err(e) = sweep(&service, retention) {
            warn!("Stale timer cleanup failed: {}", e);
        }
    }
}

/// Delete stopped timers untouched for longer than `retention` and drop idle
/// channel slots. Returns how many timers were deleted.
pub fn sweep(service: &TimerService, retention: Duration) -> Result<usize> {
    let deleted = service.engine().store().delete_stale(retention)?;
    let pruned = service.registry().prune_idle();

    if deleted > 0 {
        info!("Deleted {} stale timer(s)", deleted);
    }
    debug!(pruned, "Pruned idle channel slots");
    Ok(deleted)
}
