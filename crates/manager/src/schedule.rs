use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Days, Utc};
use hms_backup_storage::{BackupRunOutcome, Scheduler};
use tokio::time::sleep;
use tracing::{error, info};

use crate::cli::BackupLabel;

/// Time from `now` until the next `hour:00:00` UTC, never less than a second.
pub fn delay_until_next_run(now: DateTime<Utc>, hour: u32) -> Duration {
    let today = now.date_naive().and_hms_opt(hour, 0, 0).map(|t| t.and_utc());
    let next = match today {
        Some(at) if at > now => Some(at),
        Some(at) => at.checked_add_days(Days::new(1)),
        None => None,
    };
    next.and_then(|at| (at - now).to_std().ok())
        .unwrap_or(Duration::from_secs(3600))
        .max(Duration::from_secs(1))
}

/// Runs one labelled backup per day at `hour` UTC, forever.
pub async fn scheduler_loop(scheduler: Arc<Scheduler>, hour: u32) {
    loop {
        let wait = delay_until_next_run(Utc::now(), hour);
        info!(seconds = wait.as_secs(), "next scheduled backup");
        sleep(wait).await;

        let label = BackupLabel::for_date(Utc::now().date_naive());
        match scheduler.run_scheduled_backup(label.as_str()).await {
            BackupRunOutcome::Succeeded { snapshot, pruned } => info!(
                %label,
                snapshot = %snapshot.id,
                pruned = pruned.len(),
                "scheduled backup created"
            ),
            BackupRunOutcome::Failed { error } => {
                error!(%label, error = %error, "scheduled backup failed")
            }
        }
    }
}
