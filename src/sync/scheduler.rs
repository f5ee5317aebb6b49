//! Continuous sync loop on a fixed interval or a cron schedule.

use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::runner::SyncRunner;
use crate::error::{Error, SyncError};

/// Granularity at which a sleeping loop notices the stop flag.
const STOP_POLL: Duration = Duration::from_secs(1);

/// When the loop fires.
#[derive(Debug, Clone)]
pub enum Schedule {
    Interval(Duration),
    Cron(Box<cron::Schedule>),
}

impl Schedule {
    /// Cron schedule when `cron` is set, otherwise a fixed interval.
    pub fn from_parts(interval: Duration, cron: Option<&str>) -> Result<Self, SyncError> {
        match cron {
            Some(expr) => cron::Schedule::from_str(expr)
                .map(|s| Schedule::Cron(Box::new(s)))
                .map_err(|e| SyncError::InvalidSchedule {
                    expr: expr.to_string(),
                    reason: e.to_string(),
                }),
            None => Ok(Schedule::Interval(interval)),
        }
    }

    /// Delay from `now` until the next run.
    pub fn next_delay(&self, now: DateTime<Utc>) -> Option<Duration> {
        match self {
            Schedule::Interval(every) => Some(*every),
            Schedule::Cron(schedule) => schedule
                .after(&now)
                .next()
                .map(|at| (at - now).to_std().unwrap_or(Duration::ZERO)),
        }
    }
}

/// Spawn a background task that runs a sync on every tick of `schedule`.
///
/// The first run starts immediately. Returns a `JoinHandle` and a stop flag;
/// once the flag is set the loop exits after the run in progress.
pub fn spawn_sync_loop(
    runner: Arc<SyncRunner>,
    schedule: Schedule,
) -> (JoinHandle<()>, Arc<AtomicBool>) {
    let stop = Arc::new(AtomicBool::new(false));
    let stop_flag = Arc::clone(&stop);

    let handle = tokio::spawn(async move {
        info!(?schedule, "Sync loop started");

        loop {
            if stop.load(Ordering::Relaxed) {
                break;
            }

            match runner.run_once().await {
                Ok(_) => {}
                Err(Error::Sync(SyncError::AlreadyRunning)) => {
                    debug!("Previous run still in progress, skipping tick");
                }
                Err(e) => error!(error = %e, "Sync run failed"),
            }

            let Some(delay) = schedule.next_delay(Utc::now()) else {
                info!("Schedule has no further occurrences");
                break;
            };
            debug!(delay_secs = delay.as_secs(), "Next sync scheduled");
            if !sleep_unless_stopped(delay, &stop).await {
                break;
            }
        }

        info!("Sync loop shutting down");
    });

    (handle, stop_flag)
}

/// Drive a one-shot `run` until it completes or `shutdown` resolves.
///
/// Returns `None` when `shutdown` wins. The run is dropped at its current
/// await point, which releases the runner's guard.
pub async fn run_until_shutdown<F, S>(run: F, shutdown: S) -> Option<F::Output>
where
    F: Future,
    S: Future<Output = ()>,
{
    tokio::select! {
        output = run => Some(output),
        () = shutdown => None,
    }
}

/// Sleep for `total`, waking early if `stop` is set. Returns `false` when stopped.
async fn sleep_unless_stopped(total: Duration, stop: &AtomicBool) -> bool {
    let mut remaining = total;
    while !remaining.is_zero() {
        if stop.load(Ordering::Relaxed) {
            return false;
        }
        let step = remaining.min(STOP_POLL);
        tokio::time::sleep(step).await;
        remaining -= step;
    }
    !stop.load(Ordering::Relaxed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn interval_is_default() {
        let schedule = Schedule::from_parts(Duration::from_secs(300), None).unwrap();
        assert_eq!(
            schedule.next_delay(Utc::now()),
            Some(Duration::from_secs(300))
        );
    }

    #[test]
    fn cron_delay_targets_next_occurrence() {
        let schedule = Schedule::from_parts(Duration::from_secs(300), Some("0 */5 * * * *")).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 3, 30).unwrap();
        assert_eq!(schedule.next_delay(now), Some(Duration::from_secs(90)));
    }

    #[test]
    fn invalid_cron_is_rejected() {
        let err = Schedule::from_parts(Duration::from_secs(1), Some("every tuesday")).unwrap_err();
        assert!(matches!(err, SyncError::InvalidSchedule { expr, .. } if expr == "every tuesday"));
    }

    #[tokio::test]
    async fn stop_flag_cuts_sleep_short() {
        let stop = AtomicBool::new(true);
        assert!(!sleep_unless_stopped(Duration::from_secs(3600), &stop).await);
    }

    #[tokio::test]
    async fn shutdown_interrupts_a_stuck_run() {
        let result = run_until_shutdown(std::future::pending::<u32>(), async {}).await;
        assert_eq!(result, None);
    }

    #[tokio::test]
    async fn finished_run_is_returned() {
        let result = run_until_shutdown(async { 7 }, std::future::pending()).await;
        assert_eq!(result, Some(7));
    }

    #[tokio::test]
    async fn zero_sleep_reports_running() {
        let stop = AtomicBool::new(false);
        assert!(sleep_unless_stopped(Duration::ZERO, &stop).await);
    }
}
