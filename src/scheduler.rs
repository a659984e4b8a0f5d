use crate::analysis;
use crate::storage_utils::{AppConfig, AsyncStorageManager};
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::{error, info};

/// First wall-clock boundary (a multiple of `interval_minutes` past the hour)
/// strictly after `now`, with seconds truncated.
pub fn next_boundary(now: DateTime<Utc>, interval_minutes: u32) -> DateTime<Utc> {
    let interval = i64::from(interval_minutes.max(1)) * 60;
    let next = (now.timestamp().div_euclid(interval) + 1) * interval;
    DateTime::from_timestamp(next, 0).unwrap_or(now)
}

/// Runs the pipeline now and then on every boundary until Ctrl-C.
/// A failed run is retried after `retry_delay_secs`.
pub async fn run_scheduled(config: &AppConfig, storage: &AsyncStorageManager) -> Result<()> {
    info!(
        "Starting scheduled crypto momentum analysis (every {} minutes)",
        config.schedule.interval_minutes
    );

    loop {
        let delay = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Analysis stopped by user");
                return Ok(());
            }
            result = analysis::run_analysis_pipeline(config, storage) => match result {
                Ok(_) => {
                    let now = Utc::now();
                    let next = next_boundary(now, config.schedule.interval_minutes);
                    let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
                    info!(
                        "Next analysis at {} (sleeping for {} seconds)",
                        next.format("%H:%M:%S"),
                        wait.as_secs()
                    );
                    wait
                }
                Err(e) => {
                    error!("Error in scheduler: {:#}", e);
                    Duration::from_secs(config.schedule.retry_delay_secs)
                }
            }
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Analysis stopped by user");
                return Ok(());
            }
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, h, m, s).unwrap()
    }

    #[test]
    fn next_quarter_hour() {
        assert_eq!(next_boundary(at(10, 7, 42), 15), at(10, 15, 0));
        assert_eq!(next_boundary(at(10, 15, 0), 15), at(10, 30, 0));
        assert_eq!(next_boundary(at(10, 59, 59), 15), at(11, 0, 0));
    }

    #[test]
    fn boundary_rolls_over_midnight() {
        assert_eq!(
            next_boundary(at(23, 50, 0), 15),
            Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn other_intervals() {
        assert_eq!(next_boundary(at(10, 7, 0), 5), at(10, 10, 0));
        assert_eq!(next_boundary(at(10, 7, 0), 60), at(11, 0, 0));
    }
}
