//! Fixed period job runner.
use std::{fmt, future::Future, time::Duration};

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{error, info};

use crate::{EngineError, ResultEngine};

/// Run a job every `period`, optionally aligning the first run to an hour
/// of the day (UTC).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Schedule {
    period: Duration,
    start_hour: Option<u32>,
}

impl Schedule {
    pub fn new(period: Duration, start_hour: Option<u32>) -> ResultEngine<Self> {
        if period.is_zero() {
            return Err(EngineError::InvalidSchedule(
                "period must be positive".to_string(),
            ));
        }
        if let Some(hour) = start_hour.filter(|hour| *hour >= 24) {
            return Err(EngineError::InvalidSchedule(format!(
                "start hour {hour} is not an hour of the day"
            )));
        }
        Ok(Self { period, start_hour })
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Time to wait from `now` until the first run: zero without a start
    /// hour, else until the next `start_hour:00`.
    pub fn first_delay(&self, now: DateTime<Utc>) -> Duration {
        let Some(hour) = self.start_hour else {
            return Duration::ZERO;
        };
        let Some(today) = now.date_naive().and_hms_opt(hour, 0, 0) else {
            return Duration::ZERO;
        };
        let mut next = today.and_utc();
        if next < now {
            next += TimeDelta::days(1);
        }
        (next - now).to_std().unwrap_or(Duration::ZERO)
    }

    /// Run `job` forever. A run starts only after the previous one finished
    /// and the period elapsed; failures are logged and do not stop the loop.
    pub async fn run<F, Fut, T, E>(&self, mut job: F)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let delay = self.first_delay(Utc::now());
        info!(delay_secs = delay.as_secs(), period_secs = self.period.as_secs(), "job scheduled");
        tokio::time::sleep(delay).await;

        loop {
            if let Err(err) = job().await {
                error!(error = %err, "scheduled job failed");
            }
            tokio::time::sleep(self.period).await;
        }
    }
}
