//! Periodic pipeline runs.

use std::fmt::Debug;
use std::future::Future;
use std::time::Duration;

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use log::{error, info};
use tokio::time::{interval, MissedTickBehavior};

/// Convert a run interval given in hours.
pub fn interval_from_hours(hours: f64) -> Result<Duration> {
    if !hours.is_finite() || hours <= 0.0 {
        bail!("Schedule interval must be a positive number of hours, got {}", hours);
    }
    match Duration::try_from_secs_f64(hours * 3600.0) {
        Ok(every) => Ok(every),
        Err(e) => bail!("Schedule interval of {} hours is out of range: {}", hours, e),
    }
}

/// Runs a job at a fixed interval and remembers how it went.
///
/// A failed run is logged and does not stop the schedule.
#[derive(Debug)]
pub struct Scheduler {
    every: Duration,
    last_run: Option<DateTime<Utc>>,
    runs: u64,
    failures: u64,
}

impl Scheduler {
    pub fn new(every: Duration) -> Self {
        Self {
            every,
            last_run: None,
            runs: 0,
            failures: 0,
        }
    }

    pub fn every(&self) -> Duration {
        self.every
    }

    /// Completion time of the last successful run.
    pub fn last_run(&self) -> Option<DateTime<Utc>> {
        self.last_run
    }

    pub fn runs(&self) -> u64 {
        self.runs
    }

    pub fn failures(&self) -> u64 {
        self.failures
    }

    /// Run the job once and record the outcome.
    pub async fn run_once<F, Fut, T>(&mut self, job: F) -> bool
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
        T: Debug,
    {
        self.runs += 1;
        info!("Scheduled run #{} starting", self.runs);
        match job().await {
            Ok(summary) => {
                self.last_run = Some(Utc::now());
                info!("Scheduled run #{} complete: {:?}", self.runs, summary);
                true
            }
            Err(e) => {
                self.failures += 1;
                error!("Scheduled run #{} failed: {:#}", self.runs, e);
                false
            }
        }
    }

    /// Run the job now and then every interval, forever.
    pub async fn run_forever<F, Fut, T>(&mut self, mut job: F)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
        T: Debug,
    {
        info!("Scheduler started: one run every {:?}", self.every);
        let mut ticker = interval(self.every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.run_once(&mut job).await;
        }
    }
}
