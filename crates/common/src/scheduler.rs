//! Cron and fixed-interval task scheduling on the tokio runtime.
//!
//! A [`ScheduledTask`] is created stopped; `start` spawns its timer loop and
//! `stop` aborts it. Both are idempotent, so owners can pause and resume a task
//! any number of times.

use chrono::Utc;
use parking_lot::Mutex;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, trace};

use crate::errors::{HostError, HostResult};

pub type TaskFn = Arc<dyn Fn() + Send + Sync>;

#[derive(Clone)]
pub enum Schedule {
    Cron {
        expression: String,
        schedule: Box<cron::Schedule>,
    },
    Interval(Duration),
}

impl Schedule {
    /// Five-field expressions (minute precision) are accepted and run at
    /// second zero; six and seven-field expressions are passed through.
    pub fn cron(expression: &str) -> HostResult<Self> {
        let fields = expression.split_whitespace().count();
        let normalized = match fields {
            5 => format!("0 {}", expression.trim()),
            6 | 7 => expression.trim().to_string(),
            _ => {
                return Err(crate::host_error!(
                    InvalidSchedule,
                    "expected 5 to 7 cron fields, got {fields}: {expression}"
                ))
            }
        };
        let schedule = cron::Schedule::from_str(&normalized)
            .map_err(|e| crate::host_error!(InvalidSchedule, "{expression}: {e}"))?;
        Ok(Schedule::Cron {
            expression: expression.to_string(),
            schedule: Box::new(schedule),
        })
    }

    pub fn every_millis(millis: u64) -> HostResult<Self> {
        if millis == 0 {
            return Err(crate::host_error!(InvalidSchedule, "interval must be greater than zero"));
        }
        Ok(Schedule::Interval(Duration::from_millis(millis)))
    }

    fn next_delay(&self) -> Option<Duration> {
        match self {
            Schedule::Cron { schedule, .. } => {
                let next = schedule.upcoming(Utc).next()?;
                (next - Utc::now()).to_std().ok().or(Some(Duration::ZERO))
            }
            Schedule::Interval(period) => Some(*period),
        }
    }
}

impl fmt::Debug for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Schedule::Cron { expression, .. } => write!(f, "Cron({expression})"),
            Schedule::Interval(period) => write!(f, "Interval({}ms)", period.as_millis()),
        }
    }
}

impl FromStr for Schedule {
    type Err = HostError;

    /// A bare integer is an interval in milliseconds, anything else a cron expression.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().parse::<u64>() {
            Ok(millis) => Schedule::every_millis(millis),
            Err(_) => Schedule::cron(s),
        }
    }
}

pub struct ScheduledTask {
    label: String,
    schedule: Schedule,
    task: TaskFn,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ScheduledTask {
    pub fn new(label: impl Into<String>, schedule: Schedule, task: TaskFn) -> Self {
        Self {
            label: label.into(),
            schedule,
            task,
            handle: Mutex::new(None),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .lock()
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        let mut handle = self.handle.lock();
        if handle.as_ref().map(|h| !h.is_finished()).unwrap_or(false) {
            return;
        }
        debug!(task = %self.label, schedule = ?self.schedule, "starting scheduled task");
        let schedule = self.schedule.clone();
        let task = Arc::clone(&self.task);
        let label = self.label.clone();
        *handle = Some(tokio::spawn(run_schedule(label, schedule, task)));
    }

    pub fn stop(&self) {
        if let Some(handle) = self.handle.lock().take() {
            debug!(task = %self.label, "stopping scheduled task");
            handle.abort();
        }
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.get_mut().take() {
            handle.abort();
        }
    }
}

impl fmt::Debug for ScheduledTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduledTask")
            .field("label", &self.label)
            .field("schedule", &self.schedule)
            .field("running", &self.is_running())
            .finish()
    }
}

async fn run_schedule(label: String, schedule: Schedule, task: TaskFn) {
    match schedule {
        Schedule::Interval(period) => {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                trace!(task = %label, "tick");
                task();
            }
        }
        cron @ Schedule::Cron { .. } => {
            while let Some(delay) = cron.next_delay() {
                tokio::time::sleep(delay).await;
                trace!(task = %label, "cron fire");
                task();
            }
            debug!(task = %label, "cron schedule exhausted");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_task(counter: &Arc<AtomicUsize>) -> TaskFn {
        let c = Arc::clone(counter);
        Arc::new(move || {
            c.fetch_add(1, Ordering::Relaxed);
        })
    }

    #[tokio::test]
    async fn interval_task_runs_and_stops() {
        let counter = Arc::new(AtomicUsize::new(0));
        let task = ScheduledTask::new(
            "test.job",
            Schedule::every_millis(20).unwrap(),
            counting_task(&counter),
        );
        task.start();
        assert!(task.is_running());

        tokio::time::sleep(Duration::from_millis(75)).await;
        task.stop();
        let n = counter.load(Ordering::Relaxed);
        assert!(n >= 2, "expected at least 2 ticks, got {}", n);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(counter.load(Ordering::Relaxed), n);
        assert!(!task.is_running());
    }

    #[tokio::test]
    async fn start_is_idempotent() {
        let counter = Arc::new(AtomicUsize::new(0));
        let task = ScheduledTask::new(
            "idempotent",
            Schedule::every_millis(1000).unwrap(),
            counting_task(&counter),
        );
        task.start();
        task.start();
        task.stop();
        task.stop();
        assert!(!task.is_running());
    }

    #[test]
    fn parses_cron_and_intervals() {
        assert!(matches!(Schedule::cron("*/5 * * * *"), Ok(Schedule::Cron { .. })));
        assert!(matches!(Schedule::cron("0 0 * * * *"), Ok(Schedule::Cron { .. })));
        assert!(Schedule::cron("not a cron").is_err());
        assert!(Schedule::cron("* *").is_err());
        assert!(matches!(
            "1500".parse::<Schedule>(),
            Ok(Schedule::Interval(d)) if d == Duration::from_millis(1500)
        ));
        assert!("0".parse::<Schedule>().is_err());
    }
}
