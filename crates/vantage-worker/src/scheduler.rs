//! Recurring maintenance triggers. Each trigger only submits a task; the
//! lane workers do the work.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, TimeZone, Timelike, Utc, Weekday};
use chrono_tz::Tz;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use vantage_core::models::{RefreshAllDataPayload, Task, TaskType};
use vantage_core::SchedulerConfig;

use crate::queue::TaskQueue;

/// Wall-clock schedule evaluated in the scheduler's timezone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    DailyAt { hour: u32, minute: u32 },
    Hourly { minute: u32 },
    /// Minutes past the hour divisible by the step, e.g. :00, :15, :30, :45.
    EveryMinutes(u32),
    WeeklyAt { weekday: Weekday, hour: u32, minute: u32 },
}

/// Local wall time to UTC. Times skipped by a DST jump move forward an hour.
fn resolve(tz: Tz, local: NaiveDateTime) -> DateTime<Utc> {
    tz.from_local_datetime(&local)
        .earliest()
        .or_else(|| tz.from_local_datetime(&(local + Duration::hours(1))).earliest())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| Utc.from_utc_datetime(&local))
}

fn at(date: NaiveDate, hour: u32, minute: u32) -> Option<NaiveDateTime> {
    date.and_hms_opt(hour, minute, 0)
}

impl Schedule {
    /// First fire time strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>, tz: Tz) -> DateTime<Utc> {
        let local = after.with_timezone(&tz).naive_local();
        let today = local.date();

        match *self {
            Schedule::DailyAt { hour, minute } => (0..=2)
                .filter_map(|offset| at(today + Duration::days(offset), hour, minute))
                .map(|naive| resolve(tz, naive))
                .find(|candidate| *candidate > after)
                .unwrap_or(after + Duration::days(1)),
            Schedule::WeeklyAt {
                weekday,
                hour,
                minute,
            } => (0..=8)
                .map(|offset| today + Duration::days(offset))
                .filter(|date| date.weekday() == weekday)
                .filter_map(|date| at(date, hour, minute))
                .map(|naive| resolve(tz, naive))
                .find(|candidate| *candidate > after)
                .unwrap_or(after + Duration::weeks(1)),
            Schedule::Hourly { minute } => {
                let hour_start = at(today, local.hour(), 0).unwrap_or(local);
                (0..=2)
                    .map(|offset| hour_start + Duration::hours(offset) + Duration::minutes(minute as i64))
                    .map(|naive| resolve(tz, naive))
                    .find(|candidate| *candidate > after)
                    .unwrap_or(after + Duration::hours(1))
            }
            Schedule::EveryMinutes(step) => {
                let step = step.clamp(1, 60) as i64;
                let minute_start = at(today, local.hour(), local.minute()).unwrap_or(local);
                (1..=60)
                    .map(|offset| minute_start + Duration::minutes(offset))
                    .filter(|naive| naive.minute() as i64 % step == 0)
                    .map(|naive| resolve(tz, naive))
                    .find(|candidate| *candidate > after)
                    .unwrap_or(after + Duration::minutes(step))
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScheduledJob {
    pub name: &'static str,
    pub schedule: Schedule,
    pub task_type: TaskType,
}

impl ScheduledJob {
    fn payload(&self) -> serde_json::Value {
        match self.task_type {
            TaskType::RefreshAllData => Task::payload_from(&RefreshAllDataPayload {
                triggered_by: Some("scheduler".to_string()),
            }),
            _ => serde_json::json!({}),
        }
    }
}

/// Daily refresh, hourly warm, periodic health probe and weekly cleanup.
pub fn default_jobs(config: &SchedulerConfig) -> Vec<ScheduledJob> {
    vec![
        ScheduledJob {
            name: "daily-data-refresh",
            schedule: Schedule::DailyAt {
                hour: config.daily_refresh_hour,
                minute: 0,
            },
            task_type: TaskType::RefreshAllData,
        },
        ScheduledJob {
            name: "hourly-cache-warm",
            schedule: Schedule::Hourly { minute: 0 },
            task_type: TaskType::WarmCache,
        },
        ScheduledJob {
            name: "system-health-check",
            schedule: Schedule::EveryMinutes(config.health_check_interval_minutes),
            task_type: TaskType::HealthCheck,
        },
        ScheduledJob {
            name: "weekly-cleanup",
            schedule: Schedule::WeeklyAt {
                weekday: config.cleanup_weekday,
                hour: config.cleanup_hour,
                minute: 0,
            },
            task_type: TaskType::CleanupOldData,
        },
    ]
}

pub struct MaintenanceScheduler {
    queue: TaskQueue,
    jobs: Vec<ScheduledJob>,
    timezone: Tz,
    shutdown_tx: broadcast::Sender<()>,
}

impl MaintenanceScheduler {
    pub fn new(queue: TaskQueue, jobs: Vec<ScheduledJob>, timezone: Tz) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            queue,
            jobs,
            timezone,
            shutdown_tx,
        }
    }

    pub fn from_config(queue: TaskQueue, config: &SchedulerConfig) -> Self {
        Self::new(queue, default_jobs(config), config.timezone)
    }

    pub fn jobs(&self) -> &[ScheduledJob] {
        &self.jobs
    }

    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Spawn one timer loop per job.
    pub fn spawn(self) -> Vec<JoinHandle<()>> {
        tracing::info!(
            jobs = self.jobs.len(),
            timezone = %self.timezone,
            "Maintenance scheduler started"
        );
        self.jobs
            .iter()
            .cloned()
            .map(|job| {
                let queue = self.queue.clone();
                let tz = self.timezone;
                let mut shutdown_rx = self.shutdown_tx.subscribe();
                tokio::spawn(async move {
                    loop {
                        let now = Utc::now();
                        let next = job.schedule.next_after(now, tz);
                        let wait = (next - now).to_std().unwrap_or_default();
                        tracing::debug!(job = job.name, next_run = %next, "Next scheduled run");

                        tokio::select! {
                            _ = tokio::time::sleep(wait) => {
                                match queue.submit_task(job.task_type, job.payload()).await {
                                    Ok(task_id) => tracing::info!(job = job.name, task.id = %task_id, "Scheduled task submitted"),
                                    Err(e) => tracing::error!(job = job.name, error = %e, "Failed to submit scheduled task"),
                                }
                            }
                            _ = shutdown_rx.recv() => break,
                        }
                    }
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::Asia::Tehran;

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    fn local(dt: DateTime<Utc>) -> NaiveDateTime {
        dt.with_timezone(&Tehran).naive_local()
    }

    #[test]
    fn daily_refresh_fires_at_local_nine() {
        // 2024-06-03 04:00 UTC is 07:30 in Tehran.
        let next = Schedule::DailyAt { hour: 9, minute: 0 }.next_after(utc(2024, 6, 3, 4, 0), Tehran);
        assert_eq!(local(next), at(NaiveDate::from_ymd_opt(2024, 6, 3).unwrap(), 9, 0).unwrap());

        // Exactly at the fire time moves to the next day.
        let again = Schedule::DailyAt { hour: 9, minute: 0 }.next_after(next, Tehran);
        assert_eq!(again - next, Duration::days(1));
    }

    #[test]
    fn hourly_fires_on_local_hour() {
        // 10:40 UTC is 14:10 in Tehran; next local :00 is 15:00.
        let next = Schedule::Hourly { minute: 0 }.next_after(utc(2024, 6, 3, 10, 40), Tehran);
        assert_eq!(local(next).time(), chrono::NaiveTime::from_hms_opt(15, 0, 0).unwrap());
        assert_eq!(next, utc(2024, 6, 3, 11, 30));
    }

    #[test]
    fn health_probe_every_fifteen_minutes() {
        let schedule = Schedule::EveryMinutes(15);
        let start = utc(2024, 6, 3, 10, 31);
        let next = schedule.next_after(start, Tehran);
        assert_eq!(local(next).minute(), 15);
        assert_eq!(schedule.next_after(next, Tehran) - next, Duration::minutes(15));
    }

    #[test]
    fn weekly_cleanup_on_monday_morning() {
        let schedule = Schedule::WeeklyAt {
            weekday: Weekday::Mon,
            hour: 2,
            minute: 0,
        };
        // Wednesday 2024-06-05.
        let next = schedule.next_after(utc(2024, 6, 5, 12, 0), Tehran);
        let next_local = local(next);
        assert_eq!(next_local.weekday(), Weekday::Mon);
        assert_eq!(next_local.date(), NaiveDate::from_ymd_opt(2024, 6, 10).unwrap());
        assert_eq!(next_local.hour(), 2);
        assert_eq!(schedule.next_after(next, Tehran) - next, Duration::weeks(1));
    }

    #[test]
    fn default_jobs_follow_config() {
        let jobs = default_jobs(&SchedulerConfig::default());
        assert_eq!(jobs.len(), 4);
        assert_eq!(
            jobs[0].schedule,
            Schedule::DailyAt { hour: 9, minute: 0 }
        );
        assert_eq!(jobs[2].schedule, Schedule::EveryMinutes(15));
        assert_eq!(jobs[0].payload()["triggered_by"], "scheduler");
    }
}
