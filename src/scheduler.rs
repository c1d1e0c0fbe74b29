//! 定时任务调度
//! Generic scheduler for idempotent background jobs (session sweeps,
//! nightly counter resets, hourly aggregation)

use std::thread::{self, JoinHandle};
use std::time::Duration as StdDuration;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, NaiveTime, TimeZone, Timelike, Utc};
use crossbeam_channel::{RecvTimeoutError, Sender};
use tracing::{debug, info};

/// 触发规则 (UTC)
#[derive(Clone, Debug, PartialEq)]
pub enum Trigger {
    /// 固定间隔
    Every(StdDuration),
    /// 每小时第 `minute` 分
    HourlyAt { minute: u32 },
    /// 每天固定时刻
    DailyAt(NaiveTime),
}

impl Trigger {
    /// 严格晚于 `after` 的下一次触发时间
    pub fn next_after(&self, after: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Trigger::Every(interval) => {
                let step = Duration::from_std(*interval)
                    .unwrap_or_else(|_| Duration::days(1))
                    .max(Duration::milliseconds(1));
                after + step
            }
            Trigger::HourlyAt { minute } => {
                let candidate = after
                    .date_naive()
                    .and_hms_opt(after.hour(), (*minute).min(59), 0)
                    .map(|naive| Utc.from_utc_datetime(&naive))
                    .unwrap_or(after);
                if candidate > after {
                    candidate
                } else {
                    candidate + Duration::hours(1)
                }
            }
            Trigger::DailyAt(time) => {
                let candidate = Utc.from_utc_datetime(&after.date_naive().and_time(*time));
                if candidate > after {
                    candidate
                } else {
                    candidate + Duration::days(1)
                }
            }
        }
    }
}

type JobFn = Box<dyn FnMut(DateTime<Utc>) + Send>;

struct Job {
    name: String,
    trigger: Trigger,
    next_run: DateTime<Utc>,
    callback: JobFn,
}

#[derive(Default)]
pub struct Scheduler {
    jobs: Vec<Job>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册任务, 首次触发时间从 `now` 算起
    pub fn add<F>(
        &mut self,
        name: impl Into<String>,
        trigger: Trigger,
        now: DateTime<Utc>,
        callback: F,
    ) where
        F: FnMut(DateTime<Utc>) + Send + 'static,
    {
        let next_run = trigger.next_after(now);
        let name = name.into();
        debug!(job = %name, %next_run, "job scheduled");
        self.jobs.push(Job {
            name,
            trigger,
            next_run,
            callback: Box::new(callback),
        });
    }

    /// 执行所有到期任务, 返回执行数量; 错过的周期不补跑
    pub fn run_pending(&mut self, now: DateTime<Utc>) -> usize {
        let mut ran = 0;
        for job in self.jobs.iter_mut().filter(|j| j.next_run <= now) {
            debug!(job = %job.name, "running scheduled job");
            (job.callback)(now);
            job.next_run = job.trigger.next_after(now);
            ran += 1;
        }
        ran
    }

    pub fn next_wakeup(&self) -> Option<DateTime<Utc>> {
        self.jobs.iter().map(|j| j.next_run).min()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// 在独立线程上运行调度循环
    pub fn spawn(mut self) -> Result<SchedulerHandle> {
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
        let handle = thread::Builder::new()
            .name("scheduler".to_string())
            .spawn(move || {
                info!(jobs = self.jobs.len(), "scheduler started");
                loop {
                    let wait = self
                        .next_wakeup()
                        .map(|t| (t - Utc::now()).to_std().unwrap_or(StdDuration::ZERO))
                        .unwrap_or(StdDuration::from_secs(60))
                        .min(StdDuration::from_secs(60));
                    match stop_rx.recv_timeout(wait) {
                        Err(RecvTimeoutError::Timeout) => {
                            self.run_pending(Utc::now());
                        }
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                info!("scheduler stopped");
            })
            .context("failed to spawn scheduler thread")?;

        Ok(SchedulerHandle {
            stop: stop_tx,
            handle,
        })
    }
}

pub struct SchedulerHandle {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

impl SchedulerHandle {
    /// 停止调度线程并等待退出
    pub fn shutdown(self) {
        let _ = self.stop.try_send(());
        let _ = self.handle.join();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, h, m, s).unwrap()
    }

    #[test]
    fn test_next_after_rules() {
        let every = Trigger::Every(StdDuration::from_secs(90));
        assert_eq!(every.next_after(at(8, 0, 0)), at(8, 1, 30));

        let hourly = Trigger::HourlyAt { minute: 15 };
        assert_eq!(hourly.next_after(at(8, 10, 0)), at(8, 15, 0));
        assert_eq!(hourly.next_after(at(8, 15, 0)), at(9, 15, 0));

        let midnight = Trigger::DailyAt(NaiveTime::from_hms_opt(0, 0, 0).unwrap());
        assert_eq!(
            midnight.next_after(at(8, 0, 0)),
            Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_run_pending() {
        let counter = Arc::new(AtomicU32::new(0));
        let mut scheduler = Scheduler::new();
        let c = counter.clone();
        let every_30s = Trigger::Every(StdDuration::from_secs(30));
        scheduler.add("sweep", every_30s, at(8, 0, 0), move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(scheduler.run_pending(at(8, 0, 10)), 0);
        assert_eq!(scheduler.run_pending(at(8, 0, 30)), 1);
        // 错过多个周期只执行一次
        assert_eq!(scheduler.run_pending(at(8, 5, 0)), 1);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert_eq!(scheduler.next_wakeup(), Some(at(8, 5, 30)));
    }

    #[test]
    fn test_spawned_scheduler_runs_and_stops() {
        let counter = Arc::new(AtomicU32::new(0));
        let mut scheduler = Scheduler::new();
        let c = counter.clone();
        scheduler.add(
            "tick",
            Trigger::Every(StdDuration::from_millis(10)),
            Utc::now(),
            move |_| {
                c.fetch_add(1, Ordering::SeqCst);
            },
        );

        let handle = scheduler.spawn().unwrap();
        let deadline = std::time::Instant::now() + StdDuration::from_secs(5);
        while counter.load(Ordering::SeqCst) == 0 && std::time::Instant::now() < deadline {
            thread::sleep(StdDuration::from_millis(5));
        }
        handle.shutdown();
        assert!(counter.load(Ordering::SeqCst) >= 1);
    }
}
