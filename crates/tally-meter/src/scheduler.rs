//! Periodic scheduling
//!
//! Three long-lived loops share one stop signal:
//! - metering: minute-aligned ticks, a tick is skipped while the previous
//!   fan-out is still running
//! - traffic: hour windows, missed ticks are replayed so windows never gap
//! - retention: once at start, then daily

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tally_store::UsageStore;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, interval_at, sleep_until, Instant, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::fanout::FanOut;
use crate::traffic::{next_boundary, TrafficMeter, TrafficWindow};

const DAY: Duration = Duration::from_secs(24 * 60 * 60);
const HOUR: Duration = Duration::from_secs(60 * 60);

/// Wall-clock time until the next multiple of `period`
pub fn until_next(period: Duration) -> Duration {
    wait_from(Utc::now(), period)
}

fn wait_from(now: DateTime<Utc>, period: Duration) -> Duration {
    let Ok(chrono_period) = chrono::Duration::from_std(period) else {
        return period;
    };
    (next_boundary(now, chrono_period) - now)
        .to_std()
        .unwrap_or(Duration::ZERO)
}

/// Owns the background loops
pub struct Scheduler {
    fan_out: Arc<FanOut>,
    traffic: Option<Arc<TrafficMeter>>,
    store: Arc<dyn UsageStore>,
    tick: Duration,
    retention_days: u32,
}

impl Scheduler {
    pub fn new(fan_out: Arc<FanOut>, store: Arc<dyn UsageStore>) -> Self {
        Self {
            fan_out,
            traffic: None,
            store,
            tick: Duration::from_secs(60),
            retention_days: tally_common::DEFAULT_RETENTION_DAYS,
        }
    }

    /// Enable the hourly traffic loop
    pub fn with_traffic(mut self, traffic: Arc<TrafficMeter>) -> Self {
        self.traffic = Some(traffic);
        self
    }

    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    pub fn with_retention_days(mut self, days: u32) -> Self {
        self.retention_days = days;
        self
    }

    /// Spawn all loops
    pub fn start(self) -> SchedulerHandle {
        let (stop, stopped) = watch::channel(false);
        let mut tasks = vec![
            tokio::spawn(metering_loop(self.fan_out, self.tick, stopped.clone())),
            tokio::spawn(retention_loop(self.store, self.retention_days, stopped.clone())),
        ];
        match self.traffic {
            Some(traffic) => tasks.push(tokio::spawn(traffic_loop(traffic, stopped))),
            None => info!("No traffic source configured, hourly traffic metering disabled"),
        }
        info!(loops = tasks.len(), "Scheduler started");
        SchedulerHandle { stop, tasks }
    }
}

/// Running scheduler
pub struct SchedulerHandle {
    stop: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Stop every loop and wait for in-flight passes to finish
    pub async fn shutdown(self) {
        info!("Stopping scheduler");
        let _ = self.stop.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                error!(error = %e, "Scheduler loop panicked");
            }
        }
        info!("Scheduler stopped");
    }
}

async fn metering_loop(fan_out: Arc<FanOut>, tick: Duration, mut stop: watch::Receiver<bool>) {
    let delay = until_next(tick);
    info!(delay_ms = delay.as_millis() as u64, "Metering loop waiting for first tick");
    let mut ticker = interval_at(Instant::now() + delay, tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut in_flight: Option<JoinHandle<()>> = None;
    loop {
        tokio::select! {
            biased;
            _ = stop.changed() => break,
            _ = ticker.tick() => {
                if in_flight.as_ref().is_some_and(|pass| !pass.is_finished()) {
                    warn!("Previous metering pass still running, skipping tick");
                    continue;
                }
                let fan_out = fan_out.clone();
                in_flight = Some(tokio::spawn(async move {
                    if let Err(e) = fan_out.run().await {
                        error!(error = %e, "Metering pass failed");
                    }
                }));
            }
        }
    }

    if let Some(pass) = in_flight {
        if let Err(e) = pass.await {
            error!(error = %e, "Metering pass panicked");
        }
    }
    info!("Metering loop stopped");
}

async fn traffic_loop(meter: Arc<TrafficMeter>, mut stop: watch::Receiver<bool>) {
    let mut window = TrafficWindow::first(Utc::now());
    let boundary = Instant::now() + (window.end - window.start).to_std().unwrap_or(Duration::ZERO);
    info!(first_end = %window.end, "Traffic loop waiting for first window");

    tokio::select! {
        biased;
        _ = stop.changed() => return,
        _ = sleep_until(boundary) => {}
    }
    run_traffic_pass(&meter, window).await;

    let mut ticker = interval_at(boundary + HOUR, HOUR);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Burst);
    loop {
        tokio::select! {
            biased;
            _ = stop.changed() => break,
            _ = ticker.tick() => {
                window = window.next();
                run_traffic_pass(&meter, window).await;
            }
        }
    }
    info!("Traffic loop stopped");
}

async fn run_traffic_pass(meter: &TrafficMeter, window: TrafficWindow) {
    if let Err(e) = meter.run(window).await {
        error!(start = %window.start, end = %window.end, error = %e, "Traffic pass failed");
    }
}

async fn retention_loop(store: Arc<dyn UsageStore>, days: u32, mut stop: watch::Receiver<bool>) {
    let mut ticker = interval(DAY);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            biased;
            _ = stop.changed() => break,
            _ = ticker.tick() => {
                match store.delete_older_than(days).await {
                    Ok(deleted) => info!(deleted, days, "Retention sweep complete"),
                    Err(e) => error!(error = %e, "Retention sweep failed"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_until_next_is_within_period() {
        let wait = until_next(Duration::from_secs(60));
        assert!(wait <= Duration::from_secs(60));
        let wait = until_next(HOUR);
        assert!(wait <= HOUR);
    }

    #[test]
    fn test_first_tick_lands_on_boundary() {
        use chrono::{TimeZone, Timelike};

        let now = Utc.with_ymd_and_hms(2024, 3, 1, 10, 15, 42).unwrap()
            + chrono::Duration::milliseconds(300);
        let wait = wait_from(now, Duration::from_secs(60));
        assert_eq!(wait, Duration::from_millis(17_700));
        let first = now + chrono::Duration::from_std(wait).unwrap();
        assert_eq!((first.minute(), first.second(), first.nanosecond()), (16, 0, 0));

        // already on a boundary: wait a whole period
        let on_minute = Utc.with_ymd_and_hms(2024, 3, 1, 10, 16, 0).unwrap();
        assert_eq!(wait_from(on_minute, Duration::from_secs(60)), Duration::from_secs(60));

        let wait = wait_from(now, HOUR);
        let first = now + chrono::Duration::from_std(wait).unwrap();
        assert_eq!((first.hour(), first.minute(), first.second()), (11, 0, 0));
    }
}
