// Timer loops that drive the update jobs.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Days, NaiveTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{error, info};

use fantacup_core::config::Config;
use fantacup_core::db::settings;

use crate::updater::UpdateCoordinator;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleTimes {
    /// UTC hour of the daily full-schedule sync.
    pub daily_hour_utc: u32,
    pub results_every: Duration,
    pub leaderboard_every: Duration,
}

impl ScheduleTimes {
    pub fn from_config(config: &Config) -> Self {
        Self {
            daily_hour_utc: config.schedule.daily_hour_utc,
            results_every: Duration::from_secs(config.results.interval_minutes * 60),
            leaderboard_every: Duration::from_secs(config.updates.leaderboard_interval_minutes * 60),
        }
    }
}

/// Time from `now` until the next `hour:00:00` UTC. A run due exactly now is
/// scheduled for tomorrow.
pub fn until_next_daily_run(now: DateTime<Utc>, hour: u32) -> Duration {
    let at = NaiveTime::from_hms_opt(hour.min(23), 0, 0).unwrap_or(NaiveTime::MIN);
    let today = now.date_naive().and_time(at).and_utc();
    let next = if today > now {
        today
    } else {
        today
            .checked_add_days(Days::new(1))
            .unwrap_or(today)
    };
    (next - now).to_std().unwrap_or(Duration::ZERO)
}

/// Spawn every background loop. Each job has its own task so a slow fetch
/// in one never delays the others.
pub fn spawn(coordinator: Arc<UpdateCoordinator>, times: ScheduleTimes) -> Vec<JoinHandle<()>> {
    info!(
        daily_hour_utc = times.daily_hour_utc,
        results_every_secs = times.results_every.as_secs(),
        leaderboard_every_secs = times.leaderboard_every.as_secs(),
        "starting scheduler"
    );
    vec![
        tokio::spawn(initial_sync(Arc::clone(&coordinator))),
        tokio::spawn(schedule_loop(Arc::clone(&coordinator), times.daily_hour_utc)),
        tokio::spawn(results_loop(Arc::clone(&coordinator), times.results_every)),
        tokio::spawn(leaderboard_loop(coordinator, times.leaderboard_every)),
    ]
}

/// Populate an empty store right away instead of waiting for the next
/// daily slot.
async fn initial_sync(coordinator: Arc<UpdateCoordinator>) {
    match coordinator.db().get_setting(settings::LAST_SCHEDULE_UPDATE) {
        Ok(Some(_)) => {}
        Ok(None) => {
            info!("no schedule sync on record, running one now");
            run_schedule(&coordinator).await;
        }
        Err(e) => error!("cannot read last schedule sync: {e:#}"),
    }
}

async fn schedule_loop(coordinator: Arc<UpdateCoordinator>, hour: u32) {
    loop {
        let wait = until_next_daily_run(Utc::now(), hour);
        info!(in_secs = wait.as_secs(), "next schedule sync scheduled");
        tokio::time::sleep(wait).await;
        run_schedule(&coordinator).await;
    }
}

async fn results_loop(coordinator: Arc<UpdateCoordinator>, every: Duration) {
    let mut ticker = interval_at(Instant::now() + every, every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        if let Err(e) = coordinator.run_results_update().await {
            error!("scheduled results update failed: {e}");
        }
    }
}

async fn leaderboard_loop(coordinator: Arc<UpdateCoordinator>, every: Duration) {
    let mut ticker = interval_at(Instant::now() + every, every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        if let Err(e) = coordinator.recalculate_leaderboard() {
            error!("scheduled leaderboard recalculation failed: {e:#}");
        }
    }
}

async fn run_schedule(coordinator: &UpdateCoordinator) {
    if let Err(e) = coordinator.run_schedule_update().await {
        error!("scheduled schedule update failed: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 20, h, m, s).unwrap()
    }

    #[test]
    fn daily_run_later_today() {
        assert_eq!(until_next_daily_run(at(1, 30, 0), 3), Duration::from_secs(90 * 60));
    }

    #[test]
    fn daily_run_already_passed_goes_to_tomorrow() {
        assert_eq!(
            until_next_daily_run(at(3, 0, 1), 3),
            Duration::from_secs(24 * 3600 - 1)
        );
    }

    #[test]
    fn daily_run_exactly_now_goes_to_tomorrow() {
        assert_eq!(until_next_daily_run(at(3, 0, 0), 3), Duration::from_secs(24 * 3600));
    }

    #[test]
    fn daily_run_crosses_month_end() {
        let now = Utc.with_ymd_and_hms(2025, 6, 30, 23, 0, 0).unwrap();
        assert_eq!(until_next_daily_run(now, 0), Duration::from_secs(3600));
    }
}
