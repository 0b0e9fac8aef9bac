use chrono::{Local, NaiveDate, NaiveDateTime};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::backup::BackupOrchestrator;
use crate::cloud_sync::CloudSync;
use crate::models::Settings;
use crate::power::{PowerCommand, PowerControl};
use crate::schedule::{self, Clock, SystemClock};
use crate::store::JsonStore;

pub const TICK_SECS: u64 = 60;

/// A fire time missed by more than this (the process was down, the clock
/// jumped) is skipped for the day rather than run hours late.
const MISFIRE_GRACE_SECS: i64 = 3600;

/// Tracks what the periodic tick has already done, so a minute observed
/// twice fires once and the TV is only poked on transitions.
pub struct Scheduler {
    last_backup_fired: Mutex<Option<NaiveDate>>,
    last_power_applied: Mutex<Option<bool>>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Scheduler {
            last_backup_fired: Mutex::new(None),
            last_power_applied: Mutex::new(None),
        }
    }

    /// True at most once per calendar day, once the configured HH:MM has
    /// passed.
    pub fn backup_due(&self, backup_time: &str, now: NaiveDateTime) -> bool {
        let scheduled = match schedule::parse_hhmm(backup_time) {
            Ok(time) => time,
            Err(_) => return false,
        };
        let today = now.date();
        let mut last = self.last_backup_fired.lock().expect("scheduler poisoned");
        if *last == Some(today) {
            return false;
        }
        let scheduled_at = today.and_time(scheduled);
        if now < scheduled_at {
            return false;
        }
        *last = Some(today);
        if (now - scheduled_at).num_seconds() > MISFIRE_GRACE_SECS {
            return false;
        }
        true
    }

    /// Some(desired) only when the schedule's verdict changed since the last
    /// tick; repeating the same CEC command every minute would be noise.
    pub fn power_transition(&self, active: bool) -> Option<bool> {
        let mut last = self.last_power_applied.lock().expect("scheduler poisoned");
        if *last == Some(active) {
            None
        } else {
            *last = Some(active);
            Some(active)
        }
    }
}

/// When the daily job will next fire, for the status endpoint.
pub fn next_backup_run(backup_time: &str, now: NaiveDateTime) -> Option<String> {
    let scheduled = schedule::parse_hhmm(backup_time).ok()?;
    let today_at = now.date().and_time(scheduled);
    let next = if now < today_at {
        today_at
    } else {
        today_at + chrono::Duration::days(1)
    };
    Some(next.format("%Y-%m-%dT%H:%M:%S").to_string())
}

/// The background tick started at launch. Reads settings fresh each minute;
/// long work (the transfer, the CEC handshake) is pushed onto blocking
/// threads so the tick never stalls.
pub fn spawn(
    settings: Arc<JsonStore<Settings>>,
    orchestrator: Arc<BackupOrchestrator>,
    sync: Arc<dyn CloudSync>,
    power: Arc<dyn PowerControl>,
    scheduler: Arc<Scheduler>,
) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(TICK_SECS));
        loop {
            interval.tick().await;
            let settings = match settings.load() {
                Ok(settings) => settings,
                Err(err) => {
                    eprintln!("Scheduler could not read settings: {}", err);
                    continue;
                }
            };

            if settings.backup_enabled
                && orchestrator.configured()
                && scheduler.backup_due(&settings.backup_time, Local::now().naive_local())
            {
                println!("Scheduled backup firing");
                let orchestrator = orchestrator.clone();
                let sync = sync.clone();
                let remote = settings.backup_path.clone();
                tokio::task::spawn_blocking(move || {
                    match orchestrator.run(sync.as_ref(), &remote) {
                        Ok(run) => println!("Scheduled backup finished: {:?}", run.status),
                        Err(err) => eprintln!("Scheduled backup did not run: {}", err),
                    }
                });
            }

            if !settings.tv_schedules.is_empty() {
                let (weekday, time) = SystemClock.now();
                let active = schedule::is_active(&settings.tv_schedules, weekday, time);
                if let Some(desired) = scheduler.power_transition(active) {
                    let power = power.clone();
                    tokio::task::spawn_blocking(move || {
                        let command = if desired {
                            PowerCommand::On
                        } else {
                            PowerCommand::Standby
                        };
                        println!("TV schedule transition, sending {:?}", command);
                        if let Err(err) = power.set_power(command) {
                            eprintln!("Power control failed: {}", err);
                        }
                    });
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(date: (i32, u32, u32), time: (u32, u32)) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(date.0, date.1, date.2)
            .unwrap()
            .and_hms_opt(time.0, time.1, 0)
            .unwrap()
    }

    #[test]
    fn fires_once_per_day_at_the_configured_minute() {
        let scheduler = Scheduler::new();
        assert!(!scheduler.backup_due("03:00", at((2024, 5, 1), (2, 59))));
        assert!(scheduler.backup_due("03:00", at((2024, 5, 1), (3, 0))));
        // same minute seen again, and later the same day
        assert!(!scheduler.backup_due("03:00", at((2024, 5, 1), (3, 0))));
        assert!(!scheduler.backup_due("03:00", at((2024, 5, 1), (3, 30))));
        // next day fires again
        assert!(scheduler.backup_due("03:00", at((2024, 5, 2), (3, 0))));
    }

    #[test]
    fn a_little_late_still_fires_too_late_skips() {
        let scheduler = Scheduler::new();
        assert!(scheduler.backup_due("03:00", at((2024, 5, 1), (3, 40))));

        let scheduler = Scheduler::new();
        // process came back five hours late; skip today, resume tomorrow
        assert!(!scheduler.backup_due("03:00", at((2024, 5, 1), (8, 0))));
        assert!(!scheduler.backup_due("03:00", at((2024, 5, 1), (8, 1))));
        assert!(scheduler.backup_due("03:00", at((2024, 5, 2), (3, 0))));
    }

    #[test]
    fn unparseable_time_never_fires() {
        let scheduler = Scheduler::new();
        assert!(!scheduler.backup_due("3 am", at((2024, 5, 1), (3, 0))));
    }

    #[test]
    fn power_fires_only_on_transitions() {
        let scheduler = Scheduler::new();
        assert_eq!(Some(true), scheduler.power_transition(true));
        assert_eq!(None, scheduler.power_transition(true));
        assert_eq!(Some(false), scheduler.power_transition(false));
        assert_eq!(None, scheduler.power_transition(false));
        assert_eq!(Some(true), scheduler.power_transition(true));
    }

    #[test]
    fn next_run_rolls_to_tomorrow_after_the_hour() {
        assert_eq!(
            Some("2024-05-01T03:00:00".to_string()),
            next_backup_run("03:00", at((2024, 5, 1), (1, 0)))
        );
        assert_eq!(
            Some("2024-05-02T03:00:00".to_string()),
            next_backup_run("03:00", at((2024, 5, 1), (9, 0)))
        );
        assert_eq!(None, next_backup_run("whenever", at((2024, 5, 1), (9, 0))));
    }
}
